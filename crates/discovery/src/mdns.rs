//! mDNS-SD broadcast and browse
//!
//! Service: `_http._tcp.local.`, subtype `munkey-http`.
//! TXT records: `__mkey_proto_validate__=TRUE`, `__mkey_proto_uuid__=<uuid>`.
//!
//! The browse loop translates mDNS-SD events into [`PeerEvent`]s on an mpsc
//! queue. The activity consumer reads that queue, so probe recursion never
//! re-enters the browser.

use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use munkey_core::{Error, PeerEvent, Result};
use munkey_identity::NodeIdentity;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::{SERVICE_SUBTYPE, TXT_UUID_KEY, TXT_VALIDATE_KEY, TXT_VALIDATE_VALUE};

/// Browse event channel depth
const EVENT_CHANNEL_CAPACITY: usize = 100;

/// What was registered, for unregister-on-stop and re-announcement
#[derive(Debug, Clone)]
struct RegisteredService {
    fullname: String,
    uuid: String,
    port: u16,
}

/// mDNS broadcast + browse for Munkey nodes
pub struct MdnsService {
    daemon: Arc<Mutex<Option<ServiceDaemon>>>,
    registered: Mutex<Option<RegisteredService>>,
    running: Arc<Mutex<bool>>,
}

impl MdnsService {
    pub fn new() -> Result<Self> {
        let daemon = ServiceDaemon::new()
            .map_err(|e| Error::Transport(format!("Failed to create mDNS daemon: {}", e)))?;

        Ok(Self {
            daemon: Arc::new(Mutex::new(Some(daemon))),
            registered: Mutex::new(None),
            running: Arc::new(Mutex::new(false)),
        })
    }

    /// Publishes this node's service record.
    pub async fn broadcast(&self, identity: &NodeIdentity, service_port: u16) -> Result<()> {
        let daemon_guard = self.daemon.lock().await;
        let daemon = daemon_guard.as_ref().ok_or(Error::ServerNotRunning)?;

        let fullname = register_service(daemon, identity.uuid(), service_port)?;
        *self.registered.lock().await = Some(RegisteredService {
            fullname,
            uuid: identity.uuid().to_string(),
            port: service_port,
        });
        info!(uuid = %identity.uuid(), port = service_port, "mDNS broadcast registered");
        Ok(())
    }

    /// Re-registers the service record, picking up the current local IP.
    /// Called by the daemon when the network monitor reports a change.
    pub async fn re_announce(&self) -> Result<()> {
        let daemon_guard = self.daemon.lock().await;
        let daemon = daemon_guard.as_ref().ok_or(Error::ServerNotRunning)?;

        let mut registered = self.registered.lock().await;
        let service = registered.clone().ok_or(Error::ServerNotRunning)?;

        if let Err(e) = daemon.unregister(&service.fullname) {
            warn!(service = %service.fullname, error = %e, "Unregister before re-announce failed");
        }
        let fullname = register_service(daemon, &service.uuid, service.port)?;
        info!(uuid = %service.uuid, "mDNS service re-announced");
        *registered = Some(RegisteredService { fullname, ..service });

        Ok(())
    }

    /// Starts browsing; returns the peer-event queue.
    pub async fn browse(&self) -> Result<mpsc::Receiver<PeerEvent>> {
        let daemon_guard = self.daemon.lock().await;
        let daemon = daemon_guard.as_ref().ok_or(Error::ServerNotRunning)?;

        let receiver = daemon
            .browse(SERVICE_SUBTYPE)
            .map_err(|e| Error::Transport(format!("Failed to browse: {}", e)))?;
        drop(daemon_guard);

        *self.running.lock().await = true;
        info!(service = SERVICE_SUBTYPE, "mDNS browse started");

        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let running = Arc::clone(&self.running);

        tokio::spawn(async move {
            // Addresses seen per fullname, so removal events can name them
            let mut resolved: HashMap<String, (Vec<IpAddr>, u16)> = HashMap::new();

            while *running.lock().await {
                match receiver.recv_timeout(std::time::Duration::from_secs(1)) {
                    Ok(event) => {
                        if let Some(peer_event) = translate_event(event, &mut resolved) {
                            if event_tx.send(peer_event).await.is_err() {
                                debug!("Peer event consumer dropped, stopping browse loop");
                                break;
                            }
                        }
                    }
                    Err(e) => {
                        let err_str = format!("{:?}", e);
                        if err_str.contains("Timeout") {
                            continue;
                        }
                        warn!("mDNS receiver disconnected");
                        break;
                    }
                }
            }
            debug!("mDNS browse loop stopped");
        });

        Ok(event_rx)
    }

    /// Unregisters and tears the daemon down. Idempotent.
    pub async fn stop(&self) -> Result<()> {
        *self.running.lock().await = false;

        let registered = self.registered.lock().await.take();
        let daemon = self.daemon.lock().await.take();

        if let Some(daemon) = daemon {
            if let Some(service) = registered {
                if let Err(e) = daemon.unregister(&service.fullname) {
                    warn!(service = %service.fullname, error = %e, "Unregister failed");
                }
            }
            daemon
                .shutdown()
                .map_err(|e| Error::Transport(format!("mDNS shutdown failed: {}", e)))?;
            info!("mDNS service stopped");
        }
        Ok(())
    }
}

impl std::fmt::Debug for MdnsService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MdnsService").finish_non_exhaustive()
    }
}

/// Builds and registers the service record against the current local IP.
/// Returns the registered fullname.
fn register_service(daemon: &ServiceDaemon, uuid: &str, service_port: u16) -> Result<String> {
    let host_ipv4 = local_ip_address::local_ip()
        .unwrap_or_else(|_| "127.0.0.1".parse().expect("loopback parses"));

    let mut properties = HashMap::new();
    properties.insert(TXT_VALIDATE_KEY.to_string(), TXT_VALIDATE_VALUE.to_string());
    properties.insert(TXT_UUID_KEY.to_string(), uuid.to_string());

    let instance_name = format!("Munkey Vault[{}]", uuid);
    let service_hostname = format!("{}.local.", uuid.replace('-', ""));

    let service_info = ServiceInfo::new(
        SERVICE_SUBTYPE,
        &instance_name,
        &service_hostname,
        host_ipv4,
        service_port,
        Some(properties),
    )
    .map_err(|e| Error::Transport(format!("Failed to create service record: {}", e)))?;

    let fullname = service_info.get_fullname().to_string();
    daemon
        .register(service_info)
        .map_err(|e| Error::Transport(format!("Failed to register service: {}", e)))?;
    Ok(fullname)
}

/// Maps one mDNS-SD event onto a peer event, updating the resolution cache.
fn translate_event(
    event: ServiceEvent,
    resolved: &mut HashMap<String, (Vec<IpAddr>, u16)>,
) -> Option<PeerEvent> {
    match event {
        ServiceEvent::ServiceResolved(info) => {
            let fullname = info.get_fullname().to_string();
            let addresses: Vec<IpAddr> = info.get_addresses().iter().copied().collect();
            let port = info.get_port();

            let txt: HashMap<String, String> = info
                .get_properties()
                .iter()
                .map(|property| (property.key().to_string(), property.val_str().to_string()))
                .collect();

            resolved.insert(fullname.clone(), (addresses.clone(), port));
            debug!(service = %fullname, "Service resolved");

            Some(PeerEvent::Up {
                instance: fullname,
                addresses,
                port,
                txt,
            })
        }
        ServiceEvent::ServiceRemoved(_, fullname) => {
            let (addresses, port) = resolved.remove(&fullname)?;
            debug!(service = %fullname, "Service removed");
            Some(PeerEvent::Down {
                instance: fullname,
                addresses,
                port,
            })
        }
        // ServiceFound precedes resolution; nothing to do yet
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolved_event(uuid: &str, ip: &str, port: u16) -> ServiceEvent {
        let mut properties = HashMap::new();
        properties.insert(TXT_VALIDATE_KEY.to_string(), TXT_VALIDATE_VALUE.to_string());
        properties.insert(TXT_UUID_KEY.to_string(), uuid.to_string());

        let info = ServiceInfo::new(
            SERVICE_SUBTYPE,
            &format!("Munkey Vault[{}]", uuid),
            "testhost.local.",
            ip.parse::<IpAddr>().unwrap(),
            port,
            Some(properties),
        )
        .unwrap();
        ServiceEvent::ServiceResolved(info)
    }

    #[test]
    fn resolution_becomes_an_up_event_with_txt() {
        let mut resolved = HashMap::new();
        let event = translate_event(resolved_event("uuid-x", "192.168.1.7", 8044), &mut resolved);

        let Some(PeerEvent::Up {
            addresses,
            port,
            txt,
            ..
        }) = event
        else {
            panic!("expected an Up event");
        };
        assert!(addresses.contains(&"192.168.1.7".parse().unwrap()));
        assert_eq!(port, 8044);
        assert_eq!(txt.get(TXT_VALIDATE_KEY).map(String::as_str), Some("TRUE"));
        assert_eq!(txt.get(TXT_UUID_KEY).map(String::as_str), Some("uuid-x"));
        assert_eq!(resolved.len(), 1);
    }

    #[test]
    fn removal_reuses_the_cached_resolution() {
        let mut resolved = HashMap::new();
        let up = translate_event(resolved_event("uuid-x", "192.168.1.7", 8044), &mut resolved);
        let Some(PeerEvent::Up { instance, .. }) = up else {
            panic!("expected an Up event");
        };

        let down = translate_event(
            ServiceEvent::ServiceRemoved(SERVICE_SUBTYPE.to_string(), instance.clone()),
            &mut resolved,
        );
        let Some(PeerEvent::Down {
            addresses, port, ..
        }) = down
        else {
            panic!("expected a Down event");
        };
        assert!(addresses.contains(&"192.168.1.7".parse().unwrap()));
        assert_eq!(port, 8044);
        assert!(resolved.is_empty());

        // A second removal for the same instance has nothing to report
        let again = translate_event(
            ServiceEvent::ServiceRemoved(SERVICE_SUBTYPE.to_string(), instance),
            &mut resolved,
        );
        assert!(again.is_none());
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let service = match MdnsService::new() {
            Ok(service) => service,
            // No multicast-capable interface in minimal CI environments
            Err(_) => return,
        };
        service.stop().await.unwrap();
        service.stop().await.unwrap();
    }

    #[tokio::test]
    async fn broadcast_after_stop_reports_not_running() {
        let service = match MdnsService::new() {
            Ok(service) => service,
            Err(_) => return,
        };
        service.stop().await.unwrap();

        let identity = NodeIdentity::generate();
        let result = service.broadcast(&identity, 8000).await;
        assert!(matches!(result, Err(Error::ServerNotRunning)));
    }
}
