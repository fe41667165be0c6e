//! Peer activity: transitive discovery and replication attachment
//!
//! `publish_device` probes an endpoint, records it in the APL and recurses
//! into the peers it advertises. The visited set is pre-marked before each
//! recursion, so an APL graph with arbitrary fan-out probes at most one
//! endpoint per distinct `(host, port)`.
//!
//! The browse-event consumer filters TXT records (validation flag present,
//! uuid not our own), tries each advertised IPv4 address in turn, and asks
//! the replication layer to attach a connection for every advertised vault
//! the local registry already holds.

use munkey_core::{DeviceKey, Nickname, PeerEvent, PeerIdentity};
use munkey_identity::NodeIdentity;
use munkey_replication::ConnectionManager;
use munkey_vault::VaultRegistry;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::net::IpAddr;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::apl::ActivePeerList;
use crate::probe::LinkProbe;
use crate::{TXT_UUID_KEY, TXT_VALIDATE_KEY, TXT_VALIDATE_VALUE};

/// Discovery-side coordinator: APL ownership plus the probe and attach
/// logic. Holds borrows (Arcs) of the registry and connection manager; the
/// registry stays the sole owner of vault instances.
pub struct PeerActivity {
    identity: NodeIdentity,
    probe: Arc<dyn LinkProbe>,
    apl: Arc<ActivePeerList>,
    registry: Arc<VaultRegistry>,
    connections: Arc<ConnectionManager>,
}

impl PeerActivity {
    pub fn new(
        identity: NodeIdentity,
        probe: Arc<dyn LinkProbe>,
        registry: Arc<VaultRegistry>,
        connections: Arc<ConnectionManager>,
    ) -> Self {
        Self {
            identity,
            probe,
            apl: Arc::new(ActivePeerList::new()),
            registry,
            connections,
        }
    }

    pub fn apl(&self) -> Arc<ActivePeerList> {
        Arc::clone(&self.apl)
    }

    /// Probes `device` and, on success, records it and transitively probes
    /// the peers it advertises. Returns the device's identity, or `None`
    /// when the probe failed or answered with our own uuid.
    pub fn publish_device<'a>(
        &'a self,
        device: DeviceKey,
        visited: &'a mut HashSet<DeviceKey>,
    ) -> Pin<Box<dyn Future<Output = Option<PeerIdentity>> + Send + 'a>> {
        Box::pin(async move {
            visited.insert(device.clone());

            let identity = match self.probe.probe(&device.host, device.port).await {
                Some(identity) => identity,
                None => {
                    // Failed endpoints lose their APL entry
                    self.apl.remove(&device).await;
                    return None;
                }
            };

            if self.identity.is_self(&identity.unique_id) {
                debug!(peer = %device, "Probe answered with our own uuid, ignoring");
                return None;
            }

            self.apl.insert(device.clone(), identity.clone()).await;

            for peer in &identity.active_peer_list {
                let key = DeviceKey::from(peer);
                if !visited.contains(&key) {
                    self.publish_device(key, visited).await;
                }
            }

            Some(identity)
        })
    }

    /// Consumes browse events until the channel closes. Spawn this.
    pub async fn listen(self: Arc<Self>, mut events: mpsc::Receiver<PeerEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                PeerEvent::Up {
                    instance,
                    addresses,
                    port,
                    txt,
                } => {
                    self.handle_up(&instance, addresses, port, &txt).await;
                }
                PeerEvent::Down {
                    instance,
                    addresses,
                    port,
                } => {
                    self.handle_down(&instance, addresses, port).await;
                }
            }
        }
        debug!("Peer event queue closed");
    }

    async fn handle_up(
        &self,
        instance: &str,
        addresses: Vec<IpAddr>,
        port: u16,
        txt: &HashMap<String, String>,
    ) {
        if txt.get(TXT_VALIDATE_KEY).map(String::as_str) != Some(TXT_VALIDATE_VALUE) {
            debug!(service = instance, "Service lacks the validation flag, ignoring");
            return;
        }
        match txt.get(TXT_UUID_KEY) {
            Some(uuid) if self.identity.is_self(uuid) => {
                debug!(service = instance, "Own broadcast echoed back, ignoring");
                return;
            }
            Some(_) => {}
            None => {
                debug!(service = instance, "Service lacks a uuid, ignoring");
                return;
            }
        }

        // Try each advertised IPv4 address until one answers
        for address in addresses.iter().filter(|address| address.is_ipv4()) {
            let device = DeviceKey::new(address.to_string(), port);
            let mut visited = HashSet::new();

            if let Some(identity) = self.publish_device(device.clone(), &mut visited).await {
                info!(service = instance, peer = %device, "Peer published");
                self.attach_replication(&device, &identity).await;
                return;
            }
        }
        warn!(service = instance, "No advertised address answered the link probe");
    }

    async fn handle_down(&self, instance: &str, addresses: Vec<IpAddr>, port: u16) {
        for address in addresses {
            let device = DeviceKey::new(address.to_string(), port);
            if self.apl.remove(&device).await.is_some() {
                info!(service = instance, peer = %device, "Peer unpublished");
            }
            self.connections.remove_device(&device).await;
        }
    }

    /// For every vault the peer advertises that the local registry holds,
    /// attach a replication connection against the peer's database route.
    async fn attach_replication(&self, device: &DeviceKey, identity: &PeerIdentity) {
        for summary in &identity.vaults {
            let Some(vault) = self.registry.get_by_id(&summary.vault_id).await else {
                continue;
            };
            let Ok(remote_name) = Nickname::new(summary.nickname.clone()) else {
                warn!(peer = %device, nickname = %summary.nickname, "Peer advertises an unusable vault nickname");
                continue;
            };

            if let Err(e) = self
                .connections
                .publish_connection(
                    summary.vault_id.clone(),
                    device.clone(),
                    &remote_name,
                    vault,
                    None,
                )
                .await
            {
                warn!(peer = %device, vault = %remote_name, error = %e, "Replication attach failed");
            }
        }
    }

    /// Clears the APL; part of discovery shutdown.
    pub async fn stop(&self) {
        self.apl.clear().await;
    }
}

impl std::fmt::Debug for PeerActivity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerActivity")
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}
