//! Network interface monitoring for mDNS re-announcement
//!
//! Peers cache the addresses a service resolved to, so a node whose IP
//! changes silently disappears. The monitor polls the interface set and
//! emits an event on every change; the daemon re-announces in response.

use munkey_core::{Error, Result};
use std::collections::HashSet;
use std::net::IpAddr;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Network change event
#[derive(Debug, Clone)]
pub enum NetworkEvent {
    /// The set of non-loopback addresses changed
    AddressesChanged {
        added: Vec<IpAddr>,
        removed: Vec<IpAddr>,
    },
}

/// Polls the interface set and reports changes.
pub struct NetworkMonitor {
    current_addresses: HashSet<IpAddr>,
    event_tx: mpsc::Sender<NetworkEvent>,
    running: bool,
}

impl NetworkMonitor {
    pub fn new(event_tx: mpsc::Sender<NetworkEvent>) -> Self {
        Self {
            current_addresses: HashSet::new(),
            event_tx,
            running: false,
        }
    }

    fn current_addresses() -> Result<HashSet<IpAddr>> {
        let interfaces = if_addrs::get_if_addrs()
            .map_err(|e| Error::Transport(format!("Failed to enumerate interfaces: {}", e)))?;

        Ok(interfaces
            .into_iter()
            .filter(|interface| !interface.is_loopback())
            .map(|interface| interface.addr.ip())
            .collect())
    }

    /// Snapshots the current interface set as the baseline.
    pub fn start(&mut self) -> Result<()> {
        self.current_addresses = Self::current_addresses()?;
        self.running = true;
        info!(
            addresses = self.current_addresses.len(),
            "Network monitor started"
        );
        Ok(())
    }

    /// Compares against the baseline and emits a change event if needed.
    pub async fn check_changes(&mut self) -> Result<()> {
        if !self.running {
            return Err(Error::ServerNotRunning);
        }

        let new_addresses = Self::current_addresses()?;

        let added: Vec<IpAddr> = new_addresses
            .difference(&self.current_addresses)
            .copied()
            .collect();
        let removed: Vec<IpAddr> = self
            .current_addresses
            .difference(&new_addresses)
            .copied()
            .collect();

        if added.is_empty() && removed.is_empty() {
            return Ok(());
        }

        info!(added = added.len(), removed = removed.len(), "Network change detected");
        debug!(?added, ?removed, "Interface delta");
        self.current_addresses = new_addresses;

        if let Err(e) = self
            .event_tx
            .send(NetworkEvent::AddressesChanged { added, removed })
            .await
        {
            warn!(error = %e, "Network event consumer dropped");
        }
        Ok(())
    }

    pub fn stop(&mut self) {
        self.running = false;
    }

    /// Runs the monitor on an interval until the consumer goes away.
    pub fn spawn(mut self, check_interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            if let Err(e) = self.start() {
                warn!(error = %e, "Network monitor failed to start");
                return;
            }
            while self.running {
                tokio::time::sleep(check_interval).await;
                if self.event_tx.is_closed() {
                    break;
                }
                if let Err(e) = self.check_changes().await {
                    warn!(error = %e, "Network change check failed");
                }
            }
            debug!("Network monitor task stopped");
        })
    }
}

impl std::fmt::Debug for NetworkMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkMonitor")
            .field("running", &self.running)
            .field("addresses", &self.current_addresses.len())
            .finish()
    }
}
