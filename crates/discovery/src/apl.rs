//! The Active Peer List
//!
//! `(host, port)` → the last identity document successfully probed from
//! that endpoint. Mutations are atomic per entry; churn is seconds-scale,
//! so a single RwLock map is plenty.

use munkey_core::{DeviceKey, PeerIdentity, VaultId};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Default)]
pub struct ActivePeerList {
    inner: RwLock<HashMap<DeviceKey, PeerIdentity>>,
}

impl ActivePeerList {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, device: &DeviceKey) -> Option<PeerIdentity> {
        self.inner.read().await.get(device).cloned()
    }

    pub async fn insert(&self, device: DeviceKey, identity: PeerIdentity) {
        debug!(peer = %device, unique_id = %identity.unique_id, "Peer published");
        self.inner.write().await.insert(device, identity);
    }

    pub async fn remove(&self, device: &DeviceKey) -> Option<PeerIdentity> {
        let removed = self.inner.write().await.remove(device);
        if removed.is_some() {
            debug!(peer = %device, "Peer removed");
        }
        removed
    }

    pub async fn contains(&self, device: &DeviceKey) -> bool {
        self.inner.read().await.contains_key(device)
    }

    /// Every `(device, identity)` pair currently known.
    pub async fn iter_all(&self) -> Vec<(DeviceKey, PeerIdentity)> {
        self.inner
            .read()
            .await
            .iter()
            .map(|(device, identity)| (device.clone(), identity.clone()))
            .collect()
    }

    /// The devices currently known, sorted for stable `/link` output.
    pub async fn device_list(&self) -> Vec<DeviceKey> {
        let mut devices: Vec<DeviceKey> = self.inner.read().await.keys().cloned().collect();
        devices.sort_by(|a, b| (&a.host, a.port).cmp(&(&b.host, b.port)));
        devices
    }

    /// Peers advertising a vault under `name`: `(vault id, device)` pairs.
    pub async fn resolve_vault_name(&self, name: &str) -> Vec<(VaultId, DeviceKey)> {
        self.inner
            .read()
            .await
            .iter()
            .flat_map(|(device, identity)| {
                identity
                    .vaults
                    .iter()
                    .filter(|vault| vault.nickname == name)
                    .map(|vault| (vault.vault_id.clone(), device.clone()))
            })
            .collect()
    }

    pub async fn clear(&self) {
        self.inner.write().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }
}

impl std::fmt::Debug for ActivePeerList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivePeerList").finish_non_exhaustive()
    }
}
