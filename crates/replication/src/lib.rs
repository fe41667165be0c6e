//! # Munkey Replication
//!
//! Live two-way sync between local vaults and discovered peers, with
//! signature verification on every pulled revision.
//!
//! The [`ConnectionManager`] keeps at most one live sync session per
//! `(vault id, device)` pair. Each session's events are pumped by a
//! background task:
//!
//! - pulled revisions carrying the vault attachment are verified against
//!   the vault id; failures are rolled back with `remove(doc, rev)` and the
//!   channel keeps running
//! - transport errors tear the session down; the peer is re-attached on the
//!   next discovery event
//!
//! Teardown is idempotent at every level.

use munkey_core::{DeviceKey, Nickname, Result, VaultId};
use munkey_payload::verify;
use munkey_store::{
    build_client, replicate_from, sync_live, SyncControl, SyncDirection, SyncEvent, SyncSession,
    CONNECT_TIMEOUT, SYNC_POLL_INTERVAL,
};
use munkey_vault::{VaultInstance, VAULT_ATTACHMENT, VAULT_DOC};
use reqwest::Client;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, error, info, trace, warn};

/// Signals the completion (and success) of a connection's first pull.
pub type FirstPullSignal = oneshot::Sender<bool>;

struct SyncHandle {
    control: SyncControl,
}

/// Owns every live sync session in the process.
pub struct ConnectionManager {
    client: Client,
    poll_interval: Duration,
    state: Mutex<HashMap<VaultId, HashMap<DeviceKey, SyncHandle>>>,
}

impl ConnectionManager {
    pub fn new() -> Result<Arc<Self>> {
        Self::with_poll_interval(SYNC_POLL_INTERVAL)
    }

    pub fn with_poll_interval(poll_interval: Duration) -> Result<Arc<Self>> {
        Ok(Arc::new(Self {
            client: build_client(CONNECT_TIMEOUT)?,
            poll_interval,
            state: Mutex::new(HashMap::new()),
        }))
    }

    /// Attaches a live replication connection between `vault` and the
    /// remote database `https://<device>/db/<vault_name>`.
    ///
    /// Idempotent per `(vault_id, device)`: when a session already exists,
    /// `on_first_pull` resolves `false` and nothing else happens. Otherwise
    /// a one-shot pull runs first (resolving `on_first_pull` with its
    /// outcome), then live sync begins.
    pub async fn publish_connection(
        self: &Arc<Self>,
        vault_id: VaultId,
        device: DeviceKey,
        vault_name: &Nickname,
        vault: Arc<VaultInstance>,
        on_first_pull: Option<FirstPullSignal>,
    ) -> Result<()> {
        // The map lock is held across the first pull so a concurrent
        // publish for the same pair can never start a second session.
        let mut state = self.state.lock().await;

        let per_vault = state.entry(vault_id.clone()).or_default();
        if per_vault.contains_key(&device) {
            debug!(vault = %vault_name, peer = %device, "Connection already live");
            if let Some(signal) = on_first_pull {
                let _ = signal.send(false);
            }
            return Ok(());
        }

        let url = format!(
            "https://{}:{}/db/{}",
            device.host, device.port, vault_name
        );

        let pulled = match replicate_from(vault.db().as_ref(), &url, &self.client).await {
            Ok(()) => true,
            Err(e) => {
                warn!(vault = %vault_name, peer = %device, error = %e, "First pull failed");
                false
            }
        };
        // Revisions installed by the one-shot pull never reach the live
        // change feed, so they are verified here.
        if pulled {
            if let Ok(doc) = vault.db().get(VAULT_DOC).await {
                verify_pulled(&vault_id, &device, &vault, &doc).await;
            }
        }
        if let Some(signal) = on_first_pull {
            let _ = signal.send(pulled);
        }

        let session = sync_live(
            vault.db(),
            url,
            self.client.clone(),
            self.poll_interval,
        );
        per_vault.insert(
            device.clone(),
            SyncHandle {
                control: session.control(),
            },
        );
        drop(state);

        info!(vault = %vault_name, id = %vault_id, peer = %device, "Replication connection published");

        let manager = Arc::clone(self);
        tokio::spawn(pump_events(manager, vault_id, device, vault, session));
        Ok(())
    }

    /// Cancels and forgets the session for `(vault_id, device)`. Idempotent.
    pub async fn remove_connection(&self, vault_id: &VaultId, device: &DeviceKey) {
        let mut state = self.state.lock().await;
        if let Some(per_vault) = state.get_mut(vault_id) {
            if let Some(handle) = per_vault.remove(device) {
                handle.control.cancel();
                info!(id = %vault_id, peer = %device, "Replication connection removed");
            }
            if per_vault.is_empty() {
                state.remove(vault_id);
            }
        }
    }

    /// Tears down every session attached to `device` (node-loss path).
    pub async fn remove_device(&self, device: &DeviceKey) {
        let mut state = self.state.lock().await;
        state.retain(|vault_id, per_vault| {
            if let Some(handle) = per_vault.remove(device) {
                handle.control.cancel();
                debug!(id = %vault_id, peer = %device, "Connection dropped with device");
            }
            !per_vault.is_empty()
        });
    }

    /// Whether a session exists for the pair.
    pub async fn is_connected(&self, vault_id: &VaultId, device: &DeviceKey) -> bool {
        self.state
            .lock()
            .await
            .get(vault_id)
            .is_some_and(|per_vault| per_vault.contains_key(device))
    }

    /// Active `(vault id, device)` pairs.
    pub async fn connections(&self) -> Vec<(VaultId, DeviceKey)> {
        let state = self.state.lock().await;
        state
            .iter()
            .flat_map(|(vault_id, per_vault)| {
                per_vault
                    .keys()
                    .map(|device| (vault_id.clone(), device.clone()))
            })
            .collect()
    }

    /// Cancels every session. Part of graceful shutdown.
    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        for (vault_id, per_vault) in state.drain() {
            for (device, handle) in per_vault {
                handle.control.cancel();
                debug!(id = %vault_id, peer = %device, "Connection cancelled at shutdown");
            }
        }
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager").finish_non_exhaustive()
    }
}

/// Consumes one session's events until the session ends or errors out.
async fn pump_events(
    manager: Arc<ConnectionManager>,
    vault_id: VaultId,
    device: DeviceKey,
    vault: Arc<VaultInstance>,
    mut session: SyncSession,
) {
    while let Some(event) = session.recv().await {
        match event {
            SyncEvent::Change {
                direction: SyncDirection::Pull,
                doc,
            } => {
                verify_pulled(&vault_id, &device, vault.as_ref(), &doc).await;
            }
            SyncEvent::Change {
                direction: SyncDirection::Push,
                doc,
            } => {
                trace!(doc = %doc.id, rev = %doc.rev, "Pushed revision");
            }
            SyncEvent::Paused => {
                trace!(id = %vault_id, peer = %device, "Sync idle");
            }
            SyncEvent::Error(message) => {
                warn!(id = %vault_id, peer = %device, error = %message, "Sync error, tearing down connection");
                manager.remove_connection(&vault_id, &device).await;
                break;
            }
        }
    }
    debug!(id = %vault_id, peer = %device, "Event pump stopped");
}

/// Verifies one pulled revision's attachment against the vault id.
///
/// Returns whether the revision was accepted. Failures are rolled back via
/// `remove(doc, rev)`, which re-exposes the revision the replicated write
/// displaced. Changes without the vault attachment skip verification.
pub async fn verify_pulled(
    vault_id: &VaultId,
    device: &DeviceKey,
    vault: &VaultInstance,
    doc: &munkey_store::Document,
) -> bool {
    let Some(attachment) = doc.attachments.get(VAULT_ATTACHMENT) else {
        trace!(doc = %doc.id, "Pulled change without vault attachment, skipping verification");
        return true;
    };

    match verify(vault_id, &attachment.data) {
        Ok(_) => {
            trace!(doc = %doc.id, rev = %doc.rev, "Pulled revision verified");
            true
        }
        Err(e) => {
            error!(
                id = %vault_id,
                peer = %device,
                rev = %doc.rev,
                error = %e,
                "Pulled revision failed verification, rolling back"
            );
            if let Err(re) = vault.db().remove(&doc.id, &doc.rev).await {
                warn!(doc = %doc.id, error = %re, "Rollback failed");
            }
            false
        }
    }
}
