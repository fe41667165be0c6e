//! Node assembly and vault user flows
//!
//! `Node::build` wires the whole handle graph up front — identity, stores,
//! registry (with admin replay), connection manager, activity, web server —
//! so nothing is looked up at runtime. `start` binds the network surfaces;
//! `shutdown` unwinds them in reverse.

use munkey_core::{DeviceKey, Error, Nickname, Result, VaultId};
use munkey_discovery::{HttpsLinkProbe, MdnsService, NetworkMonitor, PeerActivity};
use munkey_identity::{NodeIdentity, TlsMaterial};
use munkey_payload::{derive_key, open_payload, seal_payload, VaultKeys};
use munkey_replication::ConnectionManager;
use munkey_store::{Database, LocalDatabase};
use munkey_vault::{AdminStore, DatabaseFactory, VaultRegistry};
use munkey_web::{AppState, WebOptions, WebServer};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::Config;

/// Directory under the root holding vault databases
const VAULTS_DIR: &str = "munkey";

/// Directory under the root holding the admin database
const ADMIN_DIR: &str = "admin/info";

/// Interval between network interface checks
const NETWORK_CHECK_INTERVAL: std::time::Duration = std::time::Duration::from_secs(5);

pub struct Node {
    config: Config,
    identity: NodeIdentity,
    registry: Arc<VaultRegistry>,
    connections: Arc<ConnectionManager>,
    activity: Arc<PeerActivity>,
    web: Arc<WebServer>,
    mdns: Option<Arc<MdnsService>>,
    listen_task: Option<JoinHandle<()>>,
    monitor_tasks: Vec<JoinHandle<()>>,
    bound_addr: Option<SocketAddr>,
}

impl Node {
    /// Builds the immutable handle graph. No sockets are opened here.
    pub async fn build(config: Config) -> Result<Self> {
        config.validate()?;

        let root: Option<PathBuf> = if config.storage.in_memory {
            None
        } else {
            Some(config.storage.root_dir.clone())
        };

        let factory: DatabaseFactory = {
            let root = root.clone();
            Arc::new(move |name: &Nickname| {
                let db = match &root {
                    Some(root) => LocalDatabase::open(
                        name.as_str(),
                        Some(root.join(VAULTS_DIR).join(name.as_str())),
                    )?,
                    None => LocalDatabase::in_memory(name.as_str()),
                };
                Ok(Arc::new(db) as Arc<dyn Database>)
            })
        };
        let registry = Arc::new(VaultRegistry::new(factory));

        let admin_db: Arc<dyn Database> = Arc::new(match &root {
            Some(root) => LocalDatabase::open("admin", Some(root.join(ADMIN_DIR)))?,
            None => LocalDatabase::in_memory("admin"),
        });
        registry
            .use_admin_store(Arc::new(AdminStore::new(admin_db)))
            .await;

        let identity = NodeIdentity::generate();
        let tls = TlsMaterial::load_or_generate(root.as_deref())?;

        let connections = ConnectionManager::new()?;
        let probe = Arc::new(HttpsLinkProbe::new()?);
        let activity = Arc::new(PeerActivity::new(
            identity.clone(),
            probe,
            Arc::clone(&registry),
            Arc::clone(&connections),
        ));

        let web = Arc::new(WebServer::new(
            AppState {
                identity: identity.clone(),
                registry: Arc::clone(&registry),
                apl: activity.apl(),
            },
            tls,
        ));

        info!(uuid = %identity, vaults = registry.list().await.len(), "Node assembled");

        Ok(Self {
            config,
            identity,
            registry,
            connections,
            activity,
            web,
            mdns: None,
            listen_task: None,
            monitor_tasks: Vec::new(),
            bound_addr: None,
        })
    }

    /// Binds the HTTPS edge and, when enabled, starts mDNS broadcast and
    /// browse. Returns the bound address.
    pub async fn start(&mut self) -> Result<SocketAddr> {
        let addr = self
            .web
            .listen(&WebOptions {
                host: self.config.server.host.clone(),
                port: self.config.server.port,
            })
            .await?;
        self.bound_addr = Some(addr);

        if self.config.discovery.enabled {
            let advertised_port = match self.config.discovery.advertised_port {
                0 => addr.port(),
                port => port,
            };

            let mdns = Arc::new(MdnsService::new()?);
            mdns.broadcast(&self.identity, advertised_port).await?;
            let events = mdns.browse().await?;
            self.listen_task = Some(tokio::spawn(Arc::clone(&self.activity).listen(events)));

            // Re-announce when the interface set changes
            let (net_tx, mut net_rx) = tokio::sync::mpsc::channel(10);
            self.monitor_tasks
                .push(NetworkMonitor::new(net_tx).spawn(NETWORK_CHECK_INTERVAL));
            let mdns_for_monitor = Arc::clone(&mdns);
            self.monitor_tasks.push(tokio::spawn(async move {
                while net_rx.recv().await.is_some() {
                    if let Err(e) = mdns_for_monitor.re_announce().await {
                        warn!(error = %e, "Re-announce failed");
                    }
                }
            }));

            self.mdns = Some(mdns);
        }

        info!(addr = %addr, uuid = %self.identity, "Node started");
        Ok(addr)
    }

    /// Graceful shutdown: unpublish mDNS, cancel sync sessions, close the
    /// HTTPS edge. Store snapshots are write-through, so there is nothing
    /// left to flush.
    pub async fn shutdown(&mut self) {
        if let Some(mdns) = self.mdns.take() {
            if let Err(e) = mdns.stop().await {
                warn!(error = %e, "mDNS stop failed");
            }
        }
        if let Some(task) = self.listen_task.take() {
            task.abort();
        }
        for task in self.monitor_tasks.drain(..) {
            task.abort();
        }
        self.activity.stop().await;
        self.connections.shutdown().await;

        match self.web.close().await {
            Ok(()) | Err(Error::ServerNotRunning) => {}
            Err(e) => warn!(error = %e, "Web close failed"),
        }
        info!("Node stopped");
    }

    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    pub fn registry(&self) -> Arc<VaultRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn activity(&self) -> Arc<PeerActivity> {
        Arc::clone(&self.activity)
    }

    /// Snapshot of the node for the shell's `status` view.
    pub async fn status(&self) -> NodeStatus {
        NodeStatus {
            uuid: self.identity.uuid().to_string(),
            bound_addr: self.bound_addr,
            vaults: self.registry.list().await,
            peers: self.activity.apl().device_list().await,
            connections: self.connections.connections().await.len(),
        }
    }

    /// Probes a specific endpoint (manual peer addition): on success the
    /// peer and everything it advertises land in the APL.
    pub async fn probe_peer(&self, host: &str, port: u16) -> Option<String> {
        let mut visited = std::collections::HashSet::new();
        self.activity
            .publish_device(DeviceKey::new(host, port), &mut visited)
            .await
            .map(|identity| identity.unique_id)
    }

    // -----------------------------------------------------------------
    // Vault user flows (consumed by the shell / RPC surfaces)
    // -----------------------------------------------------------------

    /// Creates a vault: fresh keypair, id from the public key, an empty
    /// entry map sealed under the password.
    pub async fn create_vault(&self, name: Nickname, password: &str) -> Result<VaultId> {
        let keys = VaultKeys::generate();
        let id = keys.vault_id()?;
        let key = derive_key(password.as_bytes(), id.as_bytes());
        let envelope = seal_payload(&keys, &key, b"{}")?;

        self.registry.create_vault(name, id.clone(), &envelope).await?;
        Ok(id)
    }

    /// Links a known remote vault id under a local nickname.
    pub async fn link_vault(&self, name: Nickname, id: VaultId) -> Result<()> {
        self.registry.link_vault(name, id).await?;
        Ok(())
    }

    /// Resolves `remote_name` against the APL, links the first match under
    /// `local_name` and attaches replication. Returns the resolved id, or
    /// `None` when no peer advertises that name.
    pub async fn link_remote_vault(
        &self,
        local_name: Nickname,
        remote_name: &str,
    ) -> Result<Option<VaultId>> {
        let candidates = self.activity.apl().resolve_vault_name(remote_name).await;
        let Some((vault_id, device)) = candidates.into_iter().next() else {
            return Ok(None);
        };

        let vault = self.registry.link_vault(local_name, vault_id.clone()).await?;

        let remote_nickname = Nickname::new(remote_name.to_string())
            .map_err(|e| Error::Conflict(format!("Unusable remote name: {}", e)))?;
        let (first_pull_tx, first_pull_rx) = oneshot::channel();
        self.connections
            .publish_connection(
                vault_id.clone(),
                device.clone(),
                &remote_nickname,
                vault,
                Some(first_pull_tx),
            )
            .await?;

        match first_pull_rx.await {
            Ok(true) => info!(vault = %remote_name, peer = %device, "Linked vault pulled"),
            Ok(false) => warn!(vault = %remote_name, peer = %device, "Linked vault pending first pull"),
            Err(_) => {}
        }
        Ok(Some(vault_id))
    }

    pub async fn delete_vault(&self, id: &VaultId) -> Result<()> {
        self.registry.delete_vault(id).await
    }

    pub async fn list_vaults(&self) -> Vec<(Nickname, VaultId)> {
        self.registry.list().await
    }

    /// Reads one entry. `NotFound` covers both a missing vault and a vault
    /// with no content yet; a wrong password is `BadKey`.
    pub async fn get_entry(
        &self,
        name: &Nickname,
        password: &str,
        entry_key: &str,
    ) -> Result<Option<String>> {
        let (map, _, _) = self.open_vault(name, password).await?;
        Ok(map
            .get(entry_key)
            .and_then(|value| value.as_str().map(str::to_string)))
    }

    /// Writes one entry and reseals the vault with its embedded key.
    pub async fn put_entry(
        &self,
        name: &Nickname,
        password: &str,
        entry_key: &str,
        entry_value: &str,
    ) -> Result<()> {
        let vault = self
            .registry
            .get_by_name(name)
            .await
            .ok_or_else(|| Error::NotFound(format!("No vault named '{}'", name)))?;

        let (mut map, keys, key) = self.open_vault(name, password).await?;
        map.insert(
            entry_key.to_string(),
            serde_json::Value::String(entry_value.to_string()),
        );

        let data = serde_json::to_vec(&map)
            .map_err(|e| Error::Store(format!("Entry map encoding failed: {}", e)))?;
        let envelope = seal_payload(&keys, &key, &data)?;
        vault.set_content(envelope).await
    }

    async fn open_vault(
        &self,
        name: &Nickname,
        password: &str,
    ) -> Result<(
        serde_json::Map<String, serde_json::Value>,
        VaultKeys,
        munkey_payload::VaultKey,
    )> {
        let vault = self
            .registry
            .get_by_name(name)
            .await
            .ok_or_else(|| Error::NotFound(format!("No vault named '{}'", name)))?;
        let content = vault
            .get_content()
            .await
            .ok_or_else(|| Error::NotFound(format!("Vault '{}' has no content yet", name)))?;

        let id = vault.vault_id().clone();
        let key = derive_key(password.as_bytes(), id.as_bytes());
        let (private_der, data) = open_payload(&id, &key, &content)?;
        let keys = VaultKeys::from_pkcs8_der(&private_der)?;

        let map = serde_json::from_slice(&data)
            .map_err(|e| Error::MalformedEnvelope(format!("Entry map is not JSON: {}", e)))?;
        Ok((map, keys, key))
    }
}

/// What `Node::status` reports.
#[derive(Debug, Clone)]
pub struct NodeStatus {
    pub uuid: String,
    pub bound_addr: Option<SocketAddr>,
    pub vaults: Vec<(Nickname, VaultId)>,
    pub peers: Vec<DeviceKey>,
    pub connections: usize,
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("identity", &self.identity)
            .field("bound_addr", &self.bound_addr)
            .finish_non_exhaustive()
    }
}
