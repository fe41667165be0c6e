//! The nickname ↔ vault-id registry
//!
//! Owns every vault instance in the process. Conflict policy:
//!
//! | operation      | existing name | existing id |
//! |----------------|---------------|-------------|
//! | `create_vault` | conflict      | conflict    |
//! | `link_vault`   | conflict      | conflict    |
//! | `load_vault`   | conflict      | conflict    |
//!
//! A second link of the same id under a different name is rejected; alias
//! nicknames are not supported.

use munkey_core::{Error, Nickname, Result, VaultId};
use munkey_store::Database;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::admin::AdminStore;
use crate::instance::VaultInstance;

/// Produces the database a named vault sits on. Injected by the daemon so
/// the registry stays engine- and layout-agnostic.
pub type DatabaseFactory = Arc<dyn Fn(&Nickname) -> Result<Arc<dyn Database>> + Send + Sync>;

#[derive(Default)]
struct State {
    by_id: HashMap<VaultId, Arc<VaultInstance>>,
    by_name: HashMap<Nickname, VaultId>,
    admin: Option<Arc<AdminStore>>,
}

pub struct VaultRegistry {
    factory: DatabaseFactory,
    state: RwLock<State>,
}

impl VaultRegistry {
    pub fn new(factory: DatabaseFactory) -> Self {
        Self {
            factory,
            state: RwLock::new(State::default()),
        }
    }

    /// Creates a brand-new vault: fresh database, initial envelope written.
    pub async fn create_vault(
        &self,
        name: Nickname,
        id: VaultId,
        initial: &[u8],
    ) -> Result<Arc<VaultInstance>> {
        let instance = self.register(name.clone(), id.clone(), Some(initial)).await?;
        info!(vault = %name, id = %id, "Vault created");
        self.record_admin(&name, &id).await;
        Ok(instance)
    }

    /// Links a remote vault under a local nickname: empty database, content
    /// arrives with the first pull.
    pub async fn link_vault(&self, name: Nickname, id: VaultId) -> Result<Arc<VaultInstance>> {
        let instance = self.register(name.clone(), id.clone(), None).await?;
        info!(vault = %name, id = %id, "Vault linked");
        self.record_admin(&name, &id).await;
        Ok(instance)
    }

    /// Re-opens a vault recorded in the admin store. No initial content and
    /// no admin write-back.
    pub async fn load_vault(&self, name: Nickname, id: VaultId) -> Result<Arc<VaultInstance>> {
        let instance = self.register(name.clone(), id.clone(), None).await?;
        info!(vault = %name, id = %id, "Vault loaded");
        Ok(instance)
    }

    async fn register(
        &self,
        name: Nickname,
        id: VaultId,
        initial: Option<&[u8]>,
    ) -> Result<Arc<VaultInstance>> {
        let mut state = self.state.write().await;

        if state.by_name.contains_key(&name) {
            return Err(Error::Conflict(format!(
                "Nickname '{}' is already in use",
                name
            )));
        }
        if state.by_id.contains_key(&id) {
            return Err(Error::Conflict(format!(
                "Vault id '{}' is already registered",
                id
            )));
        }

        let db = (self.factory)(&name)?;
        let instance = Arc::new(VaultInstance::create(id.clone(), db, initial).await?);

        state.by_name.insert(name, id.clone());
        state.by_id.insert(id, Arc::clone(&instance));
        Ok(instance)
    }

    /// Deletes a vault: every nickname first (so no new handle can be
    /// obtained), then the id entry, then the underlying database.
    pub async fn delete_vault(&self, id: &VaultId) -> Result<()> {
        let instance = {
            let mut state = self.state.write().await;
            state.by_name.retain(|_, mapped| mapped != id);
            state.by_id.remove(id).ok_or_else(|| {
                Error::NotFound(format!("No vault registered under id '{}'", id))
            })?
        };

        instance.destroy().await?;
        info!(id = %id, "Vault deleted");

        let admin = self.state.read().await.admin.clone();
        if let Some(admin) = admin {
            if let Err(e) = admin.remove(id).await {
                warn!(id = %id, error = %e, "Admin store removal failed");
            }
        }
        Ok(())
    }

    pub async fn get_by_name(&self, name: &Nickname) -> Option<Arc<VaultInstance>> {
        let state = self.state.read().await;
        let id = state.by_name.get(name)?;
        state.by_id.get(id).cloned()
    }

    pub async fn get_by_id(&self, id: &VaultId) -> Option<Arc<VaultInstance>> {
        self.state.read().await.by_id.get(id).cloned()
    }

    /// All `(nickname, vault id)` pairs, name-sorted.
    pub async fn list(&self) -> Vec<(Nickname, VaultId)> {
        let state = self.state.read().await;
        let mut pairs: Vec<(Nickname, VaultId)> = state
            .by_name
            .iter()
            .map(|(name, id)| (name.clone(), id.clone()))
            .collect();
        pairs.sort_by(|a, b| a.0.as_str().cmp(b.0.as_str()));
        pairs
    }

    /// Active vaults: every registered pair (alias of [`list`] in this
    /// engine, kept as the startup-verification surface).
    pub async fn iter_active(&self) -> Vec<(Nickname, VaultId)> {
        self.list().await
    }

    /// Replays the admin store's rows through [`load_vault`], then installs
    /// it so later creates and links are recorded. Per-row failures are
    /// logged and skipped.
    pub async fn use_admin_store(&self, admin: Arc<AdminStore>) {
        if let Err(e) = admin.initialize().await {
            warn!(error = %e, "Admin store initialization failed");
        }

        for row in admin.all().await {
            if let Err(e) = self
                .load_vault(row.nickname.clone(), row.vault_id.clone())
                .await
            {
                warn!(vault = %row.nickname, id = %row.vault_id, error = %e, "Vault reload failed");
            }
        }

        self.state.write().await.admin = Some(admin);
    }

    async fn record_admin(&self, name: &Nickname, id: &VaultId) {
        let admin = self.state.read().await.admin.clone();
        if let Some(admin) = admin {
            // Best effort: a failed admin write costs persistence across
            // restarts, not the live vault.
            if let Err(e) = admin.record(name, id).await {
                warn!(vault = %name, error = %e, "Admin store record failed");
            }
        }
    }
}

impl std::fmt::Debug for VaultRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultRegistry").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use munkey_store::LocalDatabase;
    use std::path::PathBuf;

    fn memory_factory() -> DatabaseFactory {
        Arc::new(|name: &Nickname| {
            Ok(Arc::new(LocalDatabase::in_memory(name.as_str())) as Arc<dyn Database>)
        })
    }

    fn disk_factory(root: PathBuf) -> DatabaseFactory {
        Arc::new(move |name: &Nickname| {
            let db = LocalDatabase::open(name.as_str(), Some(root.join(name.as_str())))?;
            Ok(Arc::new(db) as Arc<dyn Database>)
        })
    }

    fn name(s: &str) -> Nickname {
        Nickname::new(s.to_string()).unwrap()
    }

    fn id(s: &str) -> VaultId {
        VaultId::new(s.to_string()).unwrap()
    }

    #[tokio::test]
    async fn create_registers_both_directions() {
        let registry = VaultRegistry::new(memory_factory());
        registry
            .create_vault(name("alpha"), id("id-1"), b"envelope")
            .await
            .unwrap();

        let by_name = registry.get_by_name(&name("alpha")).await.unwrap();
        let by_id = registry.get_by_id(&id("id-1")).await.unwrap();
        assert_eq!(by_name.vault_id(), by_id.vault_id());
        assert_eq!(by_name.get_content().await.unwrap(), b"envelope");
    }

    #[tokio::test]
    async fn conflict_table() {
        let registry = VaultRegistry::new(memory_factory());
        registry
            .create_vault(name("alpha"), id("id-1"), b"e1")
            .await
            .unwrap();

        // Same name, different id
        assert!(matches!(
            registry.create_vault(name("alpha"), id("id-2"), b"e2").await,
            Err(Error::Conflict(_))
        ));
        // Different name, same id
        assert!(matches!(
            registry.create_vault(name("beta"), id("id-1"), b"e3").await,
            Err(Error::Conflict(_))
        ));
        // Linking an existing name
        assert!(matches!(
            registry.link_vault(name("alpha"), id("id-4")).await,
            Err(Error::Conflict(_))
        ));
        // Linking an existing id under a new name is rejected too
        assert!(matches!(
            registry.link_vault(name("gamma"), id("id-1")).await,
            Err(Error::Conflict(_))
        ));
        // Loading anything already registered
        assert!(matches!(
            registry.load_vault(name("alpha"), id("id-9")).await,
            Err(Error::Conflict(_))
        ));
        assert!(matches!(
            registry.load_vault(name("delta"), id("id-1")).await,
            Err(Error::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn linked_vault_is_empty_until_first_pull() {
        let registry = VaultRegistry::new(memory_factory());
        let vault = registry.link_vault(name("remote"), id("id-7")).await.unwrap();
        assert!(vault.get_content().await.is_none());
    }

    #[tokio::test]
    async fn delete_unregisters_every_name() {
        let registry = VaultRegistry::new(memory_factory());
        registry
            .create_vault(name("alpha"), id("id-1"), b"e1")
            .await
            .unwrap();

        registry.delete_vault(&id("id-1")).await.unwrap();
        assert!(registry.get_by_name(&name("alpha")).await.is_none());
        assert!(registry.get_by_id(&id("id-1")).await.is_none());
        assert!(registry.list().await.is_empty());

        assert!(matches!(
            registry.delete_vault(&id("id-1")).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn admin_replay_skips_bad_rows_and_keeps_going() {
        let registry = VaultRegistry::new(memory_factory());

        // A name collision in the admin rows: second row fails, first and
        // third load
        let admin = AdminStore::new(Arc::new(LocalDatabase::in_memory("admin")));
        admin.initialize().await.unwrap();
        admin.record(&name("alpha"), &id("id-1")).await.unwrap();
        admin.record(&name("alpha"), &id("id-2")).await.unwrap();
        admin.record(&name("beta"), &id("id-3")).await.unwrap();

        registry.use_admin_store(Arc::new(admin)).await;

        let active = registry.iter_active().await;
        assert_eq!(
            active,
            vec![(name("alpha"), id("id-1")), (name("beta"), id("id-3"))]
        );
    }

    #[tokio::test]
    async fn admin_replay_restores_vaults_across_restart() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();

        let admin_db = || {
            Arc::new(
                LocalDatabase::open("admin", Some(root.join("admin").join("info"))).unwrap(),
            ) as Arc<dyn Database>
        };

        {
            let registry = VaultRegistry::new(disk_factory(root.join("munkey")));
            registry
                .use_admin_store(Arc::new(AdminStore::new(admin_db())))
                .await;
            registry
                .create_vault(name("alpha"), id("id-1"), b"e1")
                .await
                .unwrap();
            registry
                .create_vault(name("beta"), id("id-2"), b"e2")
                .await
                .unwrap();
            registry.delete_vault(&id("id-2")).await.unwrap();
        }

        // Fresh process: same root, new registry
        let registry = VaultRegistry::new(disk_factory(root.join("munkey")));
        registry
            .use_admin_store(Arc::new(AdminStore::new(admin_db())))
            .await;

        let active = registry.iter_active().await;
        assert_eq!(active, vec![(name("alpha"), id("id-1"))]);

        let vault = registry.get_by_name(&name("alpha")).await.unwrap();
        assert_eq!(vault.get_content().await.unwrap(), b"e1");
    }
}
