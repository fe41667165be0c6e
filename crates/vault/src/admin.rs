//! Persisted vault enumeration
//!
//! A single document `vault_ids` in the admin database carries the list of
//! `(nickname, vault id)` pairs, so the registry can re-open local vaults
//! after a restart.

use munkey_core::{Error, Nickname, Result, VaultId};
use munkey_store::Database;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

const ADMIN_DOC: &str = "vault_ids";
const ADMIN_ATTACHMENT: &str = "vault_ids.json";
const ADMIN_MIME: &str = "application/json";

/// One persisted vault row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminRecord {
    pub nickname: Nickname,
    #[serde(rename = "vaultId")]
    pub vault_id: VaultId,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct AdminList {
    vaults: Vec<AdminRecord>,
}

/// Durable record of the node's local vaults.
pub struct AdminStore {
    db: Arc<dyn Database>,
    /// Serializes read-modify-write cycles on the list document.
    write_lock: Mutex<()>,
}

impl AdminStore {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self {
            db,
            write_lock: Mutex::new(()),
        }
    }

    /// Ensures the list document exists, creating an empty one if absent.
    pub async fn initialize(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        match self.db.get_attachment(ADMIN_DOC, ADMIN_ATTACHMENT).await {
            Ok(_) => Ok(()),
            Err(Error::NotFound(_)) => {
                self.write_list(&AdminList::default(), None).await?;
                debug!(db = self.db.name(), "Admin store initialized");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Records a vault. Idempotent: an id already listed is skipped.
    pub async fn record(&self, nickname: &Nickname, vault_id: &VaultId) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let (mut list, rev) = self.read_list().await?;

        if list.vaults.iter().any(|row| row.vault_id == *vault_id) {
            return Ok(());
        }

        list.vaults.push(AdminRecord {
            nickname: nickname.clone(),
            vault_id: vault_id.clone(),
        });
        self.write_list(&list, rev.as_ref()).await
    }

    /// Drops every row for `vault_id` (vault deletion path).
    pub async fn remove(&self, vault_id: &VaultId) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let (mut list, rev) = self.read_list().await?;

        let before = list.vaults.len();
        list.vaults.retain(|row| row.vault_id != *vault_id);
        if list.vaults.len() == before {
            return Ok(());
        }
        self.write_list(&list, rev.as_ref()).await
    }

    /// The persisted rows. A missing document yields an empty list with a
    /// warning rather than an error.
    pub async fn all(&self) -> Vec<AdminRecord> {
        match self.read_list().await {
            Ok((list, _)) => list.vaults,
            Err(e) => {
                warn!(db = self.db.name(), error = %e, "Admin list unreadable, treating as empty");
                Vec::new()
            }
        }
    }

    async fn read_list(&self) -> Result<(AdminList, Option<munkey_store::Revision>)> {
        match self.db.get_attachment(ADMIN_DOC, ADMIN_ATTACHMENT).await {
            Ok(attachment) => {
                let list = serde_json::from_slice(&attachment.data)
                    .map_err(|e| Error::Store(format!("Corrupt admin list: {}", e)))?;
                let rev = self.db.get(ADMIN_DOC).await?.rev;
                Ok((list, Some(rev)))
            }
            Err(Error::NotFound(_)) => Ok((AdminList::default(), None)),
            Err(e) => Err(e),
        }
    }

    async fn write_list(
        &self,
        list: &AdminList,
        rev: Option<&munkey_store::Revision>,
    ) -> Result<()> {
        let raw = serde_json::to_vec(list)
            .map_err(|e| Error::Store(format!("Admin list encoding failed: {}", e)))?;
        self.db
            .put_attachment(ADMIN_DOC, ADMIN_ATTACHMENT, rev, raw, ADMIN_MIME)
            .await?;
        Ok(())
    }
}

impl std::fmt::Debug for AdminStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminStore")
            .field("db", &self.db.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use munkey_store::LocalDatabase;

    fn name(s: &str) -> Nickname {
        Nickname::new(s.to_string()).unwrap()
    }

    fn id(s: &str) -> VaultId {
        VaultId::new(s.to_string()).unwrap()
    }

    #[tokio::test]
    async fn initialize_then_empty() {
        let admin = AdminStore::new(Arc::new(LocalDatabase::in_memory("admin")));
        admin.initialize().await.unwrap();
        assert!(admin.all().await.is_empty());
    }

    #[tokio::test]
    async fn record_is_idempotent_on_id() {
        let admin = AdminStore::new(Arc::new(LocalDatabase::in_memory("admin")));
        admin.initialize().await.unwrap();

        admin.record(&name("alpha"), &id("id-1")).await.unwrap();
        admin.record(&name("alias"), &id("id-1")).await.unwrap();
        admin.record(&name("beta"), &id("id-2")).await.unwrap();

        let rows = admin.all().await;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].nickname, name("alpha"));
        assert_eq!(rows[1].vault_id, id("id-2"));
    }

    #[tokio::test]
    async fn remove_drops_all_rows_for_id() {
        let admin = AdminStore::new(Arc::new(LocalDatabase::in_memory("admin")));
        admin.initialize().await.unwrap();
        admin.record(&name("alpha"), &id("id-1")).await.unwrap();
        admin.record(&name("beta"), &id("id-2")).await.unwrap();

        admin.remove(&id("id-1")).await.unwrap();
        let rows = admin.all().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].vault_id, id("id-2"));

        // Removing an unknown id is a no-op
        admin.remove(&id("id-9")).await.unwrap();
        assert_eq!(admin.all().await.len(), 1);
    }

    #[tokio::test]
    async fn missing_document_reads_as_empty() {
        let admin = AdminStore::new(Arc::new(LocalDatabase::in_memory("admin")));
        assert!(admin.all().await.is_empty());
    }
}
