//! One vault over one database
//!
//! A `VaultInstance` wraps an attachment-capable database and reads/writes
//! the single envelope attachment. No encryption happens here; the payload
//! codec owns the bytes' meaning.

use munkey_core::{Error, Result, VaultId};
use munkey_store::Database;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::{VAULT_ATTACHMENT, VAULT_DOC, VAULT_MIME};

pub struct VaultInstance {
    vault_id: VaultId,
    db: Arc<dyn Database>,
    /// Serializes `set_content`/`initialize`: one outstanding write per vault.
    write_lock: Mutex<()>,
}

impl VaultInstance {
    /// Wraps `db` as a vault. When `initial` is given and the vault is
    /// empty, the initial envelope is written; existing content is never
    /// clobbered.
    pub async fn create(
        vault_id: VaultId,
        db: Arc<dyn Database>,
        initial: Option<&[u8]>,
    ) -> Result<Self> {
        let instance = Self {
            vault_id,
            db,
            write_lock: Mutex::new(()),
        };

        if let Some(initial) = initial {
            let written = instance.initialize(initial.to_vec()).await?;
            if !written {
                debug!(db = instance.db.name(), "Vault already populated, initial content ignored");
            }
        }

        Ok(instance)
    }

    pub fn vault_id(&self) -> &VaultId {
        &self.vault_id
    }

    pub fn db(&self) -> Arc<dyn Database> {
        Arc::clone(&self.db)
    }

    /// The raw envelope bytes, or `None` on any error (including absence).
    pub async fn get_content(&self) -> Option<Vec<u8>> {
        match self.db.get_attachment(VAULT_DOC, VAULT_ATTACHMENT).await {
            Ok(attachment) => Some(attachment.data),
            Err(Error::NotFound(_)) => None,
            Err(e) => {
                warn!(db = self.db.name(), error = %e, "Vault content read failed");
                None
            }
        }
    }

    /// Replaces the envelope: at the document's current revision when it
    /// exists, as a fresh document when it does not. Errors other than
    /// missing-document propagate and nothing is written.
    pub async fn set_content(&self, bytes: Vec<u8>) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let rev = match self.db.get(VAULT_DOC).await {
            Ok(doc) => Some(doc.rev),
            Err(Error::NotFound(_)) => None,
            Err(e) => return Err(e),
        };

        self.db
            .put_attachment(VAULT_DOC, VAULT_ATTACHMENT, rev.as_ref(), bytes, VAULT_MIME)
            .await?;
        Ok(())
    }

    /// Writes `bytes` iff the vault holds no envelope yet. Returns whether
    /// the write happened.
    pub async fn initialize(&self, bytes: Vec<u8>) -> Result<bool> {
        let _guard = self.write_lock.lock().await;

        match self.db.get_attachment(VAULT_DOC, VAULT_ATTACHMENT).await {
            Ok(_) => Ok(false),
            Err(Error::NotFound(_)) => {
                let rev = match self.db.get(VAULT_DOC).await {
                    Ok(doc) => Some(doc.rev),
                    Err(Error::NotFound(_)) => None,
                    Err(e) => return Err(e),
                };
                self.db
                    .put_attachment(VAULT_DOC, VAULT_ATTACHMENT, rev.as_ref(), bytes, VAULT_MIME)
                    .await?;
                Ok(true)
            }
            Err(e) => Err(e),
        }
    }

    /// Deletes the underlying database.
    pub async fn destroy(&self) -> Result<()> {
        self.db.destroy().await
    }
}

impl std::fmt::Debug for VaultInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultInstance")
            .field("vault_id", &self.vault_id)
            .field("db", &self.db.name())
            .finish()
    }
}
