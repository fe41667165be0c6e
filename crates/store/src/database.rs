//! The `Database` trait: the attachment-capable KV seam
//!
//! Abstraction over the document engine a vault sits on. Implementations
//! must provide:
//! - revisioned documents with named attachments
//! - a monotonic change feed for replication
//! - force-writes that resolve conflicts by revision ordering

use async_trait::async_trait;
use munkey_core::Result;
use serde::{Deserialize, Serialize};

use crate::document::{Attachment, Document};
use crate::revision::Revision;

/// Database-level metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbInfo {
    pub db_name: String,
    pub update_seq: u64,
}

/// One row of the change feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRow {
    pub seq: u64,
    pub id: String,
    pub rev: Revision,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub deleted: bool,
}

/// A page of the change feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangesFeed {
    pub results: Vec<ChangeRow>,
    pub last_seq: u64,
}

/// Attachment-capable document store.
///
/// All mutating operations serialize internally; a revision returned by one
/// call is the precondition for the next, which is what serializes writers
/// on a single vault document.
#[async_trait]
pub trait Database: Send + Sync {
    /// Database name (scopes the on-disk location and the `/db/*` route)
    fn name(&self) -> &str;

    async fn info(&self) -> Result<DbInfo>;

    /// Fetches a live document. `NotFound` for absent or deleted documents.
    async fn get(&self, doc_id: &str) -> Result<Document>;

    /// Fetches one attachment's bytes. `NotFound` if the document or the
    /// attachment is absent.
    async fn get_attachment(&self, doc_id: &str, name: &str) -> Result<Attachment>;

    /// Writes one attachment.
    ///
    /// - document absent: `rev` must be `None`; the document is created
    /// - document present: `rev` must match its current revision
    ///
    /// Any other combination is a `Conflict`. Returns the new revision.
    async fn put_attachment(
        &self,
        doc_id: &str,
        name: &str,
        rev: Option<&Revision>,
        data: Vec<u8>,
        content_type: &str,
    ) -> Result<Revision>;

    /// Deletes a document at the given revision, leaving a tombstone.
    async fn remove(&self, doc_id: &str, rev: &Revision) -> Result<Revision>;

    /// Change rows with sequence numbers strictly greater than `since`.
    async fn changes_since(&self, since: u64) -> Result<ChangesFeed>;

    /// Replicator write: installs `doc` iff its revision beats the local
    /// one (generation, then digest). Returns whether the write won.
    async fn force_put(&self, doc: Document) -> Result<bool>;

    /// Destroys the database and its on-disk footprint. Further calls on
    /// this handle fail.
    async fn destroy(&self) -> Result<()>;
}
