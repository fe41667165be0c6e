//! # Munkey Store
//!
//! The pluggable document store underneath every vault: an attachment-capable
//! KV engine with live replication hooks.
//!
//! ## Module Structure
//!
//! - `revision`: `"<generation>-<sha256>"` revision strings and their total order
//! - `document`: documents and base64-transported attachments
//! - `database`: the `Database` trait every engine implements
//! - `local`: the in-process engine (in-memory, optionally snapshot-persisted)
//! - `replicate`: one-shot pull and live bidirectional sync over HTTP
//!
//! ## Replication dialect
//!
//! The replicator drives three endpoints on the remote side, the same ones
//! `munkey-web` serves under `/db/<name>`:
//!
//! - `GET  <url>/_changes?since=<seq>` — change rows since a sequence number
//! - `GET  <url>/<doc>?attachments=true` — full document with attachment data
//! - `PUT  <url>/<doc>?edits=false` — force-write a replicated revision
//!
//! Convergence is winner-takes-all on the revision order (generation first,
//! digest tie-break), so two nodes syncing from each other reach the same
//! winning revision without coordination.

pub mod database;
pub mod document;
pub mod local;
pub mod replicate;
pub mod revision;

pub use database::{ChangeRow, ChangesFeed, Database, DbInfo};
pub use document::{Attachment, Document};
pub use local::LocalDatabase;
pub use replicate::{
    build_client, replicate_from, sync_live, SyncControl, SyncDirection, SyncEvent, SyncSession,
    CONNECT_TIMEOUT, SYNC_POLL_INTERVAL,
};
pub use revision::Revision;
