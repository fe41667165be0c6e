//! # Munkey Vault
//!
//! Vault lifecycle on top of the document store:
//!
//! - `instance`: one vault over one database, payload-oblivious
//! - `registry`: the nickname ↔ vault-id index with its conflict policy
//! - `admin`: the persisted `(nickname, vault id)` list replayed at startup
//!
//! The registry is the sole owner of vault instances; discovery and
//! replication borrow `Arc` handles whose lifetime is bound to the process.

pub mod admin;
pub mod instance;
pub mod registry;

pub use admin::{AdminRecord, AdminStore};
pub use instance::VaultInstance;
pub use registry::{DatabaseFactory, VaultRegistry};

/// Document id every vault stores its envelope under
pub const VAULT_DOC: &str = "vault";

/// Attachment name carrying the envelope bytes
pub const VAULT_ATTACHMENT: &str = "passwords.json";

/// Attachment MIME type
pub const VAULT_MIME: &str = "text/plain";
