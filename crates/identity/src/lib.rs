//! # Munkey Identity
//!
//! Process-scoped identity: the node UUID advertised over mDNS and `/link`,
//! and the self-signed TLS key/cert pair the web edge serves with.
//!
//! TLS material lives at `<root>/tls.key` and `<root>/tls.crt`; when either
//! file is missing a fresh pair is generated at startup and, given a root
//! directory, persisted for the next run.

use munkey_core::{Error, Result};
use std::path::Path;
use tracing::{debug, info};
use uuid::Uuid;

const TLS_KEY_FILE: &str = "tls.key";
const TLS_CERT_FILE: &str = "tls.crt";

/// The node's stable-for-this-process identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeIdentity {
    uuid: String,
}

impl NodeIdentity {
    /// A fresh random identity, lowercase hyphenated (the casing mDNS TXT
    /// records and `/link` bodies carry).
    pub fn generate() -> Self {
        Self {
            uuid: Uuid::new_v4().to_string().to_lowercase(),
        }
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self {
            uuid: uuid.to_string().to_lowercase(),
        }
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    /// Whether a peer-advertised uuid is this node (case-insensitive).
    pub fn is_self(&self, other: &str) -> bool {
        self.uuid.eq_ignore_ascii_case(other)
    }
}

impl std::fmt::Display for NodeIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.uuid)
    }
}

/// PEM-encoded self-signed certificate and key.
#[derive(Clone)]
pub struct TlsMaterial {
    cert_pem: String,
    key_pem: String,
}

impl TlsMaterial {
    /// Loads `<root>/tls.key` + `<root>/tls.crt` when both exist, otherwise
    /// generates a self-signed pair (and persists it when `root` is given).
    pub fn load_or_generate(root: Option<&Path>) -> Result<Self> {
        if let Some(root) = root {
            let key_path = root.join(TLS_KEY_FILE);
            let cert_path = root.join(TLS_CERT_FILE);
            if key_path.exists() && cert_path.exists() {
                debug!(path = %root.display(), "Loading TLS material");
                return Ok(Self {
                    cert_pem: std::fs::read_to_string(&cert_path)?,
                    key_pem: std::fs::read_to_string(&key_path)?,
                });
            }
        }

        let material = Self::generate()?;
        if let Some(root) = root {
            std::fs::create_dir_all(root)?;
            std::fs::write(root.join(TLS_CERT_FILE), &material.cert_pem)?;
            std::fs::write(root.join(TLS_KEY_FILE), &material.key_pem)?;
            info!(path = %root.display(), "Generated and persisted TLS material");
        } else {
            info!("Generated ephemeral TLS material");
        }
        Ok(material)
    }

    /// A fresh self-signed pair, never touching disk.
    pub fn generate() -> Result<Self> {
        let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
        let mut names = vec!["localhost".to_string()];
        if hostname != "localhost" {
            names.push(hostname);
        }

        let cert = rcgen::generate_simple_self_signed(names)
            .map_err(|e| Error::Crypto(format!("Certificate generation failed: {}", e)))?;

        Ok(Self {
            cert_pem: cert.cert.pem(),
            key_pem: cert.key_pair.serialize_pem(),
        })
    }

    pub fn cert_pem(&self) -> &str {
        &self.cert_pem
    }

    pub fn key_pem(&self) -> &str {
        &self.key_pem
    }
}

impl std::fmt::Debug for TlsMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsMaterial")
            .field("cert_pem", &self.cert_pem.len())
            .field("key_pem", &"[REDACTED]")
            .finish()
    }
}
