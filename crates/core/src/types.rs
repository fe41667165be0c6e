//! Core type definitions

use serde::{Deserialize, Serialize};
use std::fmt;

/// Vault identifier: the base64url (no padding) encoding of the SPKI-DER
/// public key that verifies the vault's envelopes. Globally unique.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VaultId(String);

impl VaultId {
    /// Validates the base64url alphabet; the id must be non-empty and
    /// unpadded since it round-trips through file names and TXT records.
    pub fn new(id: String) -> Result<Self, String> {
        if id.is_empty() {
            return Err("VaultId must not be empty".to_string());
        }
        if !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err("VaultId must be base64url without padding".to_string());
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for VaultId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Local, per-node vault nickname, unique within the registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Nickname(String);

impl Nickname {
    /// Nicknames become path segments and URL components, so slashes,
    /// backslashes and dots-only names are rejected.
    pub fn new(name: String) -> Result<Self, String> {
        if name.is_empty() || name.len() > 255 {
            return Err("Nickname must be 1-255 characters".to_string());
        }
        if name.contains('/') || name.contains('\\') {
            return Err("Nickname must not contain path separators".to_string());
        }
        if name.chars().all(|c| c == '.') {
            return Err("Nickname must not be dots only".to_string());
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Nickname {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Network address of a peer node
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceKey {
    pub host: String,
    pub port: u16,
}

impl DeviceKey {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// One vault as advertised over the `/link` endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultSummary {
    pub nickname: String,
    #[serde(rename = "vaultId")]
    pub vault_id: VaultId,
}

/// One peer address as advertised over the `/link` endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerAddr {
    pub hostname: String,
    #[serde(rename = "portNum")]
    pub port_num: u16,
}

impl From<&DeviceKey> for PeerAddr {
    fn from(key: &DeviceKey) -> Self {
        Self {
            hostname: key.host.clone(),
            port_num: key.port,
        }
    }
}

impl From<&PeerAddr> for DeviceKey {
    fn from(addr: &PeerAddr) -> Self {
        DeviceKey::new(addr.hostname.clone(), addr.port_num)
    }
}

/// Identity document returned by a peer's `GET /link` endpoint.
///
/// This is the unit stored in the Active Peer List: the last successful
/// probe result for a given `(host, port)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerIdentity {
    #[serde(rename = "uniqueId")]
    pub unique_id: String,
    pub vaults: Vec<VaultSummary>,
    #[serde(rename = "activePeerList")]
    pub active_peer_list: Vec<PeerAddr>,
}
