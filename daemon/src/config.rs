//! Daemon configuration
//!
//! Sources, in priority order: CLI flags, then `munkey.toml`, then
//! defaults. Every section is optional in the file.
//!
//! ```toml
//! [server]
//! host = "0.0.0.0"
//! port = 8000
//!
//! [discovery]
//! enabled = true
//! advertised_port = 0   # 0 = advertise the bound server port
//!
//! [storage]
//! root_dir = "./munkey-data"
//! in_memory = false
//!
//! [logging]
//! level = "info"
//! ```

use munkey_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub discovery: DiscoveryConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            discovery: DiscoveryConfig::default(),
            storage: StorageConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the HTTPS edge binds
    pub host: String,
    /// Port the HTTPS edge binds (0 = ephemeral)
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Whether to broadcast and browse over mDNS
    pub enabled: bool,
    /// Port advertised to peers; 0 means the bound server port
    pub advertised_port: u16,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            advertised_port: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory: vault databases under `<root>/munkey/<name>`, the
    /// admin database under `<root>/admin/info`, TLS material at
    /// `<root>/tls.key` / `<root>/tls.crt`
    pub root_dir: PathBuf,
    /// Keep everything in memory; nothing survives the process
    pub in_memory: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("./munkey-data"),
            in_memory: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default tracing filter, overridden by `MUNKEY_LOG`
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Loads `path` when given (must exist), otherwise tries `munkey.toml`
    /// in the working directory, otherwise defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let candidate = match path {
            Some(path) => {
                if !path.exists() {
                    return Err(Error::Config(format!(
                        "Config file not found: {}",
                        path.display()
                    )));
                }
                Some(path.to_path_buf())
            }
            None => {
                let default = PathBuf::from("munkey.toml");
                default.exists().then_some(default)
            }
        };

        let Some(candidate) = candidate else {
            return Ok(Self::default());
        };

        let raw = std::fs::read_to_string(&candidate)?;
        toml::from_str(&raw).map_err(|e| {
            Error::Config(format!("Failed to parse {}: {}", candidate.display(), e))
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.host.is_empty() {
            return Err(Error::Config("server.host must not be empty".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.server.port, 8000);
        assert!(config.discovery.enabled);
        assert!(!config.storage.in_memory);
        config.validate().unwrap();
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let config: Config = toml::from_str(
            r#"
            [server]
            port = 9001

            [storage]
            in_memory = true
            "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 9001);
        assert_eq!(config.server.host, "0.0.0.0");
        assert!(config.storage.in_memory);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let result = Config::load(Some(Path::new("/nonexistent/munkey.toml")));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("munkey.toml");
        std::fs::write(&path, "[discovery]\nenabled = false\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert!(!config.discovery.enabled);
    }
}
