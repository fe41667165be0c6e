//! Munkey daemon entry point
//!
//! Starts one node: HTTPS edge, mDNS broadcast/browse, vault registry
//! replayed from the admin store. Runs until ctrl-c, then shuts down
//! gracefully. Exit code 0 on a clean quit, non-zero on fatal startup
//! errors.

use clap::Parser;
use munkey_daemon::{Config, Node};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "munkey", about = "Peer-to-peer encrypted password vault daemon")]
struct Cli {
    /// Root directory for vault databases, the admin store and TLS material
    #[arg(long)]
    root_dir: Option<PathBuf>,

    /// HTTPS port (0 = ephemeral)
    #[arg(long)]
    port: Option<u16>,

    /// Port advertised to peers over mDNS (defaults to the bound port)
    #[arg(long)]
    discovery_port: Option<u16>,

    /// Keep all state in memory; nothing survives the process
    #[arg(long)]
    in_memory: bool,

    /// Config file (default: ./munkey.toml when present)
    #[arg(long)]
    config: Option<PathBuf>,
}

impl Cli {
    fn apply(self, mut config: Config) -> Config {
        if let Some(root_dir) = self.root_dir {
            config.storage.root_dir = root_dir;
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(port) = self.discovery_port {
            config.discovery.advertised_port = port;
        }
        if self.in_memory {
            config.storage.in_memory = true;
        }
        config
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => cli.apply(config),
        Err(e) => {
            eprintln!("munkey: {}", e);
            std::process::exit(2);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("MUNKEY_LOG")
                .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone())),
        )
        .init();

    if let Err(e) = run(config).await {
        tracing::error!(error = %e, "Fatal startup error");
        std::process::exit(1);
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    let mut node = Node::build(config).await?;
    node.start().await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    node.shutdown().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_the_documented_flags() {
        let cli = Cli::try_parse_from([
            "munkey",
            "--root-dir",
            "/tmp/munkey-root",
            "--port",
            "9001",
            "--discovery-port",
            "9002",
            "--in-memory",
        ])
        .unwrap();

        let config = cli.apply(Config::default());
        assert_eq!(config.storage.root_dir, PathBuf::from("/tmp/munkey-root"));
        assert_eq!(config.server.port, 9001);
        assert_eq!(config.discovery.advertised_port, 9002);
        assert!(config.storage.in_memory);
    }

    #[test]
    fn cli_flags_default_to_config_values() {
        let cli = Cli::try_parse_from(["munkey"]).unwrap();
        let config = cli.apply(Config::default());
        assert_eq!(config.server.port, 8000);
        assert!(!config.storage.in_memory);
    }

    #[test]
    fn unknown_flags_are_rejected() {
        assert!(Cli::try_parse_from(["munkey", "--bogus"]).is_err());
    }
}
