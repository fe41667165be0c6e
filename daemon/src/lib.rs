//! # Munkey Daemon
//!
//! Node assembly for the peer-to-peer password vault: configuration, the
//! startup builder, and the vault user flows consumed by the shell and RPC
//! surfaces.

pub mod config;
pub mod node;

pub use config::Config;
pub use node::{Node, NodeStatus};
