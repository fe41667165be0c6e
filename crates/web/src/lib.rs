//! # Munkey Web
//!
//! The HTTPS edge every peer talks to:
//!
//! - `GET /link` — this node's identity document
//! - `/db/<name>/*` — the replication dialect over the named vault's store
//!
//! TLS is the node's self-signed material; peers accept it as such. The
//! server is single-shot: one `listen`, one `close`.

pub mod error;
pub mod routes;
pub mod server;

pub use routes::AppState;
pub use server::{WebOptions, WebServer};
