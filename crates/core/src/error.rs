//! Core error types for Munkey

use thiserror::Error;

/// Result type alias using Munkey's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for all Munkey modules
#[derive(Error, Debug)]
pub enum Error {
    /// A payload envelope or encrypted body failed to parse
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// The envelope declared a protocol version this build does not speak
    #[error("Unsupported protocol version: {0}")]
    UnsupportedVersion(u32),

    /// Signature verification failed, or the vault id did not decode to a key
    #[error("Invalid signature")]
    InvalidSignature,

    /// Decryption failed; the supplied password does not match
    #[error("Bad decryption key")]
    BadKey,

    /// A registry or store invariant was violated
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// The remote actively refused the connection (soft failure)
    #[error("Connection refused: {0}")]
    TransportRefused(String),

    /// Any other network-level failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// The web server could not bind (address in use)
    #[error("Server busy: {0}")]
    ServerBusy(String),

    /// Close was requested on a server that is not listening
    #[error("Server not running")]
    ServerNotRunning,

    /// Underlying document store failure
    #[error("Store error: {0}")]
    Store(String),

    /// Key generation or other cryptographic failure
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error represents a soft network failure that should be
    /// handled by dropping the peer rather than surfacing to the caller.
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::TransportRefused(_) | Error::Transport(_))
    }
}
