//! The `GET /link` identity probe
//!
//! Probing is soft-failure: any transport or decode problem yields `None`
//! and a log line. A refused connection is an expected condition (the peer
//! shut down between mDNS resolution and the probe) and logs at debug.

use async_trait::async_trait;
use munkey_core::PeerIdentity;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, warn};

/// Connect timeout for probes; there is no read timeout, `/link` responds
/// immediately or not at all.
pub const PROBE_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Probe seam, mockable for activity tests.
#[async_trait]
pub trait LinkProbe: Send + Sync {
    /// `Some(identity)` on a successful probe, `None` on any failure.
    async fn probe(&self, host: &str, port: u16) -> Option<PeerIdentity>;
}

/// Production probe: HTTPS with self-signed certificates accepted.
pub struct HttpsLinkProbe {
    client: Client,
}

impl HttpsLinkProbe {
    pub fn new() -> munkey_core::Result<Self> {
        let client = Client::builder()
            .danger_accept_invalid_certs(true)
            .connect_timeout(PROBE_CONNECT_TIMEOUT)
            .build()
            .map_err(|e| {
                munkey_core::Error::Transport(format!("Probe client construction failed: {}", e))
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl LinkProbe for HttpsLinkProbe {
    async fn probe(&self, host: &str, port: u16) -> Option<PeerIdentity> {
        let url = format!("https://{}:{}/link", host, port);

        let response = match self.client.get(&url).send().await {
            Ok(response) => response,
            Err(e) if is_refused(&e) => {
                debug!(url, "Link probe refused");
                return None;
            }
            Err(e) => {
                warn!(url, error = %e, "Link probe transport failure");
                return None;
            }
        };

        let response = match response.error_for_status() {
            Ok(response) => response,
            Err(e) => {
                warn!(url, error = %e, "Link probe rejected");
                return None;
            }
        };

        match response.json::<PeerIdentity>().await {
            Ok(identity) => {
                debug!(url, peer = %identity.unique_id, "Link probe succeeded");
                Some(identity)
            }
            Err(e) => {
                warn!(url, error = %e, "Link probe returned an invalid identity document");
                None
            }
        }
    }
}

fn is_refused(e: &reqwest::Error) -> bool {
    let mut source = std::error::Error::source(e);
    while let Some(err) = source {
        if let Some(io) = err.downcast_ref::<std::io::Error>() {
            if io.kind() == std::io::ErrorKind::ConnectionRefused {
                return true;
            }
        }
        source = err.source();
    }
    false
}
