//! HTTPS server lifecycle
//!
//! Single-shot listen/close over axum-server's rustls binding. Bind
//! failures surface as `ServerBusy`; closing an idle server is
//! `ServerNotRunning`.

use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use munkey_core::{Error, Result};
use munkey_identity::TlsMaterial;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::routes::{create_router, AppState};

/// Drain window for in-flight responses at shutdown
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct WebOptions {
    pub host: String,
    pub port: u16,
}

impl Default for WebOptions {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

/// The node's HTTPS edge.
pub struct WebServer {
    state: AppState,
    tls: TlsMaterial,
    handle: Mutex<Option<Handle>>,
}

impl WebServer {
    pub fn new(state: AppState, tls: TlsMaterial) -> Self {
        Self {
            state,
            tls,
            handle: Mutex::new(None),
        }
    }

    /// Binds and starts serving. Returns the bound address (useful with
    /// port 0). Fails with `ServerBusy` when the address is taken or the
    /// server is already listening.
    pub async fn listen(&self, options: &WebOptions) -> Result<SocketAddr> {
        let mut guard = self.handle.lock().await;
        if guard.is_some() {
            return Err(Error::ServerBusy("Server is already listening".to_string()));
        }

        let addr: SocketAddr = format!("{}:{}", options.host, options.port)
            .parse()
            .map_err(|e| Error::Config(format!("Invalid listen address: {}", e)))?;

        let listener = std::net::TcpListener::bind(addr).map_err(|e| {
            if e.kind() == std::io::ErrorKind::AddrInUse {
                Error::ServerBusy(format!("Address {} is in use", addr))
            } else {
                Error::Io(e)
            }
        })?;
        listener.set_nonblocking(true)?;

        let config = RustlsConfig::from_pem(
            self.tls.cert_pem().as_bytes().to_vec(),
            self.tls.key_pem().as_bytes().to_vec(),
        )
        .await
        .map_err(|e| Error::Crypto(format!("TLS configuration failed: {}", e)))?;

        let handle = Handle::new();
        let server = axum_server::from_tcp_rustls(listener, config)
            .handle(handle.clone())
            .serve(create_router(self.state.clone()).into_make_service());

        tokio::spawn(async move {
            if let Err(e) = server.await {
                error!(error = %e, "HTTPS server exited with error");
            }
        });

        let bound = handle
            .listening()
            .await
            .ok_or_else(|| Error::ServerBusy(format!("Failed to start listening on {}", addr)))?;

        info!(addr = %bound, "HTTPS server listening");
        *guard = Some(handle);
        Ok(bound)
    }

    /// Stops accepting and lets in-flight responses drain. Fails with
    /// `ServerNotRunning` when the server is not listening.
    pub async fn close(&self) -> Result<()> {
        let handle = self
            .handle
            .lock()
            .await
            .take()
            .ok_or(Error::ServerNotRunning)?;

        handle.graceful_shutdown(Some(SHUTDOWN_GRACE));
        info!("HTTPS server closed");
        Ok(())
    }
}

impl std::fmt::Debug for WebServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebServer").finish_non_exhaustive()
    }
}
