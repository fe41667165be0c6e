//! One-shot and live replication over HTTP
//!
//! Both directions are poll-driven: read the counterpart's change feed,
//! fetch winning documents, force-write them on the receiving side. The
//! remote endpoints are served by the peer's web edge under
//! `https://host:port/db/<name>`; certificates are self-signed and accepted
//! as such.

use munkey_core::{Error, Result};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::database::{ChangesFeed, Database};
use crate::document::Document;

/// Default connect timeout for replication requests
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default interval between sync polls
pub const SYNC_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Event channel depth per live session
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Which way a replicated document travelled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncDirection {
    Pull,
    Push,
}

/// Events emitted by a live sync session
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// A document revision was accepted on the receiving side
    Change {
        direction: SyncDirection,
        doc: Document,
    },
    /// A poll completed with nothing new in either direction
    Paused,
    /// A transport or store failure; the session keeps polling until
    /// cancelled, teardown is the consumer's decision
    Error(String),
}

/// Cancellation side of a live sync session. Clonable; `cancel` is
/// idempotent.
#[derive(Debug, Clone)]
pub struct SyncControl {
    token: CancellationToken,
}

impl SyncControl {
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// A live bidirectional sync session against one remote database URL.
pub struct SyncSession {
    events: mpsc::Receiver<SyncEvent>,
    control: SyncControl,
}

impl SyncSession {
    /// Next sync event; `None` once the session task has exited.
    pub async fn recv(&mut self) -> Option<SyncEvent> {
        self.events.recv().await
    }

    pub fn control(&self) -> SyncControl {
        self.control.clone()
    }
}

/// An HTTPS client suitable for talking to peers: self-signed certificates
/// accepted, bounded connect timeout, no read timeout (feeds are long-lived).
pub fn build_client(connect_timeout: Duration) -> Result<Client> {
    Client::builder()
        .danger_accept_invalid_certs(true)
        .connect_timeout(connect_timeout)
        .build()
        .map_err(|e| Error::Transport(format!("Client construction failed: {}", e)))
}

fn classify_transport(e: &reqwest::Error) -> Error {
    let mut source = std::error::Error::source(e);
    while let Some(err) = source {
        if let Some(io) = err.downcast_ref::<std::io::Error>() {
            if io.kind() == std::io::ErrorKind::ConnectionRefused {
                return Error::TransportRefused(e.to_string());
            }
        }
        source = err.source();
    }
    Error::Transport(e.to_string())
}

fn feed_url(base: &str, since: u64) -> String {
    format!("{}/_changes?since={}", base.trim_end_matches('/'), since)
}

fn doc_url(base: &str, doc_id: &str) -> String {
    format!("{}/{}?attachments=true", base.trim_end_matches('/'), doc_id)
}

fn put_url(base: &str, doc_id: &str) -> String {
    format!("{}/{}?edits=false", base.trim_end_matches('/'), doc_id)
}

async fn fetch_changes(client: &Client, base: &str, since: u64) -> Result<ChangesFeed> {
    let response = client
        .get(feed_url(base, since))
        .send()
        .await
        .map_err(|e| classify_transport(&e))?
        .error_for_status()
        .map_err(|e| Error::Transport(format!("Change feed rejected: {}", e)))?;
    response
        .json()
        .await
        .map_err(|e| Error::Transport(format!("Change feed decode failed: {}", e)))
}

/// One pull pass: remote changes since `since`, winners force-written
/// locally. Returns the new feed position and whether anything was accepted.
async fn pull_once(
    db: &dyn Database,
    client: &Client,
    base: &str,
    since: u64,
    events: Option<&mpsc::Sender<SyncEvent>>,
) -> Result<(u64, bool)> {
    let feed = fetch_changes(client, base, since).await?;
    let mut accepted = false;

    for row in &feed.results {
        let doc = if row.deleted {
            Document::tombstone(row.id.clone(), row.rev.clone())
        } else {
            let response = client
                .get(doc_url(base, &row.id))
                .send()
                .await
                .map_err(|e| classify_transport(&e))?
                .error_for_status()
                .map_err(|e| Error::Transport(format!("Document fetch rejected: {}", e)))?;
            response
                .json()
                .await
                .map_err(|e| Error::Transport(format!("Document decode failed: {}", e)))?
        };

        if db.force_put(doc.clone()).await? {
            accepted = true;
            trace!(doc = %doc.id, rev = %doc.rev, "Pulled revision");
            if let Some(events) = events {
                let _ = events
                    .send(SyncEvent::Change {
                        direction: SyncDirection::Pull,
                        doc,
                    })
                    .await;
            }
        }
    }

    Ok((feed.last_seq, accepted))
}

/// One push pass: local changes since `since` are force-written remotely.
async fn push_once(
    db: &dyn Database,
    client: &Client,
    base: &str,
    since: u64,
    events: Option<&mpsc::Sender<SyncEvent>>,
) -> Result<(u64, bool)> {
    let feed = db.changes_since(since).await?;
    let mut sent = false;

    for row in &feed.results {
        let doc = if row.deleted {
            Document::tombstone(row.id.clone(), row.rev.clone())
        } else {
            db.get(&row.id).await?
        };

        client
            .put(put_url(base, &row.id))
            .json(&doc)
            .send()
            .await
            .map_err(|e| classify_transport(&e))?
            .error_for_status()
            .map_err(|e| Error::Transport(format!("Document push rejected: {}", e)))?;

        sent = true;
        trace!(doc = %doc.id, rev = %doc.rev, "Pushed revision");
        if let Some(events) = events {
            let _ = events
                .send(SyncEvent::Change {
                    direction: SyncDirection::Push,
                    doc,
                })
                .await;
        }
    }

    Ok((feed.last_seq, sent))
}

/// One pull pass followed by one push pass.
async fn sync_tick(
    db: &dyn Database,
    client: &Client,
    base: &str,
    pull_since: u64,
    push_since: u64,
    events: &mpsc::Sender<SyncEvent>,
) -> Result<(u64, u64, bool)> {
    let (new_pull, pulled) = pull_once(db, client, base, pull_since, Some(events)).await?;
    let (new_push, pushed) = push_once(db, client, base, push_since, Some(events)).await?;
    Ok((new_pull, new_push, pulled || pushed))
}

/// One-shot pull replication: everything the remote has, winners installed
/// locally. This is the "first pull" a freshly linked vault performs.
pub async fn replicate_from(db: &dyn Database, url: &str, client: &Client) -> Result<()> {
    let (last_seq, accepted) = pull_once(db, client, url, 0, None).await?;
    debug!(url, last_seq, accepted, "One-shot replication complete");
    Ok(())
}

/// Starts live bidirectional sync between `db` and the remote `url`.
///
/// The session polls both directions until cancelled. Transport failures
/// are reported as [`SyncEvent::Error`] and polling continues; whether to
/// tear the session down is the consumer's call.
pub fn sync_live(
    db: Arc<dyn Database>,
    url: String,
    client: Client,
    poll_interval: Duration,
) -> SyncSession {
    let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let token = CancellationToken::new();
    let task_token = token.clone();

    tokio::spawn(async move {
        let mut pull_since = 0u64;
        let mut push_since = 0u64;
        let mut was_active = true;

        loop {
            tokio::select! {
                _ = task_token.cancelled() => break,
                _ = tokio::time::sleep(poll_interval) => {}
            }

            // Cancellation also aborts the in-flight poll requests
            let tick = sync_tick(
                db.as_ref(),
                &client,
                &url,
                pull_since,
                push_since,
                &event_tx,
            );
            let outcome = tokio::select! {
                _ = task_token.cancelled() => break,
                outcome = tick => outcome,
            };

            match outcome {
                Ok((new_pull, new_push, active)) => {
                    pull_since = new_pull;
                    push_since = new_push;
                    if !active && was_active && event_tx.send(SyncEvent::Paused).await.is_err() {
                        break;
                    }
                    was_active = active;
                }
                Err(e) => {
                    warn!(url = %url, error = %e, "Sync poll failed");
                    if event_tx.send(SyncEvent::Error(e.to_string())).await.is_err() {
                        break;
                    }
                }
            }
        }

        debug!(url = %url, "Sync session stopped");
    });

    SyncSession {
        events: event_rx,
        control: SyncControl { token },
    }
}
