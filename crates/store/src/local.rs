//! In-process document engine
//!
//! A tokio-`RwLock` document map with an optional on-disk JSON snapshot.
//! Snapshot persistence is write-through: every mutation rewrites
//! `<dir>/db.json` via a temp-file rename, and `open` reloads it, which is
//! what carries vaults across daemon restarts.

use async_trait::async_trait;
use munkey_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::database::{ChangeRow, ChangesFeed, Database, DbInfo};
use crate::document::{Attachment, Document};
use crate::revision::Revision;

const SNAPSHOT_FILE: &str = "db.json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct State {
    docs: HashMap<String, Document>,
    /// Losing branch displaced by a replicated winner, kept so removing the
    /// winning revision re-exposes it instead of leaving a tombstone
    #[serde(default)]
    priors: HashMap<String, Document>,
    /// Last sequence number at which each document changed
    seqs: HashMap<String, u64>,
    update_seq: u64,
    #[serde(skip)]
    destroyed: bool,
}

/// The local engine backing vault and admin databases.
pub struct LocalDatabase {
    name: String,
    persist_dir: Option<PathBuf>,
    state: RwLock<State>,
}

impl LocalDatabase {
    /// Opens a database, reloading the snapshot when `persist_dir` holds one.
    pub fn open(name: impl Into<String>, persist_dir: Option<PathBuf>) -> Result<Self> {
        let name = name.into();
        let state = match &persist_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                let snapshot = dir.join(SNAPSHOT_FILE);
                if snapshot.exists() {
                    let raw = std::fs::read(&snapshot)?;
                    serde_json::from_slice(&raw).map_err(|e| {
                        Error::Store(format!(
                            "Corrupt snapshot for '{}' at {}: {}",
                            name,
                            snapshot.display(),
                            e
                        ))
                    })?
                } else {
                    State::default()
                }
            }
            None => State::default(),
        };

        debug!(db = %name, docs = state.docs.len(), "Opened database");
        Ok(Self {
            name,
            persist_dir,
            state: RwLock::new(state),
        })
    }

    /// In-memory database, nothing on disk.
    pub fn in_memory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            persist_dir: None,
            state: RwLock::new(State::default()),
        }
    }

    fn persist(&self, state: &State) -> Result<()> {
        let Some(dir) = &self.persist_dir else {
            return Ok(());
        };
        let raw = serde_json::to_vec(state)
            .map_err(|e| Error::Store(format!("Snapshot encoding failed: {}", e)))?;
        let tmp = dir.join(format!("{}.tmp", SNAPSHOT_FILE));
        std::fs::write(&tmp, raw)?;
        std::fs::rename(&tmp, dir.join(SNAPSHOT_FILE))?;
        Ok(())
    }

    fn check_alive(state: &State, name: &str) -> Result<()> {
        if state.destroyed {
            return Err(Error::Store(format!("Database '{}' was destroyed", name)));
        }
        Ok(())
    }

    fn bump_seq(state: &mut State, doc_id: &str) {
        state.update_seq += 1;
        let seq = state.update_seq;
        state.seqs.insert(doc_id.to_string(), seq);
    }
}

#[async_trait]
impl Database for LocalDatabase {
    fn name(&self) -> &str {
        &self.name
    }

    async fn info(&self) -> Result<DbInfo> {
        let state = self.state.read().await;
        Self::check_alive(&state, &self.name)?;
        Ok(DbInfo {
            db_name: self.name.clone(),
            update_seq: state.update_seq,
        })
    }

    async fn get(&self, doc_id: &str) -> Result<Document> {
        let state = self.state.read().await;
        Self::check_alive(&state, &self.name)?;
        match state.docs.get(doc_id) {
            Some(doc) if !doc.deleted => Ok(doc.clone()),
            _ => Err(Error::NotFound(format!(
                "Document '{}' not found in '{}'",
                doc_id, self.name
            ))),
        }
    }

    async fn get_attachment(&self, doc_id: &str, name: &str) -> Result<Attachment> {
        let doc = self.get(doc_id).await?;
        doc.attachments.get(name).cloned().ok_or_else(|| {
            Error::NotFound(format!(
                "Attachment '{}' not found on '{}/{}'",
                name, self.name, doc_id
            ))
        })
    }

    async fn put_attachment(
        &self,
        doc_id: &str,
        name: &str,
        rev: Option<&Revision>,
        data: Vec<u8>,
        content_type: &str,
    ) -> Result<Revision> {
        let mut state = self.state.write().await;
        Self::check_alive(&state, &self.name)?;

        let current = state.docs.get(doc_id);
        let live = current.filter(|doc| !doc.deleted);

        let (base_attachments, new_rev_base) = match (live, rev) {
            (Some(doc), Some(rev)) if *rev == doc.rev => {
                (doc.attachments.clone(), Some(doc.rev.clone()))
            }
            (Some(doc), _) => {
                return Err(Error::Conflict(format!(
                    "Document '{}/{}' is at {}, not the supplied revision",
                    self.name, doc_id, doc.rev
                )));
            }
            (None, Some(_)) => {
                return Err(Error::Conflict(format!(
                    "Document '{}/{}' does not exist but a revision was supplied",
                    self.name, doc_id
                )));
            }
            // Recreation after deletion continues the tombstone's generation
            (None, None) => (
                BTreeMap::new(),
                current.map(|tombstone| tombstone.rev.clone()),
            ),
        };

        let mut attachments = base_attachments;
        attachments.insert(name.to_string(), Attachment::new(content_type, data));

        let digest = Document::digest_content(false, &attachments);
        let new_rev = match new_rev_base {
            Some(base) => base.next(digest),
            None => Revision::first(digest),
        };

        let doc = Document {
            id: doc_id.to_string(),
            rev: new_rev.clone(),
            deleted: false,
            attachments,
        };
        state.docs.insert(doc_id.to_string(), doc);
        Self::bump_seq(&mut state, doc_id);
        self.persist(&state)?;

        Ok(new_rev)
    }

    async fn remove(&self, doc_id: &str, rev: &Revision) -> Result<Revision> {
        let mut state = self.state.write().await;
        Self::check_alive(&state, &self.name)?;

        let current_rev = {
            let doc = state
                .docs
                .get(doc_id)
                .filter(|doc| !doc.deleted)
                .ok_or_else(|| {
                    Error::NotFound(format!(
                        "Document '{}' not found in '{}'",
                        doc_id, self.name
                    ))
                })?;
            if doc.rev != *rev {
                return Err(Error::Conflict(format!(
                    "Document '{}/{}' is at {}, not {}",
                    self.name, doc_id, doc.rev, rev
                )));
            }
            doc.rev.clone()
        };

        // Removing a winner that displaced a conflicting branch re-exposes
        // that branch; otherwise the document becomes a tombstone.
        let new_rev = match state.priors.remove(doc_id) {
            Some(prior) => {
                let rev = prior.rev.clone();
                state.docs.insert(doc_id.to_string(), prior);
                rev
            }
            None => {
                let digest = Document::digest_content(true, &BTreeMap::new());
                let new_rev = current_rev.next(digest);
                state
                    .docs
                    .insert(doc_id.to_string(), Document::tombstone(doc_id, new_rev.clone()));
                new_rev
            }
        };
        Self::bump_seq(&mut state, doc_id);
        self.persist(&state)?;

        Ok(new_rev)
    }

    async fn changes_since(&self, since: u64) -> Result<ChangesFeed> {
        let state = self.state.read().await;
        Self::check_alive(&state, &self.name)?;

        let mut results: Vec<ChangeRow> = state
            .seqs
            .iter()
            .filter(|(_, seq)| **seq > since)
            .filter_map(|(id, seq)| {
                state.docs.get(id).map(|doc| ChangeRow {
                    seq: *seq,
                    id: id.clone(),
                    rev: doc.rev.clone(),
                    deleted: doc.deleted,
                })
            })
            .collect();
        results.sort_by_key(|row| row.seq);

        Ok(ChangesFeed {
            results,
            last_seq: state.update_seq,
        })
    }

    async fn force_put(&self, doc: Document) -> Result<bool> {
        let mut state = self.state.write().await;
        Self::check_alive(&state, &self.name)?;

        let won = match state.docs.get(&doc.id) {
            Some(existing) => doc.rev > existing.rev,
            None => true,
        };
        if !won {
            debug!(db = %self.name, doc = %doc.id, rev = %doc.rev, "Replicated revision lost to local winner");
            return Ok(false);
        }

        let doc_id = doc.id.clone();
        // A displaced live winner becomes the losing branch and can be
        // restored by removing the replicated revision.
        if let Some(displaced) = state.docs.insert(doc_id.clone(), doc) {
            if !displaced.deleted {
                state.priors.insert(doc_id.clone(), displaced);
            }
        }
        Self::bump_seq(&mut state, &doc_id);
        self.persist(&state)?;
        Ok(true)
    }

    async fn destroy(&self) -> Result<()> {
        let mut state = self.state.write().await;
        state.docs.clear();
        state.priors.clear();
        state.seqs.clear();
        state.destroyed = true;

        if let Some(dir) = &self.persist_dir {
            if let Err(e) = std::fs::remove_dir_all(dir) {
                warn!(db = %self.name, error = %e, "Failed to remove database directory");
            }
        }
        debug!(db = %self.name, "Database destroyed");
        Ok(())
    }
}
