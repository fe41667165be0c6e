//! Route handlers
//!
//! `/link` is read-only identity. `/db/{name}` exposes exactly the dialect
//! the store replicator drives: info, change feed, document fetch with
//! attachments, and forced writes of replicated revisions. Databases are
//! resolved through the registry, so only vault stores are reachable (the
//! admin database has no nickname and therefore no route).

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use munkey_core::{Error, Nickname, PeerAddr, PeerIdentity, VaultSummary};
use munkey_discovery::ActivePeerList;
use munkey_identity::NodeIdentity;
use munkey_store::{ChangesFeed, Database, DbInfo, Document};
use munkey_vault::VaultRegistry;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::ApiError;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub identity: NodeIdentity,
    pub registry: Arc<VaultRegistry>,
    pub apl: Arc<ActivePeerList>,
}

/// Creates the application router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/link", get(link))
        .route("/db/{name}", get(db_info))
        .route("/db/{name}/_changes", get(db_changes))
        .route("/db/{name}/{doc}", get(db_get_doc).put(db_put_doc))
        .route(
            "/db/{name}/{doc}/{attachment}",
            get(db_get_attachment).put(db_put_attachment),
        )
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

async fn resolve_db(
    state: &AppState,
    name: &str,
) -> Result<Arc<dyn Database>, ApiError> {
    let nickname = Nickname::new(name.to_string())
        .map_err(|e| ApiError(Error::NotFound(format!("Unknown database '{}': {}", name, e))))?;
    let vault = state
        .registry
        .get_by_name(&nickname)
        .await
        .ok_or_else(|| ApiError(Error::NotFound(format!("Unknown database '{}'", name))))?;
    Ok(vault.db())
}

/// `GET /link` — this node's identity document.
async fn link(State(state): State<AppState>) -> Json<PeerIdentity> {
    let vaults = state
        .registry
        .list()
        .await
        .into_iter()
        .map(|(nickname, vault_id)| VaultSummary {
            nickname: nickname.as_str().to_string(),
            vault_id,
        })
        .collect();

    let active_peer_list = state
        .apl
        .device_list()
        .await
        .iter()
        .map(PeerAddr::from)
        .collect();

    Json(PeerIdentity {
        unique_id: state.identity.uuid().to_string(),
        vaults,
        active_peer_list,
    })
}

/// `GET /db/{name}`
async fn db_info(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<DbInfo>, ApiError> {
    let db = resolve_db(&state, &name).await?;
    Ok(Json(db.info().await?))
}

#[derive(Debug, Deserialize)]
struct ChangesParams {
    #[serde(default)]
    since: u64,
}

/// `GET /db/{name}/_changes?since=N`
async fn db_changes(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(params): Query<ChangesParams>,
) -> Result<Json<ChangesFeed>, ApiError> {
    let db = resolve_db(&state, &name).await?;
    Ok(Json(db.changes_since(params.since).await?))
}

/// `GET /db/{name}/{doc}?attachments=true`
///
/// Attachment data is always inlined; the query flag exists for dialect
/// compatibility.
async fn db_get_doc(
    State(state): State<AppState>,
    Path((name, doc_id)): Path<(String, String)>,
) -> Result<Json<Document>, ApiError> {
    let db = resolve_db(&state, &name).await?;
    Ok(Json(db.get(&doc_id).await?))
}

/// `GET /db/{name}/{doc}/{attachment}` — raw attachment bytes under the
/// stored content type.
async fn db_get_attachment(
    State(state): State<AppState>,
    Path((name, doc_id, attachment_name)): Path<(String, String, String)>,
) -> Result<Response, ApiError> {
    let db = resolve_db(&state, &name).await?;
    let attachment = db.get_attachment(&doc_id, &attachment_name).await?;
    Ok((
        [(header::CONTENT_TYPE, attachment.content_type)],
        attachment.data,
    )
        .into_response())
}

#[derive(Debug, Deserialize)]
struct PutAttachmentParams {
    rev: Option<String>,
}

#[derive(Debug, Serialize)]
struct PutAttachmentResponse {
    ok: bool,
    rev: String,
}

/// `PUT /db/{name}/{doc}/{attachment}?rev=N-...` — writes one attachment.
/// The revision is required when the document exists, absent when creating.
async fn db_put_attachment(
    State(state): State<AppState>,
    Path((name, doc_id, attachment_name)): Path<(String, String, String)>,
    Query(params): Query<PutAttachmentParams>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<PutAttachmentResponse>, ApiError> {
    let rev = params
        .rev
        .map(|raw| {
            raw.parse::<munkey_store::Revision>()
                .map_err(|e| ApiError(Error::Conflict(e)))
        })
        .transpose()?;
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("application/octet-stream");

    let db = resolve_db(&state, &name).await?;
    let new_rev = db
        .put_attachment(&doc_id, &attachment_name, rev.as_ref(), body.to_vec(), content_type)
        .await?;
    Ok(Json(PutAttachmentResponse {
        ok: true,
        rev: new_rev.to_string(),
    }))
}

#[derive(Debug, Serialize)]
struct PutResponse {
    ok: bool,
    winner: bool,
}

/// `PUT /db/{name}/{doc}?edits=false` — forced write of a replicated
/// revision. The body carries the full document; the path id must match.
async fn db_put_doc(
    State(state): State<AppState>,
    Path((name, doc_id)): Path<(String, String)>,
    Json(doc): Json<Document>,
) -> Result<Json<PutResponse>, ApiError> {
    if doc.id != doc_id {
        return Err(ApiError(Error::Conflict(format!(
            "Path document '{}' does not match body '{}'",
            doc_id, doc.id
        ))));
    }

    let db = resolve_db(&state, &name).await?;
    let winner = db.force_put(doc).await?;
    Ok(Json(PutResponse { ok: true, winner }))
}
