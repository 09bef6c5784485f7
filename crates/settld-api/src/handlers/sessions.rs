use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use settld_auth::AuthContext;
use settld_eventlog::{EventLog, SigningPolicy};
use settld_store::IdempotencyKey;
use settld_types::{KeyId, SettldError};

use crate::dto::session::{AppendEventRequest, CreateSessionRequest, CreateSessionResponse, ListEventsQuery, ReplayPackResponse, TranscriptEntry};
use crate::error::ApiResult;
use crate::extractors::{idempotency_key, required_expected_prev_chain_hash};
use crate::idempotency::{fingerprint, with_idempotency};
use crate::state::AppState;

/// `POST /sessions` (§6): mints a new stream id. A session has no row of
/// its own — its existence is the presence of events on this stream id
/// (§4.3's per-stream hash chain).
pub async fn create_session(State(state): State<AppState>, auth: AuthContext, headers: HeaderMap, body: Bytes) -> ApiResult<impl IntoResponse> {
    let idem = idempotency_key(&headers)?;
    let print = fingerprint(&body);
    let req: CreateSessionRequest = serde_json::from_slice(&body).map_err(|e| SettldError::SchemaInvalid { path: "body".into(), message: e.to_string() })?;
    let key = IdempotencyKey::new(auth.tenant_id.clone(), "POST", "/sessions", idem);

    let (status, value) = with_idempotency(&state, key, print, move || async move {
        let session_id = uuid::Uuid::new_v4().to_string();
        state
            .event_log
            .append(&auth.tenant_id, &session_id, "session.opened", &req.actor, serde_json::json!({}), "null", SigningPolicy::NotRequired, None)
            .await?;
        Ok((StatusCode::CREATED, serde_json::to_value(CreateSessionResponse { session_id }).map_err(|e| SettldError::internal(e.to_string()))?))
    })
    .await?;
    Ok((status, Json(value)))
}

/// `POST /sessions/{id}/events` (§6, §4.3). `expectedPrevChainHash` comes
/// from the `x-proxy-expected-prev-chain-hash` header.
pub async fn append_event(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(session_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let expected_prev = required_expected_prev_chain_hash(&headers)?;
    let idem = idempotency_key(&headers)?;
    let print = fingerprint(&body);
    let req: AppendEventRequest = serde_json::from_slice(&body).map_err(|e| SettldError::SchemaInvalid { path: "body".into(), message: e.to_string() })?;
    let path = format!("/sessions/{session_id}/events");
    let key = IdempotencyKey::new(auth.tenant_id.clone(), "POST", path, idem);

    let _guard = state.store.stream_locks().acquire(&session_id).await;
    let (status, value) = with_idempotency(&state, key, print, move || async move {
        let policy = if req.require_signature { SigningPolicy::RequiredActive } else { SigningPolicy::NotRequired };
        let signer_key = req.signer_key_id.map(KeyId);
        let signer = signer_key.as_ref().map(|k| (k, state.vault.as_ref()));
        let event = state
            .event_log
            .append(&auth.tenant_id, &session_id, &req.event_type, &req.actor, req.payload, &expected_prev, policy, signer)
            .await?;
        Ok((StatusCode::CREATED, serde_json::to_value(&event).map_err(|e| SettldError::internal(e.to_string()))?))
    })
    .await?;
    Ok((status, Json(value)))
}

/// `GET /sessions/{id}/events` (§6): paginated raw event list.
pub async fn list_events(State(state): State<AppState>, auth: AuthContext, Path(session_id): Path<String>, Query(query): Query<ListEventsQuery>) -> ApiResult<impl IntoResponse> {
    let page = state
        .event_log
        .list(&auth.tenant_id, &session_id, &query.since_event_id, query.event_type.as_deref(), query.limit, query.offset)
        .await?;
    Ok(Json(page.events))
}

/// `GET /sessions/{id}/replay-pack` (§6): the full chain, independently
/// re-verified before being handed back (§4.3, §8 "chain hash recomputes").
pub async fn replay_pack(State(state): State<AppState>, auth: AuthContext, Path(session_id): Path<String>) -> ApiResult<impl IntoResponse> {
    let page = state.event_log.list(&auth.tenant_id, &session_id, "null", None, usize::MAX / 2, 0).await?;
    let chain_verified = EventLog::verify_chain(&page.events).is_ok();
    let head_chain_hash = page.events.last().map(|e| e.chain_hash.clone()).unwrap_or_else(|| "null".to_string());
    Ok(Json(ReplayPackResponse { stream_id: session_id, events: page.events, head_chain_hash, chain_verified }))
}

/// `GET /sessions/{id}/transcript` (§6): a flattened, human-readable view.
pub async fn transcript(State(state): State<AppState>, auth: AuthContext, Path(session_id): Path<String>) -> ApiResult<impl IntoResponse> {
    let page = state.event_log.list(&auth.tenant_id, &session_id, "null", None, usize::MAX / 2, 0).await?;
    let entries: Vec<TranscriptEntry> = page
        .events
        .into_iter()
        .map(|e| TranscriptEntry { at: e.at, actor: e.actor, event_type: e.event_type, payload: e.payload })
        .collect();
    Ok(Json(entries))
}
