//! Wires `settld_store`'s idempotency map into the HTTP layer (§4.4, §6
//! "x-idempotency-key"). Grounded on the teacher's `openibank-auth::rate_limit`
//! keyed-map-with-TTL plumbing, reused here for put-if-absent response replay
//! instead of request counting.

use std::future::Future;

use axum::http::StatusCode;
use chrono::Duration;
use serde_json::Value;
use settld_store::{IdempotencyKey, IdempotencyOutcome};
use settld_types::SettldError;

use crate::state::AppState;

#[derive(Debug, Clone, Copy)]
pub struct IdempotencyTtl(pub Duration);

impl Default for IdempotencyTtl {
    fn default() -> Self {
        Self(Duration::seconds(settld_store::idempotency::DEFAULT_IDEMPOTENCY_TTL_SECONDS))
    }
}

/// SHA-256 hex of the request body bytes, used as the idempotency
/// fingerprint (§4.4: "(tenant, route, idempotency-key, request-fingerprint)").
pub fn fingerprint(body: &[u8]) -> String {
    settld_crypto::sha256_hex(body)
}

/// Run `handler` under HTTP-level idempotency protection. A replayed request
/// (same key, same fingerprint) never re-runs `handler`; a same-key,
/// different-fingerprint request fails closed with `IDEMPOTENCY_CONFLICT`
/// before `handler` runs at all.
pub async fn with_idempotency<F, Fut>(
    state: &AppState,
    key: IdempotencyKey,
    request_fingerprint: String,
    handler: F,
) -> Result<(StatusCode, Value), SettldError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<(StatusCode, Value), SettldError>>,
{
    if let Some(record) = state.store.idempotency_check(&key, &request_fingerprint).await.map_err(SettldError::from)? {
        if record.request_fingerprint == request_fingerprint {
            let status = StatusCode::from_u16(record.response_status).unwrap_or(StatusCode::OK);
            return Ok((status, record.response_body));
        }
        return Err(SettldError::IdempotencyConflict { prior_fingerprint: record.request_fingerprint });
    }

    let (status, body) = handler().await?;

    match state
        .store
        .idempotency_put(key, request_fingerprint, status.as_u16(), body.clone(), state.idempotency_ttl.0)
        .await
        .map_err(SettldError::from)?
    {
        IdempotencyOutcome::Stored => Ok((status, body)),
        IdempotencyOutcome::Replay(record) => {
            let status = StatusCode::from_u16(record.response_status).unwrap_or(status);
            Ok((status, record.response_body))
        }
        IdempotencyOutcome::Conflict(record) => Err(SettldError::IdempotencyConflict { prior_fingerprint: record.request_fingerprint }),
    }
}
