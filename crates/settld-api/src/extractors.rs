//! Header helpers bridging `settld_auth`'s pure header-validation functions
//! into `SettldError` so handlers can use `?` directly (grounded on the
//! teacher's `openibank-api::extractors::AuthenticatedUser` pattern of
//! wrapping a lower-layer auth type for handler consumption).

use axum::http::HeaderMap;
use settld_auth::{expected_prev_chain_hash, require_idempotency_key, AuthError};
use settld_types::SettldError;

fn map_auth_err(err: AuthError) -> SettldError {
    match err {
        AuthError::MissingIdempotencyKey => SettldError::InvalidInput { message: err.to_string() },
        other => SettldError::Unauthorized { reason: other.to_string() },
    }
}

pub fn idempotency_key(headers: &HeaderMap) -> Result<String, SettldError> {
    require_idempotency_key(headers).map_err(map_auth_err)
}

/// The `x-proxy-expected-prev-chain-hash` header, required on event-append
/// routes (§6). Missing entirely is distinct from the literal `"null"`
/// sentinel (an empty stream) — a handler that requires it on its route
/// turns `None` into `SCHEMA_INVALID`.
pub fn required_expected_prev_chain_hash(headers: &HeaderMap) -> Result<String, SettldError> {
    expected_prev_chain_hash(headers).ok_or_else(|| SettldError::SchemaInvalid {
        path: "x-proxy-expected-prev-chain-hash".into(),
        message: "header is required on this route".into(),
    })
}
