//! The HTTP error envelope (§6 "Error envelope") and the mapping from every domain
//! error type to it (grounded on the teacher's `openibank-api::error::ApiError` /
//! `From<OpeniBankError>` pair, generalized to cover every settld error source:
//! `SettldError`, `settld_store::StoreError`, `settld_auth::AuthError`, and
//! `settld_crypto::CryptoError`).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::Value;
use settld_types::SettldError;

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub details: Value,
}

impl ApiError {
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> (StatusCode, Self) {
        (status, Self { code: code.into(), message: message.into(), details: Value::Null })
    }

    pub fn with_details(status: StatusCode, code: impl Into<String>, message: impl Into<String>, details: Value) -> (StatusCode, Self) {
        (status, Self { code: code.into(), message: message.into(), details })
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::INTERNAL_SERVER_ERROR;
        (status, Json(self)).into_response()
    }
}

/// `status(err), ApiError` for a `SettldError`, following §7's kind-to-status table.
pub fn settld_error_response(err: SettldError) -> (StatusCode, Json<ApiError>) {
    let status = match &err {
        SettldError::SchemaInvalid { .. } | SettldError::InvalidInput { .. } => StatusCode::BAD_REQUEST,
        SettldError::AuthRequired | SettldError::TenantMismatch | SettldError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
        SettldError::IdempotencyConflict { .. } => StatusCode::CONFLICT,
        SettldError::ChainHashMismatch { .. } | SettldError::StaleState { .. } => StatusCode::CONFLICT,
        SettldError::CursorNotFound { .. } | SettldError::NotFound { .. } => StatusCode::NOT_FOUND,
        SettldError::AgentSuspended { .. }
        | SettldError::AgentThrottled { .. }
        | SettldError::SignerKeyRevoked { .. }
        | SettldError::SignerKeyNotActive { .. } => StatusCode::FORBIDDEN,
        SettldError::SettlementKernelBindingInvalid { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        SettldError::NeedsReconciliation { .. } => StatusCode::SERVICE_UNAVAILABLE,
        SettldError::GrantExpired { .. }
        | SettldError::GrantNotYetValid { .. }
        | SettldError::GrantRevoked { .. }
        | SettldError::GrantSpendExceeded { .. }
        | SettldError::GrantChainDepthExceeded { .. }
        | SettldError::GrantCapabilityNotCovered { .. }
        | SettldError::GrantHashMismatch { .. }
        | SettldError::GrantSignatureInvalid { .. } => StatusCode::FORBIDDEN,
        SettldError::WalletNotFound { .. } => StatusCode::NOT_FOUND,
        SettldError::InsufficientFunds { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        SettldError::EscalationRequired => StatusCode::CONFLICT,
        SettldError::EscalationAlreadyResolved { .. } => StatusCode::CONFLICT,
        SettldError::DisputeWindowExpired => StatusCode::CONFLICT,
        SettldError::GateInvalidState { .. } => StatusCode::CONFLICT,
        SettldError::SessionEventAppendConflict { .. } => StatusCode::CONFLICT,
        SettldError::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
        SettldError::Internal { .. } | SettldError::NotImplemented { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let details = error_details(&err);
    let (status, body) = ApiError::with_details(status, err.error_code(), err.to_string(), details);
    (status, Json(body))
}

fn error_details(err: &SettldError) -> Value {
    match err {
        SettldError::ChainHashMismatch { expected, observed } => {
            serde_json::json!({ "expected": expected, "observed": observed })
        }
        SettldError::CursorNotFound { cursor } => serde_json::json!({ "cursor": cursor }),
        SettldError::StaleState { phase } => serde_json::json!({ "phase": phase }),
        SettldError::IdempotencyConflict { prior_fingerprint } => serde_json::json!({ "priorFingerprint": prior_fingerprint }),
        SettldError::GateInvalidState { gate_id, state } => serde_json::json!({ "gateId": gate_id, "state": state }),
        SettldError::SessionEventAppendConflict { stream_id } => serde_json::json!({ "streamId": stream_id }),
        SettldError::GrantSpendExceeded { grant_id, requested, remaining } => {
            serde_json::json!({ "grantId": grant_id, "requested": requested, "remaining": remaining })
        }
        _ => Value::Null,
    }
}

impl IntoResponse for SettldError {
    fn into_response(self) -> Response {
        let (status, body) = settld_error_response(self);
        (status, body).into_response()
    }
}

/// Result alias handlers use; `?` on any `settld-*` crate's `Result` converts into this
/// via `From<SettldError>` since every domain crate's error type already flows through
/// `SettldError` (per `StoreError: From`, `CryptoError` mapped locally where used).
pub type ApiResult<T> = Result<T, SettldError>;
