use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use settld_auth::AuthContext;
use settld_store::IdempotencyKey;
use settld_types::{EscalationId, EvidenceRefs, SettldError};

use crate::dto::gate::{AuthorizeGateRequest, CreateGateRequest, ResolveEscalationRequest, VerifyGateRequest};
use crate::error::ApiResult;
use crate::extractors::idempotency_key;
use crate::idempotency::{fingerprint, with_idempotency};
use crate::state::AppState;

fn parse_body<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T, SettldError> {
    serde_json::from_slice(body).map_err(|e| SettldError::SchemaInvalid { path: "body".into(), message: e.to_string() })
}

/// `POST /x402/gate/create` (§6): opens a gate in `Created` state. Escrow is
/// locked at `authorize-payment`, not here — see DESIGN.md.
pub async fn create_gate(State(state): State<AppState>, auth: AuthContext, headers: HeaderMap, body: Bytes) -> ApiResult<impl IntoResponse> {
    let idem = idempotency_key(&headers)?;
    let print = fingerprint(&body);
    let req: CreateGateRequest = parse_body(&body)?;
    let key = IdempotencyKey::new(auth.tenant_id.clone(), "POST", "/x402/gate/create", idem);

    let (status, value) = with_idempotency(&state, key, print, move || async move {
        let gate = state
            .gate
            .create(&auth.tenant_id, req.payer, req.payee, req.tool_id, req.amount_cents, req.currency, req.agent_passport)
            .await?;
        Ok((StatusCode::CREATED, serde_json::to_value(&gate).map_err(|e| SettldError::internal(e.to_string()))?))
    })
    .await?;
    Ok((status, Json(value)))
}

/// `POST /x402/gate/authorize-payment` (§6): `Created -> Authorized`, 200
/// on success, 409 `ESCALATION_REQUIRED` when the daily ceiling trips and no
/// valid override token was supplied.
pub async fn authorize_payment(State(state): State<AppState>, auth: AuthContext, headers: HeaderMap, body: Bytes) -> ApiResult<impl IntoResponse> {
    let idem = idempotency_key(&headers)?;
    let print = fingerprint(&body);
    let req: AuthorizeGateRequest = parse_body(&body)?;
    let key = IdempotencyKey::new(auth.tenant_id.clone(), "POST", "/x402/gate/authorize-payment", idem);

    let (status, value) = with_idempotency(&state, key, print, move || async move {
        let gate = state.gate.authorize(&auth.tenant_id, req.gate_id, req.override_token.as_deref()).await?;
        Ok((StatusCode::OK, serde_json::to_value(&gate).map_err(|e| SettldError::internal(e.to_string()))?))
    })
    .await?;
    Ok((status, Json(value)))
}

/// `POST /x402/gate/verify` (§6): `Authorized -> Verified`.
pub async fn verify_gate(State(state): State<AppState>, auth: AuthContext, headers: HeaderMap, body: Bytes) -> ApiResult<impl IntoResponse> {
    let idem = idempotency_key(&headers)?;
    let print = fingerprint(&body);
    let req: VerifyGateRequest = parse_body(&body)?;
    let key = IdempotencyKey::new(auth.tenant_id.clone(), "POST", "/x402/gate/verify", idem);

    let (status, value) = with_idempotency(&state, key, print, move || async move {
        let evidence_refs = EvidenceRefs { request_sha256: req.request_sha256, response_sha256: req.response_sha256 };
        let gate = state.gate.verify(&auth.tenant_id, req.gate_id, req.status, evidence_refs, req.provider_output_signature).await?;
        Ok((StatusCode::OK, serde_json::to_value(&gate).map_err(|e| SettldError::internal(e.to_string()))?))
    })
    .await?;
    Ok((status, Json(value)))
}

/// `POST /x402/gate/escalations/{id}/resolve` (§6, §4.9).
pub async fn resolve_escalation(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(escalation_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let escalation_id = EscalationId::parse(&escalation_id).map_err(|e| SettldError::SchemaInvalid { path: "id".into(), message: e.to_string() })?;
    let idem = idempotency_key(&headers)?;
    let print = fingerprint(&body);
    let req: ResolveEscalationRequest = parse_body(&body)?;
    let path = format!("/x402/gate/escalations/{escalation_id}/resolve");
    let key = IdempotencyKey::new(auth.tenant_id.clone(), "POST", path, idem);

    let (status, value) = with_idempotency(&state, key, print, move || async move {
        let escalation = state.gate.resolve_escalation(&auth.tenant_id, escalation_id, req.approve).await?;
        Ok((StatusCode::OK, serde_json::to_value(&escalation).map_err(|e| SettldError::internal(e.to_string()))?))
    })
    .await?;
    Ok((status, Json(value)))
}
