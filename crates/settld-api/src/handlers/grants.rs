use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use settld_auth::AuthContext;
use settld_grants::compute_grant_hash;
use settld_store::IdempotencyKey;
use settld_types::{ChainBinding, Grant, GrantId, GrantKind, KeyId, SettldError, SpendEnvelope, Validity, SCHEMA_VERSION};

use crate::dto::grant::IssueGrantRequest;
use crate::error::ApiResult;
use crate::extractors::idempotency_key;
use crate::idempotency::{fingerprint, with_idempotency};
use crate::state::AppState;

async fn issue_grant(state: &AppState, auth: &AuthContext, kind: GrantKind, req: IssueGrantRequest) -> Result<Grant, SettldError> {
    let (depth, parent_grant_hash) = match req.parent_grant_id {
        Some(parent_id) => {
            let parent = state
                .store
                .get_grant(&auth.tenant_id, parent_id)
                .await
                .map_err(SettldError::from)?
                .ok_or_else(|| SettldError::NotFound { resource: format!("grant {parent_id}") })?;
            (parent.chain_binding.depth + 1, Some(parent.grant_hash))
        }
        None => (0, None),
    };

    let now = Utc::now();
    let mut grant = Grant {
        schema_version: SCHEMA_VERSION,
        grant_id: GrantId::new(),
        tenant_id: auth.tenant_id.clone(),
        kind,
        principal_ref: req.principal_ref,
        grantee_agent_id: req.grantee_agent_id,
        scope: req.scope,
        spend_envelope: SpendEnvelope { currency: req.currency, max_per_call_cents: req.max_per_call_cents, max_total_cents: req.max_total_cents },
        validity: Validity { iat: now, nbf: now, exp: now + chrono::Duration::seconds(req.validity_seconds) },
        chain_binding: ChainBinding { depth, max_depth: req.max_depth },
        parent_grant_id: req.parent_grant_id,
        parent_grant_hash,
        grant_hash: String::new(),
        signature_base64: String::new(),
        signer_key_id: req.signer_key_id.clone(),
    };
    grant.grant_hash = compute_grant_hash(&grant)?;
    let key_id = KeyId(req.signer_key_id);
    grant.signature_base64 = state.vault.sign(&key_id, &grant.grant_hash).map_err(|e| SettldError::internal(e.to_string()))?;

    state.store.put_grant(grant.clone()).await.map_err(SettldError::from)?;
    Ok(grant)
}

/// `POST /authority-grants` (§6, §4.6).
pub async fn issue_authority_grant(State(state): State<AppState>, auth: AuthContext, headers: HeaderMap, body: Bytes) -> ApiResult<impl IntoResponse> {
    handle_issue(state, auth, headers, body, GrantKind::Authority, "/authority-grants").await
}

/// `POST /delegation-grants` (§6, §4.6).
pub async fn issue_delegation_grant(State(state): State<AppState>, auth: AuthContext, headers: HeaderMap, body: Bytes) -> ApiResult<impl IntoResponse> {
    handle_issue(state, auth, headers, body, GrantKind::Delegation, "/delegation-grants").await
}

async fn handle_issue(state: AppState, auth: AuthContext, headers: HeaderMap, body: Bytes, kind: GrantKind, path: &'static str) -> ApiResult<impl IntoResponse> {
    let idem = idempotency_key(&headers)?;
    let print = fingerprint(&body);
    let req: IssueGrantRequest = serde_json::from_slice(&body).map_err(|e| SettldError::SchemaInvalid { path: "body".into(), message: e.to_string() })?;
    let key = IdempotencyKey::new(auth.tenant_id.clone(), "POST", path, idem);

    let (status, value) = with_idempotency(&state, key, print, move || async move {
        let grant = issue_grant(&state, &auth, kind, req).await?;
        Ok((StatusCode::CREATED, serde_json::to_value(&grant).map_err(|e| SettldError::internal(e.to_string()))?))
    })
    .await?;
    Ok((status, Json(value)))
}
