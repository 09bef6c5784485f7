use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use settld_auth::AuthContext;
use settld_crypto::vault::KeyPurpose;
use settld_types::{AgentId, AgentIdentity, AgentStatus, SettldError, Wallet, SCHEMA_VERSION};
use settld_store::IdempotencyKey;

use crate::dto::agent::{CreditWalletRequest, RegisterAgentRequest};
use crate::error::ApiResult;
use crate::extractors::idempotency_key;
use crate::idempotency::{fingerprint, with_idempotency};
use crate::state::AppState;

fn parse_body<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T, SettldError> {
    serde_json::from_slice(body).map_err(|e| SettldError::SchemaInvalid { path: "body".into(), message: e.to_string() })
}

/// `POST /agents/register` (§6).
pub async fn register_agent(State(state): State<AppState>, auth: AuthContext, headers: HeaderMap, body: Bytes) -> ApiResult<impl IntoResponse> {
    let idem = idempotency_key(&headers)?;
    let print = fingerprint(&body);
    let req: RegisterAgentRequest = parse_body(&body)?;
    let key = IdempotencyKey::new(auth.tenant_id.clone(), "POST", "/agents/register", idem);

    let (status, value) = with_idempotency(&state, key, print, move || async move {
        let (key_id, public_key_pem) = state.vault.generate_key(KeyPurpose::AgentIdentity).map_err(|e| SettldError::internal(e.to_string()))?;
        let identity = AgentIdentity {
            schema_version: SCHEMA_VERSION,
            agent_id: AgentId::new(),
            tenant_id: auth.tenant_id.clone(),
            owner: req.owner.clone(),
            public_key_pem,
            key_id,
            capabilities: req.capabilities.clone(),
            status: AgentStatus::Active,
            created_at: Utc::now(),
        };
        state.store.put_agent(identity.clone()).await.map_err(SettldError::from)?;
        Ok((StatusCode::CREATED, serde_json::to_value(&identity).map_err(|e| SettldError::internal(e.to_string()))?))
    })
    .await?;
    Ok((status, Json(value)))
}

/// `POST /agents/{id}/wallet/credit` (§6): a direct credit, e.g. an
/// off-platform top-up. Does not go through the gate state machine.
pub async fn credit_wallet(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(agent_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let idem = idempotency_key(&headers)?;
    let print = fingerprint(&body);
    let req: CreditWalletRequest = parse_body(&body)?;
    let agent_id = AgentId::parse(&agent_id).map_err(|e| SettldError::SchemaInvalid { path: "id".into(), message: e.to_string() })?;
    let path = format!("/agents/{agent_id}/wallet/credit");
    let key = IdempotencyKey::new(auth.tenant_id.clone(), "POST", path, idem);

    let (status, value) = with_idempotency(&state, key, print, move || async move {
        if state.store.get_agent(&auth.tenant_id, agent_id).await.map_err(SettldError::from)?.is_none() {
            return Err(SettldError::NotFound { resource: format!("agent {agent_id}") });
        }
        let wallet_ref = settld_ledger::WalletRef::new(auth.tenant_id.clone(), agent_id, req.currency);
        let moves = [settld_ledger::Move::Credit { wallet: wallet_ref, amount_cents: req.amount_cents }];
        let wallets = state.ledger.apply_transition(&auth.tenant_id, &uuid::Uuid::new_v4().to_string(), &moves).await?;
        let wallet: &Wallet = wallets.iter().find(|w| w.currency == req.currency).ok_or_else(|| SettldError::internal("credit produced no wallet"))?;
        Ok((StatusCode::OK, serde_json::to_value(wallet).map_err(|e| SettldError::internal(e.to_string()))?))
    })
    .await?;
    Ok((status, Json(value)))
}
