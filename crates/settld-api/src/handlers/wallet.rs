use std::str::FromStr;

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use settld_auth::AuthContext;
use settld_types::{AgentId, Currency, SettldError};

use crate::dto::wallet::{WalletAuthorizeRequest, WalletAuthorizeResponse};
use crate::error::ApiResult;
use crate::state::AppState;

/// `POST /x402/wallets/{walletRef}/authorize` (§6): an advisory,
/// non-mutating pre-check — see [`crate::dto::wallet::WalletAuthorizeRequest`].
/// Not wrapped in HTTP idempotency: it never locks or debits anything, so
/// replay has no conflicting side effect to guard against.
pub async fn authorize_wallet(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(wallet_ref): Path<String>,
    Json(req): Json<WalletAuthorizeRequest>,
) -> ApiResult<impl IntoResponse> {
    let (agent_id_str, currency_str) = wallet_ref.split_once(':').ok_or_else(|| SettldError::SchemaInvalid {
        path: "walletRef".into(),
        message: "expected '{agentId}:{currency}'".into(),
    })?;
    let agent_id = AgentId::parse(agent_id_str).map_err(|e| SettldError::SchemaInvalid { path: "walletRef".into(), message: e.to_string() })?;
    let currency = Currency::from_str(currency_str).map_err(|e| SettldError::SchemaInvalid { path: "walletRef".into(), message: e.to_string() })?;

    let wallet = state
        .store
        .get_wallet(&auth.tenant_id, agent_id, currency)
        .await
        .map_err(SettldError::from)?
        .ok_or_else(|| SettldError::WalletNotFound { wallet_id: wallet_ref.clone() })?;

    if wallet.available_cents < req.amount_cents {
        return Err(SettldError::InsufficientFunds { wallet_id: wallet_ref, requested: req.amount_cents, available: wallet.available_cents });
    }

    let key_id = settld_types::KeyId(req.signer_key_id);
    let authorized_at = Utc::now();
    let decision_token = settld_crypto::hash_canonical(&serde_json::json!({
        "walletRef": wallet_ref,
        "amountCents": req.amount_cents,
        "authorizedAt": authorized_at,
    }))
    .map_err(|e| SettldError::internal(e.to_string()))?;
    let signature = state.vault.sign(&key_id, &decision_token).map_err(|e| SettldError::internal(e.to_string()))?;

    Ok(Json(WalletAuthorizeResponse {
        wallet_ref,
        amount_cents: req.amount_cents,
        available_cents: wallet.available_cents,
        authorized_at,
        decision_token: format!("{decision_token}.{signature}"),
    }))
}
