use serde::{Deserialize, Serialize};

/// `POST /x402/wallets/{walletRef}/authorize` (§6): an advisory pre-check
/// that a wallet currently has enough `availableCents` to cover an amount,
/// returning a signed decision token the caller may later present as a
/// `spendAuthorizationSha256` input to settlement. It never locks funds
/// itself — only `GateService::authorize` does that, against its own gate.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletAuthorizeRequest {
    pub amount_cents: settld_types::Cents,
    /// Vault key used to sign the decision token. Must already exist (e.g.
    /// the key minted for the payer agent at registration).
    pub signer_key_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletAuthorizeResponse {
    pub wallet_ref: String,
    pub amount_cents: settld_types::Cents,
    pub available_cents: settld_types::Cents,
    pub authorized_at: chrono::DateTime<chrono::Utc>,
    pub decision_token: String,
}
