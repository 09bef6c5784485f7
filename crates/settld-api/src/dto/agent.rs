use serde::Deserialize;

/// `POST /agents/register` (§6). The server mints the signing keypair for
/// the new identity itself rather than accept a caller-supplied
/// `publicKeyPem` — see DESIGN.md "grant/manifest/agreement signer custody".
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterAgentRequest {
    pub owner: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

/// `POST /agents/{id}/wallet/credit` (§6).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditWalletRequest {
    pub currency: settld_types::Currency,
    pub amount_cents: settld_types::Cents,
}
