use serde::Deserialize;
use settld_types::{AcceptanceCriteria, Cents, Currency, GateId, GrantId};

/// `POST /marketplace/tools/{toolId}/settle` (§6, §4.7): the control plane
/// mints and signs the manifest/agreement/evidence chain in one call (there
/// is no separate artifact-registration route — see DESIGN.md) and then
/// runs the settlement kernel against the named gate.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettleToolCallRequest {
    pub gate_id: GateId,

    pub tool_name: String,
    pub tool_description: String,
    pub input_schema_ref: String,
    pub output_schema_ref: String,

    pub authority_grant_id: GrantId,

    pub call_id: String,
    pub input: serde_json::Value,
    pub output: serde_json::Value,

    pub amount_cents: Cents,
    pub currency: Currency,
    pub acceptance_criteria: AcceptanceCriteria,

    pub request_sha256: String,
    pub response_sha256: String,
    pub quote_sha256: Option<String>,
    pub spend_authorization_sha256: String,

    /// Vault key the provider signs the manifest/agreement/evidence with.
    pub signer_key_id: String,
}

/// `GET /x402/receipts/export` query params (§6, §B.2 merkle batching).
#[derive(Debug, Deserialize)]
pub struct ExportReceiptsQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    100
}
