use serde::Deserialize;
use settld_types::{AgentId, Cents, Currency, GateId, Passport, ToolId, VerificationStatus};

/// `POST /x402/gate/create` (§6, §4.8): opens a gate in `Created` state.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateGateRequest {
    pub payer: AgentId,
    pub payee: AgentId,
    pub tool_id: ToolId,
    pub amount_cents: Cents,
    pub currency: Currency,
    pub agent_passport: Passport,
}

/// `POST /x402/gate/authorize-payment` (§6): `Created -> Authorized`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizeGateRequest {
    pub gate_id: GateId,
    pub override_token: Option<String>,
}

/// `POST /x402/gate/verify` (§6): `Authorized -> Verified`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyGateRequest {
    pub gate_id: GateId,
    pub status: VerificationStatus,
    pub request_sha256: String,
    pub response_sha256: String,
    pub provider_output_signature: Option<String>,
}

/// `POST /x402/gate/escalations/{id}/resolve` (§6).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveEscalationRequest {
    pub approve: bool,
}
