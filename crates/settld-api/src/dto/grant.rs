use serde::Deserialize;
use settld_types::{AgentId, Cents, Currency, GrantId};

/// Shared body for `POST /delegation-grants` and `POST /authority-grants`
/// (§6) — `kind` is implied by the route, not part of the body. The server
/// mints and signs the grant itself (the same custody model as
/// `RegisterAgentRequest`); callers never submit a pre-signed `Grant`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueGrantRequest {
    pub principal_ref: String,
    pub grantee_agent_id: AgentId,
    pub scope: Vec<String>,
    pub max_per_call_cents: Cents,
    pub max_total_cents: Cents,
    pub currency: Currency,
    #[serde(default = "default_validity_seconds")]
    pub validity_seconds: i64,
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,
    pub parent_grant_id: Option<GrantId>,
    /// Vault key the issuing principal signs with. Must already exist.
    pub signer_key_id: String,
}

fn default_validity_seconds() -> i64 {
    24 * 3600
}

fn default_max_depth() -> u32 {
    4
}
