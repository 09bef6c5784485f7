//! x402 payment gate (§3 Gate, §4.8).

use crate::amount::{Cents, Currency};
use crate::identity::{AgentId, GateId, GrantId, ToolId};
use serde::{Deserialize, Serialize};

/// One-shot state machine states. From `authorized`: may also go to `voided`.
/// From `settled`: may also go to `refund_requested` then `refunded`.
/// Escalation holds are orthogonal (`escalation_pending` pauses only the
/// triggering transition, it is not a state on this enum).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateState {
    Created,
    Authorized,
    Verified,
    Settled,
    Voided,
    RefundRequested,
    Refunded,
    NeedsReconciliation,
}

/// The bundle of references that authorizes an agent to open a gate (§3
/// Glossary "Passport").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Passport {
    pub sponsor: String,
    pub wallet: String,
    pub agent_key: String,
    pub delegation_grant_id: Option<GrantId>,
    pub policy: String,
    pub policy_version: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Green,
    Amber,
    Red,
}

/// Evidence references recorded at `verify` time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvidenceRefs {
    pub request_sha256: String,
    pub response_sha256: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationRecord {
    pub authorized_at: chrono::DateTime<chrono::Utc>,
    pub wallet_authorization_decision_token: String,
    pub reserve_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationRecord {
    pub verified_at: chrono::DateTime<chrono::Utc>,
    pub status: VerificationStatus,
    pub evidence_refs: EvidenceRefs,
    pub provider_output_signature: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementRecord {
    pub settled_at: chrono::DateTime<chrono::Utc>,
    pub receipt_id: String,
    pub decision_id: String,
}

/// One "402" paid interaction (§3 Gate, Glossary). Transitions are serialized
/// by a single-writer lock per `gateId` (§5).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Gate {
    pub schema_version: u32,
    pub gate_id: GateId,
    pub tenant_id: String,
    pub payer: AgentId,
    pub payee: AgentId,
    pub tool_id: ToolId,
    pub amount_cents: Cents,
    pub currency: Currency,
    pub agent_passport: Passport,
    pub state: GateState,
    pub authorization: Option<AuthorizationRecord>,
    pub verification: Option<VerificationRecord>,
    pub settlement: Option<SettlementRecord>,
    /// Head of this gate's reversal-event chain, `"null"` until the first
    /// `ReversalEvent` is appended.
    pub reversal_chain_head: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl Gate {
    pub fn can_authorize(&self) -> bool {
        matches!(self.state, GateState::Created)
    }

    pub fn can_verify(&self) -> bool {
        matches!(self.state, GateState::Authorized)
    }

    pub fn can_settle(&self) -> bool {
        matches!(self.state, GateState::Verified)
    }

    pub fn can_void(&self) -> bool {
        matches!(self.state, GateState::Authorized)
    }

    pub fn can_request_refund(&self) -> bool {
        matches!(self.state, GateState::Settled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate_in(state: GateState) -> Gate {
        Gate {
            schema_version: 1,
            gate_id: GateId::new(),
            tenant_id: "t".into(),
            payer: AgentId::new(),
            payee: AgentId::new(),
            tool_id: ToolId::new(),
            amount_cents: 100,
            currency: Currency::Usd,
            agent_passport: Passport {
                sponsor: "s".into(),
                wallet: "w".into(),
                agent_key: "k".into(),
                delegation_grant_id: None,
                policy: "p".into(),
                policy_version: "v1".into(),
            },
            state,
            authorization: None,
            verification: None,
            settlement: None,
            reversal_chain_head: "null".into(),
            created_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn only_created_gates_may_authorize() {
        assert!(gate_in(GateState::Created).can_authorize());
        assert!(!gate_in(GateState::Authorized).can_authorize());
    }

    #[test]
    fn only_verified_gates_may_settle() {
        assert!(gate_in(GateState::Verified).can_settle());
        assert!(!gate_in(GateState::Authorized).can_settle());
        assert!(!gate_in(GateState::Settled).can_settle());
    }

    #[test]
    fn only_settled_gates_may_request_refund() {
        assert!(gate_in(GateState::Settled).can_request_refund());
        assert!(!gate_in(GateState::Verified).can_request_refund());
    }
}
