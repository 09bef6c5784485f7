//! Settlement receipt, escalation, and reversal event (§3).

use crate::amount::{Cents, Currency};
use crate::identity::{AgentId, EscalationId, GateId, ReceiptId, ReversalEventId};
use serde::{Deserialize, Serialize};

/// The money movement a receipt attests to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transfer {
    pub amount_cents: Cents,
    pub currency: Currency,
    pub from: AgentId,
    pub to: AgentId,
}

/// Reference to the prior artifact/decision this receipt settles.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionRef {
    pub decision_id: String,
    pub decision_hash: String,
}

/// Every hash binding a receipt commits to, reproduced independently by
/// `settld-receipts` (§4.10).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptBindings {
    pub request_sha256: String,
    pub response_sha256: String,
    pub quote_sha256: Option<String>,
    pub spend_authorization_sha256: String,
}

/// A reversal action taken against a settled gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReversalAction {
    RequestRefund,
    ResolveRefund,
    VoidAuthorization,
}

/// One entry on a gate's append-only reversal chain (§3 ReversalEvent).
/// `eventHash` chains via `prevEventHash`, mirroring the chained-event-log
/// construction but scoped per gate rather than per stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReversalEvent {
    pub event_id: ReversalEventId,
    pub gate_id: GateId,
    pub receipt_id: ReceiptId,
    pub action: ReversalAction,
    pub occurred_at: chrono::DateTime<chrono::Utc>,
    pub command_signature_base64: String,
    pub command_signer_key_id: String,
    pub command_verified: bool,
    pub provider_decision_artifact: Option<serde_json::Value>,
    pub provider_decision_verified: Option<bool>,
    pub evidence_refs: Vec<String>,
    pub prev_event_hash: String,
    pub event_hash: String,
}

/// The signed, hash-bound artifact emitted on every settle attempt (§3
/// SettlementReceipt, Glossary). `receiptId` is a deterministic function of
/// `decisionHash` + `agreementHash` so replaying a settle attempt with a
/// different idempotency key still yields the same receipt (§8 round-trip law).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementReceipt {
    pub schema_version: u32,
    pub receipt_id: ReceiptId,
    pub decision_ref: DecisionRef,
    pub transfer: Transfer,
    pub bindings: ReceiptBindings,
    pub provider_output_signature: String,
    pub provider_output_signer_key_id: String,
    pub provider_quote_signature: Option<String>,
    pub reversal_events: Vec<ReversalEvent>,
    pub receipt_hash: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationStatus {
    Pending,
    Approved,
    Denied,
}

/// A single-use human-in-the-loop hold that converts a policy trip into an
/// approve/deny decision bound to (gateId, policyVersion, amount) (§4.8,
/// Glossary "Escalation").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Escalation {
    pub escalation_id: EscalationId,
    pub gate_id: GateId,
    pub reason: String,
    pub status: EscalationStatus,
    /// Present only once `status == Approved`; a single-use MAC bound to
    /// `gateId`, `policyVersion`, and `amountCents`.
    pub override_token: Option<String>,
    pub policy_version: String,
    pub amount_cents: Cents,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub resolved_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl Escalation {
    pub fn is_terminal(&self) -> bool {
        !matches!(self.status, EscalationStatus::Pending)
    }
}
