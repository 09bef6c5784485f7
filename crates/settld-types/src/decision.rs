//! Settlement decision record (§3 DecisionRecord, §4.7).

use crate::amount::Cents;
use crate::identity::DecisionId;
use serde::{Deserialize, Serialize};

/// Outcome of evaluating a `ToolCallAgreement` against its `ToolCallEvidence`.
/// Tie-break order (§4.7 step 3): rejection dominates partial, partial
/// dominates acceptance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Accepted,
    Rejected,
    Partial,
}

/// The hash-bound inputs a `DecisionRecord` commits to. Recomputing these from
/// the referenced artifacts and comparing must reproduce `decisionHash`
/// exactly — this is what makes the kernel's output independently verifiable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionInputs {
    pub agreement_hash: String,
    pub evidence_hash: String,
    pub grant_hash: String,
    pub manifest_hash: String,
    pub profile_hash_used: String,
    pub policy_fingerprint: String,
}

/// The pure output of the settlement kernel (§4.7). Carries its own
/// `decisionHash` so a verifier can confirm it was produced from exactly these
/// inputs without re-running the kernel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionRecord {
    pub schema_version: u32,
    pub decision_id: DecisionId,
    pub decision_hash: String,
    pub inputs: DecisionInputs,
    pub decision: Decision,
    pub release_rate_pct: u8,
    pub transfer_cents: Cents,
    pub refund_cents: Cents,
    pub reason: String,
    pub decided_at: chrono::DateTime<chrono::Utc>,
    pub signature_base64: String,
    pub signer_key_id: String,
}
