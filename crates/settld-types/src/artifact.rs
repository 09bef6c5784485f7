//! Marketplace artifacts: Quote/Offer/Acceptance, ToolCallAgreement, and
//! ToolCallEvidence (§3, §4.7).
//!
//! Each is a canonicalized, hashed, optionally signed artifact referenced by
//! hash from later artifacts — never by mutable pointer (§9 re-architecture
//! guidance: "cyclic artifact references → hash-pinned references").

use crate::amount::{Cents, Currency};
use crate::identity::{AgentId, AgreementId, EvidenceId, GrantId, ManifestId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A capability listing's asking price, published ahead of any agreement.
/// Non-order-matching: a quote is just a signed price assertion, not an order
/// book entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    pub schema_version: u32,
    pub manifest_id: ManifestId,
    pub manifest_hash: String,
    pub amount_cents: Cents,
    pub currency: Currency,
    pub valid_until: chrono::DateTime<chrono::Utc>,
    pub quote_hash: String,
    pub signature_base64: String,
    pub signer_key_id: String,
}

/// A payer's offer against a published quote.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Offer {
    pub schema_version: u32,
    pub quote_hash: String,
    pub payer: AgentId,
    pub amount_cents: Cents,
    pub offer_hash: String,
    pub signature_base64: String,
    pub signer_key_id: String,
}

/// The payee's acceptance of an offer, the last step before a
/// `ToolCallAgreement` is constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Acceptance {
    pub schema_version: u32,
    pub offer_hash: String,
    pub payee: AgentId,
    pub acceptance_hash: String,
    pub signature_base64: String,
    pub signer_key_id: String,
}

/// The acceptance criteria the settlement kernel evaluates evidence against
/// (§4.7 step 2).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptanceCriteria {
    pub max_latency_ms: i64,
    pub require_output: bool,
    pub max_output_bytes: i64,
    /// Names a row in the settlement kernel's policy table (see
    /// `settld-settlement::PolicyTable`) used to resolve the partial-release
    /// band; immutable once the agreement is signed so the band is always
    /// resolvable from hash-pinned inputs alone.
    pub policy_fingerprint: String,
}

/// A signed work order: payer commits `amountCents` against a pinned grant and
/// manifest, conditioned on the payee producing matching evidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallAgreement {
    pub schema_version: u32,
    pub artifact_id: AgreementId,
    pub tenant_id: String,
    pub tool_id: crate::identity::ToolId,
    pub tool_manifest_hash: String,
    pub authority_grant_id: GrantId,
    pub authority_grant_hash: String,
    pub payer: AgentId,
    pub payee: AgentId,
    pub amount_cents: Cents,
    pub currency: Currency,
    pub call_id: String,
    pub input_hash: String,
    pub acceptance_criteria: AcceptanceCriteria,
    pub agreement_hash: String,
    pub signature_base64: String,
    pub signer_key_id: String,
}

/// The payee's signed evidence of having performed the call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallEvidence {
    pub schema_version: u32,
    pub artifact_id: EvidenceId,
    pub agreement_id: AgreementId,
    pub agreement_hash: String,
    pub call_id: String,
    pub input_hash: String,
    pub output: Value,
    pub output_hash: String,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub completed_at: chrono::DateTime<chrono::Utc>,
    pub evidence_hash: String,
    pub signature_base64: String,
    pub signer_key_id: String,
}

impl ToolCallEvidence {
    pub fn elapsed_ms(&self) -> i64 {
        (self.completed_at - self.started_at).num_milliseconds()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evidence_elapsed_ms_is_non_negative_for_well_formed_timestamps() {
        let started = chrono::Utc::now();
        let completed = started + chrono::Duration::milliseconds(1000);
        let ev = ToolCallEvidence {
            schema_version: 1,
            artifact_id: EvidenceId::new(),
            agreement_id: AgreementId::new(),
            agreement_hash: "h".into(),
            call_id: "c".into(),
            input_hash: "i".into(),
            output: Value::Null,
            output_hash: "o".into(),
            started_at: started,
            completed_at: completed,
            evidence_hash: "e".into(),
            signature_base64: "sig".into(),
            signer_key_id: "k".into(),
        };
        assert_eq!(ev.elapsed_ms(), 1000);
    }
}
