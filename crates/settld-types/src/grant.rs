//! Authority and delegation grants (§3, §4.6).
//!
//! Both grant kinds share the same hash-bound envelope shape; `GrantKind`
//! distinguishes an authority grant issued directly by a principal from a
//! delegation grant re-issued by an existing grantee. `settld-grants` owns
//! `validate()`; this module only defines the wire/storage shape.

use crate::amount::{Cents, Currency};
use crate::identity::{AgentId, GrantId, TenantId};
use serde::{Deserialize, Serialize};

/// Which kind of grant this is. An authority grant's `principalRef` is an
/// account/owner reference; a delegation grant's is the delegator's `AgentId`
/// rendered as a string (delegation always re-delegates an existing grant).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantKind {
    Authority,
    Delegation,
}

/// Per-call and aggregate spend ceiling for a grant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpendEnvelope {
    pub currency: Currency,
    pub max_per_call_cents: Cents,
    pub max_total_cents: Cents,
}

impl SpendEnvelope {
    /// Whether this envelope covers a single call of `amount_cents` given
    /// `already_spent_cents` already debited against `maxTotal`.
    pub fn covers(&self, currency: Currency, amount_cents: Cents, already_spent_cents: Cents) -> bool {
        currency == self.currency
            && amount_cents <= self.max_per_call_cents
            && already_spent_cents.saturating_add(amount_cents) <= self.max_total_cents
    }
}

/// Wall-clock validity window.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Validity {
    pub iat: chrono::DateTime<chrono::Utc>,
    pub nbf: chrono::DateTime<chrono::Utc>,
    pub exp: chrono::DateTime<chrono::Utc>,
}

impl Validity {
    pub fn is_valid_at(&self, now: chrono::DateTime<chrono::Utc>) -> bool {
        self.nbf <= now && now < self.exp
    }
}

/// Delegation chain position: `depth` must stay strictly below `maxDepth`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainBinding {
    pub depth: u32,
    pub max_depth: u32,
}

impl ChainBinding {
    pub fn within_depth(&self) -> bool {
        self.depth < self.max_depth
    }
}

/// Revocation state of a grant, flipped by a signed ops event visible to
/// `validate()` on the next call (never mutated in place — grants are
/// hash-pinned and immutable; this field is tracked in the store's grant
/// revocation index, not on the artifact itself. It's included here as the
/// shape returned by a grant lookup that joins the revocation index.)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantRevocationStatus {
    Active,
    Revoked,
}

/// An authority or delegation grant (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Grant {
    pub schema_version: u32,
    pub grant_id: GrantId,
    pub tenant_id: TenantId,
    pub kind: GrantKind,
    /// Authority grant: an owner/principal reference string. Delegation grant:
    /// the delegator's `AgentId` rendered as a string.
    pub principal_ref: String,
    pub grantee_agent_id: AgentId,
    pub scope: Vec<String>,
    pub spend_envelope: SpendEnvelope,
    pub validity: Validity,
    pub chain_binding: ChainBinding,
    /// Hash-pinned parent grant this one delegates from, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_grant_id: Option<GrantId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_grant_hash: Option<String>,
    pub grant_hash: String,
    pub signature_base64: String,
    pub signer_key_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spend_envelope_enforces_per_call_and_aggregate_ceilings() {
        let env = SpendEnvelope {
            currency: Currency::Usd,
            max_per_call_cents: 1000,
            max_total_cents: 5000,
        };
        assert!(env.covers(Currency::Usd, 1000, 0));
        assert!(!env.covers(Currency::Usd, 1001, 0));
        assert!(!env.covers(Currency::Usd, 1000, 4500));
        assert!(!env.covers(Currency::Eur, 500, 0));
    }

    #[test]
    fn chain_binding_requires_strict_depth_inequality() {
        assert!(ChainBinding { depth: 1, max_depth: 2 }.within_depth());
        assert!(!ChainBinding { depth: 2, max_depth: 2 }.within_depth());
    }
}
