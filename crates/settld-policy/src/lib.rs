//! Partial-release policy table and escalation trip checks (§4.7 step 3,
//! §4.8 policy trips).
//!
//! Policy-mode selection is by *contract policy*, not by dispute type: a
//! `ToolCallAgreement`'s `acceptanceCriteria.policyFingerprint` names a row in
//! [`PolicyTable`], resolved the same way at decision time regardless of why
//! the settlement kernel landed on `Decision::Partial`. This keeps the
//! release rate resolvable from hash-pinned inputs alone (see DESIGN.md's
//! open-question decision on this point) rather than depending on mutable
//! dispute classification.

use serde::{Deserialize, Serialize};
use settld_types::amount::Cents;
use settld_types::error::{Result, SettldError};
use std::collections::HashMap;

/// The release rate applied when the settlement kernel decides `Partial` for
/// agreements pinned to `policy_fingerprint`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseBand {
    pub policy_fingerprint: String,
    pub release_rate_pct: u8,
}

/// Named release bands, keyed by `policyFingerprint`. Immutable once an
/// agreement pins a fingerprint — changing a band's percentage after the
/// fact would make settlement non-deterministic for already-signed
/// agreements, so callers should treat entries as append-only in practice.
#[derive(Debug, Clone)]
pub struct PolicyTable {
    bands: HashMap<String, u8>,
}

impl PolicyTable {
    pub fn new() -> Self {
        Self { bands: HashMap::new() }
    }

    /// The table used when no deployment-specific policy has been loaded:
    /// `"standard"` is a full-or-nothing band (unused for partial, since the
    /// kernel never produces `Partial` under a 100% band — a contract that
    /// only ever wants accept/reject should use this fingerprint); `"grace"`
    /// releases 40% to the payee on a partial match, refunding the rest.
    pub fn standard() -> Self {
        let mut table = Self::new();
        table.insert(ReleaseBand { policy_fingerprint: "standard".into(), release_rate_pct: 100 });
        table.insert(ReleaseBand { policy_fingerprint: "grace".into(), release_rate_pct: 40 });
        table
    }

    pub fn insert(&mut self, band: ReleaseBand) {
        self.bands.insert(band.policy_fingerprint, band.release_rate_pct);
    }

    /// The release rate for a partial decision under `policy_fingerprint`.
    /// Fails closed on an unrecognized fingerprint rather than defaulting to
    /// either 0% or 100% — an unknown policy must never silently resolve to
    /// a financial outcome.
    pub fn release_rate_pct(&self, policy_fingerprint: &str) -> Result<u8> {
        self.bands.get(policy_fingerprint).copied().ok_or_else(|| SettldError::InvalidInput {
            message: format!("no release band registered for policy fingerprint {policy_fingerprint}"),
        })
    }
}

impl Default for PolicyTable {
    fn default() -> Self {
        Self::standard()
    }
}

/// Outcome of checking a prospective authorization against an escalation
/// policy (§4.8: "Policy trips produce an Escalation with a deterministic
/// reason code").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyTripResult {
    pub trips: bool,
    pub reason_code: Option<&'static str>,
}

impl PolicyTripResult {
    fn clear() -> Self {
        Self { trips: false, reason_code: None }
    }

    fn trip(reason_code: &'static str) -> Self {
        Self { trips: true, reason_code: Some(reason_code) }
    }
}

/// A per-passport daily authorization ceiling. The gate state machine
/// consults this before running `authorize`; a trip produces an `Escalation`
/// rather than failing the request outright.
#[derive(Debug, Clone, Copy)]
pub struct EscalationPolicy {
    pub max_daily_authorization_cents: Cents,
}

impl EscalationPolicy {
    pub fn new(max_daily_authorization_cents: Cents) -> Self {
        Self { max_daily_authorization_cents }
    }

    /// Whether authorizing `amount_cents` on top of `already_authorized_today_cents`
    /// trips the daily ceiling.
    pub fn check_authorization(
        &self,
        amount_cents: Cents,
        already_authorized_today_cents: Cents,
    ) -> PolicyTripResult {
        let projected = already_authorized_today_cents.saturating_add(amount_cents);
        if projected >= self.max_daily_authorization_cents {
            PolicyTripResult::trip("X402_DAILY_AUTHORIZATION_CEILING_EXCEEDED")
        } else {
            PolicyTripResult::clear()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_table_resolves_known_fingerprints() {
        let table = PolicyTable::standard();
        assert_eq!(table.release_rate_pct("standard").unwrap(), 100);
        assert_eq!(table.release_rate_pct("grace").unwrap(), 40);
    }

    #[test]
    fn unknown_fingerprint_fails_closed() {
        let table = PolicyTable::standard();
        assert!(table.release_rate_pct("unheard-of").is_err());
    }

    #[test]
    fn custom_band_overrides_default() {
        let mut table = PolicyTable::standard();
        table.insert(ReleaseBand { policy_fingerprint: "grace".into(), release_rate_pct: 60 });
        assert_eq!(table.release_rate_pct("grace").unwrap(), 60);
    }

    #[test]
    fn authorization_under_ceiling_does_not_trip() {
        let policy = EscalationPolicy::new(300);
        let result = policy.check_authorization(299, 0);
        assert!(!result.trips);
    }

    #[test]
    fn authorization_reaching_ceiling_trips_with_stable_reason_code() {
        let policy = EscalationPolicy::new(300);
        let result = policy.check_authorization(300, 0);
        assert!(result.trips);
        assert_eq!(result.reason_code, Some("X402_DAILY_AUTHORIZATION_CEILING_EXCEEDED"));
    }

    #[test]
    fn already_spent_today_counts_toward_ceiling() {
        let policy = EscalationPolicy::new(300);
        let result = policy.check_authorization(100, 250);
        assert!(result.trips);
    }
}
