//! Wallet — per (agent, currency) escrow counters.

use crate::amount::{Cents, Currency};
use crate::identity::{AgentId, TenantId};
use serde::{Deserialize, Serialize};

/// Per-agent, per-currency wallet. Invariant (§3): all three counters are
/// non-negative; `escrowLocked` never exceeds `available + escrowLocked` (i.e.
/// locking moves cents from `available` into `escrowLocked`, it never manufactures
/// them). Created on first credit; never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Wallet {
    pub tenant_id: TenantId,
    pub agent_id: AgentId,
    pub currency: Currency,
    pub available_cents: Cents,
    pub escrow_locked_cents: Cents,
    pub total_debited_cents: Cents,
}

impl Wallet {
    pub fn new(tenant_id: TenantId, agent_id: AgentId, currency: Currency) -> Self {
        Self {
            tenant_id,
            agent_id,
            currency,
            available_cents: 0,
            escrow_locked_cents: 0,
            total_debited_cents: 0,
        }
    }

    pub fn key(&self) -> (TenantId, AgentId, Currency) {
        (self.tenant_id.clone(), self.agent_id, self.currency)
    }

    /// Total funds under this wallet's control, available plus locked.
    pub fn total_cents(&self) -> Cents {
        self.available_cents + self.escrow_locked_cents
    }

    pub fn is_consistent(&self) -> bool {
        self.available_cents >= 0 && self.escrow_locked_cents >= 0 && self.total_debited_cents >= 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_wallet_has_zeroed_counters() {
        let w = Wallet::new("tenant-a".into(), AgentId::new(), Currency::Usd);
        assert_eq!(w.total_cents(), 0);
        assert!(w.is_consistent());
    }
}
