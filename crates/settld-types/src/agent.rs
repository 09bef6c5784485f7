//! Agent identity.

use crate::identity::{AgentId, KeyId, TenantId};
use serde::{Deserialize, Serialize};

/// Lifecycle status of an agent identity (§3 Agent Identity).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Active,
    Suspended,
    Throttled,
    Revoked,
}

impl AgentStatus {
    pub fn can_transact(&self) -> bool {
        matches!(self, Self::Active | Self::Throttled)
    }
}

/// A registered agent identity. `keyId` is derived deterministically from
/// `publicKeyPem` (SHA-256 of its DER SPKI encoding), never supplied by the
/// caller, so two identities can never claim the same key under different ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentIdentity {
    pub schema_version: u32,
    pub agent_id: AgentId,
    pub tenant_id: TenantId,
    pub owner: String,
    pub public_key_pem: String,
    pub key_id: KeyId,
    pub capabilities: Vec<String>,
    pub status: AgentStatus,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl AgentIdentity {
    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throttled_agents_may_still_transact() {
        assert!(AgentStatus::Throttled.can_transact());
        assert!(!AgentStatus::Suspended.can_transact());
        assert!(!AgentStatus::Revoked.can_transact());
    }
}
