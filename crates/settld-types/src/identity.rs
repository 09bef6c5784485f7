//! Identity types for settld.
//!
//! All identifiers are strongly typed wrappers around UUIDs so that, e.g., a
//! `GateId` can never be passed where a `GrantId` is expected.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! define_id_type {
    ($name:ident, $prefix:literal, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Create a new random id.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wrap an existing UUID.
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Parse from a string, with or without the `$prefix_` prefix.
            pub fn parse(s: &str) -> Result<Self, uuid::Error> {
                let s = s.strip_prefix(concat!($prefix, "_")).unwrap_or(s);
                Ok(Self(Uuid::parse_str(s)?))
            }

            /// The inner UUID.
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }

            /// Prefixed display form, e.g. `gate_3fa9...`.
            pub fn to_prefixed_string(&self) -> String {
                format!("{}_{}", $prefix, self.0)
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}_{}", $prefix, self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }
    };
}

define_id_type!(AgentId, "agent", "Unique identifier for an agent identity");
define_id_type!(WalletId, "wallet", "Unique identifier for a wallet");
define_id_type!(GrantId, "grant", "Unique identifier for an authority/delegation grant");
define_id_type!(ToolId, "tool", "Unique identifier for a registered tool");
define_id_type!(ManifestId, "manifest", "Unique identifier for a tool manifest");
define_id_type!(AgreementId, "agreement", "Unique identifier for a ToolCallAgreement");
define_id_type!(EvidenceId, "evidence", "Unique identifier for a ToolCallEvidence");
define_id_type!(GateId, "gate", "Unique identifier for an x402 payment gate");
define_id_type!(DecisionId, "decision", "Unique identifier for a settlement DecisionRecord");
define_id_type!(ReceiptId, "receipt", "Unique identifier for a SettlementReceipt");
define_id_type!(EscalationId, "escalation", "Unique identifier for an escalation hold");
define_id_type!(ReversalEventId, "reversal", "Unique identifier for a ReversalEvent");
define_id_type!(EventId, "event", "Unique identifier for a chained event");
define_id_type!(SessionId, "session", "Unique identifier for a session stream");

/// Stable key identity for an Ed25519 signer: hex SHA-256 of its DER SPKI encoding.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyId(pub String);

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl KeyId {
    pub fn new(hex_sha256: String) -> Self {
        Self(hex_sha256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_round_trips_through_prefixed_string() {
        let id = GateId::new();
        let parsed = GateId::parse(&id.to_prefixed_string()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn id_display_carries_prefix() {
        let id = AgreementId::new();
        assert!(id.to_string().starts_with("agreement_"));
    }

    #[test]
    fn distinct_id_types_do_not_collide_in_type_system() {
        // compile-time property: this would not compile if GateId == GrantId
        let uuid = Uuid::new_v4();
        let gate = GateId::from_uuid(uuid);
        let grant = GrantId::from_uuid(uuid);
        assert_eq!(gate.as_uuid(), grant.as_uuid());
    }
}
