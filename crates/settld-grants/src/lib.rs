//! settld-grants — authority and delegation grant validation (§2 item 7, §4.6).
//!
//! Grounded on the teacher's `openibank-types::permit` shape (`SpendPermit`,
//! `PermitScope`/`RecipientPolicy`, `PermitDelegation`'s depth/percent limits);
//! this crate validates against the already hash-pinned, signed `Grant` type
//! from `settld-types` rather than reintroducing the teacher's own permit
//! struct, since that type already carries the envelope/validity/chain-binding
//! shape the spec calls for.

use chrono::{DateTime, Utc};
use serde::Serialize;
use settld_store::Store;
use settld_types::{AgentId, ChainBinding, Cents, Currency, Grant, GrantId, GrantKind, Result, SettldError, SpendEnvelope, Validity};
use std::sync::Arc;

/// Everything the spec's `validate(grant, now, intent)` needs to know about
/// the call being authorized.
#[derive(Debug, Clone)]
pub struct GrantIntent {
    pub grantee_agent_id: AgentId,
    pub capability: String,
    pub currency: Currency,
    pub amount_cents: Cents,
}

/// Projection hashed into `grantHash` — every field of [`Grant`] except the
/// hash and signature themselves.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GrantHashProjection<'a> {
    schema_version: u32,
    grant_id: GrantId,
    tenant_id: &'a str,
    kind: GrantKind,
    principal_ref: &'a str,
    grantee_agent_id: AgentId,
    scope: &'a [String],
    spend_envelope: &'a SpendEnvelope,
    validity: &'a Validity,
    chain_binding: ChainBinding,
    parent_grant_id: Option<GrantId>,
    parent_grant_hash: Option<&'a str>,
}

fn projection(grant: &Grant) -> GrantHashProjection<'_> {
    GrantHashProjection {
        schema_version: grant.schema_version,
        grant_id: grant.grant_id,
        tenant_id: &grant.tenant_id,
        kind: grant.kind,
        principal_ref: &grant.principal_ref,
        grantee_agent_id: grant.grantee_agent_id,
        scope: &grant.scope,
        spend_envelope: &grant.spend_envelope,
        validity: &grant.validity,
        chain_binding: grant.chain_binding,
        parent_grant_id: grant.parent_grant_id,
        parent_grant_hash: grant.parent_grant_hash.as_deref(),
    }
}

/// Recompute a grant's `grantHash` from its own fields — used both by
/// `validate()` and by whoever issues a new grant.
pub fn compute_grant_hash(grant: &Grant) -> Result<String> {
    settld_crypto::hash_canonical(&projection(grant)).map_err(|e| SettldError::internal(e.to_string()))
}

/// Validates grants against the store's revocation index and running spend
/// totals (§4.6). Holds no state of its own.
pub struct GrantValidator {
    store: Arc<dyn Store>,
}

impl GrantValidator {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// `validate(grant, now, intent) → {ok, reason}` per §4.6, expressed as a
    /// `Result` so every failure carries one of the stable `GRANT_*` error
    /// codes rather than a free-text reason string.
    pub async fn validate(&self, grant: &Grant, now: DateTime<Utc>, intent: &GrantIntent, grantor_public_key_pem: &str) -> Result<()> {
        let recomputed = compute_grant_hash(grant)?;
        if recomputed != grant.grant_hash {
            return Err(SettldError::GrantHashMismatch { grant_id: grant.grant_id.to_string() });
        }

        let sig_ok = settld_crypto::verify_hash_hex(&grant.grant_hash, &grant.signature_base64, grantor_public_key_pem)
            .map_err(|e| SettldError::internal(e.to_string()))?;
        if !sig_ok {
            return Err(SettldError::GrantSignatureInvalid { grant_id: grant.grant_id.to_string() });
        }

        if now < grant.validity.nbf {
            return Err(SettldError::GrantNotYetValid { grant_id: grant.grant_id.to_string(), nbf: grant.validity.nbf.to_rfc3339() });
        }
        if now >= grant.validity.exp {
            return Err(SettldError::GrantExpired { grant_id: grant.grant_id.to_string(), expired_at: grant.validity.exp.to_rfc3339() });
        }

        if !grant.chain_binding.within_depth() {
            return Err(SettldError::GrantChainDepthExceeded {
                grant_id: grant.grant_id.to_string(),
                depth: grant.chain_binding.depth,
                max_depth: grant.chain_binding.max_depth,
            });
        }

        if grant.grantee_agent_id != intent.grantee_agent_id {
            return Err(SettldError::Unauthorized {
                reason: format!("grant {} is not issued to agent {}", grant.grant_id, intent.grantee_agent_id),
            });
        }

        if !grant.scope.iter().any(|s| s == &intent.capability || s == "*") {
            return Err(SettldError::GrantCapabilityNotCovered {
                grant_id: grant.grant_id.to_string(),
                capability: intent.capability.clone(),
            });
        }

        if self.store.is_grant_revoked(&grant.tenant_id, grant.grant_id).await.map_err(SettldError::from)? {
            return Err(SettldError::GrantRevoked { grant_id: grant.grant_id.to_string() });
        }

        let already_spent = self.store.grant_spent_cents(&grant.tenant_id, grant.grant_id).await.map_err(SettldError::from)?;
        if !grant.spend_envelope.covers(intent.currency, intent.amount_cents, already_spent) {
            let remaining = (grant.spend_envelope.max_total_cents - already_spent).max(0);
            return Err(SettldError::GrantSpendExceeded {
                grant_id: grant.grant_id.to_string(),
                requested: intent.amount_cents,
                remaining,
            });
        }

        Ok(())
    }

    /// Record cents debited against a grant's `maxTotal` envelope after a
    /// successful settlement that consumed it.
    pub async fn record_spend(&self, grant: &Grant, amount_cents: Cents) -> Result<()> {
        self.store.record_grant_spend(&grant.tenant_id, grant.grant_id, amount_cents).await.map_err(SettldError::from)
    }

    pub async fn revoke(&self, tenant_id: &str, grant_id: GrantId) -> Result<()> {
        self.store.revoke_grant(tenant_id, grant_id).await.map_err(SettldError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use settld_crypto::vault::{KeyPurpose, KeyVault};
    use settld_store::memory::InMemoryStore;
    use settld_types::{AgentId, TenantId};

    fn make_grant(vault: &KeyVault, key_id: &settld_types::KeyId, grantee: AgentId, now: DateTime<Utc>) -> Grant {
        let mut grant = Grant {
            schema_version: 1,
            grant_id: GrantId::new(),
            tenant_id: TenantId::from("tenant-a"),
            kind: GrantKind::Authority,
            principal_ref: "owner-1".into(),
            grantee_agent_id: grantee,
            scope: vec!["tools.call".into()],
            spend_envelope: SpendEnvelope { currency: Currency::Usd, max_per_call_cents: 1000, max_total_cents: 5000 },
            validity: Validity { iat: now, nbf: now, exp: now + chrono::Duration::hours(1) },
            chain_binding: ChainBinding { depth: 0, max_depth: 3 },
            parent_grant_id: None,
            parent_grant_hash: None,
            grant_hash: String::new(),
            signature_base64: String::new(),
            signer_key_id: key_id.to_string(),
        };
        grant.grant_hash = compute_grant_hash(&grant).unwrap();
        grant.signature_base64 = vault.sign(key_id, &grant.grant_hash).unwrap();
        grant
    }

    #[tokio::test]
    async fn valid_grant_covering_intent_passes() {
        let vault = KeyVault::new();
        let (key_id, pem) = vault.generate_key(KeyPurpose::GrantSigning).unwrap();
        let grantee = AgentId::new();
        let now = Utc::now();
        let grant = make_grant(&vault, &key_id, grantee, now);
        let validator = GrantValidator::new(Arc::new(InMemoryStore::new()));

        let intent = GrantIntent { grantee_agent_id: grantee, capability: "tools.call".into(), currency: Currency::Usd, amount_cents: 500 };
        validator.validate(&grant, now, &intent, &pem).await.unwrap();
    }

    #[tokio::test]
    async fn tampered_hash_is_rejected() {
        let vault = KeyVault::new();
        let (key_id, pem) = vault.generate_key(KeyPurpose::GrantSigning).unwrap();
        let grantee = AgentId::new();
        let now = Utc::now();
        let mut grant = make_grant(&vault, &key_id, grantee, now);
        grant.scope.push("tools.extra".into());

        let validator = GrantValidator::new(Arc::new(InMemoryStore::new()));
        let intent = GrantIntent { grantee_agent_id: grantee, capability: "tools.call".into(), currency: Currency::Usd, amount_cents: 500 };
        let result = validator.validate(&grant, now, &intent, &pem).await;
        assert!(matches!(result, Err(SettldError::GrantHashMismatch { .. })));
    }

    #[tokio::test]
    async fn expired_grant_is_rejected() {
        let vault = KeyVault::new();
        let (key_id, pem) = vault.generate_key(KeyPurpose::GrantSigning).unwrap();
        let grantee = AgentId::new();
        let now = Utc::now();
        let grant = make_grant(&vault, &key_id, grantee, now);

        let validator = GrantValidator::new(Arc::new(InMemoryStore::new()));
        let intent = GrantIntent { grantee_agent_id: grantee, capability: "tools.call".into(), currency: Currency::Usd, amount_cents: 500 };
        let later = now + chrono::Duration::hours(2);
        let result = validator.validate(&grant, later, &intent, &pem).await;
        assert!(matches!(result, Err(SettldError::GrantExpired { .. })));
    }

    #[tokio::test]
    async fn spend_beyond_max_total_is_rejected() {
        let vault = KeyVault::new();
        let (key_id, pem) = vault.generate_key(KeyPurpose::GrantSigning).unwrap();
        let grantee = AgentId::new();
        let now = Utc::now();
        let grant = make_grant(&vault, &key_id, grantee, now);

        let validator = GrantValidator::new(Arc::new(InMemoryStore::new()));
        let intent = GrantIntent { grantee_agent_id: grantee, capability: "tools.call".into(), currency: Currency::Usd, amount_cents: 900 };
        validator.validate(&grant, now, &intent, &pem).await.unwrap();
        validator.record_spend(&grant, 900).await.unwrap();
        validator.record_spend(&grant, 4000).await.unwrap();

        let result = validator.validate(&grant, now, &intent, &pem).await;
        assert!(matches!(result, Err(SettldError::GrantSpendExceeded { .. })));
    }

    #[tokio::test]
    async fn revoked_grant_is_rejected_on_next_validate() {
        let vault = KeyVault::new();
        let (key_id, pem) = vault.generate_key(KeyPurpose::GrantSigning).unwrap();
        let grantee = AgentId::new();
        let now = Utc::now();
        let grant = make_grant(&vault, &key_id, grantee, now);

        let validator = GrantValidator::new(Arc::new(InMemoryStore::new()));
        let intent = GrantIntent { grantee_agent_id: grantee, capability: "tools.call".into(), currency: Currency::Usd, amount_cents: 500 };
        validator.validate(&grant, now, &intent, &pem).await.unwrap();

        validator.revoke(&grant.tenant_id, grant.grant_id).await.unwrap();
        let result = validator.validate(&grant, now, &intent, &pem).await;
        assert!(matches!(result, Err(SettldError::GrantRevoked { .. })));
    }

    #[tokio::test]
    async fn chain_depth_at_max_is_rejected() {
        let vault = KeyVault::new();
        let (key_id, pem) = vault.generate_key(KeyPurpose::GrantSigning).unwrap();
        let grantee = AgentId::new();
        let now = Utc::now();
        let mut grant = make_grant(&vault, &key_id, grantee, now);
        grant.chain_binding = ChainBinding { depth: 3, max_depth: 3 };
        grant.grant_hash = compute_grant_hash(&grant).unwrap();
        grant.signature_base64 = vault.sign(&key_id, &grant.grant_hash).unwrap();

        let validator = GrantValidator::new(Arc::new(InMemoryStore::new()));
        let intent = GrantIntent { grantee_agent_id: grantee, capability: "tools.call".into(), currency: Currency::Usd, amount_cents: 500 };
        let result = validator.validate(&grant, now, &intent, &pem).await;
        assert!(matches!(result, Err(SettldError::GrantChainDepthExceeded { .. })));
    }
}
