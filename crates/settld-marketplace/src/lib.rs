//! Construction and self-consistency verification for the marketplace
//! artifact chain: tool manifest, quote/offer/acceptance, and the
//! agreement/evidence pair a settlement decision is built from (§3, §4.7).
//!
//! Each `build_*` function fills the artifact's hash field by canonicalizing
//! every other field and hex-SHA-256'ing the result, then signs that hash
//! hex with the named vault key — the same pattern `settld-eventlog` and
//! `settld-grants` use for their own hash-pinned envelopes. Cross-artifact
//! binding checks (does this evidence's `agreementHash` match this
//! agreement, is the manifest pinned by this agreement the one on file) are
//! the settlement kernel's job, not this crate's — `settld-marketplace` only
//! guarantees an artifact is internally consistent with its own hash and
//! signature.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use settld_crypto::vault::KeyVault;
use settld_types::amount::{Cents, Currency};
use settld_types::artifact::{
    Acceptance, AcceptanceCriteria, Offer, Quote, ToolCallAgreement, ToolCallEvidence,
};
use settld_types::error::{Result, SettldError};
use settld_types::identity::{AgentId, AgreementId, EvidenceId, GrantId, KeyId, ManifestId, ToolId};
use settld_types::manifest::{PricingModel, ToolDescriptor, ToolManifest, Transport};
use settld_types::SCHEMA_VERSION;

fn canonical_hash_excluding<T: Serialize>(value: &T, exclude: &[&str]) -> Result<String> {
    let mut v = serde_json::to_value(value)
        .map_err(|e| SettldError::internal(format!("serializing artifact for hashing: {e}")))?;
    if let Value::Object(map) = &mut v {
        for key in exclude {
            map.remove(*key);
        }
    }
    let bytes = settld_crypto::canonicalize_value(&v)
        .map_err(|e| SettldError::internal(format!("canonicalizing artifact: {e}")))?;
    Ok(settld_crypto::sha256_hex(&bytes))
}

fn sign(vault: &KeyVault, key_id: &KeyId, hash_hex: &str) -> Result<String> {
    vault
        .sign(key_id, hash_hex)
        .map_err(|e| SettldError::internal(format!("signing artifact: {e}")))
}

fn verify(hash_hex: &str, signature_base64: &str, signer_public_key_pem: &str) -> Result<bool> {
    settld_crypto::verify_hash_hex(hash_hex, signature_base64, signer_public_key_pem)
        .map_err(|e| SettldError::internal(format!("verifying artifact signature: {e}")))
}

const MANIFEST_EXCLUDE: &[&str] = &["manifestHash", "signatureBase64", "signerKeyId"];
const QUOTE_EXCLUDE: &[&str] = &["quoteHash", "signatureBase64", "signerKeyId"];
const OFFER_EXCLUDE: &[&str] = &["offerHash", "signatureBase64", "signerKeyId"];
const ACCEPTANCE_EXCLUDE: &[&str] = &["acceptanceHash", "signatureBase64", "signerKeyId"];
const AGREEMENT_EXCLUDE: &[&str] = &["agreementHash", "signatureBase64", "signerKeyId"];
const EVIDENCE_EXCLUDE: &[&str] = &["evidenceHash", "signatureBase64", "signerKeyId"];

#[allow(clippy::too_many_arguments)]
pub fn build_tool_manifest(
    tenant_id: impl Into<String>,
    tool_id: ToolId,
    descriptor: ToolDescriptor,
    transport: Transport,
    category: Option<String>,
    pricing_model: Option<PricingModel>,
    supported_currencies: Vec<Currency>,
    tags: Vec<String>,
    signer_key_id: &KeyId,
    vault: &KeyVault,
) -> Result<ToolManifest> {
    let mut manifest = ToolManifest {
        schema_version: SCHEMA_VERSION,
        manifest_id: ManifestId::new(),
        tool_id,
        tenant_id: tenant_id.into(),
        descriptor,
        transport,
        category,
        pricing_model,
        supported_currencies,
        tags,
        manifest_hash: String::new(),
        signature_base64: String::new(),
        signer_key_id: signer_key_id.to_string(),
    };
    manifest.manifest_hash = canonical_hash_excluding(&manifest, MANIFEST_EXCLUDE)?;
    manifest.signature_base64 = sign(vault, signer_key_id, &manifest.manifest_hash)?;
    Ok(manifest)
}

/// Recompute a manifest's hash and verify its signature. Returns `Ok(())`
/// only when both check out.
pub fn verify_manifest(manifest: &ToolManifest, signer_public_key_pem: &str) -> Result<()> {
    let recomputed = canonical_hash_excluding(manifest, MANIFEST_EXCLUDE)?;
    if recomputed != manifest.manifest_hash {
        return Err(SettldError::SchemaInvalid {
            path: "manifestHash".into(),
            message: "does not recompute".into(),
        });
    }
    if !verify(&manifest.manifest_hash, &manifest.signature_base64, signer_public_key_pem)? {
        return Err(SettldError::Unauthorized { reason: "manifest signature invalid".into() });
    }
    Ok(())
}

pub fn build_quote(
    manifest: &ToolManifest,
    amount_cents: Cents,
    currency: Currency,
    valid_until: DateTime<Utc>,
    signer_key_id: &KeyId,
    vault: &KeyVault,
) -> Result<Quote> {
    let mut quote = Quote {
        schema_version: SCHEMA_VERSION,
        manifest_id: manifest.manifest_id,
        manifest_hash: manifest.manifest_hash.clone(),
        amount_cents,
        currency,
        valid_until,
        quote_hash: String::new(),
        signature_base64: String::new(),
        signer_key_id: signer_key_id.to_string(),
    };
    quote.quote_hash = canonical_hash_excluding(&quote, QUOTE_EXCLUDE)?;
    quote.signature_base64 = sign(vault, signer_key_id, &quote.quote_hash)?;
    Ok(quote)
}

pub fn build_offer(
    quote: &Quote,
    payer: AgentId,
    amount_cents: Cents,
    signer_key_id: &KeyId,
    vault: &KeyVault,
) -> Result<Offer> {
    let mut offer = Offer {
        schema_version: SCHEMA_VERSION,
        quote_hash: quote.quote_hash.clone(),
        payer,
        amount_cents,
        offer_hash: String::new(),
        signature_base64: String::new(),
        signer_key_id: signer_key_id.to_string(),
    };
    offer.offer_hash = canonical_hash_excluding(&offer, OFFER_EXCLUDE)?;
    offer.signature_base64 = sign(vault, signer_key_id, &offer.offer_hash)?;
    Ok(offer)
}

pub fn build_acceptance(
    offer: &Offer,
    payee: AgentId,
    signer_key_id: &KeyId,
    vault: &KeyVault,
) -> Result<Acceptance> {
    let mut acceptance = Acceptance {
        schema_version: SCHEMA_VERSION,
        offer_hash: offer.offer_hash.clone(),
        payee,
        acceptance_hash: String::new(),
        signature_base64: String::new(),
        signer_key_id: signer_key_id.to_string(),
    };
    acceptance.acceptance_hash = canonical_hash_excluding(&acceptance, ACCEPTANCE_EXCLUDE)?;
    acceptance.signature_base64 = sign(vault, signer_key_id, &acceptance.acceptance_hash)?;
    Ok(acceptance)
}

#[allow(clippy::too_many_arguments)]
pub fn build_agreement(
    tenant_id: impl Into<String>,
    tool_id: ToolId,
    tool_manifest_hash: String,
    authority_grant_id: GrantId,
    authority_grant_hash: String,
    payer: AgentId,
    payee: AgentId,
    amount_cents: Cents,
    currency: Currency,
    call_id: impl Into<String>,
    input_hash: String,
    acceptance_criteria: AcceptanceCriteria,
    signer_key_id: &KeyId,
    vault: &KeyVault,
) -> Result<ToolCallAgreement> {
    let mut agreement = ToolCallAgreement {
        schema_version: SCHEMA_VERSION,
        artifact_id: AgreementId::new(),
        tenant_id: tenant_id.into(),
        tool_id,
        tool_manifest_hash,
        authority_grant_id,
        authority_grant_hash,
        payer,
        payee,
        amount_cents,
        currency,
        call_id: call_id.into(),
        input_hash,
        acceptance_criteria,
        agreement_hash: String::new(),
        signature_base64: String::new(),
        signer_key_id: signer_key_id.to_string(),
    };
    agreement.agreement_hash = canonical_hash_excluding(&agreement, AGREEMENT_EXCLUDE)?;
    agreement.signature_base64 = sign(vault, signer_key_id, &agreement.agreement_hash)?;
    Ok(agreement)
}

pub fn verify_agreement(agreement: &ToolCallAgreement, signer_public_key_pem: &str) -> Result<()> {
    let recomputed = canonical_hash_excluding(agreement, AGREEMENT_EXCLUDE)?;
    if recomputed != agreement.agreement_hash {
        return Err(SettldError::SchemaInvalid {
            path: "agreementHash".into(),
            message: "does not recompute".into(),
        });
    }
    if !verify(&agreement.agreement_hash, &agreement.signature_base64, signer_public_key_pem)? {
        return Err(SettldError::Unauthorized { reason: "agreement signature invalid".into() });
    }
    Ok(())
}

pub fn build_evidence(
    agreement: &ToolCallAgreement,
    output: Value,
    output_hash: String,
    started_at: DateTime<Utc>,
    completed_at: DateTime<Utc>,
    signer_key_id: &KeyId,
    vault: &KeyVault,
) -> Result<ToolCallEvidence> {
    let mut evidence = ToolCallEvidence {
        schema_version: SCHEMA_VERSION,
        artifact_id: EvidenceId::new(),
        agreement_id: agreement.artifact_id,
        agreement_hash: agreement.agreement_hash.clone(),
        call_id: agreement.call_id.clone(),
        input_hash: agreement.input_hash.clone(),
        output,
        output_hash,
        started_at,
        completed_at,
        evidence_hash: String::new(),
        signature_base64: String::new(),
        signer_key_id: signer_key_id.to_string(),
    };
    evidence.evidence_hash = canonical_hash_excluding(&evidence, EVIDENCE_EXCLUDE)?;
    evidence.signature_base64 = sign(vault, signer_key_id, &evidence.evidence_hash)?;
    Ok(evidence)
}

pub fn verify_evidence(evidence: &ToolCallEvidence, signer_public_key_pem: &str) -> Result<()> {
    let recomputed = canonical_hash_excluding(evidence, EVIDENCE_EXCLUDE)?;
    if recomputed != evidence.evidence_hash {
        return Err(SettldError::SchemaInvalid {
            path: "evidenceHash".into(),
            message: "does not recompute".into(),
        });
    }
    if !verify(&evidence.evidence_hash, &evidence.signature_base64, signer_public_key_pem)? {
        return Err(SettldError::Unauthorized { reason: "evidence signature invalid".into() });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use settld_crypto::vault::KeyPurpose;
    use settld_types::amount::Currency;

    fn manifest_fixture(vault: &KeyVault, key_id: &KeyId) -> ToolManifest {
        build_tool_manifest(
            "tenant-1",
            ToolId::new(),
            ToolDescriptor {
                name: "weather.lookup".into(),
                description: "look up current weather".into(),
                input_schema_ref: "schema://weather/input".into(),
                output_schema_ref: "schema://weather/output".into(),
            },
            Transport::Http,
            Some("data".into()),
            Some(PricingModel { base_cents: 50, currency: Currency::Usd }),
            vec![Currency::Usd],
            vec!["weather".into()],
            key_id,
            vault,
        )
        .unwrap()
    }

    #[test]
    fn manifest_round_trips_through_verify() {
        let vault = KeyVault::new();
        let (key_id, pem) = vault.generate_key(KeyPurpose::General).unwrap();
        let manifest = manifest_fixture(&vault, &key_id);
        verify_manifest(&manifest, &pem).unwrap();
    }

    #[test]
    fn tampered_manifest_field_fails_verification() {
        let vault = KeyVault::new();
        let (key_id, pem) = vault.generate_key(KeyPurpose::General).unwrap();
        let mut manifest = manifest_fixture(&vault, &key_id);
        manifest.tags.push("extra".into());
        assert!(verify_manifest(&manifest, &pem).is_err());
    }

    #[test]
    fn quote_offer_acceptance_chain_hashes_link_by_reference() {
        let vault = KeyVault::new();
        let (key_id, _pem) = vault.generate_key(KeyPurpose::General).unwrap();
        let manifest = manifest_fixture(&vault, &key_id);

        let quote = build_quote(
            &manifest,
            50,
            Currency::Usd,
            Utc::now() + chrono::Duration::minutes(10),
            &key_id,
            &vault,
        )
        .unwrap();
        let offer = build_offer(&quote, AgentId::new(), 50, &key_id, &vault).unwrap();
        assert_eq!(offer.quote_hash, quote.quote_hash);

        let acceptance = build_acceptance(&offer, AgentId::new(), &key_id, &vault).unwrap();
        assert_eq!(acceptance.offer_hash, offer.offer_hash);
    }

    #[test]
    fn agreement_and_evidence_round_trip_through_verify() {
        let vault = KeyVault::new();
        let (key_id, pem) = vault.generate_key(KeyPurpose::General).unwrap();
        let manifest = manifest_fixture(&vault, &key_id);

        let agreement = build_agreement(
            "tenant-1",
            manifest.tool_id,
            manifest.manifest_hash.clone(),
            GrantId::new(),
            "grant-hash".into(),
            AgentId::new(),
            AgentId::new(),
            50,
            Currency::Usd,
            "call-1",
            "input-hash".into(),
            AcceptanceCriteria {
                max_latency_ms: 2000,
                require_output: true,
                max_output_bytes: 4096,
                policy_fingerprint: "standard".into(),
            },
            &key_id,
            &vault,
        )
        .unwrap();
        verify_agreement(&agreement, &pem).unwrap();

        let started = Utc::now();
        let completed = started + chrono::Duration::milliseconds(500);
        let evidence = build_evidence(
            &agreement,
            serde_json::json!({"temp_f": 72}),
            "output-hash".into(),
            started,
            completed,
            &key_id,
            &vault,
        )
        .unwrap();
        verify_evidence(&evidence, &pem).unwrap();
        assert_eq!(evidence.agreement_hash, agreement.agreement_hash);
        assert_eq!(evidence.input_hash, agreement.input_hash);
    }

    #[test]
    fn tampered_evidence_output_hash_fails_verification() {
        let vault = KeyVault::new();
        let (key_id, pem) = vault.generate_key(KeyPurpose::General).unwrap();
        let manifest = manifest_fixture(&vault, &key_id);
        let agreement = build_agreement(
            "tenant-1",
            manifest.tool_id,
            manifest.manifest_hash.clone(),
            GrantId::new(),
            "grant-hash".into(),
            AgentId::new(),
            AgentId::new(),
            50,
            Currency::Usd,
            "call-1",
            "input-hash".into(),
            AcceptanceCriteria {
                max_latency_ms: 2000,
                require_output: true,
                max_output_bytes: 4096,
                policy_fingerprint: "standard".into(),
            },
            &key_id,
            &vault,
        )
        .unwrap();
        let started = Utc::now();
        let mut evidence = build_evidence(
            &agreement,
            serde_json::json!({"temp_f": 72}),
            "output-hash".into(),
            started,
            started,
            &key_id,
            &vault,
        )
        .unwrap();
        evidence.output_hash = "tampered".into();
        assert!(verify_evidence(&evidence, &pem).is_err());
    }
}
