//! Ed25519 keypairs and SPKI-derived key ids (§4.2).
//!
//! `keyId = hex SHA-256 of DER SPKI`. The teacher's `KeyPair`/`PublicKey` store
//! the raw hex-encoded public key and never produce SPKI bytes; settld adds
//! `spki`/`pkcs8` (see DESIGN.md) to get a standards-shaped public key
//! encoding so `keyId` is derived the way the spec requires rather than from
//! an ad hoc hex string.

use crate::{CryptoError, CryptoResult};
use ed25519_dalek::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use ed25519_dalek::{SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use settld_types::KeyId;

/// An Ed25519 keypair. The signing key never serializes; callers that need to
/// persist it go through [`KeyPair::to_pkcs8_pem`] explicitly (vault storage
/// only — §9 "private keys never leave the encrypted vault").
#[derive(Clone)]
pub struct KeyPair {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
}

impl KeyPair {
    pub fn generate() -> Self {
        let mut csprng = OsRng;
        let signing_key = SigningKey::generate(&mut csprng);
        let verifying_key = signing_key.verifying_key();
        Self { signing_key, verifying_key }
    }

    pub fn from_pkcs8_pem(pem: &str) -> CryptoResult<Self> {
        let signing_key = SigningKey::from_pkcs8_pem(pem)
            .map_err(|e| CryptoError::InvalidKeyFormat(e.to_string()))?;
        let verifying_key = signing_key.verifying_key();
        Ok(Self { signing_key, verifying_key })
    }

    pub fn to_pkcs8_pem(&self) -> CryptoResult<String> {
        self.signing_key
            .to_pkcs8_pem(LineEnding::LF)
            .map(|z| z.to_string())
            .map_err(|e| CryptoError::InvalidKeyFormat(e.to_string()))
    }

    pub(crate) fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }

    pub fn verifying_key(&self) -> &VerifyingKey {
        &self.verifying_key
    }

    /// The public key's SPKI/PEM encoding — what's persisted as
    /// `AgentIdentity.publicKeyPem`.
    pub fn public_key_pem(&self) -> CryptoResult<String> {
        public_key_to_pem(&self.verifying_key)
    }

    /// `keyId` for this keypair's public key: `SHA-256(DER SPKI)`, hex-encoded.
    pub fn key_id(&self) -> CryptoResult<KeyId> {
        key_id_from_verifying_key(&self.verifying_key)
    }
}

/// PEM-encode a verifying key as SPKI.
pub fn public_key_to_pem(key: &VerifyingKey) -> CryptoResult<String> {
    key.to_public_key_pem(LineEnding::LF)
        .map_err(|e| CryptoError::InvalidKeyFormat(e.to_string()))
}

/// Parse an SPKI/PEM-encoded Ed25519 public key.
pub fn public_key_from_pem(pem: &str) -> CryptoResult<VerifyingKey> {
    VerifyingKey::from_public_key_pem(pem).map_err(|e| CryptoError::InvalidKeyFormat(e.to_string()))
}

/// `keyId = hex SHA-256(DER SPKI(pubkey))` (§4.2).
pub fn key_id_from_verifying_key(key: &VerifyingKey) -> CryptoResult<KeyId> {
    let der = key
        .to_public_key_der()
        .map_err(|e| CryptoError::InvalidKeyFormat(e.to_string()))?;
    Ok(KeyId::new(crate::hash::sha256_hex(der.as_bytes())))
}

/// `keyId` derived directly from a PEM-encoded public key, for verification
/// paths that only have the PEM (e.g. an `AgentIdentity` fetched from the store).
pub fn key_id_from_pem(pem: &str) -> CryptoResult<KeyId> {
    let key = public_key_from_pem(pem)?;
    key_id_from_verifying_key(&key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_id_is_deterministic_from_pem() {
        let kp = KeyPair::generate();
        let pem = kp.public_key_pem().unwrap();
        let id_a = key_id_from_pem(&pem).unwrap();
        let id_b = kp.key_id().unwrap();
        assert_eq!(id_a, id_b);
    }

    #[test]
    fn distinct_keypairs_yield_distinct_key_ids() {
        let a = KeyPair::generate();
        let b = KeyPair::generate();
        assert_ne!(a.key_id().unwrap(), b.key_id().unwrap());
    }

    #[test]
    fn signing_key_round_trips_through_pkcs8_pem() {
        let kp = KeyPair::generate();
        let pem = kp.to_pkcs8_pem().unwrap();
        let restored = KeyPair::from_pkcs8_pem(&pem).unwrap();
        assert_eq!(kp.key_id().unwrap(), restored.key_id().unwrap());
    }
}
