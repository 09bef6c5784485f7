//! Secure key vault with 3-state signer lifecycle (§4.2, §B.2).
//!
//! Grounded on the teacher's `KeyVault`/`KeyMetadata` (active/deactivated,
//! purpose-scoped keys), generalized from that 2-state lifecycle to the
//! 3-state one the spec requires: `active → rotated → revoked`. A key's
//! status is timestamped on every transition so [`KeyVault::status_at`] can
//! answer "what was this signer's status at the moment it produced signature
//! X", which is what lets the verifier distinguish "revoked before signing"
//! (hard error) from "revoked after signing" (warning only).
//!
//! **Security invariant: private keys never leave the vault.** Every signing
//! operation happens inside it by key id.

use crate::keys::KeyPair;
use crate::signature::sign_hash_hex;
use crate::{CryptoError, CryptoResult};
use chrono::{DateTime, Utc};
use settld_types::KeyId;
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignerStatus {
    Active,
    Rotated,
    Revoked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPurpose {
    AgentIdentity,
    GrantSigning,
    ReceiptSigning,
    General,
}

#[derive(Debug, Clone)]
struct StatusChange {
    status: SignerStatus,
    at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct KeyMetadata {
    pub created_at: DateTime<Utc>,
    pub purpose: KeyPurpose,
    pub status: SignerStatus,
}

struct VaultEntry {
    keypair: KeyPair,
    purpose: KeyPurpose,
    created_at: DateTime<Utc>,
    /// Ordered oldest-first; always starts with an `Active` entry at `created_at`.
    history: Vec<StatusChange>,
}

impl VaultEntry {
    fn current_status(&self) -> SignerStatus {
        self.history.last().map(|c| c.status).unwrap_or(SignerStatus::Active)
    }

    fn status_at(&self, at: DateTime<Utc>) -> SignerStatus {
        self.history
            .iter()
            .rev()
            .find(|c| c.at <= at)
            .map(|c| c.status)
            .unwrap_or(SignerStatus::Active)
    }
}

/// In-memory key vault. Production deployments would back this with an HSM or
/// secure enclave; the trait shape (generate/sign/rotate/revoke by key id,
/// never exposing the private key) is what matters for the rest of the system.
pub struct KeyVault {
    keys: RwLock<HashMap<KeyId, VaultEntry>>,
}

impl KeyVault {
    pub fn new() -> Self {
        Self { keys: RwLock::new(HashMap::new()) }
    }

    pub fn generate_key(&self, purpose: KeyPurpose) -> CryptoResult<(KeyId, String)> {
        let keypair = KeyPair::generate();
        self.insert(keypair, purpose)
    }

    pub fn import_key(&self, pem: &str, purpose: KeyPurpose) -> CryptoResult<(KeyId, String)> {
        let keypair = KeyPair::from_pkcs8_pem(pem)?;
        self.insert(keypair, purpose)
    }

    fn insert(&self, keypair: KeyPair, purpose: KeyPurpose) -> CryptoResult<(KeyId, String)> {
        let key_id = keypair.key_id()?;
        let public_key_pem = keypair.public_key_pem()?;
        let now = Utc::now();
        let entry = VaultEntry { keypair, purpose, created_at: now, history: Vec::new() };
        self.keys
            .write()
            .map_err(|e| CryptoError::VaultError(e.to_string()))?
            .insert(key_id.clone(), entry);
        Ok((key_id, public_key_pem))
    }

    pub fn public_key_pem(&self, key_id: &KeyId) -> CryptoResult<String> {
        let keys = self.keys.read().map_err(|e| CryptoError::VaultError(e.to_string()))?;
        let entry = keys.get(key_id).ok_or_else(|| CryptoError::KeyNotFound(key_id.to_string()))?;
        entry.keypair.public_key_pem()
    }

    /// Sign a hash hex string by key id. The key never leaves the vault; the
    /// caller only ever sees the base64 signature. Fails closed if the key is
    /// revoked; signing with a `Rotated` key still succeeds (rotation retires
    /// a key for *new* grants of authority, it doesn't instantly invalidate
    /// in-flight signing — only revocation does that).
    pub fn sign(&self, key_id: &KeyId, hash_hex: &str) -> CryptoResult<String> {
        let keys = self.keys.read().map_err(|e| CryptoError::VaultError(e.to_string()))?;
        let entry = keys.get(key_id).ok_or_else(|| CryptoError::KeyNotFound(key_id.to_string()))?;
        if entry.current_status() == SignerStatus::Revoked {
            return Err(CryptoError::SigningFailed(format!("key {key_id} is revoked")));
        }
        sign_hash_hex(&entry.keypair, hash_hex)
    }

    pub fn current_status(&self, key_id: &KeyId) -> CryptoResult<SignerStatus> {
        let keys = self.keys.read().map_err(|e| CryptoError::VaultError(e.to_string()))?;
        let entry = keys.get(key_id).ok_or_else(|| CryptoError::KeyNotFound(key_id.to_string()))?;
        Ok(entry.current_status())
    }

    /// The signer's status as of `at` — used by the verifier to classify a
    /// revocation as "before signing" (hard error) vs "after signing" (warning).
    pub fn status_at(&self, key_id: &KeyId, at: DateTime<Utc>) -> CryptoResult<SignerStatus> {
        let keys = self.keys.read().map_err(|e| CryptoError::VaultError(e.to_string()))?;
        let entry = keys.get(key_id).ok_or_else(|| CryptoError::KeyNotFound(key_id.to_string()))?;
        Ok(entry.status_at(at))
    }

    pub fn rotate_key(&self, key_id: &KeyId) -> CryptoResult<()> {
        self.transition(key_id, SignerStatus::Rotated)
    }

    pub fn revoke_key(&self, key_id: &KeyId) -> CryptoResult<()> {
        self.transition(key_id, SignerStatus::Revoked)
    }

    fn transition(&self, key_id: &KeyId, status: SignerStatus) -> CryptoResult<()> {
        let mut keys = self.keys.write().map_err(|e| CryptoError::VaultError(e.to_string()))?;
        let entry = keys.get_mut(key_id).ok_or_else(|| CryptoError::KeyNotFound(key_id.to_string()))?;
        if entry.current_status() == SignerStatus::Revoked {
            return Err(CryptoError::VaultError(format!("key {key_id} already revoked")));
        }
        entry.history.push(StatusChange { status, at: Utc::now() });
        Ok(())
    }

    pub fn metadata(&self, key_id: &KeyId) -> CryptoResult<KeyMetadata> {
        let keys = self.keys.read().map_err(|e| CryptoError::VaultError(e.to_string()))?;
        let entry = keys.get(key_id).ok_or_else(|| CryptoError::KeyNotFound(key_id.to_string()))?;
        Ok(KeyMetadata { created_at: entry.created_at, purpose: entry.purpose, status: entry.current_status() })
    }
}

impl Default for KeyVault {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of checking a signer's lifecycle continuity for one signature
/// (§4.2, §4.10). `ok=false` only when the signer was already revoked at the
/// moment it signed; a later revocation downgrades to a warning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignerLifecycleCheck {
    pub ok: bool,
    pub warning: Option<String>,
}

pub fn check_signer_lifecycle(
    status_at_signing: SignerStatus,
    status_now: SignerStatus,
) -> SignerLifecycleCheck {
    if status_at_signing == SignerStatus::Revoked {
        return SignerLifecycleCheck {
            ok: false,
            warning: Some("signer key was already revoked at time of signing".into()),
        };
    }
    if status_now == SignerStatus::Revoked || status_now == SignerStatus::Rotated {
        return SignerLifecycleCheck {
            ok: true,
            warning: Some(format!("signer key is now {status_now:?} (was valid when signed)")),
        };
    }
    SignerLifecycleCheck { ok: true, warning: None }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_then_rotate_then_revoke_transitions_in_order() {
        let vault = KeyVault::new();
        let (key_id, _) = vault.generate_key(KeyPurpose::General).unwrap();
        assert_eq!(vault.current_status(&key_id).unwrap(), SignerStatus::Active);
        vault.rotate_key(&key_id).unwrap();
        assert_eq!(vault.current_status(&key_id).unwrap(), SignerStatus::Rotated);
        vault.revoke_key(&key_id).unwrap();
        assert_eq!(vault.current_status(&key_id).unwrap(), SignerStatus::Revoked);
    }

    #[test]
    fn revoked_key_refuses_to_sign() {
        let vault = KeyVault::new();
        let (key_id, _) = vault.generate_key(KeyPurpose::General).unwrap();
        vault.revoke_key(&key_id).unwrap();
        assert!(vault.sign(&key_id, "deadbeef").is_err());
    }

    #[test]
    fn revocation_after_signing_is_a_warning_not_a_failure() {
        let check = check_signer_lifecycle(SignerStatus::Active, SignerStatus::Revoked);
        assert!(check.ok);
        assert!(check.warning.is_some());
    }

    #[test]
    fn revocation_before_signing_is_a_hard_error() {
        let check = check_signer_lifecycle(SignerStatus::Revoked, SignerStatus::Revoked);
        assert!(!check.ok);
    }

    #[test]
    fn status_at_reconstructs_history() {
        let vault = KeyVault::new();
        let (key_id, _) = vault.generate_key(KeyPurpose::General).unwrap();
        let t0 = Utc::now();
        vault.revoke_key(&key_id).unwrap();
        assert_eq!(vault.status_at(&key_id, t0).unwrap(), SignerStatus::Active);
        assert_eq!(vault.status_at(&key_id, Utc::now()).unwrap(), SignerStatus::Revoked);
    }
}
