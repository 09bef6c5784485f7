//! Detached Ed25519 signatures over canonical hash hex strings (§4.2).
//!
//! Signing surface per the spec: `sign(hashHex, privPem) -> base64`,
//! `verify(hashHex, base64, pubPem) -> bool`. Every artifact signs the hex
//! string of its own hash, not the raw canonical bytes a second time — this
//! keeps "what got signed" identical to "what's printed in the artifact" and
//! lets a verifier recompute the hash once and reuse it for both checks.

use crate::keys::{public_key_from_pem, KeyPair};
use crate::{CryptoError, CryptoResult};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ed25519_dalek::{Signature as Ed25519Signature, Signer, Verifier};

/// Sign a hex hash string with a keypair, returning the base64 signature.
pub fn sign_hash_hex(keypair: &KeyPair, hash_hex: &str) -> CryptoResult<String> {
    let sig = keypair
        .signing_key()
        .try_sign(hash_hex.as_bytes())
        .map_err(|e| CryptoError::SigningFailed(e.to_string()))?;
    Ok(BASE64.encode(sig.to_bytes()))
}

/// Verify a base64 signature over a hex hash string against a PEM public key.
pub fn verify_hash_hex(hash_hex: &str, signature_base64: &str, public_key_pem: &str) -> CryptoResult<bool> {
    let sig_bytes = BASE64
        .decode(signature_base64)
        .map_err(|e| CryptoError::VerificationFailed(e.to_string()))?;
    let sig_array: [u8; 64] = sig_bytes
        .try_into()
        .map_err(|_| CryptoError::VerificationFailed("signature must be 64 bytes".into()))?;
    let signature = Ed25519Signature::from_bytes(&sig_array);
    let verifying_key = public_key_from_pem(public_key_pem)?;
    Ok(verifying_key.verify(hash_hex.as_bytes(), &signature).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_then_verify_round_trips() {
        let kp = KeyPair::generate();
        let pem = kp.public_key_pem().unwrap();
        let hash_hex = "deadbeef";
        let sig = sign_hash_hex(&kp, hash_hex).unwrap();
        assert!(verify_hash_hex(hash_hex, &sig, &pem).unwrap());
    }

    #[test]
    fn verify_rejects_tampered_hash() {
        let kp = KeyPair::generate();
        let pem = kp.public_key_pem().unwrap();
        let sig = sign_hash_hex(&kp, "deadbeef").unwrap();
        assert!(!verify_hash_hex("cafebabe", &sig, &pem).unwrap());
    }

    #[test]
    fn verify_rejects_wrong_key() {
        let a = KeyPair::generate();
        let b = KeyPair::generate();
        let pem_b = b.public_key_pem().unwrap();
        let sig = sign_hash_hex(&a, "deadbeef").unwrap();
        assert!(!verify_hash_hex("deadbeef", &sig, &pem_b).unwrap());
    }
}
