//! settld-crypto — canonical encoding and cryptographic primitives.
//!
//! Provides:
//! - RFC 8785-style JSON canonicalization (§4.1), the preimage of every hash
//!   and signature in the system.
//! - Ed25519 keypairs, SPKI-derived `keyId`, detached signatures (§4.2).
//! - SHA-256 hashing plus Merkle batching for receipt export (§B.2).
//! - A key vault with 3-state signer lifecycle (active/rotated/revoked).
//!
//! # Security invariant
//!
//! Private keys never leave [`vault::KeyVault`]; every signing operation is
//! performed inside it by key id.

pub mod canon;
pub mod hash;
pub mod keys;
pub mod signature;
pub mod vault;

pub use canon::*;
pub use hash::*;
pub use keys::*;
pub use signature::*;
pub use vault::*;

use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum CryptoError {
    #[error("key generation failed: {0}")]
    KeyGenerationFailed(String),
    #[error("signing failed: {0}")]
    SigningFailed(String),
    #[error("verification failed: {0}")]
    VerificationFailed(String),
    #[error("invalid key format: {0}")]
    InvalidKeyFormat(String),
    #[error("vault error: {0}")]
    VaultError(String),
    #[error("key not found: {0}")]
    KeyNotFound(String),
    #[error("canonicalization failed: {0}")]
    CanonicalizationFailed(String),
}

pub type CryptoResult<T> = Result<T, CryptoError>;
