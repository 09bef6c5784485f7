//! Chained event envelope (§3 Chained Event, §4.3).
//!
//! The hashing/chaining itself lives in `settld-eventlog` (it needs the canonical
//! encoder from `settld-crypto`); this module only defines the wire shape so that
//! every crate can construct and pass events around without depending on the
//! hashing implementation.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Detached Ed25519 signature over an event's canonical projection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventSignature {
    pub key_id: String,
    pub signature_base64: String,
}

/// A single hash-chained event. `prevChainHash` is the literal string `"null"`
/// for the first event in a stream; otherwise it equals the predecessor's
/// `chainHash`. `payloadHash`/`chainHash` are computed by `settld-eventlog` over
/// the canonical encoding of this struct minus `chainHash` itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainedEvent {
    pub v: u32,
    pub id: String,
    pub stream_id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub at: chrono::DateTime<chrono::Utc>,
    pub actor: String,
    pub payload: Value,
    pub payload_hash: String,
    pub prev_chain_hash: String,
    pub chain_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<EventSignature>,
}

/// The sentinel used as `prevChainHash` for the first event in an empty stream.
pub const GENESIS_PREV_CHAIN_HASH: &str = "null";
