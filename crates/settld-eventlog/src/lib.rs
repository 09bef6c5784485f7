//! settld-eventlog — the chained event log (§2 item 3, §4.3).
//!
//! Grounded on the teacher's `openibank-audit::AuditLog` trait and its
//! `compute_hash`/`verify_chain` pair, generalized onto the canonical-encoder
//! construction the spec requires: `chainHash = SHA256(canonical{v,
//! prevChainHash, payloadHash})`, where `payloadHash` hashes the event's own
//! canonical projection (everything but `prevChainHash`/`chainHash`/
//! `signature`). The teacher's `format!`-string hash isn't canonical-encoder
//! based, so only the shape of the trait and its append/verify operations
//! survive the port, not the hashing itself.
//!
//! Ordering guarantee (§5): per `streamId`, appends are serialized via
//! `Store::stream_locks()`; distinct streams are independent. This crate
//! never takes the lock itself — callers (handlers) acquire it around
//! `append` so that read-then-append (checking `expectedPrevChainHash`
//! against the live head) is atomic.

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use settld_crypto::vault::{KeyVault, SignerStatus};
use settld_store::{EventPage, Store, StoreError};
use settld_types::{event::GENESIS_PREV_CHAIN_HASH, ChainedEvent, EventSignature, KeyId, Result, SettldError};
use std::sync::Arc;

/// Whether a stream requires every appended event to carry a valid signature
/// from an `active` signer (§4.3: "if the event is signed, the signer's key
/// must be active for streams whose policy requires it").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigningPolicy {
    NotRequired,
    RequiredActive,
}

/// What gets hashed as `payloadHash`: every field of [`ChainedEvent`] except
/// `prevChainHash`, `chainHash`, and `signature`.
#[derive(Serialize)]
struct PayloadProjection<'a> {
    v: u32,
    id: &'a str,
    #[serde(rename = "streamId")]
    stream_id: &'a str,
    #[serde(rename = "type")]
    event_type: &'a str,
    at: chrono::DateTime<Utc>,
    actor: &'a str,
    payload: &'a Value,
}

#[derive(Serialize)]
struct ChainLinkProjection<'a> {
    v: u32,
    #[serde(rename = "prevChainHash")]
    prev_chain_hash: &'a str,
    #[serde(rename = "payloadHash")]
    payload_hash: &'a str,
}

pub struct EventLog {
    store: Arc<dyn Store>,
}

impl EventLog {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    async fn current_prev_chain_hash(&self, tenant_id: &str, stream_id: &str) -> Result<String> {
        let head = self.store.get_stream_head(tenant_id, stream_id).await.map_err(SettldError::from)?;
        Ok(head.map(|e| e.chain_hash).unwrap_or_else(|| GENESIS_PREV_CHAIN_HASH.to_string()))
    }

    /// Append one event to `stream_id` (§4.3). `expected_prev_chain_hash`
    /// must equal the stream's current head (or the literal `"null"` for an
    /// empty stream); a mismatch is reported as `CHAIN_HASH_MISMATCH` so the
    /// caller can resync before retrying.
    ///
    /// When `signer` is `Some`, the event is signed with that key via the
    /// vault; if `policy` requires an active signer and the key isn't
    /// currently active, this fails closed with `SIGNER_KEY_REVOKED` /
    /// `SIGNER_KEY_NOT_ACTIVE` rather than appending an unsigned event.
    #[allow(clippy::too_many_arguments)]
    pub async fn append(
        &self,
        tenant_id: &str,
        stream_id: &str,
        event_type: &str,
        actor: &str,
        payload: Value,
        expected_prev_chain_hash: &str,
        policy: SigningPolicy,
        signer: Option<(&KeyId, &KeyVault)>,
    ) -> Result<ChainedEvent> {
        let current_prev = self.current_prev_chain_hash(tenant_id, stream_id).await?;
        if current_prev != expected_prev_chain_hash {
            return Err(SettldError::ChainHashMismatch { expected: current_prev, observed: expected_prev_chain_hash.to_string() });
        }

        let id = uuid::Uuid::new_v4().to_string();
        let at = Utc::now();
        let projection = PayloadProjection { v: 1, id: &id, stream_id, event_type, at, actor, payload: &payload };
        let payload_hash = settld_crypto::hash_canonical(&projection).map_err(|e| SettldError::internal(e.to_string()))?;
        let chain_link = ChainLinkProjection { v: 1, prev_chain_hash: &current_prev, payload_hash: &payload_hash };
        let chain_hash = settld_crypto::hash_canonical(&chain_link).map_err(|e| SettldError::internal(e.to_string()))?;

        let signature = match signer {
            Some((key_id, vault)) => {
                let status = vault.current_status(key_id).map_err(|e| SettldError::internal(e.to_string()))?;
                if policy == SigningPolicy::RequiredActive {
                    match status {
                        SignerStatus::Revoked => {
                            return Err(SettldError::SignerKeyRevoked { key_id: key_id.to_string() });
                        }
                        SignerStatus::Rotated => {
                            return Err(SettldError::SignerKeyNotActive { key_id: key_id.to_string() });
                        }
                        SignerStatus::Active => {}
                    }
                }
                let signature_base64 = vault.sign(key_id, &chain_hash).map_err(|e| SettldError::internal(e.to_string()))?;
                Some(EventSignature { key_id: key_id.to_string(), signature_base64 })
            }
            None => None,
        };

        let event = ChainedEvent {
            v: 1,
            id,
            stream_id: stream_id.to_string(),
            event_type: event_type.to_string(),
            at,
            actor: actor.to_string(),
            payload,
            payload_hash,
            prev_chain_hash: current_prev,
            chain_hash: chain_hash.clone(),
            signature,
        };

        self.store.append_event(tenant_id, event.clone()).await.map_err(SettldError::from)?;
        tracing::info!(tenant_id, stream_id, event_id = %event.id, chain_hash = %chain_hash, "event appended");
        Ok(event)
    }

    /// List events on `stream_id` starting strictly after `since_event_id`
    /// (the literal `"null"` means "from the start of the stream"). A cursor
    /// naming an event no longer in the filtered window is a fail-closed
    /// `CURSOR_NOT_FOUND` error — callers always supply a cursor; there is no
    /// "omit it for page one" shortcut.
    pub async fn list(
        &self,
        tenant_id: &str,
        stream_id: &str,
        since_event_id: &str,
        event_type: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<EventPage> {
        let page = self
            .store
            .list_events(tenant_id, stream_id, Some(since_event_id), event_type, limit + offset)
            .await
            .map_err(|e| match e {
                StoreError::NotFound(_) => SettldError::CursorNotFound { cursor: since_event_id.to_string() },
                other => SettldError::from(other),
            })?;

        if offset == 0 {
            return Ok(page);
        }
        let events = page.events.into_iter().skip(offset).take(limit).collect();
        Ok(EventPage { events, next_since_event_id: page.next_since_event_id, head_event_id: page.head_event_id })
    }

    /// Recompute `payloadHash`/`chainHash` for a single event and compare
    /// against what's stored (§8: "any alteration of a historical event
    /// invalidates its chainHash and all successor hashes").
    pub fn verify_event(event: &ChainedEvent) -> Result<()> {
        let projection = PayloadProjection {
            v: event.v,
            id: &event.id,
            stream_id: &event.stream_id,
            event_type: &event.event_type,
            at: event.at,
            actor: &event.actor,
            payload: &event.payload,
        };
        let payload_hash = settld_crypto::hash_canonical(&projection).map_err(|e| SettldError::internal(e.to_string()))?;
        if payload_hash != event.payload_hash {
            return Err(SettldError::SettlementKernelBindingInvalid {
                reason: format!("event {} payloadHash mismatch", event.id),
            });
        }
        let chain_link = ChainLinkProjection { v: event.v, prev_chain_hash: &event.prev_chain_hash, payload_hash: &payload_hash };
        let chain_hash = settld_crypto::hash_canonical(&chain_link).map_err(|e| SettldError::internal(e.to_string()))?;
        if chain_hash != event.chain_hash {
            return Err(SettldError::SettlementKernelBindingInvalid {
                reason: format!("event {} chainHash mismatch", event.id),
            });
        }
        Ok(())
    }

    /// Verify an entire ordered stream: each event's own hash recomputes and
    /// `prevChainHash` equals the predecessor's `chainHash` (genesis excepted).
    pub fn verify_chain(events: &[ChainedEvent]) -> Result<()> {
        let mut prev = GENESIS_PREV_CHAIN_HASH.to_string();
        for event in events {
            if event.prev_chain_hash != prev {
                return Err(SettldError::ChainHashMismatch { expected: prev, observed: event.prev_chain_hash.clone() });
            }
            Self::verify_event(event)?;
            prev = event.chain_hash.clone();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use settld_store::memory::InMemoryStore;

    fn log() -> EventLog {
        EventLog::new(Arc::new(InMemoryStore::new()))
    }

    #[tokio::test]
    async fn first_append_requires_null_sentinel() {
        let log = log();
        let result = log
            .append("t", "s1", "TASK_STARTED", "agent_1", serde_json::json!({}), "not-null", SigningPolicy::NotRequired, None)
            .await;
        assert!(matches!(result, Err(SettldError::ChainHashMismatch { .. })));
    }

    #[tokio::test]
    async fn appends_chain_correctly() {
        let log = log();
        let e1 = log
            .append("t", "s1", "TASK_STARTED", "agent_1", serde_json::json!({"n": 1}), "null", SigningPolicy::NotRequired, None)
            .await
            .unwrap();
        assert_eq!(e1.prev_chain_hash, "null");

        let e2 = log
            .append("t", "s1", "TASK_DONE", "agent_1", serde_json::json!({"n": 2}), &e1.chain_hash, SigningPolicy::NotRequired, None)
            .await
            .unwrap();
        assert_eq!(e2.prev_chain_hash, e1.chain_hash);

        EventLog::verify_chain(&[e1, e2]).unwrap();
    }

    #[tokio::test]
    async fn stale_expected_prev_is_rejected() {
        let log = log();
        log.append("t", "s1", "A", "x", serde_json::json!({}), "null", SigningPolicy::NotRequired, None).await.unwrap();
        let result = log
            .append("t", "s1", "B", "x", serde_json::json!({}), "null", SigningPolicy::NotRequired, None)
            .await;
        assert!(matches!(result, Err(SettldError::ChainHashMismatch { .. })));
    }

    #[tokio::test]
    async fn tampering_with_payload_invalidates_verification() {
        let log = log();
        let mut e1 = log.append("t", "s1", "A", "x", serde_json::json!({"amount": 100}), "null", SigningPolicy::NotRequired, None).await.unwrap();
        e1.payload = serde_json::json!({"amount": 999});
        assert!(EventLog::verify_event(&e1).is_err());
    }

    #[tokio::test]
    async fn signing_with_revoked_key_fails_closed() {
        let vault = KeyVault::new();
        let (key_id, _) = vault.generate_key(settld_crypto::vault::KeyPurpose::General).unwrap();
        vault.revoke_key(&key_id).unwrap();
        let log = log();
        let result = log
            .append("t", "s1", "A", "x", serde_json::json!({}), "null", SigningPolicy::RequiredActive, Some((&key_id, &vault)))
            .await;
        assert!(matches!(result, Err(SettldError::SignerKeyRevoked { .. })));
    }

    #[tokio::test]
    async fn cursor_not_found_is_fail_closed() {
        let log = log();
        log.append("t", "s1", "A", "x", serde_json::json!({}), "null", SigningPolicy::NotRequired, None).await.unwrap();
        let result = log.list("t", "s1", "nonexistent-id", None, 10, 0).await;
        assert!(matches!(result, Err(SettldError::CursorNotFound { .. })));
    }
}
