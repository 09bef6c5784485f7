//! Idempotency key → stored response map (§4.4).
//!
//! Key = `(tenant, method, path, idempotency-key, request-fingerprint)`. On
//! replay of an identical request the stored response is returned verbatim;
//! on a same-key-different-body request the caller gets back the conflicting
//! prior fingerprint so it can raise `IDEMPOTENCY_CONFLICT` (409).

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdempotencyKey {
    pub tenant_id: String,
    pub method: String,
    pub path: String,
    pub idempotency_key: String,
}

impl IdempotencyKey {
    pub fn new(tenant_id: impl Into<String>, method: impl Into<String>, path: impl Into<String>, idempotency_key: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            method: method.into(),
            path: path.into(),
            idempotency_key: idempotency_key.into(),
        }
    }

    /// Flat string form used as the map key in both store backends.
    pub fn as_composite_string(&self) -> String {
        format!("{}|{}|{}|{}", self.tenant_id, self.method, self.path, self.idempotency_key)
    }
}

/// What's stored against an [`IdempotencyKey`]: the fingerprint of the
/// request body that produced it (for conflict detection) and the verbatim
/// response body + status to replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub request_fingerprint: String,
    pub response_status: u16,
    pub response_body: serde_json::Value,
    pub stored_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    pub fn new(request_fingerprint: String, response_status: u16, response_body: serde_json::Value, ttl: Duration) -> Self {
        let now = Utc::now();
        Self { request_fingerprint, response_status, response_body, stored_at: now, expires_at: now + ttl }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Outcome of a `put-if-absent` against the idempotency map.
#[derive(Debug, Clone)]
pub enum IdempotencyOutcome {
    /// No prior entry (or it expired): the new record was stored, caller
    /// should proceed with handling the request and persist the response.
    Stored,
    /// A live prior entry has the same fingerprint: replay its response.
    Replay(IdempotencyRecord),
    /// A live prior entry has a *different* fingerprint: 409 conflict.
    Conflict(IdempotencyRecord),
}

pub const DEFAULT_IDEMPOTENCY_TTL_SECONDS: i64 = 24 * 3600;
