//! External payment rail adapter (§4.9). Only the adapter *contract* is in
//! scope (Non-goal: "no concrete external payment rail implementation"); this
//! module defines the trait plus two always-in-scope adapters: a
//! deterministic in-process stub for tests and the sandbox default, and a
//! thin HTTP client shaped for a real sandbox endpoint. Neither stands in for
//! a production rail integration — that remains the deployer's job.
//!
//! Grounded on the teacher's `ConditionOracle` trait shape (`openibank-escrow`):
//! an externally-pluggable decision surface the escrow state machine consults
//! without knowing which concrete implementation backs it.

use async_trait::async_trait;
use settld_types::amount::{Cents, Currency};
use settld_types::error::{Result, SettldError};
use std::collections::HashMap;
use std::sync::Mutex;

/// The rail's view of a reservation. `Unknown` is returned when the rail's
/// response can't be classified as one of the others — callers must never
/// treat `Unknown` as success (§4.9: "an unknown rail state is never treated
/// as success").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RailStatus {
    Reserved,
    Released,
    Voided,
    Unknown,
}

#[async_trait]
pub trait RailAdapter: Send + Sync {
    /// Reserve `amount_cents` against the rail, keyed by `idempotency_key` so
    /// a retried call returns the same reservation rather than double-booking.
    async fn reserve(&self, idempotency_key: &str, amount_cents: Cents, currency: Currency) -> Result<String>;
    /// Release a reservation (funds move to the payee side on the rail).
    async fn release(&self, idempotency_key: &str, reserve_id: &str) -> Result<RailStatus>;
    /// Void a reservation (funds return to the payer side on the rail).
    async fn void(&self, idempotency_key: &str, reserve_id: &str) -> Result<RailStatus>;
    /// Poll the rail's current view of a reservation, for reconciliation
    /// after a `NeedsReconciliation` error.
    async fn get_status(&self, reserve_id: &str) -> Result<RailStatus>;
}

/// Deterministic in-process rail: every call succeeds immediately and
/// idempotently. Used in `stub` mode and by every crate's unit tests; never
/// reaches a network.
#[derive(Default)]
pub struct StubRailAdapter {
    reservations: Mutex<HashMap<String, RailStatus>>,
    idempotency: Mutex<HashMap<String, String>>,
}

impl StubRailAdapter {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RailAdapter for StubRailAdapter {
    async fn reserve(&self, idempotency_key: &str, _amount_cents: Cents, _currency: Currency) -> Result<String> {
        let mut idem = self.idempotency.lock().expect("stub rail lock poisoned");
        if let Some(existing) = idem.get(idempotency_key) {
            return Ok(existing.clone());
        }
        let reserve_id = format!("stub-reserve-{}", uuid::Uuid::new_v4());
        idem.insert(idempotency_key.to_string(), reserve_id.clone());
        self.reservations.lock().expect("stub rail lock poisoned").insert(reserve_id.clone(), RailStatus::Reserved);
        Ok(reserve_id)
    }

    async fn release(&self, _idempotency_key: &str, reserve_id: &str) -> Result<RailStatus> {
        let mut reservations = self.reservations.lock().expect("stub rail lock poisoned");
        reservations.insert(reserve_id.to_string(), RailStatus::Released);
        Ok(RailStatus::Released)
    }

    async fn void(&self, _idempotency_key: &str, reserve_id: &str) -> Result<RailStatus> {
        let mut reservations = self.reservations.lock().expect("stub rail lock poisoned");
        reservations.insert(reserve_id.to_string(), RailStatus::Voided);
        Ok(RailStatus::Voided)
    }

    async fn get_status(&self, reserve_id: &str) -> Result<RailStatus> {
        let reservations = self.reservations.lock().expect("stub rail lock poisoned");
        Ok(reservations.get(reserve_id).copied().unwrap_or(RailStatus::Unknown))
    }
}

/// A thin HTTP client against a sandbox rail endpoint, for deployments that
/// want to exercise the adapter contract against a real (non-production)
/// counterparty. The wire shape here is illustrative of "what a rail HTTP
/// API looks like", not a specific vendor's contract.
pub struct SandboxRailAdapter {
    base_url: String,
    client: reqwest::Client,
}

impl SandboxRailAdapter {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { base_url: base_url.into(), client: reqwest::Client::new() }
    }

    fn parse_status(raw: &str) -> RailStatus {
        match raw {
            "reserved" => RailStatus::Reserved,
            "released" => RailStatus::Released,
            "voided" => RailStatus::Voided,
            _ => RailStatus::Unknown,
        }
    }
}

#[derive(serde::Deserialize)]
struct RailReserveResponse {
    reserve_id: String,
}

#[derive(serde::Deserialize)]
struct RailStatusResponse {
    status: String,
}

#[async_trait]
impl RailAdapter for SandboxRailAdapter {
    async fn reserve(&self, idempotency_key: &str, amount_cents: Cents, currency: Currency) -> Result<String> {
        let resp = self
            .client
            .post(format!("{}/reservations", self.base_url))
            .header("Idempotency-Key", idempotency_key)
            .json(&serde_json::json!({"amountCents": amount_cents, "currency": currency.to_string()}))
            .send()
            .await
            .map_err(|e| SettldError::NeedsReconciliation { reserve_id: format!("unreachable: {e}") })?
            .error_for_status()
            .map_err(|e| SettldError::NeedsReconciliation { reserve_id: format!("rail error: {e}") })?
            .json::<RailReserveResponse>()
            .await
            .map_err(|e| SettldError::NeedsReconciliation { reserve_id: format!("malformed response: {e}") })?;
        Ok(resp.reserve_id)
    }

    async fn release(&self, idempotency_key: &str, reserve_id: &str) -> Result<RailStatus> {
        self.transition(idempotency_key, reserve_id, "release").await
    }

    async fn void(&self, idempotency_key: &str, reserve_id: &str) -> Result<RailStatus> {
        self.transition(idempotency_key, reserve_id, "void").await
    }

    async fn get_status(&self, reserve_id: &str) -> Result<RailStatus> {
        let resp = self
            .client
            .get(format!("{}/reservations/{reserve_id}", self.base_url))
            .send()
            .await
            .map_err(|e| SettldError::NeedsReconciliation { reserve_id: format!("unreachable: {e}") })?;
        if !resp.status().is_success() {
            return Ok(RailStatus::Unknown);
        }
        let body = resp
            .json::<RailStatusResponse>()
            .await
            .map_err(|e| SettldError::NeedsReconciliation { reserve_id: format!("malformed response: {e}") })?;
        Ok(Self::parse_status(&body.status))
    }
}

impl SandboxRailAdapter {
    async fn transition(&self, idempotency_key: &str, reserve_id: &str, action: &str) -> Result<RailStatus> {
        let resp = self
            .client
            .post(format!("{}/reservations/{reserve_id}/{action}", self.base_url))
            .header("Idempotency-Key", idempotency_key)
            .send()
            .await
            .map_err(|e| SettldError::NeedsReconciliation { reserve_id: format!("unreachable: {e}") })?;
        if !resp.status().is_success() {
            return Err(SettldError::NeedsReconciliation { reserve_id: reserve_id.to_string() });
        }
        let body = resp
            .json::<RailStatusResponse>()
            .await
            .map_err(|e| SettldError::NeedsReconciliation { reserve_id: format!("malformed response: {e}") })?;
        let status = Self::parse_status(&body.status);
        if status == RailStatus::Unknown {
            return Err(SettldError::NeedsReconciliation { reserve_id: reserve_id.to_string() });
        }
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stub_reserve_is_idempotent_on_key() {
        let rail = StubRailAdapter::new();
        let a = rail.reserve("idem-1", 100, Currency::Usd).await.unwrap();
        let b = rail.reserve("idem-1", 100, Currency::Usd).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn stub_status_unknown_for_unreserved_id() {
        let rail = StubRailAdapter::new();
        assert_eq!(rail.get_status("never-reserved").await.unwrap(), RailStatus::Unknown);
    }

    #[tokio::test]
    async fn stub_release_then_status_reflects_released() {
        let rail = StubRailAdapter::new();
        let id = rail.reserve("idem-1", 100, Currency::Usd).await.unwrap();
        rail.release("idem-1", &id).await.unwrap();
        assert_eq!(rail.get_status(&id).await.unwrap(), RailStatus::Released);
    }
}
