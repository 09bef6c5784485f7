//! settld-store — the persistence contract consumed by every higher layer
//! (§2 item 5, §4.4 Idempotency Layer).
//!
//! Grounded on the teacher's `openibank-db/src/lib.rs` repo-factory shape,
//! abstracted here into a trait (`Store`) instead of a concrete `Database`
//! struct, so `settld-eventlog`/`settld-ledger`/`settld-gate`/the HTTP layer
//! depend on the contract, not on sqlite vs. in-memory. `settld-db` provides
//! the sqlx-backed implementation; [`memory::InMemoryStore`] here is the
//! reference implementation used by every crate's unit tests.
//!
//! Every method is tenant-scoped: a lookup always takes `tenant_id` and must
//! never return another tenant's row, not even to distinguish "not found"
//! from "belongs to someone else" (§7.2).

pub mod idempotency;
pub mod lock;
pub mod memory;

pub use idempotency::{IdempotencyKey, IdempotencyOutcome, IdempotencyRecord};
pub use lock::KeyedLocks;

use async_trait::async_trait;
use chrono::Duration;
use settld_types::{
    AgentId, AgentIdentity, AgreementId, ChainedEvent, Currency, DecisionId, DecisionRecord,
    Escalation, EscalationId, Gate, GateId, Grant, GrantId, ManifestId, ReceiptId,
    SettlementReceipt, ToolCallAgreement, ToolCallEvidence, ToolId, ToolManifest, Wallet,
};
use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Outcome of a hash-keyed put-if-absent (used for at-most-once settlement,
/// §4.7's "caller applies the ledger transition in a single store transaction
/// keyed by `agreementHash`").
#[derive(Debug, Clone)]
pub enum ClaimOutcome {
    /// This caller is the first to claim the key.
    Claimed,
    /// Someone already claimed it; here's the receipt id they stored.
    AlreadyClaimed(ReceiptId),
}

/// A page of chained events plus cursor-resume metadata (§4.3).
#[derive(Debug, Clone)]
pub struct EventPage {
    pub events: Vec<ChainedEvent>,
    /// Cursor to pass as `sinceEventId` to fetch the next page. Advances to
    /// the current stream head even on a filtered, empty page (§9 Open
    /// Question decision, DESIGN.md).
    pub next_since_event_id: String,
    /// The stream's current head event id, `None` for an empty stream.
    pub head_event_id: Option<String>,
}

#[async_trait]
pub trait Store: Send + Sync {
    // ---- agents ----------------------------------------------------
    async fn put_agent(&self, agent: AgentIdentity) -> StoreResult<()>;
    async fn get_agent(&self, tenant_id: &str, agent_id: AgentId) -> StoreResult<Option<AgentIdentity>>;

    // ---- wallets -----------------------------------------------------
    async fn get_wallet(&self, tenant_id: &str, agent_id: AgentId, currency: Currency) -> StoreResult<Option<Wallet>>;
    /// Upsert. Callers (the ledger) are responsible for holding the
    /// appropriate keyed lock before read-modify-write.
    async fn put_wallet(&self, wallet: Wallet) -> StoreResult<()>;

    // ---- grants --------------------------------------------------------
    async fn put_grant(&self, grant: Grant) -> StoreResult<()>;
    async fn get_grant(&self, tenant_id: &str, grant_id: GrantId) -> StoreResult<Option<Grant>>;
    async fn revoke_grant(&self, tenant_id: &str, grant_id: GrantId) -> StoreResult<()>;
    async fn is_grant_revoked(&self, tenant_id: &str, grant_id: GrantId) -> StoreResult<bool>;
    /// Running total already debited against this grant's `maxTotal` envelope.
    async fn grant_spent_cents(&self, tenant_id: &str, grant_id: GrantId) -> StoreResult<i64>;
    async fn record_grant_spend(&self, tenant_id: &str, grant_id: GrantId, cents: i64) -> StoreResult<()>;

    // ---- tool manifests --------------------------------------------------
    async fn put_manifest(&self, manifest: ToolManifest) -> StoreResult<()>;
    async fn get_manifest(&self, tenant_id: &str, manifest_id: ManifestId) -> StoreResult<Option<ToolManifest>>;
    async fn get_manifest_by_tool(&self, tenant_id: &str, tool_id: ToolId) -> StoreResult<Option<ToolManifest>>;
    async fn list_manifests(&self, tenant_id: &str) -> StoreResult<Vec<ToolManifest>>;

    // ---- agreements / evidence ------------------------------------------
    async fn put_agreement(&self, agreement: ToolCallAgreement) -> StoreResult<()>;
    async fn get_agreement(&self, tenant_id: &str, agreement_id: AgreementId) -> StoreResult<Option<ToolCallAgreement>>;
    /// `ToolCallEvidence` carries no `tenantId` field of its own (§3), so the
    /// tenant is supplied by the caller, which has already resolved it from
    /// the referenced agreement.
    async fn put_evidence(&self, tenant_id: &str, evidence: ToolCallEvidence) -> StoreResult<()>;
    async fn get_evidence_for_agreement(&self, tenant_id: &str, agreement_id: AgreementId) -> StoreResult<Option<ToolCallEvidence>>;

    // ---- settlement at-most-once + receipts -----------------------------
    /// Atomically claim `agreement_hash` for settlement. Returns
    /// [`ClaimOutcome::AlreadyClaimed`] if a prior call already settled this
    /// agreement, regardless of idempotency key (§8 round-trip law).
    async fn claim_settlement(&self, tenant_id: &str, agreement_hash: &str, receipt_id: ReceiptId) -> StoreResult<ClaimOutcome>;
    async fn put_receipt(&self, tenant_id: &str, receipt: SettlementReceipt) -> StoreResult<()>;
    async fn get_receipt(&self, tenant_id: &str, receipt_id: ReceiptId) -> StoreResult<Option<SettlementReceipt>>;
    async fn get_receipt_by_agreement_hash(&self, tenant_id: &str, agreement_hash: &str) -> StoreResult<Option<SettlementReceipt>>;
    async fn list_receipts(&self, tenant_id: &str, limit: usize) -> StoreResult<Vec<SettlementReceipt>>;

    async fn put_decision(&self, tenant_id: &str, decision: DecisionRecord) -> StoreResult<()>;
    async fn get_decision(&self, tenant_id: &str, decision_id: DecisionId) -> StoreResult<Option<DecisionRecord>>;

    // ---- gates -----------------------------------------------------------
    async fn put_gate(&self, gate: Gate) -> StoreResult<()>;
    async fn get_gate(&self, tenant_id: &str, gate_id: GateId) -> StoreResult<Option<Gate>>;

    // ---- escalations -------------------------------------------------------
    /// `Escalation` also carries no `tenantId`; scoped by the caller via its gate.
    async fn put_escalation(&self, tenant_id: &str, escalation: Escalation) -> StoreResult<()>;
    async fn get_escalation(&self, tenant_id: &str, escalation_id: EscalationId) -> StoreResult<Option<Escalation>>;
    async fn get_pending_escalation_for_gate(&self, tenant_id: &str, gate_id: GateId) -> StoreResult<Option<Escalation>>;

    // ---- chained event log -------------------------------------------------
    /// Append a fully-hashed event to a stream. The caller (`settld-eventlog`)
    /// has already verified `prevChainHash` against the current head; this
    /// method only persists it. Implementations should still treat a
    /// duplicate `id` as a no-op rather than a hard failure.
    async fn append_event(&self, tenant_id: &str, event: ChainedEvent) -> StoreResult<()>;
    async fn get_stream_head(&self, tenant_id: &str, stream_id: &str) -> StoreResult<Option<ChainedEvent>>;
    async fn list_events(
        &self,
        tenant_id: &str,
        stream_id: &str,
        since_event_id: Option<&str>,
        event_type: Option<&str>,
        limit: usize,
    ) -> StoreResult<EventPage>;

    // ---- idempotency -------------------------------------------------------
    async fn idempotency_check(&self, key: &IdempotencyKey, request_fingerprint: &str) -> StoreResult<Option<IdempotencyRecord>>;
    async fn idempotency_put(&self, key: IdempotencyKey, request_fingerprint: String, status: u16, body: serde_json::Value, ttl: Duration) -> StoreResult<IdempotencyOutcome>;

    // ---- locks -------------------------------------------------------------
    /// Per-`gateId` single-writer lock (§5).
    fn gate_locks(&self) -> &KeyedLocks;
    /// Per-`streamId` single-writer lock (§5).
    fn stream_locks(&self) -> &KeyedLocks;
    /// Per-`(tenantId, agentId, currency)` wallet lock (§5); callers acquire
    /// in deterministic key order across a multi-wallet transition.
    fn wallet_locks(&self) -> &KeyedLocks;
}

impl From<StoreError> for settld_types::SettldError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(resource) => settld_types::SettldError::NotFound { resource },
            StoreError::AlreadyExists(resource) => settld_types::SettldError::InvalidInput {
                message: format!("already exists: {resource}"),
            },
            StoreError::Backend(message) => settld_types::SettldError::internal(message),
        }
    }
}
