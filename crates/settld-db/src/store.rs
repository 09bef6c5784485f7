//! Sqlite-backed [`Store`] implementation.
//!
//! Grounded on the teacher's `openibank-db/src/repos/wallet.rs` pattern: every
//! query goes through the runtime-checked `sqlx::query`/`query_as` functions,
//! never the compile-time `query!`/`query_as!` macros, since those require a
//! live database at build time. Every entity is persisted as its canonical
//! JSON form in a `doc` column plus whatever columns a lookup or filter needs
//! (§6 "Persisted state layout"); decoding the `doc` column is how a row
//! becomes a `settld-types` value again.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use settld_store::{
    ClaimOutcome, EventPage, IdempotencyKey, IdempotencyOutcome, IdempotencyRecord, KeyedLocks,
    Store, StoreError, StoreResult,
};
use settld_types::{
    AgentId, AgentIdentity, AgreementId, ChainedEvent, Currency, DecisionId, DecisionRecord,
    Escalation, EscalationId, Gate, GateId, Grant, GrantId, ManifestId, ReceiptId,
    SettlementReceipt, ToolCallAgreement, ToolCallEvidence, ToolId, ToolManifest, Wallet,
};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::error::DbError;
use crate::DatabaseConfig;

fn sqlx_err(e: sqlx::Error) -> StoreError {
    StoreError::from(DbError::from(e))
}

fn json_err(e: serde_json::Error) -> StoreError {
    StoreError::from(DbError::from(e))
}

fn parse_uuid(s: &str) -> StoreResult<Uuid> {
    Uuid::parse_str(s).map_err(|e| StoreError::Backend(format!("corrupt id {s}: {e}")))
}

pub struct SqliteStore {
    pool: SqlitePool,
    gate_locks: KeyedLocks,
    stream_locks: KeyedLocks,
    wallet_locks: KeyedLocks,
}

impl SqliteStore {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, DbError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(std::time::Duration::from_secs(config.acquire_timeout_secs))
            .connect(&config.database_url)
            .await
            .map_err(|e| DbError::Connection(e.to_string()))?;
        Ok(Self { pool, gate_locks: KeyedLocks::new(), stream_locks: KeyedLocks::new(), wallet_locks: KeyedLocks::new() })
    }

    pub async fn migrate(&self) -> Result<(), DbError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| DbError::Migration(e.to_string()))?;
        Ok(())
    }

    pub async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await.is_ok()
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn put_agent(&self, agent: AgentIdentity) -> StoreResult<()> {
        let doc = serde_json::to_string(&agent).map_err(json_err)?;
        let status = serde_json::to_value(agent.status).map_err(json_err)?.as_str().unwrap_or_default().to_string();
        sqlx::query(
            "INSERT INTO agents (tenant_id, agent_id, key_id, status, doc) VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(tenant_id, agent_id) DO UPDATE SET key_id = excluded.key_id, status = excluded.status, doc = excluded.doc",
        )
        .bind(&agent.tenant_id)
        .bind(agent.agent_id.0.to_string())
        .bind(agent.key_id.0.clone())
        .bind(status)
        .bind(doc)
        .execute(&self.pool)
        .await
        .map_err(sqlx_err)?;
        Ok(())
    }

    async fn get_agent(&self, tenant_id: &str, agent_id: AgentId) -> StoreResult<Option<AgentIdentity>> {
        let row = sqlx::query("SELECT doc FROM agents WHERE tenant_id = ?1 AND agent_id = ?2")
            .bind(tenant_id)
            .bind(agent_id.0.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(sqlx_err)?;
        row.map(|r| serde_json::from_str(&r.get::<String, _>("doc")).map_err(json_err)).transpose()
    }

    async fn get_wallet(&self, tenant_id: &str, agent_id: AgentId, currency: Currency) -> StoreResult<Option<Wallet>> {
        let row = sqlx::query(
            "SELECT available_cents, escrow_locked_cents, total_debited_cents FROM wallets
             WHERE tenant_id = ?1 AND agent_id = ?2 AND currency = ?3",
        )
        .bind(tenant_id)
        .bind(agent_id.0.to_string())
        .bind(currency.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(sqlx_err)?;

        Ok(row.map(|r| Wallet {
            tenant_id: tenant_id.to_string(),
            agent_id,
            currency,
            available_cents: r.get("available_cents"),
            escrow_locked_cents: r.get("escrow_locked_cents"),
            total_debited_cents: r.get("total_debited_cents"),
        }))
    }

    async fn put_wallet(&self, wallet: Wallet) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO wallets (tenant_id, agent_id, currency, available_cents, escrow_locked_cents, total_debited_cents)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(tenant_id, agent_id, currency) DO UPDATE SET
                available_cents = excluded.available_cents,
                escrow_locked_cents = excluded.escrow_locked_cents,
                total_debited_cents = excluded.total_debited_cents",
        )
        .bind(&wallet.tenant_id)
        .bind(wallet.agent_id.0.to_string())
        .bind(wallet.currency.to_string())
        .bind(wallet.available_cents)
        .bind(wallet.escrow_locked_cents)
        .bind(wallet.total_debited_cents)
        .execute(&self.pool)
        .await
        .map_err(sqlx_err)?;
        Ok(())
    }

    async fn put_grant(&self, grant: Grant) -> StoreResult<()> {
        let doc = serde_json::to_string(&grant).map_err(json_err)?;
        sqlx::query(
            "INSERT INTO grants (tenant_id, grant_id, grant_hash, revoked, spent_cents, doc) VALUES (?1, ?2, ?3, 0, 0, ?4)
             ON CONFLICT(tenant_id, grant_id) DO UPDATE SET grant_hash = excluded.grant_hash, doc = excluded.doc",
        )
        .bind(&grant.tenant_id)
        .bind(grant.grant_id.0.to_string())
        .bind(&grant.grant_hash)
        .bind(doc)
        .execute(&self.pool)
        .await
        .map_err(sqlx_err)?;
        Ok(())
    }

    async fn get_grant(&self, tenant_id: &str, grant_id: GrantId) -> StoreResult<Option<Grant>> {
        let row = sqlx::query("SELECT doc FROM grants WHERE tenant_id = ?1 AND grant_id = ?2")
            .bind(tenant_id)
            .bind(grant_id.0.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(sqlx_err)?;
        row.map(|r| serde_json::from_str(&r.get::<String, _>("doc")).map_err(json_err)).transpose()
    }

    async fn revoke_grant(&self, tenant_id: &str, grant_id: GrantId) -> StoreResult<()> {
        sqlx::query("UPDATE grants SET revoked = 1 WHERE tenant_id = ?1 AND grant_id = ?2")
            .bind(tenant_id)
            .bind(grant_id.0.to_string())
            .execute(&self.pool)
            .await
            .map_err(sqlx_err)?;
        Ok(())
    }

    async fn is_grant_revoked(&self, tenant_id: &str, grant_id: GrantId) -> StoreResult<bool> {
        let row = sqlx::query("SELECT revoked FROM grants WHERE tenant_id = ?1 AND grant_id = ?2")
            .bind(tenant_id)
            .bind(grant_id.0.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(sqlx_err)?;
        Ok(row.map(|r| r.get::<i64, _>("revoked") != 0).unwrap_or(false))
    }

    async fn grant_spent_cents(&self, tenant_id: &str, grant_id: GrantId) -> StoreResult<i64> {
        let row = sqlx::query("SELECT spent_cents FROM grants WHERE tenant_id = ?1 AND grant_id = ?2")
            .bind(tenant_id)
            .bind(grant_id.0.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(sqlx_err)?;
        Ok(row.map(|r| r.get::<i64, _>("spent_cents")).unwrap_or(0))
    }

    async fn record_grant_spend(&self, tenant_id: &str, grant_id: GrantId, cents: i64) -> StoreResult<()> {
        sqlx::query("UPDATE grants SET spent_cents = spent_cents + ?1 WHERE tenant_id = ?2 AND grant_id = ?3")
            .bind(cents)
            .bind(tenant_id)
            .bind(grant_id.0.to_string())
            .execute(&self.pool)
            .await
            .map_err(sqlx_err)?;
        Ok(())
    }

    async fn put_manifest(&self, manifest: ToolManifest) -> StoreResult<()> {
        let doc = serde_json::to_string(&manifest).map_err(json_err)?;
        sqlx::query(
            "INSERT INTO manifests (tenant_id, manifest_id, tool_id, manifest_hash, doc) VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(tenant_id, manifest_id) DO UPDATE SET tool_id = excluded.tool_id, manifest_hash = excluded.manifest_hash, doc = excluded.doc",
        )
        .bind(&manifest.tenant_id)
        .bind(manifest.manifest_id.0.to_string())
        .bind(manifest.tool_id.0.to_string())
        .bind(&manifest.manifest_hash)
        .bind(doc)
        .execute(&self.pool)
        .await
        .map_err(sqlx_err)?;
        Ok(())
    }

    async fn get_manifest(&self, tenant_id: &str, manifest_id: ManifestId) -> StoreResult<Option<ToolManifest>> {
        let row = sqlx::query("SELECT doc FROM manifests WHERE tenant_id = ?1 AND manifest_id = ?2")
            .bind(tenant_id)
            .bind(manifest_id.0.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(sqlx_err)?;
        row.map(|r| serde_json::from_str(&r.get::<String, _>("doc")).map_err(json_err)).transpose()
    }

    async fn get_manifest_by_tool(&self, tenant_id: &str, tool_id: ToolId) -> StoreResult<Option<ToolManifest>> {
        let row = sqlx::query(
            "SELECT doc FROM manifests WHERE tenant_id = ?1 AND tool_id = ?2 ORDER BY rowid DESC LIMIT 1",
        )
        .bind(tenant_id)
        .bind(tool_id.0.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(sqlx_err)?;
        row.map(|r| serde_json::from_str(&r.get::<String, _>("doc")).map_err(json_err)).transpose()
    }

    async fn list_manifests(&self, tenant_id: &str) -> StoreResult<Vec<ToolManifest>> {
        let rows = sqlx::query("SELECT doc FROM manifests WHERE tenant_id = ?1")
            .bind(tenant_id)
            .fetch_all(&self.pool)
            .await
            .map_err(sqlx_err)?;
        rows.into_iter().map(|r| serde_json::from_str(&r.get::<String, _>("doc")).map_err(json_err)).collect()
    }

    async fn put_agreement(&self, agreement: ToolCallAgreement) -> StoreResult<()> {
        let doc = serde_json::to_string(&agreement).map_err(json_err)?;
        sqlx::query(
            "INSERT INTO agreements (tenant_id, agreement_id, agreement_hash, doc) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(tenant_id, agreement_id) DO UPDATE SET agreement_hash = excluded.agreement_hash, doc = excluded.doc",
        )
        .bind(&agreement.tenant_id)
        .bind(agreement.artifact_id.0.to_string())
        .bind(&agreement.agreement_hash)
        .bind(doc)
        .execute(&self.pool)
        .await
        .map_err(sqlx_err)?;
        Ok(())
    }

    async fn get_agreement(&self, tenant_id: &str, agreement_id: AgreementId) -> StoreResult<Option<ToolCallAgreement>> {
        let row = sqlx::query("SELECT doc FROM agreements WHERE tenant_id = ?1 AND agreement_id = ?2")
            .bind(tenant_id)
            .bind(agreement_id.0.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(sqlx_err)?;
        row.map(|r| serde_json::from_str(&r.get::<String, _>("doc")).map_err(json_err)).transpose()
    }

    async fn put_evidence(&self, tenant_id: &str, evidence: ToolCallEvidence) -> StoreResult<()> {
        let doc = serde_json::to_string(&evidence).map_err(json_err)?;
        sqlx::query(
            "INSERT INTO evidence (tenant_id, agreement_id, doc) VALUES (?1, ?2, ?3)
             ON CONFLICT(tenant_id, agreement_id) DO UPDATE SET doc = excluded.doc",
        )
        .bind(tenant_id)
        .bind(evidence.agreement_id.0.to_string())
        .bind(doc)
        .execute(&self.pool)
        .await
        .map_err(sqlx_err)?;
        Ok(())
    }

    async fn get_evidence_for_agreement(&self, tenant_id: &str, agreement_id: AgreementId) -> StoreResult<Option<ToolCallEvidence>> {
        let row = sqlx::query("SELECT doc FROM evidence WHERE tenant_id = ?1 AND agreement_id = ?2")
            .bind(tenant_id)
            .bind(agreement_id.0.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(sqlx_err)?;
        row.map(|r| serde_json::from_str(&r.get::<String, _>("doc")).map_err(json_err)).transpose()
    }

    async fn claim_settlement(&self, tenant_id: &str, agreement_hash: &str, receipt_id: ReceiptId) -> StoreResult<ClaimOutcome> {
        let result = sqlx::query(
            "INSERT INTO settlement_claims (tenant_id, agreement_hash, receipt_id) VALUES (?1, ?2, ?3)
             ON CONFLICT(tenant_id, agreement_hash) DO NOTHING",
        )
        .bind(tenant_id)
        .bind(agreement_hash)
        .bind(receipt_id.0.to_string())
        .execute(&self.pool)
        .await
        .map_err(sqlx_err)?;

        if result.rows_affected() == 1 {
            return Ok(ClaimOutcome::Claimed);
        }

        let row = sqlx::query("SELECT receipt_id FROM settlement_claims WHERE tenant_id = ?1 AND agreement_hash = ?2")
            .bind(tenant_id)
            .bind(agreement_hash)
            .fetch_one(&self.pool)
            .await
            .map_err(sqlx_err)?;
        let existing: String = row.get("receipt_id");
        Ok(ClaimOutcome::AlreadyClaimed(ReceiptId(parse_uuid(&existing)?)))
    }

    async fn put_receipt(&self, tenant_id: &str, receipt: SettlementReceipt) -> StoreResult<()> {
        let doc = serde_json::to_string(&receipt).map_err(json_err)?;
        sqlx::query(
            "INSERT INTO receipts (tenant_id, receipt_id, receipt_hash, settled_at, doc) VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(tenant_id, receipt_id) DO UPDATE SET receipt_hash = excluded.receipt_hash, doc = excluded.doc",
        )
        .bind(tenant_id)
        .bind(receipt.receipt_id.0.to_string())
        .bind(&receipt.receipt_hash)
        .bind(Utc::now())
        .bind(doc)
        .execute(&self.pool)
        .await
        .map_err(sqlx_err)?;
        Ok(())
    }

    async fn get_receipt(&self, tenant_id: &str, receipt_id: ReceiptId) -> StoreResult<Option<SettlementReceipt>> {
        let row = sqlx::query("SELECT doc FROM receipts WHERE tenant_id = ?1 AND receipt_id = ?2")
            .bind(tenant_id)
            .bind(receipt_id.0.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(sqlx_err)?;
        row.map(|r| serde_json::from_str(&r.get::<String, _>("doc")).map_err(json_err)).transpose()
    }

    async fn get_receipt_by_agreement_hash(&self, tenant_id: &str, agreement_hash: &str) -> StoreResult<Option<SettlementReceipt>> {
        let row = sqlx::query("SELECT receipt_id FROM settlement_claims WHERE tenant_id = ?1 AND agreement_hash = ?2")
            .bind(tenant_id)
            .bind(agreement_hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(sqlx_err)?;
        let Some(row) = row else { return Ok(None) };
        let receipt_id: String = row.get("receipt_id");
        self.get_receipt(tenant_id, ReceiptId(parse_uuid(&receipt_id)?)).await
    }

    async fn list_receipts(&self, tenant_id: &str, limit: usize) -> StoreResult<Vec<SettlementReceipt>> {
        let rows = sqlx::query("SELECT doc FROM receipts WHERE tenant_id = ?1 ORDER BY settled_at ASC LIMIT ?2")
            .bind(tenant_id)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(sqlx_err)?;
        rows.into_iter().map(|r| serde_json::from_str(&r.get::<String, _>("doc")).map_err(json_err)).collect()
    }

    async fn put_decision(&self, tenant_id: &str, decision: DecisionRecord) -> StoreResult<()> {
        let doc = serde_json::to_string(&decision).map_err(json_err)?;
        sqlx::query(
            "INSERT INTO decisions (tenant_id, decision_id, doc) VALUES (?1, ?2, ?3)
             ON CONFLICT(tenant_id, decision_id) DO UPDATE SET doc = excluded.doc",
        )
        .bind(tenant_id)
        .bind(decision.decision_id.0.to_string())
        .bind(doc)
        .execute(&self.pool)
        .await
        .map_err(sqlx_err)?;
        Ok(())
    }

    async fn get_decision(&self, tenant_id: &str, decision_id: DecisionId) -> StoreResult<Option<DecisionRecord>> {
        let row = sqlx::query("SELECT doc FROM decisions WHERE tenant_id = ?1 AND decision_id = ?2")
            .bind(tenant_id)
            .bind(decision_id.0.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(sqlx_err)?;
        row.map(|r| serde_json::from_str(&r.get::<String, _>("doc")).map_err(json_err)).transpose()
    }

    async fn put_gate(&self, gate: Gate) -> StoreResult<()> {
        let doc = serde_json::to_string(&gate).map_err(json_err)?;
        sqlx::query(
            "INSERT INTO gates (tenant_id, gate_id, doc) VALUES (?1, ?2, ?3)
             ON CONFLICT(tenant_id, gate_id) DO UPDATE SET doc = excluded.doc",
        )
        .bind(&gate.tenant_id)
        .bind(gate.gate_id.0.to_string())
        .bind(doc)
        .execute(&self.pool)
        .await
        .map_err(sqlx_err)?;
        Ok(())
    }

    async fn get_gate(&self, tenant_id: &str, gate_id: GateId) -> StoreResult<Option<Gate>> {
        let row = sqlx::query("SELECT doc FROM gates WHERE tenant_id = ?1 AND gate_id = ?2")
            .bind(tenant_id)
            .bind(gate_id.0.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(sqlx_err)?;
        row.map(|r| serde_json::from_str(&r.get::<String, _>("doc")).map_err(json_err)).transpose()
    }

    async fn put_escalation(&self, tenant_id: &str, escalation: Escalation) -> StoreResult<()> {
        let doc = serde_json::to_string(&escalation).map_err(json_err)?;
        let status = serde_json::to_value(escalation.status).map_err(json_err)?.as_str().unwrap_or_default().to_string();
        sqlx::query(
            "INSERT INTO escalations (tenant_id, escalation_id, gate_id, status, doc) VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(tenant_id, escalation_id) DO UPDATE SET status = excluded.status, doc = excluded.doc",
        )
        .bind(tenant_id)
        .bind(escalation.escalation_id.0.to_string())
        .bind(escalation.gate_id.0.to_string())
        .bind(status)
        .bind(doc)
        .execute(&self.pool)
        .await
        .map_err(sqlx_err)?;
        Ok(())
    }

    async fn get_escalation(&self, tenant_id: &str, escalation_id: EscalationId) -> StoreResult<Option<Escalation>> {
        let row = sqlx::query("SELECT doc FROM escalations WHERE tenant_id = ?1 AND escalation_id = ?2")
            .bind(tenant_id)
            .bind(escalation_id.0.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(sqlx_err)?;
        row.map(|r| serde_json::from_str(&r.get::<String, _>("doc")).map_err(json_err)).transpose()
    }

    async fn get_pending_escalation_for_gate(&self, tenant_id: &str, gate_id: GateId) -> StoreResult<Option<Escalation>> {
        let row = sqlx::query(
            "SELECT doc FROM escalations WHERE tenant_id = ?1 AND gate_id = ?2 AND status = 'pending' ORDER BY rowid DESC LIMIT 1",
        )
        .bind(tenant_id)
        .bind(gate_id.0.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(sqlx_err)?;
        row.map(|r| serde_json::from_str(&r.get::<String, _>("doc")).map_err(json_err)).transpose()
    }

    async fn append_event(&self, tenant_id: &str, event: ChainedEvent) -> StoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(sqlx_err)?;
        let next_seq: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(seq), -1) + 1 FROM events WHERE tenant_id = ?1 AND stream_id = ?2")
            .bind(tenant_id)
            .bind(&event.stream_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(sqlx_err)?;
        let doc = serde_json::to_string(&event).map_err(json_err)?;
        sqlx::query(
            "INSERT INTO events (tenant_id, stream_id, event_id, seq, event_type, doc) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(tenant_id, stream_id, event_id) DO NOTHING",
        )
        .bind(tenant_id)
        .bind(&event.stream_id)
        .bind(&event.id)
        .bind(next_seq)
        .bind(&event.event_type)
        .bind(doc)
        .execute(&mut *tx)
        .await
        .map_err(sqlx_err)?;
        tx.commit().await.map_err(sqlx_err)?;
        Ok(())
    }

    async fn get_stream_head(&self, tenant_id: &str, stream_id: &str) -> StoreResult<Option<ChainedEvent>> {
        let row = sqlx::query("SELECT doc FROM events WHERE tenant_id = ?1 AND stream_id = ?2 ORDER BY seq DESC LIMIT 1")
            .bind(tenant_id)
            .bind(stream_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(sqlx_err)?;
        row.map(|r| serde_json::from_str(&r.get::<String, _>("doc")).map_err(json_err)).transpose()
    }

    async fn list_events(
        &self,
        tenant_id: &str,
        stream_id: &str,
        since_event_id: Option<&str>,
        event_type: Option<&str>,
        limit: usize,
    ) -> StoreResult<EventPage> {
        let head_row = sqlx::query("SELECT event_id FROM events WHERE tenant_id = ?1 AND stream_id = ?2 ORDER BY seq DESC LIMIT 1")
            .bind(tenant_id)
            .bind(stream_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(sqlx_err)?;
        let head_event_id: Option<String> = head_row.map(|r| r.get::<String, _>("event_id"));

        let start_seq: i64 = match since_event_id {
            None => 0,
            Some("null") => 0,
            Some(cursor) => {
                let row = sqlx::query("SELECT seq FROM events WHERE tenant_id = ?1 AND stream_id = ?2 AND event_id = ?3")
                    .bind(tenant_id)
                    .bind(stream_id)
                    .bind(cursor)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(sqlx_err)?;
                match row {
                    Some(r) => r.get::<i64, _>("seq") + 1,
                    None => return Err(StoreError::NotFound(format!("cursor {cursor} not found in stream {stream_id}"))),
                }
            }
        };

        let rows = match event_type {
            Some(kind) => {
                sqlx::query(
                    "SELECT doc FROM events WHERE tenant_id = ?1 AND stream_id = ?2 AND seq >= ?3 AND event_type = ?4 ORDER BY seq ASC LIMIT ?5",
                )
                .bind(tenant_id)
                .bind(stream_id)
                .bind(start_seq)
                .bind(kind)
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await
                .map_err(sqlx_err)?
            }
            None => {
                sqlx::query("SELECT doc FROM events WHERE tenant_id = ?1 AND stream_id = ?2 AND seq >= ?3 ORDER BY seq ASC LIMIT ?4")
                    .bind(tenant_id)
                    .bind(stream_id)
                    .bind(start_seq)
                    .bind(limit as i64)
                    .fetch_all(&self.pool)
                    .await
                    .map_err(sqlx_err)?
            }
        };

        let mut events = Vec::with_capacity(rows.len());
        for row in rows {
            let doc: String = row.get("doc");
            events.push(serde_json::from_str::<ChainedEvent>(&doc).map_err(json_err)?);
        }

        // §9 Open Question decision: even a filtered, empty page advances the
        // cursor to the current head, for every event kind.
        let next_since_event_id = events.last().map(|e| e.id.clone()).or_else(|| head_event_id.clone()).unwrap_or_else(|| "null".to_string());

        Ok(EventPage { events, next_since_event_id, head_event_id })
    }

    async fn idempotency_check(&self, key: &IdempotencyKey, _request_fingerprint: &str) -> StoreResult<Option<IdempotencyRecord>> {
        let row = sqlx::query(
            "SELECT request_fingerprint, response_status, response_body, stored_at, expires_at FROM idempotency_keys
             WHERE tenant_id = ?1 AND method = ?2 AND path = ?3 AND idempotency_key = ?4",
        )
        .bind(&key.tenant_id)
        .bind(&key.method)
        .bind(&key.path)
        .bind(&key.idempotency_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(sqlx_err)?;

        let Some(row) = row else { return Ok(None) };
        let expires_at: DateTime<Utc> = row.get("expires_at");
        if Utc::now() >= expires_at {
            return Ok(None);
        }
        let response_body: String = row.get("response_body");
        Ok(Some(IdempotencyRecord {
            request_fingerprint: row.get("request_fingerprint"),
            response_status: row.get::<i64, _>("response_status") as u16,
            response_body: serde_json::from_str(&response_body).map_err(json_err)?,
            stored_at: row.get("stored_at"),
            expires_at,
        }))
    }

    async fn idempotency_put(
        &self,
        key: IdempotencyKey,
        request_fingerprint: String,
        status: u16,
        body: serde_json::Value,
        ttl: Duration,
    ) -> StoreResult<IdempotencyOutcome> {
        let existing = sqlx::query(
            "SELECT request_fingerprint, response_status, response_body, stored_at, expires_at FROM idempotency_keys
             WHERE tenant_id = ?1 AND method = ?2 AND path = ?3 AND idempotency_key = ?4",
        )
        .bind(&key.tenant_id)
        .bind(&key.method)
        .bind(&key.path)
        .bind(&key.idempotency_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(sqlx_err)?;

        if let Some(row) = existing {
            let expires_at: DateTime<Utc> = row.get("expires_at");
            if Utc::now() < expires_at {
                let stored_fingerprint: String = row.get("request_fingerprint");
                let response_body: String = row.get("response_body");
                let record = IdempotencyRecord {
                    request_fingerprint: stored_fingerprint.clone(),
                    response_status: row.get::<i64, _>("response_status") as u16,
                    response_body: serde_json::from_str(&response_body).map_err(json_err)?,
                    stored_at: row.get("stored_at"),
                    expires_at,
                };
                return if stored_fingerprint == request_fingerprint {
                    Ok(IdempotencyOutcome::Replay(record))
                } else {
                    Ok(IdempotencyOutcome::Conflict(record))
                };
            }
        }

        let record = IdempotencyRecord::new(request_fingerprint, status, body, ttl);
        let body_text = serde_json::to_string(&record.response_body).map_err(json_err)?;
        sqlx::query(
            "INSERT INTO idempotency_keys
                (tenant_id, method, path, idempotency_key, request_fingerprint, response_status, response_body, stored_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(tenant_id, method, path, idempotency_key) DO UPDATE SET
                request_fingerprint = excluded.request_fingerprint,
                response_status = excluded.response_status,
                response_body = excluded.response_body,
                stored_at = excluded.stored_at,
                expires_at = excluded.expires_at",
        )
        .bind(&key.tenant_id)
        .bind(&key.method)
        .bind(&key.path)
        .bind(&key.idempotency_key)
        .bind(&record.request_fingerprint)
        .bind(record.response_status as i64)
        .bind(body_text)
        .bind(record.stored_at)
        .bind(record.expires_at)
        .execute(&self.pool)
        .await
        .map_err(sqlx_err)?;

        Ok(IdempotencyOutcome::Stored)
    }

    fn gate_locks(&self) -> &KeyedLocks {
        &self.gate_locks
    }

    fn stream_locks(&self) -> &KeyedLocks {
        &self.stream_locks
    }

    fn wallet_locks(&self) -> &KeyedLocks {
        &self.wallet_locks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use settld_types::{AgentStatus, KeyId, TenantId};

    async fn test_store() -> SqliteStore {
        let config = DatabaseConfig { database_url: "sqlite::memory:".to_string(), max_connections: 1, acquire_timeout_secs: 5 };
        let store = SqliteStore::connect(&config).await.unwrap();
        store.migrate().await.unwrap();
        store
    }

    fn agent(tenant: &str) -> AgentIdentity {
        AgentIdentity {
            schema_version: 1,
            agent_id: AgentId::new(),
            tenant_id: tenant.to_string() as TenantId,
            owner: "owner".into(),
            public_key_pem: "pem".into(),
            key_id: KeyId::new("k".into()),
            capabilities: vec![],
            status: AgentStatus::Active,
            created_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn agents_are_tenant_scoped() {
        let store = test_store().await;
        let a = agent("tenant-a");
        let id = a.agent_id;
        store.put_agent(a).await.unwrap();
        assert!(store.get_agent("tenant-a", id).await.unwrap().is_some());
        assert!(store.get_agent("tenant-b", id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn wallet_round_trips() {
        let store = test_store().await;
        let agent_id = AgentId::new();
        let wallet = Wallet { tenant_id: "t".into(), agent_id, currency: Currency::Usd, available_cents: 500, escrow_locked_cents: 0, total_debited_cents: 0 };
        store.put_wallet(wallet).await.unwrap();
        let fetched = store.get_wallet("t", agent_id, Currency::Usd).await.unwrap().unwrap();
        assert_eq!(fetched.available_cents, 500);
    }

    #[tokio::test]
    async fn claim_settlement_is_at_most_once() {
        let store = test_store().await;
        let r1 = ReceiptId::new();
        let r2 = ReceiptId::new();
        let first = store.claim_settlement("t", "hash-1", r1).await.unwrap();
        assert!(matches!(first, ClaimOutcome::Claimed));
        let second = store.claim_settlement("t", "hash-1", r2).await.unwrap();
        match second {
            ClaimOutcome::AlreadyClaimed(id) => assert_eq!(id, r1),
            _ => panic!("expected AlreadyClaimed"),
        }
    }

    #[tokio::test]
    async fn grant_revocation_and_spend_tracking() {
        let store = test_store().await;
        let grant_id = GrantId::new();
        assert!(!store.is_grant_revoked("t", grant_id).await.unwrap());
        assert_eq!(store.grant_spent_cents("t", grant_id).await.unwrap(), 0);

        let grant = Grant {
            schema_version: 1,
            grant_id,
            tenant_id: "t".into(),
            kind: settld_types::GrantKind::Authority,
            principal_ref: "owner-1".into(),
            grantee_agent_id: AgentId::new(),
            scope: vec!["tool:*".into()],
            spend_envelope: settld_types::SpendEnvelope { max_total_cents: 10_000, max_per_call_cents: 1_000, currency: Currency::Usd },
            validity: settld_types::Validity {
                iat: chrono::Utc::now(),
                nbf: chrono::Utc::now(),
                exp: chrono::Utc::now() + chrono::Duration::days(1),
            },
            chain_binding: settld_types::ChainBinding { depth: 0, max_depth: 1 },
            parent_grant_id: None,
            parent_grant_hash: None,
            grant_hash: "gh".into(),
            signature_base64: "sig".into(),
            signer_key_id: "k".into(),
        };
        store.put_grant(grant).await.unwrap();
        store.record_grant_spend("t", grant_id, 100).await.unwrap();
        assert_eq!(store.grant_spent_cents("t", grant_id).await.unwrap(), 100);

        store.revoke_grant("t", grant_id).await.unwrap();
        assert!(store.is_grant_revoked("t", grant_id).await.unwrap());
    }

    #[tokio::test]
    async fn idempotency_replay_vs_conflict() {
        let store = test_store().await;
        let key = IdempotencyKey::new("t", "POST", "/x402/gate/create", "idem-1");
        let out1 = store
            .idempotency_put(key.clone(), "fp-a".into(), 201, serde_json::json!({"ok": true}), Duration::seconds(60))
            .await
            .unwrap();
        assert!(matches!(out1, IdempotencyOutcome::Stored));

        let replay = store
            .idempotency_put(key.clone(), "fp-a".into(), 201, serde_json::json!({"ok": true}), Duration::seconds(60))
            .await
            .unwrap();
        assert!(matches!(replay, IdempotencyOutcome::Replay(_)));

        let conflict = store
            .idempotency_put(key, "fp-b".into(), 201, serde_json::json!({"ok": false}), Duration::seconds(60))
            .await
            .unwrap();
        assert!(matches!(conflict, IdempotencyOutcome::Conflict(_)));
    }

    #[tokio::test]
    async fn cursor_not_found_is_an_error() {
        let store = test_store().await;
        let result = store.list_events("t", "stream-1", Some("missing"), None, 10).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn filtered_empty_page_still_advances_cursor_to_head() {
        let store = test_store().await;
        let make_event = |id: &str, prev: &str, kind: &str| ChainedEvent {
            v: 1,
            id: id.to_string(),
            stream_id: "s1".into(),
            event_type: kind.to_string(),
            at: chrono::Utc::now(),
            actor: "agent_x".into(),
            payload: serde_json::json!({}),
            payload_hash: "ph".into(),
            prev_chain_hash: prev.to_string(),
            chain_hash: format!("ch-{id}"),
            signature: None,
        };
        store.append_event("t", make_event("e1", "null", "OTHER_KIND")).await.unwrap();
        let page = store.list_events("t", "s1", None, Some("TASK_STARTED"), 10).await.unwrap();
        assert!(page.events.is_empty());
        assert_eq!(page.next_since_event_id, "e1");
    }
}
