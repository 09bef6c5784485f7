//! In-memory [`Store`] implementation. The reference backend used by every
//! other crate's unit tests and by `settld-server` when no `DATABASE_URL` is
//! configured.

use crate::idempotency::DEFAULT_IDEMPOTENCY_TTL_SECONDS;
use crate::{ClaimOutcome, EventPage, IdempotencyKey, IdempotencyOutcome, IdempotencyRecord, KeyedLocks, Store, StoreError, StoreResult};
use async_trait::async_trait;
use chrono::Duration;
use dashmap::DashMap;
use settld_types::{
    AgentId, AgentIdentity, AgreementId, ChainedEvent, Currency, DecisionId, DecisionRecord,
    Escalation, EscalationId, EscalationStatus, Gate, GateId, Grant, GrantId, ManifestId,
    ReceiptId, SettlementReceipt, ToolCallAgreement, ToolCallEvidence, ToolId, ToolManifest,
    Wallet,
};

type TenantKey = String;

#[derive(Default)]
pub struct InMemoryStore {
    agents: DashMap<(TenantKey, AgentId), AgentIdentity>,
    wallets: DashMap<(TenantKey, AgentId, Currency), Wallet>,
    grants: DashMap<(TenantKey, GrantId), Grant>,
    revoked_grants: DashMap<(TenantKey, GrantId), ()>,
    grant_spend: DashMap<(TenantKey, GrantId), i64>,
    manifests: DashMap<(TenantKey, ManifestId), ToolManifest>,
    manifest_by_tool: DashMap<(TenantKey, ToolId), ManifestId>,
    agreements: DashMap<(TenantKey, AgreementId), ToolCallAgreement>,
    evidence: DashMap<(TenantKey, AgreementId), ToolCallEvidence>,
    settlement_claims: DashMap<(TenantKey, String), ReceiptId>,
    receipts: DashMap<(TenantKey, ReceiptId), SettlementReceipt>,
    decisions: DashMap<(TenantKey, DecisionId), DecisionRecord>,
    gates: DashMap<(TenantKey, GateId), Gate>,
    escalations: DashMap<(TenantKey, EscalationId), Escalation>,
    pending_escalation_for_gate: DashMap<(TenantKey, GateId), EscalationId>,
    streams: DashMap<(TenantKey, String), Vec<ChainedEvent>>,
    idempotency: DashMap<String, IdempotencyRecord>,
    gate_locks: KeyedLocks,
    stream_locks: KeyedLocks,
    wallet_locks: KeyedLocks,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn put_agent(&self, agent: AgentIdentity) -> StoreResult<()> {
        self.agents.insert((agent.tenant_id.clone(), agent.agent_id), agent);
        Ok(())
    }

    async fn get_agent(&self, tenant_id: &str, agent_id: AgentId) -> StoreResult<Option<AgentIdentity>> {
        Ok(self.agents.get(&(tenant_id.to_string(), agent_id)).map(|r| r.clone()))
    }

    async fn get_wallet(&self, tenant_id: &str, agent_id: AgentId, currency: Currency) -> StoreResult<Option<Wallet>> {
        Ok(self.wallets.get(&(tenant_id.to_string(), agent_id, currency)).map(|r| r.clone()))
    }

    async fn put_wallet(&self, wallet: Wallet) -> StoreResult<()> {
        self.wallets.insert((wallet.tenant_id.clone(), wallet.agent_id, wallet.currency), wallet);
        Ok(())
    }

    async fn put_grant(&self, grant: Grant) -> StoreResult<()> {
        self.grants.insert((grant.tenant_id.clone(), grant.grant_id), grant);
        Ok(())
    }

    async fn get_grant(&self, tenant_id: &str, grant_id: GrantId) -> StoreResult<Option<Grant>> {
        Ok(self.grants.get(&(tenant_id.to_string(), grant_id)).map(|r| r.clone()))
    }

    async fn revoke_grant(&self, tenant_id: &str, grant_id: GrantId) -> StoreResult<()> {
        self.revoked_grants.insert((tenant_id.to_string(), grant_id), ());
        Ok(())
    }

    async fn is_grant_revoked(&self, tenant_id: &str, grant_id: GrantId) -> StoreResult<bool> {
        Ok(self.revoked_grants.contains_key(&(tenant_id.to_string(), grant_id)))
    }

    async fn grant_spent_cents(&self, tenant_id: &str, grant_id: GrantId) -> StoreResult<i64> {
        Ok(self.grant_spend.get(&(tenant_id.to_string(), grant_id)).map(|r| *r).unwrap_or(0))
    }

    async fn record_grant_spend(&self, tenant_id: &str, grant_id: GrantId, cents: i64) -> StoreResult<()> {
        *self.grant_spend.entry((tenant_id.to_string(), grant_id)).or_insert(0) += cents;
        Ok(())
    }

    async fn put_manifest(&self, manifest: ToolManifest) -> StoreResult<()> {
        let key = (manifest.tenant_id.clone(), manifest.manifest_id);
        self.manifest_by_tool.insert((manifest.tenant_id.clone(), manifest.tool_id), manifest.manifest_id);
        self.manifests.insert(key, manifest);
        Ok(())
    }

    async fn get_manifest(&self, tenant_id: &str, manifest_id: ManifestId) -> StoreResult<Option<ToolManifest>> {
        Ok(self.manifests.get(&(tenant_id.to_string(), manifest_id)).map(|r| r.clone()))
    }

    async fn get_manifest_by_tool(&self, tenant_id: &str, tool_id: ToolId) -> StoreResult<Option<ToolManifest>> {
        let Some(manifest_id) = self.manifest_by_tool.get(&(tenant_id.to_string(), tool_id)).map(|r| *r) else {
            return Ok(None);
        };
        self.get_manifest(tenant_id, manifest_id).await
    }

    async fn list_manifests(&self, tenant_id: &str) -> StoreResult<Vec<ToolManifest>> {
        Ok(self
            .manifests
            .iter()
            .filter(|e| e.key().0 == tenant_id)
            .map(|e| e.value().clone())
            .collect())
    }

    async fn put_agreement(&self, agreement: ToolCallAgreement) -> StoreResult<()> {
        self.agreements.insert((agreement.tenant_id.clone(), agreement.artifact_id), agreement);
        Ok(())
    }

    async fn get_agreement(&self, tenant_id: &str, agreement_id: AgreementId) -> StoreResult<Option<ToolCallAgreement>> {
        Ok(self.agreements.get(&(tenant_id.to_string(), agreement_id)).map(|r| r.clone()))
    }

    async fn put_evidence(&self, tenant_id: &str, evidence: ToolCallEvidence) -> StoreResult<()> {
        self.evidence.insert((tenant_id.to_string(), evidence.agreement_id), evidence);
        Ok(())
    }

    async fn get_evidence_for_agreement(&self, tenant_id: &str, agreement_id: AgreementId) -> StoreResult<Option<ToolCallEvidence>> {
        Ok(self.evidence.get(&(tenant_id.to_string(), agreement_id)).map(|r| r.clone()))
    }

    async fn claim_settlement(&self, tenant_id: &str, agreement_hash: &str, receipt_id: ReceiptId) -> StoreResult<ClaimOutcome> {
        match self.settlement_claims.entry((tenant_id.to_string(), agreement_hash.to_string())) {
            dashmap::mapref::entry::Entry::Occupied(existing) => Ok(ClaimOutcome::AlreadyClaimed(*existing.get())),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(receipt_id);
                Ok(ClaimOutcome::Claimed)
            }
        }
    }

    async fn put_receipt(&self, tenant_id: &str, receipt: SettlementReceipt) -> StoreResult<()> {
        self.receipts.insert((tenant_id.to_string(), receipt.receipt_id), receipt);
        Ok(())
    }

    async fn get_receipt(&self, tenant_id: &str, receipt_id: ReceiptId) -> StoreResult<Option<SettlementReceipt>> {
        Ok(self.receipts.get(&(tenant_id.to_string(), receipt_id)).map(|r| r.clone()))
    }

    async fn get_receipt_by_agreement_hash(&self, tenant_id: &str, agreement_hash: &str) -> StoreResult<Option<SettlementReceipt>> {
        let Some(receipt_id) = self.settlement_claims.get(&(tenant_id.to_string(), agreement_hash.to_string())).map(|r| *r) else {
            return Ok(None);
        };
        self.get_receipt(tenant_id, receipt_id).await
    }

    async fn list_receipts(&self, tenant_id: &str, limit: usize) -> StoreResult<Vec<SettlementReceipt>> {
        let mut ids: Vec<ReceiptId> = self
            .settlement_claims
            .iter()
            .filter(|e| e.key().0 == tenant_id)
            .map(|e| *e.value())
            .collect();
        ids.truncate(limit);
        let mut out = Vec::with_capacity(ids.len());
        for id in ids.drain(..) {
            if let Some(r) = self.get_receipt(tenant_id, id).await? {
                out.push(r);
            }
        }
        Ok(out)
    }

    async fn put_decision(&self, tenant_id: &str, decision: DecisionRecord) -> StoreResult<()> {
        self.decisions.insert((tenant_id.to_string(), decision.decision_id), decision);
        Ok(())
    }

    async fn get_decision(&self, tenant_id: &str, decision_id: DecisionId) -> StoreResult<Option<DecisionRecord>> {
        Ok(self.decisions.get(&(tenant_id.to_string(), decision_id)).map(|r| r.clone()))
    }

    async fn put_gate(&self, gate: Gate) -> StoreResult<()> {
        self.gates.insert((gate.tenant_id.clone(), gate.gate_id), gate);
        Ok(())
    }

    async fn get_gate(&self, tenant_id: &str, gate_id: GateId) -> StoreResult<Option<Gate>> {
        Ok(self.gates.get(&(tenant_id.to_string(), gate_id)).map(|r| r.clone()))
    }

    async fn put_escalation(&self, tenant_id: &str, escalation: Escalation) -> StoreResult<()> {
        let tenant_key = tenant_id.to_string();
        if matches!(escalation.status, EscalationStatus::Pending) {
            self.pending_escalation_for_gate.insert((tenant_key.clone(), escalation.gate_id), escalation.escalation_id);
        } else {
            self.pending_escalation_for_gate.remove(&(tenant_key.clone(), escalation.gate_id));
        }
        self.escalations.insert((tenant_key, escalation.escalation_id), escalation);
        Ok(())
    }

    async fn get_escalation(&self, tenant_id: &str, escalation_id: EscalationId) -> StoreResult<Option<Escalation>> {
        Ok(self.escalations.get(&(tenant_id.to_string(), escalation_id)).map(|r| r.clone()))
    }

    async fn get_pending_escalation_for_gate(&self, tenant_id: &str, gate_id: GateId) -> StoreResult<Option<Escalation>> {
        let Some(escalation_id) = self.pending_escalation_for_gate.get(&(tenant_id.to_string(), gate_id)).map(|r| *r) else {
            return Ok(None);
        };
        self.get_escalation(tenant_id, escalation_id).await
    }

    async fn append_event(&self, tenant_id: &str, event: ChainedEvent) -> StoreResult<()> {
        let mut stream = self.streams.entry((tenant_id.to_string(), event.stream_id.clone())).or_default();
        if stream.iter().any(|e| e.id == event.id) {
            return Ok(());
        }
        stream.push(event);
        Ok(())
    }

    async fn get_stream_head(&self, tenant_id: &str, stream_id: &str) -> StoreResult<Option<ChainedEvent>> {
        Ok(self.streams.get(&(tenant_id.to_string(), stream_id.to_string())).and_then(|s| s.last().cloned()))
    }

    async fn list_events(
        &self,
        tenant_id: &str,
        stream_id: &str,
        since_event_id: Option<&str>,
        event_type: Option<&str>,
        limit: usize,
    ) -> StoreResult<EventPage> {
        let stream = self.streams.get(&(tenant_id.to_string(), stream_id.to_string()));
        let events: Vec<ChainedEvent> = stream.as_deref().map(|v| v.to_vec()).unwrap_or_default();
        let head_event_id = events.last().map(|e| e.id.clone());

        let start_idx = match since_event_id {
            None => 0,
            Some(cursor) => {
                if cursor == "null" {
                    0
                } else {
                    match events.iter().position(|e| e.id == cursor) {
                        Some(idx) => idx + 1,
                        None => return Err(StoreError::NotFound(format!("cursor {cursor} not found in stream {stream_id}"))),
                    }
                }
            }
        };

        let filtered: Vec<ChainedEvent> = events[start_idx..]
            .iter()
            .filter(|e| event_type.map(|t| e.event_type == t).unwrap_or(true))
            .take(limit)
            .cloned()
            .collect();

        // §9 Open Question decision: even a filtered, empty page advances the
        // cursor to the current head, for every event kind.
        let next_since_event_id = filtered
            .last()
            .map(|e| e.id.clone())
            .or_else(|| head_event_id.clone())
            .unwrap_or_else(|| "null".to_string());

        Ok(EventPage { events: filtered, next_since_event_id, head_event_id })
    }

    async fn idempotency_check(&self, key: &IdempotencyKey, request_fingerprint: &str) -> StoreResult<Option<IdempotencyRecord>> {
        let Some(existing) = self.idempotency.get(&key.as_composite_string()) else {
            return Ok(None);
        };
        if existing.is_expired(chrono::Utc::now()) {
            return Ok(None);
        }
        let _ = request_fingerprint;
        Ok(Some(existing.clone()))
    }

    async fn idempotency_put(
        &self,
        key: IdempotencyKey,
        request_fingerprint: String,
        status: u16,
        body: serde_json::Value,
        ttl: Duration,
    ) -> StoreResult<IdempotencyOutcome> {
        let composite = key.as_composite_string();
        let now = chrono::Utc::now();
        match self.idempotency.entry(composite) {
            dashmap::mapref::entry::Entry::Occupied(mut existing) => {
                if existing.get().is_expired(now) {
                    let record = IdempotencyRecord::new(request_fingerprint, status, body, ttl);
                    existing.insert(record);
                    Ok(IdempotencyOutcome::Stored)
                } else if existing.get().request_fingerprint == request_fingerprint {
                    Ok(IdempotencyOutcome::Replay(existing.get().clone()))
                } else {
                    Ok(IdempotencyOutcome::Conflict(existing.get().clone()))
                }
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let record = IdempotencyRecord::new(request_fingerprint, status, body, ttl);
                slot.insert(record);
                Ok(IdempotencyOutcome::Stored)
            }
        }
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

pub const DEFAULT_TTL_SECONDS: i64 = DEFAULT_IDEMPOTENCY_TTL_SECONDS;

#[cfg(test)]
mod tests {
    use super::*;
    use settld_types::{AgentStatus, TenantId};

    fn agent(tenant: &str) -> AgentIdentity {
        AgentIdentity {
            schema_version: 1,
            agent_id: AgentId::new(),
            tenant_id: tenant.to_string() as TenantId,
            owner: "owner".into(),
            public_key_pem: "pem".into(),
            key_id: settld_types::KeyId::new("k".into()),
            capabilities: vec![],
            status: AgentStatus::Active,
            created_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn agents_are_tenant_scoped() {
        let store = InMemoryStore::new();
        let a = agent("tenant-a");
        let id = a.agent_id;
        store.put_agent(a).await.unwrap();
        assert!(store.get_agent("tenant-a", id).await.unwrap().is_some());
        assert!(store.get_agent("tenant-b", id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn claim_settlement_is_at_most_once() {
        let store = InMemoryStore::new();
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
    async fn idempotency_replay_vs_conflict() {
        let store = InMemoryStore::new();
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
        let store = InMemoryStore::new();
        let result = store.list_events("t", "stream-1", Some("missing"), None, 10).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn filtered_empty_page_still_advances_cursor_to_head() {
        let store = InMemoryStore::new();
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
