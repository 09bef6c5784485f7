//! settld-gate — the x402 payment gate state machine, escalation lifecycle,
//! and external rail adapter contract (§2 item 7, §4.8, §4.9).
//!
//! Grounded on the teacher's `openibank-escrow` state machine (`Escrow`'s
//! create/fund/release/refund/dispute shape, generalized from condition-based
//! release to the one-shot x402 lifecycle:
//! `Created -> Authorized -> Verified -> Settled`, with `Voided` branching off
//! `Authorized` and `RefundRequested -> Refunded` branching off `Settled`) and
//! on `openibank-policy`'s `PolicyCheckResult::requires_approval` as the
//! precedent for a policy trip producing a human-in-the-loop hold rather than
//! a hard failure. The rail adapter trait (`rail.rs`) generalizes the
//! teacher's `ConditionOracle` trait — an externally-pluggable decision
//! surface the state machine consults without depending on its concrete
//! backend.
//!
//! Every mutating operation acquires `store.gate_locks().acquire(gate_id)`
//! before reading the gate, matching `settld-eventlog`'s per-stream locking
//! discipline (§5): one writer at a time per gate, distinct gates independent.
//!
//! The gate's own `reversalChainHead` is a second, independent hash chain
//! alongside `settld-eventlog`'s generic per-stream log — it chains only the
//! `ReversalEvent`s appended against one gate's settled receipt, using the
//! same `chainHash = SHA256(canonical{...})` construction as
//! `settld-eventlog::ChainLinkProjection`, but keyed by gate rather than by
//! session stream.

mod rail;

pub use rail::{RailAdapter, RailStatus, SandboxRailAdapter, StubRailAdapter};

use chrono::{NaiveDate, Utc};
use dashmap::DashMap;
use serde::Serialize;
use settld_crypto::vault::KeyVault;
use settld_ledger::{Ledger, Move, WalletRef};
use settld_policy::{EscalationPolicy, PolicyTable};
use settld_settlement::{settle as run_settlement_kernel, SettlementInputs, SettlementOutcome};
use settld_store::{ClaimOutcome, Store};
use settld_types::amount::{Cents, Currency};
use settld_types::artifact::{ToolCallAgreement, ToolCallEvidence};
use settld_types::error::{Result, SettldError};
use settld_types::gate::{AuthorizationRecord, EvidenceRefs, Gate, GateState, Passport, SettlementRecord, VerificationRecord, VerificationStatus};
use settld_types::grant::Grant;
use settld_types::identity::{AgentId, EscalationId, GateId, KeyId, ReceiptId, ToolId};
use settld_types::manifest::ToolManifest;
use settld_types::receipt::{Escalation, EscalationStatus, ReversalAction, ReversalEvent};
use settld_types::SCHEMA_VERSION;
use std::sync::Arc;

/// Everything needed to run the settlement kernel against one gate's
/// verified interaction, bundled so `GateService::settle` takes one
/// argument instead of nine.
pub struct SettleArgs<'a> {
    pub agreement: &'a ToolCallAgreement,
    pub evidence: &'a ToolCallEvidence,
    pub manifest: &'a ToolManifest,
    pub grant: &'a Grant,
    pub grant_hash: &'a str,
    pub request_sha256: String,
    pub response_sha256: String,
    pub quote_sha256: Option<String>,
    pub spend_authorization_sha256: String,
    pub signer_key_id: KeyId,
}

/// What `GateService::settle` hands back: the gate in its new state plus the
/// decision/receipt it produced (or, on a replayed agreement hash, the ones
/// a prior call already produced).
pub struct SettleResult {
    pub gate: Gate,
    pub outcome: SettlementOutcome,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ReversalLinkProjection<'a> {
    event_id: String,
    gate_id: String,
    receipt_id: String,
    action: ReversalAction,
    occurred_at: chrono::DateTime<Utc>,
    prev_event_hash: &'a str,
    evidence_refs: &'a [String],
}

/// Recompute a `ReversalEvent`'s `eventHash` from the event alone (§4.10: the
/// receipt verifier walks the reversal chain independently of the gate
/// service run that produced it). Reuses the exact projection
/// `append_reversal_event` signs.
pub fn recompute_reversal_event_hash(event: &settld_types::receipt::ReversalEvent) -> Result<String> {
    settld_crypto::hash_canonical(&ReversalLinkProjection {
        event_id: event.event_id.clone(),
        gate_id: event.gate_id.clone(),
        receipt_id: event.receipt_id.clone(),
        action: event.action,
        occurred_at: event.occurred_at,
        prev_event_hash: &event.prev_event_hash,
        evidence_refs: &event.evidence_refs,
    })
    .map_err(|e| SettldError::internal(e.to_string()))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OverrideTokenProjection<'a> {
    gate_id: String,
    escalation_id: String,
    policy_version: &'a str,
    amount_cents: Cents,
}

/// The x402 state machine plus escalation lifecycle and rail wiring (§4.8,
/// §4.9). Holds no gate state of its own beyond what it reads/writes through
/// [`Store`]; the daily-authorization and consumed-override-token trackers
/// are process-local bookkeeping, not part of the persisted model (a
/// multi-process deployment would move both into the store — see DESIGN.md).
pub struct GateService {
    store: Arc<dyn Store>,
    ledger: Arc<Ledger>,
    vault: Arc<KeyVault>,
    escalation_policy: EscalationPolicy,
    rail: Arc<dyn RailAdapter>,
    daily_authorized_cents: DashMap<(String, AgentId, NaiveDate), Cents>,
    consumed_override_tokens: DashMap<String, ()>,
}

impl GateService {
    pub fn new(store: Arc<dyn Store>, ledger: Arc<Ledger>, vault: Arc<KeyVault>, escalation_policy: EscalationPolicy, rail: Arc<dyn RailAdapter>) -> Self {
        Self {
            store,
            ledger,
            vault,
            escalation_policy,
            rail,
            daily_authorized_cents: DashMap::new(),
            consumed_override_tokens: DashMap::new(),
        }
    }

    fn payer_ref(tenant_id: &str, gate: &Gate) -> WalletRef {
        WalletRef::new(tenant_id.to_string(), gate.payer, gate.currency)
    }

    fn payee_ref(tenant_id: &str, gate: &Gate) -> WalletRef {
        WalletRef::new(tenant_id.to_string(), gate.payee, gate.currency)
    }

    async fn load(&self, tenant_id: &str, gate_id: GateId) -> Result<Gate> {
        self.store
            .get_gate(tenant_id, gate_id)
            .await
            .map_err(SettldError::from)?
            .ok_or_else(|| SettldError::NotFound { resource: format!("gate {gate_id}") })
    }

    fn require_state(gate: &Gate, ok: bool) -> Result<()> {
        if ok {
            Ok(())
        } else {
            Err(SettldError::GateInvalidState { gate_id: gate.gate_id.to_string(), state: format!("{:?}", gate.state) })
        }
    }

    /// Open a new gate in `Created` state (§4.8 "a gate is opened when an
    /// agent presents a passport for a priced tool call").
    #[allow(clippy::too_many_arguments)]
    pub async fn create(
        &self,
        tenant_id: &str,
        payer: AgentId,
        payee: AgentId,
        tool_id: ToolId,
        amount_cents: Cents,
        currency: Currency,
        agent_passport: Passport,
    ) -> Result<Gate> {
        let gate = Gate {
            schema_version: SCHEMA_VERSION,
            gate_id: GateId::new(),
            tenant_id: tenant_id.to_string(),
            payer,
            payee,
            tool_id,
            amount_cents,
            currency,
            agent_passport,
            state: GateState::Created,
            authorization: None,
            verification: None,
            settlement: None,
            reversal_chain_head: "null".into(),
            created_at: Utc::now(),
        };
        self.store.put_gate(gate.clone()).await.map_err(SettldError::from)?;
        Ok(gate)
    }

    /// `Created -> Authorized` (§4.8): checks the daily authorization
    /// ceiling, reserves on the external rail, locks the payer's escrow, and
    /// records the authorization decision. A policy trip with no valid
    /// `override_token` opens a pending [`Escalation`] and fails with
    /// `ESCALATION_REQUIRED` instead of authorizing.
    pub async fn authorize(&self, tenant_id: &str, gate_id: GateId, override_token: Option<&str>) -> Result<Gate> {
        let _guard = self.store.gate_locks().acquire(&gate_id.to_string()).await;
        let mut gate = self.load(tenant_id, gate_id).await?;
        Self::require_state(&gate, gate.can_authorize())?;

        let today = Utc::now().date_naive();
        let bucket = (tenant_id.to_string(), gate.payer, today);
        let already = self.daily_authorized_cents.get(&bucket).map(|v| *v).unwrap_or(0);
        let trip = self.escalation_policy.check_authorization(gate.amount_cents, already);

        if trip.trips {
            let cleared = match override_token {
                Some(token) => self.consume_override_token(tenant_id, &gate, token).await?,
                None => false,
            };
            if !cleared {
                self.open_escalation(tenant_id, &gate, trip.reason_code.unwrap_or("POLICY_TRIP")).await?;
                return Err(SettldError::EscalationRequired);
            }
        } else {
            self.daily_authorized_cents.insert(bucket, already + gate.amount_cents);
        }

        let idempotency_key = format!("gate-authorize:{gate_id}");
        let reserve_id = self.rail.reserve(&idempotency_key, gate.amount_cents, gate.currency).await?;

        let lock_moves = [Move::Lock { wallet: Self::payer_ref(tenant_id, &gate), amount_cents: gate.amount_cents }];
        if let Err(err) = self.ledger.apply_transition(tenant_id, &format!("authorize:{gate_id}"), &lock_moves).await {
            // best-effort compensation: the rail reservation must not outlive
            // a failed escrow lock.
            let _ = self.rail.void(&idempotency_key, &reserve_id).await;
            return Err(err);
        }

        let authorized_at = Utc::now();
        let decision_token = settld_crypto::hash_canonical(&serde_json::json!({
            "gateId": gate_id.to_string(),
            "amountCents": gate.amount_cents,
            "currency": gate.currency.to_string(),
            "authorizedAt": authorized_at,
        }))
        .map_err(|e| SettldError::internal(e.to_string()))?;

        gate.authorization = Some(AuthorizationRecord { authorized_at, wallet_authorization_decision_token: decision_token, reserve_id: Some(reserve_id) });
        gate.state = GateState::Authorized;
        self.store.put_gate(gate.clone()).await.map_err(SettldError::from)?;
        tracing::info!(gate_id = %gate_id, "gate authorized");
        Ok(gate)
    }

    /// `Authorized -> Verified` (§4.8): records evidence references and the
    /// provider's self-reported verification status. `Red` never blocks the
    /// transition by itself — it is a quality signal `settle`'s caller may
    /// act on, not a hard gate.
    pub async fn verify(&self, tenant_id: &str, gate_id: GateId, status: VerificationStatus, evidence_refs: EvidenceRefs, provider_output_signature: Option<String>) -> Result<Gate> {
        let _guard = self.store.gate_locks().acquire(&gate_id.to_string()).await;
        let mut gate = self.load(tenant_id, gate_id).await?;
        Self::require_state(&gate, gate.can_verify())?;

        if status == VerificationStatus::Red {
            tracing::warn!(gate_id = %gate_id, "verification status is red");
        }

        gate.verification = Some(VerificationRecord { verified_at: Utc::now(), status, evidence_refs, provider_output_signature });
        gate.state = GateState::Verified;
        self.store.put_gate(gate.clone()).await.map_err(SettldError::from)?;
        Ok(gate)
    }

    /// `Verified -> Settled` (§4.7, §4.8): runs the pure settlement kernel,
    /// claims `agreementHash` for at-most-once settlement, applies the
    /// transfer/refund split to the ledger, and persists the decision and
    /// receipt. Replaying a settle call for an agreement hash already
    /// claimed by a prior call returns that prior outcome unchanged rather
    /// than re-running the kernel or re-applying ledger moves.
    pub async fn settle(&self, tenant_id: &str, gate_id: GateId, args: SettleArgs<'_>, policy_table: &PolicyTable) -> Result<SettleResult> {
        let _guard = self.store.gate_locks().acquire(&gate_id.to_string()).await;
        let mut gate = self.load(tenant_id, gate_id).await?;
        Self::require_state(&gate, gate.can_settle())?;

        if args.agreement.payer != gate.payer || args.agreement.payee != gate.payee || args.agreement.currency != gate.currency {
            return Err(SettldError::SettlementKernelBindingInvalid { reason: "agreement parties/currency do not match this gate".into() });
        }

        let outcome = run_settlement_kernel(
            SettlementInputs { agreement: args.agreement, evidence: args.evidence, manifest: args.manifest, grant: args.grant, grant_hash: args.grant_hash },
            policy_table,
            args.request_sha256,
            args.response_sha256,
            args.quote_sha256,
            args.spend_authorization_sha256,
            &args.signer_key_id,
            &self.vault,
        )?;

        let agreement_hash = &args.agreement.agreement_hash;
        let claim = self.store.claim_settlement(tenant_id, agreement_hash, outcome.receipt.receipt_id).await.map_err(SettldError::from)?;

        let final_outcome = match claim {
            ClaimOutcome::Claimed => {
                let mut moves = Vec::new();
                if outcome.decision.transfer_cents > 0 {
                    moves.push(Move::Release { wallet: Self::payer_ref(tenant_id, &gate), to_wallet: Self::payee_ref(tenant_id, &gate), amount_cents: outcome.decision.transfer_cents });
                }
                if outcome.decision.refund_cents > 0 {
                    moves.push(Move::Void { wallet: Self::payer_ref(tenant_id, &gate), amount_cents: outcome.decision.refund_cents });
                }
                if !moves.is_empty() {
                    self.ledger.apply_transition(tenant_id, &format!("settle:{agreement_hash}"), &moves).await?;
                }
                self.store.put_decision(tenant_id, outcome.decision.clone()).await.map_err(SettldError::from)?;
                self.store.put_receipt(tenant_id, outcome.receipt.clone()).await.map_err(SettldError::from)?;
                outcome
            }
            ClaimOutcome::AlreadyClaimed(existing_receipt_id) => {
                let receipt = self
                    .store
                    .get_receipt(tenant_id, existing_receipt_id)
                    .await
                    .map_err(SettldError::from)?
                    .ok_or_else(|| SettldError::NotFound { resource: format!("receipt {existing_receipt_id}") })?;
                let decision_id = settld_types::identity::DecisionId::parse(&receipt.decision_ref.decision_id).map_err(|e| SettldError::internal(e.to_string()))?;
                let decision = self
                    .store
                    .get_decision(tenant_id, decision_id)
                    .await
                    .map_err(SettldError::from)?
                    .ok_or_else(|| SettldError::NotFound { resource: format!("decision {}", receipt.decision_ref.decision_id) })?;
                SettlementOutcome { decision, receipt }
            }
        };

        gate.settlement = Some(SettlementRecord {
            settled_at: Utc::now(),
            receipt_id: final_outcome.receipt.receipt_id.to_string(),
            decision_id: final_outcome.decision.decision_id.to_string(),
        });
        gate.state = GateState::Settled;
        self.store.put_gate(gate.clone()).await.map_err(SettldError::from)?;
        tracing::info!(gate_id = %gate_id, decision = ?final_outcome.decision.decision, "gate settled");
        Ok(SettleResult { gate, outcome: final_outcome })
    }

    /// `Authorized -> Voided` (§4.8): releases the rail reservation and
    /// returns the locked escrow to the payer's available balance without
    /// ever debiting them.
    pub async fn void(&self, tenant_id: &str, gate_id: GateId) -> Result<Gate> {
        let _guard = self.store.gate_locks().acquire(&gate_id.to_string()).await;
        let mut gate = self.load(tenant_id, gate_id).await?;
        Self::require_state(&gate, gate.can_void())?;

        let idempotency_key = format!("gate-void:{gate_id}");
        if let Some(reserve_id) = gate.authorization.as_ref().and_then(|a| a.reserve_id.as_deref()) {
            self.rail.void(&idempotency_key, reserve_id).await?;
        }

        self.ledger
            .apply_transition(tenant_id, &format!("void:{gate_id}"), &[Move::Void { wallet: Self::payer_ref(tenant_id, &gate), amount_cents: gate.amount_cents }])
            .await?;

        gate.state = GateState::Voided;
        self.store.put_gate(gate.clone()).await.map_err(SettldError::from)?;
        Ok(gate)
    }

    /// `Settled -> RefundRequested` (§4.8): appends a `RequestRefund`
    /// [`ReversalEvent`] to the gate's reversal chain.
    pub async fn request_refund(&self, tenant_id: &str, gate_id: GateId, command_signer_key_id: &KeyId, evidence_refs: Vec<String>) -> Result<Gate> {
        let _guard = self.store.gate_locks().acquire(&gate_id.to_string()).await;
        let mut gate = self.load(tenant_id, gate_id).await?;
        Self::require_state(&gate, gate.can_request_refund())?;

        self.append_reversal_event(tenant_id, &mut gate, ReversalAction::RequestRefund, command_signer_key_id, evidence_refs).await?;
        gate.state = GateState::RefundRequested;
        self.store.put_gate(gate.clone()).await.map_err(SettldError::from)?;
        Ok(gate)
    }

    /// Resolve a pending refund request (§4.8): on approval, reverses the
    /// prior payout (payee's received amount flows back to the payer);
    /// on denial, the gate returns to `Settled`. Either way appends a
    /// `ResolveRefund` [`ReversalEvent`].
    pub async fn resolve_refund(&self, tenant_id: &str, gate_id: GateId, approve: bool, command_signer_key_id: &KeyId) -> Result<Gate> {
        let _guard = self.store.gate_locks().acquire(&gate_id.to_string()).await;
        let mut gate = self.load(tenant_id, gate_id).await?;
        Self::require_state(&gate, matches!(gate.state, GateState::RefundRequested))?;

        let settlement = gate.settlement.clone().ok_or_else(|| SettldError::internal("gate in RefundRequested with no settlement record"))?;
        let receipt_id = ReceiptId::parse(&settlement.receipt_id).map_err(|e| SettldError::internal(e.to_string()))?;

        if approve {
            let receipt = self
                .store
                .get_receipt(tenant_id, receipt_id)
                .await
                .map_err(SettldError::from)?
                .ok_or_else(|| SettldError::NotFound { resource: format!("receipt {receipt_id}") })?;
            let amount_cents = receipt.transfer.amount_cents;
            if amount_cents > 0 {
                let moves = [
                    Move::Lock { wallet: Self::payee_ref(tenant_id, &gate), amount_cents },
                    Move::Release { wallet: Self::payee_ref(tenant_id, &gate), to_wallet: Self::payer_ref(tenant_id, &gate), amount_cents },
                ];
                self.ledger.apply_transition(tenant_id, &format!("refund:{gate_id}"), &moves).await?;
            }
        }

        self.append_reversal_event(tenant_id, &mut gate, ReversalAction::ResolveRefund, command_signer_key_id, vec![]).await?;
        gate.state = if approve { GateState::Refunded } else { GateState::Settled };
        self.store.put_gate(gate.clone()).await.map_err(SettldError::from)?;
        Ok(gate)
    }

    /// Approve or deny a pending [`Escalation`] (§4.8). Approval mints a
    /// single-use `override_token` bound to `(gateId, policyVersion,
    /// amountCents)` that `authorize` accepts exactly once.
    pub async fn resolve_escalation(&self, tenant_id: &str, escalation_id: EscalationId, approve: bool) -> Result<Escalation> {
        let mut escalation = self
            .store
            .get_escalation(tenant_id, escalation_id)
            .await
            .map_err(SettldError::from)?
            .ok_or_else(|| SettldError::NotFound { resource: format!("escalation {escalation_id}") })?;
        if escalation.is_terminal() {
            return Err(SettldError::EscalationAlreadyResolved { escalation_id: escalation_id.to_string() });
        }

        if approve {
            let mac = settld_crypto::hash_canonical(&OverrideTokenProjection {
                gate_id: escalation.gate_id.to_string(),
                escalation_id: escalation_id.to_string(),
                policy_version: &escalation.policy_version,
                amount_cents: escalation.amount_cents,
            })
            .map_err(|e| SettldError::internal(e.to_string()))?;
            escalation.status = EscalationStatus::Approved;
            escalation.override_token = Some(format!("{escalation_id}:{mac}"));
        } else {
            escalation.status = EscalationStatus::Denied;
        }
        escalation.resolved_at = Some(Utc::now());
        self.store.put_escalation(tenant_id, escalation.clone()).await.map_err(SettldError::from)?;
        Ok(escalation)
    }

    async fn open_escalation(&self, tenant_id: &str, gate: &Gate, reason_code: &str) -> Result<()> {
        if self.store.get_pending_escalation_for_gate(tenant_id, gate.gate_id).await.map_err(SettldError::from)?.is_some() {
            return Ok(());
        }
        let escalation = Escalation {
            escalation_id: EscalationId::new(),
            gate_id: gate.gate_id,
            reason: reason_code.to_string(),
            status: EscalationStatus::Pending,
            override_token: None,
            policy_version: gate.agent_passport.policy_version.clone(),
            amount_cents: gate.amount_cents,
            created_at: Utc::now(),
            resolved_at: None,
        };
        self.store.put_escalation(tenant_id, escalation).await.map_err(SettldError::from)?;
        Ok(())
    }

    /// Validate and, if valid, single-use-consume an `override_token`
    /// produced by [`GateService::resolve_escalation`]. Returns `Ok(true)`
    /// only when the token is for an `Approved` escalation on this gate and
    /// has not already been consumed.
    async fn consume_override_token(&self, tenant_id: &str, gate: &Gate, token: &str) -> Result<bool> {
        let Some((escalation_id_str, _mac)) = token.split_once(':') else {
            return Ok(false);
        };
        let Ok(escalation_id) = EscalationId::parse(escalation_id_str) else {
            return Ok(false);
        };
        let Some(escalation) = self.store.get_escalation(tenant_id, escalation_id).await.map_err(SettldError::from)? else {
            return Ok(false);
        };
        if escalation.gate_id != gate.gate_id || escalation.status != EscalationStatus::Approved {
            return Ok(false);
        }
        if escalation.override_token.as_deref() != Some(token) {
            return Ok(false);
        }
        if self.consumed_override_tokens.contains_key(token) {
            return Ok(false);
        }
        self.consumed_override_tokens.insert(token.to_string(), ());
        Ok(true)
    }

    async fn append_reversal_event(&self, tenant_id: &str, gate: &mut Gate, action: ReversalAction, command_signer_key_id: &KeyId, evidence_refs: Vec<String>) -> Result<()> {
        let settlement = gate.settlement.clone().ok_or_else(|| SettldError::internal("reversal event requires a settled gate"))?;
        let receipt_id = ReceiptId::parse(&settlement.receipt_id).map_err(|e| SettldError::internal(e.to_string()))?;
        let event_id = settld_types::identity::ReversalEventId::new();
        let occurred_at = Utc::now();
        let prev_event_hash = gate.reversal_chain_head.clone();

        let projection = ReversalLinkProjection {
            event_id: event_id.to_string(),
            gate_id: gate.gate_id.to_string(),
            receipt_id: receipt_id.to_string(),
            action,
            occurred_at,
            prev_event_hash: &prev_event_hash,
            evidence_refs: &evidence_refs,
        };
        let event_hash = settld_crypto::hash_canonical(&projection).map_err(|e| SettldError::internal(e.to_string()))?;
        let command_signature_base64 = self
            .vault
            .sign(command_signer_key_id, &event_hash)
            .map_err(|e| SettldError::internal(format!("signing reversal event: {e}")))?;

        let event = ReversalEvent {
            event_id,
            gate_id: gate.gate_id,
            receipt_id,
            action,
            occurred_at,
            command_signature_base64,
            command_signer_key_id: command_signer_key_id.to_string(),
            command_verified: true,
            provider_decision_artifact: None,
            provider_decision_verified: None,
            evidence_refs,
            prev_event_hash,
            event_hash: event_hash.clone(),
        };

        if let Some(mut receipt) = self.store.get_receipt(tenant_id, receipt_id).await.map_err(SettldError::from)? {
            receipt.reversal_events.push(event);
            self.store.put_receipt(tenant_id, receipt).await.map_err(SettldError::from)?;
        }

        gate.reversal_chain_head = event_hash;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use settld_crypto::vault::KeyPurpose;
    use settld_grants::compute_grant_hash;
    use settld_marketplace::{build_agreement, build_evidence, build_tool_manifest};
    use settld_store::memory::InMemoryStore;
    use settld_types::artifact::AcceptanceCriteria;
    use settld_types::grant::{ChainBinding, GrantKind, SpendEnvelope, Validity};
    use settld_types::identity::GrantId;
    use settld_types::manifest::ToolDescriptor;

    fn passport() -> Passport {
        Passport { sponsor: "sponsor-1".into(), wallet: "wallet-1".into(), agent_key: "key-1".into(), delegation_grant_id: None, policy: "standard".into(), policy_version: "v1".into() }
    }

    fn service(max_daily_cents: Cents) -> (GateService, Arc<InMemoryStore>, Arc<KeyVault>, KeyId) {
        let store = Arc::new(InMemoryStore::new());
        let ledger = Arc::new(Ledger::new(store.clone() as Arc<dyn Store>));
        let vault = Arc::new(KeyVault::new());
        let (key_id, _pem) = vault.generate_key(KeyPurpose::ReceiptSigning).unwrap();
        let rail = Arc::new(StubRailAdapter::new());
        let svc = GateService::new(store.clone() as Arc<dyn Store>, ledger, vault.clone(), EscalationPolicy::new(max_daily_cents), rail);
        (svc, store, vault, key_id)
    }

    async fn fund(store: &Arc<InMemoryStore>, tenant_id: &str, agent_id: AgentId, currency: Currency, amount_cents: Cents) {
        let ledger = Ledger::new(store.clone() as Arc<dyn Store>);
        ledger
            .apply_transition(tenant_id, &format!("fund:{agent_id}"), &[Move::Credit { wallet: WalletRef::new(tenant_id.to_string(), agent_id, currency), amount_cents }])
            .await
            .unwrap();
    }

    fn fixture_grant(vault: &KeyVault, key_id: &KeyId, grantee: AgentId) -> (Grant, String) {
        let mut grant = Grant {
            schema_version: SCHEMA_VERSION,
            grant_id: GrantId::new(),
            tenant_id: "t".into(),
            kind: GrantKind::Authority,
            principal_ref: "owner-1".into(),
            grantee_agent_id: grantee,
            scope: vec!["tool:call".into()],
            spend_envelope: SpendEnvelope { currency: Currency::Usd, max_per_call_cents: 10_000, max_total_cents: 100_000 },
            validity: Validity { iat: Utc::now(), nbf: Utc::now(), exp: Utc::now() + chrono::Duration::days(1) },
            chain_binding: ChainBinding { depth: 0, max_depth: 4 },
            parent_grant_id: None,
            parent_grant_hash: None,
            grant_hash: String::new(),
            signature_base64: String::new(),
            signer_key_id: key_id.to_string(),
        };
        let hash = compute_grant_hash(&grant).unwrap();
        grant.grant_hash = hash.clone();
        grant.signature_base64 = vault.sign(key_id, &hash).unwrap();
        (grant, hash)
    }

    fn settle_args<'a>(key_id: &KeyId, agreement: &'a ToolCallAgreement, evidence: &'a ToolCallEvidence, manifest: &'a ToolManifest, grant: &'a Grant, grant_hash: &'a str) -> SettleArgs<'a> {
        SettleArgs {
            agreement,
            evidence,
            manifest,
            grant,
            grant_hash,
            request_sha256: "req-hash".into(),
            response_sha256: "resp-hash".into(),
            quote_sha256: None,
            spend_authorization_sha256: "spend-hash".into(),
            signer_key_id: key_id.clone(),
        }
    }

    #[tokio::test]
    async fn happy_path_created_to_settled() {
        let (svc, store, vault, key_id) = service(1_000_000);
        let payer = AgentId::new();
        let payee = AgentId::new();
        fund(&store, "t", payer, Currency::Usd, 10_000).await;

        let gate = svc.create("t", payer, payee, ToolId::new(), 1000, Currency::Usd, passport()).await.unwrap();
        assert_eq!(gate.state, GateState::Created);

        let gate = svc.authorize("t", gate.gate_id, None).await.unwrap();
        assert_eq!(gate.state, GateState::Authorized);

        let gate = svc
            .verify("t", gate.gate_id, VerificationStatus::Green, EvidenceRefs { request_sha256: "r".into(), response_sha256: "s".into() }, None)
            .await
            .unwrap();
        assert_eq!(gate.state, GateState::Verified);

        let manifest = build_tool_manifest(
            "t",
            gate.tool_id,
            ToolDescriptor { name: "tool".into(), description: "d".into(), input_schema_ref: "s://in".into(), output_schema_ref: "s://out".into() },
            settld_types::manifest::Transport::Http,
            None,
            None,
            vec![Currency::Usd],
            vec![],
            &key_id,
            &vault,
        )
        .unwrap();
        let (grant, grant_hash) = fixture_grant(&vault, &key_id, payer);
        let criteria = AcceptanceCriteria { max_latency_ms: 2000, require_output: true, max_output_bytes: 4096, policy_fingerprint: "standard".into() };
        let agreement = build_agreement("t", gate.tool_id, manifest.manifest_hash.clone(), grant.grant_id, grant_hash.clone(), payer, payee, 1000, Currency::Usd, "call-1", "input-hash".into(), criteria, &key_id, &vault).unwrap();
        let started = Utc::now();
        let output = serde_json::json!({"ok": true});
        let evidence = build_evidence(&agreement, output.clone(), settld_crypto::hash_canonical(&output).unwrap(), started, started + chrono::Duration::milliseconds(100), &key_id, &vault).unwrap();

        let args = settle_args(&key_id, &agreement, &evidence, &manifest, &grant, &grant_hash);
        let result = svc.settle("t", gate.gate_id, args, &PolicyTable::standard()).await.unwrap();
        assert_eq!(result.gate.state, GateState::Settled);
        assert_eq!(result.outcome.decision.transfer_cents, 1000);

        let payee_wallet = store.get_wallet("t", payee, Currency::Usd).await.unwrap().unwrap();
        assert_eq!(payee_wallet.available_cents, 1000);
        let payer_wallet = store.get_wallet("t", payer, Currency::Usd).await.unwrap().unwrap();
        assert_eq!(payer_wallet.escrow_locked_cents, 0);
    }

    #[tokio::test]
    async fn authorize_over_ceiling_requires_escalation_then_override_clears_it() {
        let (svc, store, _vault, _key_id) = service(500);
        let payer = AgentId::new();
        let payee = AgentId::new();
        fund(&store, "t", payer, Currency::Usd, 10_000).await;

        let gate = svc.create("t", payer, payee, ToolId::new(), 1000, Currency::Usd, passport()).await.unwrap();
        let err = svc.authorize("t", gate.gate_id, None).await.unwrap_err();
        assert_eq!(err.error_code(), "ESCALATION_REQUIRED");

        let escalation = store.get_pending_escalation_for_gate("t", gate.gate_id).await.unwrap().unwrap();
        let resolved = svc.resolve_escalation("t", escalation.escalation_id, true).await.unwrap();
        let token = resolved.override_token.unwrap();

        let gate = svc.authorize("t", gate.gate_id, Some(&token)).await.unwrap();
        assert_eq!(gate.state, GateState::Authorized);

        // the token is single-use: a second gate can't reuse it.
        let gate2 = svc.create("t", payer, payee, ToolId::new(), 1000, Currency::Usd, passport()).await.unwrap();
        let err2 = svc.authorize("t", gate2.gate_id, Some(&token)).await.unwrap_err();
        assert_eq!(err2.error_code(), "ESCALATION_REQUIRED");
    }

    #[tokio::test]
    async fn void_returns_escrow_without_debiting() {
        let (svc, store, _vault, _key_id) = service(1_000_000);
        let payer = AgentId::new();
        let payee = AgentId::new();
        fund(&store, "t", payer, Currency::Usd, 10_000).await;

        let gate = svc.create("t", payer, payee, ToolId::new(), 1000, Currency::Usd, passport()).await.unwrap();
        let gate = svc.authorize("t", gate.gate_id, None).await.unwrap();
        let gate = svc.void("t", gate.gate_id).await.unwrap();
        assert_eq!(gate.state, GateState::Voided);

        let payer_wallet = store.get_wallet("t", payer, Currency::Usd).await.unwrap().unwrap();
        assert_eq!(payer_wallet.available_cents, 10_000);
        assert_eq!(payer_wallet.escrow_locked_cents, 0);
        assert_eq!(payer_wallet.total_debited_cents, 0);
    }

    #[tokio::test]
    async fn out_of_state_transitions_are_rejected() {
        let (svc, store, _vault, _key_id) = service(1_000_000);
        let payer = AgentId::new();
        let payee = AgentId::new();
        fund(&store, "t", payer, Currency::Usd, 10_000).await;
        let gate = svc.create("t", payer, payee, ToolId::new(), 1000, Currency::Usd, passport()).await.unwrap();

        let err = svc
            .verify("t", gate.gate_id, VerificationStatus::Green, EvidenceRefs { request_sha256: "r".into(), response_sha256: "s".into() }, None)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "GATE_INVALID_STATE");

        let err = svc.void("t", gate.gate_id).await.unwrap_err();
        assert_eq!(err.error_code(), "GATE_INVALID_STATE");
    }

    #[tokio::test]
    async fn refund_request_and_approval_reverses_payout() {
        let (svc, store, vault, key_id) = service(1_000_000);
        let payer = AgentId::new();
        let payee = AgentId::new();
        fund(&store, "t", payer, Currency::Usd, 10_000).await;

        let gate = svc.create("t", payer, payee, ToolId::new(), 1000, Currency::Usd, passport()).await.unwrap();
        let gate = svc.authorize("t", gate.gate_id, None).await.unwrap();
        let gate = svc
            .verify("t", gate.gate_id, VerificationStatus::Green, EvidenceRefs { request_sha256: "r".into(), response_sha256: "s".into() }, None)
            .await
            .unwrap();

        let manifest = build_tool_manifest(
            "t",
            gate.tool_id,
            ToolDescriptor { name: "tool".into(), description: "d".into(), input_schema_ref: "s://in".into(), output_schema_ref: "s://out".into() },
            settld_types::manifest::Transport::Http,
            None,
            None,
            vec![Currency::Usd],
            vec![],
            &key_id,
            &vault,
        )
        .unwrap();
        let (grant, grant_hash) = fixture_grant(&vault, &key_id, payer);
        let criteria = AcceptanceCriteria { max_latency_ms: 2000, require_output: true, max_output_bytes: 4096, policy_fingerprint: "standard".into() };
        let agreement = build_agreement("t", gate.tool_id, manifest.manifest_hash.clone(), grant.grant_id, grant_hash.clone(), payer, payee, 1000, Currency::Usd, "call-1", "input-hash".into(), criteria, &key_id, &vault).unwrap();
        let started = Utc::now();
        let output = serde_json::json!({"ok": true});
        let evidence = build_evidence(&agreement, output.clone(), settld_crypto::hash_canonical(&output).unwrap(), started, started + chrono::Duration::milliseconds(100), &key_id, &vault).unwrap();
        let args = settle_args(&key_id, &agreement, &evidence, &manifest, &grant, &grant_hash);
        let result = svc.settle("t", gate.gate_id, args, &PolicyTable::standard()).await.unwrap();

        let gate = svc.request_refund("t", result.gate.gate_id, &key_id, vec!["evidence-1".into()]).await.unwrap();
        assert_eq!(gate.state, GateState::RefundRequested);
        assert_ne!(gate.reversal_chain_head, "null");

        let gate = svc.resolve_refund("t", gate.gate_id, true, &key_id).await.unwrap();
        assert_eq!(gate.state, GateState::Refunded);

        let payer_wallet = store.get_wallet("t", payer, Currency::Usd).await.unwrap().unwrap();
        assert_eq!(payer_wallet.available_cents, 10_000);
        let payee_wallet = store.get_wallet("t", payee, Currency::Usd).await.unwrap().unwrap();
        assert_eq!(payee_wallet.available_cents, 0);
    }
}
