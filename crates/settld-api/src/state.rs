//! Shared application state (grounded on the teacher's `openibank-api::state::AppState`
//! shape: one `Arc`-wrapped struct handed to every handler via axum's `State` extractor).

use std::sync::Arc;

use settld_crypto::vault::KeyVault;
use settld_eventlog::EventLog;
use settld_gate::GateService;
use settld_grants::GrantValidator;
use settld_ledger::Ledger;
use settld_policy::PolicyTable;
use settld_store::Store;

use crate::idempotency::IdempotencyTtl;

/// Everything a handler needs, constructed once at startup by `settld-server` and
/// cloned per request (every field is an `Arc` or `Copy`, so cloning is cheap).
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub vault: Arc<KeyVault>,
    pub event_log: Arc<EventLog>,
    pub ledger: Arc<Ledger>,
    pub grants: Arc<GrantValidator>,
    pub gate: Arc<GateService>,
    pub policy_table: Arc<PolicyTable>,
    pub idempotency_ttl: IdempotencyTtl,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn Store>,
        vault: Arc<KeyVault>,
        event_log: Arc<EventLog>,
        ledger: Arc<Ledger>,
        grants: Arc<GrantValidator>,
        gate: Arc<GateService>,
        policy_table: Arc<PolicyTable>,
        idempotency_ttl: IdempotencyTtl,
    ) -> Self {
        Self { store, vault, event_log, ledger, grants, gate, policy_table, idempotency_ttl }
    }

    #[cfg(test)]
    pub fn test() -> Self {
        use settld_gate::StubRailAdapter;
        use settld_policy::EscalationPolicy;
        use settld_store::memory::InMemoryStore;

        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let vault = Arc::new(KeyVault::new());
        let event_log = Arc::new(EventLog::new(store.clone()));
        let ledger = Arc::new(Ledger::new(store.clone()));
        let grants = Arc::new(GrantValidator::new(store.clone()));
        let gate = Arc::new(GateService::new(
            store.clone(),
            ledger.clone(),
            vault.clone(),
            EscalationPolicy::new(1_000_000_00),
            Arc::new(StubRailAdapter::new()),
        ));
        Self {
            store,
            vault,
            event_log,
            ledger,
            grants,
            gate,
            policy_table: Arc::new(PolicyTable::standard()),
            idempotency_ttl: IdempotencyTtl::default(),
        }
    }
}
