//! settld-ledger — the escrow ledger (§2 item 6, §4.5).
//!
//! Grounded on the teacher's `openibank-ledger::Ledger` (checked-arithmetic
//! credit/debit/transfer over an `Arc<RwLock<HashMap<...>>>`) generalized from
//! a single running balance per account to the three-counter wallet the spec
//! requires (`availableCents`/`escrowLockedCents`/`totalDebitedCents`), and
//! from the teacher's single-entry-type `credit`/`debit` to the five typed
//! moves §4.5 names (`credit`/`lock`/`release`/`refund`/`void`). Wallet
//! locking follows `openibank-db/src/repos/wallet.rs`'s "lock accounts in a
//! deterministic order before a multi-account transition" discipline, ported
//! onto `settld-store::KeyedLocks` instead of a `SELECT ... FOR UPDATE`.

use dashmap::DashMap;
use settld_store::Store;
use settld_types::{AgentId, Currency, Result, SettldError, TenantId, Wallet};
use std::sync::Arc;

/// Identifies a wallet by its natural key (there is no surrogate `walletId`
/// in the data model — §3 keys a wallet by `(agentId, currency)`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WalletRef {
    pub tenant_id: TenantId,
    pub agent_id: AgentId,
    pub currency: Currency,
}

impl WalletRef {
    pub fn new(tenant_id: impl Into<TenantId>, agent_id: AgentId, currency: Currency) -> Self {
        Self { tenant_id: tenant_id.into(), agent_id, currency }
    }

    fn sort_key(&self) -> String {
        format!("{}|{}|{}", self.tenant_id, self.agent_id, self.currency)
    }

    fn display(&self) -> String {
        format!("{}:{}", self.agent_id, self.currency)
    }
}

/// One leg of a ledger transition (§4.5). A transition is a list of moves
/// that all apply or none do.
#[derive(Debug, Clone)]
pub enum Move {
    /// Increase `available` — funding a wallet.
    Credit { wallet: WalletRef, amount_cents: i64 },
    /// Move `amount` from `available` into `escrowLocked` on the same wallet.
    Lock { wallet: WalletRef, amount_cents: i64 },
    /// Move `amount` out of `wallet.escrowLocked` into `toWallet.available`,
    /// recording it against `wallet.totalDebited` — the payer-to-payee payout.
    Release { wallet: WalletRef, to_wallet: WalletRef, amount_cents: i64 },
    /// Move `amount` out of `wallet.escrowLocked` into `toWallet.available`
    /// without touching `totalDebited` — returning escrow to its origin.
    Refund { wallet: WalletRef, to_wallet: WalletRef, amount_cents: i64 },
    /// Cancel a lock: move `amount` from `escrowLocked` back to `available`
    /// on the same wallet.
    Void { wallet: WalletRef, amount_cents: i64 },
}

impl Move {
    fn touched_wallets(&self) -> Vec<&WalletRef> {
        match self {
            Move::Credit { wallet, .. } | Move::Lock { wallet, .. } | Move::Void { wallet, .. } => vec![wallet],
            Move::Release { wallet, to_wallet, .. } | Move::Refund { wallet, to_wallet, .. } => vec![wallet, to_wallet],
        }
    }

    fn amount_cents(&self) -> i64 {
        match self {
            Move::Credit { amount_cents, .. }
            | Move::Lock { amount_cents, .. }
            | Move::Release { amount_cents, .. }
            | Move::Refund { amount_cents, .. }
            | Move::Void { amount_cents, .. } => *amount_cents,
        }
    }

    fn currencies(&self) -> Vec<Currency> {
        self.touched_wallets().into_iter().map(|w| w.currency).collect()
    }
}

/// The escrow ledger. Holds no state of its own beyond the in-process
/// transition-replay cache; wallet balances live entirely in the [`Store`].
pub struct Ledger {
    store: Arc<dyn Store>,
    /// `"{tenantId}:{transitionId}"` → the wallets that transition produced,
    /// so a replayed transition id is a no-op that returns the same result
    /// instead of re-applying (§4.5: "replaying the same id is a no-op"). A
    /// persisted `Store` backend should additionally enforce this with a
    /// unique constraint on `transition_id`; this cache only covers the
    /// lifetime of one process.
    applied: DashMap<String, Vec<Wallet>>,
}

impl Ledger {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store, applied: DashMap::new() }
    }

    /// Apply every move in `moves` as a single balanced transition, keyed by
    /// `transition_id` for at-most-once replay. All moves apply or none do:
    /// the first validation failure (currency mismatch, non-positive amount,
    /// insufficient balance) aborts before any wallet is written.
    pub async fn apply_transition(&self, tenant_id: &str, transition_id: &str, moves: &[Move]) -> Result<Vec<Wallet>> {
        let cache_key = format!("{tenant_id}:{transition_id}");
        if let Some(cached) = self.applied.get(&cache_key) {
            return Ok(cached.clone());
        }

        for mv in moves {
            if mv.amount_cents() <= 0 {
                return Err(SettldError::InvalidInput { message: "ledger move amount must be positive".into() });
            }
            let currencies = mv.currencies();
            if let [a, b] = currencies[..] {
                if a != b {
                    return Err(SettldError::CurrencyMismatch { expected: a.to_string(), actual: b.to_string() });
                }
            }
        }

        let mut touched: Vec<WalletRef> = moves.iter().flat_map(|m| m.touched_wallets().into_iter().cloned()).collect();
        touched.sort_by_key(|w| w.sort_key());
        touched.dedup();

        let mut guards = Vec::with_capacity(touched.len());
        for wallet_ref in &touched {
            guards.push(self.store.wallet_locks().acquire(&wallet_ref.sort_key()).await);
        }

        let mut wallets = std::collections::HashMap::new();
        for wallet_ref in &touched {
            let wallet = self
                .store
                .get_wallet(tenant_id, wallet_ref.agent_id, wallet_ref.currency)
                .await
                .map_err(SettldError::from)?
                .unwrap_or_else(|| Wallet::new(tenant_id.to_string(), wallet_ref.agent_id, wallet_ref.currency));
            wallets.insert(wallet_ref.clone(), wallet);
        }

        for mv in moves {
            apply_move(&mut wallets, mv)?;
        }

        for wallet in wallets.values() {
            if !wallet.is_consistent() {
                return Err(SettldError::internal(format!(
                    "ledger transition {transition_id} would leave wallet {}:{} inconsistent",
                    wallet.agent_id, wallet.currency
                )));
            }
        }

        let result: Vec<Wallet> = touched.iter().map(|w| wallets.get(w).cloned().expect("wallet loaded above")).collect();
        for wallet in &result {
            self.store.put_wallet(wallet.clone()).await.map_err(SettldError::from)?;
        }

        tracing::info!(tenant_id, transition_id, wallets = touched.len(), "ledger transition applied");
        self.applied.insert(cache_key, result.clone());
        drop(guards);
        Ok(result)
    }
}

fn apply_move(wallets: &mut std::collections::HashMap<WalletRef, Wallet>, mv: &Move) -> Result<()> {
    match mv {
        Move::Credit { wallet, amount_cents } => {
            let w = wallets.get_mut(wallet).expect("wallet preloaded");
            w.available_cents = checked_add(w.available_cents, *amount_cents, wallet)?;
        }
        Move::Lock { wallet, amount_cents } => {
            let w = wallets.get_mut(wallet).expect("wallet preloaded");
            require_available(w, *amount_cents, wallet)?;
            w.available_cents -= amount_cents;
            w.escrow_locked_cents = checked_add(w.escrow_locked_cents, *amount_cents, wallet)?;
        }
        Move::Release { wallet, to_wallet, amount_cents } => {
            {
                let w = wallets.get_mut(wallet).expect("wallet preloaded");
                require_escrow(w, *amount_cents, wallet)?;
                w.escrow_locked_cents -= amount_cents;
                w.total_debited_cents = checked_add(w.total_debited_cents, *amount_cents, wallet)?;
            }
            let to = wallets.get_mut(to_wallet).expect("wallet preloaded");
            to.available_cents = checked_add(to.available_cents, *amount_cents, to_wallet)?;
        }
        Move::Refund { wallet, to_wallet, amount_cents } => {
            {
                let w = wallets.get_mut(wallet).expect("wallet preloaded");
                require_escrow(w, *amount_cents, wallet)?;
                w.escrow_locked_cents -= amount_cents;
            }
            let to = wallets.get_mut(to_wallet).expect("wallet preloaded");
            to.available_cents = checked_add(to.available_cents, *amount_cents, to_wallet)?;
        }
        Move::Void { wallet, amount_cents } => {
            let w = wallets.get_mut(wallet).expect("wallet preloaded");
            require_escrow(w, *amount_cents, wallet)?;
            w.escrow_locked_cents -= amount_cents;
            w.available_cents = checked_add(w.available_cents, *amount_cents, wallet)?;
        }
    }
    Ok(())
}

fn checked_add(current: i64, delta: i64, wallet: &WalletRef) -> Result<i64> {
    current.checked_add(delta).ok_or_else(|| SettldError::internal(format!("ledger overflow on wallet {}", wallet.display())))
}

fn require_available(wallet: &Wallet, amount: i64, wallet_ref: &WalletRef) -> Result<()> {
    if wallet.available_cents < amount {
        return Err(SettldError::InsufficientFunds {
            wallet_id: wallet_ref.display(),
            requested: amount,
            available: wallet.available_cents,
        });
    }
    Ok(())
}

fn require_escrow(wallet: &Wallet, amount: i64, wallet_ref: &WalletRef) -> Result<()> {
    if wallet.escrow_locked_cents < amount {
        return Err(SettldError::InsufficientFunds {
            wallet_id: wallet_ref.display(),
            requested: amount,
            available: wallet.escrow_locked_cents,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use settld_store::memory::InMemoryStore;

    fn ledger() -> Ledger {
        Ledger::new(Arc::new(InMemoryStore::new()))
    }

    #[tokio::test]
    async fn credit_then_lock_then_release_balances() {
        let ledger = ledger();
        let payer = AgentId::new();
        let payee = AgentId::new();
        let payer_ref = WalletRef::new("t", payer, Currency::Usd);
        let payee_ref = WalletRef::new("t", payee, Currency::Usd);

        ledger
            .apply_transition("t", "tx-1", &[Move::Credit { wallet: payer_ref.clone(), amount_cents: 1000 }])
            .await
            .unwrap();
        ledger
            .apply_transition("t", "tx-2", &[Move::Lock { wallet: payer_ref.clone(), amount_cents: 400 }])
            .await
            .unwrap();
        let result = ledger
            .apply_transition(
                "t",
                "tx-3",
                &[Move::Release { wallet: payer_ref.clone(), to_wallet: payee_ref.clone(), amount_cents: 400 }],
            )
            .await
            .unwrap();

        let payer_wallet = result.iter().find(|w| w.agent_id == payer).unwrap();
        let payee_wallet = result.iter().find(|w| w.agent_id == payee).unwrap();
        assert_eq!(payer_wallet.available_cents, 600);
        assert_eq!(payer_wallet.escrow_locked_cents, 0);
        assert_eq!(payer_wallet.total_debited_cents, 400);
        assert_eq!(payee_wallet.available_cents, 400);
    }

    #[tokio::test]
    async fn replaying_a_transition_id_is_a_no_op() {
        let ledger = ledger();
        let agent = AgentId::new();
        let wallet_ref = WalletRef::new("t", agent, Currency::Usd);

        let first = ledger
            .apply_transition("t", "tx-1", &[Move::Credit { wallet: wallet_ref.clone(), amount_cents: 1000 }])
            .await
            .unwrap();
        let second = ledger
            .apply_transition("t", "tx-1", &[Move::Credit { wallet: wallet_ref.clone(), amount_cents: 1000 }])
            .await
            .unwrap();

        assert_eq!(first[0].available_cents, second[0].available_cents);
        assert_eq!(first[0].available_cents, 1000);
    }

    #[tokio::test]
    async fn lock_more_than_available_is_rejected() {
        let ledger = ledger();
        let agent = AgentId::new();
        let wallet_ref = WalletRef::new("t", agent, Currency::Usd);

        ledger.apply_transition("t", "tx-1", &[Move::Credit { wallet: wallet_ref.clone(), amount_cents: 100 }]).await.unwrap();
        let result = ledger.apply_transition("t", "tx-2", &[Move::Lock { wallet: wallet_ref.clone(), amount_cents: 200 }]).await;
        assert!(matches!(result, Err(SettldError::InsufficientFunds { .. })));
    }

    #[tokio::test]
    async fn cross_currency_move_is_rejected() {
        let ledger = ledger();
        let payer = AgentId::new();
        let payee = AgentId::new();
        let payer_ref = WalletRef::new("t", payer, Currency::Usd);
        let payee_ref = WalletRef::new("t", payee, Currency::Eur);

        ledger.apply_transition("t", "tx-1", &[Move::Credit { wallet: payer_ref.clone(), amount_cents: 1000 }]).await.unwrap();
        ledger.apply_transition("t", "tx-2", &[Move::Lock { wallet: payer_ref.clone(), amount_cents: 500 }]).await.unwrap();
        let result = ledger
            .apply_transition("t", "tx-3", &[Move::Release { wallet: payer_ref, to_wallet: payee_ref, amount_cents: 500 }])
            .await;
        assert!(matches!(result, Err(SettldError::CurrencyMismatch { .. })));
    }

    #[tokio::test]
    async fn void_returns_escrow_to_available_on_same_wallet() {
        let ledger = ledger();
        let agent = AgentId::new();
        let wallet_ref = WalletRef::new("t", agent, Currency::Usd);

        ledger.apply_transition("t", "tx-1", &[Move::Credit { wallet: wallet_ref.clone(), amount_cents: 1000 }]).await.unwrap();
        ledger.apply_transition("t", "tx-2", &[Move::Lock { wallet: wallet_ref.clone(), amount_cents: 300 }]).await.unwrap();
        let result = ledger.apply_transition("t", "tx-3", &[Move::Void { wallet: wallet_ref.clone(), amount_cents: 300 }]).await.unwrap();

        assert_eq!(result[0].available_cents, 1000);
        assert_eq!(result[0].escrow_locked_cents, 0);
    }
}
