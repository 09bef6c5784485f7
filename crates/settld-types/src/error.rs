//! Stable error codes for settld, per §7 of the specification.
//!
//! Every variant maps to exactly one stable string via [`SettldError::error_code`];
//! `settld-api` consumes that string directly in the HTTP error envelope. Domain
//! crates define their own `thiserror` enums for concerns specific to them
//! (`settld-gate::GateError`, `settld-ledger::LedgerError`, ...) but all of them
//! flow through the same kinds enumerated here for the parts of the model owned
//! by `settld-types` (amounts, canonicalization, generic validation).

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SettldError>;

#[derive(Debug, Clone, Error)]
pub enum SettldError {
    // Amount / currency
    #[error("amount overflow")]
    AmountOverflow,
    #[error("amount underflow")]
    AmountUnderflow,
    #[error("currency mismatch: expected {expected}, got {actual}")]
    CurrencyMismatch { expected: String, actual: String },

    // Schema / validation (§7.1)
    #[error("schema invalid at {path}: {message}")]
    SchemaInvalid { path: String, message: String },
    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    // Auth / tenant (§7.2)
    #[error("authentication required")]
    AuthRequired,
    #[error("tenant mismatch")]
    TenantMismatch,

    // Idempotency (§7.3)
    #[error("idempotency key conflict")]
    IdempotencyConflict { prior_fingerprint: String },

    // Concurrency / precondition (§7.4)
    #[error("chain hash mismatch: expected {expected}, observed {observed}")]
    ChainHashMismatch { expected: String, observed: String },
    #[error("cursor not found: {cursor}")]
    CursorNotFound { cursor: String },
    #[error("stale state: {phase}")]
    StaleState { phase: String },

    // Lifecycle (§7.5)
    #[error("agent {agent_id} is suspended")]
    AgentSuspended { agent_id: String },
    #[error("agent {agent_id} is throttled")]
    AgentThrottled { agent_id: String },
    #[error("signer key {key_id} is revoked")]
    SignerKeyRevoked { key_id: String },
    #[error("signer key {key_id} is not active")]
    SignerKeyNotActive { key_id: String },

    // Kernel binding (§7.6)
    #[error("settlement kernel binding invalid: {reason}")]
    SettlementKernelBindingInvalid { reason: String },

    // External rail (§7.7)
    #[error("external rail needs reconciliation: {reserve_id}")]
    NeedsReconciliation { reserve_id: String },

    // Grants
    #[error("grant {grant_id} expired at {expired_at}")]
    GrantExpired { grant_id: String, expired_at: String },
    #[error("grant {grant_id} not yet valid (nbf {nbf})")]
    GrantNotYetValid { grant_id: String, nbf: String },
    #[error("grant {grant_id} revoked")]
    GrantRevoked { grant_id: String },
    #[error("grant {grant_id} spend envelope exceeded: requested {requested}, remaining {remaining}")]
    GrantSpendExceeded {
        grant_id: String,
        requested: i64,
        remaining: i64,
    },
    #[error("grant {grant_id} chain depth {depth} exceeds max {max_depth}")]
    GrantChainDepthExceeded {
        grant_id: String,
        depth: u32,
        max_depth: u32,
    },
    #[error("grant {grant_id} does not cover capability {capability}")]
    GrantCapabilityNotCovered { grant_id: String, capability: String },
    #[error("grant {grant_id} hash does not recompute")]
    GrantHashMismatch { grant_id: String },
    #[error("grant {grant_id} signature does not verify")]
    GrantSignatureInvalid { grant_id: String },

    // Escrow / wallet
    #[error("wallet {wallet_id} not found")]
    WalletNotFound { wallet_id: String },
    #[error("insufficient available balance in wallet {wallet_id}: requested {requested}, available {available}")]
    InsufficientFunds {
        wallet_id: String,
        requested: i64,
        available: i64,
    },

    // Gate / escalation
    #[error("escalation required")]
    EscalationRequired,
    #[error("escalation {escalation_id} already resolved")]
    EscalationAlreadyResolved { escalation_id: String },
    #[error("dispute window expired")]
    DisputeWindowExpired,
    #[error("gate {gate_id} in invalid state for transition: {state}")]
    GateInvalidState { gate_id: String, state: String },
    #[error("session event append conflict on stream {stream_id}")]
    SessionEventAppendConflict { stream_id: String },

    // Not found / auth
    #[error("not found: {resource}")]
    NotFound { resource: String },
    #[error("unauthorized: {reason}")]
    Unauthorized { reason: String },
    #[error("rate limit exceeded")]
    RateLimitExceeded,

    // Fatal
    #[error("internal error: {message}")]
    Internal { message: String },
    #[error("not implemented: {message}")]
    NotImplemented { message: String },
}

impl SettldError {
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Stable machine-readable code consumed by the HTTP error envelope.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::AmountOverflow => "AMOUNT_OVERFLOW",
            Self::AmountUnderflow => "AMOUNT_UNDERFLOW",
            Self::CurrencyMismatch { .. } => "CURRENCY_MISMATCH",
            Self::SchemaInvalid { .. } => "SCHEMA_INVALID",
            Self::InvalidInput { .. } => "INVALID_INPUT",
            Self::AuthRequired => "AUTH_REQUIRED",
            Self::TenantMismatch => "TENANT_MISMATCH",
            Self::IdempotencyConflict { .. } => "IDEMPOTENCY_CONFLICT",
            Self::ChainHashMismatch { .. } => "CHAIN_HASH_MISMATCH",
            Self::CursorNotFound { .. } => "CURSOR_NOT_FOUND",
            Self::StaleState { .. } => "STALE_STATE",
            Self::AgentSuspended { .. } => "X402_AGENT_SUSPENDED",
            Self::AgentThrottled { .. } => "X402_AGENT_THROTTLED",
            Self::SignerKeyRevoked { .. } => "SIGNER_KEY_REVOKED",
            Self::SignerKeyNotActive { .. } => "SIGNER_KEY_NOT_ACTIVE",
            Self::SettlementKernelBindingInvalid { .. } => "SETTLEMENT_KERNEL_BINDING_INVALID",
            Self::NeedsReconciliation { .. } => "NEEDS_RECONCILIATION",
            Self::GrantExpired { .. } => "GRANT_EXPIRED",
            Self::GrantNotYetValid { .. } => "GRANT_NOT_YET_VALID",
            Self::GrantRevoked { .. } => "GRANT_REVOKED",
            Self::GrantSpendExceeded { .. } => "GRANT_SPEND_EXCEEDED",
            Self::GrantChainDepthExceeded { .. } => "GRANT_CHAIN_DEPTH_EXCEEDED",
            Self::GrantCapabilityNotCovered { .. } => "GRANT_CAPABILITY_NOT_COVERED",
            Self::GrantHashMismatch { .. } => "GRANT_HASH_MISMATCH",
            Self::GrantSignatureInvalid { .. } => "GRANT_SIGNATURE_INVALID",
            Self::WalletNotFound { .. } => "WALLET_NOT_FOUND",
            Self::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            Self::EscalationRequired => "ESCALATION_REQUIRED",
            Self::EscalationAlreadyResolved { .. } => "ESCALATION_ALREADY_RESOLVED",
            Self::DisputeWindowExpired => "DISPUTE_WINDOW_EXPIRED",
            Self::GateInvalidState { .. } => "GATE_INVALID_STATE",
            Self::SessionEventAppendConflict { .. } => "SESSION_EVENT_APPEND_CONFLICT",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Unauthorized { .. } => "UNAUTHORIZED",
            Self::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            Self::Internal { .. } => "INTERNAL_ERROR",
            Self::NotImplemented { .. } => "NOT_IMPLEMENTED",
        }
    }

    /// Whether the caller should retry the same request unmodified (transient
    /// infra failure) as opposed to fixing something and resubmitting.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Internal { .. } | Self::NeedsReconciliation { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_is_stable_string() {
        let err = SettldError::InsufficientFunds {
            wallet_id: "w".into(),
            requested: 100,
            available: 50,
        };
        assert_eq!(err.error_code(), "INSUFFICIENT_FUNDS");
    }

    #[test]
    fn retriable_errors_are_scoped_to_infra_failures() {
        assert!(SettldError::internal("boom").is_retriable());
        assert!(!SettldError::WalletNotFound { wallet_id: "w".into() }.is_retriable());
    }
}
