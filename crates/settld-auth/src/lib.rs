//! settld-auth — tenant/ops-token auth header validation and the
//! `TenantAuthLayer` tower middleware that enforces it on every mutating
//! route (§6 "Tenant/auth headers", §7 error kind 2).
//!
//! Grounded on `openibank-auth`'s `api_key.rs` (constant-time secret
//! compare) and `middleware.rs` (`Layer`/`Service` shape), generalized from
//! JWT/session/API-key auth down to the two schemes §6 actually specifies:
//! a tenant bearer token (`keyId.secret`) and an unscoped ops token.

pub mod config;
pub mod error;
pub mod extractor;
pub mod middleware;
pub mod request;
pub mod types;

pub use config::AuthConfig;
pub use error::{AuthError, AuthResult};
pub use middleware::TenantAuthLayer;
pub use request::{check_protocol_version, expected_prev_chain_hash, require_idempotency_key, validate_headers, SUPPORTED_PROTOCOL_VERSION};
pub use types::{AuthContext, Scope};
