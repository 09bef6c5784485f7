//! settld-types — canonical domain model for the settld agent-economy control plane.
//!
//! Zero dependencies on other settld crates. Defines every persisted entity in the
//! data model: agent identity, wallet, chained event envelope, authority/delegation
//! grants, tool manifests, marketplace artifacts (agreement/evidence), gates,
//! decision records, settlement receipts, escalations, and reversal events.
//!
//! # Architectural invariants
//!
//! 1. Every artifact carries a `schemaVersion` and is hash-pinned: downstream
//!    artifacts reference it by `(id, hash)`, never by mutable pointer.
//! 2. Amounts are integer cents (`Cents`, an `i64`); there is no currency conversion.
//! 3. All wire types serialize with camelCase field names to match the HTTP API's
//!    JSON bodies, which are also what gets canonicalized and hashed.

pub mod agent;
pub mod amount;
pub mod artifact;
pub mod decision;
pub mod error;
pub mod event;
pub mod gate;
pub mod grant;
pub mod identity;
pub mod manifest;
pub mod receipt;
pub mod wallet;

pub use agent::*;
pub use amount::*;
pub use artifact::*;
pub use decision::*;
pub use error::*;
pub use event::*;
pub use gate::*;
pub use grant::*;
pub use identity::*;
pub use manifest::*;
pub use receipt::*;
pub use wallet::*;

/// Current schema version emitted by this build for every new artifact.
pub const SCHEMA_VERSION: u32 = 1;

/// A tenant-scoped identifier. Every persisted entity is exclusively owned by one
/// tenant; cross-tenant lookups must never succeed, not even to report "not found"
/// vs "belongs to someone else".
pub type TenantId = String;
