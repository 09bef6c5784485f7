//! settld relational persistence.
//!
//! Sqlite-backed implementation of the [`settld_store::Store`] contract.
//! Everything else in the workspace depends on the trait, never on this
//! crate directly, except `settld-server`'s startup wiring which picks
//! between [`store::SqliteStore`] and `settld_store::memory::InMemoryStore`
//! based on whether `DATABASE_URL` is configured.

pub mod config;
pub mod error;
pub mod store;

pub use config::DatabaseConfig;
pub use error::{DbError, DbResult};
pub use store::SqliteStore;
