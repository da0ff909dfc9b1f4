//! # Database Operations
//!
//! Repository interfaces for the two databases the pipeline talks to, their Postgres
//! implementations, and circuit-breaker-guarded wrappers.
//!
//! ## Key Components
//!
//! - [`source`] - Read-only queries against the operational database
//! - [`local_store`] - Upserts, conditional updates and idempotent inserts on the local store
//! - [`call_history`] - Call session lookups used for attribution
//! - [`protected`] - Fail-fast wrappers that route every call through a circuit breaker
//! - [`connection`] - Pool construction for both databases
//! - [`migrations`] - Local store schema migrations
//!
//! Jobs only ever see the traits, so the batch and idempotency logic can run against
//! the in-memory fakes in [`crate::test_helpers`].

pub mod call_history;
pub mod connection;
pub mod local_store;
pub mod migrations;
pub mod protected;
pub mod source;

pub use call_history::{CallHistoryRepository, PgCallHistoryRepository};
pub use connection::DatabasePools;
pub use local_store::{LocalStore, PgLocalStore};
pub use protected::{DependencyGuard, ProtectedCallHistory, ProtectedLocalStore, ProtectedSourceRepository};
pub use source::{normalize_excluded_types, PgSourceRepository, SourceRepository};
