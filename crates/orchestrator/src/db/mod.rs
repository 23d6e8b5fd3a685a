//! Database module for the Labdesk Orchestrator.
//!
//! Provides connectivity, models, and queries for PostgreSQL using SQLx.
//! All engine invariants (atomic lease grant, unique idempotency key,
//! single pending gate) are expressed as store-level constraints here and
//! in `schema.sql`, never as in-process locks.

pub mod models;
pub mod pool;
pub mod queries;
pub mod schema;

pub use pool::{create_pool, DbPool};
pub use schema::ensure_schema;
