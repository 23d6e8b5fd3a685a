//! Database queries for the workflow engine.
//!
//! Every function takes `impl PgExecutor` so callers can run it against
//! the pool or inside a transaction; the orchestrator relies on the latter
//! to keep each instance transition and its event in one atomic write.

pub mod event;
pub mod gate;
pub mod task;
pub mod workflow;
