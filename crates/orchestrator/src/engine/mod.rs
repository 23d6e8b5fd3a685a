//! The workflow orchestration engine.
//!
//! A durable, crash-recoverable state machine driving the automated
//! research pipeline. Multiple orchestrator processes may run against the
//! same database; all cross-process coordination happens through the
//! storage layer (atomic lease grants, unique idempotency keys, the
//! single-pending-gate index), never through in-process locks.

pub mod context;
pub mod gate;
pub mod pipeline;
pub mod queue;
pub mod registry;
pub mod runner;
pub mod steps;
pub mod transition;

pub use context::{DecisionMode, WorkflowContext};
pub use gate::GateManager;
pub use pipeline::StepName;
pub use queue::TaskQueue;
pub use registry::{StepHandler, StepOutcome, StepRegistry};
pub use runner::Runner;
