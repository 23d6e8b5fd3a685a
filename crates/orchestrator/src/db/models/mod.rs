//! Database models for the workflow engine.

pub mod event;
pub mod gate;
pub mod task;
pub mod workflow;

pub use event::{EventLevel, EventType, WorkflowEvent};
pub use gate::{GateStatus, HumanGate};
pub use task::{TaskStatus, WorkflowTask};
pub use workflow::{WorkflowInstance, WorkflowStatus};
