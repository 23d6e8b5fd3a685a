//! Business logic services.

pub mod event;
pub mod gate;
pub mod workflow;

pub use event::EventService;
pub use gate::{GateService, ResolveGateRequest};
pub use workflow::{CreateWorkflowRequest, ListWorkflowsParams, WorkflowService};
