//! Workflow event model.
//!
//! Append-only audit entries. Nothing in the engine reads these back to
//! decide behavior; they exist for diagnostics and the dashboard timeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Event types emitted by the engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// Workflow instance created
    WorkflowCreated,
    /// First task leased, instance moved to running
    WorkflowStarted,
    /// A step completed and the instance advanced
    WorkflowStepCompleted,
    /// Instance paused on a human gate
    WorkflowWaitingHuman,
    /// Instance re-activated (gate approval, changes-requested rewind,
    /// or an explicit resume call)
    WorkflowResumed,
    /// Cancellation requested
    WorkflowCancelRequested,
    /// Instance frozen after cancellation
    WorkflowCancelled,
    /// Pipeline finished successfully
    WorkflowCompleted,
    /// Terminal failure
    WorkflowFailed,
    /// Task enqueued
    TaskEnqueued,
    /// Task leased by a worker
    TaskLeased,
    /// Task completed
    TaskCompleted,
    /// Task attempt failed
    TaskFailed,
    /// Task cancelled
    TaskCancelled,
    /// Human gate opened
    GateOpened,
    /// Human gate resolved
    GateResolved,
    /// Human gate timed out
    GateTimeout,
    /// Custom event type (for extensibility)
    Custom(String),
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EventType::WorkflowCreated => "workflow.created",
            EventType::WorkflowStarted => "workflow.started",
            EventType::WorkflowStepCompleted => "workflow.step_completed",
            EventType::WorkflowWaitingHuman => "workflow.waiting_human",
            EventType::WorkflowResumed => "workflow.resumed",
            EventType::WorkflowCancelRequested => "workflow.cancel_requested",
            EventType::WorkflowCancelled => "workflow.cancelled",
            EventType::WorkflowCompleted => "workflow.completed",
            EventType::WorkflowFailed => "workflow.failed",
            EventType::TaskEnqueued => "task.enqueued",
            EventType::TaskLeased => "task.leased",
            EventType::TaskCompleted => "task.completed",
            EventType::TaskFailed => "task.failed",
            EventType::TaskCancelled => "task.cancelled",
            EventType::GateOpened => "gate.opened",
            EventType::GateResolved => "gate.resolved",
            EventType::GateTimeout => "gate.timeout",
            EventType::Custom(s) => s,
        };
        write!(f, "{}", s)
    }
}

/// Severity of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventLevel {
    Info,
    Warning,
    Error,
}

impl std::fmt::Display for EventLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// An append-only audit entry.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WorkflowEvent {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub task_id: Option<Uuid>,
    pub event_type: String,
    pub level: String,
    pub message: String,
    pub data: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_names_are_dotted() {
        assert_eq!(EventType::WorkflowCreated.to_string(), "workflow.created");
        assert_eq!(EventType::TaskFailed.to_string(), "task.failed");
        assert_eq!(EventType::GateOpened.to_string(), "gate.opened");
        assert_eq!(
            EventType::Custom("dashboard.pinned".to_string()).to_string(),
            "dashboard.pinned"
        );
    }

    #[test]
    fn test_level_display() {
        assert_eq!(EventLevel::Error.to_string(), "error");
        assert_eq!(EventLevel::Info.to_string(), "info");
    }
}
