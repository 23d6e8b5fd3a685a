//! Workflow instance model.
//!
//! One row per pipeline run. Mutated exclusively by the orchestrator;
//! never physically deleted (history is kept via status).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// High-level workflow instance status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// Created, first task not yet leased.
    Pending,
    /// Pipeline is progressing.
    Running,
    /// Blocked on a pending human gate.
    WaitingHuman,
    /// Pipeline finished successfully.
    Completed,
    /// Terminal failure (task exhausted retries, gate rejected/timed out).
    Failed,
    /// Frozen after a cancellation request.
    Cancelled,
}

impl WorkflowStatus {
    /// True for statuses after which no further task may be leased.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::WaitingHuman => write!(f, "waiting_human"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl From<&str> for WorkflowStatus {
    fn from(s: &str) -> Self {
        match s {
            "running" => Self::Running,
            "waiting_human" => Self::WaitingHuman,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            "cancelled" => Self::Cancelled,
            _ => Self::Pending,
        }
    }
}

/// A single pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WorkflowInstance {
    pub id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    pub status: String,
    pub current_step: String,
    /// Accumulated outputs of prior steps (see `engine::context`).
    pub context: serde_json::Value,
    pub error_message: Option<String>,
    /// Sticky once set; observed by the orchestrator at transition
    /// boundaries.
    pub cancel_requested: bool,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowInstance {
    /// Parsed status.
    pub fn workflow_status(&self) -> WorkflowStatus {
        self.status.as_str().into()
    }
}
