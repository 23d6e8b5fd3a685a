//! Human gate model.
//!
//! A blocking checkpoint that suspends pipeline progression until a human
//! (or the autonomous-mode auto-approver) responds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Gate lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateStatus {
    Pending,
    Approved,
    Rejected,
    ChangesRequested,
    Timeout,
}

impl GateStatus {
    /// Parse a wire value. Unknown strings are rejected rather than
    /// defaulted; gate resolution input comes from clients.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "changes_requested" => Some(Self::ChangesRequested),
            "timeout" => Some(Self::Timeout),
            _ => None,
        }
    }
}

impl std::fmt::Display for GateStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Approved => write!(f, "approved"),
            Self::Rejected => write!(f, "rejected"),
            Self::ChangesRequested => write!(f, "changes_requested"),
            Self::Timeout => write!(f, "timeout"),
        }
    }
}

/// A blocking human checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct HumanGate {
    pub id: Uuid,
    pub workflow_id: Uuid,
    /// The pipeline step that is paused on this gate.
    pub step: String,
    pub title: String,
    pub question: String,
    /// Ordered list of allowed answers (JSONB array of strings).
    pub options: serde_json::Value,
    pub status: String,
    pub selected_option: Option<String>,
    pub comment: Option<String>,
    pub requested_by: String,
    pub requested_at: DateTime<Utc>,
    pub resolved_by: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl HumanGate {
    /// Parsed status; rows only ever hold the five known values.
    pub fn gate_status(&self) -> GateStatus {
        GateStatus::parse(&self.status).unwrap_or(GateStatus::Pending)
    }

    /// The allowed answers as strings.
    pub fn option_list(&self) -> Vec<String> {
        self.options
            .as_array()
            .map(|a| {
                a.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_round_trip() {
        for status in [
            GateStatus::Pending,
            GateStatus::Approved,
            GateStatus::Rejected,
            GateStatus::ChangesRequested,
            GateStatus::Timeout,
        ] {
            assert_eq!(GateStatus::parse(&status.to_string()), Some(status));
        }
    }

    #[test]
    fn test_parse_rejects_unknown() {
        assert_eq!(GateStatus::parse("maybe"), None);
        assert_eq!(GateStatus::parse(""), None);
    }

    #[test]
    fn test_option_list() {
        let gate = HumanGate {
            id: Uuid::new_v4(),
            workflow_id: Uuid::new_v4(),
            step: "hitl_direction".to_string(),
            title: "Approve plan".to_string(),
            question: "Proceed with the generated plan?".to_string(),
            options: json!(["approve_plan", "request_changes", "abort"]),
            status: "pending".to_string(),
            selected_option: None,
            comment: None,
            requested_by: "orchestrator".to_string(),
            requested_at: Utc::now(),
            resolved_by: None,
            resolved_at: None,
        };
        assert_eq!(
            gate.option_list(),
            vec!["approve_plan", "request_changes", "abort"]
        );
    }
}
