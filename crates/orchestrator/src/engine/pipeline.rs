//! The research pipeline definition.
//!
//! Step names are a closed enum so an unknown step is a compile-time or
//! startup-time error, never a runtime dispatch miss. The pipeline shape
//! (order, gate prompts, rewind targets) lives here and nowhere else; the
//! runner only follows what handlers and this module tell it.

use serde::{Deserialize, Serialize};

/// A named stage of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepName {
    /// Generate the research plan from the project definition.
    PlanGenerate,
    /// Human checkpoint: approve the plan and pick a direction.
    HitlDirection,
    /// Submit and babysit the experiment batch on the cluster.
    ExperimentRun,
    /// Analyze the collected metrics.
    Analysis,
    /// Generate the report document.
    Report,
    /// Generate the automated review of the report.
    Review,
    /// Human checkpoint: approve the final report.
    HitlReview,
}

impl StepName {
    /// All steps in pipeline order.
    pub const ALL: [StepName; 7] = [
        StepName::PlanGenerate,
        StepName::HitlDirection,
        StepName::ExperimentRun,
        StepName::Analysis,
        StepName::Report,
        StepName::Review,
        StepName::HitlReview,
    ];

    /// The pipeline entry step.
    pub const ENTRY: StepName = StepName::PlanGenerate;

    pub fn as_str(self) -> &'static str {
        match self {
            Self::PlanGenerate => "plan_generate",
            Self::HitlDirection => "hitl_direction",
            Self::ExperimentRun => "experiment_run",
            Self::Analysis => "analysis",
            Self::Report => "report",
            Self::Review => "review",
            Self::HitlReview => "hitl_review",
        }
    }

    /// Parse a persisted step name. Returns `None` for unknown names.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "plan_generate" => Some(Self::PlanGenerate),
            "hitl_direction" => Some(Self::HitlDirection),
            "experiment_run" => Some(Self::ExperimentRun),
            "analysis" => Some(Self::Analysis),
            "report" => Some(Self::Report),
            "review" => Some(Self::Review),
            "hitl_review" => Some(Self::HitlReview),
            _ => None,
        }
    }

    /// True for steps that are human checkpoints rather than executable
    /// work; gate steps never get a task, they get a `HumanGate` row.
    pub fn is_gate(self) -> bool {
        matches!(self, Self::HitlDirection | Self::HitlReview)
    }
}

impl std::fmt::Display for StepName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Gate prompt shown to the reviewer.
#[derive(Debug, Clone)]
pub struct GateSpec {
    pub title: &'static str,
    pub question: &'static str,
    pub options: &'static [&'static str],
}

/// The prompt for a gate step.
pub fn gate_spec(step: StepName) -> Option<GateSpec> {
    match step {
        StepName::HitlDirection => Some(GateSpec {
            title: "Approve research plan",
            question: "The plan for this project has been generated. Approve it to start \
                       experiments, or request changes to regenerate it.",
            options: &["approve_plan", "request_changes", "abort"],
        }),
        StepName::HitlReview => Some(GateSpec {
            title: "Approve final report",
            question: "The report and its automated review are ready. Approve to finish the \
                       pipeline, or request changes to re-run analysis.",
            options: &["approve_report", "request_changes", "abort"],
        }),
        _ => None,
    }
}

/// The step that follows a gate once it is approved. `None` means the
/// pipeline is complete.
pub fn step_after_gate(gate: StepName) -> Option<StepName> {
    match gate {
        StepName::HitlDirection => Some(StepName::ExperimentRun),
        StepName::HitlReview => None,
        _ => None,
    }
}

/// Where a `changes_requested` resolution rewinds to. Explicit per gate;
/// never inferred from pipeline position.
pub fn rewind_target(gate: StepName) -> Option<StepName> {
    match gate {
        StepName::HitlDirection => Some(StepName::PlanGenerate),
        StepName::HitlReview => Some(StepName::Analysis),
        _ => None,
    }
}
