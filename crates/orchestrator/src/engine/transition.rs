//! Pure state-machine decisions.
//!
//! The runner and the gate manager persist transitions; this module only
//! decides them, so every arc of the state machine is testable without a
//! database.

use crate::db::models::GateStatus;
use crate::engine::pipeline::{self, StepName};
use crate::engine::registry::StepOutcome;

/// What to do after a step's task completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Advance `current_step` and enqueue the next task.
    EnqueueNext { step: StepName },
    /// Advance to a gate step: instance waits, gate opens.
    OpenGate { step: StepName },
    /// The handler signalled there is no next step.
    Complete,
    /// Cancellation was observed at the transition boundary.
    Freeze,
}

/// Decide the transition after a completed step.
pub fn on_step_completed(cancel_requested: bool, outcome: &StepOutcome) -> Decision {
    if cancel_requested {
        return Decision::Freeze;
    }

    match outcome.next_step {
        None => Decision::Complete,
        Some(step) if outcome.requires_approval || step.is_gate() => Decision::OpenGate { step },
        Some(step) => Decision::EnqueueNext { step },
    }
}

/// What to do after a gate resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateOutcome {
    /// Approved: enqueue the step after the gate.
    Advance { step: StepName },
    /// Approved on the final gate: pipeline is done.
    Complete,
    /// Changes requested: rewind to the pipeline-defined earlier step.
    Rewind { step: StepName },
    /// Rejected or timed out: controlled failure.
    Fail { error: String },
    /// Cancellation was observed at the transition boundary.
    Freeze,
}

/// Decide the transition after a gate is resolved.
pub fn on_gate_resolved(
    cancel_requested: bool,
    gate_step: StepName,
    status: GateStatus,
    selected_option: Option<&str>,
) -> GateOutcome {
    if cancel_requested {
        return GateOutcome::Freeze;
    }

    match status {
        GateStatus::Approved => match pipeline::step_after_gate(gate_step) {
            Some(step) => GateOutcome::Advance { step },
            None => GateOutcome::Complete,
        },
        GateStatus::ChangesRequested => match pipeline::rewind_target(gate_step) {
            Some(step) => GateOutcome::Rewind { step },
            None => GateOutcome::Fail {
                error: format!("Gate {gate_step} has no rewind target for changes_requested"),
            },
        },
        GateStatus::Rejected => GateOutcome::Fail {
            error: format!(
                "Gate {gate_step} rejected{}",
                selected_option
                    .map(|o| format!(" ({o})"))
                    .unwrap_or_default()
            ),
        },
        GateStatus::Timeout => GateOutcome::Fail {
            error: format!("Gate {gate_step} timed out without a resolution"),
        },
        // A pending gate can't trigger a transition; callers resolve first.
        GateStatus::Pending => GateOutcome::Fail {
            error: format!("Gate {gate_step} is still pending"),
        },
    }
}
