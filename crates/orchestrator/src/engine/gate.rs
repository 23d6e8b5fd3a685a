//! Human gate manager.
//!
//! Opens approval checkpoints, applies resolutions exactly once, and runs
//! the timeout sweep. Resolution and its downstream transition (resume,
//! rewind, fail, complete) are applied in a single transaction so the
//! event log never runs ahead of persisted state.

use std::sync::Arc;

use sqlx::PgConnection;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::db::models::{EventLevel, EventType, GateStatus, HumanGate, WorkflowStatus};
use crate::db::{queries, DbPool};
use crate::engine::context::WorkflowContext;
use crate::engine::pipeline::{self, StepName};
use crate::engine::queue::step_task_key;
use crate::engine::transition::{self, GateOutcome};
use crate::error::{AppError, AppResult};

/// Resolver identity recorded for autonomous-mode approvals.
pub const AUTO_APPROVER: &str = "auto-approver";

/// Open a pending gate for a gate step, inside the caller's transaction.
///
/// Returns the gate and whether it was freshly created; a pending gate
/// already open for this `(workflow, step)` is returned unchanged, which
/// is what the partial unique index guarantees under concurrent openers.
pub async fn open(
    conn: &mut PgConnection,
    workflow_id: Uuid,
    step: StepName,
    requested_by: &str,
) -> AppResult<(HumanGate, bool)> {
    let spec = pipeline::gate_spec(step).ok_or_else(|| {
        AppError::Internal(format!("Step {step} is not a gate step"))
    })?;
    let options = serde_json::json!(spec.options);

    let inserted = queries::gate::insert(
        &mut *conn,
        Uuid::new_v4(),
        workflow_id,
        step.as_str(),
        spec.title,
        spec.question,
        &options,
        requested_by,
    )
    .await?;

    match inserted {
        Some(gate) => Ok((gate, true)),
        None => {
            let existing = queries::gate::get_pending(&mut *conn, workflow_id, step.as_str())
                .await?
                .ok_or_else(|| {
                    AppError::Internal(format!(
                        "Pending gate for {workflow_id}/{step} vanished during open"
                    ))
                })?;
            Ok((existing, false))
        }
    }
}

/// Gate resolution and timeout sweeping.
#[derive(Clone)]
pub struct GateManager {
    db: DbPool,
    gate_timeout_secs: u64,
    sweep_interval_secs: u64,
}

impl GateManager {
    pub fn new(db: DbPool, config: &AppConfig) -> Self {
        Self {
            db,
            gate_timeout_secs: config.gate_timeout_secs,
            sweep_interval_secs: config.gate_sweep_interval_secs,
        }
    }

    /// Resolve a pending gate and apply the resulting transition.
    ///
    /// Resolving an already-resolved gate is an idempotent no-op: the
    /// current gate state is returned and nothing downstream re-triggers.
    pub async fn resolve(
        &self,
        workflow_id: Uuid,
        gate_id: Uuid,
        status: GateStatus,
        selected_option: Option<&str>,
        comment: Option<&str>,
        resolved_by: &str,
    ) -> AppResult<HumanGate> {
        if !matches!(
            status,
            GateStatus::Approved | GateStatus::Rejected | GateStatus::ChangesRequested
        ) {
            return Err(AppError::Validation(format!(
                "Gates cannot be resolved to status {status}"
            )));
        }

        let mut tx = self.db.begin().await?;

        let gate = queries::gate::get(&mut *tx, gate_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Gate not found: {gate_id}")))?;
        if gate.workflow_id != workflow_id {
            return Err(AppError::BadRequest(format!(
                "Gate {gate_id} does not belong to workflow {workflow_id}"
            )));
        }

        if let Some(option) = selected_option {
            if !gate.option_list().iter().any(|o| o == option) {
                return Err(AppError::Validation(format!(
                    "Option {option:?} is not one of the gate's allowed answers"
                )));
            }
        } else if status == GateStatus::Approved {
            return Err(AppError::Validation(
                "Approving a gate requires a selected_option".to_string(),
            ));
        }

        let resolved = queries::gate::resolve(
            &mut *tx,
            gate_id,
            &status.to_string(),
            selected_option,
            comment,
            resolved_by,
        )
        .await?;

        let Some(resolved) = resolved else {
            // Lost the single-shot update: someone resolved it first. The
            // snapshot read above may predate the winner, so re-fetch the
            // settled row.
            let current = queries::gate::get(&mut *tx, gate_id).await?.ok_or_else(|| {
                AppError::Internal(format!("Gate {gate_id} vanished during resolve"))
            })?;
            tx.commit().await?;
            tracing::info!(gate_id = %gate_id, "Gate already resolved; returning current state");
            return Ok(current);
        };

        self.apply_resolution(&mut tx, &resolved).await?;
        tx.commit().await?;

        tracing::info!(
            gate_id = %gate_id,
            workflow_id = %workflow_id,
            status = %status,
            resolved_by = %resolved_by,
            "Gate resolved"
        );

        Ok(resolved)
    }

    /// Autonomous mode: approve a freshly opened gate with its first
    /// option, keeping the gate row as an audit record.
    pub async fn auto_resolve(&self, gate: &HumanGate) -> AppResult<HumanGate> {
        let option = gate
            .option_list()
            .first()
            .cloned()
            .ok_or_else(|| AppError::Internal(format!("Gate {} has no options", gate.id)))?;

        self.resolve(
            gate.workflow_id,
            gate.id,
            GateStatus::Approved,
            Some(&option),
            Some("Autonomous mode auto-approval"),
            AUTO_APPROVER,
        )
        .await
    }

    /// One maintenance pass: first pick up autonomous-mode gates that
    /// never got their auto-approval, then expire long-pending gates,
    /// routing each timeout like a rejection. Returns the number of
    /// gates timed out.
    pub async fn sweep(&self) -> AppResult<usize> {
        self.recover_autonomous().await?;

        if self.gate_timeout_secs == 0 {
            return Ok(0);
        }

        let expired = queries::gate::expire_pending(&self.db, self.gate_timeout_secs).await?;
        let count = expired.len();

        for gate in expired {
            tracing::warn!(
                gate_id = %gate.id,
                workflow_id = %gate.workflow_id,
                step = %gate.step,
                "Pending gate timed out"
            );
            let mut tx = self.db.begin().await?;
            self.apply_resolution(&mut tx, &gate).await?;
            tx.commit().await?;
        }

        Ok(count)
    }

    /// Auto-approve pending gates of autonomous-mode instances. The
    /// runner resolves these immediately after opening; a crash between
    /// that commit and the resolution strands the gate as pending.
    async fn recover_autonomous(&self) -> AppResult<()> {
        let stranded = queries::gate::pending_autonomous(&self.db).await?;

        for gate in stranded {
            tracing::info!(
                gate_id = %gate.id,
                workflow_id = %gate.workflow_id,
                step = %gate.step,
                "Approving autonomous-mode gate left pending"
            );
            self.auto_resolve(&gate).await?;
        }

        Ok(())
    }

    /// Periodic maintenance sweep.
    pub async fn run_sweeper(self: Arc<Self>) {
        if self.gate_timeout_secs == 0 {
            tracing::info!("Gate timeouts disabled; sweep only recovers autonomous gates");
        }

        let mut ticker =
            tokio::time::interval(std::time::Duration::from_secs(self.sweep_interval_secs));
        ticker.tick().await; // Skip first immediate tick

        loop {
            ticker.tick().await;
            match self.sweep().await {
                Ok(0) => {}
                Ok(n) => tracing::info!(count = n, "Timed out pending gates"),
                Err(e) => tracing::error!(error = %e, "Gate sweep failed"),
            }
        }
    }

    /// Apply the downstream effects of a resolved (or timed-out) gate
    /// inside the caller's transaction.
    async fn apply_resolution(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        gate: &HumanGate,
    ) -> AppResult<()> {
        let status = gate.gate_status();
        let gate_event = if status == GateStatus::Timeout {
            EventType::GateTimeout
        } else {
            EventType::GateResolved
        };
        let gate_event_level = match status {
            GateStatus::Approved => EventLevel::Info,
            _ => EventLevel::Warning,
        };
        queries::event::insert(
            &mut **tx,
            gate.workflow_id,
            None,
            &gate_event.to_string(),
            &gate_event_level.to_string(),
            &format!("Gate {} resolved as {}", gate.step, status),
            Some(&serde_json::json!({
                "gate_id": gate.id,
                "selected_option": gate.selected_option,
                "comment": gate.comment,
                "resolved_by": gate.resolved_by,
            })),
        )
        .await?;

        let instance = queries::workflow::get_for_update(&mut **tx, gate.workflow_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("Workflow not found: {}", gate.workflow_id))
            })?;
        if instance.workflow_status().is_terminal() {
            // Nothing to transition; the gate event above is the record.
            return Ok(());
        }

        let step = StepName::parse(&gate.step)
            .ok_or_else(|| AppError::Internal(format!("Unknown gate step: {}", gate.step)))?;

        let mut ctx = WorkflowContext::from_value(&instance.context)?;
        if let Some(option) = gate.selected_option.as_deref() {
            ctx.record_gate_decision(&gate.step, option, gate.comment.as_deref());
        }

        let outcome = transition::on_gate_resolved(
            instance.cancel_requested,
            step,
            status,
            gate.selected_option.as_deref(),
        );

        match outcome {
            GateOutcome::Advance { step: next } => {
                queries::workflow::apply_transition(
                    &mut **tx,
                    instance.id,
                    &WorkflowStatus::Running.to_string(),
                    next.as_str(),
                    &ctx.to_value()?,
                    None,
                )
                .await?;
                queries::event::insert(
                    &mut **tx,
                    instance.id,
                    None,
                    &EventType::WorkflowResumed.to_string(),
                    &EventLevel::Info.to_string(),
                    &format!("Gate {} approved; advancing to {next}", gate.step),
                    None,
                )
                .await?;
                self.enqueue_in_tx(tx, &instance, next, &ctx, None).await?;
            }
            GateOutcome::Complete => {
                queries::workflow::apply_transition(
                    &mut **tx,
                    instance.id,
                    &WorkflowStatus::Completed.to_string(),
                    &gate.step,
                    &ctx.to_value()?,
                    None,
                )
                .await?;
                queries::event::insert(
                    &mut **tx,
                    instance.id,
                    None,
                    &EventType::WorkflowCompleted.to_string(),
                    &EventLevel::Info.to_string(),
                    "Pipeline completed",
                    None,
                )
                .await?;
            }
            GateOutcome::Rewind { step: target } => {
                ctx.revision += 1;
                queries::workflow::apply_transition(
                    &mut **tx,
                    instance.id,
                    &WorkflowStatus::Running.to_string(),
                    target.as_str(),
                    &ctx.to_value()?,
                    None,
                )
                .await?;
                queries::event::insert(
                    &mut **tx,
                    instance.id,
                    None,
                    &EventType::WorkflowResumed.to_string(),
                    &EventLevel::Info.to_string(),
                    &format!("Changes requested at {}; rewinding to {target}", gate.step),
                    None,
                )
                .await?;
                let payload = serde_json::json!({ "rework_comment": gate.comment });
                self.enqueue_in_tx(tx, &instance, target, &ctx, Some(payload))
                    .await?;
            }
            GateOutcome::Fail { error } => {
                queries::workflow::apply_transition(
                    &mut **tx,
                    instance.id,
                    &WorkflowStatus::Failed.to_string(),
                    &gate.step,
                    &ctx.to_value()?,
                    Some(&error),
                )
                .await?;
                queries::event::insert(
                    &mut **tx,
                    instance.id,
                    None,
                    &EventType::WorkflowFailed.to_string(),
                    &EventLevel::Error.to_string(),
                    &error,
                    None,
                )
                .await?;
            }
            GateOutcome::Freeze => {
                let cancelled = queries::task::cancel_for_workflow(&mut **tx, instance.id).await?;
                queries::workflow::apply_transition(
                    &mut **tx,
                    instance.id,
                    &WorkflowStatus::Cancelled.to_string(),
                    &gate.step,
                    &ctx.to_value()?,
                    None,
                )
                .await?;
                queries::event::insert(
                    &mut **tx,
                    instance.id,
                    None,
                    &EventType::WorkflowCancelled.to_string(),
                    &EventLevel::Info.to_string(),
                    &format!("Workflow cancelled ({} tasks swept)", cancelled.len()),
                    None,
                )
                .await?;
            }
        }

        Ok(())
    }

    /// Enqueue a step task inside the transaction, with the audit event.
    async fn enqueue_in_tx(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        instance: &crate::db::models::WorkflowInstance,
        step: StepName,
        ctx: &WorkflowContext,
        payload: Option<serde_json::Value>,
    ) -> AppResult<()> {
        let key = step_task_key(instance.id, step.as_str(), ctx.revision);
        let payload = payload.unwrap_or_else(|| serde_json::json!({}));

        let inserted = queries::task::insert(
            &mut **tx,
            Uuid::new_v4(),
            instance.id,
            step.as_str(),
            &payload,
            3,
            None,
            Some(&key),
        )
        .await?;

        if let Some(task) = inserted {
            queries::event::insert(
                &mut **tx,
                instance.id,
                Some(task.id),
                &EventType::TaskEnqueued.to_string(),
                &EventLevel::Info.to_string(),
                &format!("Task enqueued for step {step}"),
                None,
            )
            .await?;
        }

        Ok(())
    }
}
