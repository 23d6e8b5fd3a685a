//! Worker-slot runner.
//!
//! Polls the task queue, executes step handlers under a lease with a
//! background heartbeat, and applies step outcomes transactionally. A
//! worker whose lease is reclaimed abandons its result instead of
//! writing over the new holder's.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::db::models::{
    EventLevel, EventType, TaskStatus, WorkflowInstance, WorkflowStatus, WorkflowTask,
};
use crate::db::{queries, DbPool};
use crate::engine::context::{DecisionMode, WorkflowContext};
use crate::engine::gate::{self, GateManager};
use crate::engine::pipeline::StepName;
use crate::engine::queue::{step_task_key, TaskQueue};
use crate::engine::registry::{StepOutcome, StepRegistry};
use crate::engine::transition::{self, Decision};
use crate::error::{AppError, AppResult};

/// Runner that drains the task queue with a bounded number of slots.
pub struct Runner {
    db: DbPool,
    config: AppConfig,
    queue: Arc<TaskQueue>,
    registry: Arc<StepRegistry>,
    gates: Arc<GateManager>,
    semaphore: Arc<Semaphore>,
}

impl Runner {
    pub fn new(
        db: DbPool,
        config: AppConfig,
        queue: Arc<TaskQueue>,
        registry: Arc<StepRegistry>,
        gates: Arc<GateManager>,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.worker_slots));
        Self {
            db,
            config,
            queue,
            registry,
            gates,
            semaphore,
        }
    }

    /// Poll-and-execute loop. Runs until the process shuts down.
    pub async fn run(self: Arc<Self>) {
        tracing::info!(
            worker_id = %self.config.worker_id,
            slots = self.config.worker_slots,
            poll_interval_secs = self.config.poll_interval_secs,
            "Runner started"
        );

        loop {
            // Wait for available slot
            let permit = match self.semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };

            let task = match self
                .queue
                .lease_next(&self.config.worker_id, self.config.lease_secs)
                .await
            {
                Ok(Some(task)) => task,
                Ok(None) => {
                    drop(permit);
                    tokio::time::sleep(Duration::from_secs(self.config.poll_interval_secs)).await;
                    continue;
                }
                Err(e) => {
                    drop(permit);
                    tracing::error!(error = %e, "Failed to lease next task");
                    tokio::time::sleep(Duration::from_secs(self.config.poll_interval_secs)).await;
                    continue;
                }
            };

            let runner = self.clone();
            tokio::spawn(async move {
                // Keep permit until done
                let _permit = permit;

                if let Err(e) = runner.process_task(task).await {
                    tracing::error!(error = %e, "Task processing failed");
                }
            });
        }
    }

    /// Execute one leased task end to end: run the handler under the
    /// lease heartbeat, then persist its outcome and the transition it
    /// implies. The task must hold this runner's lease.
    pub async fn process_task(&self, task: WorkflowTask) -> AppResult<()> {
        let worker_id = self.config.worker_id.clone();

        let instance = queries::workflow::get(&self.db, task.workflow_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("Workflow not found: {}", task.workflow_id))
            })?;

        // Cancellation observed before the step runs: freeze instead of
        // executing.
        if instance.cancel_requested {
            return self.freeze_workflow(task.workflow_id).await;
        }

        let Some(step) = StepName::parse(&task.step) else {
            self.queue
                .fail(
                    task.id,
                    &worker_id,
                    &format!("Unknown pipeline step: {}", task.step),
                    false,
                )
                .await?;
            return Ok(());
        };

        let Some(handler) = self.registry.get(step) else {
            self.queue
                .fail(
                    task.id,
                    &worker_id,
                    &format!("No handler registered for step {step}"),
                    false,
                )
                .await?;
            return Ok(());
        };

        let Some(task) = self.queue.mark_running(task.id, &worker_id).await? else {
            tracing::warn!(task_id = %task.id, "Lease lost before start; abandoning task");
            return Ok(());
        };

        let lease_lost = Arc::new(AtomicBool::new(false));
        let heartbeat = self.start_heartbeat(task.id, lease_lost.clone());

        let result = handler.execute(&instance, &task.payload).await;

        heartbeat.abort();

        if lease_lost.load(Ordering::SeqCst) {
            tracing::warn!(
                task_id = %task.id,
                step = %task.step,
                "Lease reclaimed mid-execution; abandoning result"
            );
            return Ok(());
        }

        match result {
            Ok(outcome) => {
                match self
                    .queue
                    .complete(task.id, &worker_id, &outcome.context_patch)
                    .await
                {
                    Ok(completed) => self.apply_outcome(&completed, &outcome).await,
                    Err(AppError::Conflict(msg)) => {
                        tracing::warn!(task_id = %task.id, %msg, "Fenced out at completion");
                        Ok(())
                    }
                    Err(e) => Err(e),
                }
            }
            Err(e) => {
                let retryable = !matches!(
                    e,
                    AppError::NonRetryable(_) | AppError::Validation(_) | AppError::BadRequest(_)
                );
                let message = e.to_string();

                match self.queue.fail(task.id, &worker_id, &message, retryable).await {
                    Ok(failed) => {
                        if failed.task_status() == TaskStatus::Failed {
                            self.fail_workflow(&failed, &message).await?;
                        }
                        Ok(())
                    }
                    Err(AppError::Conflict(msg)) => {
                        tracing::warn!(task_id = %task.id, %msg, "Fenced out at failure");
                        Ok(())
                    }
                    Err(e) => Err(e),
                }
            }
        }
    }

    /// Background lease extension for a running task.
    fn start_heartbeat(&self, task_id: Uuid, lost: Arc<AtomicBool>) -> tokio::task::JoinHandle<()> {
        let queue = self.queue.clone();
        let worker_id = self.config.worker_id.clone();
        let lease_secs = self.config.lease_secs;
        let interval = Duration::from_secs((lease_secs / 3).max(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // Skip first immediate tick

            loop {
                ticker.tick().await;

                match queue.heartbeat(task_id, &worker_id, lease_secs).await {
                    Ok(true) => tracing::trace!(task_id = %task_id, "Lease extended"),
                    Ok(false) => {
                        lost.store(true, Ordering::SeqCst);
                        return;
                    }
                    Err(e) => tracing::warn!(task_id = %task_id, error = %e, "Heartbeat failed"),
                }
            }
        })
    }

    /// Persist a completed step's outcome and the transition it implies,
    /// in one transaction.
    async fn apply_outcome(&self, task: &WorkflowTask, outcome: &StepOutcome) -> AppResult<()> {
        let mut tx = self.db.begin().await?;

        let instance = queries::workflow::get_for_update(&mut *tx, task.workflow_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("Workflow not found: {}", task.workflow_id))
            })?;
        if instance.workflow_status().is_terminal() {
            tx.commit().await?;
            return Ok(());
        }

        let mut ctx = WorkflowContext::from_value(&instance.context)?;
        ctx.apply_patch(&outcome.context_patch)?;

        let decision = transition::on_step_completed(instance.cancel_requested, outcome);

        // The gate that needs auto-resolution once the transaction is
        // committed, if any.
        let mut auto_gate = None;

        match decision {
            Decision::Freeze => {
                self.freeze_in_tx(&mut tx, &instance, &ctx).await?;
            }
            Decision::EnqueueNext { step } => {
                queries::workflow::apply_transition(
                    &mut *tx,
                    instance.id,
                    &WorkflowStatus::Running.to_string(),
                    step.as_str(),
                    &ctx.to_value()?,
                    None,
                )
                .await?;
                queries::event::insert(
                    &mut *tx,
                    instance.id,
                    Some(task.id),
                    &EventType::WorkflowStepCompleted.to_string(),
                    &EventLevel::Info.to_string(),
                    &format!("Step {} completed; advancing to {step}", task.step),
                    None,
                )
                .await?;
                self.enqueue_in_tx(&mut tx, &instance, step, &ctx).await?;
            }
            Decision::OpenGate { step } => {
                queries::workflow::apply_transition(
                    &mut *tx,
                    instance.id,
                    &WorkflowStatus::WaitingHuman.to_string(),
                    step.as_str(),
                    &ctx.to_value()?,
                    None,
                )
                .await?;
                queries::event::insert(
                    &mut *tx,
                    instance.id,
                    Some(task.id),
                    &EventType::WorkflowStepCompleted.to_string(),
                    &EventLevel::Info.to_string(),
                    &format!("Step {} completed; waiting at gate {step}", task.step),
                    None,
                )
                .await?;

                let (opened, fresh) =
                    gate::open(&mut tx, instance.id, step, &self.config.server_name).await?;
                if fresh {
                    queries::event::insert(
                        &mut *tx,
                        instance.id,
                        None,
                        &EventType::GateOpened.to_string(),
                        &EventLevel::Info.to_string(),
                        &format!("Gate {step} opened: {}", opened.question),
                        Some(&serde_json::json!({
                            "gate_id": opened.id,
                            "options": opened.options,
                        })),
                    )
                    .await?;
                    queries::event::insert(
                        &mut *tx,
                        instance.id,
                        None,
                        &EventType::WorkflowWaitingHuman.to_string(),
                        &EventLevel::Info.to_string(),
                        &format!("Waiting for a human decision at {step}"),
                        None,
                    )
                    .await?;
                }

                if ctx.decision_mode == DecisionMode::Autonomous && fresh {
                    auto_gate = Some(opened);
                }
            }
            Decision::Complete => {
                queries::workflow::apply_transition(
                    &mut *tx,
                    instance.id,
                    &WorkflowStatus::Completed.to_string(),
                    &task.step,
                    &ctx.to_value()?,
                    None,
                )
                .await?;
                queries::event::insert(
                    &mut *tx,
                    instance.id,
                    Some(task.id),
                    &EventType::WorkflowCompleted.to_string(),
                    &EventLevel::Info.to_string(),
                    "Pipeline completed",
                    None,
                )
                .await?;
            }
        }

        tx.commit().await?;

        if let Some(opened) = auto_gate {
            tracing::info!(
                workflow_id = %instance.id,
                gate_id = %opened.id,
                "Autonomous mode; auto-approving gate"
            );
            self.gates.auto_resolve(&opened).await?;
        }

        Ok(())
    }

    /// Enqueue the next step task with its idempotency key, inside the
    /// transaction.
    async fn enqueue_in_tx(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        instance: &WorkflowInstance,
        step: StepName,
        ctx: &WorkflowContext,
    ) -> AppResult<()> {
        let key = step_task_key(instance.id, step.as_str(), ctx.revision);

        let inserted = queries::task::insert(
            &mut **tx,
            Uuid::new_v4(),
            instance.id,
            step.as_str(),
            &serde_json::json!({}),
            3,
            None,
            Some(&key),
        )
        .await?;

        if let Some(next) = inserted {
            queries::event::insert(
                &mut **tx,
                instance.id,
                Some(next.id),
                &EventType::TaskEnqueued.to_string(),
                &EventLevel::Info.to_string(),
                &format!("Task enqueued for step {step}"),
                None,
            )
            .await?;
        }

        Ok(())
    }

    /// Freeze a cancel-requested workflow: sweep its live tasks and mark
    /// it cancelled, in one transaction.
    async fn freeze_workflow(&self, workflow_id: Uuid) -> AppResult<()> {
        let mut tx = self.db.begin().await?;

        let Some(instance) = queries::workflow::get_for_update(&mut *tx, workflow_id).await? else {
            tx.commit().await?;
            return Ok(());
        };
        if instance.workflow_status().is_terminal() || !instance.cancel_requested {
            tx.commit().await?;
            return Ok(());
        }

        let ctx = WorkflowContext::from_value(&instance.context)?;
        self.freeze_in_tx(&mut tx, &instance, &ctx).await?;
        tx.commit().await?;

        Ok(())
    }

    async fn freeze_in_tx(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        instance: &WorkflowInstance,
        ctx: &WorkflowContext,
    ) -> AppResult<()> {
        let swept = queries::task::cancel_for_workflow(&mut **tx, instance.id).await?;

        for task in &swept {
            queries::event::insert(
                &mut **tx,
                instance.id,
                Some(task.id),
                &EventType::TaskCancelled.to_string(),
                &EventLevel::Info.to_string(),
                &format!("Task for step {} cancelled", task.step),
                None,
            )
            .await?;
        }

        queries::workflow::apply_transition(
            &mut **tx,
            instance.id,
            &WorkflowStatus::Cancelled.to_string(),
            &instance.current_step,
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
            &format!("Workflow cancelled ({} tasks swept)", swept.len()),
            None,
        )
        .await?;

        tracing::info!(
            workflow_id = %instance.id,
            swept = swept.len(),
            "Workflow frozen after cancellation request"
        );

        Ok(())
    }

    /// A task exhausted its attempts: fail the instance (or freeze it if
    /// cancellation raced in).
    async fn fail_workflow(&self, task: &WorkflowTask, error: &str) -> AppResult<()> {
        let mut tx = self.db.begin().await?;

        let Some(instance) = queries::workflow::get_for_update(&mut *tx, task.workflow_id).await?
        else {
            tx.commit().await?;
            return Ok(());
        };
        if instance.workflow_status().is_terminal() {
            tx.commit().await?;
            return Ok(());
        }

        let ctx = WorkflowContext::from_value(&instance.context)?;

        if instance.cancel_requested {
            self.freeze_in_tx(&mut tx, &instance, &ctx).await?;
            tx.commit().await?;
            return Ok(());
        }

        let message = format!(
            "Step {} failed after {} attempts: {error}",
            task.step, task.attempts
        );
        queries::workflow::apply_transition(
            &mut *tx,
            instance.id,
            &WorkflowStatus::Failed.to_string(),
            &task.step,
            &ctx.to_value()?,
            Some(&message),
        )
        .await?;
        queries::event::insert(
            &mut *tx,
            instance.id,
            Some(task.id),
            &EventType::WorkflowFailed.to_string(),
            &EventLevel::Error.to_string(),
            &message,
            None,
        )
        .await?;

        tx.commit().await?;

        tracing::error!(
            workflow_id = %instance.id,
            task_id = %task.id,
            step = %task.step,
            "Workflow failed"
        );

        Ok(())
    }
}
