//! The task lease queue.
//!
//! A thin layer over the task queries that adds retry policy, audit
//! events, and the fencing error surface. All atomicity lives in the SQL
//! (see `db::queries::task`); two orchestrator processes sharing the pool
//! coordinate purely through those statements.

use chrono::{Duration, Utc};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::db::models::{EventLevel, EventType, TaskStatus, WorkflowTask};
use crate::db::{queries, DbPool};
use crate::error::{AppError, AppResult};

/// Retry backoff in seconds for a given completed attempt count
/// (1-based): `base * 2^(attempt - 1)`, capped.
pub fn backoff_secs(base: u64, cap: u64, attempt: u32) -> u64 {
    let exp = attempt.saturating_sub(1).min(32);
    base.saturating_mul(1u64 << exp).min(cap)
}

/// Build the idempotency key for a step task. The revision makes a step
/// re-enqueueable after a changes-requested rewind.
pub fn step_task_key(workflow_id: Uuid, step: &str, revision: u32) -> String {
    format!("{workflow_id}:{step}:r{revision}")
}

/// Lease queue operations bound to the connection pool.
#[derive(Clone)]
pub struct TaskQueue {
    db: DbPool,
    retry_base_secs: u64,
    retry_cap_secs: u64,
}

impl TaskQueue {
    pub fn new(db: DbPool, config: &AppConfig) -> Self {
        Self {
            db,
            retry_base_secs: config.retry_base_secs,
            retry_cap_secs: config.retry_cap_secs,
        }
    }

    /// Enqueue a task. An idempotency-key collision returns the existing
    /// task unchanged.
    pub async fn enqueue(
        &self,
        workflow_id: Uuid,
        step: &str,
        payload: &serde_json::Value,
        idempotency_key: Option<&str>,
        run_after: Option<chrono::DateTime<Utc>>,
    ) -> AppResult<WorkflowTask> {
        let inserted = queries::task::insert(
            &self.db,
            Uuid::new_v4(),
            workflow_id,
            step,
            payload,
            3,
            run_after,
            idempotency_key,
        )
        .await?;

        match inserted {
            Some(task) => {
                queries::event::insert(
                    &self.db,
                    workflow_id,
                    Some(task.id),
                    &EventType::TaskEnqueued.to_string(),
                    &EventLevel::Info.to_string(),
                    &format!("Task enqueued for step {step}"),
                    None,
                )
                .await?;
                Ok(task)
            }
            None => {
                let key = idempotency_key.ok_or_else(|| {
                    AppError::Internal("Task insert returned no row without a key".to_string())
                })?;
                let existing = queries::task::get_by_idempotency_key(&self.db, key)
                    .await?
                    .ok_or_else(|| {
                        AppError::Internal(format!("Task with idempotency key {key} vanished"))
                    })?;
                tracing::debug!(
                    workflow_id = %workflow_id,
                    step = %step,
                    task_id = %existing.id,
                    "Idempotent enqueue returned existing task"
                );
                Ok(existing)
            }
        }
    }

    /// Lease the next eligible task for this worker.
    pub async fn lease_next(
        &self,
        worker_id: &str,
        lease_secs: u64,
    ) -> AppResult<Option<WorkflowTask>> {
        let task = queries::task::lease_next(&self.db, worker_id, lease_secs).await?;

        if let Some(task) = &task {
            tracing::debug!(
                task_id = %task.id,
                workflow_id = %task.workflow_id,
                step = %task.step,
                worker_id = %worker_id,
                "Task leased"
            );
            queries::event::insert(
                &self.db,
                task.workflow_id,
                Some(task.id),
                &EventType::TaskLeased.to_string(),
                &EventLevel::Info.to_string(),
                &format!("Task leased by {worker_id}"),
                None,
            )
            .await?;
        }

        Ok(task)
    }

    /// Move a leased task to running. Returns the fenced-out case as
    /// `None`.
    pub async fn mark_running(
        &self,
        task_id: Uuid,
        worker_id: &str,
    ) -> AppResult<Option<WorkflowTask>> {
        queries::task::mark_running(&self.db, task_id, worker_id).await
    }

    /// Extend the lease. `false` means the lease was reclaimed and the
    /// holder must abandon further result-writing.
    pub async fn heartbeat(
        &self,
        task_id: Uuid,
        worker_id: &str,
        lease_secs: u64,
    ) -> AppResult<bool> {
        let extended = queries::task::extend_lease(&self.db, task_id, worker_id, lease_secs)
            .await?
            .is_some();

        if !extended {
            tracing::warn!(
                task_id = %task_id,
                worker_id = %worker_id,
                "Heartbeat rejected; lease reclaimed"
            );
        }

        Ok(extended)
    }

    /// Complete a task with its result. A stale holder gets `Conflict`.
    pub async fn complete(
        &self,
        task_id: Uuid,
        worker_id: &str,
        result: &serde_json::Value,
    ) -> AppResult<WorkflowTask> {
        let task = queries::task::complete(&self.db, task_id, worker_id, result)
            .await?
            .ok_or_else(|| {
                AppError::Conflict(format!(
                    "Task {task_id} is no longer leased by {worker_id}"
                ))
            })?;

        queries::event::insert(
            &self.db,
            task.workflow_id,
            Some(task.id),
            &EventType::TaskCompleted.to_string(),
            &EventLevel::Info.to_string(),
            &format!("Task completed for step {}", task.step),
            None,
        )
        .await?;

        Ok(task)
    }

    /// Cancel one task, removing it from lease eligibility. Works at any
    /// status except `completed`; re-cancelling is an idempotent no-op.
    /// A holder still running the task is fenced out of result-writing.
    pub async fn cancel(&self, task_id: Uuid) -> AppResult<WorkflowTask> {
        match queries::task::cancel(&self.db, task_id).await? {
            Some(task) => {
                queries::event::insert(
                    &self.db,
                    task.workflow_id,
                    Some(task.id),
                    &EventType::TaskCancelled.to_string(),
                    &EventLevel::Info.to_string(),
                    &format!("Task for step {} cancelled", task.step),
                    None,
                )
                .await?;
                Ok(task)
            }
            None => {
                let current = queries::task::get(&self.db, task_id)
                    .await?
                    .ok_or_else(|| AppError::NotFound(format!("Task not found: {task_id}")))?;
                match current.task_status() {
                    TaskStatus::Cancelled => Ok(current),
                    _ => Err(AppError::Conflict(format!(
                        "Task {task_id} is completed and cannot be cancelled"
                    ))),
                }
            }
        }
    }

    /// Record a failed attempt. Retries with exponential backoff while
    /// attempts remain (and the failure is retryable); otherwise the task
    /// fails terminally. Every attempt leaves an error-level event.
    pub async fn fail(
        &self,
        task_id: Uuid,
        worker_id: &str,
        error_message: &str,
        retryable: bool,
    ) -> AppResult<WorkflowTask> {
        let current = queries::task::get(&self.db, task_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Task not found: {task_id}")))?;

        let next_attempt = current.attempts + 1;
        let retry = retryable && next_attempt < current.max_attempts;
        let (new_status, run_after) = if retry {
            let delay = backoff_secs(
                self.retry_base_secs,
                self.retry_cap_secs,
                next_attempt as u32,
            );
            (
                TaskStatus::Pending,
                Utc::now() + Duration::seconds(delay as i64),
            )
        } else {
            (TaskStatus::Failed, current.run_after)
        };

        let task = queries::task::record_failure(
            &self.db,
            task_id,
            worker_id,
            &new_status.to_string(),
            run_after,
            error_message,
        )
        .await?
        .ok_or_else(|| {
            AppError::Conflict(format!(
                "Task {task_id} is no longer leased by {worker_id}"
            ))
        })?;

        tracing::warn!(
            task_id = %task.id,
            workflow_id = %task.workflow_id,
            step = %task.step,
            attempts = task.attempts,
            max_attempts = task.max_attempts,
            terminal = !retry,
            error = %error_message,
            "Task attempt failed"
        );

        queries::event::insert(
            &self.db,
            task.workflow_id,
            Some(task.id),
            &EventType::TaskFailed.to_string(),
            &EventLevel::Error.to_string(),
            &format!(
                "Task for step {} failed (attempt {}/{}): {}",
                task.step, task.attempts, task.max_attempts, error_message
            ),
            Some(&serde_json::json!({ "retrying": retry })),
        )
        .await?;

        Ok(task)
    }
}
