//! Workflow instance lifecycle service.

use serde::Deserialize;
use uuid::Uuid;

use crate::db::models::{
    EventLevel, EventType, TaskStatus, WorkflowInstance, WorkflowStatus,
};
use crate::db::{queries, DbPool};
use crate::engine::context::{DecisionMode, WorkflowContext};
use crate::engine::gate;
use crate::engine::pipeline::StepName;
use crate::engine::queue::step_task_key;
use crate::error::{AppError, AppResult};

/// Body of `POST /api/workflows`.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateWorkflowRequest {
    pub project_id: Uuid,
    #[serde(default)]
    pub name: Option<String>,
    pub requested_by: String,
    #[serde(default)]
    pub decision_mode: DecisionMode,
    #[serde(default)]
    pub cluster_type: Option<String>,
    #[serde(default)]
    pub max_experiments: Option<i32>,
}

/// Query parameters of `GET /api/workflows`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListWorkflowsParams {
    #[serde(default)]
    pub project_id: Option<Uuid>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: Option<i64>,
}

#[derive(Clone)]
pub struct WorkflowService {
    db: DbPool,
}

impl WorkflowService {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    /// Create a workflow instance and enqueue its entry step, all in one
    /// transaction. The instance comes back already `running`.
    pub async fn create(&self, request: CreateWorkflowRequest) -> AppResult<WorkflowInstance> {
        let id = Uuid::new_v4();
        let name = request
            .name
            .clone()
            .unwrap_or_else(|| format!("workflow-{}", &id.to_string()[..8]));

        let ctx = WorkflowContext {
            version: 1,
            decision_mode: request.decision_mode,
            requested_by: Some(request.requested_by.clone()),
            cluster_type: request.cluster_type.clone(),
            max_experiments: request.max_experiments,
            ..Default::default()
        };
        let entry = StepName::ENTRY;

        let mut tx = self.db.begin().await?;

        queries::workflow::insert(
            &mut *tx,
            id,
            request.project_id,
            &name,
            entry.as_str(),
            &ctx.to_value()?,
        )
        .await?;
        queries::event::insert(
            &mut *tx,
            id,
            None,
            &EventType::WorkflowCreated.to_string(),
            &EventLevel::Info.to_string(),
            &format!("Workflow {name} created by {}", request.requested_by),
            Some(&serde_json::json!({
                "project_id": request.project_id,
                "decision_mode": request.decision_mode,
            })),
        )
        .await?;

        let key = step_task_key(id, entry.as_str(), ctx.revision);
        let task = queries::task::insert(
            &mut *tx,
            Uuid::new_v4(),
            id,
            entry.as_str(),
            &serde_json::json!({}),
            3,
            None,
            Some(&key),
        )
        .await?
        .ok_or_else(|| {
            AppError::Internal(format!("Entry task for fresh workflow {id} already exists"))
        })?;
        queries::event::insert(
            &mut *tx,
            id,
            Some(task.id),
            &EventType::TaskEnqueued.to_string(),
            &EventLevel::Info.to_string(),
            &format!("Task enqueued for step {entry}"),
            None,
        )
        .await?;

        let instance = queries::workflow::apply_transition(
            &mut *tx,
            id,
            &WorkflowStatus::Running.to_string(),
            entry.as_str(),
            &ctx.to_value()?,
            None,
        )
        .await?;
        queries::event::insert(
            &mut *tx,
            id,
            None,
            &EventType::WorkflowStarted.to_string(),
            &EventLevel::Info.to_string(),
            &format!("Pipeline started at {entry}"),
            None,
        )
        .await?;

        tx.commit().await?;

        tracing::info!(
            workflow_id = %id,
            project_id = %request.project_id,
            name = %name,
            "Workflow created"
        );

        Ok(instance)
    }

    pub async fn get(&self, id: Uuid) -> AppResult<WorkflowInstance> {
        queries::workflow::get(&self.db, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Workflow not found: {id}")))
    }

    pub async fn list(&self, params: ListWorkflowsParams) -> AppResult<Vec<WorkflowInstance>> {
        let limit = params.limit.unwrap_or(50).clamp(1, 500);
        let offset = params.offset.unwrap_or(0).max(0);

        queries::workflow::list(
            &self.db,
            params.project_id,
            params.status.as_deref(),
            limit,
            offset,
        )
        .await
    }

    /// Request cancellation. The flag is sticky; if nothing is in flight
    /// the instance freezes right away, otherwise the runner freezes it
    /// at the next transition boundary. Cancelling a terminal instance
    /// is a no-op.
    pub async fn cancel(&self, id: Uuid) -> AppResult<WorkflowInstance> {
        let mut tx = self.db.begin().await?;

        let Some(instance) = queries::workflow::request_cancel(&mut *tx, id).await? else {
            tx.commit().await?;
            // Already terminal, or missing entirely.
            return self.get(id).await;
        };

        queries::event::insert(
            &mut *tx,
            id,
            None,
            &EventType::WorkflowCancelRequested.to_string(),
            &EventLevel::Info.to_string(),
            "Cancellation requested",
            None,
        )
        .await?;

        let in_flight = queries::task::in_flight_count(&mut *tx, id).await?;
        if in_flight > 0 {
            tx.commit().await?;
            tracing::info!(
                workflow_id = %id,
                in_flight,
                "Cancellation deferred until in-flight tasks reach a boundary"
            );
            return Ok(instance);
        }

        let swept = queries::task::cancel_for_workflow(&mut *tx, id).await?;
        for task in &swept {
            queries::event::insert(
                &mut *tx,
                id,
                Some(task.id),
                &EventType::TaskCancelled.to_string(),
                &EventLevel::Info.to_string(),
                &format!("Task for step {} cancelled", task.step),
                None,
            )
            .await?;
        }

        let instance = queries::workflow::apply_transition(
            &mut *tx,
            id,
            &WorkflowStatus::Cancelled.to_string(),
            &instance.current_step,
            &instance.context,
            None,
        )
        .await?;
        queries::event::insert(
            &mut *tx,
            id,
            None,
            &EventType::WorkflowCancelled.to_string(),
            &EventLevel::Info.to_string(),
            &format!("Workflow cancelled ({} tasks swept)", swept.len()),
            None,
        )
        .await?;

        tx.commit().await?;

        tracing::info!(workflow_id = %id, "Workflow cancelled");

        Ok(instance)
    }

    /// Re-activate a stalled instance: re-enqueue its current step (the
    /// idempotency key makes repeated resumes safe) and put it back to
    /// `running`, or re-open the gate if it stalled at one.
    pub async fn resume(&self, id: Uuid) -> AppResult<WorkflowInstance> {
        let mut tx = self.db.begin().await?;

        let instance = queries::workflow::get_for_update(&mut *tx, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Workflow not found: {id}")))?;

        match instance.workflow_status() {
            WorkflowStatus::Completed | WorkflowStatus::Cancelled => {
                return Err(AppError::Conflict(format!(
                    "Workflow {id} is {} and cannot be resumed",
                    instance.status
                )));
            }
            _ => {}
        }
        if instance.cancel_requested {
            return Err(AppError::Conflict(format!(
                "Workflow {id} has a pending cancellation"
            )));
        }

        let step = StepName::parse(&instance.current_step).ok_or_else(|| {
            AppError::Internal(format!("Unknown current step: {}", instance.current_step))
        })?;
        let mut ctx = WorkflowContext::from_value(&instance.context)?;

        if step.is_gate() {
            if queries::gate::get_pending(&mut *tx, id, step.as_str())
                .await?
                .is_some()
            {
                return Err(AppError::Conflict(format!(
                    "Workflow {id} is waiting on gate {step}; resolve it instead"
                )));
            }

            // The gate row went missing (or timed out while the instance
            // stayed non-terminal): re-open it.
            let (gate, fresh) = gate::open(&mut tx, id, step, "resume").await?;
            let instance = queries::workflow::apply_transition(
                &mut *tx,
                id,
                &WorkflowStatus::WaitingHuman.to_string(),
                step.as_str(),
                &ctx.to_value()?,
                None,
            )
            .await?;
            if fresh {
                queries::event::insert(
                    &mut *tx,
                    id,
                    None,
                    &EventType::GateOpened.to_string(),
                    &EventLevel::Info.to_string(),
                    &format!("Gate {step} re-opened on resume: {}", gate.question),
                    Some(&serde_json::json!({ "gate_id": gate.id, "options": gate.options })),
                )
                .await?;
            }
            queries::event::insert(
                &mut *tx,
                id,
                None,
                &EventType::WorkflowResumed.to_string(),
                &EventLevel::Info.to_string(),
                &format!("Workflow resumed at gate {step}"),
                None,
            )
            .await?;

            tx.commit().await?;
            return Ok(instance);
        }

        let key = step_task_key(id, step.as_str(), ctx.revision);
        match queries::task::get_by_idempotency_key(&mut *tx, &key).await? {
            Some(task) => match task.task_status() {
                TaskStatus::Failed | TaskStatus::Cancelled => {
                    queries::task::reset(&mut *tx, task.id).await?;
                    queries::event::insert(
                        &mut *tx,
                        id,
                        Some(task.id),
                        &EventType::TaskEnqueued.to_string(),
                        &EventLevel::Info.to_string(),
                        &format!("Task for step {step} reset on resume"),
                        None,
                    )
                    .await?;
                }
                TaskStatus::Completed => {
                    // Crash window between task completion and the
                    // instance transition: run the step again under a new
                    // revision.
                    ctx.revision += 1;
                    let key = step_task_key(id, step.as_str(), ctx.revision);
                    let task = queries::task::insert(
                        &mut *tx,
                        Uuid::new_v4(),
                        id,
                        step.as_str(),
                        &serde_json::json!({}),
                        3,
                        None,
                        Some(&key),
                    )
                    .await?;
                    if let Some(task) = task {
                        queries::event::insert(
                            &mut *tx,
                            id,
                            Some(task.id),
                            &EventType::TaskEnqueued.to_string(),
                            &EventLevel::Info.to_string(),
                            &format!("Task enqueued for step {step}"),
                            None,
                        )
                        .await?;
                    }
                }
                // Already queued or held by a worker.
                TaskStatus::Pending | TaskStatus::Leased | TaskStatus::Running => {}
            },
            None => {
                let task = queries::task::insert(
                    &mut *tx,
                    Uuid::new_v4(),
                    id,
                    step.as_str(),
                    &serde_json::json!({}),
                    3,
                    None,
                    Some(&key),
                )
                .await?;
                if let Some(task) = task {
                    queries::event::insert(
                        &mut *tx,
                        id,
                        Some(task.id),
                        &EventType::TaskEnqueued.to_string(),
                        &EventLevel::Info.to_string(),
                        &format!("Task enqueued for step {step}"),
                        None,
                    )
                    .await?;
                }
            }
        }

        let instance = queries::workflow::apply_transition(
            &mut *tx,
            id,
            &WorkflowStatus::Running.to_string(),
            step.as_str(),
            &ctx.to_value()?,
            None,
        )
        .await?;
        queries::event::insert(
            &mut *tx,
            id,
            None,
            &EventType::WorkflowResumed.to_string(),
            &EventLevel::Info.to_string(),
            &format!("Workflow resumed at {step}"),
            None,
        )
        .await?;

        tx.commit().await?;

        tracing::info!(workflow_id = %id, step = %step, "Workflow resumed");

        Ok(instance)
    }
}
