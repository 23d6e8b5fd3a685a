//! Workflow lifecycle integration tests: creation, cancellation, and
//! resume semantics.

mod support;

use labdesk_orchestrator::db::models::{TaskStatus, WorkflowStatus, WorkflowTask};
use labdesk_orchestrator::db::queries;
use labdesk_orchestrator::db::DbPool;
use labdesk_orchestrator::engine::context::DecisionMode;
use labdesk_orchestrator::engine::gate;
use labdesk_orchestrator::engine::pipeline::StepName;
use labdesk_orchestrator::engine::queue::{step_task_key, TaskQueue};
use labdesk_orchestrator::error::AppError;
use labdesk_orchestrator::services::{CreateWorkflowRequest, WorkflowService};
use uuid::Uuid;

fn create_request() -> CreateWorkflowRequest {
    CreateWorkflowRequest {
        project_id: Uuid::new_v4(),
        name: Some("resnet-sweep".to_string()),
        requested_by: "alice".to_string(),
        decision_mode: DecisionMode::HumanInTheLoop,
        cluster_type: Some("gpu-small".to_string()),
        max_experiments: Some(4),
    }
}

/// Lease until a task of the given workflow comes back. Leftover tasks
/// from earlier (serialized) tests may be leased along the way; their
/// owners are done with them.
async fn lease_own_task(queue: &TaskQueue, worker: &str, workflow_id: Uuid) -> WorkflowTask {
    for _ in 0..50 {
        match queue.lease_next(worker, 60).await.expect("lease") {
            Some(task) if task.workflow_id == workflow_id => return task,
            Some(_) => continue,
            None => panic!("expected a leasable task for {workflow_id}"),
        }
    }
    panic!("queue kept returning foreign tasks");
}

async fn get_instance(pool: &DbPool, id: Uuid) -> labdesk_orchestrator::db::models::WorkflowInstance {
    queries::workflow::get(pool, id)
        .await
        .expect("get instance")
        .expect("instance exists")
}

#[tokio::test]
async fn create_starts_the_pipeline_at_the_entry_step() {
    let Some(db) = support::test_pool().await else {
        return;
    };
    let pool = db.pool.clone();
    let service = WorkflowService::new(pool.clone());

    let instance = service.create(create_request()).await.expect("create");

    assert_eq!(instance.workflow_status(), WorkflowStatus::Running);
    assert_eq!(instance.current_step, "plan_generate");
    assert_eq!(instance.name, "resnet-sweep");
    assert!(instance.started_at.is_some());

    let key = step_task_key(instance.id, "plan_generate", 0);
    let task = queries::task::get_by_idempotency_key(&pool, &key)
        .await
        .expect("lookup")
        .expect("entry task enqueued");
    assert_eq!(task.task_status(), TaskStatus::Pending);

    for event_type in ["workflow.created", "workflow.started", "task.enqueued"] {
        let count = queries::event::count(&pool, instance.id, Some(event_type), None)
            .await
            .expect("count");
        assert_eq!(count, 1, "expected exactly one {event_type} event");
    }
}

#[tokio::test]
async fn cancel_with_nothing_in_flight_freezes_immediately() {
    let Some(db) = support::test_pool().await else {
        return;
    };
    let pool = db.pool.clone();
    let service = WorkflowService::new(pool.clone());

    let instance = service.create(create_request()).await.expect("create");
    let cancelled = service.cancel(instance.id).await.expect("cancel");

    assert_eq!(cancelled.workflow_status(), WorkflowStatus::Cancelled);
    assert!(cancelled.completed_at.is_some());

    let tasks = queries::task::list_by_workflow(&pool, instance.id)
        .await
        .expect("list");
    assert!(tasks
        .iter()
        .all(|t| t.task_status() == TaskStatus::Cancelled));

    // Cancelling again is a no-op.
    let again = service.cancel(instance.id).await.expect("cancel again");
    assert_eq!(again.workflow_status(), WorkflowStatus::Cancelled);
    let cancelled_events =
        queries::event::count(&pool, instance.id, Some("workflow.cancelled"), None)
            .await
            .expect("count");
    assert_eq!(cancelled_events, 1);
}

#[tokio::test]
async fn cancel_with_a_leased_task_defers_to_the_boundary() {
    let Some(db) = support::test_pool().await else {
        return;
    };
    let pool = db.pool.clone();
    let config = support::test_config();
    let service = WorkflowService::new(pool.clone());
    let queue = TaskQueue::new(pool.clone(), &config);

    let instance = service.create(create_request()).await.expect("create");
    let task = lease_own_task(&queue, &config.worker_id, instance.id).await;

    let after_cancel = service.cancel(instance.id).await.expect("cancel");
    assert_eq!(
        after_cancel.workflow_status(),
        WorkflowStatus::Running,
        "a held task defers the freeze"
    );
    assert!(after_cancel.cancel_requested);

    let held = queries::task::get(&pool, task.id)
        .await
        .expect("get task")
        .expect("task exists");
    assert_eq!(
        held.task_status(),
        TaskStatus::Leased,
        "the in-flight task must not be swept"
    );
}

#[tokio::test]
async fn resume_resets_a_failed_step_and_reruns_it() {
    let Some(db) = support::test_pool().await else {
        return;
    };
    let pool = db.pool.clone();
    let config = support::test_config();
    let service = WorkflowService::new(pool.clone());
    let queue = TaskQueue::new(pool.clone(), &config);

    let instance = service.create(create_request()).await.expect("create");
    let task = lease_own_task(&queue, &config.worker_id, instance.id).await;

    // The step fails terminally and the instance follows it down.
    let failed = queue
        .fail(task.id, &config.worker_id, "planner 500", false)
        .await
        .expect("fail");
    assert_eq!(failed.task_status(), TaskStatus::Failed);
    queries::workflow::apply_transition(
        &pool,
        instance.id,
        "failed",
        "plan_generate",
        &instance.context,
        Some("planner 500"),
    )
    .await
    .expect("fail instance");

    let resumed = service.resume(instance.id).await.expect("resume");
    assert_eq!(resumed.workflow_status(), WorkflowStatus::Running);
    assert!(resumed.error_message.is_none());

    let reset = queries::task::get(&pool, task.id)
        .await
        .expect("get")
        .expect("exists");
    assert_eq!(reset.task_status(), TaskStatus::Pending);
    assert_eq!(reset.attempts, 0);

    // Resuming again changes nothing: the key already has a live task.
    service.resume(instance.id).await.expect("resume again");
    let tasks = queries::task::list_by_workflow(&pool, instance.id)
        .await
        .expect("list");
    assert_eq!(tasks.len(), 1);
}

#[tokio::test]
async fn resume_rejects_terminal_and_gated_instances() {
    let Some(db) = support::test_pool().await else {
        return;
    };
    let pool = db.pool.clone();
    let service = WorkflowService::new(pool.clone());

    // Cancelled: not resumable.
    let instance = service.create(create_request()).await.expect("create");
    service.cancel(instance.id).await.expect("cancel");
    let resumed = service.resume(instance.id).await;
    assert!(matches!(resumed, Err(AppError::Conflict(_))));

    // Waiting on a pending gate: resolve it instead.
    let gated = support::seed_instance(&pool, "waiting_human", StepName::HitlDirection).await;
    let mut conn = pool.acquire().await.expect("acquire");
    gate::open(&mut conn, gated.id, StepName::HitlDirection, "runner")
        .await
        .expect("open gate");
    drop(conn);

    let resumed = service.resume(gated.id).await;
    assert!(matches!(resumed, Err(AppError::Conflict(_))));

    let unchanged = get_instance(&pool, gated.id).await;
    assert_eq!(unchanged.workflow_status(), WorkflowStatus::WaitingHuman);
}
