//! Lease queue integration tests.
//!
//! `lease_next` is a global dequeue, so all queue behaviors are
//! exercised in one sequential test to keep concurrent test threads
//! from leasing each other's tasks.

mod support;

use labdesk_orchestrator::db::models::TaskStatus;
use labdesk_orchestrator::db::queries;
use labdesk_orchestrator::engine::pipeline::StepName;
use labdesk_orchestrator::engine::queue::{step_task_key, TaskQueue};
use labdesk_orchestrator::error::AppError;
use serde_json::json;

#[tokio::test]
async fn lease_queue_behaviors() {
    let Some(db) = support::test_pool().await else {
        return;
    };
    let pool = db.pool.clone();
    let config = support::test_config();
    let queue = TaskQueue::new(pool.clone(), &config);

    // --- Exclusivity: a live lease hides the task from other workers.
    let instance = support::seed_instance(&pool, "running", StepName::PlanGenerate).await;
    let task = queue
        .enqueue(instance.id, "plan_generate", &json!({}), None, None)
        .await
        .expect("enqueue");

    let leased = queue
        .lease_next("worker-a", 60)
        .await
        .expect("lease a")
        .expect("task should be eligible");
    assert_eq!(leased.id, task.id);
    assert_eq!(leased.leased_by.as_deref(), Some("worker-a"));

    let second = queue.lease_next("worker-b", 60).await.expect("lease b");
    assert!(
        second.is_none(),
        "a task under a live lease must be invisible to other workers"
    );

    let done = queue
        .complete(task.id, "worker-a", &json!({"ok": true}))
        .await
        .expect("complete");
    assert_eq!(done.task_status(), TaskStatus::Completed);

    // --- Idempotent enqueue: same key maps to the same row.
    let instance = support::seed_instance(&pool, "running", StepName::PlanGenerate).await;
    let key = step_task_key(instance.id, "plan_generate", 0);
    let first = queue
        .enqueue(instance.id, "plan_generate", &json!({}), Some(&key), None)
        .await
        .expect("first enqueue");
    let dup = queue
        .enqueue(instance.id, "plan_generate", &json!({}), Some(&key), None)
        .await
        .expect("duplicate enqueue");
    assert_eq!(first.id, dup.id);
    let tasks = queries::task::list_by_workflow(&pool, instance.id)
        .await
        .expect("list tasks");
    assert_eq!(tasks.len(), 1, "duplicate enqueue must not create a row");

    // --- Retry exhaustion: three failed attempts, then terminal, with
    // one task.failed event per attempt. retry_base_secs is 0 so failed
    // attempts come straight back.
    let worker = config.worker_id.clone();
    for attempt in 1..=3 {
        let leased = queue
            .lease_next(&worker, 60)
            .await
            .expect("lease")
            .expect("task should be eligible again");
        assert_eq!(leased.id, first.id);

        let failed = queue
            .fail(leased.id, &worker, "planner unavailable", true)
            .await
            .expect("fail");
        assert_eq!(failed.attempts, attempt);
        if attempt < 3 {
            assert_eq!(failed.task_status(), TaskStatus::Pending);
        } else {
            assert_eq!(failed.task_status(), TaskStatus::Failed);
        }
    }
    let failure_events = queries::event::count(&pool, instance.id, Some("task.failed"), None)
        .await
        .expect("count events");
    assert_eq!(failure_events, 3, "exactly one task.failed event per attempt");
    assert!(
        queue.lease_next(&worker, 60).await.expect("lease").is_none(),
        "a terminally failed task must not be leasable"
    );

    // --- Reclaim and fencing: an expired lease moves to a new holder
    // and the old holder's writes are rejected.
    let instance = support::seed_instance(&pool, "running", StepName::PlanGenerate).await;
    let task = queue
        .enqueue(instance.id, "plan_generate", &json!({}), None, None)
        .await
        .expect("enqueue");

    // Zero-second lease: expired on arrival.
    let stale = queue
        .lease_next("worker-a", 0)
        .await
        .expect("lease a")
        .expect("task eligible");
    assert_eq!(stale.id, task.id);

    let reclaimed = queue
        .lease_next("worker-b", 60)
        .await
        .expect("lease b")
        .expect("expired lease should be reclaimable");
    assert_eq!(reclaimed.id, task.id);
    assert_eq!(reclaimed.leased_by.as_deref(), Some("worker-b"));

    let stale_complete = queue.complete(task.id, "worker-a", &json!({})).await;
    assert!(
        matches!(stale_complete, Err(AppError::Conflict(_))),
        "stale holder must not complete the task"
    );
    assert!(
        !queue
            .heartbeat(task.id, "worker-a", 60)
            .await
            .expect("heartbeat"),
        "stale holder must not extend the lease"
    );

    let done = queue
        .complete(task.id, "worker-b", &json!({}))
        .await
        .expect("complete");
    assert_eq!(done.task_status(), TaskStatus::Completed);

    // --- Terminal instances: their tasks are never leased.
    let instance = support::seed_instance(&pool, "running", StepName::PlanGenerate).await;
    queue
        .enqueue(instance.id, "plan_generate", &json!({}), None, None)
        .await
        .expect("enqueue");
    queries::workflow::apply_transition(
        &pool,
        instance.id,
        "cancelled",
        "plan_generate",
        &instance.context,
        None,
    )
    .await
    .expect("cancel instance");

    assert!(
        queue.lease_next(&worker, 60).await.expect("lease").is_none(),
        "tasks of terminal instances must stay unleasable"
    );

    // --- Per-task cancel: a cancelled pending task leaves the queue.
    let instance = support::seed_instance(&pool, "running", StepName::PlanGenerate).await;
    let task = queue
        .enqueue(instance.id, "plan_generate", &json!({}), None, None)
        .await
        .expect("enqueue");

    let cancelled = queue.cancel(task.id).await.expect("cancel");
    assert_eq!(cancelled.task_status(), TaskStatus::Cancelled);
    assert!(
        queue.lease_next(&worker, 60).await.expect("lease").is_none(),
        "a cancelled task must not be leasable"
    );

    // Cancelling again is a no-op.
    let again = queue.cancel(task.id).await.expect("re-cancel");
    assert_eq!(again.task_status(), TaskStatus::Cancelled);

    // --- Per-task cancel of a leased task fences out its holder.
    let instance = support::seed_instance(&pool, "running", StepName::PlanGenerate).await;
    let task = queue
        .enqueue(instance.id, "plan_generate", &json!({}), None, None)
        .await
        .expect("enqueue");
    let leased = queue
        .lease_next(&worker, 60)
        .await
        .expect("lease")
        .expect("task eligible");
    assert_eq!(leased.id, task.id);

    let cancelled = queue.cancel(task.id).await.expect("cancel leased");
    assert_eq!(cancelled.task_status(), TaskStatus::Cancelled);
    assert!(cancelled.leased_by.is_none(), "cancel must clear the lease");

    let stale = queue.complete(task.id, &worker, &json!({})).await;
    assert!(
        matches!(stale, Err(AppError::Conflict(_))),
        "the fenced-out holder must not write a result"
    );
    assert!(
        queue.lease_next(&worker, 60).await.expect("lease").is_none(),
        "a cancelled task must stay out of the queue"
    );

    let cancel_events = queries::event::count(&pool, instance.id, Some("task.cancelled"), None)
        .await
        .expect("count events");
    assert_eq!(cancel_events, 1);

    // --- A completed task cannot be cancelled.
    let instance = support::seed_instance(&pool, "running", StepName::PlanGenerate).await;
    let task = queue
        .enqueue(instance.id, "plan_generate", &json!({}), None, None)
        .await
        .expect("enqueue");
    let leased = queue
        .lease_next(&worker, 60)
        .await
        .expect("lease")
        .expect("task eligible");
    queue
        .complete(leased.id, &worker, &json!({"ok": true}))
        .await
        .expect("complete");

    let refused = queue.cancel(task.id).await;
    assert!(
        matches!(refused, Err(AppError::Conflict(_))),
        "a completed task must refuse cancellation"
    );
}
