//! Workflow task queries.
//!
//! The lease queue invariants live in these statements: lease grant is one
//! conditional update over a `FOR UPDATE SKIP LOCKED` selection, idempotent
//! enqueue rides the partial unique index on `idempotency_key`, and every
//! post-lease write is fenced on `leased_by`.

use chrono::{DateTime, Utc};
use sqlx::PgExecutor;
use uuid::Uuid;

use crate::db::models::WorkflowTask;
use crate::error::AppResult;

const COLUMNS: &str = "id, workflow_id, step, status, payload, result, attempts, max_attempts, \
                       run_after, lease_until, leased_by, idempotency_key, error_message, \
                       created_at, started_at, completed_at";

/// Insert a pending task. Returns `None` when the idempotency key already
/// exists; callers then fetch the existing row.
#[allow(clippy::too_many_arguments)]
pub async fn insert<'e>(
    ex: impl PgExecutor<'e>,
    id: Uuid,
    workflow_id: Uuid,
    step: &str,
    payload: &serde_json::Value,
    max_attempts: i32,
    run_after: Option<DateTime<Utc>>,
    idempotency_key: Option<&str>,
) -> AppResult<Option<WorkflowTask>> {
    let query = format!(
        r#"
        INSERT INTO labdesk.workflow_tasks
            (id, workflow_id, step, status, payload, max_attempts, run_after, idempotency_key)
        VALUES ($1, $2, $3, 'pending', $4, $5, COALESCE($6, now()), $7)
        ON CONFLICT (idempotency_key) WHERE idempotency_key IS NOT NULL DO NOTHING
        RETURNING {COLUMNS}
        "#
    );

    let task = sqlx::query_as::<_, WorkflowTask>(&query)
        .bind(id)
        .bind(workflow_id)
        .bind(step)
        .bind(payload)
        .bind(max_attempts)
        .bind(run_after)
        .bind(idempotency_key)
        .fetch_optional(ex)
        .await?;

    Ok(task)
}

/// Get a task by id.
pub async fn get<'e>(ex: impl PgExecutor<'e>, id: Uuid) -> AppResult<Option<WorkflowTask>> {
    let query = format!("SELECT {COLUMNS} FROM labdesk.workflow_tasks WHERE id = $1");

    let task = sqlx::query_as::<_, WorkflowTask>(&query)
        .bind(id)
        .fetch_optional(ex)
        .await?;

    Ok(task)
}

/// Get a task by idempotency key.
pub async fn get_by_idempotency_key<'e>(
    ex: impl PgExecutor<'e>,
    key: &str,
) -> AppResult<Option<WorkflowTask>> {
    let query = format!("SELECT {COLUMNS} FROM labdesk.workflow_tasks WHERE idempotency_key = $1");

    let task = sqlx::query_as::<_, WorkflowTask>(&query)
        .bind(key)
        .fetch_optional(ex)
        .await?;

    Ok(task)
}

/// Atomically lease the next eligible task for `worker_id`.
///
/// Eligible: a pending task whose `run_after` has passed and whose lease
/// (if any) has expired, or a leased/running task whose holder stopped
/// heartbeating. Tasks of terminal instances are never selected. Oldest
/// `run_after` wins, ties broken by creation order. `SKIP LOCKED` makes
/// two racing workers pick different rows or none.
pub async fn lease_next<'e>(
    ex: impl PgExecutor<'e>,
    worker_id: &str,
    lease_secs: u64,
) -> AppResult<Option<WorkflowTask>> {
    let query = format!(
        r#"
        UPDATE labdesk.workflow_tasks t
        SET status = 'leased',
            leased_by = $1,
            lease_until = now() + make_interval(secs => $2),
            started_at = COALESCE(t.started_at, now())
        WHERE t.id = (
            SELECT c.id
            FROM labdesk.workflow_tasks c
            JOIN labdesk.workflow_instances w ON w.id = c.workflow_id
            WHERE c.run_after <= now()
              AND w.status NOT IN ('completed', 'failed', 'cancelled')
              AND (
                    (c.status = 'pending' AND (c.lease_until IS NULL OR c.lease_until < now()))
                 OR (c.status IN ('leased', 'running') AND c.lease_until < now())
              )
            ORDER BY c.run_after ASC, c.created_at ASC
            FOR UPDATE OF c SKIP LOCKED
            LIMIT 1
        )
        RETURNING {COLUMNS}
        "#
    );

    let task = sqlx::query_as::<_, WorkflowTask>(&query)
        .bind(worker_id)
        .bind(lease_secs as f64)
        .fetch_optional(ex)
        .await?;

    Ok(task)
}

/// Move a leased task to `running`. Fenced on the lease holder.
pub async fn mark_running<'e>(
    ex: impl PgExecutor<'e>,
    id: Uuid,
    worker_id: &str,
) -> AppResult<Option<WorkflowTask>> {
    let query = format!(
        r#"
        UPDATE labdesk.workflow_tasks
        SET status = 'running'
        WHERE id = $1 AND leased_by = $2 AND status = 'leased'
        RETURNING {COLUMNS}
        "#
    );

    let task = sqlx::query_as::<_, WorkflowTask>(&query)
        .bind(id)
        .bind(worker_id)
        .fetch_optional(ex)
        .await?;

    Ok(task)
}

/// Extend the lease for long-running work. Returns `None` when the lease
/// has been reclaimed; the caller must treat that as a fencing signal and
/// abandon further result-writing.
pub async fn extend_lease<'e>(
    ex: impl PgExecutor<'e>,
    id: Uuid,
    worker_id: &str,
    lease_secs: u64,
) -> AppResult<Option<WorkflowTask>> {
    let query = format!(
        r#"
        UPDATE labdesk.workflow_tasks
        SET lease_until = now() + make_interval(secs => $3)
        WHERE id = $1 AND leased_by = $2 AND status IN ('leased', 'running')
        RETURNING {COLUMNS}
        "#
    );

    let task = sqlx::query_as::<_, WorkflowTask>(&query)
        .bind(id)
        .bind(worker_id)
        .bind(lease_secs as f64)
        .fetch_optional(ex)
        .await?;

    Ok(task)
}

/// Complete a task with its result. Fenced: a stale holder whose lease was
/// reclaimed matches no row.
pub async fn complete<'e>(
    ex: impl PgExecutor<'e>,
    id: Uuid,
    worker_id: &str,
    result: &serde_json::Value,
) -> AppResult<Option<WorkflowTask>> {
    let query = format!(
        r#"
        UPDATE labdesk.workflow_tasks
        SET status = 'completed',
            result = $3,
            lease_until = NULL,
            leased_by = NULL,
            completed_at = now()
        WHERE id = $1 AND leased_by = $2 AND status IN ('leased', 'running')
        RETURNING {COLUMNS}
        "#
    );

    let task = sqlx::query_as::<_, WorkflowTask>(&query)
        .bind(id)
        .bind(worker_id)
        .bind(result)
        .fetch_optional(ex)
        .await?;

    Ok(task)
}

/// Record a failed attempt. Fenced. The caller decides between a retry
/// (`status = 'pending'` with a pushed-forward `run_after`) and a terminal
/// failure.
pub async fn record_failure<'e>(
    ex: impl PgExecutor<'e>,
    id: Uuid,
    worker_id: &str,
    new_status: &str,
    run_after: DateTime<Utc>,
    error_message: &str,
) -> AppResult<Option<WorkflowTask>> {
    let query = format!(
        r#"
        UPDATE labdesk.workflow_tasks
        SET attempts = attempts + 1,
            status = $3,
            run_after = $4,
            error_message = $5,
            lease_until = NULL,
            leased_by = NULL,
            completed_at = CASE WHEN $3 = 'failed' THEN now() ELSE completed_at END
        WHERE id = $1 AND leased_by = $2 AND status IN ('leased', 'running')
        RETURNING {COLUMNS}
        "#
    );

    let task = sqlx::query_as::<_, WorkflowTask>(&query)
        .bind(id)
        .bind(worker_id)
        .bind(new_status)
        .bind(run_after)
        .bind(error_message)
        .fetch_optional(ex)
        .await?;

    Ok(task)
}

/// Cancel a single task. Matches any status except `completed` (and the
/// already-cancelled no-op case); clearing `leased_by` fences out a
/// holder still running it.
pub async fn cancel<'e>(ex: impl PgExecutor<'e>, id: Uuid) -> AppResult<Option<WorkflowTask>> {
    let query = format!(
        r#"
        UPDATE labdesk.workflow_tasks
        SET status = 'cancelled',
            lease_until = NULL,
            leased_by = NULL,
            completed_at = now()
        WHERE id = $1 AND status IN ('pending', 'leased', 'running', 'failed')
        RETURNING {COLUMNS}
        "#
    );

    let task = sqlx::query_as::<_, WorkflowTask>(&query)
        .bind(id)
        .fetch_optional(ex)
        .await?;

    Ok(task)
}

/// Cancel every non-completed task of an instance. Returns the cancelled
/// rows so the caller can log per-task events.
pub async fn cancel_for_workflow<'e>(
    ex: impl PgExecutor<'e>,
    workflow_id: Uuid,
) -> AppResult<Vec<WorkflowTask>> {
    let query = format!(
        r#"
        UPDATE labdesk.workflow_tasks
        SET status = 'cancelled',
            lease_until = NULL,
            leased_by = NULL,
            completed_at = now()
        WHERE workflow_id = $1 AND status IN ('pending', 'leased', 'running')
        RETURNING {COLUMNS}
        "#
    );

    let tasks = sqlx::query_as::<_, WorkflowTask>(&query)
        .bind(workflow_id)
        .fetch_all(ex)
        .await?;

    Ok(tasks)
}

/// Reset a terminally failed or cancelled task back to `pending` so a
/// resumed instance can re-run its current step.
pub async fn reset<'e>(
    ex: impl PgExecutor<'e>,
    id: Uuid,
) -> AppResult<Option<WorkflowTask>> {
    let query = format!(
        r#"
        UPDATE labdesk.workflow_tasks
        SET status = 'pending',
            attempts = 0,
            run_after = now(),
            lease_until = NULL,
            leased_by = NULL,
            error_message = NULL,
            completed_at = NULL
        WHERE id = $1 AND status IN ('failed', 'cancelled')
        RETURNING {COLUMNS}
        "#
    );

    let task = sqlx::query_as::<_, WorkflowTask>(&query)
        .bind(id)
        .fetch_optional(ex)
        .await?;

    Ok(task)
}

/// Count tasks of an instance currently held by a worker. Used to decide
/// whether a cancellation can freeze the instance immediately.
pub async fn in_flight_count<'e>(ex: impl PgExecutor<'e>, workflow_id: Uuid) -> AppResult<i64> {
    let count: (i64,) = sqlx::query_as(
        r#"
        SELECT COUNT(*)
        FROM labdesk.workflow_tasks
        WHERE workflow_id = $1 AND status IN ('leased', 'running')
        "#,
    )
    .bind(workflow_id)
    .fetch_one(ex)
    .await?;

    Ok(count.0)
}

/// List tasks for an instance in creation order.
pub async fn list_by_workflow<'e>(
    ex: impl PgExecutor<'e>,
    workflow_id: Uuid,
) -> AppResult<Vec<WorkflowTask>> {
    let query = format!(
        r#"
        SELECT {COLUMNS}
        FROM labdesk.workflow_tasks
        WHERE workflow_id = $1
        ORDER BY created_at ASC
        "#
    );

    let tasks = sqlx::query_as::<_, WorkflowTask>(&query)
        .bind(workflow_id)
        .fetch_all(ex)
        .await?;

    Ok(tasks)
}
