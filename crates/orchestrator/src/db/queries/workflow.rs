//! Workflow instance queries.

use sqlx::PgExecutor;
use uuid::Uuid;

use crate::db::models::WorkflowInstance;
use crate::error::AppResult;

const COLUMNS: &str = "id, project_id, name, status, current_step, context, error_message, \
                       cancel_requested, created_at, started_at, completed_at, updated_at";

/// Insert a new workflow instance in `pending` status.
pub async fn insert<'e>(
    ex: impl PgExecutor<'e>,
    id: Uuid,
    project_id: Uuid,
    name: &str,
    current_step: &str,
    context: &serde_json::Value,
) -> AppResult<WorkflowInstance> {
    let query = format!(
        r#"
        INSERT INTO labdesk.workflow_instances (id, project_id, name, status, current_step, context)
        VALUES ($1, $2, $3, 'pending', $4, $5)
        RETURNING {COLUMNS}
        "#
    );

    let instance = sqlx::query_as::<_, WorkflowInstance>(&query)
        .bind(id)
        .bind(project_id)
        .bind(name)
        .bind(current_step)
        .bind(context)
        .fetch_one(ex)
        .await?;

    Ok(instance)
}

/// Get a workflow instance by id.
pub async fn get<'e>(
    ex: impl PgExecutor<'e>,
    id: Uuid,
) -> AppResult<Option<WorkflowInstance>> {
    let query = format!("SELECT {COLUMNS} FROM labdesk.workflow_instances WHERE id = $1");

    let instance = sqlx::query_as::<_, WorkflowInstance>(&query)
        .bind(id)
        .fetch_optional(ex)
        .await?;

    Ok(instance)
}

/// Get a workflow instance with a row lock. Used inside transactions to
/// serialize transition application against concurrent cancel/resolve
/// calls on the same instance.
pub async fn get_for_update<'e>(
    ex: impl PgExecutor<'e>,
    id: Uuid,
) -> AppResult<Option<WorkflowInstance>> {
    let query =
        format!("SELECT {COLUMNS} FROM labdesk.workflow_instances WHERE id = $1 FOR UPDATE");

    let instance = sqlx::query_as::<_, WorkflowInstance>(&query)
        .bind(id)
        .fetch_optional(ex)
        .await?;

    Ok(instance)
}

/// List workflow instances, newest first.
pub async fn list<'e>(
    ex: impl PgExecutor<'e>,
    project_id: Option<Uuid>,
    status: Option<&str>,
    limit: i64,
    offset: i64,
) -> AppResult<Vec<WorkflowInstance>> {
    let query = format!(
        r#"
        SELECT {COLUMNS}
        FROM labdesk.workflow_instances
        WHERE ($1::UUID IS NULL OR project_id = $1)
          AND ($2::TEXT IS NULL OR status = $2)
        ORDER BY created_at DESC
        LIMIT $3 OFFSET $4
        "#
    );

    let instances = sqlx::query_as::<_, WorkflowInstance>(&query)
        .bind(project_id)
        .bind(status)
        .bind(limit)
        .bind(offset)
        .fetch_all(ex)
        .await?;

    Ok(instances)
}

/// Apply a state transition: status, current step, context, and error
/// message in one write. `started_at` is stamped on the first move to
/// `running`; `completed_at` on any terminal status.
pub async fn apply_transition<'e>(
    ex: impl PgExecutor<'e>,
    id: Uuid,
    status: &str,
    current_step: &str,
    context: &serde_json::Value,
    error_message: Option<&str>,
) -> AppResult<WorkflowInstance> {
    let query = format!(
        r#"
        UPDATE labdesk.workflow_instances
        SET status = $2,
            current_step = $3,
            context = $4,
            error_message = $5,
            started_at = CASE WHEN $2 = 'running' THEN COALESCE(started_at, now()) ELSE started_at END,
            completed_at = CASE WHEN $2 IN ('completed', 'failed', 'cancelled') THEN now() ELSE completed_at END,
            updated_at = now()
        WHERE id = $1
        RETURNING {COLUMNS}
        "#
    );

    let instance = sqlx::query_as::<_, WorkflowInstance>(&query)
        .bind(id)
        .bind(status)
        .bind(current_step)
        .bind(context)
        .bind(error_message)
        .fetch_one(ex)
        .await?;

    Ok(instance)
}

/// Set the sticky `cancel_requested` flag. Returns `None` when the
/// instance is already terminal.
pub async fn request_cancel<'e>(
    ex: impl PgExecutor<'e>,
    id: Uuid,
) -> AppResult<Option<WorkflowInstance>> {
    let query = format!(
        r#"
        UPDATE labdesk.workflow_instances
        SET cancel_requested = TRUE,
            updated_at = now()
        WHERE id = $1
          AND status NOT IN ('completed', 'failed', 'cancelled')
        RETURNING {COLUMNS}
        "#
    );

    let instance = sqlx::query_as::<_, WorkflowInstance>(&query)
        .bind(id)
        .fetch_optional(ex)
        .await?;

    Ok(instance)
}
