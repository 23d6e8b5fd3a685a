//! Workflow event queries.

use sqlx::PgExecutor;
use uuid::Uuid;

use crate::db::models::WorkflowEvent;
use crate::error::AppResult;

const COLUMNS: &str = "id, workflow_id, task_id, event_type, level, message, data, created_at";

/// Append an event.
pub async fn insert<'e>(
    ex: impl PgExecutor<'e>,
    workflow_id: Uuid,
    task_id: Option<Uuid>,
    event_type: &str,
    level: &str,
    message: &str,
    data: Option<&serde_json::Value>,
) -> AppResult<WorkflowEvent> {
    let query = format!(
        r#"
        INSERT INTO labdesk.workflow_events (id, workflow_id, task_id, event_type, level, message, data)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING {COLUMNS}
        "#
    );

    let event = sqlx::query_as::<_, WorkflowEvent>(&query)
        .bind(Uuid::new_v4())
        .bind(workflow_id)
        .bind(task_id)
        .bind(event_type)
        .bind(level)
        .bind(message)
        .bind(data)
        .fetch_one(ex)
        .await?;

    Ok(event)
}

/// List events for a workflow, newest first.
pub async fn list_by_workflow<'e>(
    ex: impl PgExecutor<'e>,
    workflow_id: Uuid,
    limit: i64,
) -> AppResult<Vec<WorkflowEvent>> {
    let query = format!(
        r#"
        SELECT {COLUMNS}
        FROM labdesk.workflow_events
        WHERE workflow_id = $1
        ORDER BY created_at DESC
        LIMIT $2
        "#
    );

    let events = sqlx::query_as::<_, WorkflowEvent>(&query)
        .bind(workflow_id)
        .bind(limit)
        .fetch_all(ex)
        .await?;

    Ok(events)
}

/// Count events for a workflow by type and level.
pub async fn count<'e>(
    ex: impl PgExecutor<'e>,
    workflow_id: Uuid,
    event_type: Option<&str>,
    level: Option<&str>,
) -> AppResult<i64> {
    let count: (i64,) = sqlx::query_as(
        r#"
        SELECT COUNT(*)
        FROM labdesk.workflow_events
        WHERE workflow_id = $1
          AND ($2::TEXT IS NULL OR event_type = $2)
          AND ($3::TEXT IS NULL OR level = $3)
        "#,
    )
    .bind(workflow_id)
    .bind(event_type)
    .bind(level)
    .fetch_one(ex)
    .await?;

    Ok(count.0)
}
