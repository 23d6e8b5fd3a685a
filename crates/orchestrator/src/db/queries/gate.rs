//! Human gate queries.
//!
//! The single-pending-gate rule is the partial unique index
//! `human_gates_single_pending`; resolution is a single conditional update
//! so a gate can only ever be resolved once.

use sqlx::PgExecutor;
use uuid::Uuid;

use crate::db::models::HumanGate;
use crate::error::AppResult;

const COLUMNS: &str = "id, workflow_id, step, title, question, options, status, selected_option, \
                       comment, requested_by, requested_at, resolved_by, resolved_at";

/// Insert a pending gate. Returns `None` when a pending gate already
/// exists for this `(workflow_id, step)`.
#[allow(clippy::too_many_arguments)]
pub async fn insert<'e>(
    ex: impl PgExecutor<'e>,
    id: Uuid,
    workflow_id: Uuid,
    step: &str,
    title: &str,
    question: &str,
    options: &serde_json::Value,
    requested_by: &str,
) -> AppResult<Option<HumanGate>> {
    let query = format!(
        r#"
        INSERT INTO labdesk.human_gates (id, workflow_id, step, title, question, options, requested_by)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (workflow_id, step) WHERE status = 'pending' DO NOTHING
        RETURNING {COLUMNS}
        "#
    );

    let gate = sqlx::query_as::<_, HumanGate>(&query)
        .bind(id)
        .bind(workflow_id)
        .bind(step)
        .bind(title)
        .bind(question)
        .bind(options)
        .bind(requested_by)
        .fetch_optional(ex)
        .await?;

    Ok(gate)
}

/// Get a gate by id.
pub async fn get<'e>(ex: impl PgExecutor<'e>, id: Uuid) -> AppResult<Option<HumanGate>> {
    let query = format!("SELECT {COLUMNS} FROM labdesk.human_gates WHERE id = $1");

    let gate = sqlx::query_as::<_, HumanGate>(&query)
        .bind(id)
        .fetch_optional(ex)
        .await?;

    Ok(gate)
}

/// Get the pending gate for a `(workflow, step)` pair, if any.
pub async fn get_pending<'e>(
    ex: impl PgExecutor<'e>,
    workflow_id: Uuid,
    step: &str,
) -> AppResult<Option<HumanGate>> {
    let query = format!(
        r#"
        SELECT {COLUMNS}
        FROM labdesk.human_gates
        WHERE workflow_id = $1 AND step = $2 AND status = 'pending'
        "#
    );

    let gate = sqlx::query_as::<_, HumanGate>(&query)
        .bind(workflow_id)
        .bind(step)
        .fetch_optional(ex)
        .await?;

    Ok(gate)
}

/// List gates for a workflow in request order.
pub async fn list_by_workflow<'e>(
    ex: impl PgExecutor<'e>,
    workflow_id: Uuid,
) -> AppResult<Vec<HumanGate>> {
    let query = format!(
        r#"
        SELECT {COLUMNS}
        FROM labdesk.human_gates
        WHERE workflow_id = $1
        ORDER BY requested_at ASC
        "#
    );

    let gates = sqlx::query_as::<_, HumanGate>(&query)
        .bind(workflow_id)
        .fetch_all(ex)
        .await?;

    Ok(gates)
}

/// Pending gates belonging to live autonomous-mode instances. The runner
/// auto-approves these right after opening; a crash in that window leaves
/// the gate parked until the sweep picks it up here.
pub async fn pending_autonomous<'e>(ex: impl PgExecutor<'e>) -> AppResult<Vec<HumanGate>> {
    let query = format!(
        r#"
        SELECT {COLUMNS}
        FROM labdesk.human_gates
        WHERE status = 'pending'
          AND workflow_id IN (
              SELECT id
              FROM labdesk.workflow_instances
              WHERE status NOT IN ('completed', 'failed', 'cancelled')
                AND context->>'decision_mode' = 'autonomous'
          )
        ORDER BY requested_at ASC
        "#
    );

    let gates = sqlx::query_as::<_, HumanGate>(&query).fetch_all(ex).await?;

    Ok(gates)
}

/// Resolve a pending gate. Returns `None` when the gate was already
/// resolved; the caller must then skip all downstream effects.
pub async fn resolve<'e>(
    ex: impl PgExecutor<'e>,
    id: Uuid,
    status: &str,
    selected_option: Option<&str>,
    comment: Option<&str>,
    resolved_by: &str,
) -> AppResult<Option<HumanGate>> {
    let query = format!(
        r#"
        UPDATE labdesk.human_gates
        SET status = $2,
            selected_option = $3,
            comment = $4,
            resolved_by = $5,
            resolved_at = now()
        WHERE id = $1 AND status = 'pending'
        RETURNING {COLUMNS}
        "#
    );

    let gate = sqlx::query_as::<_, HumanGate>(&query)
        .bind(id)
        .bind(status)
        .bind(selected_option)
        .bind(comment)
        .bind(resolved_by)
        .fetch_optional(ex)
        .await?;

    Ok(gate)
}

/// Transition pending gates older than `max_age_secs` to `timeout`.
/// Returns the expired rows so the sweep can route each like a rejection.
pub async fn expire_pending<'e>(
    ex: impl PgExecutor<'e>,
    max_age_secs: u64,
) -> AppResult<Vec<HumanGate>> {
    let query = format!(
        r#"
        UPDATE labdesk.human_gates
        SET status = 'timeout',
            resolved_by = 'timeout-sweep',
            resolved_at = now()
        WHERE status = 'pending'
          AND requested_at < now() - make_interval(secs => $1)
        RETURNING {COLUMNS}
        "#
    );

    let gates = sqlx::query_as::<_, HumanGate>(&query)
        .bind(max_age_secs as f64)
        .fetch_all(ex)
        .await?;

    Ok(gates)
}
