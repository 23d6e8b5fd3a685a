//! Event log API handlers.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::db::models::WorkflowEvent;
use crate::error::AppError;
use crate::services::EventService;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListEventsQuery {
    pub limit: Option<i64>,
}

/// List a workflow's events, newest first.
///
/// `GET /api/workflows/{id}/events`
pub async fn list(
    State(service): State<EventService>,
    Path(id): Path<Uuid>,
    Query(query): Query<ListEventsQuery>,
) -> Result<Json<Vec<WorkflowEvent>>, AppError> {
    let events = service.list(id, query.limit).await?;
    Ok(Json(events))
}
