//! Workflow instance API handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use crate::db::models::WorkflowInstance;
use crate::error::AppError;
use crate::services::{CreateWorkflowRequest, ListWorkflowsParams, WorkflowService};

/// Create a workflow instance and start its pipeline.
///
/// `POST /api/workflows`
pub async fn create(
    State(service): State<WorkflowService>,
    Json(request): Json<CreateWorkflowRequest>,
) -> Result<(StatusCode, Json<WorkflowInstance>), AppError> {
    let instance = service.create(request).await?;
    Ok((StatusCode::CREATED, Json(instance)))
}

/// List workflow instances.
///
/// `GET /api/workflows`
pub async fn list(
    State(service): State<WorkflowService>,
    Query(params): Query<ListWorkflowsParams>,
) -> Result<Json<Vec<WorkflowInstance>>, AppError> {
    let instances = service.list(params).await?;
    Ok(Json(instances))
}

/// Get one workflow instance.
///
/// `GET /api/workflows/{id}`
pub async fn get(
    State(service): State<WorkflowService>,
    Path(id): Path<Uuid>,
) -> Result<Json<WorkflowInstance>, AppError> {
    let instance = service.get(id).await?;
    Ok(Json(instance))
}

/// Request cancellation of a workflow.
///
/// `POST /api/workflows/{id}/cancel`
pub async fn cancel(
    State(service): State<WorkflowService>,
    Path(id): Path<Uuid>,
) -> Result<Json<WorkflowInstance>, AppError> {
    let instance = service.cancel(id).await?;
    Ok(Json(instance))
}

/// Resume a stalled workflow.
///
/// `POST /api/workflows/{id}/resume`
pub async fn resume(
    State(service): State<WorkflowService>,
    Path(id): Path<Uuid>,
) -> Result<Json<WorkflowInstance>, AppError> {
    let instance = service.resume(id).await?;
    Ok(Json(instance))
}
