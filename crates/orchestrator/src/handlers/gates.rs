//! Human gate API handlers.

use axum::{
    extract::{Path, State},
    Json,
};
use uuid::Uuid;

use crate::db::models::HumanGate;
use crate::error::AppError;
use crate::services::{GateService, ResolveGateRequest};

/// List a workflow's gates.
///
/// `GET /api/workflows/{id}/gates`
pub async fn list(
    State(service): State<GateService>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<HumanGate>>, AppError> {
    let gates = service.list(id).await?;
    Ok(Json(gates))
}

/// Resolve a pending gate.
///
/// `POST /api/workflows/{id}/gates/{gate_id}/resolve`
pub async fn resolve(
    State(service): State<GateService>,
    Path((id, gate_id)): Path<(Uuid, Uuid)>,
    Json(request): Json<ResolveGateRequest>,
) -> Result<Json<HumanGate>, AppError> {
    let gate = service.resolve(id, gate_id, request).await?;
    Ok(Json(gate))
}
