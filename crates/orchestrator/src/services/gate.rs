//! Human gate service: listing and resolution.

use std::sync::Arc;

use serde::Deserialize;
use uuid::Uuid;

use crate::db::models::{GateStatus, HumanGate};
use crate::db::{queries, DbPool};
use crate::engine::gate::GateManager;
use crate::error::{AppError, AppResult};

/// Body of `POST /api/workflows/{id}/gates/{gate_id}/resolve`.
#[derive(Debug, Clone, Deserialize)]
pub struct ResolveGateRequest {
    /// One of `approved`, `rejected`, `changes_requested`.
    pub status: String,
    #[serde(default)]
    pub selected_option: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
    pub resolved_by: String,
}

#[derive(Clone)]
pub struct GateService {
    db: DbPool,
    manager: Arc<GateManager>,
}

impl GateService {
    pub fn new(db: DbPool, manager: Arc<GateManager>) -> Self {
        Self { db, manager }
    }

    /// List a workflow's gates in request order.
    pub async fn list(&self, workflow_id: Uuid) -> AppResult<Vec<HumanGate>> {
        if queries::workflow::get(&self.db, workflow_id).await?.is_none() {
            return Err(AppError::NotFound(format!(
                "Workflow not found: {workflow_id}"
            )));
        }

        queries::gate::list_by_workflow(&self.db, workflow_id).await
    }

    /// Resolve a gate on behalf of a human.
    pub async fn resolve(
        &self,
        workflow_id: Uuid,
        gate_id: Uuid,
        request: ResolveGateRequest,
    ) -> AppResult<HumanGate> {
        let status = GateStatus::parse(&request.status).ok_or_else(|| {
            AppError::Validation(format!("Unknown gate status: {}", request.status))
        })?;

        self.manager
            .resolve(
                workflow_id,
                gate_id,
                status,
                request.selected_option.as_deref(),
                request.comment.as_deref(),
                &request.resolved_by,
            )
            .await
    }
}
