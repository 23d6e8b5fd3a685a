//! Event log read service.

use uuid::Uuid;

use crate::db::models::WorkflowEvent;
use crate::db::{queries, DbPool};
use crate::error::{AppError, AppResult};

#[derive(Clone)]
pub struct EventService {
    db: DbPool,
}

impl EventService {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    /// List a workflow's events, newest first.
    pub async fn list(&self, workflow_id: Uuid, limit: Option<i64>) -> AppResult<Vec<WorkflowEvent>> {
        if queries::workflow::get(&self.db, workflow_id).await?.is_none() {
            return Err(AppError::NotFound(format!(
                "Workflow not found: {workflow_id}"
            )));
        }

        let limit = limit.unwrap_or(100).clamp(1, 1000);
        queries::event::list_by_workflow(&self.db, workflow_id, limit).await
    }
}
