//! Health check endpoints.

use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};

use crate::db::pool::health_check as db_health_check;
use crate::state::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthCheckResponse {
    pub status: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiHealthResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uptime_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Basic liveness check, suitable for load balancers.
///
/// `GET /health`
pub async fn health_check() -> Json<HealthCheckResponse> {
    Json(HealthCheckResponse {
        status: "ok".to_string(),
    })
}

/// Detailed health check including database connectivity.
///
/// `GET /api/health`
pub async fn api_health(
    State(state): State<AppState>,
) -> (StatusCode, Json<ApiHealthResponse>) {
    let (status_code, status, database) = match db_health_check(&state.db).await {
        Ok(()) => (StatusCode::OK, "ok", "connected"),
        Err(e) => {
            tracing::error!(error = %e, "Database health check failed");
            (StatusCode::SERVICE_UNAVAILABLE, "unhealthy", "disconnected")
        }
    };

    (
        status_code,
        Json(ApiHealthResponse {
            status: status.to_string(),
            database: Some(database.to_string()),
            uptime_seconds: Some(state.uptime_seconds()),
            version: Some(env!("CARGO_PKG_VERSION").to_string()),
        }),
    )
}
