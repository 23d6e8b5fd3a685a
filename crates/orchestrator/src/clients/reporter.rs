//! Report and review generator client.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportRequest {
    pub workflow_id: Uuid,
    pub analysis_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportDocument {
    pub report_id: String,
    pub summary: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewRequest {
    pub workflow_id: Uuid,
    pub report_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewDocument {
    pub review_id: String,
    pub verdict: String,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Report rendering and automated review.
#[async_trait]
pub trait ReporterClient: Send + Sync {
    async fn render_report(&self, request: &ReportRequest) -> AppResult<ReportDocument>;

    async fn review_report(&self, request: &ReviewRequest) -> AppResult<ReviewDocument>;
}

/// HTTP implementation against the reporter service.
#[derive(Clone)]
pub struct HttpReporterClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpReporterClient {
    pub fn new(base_url: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .unwrap_or_default();

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl ReporterClient for HttpReporterClient {
    async fn render_report(&self, request: &ReportRequest) -> AppResult<ReportDocument> {
        let response = self
            .client
            .post(format!("{}/api/reports", self.base_url))
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::ExternalService(format!(
                "Reporter rejected report request ({status}): {body}"
            )));
        }

        Ok(response.json().await?)
    }

    async fn review_report(&self, request: &ReviewRequest) -> AppResult<ReviewDocument> {
        let response = self
            .client
            .post(format!("{}/api/reviews", self.base_url))
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::ExternalService(format!(
                "Reporter rejected review request ({status}): {body}"
            )));
        }

        Ok(response.json().await?)
    }
}
