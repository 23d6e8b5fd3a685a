//! Pipeline step handlers.
//!
//! Each handler performs one step's external work and reports what it
//! learned as a context patch; the runner owns all persistence.

pub mod analysis;
pub mod experiment;
pub mod plan;
pub mod report;
pub mod review;

pub use analysis::AnalysisStepHandler;
pub use experiment::ExperimentStepHandler;
pub use plan::PlanStepHandler;
pub use report::ReportStepHandler;
pub use review::ReviewStepHandler;

use std::sync::Arc;

use crate::clients::{ClusterClient, PlannerClient, ReporterClient};
use crate::config::AppConfig;
use crate::engine::registry::StepRegistry;

/// Build the full pipeline registry with the given collaborators.
pub fn build_registry(
    config: &AppConfig,
    planner: Arc<dyn PlannerClient>,
    cluster: Arc<dyn ClusterClient>,
    reporter: Arc<dyn ReporterClient>,
) -> StepRegistry {
    let mut registry = StepRegistry::new();
    registry.register(Arc::new(PlanStepHandler::new(planner.clone())));
    registry.register(Arc::new(ExperimentStepHandler::new(
        cluster,
        config.job_poll_interval_secs,
        config.job_poll_max_attempts,
    )));
    registry.register(Arc::new(AnalysisStepHandler::new(planner)));
    registry.register(Arc::new(ReportStepHandler::new(reporter.clone())));
    registry.register(Arc::new(ReviewStepHandler::new(reporter)));
    registry
}
