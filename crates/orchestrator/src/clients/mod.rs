//! External collaborator clients.
//!
//! Step handlers depend on these traits only; the reqwest
//! implementations are wired in at startup so tests can substitute
//! in-memory fakes.

pub mod cluster;
pub mod planner;
pub mod reporter;

pub use cluster::{ClusterClient, HttpClusterClient, JobRequest, JobState, JobSubmission};
pub use planner::{
    AnalysisDocument, AnalysisRequest, HttpPlannerClient, PlanDocument, PlanRequest, PlannerClient,
};
pub use reporter::{
    HttpReporterClient, ReportDocument, ReportRequest, ReporterClient, ReviewDocument,
    ReviewRequest,
};
