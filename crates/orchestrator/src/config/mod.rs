//! Configuration for the Labdesk Orchestrator.
//!
//! Configuration is loaded from environment variables using `envy`.

mod app;
mod database;

pub use app::AppConfig;
pub use database::DatabaseConfig;
