//! Labdesk Orchestrator Library
//!
//! This crate provides the workflow orchestration engine for Labdesk,
//! the dashboard for managing ML research projects. It drives each
//! research run through a fixed pipeline (plan, experiments, analysis,
//! report, review) with human approval gates, and keeps every run
//! crash-recoverable:
//!
//! - **Workflow Instance Store**: one row per pipeline run, with its
//!   status, current step, and accumulated context.
//! - **Task Lease Queue**: hands each unit of work to exactly one worker
//!   via `FOR UPDATE SKIP LOCKED` leases with fencing tokens, automatic
//!   reclaim on expiry, and bounded retries with exponential backoff.
//! - **Human Gate Manager**: approval checkpoints that block progression
//!   until a human (or the autonomous auto-approver) responds.
//! - **Event Log**: append-only audit record; never consulted for
//!   control flow.
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading from environment variables
//! - [`db`]: Database connectivity, models, and queries
//! - [`engine`]: Pipeline, queue, gates, and the runner
//! - [`clients`]: External collaborator clients behind traits
//! - [`error`]: Custom error types with Axum integration
//! - [`handlers`]: HTTP route handlers
//! - [`services`]: Business logic between handlers and queries
//! - [`state`]: Shared application state

pub mod clients;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod services;
pub mod state;

pub use error::{AppError, AppResult};
