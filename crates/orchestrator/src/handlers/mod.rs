//! Axum handlers for the orchestrator API.

pub mod events;
pub mod gates;
pub mod health;
pub mod workflows;
