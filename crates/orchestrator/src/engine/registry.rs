//! Step registry: maps pipeline steps to their handlers.
//!
//! Handlers are pure with respect to the engine: they receive the current
//! instance and their task payload and return an outcome; all state
//! changes flow back through the orchestrator. The registry is validated
//! at startup so a pipeline step without a handler fails fast.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::db::models::WorkflowInstance;
use crate::engine::pipeline::StepName;
use crate::error::{AppError, AppResult};

/// What a handler tells the orchestrator after executing a step.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    /// The step to advance to; `None` completes the pipeline.
    pub next_step: Option<StepName>,
    /// Shallow patch merged into the instance context.
    pub context_patch: serde_json::Value,
    /// When true, the orchestrator opens a human gate for `next_step`
    /// instead of enqueueing a task.
    pub requires_approval: bool,
}

impl StepOutcome {
    /// Advance to an executable step.
    pub fn advance(next_step: StepName, context_patch: serde_json::Value) -> Self {
        Self {
            next_step: Some(next_step),
            context_patch,
            requires_approval: next_step.is_gate(),
        }
    }

    /// Finish the pipeline.
    pub fn finish(context_patch: serde_json::Value) -> Self {
        Self {
            next_step: None,
            context_patch,
            requires_approval: false,
        }
    }
}

/// A handler for one executable pipeline step.
#[async_trait]
pub trait StepHandler: Send + Sync {
    /// The step this handler executes.
    fn step(&self) -> StepName;

    /// Execute the step against the current context and task payload.
    async fn execute(
        &self,
        instance: &WorkflowInstance,
        payload: &serde_json::Value,
    ) -> AppResult<StepOutcome>;
}

/// Registry of step handlers, validated at startup.
#[derive(Default)]
pub struct StepRegistry {
    handlers: HashMap<StepName, Arc<dyn StepHandler>>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under its own step name.
    pub fn register(&mut self, handler: Arc<dyn StepHandler>) {
        self.handlers.insert(handler.step(), handler);
    }

    /// Look up the handler for a step.
    pub fn get(&self, step: StepName) -> Option<Arc<dyn StepHandler>> {
        self.handlers.get(&step).cloned()
    }

    /// Fail fast when any executable pipeline step lacks a handler.
    pub fn validate(&self) -> AppResult<()> {
        let missing: Vec<&str> = StepName::ALL
            .iter()
            .filter(|step| !step.is_gate() && !self.handlers.contains_key(step))
            .map(|step| step.as_str())
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(AppError::Config(format!(
                "No handler registered for pipeline steps: {}",
                missing.join(", ")
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct NoopHandler(StepName);

    #[async_trait]
    impl StepHandler for NoopHandler {
        fn step(&self) -> StepName {
            self.0
        }

        async fn execute(
            &self,
            _instance: &WorkflowInstance,
            _payload: &serde_json::Value,
        ) -> AppResult<StepOutcome> {
            Ok(StepOutcome::finish(json!({})))
        }
    }

    fn full_registry() -> StepRegistry {
        let mut registry = StepRegistry::new();
        for step in StepName::ALL {
            if !step.is_gate() {
                registry.register(Arc::new(NoopHandler(step)));
            }
        }
        registry
    }

    #[test]
    fn test_validate_full_registry() {
        assert!(full_registry().validate().is_ok());
    }

    #[test]
    fn test_validate_reports_missing_steps() {
        let mut registry = StepRegistry::new();
        registry.register(Arc::new(NoopHandler(StepName::PlanGenerate)));

        let err = registry.validate().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("experiment_run"));
        assert!(msg.contains("analysis"));
        assert!(!msg.contains("plan_generate"));
        assert!(!msg.contains("hitl_direction"));
    }

    #[test]
    fn test_get_returns_registered_handler() {
        let registry = full_registry();
        assert!(registry.get(StepName::Report).is_some());
        assert!(registry.get(StepName::HitlReview).is_none());
    }

    #[test]
    fn test_advance_flags_gates() {
        let outcome = StepOutcome::advance(StepName::HitlDirection, json!({}));
        assert!(outcome.requires_approval);

        let outcome = StepOutcome::advance(StepName::Analysis, json!({}));
        assert!(!outcome.requires_approval);
    }
}
