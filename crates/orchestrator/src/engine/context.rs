//! Typed workflow context.
//!
//! The context document accumulates outputs of prior steps. Known keys are
//! typed fields; anything else lands in the flattened `extra` bag so older
//! readers keep working when a newer pipeline writes keys they do not know.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::AppResult;

/// How gates are resolved for this run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionMode {
    /// Gates block until a human resolves them.
    #[default]
    HumanInTheLoop,
    /// Gates are auto-approved with their first option.
    Autonomous,
}

/// A recorded gate decision, folded into context at resolution time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateDecision {
    pub option: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// The accumulated context of one pipeline run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowContext {
    /// Context schema version.
    #[serde(default = "default_version")]
    pub version: u32,

    #[serde(default)]
    pub decision_mode: DecisionMode,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_by: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_experiments: Option<i32>,

    /// Incremented on every changes-requested rewind. Task idempotency
    /// keys carry the revision so a rewound step can be enqueued again.
    #[serde(default)]
    pub revision: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_id: Option<String>,

    /// Gate decisions keyed by step name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub gate_decisions: BTreeMap<String, GateDecision>,

    /// Forward-compatibility bag for step outputs with no typed field.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn default_version() -> u32 {
    1
}

impl WorkflowContext {
    /// Deserialize from the persisted JSONB document.
    pub fn from_value(value: &serde_json::Value) -> AppResult<Self> {
        Ok(serde_json::from_value(value.clone())?)
    }

    /// Serialize back into the persisted JSONB document.
    pub fn to_value(&self) -> AppResult<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Apply a handler's context patch: shallow merge, patch keys win.
    /// Known keys round-trip through the typed fields; unknown keys land
    /// in `extra`.
    pub fn apply_patch(&mut self, patch: &serde_json::Value) -> AppResult<()> {
        let serde_json::Value::Object(patch_map) = patch else {
            return Ok(());
        };

        let mut merged = match self.to_value()? {
            serde_json::Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        for (key, value) in patch_map {
            merged.insert(key.clone(), value.clone());
        }

        *self = serde_json::from_value(serde_json::Value::Object(merged))?;
        Ok(())
    }

    /// Fold a gate decision into the context.
    pub fn record_gate_decision(&mut self, step: &str, option: &str, comment: Option<&str>) {
        self.gate_decisions.insert(
            step.to_string(),
            GateDecision {
                option: option.to_string(),
                comment: comment.map(str::to_string),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_round_trip() {
        let ctx = WorkflowContext::default();
        let value = ctx.to_value().unwrap();
        let back = WorkflowContext::from_value(&value).unwrap();
        assert_eq!(back.decision_mode, DecisionMode::HumanInTheLoop);
        assert_eq!(back.revision, 0);
    }

    #[test]
    fn test_apply_patch_typed_and_extra() {
        let mut ctx = WorkflowContext::default();
        ctx.apply_patch(&json!({
            "plan_id": "plan-42",
            "gpu_hours": 12.5
        }))
        .unwrap();

        assert_eq!(ctx.plan_id.as_deref(), Some("plan-42"));
        assert_eq!(ctx.extra.get("gpu_hours"), Some(&json!(12.5)));
    }

    #[test]
    fn test_apply_patch_overwrites() {
        let mut ctx = WorkflowContext {
            plan_id: Some("plan-1".to_string()),
            ..Default::default()
        };
        ctx.apply_patch(&json!({"plan_id": "plan-2"})).unwrap();
        assert_eq!(ctx.plan_id.as_deref(), Some("plan-2"));
    }

    #[test]
    fn test_apply_patch_keeps_unrelated_fields() {
        let mut ctx = WorkflowContext {
            max_experiments: Some(8),
            revision: 2,
            ..Default::default()
        };
        ctx.apply_patch(&json!({"report_id": "rep-7"})).unwrap();
        assert_eq!(ctx.max_experiments, Some(8));
        assert_eq!(ctx.revision, 2);
        assert_eq!(ctx.report_id.as_deref(), Some("rep-7"));
    }

    #[test]
    fn test_non_object_patch_is_ignored() {
        let mut ctx = WorkflowContext::default();
        ctx.apply_patch(&json!("not an object")).unwrap();
        assert!(ctx.plan_id.is_none());
    }

    #[test]
    fn test_record_gate_decision() {
        let mut ctx = WorkflowContext::default();
        ctx.record_gate_decision("hitl_direction", "approve_plan", Some("looks good"));
        let decision = ctx.gate_decisions.get("hitl_direction").unwrap();
        assert_eq!(decision.option, "approve_plan");
        assert_eq!(decision.comment.as_deref(), Some("looks good"));
    }

    #[test]
    fn test_unknown_keys_survive_round_trip() {
        let value = json!({
            "version": 1,
            "decision_mode": "autonomous",
            "dataset_digest": "sha256:abc"
        });
        let ctx = WorkflowContext::from_value(&value).unwrap();
        assert_eq!(ctx.decision_mode, DecisionMode::Autonomous);
        let back = ctx.to_value().unwrap();
        assert_eq!(back.get("dataset_digest"), Some(&json!("sha256:abc")));
    }
}
