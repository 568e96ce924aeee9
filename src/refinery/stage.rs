// SPDX-License-Identifier: MIT

//! Stage contract: read the state, return a partial update
//!
//! A stage never mutates state directly. It returns a [`StageUpdate`] that
//! the pipeline applies through each field's reducer. Capability failures
//! are the stage's own business: it substitutes a fallback value and records
//! the error on the update, so nothing ever unwinds into the engine.

use crate::adk::model::TokenUsage;
use crate::refinery::state::WorkflowState;
use async_trait::async_trait;
use serde_json::Value;

/// One unit of pipeline work
#[async_trait]
pub trait Stage: Send + Sync {
    /// Returns the stage name
    fn name(&self) -> &str;

    /// Compute this stage's contribution for the current pass
    async fn execute(&self, state: &WorkflowState) -> StageUpdate;
}

/// A single field change
#[derive(Debug, Clone, PartialEq)]
pub enum FieldOp {
    /// Route through the field's reducer
    Set(String, Value),
    /// Always extend the array field
    Append(String, Value),
}

/// Partial update produced by a stage
#[derive(Debug, Clone, Default)]
pub struct StageUpdate {
    ops: Vec<FieldOp>,
    score: Option<f64>,
    errors: Vec<String>,
    status: Option<String>,
    llm_calls: u64,
    tokens: TokenUsage,
    search_calls: u64,
}

impl StageUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, key: &str, value: Value) -> Self {
        self.ops.push(FieldOp::Set(key.to_string(), value));
        self
    }

    pub fn append(mut self, key: &str, value: Value) -> Self {
        self.ops.push(FieldOp::Append(key.to_string(), value));
        self
    }

    /// Report a new quality score ("latest wins")
    pub fn score(mut self, score: f64) -> Self {
        self.score = Some(score);
        self
    }

    /// Record a degradation; the error is appended to the state's log
    pub fn error(mut self, error: impl Into<String>) -> Self {
        self.errors.push(error.into());
        self
    }

    pub fn status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    /// Count one LLM call, with usage when the provider reported it
    pub fn record_call(mut self, usage: Option<TokenUsage>) -> Self {
        self.llm_calls += 1;
        if let Some(u) = usage {
            self.tokens.prompt_tokens += u.prompt_tokens;
            self.tokens.completion_tokens += u.completion_tokens;
        }
        self
    }

    pub fn search_calls(mut self, calls: u64) -> Self {
        self.search_calls += calls;
        self
    }

    /// Whether the stage fell back to a degraded result
    pub fn is_degraded(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn ops(&self) -> &[FieldOp] {
        &self.ops
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn score_value(&self) -> Option<f64> {
        self.score
    }

    /// Merge this update into the state on behalf of `stage`
    pub fn apply_to(self, stage: &str, state: &mut WorkflowState) {
        for op in self.ops {
            match op {
                FieldOp::Set(key, value) => state.update(&key, value),
                FieldOp::Append(key, value) => state.append(&key, value),
            }
        }
        if let Some(score) = self.score {
            state.set_score(score);
        }
        for error in self.errors {
            log::warn!("Stage {} degraded: {}", stage, error);
            state.push_error(error);
        }
        if let Some(status) = self.status {
            state.set_status(status);
        }
        state
            .usage_mut()
            .record(stage, self.llm_calls, self.tokens, self.search_calls);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::refinery::state::{FieldType, ReducerType, StateSchema};
    use serde_json::json;

    #[test]
    fn test_apply_routes_through_reducers() {
        let schema = StateSchema::new()
            .field("sources", FieldType::Array, ReducerType::Append)
            .field("report", FieldType::Object, ReducerType::Overwrite);
        let mut state = WorkflowState::new("q", 2, &schema);

        StageUpdate::new()
            .set("sources", json!([{"url": "a"}]))
            .set("report", json!({"title": "v1"}))
            .apply_to("test", &mut state);
        StageUpdate::new()
            .set("sources", json!([{"url": "b"}]))
            .set("report", json!({"title": "v2"}))
            .score(72.0)
            .apply_to("test", &mut state);

        assert_eq!(state.len_of("sources"), 2);
        assert_eq!(state.get_path("report.title"), Some(&json!("v2")));
        assert_eq!(state.score(), 72.0);
    }

    #[test]
    fn test_degraded_update_appends_errors() {
        let mut state = WorkflowState::empty("q", 1);

        let update = StageUpdate::new()
            .set("sub_queries", json!(["q"]))
            .error("Decomposer: generation failed");
        assert!(update.is_degraded());

        update.apply_to("decompose", &mut state);
        StageUpdate::new()
            .error("Decomposer: again")
            .apply_to("decompose", &mut state);

        assert_eq!(
            state.errors(),
            &["Decomposer: generation failed", "Decomposer: again"]
        );
        assert_eq!(state.get("sub_queries"), Some(&json!(["q"])));
    }

    #[test]
    fn test_usage_is_attributed_to_stage() {
        let mut state = WorkflowState::empty("q", 1);

        StageUpdate::new()
            .record_call(Some(TokenUsage {
                prompt_tokens: 30,
                completion_tokens: 10,
            }))
            .record_call(None)
            .search_calls(2)
            .status("Retrieved 4 new sources")
            .apply_to("retrieve", &mut state);

        let usage = state.usage().stage("retrieve").unwrap();
        assert_eq!(usage.llm_calls, 2);
        assert_eq!(usage.total_tokens(), 40);
        assert_eq!(usage.search_calls, 2);
        assert_eq!(state.status(), "Retrieved 4 new sources");
    }
}
