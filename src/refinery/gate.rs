// SPDX-License-Identifier: MIT

//! Quality gate: accept the current pass or loop back for another

use crate::refinery::state::WorkflowState;
use serde::Serialize;
use serde_json::Value;

pub const DEFAULT_THRESHOLD: f64 = 65.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GateDecision {
    Accept,
    Refine,
}

/// Decides whether a finished pass is good enough
pub trait QualityGate: Send + Sync {
    fn decide(&self, state: &WorkflowState) -> GateDecision;

    /// Short label for logs
    fn describe(&self) -> String;
}

/// The ceiling wins over quality: the last allowed pass is always accepted
fn ceiling_reached(iteration: u32, max_iterations: u32) -> bool {
    iteration + 1 >= max_iterations
}

/// Score rule shared by [`ScoreGate`] and the tests
pub fn decide(score: f64, threshold: f64, iteration: u32, max_iterations: u32) -> GateDecision {
    if score >= threshold || ceiling_reached(iteration, max_iterations) {
        GateDecision::Accept
    } else {
        GateDecision::Refine
    }
}

/// Accepts once the report's score meets the threshold
#[derive(Debug, Clone)]
pub struct ScoreGate {
    threshold: f64,
}

impl ScoreGate {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }
}

impl Default for ScoreGate {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD)
    }
}

impl QualityGate for ScoreGate {
    fn decide(&self, state: &WorkflowState) -> GateDecision {
        decide(
            state.score(),
            self.threshold,
            state.iteration(),
            state.max_iterations(),
        )
    }

    fn describe(&self) -> String {
        format!("score >= {}", self.threshold)
    }
}

/// Refines while a field still holds something to resolve
///
/// Used for contradiction-driven loops where a stage writes the most
/// pressing open issue (e.g. `top_contradiction`) and clears it once none
/// remain.
#[derive(Debug, Clone)]
pub struct FieldGate {
    field: String,
}

impl FieldGate {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
        }
    }
}

fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(Value::Array(a)) => a.is_empty(),
        Some(Value::Object(o)) => o.is_empty(),
        Some(_) => false,
    }
}

impl QualityGate for FieldGate {
    fn decide(&self, state: &WorkflowState) -> GateDecision {
        if is_blank(state.get_path(&self.field))
            || ceiling_reached(state.iteration(), state.max_iterations())
        {
            GateDecision::Accept
        } else {
            GateDecision::Refine
        }
    }

    fn describe(&self) -> String {
        format!("{} resolved", self.field)
    }
}
