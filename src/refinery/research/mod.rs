// SPDX-License-Identifier: MIT

//! Research pipeline: decompose, retrieve, analyze, verify, synthesize, report
//!
//! Every stage asks the model for JSON and decodes it into the typed records
//! defined next to the stage. Model output is noisy, so decoding is lenient:
//! missing fields take defaults and scores or indices given as strings are
//! accepted. A stage only degrades when the call fails or the answer has the
//! wrong shape altogether.

pub mod analyze;
pub mod decompose;
pub mod export;
pub mod insight;
pub mod prompts;
pub mod report;
pub mod retrieve;
pub mod verify;

use crate::adk::error::CapabilityError;
use crate::adk::model::{GenerationOptions, JsonGeneration, TextGenerator};
use crate::adk::search::WebSearch;
use crate::refinery::config::Settings;
use crate::refinery::pipeline::Pipeline;
use crate::refinery::state::{FieldType, ReducerType, StateSchema, WorkflowState};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::sync::Arc;

pub use analyze::{Analysis, AnalyzeStage, Contradiction, Finding, SourceAssessment};
pub use decompose::DecomposeStage;
pub use insight::{Hypothesis, InsightStage, Insights, Trend};
pub use report::{CitedSource, KeyFinding, Report, ReportStage};
pub use retrieve::{RetrieveStage, Source};
pub use verify::{ContradictionDetail, FactCheck, VerifiedClaim, VerifyStage};

pub const SUB_QUERIES: &str = "sub_queries";
pub const SUB_QUERIES_HISTORY: &str = "sub_queries_history";
pub const SOURCES: &str = "sources";
pub const ANALYSIS: &str = "analysis";
pub const CLAIMS: &str = "claims";
pub const FACT_CHECK: &str = "fact_check";
pub const TOP_CONTRADICTION: &str = "top_contradiction";
pub const INSIGHTS: &str = "insights";
pub const REPORT: &str = "report";

/// Reducers for every field the research stages write
pub fn research_schema() -> StateSchema {
    StateSchema::new()
        .field(SUB_QUERIES, FieldType::Array, ReducerType::Overwrite)
        .field(SUB_QUERIES_HISTORY, FieldType::Array, ReducerType::Append)
        .field(
            SOURCES,
            FieldType::Array,
            ReducerType::AppendUnique("url".to_string()),
        )
        .field(ANALYSIS, FieldType::Object, ReducerType::Overwrite)
        .field(CLAIMS, FieldType::Array, ReducerType::Append)
        .field(FACT_CHECK, FieldType::Object, ReducerType::Overwrite)
        .field(TOP_CONTRADICTION, FieldType::String, ReducerType::Overwrite)
        .field(INSIGHTS, FieldType::Object, ReducerType::Overwrite)
        .field(REPORT, FieldType::Object, ReducerType::Overwrite)
}

/// The six research stages in execution order
pub fn research_pipeline(
    llm: Arc<dyn TextGenerator>,
    search: Arc<dyn WebSearch>,
    settings: &Settings,
) -> Pipeline {
    let options = settings.generation_options();

    Pipeline::new()
        .then(Arc::new(DecomposeStage::new(
            llm.clone(),
            options.clone(),
            settings.max_sub_queries,
        )))
        .then(Arc::new(RetrieveStage::new(
            llm.clone(),
            search,
            options.clone(),
            settings.max_search_results,
        )))
        .then(Arc::new(AnalyzeStage::new(llm.clone(), options.clone())))
        .then(Arc::new(VerifyStage::new(llm.clone(), options.clone())))
        .then(Arc::new(InsightStage::new(llm.clone(), options.clone())))
        .then(Arc::new(ReportStage::new(llm, options)))
        .with_stage_timeout(settings.stage_timeout())
}

/// Handle shared by the model-backed stages
#[derive(Clone)]
pub(crate) struct Llm {
    generator: Arc<dyn TextGenerator>,
    options: GenerationOptions,
}

impl Llm {
    pub(crate) fn new(generator: Arc<dyn TextGenerator>, options: GenerationOptions) -> Self {
        Self { generator, options }
    }

    pub(crate) async fn ask(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<JsonGeneration, CapabilityError> {
        self.generator
            .generate_json(system_prompt, user_prompt, &self.options)
            .await
    }
}

/// Decode a model answer, mapping shape mismatches to a parse error
pub(crate) fn decode<T: DeserializeOwned>(value: Value, what: &str) -> Result<T, CapabilityError> {
    serde_json::from_value(value)
        .map_err(|e| CapabilityError::Parse(format!("unexpected {} shape: {}", what, e)))
}

/// Read a field written by an earlier stage; absent or malformed reads as default
pub(crate) fn read_field<T: DeserializeOwned + Default>(state: &WorkflowState, key: &str) -> T {
    state
        .get(key)
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default()
}

/// First `max` characters, on a char boundary
pub(crate) fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches('%').trim().parse().ok(),
        _ => None,
    }
}

/// Number, or a numeric string such as `"85%"`
pub(crate) fn lenient_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    Ok(value_as_f64(&Value::deserialize(deserializer)?).unwrap_or(0.0))
}

pub(crate) fn lenient_opt_f64<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<f64>, D::Error> {
    Ok(value_as_f64(&Value::deserialize(deserializer)?))
}

/// List of indices; numeric strings accepted, anything else skipped
pub(crate) fn lenient_indices<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Vec<usize>, D::Error> {
    let items = match Value::deserialize(deserializer)? {
        Value::Array(items) => items,
        _ => return Ok(Vec::new()),
    };
    Ok(items
        .iter()
        .filter_map(|item| match item {
            Value::Number(n) => n.as_u64().map(|n| n as usize),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        })
        .collect())
}

/// String, with null read as empty and other scalars stringified
pub(crate) fn lenient_string<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<String, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => String::new(),
        Value::String(s) => s,
        other => other.to_string(),
    })
}

/// List of strings; a single string becomes a one-item list
pub(crate) fn lenient_strings<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Vec<String>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::String(s) if !s.trim().is_empty() => Some(s),
                Value::String(_) | Value::Null => None,
                other => Some(other.to_string()),
            })
            .collect(),
        Value::String(s) if !s.trim().is_empty() => vec![s],
        _ => Vec::new(),
    })
}
