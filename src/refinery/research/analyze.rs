// SPDX-License-Identifier: MIT

//! Critical analysis of the collected sources

use super::retrieve::Source;
use super::{
    decode, lenient_indices, lenient_string, lenient_strings, prompts, read_field,
    truncate_chars, Llm, ANALYSIS, CLAIMS, SOURCES,
};
use crate::adk::model::{GenerationOptions, TextGenerator};
use crate::refinery::stage::{Stage, StageUpdate};
use crate::refinery::state::WorkflowState;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

const SOURCE_EXCERPT_CHARS: usize = 1500;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Finding {
    #[serde(deserialize_with = "lenient_string")]
    pub claim: String,
    #[serde(deserialize_with = "lenient_indices")]
    pub source_indices: Vec<usize>,
    #[serde(deserialize_with = "lenient_string")]
    pub category: String,
    #[serde(deserialize_with = "lenient_string")]
    pub importance: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Contradiction {
    #[serde(deserialize_with = "lenient_string")]
    pub topic: String,
    #[serde(deserialize_with = "lenient_string")]
    pub position_a: String,
    #[serde(deserialize_with = "lenient_string")]
    pub position_b: String,
    #[serde(deserialize_with = "lenient_indices")]
    pub source_indices_a: Vec<usize>,
    #[serde(deserialize_with = "lenient_indices")]
    pub source_indices_b: Vec<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceAssessment {
    pub index: usize,
    #[serde(deserialize_with = "lenient_string")]
    pub reliability: String,
    #[serde(deserialize_with = "lenient_string")]
    pub bias_notes: String,
}

/// Structured reading of the sources
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Analysis {
    #[serde(deserialize_with = "lenient_string")]
    pub executive_summary: String,
    pub findings: Vec<Finding>,
    pub contradictions: Vec<Contradiction>,
    #[serde(deserialize_with = "lenient_strings")]
    pub gaps: Vec<String>,
    pub source_assessments: Vec<SourceAssessment>,
}

impl Analysis {
    fn placeholder(summary: impl Into<String>, gap: &str) -> Self {
        Self {
            executive_summary: summary.into(),
            gaps: vec![gap.to_string()],
            ..Self::default()
        }
    }
}

fn format_sources(sources: &[Source]) -> String {
    sources
        .iter()
        .enumerate()
        .map(|(i, s)| {
            format!(
                "[Source {}]\n  Title: {}\n  URL: {}\n  Type: {}\n  Domain: {}\n  Content:\n{}\n",
                i,
                s.title,
                s.url,
                s.source_type,
                s.domain,
                truncate_chars(&s.content, SOURCE_EXCERPT_CHARS)
            )
        })
        .collect::<Vec<_>>()
        .join("\n---\n")
}

pub struct AnalyzeStage {
    llm: Llm,
}

impl AnalyzeStage {
    pub fn new(generator: Arc<dyn TextGenerator>, options: GenerationOptions) -> Self {
        Self {
            llm: Llm::new(generator, options),
        }
    }
}

#[async_trait]
impl Stage for AnalyzeStage {
    fn name(&self) -> &str {
        "analyze"
    }

    async fn execute(&self, state: &WorkflowState) -> StageUpdate {
        let sources: Vec<Source> = read_field(state, SOURCES);
        if sources.is_empty() {
            log::warn!("No sources to analyze");
            let analysis = Analysis::placeholder(
                "No sources were found for this query.",
                "No sources were retrieved",
            );
            return StageUpdate::new()
                .set(ANALYSIS, json!(analysis))
                .status("Analysis: no sources available");
        }

        let user = prompts::analyze_user(state.query(), &format_sources(&sources));
        let answer = self.llm.ask(prompts::ANALYZE_SYSTEM, &user).await;
        let usage = answer.as_ref().ok().and_then(|a| a.usage);
        let analysis = answer.and_then(|a| decode::<Analysis>(a.value, "analysis"));

        match analysis {
            Ok(analysis) => {
                log::info!(
                    "Analysis complete: {} findings, {} contradictions, {} gaps",
                    analysis.findings.len(),
                    analysis.contradictions.len(),
                    analysis.gaps.len()
                );
                let claims: Vec<&str> = analysis
                    .findings
                    .iter()
                    .map(|f| f.claim.as_str())
                    .filter(|c| !c.is_empty())
                    .collect();
                StageUpdate::new()
                    .record_call(usage)
                    .status(format!(
                        "Analyzed: {} findings, {} contradictions",
                        analysis.findings.len(),
                        analysis.contradictions.len()
                    ))
                    .append(CLAIMS, json!(claims))
                    .set(ANALYSIS, json!(analysis))
            }
            Err(e) => {
                log::error!("Analysis failed: {}", e);
                let analysis = Analysis::placeholder(
                    format!("Analysis encountered an error: {}", e),
                    "Analysis failed, manual review recommended",
                );
                StageUpdate::new()
                    .record_call(usage)
                    .error(format!("Analysis: {}", e))
                    .status("Analysis error")
                    .set(ANALYSIS, json!(analysis))
            }
        }
    }
}
