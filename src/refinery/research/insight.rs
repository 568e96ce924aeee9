// SPDX-License-Identifier: MIT

//! Synthesis: hypotheses, trends and follow-up questions

use super::analyze::Analysis;
use super::verify::FactCheck;
use super::{
    decode, lenient_string, lenient_strings, prompts, read_field, Llm, ANALYSIS, FACT_CHECK,
    INSIGHTS,
};
use crate::adk::model::{GenerationOptions, TextGenerator};
use crate::refinery::stage::{Stage, StageUpdate};
use crate::refinery::state::WorkflowState;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Hypothesis {
    #[serde(deserialize_with = "lenient_string")]
    pub statement: String,
    #[serde(deserialize_with = "lenient_string")]
    pub confidence: String,
    #[serde(deserialize_with = "lenient_strings")]
    pub supporting_evidence: Vec<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub reasoning_chain: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Trend {
    #[serde(deserialize_with = "lenient_string")]
    pub description: String,
    #[serde(deserialize_with = "lenient_string")]
    pub direction: String,
    #[serde(deserialize_with = "lenient_strings")]
    pub evidence: Vec<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub timeframe: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Insights {
    pub hypotheses: Vec<Hypothesis>,
    pub trends: Vec<Trend>,
    #[serde(deserialize_with = "lenient_strings")]
    pub key_patterns: Vec<String>,
    #[serde(deserialize_with = "lenient_strings")]
    pub implications: Vec<String>,
    #[serde(deserialize_with = "lenient_strings")]
    pub further_questions: Vec<String>,
}

fn format_findings(analysis: &Analysis, fact_check: &FactCheck) -> String {
    if analysis.findings.is_empty() {
        return "No findings available.".to_string();
    }
    analysis
        .findings
        .iter()
        .enumerate()
        .map(|(i, f)| {
            let (confidence, status) = match fact_check.lookup(&f.claim, 80) {
                Some(v) => (format!("{}%", v.confidence_score), v.status.as_str()),
                None => ("N/A".to_string(), "unverified"),
            };
            format!(
                "[{}] {}\n    Category: {} | Confidence: {} | Status: {}",
                i, f.claim, f.category, confidence, status
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn format_fact_check(fact_check: &FactCheck) -> String {
    let mut summary = format!(
        "Overall reliability: {}/100\nClaims: {} total, {} verified, {} disputed\n",
        fact_check.overall_reliability_score,
        fact_check.verified_claims.len(),
        fact_check.count("verified"),
        fact_check.count("disputed")
    );
    if !fact_check.warnings.is_empty() {
        summary.push_str("Warnings:\n");
        for warning in &fact_check.warnings {
            summary.push_str(&format!("  - {}\n", warning));
        }
    }
    summary
}

pub struct InsightStage {
    llm: Llm,
}

impl InsightStage {
    pub fn new(generator: Arc<dyn TextGenerator>, options: GenerationOptions) -> Self {
        Self {
            llm: Llm::new(generator, options),
        }
    }
}

#[async_trait]
impl Stage for InsightStage {
    fn name(&self) -> &str {
        "synthesize"
    }

    async fn execute(&self, state: &WorkflowState) -> StageUpdate {
        let analysis: Analysis = read_field(state, ANALYSIS);
        let fact_check: FactCheck = read_field(state, FACT_CHECK);
        let gaps = if analysis.gaps.is_empty() {
            "No significant gaps identified.".to_string()
        } else {
            analysis
                .gaps
                .iter()
                .map(|g| format!("- {}", g))
                .collect::<Vec<_>>()
                .join("\n")
        };

        let user = prompts::synthesize_user(
            state.query(),
            &format_findings(&analysis, &fact_check),
            &format_fact_check(&fact_check),
            &gaps,
        );
        let answer = self.llm.ask(prompts::SYNTHESIZE_SYSTEM, &user).await;
        let usage = answer.as_ref().ok().and_then(|a| a.usage);

        match answer.and_then(|a| decode::<Insights>(a.value, "insights")) {
            Ok(insights) => {
                log::info!(
                    "Insights generated: {} hypotheses, {} trends, {} patterns",
                    insights.hypotheses.len(),
                    insights.trends.len(),
                    insights.key_patterns.len()
                );
                StageUpdate::new()
                    .record_call(usage)
                    .status(format!(
                        "Generated {} hypotheses and {} trends",
                        insights.hypotheses.len(),
                        insights.trends.len()
                    ))
                    .set(INSIGHTS, json!(insights))
            }
            Err(e) => {
                log::error!("Insight generation failed: {}", e);
                let insights = Insights {
                    implications: vec![format!("Insight generation encountered an error: {}", e)],
                    further_questions: vec![
                        "What are the main factors driving this topic?".to_string(),
                        "What are experts predicting for the near future?".to_string(),
                    ],
                    ..Insights::default()
                };
                StageUpdate::new()
                    .record_call(usage)
                    .error(format!("Insights: {}", e))
                    .status("Insight fallback")
                    .set(INSIGHTS, json!(insights))
            }
        }
    }
}
