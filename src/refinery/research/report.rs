// SPDX-License-Identifier: MIT

//! Final report and quality score

use super::analyze::{Analysis, Contradiction};
use super::insight::Insights;
use super::retrieve::Source;
use super::verify::FactCheck;
use super::{
    decode, lenient_f64, lenient_string, lenient_strings, prompts, read_field, truncate_chars,
    Llm, ANALYSIS, FACT_CHECK, INSIGHTS, REPORT, SOURCES,
};
use crate::adk::model::{GenerationOptions, TextGenerator};
use crate::refinery::stage::{Stage, StageUpdate};
use crate::refinery::state::WorkflowState;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

const FALLBACK_SCORE: f64 = 30.0;
const MISSING_SCORE: f64 = 50.0;

const METHODOLOGY: &str = "Produced by a staged research pipeline: query decomposition, \
web retrieval, critical analysis, fact checking and insight synthesis, repeated until \
the quality gate accepted the result.";

fn default_score() -> f64 {
    MISSING_SCORE
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyFinding {
    #[serde(deserialize_with = "lenient_string")]
    pub finding: String,
    #[serde(deserialize_with = "lenient_f64")]
    pub confidence: f64,
    #[serde(deserialize_with = "lenient_f64")]
    pub sources_count: f64,
}

/// Objects decode field by field; a bare string is the finding itself
fn lenient_key_findings<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Vec<KeyFinding>, D::Error> {
    let items = match Value::deserialize(deserializer)? {
        Value::Array(items) => items,
        _ => return Ok(Vec::new()),
    };
    Ok(items
        .into_iter()
        .filter_map(|item| match item {
            Value::String(s) if !s.trim().is_empty() => Some(KeyFinding {
                finding: s,
                ..KeyFinding::default()
            }),
            item @ Value::Object(_) => serde_json::from_value(item).ok(),
            _ => None,
        })
        .collect())
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CitedSource {
    pub title: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    #[serde(default, deserialize_with = "lenient_string")]
    pub title: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub executive_summary: String,
    #[serde(default, deserialize_with = "lenient_key_findings")]
    pub key_findings: Vec<KeyFinding>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub contradictions_and_gaps: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub insights_and_trends: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub source_reliability: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub methodology_note: String,
    #[serde(default)]
    pub sources_cited: Vec<CitedSource>,
    #[serde(default = "default_score", deserialize_with = "lenient_f64")]
    pub quality_score: f64,
    #[serde(default)]
    pub quality_breakdown: BTreeMap<String, Value>,
    #[serde(default, deserialize_with = "lenient_strings")]
    pub follow_up_queries: Vec<String>,
    #[serde(default)]
    pub generated_at: Option<DateTime<Utc>>,
}

impl Default for Report {
    fn default() -> Self {
        Self {
            title: String::new(),
            executive_summary: String::new(),
            key_findings: Vec::new(),
            contradictions_and_gaps: String::new(),
            insights_and_trends: String::new(),
            source_reliability: String::new(),
            methodology_note: String::new(),
            sources_cited: Vec::new(),
            quality_score: MISSING_SCORE,
            quality_breakdown: BTreeMap::new(),
            follow_up_queries: Vec::new(),
            generated_at: None,
        }
    }
}

/// Everything the report is assembled from
struct Inputs {
    sources: Vec<Source>,
    analysis: Analysis,
    fact_check: FactCheck,
    insights: Insights,
}

impl Inputs {
    fn read(state: &WorkflowState) -> Self {
        Self {
            sources: read_field(state, SOURCES),
            analysis: read_field(state, ANALYSIS),
            fact_check: read_field(state, FACT_CHECK),
            insights: read_field(state, INSIGHTS),
        }
    }

    fn cited(&self) -> Vec<CitedSource> {
        self.sources
            .iter()
            .map(|s| CitedSource {
                title: s.title.clone(),
                url: s.url.clone(),
            })
            .collect()
    }

    fn findings_text(&self) -> String {
        let lines: Vec<String> = self
            .analysis
            .findings
            .iter()
            .map(|f| match self.fact_check.lookup(&f.claim, 60) {
                Some(v) => format!("- [{}, {}%] {}", v.status, v.confidence_score, f.claim),
                None => format!("- [unverified, N/A] {}", f.claim),
            })
            .collect();
        if lines.is_empty() {
            "No findings available.".to_string()
        } else {
            lines.join("\n")
        }
    }

    fn contradictions_text(&self) -> String {
        let mut parts = Vec::new();
        let contradictions: &[Contradiction] = &self.analysis.contradictions;
        if !contradictions.is_empty() {
            parts.push("CONTRADICTIONS:".to_string());
            for c in contradictions {
                parts.push(format!("  - {}: {} vs {}", c.topic, c.position_a, c.position_b));
            }
        }
        if !self.analysis.gaps.is_empty() {
            parts.push("GAPS IN RESEARCH:".to_string());
            parts.extend(self.analysis.gaps.iter().map(|g| format!("  - {}", g)));
        }
        if !self.fact_check.warnings.is_empty() {
            parts.push("WARNINGS:".to_string());
            parts.extend(self.fact_check.warnings.iter().map(|w| format!("  - {}", w)));
        }
        if parts.is_empty() {
            "No significant contradictions or gaps.".to_string()
        } else {
            parts.join("\n")
        }
    }

    fn insights_text(&self) -> String {
        let insights = &self.insights;
        let mut parts = Vec::new();
        for h in &insights.hypotheses {
            parts.push(format!("HYPOTHESIS ({} confidence): {}", h.confidence, h.statement));
        }
        for t in &insights.trends {
            parts.push(format!("TREND ({}): {}", t.direction, t.description));
        }
        parts.extend(insights.key_patterns.iter().map(|p| format!("PATTERN: {}", p)));
        parts.extend(insights.implications.iter().map(|i| format!("IMPLICATION: {}", i)));
        if parts.is_empty() {
            "No insights generated.".to_string()
        } else {
            parts.join("\n")
        }
    }

    fn sources_text(&self) -> String {
        if self.sources.is_empty() {
            return "No sources available.".to_string();
        }
        self.sources
            .iter()
            .enumerate()
            .map(|(i, s)| format!("[{}] {} ({}) {}", i, s.title, s.source_type, s.url))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Report assembled from raw stage outputs when the model is unavailable
    fn fallback(&self, query: &str, error: &str) -> Report {
        let summary = if self.analysis.executive_summary.is_empty() {
            "Report generation encountered an error. Raw findings are included below.".to_string()
        } else {
            self.analysis.executive_summary.clone()
        };
        Report {
            title: format!("Research Report: {}", query),
            executive_summary: summary,
            key_findings: self
                .analysis
                .findings
                .iter()
                .take(10)
                .map(|f| KeyFinding {
                    finding: f.claim.clone(),
                    confidence: 50.0,
                    sources_count: f.source_indices.len() as f64,
                })
                .collect(),
            contradictions_and_gaps: self.contradictions_text(),
            insights_and_trends: self.insights_text(),
            source_reliability: format!(
                "Overall reliability: {}/100",
                self.fact_check.overall_reliability_score
            ),
            methodology_note: format!(
                "Report assembly failed ({}). This is a fallback report with reduced formatting.",
                truncate_chars(error, 100)
            ),
            sources_cited: self.cited(),
            quality_score: FALLBACK_SCORE,
            quality_breakdown: BTreeMap::new(),
            follow_up_queries: vec![query.to_string()],
            generated_at: Some(Utc::now()),
        }
    }
}

pub struct ReportStage {
    llm: Llm,
}

impl ReportStage {
    pub fn new(generator: Arc<dyn TextGenerator>, options: GenerationOptions) -> Self {
        Self {
            llm: Llm::new(generator, options),
        }
    }
}

#[async_trait]
impl Stage for ReportStage {
    fn name(&self) -> &str {
        "report"
    }

    async fn execute(&self, state: &WorkflowState) -> StageUpdate {
        let query = state.query();
        let inputs = Inputs::read(state);
        let summary = if inputs.analysis.executive_summary.is_empty() {
            "No analysis available."
        } else {
            inputs.analysis.executive_summary.as_str()
        };
        let findings = inputs.findings_text();
        let contradictions = inputs.contradictions_text();
        let insights = inputs.insights_text();
        let sources = inputs.sources_text();

        let user = prompts::report_user(&prompts::ReportInputs {
            query,
            summary,
            findings: &findings,
            contradictions: &contradictions,
            insights: &insights,
            source_count: inputs.sources.len(),
            sources: &sources,
        });
        let answer = self.llm.ask(prompts::REPORT_SYSTEM, &user).await;
        let usage = answer.as_ref().ok().and_then(|a| a.usage);

        match answer.and_then(|a| decode::<Report>(a.value, "report")) {
            Ok(mut report) => {
                if report.title.trim().is_empty() {
                    report.title = format!("Research Report: {}", query);
                }
                if report.executive_summary.trim().is_empty() {
                    report.executive_summary = summary.to_string();
                }
                if report.methodology_note.trim().is_empty() {
                    report.methodology_note = METHODOLOGY.to_string();
                }
                report.quality_score = report.quality_score.clamp(0.0, 100.0);
                report.sources_cited = inputs.cited();
                report.generated_at = Some(Utc::now());

                log::info!("Report built, quality score {}/100", report.quality_score);
                StageUpdate::new()
                    .record_call(usage)
                    .score(report.quality_score)
                    .status(format!("Report complete (quality {}/100)", report.quality_score))
                    .set(REPORT, json!(report))
            }
            Err(e) => {
                log::error!("Report building failed: {}", e);
                let report = inputs.fallback(query, &e.to_string());
                StageUpdate::new()
                    .record_call(usage)
                    .error(format!("Report: {}", e))
                    .score(FALLBACK_SCORE)
                    .status("Report fallback")
                    .set(REPORT, json!(report))
            }
        }
    }
}
