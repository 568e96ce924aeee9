// SPDX-License-Identifier: MIT

//! Fact check: cross-reference findings against the sources

use super::analyze::{Analysis, Finding};
use super::retrieve::Source;
use super::{
    decode, lenient_f64, lenient_indices, lenient_string, lenient_strings, prompts, read_field,
    truncate_chars, Llm, ANALYSIS, FACT_CHECK, SOURCES, TOP_CONTRADICTION,
};
use crate::adk::model::{GenerationOptions, TextGenerator};
use crate::refinery::stage::{Stage, StageUpdate};
use crate::refinery::state::WorkflowState;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

const FALLBACK_CONFIDENCE: f64 = 50.0;
const FALLBACK_RELIABILITY: f64 = 40.0;

fn default_status() -> String {
    "unverified".to_string()
}

fn default_confidence() -> f64 {
    FALLBACK_CONFIDENCE
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifiedClaim {
    #[serde(default, deserialize_with = "lenient_string")]
    pub claim: String,
    #[serde(default = "default_confidence", deserialize_with = "lenient_f64")]
    pub confidence_score: f64,
    /// `verified`, `disputed` or `unverified`
    #[serde(default = "default_status", deserialize_with = "lenient_string")]
    pub status: String,
    #[serde(default, deserialize_with = "lenient_indices")]
    pub supporting_sources: Vec<usize>,
    #[serde(default, deserialize_with = "lenient_indices")]
    pub contradicting_sources: Vec<usize>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub reasoning: String,
}

impl VerifiedClaim {
    fn unverified(finding: &Finding) -> Self {
        Self {
            claim: finding.claim.clone(),
            confidence_score: FALLBACK_CONFIDENCE,
            status: default_status(),
            supporting_sources: finding.source_indices.clone(),
            contradicting_sources: Vec::new(),
            reasoning: "Fact check unavailable, treated as unverified".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContradictionDetail {
    #[serde(deserialize_with = "lenient_string")]
    pub topic: String,
    #[serde(deserialize_with = "lenient_string")]
    pub details: String,
    #[serde(deserialize_with = "lenient_string")]
    pub recommendation: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FactCheck {
    pub verified_claims: Vec<VerifiedClaim>,
    #[serde(deserialize_with = "lenient_f64")]
    pub overall_reliability_score: f64,
    #[serde(deserialize_with = "lenient_strings")]
    pub warnings: Vec<String>,
    pub contradiction_details: Vec<ContradictionDetail>,
}

impl FactCheck {
    pub fn count(&self, status: &str) -> usize {
        self.verified_claims
            .iter()
            .filter(|c| c.status.eq_ignore_ascii_case(status))
            .count()
    }

    /// The most pressing unresolved disagreement, if any
    pub fn top_contradiction(&self) -> Option<String> {
        self.contradiction_details
            .iter()
            .map(|c| c.topic.trim())
            .find(|t| !t.is_empty())
            .or_else(|| {
                self.verified_claims
                    .iter()
                    .find(|c| c.status.eq_ignore_ascii_case("disputed"))
                    .map(|c| c.claim.trim())
            })
            .map(str::to_string)
    }

    /// Verification entry whose claim starts like `claim`
    pub fn lookup(&self, claim: &str, prefix_chars: usize) -> Option<&VerifiedClaim> {
        let key = truncate_chars(claim, prefix_chars);
        self.verified_claims
            .iter()
            .find(|v| truncate_chars(&v.claim, prefix_chars) == key)
    }
}

fn format_findings(findings: &[Finding]) -> String {
    findings
        .iter()
        .enumerate()
        .map(|(i, f)| {
            format!(
                "[Finding {}]\n  Claim: {}\n  Category: {}\n  Source indices: {:?}\n  Importance: {}",
                i, f.claim, f.category, f.source_indices, f.importance
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn format_sources_brief(sources: &[Source]) -> String {
    sources
        .iter()
        .enumerate()
        .map(|(i, s)| {
            format!(
                "[{}] {} ({}, {}): {}...",
                i,
                s.title,
                s.source_type,
                s.domain,
                truncate_chars(&s.content, 300)
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub struct VerifyStage {
    llm: Llm,
}

impl VerifyStage {
    pub fn new(generator: Arc<dyn TextGenerator>, options: GenerationOptions) -> Self {
        Self {
            llm: Llm::new(generator, options),
        }
    }
}

#[async_trait]
impl Stage for VerifyStage {
    fn name(&self) -> &str {
        "verify"
    }

    async fn execute(&self, state: &WorkflowState) -> StageUpdate {
        let analysis: Analysis = read_field(state, ANALYSIS);
        if analysis.findings.is_empty() {
            log::warn!("No findings to fact-check");
            let fact_check = FactCheck {
                warnings: vec!["No findings available for fact-checking".to_string()],
                ..FactCheck::default()
            };
            return StageUpdate::new()
                .set(FACT_CHECK, json!(fact_check))
                .set(TOP_CONTRADICTION, Value::Null)
                .status("Fact check: no findings to verify");
        }

        let sources: Vec<Source> = read_field(state, SOURCES);
        let user = prompts::verify_user(
            state.query(),
            &format_findings(&analysis.findings),
            &format_sources_brief(&sources),
        );
        let answer = self.llm.ask(prompts::VERIFY_SYSTEM, &user).await;
        let usage = answer.as_ref().ok().and_then(|a| a.usage);

        match answer.and_then(|a| decode::<FactCheck>(a.value, "fact check")) {
            Ok(fact_check) => {
                let verified = fact_check.count("verified");
                let disputed = fact_check.count("disputed");
                log::info!(
                    "Fact check complete: {} verified, {} disputed, reliability {}/100",
                    verified,
                    disputed,
                    fact_check.overall_reliability_score
                );
                let top = fact_check.top_contradiction();
                StageUpdate::new()
                    .record_call(usage)
                    .status(format!(
                        "Fact-checked: {} verified, {} disputed (reliability {}%)",
                        verified, disputed, fact_check.overall_reliability_score
                    ))
                    .set(TOP_CONTRADICTION, json!(top))
                    .set(FACT_CHECK, json!(fact_check))
            }
            Err(e) => {
                log::error!("Fact check failed: {}", e);
                let fact_check = FactCheck {
                    verified_claims: analysis
                        .findings
                        .iter()
                        .map(VerifiedClaim::unverified)
                        .collect(),
                    overall_reliability_score: FALLBACK_RELIABILITY,
                    warnings: vec![format!(
                        "Fact checking failed ({}). All claims marked as unverified.",
                        truncate_chars(&e.to_string(), 80)
                    )],
                    contradiction_details: Vec::new(),
                };
                StageUpdate::new()
                    .record_call(usage)
                    .error(format!("FactChecker: {}", e))
                    .status("Fact check fallback")
                    .set(TOP_CONTRADICTION, Value::Null)
                    .set(FACT_CHECK, json!(fact_check))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::refinery::research::research_schema;
    use crate::refinery::research::testing::ScriptedModel;

    fn state_with_findings() -> WorkflowState {
        let mut state = WorkflowState::new("AI in healthcare", 2, &research_schema());
        StageUpdate::new()
            .set(
                ANALYSIS,
                json!({"findings": [
                    {"claim": "AI reduces diagnostic errors", "source_indices": [0, 1]},
                    {"claim": "AI raises costs", "source_indices": [2]}
                ]}),
            )
            .apply_to("analyze", &mut state);
        state
    }

    #[tokio::test]
    async fn test_fallback_marks_all_unverified() {
        let stage = VerifyStage::new(Arc::new(ScriptedModel::failing()), GenerationOptions::default());

        let mut state = state_with_findings();
        let update = stage.execute(&state).await;
        assert!(update.is_degraded());
        update.apply_to("verify", &mut state);

        let fact_check: FactCheck = read_field(&state, FACT_CHECK);
        assert_eq!(fact_check.verified_claims.len(), 2);
        assert!(fact_check
            .verified_claims
            .iter()
            .all(|c| c.status == "unverified" && c.confidence_score == 50.0));
        assert_eq!(fact_check.verified_claims[0].supporting_sources, vec![0, 1]);
        assert_eq!(fact_check.overall_reliability_score, 40.0);
        assert!(state.errors()[0].starts_with("FactChecker: "));
        assert_eq!(state.get(TOP_CONTRADICTION), Some(&Value::Null));
    }

    #[tokio::test]
    async fn test_disputed_claim_becomes_top_contradiction() {
        let model = Arc::new(ScriptedModel::new(vec![Ok(r#"{
            "verified_claims": [
                {"claim": "AI reduces diagnostic errors", "confidence_score": "88", "status": "verified"},
                {"claim": "AI raises costs", "confidence_score": 35, "status": "disputed"}
            ],
            "overall_reliability_score": 70
        }"#)]));
        let stage = VerifyStage::new(model, GenerationOptions::default());

        let mut state = state_with_findings();
        stage.execute(&state).await.apply_to("verify", &mut state);

        let fact_check: FactCheck = read_field(&state, FACT_CHECK);
        assert_eq!(fact_check.count("verified"), 1);
        assert_eq!(fact_check.verified_claims[0].confidence_score, 88.0);
        assert_eq!(state.get(TOP_CONTRADICTION), Some(&json!("AI raises costs")));
    }

    #[test]
    fn test_lookup_matches_on_prefix() {
        let fact_check = FactCheck {
            verified_claims: vec![VerifiedClaim::unverified(&Finding {
                claim: "AI reduces diagnostic errors in radiology".to_string(),
                ..Finding::default()
            })],
            ..FactCheck::default()
        };
        assert!(fact_check.lookup("AI reduces diagnostic errors", 20).is_some());
        assert!(fact_check.lookup("Something else", 20).is_none());
    }

    #[tokio::test]
    async fn test_no_findings_skips_model() {
        let stage = VerifyStage::new(Arc::new(ScriptedModel::failing()), GenerationOptions::default());
        let mut state = WorkflowState::new("q", 1, &research_schema());

        let update = stage.execute(&state).await;
        assert!(!update.is_degraded());
        update.apply_to("verify", &mut state);
        let fact_check: FactCheck = read_field(&state, FACT_CHECK);
        assert_eq!(fact_check.overall_reliability_score, 0.0);
    }
}
