// SPDX-License-Identifier: MIT

//! Prompt templates for the research stages

pub const DECOMPOSE_SYSTEM: &str = r#"You split research questions into focused web searches.
Given one question, produce between 2 and 5 sub-queries that together cover it.

Guidelines:
- Each sub-query must be searchable on its own.
- Cover distinct angles: causes, effects, statistics, expert views, history, outlook.
- Do not produce near-duplicates.
- A question that is already narrow may stay a single sub-query.
- Include at least one sub-query looking for critical or opposing views.

Answer format:
{
  "original_query": "...",
  "is_complex": true,
  "sub_queries": ["...", "..."],
  "reasoning": "one sentence"
}"#;

pub fn decompose_user(query: &str, follow_ups: &[String]) -> String {
    let context = if follow_ups.is_empty() {
        "This is the first research pass.".to_string()
    } else {
        let gaps: Vec<String> = follow_ups.iter().map(|q| format!("- {}", q)).collect();
        format!(
            "The previous pass left these gaps. Aim the sub-queries at closing them:\n{}",
            gaps.join("\n")
        )
    };
    format!(
        "Split this research question into sub-queries:\n\nQUESTION: {}\n\n{}\n\nReturn 2-5 sub-queries as JSON.",
        query, context
    )
}

pub const CATEGORIZE_SYSTEM: &str = r#"You classify web sources for a research team.
For every source decide:
- source_type: academic, news, government, blog, corporate, encyclopedia or other
- domain_authority: high, medium or low

Typical mapping: .edu, arxiv, pubmed and scholar are academic; major wire services
and newspapers are news; .gov is government; personal blogs and medium posts are
blog; company sites and press releases are corporate; wikipedia is encyclopedia.

Answer format:
{
  "sources": [{"index": 0, "source_type": "news", "domain_authority": "high"}]
}"#;

pub fn categorize_user(listing: &str, count: usize) -> String {
    format!(
        "Classify these {} sources:\n\n{}\n\nReturn JSON with one entry per index.",
        count, listing
    )
}

pub const ANALYZE_SYSTEM: &str = r#"You are a critical research analyst. Read the numbered sources and report:
1. executive_summary: two or three paragraphs on what the sources establish.
2. findings: concrete claims, statistics and facts, each citing source indices.
3. contradictions: where sources disagree, with the indices on each side.
4. gaps: important aspects of the question the sources do not cover.
5. source_assessments: reliability and bias notes per source.

Report what the sources say without adding opinions. Flag claims backed by a
single source. Prefer facts over opinions.

Answer format:
{
  "executive_summary": "...",
  "findings": [{"claim": "...", "source_indices": [0, 2], "category": "fact|statistic|opinion|prediction", "importance": "high|medium|low"}],
  "contradictions": [{"topic": "...", "position_a": "...", "position_b": "...", "source_indices_a": [0], "source_indices_b": [2]}],
  "gaps": ["..."],
  "source_assessments": [{"index": 0, "reliability": "high|medium|low", "bias_notes": "..."}]
}"#;

pub fn analyze_user(query: &str, sources: &str) -> String {
    format!(
        "Analyze these sources about: \"{}\"\n\nSOURCES:\n{}\n\nReturn the analysis as JSON.",
        query, sources
    )
}

pub const VERIFY_SYSTEM: &str = r#"You are a fact-checker. Cross-reference each finding against the sources.

For each claim assign confidence_score (0-100):
- 90-100: several authoritative sources agree
- 70-89: most sources agree with credible evidence
- 50-69: mixed evidence or caveats
- 30-49: one or two sources, or low-authority sources only
- 0-29: contradicted or unverifiable

Mark status as verified, disputed or unverified. Add warnings for misleading or
unsupported claims and explain each contradiction with a recommendation.

Answer format:
{
  "verified_claims": [{"claim": "...", "confidence_score": 85, "status": "verified", "supporting_sources": [0], "contradicting_sources": [], "reasoning": "..."}],
  "overall_reliability_score": 75,
  "warnings": ["..."],
  "contradiction_details": [{"topic": "...", "details": "...", "recommendation": "..."}]
}"#;

pub fn verify_user(query: &str, findings: &str, sources: &str) -> String {
    format!(
        "Fact-check these findings about: \"{}\"\n\nFINDINGS:\n{}\n\nSOURCES FOR CROSS-REFERENCE:\n{}\n\nReturn the verification as JSON.",
        query, findings, sources
    )
}

pub const SYNTHESIZE_SYSTEM: &str = r#"You turn verified research findings into higher-order insight.
Produce:
- hypotheses (2-4): testable statements with supporting evidence and the reasoning
  chain from evidence to hypothesis, each rated high, medium or low confidence
- trends (2-3): direction (increasing, decreasing, emerging, shifting), evidence and timeframe
- key_patterns: surprising correlations or anomalies
- implications: what the findings mean in a wider context
- further_questions (2-3): follow-up research questions

Stay grounded in the evidence and be explicit about uncertainty.

Answer format:
{
  "hypotheses": [{"statement": "...", "confidence": "medium", "supporting_evidence": ["..."], "reasoning_chain": "..."}],
  "trends": [{"description": "...", "direction": "emerging", "evidence": ["..."], "timeframe": "medium-term"}],
  "key_patterns": ["..."],
  "implications": ["..."],
  "further_questions": ["..."]
}"#;

pub fn synthesize_user(query: &str, findings: &str, fact_check: &str, gaps: &str) -> String {
    format!(
        "Generate insights from this research on: \"{}\"\n\nFINDINGS:\n{}\n\nFACT-CHECK SUMMARY:\n{}\n\nGAPS:\n{}\n\nReturn the insights as JSON.",
        query, findings, fact_check, gaps
    )
}

pub const REPORT_SYSTEM: &str = r#"You write the final research report and grade its quality.

Sections: title, executive_summary, key_findings (with confidence and source
count), contradictions_and_gaps, insights_and_trends, source_reliability and a
short methodology_note.

Grade the research from 0 to 100:
- coverage of the question (0-25)
- diversity of source types (0-20)
- cross-verification of claims (0-25)
- depth beyond surface facts (0-15)
- coherence of the report (0-15)

When the grade is low, list follow_up_queries that would close the gaps.

Answer format:
{
  "title": "...",
  "executive_summary": "...",
  "key_findings": [{"finding": "...", "confidence": 85, "sources_count": 3}],
  "contradictions_and_gaps": "...",
  "insights_and_trends": "...",
  "source_reliability": "...",
  "methodology_note": "...",
  "quality_score": 78,
  "quality_breakdown": {"coverage": 20, "source_diversity": 15, "verification": 20, "depth": 12, "coherence": 11},
  "follow_up_queries": ["..."]
}"#;

pub struct ReportInputs<'a> {
    pub query: &'a str,
    pub summary: &'a str,
    pub findings: &'a str,
    pub contradictions: &'a str,
    pub insights: &'a str,
    pub source_count: usize,
    pub sources: &'a str,
}

pub fn report_user(inputs: &ReportInputs<'_>) -> String {
    format!(
        "Write a research report on: \"{}\"\n\nANALYSIS SUMMARY:\n{}\n\nFINDINGS WITH CONFIDENCE:\n{}\n\nCONTRADICTIONS AND GAPS:\n{}\n\nINSIGHTS:\n{}\n\nSOURCES ({} total):\n{}\n\nReturn the report and its quality grade as JSON.",
        inputs.query,
        inputs.summary,
        inputs.findings,
        inputs.contradictions,
        inputs.insights,
        inputs.source_count,
        inputs.sources
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decompose_user_mentions_gaps_on_refinement() {
        let first = decompose_user("AI in healthcare", &[]);
        assert!(first.contains("first research pass"));

        let again = decompose_user("AI in healthcare", &["cost data for 2024".to_string()]);
        assert!(again.contains("- cost data for 2024"));
        assert!(!again.contains("first research pass"));
    }
}
