// SPDX-License-Identifier: MIT

//! Web retrieval with run-wide URL dedupe and source categorization

use super::{lenient_string, prompts, read_field, Llm, SOURCES, SUB_QUERIES};
use crate::adk::model::{GenerationOptions, TextGenerator};
use crate::adk::search::{SearchHit, WebSearch};
use crate::refinery::stage::{Stage, StageUpdate};
use crate::refinery::state::WorkflowState;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use url::Url;

const MAX_CONTENT_WORDS: usize = 800;

const SOURCE_TYPES: &[&str] = &[
    "academic",
    "news",
    "government",
    "blog",
    "corporate",
    "encyclopedia",
    "other",
];

/// A retrieved web source
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Source {
    #[serde(deserialize_with = "lenient_string")]
    pub title: String,
    #[serde(deserialize_with = "lenient_string")]
    pub url: String,
    #[serde(deserialize_with = "lenient_string")]
    pub content: String,
    pub source_type: String,
    pub relevance_score: f64,
    pub domain: String,
    pub sub_query: String,
}

impl Source {
    fn from_hit(hit: SearchHit, sub_query: &str) -> Self {
        Self {
            domain: domain_of(&hit.url),
            content: truncate_words(&hit.content, MAX_CONTENT_WORDS),
            title: if hit.title.trim().is_empty() {
                "Untitled".to_string()
            } else {
                hit.title
            },
            url: hit.url,
            source_type: "other".to_string(),
            relevance_score: hit.score,
            sub_query: sub_query.to_string(),
        }
    }
}

/// Host without a leading `www.`; empty when the URL does not parse
pub fn domain_of(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.trim_start_matches("www.").to_string()))
        .unwrap_or_default()
}

fn truncate_words(content: &str, max_words: usize) -> String {
    let words: Vec<&str> = content.split_whitespace().collect();
    if words.len() > max_words {
        format!("{}...", words[..max_words].join(" "))
    } else {
        content.to_string()
    }
}

/// Rule-based source type, used when the model cannot categorize
pub fn fallback_categorize(domain: &str) -> &'static str {
    let domain = domain.to_lowercase();
    let has_any = |needles: &[&str]| needles.iter().any(|n| domain.contains(n));

    if has_any(&[".edu", "arxiv", "scholar", "pubmed", "ncbi"]) {
        "academic"
    } else if has_any(&[".gov", "government"]) {
        "government"
    } else if has_any(&["reuters", "bbc", "nytimes", "cnn", "guardian", "apnews"]) {
        "news"
    } else if has_any(&["wikipedia", "britannica"]) {
        "encyclopedia"
    } else if has_any(&["medium.com", "substack", "wordpress", "blogspot"]) {
        "blog"
    } else {
        "other"
    }
}

pub struct RetrieveStage {
    llm: Llm,
    search: Arc<dyn WebSearch>,
    max_results: usize,
}

impl RetrieveStage {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        search: Arc<dyn WebSearch>,
        options: GenerationOptions,
        max_results: usize,
    ) -> Self {
        Self {
            llm: Llm::new(generator, options),
            search,
            max_results: max_results.max(1),
        }
    }

    /// Ask the model for source types; unknown or missing entries use the
    /// domain rules
    async fn categorize(&self, sources: &mut [Source], mut update: StageUpdate) -> StageUpdate {
        let listing: Vec<String> = sources
            .iter()
            .enumerate()
            .map(|(i, s)| format!("[{}] Domain: {} | Title: {} | URL: {}", i, s.domain, s.title, s.url))
            .collect();
        let user = prompts::categorize_user(&listing.join("\n"), sources.len());

        for source in sources.iter_mut() {
            source.source_type = fallback_categorize(&source.domain).to_string();
        }

        match self.llm.ask(prompts::CATEGORIZE_SYSTEM, &user).await {
            Ok(answer) => {
                update = update.record_call(answer.usage);
                let entries = answer
                    .value
                    .get(SOURCES)
                    .or_else(|| answer.value.get("items"))
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                for entry in entries {
                    let index = entry.get("index").and_then(Value::as_u64).map(|i| i as usize);
                    let kind = entry
                        .get("source_type")
                        .and_then(Value::as_str)
                        .map(str::to_lowercase);
                    if let (Some(i), Some(kind)) = (index, kind) {
                        if i < sources.len() && SOURCE_TYPES.contains(&kind.as_str()) {
                            sources[i].source_type = kind;
                        }
                    }
                }
                update
            }
            Err(e) => {
                log::warn!("Source categorization failed, using domain rules: {}", e);
                update
                    .record_call(None)
                    .error(format!("Retriever: categorization failed: {}", e))
            }
        }
    }
}

#[async_trait]
impl Stage for RetrieveStage {
    fn name(&self) -> &str {
        "retrieve"
    }

    async fn execute(&self, state: &WorkflowState) -> StageUpdate {
        let mut sub_queries: Vec<String> = read_field(state, SUB_QUERIES);
        if sub_queries.is_empty() {
            sub_queries.push(state.query().to_string());
        }

        let existing: Vec<Source> = read_field(state, SOURCES);
        let mut seen: HashSet<String> = existing.iter().map(|s| s.url.clone()).collect();
        let mut fresh = Vec::new();
        let mut update = StageUpdate::new();
        let mut calls = 0;

        for (i, sub_query) in sub_queries.iter().enumerate() {
            log::info!("Searching sub-query {}/{}: {}", i + 1, sub_queries.len(), sub_query);
            calls += 1;
            match self.search.search(sub_query, self.max_results).await {
                Ok(hits) => {
                    for hit in hits {
                        if hit.url.is_empty() || !seen.insert(hit.url.clone()) {
                            continue;
                        }
                        fresh.push(Source::from_hit(hit, sub_query));
                    }
                }
                Err(e) => {
                    log::error!("Search failed for '{}': {}", sub_query, e);
                    update = update.error(format!("Retriever: search failed for '{}': {}", sub_query, e));
                }
            }
        }
        update = update.search_calls(calls);

        if !fresh.is_empty() {
            update = self.categorize(&mut fresh, update).await;
        }

        log::info!("Retrieved {} new sources ({} total)", fresh.len(), existing.len() + fresh.len());
        update
            .status(format!(
                "Retrieved {} new sources ({} total)",
                fresh.len(),
                existing.len() + fresh.len()
            ))
            .set(SOURCES, json!(fresh))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::refinery::research::research_schema;
    use crate::refinery::research::testing::{hit, FixedSearch, ScriptedModel};
    use std::collections::HashMap;

    fn search() -> Arc<FixedSearch> {
        let mut hits = HashMap::new();
        hits.insert(
            "ai diagnostics".to_string(),
            vec![
                hit("https://www.nih.gov/ai", "NIH"),
                hit("https://arxiv.org/abs/1", "Paper"),
            ],
        );
        hits.insert(
            "ai costs".to_string(),
            vec![
                hit("https://arxiv.org/abs/1", "Paper again"),
                hit("https://www.reuters.com/ai", "Reuters"),
            ],
        );
        Arc::new(FixedSearch { hits })
    }

    fn state_with(sub_queries: Value) -> WorkflowState {
        let mut state = WorkflowState::new("AI in healthcare", 2, &research_schema());
        StageUpdate::new()
            .set(SUB_QUERIES, sub_queries)
            .apply_to("decompose", &mut state);
        state
    }

    #[test]
    fn test_fallback_categorize() {
        assert_eq!(fallback_categorize("cs.stanford.edu"), "academic");
        assert_eq!(fallback_categorize("arxiv.org"), "academic");
        assert_eq!(fallback_categorize("cdc.gov"), "government");
        assert_eq!(fallback_categorize("reuters.com"), "news");
        assert_eq!(fallback_categorize("en.wikipedia.org"), "encyclopedia");
        assert_eq!(fallback_categorize("someone.substack.com"), "blog");
        assert_eq!(fallback_categorize("example.com"), "other");
    }

    #[test]
    fn test_domain_and_truncation() {
        assert_eq!(domain_of("https://www.bbc.co.uk/news/1"), "bbc.co.uk");
        assert_eq!(domain_of("not a url"), "");

        let long = vec!["word"; 900].join(" ");
        let cut = truncate_words(&long, MAX_CONTENT_WORDS);
        assert_eq!(cut.split_whitespace().count(), MAX_CONTENT_WORDS);
        assert!(cut.ends_with("..."));
    }

    #[tokio::test]
    async fn test_dedupes_within_pass_and_categorizes() {
        let model = Arc::new(ScriptedModel::new(vec![Ok(
            r#"{"sources": [{"index": 0, "source_type": "government"}, {"index": 2, "source_type": "news"}, {"index": 9, "source_type": "news"}]}"#,
        )]));
        let stage = RetrieveStage::new(model, search(), GenerationOptions::default(), 5);

        let mut state = state_with(json!(["ai diagnostics", "ai costs"]));
        let update = stage.execute(&state).await;
        assert!(!update.is_degraded());
        update.apply_to("retrieve", &mut state);

        let sources: Vec<Source> = read_field(&state, SOURCES);
        let urls: Vec<&str> = sources.iter().map(|s| s.url.as_str()).collect();
        assert_eq!(
            urls,
            vec!["https://www.nih.gov/ai", "https://arxiv.org/abs/1", "https://www.reuters.com/ai"]
        );
        assert_eq!(sources[0].source_type, "government");
        assert_eq!(sources[0].domain, "nih.gov");
        // not mentioned by the model, domain rules apply
        assert_eq!(sources[1].source_type, "academic");
        assert_eq!(sources[2].sub_query, "ai costs");
        assert_eq!(state.usage().stage("retrieve").unwrap().search_calls, 2);
    }

    #[tokio::test]
    async fn test_dedupes_against_previous_passes() {
        let model = Arc::new(ScriptedModel::new(vec![
            Ok(r#"{"sources": []}"#),
            Ok(r#"{"sources": []}"#),
        ]));
        let stage = RetrieveStage::new(model, search(), GenerationOptions::default(), 5);

        let mut state = state_with(json!(["ai diagnostics"]));
        stage.execute(&state).await.apply_to("retrieve", &mut state);
        assert_eq!(state.len_of(SOURCES), 2);

        StageUpdate::new()
            .set(SUB_QUERIES, json!(["ai costs"]))
            .apply_to("decompose", &mut state);
        stage.execute(&state).await.apply_to("retrieve", &mut state);

        assert_eq!(state.len_of(SOURCES), 3);
        assert!(state.status().starts_with("Retrieved 1 new sources"));
    }

    #[tokio::test]
    async fn test_failed_search_is_recorded_and_others_continue() {
        let model = Arc::new(ScriptedModel::failing());
        let stage = RetrieveStage::new(model, search(), GenerationOptions::default(), 5);

        let mut state = state_with(json!(["unknown topic", "ai diagnostics"]));
        let update = stage.execute(&state).await;
        assert!(update.is_degraded());
        update.apply_to("retrieve", &mut state);

        let sources: Vec<Source> = read_field(&state, SOURCES);
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].source_type, "government");
        assert_eq!(state.errors().len(), 2);
        assert!(state.errors()[0].contains("search failed for 'unknown topic'"));
        assert!(state.errors()[1].contains("categorization failed"));
    }
}
