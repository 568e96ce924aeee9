// SPDX-License-Identifier: MIT

use super::{SearchHit, WebSearch};
use crate::adk::error::CapabilityError;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

const TAVILY_SEARCH_URL: &str = "https://api.tavily.com/search";

#[derive(Debug, Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<TavilyResult>,
}

#[derive(Debug, Deserialize)]
struct TavilyResult {
    #[serde(default = "untitled")]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    score: f64,
}

fn untitled() -> String {
    "Untitled".to_string()
}

impl From<TavilyResult> for SearchHit {
    fn from(r: TavilyResult) -> Self {
        SearchHit {
            title: r.title,
            url: r.url,
            content: r.content,
            score: r.score,
        }
    }
}

/// Tavily search client using advanced search depth
pub struct TavilySearch {
    client: Client,
    api_key: String,
}

impl TavilySearch {
    pub fn new(api_key: impl Into<String>, request_timeout: Duration) -> Result<Self, CapabilityError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| CapabilityError::search("tavily", e.to_string()))?;
        Ok(Self {
            client,
            api_key: api_key.into(),
        })
    }
}

#[async_trait]
impl WebSearch for TavilySearch {
    fn provider(&self) -> &str {
        "tavily"
    }

    async fn search(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<SearchHit>, CapabilityError> {
        let body = json!({
            "api_key": self.api_key,
            "query": query,
            "max_results": max_results,
            "search_depth": "advanced",
            "include_answer": false
        });

        let resp = self
            .client
            .post(TAVILY_SEARCH_URL)
            .json(&body)
            .send()
            .await
            .map_err(|e| CapabilityError::search("tavily", e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(CapabilityError::search(
                "tavily",
                format!("HTTP {}: {}", status, text),
            ));
        }

        let parsed: TavilyResponse = resp
            .json()
            .await
            .map_err(|e| CapabilityError::search("tavily", e.to_string()))?;

        log::debug!("Tavily returned {} results for '{}'", parsed.results.len(), query);

        Ok(parsed.results.into_iter().map(SearchHit::from).collect())
    }
}
