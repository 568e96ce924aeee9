// SPDX-License-Identifier: MIT

use super::{SearchHit, WebSearch};
use crate::adk::error::CapabilityError;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

const BRAVE_SEARCH_URL: &str = "https://api.search.brave.com/res/v1/web/search";

#[derive(Debug, Deserialize)]
struct BraveResult {
    title: String,
    url: String,
    #[serde(default)]
    description: String,
}

pub struct BraveSearch {
    client: Client,
    api_key: String,
}

impl BraveSearch {
    pub fn new(api_key: impl Into<String>, request_timeout: Duration) -> Result<Self, CapabilityError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| CapabilityError::search("brave", e.to_string()))?;
        Ok(Self {
            client,
            api_key: api_key.into(),
        })
    }

    /// Brave ranks results but reports no score; derive one from rank
    fn parse_results(body: &Value) -> Result<Vec<SearchHit>, CapabilityError> {
        let results_json = body
            .get("web")
            .and_then(|w| w.get("results"))
            .ok_or_else(|| {
                CapabilityError::search("brave", "Invalid response format: missing web.results")
            })?;

        let results: Vec<BraveResult> = serde_json::from_value(results_json.clone())
            .map_err(|e| CapabilityError::search("brave", e.to_string()))?;

        let total = results.len().max(1) as f64;
        Ok(results
            .into_iter()
            .enumerate()
            .map(|(rank, r)| SearchHit {
                title: r.title,
                url: r.url,
                content: r.description,
                score: 1.0 - rank as f64 / total,
            })
            .collect())
    }
}

#[async_trait]
impl WebSearch for BraveSearch {
    fn provider(&self) -> &str {
        "brave"
    }

    async fn search(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<SearchHit>, CapabilityError> {
        let count = max_results.clamp(1, 20);

        let mut url = reqwest::Url::parse(BRAVE_SEARCH_URL)
            .map_err(|e| CapabilityError::search("brave", e.to_string()))?;
        url.query_pairs_mut()
            .append_pair("q", query)
            .append_pair("count", &count.to_string());

        let resp = self
            .client
            .get(url)
            .header("Accept", "application/json")
            .header("X-Subscription-Token", &self.api_key)
            .send()
            .await
            .map_err(|e| CapabilityError::search("brave", e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(CapabilityError::search(
                "brave",
                format!("HTTP {}: {}", status, text),
            ));
        }

        let body: Value = resp
            .json()
            .await
            .map_err(|e| CapabilityError::search("brave", e.to_string()))?;

        Self::parse_results(&body)
    }
}
