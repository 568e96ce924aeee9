// SPDX-License-Identifier: MIT

//! Anthropic Model - Claude messages API implementation

use super::{Generation, GenerationOptions, TextGenerator, TokenUsage};
use crate::adk::error::CapabilityError;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

pub const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Anthropic Claude model implementation
pub struct AnthropicModel {
    client: Client,
    api_key: String,
    model_name: String,
    base_url: String,
    debug: bool,
}

impl AnthropicModel {
    pub fn new(
        model_name: impl Into<String>,
        api_key: impl Into<String>,
        base_url: Option<String>,
        request_timeout: Duration,
    ) -> Result<Self, CapabilityError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| CapabilityError::generation("anthropic", e.to_string()))?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            model_name: model_name.into(),
            base_url: base_url
                .unwrap_or_else(|| ANTHROPIC_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            debug: false,
        })
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    fn request_body(&self, system_prompt: &str, user_prompt: &str, options: &GenerationOptions) -> Value {
        let mut body = json!({
            "model": options.model.as_deref().unwrap_or(&self.model_name),
            "system": system_prompt,
            "messages": [{
                "role": "user",
                "content": [{ "type": "text", "text": user_prompt }]
            }],
            "max_tokens": options.max_output_tokens.unwrap_or(DEFAULT_MAX_TOKENS)
        });

        if let Some(temp) = options.temperature {
            body["temperature"] = json!(temp);
        }

        body
    }

    /// Parse Anthropic response into a Generation
    ///
    /// Text blocks are concatenated; thinking blocks are dropped.
    fn parse_anthropic_response(response: &Value) -> Result<Generation, String> {
        let content_blocks = response["content"]
            .as_array()
            .ok_or("No content in Anthropic response")?;

        let text: String = content_blocks
            .iter()
            .filter(|block| block["type"].as_str() == Some("text"))
            .filter_map(|block| block["text"].as_str())
            .collect::<Vec<_>>()
            .join("");

        if let Some(stop_reason) = response["stop_reason"].as_str() {
            log::debug!("Anthropic stop reason: {}", stop_reason);
        }

        let usage = response.get("usage").filter(|u| u.is_object()).map(|u| TokenUsage {
            prompt_tokens: u["input_tokens"].as_u64().unwrap_or(0),
            completion_tokens: u["output_tokens"].as_u64().unwrap_or(0),
        });

        Ok(Generation { text, usage })
    }
}

#[async_trait]
impl TextGenerator for AnthropicModel {
    fn provider(&self) -> &str {
        "anthropic"
    }

    async fn generate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        options: &GenerationOptions,
    ) -> Result<Generation, CapabilityError> {
        let url = format!("{}/messages", self.base_url);
        let body = self.request_body(system_prompt, user_prompt, options);

        if self.debug {
            log::debug!(
                "Anthropic request body: {}",
                serde_json::to_string_pretty(&body).unwrap_or_default()
            );
        }

        let resp = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| CapabilityError::generation("anthropic", e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(CapabilityError::generation(
                "anthropic",
                format!("HTTP {}: {}", status, text),
            ));
        }

        let resp_json: Value = resp
            .json()
            .await
            .map_err(|e| CapabilityError::generation("anthropic", e.to_string()))?;

        if self.debug {
            log::debug!("Anthropic response: {}", resp_json);
        }

        Self::parse_anthropic_response(&resp_json)
            .map_err(|e| CapabilityError::generation("anthropic", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> AnthropicModel {
        AnthropicModel::new("claude-3-5-haiku-latest", "key", None, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_request_body_carries_system_separately() {
        let body = model().request_body("You are a fact checker", "Check this", &GenerationOptions::default());

        assert_eq!(body["system"], "You are a fact checker");
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"][0]["text"], "Check this");
        assert_eq!(body["max_tokens"], 4096);
    }

    #[test]
    fn test_parse_text_blocks() {
        let response = json!({
            "content": [
                {"type": "thinking", "thinking": "hmm"},
                {"type": "text", "text": "{\"quality_score\": "},
                {"type": "text", "text": "70}"}
            ],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 100, "output_tokens": 20}
        });

        let generation = AnthropicModel::parse_anthropic_response(&response).unwrap();
        assert_eq!(generation.text, "{\"quality_score\": 70}");
        assert_eq!(
            generation.usage,
            Some(TokenUsage {
                prompt_tokens: 100,
                completion_tokens: 20
            })
        );
    }

    #[test]
    fn test_parse_missing_content() {
        assert!(AnthropicModel::parse_anthropic_response(&json!({"type": "error"})).is_err());
    }
}
