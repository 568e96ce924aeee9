// SPDX-License-Identifier: MIT

//! OpenAI-compatible chat completions
//!
//! One client serves OpenAI, OpenRouter and Ollama: they all expose
//! `POST {base_url}/chat/completions` with the same request shape.

use super::{Generation, GenerationOptions, TextGenerator, TokenUsage};
use crate::adk::error::CapabilityError;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// Chat completions client for OpenAI-compatible endpoints
pub struct OpenAIModel {
    client: Client,
    api_key: Option<String>,
    model_name: String,
    base_url: String,
    provider: String,
    debug: bool,
}

impl OpenAIModel {
    /// Create a new OpenAIModel
    ///
    /// `api_key` may be `None` for local endpoints such as Ollama.
    pub fn new(
        model_name: impl Into<String>,
        api_key: Option<String>,
        base_url: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self, CapabilityError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| CapabilityError::generation("openai", e.to_string()))?;

        Ok(Self {
            client,
            api_key,
            model_name: model_name.into(),
            provider: provider_label(&base_url).to_string(),
            base_url,
            debug: false,
        })
    }

    /// Log request and response bodies at debug level
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    fn request_body(&self, system_prompt: &str, user_prompt: &str, options: &GenerationOptions) -> Value {
        let mut body = json!({
            "model": options.model.as_deref().unwrap_or(&self.model_name),
            "messages": [
                { "role": "system", "content": system_prompt },
                { "role": "user", "content": user_prompt }
            ]
        });

        if let Some(temp) = options.temperature {
            body["temperature"] = json!(temp);
        }
        if let Some(max_tokens) = options.max_output_tokens {
            body["max_tokens"] = json!(max_tokens);
        }

        body
    }

    /// Parse a chat completions response into a Generation
    fn parse_openai_response(response: &Value) -> Result<Generation, String> {
        let message = response["choices"]
            .get(0)
            .map(|c| &c["message"])
            .ok_or("No choices in OpenAI response")?;

        let text = message["content"].as_str().unwrap_or_default().to_string();

        let usage = response.get("usage").filter(|u| u.is_object()).map(|u| TokenUsage {
            prompt_tokens: u["prompt_tokens"].as_u64().unwrap_or(0),
            completion_tokens: u["completion_tokens"].as_u64().unwrap_or(0),
        });

        Ok(Generation { text, usage })
    }
}

fn provider_label(base_url: &str) -> &'static str {
    if base_url.contains("openrouter") {
        "openrouter"
    } else if base_url.contains("localhost") || base_url.contains("127.0.0.1") {
        "ollama"
    } else {
        "openai"
    }
}

#[async_trait]
impl TextGenerator for OpenAIModel {
    fn provider(&self) -> &str {
        &self.provider
    }

    async fn generate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        options: &GenerationOptions,
    ) -> Result<Generation, CapabilityError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.request_body(system_prompt, user_prompt, options);

        if self.debug {
            log::debug!(
                "{} request body: {}",
                self.provider,
                serde_json::to_string_pretty(&body).unwrap_or_default()
            );
        }

        let mut request = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&body);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        let resp = request
            .send()
            .await
            .map_err(|e| CapabilityError::generation(&self.provider, e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(CapabilityError::generation(
                &self.provider,
                format!("HTTP {}: {}", status, text),
            ));
        }

        let response: Value = resp
            .json()
            .await
            .map_err(|e| CapabilityError::generation(&self.provider, e.to_string()))?;

        if self.debug {
            log::debug!(
                "{} response: {}",
                self.provider,
                serde_json::to_string_pretty(&response).unwrap_or_default()
            );
        }

        let generation = Self::parse_openai_response(&response)
            .map_err(|e| CapabilityError::generation(&self.provider, e))?;

        if let Some(usage) = generation.usage {
            log::info!(
                "{} tokens: {} (prompt={}, completion={})",
                self.provider,
                usage.total(),
                usage.prompt_tokens,
                usage.completion_tokens
            );
        }

        Ok(generation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(base_url: &str) -> OpenAIModel {
        OpenAIModel::new("gpt-4o-mini", None, base_url, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_provider_label_from_base_url() {
        assert_eq!(model(OPENROUTER_BASE_URL).provider(), "openrouter");
        assert_eq!(model("http://localhost:11434/v1").provider(), "ollama");
        assert_eq!(model("https://api.openai.com/v1/").provider(), "openai");
    }

    #[test]
    fn test_request_body_applies_options() {
        let m = model(OPENROUTER_BASE_URL);
        let options = GenerationOptions {
            model: Some("anthropic/claude-3.5-haiku".to_string()),
            temperature: Some(0.2),
            max_output_tokens: Some(4096),
        };
        let body = m.request_body("sys", "user", &options);

        assert_eq!(body["model"], "anthropic/claude-3.5-haiku");
        assert_eq!(body["max_tokens"], 4096);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "user");
    }

    #[test]
    fn test_parse_openai_text_response() {
        let response = json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": "Hello, how can I help?"
                }
            }],
            "usage": {"prompt_tokens": 12, "completion_tokens": 8, "total_tokens": 20}
        });

        let generation = OpenAIModel::parse_openai_response(&response).unwrap();
        assert_eq!(generation.text, "Hello, how can I help?");
        assert_eq!(generation.usage.unwrap().total(), 20);
    }

    #[test]
    fn test_parse_openai_response_without_choices() {
        let response = json!({"error": {"message": "bad"}});
        assert!(OpenAIModel::parse_openai_response(&response).is_err());
    }
}
