// SPDX-License-Identifier: MIT

//! Model module - defines the text generation capability and its backends
//!
//! This module provides the core [`TextGenerator`] trait and shared types.
//! Implementations are in their own submodules:
//! - [anthropic] - Anthropic's Claude API
//! - [openai] - OpenAI-compatible chat completions (OpenAI, OpenRouter, Ollama)
//! - [retry] - timeout and exponential backoff around any generator

pub mod anthropic;
pub mod openai;
pub mod retry;

use crate::adk::error::CapabilityError;
use crate::adk::json;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Appended to system prompts when a JSON answer is expected
const JSON_ONLY_SUFFIX: &str = "\n\nCRITICAL: You MUST respond with valid JSON only. \
No markdown code fences, no explanatory text outside the JSON.";

/// Per-call generation options
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GenerationOptions {
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_output_tokens: Option<u32>,
}

/// Token counts reported by a provider for one call
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// Text returned by a generator, with usage when the provider reports it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Generation {
    pub text: String,
    pub usage: Option<TokenUsage>,
}

impl Generation {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            usage: None,
        }
    }
}

/// A parsed JSON answer together with the usage of the call that produced it
#[derive(Debug, Clone)]
pub struct JsonGeneration {
    pub value: Value,
    pub usage: Option<TokenUsage>,
}

/// Core trait for LLM backends
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Provider label used in logs and errors
    fn provider(&self) -> &str;

    /// Send one system + user exchange and return the raw answer
    async fn generate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        options: &GenerationOptions,
    ) -> Result<Generation, CapabilityError>;

    /// Ask for a JSON answer and recover it leniently from the response text
    async fn generate_json(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        options: &GenerationOptions,
    ) -> Result<JsonGeneration, CapabilityError> {
        let system = format!("{}{}", system_prompt, JSON_ONLY_SUFFIX);
        let generation = self.generate(&system, user_prompt, options).await?;
        let value = json::parse_lenient(&generation.text)?;
        Ok(JsonGeneration {
            value,
            usage: generation.usage,
        })
    }
}

#[async_trait]
impl<T: TextGenerator + ?Sized> TextGenerator for Arc<T> {
    fn provider(&self) -> &str {
        (**self).provider()
    }

    async fn generate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        options: &GenerationOptions,
    ) -> Result<Generation, CapabilityError> {
        (**self).generate(system_prompt, user_prompt, options).await
    }

    async fn generate_json(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        options: &GenerationOptions,
    ) -> Result<JsonGeneration, CapabilityError> {
        (**self)
            .generate_json(system_prompt, user_prompt, options)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct EchoGenerator {
        answer: String,
        seen_system: Mutex<Option<String>>,
    }

    #[async_trait]
    impl TextGenerator for EchoGenerator {
        fn provider(&self) -> &str {
            "echo"
        }

        async fn generate(
            &self,
            system_prompt: &str,
            _user_prompt: &str,
            _options: &GenerationOptions,
        ) -> Result<Generation, CapabilityError> {
            *self.seen_system.lock().unwrap() = Some(system_prompt.to_string());
            Ok(Generation {
                text: self.answer.clone(),
                usage: Some(TokenUsage {
                    prompt_tokens: 10,
                    completion_tokens: 5,
                }),
            })
        }
    }

    #[tokio::test]
    async fn test_generate_json_appends_instruction_and_parses() {
        let generator = EchoGenerator {
            answer: "Sure! ```json\n{\"sub_queries\": [\"a\"]}\n```".to_string(),
            seen_system: Mutex::new(None),
        };

        let result = generator
            .generate_json("You decompose queries.", "q", &GenerationOptions::default())
            .await
            .unwrap();

        assert_eq!(result.value["sub_queries"][0], "a");
        assert_eq!(result.usage.unwrap().total(), 15);

        let system = generator.seen_system.lock().unwrap().clone().unwrap();
        assert!(system.starts_with("You decompose queries."));
        assert!(system.contains("valid JSON only"));
    }

    #[tokio::test]
    async fn test_generate_json_reports_parse_error() {
        let generator = EchoGenerator {
            answer: "I cannot help with that.".to_string(),
            seen_system: Mutex::new(None),
        };

        let err = generator
            .generate_json("s", "u", &GenerationOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CapabilityError::Parse(_)));
    }
}
