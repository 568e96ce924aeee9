// SPDX-License-Identifier: MIT

//! Run settings: defaults, then an optional YAML file, then the environment

use crate::adk::error::{EngineError, RefineryError};
use crate::adk::model::anthropic::ANTHROPIC_BASE_URL;
use crate::adk::model::openai::OPENROUTER_BASE_URL;
use crate::adk::model::retry::RetryPolicy;
use crate::adk::model::GenerationOptions;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// `openai` (any OpenAI-compatible endpoint) or `anthropic`
    pub provider: String,
    pub model: String,
    /// Falls back to the provider's public endpoint when unset
    pub base_url: Option<String>,
    pub llm_api_key: String,
    /// `tavily` or `brave`
    pub search_provider: String,
    pub search_api_key: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub request_timeout_secs: u64,
    pub max_retries: u32,
    pub max_search_results: usize,
    pub max_iterations: u32,
    pub quality_threshold: f64,
    pub max_sub_queries: usize,
    pub output_dir: String,
    pub debug_llm: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "openai/gpt-4o-mini".to_string(),
            base_url: None,
            llm_api_key: String::new(),
            search_provider: "tavily".to_string(),
            search_api_key: String::new(),
            temperature: 0.2,
            max_tokens: 4096,
            request_timeout_secs: 90,
            max_retries: 3,
            max_search_results: 6,
            max_iterations: 2,
            quality_threshold: 65.0,
            max_sub_queries: 5,
            output_dir: "outputs".to_string(),
            debug_llm: false,
        }
    }
}

fn parse_var<T: FromStr>(name: &str, raw: &str) -> Result<T, RefineryError> {
    raw.trim()
        .parse()
        .map_err(|_| RefineryError::config(format!("{} has an invalid value: {:?}", name, raw)))
}

fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn mask(secret: &str) -> String {
    if secret.is_empty() {
        return "<unset>".to_string();
    }
    let tail: String = secret
        .chars()
        .rev()
        .take(4)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("****{}", tail)
}

impl Settings {
    /// Load settings; `path` is an optional YAML file layered over the defaults
    pub fn load(path: Option<&Path>) -> Result<Self, RefineryError> {
        let mut settings = match path {
            Some(p) => {
                let content = fs::read_to_string(p)?;
                Self::parse_yaml(&content)?
            }
            None => Self::default(),
        };
        settings.apply_env(|name| std::env::var(name).ok())?;
        Ok(settings)
    }

    /// Parse a (possibly partial) settings document
    pub fn parse_yaml(content: &str) -> Result<Self, RefineryError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// Override fields from environment variables read through `lookup`
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), RefineryError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("REFINERY_PROVIDER") {
            self.provider = v.trim().to_ascii_lowercase();
        }
        if let Some(v) = get("DEFAULT_MODEL") {
            self.model = v;
        }
        if let Some(v) = get("LLM_BASE_URL").or_else(|| get("OPENROUTER_BASE_URL")) {
            self.base_url = Some(v);
        }

        let key = if self.provider == "anthropic" {
            get("ANTHROPIC_API_KEY")
        } else {
            get("OPENROUTER_API_KEY").or_else(|| get("OPENAI_API_KEY"))
        };
        if let Some(v) = key {
            self.llm_api_key = v;
        }

        if let Some(v) = get("SEARCH_PROVIDER") {
            self.search_provider = v.trim().to_ascii_lowercase();
        }
        let search_key = match self.search_provider.as_str() {
            "brave" => get("BRAVE_API_KEY"),
            _ => get("TAVILY_API_KEY"),
        };
        if let Some(v) = search_key {
            self.search_api_key = v;
        }

        if let Some(v) = get("TEMPERATURE") {
            self.temperature = parse_var("TEMPERATURE", &v)?;
        }
        if let Some(v) = get("MAX_TOKENS") {
            self.max_tokens = parse_var("MAX_TOKENS", &v)?;
        }
        if let Some(v) = get("REQUEST_TIMEOUT") {
            self.request_timeout_secs = parse_var("REQUEST_TIMEOUT", &v)?;
        }
        if let Some(v) = get("MAX_RETRIES") {
            self.max_retries = parse_var("MAX_RETRIES", &v)?;
        }
        if let Some(v) = get("MAX_SEARCH_RESULTS") {
            self.max_search_results = parse_var("MAX_SEARCH_RESULTS", &v)?;
        }
        if let Some(v) = get("MAX_ITERATIONS") {
            self.max_iterations = parse_var("MAX_ITERATIONS", &v)?;
        }
        if let Some(v) = get("QUALITY_THRESHOLD") {
            self.quality_threshold = parse_var("QUALITY_THRESHOLD", &v)?;
        }
        if let Some(v) = get("MAX_SUB_QUERIES") {
            self.max_sub_queries = parse_var("MAX_SUB_QUERIES", &v)?;
        }
        if let Some(v) = get("OUTPUT_DIR") {
            self.output_dir = v;
        }
        if let Some(v) = get("DEBUG_LLM") {
            self.debug_llm = parse_flag(&v);
        }
        Ok(())
    }

    /// Endpoint for the configured provider
    pub fn effective_base_url(&self) -> &str {
        match (&self.base_url, self.provider.as_str()) {
            (Some(url), _) => url,
            (None, "anthropic") => ANTHROPIC_BASE_URL,
            (None, _) => OPENROUTER_BASE_URL,
        }
    }

    /// Local OpenAI-compatible servers (Ollama) take no key
    pub fn is_local_endpoint(&self) -> bool {
        let url = self.effective_base_url();
        url.contains("localhost") || url.contains("127.0.0.1")
    }

    fn llm_key_var(&self) -> &'static str {
        if self.provider == "anthropic" {
            "ANTHROPIC_API_KEY"
        } else {
            "OPENROUTER_API_KEY"
        }
    }

    fn search_key_var(&self) -> &'static str {
        if self.search_provider == "brave" {
            "BRAVE_API_KEY"
        } else {
            "TAVILY_API_KEY"
        }
    }

    /// Check that every capability the research pipeline needs is usable
    pub fn validate(&self) -> Result<(), EngineError> {
        let mut problems = Vec::new();

        match self.provider.as_str() {
            "openai" | "anthropic" => {
                if self.llm_api_key.trim().is_empty()
                    && !(self.provider == "openai" && self.is_local_endpoint())
                {
                    problems.push(format!("{} is not set", self.llm_key_var()));
                }
            }
            other => problems.push(format!("unknown LLM provider '{}'", other)),
        }

        match self.search_provider.as_str() {
            "tavily" | "brave" => {
                if self.search_api_key.trim().is_empty() {
                    problems.push(format!("{} is not set", self.search_key_var()));
                }
            }
            other => problems.push(format!("unknown search provider '{}'", other)),
        }

        if !(0.0..=100.0).contains(&self.quality_threshold) {
            problems.push(format!(
                "quality_threshold must be within 0-100, got {}",
                self.quality_threshold
            ));
        }
        if self.max_sub_queries == 0 {
            problems.push("max_sub_queries must be at least 1".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(EngineError::Setup(problems.join("; ")))
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, self.request_timeout())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Deadline for one stage. Retrieve is the busiest stage with one search
    /// per sub-query plus a categorization call, each under the retry policy
    pub fn stage_timeout(&self) -> Duration {
        let calls = self.max_sub_queries.max(1) as u32 + 1;
        self.retry_policy().worst_case() * calls
    }

    pub fn generation_options(&self) -> GenerationOptions {
        GenerationOptions {
            model: None,
            temperature: Some(self.temperature),
            max_output_tokens: Some(self.max_tokens),
        }
    }

    /// Copy safe to print: API keys are masked
    pub fn redacted(&self) -> Self {
        Self {
            llm_api_key: mask(&self.llm_api_key),
            search_api_key: mask(&self.search_api_key),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let s = Settings::default();
        assert_eq!(s.provider, "openai");
        assert_eq!(s.max_iterations, 2);
        assert_eq!(s.quality_threshold, 65.0);
        assert_eq!(s.effective_base_url(), OPENROUTER_BASE_URL);
        assert_eq!(s.retry_policy().max_attempts, 3);
        assert_eq!(s.retry_policy().attempt_timeout, Duration::from_secs(90));
    }

    #[test]
    fn test_stage_timeout_scales_with_sub_queries() {
        let s = Settings::default();
        assert_eq!(s.stage_timeout(), Duration::from_secs(276 * 6));

        let narrow = Settings {
            max_sub_queries: 1,
            max_retries: 1,
            request_timeout_secs: 30,
            ..Settings::default()
        };
        assert_eq!(narrow.stage_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let s = Settings::parse_yaml(
            r#"
provider: anthropic
model: claude-3-5-haiku-latest
max_iterations: 4
"#,
        )
        .unwrap();
        assert_eq!(s.provider, "anthropic");
        assert_eq!(s.max_iterations, 4);
        assert_eq!(s.max_sub_queries, 5);
        assert_eq!(s.effective_base_url(), ANTHROPIC_BASE_URL);
    }

    #[test]
    fn test_env_overrides_file() {
        let mut s = Settings::parse_yaml("max_iterations: 4\nsearch_provider: brave").unwrap();
        s.apply_env(env(&[
            ("MAX_ITERATIONS", "3"),
            ("OPENROUTER_API_KEY", "sk-or-123"),
            ("BRAVE_API_KEY", "brv"),
            ("TAVILY_API_KEY", "tvly"),
            ("DEBUG_LLM", "true"),
        ]))
        .unwrap();

        assert_eq!(s.max_iterations, 3);
        assert_eq!(s.llm_api_key, "sk-or-123");
        assert_eq!(s.search_api_key, "brv");
        assert!(s.debug_llm);
        assert!(s.validate().is_ok());
    }

    #[test]
    fn test_anthropic_reads_its_own_key() {
        let mut s = Settings::default();
        s.apply_env(env(&[
            ("REFINERY_PROVIDER", "Anthropic"),
            ("OPENROUTER_API_KEY", "wrong"),
            ("ANTHROPIC_API_KEY", "sk-ant"),
        ]))
        .unwrap();
        assert_eq!(s.provider, "anthropic");
        assert_eq!(s.llm_api_key, "sk-ant");
    }

    #[test]
    fn test_invalid_number_is_config_error() {
        let mut s = Settings::default();
        let err = s.apply_env(env(&[("MAX_ITERATIONS", "many")])).unwrap_err();
        assert!(matches!(err, RefineryError::Config(_)));
    }

    #[test]
    fn test_validate_lists_missing_keys() {
        let err = Settings::default().validate().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("OPENROUTER_API_KEY"));
        assert!(msg.contains("TAVILY_API_KEY"));
    }

    #[test]
    fn test_local_endpoint_needs_no_llm_key() {
        let s = Settings {
            base_url: Some("http://localhost:11434/v1".to_string()),
            search_api_key: "tvly".to_string(),
            ..Settings::default()
        };
        assert!(s.validate().is_ok());
    }

    #[test]
    fn test_redacted_masks_keys() {
        let s = Settings {
            llm_api_key: "sk-or-abcdef".to_string(),
            ..Settings::default()
        };
        let r = s.redacted();
        assert_eq!(r.llm_api_key, "****cdef");
        assert_eq!(r.search_api_key, "<unset>");
    }
}
