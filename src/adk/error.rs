// SPDX-License-Identifier: MIT

//! Typed error handling for refinery-rs
//!
//! Errors are split by where they are allowed to travel:
//! - [`CapabilityError`] is raised by external collaborators (LLMs, search,
//!   storage) and must be absorbed at the stage boundary.
//! - [`EngineError`] is a setup failure that ends a run in the `Failed` phase.
//! - [`RefineryError`] is the top-level type used by config loading and the CLI.

use std::time::Duration;
use thiserror::Error;

/// Top-level error type for refinery-rs
#[derive(Debug, Error)]
pub enum RefineryError {
    /// Configuration errors (missing env vars, invalid config)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Engine setup failures
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// Errors raised by an external capability
    #[error("Capability error: {0}")]
    Capability(#[from] CapabilityError),

    /// I/O errors
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP request errors
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

/// Errors raised at the boundary of an external capability.
///
/// Stages catch every variant and turn it into a degraded update.
#[derive(Debug, Error)]
pub enum CapabilityError {
    /// Transport, auth or API failure while generating text
    #[error("generation failed ({provider}): {message}")]
    Generation { provider: String, message: String },

    /// The model answered but no JSON could be recovered from the text
    #[error("could not parse JSON from model response: {0}")]
    Parse(String),

    /// Transport or API failure from a web search backend
    #[error("search failed ({provider}): {message}")]
    Search { provider: String, message: String },

    /// Failure while persisting an artifact
    #[error("store failed: {0}")]
    Store(String),

    /// The call did not complete within its deadline
    #[error("{operation} timed out after {elapsed:?}")]
    Timeout {
        operation: String,
        elapsed: Duration,
    },
}

/// Failures that prevent any stage from running
#[derive(Debug, Error)]
pub enum EngineError {
    /// A required capability or credential is unavailable
    #[error("setup failed: {0}")]
    Setup(String),

    /// The engine was built without any stages
    #[error("pipeline has no stages")]
    EmptyPipeline,
}

impl CapabilityError {
    /// Create a generation error
    pub fn generation(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Generation {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create a search error
    pub fn search(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Search {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, elapsed: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed,
        }
    }

    /// Whether retrying the same call could plausibly succeed.
    ///
    /// Parse failures are retried too: the model may answer well-formed
    /// JSON on the next attempt. Auth failures are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Generation { message, .. } | Self::Search { message, .. } => {
                let lower = message.to_lowercase();
                !(lower.contains("401")
                    || lower.contains("403")
                    || lower.contains("unauthorized")
                    || lower.contains("forbidden")
                    || lower.contains("invalid api key"))
            }
            Self::Parse(_) | Self::Timeout { .. } => true,
            Self::Store(_) => false,
        }
    }
}

impl RefineryError {
    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}

impl From<reqwest::Error> for CapabilityError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout {
                operation: "http request".to_string(),
                elapsed: Duration::ZERO,
            }
        } else {
            Self::Generation {
                provider: "http".to_string(),
                message: err.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_errors_are_not_retryable() {
        let err = CapabilityError::generation("openai", "HTTP 401 Unauthorized");
        assert!(!err.is_retryable());

        let err = CapabilityError::search("tavily", "403 Forbidden");
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_transient_errors_are_retryable() {
        assert!(CapabilityError::generation("openai", "HTTP 503 overloaded").is_retryable());
        assert!(CapabilityError::Parse("no json".into()).is_retryable());
        assert!(CapabilityError::timeout("generate", Duration::from_secs(90)).is_retryable());
        assert!(!CapabilityError::Store("disk full".into()).is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = CapabilityError::generation("anthropic", "boom");
        assert_eq!(err.to_string(), "generation failed (anthropic): boom");

        let err: RefineryError = EngineError::Setup("missing TAVILY_API_KEY".into()).into();
        assert_eq!(
            err.to_string(),
            "Engine error: setup failed: missing TAVILY_API_KEY"
        );
    }
}
