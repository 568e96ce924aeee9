// SPDX-License-Identifier: MIT

//! Web search capability
//!
//! - [tavily] - Tavily search API (default)
//! - [brave] - Brave Search API

pub mod brave;
pub mod tavily;

use crate::adk::error::CapabilityError;
use crate::adk::model::retry::RetryPolicy;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// One search result
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub content: String,
    /// Backend relevance score, 0.0-1.0 when the backend reports one
    #[serde(default)]
    pub score: f64,
}

/// Core trait for search backends
#[async_trait]
pub trait WebSearch: Send + Sync {
    /// Backend label used in logs and errors
    fn provider(&self) -> &str;

    async fn search(&self, query: &str, max_results: usize)
        -> Result<Vec<SearchHit>, CapabilityError>;
}

#[async_trait]
impl<T: WebSearch + ?Sized> WebSearch for Arc<T> {
    fn provider(&self) -> &str {
        (**self).provider()
    }

    async fn search(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<SearchHit>, CapabilityError> {
        (**self).search(query, max_results).await
    }
}

/// A [`WebSearch`] that applies a [`RetryPolicy`] to every call
pub struct RetryingSearch<S> {
    inner: S,
    policy: RetryPolicy,
}

impl<S: WebSearch> RetryingSearch<S> {
    pub fn new(inner: S, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl<S: WebSearch> WebSearch for RetryingSearch<S> {
    fn provider(&self) -> &str {
        self.inner.provider()
    }

    async fn search(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<SearchHit>, CapabilityError> {
        let operation = format!("{} search", self.inner.provider());
        self.policy
            .run(&operation, move || self.inner.search(query, max_results))
            .await
    }
}
