// SPDX-License-Identifier: MIT

//! Timeout and exponential backoff around capability calls

use super::{Generation, GenerationOptions, JsonGeneration, TextGenerator};
use crate::adk::error::CapabilityError;
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

/// Retry policy configuration
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
    /// Deadline for each individual attempt
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            attempt_timeout: Duration::from_secs(90),
        }
    }
}

impl RetryPolicy {
    /// Policy with the given attempt count and per-attempt timeout, default backoff
    pub fn new(max_attempts: u32, attempt_timeout: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            attempt_timeout,
            ..Self::default()
        }
    }

    /// Delay to wait after the given (zero-based) failed attempt
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        Duration::from_secs_f64(base.min(self.max_delay.as_secs_f64()))
    }

    /// Longest a single call can take: every attempt times out and every
    /// backoff delay is slept
    pub fn worst_case(&self) -> Duration {
        let waits: Duration = (0..self.max_attempts.saturating_sub(1))
            .map(|attempt| self.delay_for_attempt(attempt))
            .sum();
        self.attempt_timeout * self.max_attempts + waits
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, CapabilityError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CapabilityError>>,
    {
        let mut attempt = 0;
        loop {
            let result = match tokio::time::timeout(self.attempt_timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(CapabilityError::timeout(operation, self.attempt_timeout)),
            };

            match result {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() || attempt + 1 >= self.max_attempts => {
                    log::error!(
                        "{} failed after {} attempt(s): {}",
                        operation,
                        attempt + 1,
                        e
                    );
                    return Err(e);
                }
                Err(e) => {
                    let delay = self.delay_for_attempt(attempt);
                    log::warn!(
                        "{} attempt {}/{} failed: {}. Retrying in {:?}",
                        operation,
                        attempt + 1,
                        self.max_attempts,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// A [`TextGenerator`] that applies a [`RetryPolicy`] to every call
pub struct RetryingGenerator<G> {
    inner: G,
    policy: RetryPolicy,
}

impl<G: TextGenerator> RetryingGenerator<G> {
    pub fn new(inner: G, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl<G: TextGenerator> TextGenerator for RetryingGenerator<G> {
    fn provider(&self) -> &str {
        self.inner.provider()
    }

    async fn generate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        options: &GenerationOptions,
    ) -> Result<Generation, CapabilityError> {
        let operation = format!("{} generate", self.inner.provider());
        self.policy
            .run(&operation, move || {
                self.inner.generate(system_prompt, user_prompt, options)
            })
            .await
    }

    /// Retries cover the parse step too, so a malformed answer gets another try
    async fn generate_json(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        options: &GenerationOptions,
    ) -> Result<JsonGeneration, CapabilityError> {
        let operation = format!("{} generate", self.inner.provider());
        self.policy
            .run(&operation, move || {
                self.inner.generate_json(system_prompt, user_prompt, options)
            })
            .await
    }
}
