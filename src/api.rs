//! Language model interaction with exponential backoff retry logic.
//!
//! # Architecture
//!
//! - [`LanguageModel`]: core trait, one completion per `(instruction, prompt)`
//! - [`AwfulJadeModel`]: wraps the `awful_aj` library's `ask` function
//! - [`RetryAsk`]: decorator that adds retry logic to any [`LanguageModel`]
//! - [`TimeoutAsk`]: decorator that bounds a single call's wall-clock time
//!
//! The extraction agent never retries on its own. Whether a failed call is
//! retried is decided by whoever builds the model stack, normally `main`:
//! `TimeoutAsk` inside `RetryAsk` inside the agent.
//!
//! # Retry Strategy
//!
//! - Configurable number of retry attempts
//! - Exponential backoff from a configurable base delay
//! - Maximum delay capped at 30 seconds
//! - Random jitter (0-250ms) added to prevent thundering herd

use crate::error::ExternalServiceError;
use awful_aj::api::ask;
use awful_aj::{config::AwfulJadeConfig, template::ChatTemplate};
use rand::{Rng, rng};
use std::fmt;
use std::time::{Duration as StdDuration, Instant};
use tokio::time::sleep;
use tracing::{error, instrument, warn};

/// Trait for async language model completion.
///
/// Implementors receive the extraction instruction and the article prompt
/// separately and return the model's raw text. Failures are
/// [`ExternalServiceError`]s so callers can tell them apart from an answer
/// that merely failed validation.
pub trait LanguageModel {
    async fn complete(&self, instruction: &str, prompt: &str) -> Result<String, ExternalServiceError>;
}

impl<T: LanguageModel> LanguageModel for &T {
    async fn complete(&self, instruction: &str, prompt: &str) -> Result<String, ExternalServiceError> {
        (**self).complete(instruction, prompt).await
    }
}

/// Wrapper that adds exponential backoff retry logic to any [`LanguageModel`].
///
/// ```text
/// delay = min(base_delay * 2^(attempt-1), max_delay) + random_jitter(0..250ms)
/// ```
pub struct RetryAsk<T> {
    inner: T,
    max_retries: usize,
    base_delay: StdDuration,
    max_delay: StdDuration,
}

impl<T> RetryAsk<T>
where
    T: LanguageModel,
{
    pub fn new(inner: T, max_retries: usize, base_delay: StdDuration) -> Self {
        Self {
            inner,
            max_retries,
            base_delay,
            max_delay: StdDuration::from_secs(30),
        }
    }
}

impl<T> fmt::Debug for RetryAsk<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryAsk")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .finish()
    }
}

impl<T> LanguageModel for RetryAsk<T>
where
    T: LanguageModel,
{
    #[instrument(level = "info", skip_all)]
    async fn complete(&self, instruction: &str, prompt: &str) -> Result<String, ExternalServiceError> {
        let total_t0 = Instant::now();
        let mut attempt = 0usize;

        loop {
            let attempt_t0 = Instant::now();
            match self.inner.complete(instruction, prompt).await {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    attempt += 1;
                    let attempt_dt = attempt_t0.elapsed();
                    let total_dt = total_t0.elapsed();

                    if attempt > self.max_retries {
                        error!(
                            attempt,
                            max = self.max_retries,
                            elapsed_ms_attempt = attempt_dt.as_millis() as u64,
                            elapsed_ms_total = total_dt.as_millis() as u64,
                            error = %e,
                            "complete() exhausted retries"
                        );
                        return Err(e);
                    }

                    let mut delay = self
                        .base_delay
                        .saturating_mul(1u32 << (attempt - 1).min(16));
                    if delay > self.max_delay {
                        delay = self.max_delay;
                    }
                    let jitter_ms: u64 = rng().random_range(0..=250);
                    let delay = delay + StdDuration::from_millis(jitter_ms);

                    warn!(
                        attempt,
                        max = self.max_retries,
                        elapsed_ms_attempt = attempt_dt.as_millis() as u64,
                        elapsed_ms_total = total_dt.as_millis() as u64,
                        ?delay,
                        error = %e,
                        "complete() attempt failed; backing off"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

/// Fails a call that takes longer than `limit`.
#[derive(Debug)]
pub struct TimeoutAsk<T> {
    inner: T,
    limit: StdDuration,
}

impl<T> TimeoutAsk<T> {
    pub fn new(inner: T, limit: StdDuration) -> Self {
        Self { inner, limit }
    }
}

impl<T: LanguageModel> LanguageModel for TimeoutAsk<T> {
    async fn complete(&self, instruction: &str, prompt: &str) -> Result<String, ExternalServiceError> {
        match tokio::time::timeout(self.limit, self.inner.complete(instruction, prompt)).await {
            Ok(res) => res,
            Err(_) => Err(ExternalServiceError::Model(format!(
                "no response within {:?}",
                self.limit
            ))),
        }
    }
}

/// [`LanguageModel`] backed by `awful_aj::api::ask`.
///
/// The chat template supplies the system prompt and any few-shot messages;
/// the extraction instruction is sent ahead of the article in the user turn.
pub struct AwfulJadeModel {
    config: AwfulJadeConfig,
    template: ChatTemplate,
}

impl AwfulJadeModel {
    pub fn new(config: AwfulJadeConfig, template: ChatTemplate) -> Self {
        Self { config, template }
    }
}

impl fmt::Debug for AwfulJadeModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwfulJadeModel").finish_non_exhaustive()
    }
}

impl LanguageModel for AwfulJadeModel {
    #[instrument(level = "info", skip_all, fields(prompt_chars = prompt.len()))]
    async fn complete(&self, instruction: &str, prompt: &str) -> Result<String, ExternalServiceError> {
        let t0 = Instant::now();
        let question = compose_question(instruction, prompt);
        let res = ask(&self.config, question, &self.template, None, None).await;
        let dt = t0.elapsed();

        match res {
            Ok(text) => Ok(text),
            Err(e) => {
                warn!(elapsed_ms = dt.as_millis() as u64, error = %e, "API call failed");
                Err(ExternalServiceError::Model(e.to_string()))
            }
        }
    }
}

fn compose_question(instruction: &str, prompt: &str) -> String {
    format!("{instruction}\n\nArticle:\n{prompt}")
}
