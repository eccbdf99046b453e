//! Generative-text API interaction with exponential backoff retry logic.
//!
//! # Architecture
//!
//! - [`AskAsync`]: core trait, one prompt in, one completion out
//! - [`GeminiClient`]: calls Gemini's `generateContent` REST endpoint
//! - [`RetryAsk`]: decorator that adds retry logic to any `AskAsync` implementation
//!
//! # Retry Strategy
//!
//! - Small, configurable number of retries (quota errors are not retried)
//! - Exponential backoff starting at 1 second
//! - Maximum delay capped at 30 seconds
//! - Random jitter (0-250ms) added to prevent thundering herd

use crate::error::SummarizeError;
use crate::utils::truncate_for_log;
use async_trait::async_trait;
use rand::{Rng, rng};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration as StdDuration, Instant};
use tokio::time::sleep;
use tracing::{error, info, instrument, warn};

const GEMINI_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Trait for async LLM interaction.
///
/// Implementors send a prompt to a model and return its text. This seam
/// lets decorators (retry) and test doubles stand in for the real API.
#[async_trait]
pub trait AskAsync: Send + Sync {
    async fn ask(&self, prompt: &str) -> Result<String, SummarizeError>;
}

/// Wrapper that adds exponential backoff retry logic to any [`AskAsync`] implementation.
///
/// The delay between retries follows this formula:
/// ```text
/// delay = min(base_delay * 2^(attempt-1), max_delay) + random_jitter(0..250ms)
/// ```
pub struct RetryAsk<T> {
    /// The underlying client to wrap.
    inner: T,
    /// Maximum number of retry attempts before giving up.
    max_retries: usize,
    /// Initial delay between retries (doubles with each attempt).
    base_delay: StdDuration,
    /// Maximum delay cap to prevent excessive waiting.
    max_delay: StdDuration,
}

impl<T> RetryAsk<T>
where
    T: AskAsync,
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

#[async_trait]
impl<T> AskAsync for RetryAsk<T>
where
    T: AskAsync,
{
    #[instrument(level = "info", skip_all)]
    async fn ask(&self, prompt: &str) -> Result<String, SummarizeError> {
        let total_t0 = Instant::now();
        let mut attempt = 0usize;

        loop {
            let attempt_t0 = Instant::now();
            match self.inner.ask(prompt).await {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    attempt += 1;
                    let attempt_dt = attempt_t0.elapsed();
                    let total_dt = total_t0.elapsed();

                    if attempt > self.max_retries || matches!(e, SummarizeError::Quota(_)) {
                        error!(
                            attempt,
                            max = self.max_retries,
                            elapsed_ms_attempt = attempt_dt.as_millis() as u64,
                            elapsed_ms_total = total_dt.as_millis() as u64,
                            error = %e,
                            "ask() giving up"
                        );
                        return Err(e);
                    }

                    // backoff calc
                    let shift = (attempt - 1).min(16) as u32;
                    let mut delay = self.base_delay.saturating_mul(1 << shift);
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
                        "ask() attempt failed; backing off"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: [Content<'a>; 1],
}

#[derive(Serialize)]
struct Content<'a> {
    parts: [Part<'a>; 1],
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

/// Gemini `generateContent` client.
pub struct GeminiClient {
    client: Client,
    api_key: String,
    model: String,
}

impl fmt::Debug for GeminiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeminiClient")
            .field("model", &self.model)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

impl GeminiClient {
    pub fn new(api_key: &str, model: &str, timeout: StdDuration) -> Result<Self, reqwest::Error> {
        Ok(GeminiClient {
            client: Client::builder().timeout(timeout).build()?,
            api_key: api_key.to_string(),
            model: model.to_string(),
        })
    }
}

#[async_trait]
impl AskAsync for GeminiClient {
    #[instrument(level = "info", skip_all, fields(model = %self.model))]
    async fn ask(&self, prompt: &str) -> Result<String, SummarizeError> {
        let t0 = Instant::now();
        let url = format!("{GEMINI_BASE}/{}:generateContent", self.model);
        let body = GenerateRequest {
            contents: [Content {
                parts: [Part { text: prompt }],
            }],
        };

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| SummarizeError::Transport(e.to_string()))?;

        let status = response.status();
        let raw = response
            .text()
            .await
            .map_err(|e| SummarizeError::Transport(e.to_string()))?;
        let dt = t0.elapsed();

        if status == StatusCode::TOO_MANY_REQUESTS {
            warn!(elapsed_ms = dt.as_millis() as u64, "Gemini quota exhausted");
            return Err(SummarizeError::Quota(truncate_for_log(&raw, 300)));
        }
        if !status.is_success() {
            warn!(elapsed_ms = dt.as_millis() as u64, %status, "Gemini call failed");
            return Err(SummarizeError::Api {
                status: status.as_u16(),
                body: truncate_for_log(&raw, 300),
            });
        }

        let text = parse_generate_response(&raw)?;
        info!(elapsed_ms = dt.as_millis() as u64, chars = text.chars().count(), "Gemini call succeeded");
        Ok(text)
    }
}

/// Concatenated text parts of the first candidate.
fn parse_generate_response(raw: &str) -> Result<String, SummarizeError> {
    let parsed: GenerateResponse = serde_json::from_str(raw)
        .map_err(|e| SummarizeError::Malformed(format!("{e}: {}", truncate_for_log(raw, 300))))?;
    let text: String = parsed
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();
    if text.trim().is_empty() {
        return Err(SummarizeError::Empty);
    }
    Ok(text)
}
