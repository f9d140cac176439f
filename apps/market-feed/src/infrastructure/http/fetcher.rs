//! Rate-Limited Fetcher
//!
//! Wraps one logical GET in up to `max_attempts` attempts. Throttling
//! (HTTP 429), request timeouts (408), server errors (5xx) and transport
//! failures are retried after `min(cap, base * 2^attempt)`; any other
//! status returns immediately. When attempts run out the last error is
//! returned inside [`FetchError::MaxRetriesExceeded`]. Callers treat that
//! as "no update this cycle".

use std::time::Duration;

use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;

use crate::application::ports::FetchError;
use crate::infrastructure::metrics;
use crate::infrastructure::stream::reconnect::backoff_delay;

/// Longest error body kept in [`FetchError::Status`].
const MAX_ERROR_BODY: usize = 256;

/// Retry tunables.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Per-request timeout.
    pub request_timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(900),
            max_delay: Duration::from_secs(12),
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// HTTP GET with retry and backoff.
#[derive(Debug, Clone)]
pub struct RateLimitedFetcher {
    client: Client,
    retry: RetryConfig,
}

impl RateLimitedFetcher {
    /// Create a fetcher with its own client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(retry: RetryConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(retry.request_timeout)
            .build()
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        Ok(Self { client, retry })
    }

    /// Retry configuration.
    #[must_use]
    pub const fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    /// GET `url` and decode the JSON body. `decorate` adds headers or
    /// query parameters to each attempt.
    ///
    /// # Errors
    ///
    /// Returns the non-retryable error, or the last error once attempts
    /// are exhausted.
    pub async fn get_json<T, F>(&self, url: &reqwest::Url, decorate: F) -> Result<T, FetchError>
    where
        T: DeserializeOwned,
        F: Fn(RequestBuilder) -> RequestBuilder,
    {
        let mut backoff = ExponentialBackoff::new(&self.retry);

        loop {
            let (error, retry_after) = match Self::attempt(decorate(self.client.get(url.clone()))).await {
                Ok(text) => {
                    return serde_json::from_str(&text).map_err(|e| FetchError::Decode(e.to_string()));
                }
                Err(Attempt::Fatal(error)) => return Err(error),
                Err(Attempt::Retryable { error, retry_after }) => (error, retry_after),
            };

            let Some(delay) = backoff.next_backoff(retry_after) else {
                metrics::record_fetch_failure();
                tracing::warn!(
                    url = %url.path(),
                    attempts = backoff.attempt,
                    error = %error,
                    "Fetch failed after all attempts"
                );
                return Err(FetchError::MaxRetriesExceeded {
                    attempts: backoff.attempt,
                    last: Box::new(error),
                });
            };

            metrics::record_fetch_retry(error.reason());
            tracing::debug!(
                url = %url.path(),
                attempt = backoff.attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %error,
                "Fetch failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn attempt(request: RequestBuilder) -> Result<String, Attempt> {
        let response = request.send().await.map_err(|e| Attempt::Retryable {
            error: FetchError::Transport(e.to_string()),
            retry_after: None,
        })?;

        let status = response.status();
        if status.is_success() {
            return response.text().await.map_err(|e| Attempt::Retryable {
                error: FetchError::Transport(e.to_string()),
                retry_after: None,
            });
        }

        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());

        let category = categorize_status(status);
        let error = if category == ErrorCategory::RateLimited {
            FetchError::RateLimited {
                retry_after_secs: retry_after,
            }
        } else {
            let mut body = response.text().await.unwrap_or_default();
            body.truncate(floor_char_boundary(&body, MAX_ERROR_BODY));
            FetchError::Status {
                status: status.as_u16(),
                body,
            }
        };

        if category == ErrorCategory::NonRetryable {
            return Err(Attempt::Fatal(error));
        }
        Err(Attempt::Retryable {
            error,
            retry_after: retry_after.map(Duration::from_secs),
        })
    }
}

/// Result of one failed attempt.
enum Attempt {
    Retryable {
        error: FetchError,
        retry_after: Option<Duration>,
    },
    Fatal(FetchError),
}

/// Error category for determining retry behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ErrorCategory {
    RateLimited,
    Retryable,
    NonRetryable,
}

/// Categorize HTTP status code for retry handling.
const fn categorize_status(status: StatusCode) -> ErrorCategory {
    match status.as_u16() {
        429 => ErrorCategory::RateLimited,
        408 | 500..=599 => ErrorCategory::Retryable,
        _ => ErrorCategory::NonRetryable,
    }
}

fn floor_char_boundary(s: &str, max: usize) -> usize {
    if s.len() <= max {
        return s.len();
    }
    (0..=max).rev().find(|i| s.is_char_boundary(*i)).unwrap_or(0)
}

/// Exponential backoff calculator.
struct ExponentialBackoff {
    attempt: u32,
    max_attempts: u32,
    base: Duration,
    cap: Duration,
}

impl ExponentialBackoff {
    const fn new(config: &RetryConfig) -> Self {
        Self {
            attempt: 0,
            max_attempts: config.max_attempts,
            base: config.base_delay,
            cap: config.max_delay,
        }
    }

    /// Delay before the next attempt, or `None` when attempts are spent.
    /// A server-provided `Retry-After` can lengthen the delay but never
    /// past the cap.
    fn next_backoff(&mut self, retry_after: Option<Duration>) -> Option<Duration> {
        let exponent = self.attempt;
        self.attempt += 1;
        if self.attempt >= self.max_attempts {
            return None;
        }

        let delay = backoff_delay(self.base, self.cap, exponent);
        Some(retry_after.map_or(delay, |hint| hint.max(delay).min(self.cap)))
    }
}
