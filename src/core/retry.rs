//! Retry logic with exponential backoff.
//!
//! Provides:
//! - A generic [`retry`] loop driven by a [`RetryConfig`] and the [`Retryable`] trait
//! - Provider hints (`retry_after`) that override the computed backoff
//! - [`send_with_retry`], the one HTTP call wrapper shared by every outward client

use reqwest::header::RETRY_AFTER;
use reqwest::{RequestBuilder, Response, StatusCode};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Retry-related errors.
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// All retries exhausted, or the error was not retryable
    #[error("Max retries ({max_retries}) exhausted")]
    MaxRetriesExhausted { max_retries: u32, last_error: E },
}

impl<E> RetryError<E> {
    /// The error returned by the final attempt.
    pub fn last_error(&self) -> &E {
        match self {
            RetryError::MaxRetriesExhausted { last_error, .. } => last_error,
        }
    }

    pub fn into_last_error(self) -> E {
        match self {
            RetryError::MaxRetriesExhausted { last_error, .. } => last_error,
        }
    }
}

/// Retry strategy configuration.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    pub max_retries: u32,
    /// Initial delay before first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays
    pub add_jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }
}

impl RetryConfig {
    /// Creates a new retry config with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum number of retries.
    #[must_use]
    pub fn max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }

    /// Disables jitter.
    #[must_use]
    pub fn no_jitter(mut self) -> Self {
        self.add_jitter = false;
        self
    }

    /// Calculates delay for a given attempt number.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_delay = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        let capped_delay = base_delay.min(self.max_delay.as_secs_f64());

        let final_delay = if self.add_jitter {
            // Add up to 25% jitter
            let jitter = rand::random::<f64>() * 0.25 * capped_delay;
            capped_delay + jitter
        } else {
            capped_delay
        };

        Duration::from_secs_f64(final_delay)
    }
}

/// Predefined retry configs for different scenarios.
impl RetryConfig {
    /// One retry after a fixed backoff. Used for per-recipient sends.
    pub fn single(backoff: Duration) -> Self {
        Self {
            max_retries: 1,
            initial_delay: backoff,
            max_delay: backoff.max(Duration::from_secs(60)),
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Config for quick retries (e.g., progress writes to a local store).
    pub fn quick() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// Config for network calls (more retries, longer delays).
    pub fn network() -> Self {
        Self {
            max_retries: 4,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }
}

/// Result of a retry attempt.
#[derive(Debug)]
pub struct RetryResult<T, E> {
    /// The final result (success or last error)
    pub result: Result<T, RetryError<E>>,
    /// Number of attempts made
    pub attempts: u32,
    /// Total time spent retrying
    pub total_duration: Duration,
}

impl<T, E> RetryResult<T, E> {
    /// Returns true if the operation succeeded.
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }

    /// Returns true if all retries were exhausted.
    pub fn is_exhausted(&self) -> bool {
        matches!(self.result, Err(RetryError::MaxRetriesExhausted { .. }))
    }
}

/// Determines if an error is retryable.
pub trait Retryable {
    /// Returns true if the error should be retried.
    fn is_retryable(&self) -> bool;

    /// Returns an optional hint for retry delay (e.g., from rate limit headers).
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

impl Retryable for reqwest::Error {
    fn is_retryable(&self) -> bool {
        self.is_timeout() || self.is_connect() || self.is_request()
    }
}

/// Executes an async operation with retry logic.
///
/// # Arguments
/// * `config` - Retry configuration
/// * `operation` - The async operation to execute
///
/// # Returns
/// A `RetryResult` containing either the successful result or the last error.
pub async fn retry<F, Fut, T, E>(config: &RetryConfig, mut operation: F) -> RetryResult<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + std::fmt::Debug,
{
    let start = std::time::Instant::now();
    let mut attempts = 0;

    loop {
        attempts += 1;

        match operation().await {
            Ok(value) => {
                return RetryResult {
                    result: Ok(value),
                    attempts,
                    total_duration: start.elapsed(),
                };
            }
            Err(e) if attempts <= config.max_retries && e.is_retryable() => {
                // Calculate delay (respect retry_after hint if provided)
                let delay = e
                    .retry_after()
                    .unwrap_or_else(|| config.delay_for_attempt(attempts - 1));

                log::warn!(
                    "Attempt {}/{} failed (retrying in {:?}): {:?}",
                    attempts,
                    config.max_retries + 1,
                    delay,
                    e
                );

                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                return RetryResult {
                    result: Err(RetryError::MaxRetriesExhausted {
                        max_retries: config.max_retries,
                        last_error: e,
                    }),
                    attempts,
                    total_duration: start.elapsed(),
                };
            }
        }
    }
}

/// Which HTTP responses are worth another attempt, and how many attempts to make.
#[derive(Debug, Clone)]
pub struct HttpRetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Status codes that are retried; everything else non-2xx fails at once
    pub retryable_statuses: Vec<StatusCode>,
    /// Backoff between attempts when the server sends no `Retry-After`
    pub backoff: RetryConfig,
}

impl Default for HttpRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retryable_statuses: vec![
                StatusCode::REQUEST_TIMEOUT,
                StatusCode::TOO_MANY_REQUESTS,
                StatusCode::INTERNAL_SERVER_ERROR,
                StatusCode::BAD_GATEWAY,
                StatusCode::SERVICE_UNAVAILABLE,
                StatusCode::GATEWAY_TIMEOUT,
            ],
            backoff: RetryConfig::network(),
        }
    }
}

impl HttpRetryPolicy {
    #[must_use]
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    #[must_use]
    pub fn retryable_statuses(mut self, statuses: Vec<StatusCode>) -> Self {
        self.retryable_statuses = statuses;
        self
    }

    #[must_use]
    pub fn backoff(mut self, backoff: RetryConfig) -> Self {
        self.backoff = backoff;
        self
    }

    fn retry_config(&self) -> RetryConfig {
        self.backoff.clone().max_retries(self.max_attempts.saturating_sub(1))
    }
}

/// Failure of one HTTP attempt.
#[derive(Debug, Error)]
pub enum HttpCallError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected status {status}")]
    Status {
        status: StatusCode,
        retryable: bool,
        retry_after: Option<Duration>,
    },
}

impl Retryable for HttpCallError {
    fn is_retryable(&self) -> bool {
        match self {
            HttpCallError::Transport(e) => e.is_retryable(),
            HttpCallError::Status { retryable, .. } => *retryable,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            HttpCallError::Status { retry_after, .. } => *retry_after,
            HttpCallError::Transport(_) => None,
        }
    }
}

/// Parses a `Retry-After` header given in seconds.
fn retry_after_header(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Sends an HTTP request, retrying per `policy`.
///
/// `make_request` is called once per attempt because a `RequestBuilder`
/// is consumed by `send`.
pub async fn send_with_retry<F>(policy: &HttpRetryPolicy, mut make_request: F) -> RetryResult<Response, HttpCallError>
where
    F: FnMut() -> RequestBuilder,
{
    let config = policy.retry_config();
    retry(&config, || {
        let request = make_request();
        async move {
            let response = match request.send().await {
                Ok(response) => response,
                Err(e) => return Err(HttpCallError::Transport(e)),
            };
            let status = response.status();
            if status.is_success() {
                return Ok(response);
            }
            Err(HttpCallError::Status {
                status,
                retryable: policy.retryable_statuses.contains(&status),
                retry_after: retry_after_header(&response),
            })
        }
    })
    .await
}
