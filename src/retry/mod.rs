//! Retry Logic and Error Handling
//!
//! Provides configurable retry strategies with fixed, linear, and
//! exponential backoff delays.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

/// Retry configuration.
///
/// `retries` is the number of *additional* attempts after the first one, so a
/// failing operation is invoked exactly `1 + retries` times.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryConfig {
    pub retries: u32,
    pub delay: RetryDelay,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retries: 3,
            delay: RetryDelay::Fixed(Duration::from_secs(1)),
        }
    }
}

impl RetryConfig {
    pub fn new(retries: u32, delay: Duration) -> Self {
        Self {
            retries,
            delay: RetryDelay::Fixed(delay),
        }
    }

    /// Disable retries entirely
    pub fn none() -> Self {
        Self {
            retries: 0,
            delay: RetryDelay::Fixed(Duration::ZERO),
        }
    }

    pub fn with_delay(mut self, delay: RetryDelay) -> Self {
        self.delay = delay;
        self
    }
}

/// Retry delay strategies
#[derive(Clone, Debug, PartialEq)]
pub enum RetryDelay {
    /// Fixed delay between retries
    Fixed(Duration),
    /// Linear increase: initial + (increment * attempt)
    Linear { initial: Duration, increment: Duration },
    /// Exponential backoff: initial * (multiplier ^ attempt)
    Exponential { initial: Duration, multiplier: f64, max: Duration },
}

impl RetryDelay {
    /// Delay before retry number `attempt` (zero-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self {
            RetryDelay::Fixed(duration) => *duration,
            RetryDelay::Linear { initial, increment } => *initial + (*increment * attempt),
            RetryDelay::Exponential { initial, multiplier, max } => {
                let delay = initial.as_millis() as f64 * multiplier.powi(attempt as i32);
                Duration::from_millis(delay.min(max.as_millis() as f64) as u64)
            }
        }
    }
}

/// Execute an operation, retrying on failure.
///
/// Retries are invisible to the caller: intermediate errors are discarded and
/// only the terminal outcome is returned.
pub async fn execute_with_retry<F, Fut, T>(
    mut operation: F,
    config: &RetryConfig,
) -> Result<T, QueryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, QueryError>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(error) => {
                if attempt >= config.retries {
                    return Err(error);
                }

                let delay = config.delay.delay_for(attempt);
                attempt += 1;
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Query error types with detailed context
#[derive(Clone, Debug, Error, PartialEq)]
pub enum QueryError {
    #[error("Network error: {message}")]
    Network { message: String },

    #[error("Request timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Serialization failed: {0}")]
    Serialization(String),

    #[error("Query is disabled and has no cached data")]
    Disabled,

    #[error("Custom error: {message}")]
    Custom { message: String },
}

impl QueryError {
    /// Create a network error with context
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network { message: message.into() }
    }

    /// Create an HTTP error
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self::Http { status, message: message.into() }
    }

    /// Create a timeout error
    pub fn timeout(timeout_ms: u64) -> Self {
        Self::Timeout { timeout_ms }
    }

    /// Create a custom error
    pub fn custom(message: impl Into<String>) -> Self {
        Self::Custom { message: message.into() }
    }
}
