//! Connection retry with exponential backoff

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use super::error::{McpError, McpResult};

/// Backoff parameters for one server's connection attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Delay after the first failure
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Multiplier applied per failed attempt
    pub backoff_base: f64,
    /// Scale each delay by a random factor in `[0.5, 1.5]`
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_base: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no waiting
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    #[must_use]
    pub const fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    #[must_use]
    pub const fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    #[must_use]
    pub const fn with_backoff_base(mut self, base: f64) -> Self {
        self.backoff_base = base;
        self
    }

    #[must_use]
    pub const fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before the attempt following failed attempt `attempt` (0-based).
    ///
    /// `min(max_delay, initial_delay * base^attempt)`, then jittered.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let max = self.max_delay.as_secs_f64();
        let raw = self.initial_delay.as_secs_f64() * self.backoff_base.powi(exponent);
        let capped = if raw.is_finite() { raw.min(max) } else { max };

        let secs = if self.jitter {
            capped * rand::rng().random_range(0.5..=1.5)
        } else {
            capped
        };

        Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(self.max_delay)
    }
}

/// Run `attempt` until it succeeds or the policy is exhausted.
///
/// Errors that another attempt cannot fix are returned as-is. Exhaustion
/// yields [`McpError::Connection`] wrapping the last failure.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, server: &str, mut attempt: F) -> McpResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = McpResult<T>>,
{
    let max = policy.max_attempts.max(1);
    let mut index: u32 = 0;

    loop {
        let err = match attempt(index).await {
            Ok(value) => {
                if index > 0 {
                    tracing::info!(server = %server, attempt = index + 1, "connected after retry");
                }
                return Ok(value);
            }
            Err(e) => e,
        };

        if !err.is_retryable() {
            return Err(err);
        }

        if index + 1 >= max {
            tracing::error!(server = %server, attempts = max, error = %err, "giving up on server");
            return Err(McpError::Connection {
                server: server.to_string(),
                attempts: max,
                source: Box::new(err),
            });
        }

        let delay = policy.delay_for(index);
        tracing::warn!(
            server = %server,
            attempt = index + 1,
            max_attempts = max,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            error = %err,
            "connection attempt failed, retrying"
        );
        tokio::time::sleep(delay).await;

        index += 1;
    }
}
