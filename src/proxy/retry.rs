//! Retry with exponential backoff

use std::collections::HashSet;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::error::{Error, ErrorKind, ProxyError};

/// Errors a [`RetryPolicy`] can reason about
pub trait RetryableError {
    fn kind(&self) -> ErrorKind;

    fn is_retryable(&self) -> bool;

    /// Server-provided minimum wait before the next attempt
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

impl RetryableError for ProxyError {
    fn kind(&self) -> ErrorKind {
        ProxyError::kind(self)
    }

    fn is_retryable(&self) -> bool {
        ProxyError::is_retryable(self)
    }

    fn retry_after(&self) -> Option<Duration> {
        ProxyError::retry_after(self)
    }
}

impl RetryableError for Error {
    fn kind(&self) -> ErrorKind {
        Error::kind(self)
    }

    fn is_retryable(&self) -> bool {
        Error::is_retryable(self)
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Error::Proxy(e) => e.retry_after(),
            _ => None,
        }
    }
}

/// Decides whether and when a failed operation runs again
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    initial_backoff: Duration,
    backoff_multiplier: f64,
    max_backoff: Duration,
    jitter: bool,
    retryable_kinds: Option<HashSet<ErrorKind>>,
}

impl RetryPolicy {
    /// Run once, never retry
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            initial_backoff: Duration::ZERO,
            backoff_multiplier: 1.0,
            max_backoff: Duration::ZERO,
            jitter: false,
            retryable_kinds: None,
        }
    }

    pub fn exponential_backoff(
        max_retries: u32,
        initial_backoff: Duration,
        backoff_multiplier: f64,
        max_backoff: Duration,
    ) -> Self {
        Self {
            max_retries,
            initial_backoff,
            backoff_multiplier,
            max_backoff,
            jitter: false,
            retryable_kinds: None,
        }
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Retry only these kinds instead of each error's own retryable flag
    pub fn with_retryable_kinds(mut self, kinds: impl IntoIterator<Item = ErrorKind>) -> Self {
        self.retryable_kinds = Some(kinds.into_iter().collect());
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Un-jittered delay before retry `attempt` (1-based):
    /// `min(initial * multiplier^(attempt - 1), max)`
    pub fn base_delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.initial_backoff.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let max = self.max_backoff.as_secs_f64();
        if secs.is_nan() || secs <= 0.0 {
            Duration::ZERO
        } else if secs >= max {
            self.max_backoff
        } else {
            Duration::from_secs_f64(secs)
        }
    }

    /// Delay before retry `attempt` (1-based), jittered when enabled
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if self.jitter {
            base.mul_f64(rand::thread_rng().gen_range(0.5..=1.5))
        } else {
            base
        }
    }

    /// Whether `error` permits retry number `attempt` (1-based)
    pub fn should_retry<E: RetryableError>(&self, error: &E, attempt: u32) -> bool {
        if attempt > self.max_retries {
            return false;
        }
        match &self.retryable_kinds {
            Some(kinds) => kinds.contains(&error.kind()),
            None => error.is_retryable(),
        }
    }

    /// Run `operation` until it succeeds or the policy gives up
    ///
    /// `operation` receives the zero-based attempt number. The last error is
    /// returned as-is once retries are exhausted or a non-retryable error
    /// occurs.
    pub async fn execute<T, E, F, Fut>(&self, mut operation: F) -> std::result::Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: RetryableError + Display,
    {
        let mut attempt = 0u32;
        loop {
            let error = match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            let next = attempt + 1;
            if !self.should_retry(&error, next) {
                if next > self.max_retries && self.max_retries > 0 {
                    warn!(attempts = next, error = %error, "retries exhausted");
                } else {
                    debug!(kind = %error.kind(), error = %error, "not retrying");
                }
                return Err(error);
            }

            let mut delay = self.delay_for_attempt(next);
            if let Some(retry_after) = error.retry_after() {
                delay = delay.max(retry_after.min(self.max_backoff));
            }
            debug!(
                attempt = next,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "retrying after failure"
            );
            tokio::time::sleep(delay).await;
            attempt = next;
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential_backoff(3, Duration::from_millis(500), 2.0, Duration::from_secs(5))
            .with_jitter(true)
    }
}
