//! Retry with exponential backoff
//!
//! [`RetryExecutor`] runs a fallible async operation up to
//! `max_attempts` times. Between attempts it waits
//! `initial_delay * multiplier^(attempt - 1)` and emits one warning per
//! retried failure. Errors the policy classifies as non-retryable, and the
//! error of the final attempt, are returned unchanged.

use crate::error::Retryable;
use crate::observe::ObservabilitySink;
use crate::types::Phase;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

type Classifier<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;

/// Backoff parameters plus the retryable-error classifier
pub struct RetryPolicy<E> {
    max_attempts: u32,
    initial_delay: Duration,
    backoff_multiplier: f64,
    max_delay: Option<Duration>,
    retryable: Classifier<E>,
}

impl<E> Clone for RetryPolicy<E> {
    fn clone(&self) -> Self {
        Self {
            max_attempts: self.max_attempts,
            initial_delay: self.initial_delay,
            backoff_multiplier: self.backoff_multiplier,
            max_delay: self.max_delay,
            retryable: Arc::clone(&self.retryable),
        }
    }
}

impl<E> fmt::Debug for RetryPolicy<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("initial_delay", &self.initial_delay)
            .field("backoff_multiplier", &self.backoff_multiplier)
            .field("max_delay", &self.max_delay)
            .finish_non_exhaustive()
    }
}

impl<E: Retryable + 'static> RetryPolicy<E> {
    /// Create new policy classifying errors by [`Retryable::is_retryable`]
    #[must_use]
    pub fn new(max_attempts: u32, initial_delay: Duration, backoff_multiplier: f64) -> Self {
        Self::with_classifier(max_attempts, initial_delay, backoff_multiplier, |e: &E| {
            e.is_retryable()
        })
    }
}

impl<E> RetryPolicy<E> {
    /// Create new policy with a custom classifier
    #[must_use]
    pub fn with_classifier(
        max_attempts: u32,
        initial_delay: Duration,
        backoff_multiplier: f64,
        retryable: impl Fn(&E) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay,
            backoff_multiplier: if backoff_multiplier.is_finite() {
                backoff_multiplier.max(1.0)
            } else {
                1.0
            },
            max_delay: None,
            retryable: Arc::new(retryable),
        }
    }

    /// Replace the classifier
    #[must_use]
    pub fn retry_if(mut self, retryable: impl Fn(&E) -> bool + Send + Sync + 'static) -> Self {
        self.retryable = Arc::new(retryable);
        self
    }

    /// Cap each backoff sleep; sleeps are uncapped unless set
    #[inline]
    #[must_use]
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }

    /// Attempts including the first
    #[inline]
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Whether `error` may succeed on another attempt
    #[inline]
    pub fn should_retry(&self, error: &E) -> bool {
        (self.retryable)(error)
    }

    /// Sleep after the failed `attempt` (1-based)
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let factor = self.backoff_multiplier.powi(exponent);
        let delay = Duration::try_from_secs_f64(self.initial_delay.as_secs_f64() * factor)
            .unwrap_or(Duration::MAX);
        match self.max_delay {
            Some(cap) => delay.min(cap),
            None => delay,
        }
    }

    /// Sum of every sleep taken when all attempts fail
    #[must_use]
    pub fn total_backoff(&self) -> Duration {
        (1..self.max_attempts)
            .map(|a| self.delay_for(a))
            .fold(Duration::ZERO, Duration::saturating_add)
    }
}

/// Runs operations under a [`RetryPolicy`]
pub struct RetryExecutor<E> {
    policy: RetryPolicy<E>,
    phase: Phase,
    sink: Arc<dyn ObservabilitySink>,
    cancel: CancellationToken,
}

impl<E> Clone for RetryExecutor<E> {
    fn clone(&self) -> Self {
        Self {
            policy: self.policy.clone(),
            phase: self.phase,
            sink: Arc::clone(&self.sink),
            cancel: self.cancel.clone(),
        }
    }
}

impl<E> RetryExecutor<E>
where
    E: fmt::Display,
{
    /// Create new executor reporting retries under `phase`
    #[must_use]
    pub fn new(policy: RetryPolicy<E>, phase: Phase, sink: Arc<dyn ObservabilitySink>) -> Self {
        Self {
            policy,
            phase,
            sink,
            cancel: CancellationToken::new(),
        }
    }

    /// Abort pending backoff sleeps when `token` is cancelled
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Policy in use
    #[inline]
    pub fn policy(&self) -> &RetryPolicy<E> {
        &self.policy
    }

    /// Run `op` until it succeeds, fails non-retryably, or attempts run out
    ///
    /// `op` receives the 1-based attempt number. A cancellation during a
    /// backoff sleep returns the last error immediately.
    ///
    /// # Errors
    /// The error of the last attempt made.
    pub async fn run<T, F, Fut>(&self, operation: &str, symbol: Option<&str>, mut op: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let max_attempts = self.policy.max_attempts;
        let mut attempt = 1;

        loop {
            let error = match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            if attempt >= max_attempts || !self.policy.should_retry(&error) {
                return Err(error);
            }

            let delay = self.policy.delay_for(attempt);
            self.sink.warn(
                self.phase,
                symbol,
                format!(
                    "Attempt {}/{} failed for {}: {}. Retrying in {:.1}s...",
                    attempt,
                    max_attempts,
                    operation,
                    error,
                    delay.as_secs_f64()
                ),
            );

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(error),
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }
}
