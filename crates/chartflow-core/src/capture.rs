//! Capture stage
//!
//! Fans one capture job per ticker out under a shared
//! [`ConcurrencyLimiter`]. Each attempt opens its own isolated
//! [`ChartContext`] and closes it on every exit path. Failures never
//! propagate: every job yields exactly one [`CaptureOutcome`].

use crate::collaborators::{ChartContext, ChartSession};
use crate::error::{CaptureError, Retryable};
use crate::limiter::ConcurrencyLimiter;
use crate::observe::ObservabilitySink;
use crate::retry::{RetryExecutor, RetryPolicy};
use crate::types::{ArtifactSet, CaptureOutcome, ChartVariant, Phase, TickerJob};
use futures::future::join_all;
use indexmap::IndexMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Bounded, retrying capture of chart artifacts
pub struct CaptureStage {
    session: Arc<dyn ChartSession>,
    limiter: ConcurrencyLimiter,
    retry: RetryExecutor<CaptureError>,
    sink: Arc<dyn ObservabilitySink>,
    cancel: CancellationToken,
}

impl CaptureStage {
    /// Create new capture stage
    #[must_use]
    pub fn new(
        session: Arc<dyn ChartSession>,
        limiter: ConcurrencyLimiter,
        policy: RetryPolicy<CaptureError>,
        sink: Arc<dyn ObservabilitySink>,
    ) -> Self {
        let cancel = CancellationToken::new();
        Self {
            session,
            limiter,
            retry: RetryExecutor::new(policy, Phase::Capture, Arc::clone(&sink))
                .with_cancellation(cancel.clone()),
            sink,
            cancel,
        }
    }

    /// Stop admitting jobs and abort backoff once `token` is cancelled
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.retry = self.retry.with_cancellation(token.clone());
        self.cancel = token;
        self
    }

    /// Limiter bounding this stage
    #[inline]
    #[must_use]
    pub fn limiter(&self) -> &ConcurrencyLimiter {
        &self.limiter
    }

    /// Capture every job, keyed by symbol in input order
    ///
    /// Repeated symbols are captured once.
    pub async fn capture_all(&self, jobs: &[TickerJob]) -> IndexMap<String, CaptureOutcome> {
        let unique = TickerJob::dedupe(jobs.iter().cloned());
        if unique.len() < jobs.len() {
            self.sink.warn(
                Phase::Capture,
                None,
                format!("Ignoring {} duplicate ticker(s)", jobs.len() - unique.len()),
            );
        }

        self.sink.info(
            Phase::Capture,
            None,
            format!(
                "Capturing charts for {} ticker(s) (max_concurrent={})",
                unique.len(),
                self.limiter.capacity()
            ),
        );

        let outcomes = join_all(unique.iter().map(|job| self.capture_one(job))).await;
        let captured: IndexMap<String, CaptureOutcome> = unique
            .into_iter()
            .map(|job| job.symbol)
            .zip(outcomes)
            .collect();

        let succeeded = captured
            .values()
            .filter(|o| o.artifacts().is_some_and(|set| !set.is_empty()))
            .count();
        self.sink.info(
            Phase::Capture,
            None,
            format!("Captured charts for {}/{} ticker(s)", succeeded, captured.len()),
        );
        captured
    }

    /// Capture a single job
    pub async fn capture_one(&self, job: &TickerJob) -> CaptureOutcome {
        let symbol = job.symbol.as_str();

        let permit = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                self.limiter.close();
                return self.failed(symbol, CaptureError::Cancelled);
            }
            permit = self.limiter.acquire() => match permit {
                Ok(permit) => permit,
                Err(e) => return self.failed(symbol, e.into()),
            },
        };

        self.sink
            .info(Phase::Capture, Some(symbol), format!("Capturing charts for {job}"));
        let result = self
            .retry
            .run("capture_charts", Some(symbol), |_| self.attempt(symbol))
            .await;
        permit.release();

        match result {
            Ok(artifacts) => {
                if artifacts.is_empty() {
                    self.sink.warn(
                        Phase::Capture,
                        Some(symbol),
                        format!("No charts captured for {symbol}, skipping analysis"),
                    );
                } else if !artifacts.is_complete() {
                    let missing: Vec<&str> =
                        artifacts.missing().iter().map(ChartVariant::as_str).collect();
                    self.sink.warn(
                        Phase::Capture,
                        Some(symbol),
                        format!(
                            "Captured {}/{} charts for {symbol}, missing: {}",
                            artifacts.len(),
                            ChartVariant::ALL.len(),
                            missing.join(", ")
                        ),
                    );
                }
                CaptureOutcome::Success(artifacts)
            }
            Err(e) if e.is_retryable() && self.cancel.is_cancelled() => {
                self.failed(symbol, CaptureError::Cancelled)
            }
            Err(e) => self.failed(symbol, e),
        }
    }

    /// One attempt in a fresh context, closed whatever the result
    async fn attempt(&self, symbol: &str) -> Result<ArtifactSet, CaptureError> {
        let mut context: Box<dyn ChartContext> = self.session.open().await?;
        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(CaptureError::Cancelled),
            captured = context.capture(symbol) => captured,
        };
        context.close().await;
        result
    }

    fn failed(&self, symbol: &str, error: CaptureError) -> CaptureOutcome {
        self.sink.error(
            Phase::Capture,
            Some(symbol),
            format!("Failed to capture charts for {symbol}: {error}"),
        );
        CaptureOutcome::Failure {
            symbol: symbol.to_string(),
            error,
        }
    }
}
