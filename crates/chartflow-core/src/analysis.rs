//! Analysis stage
//!
//! Runs the vision analyzer for every non-empty artifact set under its own
//! [`ConcurrencyLimiter`], independent of the capture tier.

use crate::collaborators::VisionAnalyzer;
use crate::error::{AnalysisError, Retryable};
use crate::limiter::ConcurrencyLimiter;
use crate::observe::ObservabilitySink;
use crate::retry::{RetryExecutor, RetryPolicy};
use crate::types::{AnalysisOutcome, AnalysisResult, ArtifactSet, Phase};
use futures::future::join_all;
use indexmap::IndexMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Bounded, retrying vision analysis
pub struct AnalysisStage {
    analyzer: Arc<dyn VisionAnalyzer>,
    limiter: ConcurrencyLimiter,
    retry: RetryExecutor<AnalysisError>,
    sink: Arc<dyn ObservabilitySink>,
    cancel: CancellationToken,
}

impl AnalysisStage {
    /// Create new analysis stage
    #[must_use]
    pub fn new(
        analyzer: Arc<dyn VisionAnalyzer>,
        limiter: ConcurrencyLimiter,
        policy: RetryPolicy<AnalysisError>,
        sink: Arc<dyn ObservabilitySink>,
    ) -> Self {
        let cancel = CancellationToken::new();
        Self {
            analyzer,
            limiter,
            retry: RetryExecutor::new(policy, Phase::Analyze, Arc::clone(&sink))
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

    /// Analyze every non-empty artifact set, in map order
    ///
    /// Empty sets are skipped and produce no outcome.
    pub async fn analyze_all(&self, artifacts: &IndexMap<String, ArtifactSet>) -> Vec<AnalysisOutcome> {
        let eligible: Vec<(&String, &ArtifactSet)> =
            artifacts.iter().filter(|(_, set)| !set.is_empty()).collect();

        self.sink.info(
            Phase::Analyze,
            None,
            format!(
                "Analyzing {} ticker(s) (max_concurrent={})",
                eligible.len(),
                self.limiter.capacity()
            ),
        );

        let outcomes = join_all(
            eligible
                .iter()
                .map(|(symbol, set)| self.analyze_one(symbol.as_str(), set)),
        )
        .await;

        let succeeded = outcomes.iter().filter(|o| o.is_success()).count();
        self.sink.info(
            Phase::Analyze,
            None,
            format!("Analyzed {}/{} ticker(s)", succeeded, outcomes.len()),
        );
        outcomes
    }

    /// Analyze a single artifact set
    pub async fn analyze_one(&self, symbol: &str, artifacts: &ArtifactSet) -> AnalysisOutcome {
        if artifacts.is_empty() {
            return self.failed(
                symbol,
                AnalysisError::Artifact("no artifacts captured".to_string()),
            );
        }

        let permit = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                self.limiter.close();
                return self.failed(symbol, AnalysisError::Cancelled);
            }
            permit = self.limiter.acquire() => match permit {
                Ok(permit) => permit,
                Err(e) => return self.failed(symbol, e.into()),
            },
        };

        self.sink
            .info(Phase::Analyze, Some(symbol), format!("Analyzing charts for {symbol}"));
        let result = self
            .retry
            .run("analyze_charts", Some(symbol), |_| self.attempt(artifacts, symbol))
            .await;
        permit.release();

        match result {
            Ok(mut analysis) => {
                analysis.symbol = symbol.to_string();
                if analysis.is_degraded() {
                    self.sink.warn(
                        Phase::Analyze,
                        Some(symbol),
                        format!("No JSON object in analysis response for {symbol}, using fallback"),
                    );
                }
                self.sink.info(
                    Phase::Analyze,
                    Some(symbol),
                    format!(
                        "{}: {} (Confidence: {})",
                        symbol, analysis.recommendation.signal, analysis.recommendation.confidence
                    ),
                );
                AnalysisOutcome::Success(analysis)
            }
            Err(e) if e.is_retryable() && self.cancel.is_cancelled() => {
                self.failed(symbol, AnalysisError::Cancelled)
            }
            Err(e) => self.failed(symbol, e),
        }
    }

    async fn attempt(
        &self,
        artifacts: &ArtifactSet,
        symbol: &str,
    ) -> Result<AnalysisResult, AnalysisError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(AnalysisError::Cancelled),
            analysis = self.analyzer.analyze(artifacts, symbol) => analysis,
        }
    }

    fn failed(&self, symbol: &str, error: AnalysisError) -> AnalysisOutcome {
        self.sink.error(
            Phase::Analyze,
            Some(symbol),
            format!("Analysis failed for {symbol}: {error}"),
        );
        AnalysisOutcome::Failure {
            symbol: symbol.to_string(),
            error,
        }
    }
}
