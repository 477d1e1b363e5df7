//! Pipeline run orchestration
//!
//! Sequences the four phases of a run:
//! 1. Capture: one bounded, retrying job per ticker
//! 2. Analyze: every non-empty artifact set, under a separate bound
//! 3. Report: hand successes to the reporter (failure recorded, not fatal)
//! 4. Persist: write the result document (failure recorded, not fatal)
//!
//! Only configuration problems stop a run; everything else ends up in the
//! error list of the returned [`PipelineRunResult`].

use crate::analysis::AnalysisStage;
use crate::capture::CaptureStage;
use crate::collaborators::{ChartSession, Reporter, ResultStore, VisionAnalyzer};
use crate::config::PipelineConfig;
use crate::error::{ConfigError, JobError, PipelineError};
use crate::limiter::{ConcurrencyLimiter, LimiterStats};
use crate::observe::{ObservabilitySink, TracingSink};
use crate::types::{
    AnalysisOutcome, AnalysisResult, ArtifactSet, CaptureOutcome, Phase, PipelineRunResult,
    TickerJob,
};
use chrono::Utc;
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Subject recorded for report-phase failures
pub const REPORT_SUBJECT: &str = "report";

/// Subject recorded for persist-phase failures
pub const PERSIST_SUBJECT: &str = "persist";

/// Per-run switches, usually from the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    /// Capture only: skip analysis, report and persistence
    pub dry_run: bool,
    /// Deliver a report when there are results
    pub send_report: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            send_report: true,
        }
    }
}

/// Builder for [`PipelineRun`]
pub struct PipelineRunBuilder {
    config: PipelineConfig,
    session: Arc<dyn ChartSession>,
    analyzer: Option<Arc<dyn VisionAnalyzer>>,
    reporter: Option<Arc<dyn Reporter>>,
    store: Option<Arc<dyn ResultStore>>,
    sink: Arc<dyn ObservabilitySink>,
    cancel: CancellationToken,
    options: RunOptions,
}

impl PipelineRunBuilder {
    /// Vision analyzer; required unless dry-running
    #[must_use]
    pub fn analyzer(mut self, analyzer: Arc<dyn VisionAnalyzer>) -> Self {
        self.analyzer = Some(analyzer);
        self
    }

    /// Report delivery; without one the report phase is skipped
    #[must_use]
    pub fn reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Result storage; without one the persist phase is skipped
    #[must_use]
    pub fn store(mut self, store: Arc<dyn ResultStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Event destination (defaults to [`TracingSink`])
    #[must_use]
    pub fn sink(mut self, sink: Arc<dyn ObservabilitySink>) -> Self {
        self.sink = sink;
        self
    }

    /// Token that interrupts the run
    #[must_use]
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Run switches
    #[must_use]
    pub fn options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    /// Validate configuration and assemble the run
    ///
    /// # Errors
    /// - `ConfigError::Invalid` for a bad setting, or a missing analyzer outside dry-run
    pub fn build(self) -> Result<PipelineRun, PipelineError> {
        self.config.validate()?;

        let analysis = match (self.analyzer, self.options.dry_run) {
            (Some(analyzer), false) => Some(
                AnalysisStage::new(
                    analyzer,
                    ConcurrencyLimiter::new(self.config.analysis.max_concurrent),
                    self.config.analysis.retry.policy(),
                    Arc::clone(&self.sink),
                )
                .with_cancellation(self.cancel.clone()),
            ),
            (None, false) => {
                return Err(ConfigError::invalid(
                    "analyzer",
                    "a vision analyzer is required unless dry-running",
                )
                .into())
            }
            (_, true) => None,
        };

        let capture = CaptureStage::new(
            self.session,
            ConcurrencyLimiter::new(self.config.capture.max_concurrent),
            self.config.capture.retry.policy(),
            Arc::clone(&self.sink),
        )
        .with_cancellation(self.cancel.clone());

        Ok(PipelineRun {
            capture,
            analysis,
            reporter: self.reporter,
            store: self.store,
            sink: self.sink,
            cancel: self.cancel,
            options: self.options,
            phase: Mutex::new(Phase::Pending),
        })
    }
}

/// One configured pipeline run
pub struct PipelineRun {
    capture: CaptureStage,
    analysis: Option<AnalysisStage>,
    reporter: Option<Arc<dyn Reporter>>,
    store: Option<Arc<dyn ResultStore>>,
    sink: Arc<dyn ObservabilitySink>,
    cancel: CancellationToken,
    options: RunOptions,
    phase: Mutex<Phase>,
}

impl PipelineRun {
    /// Start building a run
    #[must_use]
    pub fn builder(config: PipelineConfig, session: Arc<dyn ChartSession>) -> PipelineRunBuilder {
        PipelineRunBuilder {
            config,
            session,
            analyzer: None,
            reporter: None,
            store: None,
            sink: Arc::new(TracingSink),
            cancel: CancellationToken::new(),
            options: RunOptions::default(),
        }
    }

    /// Current phase
    #[must_use]
    pub fn phase(&self) -> Phase {
        *self.phase.lock()
    }

    /// Capture-tier limiter statistics
    #[must_use]
    pub fn capture_stats(&self) -> LimiterStats {
        self.capture.limiter().stats()
    }

    /// Analysis-tier limiter statistics, absent when dry-running
    #[must_use]
    pub fn analysis_stats(&self) -> Option<LimiterStats> {
        self.analysis.as_ref().map(|stage| stage.limiter().stats())
    }

    /// Whether the run was interrupted
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn enter(&self, phase: Phase) {
        *self.phase.lock() = phase;
    }

    /// Execute every phase for `jobs`
    ///
    /// # Errors
    /// - `ConfigError::NoTickers` if `jobs` is empty
    pub async fn execute(&self, jobs: &[TickerJob]) -> Result<PipelineRunResult, PipelineError> {
        if jobs.is_empty() {
            return Err(ConfigError::NoTickers.into());
        }
        let run_at = Utc::now();
        let mut errors: Vec<(String, JobError)> = Vec::new();

        self.enter(Phase::Capture);
        let mut artifacts: IndexMap<String, ArtifactSet> = IndexMap::new();
        for (symbol, outcome) in self.capture.capture_all(jobs).await {
            match outcome {
                CaptureOutcome::Success(set) => {
                    artifacts.insert(symbol, set);
                }
                CaptureOutcome::Failure { error, .. } => {
                    artifacts.insert(symbol.clone(), ArtifactSet::new());
                    errors.push((symbol, error.into()));
                }
            }
        }

        let mut results: Vec<AnalysisResult> = Vec::new();
        match &self.analysis {
            _ if self.options.dry_run => {
                self.sink
                    .info(Phase::Analyze, None, "Dry run: skipping analysis".to_string());
            }
            _ if self.cancel.is_cancelled() => {
                self.sink
                    .warn(Phase::Analyze, None, "Interrupted: skipping analysis".to_string());
            }
            Some(stage) => {
                self.enter(Phase::Analyze);
                for outcome in stage.analyze_all(&artifacts).await {
                    match outcome {
                        AnalysisOutcome::Success(result) => results.push(result),
                        AnalysisOutcome::Failure { symbol, error } => {
                            errors.push((symbol, error.into()));
                        }
                    }
                }
            }
            None => {}
        }

        self.report(&results, &artifacts, &mut errors).await;

        let result = PipelineRunResult::new(run_at, results, artifacts, errors);
        let result = self.persist(result).await;

        self.enter(Phase::Complete);
        self.sink.info(
            Phase::Complete,
            None,
            format!(
                "Completed: {} analyzed, {} errors",
                result.results().len(),
                result.errors().len()
            ),
        );
        for (subject, error) in result.errors() {
            self.sink
                .warn(Phase::Complete, Some(subject), format!("{subject}: {error}"));
        }
        Ok(result)
    }

    async fn report(
        &self,
        results: &[AnalysisResult],
        artifacts: &IndexMap<String, ArtifactSet>,
        errors: &mut Vec<(String, JobError)>,
    ) {
        let Some(reporter) = &self.reporter else {
            return;
        };
        if !self.options.send_report || self.options.dry_run || self.cancel.is_cancelled() {
            return;
        }
        if results.is_empty() {
            self.sink
                .info(Phase::Report, None, "No results, skipping report".to_string());
            return;
        }

        self.enter(Phase::Report);
        match reporter.deliver(results, artifacts).await {
            Ok(()) => self.sink.info(
                Phase::Report,
                None,
                format!("Report delivered for {} ticker(s)", results.len()),
            ),
            Err(e) => {
                self.sink
                    .error(Phase::Report, None, format!("Failed to deliver report: {e}"));
                errors.push((REPORT_SUBJECT.to_string(), e.into()));
            }
        }
    }

    async fn persist(&self, result: PipelineRunResult) -> PipelineRunResult {
        let Some(store) = &self.store else {
            return result;
        };
        if self.options.dry_run || self.cancel.is_cancelled() {
            return result;
        }

        self.enter(Phase::Persist);
        match store.persist(&result.document()).await {
            Ok(path) => {
                self.sink.info(
                    Phase::Persist,
                    None,
                    format!("Results written to {}", path.display()),
                );
                result
            }
            Err(e) => {
                self.sink
                    .error(Phase::Persist, None, format!("Failed to persist results: {e}"));
                let (run_at, results, artifacts, mut errors) = result.into_parts();
                errors.push((PERSIST_SUBJECT.to_string(), e.into()));
                PipelineRunResult::new(run_at, results, artifacts, errors)
            }
        }
    }
}
