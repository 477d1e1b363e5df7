//! Testing utilities for Chartflow workspace
//!
//! Scripted collaborators, fixtures, and counters for exercising pipeline
//! runs without a network.

#![allow(missing_docs)]

use async_trait::async_trait;
use chartflow_core::{
    AnalysisError, AnalysisResult, ArtifactSet, CaptureError, ChartContext, ChartSession,
    ChartVariant, Confidence, PersistError, Recommendation, ReportError, Reporter, ResultDocument,
    ResultStore, RsiReading, Signal, TickerJob, Trend, VisionAnalyzer, VolumeAssessment,
};
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub fn jobs(symbols: &[&str]) -> Vec<TickerJob> {
    symbols.iter().map(|s| TickerJob::from_symbol(s)).collect()
}

pub fn full_artifacts(symbol: &str) -> ArtifactSet {
    ChartVariant::ALL
        .into_iter()
        .map(|v| (v, PathBuf::from("/tmp/chartflow").join(v.file_name(symbol))))
        .collect()
}

pub fn sample_result(symbol: &str, signal: Signal) -> AnalysisResult {
    AnalysisResult {
        symbol: symbol.to_string(),
        analysis_date: "2024-05-01".to_string(),
        primary_trend: Trend::Bullish,
        secondary_trend: Trend::Neutral,
        patterns_identified: Vec::new(),
        support_levels: vec![100.0, 95.5],
        resistance_levels: vec![120.0],
        volume_assessment: VolumeAssessment::Confirming,
        rsi: RsiReading::default(),
        recommendation: Recommendation {
            signal,
            confidence: Confidence::Medium,
            reasoning: "scripted".to_string(),
        },
        key_observations: vec!["scripted observation".to_string()],
        summary: format!("{symbol} scripted summary"),
        raw_response: "{}".to_string(),
    }
}

/// Tracks how many holders are inside a section at once
#[derive(Debug, Default)]
pub struct Gauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl Gauge {
    pub fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    pub fn leave(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn current(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
struct SessionState {
    scripts: Mutex<HashMap<String, Vec<Result<ArtifactSet, CaptureError>>>>,
    attempts: Mutex<HashMap<String, usize>>,
    /// Symbols captured by each opened context, by open order
    contexts: Mutex<Vec<Vec<String>>>,
    open_contexts: Gauge,
    closed: AtomicUsize,
    delay: Mutex<Duration>,
}

/// Chart session replaying per-symbol scripts
///
/// Unscripted symbols, and scripted ones once their script runs out,
/// capture all four variants.
#[derive(Clone, Default)]
pub struct ScriptedSession {
    state: Arc<SessionState>,
}

impl ScriptedSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(self, symbol: &str, steps: Vec<Result<ArtifactSet, CaptureError>>) -> Self {
        self.state.scripts.lock().insert(symbol.to_string(), steps);
        self
    }

    /// Fail `times` consecutive attempts with a retryable session error
    pub fn failing(self, symbol: &str, times: usize) -> Self {
        let steps = (1..=times)
            .map(|n| Err(CaptureError::Session(format!("scripted failure {n}"))))
            .collect();
        self.script(symbol, steps)
    }

    /// Time each capture takes
    pub fn with_delay(self, delay: Duration) -> Self {
        *self.state.delay.lock() = delay;
        self
    }

    pub fn attempts(&self, symbol: &str) -> usize {
        self.state.attempts.lock().get(symbol).copied().unwrap_or(0)
    }

    pub fn opened(&self) -> usize {
        self.state.contexts.lock().len()
    }

    pub fn closed(&self) -> usize {
        self.state.closed.load(Ordering::SeqCst)
    }

    pub fn peak_open(&self) -> usize {
        self.state.open_contexts.peak()
    }

    /// Symbols each context captured, in open order
    pub fn context_log(&self) -> Vec<Vec<String>> {
        self.state.contexts.lock().clone()
    }

    fn next(&self, symbol: &str) -> Result<ArtifactSet, CaptureError> {
        *self.state.attempts.lock().entry(symbol.to_string()).or_default() += 1;
        match self.state.scripts.lock().get_mut(symbol) {
            Some(steps) if !steps.is_empty() => steps.remove(0),
            _ => Ok(full_artifacts(symbol)),
        }
    }
}

#[async_trait]
impl ChartSession for ScriptedSession {
    async fn open(&self) -> Result<Box<dyn ChartContext>, CaptureError> {
        let index = {
            let mut contexts = self.state.contexts.lock();
            contexts.push(Vec::new());
            contexts.len() - 1
        };
        self.state.open_contexts.enter();
        Ok(Box::new(ScriptedContext {
            session: self.clone(),
            index,
        }))
    }
}

struct ScriptedContext {
    session: ScriptedSession,
    index: usize,
}

#[async_trait]
impl ChartContext for ScriptedContext {
    async fn capture(&mut self, symbol: &str) -> Result<ArtifactSet, CaptureError> {
        self.session.state.contexts.lock()[self.index].push(symbol.to_string());
        let delay = *self.session.state.delay.lock();
        tokio::time::sleep(delay).await;
        self.session.next(symbol)
    }

    async fn close(self: Box<Self>) {
        self.session.state.open_contexts.leave();
        self.session.state.closed.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct AnalyzerState {
    scripts: Mutex<HashMap<String, Vec<Result<AnalysisResult, AnalysisError>>>>,
    calls: Mutex<Vec<(String, usize)>>,
    in_flight: Gauge,
    delay: Mutex<Duration>,
}

/// Vision analyzer replaying per-symbol scripts
///
/// Unscripted symbols get [`sample_result`] with a HOLD signal.
#[derive(Clone, Default)]
pub struct ScriptedAnalyzer {
    state: Arc<AnalyzerState>,
}

impl ScriptedAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(self, symbol: &str, steps: Vec<Result<AnalysisResult, AnalysisError>>) -> Self {
        self.state.scripts.lock().insert(symbol.to_string(), steps);
        self
    }

    pub fn with_delay(self, delay: Duration) -> Self {
        *self.state.delay.lock() = delay;
        self
    }

    /// `(symbol, artifact count)` for every call, in call order
    pub fn calls(&self) -> Vec<(String, usize)> {
        self.state.calls.lock().clone()
    }

    pub fn peak_in_flight(&self) -> usize {
        self.state.in_flight.peak()
    }
}

#[async_trait]
impl VisionAnalyzer for ScriptedAnalyzer {
    async fn analyze(&self, artifacts: &ArtifactSet, symbol: &str) -> Result<AnalysisResult, AnalysisError> {
        self.state.calls.lock().push((symbol.to_string(), artifacts.len()));
        self.state.in_flight.enter();
        let delay = *self.state.delay.lock();
        tokio::time::sleep(delay).await;
        self.state.in_flight.leave();

        match self.state.scripts.lock().get_mut(symbol) {
            Some(steps) if !steps.is_empty() => steps.remove(0),
            _ => Ok(sample_result(symbol, Signal::Hold)),
        }
    }
}

/// Reporter that records deliveries, optionally failing
#[derive(Clone, Default)]
pub struct RecordingReporter {
    deliveries: Arc<Mutex<Vec<Vec<String>>>>,
    failure: Arc<Mutex<Option<ReportError>>>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(error: ReportError) -> Self {
        let reporter = Self::default();
        *reporter.failure.lock() = Some(error);
        reporter
    }

    /// Symbols of every delivered report
    pub fn deliveries(&self) -> Vec<Vec<String>> {
        self.deliveries.lock().clone()
    }
}

#[async_trait]
impl Reporter for RecordingReporter {
    async fn deliver(
        &self,
        results: &[AnalysisResult],
        _artifacts: &IndexMap<String, ArtifactSet>,
    ) -> Result<(), ReportError> {
        if let Some(error) = self.failure.lock().clone() {
            return Err(error);
        }
        self.deliveries
            .lock()
            .push(results.iter().map(|r| r.symbol.clone()).collect());
        Ok(())
    }
}

/// Result store keeping documents in memory
#[derive(Clone, Default)]
pub struct MemoryStore {
    documents: Arc<Mutex<Vec<ResultDocument>>>,
    failure: Arc<Mutex<Option<PersistError>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(error: PersistError) -> Self {
        let store = Self::default();
        *store.failure.lock() = Some(error);
        store
    }

    pub fn documents(&self) -> Vec<ResultDocument> {
        self.documents.lock().clone()
    }
}

#[async_trait]
impl ResultStore for MemoryStore {
    async fn persist(&self, document: &ResultDocument) -> Result<PathBuf, PersistError> {
        if let Some(error) = self.failure.lock().clone() {
            return Err(error);
        }
        self.documents.lock().push(document.clone());
        Ok(PathBuf::from("memory://results.json"))
    }
}
