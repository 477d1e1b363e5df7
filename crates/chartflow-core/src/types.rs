//! Core types for Chartflow
//!
//! Defines the data model of a pipeline run:
//! - Ticker jobs and the per-symbol artifact sets they produce
//! - Capture and analysis outcomes (tagged success-or-failure values)
//! - The structured analysis result and its classification enums
//! - The immutable run result and its persisted document form

use crate::error::{AnalysisError, CaptureError, JobError};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};

/// One unit of work: a symbol to capture and analyze
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TickerJob {
    /// Ticker symbol, upper case
    pub symbol: String,
    /// Human-readable name
    #[serde(rename = "name", default)]
    pub display_name: String,
}

impl TickerJob {
    /// Create new ticker job
    #[inline]
    #[must_use]
    pub fn new(symbol: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            display_name: display_name.into(),
        }
    }

    /// Job for a bare symbol, display name = symbol
    #[must_use]
    pub fn from_symbol(symbol: &str) -> Self {
        let symbol = symbol.trim().to_uppercase();
        Self::new(symbol.clone(), symbol)
    }

    /// Normalise symbol casing and fill an empty display name
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.symbol = self.symbol.trim().to_uppercase();
        if self.display_name.trim().is_empty() {
            self.display_name = self.symbol.clone();
        }
        self
    }

    /// Drop repeated symbols, keeping the first occurrence
    #[must_use]
    pub fn dedupe(jobs: impl IntoIterator<Item = TickerJob>) -> Vec<TickerJob> {
        let mut seen = HashSet::new();
        jobs.into_iter()
            .filter(|job| seen.insert(job.symbol.clone()))
            .collect()
    }
}

impl fmt::Display for TickerJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.display_name.is_empty() || self.display_name == self.symbol {
            write!(f, "{}", self.symbol)
        } else {
            write!(f, "{} ({})", self.symbol, self.display_name)
        }
    }
}

/// Chart artifact kinds captured per symbol
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartVariant {
    /// Daily candlestick chart
    Daily,
    /// Weekly candlestick chart
    Weekly,
    /// Daily point & figure chart
    PnfDaily,
    /// Weekly point & figure chart
    PnfWeekly,
}

impl ChartVariant {
    /// Every variant, in capture and presentation order
    pub const ALL: [ChartVariant; 4] = [
        ChartVariant::Daily,
        ChartVariant::Weekly,
        ChartVariant::PnfDaily,
        ChartVariant::PnfWeekly,
    ];

    /// Stable key, also used in file names
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ChartVariant::Daily => "daily",
            ChartVariant::Weekly => "weekly",
            ChartVariant::PnfDaily => "pnf_daily",
            ChartVariant::PnfWeekly => "pnf_weekly",
        }
    }

    /// Caption used when presenting the chart
    #[inline]
    #[must_use]
    pub fn caption(&self) -> &'static str {
        match self {
            ChartVariant::Daily => "DAILY CHART",
            ChartVariant::Weekly => "WEEKLY CHART",
            ChartVariant::PnfDaily => "POINT & FIGURE DAILY CHART",
            ChartVariant::PnfWeekly => "POINT & FIGURE WEEKLY CHART",
        }
    }

    /// `{symbol}_{variant}.png`
    ///
    /// Characters other than ASCII alphanumerics, `-` and `_` become `_`, so
    /// the name never leaves the directory it is joined to.
    #[must_use]
    pub fn file_name(&self, symbol: &str) -> String {
        let stem: String = symbol
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        format!("{}_{}.png", stem, self.as_str())
    }

    /// Artifact location under `dir`
    #[must_use]
    pub fn artifact_path(&self, dir: &Path, symbol: &str) -> PathBuf {
        dir.join(self.file_name(symbol))
    }
}

impl fmt::Display for ChartVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Possibly partial set of captured artifacts for one symbol
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactSet(BTreeMap<ChartVariant, PathBuf>);

impl ArtifactSet {
    /// Create empty set
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an artifact, replacing any previous one of the same kind
    pub fn insert(&mut self, variant: ChartVariant, path: impl Into<PathBuf>) {
        self.0.insert(variant, path.into());
    }

    /// Builder-style insert
    #[must_use]
    pub fn with(mut self, variant: ChartVariant, path: impl Into<PathBuf>) -> Self {
        self.insert(variant, path);
        self
    }

    /// Location of one artifact
    #[inline]
    #[must_use]
    pub fn get(&self, variant: ChartVariant) -> Option<&Path> {
        self.0.get(&variant).map(PathBuf::as_path)
    }

    /// Whether the variant was captured
    #[inline]
    #[must_use]
    pub fn contains(&self, variant: ChartVariant) -> bool {
        self.0.contains_key(&variant)
    }

    /// Number of captured artifacts
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// No artifact captured
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// All four variants present
    #[inline]
    #[must_use]
    pub fn is_complete(&self) -> bool {
        ChartVariant::ALL.iter().all(|v| self.contains(*v))
    }

    /// Variants not captured
    #[must_use]
    pub fn missing(&self) -> Vec<ChartVariant> {
        ChartVariant::ALL
            .into_iter()
            .filter(|v| !self.contains(*v))
            .collect()
    }

    /// Iterate artifacts in variant order
    pub fn iter(&self) -> impl Iterator<Item = (ChartVariant, &Path)> {
        self.0.iter().map(|(v, p)| (*v, p.as_path()))
    }

    /// Merge another set into this one
    pub fn extend(&mut self, other: ArtifactSet) {
        self.0.extend(other.0);
    }
}

impl FromIterator<(ChartVariant, PathBuf)> for ArtifactSet {
    fn from_iter<I: IntoIterator<Item = (ChartVariant, PathBuf)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Result of capturing one ticker; exactly one per job per run
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureOutcome {
    /// Artifacts captured (possibly partial)
    Success(ArtifactSet),
    /// Capture failed after retries
    Failure { symbol: String, error: CaptureError },
}

impl CaptureOutcome {
    /// Whether capture succeeded
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Captured artifacts, if any
    #[inline]
    #[must_use]
    pub fn artifacts(&self) -> Option<&ArtifactSet> {
        match self {
            Self::Success(set) => Some(set),
            Self::Failure { .. } => None,
        }
    }

    /// Failure cause, if any
    #[inline]
    #[must_use]
    pub fn error(&self) -> Option<&CaptureError> {
        match self {
            Self::Success(_) => None,
            Self::Failure { error, .. } => Some(error),
        }
    }
}

/// Result of analyzing one ticker
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisOutcome {
    /// Analysis produced (possibly degraded)
    Success(AnalysisResult),
    /// Analysis failed after retries
    Failure { symbol: String, error: AnalysisError },
}

impl AnalysisOutcome {
    /// Symbol the outcome belongs to
    #[must_use]
    pub fn symbol(&self) -> &str {
        match self {
            Self::Success(result) => &result.symbol,
            Self::Failure { symbol, .. } => symbol,
        }
    }

    /// Whether analysis succeeded
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

/// Defines a closed classification enum with its wire label
macro_rules! labelled_enum {
    (
        $(#[$meta:meta])*
        $name:ident { $( $(#[$vmeta:meta])* $variant:ident => $label:tt ),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $( $(#[$vmeta])* #[serde(rename = $label)] $variant, )+
        }

        impl $name {
            /// Wire label
            #[inline]
            #[must_use]
            pub fn as_str(&self) -> &'static str {
                match self {
                    $( Self::$variant => $label, )+
                }
            }

            /// Case-insensitive label lookup
            #[must_use]
            pub fn from_label(label: &str) -> Option<Self> {
                let label = label.trim();
                $(
                    if label.eq_ignore_ascii_case($label) {
                        return Some(Self::$variant);
                    }
                )+
                None
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

labelled_enum! {
    /// Dow-theory trend classification
    Trend {
        /// Rising
        Bullish => "BULLISH",
        /// Falling
        Bearish => "BEARISH",
        /// Sideways
        Neutral => "NEUTRAL",
        /// Could not be determined
        Unknown => "UNKNOWN",
    }
}

labelled_enum! {
    /// Trading signal
    Signal {
        /// Buy
        Buy => "BUY",
        /// Sell
        Sell => "SELL",
        /// Hold
        Hold => "HOLD",
    }
}

labelled_enum! {
    /// Confidence attached to a signal
    Confidence {
        /// High
        High => "HIGH",
        /// Medium
        Medium => "MEDIUM",
        /// Low
        Low => "LOW",
    }
}

labelled_enum! {
    /// Whether volume confirms price action
    VolumeAssessment {
        /// Volume confirms the move
        Confirming => "CONFIRMING",
        /// Volume diverges from the move
        Diverging => "DIVERGING",
        /// No signal from volume
        Neutral => "NEUTRAL",
        /// Could not be determined
        Unknown => "UNKNOWN",
    }
}

labelled_enum! {
    /// RSI zone
    RsiZone {
        /// Above 70
        Overbought => "OVERBOUGHT",
        /// Below 30
        Oversold => "OVERSOLD",
        /// Between 30 and 70
        Neutral => "NEUTRAL",
    }
}

labelled_enum! {
    /// RSI divergence with price
    Divergence {
        /// No divergence
        Absent => "NONE",
        /// Bullish divergence
        Bullish => "BULLISH",
        /// Bearish divergence
        Bearish => "BEARISH",
    }
}

/// A classical chart pattern spotted by the analysis
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChartPattern {
    /// Pattern name, e.g. "Ascending Triangle"
    pub pattern: String,
    /// REVERSAL or CONTINUATION
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// BULLISH or BEARISH
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub implication: Option<String>,
    /// FORMING, COMPLETE or BROKEN
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion: Option<String>,
}

/// RSI reading; every field may be absent
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RsiReading {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone: Option<RsiZone>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub divergence: Option<Divergence>,
}

impl RsiReading {
    /// Nothing known about RSI
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.value.is_none() && self.zone.is_none() && self.divergence.is_none()
    }
}

/// Signal, confidence and reasoning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recommendation {
    pub signal: Signal,
    pub confidence: Confidence,
    #[serde(default)]
    pub reasoning: String,
}

impl Default for Recommendation {
    fn default() -> Self {
        Self {
            signal: Signal::Hold,
            confidence: Confidence::Low,
            reasoning: String::new(),
        }
    }
}

/// Structured outcome of a vision analysis
///
/// Always has a uniform shape; unparseable responses become a degraded
/// result (see [`crate::parse::degraded_result`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub symbol: String,
    pub analysis_date: String,
    pub primary_trend: Trend,
    pub secondary_trend: Trend,
    pub patterns_identified: Vec<ChartPattern>,
    pub support_levels: Vec<f64>,
    pub resistance_levels: Vec<f64>,
    pub volume_assessment: VolumeAssessment,
    pub rsi: RsiReading,
    pub recommendation: Recommendation,
    pub key_observations: Vec<String>,
    pub summary: String,
    /// Unparsed response text, kept for audit
    #[serde(default)]
    pub raw_response: String,
}

/// Phase of a pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Not started
    Pending,
    /// Capturing artifacts
    Capture,
    /// Running vision analysis
    Analyze,
    /// Delivering the report
    Report,
    /// Writing results to disk
    Persist,
    /// Run finished
    Complete,
}

impl Phase {
    /// Lower-case name
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Pending => "pending",
            Phase::Capture => "capture",
            Phase::Analyze => "analyze",
            Phase::Report => "report",
            Phase::Persist => "persist",
            Phase::Complete => "complete",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted form of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultDocument {
    pub run_at: DateTime<Utc>,
    pub results: Vec<AnalysisResult>,
}

/// Immutable summary of one pipeline run
///
/// Holds every success plus the accumulated `(subject, error)` list. The
/// subject is a symbol for per-ticker failures, or `report` / `persist`.
#[derive(Debug, Clone)]
pub struct PipelineRunResult {
    run_at: DateTime<Utc>,
    results: Vec<AnalysisResult>,
    artifacts: IndexMap<String, ArtifactSet>,
    errors: Vec<(String, JobError)>,
}

impl PipelineRunResult {
    pub(crate) fn new(
        run_at: DateTime<Utc>,
        results: Vec<AnalysisResult>,
        artifacts: IndexMap<String, ArtifactSet>,
        errors: Vec<(String, JobError)>,
    ) -> Self {
        Self {
            run_at,
            results,
            artifacts,
            errors,
        }
    }

    /// When the run started
    #[inline]
    #[must_use]
    pub fn run_at(&self) -> DateTime<Utc> {
        self.run_at
    }

    /// Analysis results in input order
    #[inline]
    #[must_use]
    pub fn results(&self) -> &[AnalysisResult] {
        &self.results
    }

    /// Artifact set per symbol, empty for capture failures
    #[inline]
    #[must_use]
    pub fn artifacts(&self) -> &IndexMap<String, ArtifactSet> {
        &self.artifacts
    }

    /// Recorded failures in the order they occurred per phase
    #[inline]
    #[must_use]
    pub fn errors(&self) -> &[(String, JobError)] {
        &self.errors
    }

    /// Result for one symbol
    #[must_use]
    pub fn result_for(&self, symbol: &str) -> Option<&AnalysisResult> {
        self.results.iter().find(|r| r.symbol == symbol)
    }

    /// Subjects with at least one recorded failure
    #[must_use]
    pub fn failed_subjects(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.errors
            .iter()
            .map(|(subject, _)| subject.as_str())
            .filter(|s| seen.insert(*s))
            .collect()
    }

    /// Split into owned parts
    #[allow(clippy::type_complexity)]
    #[must_use]
    pub fn into_parts(
        self,
    ) -> (
        DateTime<Utc>,
        Vec<AnalysisResult>,
        IndexMap<String, ArtifactSet>,
        Vec<(String, JobError)>,
    ) {
        (self.run_at, self.results, self.artifacts, self.errors)
    }

    /// Persisted form of this run
    #[must_use]
    pub fn document(&self) -> ResultDocument {
        ResultDocument {
            run_at: self.run_at,
            results: self.results.clone(),
        }
    }
}
