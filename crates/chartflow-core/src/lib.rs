//! Chartflow Core - bounded-concurrency capture and analysis pipeline
//!
//! Runs one capture job per ticker symbol against an external chart session,
//! feeds every non-empty artifact set into a separately bounded vision-analysis
//! stage, then hands the aggregated results to report and persistence
//! collaborators:
//! - [`RetryExecutor`] wraps a fallible async operation with exponential backoff
//! - [`ConcurrencyLimiter`] is the counting admission gate used at both tiers
//! - [`CaptureStage`] and [`AnalysisStage`] fan jobs out and turn failures into outcomes
//! - [`PipelineRun`] sequences Capture, Analyze, Report and Persist
//!
//! # Example
//!
//! ```rust,ignore
//! use chartflow_core::prelude::*;
//!
//! # async fn example(session: Arc<dyn ChartSession>, analyzer: Arc<dyn VisionAnalyzer>)
//! # -> Result<(), PipelineError> {
//! let run = PipelineRun::builder(PipelineConfig::default(), session)
//!     .analyzer(analyzer)
//!     .build()?;
//!
//! let jobs = vec![TickerJob::new("AAPL", "Apple Inc.")];
//! let result = run.execute(&jobs).await?;
//! println!("{} analyzed, {} errors", result.results().len(), result.errors().len());
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

// Core modules
pub mod analysis;
pub mod capture;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod limiter;
pub mod observe;
pub mod parse;
pub mod retry;
pub mod run;
pub mod types;

// Re-exports for convenience
pub use analysis::AnalysisStage;
pub use capture::CaptureStage;
pub use collaborators::{ChartContext, ChartSession, Reporter, ResultStore, VisionAnalyzer};
pub use config::{
    AnalysisSettings, CaptureSettings, LoggingSettings, OutputSettings, PipelineConfig,
    ReportSettings, RetrySettings, SessionSettings, VariantUrls,
};
pub use error::{
    AnalysisError, CaptureError, ConfigError, JobError, LimiterError, PersistError,
    PipelineError, ReportError, Retryable,
};
pub use limiter::{ConcurrencyLimiter, LimiterStats, Permit};
pub use observe::{Level, MemorySink, ObservabilitySink, PipelineEvent, TracingSink};
pub use parse::{degraded_result, parse_analysis};
pub use retry::{RetryExecutor, RetryPolicy};
pub use run::{PipelineRun, PipelineRunBuilder, RunOptions};
pub use types::{
    AnalysisOutcome, AnalysisResult, ArtifactSet, CaptureOutcome, ChartPattern, ChartVariant,
    Confidence, Divergence, Phase, PipelineRunResult, Recommendation, ResultDocument,
    RsiReading, RsiZone, Signal, TickerJob, Trend, VolumeAssessment,
};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for wiring a pipeline run
    pub use crate::{
        AnalysisResult, ArtifactSet, ChartSession, ObservabilitySink, PipelineConfig,
        PipelineError, PipelineRun, PipelineRunResult, Reporter, ResultStore, RunOptions,
        TickerJob, VisionAnalyzer,
    };
    pub use std::sync::Arc;
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
