//! Error types for Chartflow Core
//!
//! Provides the error taxonomy of a pipeline run:
//! - Transient external failures (retryable, become per-job failures once exhausted)
//! - Structural/navigation failures (not retryable, still only per-job)
//! - Report and persistence failures (recorded, never invalidate results)
//! - Configuration and credential failures (the only fatal kind)

/// Classification shared by every error a [`crate::RetryExecutor`] can see
pub trait Retryable {
    /// Whether another attempt may succeed
    fn is_retryable(&self) -> bool;
}

/// Fatal pipeline error
///
/// A run only fails as a whole when it cannot start any job.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Configuration or credential problem
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Configuration and credential errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// A setting failed validation
    #[error("invalid setting `{field}`: {reason}")]
    Invalid { field: String, reason: String },

    /// Required credentials are absent from the environment
    #[error("missing required environment variables: {}", .0.join(", "))]
    MissingCredentials(Vec<String>),

    /// A configuration file could not be parsed
    #[error("failed to parse {path}: {message}")]
    Parse { path: String, message: String },

    /// A configuration file could not be read
    #[error("failed to read {path}: {message}")]
    Io { path: String, message: String },

    /// Nothing to process
    #[error("no tickers configured")]
    NoTickers,
}

impl ConfigError {
    /// Create an invalid-setting error
    #[inline]
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Admission control errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum LimiterError {
    /// The limiter was closed and admits no more work
    #[error("limiter closed")]
    Closed,
}

/// Capture errors for a single ticker
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CaptureError {
    /// Could not interact with the remote at all
    #[error("session failure: {0}")]
    Session(String),

    /// An external call exceeded its own deadline
    #[error("capture timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// The expected remote structure never appeared
    #[error("navigation failed: {0}")]
    Navigation(String),

    /// Writing an artifact failed
    #[error("artifact i/o failed: {0}")]
    Io(String),

    /// The run was interrupted before this job finished
    #[error("capture cancelled")]
    Cancelled,

    /// The job was never admitted
    #[error("capture not admitted: {0}")]
    Admission(#[from] LimiterError),
}

impl Retryable for CaptureError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Session(_) | Self::Timeout { .. })
    }
}

/// Vision-analysis errors for a single ticker
///
/// Malformed response content is never an error; see [`crate::parse`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AnalysisError {
    /// Network hiccup, rate limit or server-side failure
    #[error("transient analysis failure: {0}")]
    Transient(String),

    /// The request exceeded its deadline
    #[error("analysis timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// Credentials rejected
    #[error("analysis service rejected credentials: {0}")]
    Auth(String),

    /// Request rejected for a non-transient reason
    #[error("analysis request rejected (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },

    /// Artifact files could not be loaded
    #[error("failed to load artifacts: {0}")]
    Artifact(String),

    /// The run was interrupted before this job finished
    #[error("analysis cancelled")]
    Cancelled,

    /// The job was never admitted
    #[error("analysis not admitted: {0}")]
    Admission(#[from] LimiterError),
}

impl Retryable for AnalysisError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Timeout { .. })
    }
}

/// Report rendering and delivery errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ReportError {
    /// The delivery channel could not be reached
    #[error("report delivery failed: {0}")]
    Delivery(String),

    /// The delivery channel refused the report
    #[error("report rejected (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },

    /// Writing the rendered report failed
    #[error("report i/o failed: {0}")]
    Io(String),
}

impl Retryable for ReportError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Delivery(_))
    }
}

/// Result persistence errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PersistError {
    /// Serializing the result document failed
    #[error("failed to serialize results: {0}")]
    Serialize(String),

    /// Writing the result document failed
    #[error("failed to write {path}: {message}")]
    Io { path: String, message: String },
}

impl Retryable for PersistError {
    fn is_retryable(&self) -> bool {
        false
    }
}

/// A recorded, non-fatal failure in a run's error list
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum JobError {
    /// Capture failed for a ticker
    #[error(transparent)]
    Capture(#[from] CaptureError),

    /// Analysis failed for a ticker
    #[error(transparent)]
    Analysis(#[from] AnalysisError),

    /// Report phase failed
    #[error(transparent)]
    Report(#[from] ReportError),

    /// Persist phase failed
    #[error(transparent)]
    Persist(#[from] PersistError),
}

impl Retryable for JobError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Capture(e) => e.is_retryable(),
            Self::Analysis(e) => e.is_retryable(),
            Self::Report(e) => e.is_retryable(),
            Self::Persist(e) => e.is_retryable(),
        }
    }
}
