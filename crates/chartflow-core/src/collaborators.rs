//! External collaborator interfaces
//!
//! The pipeline only talks to the outside world through these traits. Each
//! is object-safe and shared as `Arc<dyn ...>` across concurrent jobs.

use crate::error::{AnalysisError, CaptureError, PersistError, ReportError};
use crate::types::{AnalysisResult, ArtifactSet, ResultDocument};
use async_trait::async_trait;
use indexmap::IndexMap;
use std::path::PathBuf;

/// Source of isolated capture contexts
///
/// Each capture attempt opens its own context; state never leaks between
/// jobs or attempts.
#[async_trait]
pub trait ChartSession: Send + Sync {
    /// Open a fresh, isolated context
    async fn open(&self) -> Result<Box<dyn ChartContext>, CaptureError>;

    /// Release session-wide resources
    async fn shutdown(&self) {}
}

/// One isolated capture context
#[async_trait]
pub trait ChartContext: Send {
    /// Capture every chart variant available for `symbol`
    ///
    /// A partial set is a success; an empty set means nothing was found.
    async fn capture(&mut self, symbol: &str) -> Result<ArtifactSet, CaptureError>;

    /// Tear the context down
    async fn close(self: Box<Self>);
}

/// Vision-capable analysis service
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VisionAnalyzer: Send + Sync {
    /// Analyze a non-empty artifact set
    ///
    /// Malformed model output is not an error; implementations return a
    /// degraded result instead.
    async fn analyze(&self, artifacts: &ArtifactSet, symbol: &str)
        -> Result<AnalysisResult, AnalysisError>;
}

/// Report delivery
#[async_trait]
pub trait Reporter: Send + Sync {
    /// Render and deliver a report for a non-empty result list
    async fn deliver(
        &self,
        results: &[AnalysisResult],
        artifacts: &IndexMap<String, ArtifactSet>,
    ) -> Result<(), ReportError>;
}

/// Durable result storage
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Write the document, returning where it landed
    async fn persist(&self, document: &ResultDocument) -> Result<PathBuf, PersistError>;
}
