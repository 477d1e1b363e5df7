//! HTTP chart session
//!
//! Downloads the four chart variants for a symbol as images. Each opened
//! context owns its own `reqwest::Client` and cookie jar, so no state is
//! shared between jobs or attempts. Within a context the variants are
//! fetched concurrently, each under its own (inner) retry policy.

use async_trait::async_trait;
use chartflow_core::{
    ArtifactSet, CaptureError, ChartContext, ChartSession, ChartVariant, ObservabilitySink, Phase,
    RetryExecutor, RetryPolicy, Retryable, SessionSettings, TracingSink,
};
use futures::future::join_all;
use reqwest::StatusCode;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Chart session backed by plain HTTP downloads
pub struct HttpChartSession {
    settings: SessionSettings,
    screenshots_dir: PathBuf,
    inner_policy: RetryPolicy<CaptureError>,
    sink: Arc<dyn ObservabilitySink>,
}

impl HttpChartSession {
    /// Create new session writing artifacts under `screenshots_dir`
    #[must_use]
    pub fn new(settings: SessionSettings, screenshots_dir: impl Into<PathBuf>) -> Self {
        if !settings.headless {
            tracing::warn!("visible mode only applies to browser-backed sessions; ignoring it");
        }
        Self {
            inner_policy: settings.inner_retry.policy(),
            settings,
            screenshots_dir: screenshots_dir.into(),
            sink: Arc::new(TracingSink),
        }
    }

    /// Report inner retries to `sink`
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn ObservabilitySink>) -> Self {
        self.sink = sink;
        self
    }

    /// Directory artifacts are written to
    #[inline]
    #[must_use]
    pub fn screenshots_dir(&self) -> &Path {
        &self.screenshots_dir
    }

    fn client(&self) -> Result<reqwest::Client, CaptureError> {
        reqwest::Client::builder()
            .cookie_store(true)
            .user_agent(self.settings.user_agent.as_str())
            .timeout(self.settings.timeout())
            .build()
            .map_err(|e| CaptureError::Session(format!("failed to build HTTP client: {e}")))
    }
}

#[async_trait]
impl ChartSession for HttpChartSession {
    async fn open(&self) -> Result<Box<dyn ChartContext>, CaptureError> {
        tokio::fs::create_dir_all(&self.screenshots_dir)
            .await
            .map_err(|e| {
                CaptureError::Io(format!("{}: {e}", self.screenshots_dir.display()))
            })?;

        Ok(Box::new(HttpChartContext {
            client: self.client()?,
            settings: self.settings.clone(),
            dir: self.screenshots_dir.clone(),
            retry: RetryExecutor::new(
                self.inner_policy.clone(),
                Phase::Capture,
                Arc::clone(&self.sink),
            ),
        }))
    }
}

/// One isolated download context
struct HttpChartContext {
    client: reqwest::Client,
    settings: SessionSettings,
    dir: PathBuf,
    retry: RetryExecutor<CaptureError>,
}

#[async_trait]
impl ChartContext for HttpChartContext {
    async fn capture(&mut self, symbol: &str) -> Result<ArtifactSet, CaptureError> {
        let this = &*self;
        let fetched = join_all(ChartVariant::ALL.map(|variant| this.fetch(variant, symbol))).await;

        let mut artifacts = ArtifactSet::new();
        let mut transient: Option<CaptureError> = None;
        let mut structural: Option<CaptureError> = None;

        for (variant, result) in ChartVariant::ALL.into_iter().zip(fetched) {
            match result {
                Ok(Some(path)) => artifacts.insert(variant, path),
                Ok(None) => {
                    tracing::warn!(symbol, %variant, "chart not available");
                }
                Err(e) => {
                    tracing::warn!(symbol, %variant, error = %e, "chart download failed");
                    if e.is_retryable() {
                        transient = Some(e);
                    } else {
                        structural = Some(e);
                    }
                }
            }
        }

        if !artifacts.is_empty() {
            return Ok(artifacts);
        }
        match (structural, transient) {
            (Some(e), _) | (None, Some(e)) => Err(e),
            (None, None) => Ok(artifacts),
        }
    }

    async fn close(self: Box<Self>) {
        tracing::debug!(dir = %self.dir.display(), "closing chart context");
    }
}

impl HttpChartContext {
    async fn fetch(&self, variant: ChartVariant, symbol: &str) -> Result<Option<PathBuf>, CaptureError> {
        let url = self.settings.urls.resolve(variant, symbol);
        let path = variant.artifact_path(&self.dir, symbol);
        let operation = format!("fetch {variant} chart");
        self.retry
            .run(&operation, Some(symbol), |_| self.download(&url, &path))
            .await
    }

    async fn download(&self, url: &str, path: &Path) -> Result<Option<PathBuf>, CaptureError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(CaptureError::Session(format!("HTTP {status} from {url}")));
        }
        if !status.is_success() {
            return Err(CaptureError::Navigation(format!("HTTP {status} from {url}")));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if !content_type.starts_with("image/") {
            return Err(CaptureError::Navigation(format!(
                "expected an image from {url}, got `{content_type}`"
            )));
        }

        let bytes = response.bytes().await.map_err(|e| self.transport_error(e))?;
        if bytes.is_empty() {
            return Err(CaptureError::Navigation(format!("empty image from {url}")));
        }

        tokio::fs::write(path, &bytes)
            .await
            .map_err(|e| CaptureError::Io(format!("{}: {e}", path.display())))?;
        tracing::debug!(path = %path.display(), bytes = bytes.len(), "chart saved");
        Ok(Some(path.to_path_buf()))
    }

    fn transport_error(&self, error: reqwest::Error) -> CaptureError {
        if error.is_timeout() {
            CaptureError::Timeout {
                timeout_secs: self.settings.timeout_secs,
            }
        } else {
            CaptureError::Session(error.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_server::{closed_port_url, Canned, Route, TestServer};
    use chartflow_core::{RetrySettings, VariantUrls};

    const PNG: &[u8] = b"\x89PNG\r\n\x1a\nfake-image-bytes";

    fn settings(base: &str) -> SessionSettings {
        SessionSettings {
            urls: VariantUrls {
                daily: format!("{base}/daily/{{symbol}}"),
                weekly: format!("{base}/weekly/{{symbol}}"),
                pnf_daily: format!("{base}/pnf_daily/{{symbol}}"),
                pnf_weekly: format!("{base}/pnf_weekly/{{symbol}}"),
            },
            inner_retry: RetrySettings::new(2, 10, 1.0),
            ..SessionSettings::default()
        }
    }

    fn image() -> Canned {
        Canned::new(200, "image/png", PNG)
    }

    async fn capture(session: &HttpChartSession, symbol: &str) -> Result<ArtifactSet, CaptureError> {
        let mut context = session.open().await?;
        let result = context.capture(symbol).await;
        context.close().await;
        result
    }

    #[tokio::test]
    async fn test_captures_all_variants() {
        let server = TestServer::start(vec![
            Route::new("/daily/", image()),
            Route::new("/weekly/", image()),
            Route::new("/pnf_daily/", image()),
            Route::new("/pnf_weekly/", image()),
        ])
        .await;
        let dir = tempfile::tempdir().unwrap();
        let session = HttpChartSession::new(settings(&server.url("")), dir.path());

        let artifacts = capture(&session, "AAPL").await.unwrap();

        assert!(artifacts.is_complete());
        let daily = artifacts.get(ChartVariant::Daily).unwrap();
        assert_eq!(daily, dir.path().join("AAPL_daily.png"));
        assert_eq!(std::fs::read(daily).unwrap(), PNG);
        assert_eq!(server.requests().await.len(), 4);
    }

    #[tokio::test]
    async fn test_symbol_with_separators_is_saved_inside_dir() {
        let server = TestServer::start(vec![Route::new("/", image())]).await;
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("screenshots");
        let session = HttpChartSession::new(settings(&server.url("")), &dir);

        let artifacts = capture(&session, "BRK/B").await.unwrap();
        assert_eq!(
            artifacts.get(ChartVariant::Daily).unwrap(),
            dir.join("BRK_B_daily.png")
        );

        let artifacts = capture(&session, "../x").await.unwrap();
        let daily = artifacts.get(ChartVariant::Daily).unwrap();
        assert_eq!(daily.parent(), Some(dir.as_path()));
        assert!(!root.path().join("x_daily.png").exists());
    }

    #[tokio::test]
    async fn test_missing_variant_yields_partial_set() {
        let server = TestServer::start(vec![
            Route::new("/daily/", image()),
            Route::new("/weekly/", image()),
        ])
        .await;
        let dir = tempfile::tempdir().unwrap();
        let session = HttpChartSession::new(settings(&server.url("")), dir.path());

        let artifacts = capture(&session, "MSFT").await.unwrap();

        assert_eq!(artifacts.len(), 2);
        assert_eq!(
            artifacts.missing(),
            vec![ChartVariant::PnfDaily, ChartVariant::PnfWeekly]
        );
    }

    #[tokio::test]
    async fn test_unknown_symbol_yields_empty_set() {
        let server = TestServer::start(Vec::new()).await;
        let dir = tempfile::tempdir().unwrap();
        let session = HttpChartSession::new(settings(&server.url("")), dir.path());

        let artifacts = capture(&session, "NOPE").await.unwrap();

        assert!(artifacts.is_empty());
    }

    #[tokio::test]
    async fn test_inner_retry_recovers_transient_variant() {
        let server = TestServer::start(vec![
            Route::sequence(
                "/daily/",
                vec![Canned::new(503, "text/plain", "busy"), image()],
            ),
            Route::new("/weekly/", image()),
            Route::new("/pnf_daily/", image()),
            Route::new("/pnf_weekly/", image()),
        ])
        .await;
        let dir = tempfile::tempdir().unwrap();
        let session = HttpChartSession::new(settings(&server.url("")), dir.path());

        let artifacts = capture(&session, "AAPL").await.unwrap();

        assert!(artifacts.is_complete());
        let daily_hits = server
            .requests()
            .await
            .iter()
            .filter(|r| r.path.starts_with("/daily/"))
            .count();
        assert_eq!(daily_hits, 2);
    }

    #[tokio::test]
    async fn test_html_instead_of_image_is_navigation_failure() {
        let page = Canned::new(200, "text/html", "<html>consent</html>");
        let server = TestServer::start(vec![
            Route::new("/daily/", page.clone()),
            Route::new("/weekly/", page.clone()),
            Route::new("/pnf_daily/", page.clone()),
            Route::new("/pnf_weekly/", page),
        ])
        .await;
        let dir = tempfile::tempdir().unwrap();
        let session = HttpChartSession::new(settings(&server.url("")), dir.path());

        let err = capture(&session, "AAPL").await.unwrap_err();

        assert!(matches!(err, CaptureError::Navigation(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_unreachable_host_is_retryable_session_failure() {
        let base = closed_port_url("").await;
        let dir = tempfile::tempdir().unwrap();
        let session = HttpChartSession::new(settings(&base), dir.path());

        let err = capture(&session, "AAPL").await.unwrap_err();

        assert!(matches!(err, CaptureError::Session(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_open_creates_screenshot_dir() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("output").join("screenshots");
        let session = HttpChartSession::new(SessionSettings::default(), &nested);

        let context = session.open().await.unwrap();
        context.close().await;

        assert!(nested.is_dir());
    }
}
