//! Pipeline configuration
//!
//! Loaded from YAML by the binary; every field has a serde default so a
//! partial file (or none at all) yields a runnable configuration.
//! [`PipelineConfig::validate`] is the single startup check.

use crate::error::{ConfigError, Retryable};
use crate::retry::RetryPolicy;
use crate::types::ChartVariant;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Placeholder substituted with the ticker symbol in URL templates
pub const SYMBOL_PLACEHOLDER: &str = "{symbol}";

/// Complete pipeline configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub capture: CaptureSettings,
    pub analysis: AnalysisSettings,
    pub report: ReportSettings,
    pub output: OutputSettings,
    pub logging: LoggingSettings,
}

impl PipelineConfig {
    /// Check every invariant the run relies on
    ///
    /// # Errors
    /// - `ConfigError::Invalid` naming the first offending field
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capture.max_concurrent == 0 {
            return Err(ConfigError::invalid("capture.max_concurrent", "must be at least 1"));
        }
        if self.analysis.max_concurrent == 0 {
            return Err(ConfigError::invalid("analysis.max_concurrent", "must be at least 1"));
        }
        self.capture.retry.validate("capture.retry")?;
        self.capture.session.inner_retry.validate("capture.session.inner_retry")?;
        self.analysis.retry.validate("analysis.retry")?;

        if self.capture.session.timeout_secs == 0 {
            return Err(ConfigError::invalid("capture.session.timeout_secs", "must be positive"));
        }
        if self.analysis.timeout_secs == 0 {
            return Err(ConfigError::invalid("analysis.timeout_secs", "must be positive"));
        }
        for variant in ChartVariant::ALL {
            let template = self.capture.session.urls.template(variant);
            if !template.contains(SYMBOL_PLACEHOLDER) {
                return Err(ConfigError::invalid(
                    format!("capture.session.urls.{}", variant.as_str()),
                    format!("template must contain {SYMBOL_PLACEHOLDER}"),
                ));
            }
        }
        if self.analysis.model.trim().is_empty() {
            return Err(ConfigError::invalid("analysis.model", "must not be empty"));
        }
        Ok(())
    }
}

/// Exponential backoff settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Attempts including the first
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 2000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetrySettings {
    /// Create new retry settings
    #[inline]
    #[must_use]
    pub fn new(max_attempts: u32, initial_delay_ms: u64, backoff_multiplier: f64) -> Self {
        Self {
            max_attempts,
            initial_delay_ms,
            backoff_multiplier,
        }
    }

    fn validate(&self, field: &str) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::invalid(
                format!("{field}.max_attempts"),
                "must be at least 1",
            ));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(ConfigError::invalid(
                format!("{field}.backoff_multiplier"),
                "must be at least 1.0",
            ));
        }
        Ok(())
    }

    /// First backoff sleep
    #[inline]
    #[must_use]
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    /// Retry policy classifying by [`Retryable`]
    #[must_use]
    pub fn policy<E: Retryable + 'static>(&self) -> RetryPolicy<E> {
        RetryPolicy::new(self.max_attempts, self.initial_delay(), self.backoff_multiplier)
    }
}

/// Capture stage settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    pub max_concurrent: usize,
    /// Job-level retry around a whole capture attempt
    pub retry: RetrySettings,
    pub session: SessionSettings,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            retry: RetrySettings::default(),
            session: SessionSettings::default(),
        }
    }
}

/// Chart session settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Hide the browser window; only browser-backed sessions read this,
    /// the HTTP session has no window either way
    pub headless: bool,
    /// Per-request deadline
    pub timeout_secs: u64,
    pub user_agent: String,
    pub urls: VariantUrls,
    /// Retry around each variant download, inside one capture attempt
    pub inner_retry: RetrySettings,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            headless: true,
            timeout_secs: 30,
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36"
                .to_string(),
            urls: VariantUrls::default(),
            inner_retry: RetrySettings::new(2, 500, 2.0),
        }
    }
}

impl SessionSettings {
    /// Per-request deadline
    #[inline]
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// URL template per chart variant; `{symbol}` is substituted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VariantUrls {
    pub daily: String,
    pub weekly: String,
    pub pnf_daily: String,
    pub pnf_weekly: String,
}

impl Default for VariantUrls {
    fn default() -> Self {
        Self {
            daily: "https://stockcharts.com/c-sc/sc?s={symbol}&p=D&yr=1&mn=0&dy=0&i=t3757734781c&r=0"
                .to_string(),
            weekly: "https://stockcharts.com/c-sc/sc?s={symbol}&p=W&yr=3&mn=0&dy=0&i=t3757734781c&r=0"
                .to_string(),
            pnf_daily: "https://stockcharts.com/def/servlet/SC.pnf?c={symbol},P".to_string(),
            pnf_weekly: "https://stockcharts.com/def/servlet/SC.pnf?c={symbol},PW".to_string(),
        }
    }
}

impl VariantUrls {
    /// Raw template for one variant
    #[must_use]
    pub fn template(&self, variant: ChartVariant) -> &str {
        match variant {
            ChartVariant::Daily => &self.daily,
            ChartVariant::Weekly => &self.weekly,
            ChartVariant::PnfDaily => &self.pnf_daily,
            ChartVariant::PnfWeekly => &self.pnf_weekly,
        }
    }

    /// Concrete URL for one variant and symbol
    #[must_use]
    pub fn resolve(&self, variant: ChartVariant, symbol: &str) -> String {
        self.template(variant).replace(SYMBOL_PLACEHOLDER, symbol)
    }
}

/// Analysis stage settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisSettings {
    pub max_concurrent: usize,
    pub retry: RetrySettings,
    pub model: String,
    pub max_tokens: u32,
    pub api_url: String,
    pub timeout_secs: u64,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            retry: RetrySettings::default(),
            model: "claude-sonnet-4-20250514".to_string(),
            max_tokens: 2000,
            api_url: "https://api.anthropic.com/v1/messages".to_string(),
            timeout_secs: 120,
        }
    }
}

impl AnalysisSettings {
    /// Per-request deadline
    #[inline]
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Report settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportSettings {
    pub enabled: bool,
    pub subject_prefix: String,
    pub recipients: Vec<String>,
    /// Write the rendered HTML here as well
    pub html_file: Option<PathBuf>,
    /// Live chart page linked from the report
    pub chart_page_url: String,
    /// Live point & figure page linked from the report
    pub pnf_page_url: String,
}

impl Default for ReportSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            subject_prefix: "[Stock Analysis]".to_string(),
            recipients: Vec::new(),
            html_file: None,
            chart_page_url: "https://stockcharts.com/h-sc/ui?s={symbol}".to_string(),
            pnf_page_url: "https://stockcharts.com/freecharts/pnf.php?c={symbol},P".to_string(),
        }
    }
}

/// Output locations
///
/// Chart images and the results document live under `dir` unless their
/// own paths are set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    pub dir: PathBuf,
    pub screenshots_dir: Option<PathBuf>,
    pub results_file: Option<PathBuf>,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("output"),
            screenshots_dir: None,
            results_file: None,
        }
    }
}

impl OutputSettings {
    /// Create settings rooted at `dir`
    #[must_use]
    pub fn under(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Self::default()
        }
    }

    /// Where chart images are written
    #[must_use]
    pub fn screenshots_dir(&self) -> PathBuf {
        self.screenshots_dir
            .clone()
            .unwrap_or_else(|| self.dir.join("screenshots"))
    }

    /// Where the results document is written
    #[must_use]
    pub fn results_file(&self) -> PathBuf {
        self.results_file
            .clone()
            .unwrap_or_else(|| self.dir.join("results.json"))
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset
    pub level: String,
    pub json: bool,
    /// Also append log lines to this file
    pub file: Option<PathBuf>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}
