//! Credentials read from the environment

use chartflow_core::ConfigError;

/// Analysis API key
pub const ANALYSIS_KEY_VAR: &str = "ANTHROPIC_API_KEY";
/// Report webhook endpoint
pub const REPORT_URL_VAR: &str = "REPORT_WEBHOOK_URL";
/// Optional bearer token for the report webhook
pub const REPORT_TOKEN_VAR: &str = "REPORT_WEBHOOK_TOKEN";

/// Secrets needed by the external collaborators
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub analysis_key: Option<String>,
    pub report_url: Option<String>,
    pub report_token: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "<redacted>");
        f.debug_struct("Credentials")
            .field("analysis_key", &redact(&self.analysis_key))
            .field("report_url", &self.report_url)
            .field("report_token", &redact(&self.report_token))
            .finish()
    }
}

impl Credentials {
    /// Read credentials from the process environment
    ///
    /// # Errors
    /// - `ConfigError::MissingCredentials` listing every required variable
    ///   that is unset or blank
    pub fn from_env(require_analysis: bool, require_report: bool) -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok(), require_analysis, require_report)
    }

    /// Read credentials through `lookup`
    ///
    /// # Errors
    /// - `ConfigError::MissingCredentials` as for [`Credentials::from_env`]
    pub fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
        require_analysis: bool,
        require_report: bool,
    ) -> Result<Self, ConfigError> {
        let read = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let credentials = Self {
            analysis_key: read(ANALYSIS_KEY_VAR),
            report_url: read(REPORT_URL_VAR),
            report_token: read(REPORT_TOKEN_VAR),
        };

        let mut missing = Vec::new();
        if require_analysis && credentials.analysis_key.is_none() {
            missing.push(ANALYSIS_KEY_VAR.to_string());
        }
        if require_report && credentials.report_url.is_none() {
            missing.push(REPORT_URL_VAR.to_string());
        }

        if missing.is_empty() {
            Ok(credentials)
        } else {
            Err(ConfigError::MissingCredentials(missing))
        }
    }
}
