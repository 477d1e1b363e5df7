//! Run driver: wires the adapters into a pipeline run and maps the outcome
//! to an exit code

use crate::args::CliArgs;
use crate::{loader, logging, summary};
use anyhow::Context as _;
use chartflow_adapters::{
    ClaudeVisionAnalyzer, Credentials, HttpChartSession, JsonResultStore, WebhookReporter,
};
use chartflow_core::prelude::*;
use chartflow_core::{ChartSession, ConfigError, LoggingSettings};
use std::io::IsTerminal as _;
use tokio_util::sync::CancellationToken;

/// Run finished, possibly with per-ticker failures
pub const EXIT_OK: i32 = 0;
/// Fatal configuration or unhandled error
pub const EXIT_FAILURE: i32 = 1;
/// Interrupted by the user
pub const EXIT_INTERRUPTED: i32 = 130;

/// Run the command and return the process exit code
pub async fn run(args: CliArgs) -> i32 {
    let env_loaded = loader::load_env(&args.env_file);

    let config = loader::load_config(&args.config).map(|mut config| {
        loader::apply_overrides(&mut config, &args);
        config
    });

    let log_settings = match &config {
        Ok(config) => config.logging.clone(),
        Err(_) => LoggingSettings {
            level: if args.verbose { "debug" } else { "info" }.to_string(),
            ..LoggingSettings::default()
        },
    };
    if let Err(e) = logging::init(&log_settings) {
        eprintln!("chartflow: logging disabled: {e:#}");
    }
    match env_loaded {
        Ok(true) => tracing::debug!(path = %args.env_file.display(), "environment loaded"),
        Ok(false) => {}
        Err(e) => tracing::warn!(
            path = %args.env_file.display(),
            error = %e,
            "could not load environment file"
        ),
    }
    if !args.config.exists() {
        tracing::warn!(path = %args.config.display(), "configuration file not found, using defaults");
    }

    let cancel = CancellationToken::new();
    let watcher = watch_interrupt(cancel.clone());

    let outcome = match config {
        Ok(config) => execute(&args, config, |name| std::env::var(name).ok(), cancel).await,
        Err(e) => Err(e.into()),
    };
    watcher.abort();

    match outcome {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("Fatal error: {e:#}");
            EXIT_FAILURE
        }
    }
}

fn watch_interrupt(cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping after in-flight work");
            cancel.cancel();
        }
    })
}

/// Validate, wire collaborators, run the pipeline and print the summary
///
/// # Errors
/// Only fatal problems: invalid configuration, missing tickers or
/// credentials, collaborators that cannot be constructed.
pub async fn execute(
    args: &CliArgs,
    config: PipelineConfig,
    env: impl Fn(&str) -> Option<String>,
    cancel: CancellationToken,
) -> anyhow::Result<i32> {
    config.validate()?;

    let rule = "=".repeat(60);
    tracing::info!("{rule}");
    tracing::info!(
        "Stock Chart Analysis - {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    tracing::info!("{rule}");

    let jobs = loader::resolve_jobs(args).map_err(|e| match e {
        ConfigError::NoTickers => anyhow::anyhow!(
            "No tickers configured. Add tickers to {}",
            args.tickers_file.display()
        ),
        e => e.into(),
    })?;
    let symbols: Vec<&str> = jobs.iter().map(|j| j.symbol.as_str()).collect();
    tracing::info!("Analyzing {} tickers: {}", jobs.len(), symbols.join(", "));

    let options = RunOptions {
        dry_run: args.dry_run,
        send_report: config.report.enabled,
    };
    let credentials = Credentials::from_lookup(
        env,
        !options.dry_run,
        options.send_report && !options.dry_run,
    )?;

    let session = Arc::new(HttpChartSession::new(
        config.capture.session.clone(),
        config.output.screenshots_dir(),
    ));
    let mut builder = PipelineRun::builder(config.clone(), session.clone())
        .store(Arc::new(JsonResultStore::new(config.output.results_file())))
        .cancellation(cancel)
        .options(options);

    if !options.dry_run {
        if let Some(key) = credentials.analysis_key {
            let analyzer = ClaudeVisionAnalyzer::new(config.analysis.clone(), key)?;
            builder = builder.analyzer(Arc::new(analyzer));
        }
        if let (true, Some(url)) = (options.send_report, credentials.report_url) {
            let reporter = WebhookReporter::new(url, credentials.report_token, config.report.clone())
                .context("building report webhook client")?;
            builder = builder.reporter(Arc::new(reporter));
        }
    }

    let run = builder.build()?;
    let result = run.execute(&jobs).await;
    session.shutdown().await;
    let result = result?;

    if let Some(text) = summary::render(&result, std::io::stdout().is_terminal()) {
        print!("{text}");
    }

    if run.is_cancelled() {
        tracing::info!("Interrupted by user");
        return Ok(EXIT_INTERRUPTED);
    }
    Ok(EXIT_OK)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chartflow_adapters::credentials::{ANALYSIS_KEY_VAR, REPORT_URL_VAR};
    use chartflow_core::{OutputSettings, RetrySettings, VariantUrls};
    use std::path::Path;

    fn args(dir: &Path, tickers: &[&str]) -> CliArgs {
        CliArgs {
            tickers: tickers.iter().map(|t| t.to_string()).collect(),
            no_report: false,
            no_headless: false,
            dry_run: false,
            verbose: false,
            max_concurrent: None,
            config: dir.join("config.yaml"),
            tickers_file: dir.join("tickers.yaml"),
            env_file: dir.join(".env"),
        }
    }

    fn no_env(_: &str) -> Option<String> {
        None
    }

    /// Configuration whose chart URLs point at a closed local port
    async fn offline_config(dir: &Path) -> PipelineConfig {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let mut config = PipelineConfig::default();
        config.capture.retry = RetrySettings::new(1, 1, 1.0);
        config.capture.session.inner_retry = RetrySettings::new(1, 1, 1.0);
        config.capture.session.urls = VariantUrls {
            daily: format!("{base}/d/{{symbol}}"),
            weekly: format!("{base}/w/{{symbol}}"),
            pnf_daily: format!("{base}/pd/{{symbol}}"),
            pnf_weekly: format!("{base}/pw/{{symbol}}"),
        };
        config.output = OutputSettings::under(dir);
        config
    }

    #[tokio::test]
    async fn test_missing_tickers_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let err = execute(
            &args(dir.path(), &[]),
            PipelineConfig::default(),
            no_env,
            CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().starts_with("No tickers configured"));
    }

    #[tokio::test]
    async fn test_missing_credentials_are_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let err = execute(
            &args(dir.path(), &["AAPL"]),
            PipelineConfig::default(),
            no_env,
            CancellationToken::new(),
        )
        .await
        .unwrap_err();

        let message = err.to_string();
        assert!(message.contains(ANALYSIS_KEY_VAR));
        assert!(message.contains(REPORT_URL_VAR));
    }

    #[tokio::test]
    async fn test_invalid_config_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = PipelineConfig::default();
        config.capture.max_concurrent = 0;

        let err = execute(&args(dir.path(), &["AAPL"]), config, no_env, CancellationToken::new())
            .await
            .unwrap_err();

        assert!(err.downcast_ref::<ConfigError>().is_some());
    }

    #[tokio::test]
    async fn test_dry_run_needs_no_credentials_and_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let config = offline_config(dir.path()).await;
        let mut args = args(dir.path(), &["AAPL", "MSFT"]);
        args.dry_run = true;

        let code = execute(&args, config, no_env, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(code, EXIT_OK);
        assert!(!dir.path().join("results.json").exists());
    }

    #[tokio::test]
    async fn test_failed_captures_still_exit_ok_and_persist() {
        let dir = tempfile::tempdir().unwrap();
        let config = offline_config(dir.path()).await;
        let env = |name: &str| (name == ANALYSIS_KEY_VAR).then(|| "sk-test".to_string());
        let mut args = args(dir.path(), &["AAPL"]);
        args.no_report = true;
        let mut config = config;
        loader::apply_overrides(&mut config, &args);

        let code = execute(&args, config, env, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(code, EXIT_OK);
        let document: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join("results.json")).unwrap())
                .unwrap();
        assert_eq!(document["results"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_interrupted_run_exits_130() {
        let dir = tempfile::tempdir().unwrap();
        let config = offline_config(dir.path()).await;
        let mut args = args(dir.path(), &["AAPL"]);
        args.dry_run = true;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let code = execute(&args, config, no_env, cancel).await.unwrap();

        assert_eq!(code, EXIT_INTERRUPTED);
    }
}
