//! Configuration, ticker and environment loading

use crate::args::CliArgs;
use chartflow_core::{ConfigError, PipelineConfig, TickerJob};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Default, Deserialize)]
struct TickerFile {
    #[serde(default)]
    tickers: Vec<TickerJob>,
}

fn read(path: &Path) -> Result<Option<String>, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(ConfigError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        }),
    }
}

fn parse_error(path: &Path, error: &serde_yaml::Error) -> ConfigError {
    ConfigError::Parse {
        path: path.display().to_string(),
        message: error.to_string(),
    }
}

/// Load the pipeline configuration
///
/// A missing file falls back to defaults; a malformed one is an error.
/// The result is not validated yet.
///
/// # Errors
/// - `ConfigError::Io` if the file exists but cannot be read
/// - `ConfigError::Parse` if it is not valid configuration YAML
pub fn load_config(path: &Path) -> Result<PipelineConfig, ConfigError> {
    let text = read(path)?.unwrap_or_default();
    if text.trim().is_empty() {
        return Ok(PipelineConfig::default());
    }
    serde_yaml::from_str(&text).map_err(|e| parse_error(path, &e))
}

/// Load the configured ticker list
///
/// # Errors
/// - `ConfigError::Io` / `ConfigError::Parse` as for [`load_config`]
pub fn load_tickers(path: &Path) -> Result<Vec<TickerJob>, ConfigError> {
    let Some(text) = read(path)? else {
        tracing::warn!(path = %path.display(), "ticker file not found");
        return Ok(Vec::new());
    };
    let file: Option<TickerFile> = serde_yaml::from_str(&text).map_err(|e| parse_error(path, &e))?;
    Ok(file
        .unwrap_or_default()
        .tickers
        .into_iter()
        .map(TickerJob::normalized)
        .filter(|job| !job.symbol.is_empty())
        .collect())
}

/// Jobs for this run: explicit tickers win over the ticker file
///
/// # Errors
/// - `ConfigError::NoTickers` if nothing is left to analyze
/// - anything [`load_tickers`] returns
pub fn resolve_jobs(args: &CliArgs) -> Result<Vec<TickerJob>, ConfigError> {
    let jobs = if args.tickers.is_empty() {
        load_tickers(&args.tickers_file)?
    } else {
        args.tickers
            .iter()
            .map(|t| TickerJob::from_symbol(t))
            .filter(|job| !job.symbol.is_empty())
            .collect()
    };

    let jobs = TickerJob::dedupe(jobs);
    if jobs.is_empty() {
        return Err(ConfigError::NoTickers);
    }
    Ok(jobs)
}

/// Apply command line overrides on top of the file configuration
pub fn apply_overrides(config: &mut PipelineConfig, args: &CliArgs) {
    if args.no_headless {
        config.capture.session.headless = false;
    }
    if args.verbose {
        config.logging.level = "debug".to_string();
    }
    if let Some(max) = args.max_concurrent {
        config.capture.max_concurrent = max;
    }
    if args.no_report {
        config.report.enabled = false;
    }
}

/// Seed the environment from a dotenv file, if present
///
/// Variables already set in the process win. Returns whether the file was
/// found; nothing is logged here since logging may not be up yet.
///
/// # Errors
/// - `dotenvy::Error` if the file exists but cannot be read or parsed
pub fn load_env(path: &Path) -> Result<bool, dotenvy::Error> {
    match dotenvy::from_path(path) {
        Ok(()) => Ok(true),
        Err(e) if e.not_found() => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;

    fn args(dir: &Path) -> CliArgs {
        CliArgs {
            tickers: Vec::new(),
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

    #[test]
    fn test_missing_config_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join("absent.yaml")).unwrap();
        assert_eq!(config, PipelineConfig::default());
    }

    #[test]
    fn test_partial_config_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "capture:\n  max_concurrent: 4\nanalysis:\n  model: claude-test\n").unwrap();

        let config = load_config(&path).unwrap();

        assert_eq!(config.capture.max_concurrent, 4);
        assert_eq!(config.analysis.model, "claude-test");
        assert_eq!(config.analysis.max_concurrent, 5);
    }

    #[test]
    fn test_shipped_config_matches_defaults() {
        let shipped: PipelineConfig =
            serde_yaml::from_str(include_str!("../../../config/config.yaml")).unwrap();
        assert_eq!(shipped, PipelineConfig::default());
        shipped.validate().unwrap();
    }

    #[test]
    fn test_malformed_config_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "capture: [not, a, map\n").unwrap();

        assert!(matches!(load_config(&path), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_ticker_file_is_normalized() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("tickers.yaml"),
            "tickers:\n  - symbol: aapl\n    name: Apple Inc.\n  - symbol: MSFT\n",
        )
        .unwrap();

        let jobs = resolve_jobs(&args(dir.path())).unwrap();

        assert_eq!(
            jobs,
            vec![
                TickerJob::new("AAPL", "Apple Inc."),
                TickerJob::new("MSFT", "MSFT"),
            ]
        );
    }

    #[test]
    fn test_explicit_tickers_win_and_dedupe() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("tickers.yaml"), "tickers:\n  - symbol: MSFT\n").unwrap();
        let mut args = args(dir.path());
        args.tickers = vec!["nvda".into(), "aapl".into(), "NVDA".into()];

        let jobs = resolve_jobs(&args).unwrap();

        let symbols: Vec<&str> = jobs.iter().map(|j| j.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["NVDA", "AAPL"]);
    }

    #[test]
    fn test_no_tickers_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("tickers.yaml"), "tickers: []\n").unwrap();

        assert_eq!(resolve_jobs(&args(dir.path())), Err(ConfigError::NoTickers));
    }

    #[test]
    fn test_overrides() {
        let mut config = PipelineConfig::default();
        let args = CliArgs {
            no_report: true,
            no_headless: true,
            verbose: true,
            max_concurrent: Some(7),
            ..args(&PathBuf::from("."))
        };

        apply_overrides(&mut config, &args);

        assert!(!config.capture.session.headless);
        assert!(!config.report.enabled);
        assert_eq!(config.capture.max_concurrent, 7);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_missing_env_file_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!load_env(&dir.path().join(".env")).unwrap());
    }

    #[test]
    fn test_env_file_outcome_is_returned() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(&path, "CHARTFLOW_LOADER_TEST_VAR=from-file\n").unwrap();

        assert!(load_env(&path).unwrap());
        assert_eq!(std::env::var("CHARTFLOW_LOADER_TEST_VAR").unwrap(), "from-file");

        std::fs::write(&path, "this is not an assignment\n").unwrap();
        assert!(load_env(&path).is_err());
    }
}
