//! Command line arguments

use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;

/// Default configuration file
pub const DEFAULT_CONFIG: &str = "config/config.yaml";
/// Default ticker list
pub const DEFAULT_TICKERS: &str = "config/tickers.yaml";
/// Default dotenv file
pub const DEFAULT_ENV: &str = "config/.env";

/// Parsed command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliArgs {
    /// Explicit tickers, replacing the configured list
    pub tickers: Vec<String>,
    pub no_report: bool,
    pub no_headless: bool,
    pub dry_run: bool,
    pub verbose: bool,
    /// Capture-tier permit count
    pub max_concurrent: Option<usize>,
    pub config: PathBuf,
    pub tickers_file: PathBuf,
    pub env_file: PathBuf,
}

/// Build the `chartflow` command
#[must_use]
pub fn command() -> Command {
    Command::new("chartflow")
        .version(chartflow_core::VERSION)
        .about("Capture stock charts, analyze them with a vision model and report the signals")
        .after_help(
            "Examples:\n  chartflow                      Analyze all configured tickers\n  chartflow -t AAPL              Analyze a single ticker\n  chartflow -t AAPL NVDA GOOG    Analyze several tickers\n  chartflow --dry-run            Capture charts only\n  chartflow --no-report          Analyze without sending the report",
        )
        .arg(
            Arg::new("ticker")
                .short('t')
                .long("ticker")
                .num_args(1..)
                .action(ArgAction::Append)
                .help("Analyze specific ticker(s) instead of the configured list"),
        )
        .arg(
            Arg::new("no-report")
                .long("no-report")
                .visible_alias("no-email")
                .action(ArgAction::SetTrue)
                .help("Skip report delivery"),
        )
        .arg(
            Arg::new("no-headless")
                .long("no-headless")
                .action(ArgAction::SetTrue)
                .help("Show the browser window (browser-backed sessions only; ignored by the HTTP session)"),
        )
        .arg(
            Arg::new("dry-run")
                .long("dry-run")
                .action(ArgAction::SetTrue)
                .help("Capture charts only, skip analysis and report"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue)
                .help("Enable debug logging"),
        )
        .arg(
            Arg::new("max-concurrent")
                .long("max-concurrent")
                .value_parser(value_parser!(usize))
                .help("Maximum tickers captured at once (default: 3)"),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .default_value(DEFAULT_CONFIG)
                .value_parser(value_parser!(PathBuf))
                .help("Configuration file"),
        )
        .arg(
            Arg::new("tickers-file")
                .long("tickers-file")
                .default_value(DEFAULT_TICKERS)
                .value_parser(value_parser!(PathBuf))
                .help("Ticker list file"),
        )
        .arg(
            Arg::new("env-file")
                .long("env-file")
                .default_value(DEFAULT_ENV)
                .value_parser(value_parser!(PathBuf))
                .help("Dotenv file with credentials"),
        )
}

impl CliArgs {
    /// Read arguments out of matches produced by [`command`]
    #[must_use]
    pub fn from_matches(matches: &ArgMatches) -> Self {
        let path = |id: &str| {
            matches
                .get_one::<PathBuf>(id)
                .cloned()
                .unwrap_or_default()
        };
        Self {
            tickers: matches
                .get_many::<String>("ticker")
                .map(|values| values.cloned().collect())
                .unwrap_or_default(),
            no_report: matches.get_flag("no-report"),
            no_headless: matches.get_flag("no-headless"),
            dry_run: matches.get_flag("dry-run"),
            verbose: matches.get_flag("verbose"),
            max_concurrent: matches.get_one::<usize>("max-concurrent").copied(),
            config: path("config"),
            tickers_file: path("tickers-file"),
            env_file: path("env-file"),
        }
    }

    /// Parse an argument list, first item being the program name
    ///
    /// # Errors
    /// - `clap::Error` on unknown flags or bad values
    pub fn try_parse_from<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let matches = command().try_get_matches_from(args)?;
        Ok(Self::from_matches(&matches))
    }
}
