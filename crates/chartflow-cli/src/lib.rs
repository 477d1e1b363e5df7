//! # Chartflow CLI
//!
//! Driver for the `chartflow` binary: argument parsing, configuration and
//! ticker loading, logging setup, interrupt handling and the console
//! summary. Exit codes are `0` for a completed run (even with per-ticker
//! failures), `1` for fatal errors and `130` after an interrupt.

pub mod app;
pub mod args;
pub mod loader;
pub mod logging;
pub mod summary;

pub use app::{execute, run, EXIT_FAILURE, EXIT_INTERRUPTED, EXIT_OK};
pub use args::{command, CliArgs};
