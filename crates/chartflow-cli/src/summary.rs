//! Console summary printed after a run

use chartflow_core::{AnalysisResult, PipelineRunResult, Signal};
use std::fmt::Write as _;

const RULE: &str = "============================================================";
const RESET: &str = "\x1b[0m";
const SUMMARY_CHARS: usize = 100;

fn signal_color(signal: Signal) -> &'static str {
    match signal {
        Signal::Buy => "\x1b[92m",
        Signal::Sell => "\x1b[91m",
        Signal::Hold => "\x1b[93m",
    }
}

fn write_entry(out: &mut String, result: &AnalysisResult, color: bool) {
    let rec = &result.recommendation;
    let signal = if color {
        format!("{}{}{RESET}", signal_color(rec.signal), rec.signal)
    } else {
        rec.signal.to_string()
    };
    let summary: String = result.summary.chars().take(SUMMARY_CHARS).collect();

    let _ = writeln!(out, "\n{}:", result.symbol);
    let _ = writeln!(out, "  Signal: {signal} (Confidence: {})", rec.confidence);
    let _ = writeln!(out, "  Trend: {}", result.primary_trend);
    let _ = writeln!(out, "  Summary: {summary}...");
}

/// Render the per-symbol summary, or `None` when nothing was analyzed
#[must_use]
pub fn render(result: &PipelineRunResult, color: bool) -> Option<String> {
    if result.results().is_empty() {
        return None;
    }

    let mut out = format!("\n{RULE}\nANALYSIS SUMMARY\n{RULE}\n");
    for entry in result.results() {
        write_entry(&mut out, entry, color);
    }
    let _ = write!(
        out,
        "\n{RULE}\n{} analyzed, {} error(s)\n",
        result.results().len(),
        result.errors().len()
    );
    Some(out)
}
