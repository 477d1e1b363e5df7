//! Observability sink
//!
//! Every phase transition, retry and per-job failure is reported as a
//! [`PipelineEvent`] through an [`ObservabilitySink`]. The production sink
//! forwards to `tracing`; [`MemorySink`] records events for inspection.

use crate::types::Phase;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Event severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    /// Progress
    Info,
    /// Recoverable failure
    Warn,
    /// Job or phase failure
    Error,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
        })
    }
}

/// Structured event emitted during a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineEvent {
    pub level: Level,
    pub phase: Phase,
    /// Ticker the event concerns, if any
    pub symbol: Option<String>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl PipelineEvent {
    /// Create new event stamped now
    #[must_use]
    pub fn new(level: Level, phase: Phase, symbol: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            level,
            phase,
            symbol: symbol.map(str::to_owned),
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Destination for pipeline events
pub trait ObservabilitySink: Send + Sync {
    /// Record one event
    fn emit(&self, event: PipelineEvent);

    /// Record an info event
    fn info(&self, phase: Phase, symbol: Option<&str>, message: String) {
        self.emit(PipelineEvent::new(Level::Info, phase, symbol, message));
    }

    /// Record a warning
    fn warn(&self, phase: Phase, symbol: Option<&str>, message: String) {
        self.emit(PipelineEvent::new(Level::Warn, phase, symbol, message));
    }

    /// Record an error
    fn error(&self, phase: Phase, symbol: Option<&str>, message: String) {
        self.emit(PipelineEvent::new(Level::Error, phase, symbol, message));
    }
}

/// Forwards events to `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl ObservabilitySink for TracingSink {
    fn emit(&self, event: PipelineEvent) {
        let phase = event.phase.as_str();
        let symbol = event.symbol.as_deref().unwrap_or("-");
        match event.level {
            Level::Info => tracing::info!(phase, symbol, "{}", event.message),
            Level::Warn => tracing::warn!(phase, symbol, "{}", event.message),
            Level::Error => tracing::error!(phase, symbol, "{}", event.message),
        }
    }
}

/// In-memory event recorder
#[derive(Debug, Default)]
pub struct MemorySink {
    inner: Mutex<Vec<PipelineEvent>>,
}

impl MemorySink {
    /// Create empty sink
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all recorded events
    pub fn events(&self) -> Vec<PipelineEvent> {
        self.inner.lock().clone()
    }

    /// Number of events at `level`
    pub fn count(&self, level: Level) -> usize {
        self.inner.lock().iter().filter(|e| e.level == level).count()
    }

    /// Events concerning one symbol
    pub fn for_symbol(&self, symbol: &str) -> Vec<PipelineEvent> {
        self.inner
            .lock()
            .iter()
            .filter(|e| e.symbol.as_deref() == Some(symbol))
            .cloned()
            .collect()
    }

    /// Whether any event message contains `needle`
    pub fn contains(&self, needle: &str) -> bool {
        self.inner.lock().iter().any(|e| e.message.contains(needle))
    }

    /// Drop recorded events
    pub fn clear(&self) {
        self.inner.lock().clear();
    }
}

impl ObservabilitySink for MemorySink {
    fn emit(&self, event: PipelineEvent) {
        self.inner.lock().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_sink_records_in_order() {
        let sink = MemorySink::new();
        sink.info(Phase::Capture, None, "starting".into());
        sink.warn(Phase::Capture, Some("AAPL"), "retrying".into());
        sink.error(Phase::Analyze, Some("AAPL"), "gave up".into());

        let events = sink.events();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].message, "starting");
        assert_eq!(events[2].phase, Phase::Analyze);
        assert_eq!(sink.count(Level::Warn), 1);
        assert_eq!(sink.for_symbol("AAPL").len(), 2);
        assert!(sink.contains("gave"));
    }

    #[test]
    fn memory_sink_clear() {
        let sink = MemorySink::new();
        sink.info(Phase::Persist, None, "saved".into());
        sink.clear();
        assert!(sink.events().is_empty());
    }

    #[test]
    fn tracing_sink_accepts_every_level() {
        let sink = TracingSink;
        sink.info(Phase::Report, None, "sent".into());
        sink.warn(Phase::Report, Some("X"), "slow".into());
        sink.error(Phase::Report, None, "failed".into());
    }
}
