//! Lenient parsing of vision-analysis responses
//!
//! Model output is free text that usually contains one JSON object. The span
//! from the first `{` to the last `}` is parsed and every field is read
//! leniently. When no usable object exists the caller still gets a uniform
//! [`AnalysisResult`] via [`degraded_result`].

use crate::types::{
    AnalysisResult, ChartPattern, Confidence, Divergence, Recommendation, RsiReading, RsiZone,
    Signal, Trend, VolumeAssessment,
};
use serde_json::{Map, Value};
use std::sync::OnceLock;

/// Characters of raw text kept as the summary of a degraded result
pub const DEGRADED_SUMMARY_CHARS: usize = 500;

/// Reasoning attached to a degraded result
pub const DEGRADED_REASONING: &str = "Unable to parse analysis";

fn number_pattern() -> &'static regex::Regex {
    static PATTERN: OnceLock<regex::Regex> = OnceLock::new();
    PATTERN.get_or_init(|| regex::Regex::new(r"-?\d+(?:\.\d+)?").expect("number pattern is valid"))
}

/// Parse a raw response into a structured result
///
/// `symbol` always wins over any symbol the model reports. Never fails:
/// unparseable input yields [`degraded_result`], which callers can spot
/// with [`AnalysisResult::is_degraded`].
#[must_use]
pub fn parse_analysis(raw: &str, symbol: &str) -> AnalysisResult {
    match extract_object(raw) {
        Some(object) => from_object(&object, raw, symbol),
        None => degraded_result(raw, symbol),
    }
}

/// Uniform fallback for a response with no usable JSON object
#[must_use]
pub fn degraded_result(raw: &str, symbol: &str) -> AnalysisResult {
    AnalysisResult {
        symbol: symbol.to_string(),
        analysis_date: String::new(),
        primary_trend: Trend::Unknown,
        secondary_trend: Trend::Unknown,
        patterns_identified: Vec::new(),
        support_levels: Vec::new(),
        resistance_levels: Vec::new(),
        volume_assessment: VolumeAssessment::Unknown,
        rsi: RsiReading::default(),
        recommendation: Recommendation {
            signal: Signal::Hold,
            confidence: Confidence::Low,
            reasoning: DEGRADED_REASONING.to_string(),
        },
        key_observations: Vec::new(),
        summary: raw.chars().take(DEGRADED_SUMMARY_CHARS).collect(),
        raw_response: raw.to_string(),
    }
}

impl AnalysisResult {
    /// Whether this is the fallback for an unparseable response
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.primary_trend == Trend::Unknown && self.recommendation.reasoning == DEGRADED_REASONING
    }
}

fn extract_object(raw: &str) -> Option<Map<String, Value>> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end < start {
        return None;
    }
    match serde_json::from_str::<Value>(&raw[start..=end]) {
        Ok(Value::Object(object)) => Some(object),
        Ok(_) => None,
        Err(e) => {
            tracing::debug!(error = %e, "analysis response JSON did not parse");
            None
        }
    }
}

fn from_object(object: &Map<String, Value>, raw: &str, symbol: &str) -> AnalysisResult {
    let recommendation = object
        .get("recommendation")
        .and_then(Value::as_object)
        .map(read_recommendation)
        .unwrap_or_default();

    AnalysisResult {
        symbol: symbol.to_string(),
        analysis_date: read_string(object.get("analysis_date")).unwrap_or_default(),
        primary_trend: read_label(object.get("primary_trend"), Trend::from_label, Trend::Neutral),
        secondary_trend: read_label(object.get("secondary_trend"), Trend::from_label, Trend::Neutral),
        patterns_identified: read_patterns(object.get("patterns_identified")),
        support_levels: read_levels(object.get("support_levels")),
        resistance_levels: read_levels(object.get("resistance_levels")),
        volume_assessment: read_label(
            object.get("volume_assessment"),
            VolumeAssessment::from_label,
            VolumeAssessment::Neutral,
        ),
        rsi: object
            .get("rsi")
            .and_then(Value::as_object)
            .map(read_rsi)
            .unwrap_or_default(),
        recommendation,
        key_observations: read_strings(object.get("key_observations")),
        summary: read_string(object.get("summary")).unwrap_or_default(),
        raw_response: raw.to_string(),
    }
}

fn read_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

/// Absent, null or unrecognised labels take `absent`
fn read_label<T: Copy>(value: Option<&Value>, lookup: fn(&str) -> Option<T>, absent: T) -> T {
    value
        .and_then(Value::as_str)
        .and_then(lookup)
        .unwrap_or(absent)
}

fn read_number(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let cleaned = s.replace([',', '$'], "");
            number_pattern()
                .find(&cleaned)
                .and_then(|m| m.as_str().parse::<f64>().ok())
        }
        _ => None,
    };
    number.filter(|n| n.is_finite())
}

fn read_levels(value: Option<&Value>) -> Vec<f64> {
    match value {
        Some(Value::Array(items)) => items.iter().filter_map(read_number).collect(),
        Some(single) => read_number(single).into_iter().collect(),
        None => Vec::new(),
    }
}

fn read_strings(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| read_string(Some(item)))
            .filter(|s| !s.is_empty())
            .collect(),
        Some(Value::String(s)) if !s.trim().is_empty() => vec![s.trim().to_string()],
        _ => Vec::new(),
    }
}

fn read_patterns(value: Option<&Value>) -> Vec<ChartPattern> {
    let Some(Value::Array(items)) = value else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match item {
            Value::String(name) if !name.trim().is_empty() => Some(ChartPattern {
                pattern: name.trim().to_string(),
                kind: None,
                implication: None,
                completion: None,
            }),
            Value::Object(fields) => {
                let pattern = read_string(fields.get("pattern")).filter(|p| !p.is_empty())?;
                Some(ChartPattern {
                    pattern,
                    kind: read_string(fields.get("type")).map(|s| s.to_uppercase()),
                    implication: read_string(fields.get("implication")).map(|s| s.to_uppercase()),
                    completion: read_string(fields.get("completion")).map(|s| s.to_uppercase()),
                })
            }
            _ => None,
        })
        .collect()
}

fn read_rsi(fields: &Map<String, Value>) -> RsiReading {
    RsiReading {
        value: fields.get("value").and_then(read_number),
        zone: fields
            .get("zone")
            .and_then(Value::as_str)
            .and_then(RsiZone::from_label),
        divergence: fields
            .get("divergence")
            .and_then(Value::as_str)
            .and_then(Divergence::from_label),
    }
}

fn read_recommendation(fields: &Map<String, Value>) -> Recommendation {
    let defaults = Recommendation::default();
    Recommendation {
        signal: read_label(fields.get("signal"), Signal::from_label, defaults.signal),
        confidence: read_label(fields.get("confidence"), Confidence::from_label, defaults.confidence),
        reasoning: read_string(fields.get("reasoning")).unwrap_or_default(),
    }
}
