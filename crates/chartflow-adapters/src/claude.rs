//! Anthropic messages API vision analyzer
//!
//! Sends every readable artifact as a labelled base64 image block, followed
//! by the symbol and the analysis prompt, then parses the text reply with
//! [`chartflow_core::parse_analysis`].

use async_trait::async_trait;
use base64::Engine as _;
use chartflow_core::{
    parse_analysis, AnalysisError, AnalysisResult, AnalysisSettings, ArtifactSet, ConfigError,
    VisionAnalyzer,
};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Characters of an error body kept in error messages
const ERROR_BODY_CHARS: usize = 300;

/// Instructions sent after the chart images
pub const ANALYSIS_PROMPT: &str = r#"You are a technical analyst working in the classical Edwards & Magee tradition ("Technical Analysis of Stock Trends", 5th edition). The images above are charts of one stock: daily and weekly candlesticks with RSI, and daily and weekly Point & Figure charts. Read them together.

Assess:
1. Trend, following Dow Theory: the primary trend (months to years) and the secondary trend (weeks to months), with any trendlines or channels.
2. Classical patterns. Reversal: head and shoulders (regular and inverse), double and triple tops or bottoms, rounding tops and bottoms, V-formations. Continuation: symmetrical, ascending and descending triangles, rectangles, flags, pennants, wedges.
3. Support and resistance from prior lows and highs, including breakouts. Use the Point & Figure charts for key levels and price objectives.
4. Volume: does it confirm price? Breakouts need expanding volume.
5. RSI: current value, zone (overbought above 70, oversold below 30) and any divergence with price.
6. A recommendation: BUY, SELL or HOLD, with HIGH, MEDIUM or LOW confidence and a short reason.

Reply with one JSON object shaped like this:
```json
{
  "symbol": "TICKER",
  "analysis_date": "YYYY-MM-DD",
  "primary_trend": "BULLISH|BEARISH|NEUTRAL",
  "secondary_trend": "BULLISH|BEARISH|NEUTRAL",
  "patterns_identified": [
    {"pattern": "Pattern Name", "type": "REVERSAL|CONTINUATION", "implication": "BULLISH|BEARISH", "completion": "FORMING|COMPLETE|BROKEN"}
  ],
  "support_levels": [123.45],
  "resistance_levels": [130.0],
  "volume_assessment": "CONFIRMING|DIVERGING|NEUTRAL",
  "rsi": {"value": 55, "zone": "NEUTRAL|OVERBOUGHT|OVERSOLD", "divergence": "NONE|BULLISH|BEARISH"},
  "recommendation": {"signal": "BUY|SELL|HOLD", "confidence": "HIGH|MEDIUM|LOW", "reasoning": "Brief explanation"},
  "key_observations": ["Observation 1", "Observation 2"],
  "summary": "Two or three sentences an investor can act on."
}
```"#;

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: &'static str,
    content: Vec<ContentBlock>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ContentBlock {
    Text { text: String },
    Image { source: ImageSource },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct ImageSource {
    #[serde(rename = "type")]
    kind: &'static str,
    media_type: &'static str,
    data: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ResponseBlock>,
}

#[derive(Debug, Deserialize)]
struct ResponseBlock {
    #[serde(rename = "type")]
    kind: String,
    text: Option<String>,
}

/// Vision analyzer calling the Anthropic messages API
pub struct ClaudeVisionAnalyzer {
    client: reqwest::Client,
    api_key: String,
    settings: AnalysisSettings,
}

impl ClaudeVisionAnalyzer {
    /// Create new analyzer
    ///
    /// # Errors
    /// - `ConfigError::Invalid` if the HTTP client cannot be built
    pub fn new(settings: AnalysisSettings, api_key: impl Into<String>) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout())
            .build()
            .map_err(|e| ConfigError::invalid("analysis", format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            settings,
        })
    }

    async fn request_body(&self, artifacts: &ArtifactSet, symbol: &str) -> Result<Vec<ContentBlock>, AnalysisError> {
        let mut content = Vec::new();

        for (variant, path) in artifacts.iter() {
            let bytes = match tokio::fs::read(path).await {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    tracing::warn!(symbol, path = %path.display(), "artifact missing, skipping");
                    continue;
                }
                Err(e) => {
                    return Err(AnalysisError::Artifact(format!("{}: {e}", path.display())))
                }
            };
            content.push(ContentBlock::Text {
                text: format!("{}:", variant.caption()),
            });
            content.push(ContentBlock::Image {
                source: ImageSource {
                    kind: "base64",
                    media_type: media_type(&bytes),
                    data: base64::engine::general_purpose::STANDARD.encode(&bytes),
                },
            });
        }

        if content.is_empty() {
            return Err(AnalysisError::Artifact(format!(
                "none of the {} artifact(s) for {symbol} could be read",
                artifacts.len()
            )));
        }

        content.push(ContentBlock::Text {
            text: format!("Stock Symbol: {symbol}\n\n{ANALYSIS_PROMPT}"),
        });
        Ok(content)
    }

    fn transport_error(&self, error: reqwest::Error) -> AnalysisError {
        if error.is_timeout() {
            AnalysisError::Timeout {
                timeout_secs: self.settings.timeout_secs,
            }
        } else {
            AnalysisError::Transient(error.to_string())
        }
    }
}

#[async_trait]
impl VisionAnalyzer for ClaudeVisionAnalyzer {
    async fn analyze(&self, artifacts: &ArtifactSet, symbol: &str) -> Result<AnalysisResult, AnalysisError> {
        tracing::info!(symbol, charts = artifacts.len(), "analyzing charts");
        let content = self.request_body(artifacts, symbol).await?;

        let request = MessagesRequest {
            model: &self.settings.model,
            max_tokens: self.settings.max_tokens,
            messages: vec![Message {
                role: "user",
                content,
            }],
        };

        let response = self
            .client
            .post(&self.settings.api_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let reply: MessagesResponse = response
            .json()
            .await
            .map_err(|e| AnalysisError::Transient(format!("unreadable response envelope: {e}")))?;
        let text = reply
            .content
            .iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text.as_deref())
            .collect::<Vec<_>>()
            .join("\n");

        tracing::debug!(
            symbol,
            "response: {}...",
            text.chars().take(200).collect::<String>()
        );
        Ok(parse_analysis(&text, symbol))
    }
}

/// Map a non-success status to an analysis error
pub(crate) fn classify_status(status: StatusCode, body: &str) -> AnalysisError {
    let message: String = body.chars().take(ERROR_BODY_CHARS).collect();
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => AnalysisError::Auth(message),
        StatusCode::TOO_MANY_REQUESTS | StatusCode::REQUEST_TIMEOUT => {
            AnalysisError::Transient(format!("HTTP {status}: {message}"))
        }
        s if s.is_server_error() => {
            AnalysisError::Transient(format!("HTTP {status}: {message}"))
        }
        s => AnalysisError::Rejected {
            status: s.as_u16(),
            message,
        },
    }
}

/// Sniff the image format, defaulting to PNG
fn media_type(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(b"\x89PNG") {
        "image/png"
    } else if bytes.starts_with(b"GIF8") {
        "image/gif"
    } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        "image/jpeg"
    } else if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        "image/webp"
    } else {
        "image/png"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_server::{closed_port_url, Canned, Route, TestServer};
    use chartflow_core::{ChartVariant, Confidence, Retryable, Signal, Trend};
    use pretty_assertions::assert_eq;
    use std::path::Path;

    fn settings(api_url: String) -> AnalysisSettings {
        AnalysisSettings {
            api_url,
            ..AnalysisSettings::default()
        }
    }

    fn write_chart(dir: &Path, symbol: &str, variant: ChartVariant) -> std::path::PathBuf {
        let path = variant.artifact_path(dir, symbol);
        std::fs::write(&path, b"\x89PNG\r\n\x1a\nchart").unwrap();
        path
    }

    fn reply(text: &str) -> Canned {
        let body = serde_json::json!({
            "id": "msg_01",
            "type": "message",
            "role": "assistant",
            "model": "claude-sonnet-4-20250514",
            "content": [{"type": "text", "text": text}],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 10, "output_tokens": 20}
        });
        Canned::new(200, "application/json", body.to_string())
    }

    #[test]
    fn test_classify_status() {
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, "bad key"),
            AnalysisError::Auth(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::FORBIDDEN, ""),
            AnalysisError::Auth(_)
        ));
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS, "").is_retryable());
        assert!(classify_status(StatusCode::INTERNAL_SERVER_ERROR, "").is_retryable());
        assert!(classify_status(StatusCode::from_u16(529).unwrap(), "overloaded").is_retryable());
        assert_eq!(
            classify_status(StatusCode::BAD_REQUEST, "image too large"),
            AnalysisError::Rejected {
                status: 400,
                message: "image too large".into()
            }
        );
    }

    #[test]
    fn test_media_type_sniffing() {
        assert_eq!(media_type(b"\x89PNG\r\n"), "image/png");
        assert_eq!(media_type(b"GIF89a"), "image/gif");
        assert_eq!(media_type(&[0xFF, 0xD8, 0xFF, 0xE0]), "image/jpeg");
        assert_eq!(media_type(b"unknown"), "image/png");
    }

    #[tokio::test]
    async fn test_request_labels_present_charts_only() {
        let dir = tempfile::tempdir().unwrap();
        let artifacts = ArtifactSet::new()
            .with(ChartVariant::Daily, write_chart(dir.path(), "AAPL", ChartVariant::Daily))
            .with(ChartVariant::PnfWeekly, write_chart(dir.path(), "AAPL", ChartVariant::PnfWeekly))
            .with(ChartVariant::Weekly, dir.path().join("AAPL_weekly.png"));
        let analyzer = ClaudeVisionAnalyzer::new(AnalysisSettings::default(), "key").unwrap();

        let content = analyzer.request_body(&artifacts, "AAPL").await.unwrap();

        let labels: Vec<&str> = content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                ContentBlock::Image { .. } => None,
            })
            .collect();
        assert_eq!(labels.len(), 3);
        assert_eq!(labels[0], "DAILY CHART:");
        assert_eq!(labels[1], "POINT & FIGURE WEEKLY CHART:");
        assert!(labels[2].starts_with("Stock Symbol: AAPL\n\n"));
        assert_eq!(content.len(), 5);
    }

    #[tokio::test]
    async fn test_unreadable_artifacts_fail() {
        let dir = tempfile::tempdir().unwrap();
        let artifacts = ArtifactSet::new().with(ChartVariant::Daily, dir.path().join("gone.png"));
        let analyzer = ClaudeVisionAnalyzer::new(AnalysisSettings::default(), "key").unwrap();

        let err = analyzer.request_body(&artifacts, "AAPL").await.unwrap_err();

        assert!(matches!(err, AnalysisError::Artifact(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_analyze_parses_reply_and_sends_headers() {
        let server = TestServer::start(vec![Route::new(
            "/v1/messages",
            reply(r#"Analysis: {"primary_trend": "BULLISH", "recommendation": {"signal": "BUY", "confidence": "HIGH"}}"#),
        )])
        .await;
        let dir = tempfile::tempdir().unwrap();
        let artifacts = ArtifactSet::new()
            .with(ChartVariant::Daily, write_chart(dir.path(), "NVDA", ChartVariant::Daily));
        let analyzer =
            ClaudeVisionAnalyzer::new(settings(server.url("/v1/messages")), "sk-test").unwrap();

        let result = analyzer.analyze(&artifacts, "NVDA").await.unwrap();

        assert_eq!(result.symbol, "NVDA");
        assert_eq!(result.primary_trend, Trend::Bullish);
        assert_eq!(result.recommendation.signal, Signal::Buy);
        assert_eq!(result.recommendation.confidence, Confidence::High);

        let requests = server.requests().await;
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, "POST");
        assert_eq!(requests[0].header("x-api-key"), Some("sk-test"));
        assert_eq!(requests[0].header("anthropic-version"), Some(ANTHROPIC_VERSION));
        let body = requests[0].json();
        assert_eq!(body["model"], "claude-sonnet-4-20250514");
        assert_eq!(body["max_tokens"], 2000);
        assert_eq!(body["messages"][0]["content"][1]["source"]["media_type"], "image/png");
    }

    #[tokio::test]
    async fn test_unstructured_reply_degrades() {
        let server =
            TestServer::start(vec![Route::new("/v1/messages", reply("I can't read these charts."))])
                .await;
        let dir = tempfile::tempdir().unwrap();
        let artifacts = ArtifactSet::new()
            .with(ChartVariant::Daily, write_chart(dir.path(), "X", ChartVariant::Daily));
        let analyzer = ClaudeVisionAnalyzer::new(settings(server.url("/v1/messages")), "k").unwrap();

        let result = analyzer.analyze(&artifacts, "X").await.unwrap();

        assert_eq!(result.recommendation.signal, Signal::Hold);
        assert_eq!(result.recommendation.confidence, Confidence::Low);
        assert_eq!(result.summary, "I can't read these charts.");
    }

    #[tokio::test]
    async fn test_rate_limit_is_transient() {
        let server = TestServer::start(vec![Route::new(
            "/v1/messages",
            Canned::new(429, "application/json", r#"{"type":"error"}"#),
        )])
        .await;
        let dir = tempfile::tempdir().unwrap();
        let artifacts = ArtifactSet::new()
            .with(ChartVariant::Daily, write_chart(dir.path(), "X", ChartVariant::Daily));
        let analyzer = ClaudeVisionAnalyzer::new(settings(server.url("/v1/messages")), "k").unwrap();

        let err = analyzer.analyze(&artifacts, "X").await.unwrap_err();

        assert!(matches!(err, AnalysisError::Transient(_)));
    }

    #[tokio::test]
    async fn test_connection_refused_is_transient() {
        let dir = tempfile::tempdir().unwrap();
        let artifacts = ArtifactSet::new()
            .with(ChartVariant::Daily, write_chart(dir.path(), "X", ChartVariant::Daily));
        let analyzer =
            ClaudeVisionAnalyzer::new(settings(closed_port_url("/v1/messages").await), "k").unwrap();

        let err = analyzer.analyze(&artifacts, "X").await.unwrap_err();

        assert!(err.is_retryable());
    }
}
