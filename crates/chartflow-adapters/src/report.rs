//! HTML report rendering and webhook delivery

use async_trait::async_trait;
use base64::Engine as _;
use chartflow_core::config::SYMBOL_PLACEHOLDER;
use chartflow_core::{
    AnalysisResult, ArtifactSet, Confidence, Divergence, ReportError, ReportSettings, Reporter,
    Signal,
};
use chrono::{DateTime, NaiveDate, Utc};
use indexmap::IndexMap;
use serde::Serialize;
use std::fmt::Write as _;

const NOT_AVAILABLE: &str = "N/A";

/// Subject line for the report of `date`
#[must_use]
pub fn report_subject(prefix: &str, date: NaiveDate) -> String {
    format!("{prefix} Daily Report - {}", date.format("%Y-%m-%d"))
}

fn signal_color(signal: Signal) -> &'static str {
    match signal {
        Signal::Buy => "#28a745",
        Signal::Sell => "#dc3545",
        Signal::Hold => "#ffc107",
    }
}

fn confidence_color(confidence: Confidence) -> &'static str {
    match confidence {
        Confidence::High => "#28a745",
        Confidence::Medium => "#ffc107",
        Confidence::Low => "#dc3545",
    }
}

/// Escape text for HTML element content and attribute values
pub(crate) fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

/// `$1,234.50` style price
pub(crate) fn format_price(value: f64) -> String {
    let fixed = format!("{:.2}", value.abs());
    let (whole, cents) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));

    let mut grouped = String::new();
    for (i, digit) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }

    let sign = if value < 0.0 { "-" } else { "" };
    format!("{sign}${grouped}.{cents}")
}

fn format_levels(levels: &[f64]) -> String {
    if levels.is_empty() {
        return NOT_AVAILABLE.to_string();
    }
    levels
        .iter()
        .map(|level| format_price(*level))
        .collect::<Vec<_>>()
        .join(", ")
}

fn rsi_line(result: &AnalysisResult) -> String {
    let rsi = &result.rsi;
    let value = rsi
        .value
        .map_or_else(|| NOT_AVAILABLE.to_string(), |v| format!("{v:.1}"));
    let zone = rsi.zone.map_or(NOT_AVAILABLE, |z| z.as_str());
    let mut line = format!("{value} ({zone})");
    if let Some(divergence) = rsi.divergence.filter(|d| *d != Divergence::Absent) {
        let _ = write!(line, " - {divergence} divergence");
    }
    line
}

fn live_link(template: &str, symbol: &str) -> String {
    template.replace(SYMBOL_PLACEHOLDER, symbol)
}

fn render_section(out: &mut String, result: &AnalysisResult, artifacts: Option<&ArtifactSet>, settings: &ReportSettings) {
    let rec = &result.recommendation;
    let symbol = escape(&result.symbol);

    let _ = write!(
        out,
        r#"<div class="stock">
<h2>{symbol} <span class="signal" style="background:{signal_bg}">{signal}</span> <span class="badge" style="background:{conf_bg}">{confidence}</span></h2>
"#,
        signal_bg = signal_color(rec.signal),
        signal = rec.signal,
        conf_bg = confidence_color(rec.confidence),
        confidence = rec.confidence,
    );
    if !rec.reasoning.is_empty() {
        let _ = writeln!(out, "<p class=\"reasoning\">{}</p>", escape(&rec.reasoning));
    }

    let _ = write!(
        out,
        "<h3>Trend Analysis</h3>\n<ul>\n<li>Primary trend: {}</li>\n<li>Secondary trend: {}</li>\n<li>Volume: {}</li>\n<li>RSI: {}</li>\n</ul>\n",
        result.primary_trend,
        result.secondary_trend,
        result.volume_assessment,
        escape(&rsi_line(result)),
    );

    let _ = write!(
        out,
        "<h3>Key Levels</h3>\n<ul>\n<li>Support: {}</li>\n<li>Resistance: {}</li>\n</ul>\n",
        format_levels(&result.support_levels),
        format_levels(&result.resistance_levels),
    );

    out.push_str("<h3>Chart Patterns</h3>\n<ul>\n");
    if result.patterns_identified.is_empty() {
        out.push_str("<li>No significant patterns identified</li>\n");
    }
    for pattern in &result.patterns_identified {
        let mut line = escape(&pattern.pattern);
        if let Some(implication) = &pattern.implication {
            let _ = write!(line, " ({})", escape(implication));
        }
        if let Some(completion) = &pattern.completion {
            let _ = write!(line, " - {}", escape(completion));
        }
        let _ = writeln!(out, "<li>{line}</li>");
    }
    out.push_str("</ul>\n");

    if !result.key_observations.is_empty() {
        out.push_str("<h3>Key Observations</h3>\n<ul>\n");
        for observation in &result.key_observations {
            let _ = writeln!(out, "<li>{}</li>", escape(observation));
        }
        out.push_str("</ul>\n");
    }

    let _ = writeln!(out, "<div class=\"summary\">{}</div>", escape(&result.summary));

    if let Some(artifacts) = artifacts.filter(|a| !a.is_empty()) {
        let names: Vec<String> = artifacts
            .iter()
            .filter_map(|(_, path)| path.file_name())
            .map(|name| escape(&name.to_string_lossy()))
            .collect();
        let _ = writeln!(out, "<p class=\"charts\">Charts: {}</p>", names.join(", "));
    }

    let _ = write!(
        out,
        "<p class=\"links\"><a href=\"{}\">Live chart</a> | <a href=\"{}\">Point &amp; Figure</a></p>\n</div>\n",
        escape(&live_link(&settings.chart_page_url, &result.symbol)),
        escape(&live_link(&settings.pnf_page_url, &result.symbol)),
    );
}

/// Render the full HTML report
///
/// One section per result in the given order, followed by a summary table.
#[must_use]
pub fn render_html(
    results: &[AnalysisResult],
    artifacts: &IndexMap<String, ArtifactSet>,
    settings: &ReportSettings,
    generated_at: DateTime<Utc>,
) -> String {
    let title = escape(&report_subject(&settings.subject_prefix, generated_at.date_naive()));
    let mut out = format!(
        r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>{title}</title>
<style>
body {{ font-family: Arial, sans-serif; max-width: 900px; margin: 0 auto; color: #333; }}
.stock {{ border: 1px solid #ddd; border-radius: 8px; padding: 16px; margin: 16px 0; }}
.signal, .badge {{ color: #fff; padding: 2px 8px; border-radius: 4px; font-size: 0.8em; }}
.summary {{ background: #f8f9fa; border-left: 4px solid #007bff; padding: 10px; }}
table {{ border-collapse: collapse; width: 100%; }}
th, td {{ border: 1px solid #ddd; padding: 6px; text-align: left; }}
</style>
</head>
<body>
<h1>{title}</h1>
<p>Generated {generated} &middot; {count} stock(s) analyzed</p>
"#,
        generated = generated_at.format("%Y-%m-%d %H:%M UTC"),
        count = results.len(),
    );

    for result in results {
        render_section(&mut out, result, artifacts.get(&result.symbol), settings);
    }

    out.push_str(
        "<h2>Summary</h2>\n<table>\n<tr><th>Symbol</th><th>Trend</th><th>Signal</th><th>Confidence</th></tr>\n",
    );
    for result in results {
        let _ = writeln!(
            out,
            "<tr><td>{}</td><td>{}</td><td style=\"color:{}\">{}</td><td>{}</td></tr>",
            escape(&result.symbol),
            result.primary_trend,
            signal_color(result.recommendation.signal),
            result.recommendation.signal,
            result.recommendation.confidence,
        );
    }
    out.push_str("</table>\n<p><em>Automated technical analysis. Not investment advice.</em></p>\n</body>\n</html>\n");
    out
}

#[derive(Debug, Serialize)]
struct Attachment {
    symbol: String,
    file_name: String,
    data: String,
}

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    subject: String,
    recipients: &'a [String],
    generated_at: DateTime<Utc>,
    html: String,
    attachments: Vec<Attachment>,
}

/// Reporter posting the rendered report to an HTTP endpoint
pub struct WebhookReporter {
    client: reqwest::Client,
    url: String,
    token: Option<String>,
    settings: ReportSettings,
}

impl WebhookReporter {
    /// Create new reporter for `url`
    ///
    /// # Errors
    /// - `ReportError::Delivery` if the HTTP client cannot be built
    pub fn new(url: impl Into<String>, token: Option<String>, settings: ReportSettings) -> Result<Self, ReportError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .map_err(|e| ReportError::Delivery(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: url.into(),
            token,
            settings,
        })
    }

    async fn attachments(&self, results: &[AnalysisResult], artifacts: &IndexMap<String, ArtifactSet>) -> Vec<Attachment> {
        let mut attachments = Vec::new();
        for result in results {
            let Some(set) = artifacts.get(&result.symbol) else {
                continue;
            };
            for (_, path) in set.iter() {
                match tokio::fs::read(path).await {
                    Ok(bytes) => attachments.push(Attachment {
                        symbol: result.symbol.clone(),
                        file_name: path
                            .file_name()
                            .map(|n| n.to_string_lossy().into_owned())
                            .unwrap_or_default(),
                        data: base64::engine::general_purpose::STANDARD.encode(bytes),
                    }),
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "chart not attached");
                    }
                }
            }
        }
        attachments
    }
}

#[async_trait]
impl Reporter for WebhookReporter {
    async fn deliver(
        &self,
        results: &[AnalysisResult],
        artifacts: &IndexMap<String, ArtifactSet>,
    ) -> Result<(), ReportError> {
        let generated_at = Utc::now();
        let html = render_html(results, artifacts, &self.settings, generated_at);

        if let Some(path) = &self.settings.html_file {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| ReportError::Io(format!("{}: {e}", parent.display())))?;
            }
            tokio::fs::write(path, &html)
                .await
                .map_err(|e| ReportError::Io(format!("{}: {e}", path.display())))?;
            tracing::info!(path = %path.display(), "report written");
        }

        let payload = WebhookPayload {
            subject: report_subject(&self.settings.subject_prefix, generated_at.date_naive()),
            recipients: &self.settings.recipients,
            generated_at,
            html,
            attachments: self.attachments(results, artifacts).await,
        };

        let mut request = self.client.post(&self.url).json(&payload);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .await
            .map_err(|e| ReportError::Delivery(e.to_string()))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(ReportError::Delivery(format!("HTTP {status}")));
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ReportError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        tracing::info!(
            recipients = self.settings.recipients.len(),
            stocks = results.len(),
            "report delivered"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_server::{closed_port_url, Canned, Route, TestServer};
    use chartflow_core::{ChartPattern, ChartVariant, RsiReading, RsiZone};
    use chartflow_test_utils::sample_result;
    use pretty_assertions::assert_eq;

    fn generated_at() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-05-01T21:30:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_report_subject() {
        let date = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        assert_eq!(
            report_subject("[Stock Analysis]", date),
            "[Stock Analysis] Daily Report - 2024-05-01"
        );
    }

    #[test]
    fn test_format_price() {
        assert_eq!(format_price(0.5), "$0.50");
        assert_eq!(format_price(123.456), "$123.46");
        assert_eq!(format_price(1234.5), "$1,234.50");
        assert_eq!(format_price(1_234_567.0), "$1,234,567.00");
        assert_eq!(format_price(-42.0), "-$42.00");
    }

    #[test]
    fn test_escape() {
        assert_eq!(escape("<b>\"AT&T\"</b>"), "&lt;b&gt;&quot;AT&amp;T&quot;&lt;/b&gt;");
    }

    #[test]
    fn test_render_sections_in_order_with_table() {
        let mut aapl = sample_result("AAPL", Signal::Buy);
        aapl.patterns_identified = vec![ChartPattern {
            pattern: "Ascending Triangle".into(),
            kind: Some("CONTINUATION".into()),
            implication: Some("BULLISH".into()),
            completion: Some("FORMING".into()),
        }];
        aapl.rsi = RsiReading {
            value: Some(71.24),
            zone: Some(RsiZone::Overbought),
            divergence: Some(Divergence::Bearish),
        };
        let mut msft = sample_result("MSFT", Signal::Sell);
        msft.support_levels.clear();
        msft.summary = "Breakdown <confirmed>".into();

        let artifacts = IndexMap::from([(
            "AAPL".to_string(),
            ArtifactSet::new().with(ChartVariant::Daily, "/tmp/AAPL_daily.png"),
        )]);

        let html = render_html(&[aapl, msft], &artifacts, &ReportSettings::default(), generated_at());

        assert!(html.contains("<title>[Stock Analysis] Daily Report - 2024-05-01</title>"));
        assert!(html.find("<h2>AAPL").unwrap() < html.find("<h2>MSFT").unwrap());
        assert!(html.contains("Ascending Triangle (BULLISH) - FORMING"));
        assert!(html.contains("RSI: 71.2 (OVERBOUGHT) - BEARISH divergence"));
        assert!(html.contains("Support: $100.00, $95.50"));
        assert!(html.contains("Support: N/A"));
        assert!(html.contains("No significant patterns identified"));
        assert!(html.contains("Breakdown &lt;confirmed&gt;"));
        assert!(html.contains("Charts: AAPL_daily.png"));
        assert!(html.contains("https://stockcharts.com/h-sc/ui?s=AAPL"));
        assert!(html.contains("<tr><td>MSFT</td><td>BULLISH</td><td style=\"color:#dc3545\">SELL</td><td>MEDIUM</td></tr>"));
    }

    #[test]
    fn test_neutral_divergence_is_not_shown() {
        let mut result = sample_result("X", Signal::Hold);
        result.rsi = RsiReading {
            value: None,
            zone: Some(RsiZone::Neutral),
            divergence: Some(Divergence::Absent),
        };
        assert_eq!(rsi_line(&result), "N/A (NEUTRAL)");
    }

    #[tokio::test]
    async fn test_deliver_posts_payload_and_writes_html() {
        let server = TestServer::start(vec![Route::new(
            "/hooks/report",
            Canned::new(202, "application/json", "{}"),
        )])
        .await;
        let dir = tempfile::tempdir().unwrap();
        let chart = dir.path().join("AAPL_daily.png");
        std::fs::write(&chart, b"png").unwrap();
        let html_file = dir.path().join("reports").join("latest.html");

        let settings = ReportSettings {
            recipients: vec!["desk@example.com".into()],
            html_file: Some(html_file.clone()),
            ..ReportSettings::default()
        };
        let reporter =
            WebhookReporter::new(server.url("/hooks/report"), Some("secret".into()), settings).unwrap();
        let artifacts = IndexMap::from([(
            "AAPL".to_string(),
            ArtifactSet::new().with(ChartVariant::Daily, &chart),
        )]);

        reporter
            .deliver(&[sample_result("AAPL", Signal::Buy)], &artifacts)
            .await
            .unwrap();

        let requests = server.requests().await;
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].header("authorization"), Some("Bearer secret"));
        let body = requests[0].json();
        assert!(body["subject"]
            .as_str()
            .unwrap()
            .starts_with("[Stock Analysis] Daily Report - "));
        assert_eq!(body["recipients"], serde_json::json!(["desk@example.com"]));
        assert_eq!(body["attachments"][0]["file_name"], "AAPL_daily.png");
        assert_eq!(body["attachments"][0]["data"], "cG5n");
        assert!(std::fs::read_to_string(&html_file).unwrap().contains("<h2>AAPL"));
    }

    #[tokio::test]
    async fn test_client_error_is_rejected() {
        let server = TestServer::start(vec![Route::new(
            "/hook",
            Canned::new(400, "text/plain", "bad recipients"),
        )])
        .await;
        let reporter =
            WebhookReporter::new(server.url("/hook"), None, ReportSettings::default()).unwrap();

        let err = reporter
            .deliver(&[sample_result("AAPL", Signal::Hold)], &IndexMap::new())
            .await
            .unwrap_err();

        assert_eq!(
            err,
            ReportError::Rejected {
                status: 400,
                message: "bad recipients".into()
            }
        );
        assert!(server.requests().await[0].header("authorization").is_none());
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_delivery_failure() {
        let reporter =
            WebhookReporter::new(closed_port_url("/hook").await, None, ReportSettings::default())
                .unwrap();

        let err = reporter
            .deliver(&[sample_result("AAPL", Signal::Hold)], &IndexMap::new())
            .await
            .unwrap_err();

        assert!(matches!(err, ReportError::Delivery(_)));
    }
}
