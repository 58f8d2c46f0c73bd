use crate::config::PipelineConfig;
use crate::errors::{DeliveryError, StorageError};
use crate::models::analysis::{AnalysisResult, SegmentCount};
use crate::models::dataset::Dataset;
use crate::notify::{Attachment, Notification, Notifier};
use crate::services::charts::{correlation_svg, market_cap_svg, price_distribution_svg, returns_svg, volume_svg};
use crate::util::write_bytes_atomic;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use log::{error, info, warn};
use serde::Serialize;
use std::fmt::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub const SUMMARY_TXT: &str = "summary.txt";
pub const REPORT_MD: &str = "report.md";
pub const SUMMARY_CSV: &str = "summary.csv";
pub const RETURNS_SVG: &str = "returns.svg";
pub const CORRELATION_SVG: &str = "correlation.svg";
pub const VOLUME_SVG: &str = "volume.svg";
pub const PRICE_DISTRIBUTION_SVG: &str = "price_distribution.svg";
pub const MARKET_CAP_SVG: &str = "market_cap.svg";

/// Correlations at or above this magnitude are listed in the reports.
const STRONG_CORRELATION: f64 = 0.7;

#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    pub name: &'static str,
    pub path: PathBuf,
    pub content_type: &'static str,
}

/// Result of delivering one notification to one channel.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryReport {
    pub channel: String,
    pub attempts: u32,
    pub error: Option<DeliveryError>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeliveryOutcome {
    pub reports: Vec<DeliveryReport>,
}

impl DeliveryOutcome {
    pub fn delivered(&self) -> usize {
        self.reports.iter().filter(|r| r.error.is_none()).count()
    }

    pub fn failures(&self) -> Vec<&DeliveryReport> {
        self.reports.iter().filter(|r| r.error.is_some()).collect()
    }
}

fn fmt_pct(value: Option<f64>) -> String {
    value.map(|v| format!("{:+.2}%", v)).unwrap_or_else(|| "n/a".to_string())
}

// 只列出非零分桶
fn fmt_segment(counts: &[SegmentCount]) -> String {
    let parts: Vec<String> = counts
        .iter()
        .filter(|c| c.count > 0)
        .map(|c| format!("{} {}", c.label, c.count))
        .collect();
    if parts.is_empty() {
        "n/a".to_string()
    } else {
        parts.join(", ")
    }
}

/// Plain-text summary, the notification body.
pub fn render_text(result: &AnalysisResult, dataset: &Dataset) -> String {
    let mut out = String::new();
    let market = &result.market;
    let _ = writeln!(out, "STOCK DATA ANALYSIS REPORT");
    let _ = writeln!(out, "{}", "=".repeat(50));
    let _ = writeln!(out, "Run: {}", result.run_id);
    let _ = writeln!(out, "Generated: {}", result.generated_at.format("%Y-%m-%d %H:%M:%S UTC"));
    let _ = writeln!(out, "Symbols analysed: {}", dataset.symbols().join(", "));
    let _ = writeln!(out, "Records: {}", result.record_count);
    let _ = writeln!(out);

    let _ = writeln!(out, "PERFORMANCE");
    let _ = writeln!(out, "{}", "-".repeat(20));
    let _ = writeln!(out, "Average change: {}", fmt_pct(market.avg_change_percent));
    let _ = writeln!(out, "Median change: {}", fmt_pct(market.median_change_percent));
    let _ = writeln!(
        out,
        "Positive: {}  Negative: {}  Neutral: {}",
        market.positive, market.negative, market.neutral
    );
    if !market.top_gainers.is_empty() {
        let _ = writeln!(out, "Top gainers:");
        for m in &market.top_gainers {
            let _ = writeln!(out, "  {}: {:+.2}%", m.symbol, m.change_percent);
        }
    }
    if !market.top_losers.is_empty() {
        let _ = writeln!(out, "Top losers:");
        for m in &market.top_losers {
            let _ = writeln!(out, "  {}: {:+.2}%", m.symbol, m.change_percent);
        }
    }
    if !market.high_volume.is_empty() {
        let _ = writeln!(out, "High volume:");
        for v in &market.high_volume {
            let _ = writeln!(out, "  {}: {:.0} avg @ {:.2}", v.symbol, v.avg_volume, v.last_close);
        }
    }
    let _ = writeln!(out);

    let _ = writeln!(out, "MARKET SEGMENTS");
    let _ = writeln!(out, "{}", "-".repeat(20));
    let _ = writeln!(out, "Market cap: {}", fmt_segment(&market.segments.market_cap));
    let _ = writeln!(out, "Performance: {}", fmt_segment(&market.segments.performance));
    let _ = writeln!(out, "Price range: {}", fmt_segment(&market.segments.price_ranges));
    let _ = writeln!(out);

    let _ = writeln!(out, "RISK");
    let _ = writeln!(out, "{}", "-".repeat(20));
    for r in result.risk.values() {
        let _ = writeln!(
            out,
            "  {}: vol {:.2}% ann {:.1}% mdd {:.1}% VaR({:.0}%) {:.2}%",
            r.symbol,
            r.volatility * 100.0,
            r.annualized_volatility * 100.0,
            r.max_drawdown * 100.0,
            r.confidence * 100.0,
            r.value_at_risk * 100.0
        );
    }
    if !market.high_risk.is_empty() {
        let names: Vec<&str> = market.high_risk.iter().map(|m| m.symbol.as_str()).collect();
        let _ = writeln!(out, "High risk movers: {}", names.join(", "));
    }

    let strong = result.strong_correlations(STRONG_CORRELATION);
    if !strong.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "STRONG CORRELATIONS");
        let _ = writeln!(out, "{}", "-".repeat(20));
        for c in strong {
            let _ = writeln!(out, "  {} / {}: {:.2} (n={})", c.a, c.b, c.value, c.observations);
        }
    }

    if !result.exclusions.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "Excluded:");
        for e in &result.exclusions {
            let _ = writeln!(out, "  {} from {} ({} of {} observations)", e.symbol, e.metric, e.available, e.required);
        }
    }
    out
}

pub fn render_markdown(result: &AnalysisResult, dataset: &Dataset) -> String {
    let window = dataset.window();
    let mut report = format!(
        "# Stock Analysis Report\n\n\
Run ID: `{}`\n\n\
- Window: {} to {}\n\
- Symbols: {}\n\
- Records: {}\n\
- Average change: {}\n",
        result.run_id,
        window.start.format("%Y-%m-%d"),
        window.end.format("%Y-%m-%d"),
        dataset.symbols().len(),
        result.record_count,
        fmt_pct(result.market.avg_change_percent),
    );

    report.push_str("\n## Symbols\n\n");
    report.push_str("| Symbol | Last Close | Change | Category | Market Cap | P/E | Volatility | Max Drawdown | Cluster |\n");
    report.push_str("|--------|-----------:|-------:|----------|-----------:|----:|-----------:|-------------:|--------:|\n");
    for (symbol, s) in &result.stats {
        let risk = result.risk.get(symbol);
        let quote = result.quotes.get(symbol);
        let _ = writeln!(
            report,
            "| {} | {:.2} | {} | {} | {} | {} | {} | {} | {} |",
            symbol,
            s.last_close,
            fmt_pct(s.change_percent),
            s.performance.map(|p| p.label()).unwrap_or("n/a"),
            quote.and_then(|q| q.market_cap_text.as_deref()).unwrap_or("n/a"),
            quote.and_then(|q| q.pe_ratio).map(|pe| format!("{:.2}", pe)).unwrap_or_else(|| "n/a".into()),
            risk.map(|r| format!("{:.2}%", r.volatility * 100.0)).unwrap_or_else(|| "n/a".into()),
            risk.map(|r| format!("{:.1}%", r.max_drawdown * 100.0)).unwrap_or_else(|| "n/a".into()),
            result.clusters.get(symbol).map(|c| c.to_string()).unwrap_or_else(|| "-".into()),
        );
    }

    if !result.cluster_summaries.is_empty() {
        report.push_str("\n## Clusters\n\n");
        for c in &result.cluster_summaries {
            let _ = writeln!(
                report,
                "- Cluster {}: {} (avg return {:+.3}%, avg volatility {:.2}%, avg drawdown {:.1}%)",
                c.id,
                c.symbols.join(", "),
                c.avg_return * 100.0,
                c.avg_volatility * 100.0,
                c.avg_drawdown * 100.0
            );
        }
    }

    let segments = &result.market.segments;
    report.push_str("\n## Market Segments\n\n");
    let _ = writeln!(report, "- Market cap: {}", fmt_segment(&segments.market_cap));
    let _ = writeln!(report, "- Performance: {}", fmt_segment(&segments.performance));
    let _ = writeln!(report, "- Price range: {}", fmt_segment(&segments.price_ranges));

    if !result.market.high_volume.is_empty() {
        report.push_str("\n## High Volume\n\n");
        for v in &result.market.high_volume {
            let _ = writeln!(report, "- {}: {:.0} average volume", v.symbol, v.avg_volume);
        }
    }

    let strong = result.strong_correlations(STRONG_CORRELATION);
    if !strong.is_empty() {
        report.push_str("\n## Strong Correlations\n\n");
        for c in strong {
            let _ = writeln!(report, "- {} / {}: {:.2}", c.a, c.b, c.value);
        }
    }

    report.push('\n');
    for (title, file) in [
        ("Change", RETURNS_SVG),
        ("Correlation", CORRELATION_SVG),
        ("Volume", VOLUME_SVG),
        ("Price Ranges", PRICE_DISTRIBUTION_SVG),
        ("Market Cap", MARKET_CAP_SVG),
    ] {
        let _ = writeln!(report, "![{}]({})\n", title, file);
    }
    report
}

#[derive(Serialize)]
struct SummaryRow<'a> {
    symbol: &'a str,
    observations: usize,
    last_close: f64,
    change_percent: Option<f64>,
    performance: Option<&'static str>,
    avg_volume: f64,
    market_cap: Option<f64>,
    market_cap_category: Option<&'static str>,
    pe_ratio: Option<f64>,
    volatility: Option<f64>,
    annualized_volatility: Option<f64>,
    max_drawdown: Option<f64>,
    value_at_risk: Option<f64>,
    cluster: Option<usize>,
}

pub fn summary_csv(result: &AnalysisResult) -> Result<Vec<u8>, StorageError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for (symbol, s) in &result.stats {
        let risk = result.risk.get(symbol);
        let quote = result.quotes.get(symbol);
        writer.serialize(SummaryRow {
            symbol,
            observations: s.observations,
            last_close: s.last_close,
            change_percent: s.change_percent,
            performance: s.performance.map(|p| p.label()),
            avg_volume: s.avg_volume,
            market_cap: quote.and_then(|q| q.market_cap),
            market_cap_category: quote.map(|q| q.market_cap_category.label()),
            pe_ratio: quote.and_then(|q| q.pe_ratio),
            volatility: risk.map(|r| r.volatility),
            annualized_volatility: risk.map(|r| r.annualized_volatility),
            max_drawdown: risk.map(|r| r.max_drawdown),
            value_at_risk: risk.map(|r| r.value_at_risk),
            cluster: result.clusters.get(symbol).copied(),
        })?;
    }
    writer
        .into_inner()
        .map_err(|e| StorageError::Io(e.into_error()))
}

/// 报告生成与通知分发
pub struct Reporter {
    output_dir: PathBuf,
    notifiers: Vec<Arc<dyn Notifier>>,
    delivery_attempts: u32,
    delivery_backoff: Duration,
}

impl Reporter {
    pub fn new(output_dir: impl Into<PathBuf>, notifiers: Vec<Arc<dyn Notifier>>) -> Self {
        Self {
            output_dir: output_dir.into(),
            notifiers,
            delivery_attempts: 3,
            delivery_backoff: Duration::from_secs(2),
        }
    }

    pub fn from_config(config: &PipelineConfig, notifiers: Vec<Arc<dyn Notifier>>) -> Self {
        Self::new(&config.output_dir, notifiers)
            .with_delivery(config.schedule.delivery_attempts, config.schedule.delivery_backoff())
    }

    pub fn with_delivery(mut self, attempts: u32, backoff: Duration) -> Self {
        self.delivery_attempts = attempts.max(1);
        self.delivery_backoff = backoff;
        self
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn has_channels(&self) -> bool {
        !self.notifiers.is_empty()
    }

    /// Write all artifacts for a run, replacing the previous run's files.
    pub fn write_artifacts(&self, result: &AnalysisResult, dataset: &Dataset) -> Result<Vec<Artifact>, StorageError> {
        let files: [(&'static str, &'static str, Vec<u8>); 8] = [
            (SUMMARY_TXT, "text/plain", render_text(result, dataset).into_bytes()),
            (REPORT_MD, "text/markdown", render_markdown(result, dataset).into_bytes()),
            (SUMMARY_CSV, "text/csv", summary_csv(result)?),
            (RETURNS_SVG, "image/svg+xml", returns_svg(result).into_bytes()),
            (CORRELATION_SVG, "image/svg+xml", correlation_svg(result).into_bytes()),
            (VOLUME_SVG, "image/svg+xml", volume_svg(result).into_bytes()),
            (PRICE_DISTRIBUTION_SVG, "image/svg+xml", price_distribution_svg(result).into_bytes()),
            (MARKET_CAP_SVG, "image/svg+xml", market_cap_svg(result).into_bytes()),
        ];

        let mut artifacts = Vec::with_capacity(files.len());
        for (name, content_type, bytes) in files {
            let path = self.output_dir.join(name);
            write_bytes_atomic(&path, &bytes)?;
            artifacts.push(Artifact { name, path, content_type });
        }
        info!("Wrote {} artifacts to {}", artifacts.len(), self.output_dir.display());
        Ok(artifacts)
    }

    pub fn success_notification(
        &self,
        result: &AnalysisResult,
        dataset: &Dataset,
        artifacts: &[Artifact],
    ) -> Result<Notification, StorageError> {
        let subject = format!("Stock Data Analysis - {}", result.generated_at.format("%Y-%m-%d %H:%M"));
        let attachments = artifacts
            .iter()
            .map(|a| Ok(Attachment::new(a.name, a.content_type, std::fs::read(&a.path)?)))
            .collect::<Result<Vec<_>, StorageError>>()?;
        Ok(Notification::new(&subject, &render_text(result, dataset)).with_attachments(attachments))
    }

    pub fn failure_notification(&self, run_id: &str, error: &str, at: DateTime<Utc>) -> Notification {
        let subject = format!("Stock Pipeline Error - {}", at.format("%Y-%m-%d %H:%M"));
        let body = format!(
            "Stock pipeline run failed\n\
             =========================\n\n\
             Run: {}\n\
             Error: {}\n\
             Timestamp: {}\n\n\
             Please check the logs for more details.\n",
            run_id,
            error,
            at.format("%Y-%m-%d %H:%M:%S UTC")
        );
        Notification::new(&subject, &body)
    }

    fn backoff_for(&self, failed_attempts: u32) -> Duration {
        let factor = 1u32 << failed_attempts.saturating_sub(1).min(16);
        self.delivery_backoff.saturating_mul(factor)
    }

    async fn deliver(&self, notifier: &dyn Notifier, notification: &Notification) -> DeliveryReport {
        let channel = notifier.name();
        let mut attempts = 0;
        loop {
            attempts += 1;
            match notifier.send(notification).await {
                Ok(()) => {
                    info!("Delivered '{}' via {} (attempt {})", notification.subject, channel, attempts);
                    return DeliveryReport { channel, attempts, error: None };
                }
                // 配置错误重试无意义
                Err(e) if matches!(e, DeliveryError::Config(_)) || attempts >= self.delivery_attempts => {
                    error!("Delivery via {} failed after {} attempt(s): {}", channel, attempts, e);
                    return DeliveryReport { channel, attempts, error: Some(e) };
                }
                Err(e) => {
                    let delay = self.backoff_for(attempts);
                    warn!("Delivery via {} failed (attempt {}): {}; retrying in {:?}", channel, attempts, e, delay);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Send to every channel concurrently. Failures are reported, never raised.
    pub async fn dispatch(&self, notification: &Notification) -> DeliveryOutcome {
        let reports = join_all(self.notifiers.iter().map(|n| self.deliver(n.as_ref(), notification))).await;
        DeliveryOutcome { reports }
    }
}
