use crate::config::PipelineConfig;
use crate::data_provider::DatasetStore;
use crate::errors::{PipelineError, Result};
use crate::models::dataset::{Dataset, TimeWindow};
use crate::notify::{build_notifiers, Notification, Notifier};
use crate::parsers::Parser;
use crate::scrapers::Fetcher;
use crate::services::analyzer::Analyzer;
use crate::services::cleaner::{CleanReport, Cleaner};
use crate::services::reporter::{DeliveryOutcome, Reporter};
use crate::util::new_run_id;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;

/// What one successful run did.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub fetched: usize,
    pub fetch_failures: usize,
    pub parse_warnings: usize,
    pub clean: CleanReport,
    pub symbols: Vec<String>,
    pub exclusions: usize,
    pub artifacts: Vec<PathBuf>,
    pub delivery: DeliveryOutcome,
}

/// 单次运行：抓取 → 解析 → 清洗 → 分析 → 持久化 → 报告
pub struct Pipeline {
    config: PipelineConfig,
    fetcher: Fetcher,
    parser: Parser,
    store: DatasetStore,
    reporter: Reporter,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, fetcher: Fetcher, notifiers: Vec<Arc<dyn Notifier>>) -> Self {
        Self {
            parser: Parser::from_config(&config),
            store: DatasetStore::from_config(&config),
            reporter: Reporter::from_config(&config, notifiers),
            fetcher,
            config,
        }
    }

    /// Live sources and notification channels from `config`. A channel
    /// that cannot be built is logged and left out.
    pub fn from_config(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let fetcher = Fetcher::from_config(&config)?;
        let (notifiers, failures) = build_notifiers(&config.schedule.notifications);
        for (target, e) in failures {
            error!("Notification channel {} disabled: {}", target, e);
        }
        Ok(Self::new(config, fetcher, notifiers))
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn store(&self) -> &DatasetStore {
        &self.store
    }

    pub async fn run(&self) -> Result<RunSummary> {
        self.run_as(&new_run_id(Utc::now())).await
    }

    pub async fn run_as(&self, run_id: &str) -> Result<RunSummary> {
        let started_at = Utc::now();
        let fetch_window = TimeWindow::last_days(started_at, self.config.lookback_days);
        info!(
            "Run {} started: {} symbols, {} to {}",
            run_id,
            self.config.symbols.len(),
            fetch_window.start.format("%Y-%m-%d"),
            fetch_window.end.format("%Y-%m-%d")
        );

        // 1. 抓取
        let fetched = self.fetcher.fetch_all(&self.config.symbols, fetch_window).await;
        for f in &fetched.failures {
            warn!("Fetch failed for {} from {}: {}", f.symbol, f.source, f.error);
        }
        if fetched.contents.is_empty() {
            return Err(PipelineError::AllSourcesUnreachable {
                failures: fetched.failures.len(),
            });
        }

        // 2. 解析
        let parsed = self.parser.parse_batch(&fetched.contents);

        // quote snapshots are stamped at fetch time, so the window ends now
        let collected_at = Utc::now();
        let dataset = Dataset::new(
            run_id,
            collected_at,
            &self.config.symbols,
            TimeWindow::new(fetch_window.start, collected_at),
            parsed.records,
        );
        let quotes = parsed.quotes;
        info!("Run {}: collected {} records", run_id, dataset.len());

        // 3. 清洗
        let (cleaned, clean) = Cleaner::new(self.config.cleaning.clone()).clean(&dataset);
        if cleaned.is_empty() {
            return Err(PipelineError::EmptyDataset);
        }

        // 4. 分析 + 5. 持久化
        let analysis = Analyzer::new(self.config.analysis.clone()).analyze_with_quotes(&cleaned, &quotes)?;
        self.store.persist(&cleaned, &analysis)?;
        info!(
            "Run {}: persisted {} records, {} symbols",
            run_id,
            cleaned.len(),
            cleaned.symbols().len()
        );

        // 6. 报告与通知；此后的失败不影响已完成的分析
        let artifacts = match self.reporter.write_artifacts(&analysis, &cleaned) {
            Ok(artifacts) => artifacts,
            Err(e) => {
                error!("Run {}: failed to write artifacts: {}", run_id, e);
                Vec::new()
            }
        };
        let delivery = if self.reporter.has_channels() {
            let notification = self
                .reporter
                .success_notification(&analysis, &cleaned, &artifacts)
                .unwrap_or_else(|e| {
                    warn!("Run {}: sending without attachments: {}", run_id, e);
                    Notification::new(
                        &format!("Stock Data Analysis - {}", analysis.generated_at.format("%Y-%m-%d %H:%M")),
                        &crate::services::reporter::render_text(&analysis, &cleaned),
                    )
                });
            self.reporter.dispatch(&notification).await
        } else {
            DeliveryOutcome::default()
        };

        let summary = RunSummary {
            run_id: run_id.to_string(),
            started_at,
            finished_at: Utc::now(),
            fetched: fetched.contents.len(),
            fetch_failures: fetched.failures.len(),
            parse_warnings: parsed.warnings.len(),
            clean,
            symbols: cleaned.symbols().iter().map(|s| s.to_string()).collect(),
            exclusions: analysis.exclusions.len(),
            artifacts: artifacts.into_iter().map(|a| a.path).collect(),
            delivery,
        };
        info!(
            "Run {} finished: {} symbols, {} deliveries ok, {} failed",
            run_id,
            summary.symbols.len(),
            summary.delivery.delivered(),
            summary.delivery.failures().len()
        );
        Ok(summary)
    }

    /// Best-effort failure notice on the configured channels.
    pub async fn notify_failure(&self, run_id: &str, err: &PipelineError) -> DeliveryOutcome {
        if !self.reporter.has_channels() {
            return DeliveryOutcome::default();
        }
        let notification = self.reporter.failure_notification(run_id, &err.to_string(), Utc::now());
        self.reporter.dispatch(&notification).await
    }
}

/// What the scheduler drives on each tick.
#[async_trait]
pub trait PipelineRunner: Send + Sync {
    async fn run(&self, config: &PipelineConfig, run_id: &str) -> Result<RunSummary>;

    /// Called once per tick after every attempt failed.
    async fn report_failure(&self, _config: &PipelineConfig, _run_id: &str, _error: &PipelineError) {}
}

/// Builds a fresh pipeline from the current configuration for every run.
pub struct LiveRunner;

#[async_trait]
impl PipelineRunner for LiveRunner {
    async fn run(&self, config: &PipelineConfig, run_id: &str) -> Result<RunSummary> {
        Pipeline::from_config(config.clone())?.run_as(run_id).await
    }

    async fn report_failure(&self, config: &PipelineConfig, run_id: &str, error: &PipelineError) {
        let (notifiers, _) = build_notifiers(&config.schedule.notifications);
        let reporter = Reporter::from_config(config, notifiers);
        if !reporter.has_channels() {
            return;
        }
        let notification = reporter.failure_notification(run_id, &error.to_string(), Utc::now());
        let outcome = reporter.dispatch(&notification).await;
        info!(
            "Failure notice for {}: {} delivered, {} failed",
            run_id,
            outcome.delivered(),
            outcome.failures().len()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::FetchError;
    use crate::scrapers::base::{ContentFormat, RawContent, SourceFetcher};
    use crate::scrapers::RetryPolicy;
    use std::time::Duration;

    struct Offline;

    #[async_trait]
    impl SourceFetcher for Offline {
        fn source_id(&self) -> &str {
            "offline"
        }

        fn format(&self) -> ContentFormat {
            ContentFormat::ChartJson
        }

        async fn fetch(&self, _symbol: &str, _window: TimeWindow) -> std::result::Result<RawContent, FetchError> {
            Err(FetchError::Network("connection refused".into()))
        }
    }

    struct Garbage;

    #[async_trait]
    impl SourceFetcher for Garbage {
        fn source_id(&self) -> &str {
            "garbage"
        }

        fn format(&self) -> ContentFormat {
            ContentFormat::ChartJson
        }

        async fn fetch(&self, symbol: &str, _window: TimeWindow) -> std::result::Result<RawContent, FetchError> {
            Ok(RawContent {
                source: "garbage".into(),
                symbol: symbol.into(),
                format: ContentFormat::ChartJson,
                body: "{\"chart\":{\"result\":null,\"error\":null}}".into(),
                fetched_at: Utc::now(),
            })
        }
    }

    fn config(dir: &std::path::Path) -> PipelineConfig {
        PipelineConfig::default()
            .with_symbols(vec!["AAPL".into(), "MSFT".into()])
            .with_data_dir(&dir.join("data").to_string_lossy())
            .with_output_dir(&dir.join("out").to_string_lossy())
    }

    fn retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        }
    }

    #[tokio::test]
    async fn unreachable_sources_fail_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Fetcher::new(retry(), 4).with_source(Arc::new(Offline), Duration::ZERO);
        let pipeline = Pipeline::new(config(dir.path()), fetcher, Vec::new());
        let err = pipeline.run().await.unwrap_err();
        assert!(matches!(err, PipelineError::AllSourcesUnreachable { failures: 2 }));
        assert!(pipeline.store().load_latest().unwrap().is_none());
    }

    #[tokio::test]
    async fn unparseable_content_leaves_empty_dataset() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Fetcher::new(retry(), 4).with_source(Arc::new(Garbage), Duration::ZERO);
        let pipeline = Pipeline::new(config(dir.path()), fetcher, Vec::new());
        assert!(matches!(pipeline.run().await, Err(PipelineError::EmptyDataset)));
    }
}
