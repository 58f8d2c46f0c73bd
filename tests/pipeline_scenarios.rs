mod common;

use async_trait::async_trait;
use common::*;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use stock_pipeline::config::{ConfigSource, PipelineConfig};
use stock_pipeline::errors::{DeliveryError, Result};
use stock_pipeline::models::TimeWindow;
use stock_pipeline::notify::Notifier;
use stock_pipeline::scrapers::{Fetcher, SourceFetcher};
use stock_pipeline::services::{Pipeline, PipelineRunner, RunSummary, Scheduler, TickOutcome};

fn config(dir: &Path, symbols: &[&str]) -> PipelineConfig {
    let mut config = PipelineConfig::default()
        .with_symbols(symbols.iter().map(|s| s.to_string()).collect())
        .with_data_dir(&dir.join("data").to_string_lossy())
        .with_output_dir(&dir.join("out").to_string_lossy());
    config.analysis.clusters = 2;
    config.schedule.run_attempts = 2;
    config.schedule.retry_delay_secs = 0;
    config.schedule.delivery_attempts = 2;
    config.schedule.delivery_backoff_ms = 1;
    config
}

fn three_symbols() -> Vec<(&'static str, String)> {
    let mut bad: Vec<Option<f64>> = vec![None; DAYS];
    bad[0] = Some(50.0);
    bad[1] = Some(51.0);
    bad[2] = Some(49.5);
    vec![
        ("AAPL", chart_body(&trending(180.0, 0.8, 2.0))),
        ("MSFT", chart_body(&trending(410.0, -0.6, 3.0))),
        ("BAD", chart_body(&bad)),
    ]
}

#[tokio::test]
async fn fetch_recovers_within_retry_budget() {
    let source = Arc::new(ScriptedSource::new(vec![("AAPL", chart_body(&trending(100.0, 1.0, 1.0)))], 2));
    let fetcher = Fetcher::new(fast_retry(3), 2).with_source(source.clone(), Duration::ZERO);
    let window = TimeWindow::last_days(chrono::Utc::now(), 60);

    let content = fetcher.fetch_one("yahoo", "AAPL", window).await.unwrap();
    assert_eq!(content.symbol, "AAPL");
    assert_eq!(source.total_calls.load(Ordering::SeqCst), 3);

    let outcome = fetcher.fetch_all(&["AAPL".to_string()], window).await;
    assert_eq!(outcome.contents.len(), 1);
    assert!(outcome.failures.is_empty());
}

#[tokio::test]
async fn flaky_source_still_produces_a_run() {
    let dir = tempfile::tempdir().unwrap();
    let source = Arc::new(ScriptedSource::new(three_symbols(), 2));
    let fetcher = Fetcher::new(fast_retry(3), 4).with_source(source.clone(), Duration::ZERO);
    let pipeline = Pipeline::new(config(dir.path(), &["AAPL", "MSFT", "BAD"]), fetcher, Vec::new());

    let summary = pipeline.run().await.unwrap();
    assert_eq!(summary.fetch_failures, 0);
    assert_eq!(summary.fetched, 3);
    assert_eq!(source.total_calls.load(Ordering::SeqCst), 9);
}

#[tokio::test]
async fn sparse_symbol_is_dropped_and_results_stay_consistent() {
    let dir = tempfile::tempdir().unwrap();
    let source: Arc<dyn SourceFetcher> = Arc::new(ScriptedSource::new(three_symbols(), 0));
    let fetcher = Fetcher::new(fast_retry(1), 4).with_source(source, Duration::ZERO);
    let pipeline = Pipeline::new(config(dir.path(), &["AAPL", "MSFT", "BAD"]), fetcher, Vec::new());

    let summary = pipeline.run().await.unwrap();
    assert_eq!(summary.symbols, vec!["AAPL".to_string(), "MSFT".to_string()]);
    assert_eq!(summary.clean.dropped_symbols, vec!["BAD".to_string()]);
    assert_eq!(summary.artifacts.len(), 8);

    let latest = pipeline.store().load_latest().unwrap().unwrap();
    assert!(latest.is_consistent());
    let analysis = latest.analysis.unwrap();
    for symbol in analysis.clusters.keys() {
        assert!(latest.dataset.contains_symbol(symbol), "{} not in dataset", symbol);
    }
    assert!(latest.dataset.records().iter().all(|r| r.is_complete()));
    assert!(analysis.check_against(&latest.dataset).is_ok());
}

struct ScriptedRunner {
    source: Arc<ScriptedSource>,
    notifiers: Vec<Arc<dyn Notifier>>,
    runs: AtomicU32,
}

#[async_trait]
impl PipelineRunner for ScriptedRunner {
    async fn run(&self, config: &PipelineConfig, run_id: &str) -> Result<RunSummary> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        let fetcher = Fetcher::new(fast_retry(2), 4).with_source(self.source.clone(), Duration::ZERO);
        Pipeline::new(config.clone(), fetcher, self.notifiers.clone())
            .run_as(run_id)
            .await
    }
}

#[tokio::test]
async fn unreachable_channel_does_not_undo_or_repeat_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let channel = Arc::new(Unreachable::new());
    let runner = Arc::new(ScriptedRunner {
        source: Arc::new(ScriptedSource::new(three_symbols(), 0)),
        notifiers: vec![channel.clone() as Arc<dyn Notifier>],
        runs: AtomicU32::new(0),
    });
    let cfg = config(dir.path(), &["AAPL", "MSFT", "BAD"]);
    let scheduler = Scheduler::new(ConfigSource::Fixed(cfg.clone()), runner.clone()).unwrap();

    let summary = match scheduler.try_run_once().await {
        TickOutcome::Completed(summary) => summary,
        other => panic!("expected a completed run, got {:?}", other),
    };
    assert_eq!(runner.runs.load(Ordering::SeqCst), 1);
    assert_eq!(channel.attempts.load(Ordering::SeqCst), 2);

    let failures = summary.delivery.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].attempts, 2);
    assert!(matches!(failures[0].error, Some(DeliveryError::Network(_))));

    let store = stock_pipeline::DatasetStore::from_config(&cfg);
    let analysis = store.load_analysis().unwrap().unwrap();
    assert_eq!(analysis.run_id, summary.run_id);
}
