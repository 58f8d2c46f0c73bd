#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use stock_pipeline::errors::{DeliveryError, FetchError};
use stock_pipeline::models::TimeWindow;
use stock_pipeline::notify::{Notification, Notifier};
use stock_pipeline::scrapers::{ContentFormat, RawContent, RetryPolicy, SourceFetcher};

pub const DAYS: usize = 30;

pub fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
    }
}

/// A v8 chart body with one bar per day ending yesterday; `None` closes
/// become fully empty bars.
pub fn chart_body(closes: &[Option<f64>]) -> String {
    let today = Utc::now().date_naive().and_hms_opt(14, 30, 0).unwrap().and_utc();
    let n = closes.len() as i64;
    let timestamps: Vec<i64> = (0..n).map(|i| (today - ChronoDuration::days(n - i)).timestamp()).collect();
    let open: Vec<Option<f64>> = closes.iter().map(|c| c.map(|v| v - 0.5)).collect();
    let high: Vec<Option<f64>> = closes.iter().map(|c| c.map(|v| v + 1.0)).collect();
    let low: Vec<Option<f64>> = closes.iter().map(|c| c.map(|v| v - 1.0)).collect();
    let volume: Vec<Option<u64>> = closes.iter().enumerate().map(|(i, c)| c.map(|_| 1_000_000 + i as u64 * 1_000)).collect();
    json!({
        "chart": {
            "result": [{
                "meta": {"currency": "USD"},
                "timestamp": timestamps,
                "indicators": {"quote": [{
                    "open": open, "high": high, "low": low, "close": closes, "volume": volume
                }]}
            }],
            "error": null
        }
    })
    .to_string()
}

pub fn trending(start: f64, step: f64, wobble: f64) -> Vec<Option<f64>> {
    (0..DAYS)
        .map(|i| Some(start + step * i as f64 + (i as f64 * 1.3).sin() * wobble))
        .collect()
}

/// Serves canned chart bodies; the first `fail_first` calls per symbol
/// fail with a network error.
pub struct ScriptedSource {
    bodies: HashMap<String, String>,
    fail_first: u32,
    calls: std::sync::Mutex<HashMap<String, u32>>,
    pub total_calls: AtomicU32,
}

impl ScriptedSource {
    pub fn new(bodies: Vec<(&str, String)>, fail_first: u32) -> Self {
        Self {
            bodies: bodies.into_iter().map(|(s, b)| (s.to_string(), b)).collect(),
            fail_first,
            calls: std::sync::Mutex::new(HashMap::new()),
            total_calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl SourceFetcher for ScriptedSource {
    fn source_id(&self) -> &str {
        "yahoo"
    }

    fn format(&self) -> ContentFormat {
        ContentFormat::ChartJson
    }

    async fn fetch(&self, symbol: &str, _window: TimeWindow) -> Result<RawContent, FetchError> {
        self.total_calls.fetch_add(1, Ordering::SeqCst);
        let seen = {
            let mut calls = self.calls.lock().unwrap();
            let n = calls.entry(symbol.to_string()).or_insert(0);
            *n += 1;
            *n
        };
        if seen <= self.fail_first {
            return Err(FetchError::Network(format!("connection reset ({})", seen)));
        }
        let body = self
            .bodies
            .get(symbol)
            .cloned()
            .ok_or_else(|| FetchError::Malformed(format!("404 for {}", symbol)))?;
        Ok(RawContent {
            source: "yahoo".into(),
            symbol: symbol.into(),
            format: ContentFormat::ChartJson,
            body,
            fetched_at: Utc::now(),
        })
    }
}

/// A channel that never answers.
pub struct Unreachable {
    pub attempts: AtomicU32,
}

impl Unreachable {
    pub fn new() -> Self {
        Self {
            attempts: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl Notifier for Unreachable {
    fn name(&self) -> String {
        "webhook:http://unreachable.invalid".to_string()
    }

    async fn send(&self, _notification: &Notification) -> Result<(), DeliveryError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(DeliveryError::Network("connection refused".into()))
    }
}
