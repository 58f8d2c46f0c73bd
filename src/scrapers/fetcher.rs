use crate::config::PipelineConfig;
use crate::errors::FetchError;
use crate::models::dataset::TimeWindow;
use crate::scrapers::base::{RawContent, SourceFetcher};
use futures::stream::{self, StreamExt};
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Bounded exponential backoff for retryable fetch errors.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Wait before the next attempt after `failed_attempts` failures.
    ///
    /// A server supplied `Retry-After` stretches the wait, capped at
    /// `max_delay` like the backoff itself.
    pub fn delay_for(&self, failed_attempts: u32, error: &FetchError) -> Duration {
        let exp = failed_attempts.saturating_sub(1).min(16);
        let backoff = self.base_delay.saturating_mul(1u32 << exp).min(self.max_delay);
        match error {
            FetchError::RateLimited { retry_after: Some(wait) } => backoff.max((*wait).min(self.max_delay)),
            _ => backoff,
        }
    }
}

/// Enforces a minimum spacing between requests to one source.
///
/// The lock is held across the sleep so concurrent callers queue up.
pub struct RateLimiter {
    min_interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_request: Mutex::new(None),
        }
    }

    pub async fn wait(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(time) = *last {
            let elapsed = time.elapsed();
            if elapsed < self.min_interval {
                let wait = self.min_interval - elapsed;
                debug!("等待 {:?} 以遵守频率限制", wait);
                tokio::time::sleep(wait).await;
            }
        }
        *last = Some(Instant::now());
    }
}

struct SourceSlot {
    fetcher: Arc<dyn SourceFetcher>,
    limiter: RateLimiter,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FetchFailure {
    pub source: String,
    pub symbol: String,
    pub error: FetchError,
}

#[derive(Debug, Default)]
pub struct FetchOutcome {
    pub contents: Vec<RawContent>,
    pub failures: Vec<FetchFailure>,
}

/// Fans requests out over all (source, symbol) pairs with rate limiting
/// and retry.
pub struct Fetcher {
    sources: Vec<SourceSlot>,
    retry: RetryPolicy,
    max_concurrency: usize,
}

impl Fetcher {
    pub fn new(retry: RetryPolicy, max_concurrency: usize) -> Self {
        Self {
            sources: Vec::new(),
            retry,
            max_concurrency: max_concurrency.max(1),
        }
    }

    /// Fetcher over the enabled sources of `config`.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, FetchError> {
        let mut fetcher = Self::new(config.fetch.retry_policy(), config.fetch.max_concurrency);
        for (source, min_delay) in crate::scrapers::build_sources(config)? {
            fetcher = fetcher.with_source(source, min_delay);
        }
        Ok(fetcher)
    }

    pub fn with_source(mut self, fetcher: Arc<dyn SourceFetcher>, min_delay: Duration) -> Self {
        self.sources.push(SourceSlot {
            fetcher,
            limiter: RateLimiter::new(min_delay),
        });
        self
    }

    pub fn source_ids(&self) -> Vec<&str> {
        self.sources.iter().map(|s| s.fetcher.source_id()).collect()
    }

    /// Fetch one symbol from one source, retrying transient failures.
    pub async fn fetch_one(
        &self,
        source_id: &str,
        symbol: &str,
        window: TimeWindow,
    ) -> Result<RawContent, FetchError> {
        let slot = self
            .sources
            .iter()
            .find(|s| s.fetcher.source_id() == source_id)
            .ok_or_else(|| FetchError::Malformed(format!("unknown source {}", source_id)))?;
        self.fetch_with_retry(slot, symbol, window).await
    }

    /// Fetch every symbol from every source. Completion order is not
    /// preserved; all requests have finished when this returns.
    pub async fn fetch_all(&self, symbols: &[String], window: TimeWindow) -> FetchOutcome {
        let jobs: Vec<(usize, String)> = (0..self.sources.len())
            .flat_map(|index| symbols.iter().map(move |symbol| (index, symbol.clone())))
            .collect();
        info!(
            "开始抓取 {} 个标的, {} 个数据源 ({} 个请求)",
            symbols.len(),
            self.sources.len(),
            jobs.len()
        );

        // futures are built up front; the stream only polls them
        let requests: Vec<_> = jobs
            .into_iter()
            .map(|(index, symbol)| {
                let slot = &self.sources[index];
                async move {
                    let result = self.fetch_with_retry(slot, &symbol, window).await;
                    (slot.fetcher.source_id().to_string(), symbol, result)
                }
            })
            .collect();

        let results: Vec<_> = stream::iter(requests)
            .buffer_unordered(self.max_concurrency)
            .collect()
            .await;

        let mut outcome = FetchOutcome::default();
        for (source, symbol, result) in results {
            match result {
                Ok(content) => outcome.contents.push(content),
                Err(error) => outcome.failures.push(FetchFailure { source, symbol, error }),
            }
        }
        info!(
            "抓取完成: 成功 {}, 失败 {}",
            outcome.contents.len(),
            outcome.failures.len()
        );
        outcome
    }

    async fn fetch_with_retry(
        &self,
        slot: &SourceSlot,
        symbol: &str,
        window: TimeWindow,
    ) -> Result<RawContent, FetchError> {
        let source = slot.fetcher.source_id();
        let mut attempt = 0;
        loop {
            attempt += 1;
            // 限制请求频率
            slot.limiter.wait().await;
            match slot.fetcher.fetch(symbol, window).await {
                Ok(content) => {
                    if attempt > 1 {
                        info!("{} {} succeeded on attempt {}", source, symbol, attempt);
                    }
                    return Ok(content);
                }
                Err(e) if e.is_retryable() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay_for(attempt, &e);
                    warn!(
                        "{} {} attempt {}/{} failed: {}; retrying in {:?}",
                        source, symbol, attempt, self.retry.max_attempts, e, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    warn!("{} {} failed after {} attempt(s): {}", source, symbol, attempt, e);
                    return Err(e);
                }
            }
        }
    }
}
