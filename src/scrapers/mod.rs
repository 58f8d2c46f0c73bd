pub mod base;
pub mod fetcher;
pub mod yahoo_chart;
pub mod yahoo_quote;

use crate::config::{PipelineConfig, SourceKind};
use crate::errors::FetchError;
use std::sync::Arc;
use std::time::Duration;

pub use base::{ContentFormat, RawContent, SourceFetcher};
pub use fetcher::{FetchFailure, FetchOutcome, Fetcher, RateLimiter, RetryPolicy};

/// Instantiate the enabled sources of `config` with their minimum delays.
pub fn build_sources(config: &PipelineConfig) -> Result<Vec<(Arc<dyn SourceFetcher>, Duration)>, FetchError> {
    let client = base::build_client(&config.fetch)?;
    let sources = config
        .enabled_sources()
        .map(|source| {
            let fetcher: Arc<dyn SourceFetcher> = match source.kind {
                SourceKind::YahooChart => Arc::new(yahoo_chart::YahooChartSource::new(
                    &source.id,
                    client.clone(),
                    source.base_url.as_deref(),
                )),
                SourceKind::YahooQuote => Arc::new(yahoo_quote::YahooQuoteSource::new(
                    &source.id,
                    client.clone(),
                    source.base_url.as_deref(),
                )),
            };
            (fetcher, source.min_delay())
        })
        .collect();
    Ok(sources)
}
