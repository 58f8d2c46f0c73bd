use crate::errors::FetchError;
use crate::models::dataset::TimeWindow;
use crate::scrapers::base::{read_body, ContentFormat, RawContent, SourceFetcher};
use async_trait::async_trait;
use chrono::Utc;
use log::debug;
use reqwest::Client;

pub const DEFAULT_CHART_URL: &str = "https://query1.finance.yahoo.com";

/// Daily OHLCV history from the Yahoo chart JSON API.
pub struct YahooChartSource {
    id: String,
    client: Client,
    base_url: String,
}

impl YahooChartSource {
    pub fn new(id: &str, client: Client, base_url: Option<&str>) -> Self {
        Self {
            id: id.to_string(),
            client,
            base_url: base_url.unwrap_or(DEFAULT_CHART_URL).trim_end_matches('/').to_string(),
        }
    }

    pub fn chart_url(&self, symbol: &str, window: TimeWindow) -> String {
        format!(
            "{}/v8/finance/chart/{}?period1={}&period2={}&interval=1d&events=history",
            self.base_url,
            symbol,
            window.start.timestamp(),
            window.end.timestamp()
        )
    }
}

#[async_trait]
impl SourceFetcher for YahooChartSource {
    fn source_id(&self) -> &str {
        &self.id
    }

    fn format(&self) -> ContentFormat {
        ContentFormat::ChartJson
    }

    async fn fetch(&self, symbol: &str, window: TimeWindow) -> Result<RawContent, FetchError> {
        let url = self.chart_url(symbol, window);
        debug!("GET {}", url);
        let response = self.client.get(&url).send().await?;
        let body = read_body(response).await?;
        Ok(RawContent {
            source: self.id.clone(),
            symbol: symbol.to_string(),
            format: ContentFormat::ChartJson,
            body,
            fetched_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn chart_url_carries_window_as_epoch_seconds() {
        let source = YahooChartSource::new("yahoo", Client::new(), Some("http://localhost:9000/"));
        let window = TimeWindow::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 31, 0, 0, 0).unwrap(),
        );
        assert_eq!(
            source.chart_url("AAPL", window),
            "http://localhost:9000/v8/finance/chart/AAPL?period1=1704067200&period2=1706659200&interval=1d&events=history"
        );
    }
}
