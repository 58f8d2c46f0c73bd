use crate::errors::FetchError;
use crate::models::dataset::TimeWindow;
use crate::scrapers::base::{read_body, ContentFormat, RawContent, SourceFetcher};
use async_trait::async_trait;
use chrono::Utc;
use log::debug;
use reqwest::Client;

pub const DEFAULT_QUOTE_URL: &str = "https://finance.yahoo.com";

/// Current quote snapshot scraped from the Yahoo quote page.
pub struct YahooQuoteSource {
    id: String,
    client: Client,
    base_url: String,
}

impl YahooQuoteSource {
    pub fn new(id: &str, client: Client, base_url: Option<&str>) -> Self {
        Self {
            id: id.to_string(),
            client,
            base_url: base_url.unwrap_or(DEFAULT_QUOTE_URL).trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl SourceFetcher for YahooQuoteSource {
    fn source_id(&self) -> &str {
        &self.id
    }

    fn format(&self) -> ContentFormat {
        ContentFormat::QuoteHtml
    }

    // 快照没有历史，窗口参数不使用
    async fn fetch(&self, symbol: &str, _window: TimeWindow) -> Result<RawContent, FetchError> {
        let url = format!("{}/quote/{}", self.base_url, symbol);
        debug!("GET {}", url);
        let response = self.client.get(&url).send().await?;
        let body = read_body(response).await?;
        Ok(RawContent {
            source: self.id.clone(),
            symbol: symbol.to_string(),
            format: ContentFormat::QuoteHtml,
            body,
            fetched_at: Utc::now(),
        })
    }
}
