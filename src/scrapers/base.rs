use crate::config::FetchConfig;
use crate::errors::FetchError;
use crate::models::dataset::TimeWindow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, RETRY_AFTER};
use reqwest::{Client, Response, StatusCode};
use std::time::{Duration, SystemTime};

/// Shape of a fetched body, selects the parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentFormat {
    ChartJson,
    QuoteHtml,
}

/// Unparsed response body for one (source, symbol) pair.
#[derive(Debug, Clone, PartialEq)]
pub struct RawContent {
    pub source: String,
    pub symbol: String,
    pub format: ContentFormat,
    pub body: String,
    pub fetched_at: DateTime<Utc>,
}

/// A single upstream data source.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Identifier stamped on every record from this source
    fn source_id(&self) -> &str;

    fn format(&self) -> ContentFormat;

    /// Fetch raw content for one symbol; no retry, no rate limiting.
    async fn fetch(&self, symbol: &str, window: TimeWindow) -> Result<RawContent, FetchError>;
}

/// HTTP client with timeout and browser-like headers.
pub fn build_client(fetch: &FetchConfig) -> Result<Client, FetchError> {
    let mut headers = HeaderMap::new();
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("text/html,application/xhtml+xml,application/json;q=0.9,*/*;q=0.8"),
    );
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));

    Client::builder()
        .timeout(fetch.timeout())
        .user_agent(fetch.user_agent.clone())
        .default_headers(headers)
        .build()
        .map_err(|e| FetchError::Network(format!("failed to build HTTP client: {}", e)))
}

/// Turn a response into its body text, classifying HTTP failures.
///
/// 429 is `RateLimited`, 5xx is `Network`, any other non-success status is
/// `Malformed`.
pub async fn read_body(response: Response) -> Result<String, FetchError> {
    let status = response.status();
    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| parse_retry_after(v, SystemTime::now()));
        return Err(FetchError::RateLimited { retry_after });
    }
    if status.is_server_error() {
        return Err(FetchError::Network(format!("HTTP {} from {}", status, response.url())));
    }
    if !status.is_success() {
        return Err(FetchError::Malformed(format!("HTTP {} from {}", status, response.url())));
    }
    Ok(response.text().await?)
}

/// `Retry-After` is either delay seconds or an HTTP-date.
pub fn parse_retry_after(value: &str, now: SystemTime) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = httpdate::parse_http_date(value).ok()?;
    Some(at.duration_since(now).unwrap_or(Duration::ZERO))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_after_seconds_and_dates() {
        let now = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        assert_eq!(parse_retry_after("30", now), Some(Duration::from_secs(30)));

        let later = httpdate::fmt_http_date(now + Duration::from_secs(90));
        assert_eq!(parse_retry_after(&later, now), Some(Duration::from_secs(90)));

        // date in the past means retry now
        let earlier = httpdate::fmt_http_date(now - Duration::from_secs(90));
        assert_eq!(parse_retry_after(&earlier, now), Some(Duration::ZERO));

        assert_eq!(parse_retry_after("soon", now), None);
    }
}
