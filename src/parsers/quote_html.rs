use crate::errors::ParseError;
use crate::models::quote::{MarketCapCategory, QuoteInfo};
use crate::models::record::Record;
use chrono::{DateTime, Utc};
use regex::Regex;
use std::sync::LazyLock;

macro_rules! re {
    ($pat:expr) => {
        LazyLock::new(|| Regex::new($pat).unwrap())
    };
}

static RE_STREAMER: LazyLock<Regex> =
    re!(r#"(?is)<fin-streamer\b([^>]*)>(.*?)</fin-streamer>"#);
static RE_DATA_FIELD: LazyLock<Regex> = re!(r#"(?i)data-field\s*=\s*["']([A-Za-z]+)["']"#);
static RE_ROW: LazyLock<Regex> = re!(r"(?is)<tr\b[^>]*>(.*?)</tr>");
static RE_CELL: LazyLock<Regex> = re!(r"(?is)<td\b[^>]*>(.*?)</td>");

/// Fields scraped from a quote page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuoteSnapshot {
    pub price: Option<f64>,
    pub change: Option<f64>,
    pub change_percent: Option<f64>,
    pub previous_close: Option<f64>,
    pub open: Option<f64>,
    pub day_low: Option<f64>,
    pub day_high: Option<f64>,
    pub volume: Option<u64>,
    pub market_cap: Option<String>,
    pub pe_ratio: Option<f64>,
}

impl QuoteSnapshot {
    fn is_empty(&self) -> bool {
        self.price.is_none() && self.open.is_none() && self.day_low.is_none() && self.volume.is_none()
    }

    /// Split into the OHLCV record and the remaining quote fields.
    pub fn into_parts(self, symbol: &str, timestamp: DateTime<Utc>, source: &str) -> (Record, QuoteInfo) {
        let mut record = Record::new(symbol, timestamp, source);
        record.open = self.open;
        record.high = self.day_high;
        record.low = self.day_low;
        record.close = self.price;
        record.volume = self.volume;

        let info = QuoteInfo {
            symbol: record.symbol.clone(),
            source: source.to_string(),
            as_of: timestamp,
            price: self.price,
            change: self.change,
            change_percent: self.change_percent,
            previous_close: self.previous_close,
            market_cap: self.market_cap.as_deref().and_then(parse_market_cap),
            market_cap_category: MarketCapCategory::from_text(self.market_cap.as_deref()),
            market_cap_text: self.market_cap,
            pe_ratio: self.pe_ratio,
        };
        (record, info)
    }
}

/// Scan the quote page for streamer fields and the summary table.
pub fn extract_snapshot(html: &str) -> QuoteSnapshot {
    let mut snap = QuoteSnapshot::default();

    for cap in RE_STREAMER.captures_iter(html) {
        let Some(field) = RE_DATA_FIELD.captures(&cap[1]).map(|c| c[1].to_string()) else {
            continue;
        };
        let text = strip_tags(&cap[2]);
        // 同一字段只取第一次出现（页面顶部的主报价）
        match field.as_str() {
            "regularMarketPrice" if snap.price.is_none() => snap.price = clean_price(&text),
            "regularMarketChange" if snap.change.is_none() => snap.change = clean_price(&text),
            "regularMarketChangePercent" if snap.change_percent.is_none() => {
                snap.change_percent = clean_percentage(&text)
            }
            _ => {}
        }
    }

    for row in RE_ROW.captures_iter(html) {
        let cells: Vec<String> = RE_CELL.captures_iter(&row[1]).map(|c| strip_tags(&c[1])).collect();
        if cells.len() < 2 {
            continue;
        }
        let (key, value) = (cells[0].as_str(), cells[1].as_str());
        if key.starts_with("Previous Close") {
            snap.previous_close = clean_price(value);
        } else if key.starts_with("Open") {
            snap.open = clean_price(value);
        } else if key.starts_with("Day") && key.contains("Range") {
            if let Some((low, high)) = parse_range(value) {
                snap.day_low = Some(low);
                snap.day_high = Some(high);
            }
        } else if key.starts_with("Volume") {
            snap.volume = parse_volume(value);
        } else if key.starts_with("Market Cap") {
            snap.market_cap = Some(value.to_string());
        } else if key.starts_with("PE Ratio") || key.starts_with("P/E") {
            snap.pe_ratio = clean_price(value);
        }
    }

    snap
}

/// Parse a quote page into one snapshot record stamped `fetched_at` plus
/// the fields a record cannot hold.
pub fn parse_quote(
    html: &str,
    source: &str,
    symbol: &str,
    fetched_at: DateTime<Utc>,
) -> Result<(Record, QuoteInfo), ParseError> {
    let snap = extract_snapshot(html);
    if snap.is_empty() {
        return Err(ParseError::MissingStructure(format!(
            "no quote fields on page for {}",
            symbol
        )));
    }
    Ok(snap.into_parts(symbol, fetched_at, source))
}

/// Keep only digits, dot and minus: `"$1,234.50"` -> 1234.5.
pub fn clean_price(text: &str) -> Option<f64> {
    let cleaned: String = text
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// `"(+1.25%)"` -> 1.25
pub fn clean_percentage(text: &str) -> Option<f64> {
    clean_price(text)
}

/// Number with optional K/M/B/T suffix, non-negative.
fn parse_abbreviated(text: &str) -> Option<f64> {
    let cleaned: String = text
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ',' && *c != '$')
        .collect();
    let (number, multiplier) = match cleaned.chars().last()?.to_ascii_uppercase() {
        'K' => (&cleaned[..cleaned.len() - 1], 1e3),
        'M' => (&cleaned[..cleaned.len() - 1], 1e6),
        'B' => (&cleaned[..cleaned.len() - 1], 1e9),
        'T' => (&cleaned[..cleaned.len() - 1], 1e12),
        _ => (cleaned.as_str(), 1.0),
    };
    let value = number.parse::<f64>().ok()? * multiplier;
    (value.is_finite() && value >= 0.0).then_some(value)
}

/// Volume text with optional K/M/B/T suffix: `"58.41M"` -> 58_410_000.
pub fn parse_volume(text: &str) -> Option<u64> {
    parse_abbreviated(text).map(|v| v.round() as u64)
}

/// `"2.95T"` -> 2.95e12
pub fn parse_market_cap(text: &str) -> Option<f64> {
    parse_abbreviated(text)
}

/// `"180.17 - 185.50"` -> (180.17, 185.5), ordered low first.
pub fn parse_range(text: &str) -> Option<(f64, f64)> {
    let (a, b) = text.split_once(" - ")?;
    let a = clean_price(a)?;
    let b = clean_price(b)?;
    Some((a.min(b), a.max(b)))
}

/// Remove tags, decode the common entities and collapse whitespace.
fn strip_tags(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_tag = false;
    for ch in s.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(ch),
            _ => {}
        }
    }
    let out = out
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&#x27;", "'")
        .replace("&#39;", "'");
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const PAGE: &str = r#"
<html><body>
<h1>Apple Inc. (AAPL)</h1>
<fin-streamer class="livePrice" data-symbol="AAPL" data-field="regularMarketPrice" data-value="189.84"><span>189.84</span></fin-streamer>
<fin-streamer data-field="regularMarketChange" data-symbol="AAPL"><span>-1.20</span></fin-streamer>
<fin-streamer data-field="regularMarketChangePercent" data-symbol="AAPL"><span>(-0.63%)</span></fin-streamer>
<table>
  <tr><td><span>Previous Close</span></td><td>191.04</td></tr>
  <tr><td><span>Open</span></td><td>190.50</td></tr>
  <tr><td>Day&#x27;s Range</td><td>188.19 - 191.05</td></tr>
  <tr><td>52 Week Range</td><td>164.08 - 199.62</td></tr>
  <tr><td>Volume</td><td>48,087,681</td></tr>
  <tr><td>Avg. Volume</td><td>55,134,208</td></tr>
  <tr><td>Market Cap</td><td>2.95T</td></tr>
  <tr><td>PE Ratio (TTM)</td><td>29.52</td></tr>
</table>
<fin-streamer data-field="regularMarketPrice" data-symbol="^GSPC"><span>4,783.45</span></fin-streamer>
</body></html>"#;

    #[test]
    fn extracts_streamers_and_summary_table() {
        let snap = extract_snapshot(PAGE);
        assert_eq!(snap.price, Some(189.84));
        assert_eq!(snap.change, Some(-1.20));
        assert_eq!(snap.change_percent, Some(-0.63));
        assert_eq!(snap.previous_close, Some(191.04));
        assert_eq!(snap.open, Some(190.50));
        assert_eq!(snap.day_low, Some(188.19));
        assert_eq!(snap.day_high, Some(191.05));
        assert_eq!(snap.volume, Some(48_087_681));
        assert_eq!(snap.market_cap.as_deref(), Some("2.95T"));
        assert_eq!(snap.pe_ratio, Some(29.52));
    }

    #[test]
    fn snapshot_becomes_record_and_quote_info() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 5, 21, 0, 0).unwrap();
        let (r, info) = parse_quote(PAGE, "yahoo_quote", "aapl", ts).unwrap();
        assert_eq!((r.symbol.as_str(), r.timestamp), ("AAPL", ts));
        assert_eq!((r.open, r.high, r.low, r.close), (Some(190.5), Some(191.05), Some(188.19), Some(189.84)));

        assert_eq!(info.symbol, "AAPL");
        assert_eq!(info.source, "yahoo_quote");
        assert_eq!(info.as_of, ts);
        assert_eq!(info.change, Some(-1.20));
        assert_eq!(info.change_percent, Some(-0.63));
        assert_eq!(info.previous_close, Some(191.04));
        assert_eq!(info.market_cap_text.as_deref(), Some("2.95T"));
        assert_eq!(info.market_cap_category, MarketCapCategory::Mega);
        assert!((info.market_cap.unwrap() - 2.95e12).abs() < 1.0);
        assert_eq!(info.pe_ratio, Some(29.52));
    }

    #[test]
    fn page_without_quote_fields_is_missing_structure() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 5, 21, 0, 0).unwrap();
        let err = parse_quote("<html><p>Symbol Lookup</p></html>", "q", "ZZZ", ts).unwrap_err();
        assert!(matches!(err, ParseError::MissingStructure(_)));
    }

    #[test]
    fn text_cleanup_helpers() {
        assert_eq!(clean_price("$1,234.50"), Some(1234.5));
        assert_eq!(clean_price("N/A"), None);
        assert_eq!(clean_percentage("(+2.15%)"), Some(2.15));
        assert_eq!(parse_volume("1.5K"), Some(1500));
        assert_eq!(parse_volume("58.41M"), Some(58_410_000));
        assert_eq!(parse_volume("2B"), Some(2_000_000_000));
        assert_eq!(parse_volume("N/A"), None);
        assert_eq!(parse_market_cap("$812.4B"), Some(812.4e9));
        assert_eq!(parse_market_cap("N/A"), None);
        assert_eq!(parse_range("185.50 - 180.17"), Some((180.17, 185.5)));
        assert_eq!(parse_range("--"), None);
    }
}
