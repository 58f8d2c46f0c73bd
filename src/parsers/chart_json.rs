use crate::errors::ParseError;
use crate::models::record::Record;
use chrono::{TimeZone, Utc};
use serde::Deserialize;

#[derive(Deserialize, Debug)]
struct ChartResponse {
    chart: Chart,
}

#[derive(Deserialize, Debug)]
struct Chart {
    result: Option<Vec<ChartResult>>,
    error: Option<ChartError>,
}

#[derive(Deserialize, Debug)]
struct ChartError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    description: String,
}

#[derive(Deserialize, Debug)]
struct ChartResult {
    // 空区间时 Yahoo 不返回 timestamp
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: Indicators,
}

#[derive(Deserialize, Debug)]
struct Indicators {
    #[serde(default)]
    quote: Vec<QuoteSeries>,
}

#[derive(Deserialize, Debug, Default)]
struct QuoteSeries {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

fn at(values: &[Option<f64>], i: usize) -> Option<f64> {
    values.get(i).copied().flatten()
}

/// Parse a v8 chart response into one record per timestamp.
///
/// Gaps (null entries, short arrays) become missing fields rather than
/// errors; the cleaner decides what to do with them.
pub fn parse_chart(body: &str, source: &str, symbol: &str) -> Result<Vec<Record>, ParseError> {
    let response: ChartResponse = serde_json::from_str(body)?;

    if let Some(err) = response.chart.error {
        return Err(ParseError::Upstream(format!("{}: {}", err.code, err.description)));
    }

    let result = response
        .chart
        .result
        .and_then(|r| r.into_iter().next())
        .ok_or_else(|| ParseError::MissingStructure("chart.result".to_string()))?;

    let quote = result.indicators.quote.into_iter().next().unwrap_or_default();

    let mut records = Vec::with_capacity(result.timestamp.len());
    for (i, ts) in result.timestamp.iter().enumerate() {
        let Some(timestamp) = Utc.timestamp_opt(*ts, 0).single() else {
            continue;
        };
        let mut record = Record::new(symbol, timestamp, source);
        record.open = at(&quote.open, i);
        record.high = at(&quote.high, i);
        record.low = at(&quote.low, i);
        record.close = at(&quote.close, i);
        record.volume = at(&quote.volume, i)
            .filter(|v| v.is_finite() && *v >= 0.0)
            .map(|v| v.round() as u64);
        records.push(record);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &str = r#"{
      "chart": {
        "result": [{
          "meta": {"symbol": "AAPL", "currency": "USD"},
          "timestamp": [1704205800, 1704292200, 1704378600],
          "indicators": {
            "quote": [{
              "open":   [187.15, 184.22, null],
              "high":   [188.44, 185.88, 183.09],
              "low":    [183.89, 183.43, 180.88],
              "close":  [185.64, 184.25, 181.91],
              "volume": [82488700, 58414500]
            }],
            "adjclose": [{"adjclose": [185.4, 184.0, 181.7]}]
          }
        }],
        "error": null
      }
    }"#;

    #[test]
    fn parses_rows_and_keeps_gaps() {
        let records = parse_chart(BODY, "yahoo", "aapl").unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].symbol, "AAPL");
        assert_eq!(records[0].timestamp.timestamp(), 1704205800);
        assert_eq!(records[0].close, Some(185.64));
        assert_eq!(records[0].volume, Some(82488700));
        assert_eq!(records[2].open, None);
        assert_eq!(records[2].volume, None);
        assert_eq!(records[2].close, Some(181.91));
    }

    #[test]
    fn upstream_error_is_reported() {
        let body = r#"{"chart":{"result":null,"error":{"code":"Not Found","description":"No data found, symbol may be delisted"}}}"#;
        match parse_chart(body, "yahoo", "ZZZZ") {
            Err(ParseError::Upstream(msg)) => assert!(msg.contains("delisted")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn missing_result_and_bad_json() {
        assert!(matches!(
            parse_chart(r#"{"chart":{"result":[],"error":null}}"#, "yahoo", "AAPL"),
            Err(ParseError::MissingStructure(_))
        ));
        assert!(matches!(parse_chart("<html>", "yahoo", "AAPL"), Err(ParseError::InvalidJson(_))));
    }

    #[test]
    fn empty_range_yields_no_records() {
        let body = r#"{"chart":{"result":[{"meta":{},"indicators":{"quote":[{}]}}],"error":null}}"#;
        assert!(parse_chart(body, "yahoo", "AAPL").unwrap().is_empty());
    }
}
