pub mod chart_json;
pub mod quote_html;

use crate::config::PipelineConfig;
use crate::errors::ParseError;
use crate::models::quote::QuoteInfo;
use crate::models::record::{Field, Record};
use crate::scrapers::base::{ContentFormat, RawContent};
use log::{info, warn};
use std::collections::HashMap;

/// A per-symbol parse failure that did not abort the batch.
#[derive(Debug)]
pub struct ParseWarning {
    pub source: String,
    pub symbol: String,
    pub error: ParseError,
}

#[derive(Debug, Default)]
pub struct ParseOutcome {
    pub records: Vec<Record>,
    /// Quote page extras, one per parsed quote body
    pub quotes: Vec<QuoteInfo>,
    pub warnings: Vec<ParseWarning>,
}

/// Turns raw content into records, applying per-source unit scaling.
#[derive(Debug, Clone, Default)]
pub struct Parser {
    price_scales: HashMap<String, f64>,
}

impl Parser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        let mut parser = Self::new();
        for source in &config.sources {
            parser = parser.with_price_scale(&source.id, source.price_scale);
        }
        parser
    }

    pub fn with_price_scale(mut self, source: &str, scale: f64) -> Self {
        self.price_scales.insert(source.to_string(), scale);
        self
    }

    /// Parse one body; prices come out in dataset units.
    pub fn parse(&self, content: &RawContent) -> Result<Vec<Record>, ParseError> {
        self.parse_content(content).map(|(records, _)| records)
    }

    fn parse_content(&self, content: &RawContent) -> Result<(Vec<Record>, Option<QuoteInfo>), ParseError> {
        let (mut records, mut quote) = match content.format {
            ContentFormat::ChartJson => (
                chart_json::parse_chart(&content.body, &content.source, &content.symbol)?,
                None,
            ),
            ContentFormat::QuoteHtml => {
                let (record, info) = quote_html::parse_quote(
                    &content.body,
                    &content.source,
                    &content.symbol,
                    content.fetched_at,
                )?;
                (vec![record], Some(info))
            }
        };

        let scale = self.price_scales.get(&content.source).copied().unwrap_or(1.0);
        if scale != 1.0 {
            for record in &mut records {
                for field in Field::PRICES {
                    let scaled = record.get(field).map(|v| v * scale);
                    record.set(field, scaled);
                }
            }
            if let Some(info) = quote.as_mut() {
                info.scale_prices(scale);
            }
        }
        Ok((records, quote))
    }

    /// Parse every body; failures become warnings instead of errors.
    pub fn parse_batch(&self, contents: &[RawContent]) -> ParseOutcome {
        let mut outcome = ParseOutcome::default();
        for content in contents {
            match self.parse_content(content) {
                Ok((records, quote)) => {
                    outcome.records.extend(records);
                    outcome.quotes.extend(quote);
                }
                Err(error) => {
                    warn!("解析失败 {} {}: {}", content.source, content.symbol, error);
                    outcome.warnings.push(ParseWarning {
                        source: content.source.clone(),
                        symbol: content.symbol.clone(),
                        error,
                    });
                }
            }
        }
        info!(
            "解析完成: {} 条记录, {} 个警告",
            outcome.records.len(),
            outcome.warnings.len()
        );
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn content(source: &str, symbol: &str, format: ContentFormat, body: &str) -> RawContent {
        RawContent {
            source: source.into(),
            symbol: symbol.into(),
            format,
            body: body.into(),
            fetched_at: Utc::now(),
        }
    }

    const CHART: &str = r#"{"chart":{"result":[{"timestamp":[1704205800],"indicators":{"quote":[{"open":[18715],"high":[18844],"low":[18389],"close":[18564],"volume":[100]}]}}],"error":null}}"#;

    #[test]
    fn scale_applies_to_prices_not_volume() {
        let parser = Parser::new().with_price_scale("cents", 0.01);
        let records = parser
            .parse(&content("cents", "AAPL", ContentFormat::ChartJson, CHART))
            .unwrap();
        assert!((records[0].close.unwrap() - 185.64).abs() < 1e-9);
        assert_eq!(records[0].volume, Some(100));
    }

    #[test]
    fn batch_keeps_going_after_a_failure() {
        let parser = Parser::new();
        let contents = vec![
            content("yahoo", "AAPL", ContentFormat::ChartJson, CHART),
            content("yahoo", "BAD", ContentFormat::ChartJson, "not json"),
            content("quote", "MSFT", ContentFormat::QuoteHtml, "<html></html>"),
        ];
        let outcome = parser.parse_batch(&contents);
        assert_eq!(outcome.records.len(), 1);
        assert!(outcome.quotes.is_empty());
        assert_eq!(outcome.warnings.len(), 2);
        assert_eq!(outcome.warnings[0].symbol, "BAD");
        assert!(matches!(outcome.warnings[1].error, ParseError::MissingStructure(_)));
    }

    const QUOTE: &str = r#"<html>
<fin-streamer data-field="regularMarketPrice"><span>18984</span></fin-streamer>
<fin-streamer data-field="regularMarketChange"><span>-120</span></fin-streamer>
<table>
  <tr><td>Previous Close</td><td>19104</td></tr>
  <tr><td>Market Cap</td><td>2.95T</td></tr>
  <tr><td>PE Ratio (TTM)</td><td>29.52</td></tr>
</table>
</html>"#;

    #[test]
    fn quote_extras_are_kept_and_scaled() {
        let parser = Parser::new().with_price_scale("cents", 0.01);
        let outcome = parser.parse_batch(&[content("cents", "aapl", ContentFormat::QuoteHtml, QUOTE)]);
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.quotes.len(), 1);

        let quote = &outcome.quotes[0];
        assert_eq!(quote.symbol, "AAPL");
        assert!((quote.previous_close.unwrap() - 191.04).abs() < 1e-9);
        assert!((quote.change.unwrap() + 1.20).abs() < 1e-9);
        assert_eq!(quote.pe_ratio, Some(29.52));
        assert_eq!(quote.market_cap_category, crate::models::quote::MarketCapCategory::Mega);
    }
}
