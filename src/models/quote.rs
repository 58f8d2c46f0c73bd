use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Size bucket read off the abbreviated market cap text (`"2.95T"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MarketCapCategory {
    Mega,
    Large,
    Mid,
    Small,
    Unknown,
}

impl MarketCapCategory {
    pub const ALL: [MarketCapCategory; 5] = [
        MarketCapCategory::Mega,
        MarketCapCategory::Large,
        MarketCapCategory::Mid,
        MarketCapCategory::Small,
        MarketCapCategory::Unknown,
    ];

    /// T → Mega, B → Large, M → Mid, anything else → Small.
    pub fn from_text(text: Option<&str>) -> Self {
        let Some(text) = text.map(str::trim).filter(|t| !t.is_empty()) else {
            return MarketCapCategory::Unknown;
        };
        let upper = text.to_ascii_uppercase();
        if upper.contains('T') {
            MarketCapCategory::Mega
        } else if upper.contains('B') {
            MarketCapCategory::Large
        } else if upper.contains('M') {
            MarketCapCategory::Mid
        } else {
            MarketCapCategory::Small
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            MarketCapCategory::Mega => "Mega Cap",
            MarketCapCategory::Large => "Large Cap",
            MarketCapCategory::Mid => "Mid Cap",
            MarketCapCategory::Small => "Small Cap",
            MarketCapCategory::Unknown => "Unknown",
        }
    }
}

/// Quote page fields that do not fit an OHLCV record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteInfo {
    pub symbol: String,
    pub source: String,
    pub as_of: DateTime<Utc>,
    pub price: Option<f64>,
    pub change: Option<f64>,
    pub change_percent: Option<f64>,
    pub previous_close: Option<f64>,
    /// As shown on the page, e.g. `"2.95T"`.
    pub market_cap_text: Option<String>,
    pub market_cap: Option<f64>,
    pub market_cap_category: MarketCapCategory,
    pub pe_ratio: Option<f64>,
}

impl QuoteInfo {
    /// Multiply the price fields by `scale`; percent and ratios stay as is.
    pub fn scale_prices(&mut self, scale: f64) {
        for value in [&mut self.price, &mut self.change, &mut self.previous_close] {
            *value = value.map(|v| v * scale);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn market_cap_buckets() {
        assert_eq!(MarketCapCategory::from_text(Some("2.95T")), MarketCapCategory::Mega);
        assert_eq!(MarketCapCategory::from_text(Some("812.4B")), MarketCapCategory::Large);
        assert_eq!(MarketCapCategory::from_text(Some("950m")), MarketCapCategory::Mid);
        assert_eq!(MarketCapCategory::from_text(Some("120,000")), MarketCapCategory::Small);
        assert_eq!(MarketCapCategory::from_text(Some("  ")), MarketCapCategory::Unknown);
        assert_eq!(MarketCapCategory::from_text(None), MarketCapCategory::Unknown);
        assert_eq!(MarketCapCategory::Mega.label(), "Mega Cap");
    }
}
