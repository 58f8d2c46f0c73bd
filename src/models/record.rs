use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Required numeric fields of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Field {
    Open,
    High,
    Low,
    Close,
    Volume,
}

impl Field {
    pub const ALL: [Field; 5] = [Field::Open, Field::High, Field::Low, Field::Close, Field::Volume];
    pub const PRICES: [Field; 4] = [Field::Open, Field::High, Field::Low, Field::Close];

    pub fn name(&self) -> &'static str {
        match self {
            Field::Open => "open",
            Field::High => "high",
            Field::Low => "low",
            Field::Close => "close",
            Field::Volume => "volume",
        }
    }
}

/// (symbol, timestamp, source) 唯一标识一条记录
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordKey {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub source: String,
}

/// One observation for one symbol at one timestamp from one source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub volume: Option<u64>,
    /// Set by the cleaner when the close is a statistical outlier.
    #[serde(default)]
    pub outlier: bool,
    /// Set by the cleaner when at least one field was filled in.
    #[serde(default)]
    pub imputed: bool,
}

impl Record {
    pub fn new(symbol: &str, timestamp: DateTime<Utc>, source: &str) -> Self {
        Self {
            symbol: normalize_symbol(symbol),
            timestamp,
            source: source.to_string(),
            open: None,
            high: None,
            low: None,
            close: None,
            volume: None,
            outlier: false,
            imputed: false,
        }
    }

    pub fn with_prices(mut self, open: f64, high: f64, low: f64, close: f64) -> Self {
        self.open = Some(open);
        self.high = Some(high);
        self.low = Some(low);
        self.close = Some(close);
        self
    }

    pub fn with_volume(mut self, volume: u64) -> Self {
        self.volume = Some(volume);
        self
    }

    pub fn key(&self) -> RecordKey {
        RecordKey {
            symbol: self.symbol.clone(),
            timestamp: self.timestamp,
            source: self.source.clone(),
        }
    }

    /// Field value as `f64` (volume converted).
    pub fn get(&self, field: Field) -> Option<f64> {
        match field {
            Field::Open => self.open,
            Field::High => self.high,
            Field::Low => self.low,
            Field::Close => self.close,
            Field::Volume => self.volume.map(|v| v as f64),
        }
    }

    /// Set a field from an `f64`; volume is rounded and clamped at zero.
    pub fn set(&mut self, field: Field, value: Option<f64>) {
        match field {
            Field::Open => self.open = value,
            Field::High => self.high = value,
            Field::Low => self.low = value,
            Field::Close => self.close = value,
            Field::Volume => self.volume = value.map(|v| v.max(0.0).round() as u64),
        }
    }

    pub fn missing_fields(&self) -> usize {
        Field::ALL.iter().filter(|f| self.get(**f).is_none()).count()
    }

    pub fn missing_fraction(&self) -> f64 {
        self.missing_fields() as f64 / Field::ALL.len() as f64
    }

    pub fn is_complete(&self) -> bool {
        self.missing_fields() == 0
    }
}

/// Canonical symbol form: trimmed and upper-cased.
pub fn normalize_symbol(symbol: &str) -> String {
    symbol.trim().to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn new_record_normalizes_symbol_and_is_empty() {
        let ts = Utc.with_ymd_and_hms(2025, 1, 2, 0, 0, 0).unwrap();
        let record = Record::new(" aapl ", ts, "yahoo");
        assert_eq!(record.symbol, "AAPL");
        assert_eq!(record.missing_fields(), 5);
        assert_eq!(record.missing_fraction(), 1.0);
    }

    #[test]
    fn set_volume_rounds_and_clamps() {
        let ts = Utc.with_ymd_and_hms(2025, 1, 2, 0, 0, 0).unwrap();
        let mut record = Record::new("MSFT", ts, "yahoo").with_prices(1.0, 2.0, 0.5, 1.5);
        record.set(Field::Volume, Some(1234.6));
        assert_eq!(record.volume, Some(1235));
        record.set(Field::Volume, Some(-3.0));
        assert_eq!(record.volume, Some(0));
        assert!(record.is_complete());
    }
}
