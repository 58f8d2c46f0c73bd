use crate::errors::InsufficientDataError;
use crate::models::dataset::Dataset;
use crate::models::quote::QuoteInfo;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Summary statistics of one numeric series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryStats {
    pub count: usize,
    pub mean: f64,
    pub median: f64,
    /// Sample standard deviation (n - 1); 0 for a single value.
    pub std: f64,
    pub min: f64,
    pub max: f64,
    pub q25: f64,
    pub q75: f64,
    pub skewness: f64,
    /// Excess kurtosis (normal = 0).
    pub kurtosis: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PerformanceCategory {
    StrongPositive,
    Positive,
    Neutral,
    Negative,
    StrongNegative,
}

impl PerformanceCategory {
    pub const ALL: [PerformanceCategory; 5] = [
        PerformanceCategory::StrongPositive,
        PerformanceCategory::Positive,
        PerformanceCategory::Neutral,
        PerformanceCategory::Negative,
        PerformanceCategory::StrongNegative,
    ];

    /// Bucket a percent change: >5, >2, >-2, >-5, else.
    pub fn from_change(change_percent: f64) -> Self {
        if change_percent > 5.0 {
            PerformanceCategory::StrongPositive
        } else if change_percent > 2.0 {
            PerformanceCategory::Positive
        } else if change_percent > -2.0 {
            PerformanceCategory::Neutral
        } else if change_percent > -5.0 {
            PerformanceCategory::Negative
        } else {
            PerformanceCategory::StrongNegative
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            PerformanceCategory::StrongPositive => "Strong Positive",
            PerformanceCategory::Positive => "Positive",
            PerformanceCategory::Neutral => "Neutral",
            PerformanceCategory::Negative => "Negative",
            PerformanceCategory::StrongNegative => "Strong Negative",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolStats {
    pub symbol: String,
    pub observations: usize,
    pub last_close: f64,
    /// Last close against the previous close, in percent.
    pub change_percent: Option<f64>,
    pub avg_volume: f64,
    pub close: SummaryStats,
    pub returns: Option<SummaryStats>,
    pub performance: Option<PerformanceCategory>,
}

/// Pearson correlation of daily returns, `a < b`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Correlation {
    pub a: String,
    pub b: String,
    pub value: f64,
    pub observations: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskMetrics {
    pub symbol: String,
    pub volatility: f64,
    pub annualized_volatility: f64,
    /// Largest peak-to-trough decline as a negative fraction.
    pub max_drawdown: f64,
    /// Historical VaR, the loss quantile of daily returns (negative = loss).
    pub value_at_risk: f64,
    /// Mean of the returns at or below the VaR.
    pub conditional_var: f64,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterSummary {
    pub id: usize,
    pub symbols: Vec<String>,
    pub avg_return: f64,
    pub avg_volatility: f64,
    pub avg_drawdown: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mover {
    pub symbol: String,
    pub change_percent: f64,
    pub last_close: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeLeader {
    pub symbol: String,
    pub avg_volume: f64,
    pub last_close: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentCount {
    pub label: String,
    pub count: usize,
}

/// Symbol counts per bucket, buckets in fixed display order.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MarketSegments {
    pub market_cap: Vec<SegmentCount>,
    pub performance: Vec<SegmentCount>,
    /// Five equal-width bins over the last closes, Very Low to Very High.
    pub price_ranges: Vec<SegmentCount>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MarketSummary {
    pub top_gainers: Vec<Mover>,
    pub top_losers: Vec<Mover>,
    pub positive: usize,
    pub negative: usize,
    pub neutral: usize,
    pub avg_change_percent: Option<f64>,
    pub median_change_percent: Option<f64>,
    pub high_risk: Vec<Mover>,
    #[serde(default)]
    pub high_volume: Vec<VolumeLeader>,
    #[serde(default)]
    pub avg_volume: Option<f64>,
    #[serde(default)]
    pub segments: MarketSegments,
}

/// A symbol left out of one metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exclusion {
    pub symbol: String,
    pub metric: String,
    pub required: usize,
    pub available: usize,
}

impl From<InsufficientDataError> for Exclusion {
    fn from(e: InsufficientDataError) -> Self {
        Self {
            symbol: e.symbol,
            metric: e.metric,
            required: e.required,
            available: e.available,
        }
    }
}

/// Everything derived from one cleaned dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub run_id: String,
    pub generated_at: DateTime<Utc>,
    pub dataset_created_at: DateTime<Utc>,
    pub record_count: usize,
    pub stats: BTreeMap<String, SymbolStats>,
    pub correlations: Vec<Correlation>,
    pub risk: BTreeMap<String, RiskMetrics>,
    pub clusters: BTreeMap<String, usize>,
    pub cluster_summaries: Vec<ClusterSummary>,
    pub market: MarketSummary,
    /// Latest quote page fields per symbol, when a quote source ran.
    #[serde(default)]
    pub quotes: BTreeMap<String, QuoteInfo>,
    pub exclusions: Vec<Exclusion>,
}

impl AnalysisResult {
    pub fn correlation(&self, a: &str, b: &str) -> Option<f64> {
        let (a, b) = if a <= b { (a, b) } else { (b, a) };
        self.correlations
            .iter()
            .find(|c| c.a == a && c.b == b)
            .map(|c| c.value)
    }

    /// Pairs whose absolute correlation is at least `threshold`.
    pub fn strong_correlations(&self, threshold: f64) -> Vec<&Correlation> {
        self.correlations
            .iter()
            .filter(|c| c.value.abs() >= threshold)
            .collect()
    }

    /// Every symbol referenced anywhere in the result.
    pub fn mentioned_symbols(&self) -> BTreeSet<&str> {
        let mut symbols = BTreeSet::new();
        symbols.extend(self.stats.keys().map(|s| s.as_str()));
        symbols.extend(self.risk.keys().map(|s| s.as_str()));
        symbols.extend(self.clusters.keys().map(|s| s.as_str()));
        for c in &self.correlations {
            symbols.insert(c.a.as_str());
            symbols.insert(c.b.as_str());
        }
        for summary in &self.cluster_summaries {
            symbols.extend(summary.symbols.iter().map(|s| s.as_str()));
        }
        let market = &self.market;
        for mover in market.top_gainers.iter().chain(&market.top_losers).chain(&market.high_risk) {
            symbols.insert(mover.symbol.as_str());
        }
        symbols.extend(market.high_volume.iter().map(|v| v.symbol.as_str()));
        symbols.extend(self.quotes.keys().map(|s| s.as_str()));
        symbols.extend(self.exclusions.iter().map(|e| e.symbol.as_str()));
        symbols
    }

    /// Check that the result only names symbols present in `dataset`.
    pub fn check_against(&self, dataset: &Dataset) -> Result<(), String> {
        let unknown: Vec<&str> = self
            .mentioned_symbols()
            .into_iter()
            .filter(|s| !dataset.contains_symbol(s))
            .collect();
        if !unknown.is_empty() {
            return Err(format!("symbols not in dataset {}: {}", dataset.run_id(), unknown.join(", ")));
        }
        for c in &self.correlations {
            if c.a >= c.b {
                return Err(format!("correlation pair not ordered: ({}, {})", c.a, c.b));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn performance_thresholds() {
        assert_eq!(PerformanceCategory::from_change(5.1), PerformanceCategory::StrongPositive);
        assert_eq!(PerformanceCategory::from_change(5.0), PerformanceCategory::Positive);
        assert_eq!(PerformanceCategory::from_change(0.0), PerformanceCategory::Neutral);
        assert_eq!(PerformanceCategory::from_change(-2.0), PerformanceCategory::Negative);
        assert_eq!(PerformanceCategory::from_change(-7.5), PerformanceCategory::StrongNegative);
        assert_eq!(PerformanceCategory::StrongNegative.label(), "Strong Negative");
    }
}
