use crate::analysis::clustering::{kmeans, standardize, KMeansParams};
use crate::analysis::correlation::{correlation_matrix, ReturnSeries};
use crate::analysis::risk::risk_metrics;
use crate::analysis::stats::{self, change_percent, summarize};
use crate::config::AnalysisConfig;
use crate::errors::{InsufficientDataError, PipelineError, Result};
use crate::models::analysis::{
    AnalysisResult, ClusterSummary, Exclusion, MarketSegments, MarketSummary, Mover, PerformanceCategory, RiskMetrics,
    SegmentCount, SymbolStats, VolumeLeader,
};
use crate::models::dataset::Dataset;
use crate::models::quote::{MarketCapCategory, QuoteInfo};
use chrono::{DateTime, Utc};
use log::{debug, info};
use std::collections::BTreeMap;

/// Number of movers listed on each side of the market summary.
pub const TOP_MOVERS: usize = 5;

/// |change| beyond this many standard deviations marks a high-risk symbol.
pub const HIGH_RISK_SIGMA: f64 = 2.0;

/// Equal-width price bins, low to high.
pub const PRICE_RANGES: [&str; 5] = ["Very Low", "Low", "Medium", "High", "Very High"];

const UNKNOWN: &str = "Unknown";

struct SymbolSeries {
    timestamps: Vec<DateTime<Utc>>,
    closes: Vec<f64>,
    volumes: Vec<f64>,
}

impl SymbolSeries {
    fn returns(&self) -> Vec<f64> {
        stats::simple_returns(&self.closes)
    }

    fn return_series(&self) -> ReturnSeries {
        self.timestamps[1..].iter().copied().zip(self.returns()).collect()
    }
}

fn insufficient(symbol: &str, metric: &str, required: usize, available: usize) -> Exclusion {
    let err = InsufficientDataError {
        symbol: symbol.to_string(),
        metric: metric.to_string(),
        required,
        available,
    };
    debug!("{}", err);
    err.into()
}

/// Computes statistics, correlations, risk and clusters for a cleaned dataset.
pub struct Analyzer {
    config: AnalysisConfig,
}

impl Analyzer {
    pub fn new(config: AnalysisConfig) -> Self {
        Self { config }
    }

    pub fn analyze(&self, dataset: &Dataset) -> Result<AnalysisResult> {
        self.analyze_with_quotes(dataset, &[])
    }

    /// Like [`Analyzer::analyze`], with quote page fields feeding the
    /// market cap segments. Quotes for symbols outside `dataset` are ignored;
    /// the latest quote per symbol wins.
    pub fn analyze_with_quotes(&self, dataset: &Dataset, quotes: &[QuoteInfo]) -> Result<AnalysisResult> {
        let mut latest: BTreeMap<String, QuoteInfo> = BTreeMap::new();
        for quote in quotes.iter().filter(|q| dataset.contains_symbol(&q.symbol)) {
            match latest.get(&quote.symbol) {
                Some(kept) if kept.as_of >= quote.as_of => {}
                _ => {
                    latest.insert(quote.symbol.clone(), quote.clone());
                }
            }
        }

        let series: BTreeMap<String, SymbolSeries> = dataset
            .symbols()
            .into_iter()
            .map(|symbol| {
                let records = dataset.series(symbol);
                let mut s = SymbolSeries {
                    timestamps: Vec::with_capacity(records.len()),
                    closes: Vec::with_capacity(records.len()),
                    volumes: Vec::with_capacity(records.len()),
                };
                for r in records {
                    if let Some(close) = r.close {
                        s.timestamps.push(r.timestamp);
                        s.closes.push(close);
                        s.volumes.push(r.volume.unwrap_or(0) as f64);
                    }
                }
                (symbol.to_string(), s)
            })
            .filter(|(_, s)| !s.closes.is_empty())
            .collect();

        let mut exclusions = Vec::new();
        let mut symbol_stats = BTreeMap::new();
        let mut risk = BTreeMap::new();
        let mut correlation_input = BTreeMap::new();

        for (symbol, s) in &series {
            let returns = s.returns();
            let change = change_percent(&s.closes);

            let return_stats = if returns.len() >= self.config.min_history {
                summarize(&returns)
            } else {
                exclusions.push(insufficient(symbol, "return_stats", self.config.min_history, returns.len()));
                None
            };

            if let Some(close_stats) = summarize(&s.closes) {
                symbol_stats.insert(
                    symbol.clone(),
                    SymbolStats {
                        symbol: symbol.clone(),
                        observations: s.closes.len(),
                        last_close: s.closes[s.closes.len() - 1],
                        change_percent: change,
                        avg_volume: stats::mean(&s.volumes),
                        close: close_stats,
                        returns: return_stats,
                        performance: change.map(PerformanceCategory::from_change),
                    },
                );
            }

            if returns.len() >= self.config.risk_window {
                risk.insert(
                    symbol.clone(),
                    risk_metrics(symbol, &s.closes, &returns, self.config.var_confidence),
                );
            } else {
                exclusions.push(insufficient(symbol, "risk", self.config.risk_window, returns.len()));
            }

            if returns.len() >= self.config.correlation_min_overlap {
                correlation_input.insert(symbol.clone(), s.return_series());
            } else {
                exclusions.push(insufficient(
                    symbol,
                    "correlation",
                    self.config.correlation_min_overlap,
                    returns.len(),
                ));
            }
        }

        let correlations = correlation_matrix(&correlation_input, self.config.correlation_min_overlap);

        let (clusters, cluster_summaries) = self.cluster(&series, &risk, &mut exclusions);

        let market = market_summary(&symbol_stats, &latest);

        let result = AnalysisResult {
            run_id: dataset.run_id().to_string(),
            generated_at: Utc::now(),
            dataset_created_at: dataset.created_at(),
            record_count: dataset.len(),
            stats: symbol_stats,
            correlations,
            risk,
            clusters,
            cluster_summaries,
            market,
            quotes: latest,
            exclusions,
        };

        result.check_against(dataset).map_err(PipelineError::Invariant)?;

        info!(
            "分析完成: {} 个标的, {} 对相关性, {} 个聚类, {} 项排除",
            result.stats.len(),
            result.correlations.len(),
            result.cluster_summaries.len(),
            result.exclusions.len()
        );
        Ok(result)
    }

    fn cluster(
        &self,
        series: &BTreeMap<String, SymbolSeries>,
        risk: &BTreeMap<String, RiskMetrics>,
        exclusions: &mut Vec<Exclusion>,
    ) -> (BTreeMap<String, usize>, Vec<ClusterSummary>) {
        let mut symbols = Vec::new();
        let mut raw = Vec::new();
        for (symbol, s) in series {
            match risk.get(symbol) {
                Some(r) => {
                    symbols.push(symbol.clone());
                    raw.push(vec![stats::mean(&s.returns()), r.volatility, r.max_drawdown]);
                }
                None => exclusions.push(insufficient(
                    symbol,
                    "clustering",
                    self.config.risk_window,
                    s.closes.len().saturating_sub(1),
                )),
            }
        }

        let params = KMeansParams {
            k: self.config.clusters,
            seed: self.config.cluster_seed,
            restarts: self.config.cluster_restarts,
            max_iterations: self.config.cluster_max_iterations,
        };
        let Some(result) = kmeans(&standardize(&raw), &params) else {
            return (BTreeMap::new(), Vec::new());
        };

        let assignments: BTreeMap<String, usize> = symbols.iter().cloned().zip(result.labels.iter().copied()).collect();

        let summaries = (0..result.centroids.len())
            .map(|id| {
                let members: Vec<usize> = (0..symbols.len()).filter(|i| result.labels[*i] == id).collect();
                let avg = |col: usize| stats::mean(&members.iter().map(|i| raw[*i][col]).collect::<Vec<_>>());
                ClusterSummary {
                    id,
                    symbols: members.iter().map(|i| symbols[*i].clone()).collect(),
                    avg_return: avg(0),
                    avg_volatility: avg(1),
                    avg_drawdown: avg(2),
                }
            })
            .collect();

        (assignments, summaries)
    }
}

/// Gainers, losers, breadth, volume leaders and segments from per-symbol
/// stats. `quotes` only feeds the market cap segment.
pub fn market_summary(stats: &BTreeMap<String, SymbolStats>, quotes: &BTreeMap<String, QuoteInfo>) -> MarketSummary {
    let mut summary = MarketSummary {
        high_volume: volume_leaders(stats),
        avg_volume: (!stats.is_empty())
            .then(|| stats::mean(&stats.values().map(|s| s.avg_volume).collect::<Vec<_>>())),
        segments: market_segments(stats, quotes),
        ..MarketSummary::default()
    };

    let movers: Vec<Mover> = stats
        .values()
        .filter_map(|s| {
            s.change_percent.map(|change| Mover {
                symbol: s.symbol.clone(),
                change_percent: change,
                last_close: s.last_close,
            })
        })
        .collect();
    if movers.is_empty() {
        return summary;
    }

    let mut by_change = movers.clone();
    by_change.sort_by(|a, b| {
        b.change_percent
            .partial_cmp(&a.change_percent)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.symbol.cmp(&b.symbol))
    });
    summary.top_gainers = by_change.iter().take(TOP_MOVERS).cloned().collect();
    summary.top_losers = by_change.iter().rev().take(TOP_MOVERS).cloned().collect();

    let changes: Vec<f64> = movers.iter().map(|m| m.change_percent).collect();
    let sigma = stats::sample_std(&changes);
    if sigma > 0.0 {
        summary.high_risk = movers
            .iter()
            .filter(|m| m.change_percent.abs() > HIGH_RISK_SIGMA * sigma)
            .cloned()
            .collect();
    }

    summary.positive = changes.iter().filter(|c| **c > 0.0).count();
    summary.negative = changes.iter().filter(|c| **c < 0.0).count();
    summary.neutral = changes.iter().filter(|c| **c == 0.0).count();
    summary.avg_change_percent = Some(stats::mean(&changes));
    summary.median_change_percent = Some(stats::median(&changes));
    summary
}

fn volume_leaders(stats: &BTreeMap<String, SymbolStats>) -> Vec<VolumeLeader> {
    let mut leaders: Vec<VolumeLeader> = stats
        .values()
        .map(|s| VolumeLeader {
            symbol: s.symbol.clone(),
            avg_volume: s.avg_volume,
            last_close: s.last_close,
        })
        .collect();
    leaders.sort_by(|a, b| {
        b.avg_volume
            .partial_cmp(&a.avg_volume)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.symbol.cmp(&b.symbol))
    });
    leaders.truncate(TOP_MOVERS);
    leaders
}

fn counts<'a>(labels: impl IntoIterator<Item = &'a str>, values: &[&str]) -> Vec<SegmentCount> {
    labels
        .into_iter()
        .map(|label| SegmentCount {
            label: label.to_string(),
            count: values.iter().filter(|v| **v == label).count(),
        })
        .collect()
}

/// Bucket counts over every symbol in `stats`. Each segment sums to
/// `stats.len()`; symbols without the input land in `Unknown`.
pub fn market_segments(stats: &BTreeMap<String, SymbolStats>, quotes: &BTreeMap<String, QuoteInfo>) -> MarketSegments {
    if stats.is_empty() {
        return MarketSegments::default();
    }

    let caps: Vec<&str> = stats
        .keys()
        .map(|symbol| {
            quotes
                .get(symbol)
                .map_or(MarketCapCategory::Unknown, |q| q.market_cap_category)
                .label()
        })
        .collect();

    let performance: Vec<&str> = stats
        .values()
        .map(|s| s.performance.map_or(UNKNOWN, |p| p.label()))
        .collect();
    let mut performance_counts = counts(PerformanceCategory::ALL.iter().map(|p| p.label()), &performance);
    performance_counts.extend(counts([UNKNOWN], &performance));

    let closes: Vec<f64> = stats.values().map(|s| s.last_close).collect();
    let ranges: Vec<&str> = closes.iter().map(|c| PRICE_RANGES[price_bin(*c, &closes)]).collect();

    MarketSegments {
        market_cap: counts(MarketCapCategory::ALL.iter().map(|c| c.label()), &caps),
        performance: performance_counts,
        price_ranges: counts(PRICE_RANGES, &ranges),
    }
}

/// Index of the equal-width bin holding `value`; the top edge belongs to
/// the last bin, a zero-width range puts everything in the middle.
fn price_bin(value: f64, all: &[f64]) -> usize {
    let min = all.iter().copied().fold(f64::INFINITY, f64::min);
    let max = all.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let bins = PRICE_RANGES.len();
    if max <= min {
        return bins / 2;
    }
    let width = (max - min) / bins as f64;
    (((value - min) / width).floor() as usize).min(bins - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::dataset::TimeWindow;
    use crate::models::record::Record;
    use chrono::{Duration, TimeZone};

    fn build(prices: &[(&str, Vec<f64>)]) -> Dataset {
        let base = Utc.with_ymd_and_hms(2025, 1, 1, 21, 0, 0).unwrap();
        let mut records = Vec::new();
        for (symbol, closes) in prices {
            for (i, c) in closes.iter().enumerate() {
                records.push(
                    Record::new(symbol, base + Duration::days(i as i64), "yahoo")
                        .with_prices(*c, *c, *c, *c)
                        .with_volume(1_000),
                );
            }
        }
        let symbols: Vec<String> = prices.iter().map(|(s, _)| s.to_string()).collect();
        Dataset::new("run", base, &symbols, TimeWindow::new(base, base + Duration::days(100)), records)
    }

    fn config() -> AnalysisConfig {
        AnalysisConfig {
            risk_window: 5,
            correlation_min_overlap: 5,
            ..AnalysisConfig::default()
        }
    }

    fn walk(start: f64, steps: &[f64]) -> Vec<f64> {
        let mut out = vec![start];
        for s in steps {
            let last = out[out.len() - 1];
            out.push(last * (1.0 + s));
        }
        out
    }

    #[test]
    fn short_history_is_excluded_per_metric() {
        let steps = [0.01, -0.02, 0.015, 0.0, 0.01, -0.005, 0.02];
        let dataset = build(&[("AAPL", walk(100.0, &steps)), ("NEW", vec![10.0, 10.5])]);
        let result = Analyzer::new(config()).analyze(&dataset).unwrap();

        assert!(result.stats.contains_key("NEW"));
        assert!(result.risk.contains_key("AAPL"));
        assert!(!result.risk.contains_key("NEW"));
        assert!(!result.clusters.contains_key("NEW"));
        let metrics: Vec<&str> = result
            .exclusions
            .iter()
            .filter(|e| e.symbol == "NEW")
            .map(|e| e.metric.as_str())
            .collect();
        assert_eq!(metrics, vec!["return_stats", "risk", "correlation", "clustering"]);
        assert!((result.stats["NEW"].change_percent.unwrap() - 5.0).abs() < 1e-9);
        assert_eq!(result.stats["NEW"].performance, Some(PerformanceCategory::Positive));
    }

    #[test]
    fn correlated_symbols_and_cluster_membership() {
        let steps = [0.01, -0.02, 0.015, 0.0, 0.01, -0.005, 0.02, -0.01];
        let doubled: Vec<f64> = steps.iter().map(|s| s * 2.0).collect();
        let inverse: Vec<f64> = steps.iter().map(|s| -s).collect();
        let dataset = build(&[
            ("AAPL", walk(100.0, &steps)),
            ("MSFT", walk(50.0, &doubled)),
            ("TSLA", walk(200.0, &inverse)),
        ]);
        let result = Analyzer::new(config()).analyze(&dataset).unwrap();

        assert!((result.correlation("AAPL", "MSFT").unwrap() - 1.0).abs() < 1e-9);
        assert!((result.correlation("TSLA", "AAPL").unwrap() + 1.0).abs() < 1e-9);
        assert_eq!(result.correlations.len(), 3);
        assert!(result.correlations.iter().all(|c| c.a < c.b));

        assert_eq!(result.clusters.len(), 3);
        for symbol in result.clusters.keys() {
            assert!(dataset.contains_symbol(symbol));
        }
        assert!(result.check_against(&dataset).is_ok());
    }

    #[test]
    fn market_summary_ranks_and_counts() {
        let dataset = build(&[
            ("A", vec![100.0, 110.0]),
            ("B", vec![100.0, 90.0]),
            ("C", vec![100.0, 100.0]),
            ("D", vec![100.0, 101.0]),
        ]);
        let result = Analyzer::new(config()).analyze(&dataset).unwrap();
        let market = &result.market;
        assert_eq!(market.top_gainers[0].symbol, "A");
        assert_eq!(market.top_losers[0].symbol, "B");
        assert_eq!((market.positive, market.negative, market.neutral), (2, 1, 1));
        assert!((market.avg_change_percent.unwrap() - 0.25).abs() < 1e-9);
        assert!(market.high_risk.is_empty());
    }

    fn quote(symbol: &str, cap: &str, day: u32) -> QuoteInfo {
        QuoteInfo {
            symbol: symbol.into(),
            source: "yahoo_quote".into(),
            as_of: Utc.with_ymd_and_hms(2025, 1, day, 21, 0, 0).unwrap(),
            price: None,
            change: None,
            change_percent: None,
            previous_close: None,
            market_cap_text: Some(cap.into()),
            market_cap: None,
            market_cap_category: MarketCapCategory::from_text(Some(cap)),
            pe_ratio: Some(20.0),
        }
    }

    fn segment(counts: &[SegmentCount]) -> Vec<(&str, usize)> {
        counts.iter().map(|c| (c.label.as_str(), c.count)).collect()
    }

    #[test]
    fn segments_cover_every_symbol() {
        let dataset = build(&[
            ("A", vec![100.0, 110.0]),
            ("B", vec![10.0, 9.0]),
            ("C", vec![50.0, 50.0]),
            ("D", vec![20.0]),
        ]);
        let quotes = vec![
            quote("A", "2.95T", 1),
            quote("B", "950M", 1),
            quote("B", "1.2B", 3),
            quote("GHOST", "1T", 3),
        ];
        let result = Analyzer::new(config()).analyze_with_quotes(&dataset, &quotes).unwrap();

        assert_eq!(result.quotes.keys().collect::<Vec<_>>(), vec!["A", "B"]);
        assert_eq!(result.quotes["B"].market_cap_category, MarketCapCategory::Large);

        let segments = &result.market.segments;
        assert_eq!(
            segment(&segments.market_cap),
            vec![("Mega Cap", 1), ("Large Cap", 1), ("Mid Cap", 0), ("Small Cap", 0), ("Unknown", 2)]
        );
        assert_eq!(
            segment(&segments.performance),
            vec![
                ("Strong Positive", 1),
                ("Positive", 0),
                ("Neutral", 1),
                ("Negative", 0),
                ("Strong Negative", 1),
                ("Unknown", 1)
            ]
        );
        // closes 110, 9, 50, 20 over [9, 110]: width 20.2
        assert_eq!(
            segment(&segments.price_ranges),
            vec![("Very Low", 2), ("Low", 0), ("Medium", 1), ("High", 0), ("Very High", 1)]
        );
        assert!(result.check_against(&dataset).is_ok());
    }

    #[test]
    fn equal_prices_land_in_the_middle_bin() {
        let dataset = build(&[("A", vec![10.0, 10.0]), ("B", vec![11.0, 10.0])]);
        let result = Analyzer::new(config()).analyze(&dataset).unwrap();
        assert_eq!(
            segment(&result.market.segments.price_ranges),
            vec![("Very Low", 0), ("Low", 0), ("Medium", 2), ("High", 0), ("Very High", 0)]
        );
    }

    #[test]
    fn volume_leaders_by_average_volume() {
        let base = Utc.with_ymd_and_hms(2025, 1, 1, 21, 0, 0).unwrap();
        let mut records = Vec::new();
        for (i, (symbol, volume)) in [("A", 500), ("B", 3_000), ("C", 3_000), ("D", 10), ("E", 70), ("F", 9_000)]
            .iter()
            .enumerate()
        {
            for day in 0..2 {
                records.push(
                    Record::new(symbol, base + Duration::days(day), "yahoo")
                        .with_prices(10.0 + i as f64, 10.0 + i as f64, 10.0 + i as f64, 10.0 + i as f64)
                        .with_volume(*volume),
                );
            }
        }
        let symbols: Vec<String> = ["A", "B", "C", "D", "E", "F"].iter().map(|s| s.to_string()).collect();
        let dataset = Dataset::new("run", base, &symbols, TimeWindow::new(base, base + Duration::days(10)), records);
        let result = Analyzer::new(config()).analyze(&dataset).unwrap();

        let leaders: Vec<&str> = result.market.high_volume.iter().map(|v| v.symbol.as_str()).collect();
        assert_eq!(leaders, vec!["F", "B", "C", "A", "E"]);
        assert!((result.market.avg_volume.unwrap() - 15_580.0 / 6.0).abs() < 1e-9);
    }
}
