use crate::config::{CleaningConfig, ImputeStrategy};
use crate::models::dataset::Dataset;
use crate::models::record::{Field, Record};
use chrono::Timelike;
use log::{debug, info};
use serde::Serialize;
use std::collections::BTreeMap;

/// What a cleaning pass changed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CleanReport {
    pub input_records: usize,
    pub output_records: usize,
    /// Values discarded as non-finite or non-positive prices
    pub invalid_values: usize,
    pub dropped_symbols: Vec<String>,
    pub dropped_records: usize,
    pub imputed_values: usize,
    pub unfillable_records: usize,
    pub outliers: usize,
}

/// Normalizes, drops, imputes and flags a dataset.
///
/// `clean(clean(d)) == clean(d)`: normalization is a fixed point, complete
/// records are never dropped or imputed again, and outlier flags are
/// recomputed from scratch on every pass.
pub struct Cleaner {
    config: CleaningConfig,
}

impl Cleaner {
    pub fn new(config: CleaningConfig) -> Self {
        Self { config }
    }

    pub fn clean(&self, dataset: &Dataset) -> (Dataset, CleanReport) {
        let mut report = CleanReport {
            input_records: dataset.len(),
            ..CleanReport::default()
        };

        // 1. 格式标准化
        let normalized: Vec<Record> = dataset
            .records()
            .iter()
            .map(|r| self.normalize(r, &mut report))
            .collect();
        // truncating timestamps can collide keys, the rebuild collapses them
        let normalized = dataset.with_records(normalized);

        // 2. 删除缺失过多的标的和记录
        let threshold = self.config.max_missing_fraction;
        let mut kept: Vec<Record> = Vec::with_capacity(normalized.len());
        for symbol in normalized.symbols() {
            let records = normalized.records_for(symbol);
            let missing: usize = records.iter().map(|r| r.missing_fields()).sum();
            let fraction = missing as f64 / (records.len() * Field::ALL.len()) as f64;
            if fraction > threshold {
                info!(
                    "删除标的 {}: 缺失比例 {:.1}% 超过阈值 {:.1}%",
                    symbol,
                    fraction * 100.0,
                    threshold * 100.0
                );
                report.dropped_symbols.push(symbol.to_string());
                report.dropped_records += records.len();
                continue;
            }
            for record in records {
                if record.missing_fraction() > threshold {
                    report.dropped_records += 1;
                } else {
                    kept.push(record.clone());
                }
            }
        }

        // 3. 填补缺失值
        let mut imputed: Vec<Record> = Vec::with_capacity(kept.len());
        let mut start = 0;
        while start < kept.len() {
            let mut end = start + 1;
            while end < kept.len() && kept[end].symbol == kept[start].symbol {
                end += 1;
            }
            imputed.extend(self.impute_symbol(&kept[start..end], &mut report));
            start = end;
        }

        for record in &mut imputed {
            widen_range(record);
        }

        // 4. 标记异常值
        self.flag_outliers(&mut imputed, &mut report);

        let cleaned = dataset.with_records(imputed);
        report.output_records = cleaned.len();
        info!(
            "清洗完成: {} -> {} 条记录, 删除标的 {:?}, 填补 {} 个值, 异常值 {}",
            report.input_records,
            report.output_records,
            report.dropped_symbols,
            report.imputed_values,
            report.outliers
        );
        (cleaned, report)
    }

    fn normalize(&self, record: &Record, report: &mut CleanReport) -> Record {
        let mut out = record.clone();
        out.timestamp = record.timestamp.with_nanosecond(0).unwrap_or(record.timestamp);
        for field in Field::PRICES {
            if let Some(v) = record.get(field) {
                let rounded = self.round(v);
                // judged after rounding so a second pass sees the same value
                if rounded.is_finite() && rounded > 0.0 {
                    out.set(field, Some(rounded));
                } else {
                    report.invalid_values += 1;
                    out.set(field, None);
                }
            }
        }
        widen_range(&mut out);
        out
    }

    fn round(&self, value: f64) -> f64 {
        let factor = 10f64.powi(self.config.price_precision.min(12) as i32);
        (value * factor).round() / factor
    }

    /// Fill gaps inside one symbol's records; unfillable records are dropped.
    fn impute_symbol(&self, records: &[Record], report: &mut CleanReport) -> Vec<Record> {
        let means: BTreeMap<Field, f64> = Field::ALL
            .iter()
            .filter_map(|field| {
                let values: Vec<f64> = records.iter().filter_map(|r| r.get(*field)).collect();
                if values.is_empty() {
                    None
                } else {
                    Some((*field, values.iter().sum::<f64>() / values.len() as f64))
                }
            })
            .collect();

        let mut out = Vec::with_capacity(records.len());
        'records: for (i, record) in records.iter().enumerate() {
            if record.is_complete() {
                out.push(record.clone());
                continue;
            }
            let mut filled = record.clone();
            for field in Field::ALL {
                if record.get(field).is_some() {
                    continue;
                }
                let value = match self.config.impute {
                    ImputeStrategy::Nearest => nearest_value(records, i, field),
                    ImputeStrategy::Mean => means.get(&field).map(|m| match field {
                        Field::Volume => m.round(),
                        _ => self.round(*m),
                    }),
                };
                match value {
                    Some(v) => {
                        filled.set(field, Some(v));
                        report.imputed_values += 1;
                    }
                    None => {
                        debug!(
                            "无法填补 {} {} 的 {}",
                            record.symbol,
                            record.timestamp,
                            field.name()
                        );
                        report.unfillable_records += 1;
                        continue 'records;
                    }
                }
            }
            filled.imputed = true;
            out.push(filled);
        }
        out
    }

    fn flag_outliers(&self, records: &mut [Record], report: &mut CleanReport) {
        let mut by_symbol: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        for record in records.iter() {
            if let Some(close) = record.close {
                by_symbol.entry(record.symbol.clone()).or_default().push(close);
            }
        }
        let bounds: BTreeMap<String, (f64, f64)> = by_symbol
            .into_iter()
            .map(|(symbol, closes)| {
                let n = closes.len() as f64;
                let mean = closes.iter().sum::<f64>() / n;
                let var = closes.iter().map(|c| (c - mean).powi(2)).sum::<f64>() / n;
                (symbol, (mean, var.sqrt()))
            })
            .collect();

        for record in records.iter_mut() {
            record.outlier = match (record.close, bounds.get(&record.symbol)) {
                (Some(close), Some((mean, std))) if *std > 0.0 => {
                    (close - mean).abs() > self.config.outlier_std_threshold * std
                }
                _ => false,
            };
            if record.outlier {
                report.outliers += 1;
            }
        }
    }
}

/// Value of `field` from the nearest-in-time record that has it; ties go
/// to the earlier record.
fn nearest_value(records: &[Record], index: usize, field: Field) -> Option<f64> {
    let target = records[index].timestamp;
    let mut best: Option<(i64, usize)> = None;
    for (j, candidate) in records.iter().enumerate() {
        if j == index || candidate.get(field).is_none() {
            continue;
        }
        let distance = (candidate.timestamp - target).num_seconds().abs();
        let better = match best {
            None => true,
            Some((d, k)) => distance < d || (distance == d && candidate.timestamp < records[k].timestamp),
        };
        if better {
            best = Some((distance, j));
        }
    }
    best.and_then(|(_, j)| records[j].get(field))
}

/// Stretch high/low so they bracket open and close.
fn widen_range(record: &mut Record) {
    let bounds = [record.open, record.close];
    if let Some(high) = record.high {
        record.high = Some(bounds.iter().flatten().fold(high, |acc, v| acc.max(*v)));
    }
    if let Some(low) = record.low {
        record.low = Some(bounds.iter().flatten().fold(low, |acc, v| acc.min(*v)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::dataset::TimeWindow;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn day(d: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 14, 30, 0).unwrap() + Duration::days(d)
    }

    fn full(symbol: &str, d: i64, close: f64) -> Record {
        Record::new(symbol, day(d), "yahoo")
            .with_prices(close, close + 1.0, close - 1.0, close)
            .with_volume(1000)
    }

    fn dataset(records: Vec<Record>, symbols: &[&str]) -> Dataset {
        let symbols: Vec<String> = symbols.iter().map(|s| s.to_string()).collect();
        Dataset::new("test", day(40), &symbols, TimeWindow::new(day(-1), day(40)), records)
    }

    #[test]
    fn normalizes_prices_and_timestamps() {
        let mut r = full("AAPL", 0, 100.123456);
        r.timestamp = r.timestamp + Duration::milliseconds(750);
        r.high = Some(99.0);
        r.low = Some(-5.0);
        let d = dataset(vec![r, full("AAPL", 1, 101.0)], &["AAPL"]);

        let (cleaned, report) = Cleaner::new(CleaningConfig::default()).clean(&d);
        let first = &cleaned.records()[0];
        assert_eq!(first.timestamp, day(0));
        assert_eq!(first.close, Some(100.1235));
        // high widened to the close, invalid low imputed then widened
        assert_eq!(first.high, Some(100.1235));
        assert!(first.low.unwrap() <= 100.1235);
        assert!(first.imputed);
        assert_eq!(report.invalid_values, 1);
    }

    #[test]
    fn drops_sparse_symbol_and_fills_others() {
        let mut records = Vec::new();
        for d in 0..10 {
            records.push(full("AAPL", d, 100.0 + d as f64));
            let mut sparse = Record::new("TSLA", day(d), "yahoo").with_volume(10);
            if d == 0 {
                sparse.close = Some(200.0);
            }
            records.push(sparse);
        }
        // one gap in AAPL
        records[4].close = None;
        let d = dataset(records, &["AAPL", "TSLA"]);

        let (cleaned, report) = Cleaner::new(CleaningConfig::default()).clean(&d);
        assert_eq!(cleaned.symbols(), vec!["AAPL"]);
        assert_eq!(report.dropped_symbols, vec!["TSLA".to_string()]);
        assert_eq!(report.imputed_values, 1);
        assert!(cleaned.records().iter().all(|r| r.is_complete()));
    }

    #[test]
    fn nearest_prefers_earlier_on_tie() {
        let mut gap = full("AAPL", 1, 0.0);
        gap.close = None;
        gap.open = Some(50.0);
        let d = dataset(vec![full("AAPL", 0, 10.0), gap, full("AAPL", 2, 30.0)], &["AAPL"]);
        let (cleaned, _) = Cleaner::new(CleaningConfig::default()).clean(&d);
        assert_eq!(cleaned.records()[1].close, Some(10.0));
    }

    #[test]
    fn mean_imputation() {
        let mut gap = full("AAPL", 1, 20.0);
        gap.close = None;
        let d = dataset(vec![full("AAPL", 0, 10.0), gap, full("AAPL", 2, 30.0)], &["AAPL"]);
        let config = CleaningConfig {
            impute: ImputeStrategy::Mean,
            ..CleaningConfig::default()
        };
        let (cleaned, _) = Cleaner::new(config).clean(&d);
        assert_eq!(cleaned.records()[1].close, Some(20.0));
    }

    #[test]
    fn mean_imputation_uses_each_fields_own_mean() {
        let mut gap = full("AAPL", 1, 20.0);
        gap.open = None;
        gap.volume = None;
        let mut other = full("AAPL", 2, 30.0);
        other.volume = Some(3001);
        let d = dataset(vec![full("AAPL", 0, 10.0), gap, other], &["AAPL"]);
        let config = CleaningConfig {
            impute: ImputeStrategy::Mean,
            ..CleaningConfig::default()
        };
        let (cleaned, report) = Cleaner::new(config).clean(&d);
        let filled = &cleaned.records()[1];
        assert_eq!(filled.open, Some(20.0));
        assert_eq!(filled.volume, Some(2001));
        assert_eq!(report.imputed_values, 2);
    }

    #[test]
    fn flags_outliers_and_is_idempotent() {
        let mut records: Vec<Record> = (0..30).map(|d| full("AAPL", d, 100.0 + (d % 3) as f64)).collect();
        records.push(full("AAPL", 30, 1000.0));
        let d = dataset(records, &["AAPL"]);
        let cleaner = Cleaner::new(CleaningConfig::default());
        let (once, report) = cleaner.clean(&d);
        assert_eq!(report.outliers, 1);
        assert!(once.records().last().unwrap().outlier);

        let (twice, report2) = cleaner.clean(&once);
        assert_eq!(twice, once);
        assert_eq!(report2.imputed_values, 0);
        assert_eq!(report2.dropped_records, 0);
    }
}
