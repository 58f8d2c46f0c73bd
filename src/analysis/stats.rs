//! Descriptive statistics over plain `f64` slices.
//!
//! Empty input yields 0 (or `None` where a value has no meaning) instead of
//! NaN so results serialize cleanly.

use crate::models::analysis::SummaryStats;

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation (n - 1 denominator).
pub fn sample_std(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (n - 1) as f64;
    var.sqrt()
}

/// Population standard deviation (n denominator).
pub fn population_std(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    var.sqrt()
}

pub fn sorted(values: &[f64]) -> Vec<f64> {
    let mut out = values.to_vec();
    out.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    out
}

/// Quantile of an ascending slice with linear interpolation between ranks.
pub fn quantile(sorted: &[f64], q: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        n => {
            let pos = q.clamp(0.0, 1.0) * (n - 1) as f64;
            let lo = pos.floor() as usize;
            let hi = pos.ceil() as usize;
            let frac = pos - lo as f64;
            sorted[lo] + (sorted[hi] - sorted[lo]) * frac
        }
    }
}

pub fn median(values: &[f64]) -> f64 {
    quantile(&sorted(values), 0.5)
}

/// Third standardized moment, population form.
pub fn skewness(values: &[f64]) -> f64 {
    let std = population_std(values);
    if std < 1e-15 {
        return 0.0;
    }
    let m = mean(values);
    values.iter().map(|v| ((v - m) / std).powi(3)).sum::<f64>() / values.len() as f64
}

/// Fourth standardized moment minus 3, population form.
pub fn excess_kurtosis(values: &[f64]) -> f64 {
    let std = population_std(values);
    if std < 1e-15 {
        return 0.0;
    }
    let m = mean(values);
    values.iter().map(|v| ((v - m) / std).powi(4)).sum::<f64>() / values.len() as f64 - 3.0
}

/// Simple period returns `(p[i] - p[i-1]) / p[i-1]`.
pub fn simple_returns(prices: &[f64]) -> Vec<f64> {
    prices
        .windows(2)
        .map(|w| if w[0] > 0.0 { (w[1] - w[0]) / w[0] } else { 0.0 })
        .collect()
}

/// Last price against the previous one, in percent.
pub fn change_percent(prices: &[f64]) -> Option<f64> {
    match prices {
        [.., prev, last] if *prev > 0.0 => Some((last - prev) / prev * 100.0),
        _ => None,
    }
}

pub fn summarize(values: &[f64]) -> Option<SummaryStats> {
    if values.is_empty() {
        return None;
    }
    let s = sorted(values);
    Some(SummaryStats {
        count: values.len(),
        mean: mean(values),
        median: quantile(&s, 0.5),
        std: sample_std(values),
        min: s[0],
        max: s[s.len() - 1],
        q25: quantile(&s, 0.25),
        q75: quantile(&s, 0.75),
        skewness: skewness(values),
        kurtosis: excess_kurtosis(values),
    })
}
