use crate::models::analysis::Correlation;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Returns of one symbol keyed by the timestamp of the later price.
pub type ReturnSeries = BTreeMap<DateTime<Utc>, f64>;

/// Pearson correlation; `None` when either side has no variance.
pub fn pearson(x: &[f64], y: &[f64]) -> Option<f64> {
    let n = x.len().min(y.len());
    if n < 2 {
        return None;
    }
    let mx = x[..n].iter().sum::<f64>() / n as f64;
    let my = y[..n].iter().sum::<f64>() / n as f64;
    let mut cov = 0.0;
    let mut vx = 0.0;
    let mut vy = 0.0;
    for i in 0..n {
        let dx = x[i] - mx;
        let dy = y[i] - my;
        cov += dx * dy;
        vx += dx * dx;
        vy += dy * dy;
    }
    if vx < 1e-30 || vy < 1e-30 {
        return None;
    }
    Some((cov / (vx.sqrt() * vy.sqrt())).clamp(-1.0, 1.0))
}

/// Correlate every pair of series on their shared timestamps.
///
/// Pairs with fewer than `min_overlap` shared observations, or without
/// variance, are left out. Output is ordered by `(a, b)` with `a < b`.
pub fn correlation_matrix(series: &BTreeMap<String, ReturnSeries>, min_overlap: usize) -> Vec<Correlation> {
    let symbols: Vec<&String> = series.keys().collect();
    let mut out = Vec::new();
    for (i, a) in symbols.iter().enumerate() {
        for b in &symbols[i + 1..] {
            let (sa, sb) = (&series[*a], &series[*b]);
            let (xs, ys): (Vec<f64>, Vec<f64>) = sa
                .iter()
                .filter_map(|(ts, x)| sb.get(ts).map(|y| (*x, *y)))
                .unzip();
            if xs.len() < min_overlap.max(2) {
                continue;
            }
            if let Some(value) = pearson(&xs, &ys) {
                out.push(Correlation {
                    a: (*a).clone(),
                    b: (*b).clone(),
                    value,
                    observations: xs.len(),
                });
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn series(values: &[f64], offset: i64) -> ReturnSeries {
        let base = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        values
            .iter()
            .enumerate()
            .map(|(i, v)| (base + Duration::days(i as i64 + offset), *v))
            .collect()
    }

    #[test]
    fn pearson_extremes() {
        let x = [1.0, 2.0, 3.0, 4.0];
        assert!((pearson(&x, &[2.0, 4.0, 6.0, 8.0]).unwrap() - 1.0).abs() < 1e-12);
        assert!((pearson(&x, &[8.0, 6.0, 4.0, 2.0]).unwrap() + 1.0).abs() < 1e-12);
        assert_eq!(pearson(&x, &[1.0, 1.0, 1.0, 1.0]), None);
    }

    #[test]
    fn pairs_are_aligned_on_timestamps() {
        let mut all = BTreeMap::new();
        all.insert("MSFT".to_string(), series(&[0.01, 0.02, -0.01, 0.03, 0.00], 0));
        // shifted by one day: only 4 timestamps overlap
        all.insert("AAPL".to_string(), series(&[0.5, 0.02, -0.01, 0.03, 0.00], -1));
        all.insert("FLAT".to_string(), series(&[0.0; 5], 0));

        let corr = correlation_matrix(&all, 3);
        assert_eq!(corr.len(), 1);
        assert_eq!((corr[0].a.as_str(), corr[0].b.as_str()), ("AAPL", "MSFT"));
        assert_eq!(corr[0].observations, 4);

        assert!(correlation_matrix(&all, 5).is_empty());
    }
}
