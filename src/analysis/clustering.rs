//! Seeded k-means over small feature tables.

use crate::analysis::stats::{mean, population_std};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[derive(Debug, Clone, PartialEq)]
pub struct KMeansParams {
    pub k: usize,
    pub seed: u64,
    pub restarts: usize,
    pub max_iterations: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct KMeansResult {
    /// Cluster id per input point; ids are numbered by first appearance.
    pub labels: Vec<usize>,
    pub centroids: Vec<Vec<f64>>,
    pub inertia: f64,
}

/// Z-score each column; a constant column becomes all zeros.
pub fn standardize(rows: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let Some(width) = rows.first().map(|r| r.len()) else {
        return Vec::new();
    };
    let mut out = rows.to_vec();
    for col in 0..width {
        let column: Vec<f64> = rows.iter().map(|r| r[col]).collect();
        let m = mean(&column);
        let s = population_std(&column);
        for row in out.iter_mut() {
            row[col] = if s > 1e-15 { (row[col] - m) / s } else { 0.0 };
        }
    }
    out
}

fn distance_sq(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum()
}

fn nearest(point: &[f64], centroids: &[Vec<f64>]) -> (usize, f64) {
    let mut best = (0, f64::INFINITY);
    for (i, c) in centroids.iter().enumerate() {
        let d = distance_sq(point, c);
        if d < best.1 {
            best = (i, d);
        }
    }
    best
}

/// k-means++ seeding: each next center is drawn with probability
/// proportional to its squared distance from the chosen ones.
fn init_plus_plus(points: &[Vec<f64>], k: usize, rng: &mut StdRng) -> Vec<Vec<f64>> {
    let mut centroids = vec![points[rng.gen_range(0..points.len())].clone()];
    while centroids.len() < k {
        let weights: Vec<f64> = points.iter().map(|p| nearest(p, &centroids).1).collect();
        let total: f64 = weights.iter().sum();
        let index = if total <= 0.0 {
            rng.gen_range(0..points.len())
        } else {
            let mut target = rng.gen::<f64>() * total;
            let mut chosen = points.len() - 1;
            for (i, w) in weights.iter().enumerate() {
                if target < *w {
                    chosen = i;
                    break;
                }
                target -= w;
            }
            chosen
        };
        centroids.push(points[index].clone());
    }
    centroids
}

fn lloyd(points: &[Vec<f64>], mut centroids: Vec<Vec<f64>>, max_iterations: usize) -> KMeansResult {
    let width = points[0].len();
    let mut labels = vec![usize::MAX; points.len()];
    for _ in 0..max_iterations.max(1) {
        let mut changed = false;
        for (i, p) in points.iter().enumerate() {
            let (c, _) = nearest(p, &centroids);
            if labels[i] != c {
                labels[i] = c;
                changed = true;
            }
        }
        if !changed {
            break;
        }
        for (c, centroid) in centroids.iter_mut().enumerate() {
            let members: Vec<&Vec<f64>> = points
                .iter()
                .zip(&labels)
                .filter(|(_, l)| **l == c)
                .map(|(p, _)| p)
                .collect();
            // 空簇保留原中心
            if members.is_empty() {
                continue;
            }
            for (d, value) in centroid.iter_mut().enumerate().take(width) {
                *value = members.iter().map(|m| m[d]).sum::<f64>() / members.len() as f64;
            }
        }
    }
    let inertia = points
        .iter()
        .zip(&labels)
        .map(|(p, l)| distance_sq(p, &centroids[*l]))
        .sum();
    KMeansResult { labels, centroids, inertia }
}

/// Renumber clusters by first appearance and drop empty ones.
fn canonical(result: KMeansResult) -> KMeansResult {
    let mut mapping: Vec<Option<usize>> = vec![None; result.centroids.len()];
    let mut centroids = Vec::new();
    let mut labels = Vec::with_capacity(result.labels.len());
    for l in &result.labels {
        let id = match mapping[*l] {
            Some(id) => id,
            None => {
                let id = centroids.len();
                mapping[*l] = Some(id);
                centroids.push(result.centroids[*l].clone());
                id
            }
        };
        labels.push(id);
    }
    KMeansResult {
        labels,
        centroids,
        inertia: result.inertia,
    }
}

/// Best of `restarts` seeded runs by inertia; `None` for no points.
pub fn kmeans(points: &[Vec<f64>], params: &KMeansParams) -> Option<KMeansResult> {
    if points.is_empty() {
        return None;
    }
    let k = params.k.clamp(1, points.len());
    let mut rng = StdRng::seed_from_u64(params.seed);
    let mut best: Option<KMeansResult> = None;
    for _ in 0..params.restarts.max(1) {
        let init = init_plus_plus(points, k, &mut rng);
        let run = lloyd(points, init, params.max_iterations);
        if best.as_ref().map_or(true, |b| run.inertia < b.inertia) {
            best = Some(run);
        }
    }
    best.map(canonical)
}
