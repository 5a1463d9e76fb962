//! Uniform Manifold Approximation and Projection of the samples.
//!
//! McInnes L, Healy J, Melville J (2018). "UMAP: Uniform Manifold Approximation and
//! Projection for Dimension Reduction." arXiv:1802.03426.

use anyhow::Result;
use log::{debug, info};
use nalgebra::{DMatrix, Matrix2, Vector2};
use ndarray::Array2;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::data::MeasurementTable;
use crate::error::AnalysisError;

use super::complete_matrix;
use super::pca::pca_scores;

const SMOOTH_K_TOLERANCE: f64 = 1e-5;
const MIN_K_DIST_SCALE: f64 = 1e-3;
const GRADIENT_CLIP: f64 = 4.0;
const INIT_EXTENT: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    Euclidean,
    #[default]
    Cosine,
}

impl DistanceMetric {
    fn distance(self, a: &[f64], b: &[f64]) -> f64 {
        match self {
            DistanceMetric::Euclidean => a
                .iter()
                .zip(b)
                .map(|(x, y)| (x - y) * (x - y))
                .sum::<f64>()
                .sqrt(),
            DistanceMetric::Cosine => {
                let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
                let norm_a = a.iter().map(|x| x * x).sum::<f64>().sqrt();
                let norm_b = b.iter().map(|x| x * x).sum::<f64>().sqrt();
                match (norm_a > 0.0, norm_b > 0.0) {
                    (true, true) => (1.0 - dot / (norm_a * norm_b)).max(0.0),
                    (false, false) => 0.0,
                    _ => 1.0,
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UmapConfig {
    pub n_neighbors: usize,
    pub n_components: usize,
    pub min_dist: f64,
    pub spread: f64,
    pub metric: DistanceMetric,
    pub n_epochs: usize,
    pub learning_rate: f64,
    pub negative_sample_rate: usize,
    pub seed: u64,
    /// Drop features with missing values instead of failing.
    pub drop_missing: bool,
}

impl Default for UmapConfig {
    fn default() -> Self {
        UmapConfig {
            n_neighbors: 10,
            n_components: 2,
            min_dist: 0.3,
            spread: 1.0,
            metric: DistanceMetric::Cosine,
            n_epochs: 500,
            learning_rate: 1.0,
            negative_sample_rate: 5,
            seed: 42,
            drop_missing: true,
        }
    }
}

impl UmapConfig {
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| -> Result<()> { Err(AnalysisError::InvalidConfig(msg).into()) };
        if self.n_neighbors < 2 {
            return invalid(format!("n_neighbors must be at least 2, got {}", self.n_neighbors));
        }
        if self.n_components == 0 {
            return invalid("n_components must be at least 1".into());
        }
        if !(self.spread > 0.0) || !(self.min_dist >= 0.0) || self.min_dist > self.spread {
            return invalid(format!(
                "need 0 <= min_dist <= spread and spread > 0, got {} and {}",
                self.min_dist, self.spread
            ));
        }
        if self.n_epochs == 0 || !(self.learning_rate > 0.0) {
            return invalid("n_epochs and learning_rate must be positive".into());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UmapResult {
    pub samples: Vec<String>,
    /// Samples × components.
    pub embedding: Array2<f64>,
}

/// Fit `1 / (1 + a d^2b)` to the offset exponential membership curve.
fn find_ab_params(spread: f64, min_dist: f64) -> (f64, f64) {
    let xs: Vec<f64> = (1..300).map(|i| i as f64 * 3.0 * spread / 299.0).collect();
    let ys: Vec<f64> = xs
        .iter()
        .map(|&x| if x < min_dist { 1.0 } else { (-(x - min_dist) / spread).exp() })
        .collect();
    let sse = |a: f64, b: f64| -> f64 {
        xs.iter()
            .zip(&ys)
            .map(|(&x, &y)| (y - 1.0 / (1.0 + a * x.powf(2.0 * b))).powi(2))
            .sum()
    };

    let (mut a, mut b) = (1.0, 1.0);
    let mut lambda = 1e-3;
    let mut current = sse(a, b);
    for _ in 0..500 {
        let mut jtj = Matrix2::zeros();
        let mut jtr = Vector2::zeros();
        for (&x, &y) in xs.iter().zip(&ys) {
            let u = x.powf(2.0 * b);
            let denom = (1.0 + a * u).powi(2);
            let j = Vector2::new(-u / denom, -2.0 * a * u * x.ln() / denom);
            jtj += j * j.transpose();
            jtr += j * (y - 1.0 / (1.0 + a * u));
        }
        let damped = jtj + Matrix2::from_diagonal(&jtj.diagonal()) * lambda;
        let Some(step) = damped.try_inverse().map(|inv| inv * jtr) else {
            break;
        };
        let candidate = sse(a + step[0], b + step[1]);
        if candidate < current && a + step[0] > 0.0 && b + step[1] > 0.0 {
            a += step[0];
            b += step[1];
            current = candidate;
            lambda /= 10.0;
            if step.norm() < 1e-12 {
                break;
            }
        } else {
            lambda *= 10.0;
            if lambda > 1e12 {
                break;
            }
        }
    }
    (a, b)
}

/// Fuzzy membership of each point's k nearest neighbors, as directed edges.
fn fuzzy_neighbors(distances: &DMatrix<f64>, k: usize) -> Vec<Vec<(usize, f64)>> {
    let n = distances.nrows();
    let target = (k as f64).log2();
    let mean_distance = distances.iter().sum::<f64>() / (n * n) as f64;

    (0..n)
        .into_par_iter()
        .map(|i| {
            let mut neighbors: Vec<(usize, f64)> = (0..n)
                .filter(|&j| j != i)
                .map(|j| (j, distances[(i, j)]))
                .collect();
            neighbors.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
            neighbors.truncate(k);

            let rho = neighbors
                .iter()
                .map(|&(_, d)| d)
                .find(|&d| d > 0.0)
                .unwrap_or(0.0);

            let (mut lo, mut hi, mut sigma) = (0.0, f64::INFINITY, 1.0);
            for _ in 0..64 {
                let psum: f64 = neighbors
                    .iter()
                    .map(|&(_, d)| {
                        let excess = d - rho;
                        if excess > 0.0 { (-excess / sigma).exp() } else { 1.0 }
                    })
                    .sum();
                if (psum - target).abs() < SMOOTH_K_TOLERANCE {
                    break;
                }
                if psum > target {
                    hi = sigma;
                    sigma = (lo + hi) / 2.0;
                } else {
                    lo = sigma;
                    sigma = if hi.is_infinite() { sigma * 2.0 } else { (lo + hi) / 2.0 };
                }
            }
            let mean_ith: f64 = neighbors.iter().map(|&(_, d)| d).sum::<f64>() / neighbors.len() as f64;
            let floor = MIN_K_DIST_SCALE * if rho > 0.0 { mean_ith } else { mean_distance };
            let sigma = sigma.max(floor);

            neighbors
                .into_iter()
                .map(|(j, d)| {
                    let excess = d - rho;
                    let w = if excess > 0.0 && sigma > 0.0 { (-excess / sigma).exp() } else { 1.0 };
                    (j, w)
                })
                .collect()
        })
        .collect()
}

/// Symmetric fuzzy union `A + A' - A∘A'` as an undirected edge list `i < j`.
fn symmetrize(directed: &[Vec<(usize, f64)>]) -> Vec<(usize, usize, f64)> {
    let n = directed.len();
    let mut weights = DMatrix::<f64>::zeros(n, n);
    for (i, neighbors) in directed.iter().enumerate() {
        for &(j, w) in neighbors {
            weights[(i, j)] = w;
        }
    }
    let mut edges = Vec::new();
    for i in 0..n {
        for j in (i + 1)..n {
            let (a, b) = (weights[(i, j)], weights[(j, i)]);
            let w = a + b - a * b;
            if w > 0.0 {
                edges.push((i, j, w));
            }
        }
    }
    edges
}

/// Initial layout from the leading principal components, scaled into `[0, 10]`.
fn initial_layout(x: &DMatrix<f64>, n_components: usize, rng: &mut ChaCha8Rng) -> DMatrix<f64> {
    let n = x.nrows();
    let mut layout = match pca_scores(x, n_components) {
        Some(scores) => scores,
        None => DMatrix::from_fn(n, n_components, |_, _| rng.gen_range(-INIT_EXTENT..INIT_EXTENT)),
    };
    for mut column in layout.column_iter_mut() {
        let min = column.min();
        let max = column.max();
        let range = max - min;
        for v in column.iter_mut() {
            *v = if range > 0.0 { INIT_EXTENT * (*v - min) / range } else { 0.0 };
            *v += rng.gen_range(-1e-4..1e-4);
        }
    }
    layout
}

fn clip(v: f64) -> f64 {
    v.clamp(-GRADIENT_CLIP, GRADIENT_CLIP)
}

fn squared_distance(layout: &DMatrix<f64>, i: usize, j: usize) -> f64 {
    (0..layout.ncols()).map(|c| (layout[(i, c)] - layout[(j, c)]).powi(2)).sum()
}

/// Embed the samples of `table`. Results are reproducible for a fixed seed.
pub fn run_umap(table: &MeasurementTable, config: &UmapConfig) -> Result<UmapResult> {
    config.validate()?;
    let (_, x) = complete_matrix(table, config.drop_missing)?;
    let n = x.nrows();
    if n < 3 {
        return Err(AnalysisError::InvalidInput("UMAP needs at least three samples".into()).into());
    }
    let k = config.n_neighbors.min(n - 1);
    let (a, b) = find_ab_params(config.spread, config.min_dist);
    info!(
        "UMAP on {} sample(s) x {} feature(s): {} neighbors, a = {:.4}, b = {:.4}",
        n,
        x.ncols(),
        k,
        a,
        b
    );

    let rows: Vec<Vec<f64>> = (0..n).map(|i| x.row(i).iter().copied().collect()).collect();
    let distances = DMatrix::from_fn(n, n, |i, j| config.metric.distance(&rows[i], &rows[j]));
    let edges = symmetrize(&fuzzy_neighbors(&distances, k));
    let max_weight = edges.iter().map(|e| e.2).fold(0.0, f64::max);
    let edges: Vec<(usize, usize, f64)> = edges
        .into_iter()
        .filter(|e| e.2 >= max_weight / config.n_epochs as f64)
        .collect();
    debug!("UMAP graph has {} edge(s)", edges.len());

    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let mut layout = initial_layout(&x, config.n_components, &mut rng);
    let dim = config.n_components;

    let epochs_per_sample: Vec<f64> = edges.iter().map(|e| max_weight / e.2).collect();
    let epochs_per_negative: Vec<f64> = epochs_per_sample
        .iter()
        .map(|e| e / config.negative_sample_rate.max(1) as f64)
        .collect();
    let mut next_sample = epochs_per_sample.clone();
    let mut next_negative = epochs_per_negative.clone();

    for epoch in 0..config.n_epochs {
        let alpha = config.learning_rate * (1.0 - epoch as f64 / config.n_epochs as f64);
        let now = epoch as f64;
        for (e, &(i, j, _)) in edges.iter().enumerate() {
            if next_sample[e] > now {
                continue;
            }
            let d2 = squared_distance(&layout, i, j);
            if d2 > 0.0 {
                let coeff = -2.0 * a * b * d2.powf(b - 1.0) / (a * d2.powf(b) + 1.0);
                for c in 0..dim {
                    let grad = clip(coeff * (layout[(i, c)] - layout[(j, c)]));
                    layout[(i, c)] += grad * alpha;
                    layout[(j, c)] -= grad * alpha;
                }
            }
            next_sample[e] += epochs_per_sample[e];

            if config.negative_sample_rate > 0 {
                let n_negative = ((now - next_negative[e]) / epochs_per_negative[e]).max(0.0) as usize;
                for _ in 0..n_negative {
                    let other = rng.gen_range(0..n);
                    if other == i {
                        continue;
                    }
                    let d2 = squared_distance(&layout, i, other);
                    for c in 0..dim {
                        let grad = if d2 > 0.0 {
                            let coeff = 2.0 * b / ((0.001 + d2) * (a * d2.powf(b) + 1.0));
                            clip(coeff * (layout[(i, c)] - layout[(other, c)]))
                        } else {
                            GRADIENT_CLIP
                        };
                        layout[(i, c)] += grad * alpha;
                    }
                }
                next_negative[e] += n_negative as f64 * epochs_per_negative[e];
            }
        }
    }

    let embedding = Array2::from_shape_fn((n, dim), |(i, c)| layout[(i, c)]);
    Ok(UmapResult {
        samples: table.samples().to_vec(),
        embedding,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn clusters() -> MeasurementTable {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let values = Array2::from_shape_fn((10, 6), |(i, _)| {
            let centre = if i < 5 { 0.0 } else { 10.0 };
            centre + rng.gen_range(-0.5..0.5)
        });
        MeasurementTable::new(
            (0..10).map(|i| format!("s{}", i)).collect(),
            (0..6).map(|j| format!("P{}", j)).collect(),
            values,
        )
        .unwrap()
    }

    fn config() -> UmapConfig {
        UmapConfig {
            n_neighbors: 4,
            metric: DistanceMetric::Euclidean,
            n_epochs: 200,
            ..Default::default()
        }
    }

    #[test]
    fn test_curve_parameters() {
        let (a, b) = find_ab_params(1.0, 0.1);
        assert_abs_diff_eq!(a, 1.577, epsilon = 0.02);
        assert_abs_diff_eq!(b, 0.895, epsilon = 0.02);
    }

    #[test]
    fn test_reproducible_for_seed() {
        let table = clusters();
        let first = run_umap(&table, &config()).unwrap();
        let second = run_umap(&table, &config()).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.embedding.dim(), (10, 2));
        assert!(first.embedding.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_clusters_stay_apart() {
        let result = run_umap(&clusters(), &config()).unwrap();
        let e = &result.embedding;
        let dist = |i: usize, j: usize| ((e[[i, 0]] - e[[j, 0]]).powi(2) + (e[[i, 1]] - e[[j, 1]]).powi(2)).sqrt();
        let mut within = Vec::new();
        let mut between = Vec::new();
        for i in 0..10 {
            for j in (i + 1)..10 {
                if (i < 5) == (j < 5) {
                    within.push(dist(i, j));
                } else {
                    between.push(dist(i, j));
                }
            }
        }
        let mean = |v: &[f64]| v.iter().sum::<f64>() / v.len() as f64;
        assert!(mean(&within) < mean(&between));
    }

    #[test]
    fn test_cosine_distance() {
        assert_abs_diff_eq!(DistanceMetric::Cosine.distance(&[1.0, 0.0], &[0.0, 2.0]), 1.0);
        assert_abs_diff_eq!(DistanceMetric::Cosine.distance(&[1.0, 1.0], &[2.0, 2.0]), 0.0, epsilon = 1e-12);
        assert!(UmapConfig { n_neighbors: 1, ..Default::default() }.validate().is_err());
    }
}
