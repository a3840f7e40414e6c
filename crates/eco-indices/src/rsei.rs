//! Remote Sensing Ecological Index synthesis.
//!
//! The four Tasseled-Cap derived components are normalized over the pixels
//! where all four are valid, projected onto their first principal component
//! and the scores rescaled to [0, 1]. Sums are accumulated per fixed-size
//! chunk and then folded in chunk order, so results do not depend on the
//! rayon thread count.

use nalgebra::{Matrix4, SymmetricEigen};
use rayon::prelude::*;
use tracing::{debug, warn};

use eco_common::{EcoError, EcoResult, IndexGrid, QualityWarning};

use crate::config::{Normalization, RseiConfig};

const CHUNK: usize = 4096;

/// Component grids in loading order.
#[derive(Debug, Clone, Copy)]
pub struct RseiComponents<'a> {
    pub greenness: &'a IndexGrid,
    pub wetness: &'a IndexGrid,
    pub dryness: &'a IndexGrid,
    pub heat: &'a IndexGrid,
}

impl<'a> RseiComponents<'a> {
    fn as_array(&self) -> [&'a IndexGrid; 4] {
        [self.greenness, self.wetness, self.dryness, self.heat]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RseiOutput {
    pub grid: IndexGrid,
    /// Explained variance ratio per principal component, descending
    pub explained_variance: Vec<f64>,
    /// PC1 loadings in greenness, wetness, dryness, heat order
    pub loadings: Vec<f64>,
    pub warnings: Vec<QualityWarning>,
}

/// Synthesize RSEI from its four components.
pub fn synthesize(components: &RseiComponents<'_>, config: &RseiConfig) -> EcoResult<RseiOutput> {
    let grids = components.as_array();
    let shape = grids[0].shape();
    if let Some(other) = grids.iter().find(|g| g.shape() != shape) {
        return Err(EcoError::shape_mismatch(shape, other.shape()));
    }

    let joint: Vec<usize> = (0..grids[0].len())
        .filter(|&i| grids.iter().all(|g| g.is_valid(i)))
        .collect();
    let n = joint.len();
    if n < 2 {
        return Err(EcoError::InsufficientData(format!(
            "{} jointly valid pixels; at least 2 required",
            n
        )));
    }

    let mut observations: Vec<[f64; 4]> = joint
        .par_iter()
        .map(|&i| {
            let mut row = [0.0; 4];
            for (c, g) in grids.iter().enumerate() {
                row[c] = g.values()[i] as f64;
            }
            row
        })
        .collect();
    normalize(&mut observations, config.normalization);

    let means = column_means(&observations);
    let cov = covariance(&observations, &means);

    let eigen = SymmetricEigen::new(cov);
    let mut order = [0usize, 1, 2, 3];
    order.sort_by(|&a, &b| eigen.eigenvalues[b].total_cmp(&eigen.eigenvalues[a]));

    let total: f64 = eigen.eigenvalues.iter().map(|v| v.max(0.0)).sum();
    if !(total > f64::EPSILON) {
        return Err(EcoError::InsufficientData(
            "components have zero variance over the valid pixels".to_string(),
        ));
    }
    let explained_variance: Vec<f64> = order
        .iter()
        .map(|&k| eigen.eigenvalues[k].max(0.0) / total)
        .collect();

    let pc1 = eigen.eigenvectors.column(order[0]);
    let mut loadings = [pc1[0], pc1[1], pc1[2], pc1[3]];
    orient(&mut loadings, &cov);

    let scores: Vec<f64> = observations
        .par_iter()
        .map(|obs| {
            (0..4)
                .map(|c| (obs[c] - means[c]) * loadings[c])
                .sum::<f64>()
        })
        .collect();

    let (lo, hi) = scores
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &s| {
            (lo.min(s), hi.max(s))
        });
    let range = hi - lo;

    let (width, height) = shape;
    let mut grid = IndexGrid::empty(width, height);
    for (&idx, &s) in joint.iter().zip(&scores) {
        let v = if range > 0.0 { (s - lo) / range } else { 0.0 };
        grid.set(idx, v.clamp(0.0, 1.0) as f32);
    }

    let mut warnings = Vec::new();
    if explained_variance[0] < config.min_explained_variance {
        warn!(
            ratio = explained_variance[0],
            threshold = config.min_explained_variance,
            "PC1 explains little of the component variance"
        );
        warnings.push(QualityWarning::LowExplainedVariance {
            ratio: explained_variance[0],
            threshold: config.min_explained_variance,
        });
    }

    debug!(
        pixels = n,
        pc1_ratio = explained_variance[0],
        loadings = ?loadings,
        "Synthesized RSEI"
    );

    Ok(RseiOutput {
        grid,
        explained_variance,
        loadings: loadings.to_vec(),
        warnings,
    })
}

/// Standardize each column in place. Constant columns become zero.
fn normalize(observations: &mut [[f64; 4]], method: Normalization) {
    for c in 0..4 {
        match method {
            Normalization::MinMax => {
                let (lo, hi) = observations
                    .iter()
                    .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), o| {
                        (lo.min(o[c]), hi.max(o[c]))
                    });
                let range = hi - lo;
                for o in observations.iter_mut() {
                    o[c] = if range > 0.0 { (o[c] - lo) / range } else { 0.0 };
                }
            }
            Normalization::ZScore => {
                let n = observations.len() as f64;
                let mean = chunked_sum(observations, |o| o[c]) / n;
                let var = chunked_sum(observations, |o| (o[c] - mean).powi(2)) / n;
                let std = var.sqrt();
                for o in observations.iter_mut() {
                    o[c] = if std > 0.0 { (o[c] - mean) / std } else { 0.0 };
                }
            }
        }
    }
}

fn chunked_sum<F>(observations: &[[f64; 4]], f: F) -> f64
where
    F: Fn(&[f64; 4]) -> f64 + Sync,
{
    let partials: Vec<f64> = observations
        .par_chunks(CHUNK)
        .map(|chunk| chunk.iter().map(&f).sum())
        .collect();
    partials.into_iter().sum()
}

fn column_means(observations: &[[f64; 4]]) -> [f64; 4] {
    let n = observations.len() as f64;
    let mut means = [0.0; 4];
    for (c, m) in means.iter_mut().enumerate() {
        *m = chunked_sum(observations, |o| o[c]) / n;
    }
    means
}

/// Sample covariance (n - 1 denominator).
fn covariance(observations: &[[f64; 4]], means: &[f64; 4]) -> Matrix4<f64> {
    let partials: Vec<[[f64; 4]; 4]> = observations
        .par_chunks(CHUNK)
        .map(|chunk| {
            let mut acc = [[0.0; 4]; 4];
            for o in chunk {
                let d = [o[0] - means[0], o[1] - means[1], o[2] - means[2], o[3] - means[3]];
                for i in 0..4 {
                    for j in i..4 {
                        acc[i][j] += d[i] * d[j];
                    }
                }
            }
            acc
        })
        .collect();

    let mut sums = [[0.0; 4]; 4];
    for p in &partials {
        for i in 0..4 {
            for j in i..4 {
                sums[i][j] += p[i][j];
            }
        }
    }
    let denom = (observations.len() - 1) as f64;
    Matrix4::from_fn(|i, j| {
        let (a, b) = if i <= j { (i, j) } else { (j, i) };
        sums[a][b] / denom
    })
}

/// Flip PC1 so its scores correlate positively with greenness.
///
/// The covariance of the scores with greenness is `(C·w)[0]`. When it is
/// exactly zero the largest-magnitude loading is made positive.
fn orient(loadings: &mut [f64; 4], cov: &Matrix4<f64>) {
    let with_greenness: f64 = (0..4).map(|c| cov[(0, c)] * loadings[c]).sum();
    let flip = if with_greenness != 0.0 {
        with_greenness < 0.0
    } else {
        let largest = loadings
            .iter()
            .copied()
            .fold(0.0f64, |acc, v| if v.abs() > acc.abs() { v } else { acc });
        largest < 0.0
    };
    if flip {
        for l in loadings.iter_mut() {
            *l = -*l;
        }
    }
}
