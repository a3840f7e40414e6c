//! Summary statistics and grade breakdown of index grids.

use eco_common::{Grade, GradeBreakdown, GradeClass, IndexGrid, IndexStatistics};

/// Linear-interpolated percentile of sorted values, `p` in 0..=100.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    let rank = (p / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64)
}

/// Statistics over the valid pixels of `grid`.
///
/// Returns `None` when no pixel is valid; an empty distribution has no
/// meaningful mean or percentiles.
pub fn summarize(grid: &IndexGrid, pixel_area_km2: f64) -> Option<IndexStatistics> {
    let mut values: Vec<f64> = grid.valid_values().map(f64::from).collect();
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);

    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    let std_dev = variance.sqrt();

    let mut counts = [0u64; 5];
    for &v in &values {
        let grade = Grade::classify(v, mean, std_dev);
        counts[grade as usize] += 1;
    }
    let classes = Grade::ALL
        .iter()
        .zip(counts)
        .map(|(&grade, count)| GradeClass {
            grade,
            pixel_count: count,
            area_km2: count as f64 * pixel_area_km2,
            fraction: count as f64 / n,
        })
        .collect();

    let total = grid.len() as u64;
    Some(IndexStatistics {
        min: values[0],
        max: values[values.len() - 1],
        mean,
        std_dev,
        p5: percentile(&values, 5.0),
        p25: percentile(&values, 25.0),
        median: percentile(&values, 50.0),
        p75: percentile(&values, 75.0),
        p95: percentile(&values, 95.0),
        valid_pixels: values.len() as u64,
        total_pixels: total,
        valid_ratio: values.len() as f64 / total as f64,
        grades: GradeBreakdown {
            classes,
            pixel_area_km2,
        },
    })
}
