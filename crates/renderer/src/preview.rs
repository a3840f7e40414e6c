//! Colormapped PNG previews of index grids.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use eco_common::{EcoError, EcoResult, IndexGrid, IndexKind, IndexStatistics};

use crate::color::{ColorRamp, RampName};
use crate::png::encode_png;

/// Value interval mapped onto the ramp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueRange {
    /// Observed min/max of the grid
    #[default]
    Data,
    /// Theoretical range of the index kind, falling back to `Data` for
    /// unbounded kinds
    Fixed,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub enabled: bool,
    /// Ramp for every kind; the per-kind default when unset
    pub ramp: Option<RampName>,
    pub value_range: ValueRange,
    /// Longest preview side in pixels
    pub max_preview_dim: usize,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ramp: None,
            value_range: ValueRange::Data,
            max_preview_dim: 1024,
        }
    }
}

impl RenderConfig {
    pub fn validate(&self) -> EcoResult<()> {
        if self.max_preview_dim == 0 {
            return Err(EcoError::invalid_parameter(
                "max_preview_dim",
                "must be at least 1",
            ));
        }
        Ok(())
    }

    pub fn ramp_for(&self, kind: IndexKind) -> RampName {
        self.ramp.unwrap_or_else(|| RampName::default_for(kind))
    }

    /// Interval mapped onto the ramp for `kind`.
    pub fn value_range_for(&self, kind: IndexKind, stats: &IndexStatistics) -> (f32, f32) {
        match (self.value_range, kind.valid_range()) {
            (ValueRange::Fixed, Some(range)) => range,
            _ => (stats.min as f32, stats.max as f32),
        }
    }
}

/// Encoded preview image.
#[derive(Debug, Clone, PartialEq)]
pub struct Preview {
    pub png: Vec<u8>,
    pub width: usize,
    pub height: usize,
}

/// Colorize a grid. No-data pixels become fully transparent.
pub fn render_rgba(grid: &IndexGrid, ramp: &ColorRamp, min: f32, max: f32) -> Vec<u8> {
    let (width, _) = grid.shape();
    let range = max - min;
    let range = if range.abs() < f32::EPSILON { 1.0 } else { range };

    let mut pixels = vec![0u8; grid.len() * 4];
    pixels
        .par_chunks_mut(width.max(1) * 4)
        .enumerate()
        .for_each(|(row, out)| {
            for col in 0..out.len() / 4 {
                if let Some(value) = grid.get(row * width + col) {
                    let color = ramp.color_at((value - min) / range);
                    out[col * 4..col * 4 + 4].copy_from_slice(&color.to_array());
                }
            }
        });
    pixels
}

/// Shrink a grid so neither side exceeds `max_dim`.
///
/// Each output pixel takes the source pixel at the center of its block, or
/// the first valid pixel of the block when the center is no-data. Blocks
/// without any valid pixel stay no-data.
pub fn downsample_preview(grid: &IndexGrid, max_dim: usize) -> IndexGrid {
    let (width, height) = grid.shape();
    let longest = width.max(height);
    if max_dim == 0 || longest <= max_dim {
        return grid.clone();
    }

    let dst_width = ((width * max_dim) / longest).max(1);
    let dst_height = ((height * max_dim) / longest).max(1);

    let values: Vec<Option<f32>> = (0..dst_width * dst_height)
        .into_par_iter()
        .map(|i| {
            let (x, y) = (i % dst_width, i / dst_width);
            let cols = block(x, width, dst_width);
            let rows = block(y, height, dst_height);

            let center_col = ((2 * x + 1) * width) / (2 * dst_width);
            let center_row = ((2 * y + 1) * height) / (2 * dst_height);
            grid.get(center_row * width + center_col).or_else(|| {
                rows.clone()
                    .flat_map(|r| cols.clone().map(move |c| r * width + c))
                    .find_map(|idx| grid.get(idx))
            })
        })
        .collect();

    let mut out = IndexGrid::empty(dst_width, dst_height);
    for (idx, value) in values.into_iter().enumerate() {
        if let Some(v) = value {
            out.set(idx, v);
        }
    }
    out
}

/// Source range covered by output position `i` along one axis.
fn block(i: usize, src: usize, dst: usize) -> std::ops::Range<usize> {
    let start = i * src / dst;
    start..((i + 1) * src / dst).max(start + 1)
}

/// Render the preview of one result grid.
///
/// Returns `None` when previews are disabled or there are no statistics,
/// which is the case for grids without valid pixels.
pub fn render_preview(
    kind: IndexKind,
    grid: &IndexGrid,
    stats: Option<&IndexStatistics>,
    config: &RenderConfig,
) -> EcoResult<Option<Preview>> {
    let stats = match stats {
        Some(stats) if config.enabled => stats,
        _ => return Ok(None),
    };

    let (min, max) = config.value_range_for(kind, stats);
    let ramp = config.ramp_for(kind).ramp();
    let small = downsample_preview(grid, config.max_preview_dim);
    let (width, height) = small.shape();

    let pixels = render_rgba(&small, &ramp, min, max);
    let png = encode_png(&pixels, width, height)
        .map_err(|e| EcoError::RenderError(format!("{} preview: {}", kind, e)))?;

    debug!(
        kind = %kind,
        width = width,
        height = height,
        bytes = png.len(),
        "Rendered preview"
    );
    Ok(Some(Preview { png, width, height }))
}
