//! Per-pixel index grids and raster geometry.

use serde::{Deserialize, Serialize};

use crate::{EcoError, EcoResult};

/// Value stored in invalid pixels of an [`IndexGrid`].
pub const NODATA: f32 = -9999.0;

/// Affine geotransform of a north-up raster.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub origin_x: f64,
    pub origin_y: f64,
    pub pixel_width: f64,
    /// Negative for north-up images
    pub pixel_height: f64,
}

impl GeoTransform {
    pub fn new(origin_x: f64, origin_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self {
            origin_x,
            origin_y,
            pixel_width,
            pixel_height,
        }
    }

    /// World coordinate of a pixel centre.
    pub fn pixel_center(&self, col: usize, row: usize) -> (f64, f64) {
        (
            self.origin_x + (col as f64 + 0.5) * self.pixel_width,
            self.origin_y + (row as f64 + 0.5) * self.pixel_height,
        )
    }

    /// Rescale for a raster resampled by `factor` (>1 means coarser pixels).
    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            pixel_width: self.pixel_width * factor,
            pixel_height: self.pixel_height * factor,
            ..*self
        }
    }
}

/// Rectangular pixel region of a raster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RasterWindow {
    pub col: usize,
    pub row: usize,
    pub width: usize,
    pub height: usize,
}

impl RasterWindow {
    pub fn new(col: usize, row: usize, width: usize, height: usize) -> Self {
        Self {
            col,
            row,
            width,
            height,
        }
    }

    pub fn full(width: usize, height: usize) -> Self {
        Self::new(0, 0, width, height)
    }

    /// Split an image into full-width row bands of at most `rows` rows.
    pub fn row_bands(width: usize, height: usize, rows: usize) -> Vec<RasterWindow> {
        let rows = rows.max(1);
        (0..height)
            .step_by(rows)
            .map(|row| RasterWindow::new(0, row, width, rows.min(height - row)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.width * self.height
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn fits_within(&self, width: usize, height: usize) -> bool {
        self.col + self.width <= width && self.row + self.height <= height
    }
}

/// Index values in row-major order with an explicit validity mask.
///
/// Invalid pixels always hold [`NODATA`]; valid pixels are always finite.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexGrid {
    pub width: usize,
    pub height: usize,
    values: Vec<f32>,
    valid: Vec<bool>,
}

impl IndexGrid {
    /// A grid with every pixel marked invalid.
    pub fn empty(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            values: vec![NODATA; width * height],
            valid: vec![false; width * height],
        }
    }

    /// Build a grid from computed values; `None` and non-finite values become no-data.
    pub fn from_options(width: usize, height: usize, values: Vec<Option<f32>>) -> EcoResult<Self> {
        if values.len() != width * height {
            return Err(EcoError::invalid_parameter(
                "values",
                format!("expected {} values for {}x{}, got {}", width * height, width, height, values.len()),
            ));
        }
        let mut grid = Self::empty(width, height);
        for (i, v) in values.into_iter().enumerate() {
            if let Some(v) = v {
                grid.set(i, v);
            }
        }
        Ok(grid)
    }

    /// Build a grid from values that use `nodata` for invalid pixels.
    pub fn from_values(width: usize, height: usize, values: Vec<f32>, nodata: f32) -> EcoResult<Self> {
        let opts = values
            .into_iter()
            .map(|v| if v == nodata { None } else { Some(v) })
            .collect();
        Self::from_options(width, height, opts)
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Store a value; non-finite values mark the pixel invalid.
    #[inline]
    pub fn set(&mut self, idx: usize, value: f32) {
        if value.is_finite() {
            self.values[idx] = value;
            self.valid[idx] = true;
        } else {
            self.invalidate(idx);
        }
    }

    #[inline]
    pub fn invalidate(&mut self, idx: usize) {
        self.values[idx] = NODATA;
        self.valid[idx] = false;
    }

    #[inline]
    pub fn get(&self, idx: usize) -> Option<f32> {
        if self.valid[idx] {
            Some(self.values[idx])
        } else {
            None
        }
    }

    #[inline]
    pub fn is_valid(&self, idx: usize) -> bool {
        self.valid[idx]
    }

    /// Raw values, no-data pixels holding [`NODATA`].
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn mask(&self) -> &[bool] {
        &self.valid
    }

    pub fn valid_count(&self) -> usize {
        self.valid.iter().filter(|v| **v).count()
    }

    pub fn valid_values(&self) -> impl Iterator<Item = f32> + '_ {
        self.values
            .iter()
            .zip(&self.valid)
            .filter(|(_, ok)| **ok)
            .map(|(v, _)| *v)
    }

    pub fn same_shape(&self, other: &IndexGrid) -> bool {
        self.shape() == other.shape()
    }

    /// Copy a window-sized grid into this grid at the window's offset.
    pub fn paste(&mut self, window: &RasterWindow, tile: &IndexGrid) -> EcoResult<()> {
        if tile.shape() != (window.width, window.height)
            || !window.fits_within(self.width, self.height)
        {
            return Err(EcoError::shape_mismatch(
                (window.width, window.height),
                tile.shape(),
            ));
        }
        for r in 0..window.height {
            let dst = (window.row + r) * self.width + window.col;
            let src = r * tile.width;
            self.values[dst..dst + window.width]
                .copy_from_slice(&tile.values[src..src + window.width]);
            self.valid[dst..dst + window.width]
                .copy_from_slice(&tile.valid[src..src + window.width]);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_finite_becomes_nodata() {
        let grid =
            IndexGrid::from_options(3, 1, vec![Some(0.5), Some(f32::NAN), Some(f32::INFINITY)])
                .unwrap();
        assert_eq!(grid.get(0), Some(0.5));
        assert_eq!(grid.get(1), None);
        assert_eq!(grid.values()[2], NODATA);
        assert_eq!(grid.valid_count(), 1);
    }

    #[test]
    fn test_row_bands_cover_image() {
        let bands = RasterWindow::row_bands(10, 7, 3);
        assert_eq!(bands.len(), 3);
        assert_eq!(bands[2], RasterWindow::new(0, 6, 10, 1));
        assert_eq!(bands.iter().map(|w| w.height).sum::<usize>(), 7);
    }

    #[test]
    fn test_paste_tile() {
        let mut grid = IndexGrid::empty(2, 3);
        let tile = IndexGrid::from_options(2, 1, vec![Some(1.0), None]).unwrap();
        grid.paste(&RasterWindow::new(0, 1, 2, 1), &tile).unwrap();
        assert_eq!(grid.get(2), Some(1.0));
        assert_eq!(grid.get(3), None);
        assert_eq!(grid.valid_count(), 1);
    }

    #[test]
    fn test_paste_rejects_out_of_bounds() {
        let mut grid = IndexGrid::empty(2, 2);
        let tile = IndexGrid::empty(2, 1);
        assert!(grid.paste(&RasterWindow::new(0, 2, 2, 1), &tile).is_err());
    }
}
