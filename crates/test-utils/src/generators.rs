//! Synthetic rasters for tests.

use eco_common::{BandData, BandRole};

/// Row-major `width x height` grid where the sample at `(col, row)` is
/// `col * 1000 + row`, so a misplaced read shows up in the value itself.
///
/// ```
/// let grid = test_utils::create_test_grid(4, 3);
/// assert_eq!(grid.len(), 12);
/// assert_eq!(grid[4 + 2], 2001.0);
/// ```
pub fn create_test_grid(width: usize, height: usize) -> Vec<f32> {
    (0..height)
        .flat_map(|row| (0..width).map(move |col| (col * 1000 + row) as f32))
        .collect()
}

/// Constant grid with NaN at each in-bounds `(col, row)` of `holes`.
pub fn create_grid_with_nans(
    width: usize,
    height: usize,
    value: f32,
    holes: &[(usize, usize)],
) -> Vec<f32> {
    let mut grid = vec![value; width * height];
    holes
        .iter()
        .filter(|&&(col, row)| col < width && row < height)
        .for_each(|&(col, row)| grid[row * width + col] = f32::NAN);
    grid
}

/// Surface class of a synthetic pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LandCover {
    Vegetation,
    Water,
    Urban,
}

impl LandCover {
    /// Surface reflectance in blue, green, red, nir, swir1, swir2 order.
    pub fn reflectance(&self) -> [f32; 6] {
        match self {
            LandCover::Vegetation => [0.04, 0.08, 0.05, 0.40, 0.20, 0.10],
            LandCover::Water => [0.08, 0.07, 0.05, 0.03, 0.02, 0.01],
            LandCover::Urban => [0.12, 0.14, 0.16, 0.22, 0.30, 0.25],
        }
    }

    /// Surface temperature in Kelvin.
    pub fn temperature(&self) -> f32 {
        match self {
            LandCover::Vegetation => 296.0,
            LandCover::Water => 290.0,
            LandCover::Urban => 312.0,
        }
    }
}

/// A scene split into vertical strips of land cover, by default
/// vegetation, water, then urban.
///
/// Reflectances carry a small deterministic per-band texture so that no
/// band is constant within a class. The thermal band is in Kelvin.
///
/// # Example
///
/// ```
/// use eco_common::BandRole;
/// use test_utils::{LandCover, SyntheticScene};
///
/// let scene = SyntheticScene::new(30, 10).with_nodata_border(1, -1.0);
/// assert_eq!(scene.cover_at(2, 5), LandCover::Vegetation);
/// assert_eq!(scene.band(BandRole::Red)[0], -1.0);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticScene {
    pub width: usize,
    pub height: usize,
    covers: Vec<LandCover>,
    border: usize,
    nodata: Option<f32>,
}

impl SyntheticScene {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            covers: vec![LandCover::Vegetation, LandCover::Water, LandCover::Urban],
            border: 0,
            nodata: None,
        }
    }

    /// Replace the strips, left to right. Empty lists are ignored.
    pub fn with_covers(mut self, covers: &[LandCover]) -> Self {
        if !covers.is_empty() {
            self.covers = covers.to_vec();
        }
        self
    }

    /// Fill a frame `border` pixels wide with `nodata` in every band.
    pub fn with_nodata_border(mut self, border: usize, nodata: f32) -> Self {
        self.border = border;
        self.nodata = Some(nodata);
        self
    }

    pub fn nodata(&self) -> Option<f32> {
        self.nodata
    }

    pub fn cover_at(&self, col: usize, _row: usize) -> LandCover {
        let strip = col * self.covers.len() / self.width.max(1);
        self.covers[strip.min(self.covers.len() - 1)]
    }

    pub fn is_border(&self, col: usize, row: usize) -> bool {
        self.nodata.is_some()
            && (col < self.border
                || row < self.border
                || col + self.border >= self.width
                || row + self.border >= self.height)
    }

    /// Pixels inside the border.
    pub fn interior_pixels(&self) -> usize {
        if self.nodata.is_none() {
            return self.width * self.height;
        }
        self.width.saturating_sub(2 * self.border) * self.height.saturating_sub(2 * self.border)
    }

    /// Raw samples for one band in row-major order.
    pub fn band(&self, role: BandRole) -> Vec<f32> {
        let mut data = Vec::with_capacity(self.width * self.height);
        for row in 0..self.height {
            for col in 0..self.width {
                if self.is_border(col, row) {
                    data.push(self.nodata.unwrap_or(f32::NAN));
                    continue;
                }
                let cover = self.cover_at(col, row);
                let texture = ((row * 7 + col * 3 + role as usize * 5) % 11) as f32 / 10.0;
                let value = match role {
                    BandRole::Thermal => cover.temperature() + texture * 1.5,
                    optical => cover.reflectance()[optical as usize] * (1.0 + 0.02 * texture),
                };
                data.push(value);
            }
        }
        data
    }

    pub fn band_data(&self, role: BandRole) -> BandData {
        BandData::new(role, self.width, self.height, self.band(role))
            .with_no_data(self.nodata.map(f64::from))
    }

    pub fn bands(&self, roles: &[BandRole]) -> Vec<BandData> {
        roles.iter().map(|&r| self.band_data(r)).collect()
    }

    /// All six optical bands plus thermal.
    pub fn all_bands(&self) -> Vec<BandData> {
        self.bands(&BandRole::ALL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_test_grid() {
        let grid = create_test_grid(3, 2);
        assert_eq!(grid, vec![0.0, 1000.0, 2000.0, 1.0, 1001.0, 2001.0]);
    }

    #[test]
    fn test_grid_with_nans() {
        let grid = create_grid_with_nans(2, 2, 1.0, &[(1, 0), (5, 5)]);
        assert!(grid[1].is_nan());
        assert_eq!(grid.iter().filter(|v| v.is_nan()).count(), 1);
    }

    #[test]
    fn test_scene_classes_by_column() {
        let scene = SyntheticScene::new(9, 3);
        assert_eq!(scene.cover_at(0, 0), LandCover::Vegetation);
        assert_eq!(scene.cover_at(4, 1), LandCover::Water);
        assert_eq!(scene.cover_at(8, 2), LandCover::Urban);
    }

    #[test]
    fn test_custom_covers() {
        let scene = SyntheticScene::new(4, 1).with_covers(&[LandCover::Urban, LandCover::Water]);
        assert_eq!(scene.cover_at(1, 0), LandCover::Urban);
        assert_eq!(scene.cover_at(2, 0), LandCover::Water);
    }

    #[test]
    fn test_scene_border() {
        let scene = SyntheticScene::new(6, 5).with_nodata_border(1, 0.0);
        let nir = scene.band(BandRole::Nir);
        assert_eq!(nir[0], 0.0);
        assert_eq!(nir[6 + 5], 0.0);
        assert!(nir[6 + 1] > 0.0);
        assert_eq!(scene.interior_pixels(), 12);
        assert_eq!(nir.iter().filter(|v| **v != 0.0).count(), 12);
    }

    #[test]
    fn test_vegetation_is_greener_than_water() {
        let scene = SyntheticScene::new(3, 1);
        let red = scene.band(BandRole::Red);
        let nir = scene.band(BandRole::Nir);
        let ndvi = |i: usize| (nir[i] - red[i]) / (nir[i] + red[i]);
        assert!(ndvi(0) > 0.5);
        assert!(ndvi(1) < 0.0);
    }
}
