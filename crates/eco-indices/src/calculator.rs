//! Index dispatch and the shared per-pixel evaluation loop.

use std::collections::BTreeMap;

use rayon::prelude::*;
use tracing::debug;

use eco_common::{
    BandData, BandRole, EcoError, EcoResult, IndexGrid, IndexKind, QualityWarning, RasterWindow,
};

use crate::config::IndexConfig;
use crate::{heat, normalized, tasseled_cap};

/// Band samples of one window keyed by role, all of one shape.
#[derive(Debug, Clone)]
pub struct BandSet {
    width: usize,
    height: usize,
    bands: BTreeMap<BandRole, BandData>,
}

impl BandSet {
    pub fn new(bands: Vec<BandData>) -> EcoResult<Self> {
        let (width, height) = bands.first().map(|b| b.shape()).unwrap_or((0, 0));
        let mut map = BTreeMap::new();
        for band in bands {
            if band.shape() != (width, height) {
                return Err(EcoError::shape_mismatch((width, height), band.shape()));
            }
            if band.data.len() != width * height {
                return Err(EcoError::invalid_parameter(
                    "bands",
                    format!(
                        "{} band holds {} samples for {}x{}",
                        band.role,
                        band.data.len(),
                        width,
                        height
                    ),
                ));
            }
            let role = band.role;
            if map.insert(role, band).is_some() {
                return Err(EcoError::DuplicateBand(role.to_string()));
            }
        }
        Ok(Self {
            width,
            height,
            bands: map,
        })
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    pub fn get(&self, role: BandRole) -> EcoResult<&BandData> {
        self.bands
            .get(&role)
            .ok_or_else(|| EcoError::MissingBand(role.to_string()))
    }

    pub fn roles(&self) -> impl Iterator<Item = BandRole> + '_ {
        self.bands.keys().copied()
    }
}

/// A computed index grid with its range-policy counters.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexOutput {
    pub grid: IndexGrid,
    /// Pixels masked because the value fell outside the valid range
    pub out_of_range: u64,
    /// Pixels clamped into the valid range
    pub clamped: u64,
}

impl IndexOutput {
    /// An all no-data output to assemble tiles into.
    pub fn empty(width: usize, height: usize) -> Self {
        Self {
            grid: IndexGrid::empty(width, height),
            out_of_range: 0,
            clamped: 0,
        }
    }

    /// Paste a tile computed over `window` and add its counters.
    pub fn merge_tile(&mut self, window: &RasterWindow, tile: IndexOutput) -> EcoResult<()> {
        self.grid.paste(window, &tile.grid)?;
        self.out_of_range += tile.out_of_range;
        self.clamped += tile.clamped;
        Ok(())
    }

    pub fn warnings(&self) -> Vec<QualityWarning> {
        let mut warnings = Vec::new();
        if self.out_of_range > 0 {
            warnings.push(QualityWarning::OutOfRange {
                count: self.out_of_range,
            });
        }
        if self.clamped > 0 {
            warnings.push(QualityWarning::Clamped {
                count: self.clamped,
            });
        }
        if self.grid.valid_count() == 0 {
            warnings.push(QualityWarning::NoValidPixels);
        }
        warnings
    }
}

/// Outcome of one pixel evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Pixel {
    Value(f64),
    NoData,
    OutOfRange,
    Clamped(f64),
}

/// Evaluate `f` for every pixel index, one rayon job per row.
pub(crate) fn evaluate<F>(width: usize, height: usize, f: F) -> IndexOutput
where
    F: Fn(usize) -> Pixel + Sync,
{
    let rows: Vec<(Vec<f32>, u64, u64)> = (0..height)
        .into_par_iter()
        .map(|row| {
            let mut values = Vec::with_capacity(width);
            let mut out_of_range = 0u64;
            let mut clamped = 0u64;
            for col in 0..width {
                let v = match f(row * width + col) {
                    Pixel::Value(v) => v as f32,
                    Pixel::NoData => f32::NAN,
                    Pixel::OutOfRange => {
                        out_of_range += 1;
                        f32::NAN
                    }
                    Pixel::Clamped(v) => {
                        clamped += 1;
                        v as f32
                    }
                };
                values.push(v);
            }
            (values, out_of_range, clamped)
        })
        .collect();

    let mut output = IndexOutput::empty(width, height);
    for (row, (values, out_of_range, clamped)) in rows.into_iter().enumerate() {
        for (col, v) in values.into_iter().enumerate() {
            output.grid.set(row * width + col, v);
        }
        output.out_of_range += out_of_range;
        output.clamped += clamped;
    }
    output
}

type Handler = fn(&BandSet, &IndexConfig) -> EcoResult<IndexOutput>;

/// Band-level computation of an index kind.
pub trait IndexCompute {
    fn compute(&self, bands: &BandSet, config: &IndexConfig) -> EcoResult<IndexOutput>;
}

impl IndexCompute for IndexKind {
    fn compute(&self, bands: &BandSet, config: &IndexConfig) -> EcoResult<IndexOutput> {
        let handler: Handler = match self {
            IndexKind::Ndvi => normalized::ndvi,
            IndexKind::Ndwi => normalized::ndwi,
            IndexKind::Ndbi => normalized::ndbi,
            IndexKind::Ndsi => normalized::ndsi,
            IndexKind::Greenness => tasseled_cap::greenness,
            IndexKind::Wetness => tasseled_cap::wetness,
            IndexKind::Dryness => tasseled_cap::dryness,
            IndexKind::Heat => heat::heat,
            IndexKind::Rsei => not_band_computable,
        };
        let output = handler(bands, config)?;
        debug!(
            kind = %self,
            width = output.grid.width,
            height = output.grid.height,
            valid = output.grid.valid_count(),
            out_of_range = output.out_of_range,
            clamped = output.clamped,
            "Computed index"
        );
        Ok(output)
    }
}

fn not_band_computable(_: &BandSet, _: &IndexConfig) -> EcoResult<IndexOutput> {
    Err(EcoError::invalid_parameter(
        "kind",
        "rsei is synthesized from component grids, not computed from bands",
    ))
}

/// Roles `kind` reads under `config`.
pub fn required_roles(kind: IndexKind, config: &IndexConfig) -> Vec<BandRole> {
    config.required_roles(kind)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn band(role: BandRole, data: Vec<f32>) -> BandData {
        BandData::new(role, 2, 2, data)
    }

    #[test]
    fn test_band_set_rejects_duplicates() {
        let err = BandSet::new(vec![
            band(BandRole::Red, vec![0.0; 4]),
            band(BandRole::Red, vec![0.0; 4]),
        ])
        .unwrap_err();
        assert_eq!(err, EcoError::DuplicateBand("red".into()));
    }

    #[test]
    fn test_band_set_rejects_shape_mismatch() {
        let err = BandSet::new(vec![
            band(BandRole::Red, vec![0.0; 4]),
            BandData::new(BandRole::Nir, 4, 1, vec![0.0; 4]),
        ])
        .unwrap_err();
        assert!(matches!(err, EcoError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_missing_band() {
        let set = BandSet::new(vec![band(BandRole::Red, vec![0.1; 4])]).unwrap();
        let err = IndexKind::Ndvi
            .compute(&set, &IndexConfig::default())
            .unwrap_err();
        assert_eq!(err, EcoError::MissingBand("nir".into()));
    }

    #[test]
    fn test_rsei_is_not_band_computable() {
        let set = BandSet::new(vec![band(BandRole::Red, vec![0.1; 4])]).unwrap();
        let err = IndexKind::Rsei
            .compute(&set, &IndexConfig::default())
            .unwrap_err();
        assert_eq!(err.kind(), eco_common::ErrorKind::Precondition);
    }

    #[test]
    fn test_evaluate_counts() {
        let out = evaluate(2, 2, |i| match i {
            0 => Pixel::Value(0.5),
            1 => Pixel::NoData,
            2 => Pixel::OutOfRange,
            _ => Pixel::Clamped(1.0),
        });
        assert_eq!(out.grid.get(0), Some(0.5));
        assert_eq!(out.grid.get(1), None);
        assert_eq!(out.grid.get(2), None);
        assert_eq!(out.grid.get(3), Some(1.0));
        assert_eq!(
            out.warnings(),
            vec![
                QualityWarning::OutOfRange { count: 1 },
                QualityWarning::Clamped { count: 1 }
            ]
        );
    }

    #[test]
    fn test_merge_tiles() {
        let mut full = IndexOutput::empty(2, 2);
        for (row, v) in [(0usize, 0.1f64), (1, 0.2)] {
            let tile = evaluate(2, 1, |_| Pixel::Value(v));
            full.merge_tile(&RasterWindow::new(0, row, 2, 1), tile).unwrap();
        }
        assert_eq!(full.grid.get(3), Some(0.2));
        assert_eq!(full.grid.valid_count(), 4);
        assert!(full.warnings().is_empty());
    }

    #[test]
    fn test_all_nodata_warns() {
        let out = evaluate(1, 1, |_| Pixel::NoData);
        assert_eq!(out.warnings(), vec![QualityWarning::NoValidPixels]);
    }
}
