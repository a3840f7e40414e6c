//! Normalized-difference indices.
//!
//! Every index here has the form `(a - b) / (a + b)` over two reflectance
//! bands and is bounded to [-1, 1] for non-negative reflectance.

use eco_common::{BandData, BandRole, EcoError, EcoResult};

use crate::calculator::{evaluate, BandSet, IndexOutput, Pixel};
use crate::config::{IndexConfig, NdwiVariant, ReflectanceScale};

/// Denominators smaller than this are treated as zero.
const MIN_DENOMINATOR: f64 = 1e-10;

/// Rounding slack before a value counts as outside [-1, 1].
const RANGE_TOLERANCE: f64 = 1e-6;

#[inline]
pub(crate) fn nd_pixel(a: f64, b: f64, clamp: bool) -> Pixel {
    let sum = a + b;
    if sum.abs() < MIN_DENOMINATOR {
        return Pixel::NoData;
    }
    let value = (a - b) / sum;
    if !value.is_finite() {
        Pixel::NoData
    } else if value.abs() > 1.0 + RANGE_TOLERANCE {
        if clamp {
            Pixel::Clamped(value.clamp(-1.0, 1.0))
        } else {
            Pixel::OutOfRange
        }
    } else {
        Pixel::Value(value.clamp(-1.0, 1.0))
    }
}

/// `(a - b) / (a + b)` per pixel.
///
/// No-data or non-finite input, or a zero denominator, yields no-data.
pub fn normalized_difference(
    a: &BandData,
    b: &BandData,
    scale: ReflectanceScale,
    clamp: bool,
) -> EcoResult<IndexOutput> {
    if a.shape() != b.shape() {
        return Err(EcoError::shape_mismatch(a.shape(), b.shape()));
    }
    let (width, height) = a.shape();
    Ok(evaluate(width, height, |i| {
        if !a.is_valid(i) || !b.is_valid(i) {
            return Pixel::NoData;
        }
        nd_pixel(scale.apply(a.data[i]), scale.apply(b.data[i]), clamp)
    }))
}

fn pair(bands: &BandSet, config: &IndexConfig, a: BandRole, b: BandRole) -> EcoResult<IndexOutput> {
    normalized_difference(
        bands.get(a)?,
        bands.get(b)?,
        config.reflectance,
        config.clamp_normalized,
    )
}

pub(crate) fn ndvi(bands: &BandSet, config: &IndexConfig) -> EcoResult<IndexOutput> {
    pair(bands, config, BandRole::Nir, BandRole::Red)
}

pub(crate) fn ndwi(bands: &BandSet, config: &IndexConfig) -> EcoResult<IndexOutput> {
    match config.ndwi_variant {
        NdwiVariant::Mcfeeters => pair(bands, config, BandRole::Green, BandRole::Nir),
        NdwiVariant::Gao => pair(bands, config, BandRole::Nir, BandRole::Swir1),
    }
}

pub(crate) fn ndbi(bands: &BandSet, config: &IndexConfig) -> EcoResult<IndexOutput> {
    pair(bands, config, BandRole::Swir1, BandRole::Nir)
}

pub(crate) fn ndsi(bands: &BandSet, config: &IndexConfig) -> EcoResult<IndexOutput> {
    pair(bands, config, BandRole::Green, BandRole::Swir1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nd_pixel() {
        match nd_pixel(0.3, 0.1, false) {
            Pixel::Value(v) => assert!((v - 0.5).abs() < 1e-12),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(nd_pixel(0.0, 0.0, false), Pixel::NoData);
        assert_eq!(nd_pixel(1e-11, 1e-12, false), Pixel::NoData);
        assert_eq!(nd_pixel(1.0, 0.0, false), Pixel::Value(1.0));
    }

    #[test]
    fn test_negative_reflectance_is_flagged() {
        // (0.5 - -0.3) / 0.2 = 4.0
        assert_eq!(nd_pixel(0.5, -0.3, false), Pixel::OutOfRange);
        assert_eq!(nd_pixel(0.5, -0.3, true), Pixel::Clamped(1.0));
        assert_eq!(nd_pixel(-0.3, 0.5, true), Pixel::Clamped(-1.0));
    }

    #[test]
    fn test_nodata_sentinel_masks_pixel() {
        let a = BandData::new(BandRole::Nir, 2, 1, vec![0.4, 0.0]).with_no_data(Some(0.0));
        let b = BandData::new(BandRole::Red, 2, 1, vec![0.1, 0.1]);
        let out = normalized_difference(&a, &b, ReflectanceScale::default(), false).unwrap();
        assert!(out.grid.get(0).is_some());
        assert_eq!(out.grid.get(1), None);
    }

    #[test]
    fn test_scaling_applied_before_ratio() {
        // DN 20000 -> 0.35, DN 10000 -> 0.075
        let a = BandData::new(BandRole::Nir, 1, 1, vec![20000.0]);
        let b = BandData::new(BandRole::Red, 1, 1, vec![10000.0]);
        let out =
            normalized_difference(&a, &b, ReflectanceScale::LANDSAT_C2_L2, false).unwrap();
        let expected = (0.35 - 0.075) / (0.35 + 0.075);
        assert!((out.grid.get(0).unwrap() as f64 - expected).abs() < 1e-6);
    }
}
