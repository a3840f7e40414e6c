//! Tasseled-Cap components as linear combinations of the optical bands.

use eco_common::{BandData, BandRole, EcoError, EcoResult, IndexKind};

use crate::calculator::{evaluate, BandSet, IndexOutput, Pixel};
use crate::config::{IndexConfig, ReflectanceScale};

/// Weighted sum of the six optical bands (blue, green, red, nir, swir1, swir2).
///
/// A pixel is no-data when any of the six samples is.
pub fn tasseled_cap(
    bands: [&BandData; 6],
    coefficients: &[f64; 6],
    scale: ReflectanceScale,
) -> EcoResult<IndexOutput> {
    let shape = bands[0].shape();
    if let Some(other) = bands.iter().find(|b| b.shape() != shape) {
        return Err(EcoError::shape_mismatch(shape, other.shape()));
    }
    let (width, height) = shape;
    Ok(evaluate(width, height, |i| {
        let mut sum = 0.0;
        for (band, c) in bands.iter().zip(coefficients) {
            if !band.is_valid(i) {
                return Pixel::NoData;
            }
            sum += c * scale.apply(band.data[i]);
        }
        Pixel::Value(sum)
    }))
}

fn component(bands: &BandSet, config: &IndexConfig, kind: IndexKind) -> EcoResult<IndexOutput> {
    let coefficients = config.tasseled_cap.coefficients()?;
    let row = coefficients
        .for_kind(kind)
        .ok_or_else(|| EcoError::InternalError(format!("{} is not a Tasseled-Cap component", kind)))?;
    let [blue, green, red, nir, swir1, swir2] = BandRole::OPTICAL;
    let optical = [
        bands.get(blue)?,
        bands.get(green)?,
        bands.get(red)?,
        bands.get(nir)?,
        bands.get(swir1)?,
        bands.get(swir2)?,
    ];
    tasseled_cap(optical, row, config.reflectance)
}

pub(crate) fn greenness(bands: &BandSet, config: &IndexConfig) -> EcoResult<IndexOutput> {
    component(bands, config, IndexKind::Greenness)
}

pub(crate) fn wetness(bands: &BandSet, config: &IndexConfig) -> EcoResult<IndexOutput> {
    component(bands, config, IndexKind::Wetness)
}

/// Brightness; high over bare soil and built-up surfaces.
pub(crate) fn dryness(bands: &BandSet, config: &IndexConfig) -> EcoResult<IndexOutput> {
    component(bands, config, IndexKind::Dryness)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TasseledCapCoefficients;

    fn uniform(values: [f32; 6]) -> Vec<BandData> {
        BandRole::OPTICAL
            .iter()
            .zip(values)
            .map(|(&role, v)| BandData::new(role, 1, 1, vec![v]))
            .collect()
    }

    #[test]
    fn test_unit_reflectance_sums_coefficients() {
        let bands = uniform([1.0; 6]);
        let refs = [&bands[0], &bands[1], &bands[2], &bands[3], &bands[4], &bands[5]];
        let c = TasseledCapCoefficients::LANDSAT8.greenness;
        let out = tasseled_cap(refs, &c, ReflectanceScale::default()).unwrap();
        let expected: f64 = c.iter().sum();
        assert!((out.grid.get(0).unwrap() as f64 - expected).abs() < 1e-6);
    }

    #[test]
    fn test_any_invalid_band_masks_pixel() {
        let mut bands = uniform([0.1; 6]);
        bands[4].data[0] = f32::NAN;
        let set = BandSet::new(bands).unwrap();
        let out = wetness(&set, &IndexConfig::default()).unwrap();
        assert_eq!(out.grid.get(0), None);
    }

    #[test]
    fn test_dryness_uses_brightness() {
        let set = BandSet::new(uniform([0.1, 0.1, 0.2, 0.3, 0.3, 0.2])).unwrap();
        let out = dryness(&set, &IndexConfig::default()).unwrap();
        let b = TasseledCapCoefficients::LANDSAT8.brightness;
        let expected = b[0] * 0.1 + b[1] * 0.1 + b[2] * 0.2 + b[3] * 0.3 + b[4] * 0.3 + b[5] * 0.2;
        assert!((out.grid.get(0).unwrap() as f64 - expected).abs() < 1e-6);
    }
}
