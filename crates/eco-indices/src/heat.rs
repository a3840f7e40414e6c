//! Heat from the thermal band.
//!
//! Samples are converted to at-sensor radiance, inverted through Planck's law
//! with the band's calibration constants, and optionally corrected for
//! surface emissivity.

use eco_common::{BandData, BandRole, EcoResult};

use crate::calculator::{evaluate, BandSet, IndexOutput, Pixel};
use crate::config::{HeatConfig, IndexConfig, ThermalUnits};

/// h·c/σ in m·K
const RHO_M_K: f64 = 1.438e-2;

const KELVIN_OFFSET: f64 = 273.15;

/// Brightness temperature in Kelvin for a spectral radiance.
#[inline]
pub fn radiance_to_kelvin(radiance: f64, k1: f64, k2: f64) -> Option<f64> {
    if !(radiance > 0.0) {
        return None;
    }
    let t = k2 / (k1 / radiance + 1.0).ln();
    t.is_finite().then_some(t)
}

/// Convert one thermal sample to the configured heat value.
///
/// Returns `None` for non-positive radiance or temperature.
pub fn surface_temperature(sample: f64, config: &HeatConfig) -> Option<f64> {
    let kelvin = match config.units {
        ThermalUnits::DigitalNumber => radiance_to_kelvin(
            config.radiance_mult * sample + config.radiance_add,
            config.k1,
            config.k2,
        )?,
        ThermalUnits::Radiance => radiance_to_kelvin(sample, config.k1, config.k2)?,
        ThermalUnits::Kelvin if sample > 0.0 => sample,
        ThermalUnits::Kelvin => return None,
    };

    let kelvin = match config.emissivity {
        Some(e) => {
            let lambda_m = config.wavelength_um * 1e-6;
            kelvin / (1.0 + (lambda_m * kelvin / RHO_M_K) * e.ln())
        }
        None => kelvin,
    };

    if config.celsius {
        Some(kelvin - KELVIN_OFFSET)
    } else {
        Some(kelvin)
    }
}

/// Heat grid of a thermal band.
pub fn thermal_heat(thermal: &BandData, config: &HeatConfig) -> IndexOutput {
    let (width, height) = thermal.shape();
    evaluate(width, height, |i| {
        if !thermal.is_valid(i) {
            return Pixel::NoData;
        }
        match surface_temperature(thermal.data[i] as f64, config) {
            Some(t) => Pixel::Value(t),
            None => Pixel::NoData,
        }
    })
}

pub(crate) fn heat(bands: &BandSet, config: &IndexConfig) -> EcoResult<IndexOutput> {
    Ok(thermal_heat(bands.get(BandRole::Thermal)?, &config.heat))
}
