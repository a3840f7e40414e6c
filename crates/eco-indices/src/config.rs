//! Parameters of the index computations.
//!
//! Every field has a default so partial YAML documents deserialize. The
//! [`IndexConfig::signature`] of a configuration identifies results that
//! were computed with identical parameters.

use serde::{Deserialize, Serialize};

use eco_common::{BandRole, EcoError, EcoResult, IndexKind, Sensor};

/// NDWI formulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NdwiVariant {
    /// (Green - NIR) / (Green + NIR), open water
    #[default]
    Mcfeeters,
    /// (NIR - SWIR1) / (NIR + SWIR1), vegetation water content
    Gao,
}

/// Linear scaling applied to optical samples before any formula.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReflectanceScale {
    pub scale: f64,
    pub offset: f64,
}

impl Default for ReflectanceScale {
    fn default() -> Self {
        Self {
            scale: 1.0,
            offset: 0.0,
        }
    }
}

impl ReflectanceScale {
    /// Landsat Collection 2 Level-2 surface reflectance.
    pub const LANDSAT_C2_L2: ReflectanceScale = ReflectanceScale {
        scale: 2.75e-5,
        offset: -0.2,
    };

    #[inline]
    pub fn apply(&self, value: f32) -> f64 {
        value as f64 * self.scale + self.offset
    }
}

/// Tasseled-Cap coefficients over blue, green, red, nir, swir1, swir2.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TasseledCapCoefficients {
    pub brightness: [f64; 6],
    pub greenness: [f64; 6],
    pub wetness: [f64; 6],
}

impl TasseledCapCoefficients {
    /// Landsat 8 OLI surface reflectance (Baig et al. 2014).
    pub const LANDSAT8: TasseledCapCoefficients = TasseledCapCoefficients {
        brightness: [0.3029, 0.2786, 0.4733, 0.5599, 0.5080, 0.1872],
        greenness: [-0.2941, -0.2430, -0.5424, 0.7276, 0.0713, -0.1608],
        wetness: [0.1511, 0.1973, 0.3283, 0.3407, -0.7117, -0.4559],
    };

    /// Sentinel-2 MSI B2, B3, B4, B8, B11, B12 (Shi & Xu 2019).
    pub const SENTINEL2: TasseledCapCoefficients = TasseledCapCoefficients {
        brightness: [0.3510, 0.3813, 0.3437, 0.7196, 0.2396, 0.1949],
        greenness: [-0.3599, -0.3533, -0.4734, 0.6633, 0.0087, -0.2856],
        wetness: [0.2578, 0.2305, 0.0883, 0.1071, -0.7611, -0.5308],
    };

    /// Coefficient row for a Tasseled-Cap kind; dryness uses brightness.
    pub fn for_kind(&self, kind: IndexKind) -> Option<&[f64; 6]> {
        match kind {
            IndexKind::Greenness => Some(&self.greenness),
            IndexKind::Wetness => Some(&self.wetness),
            IndexKind::Dryness => Some(&self.brightness),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TasseledCapPreset {
    /// Also used for Landsat 9
    #[default]
    Landsat8,
    Sentinel2,
    /// Coefficients taken from [`TasseledCapConfig::custom`]
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TasseledCapConfig {
    pub preset: TasseledCapPreset,
    pub custom: Option<TasseledCapCoefficients>,
}

impl TasseledCapConfig {
    pub fn coefficients(&self) -> EcoResult<TasseledCapCoefficients> {
        match self.preset {
            TasseledCapPreset::Landsat8 => Ok(TasseledCapCoefficients::LANDSAT8),
            TasseledCapPreset::Sentinel2 => Ok(TasseledCapCoefficients::SENTINEL2),
            TasseledCapPreset::Custom => self.custom.ok_or_else(|| {
                EcoError::invalid_parameter(
                    "tasseled_cap.custom",
                    "preset 'custom' requires coefficients",
                )
            }),
        }
    }
}

/// What the thermal band's samples represent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThermalUnits {
    /// Level-1 digital numbers, converted with `radiance_mult`/`radiance_add`
    #[default]
    DigitalNumber,
    /// At-sensor spectral radiance, W/(m²·sr·µm)
    Radiance,
    /// Brightness or surface temperature already in Kelvin
    Kelvin,
}

/// Thermal band to heat conversion. Defaults are Landsat 8 band 10.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeatConfig {
    pub units: ThermalUnits,
    pub radiance_mult: f64,
    pub radiance_add: f64,
    pub k1: f64,
    pub k2: f64,
    /// Land surface emissivity; `None` leaves brightness temperature uncorrected
    pub emissivity: Option<f64>,
    /// Centre wavelength of the thermal band in µm
    pub wavelength_um: f64,
    pub celsius: bool,
}

impl Default for HeatConfig {
    fn default() -> Self {
        Self {
            units: ThermalUnits::DigitalNumber,
            radiance_mult: 3.342e-4,
            radiance_add: 0.1,
            k1: 774.8853,
            k2: 1321.0789,
            emissivity: None,
            wavelength_um: 10.895,
            celsius: true,
        }
    }
}

/// Standardization applied to RSEI components before the PCA.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Normalization {
    /// Rescale to [0, 1]
    #[default]
    MinMax,
    /// Zero mean, unit variance
    ZScore,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RseiConfig {
    pub normalization: Normalization,
    /// PC1 explained-variance ratio below which a warning is attached
    pub min_explained_variance: f64,
}

impl Default for RseiConfig {
    fn default() -> Self {
        Self {
            normalization: Normalization::MinMax,
            min_explained_variance: 0.6,
        }
    }
}

/// Complete parameter set for index computation.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub ndwi_variant: NdwiVariant,
    /// Clamp normalized differences to [-1, 1] instead of masking them
    pub clamp_normalized: bool,
    pub reflectance: ReflectanceScale,
    pub tasseled_cap: TasseledCapConfig,
    pub heat: HeatConfig,
    pub rsei: RseiConfig,
}

impl IndexConfig {
    /// Defaults with the Tasseled-Cap preset matching `sensor`.
    pub fn for_sensor(sensor: Sensor) -> Self {
        let mut config = Self::default();
        if sensor == Sensor::Sentinel2 {
            config.tasseled_cap.preset = TasseledCapPreset::Sentinel2;
        }
        config
    }

    pub fn validate(&self) -> EcoResult<()> {
        if !self.reflectance.scale.is_finite() || self.reflectance.scale <= 0.0 {
            return Err(EcoError::invalid_parameter(
                "reflectance.scale",
                format!("must be positive, got {}", self.reflectance.scale),
            ));
        }
        if !self.reflectance.offset.is_finite() {
            return Err(EcoError::invalid_parameter(
                "reflectance.offset",
                "must be finite",
            ));
        }
        self.tasseled_cap.coefficients()?;
        if self.heat.k1 <= 0.0 || self.heat.k2 <= 0.0 {
            return Err(EcoError::invalid_parameter(
                "heat",
                "calibration constants k1 and k2 must be positive",
            ));
        }
        if let Some(e) = self.heat.emissivity {
            if !(e > 0.0 && e <= 1.0) {
                return Err(EcoError::invalid_parameter(
                    "heat.emissivity",
                    format!("must be in (0, 1], got {}", e),
                ));
            }
        }
        if !(0.0..=1.0).contains(&self.rsei.min_explained_variance) {
            return Err(EcoError::invalid_parameter(
                "rsei.min_explained_variance",
                format!("must be in [0, 1], got {}", self.rsei.min_explained_variance),
            ));
        }
        Ok(())
    }

    /// Band roles needed to compute `kind` under this configuration.
    pub fn required_roles(&self, kind: IndexKind) -> Vec<BandRole> {
        match kind {
            IndexKind::Ndvi => vec![BandRole::Red, BandRole::Nir],
            IndexKind::Ndwi => match self.ndwi_variant {
                NdwiVariant::Mcfeeters => vec![BandRole::Green, BandRole::Nir],
                NdwiVariant::Gao => vec![BandRole::Nir, BandRole::Swir1],
            },
            IndexKind::Ndbi => vec![BandRole::Swir1, BandRole::Nir],
            IndexKind::Ndsi => vec![BandRole::Green, BandRole::Swir1],
            IndexKind::Greenness | IndexKind::Wetness | IndexKind::Dryness => {
                BandRole::OPTICAL.to_vec()
            }
            IndexKind::Heat => vec![BandRole::Thermal],
            IndexKind::Rsei => BandRole::ALL.to_vec(),
        }
    }

    /// Short stable hash of the parameters.
    pub fn signature(&self) -> String {
        let encoded = serde_json::to_vec(self).unwrap_or_default();
        format!("{:08x}", crc32fast::hash(&encoded))
    }
}
