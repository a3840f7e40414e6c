//! Ecological index computation.
//!
//! - [`normalized`]: NDVI, NDWI, NDBI and NDSI
//! - [`tasseled_cap`]: greenness, wetness and dryness
//! - [`heat`]: thermal band to surface temperature
//! - [`rsei`]: PCA synthesis of the four RSEI components
//! - [`statistics`]: summary statistics and grade breakdown
//!
//! Per-pixel work is parallel across rows with rayon.

pub mod calculator;
pub mod config;
pub mod heat;
pub mod normalized;
pub mod rsei;
pub mod statistics;
pub mod tasseled_cap;

pub use calculator::{required_roles, BandSet, IndexCompute, IndexOutput};
pub use config::{
    HeatConfig, IndexConfig, NdwiVariant, Normalization, ReflectanceScale, RseiConfig,
    TasseledCapCoefficients, TasseledCapConfig, TasseledCapPreset, ThermalUnits,
};
pub use heat::{radiance_to_kelvin, surface_temperature, thermal_heat};
pub use normalized::normalized_difference;
pub use rsei::{synthesize, RseiComponents, RseiOutput};
pub use statistics::{percentile, summarize};
pub use tasseled_cap::tasseled_cap;
