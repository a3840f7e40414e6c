//! Spectral band roles and band sample buffers.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

use crate::EcoError;

/// Semantic role of a band within a multispectral image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BandRole {
    Blue,
    Green,
    Red,
    Nir,
    Swir1,
    Swir2,
    Thermal,
}

impl BandRole {
    pub const ALL: [BandRole; 7] = [
        BandRole::Blue,
        BandRole::Green,
        BandRole::Red,
        BandRole::Nir,
        BandRole::Swir1,
        BandRole::Swir2,
        BandRole::Thermal,
    ];

    /// Reflective bands in Tasseled-Cap coefficient order.
    pub const OPTICAL: [BandRole; 6] = [
        BandRole::Blue,
        BandRole::Green,
        BandRole::Red,
        BandRole::Nir,
        BandRole::Swir1,
        BandRole::Swir2,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BandRole::Blue => "blue",
            BandRole::Green => "green",
            BandRole::Red => "red",
            BandRole::Nir => "nir",
            BandRole::Swir1 => "swir1",
            BandRole::Swir2 => "swir2",
            BandRole::Thermal => "thermal",
        }
    }

    pub fn is_optical(&self) -> bool {
        !matches!(self, BandRole::Thermal)
    }
}

impl std::fmt::Display for BandRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BandRole {
    type Err = EcoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "blue" => Ok(BandRole::Blue),
            "green" => Ok(BandRole::Green),
            "red" => Ok(BandRole::Red),
            "nir" | "near-infrared" | "near_infrared" => Ok(BandRole::Nir),
            "swir1" | "swir-1" => Ok(BandRole::Swir1),
            "swir2" | "swir-2" => Ok(BandRole::Swir2),
            "thermal" | "tir" | "lwir" => Ok(BandRole::Thermal),
            other => Err(EcoError::invalid_parameter(
                "band_role",
                format!("unknown band role '{}'", other),
            )),
        }
    }
}

/// Where a band lives and how its invalid samples are marked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandInfo {
    pub role: BandRole,
    /// 1-based sample index within its file
    pub index: u16,
    /// Separate file holding this band; `None` means the image's own path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub no_data: Option<f64>,
}

impl BandInfo {
    pub fn new(role: BandRole, index: u16) -> Self {
        Self {
            role,
            index,
            file: None,
            no_data: None,
        }
    }

    pub fn with_no_data(mut self, no_data: f64) -> Self {
        self.no_data = Some(no_data);
        self
    }

    pub fn in_file(mut self, file: impl Into<PathBuf>) -> Self {
        self.file = Some(file.into());
        self
    }
}

/// Raw samples of one band over a processing window.
#[derive(Debug, Clone, PartialEq)]
pub struct BandData {
    pub role: BandRole,
    pub width: usize,
    pub height: usize,
    pub data: Vec<f32>,
    pub no_data: Option<f64>,
}

impl BandData {
    pub fn new(role: BandRole, width: usize, height: usize, data: Vec<f32>) -> Self {
        Self {
            role,
            width,
            height,
            data,
            no_data: None,
        }
    }

    pub fn with_no_data(mut self, no_data: Option<f64>) -> Self {
        self.no_data = no_data;
        self
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    /// A sample is usable when finite and not equal to the no-data sentinel.
    #[inline]
    pub fn is_valid(&self, idx: usize) -> bool {
        let v = self.data[idx];
        if !v.is_finite() {
            return false;
        }
        match self.no_data {
            Some(nd) => v != nd as f32,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_aliases() {
        assert_eq!("NIR".parse::<BandRole>().unwrap(), BandRole::Nir);
        assert_eq!("near-infrared".parse::<BandRole>().unwrap(), BandRole::Nir);
        assert_eq!("tir".parse::<BandRole>().unwrap(), BandRole::Thermal);
        assert!("uv".parse::<BandRole>().is_err());
    }

    #[test]
    fn test_band_validity() {
        let band = BandData::new(BandRole::Red, 4, 1, vec![0.1, -9999.0, f32::NAN, 0.0])
            .with_no_data(Some(-9999.0));
        assert!(band.is_valid(0));
        assert!(!band.is_valid(1));
        assert!(!band.is_valid(2));
        assert!(band.is_valid(3));
    }
}
