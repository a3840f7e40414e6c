//! Raster image descriptors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::str::FromStr;
use uuid::Uuid;

use crate::{BandInfo, BandRole, EcoError, EcoResult, GeoTransform};

/// Source sensor of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Sensor {
    #[default]
    Landsat8,
    Landsat9,
    Sentinel2,
    Custom,
}

impl Sensor {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sensor::Landsat8 => "landsat8",
            Sensor::Landsat9 => "landsat9",
            Sensor::Sentinel2 => "sentinel2",
            Sensor::Custom => "custom",
        }
    }

    /// Nominal ground sample distance in meters.
    pub fn nominal_resolution_m(&self) -> f64 {
        match self {
            Sensor::Landsat8 | Sensor::Landsat9 | Sensor::Custom => 30.0,
            Sensor::Sentinel2 => 10.0,
        }
    }

    /// Default band layout of a stacked product (1-based sample indices).
    pub fn default_bands(&self) -> Vec<BandInfo> {
        let order: &[(BandRole, u16)] = match self {
            // B2..B7 then B10
            Sensor::Landsat8 | Sensor::Landsat9 | Sensor::Custom => &[
                (BandRole::Blue, 1),
                (BandRole::Green, 2),
                (BandRole::Red, 3),
                (BandRole::Nir, 4),
                (BandRole::Swir1, 5),
                (BandRole::Swir2, 6),
                (BandRole::Thermal, 7),
            ],
            // B2, B3, B4, B8, B11, B12; no thermal channel
            Sensor::Sentinel2 => &[
                (BandRole::Blue, 1),
                (BandRole::Green, 2),
                (BandRole::Red, 3),
                (BandRole::Nir, 4),
                (BandRole::Swir1, 5),
                (BandRole::Swir2, 6),
            ],
        };
        order.iter().map(|(r, i)| BandInfo::new(*r, *i)).collect()
    }
}

impl FromStr for Sensor {
    type Err = EcoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace(['-', '_', ' '], "").as_str() {
            "landsat8" | "l8" => Ok(Sensor::Landsat8),
            "landsat9" | "l9" => Ok(Sensor::Landsat9),
            "sentinel2" | "s2" => Ok(Sensor::Sentinel2),
            "custom" => Ok(Sensor::Custom),
            other => Err(EcoError::invalid_parameter(
                "sensor",
                format!("unknown sensor '{}'", other),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

/// A multispectral image as ingested. Immutable once registered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RasterImage {
    pub id: Uuid,
    pub name: String,
    pub path: PathBuf,
    pub bands: Vec<BandInfo>,
    pub width: usize,
    pub height: usize,
    #[serde(default)]
    pub sensor: Sensor,
    #[serde(default)]
    pub acquired_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub center: Option<GeoPoint>,
    /// Spatial reference, e.g. `EPSG:32650`
    #[serde(default)]
    pub crs: Option<String>,
    #[serde(default)]
    pub geo_transform: Option<GeoTransform>,
}

impl RasterImage {
    pub fn new(path: impl Into<PathBuf>, width: usize, height: usize, bands: Vec<BandInfo>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            id: Uuid::new_v4(),
            name,
            path,
            bands,
            width,
            height,
            sensor: Sensor::default(),
            acquired_at: None,
            center: None,
            crs: None,
            geo_transform: None,
        }
    }

    pub fn band(&self, role: BandRole) -> Option<&BandInfo> {
        self.bands.iter().find(|b| b.role == role)
    }

    pub fn has_role(&self, role: BandRole) -> bool {
        self.band(role).is_some()
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    /// Each role may be assigned to at most one band.
    pub fn validate_roles(&self) -> EcoResult<()> {
        let mut seen = HashSet::new();
        for band in &self.bands {
            if !seen.insert(band.role) {
                return Err(EcoError::DuplicateBand(band.role.to_string()));
            }
            if band.index == 0 {
                return Err(EcoError::invalid_parameter(
                    "band_index",
                    format!("band '{}' uses index 0; indices are 1-based", band.role),
                ));
            }
        }
        Ok(())
    }

    /// Fail with the first role in `roles` this image does not carry.
    pub fn require_roles(&self, roles: &[BandRole]) -> EcoResult<()> {
        match roles.iter().find(|r| !self.has_role(**r)) {
            Some(missing) => Err(EcoError::MissingBand(missing.to_string())),
            None => Ok(()),
        }
    }

    /// Ground area of one pixel in square kilometres.
    ///
    /// Uses the geotransform when it is projected (metric), otherwise
    /// `fallback_pixel_m` as the pixel edge length.
    pub fn pixel_area_km2(&self, fallback_pixel_m: f64) -> f64 {
        let geographic = self
            .crs
            .as_deref()
            .map(|c| matches!(c.to_uppercase().as_str(), "EPSG:4326" | "EPSG:4269" | "EPSG:4258"))
            .unwrap_or(false);
        match self.geo_transform {
            Some(gt) if !geographic && gt.pixel_width.abs() >= 0.01 => {
                (gt.pixel_width * gt.pixel_height).abs() / 1.0e6
            }
            _ => fallback_pixel_m * fallback_pixel_m / 1.0e6,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image() -> RasterImage {
        RasterImage::new("/data/scene.tif", 10, 10, Sensor::Landsat8.default_bands())
    }

    #[test]
    fn test_name_from_path() {
        assert_eq!(image().name, "scene.tif");
    }

    #[test]
    fn test_duplicate_roles_rejected() {
        let mut img = image();
        img.bands.push(BandInfo::new(BandRole::Red, 8));
        assert_eq!(
            img.validate_roles().unwrap_err(),
            EcoError::DuplicateBand("red".into())
        );
    }

    #[test]
    fn test_missing_thermal() {
        let img = RasterImage::new("s2.tif", 4, 4, Sensor::Sentinel2.default_bands());
        assert_eq!(
            img.require_roles(&[BandRole::Nir, BandRole::Thermal]).unwrap_err(),
            EcoError::MissingBand("thermal".into())
        );
    }

    #[test]
    fn test_pixel_area() {
        let mut img = image();
        assert!((img.pixel_area_km2(30.0) - 0.0009).abs() < 1e-12);
        img.geo_transform = Some(GeoTransform::new(500000.0, 4000000.0, 10.0, -10.0));
        assert!((img.pixel_area_km2(30.0) - 0.0001).abs() < 1e-12);
        img.crs = Some("EPSG:4326".into());
        assert!((img.pixel_area_km2(30.0) - 0.0009).abs() < 1e-12);
    }

    #[test]
    fn test_sensor_parse() {
        assert_eq!("Landsat-9".parse::<Sensor>().unwrap(), Sensor::Landsat9);
        assert_eq!("S2".parse::<Sensor>().unwrap(), Sensor::Sentinel2);
        assert!("modis".parse::<Sensor>().is_err());
    }
}
