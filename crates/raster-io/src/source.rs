//! Image-level raster sources.
//!
//! A [`RasterImage`] may keep all bands in one interleaved file or spread
//! them over several single-band files; [`ImageRaster`] hides the difference.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use eco_common::{
    BandData, BandInfo, BandRole, EcoError, EcoResult, RasterImage, RasterWindow, Sensor,
};
use tracing::debug;

use crate::format::{detect_format, open_raster_file, RasterFile};
use crate::geotiff::{GeoTiffReader, RasterMetadata};

/// Windowed band access for one image.
pub trait RasterSource: Send {
    fn shape(&self) -> (usize, usize);

    /// Read the given bands over `window`, in the order requested.
    fn read_bands(&mut self, bands: &[BandInfo], window: RasterWindow) -> EcoResult<Vec<BandData>>;
}

/// Opens raster sources for images.
pub trait RasterOpener: Send + Sync {
    /// Cheap validation that `image` can be opened, without reading it.
    fn check(&self, image: &RasterImage) -> EcoResult<()>;

    fn open(&self, image: &RasterImage) -> EcoResult<Box<dyn RasterSource>>;
}

/// GeoTIFF-backed source over every file an image references.
pub struct ImageRaster {
    primary: PathBuf,
    readers: HashMap<PathBuf, GeoTiffReader<RasterFile>>,
    width: usize,
    height: usize,
}

impl ImageRaster {
    pub fn open(image: &RasterImage) -> EcoResult<Self> {
        let mut files: Vec<PathBuf> = image
            .bands
            .iter()
            .map(|b| b.file.clone().unwrap_or_else(|| image.path.clone()))
            .collect();
        if files.is_empty() {
            files.push(image.path.clone());
        }
        files.sort();
        files.dedup();

        let mut readers = HashMap::with_capacity(files.len());
        let mut shape = None;
        for path in files {
            let reader = GeoTiffReader::new(open_raster_file(&path)?)?;
            let meta = reader.metadata();
            let this = (meta.width, meta.height);
            match shape {
                None => shape = Some(this),
                Some(expected) if expected != this => {
                    return Err(EcoError::shape_mismatch(expected, this));
                }
                Some(_) => {}
            }
            readers.insert(path, reader);
        }

        let (width, height) = shape.unwrap_or((0, 0));
        if (width, height) != image.shape() {
            return Err(EcoError::shape_mismatch(image.shape(), (width, height)));
        }

        debug!(image_id = %image.id, files = readers.len(), width, height, "Opened raster image");
        Ok(Self {
            primary: image.path.clone(),
            readers,
            width,
            height,
        })
    }

    pub fn metadata(&self, path: &Path) -> Option<&RasterMetadata> {
        self.readers.get(path).map(|r| r.metadata())
    }
}

impl RasterSource for ImageRaster {
    fn shape(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    fn read_bands(&mut self, bands: &[BandInfo], window: RasterWindow) -> EcoResult<Vec<BandData>> {
        // Group by file so each chunk is decoded once per window.
        let mut by_file: BTreeMap<PathBuf, Vec<usize>> = BTreeMap::new();
        for (pos, band) in bands.iter().enumerate() {
            let path = band.file.clone().unwrap_or_else(|| self.primary.clone());
            by_file.entry(path).or_default().push(pos);
        }

        let mut out: Vec<Option<BandData>> = vec![None; bands.len()];
        for (path, positions) in by_file {
            let reader = self.readers.get_mut(&path).ok_or_else(|| {
                EcoError::RasterRead(format!("{} was not opened for this image", path.display()))
            })?;
            let file_nodata = reader.metadata().no_data;
            let samples: Vec<u16> = positions.iter().map(|&p| bands[p].index).collect();
            let data = reader.read_samples(&samples, window)?;
            for (pos, values) in positions.into_iter().zip(data) {
                let info = &bands[pos];
                out[pos] = Some(
                    BandData::new(info.role, window.width, window.height, values)
                        .with_no_data(info.no_data.or(file_nodata)),
                );
            }
        }

        out.into_iter()
            .map(|b| b.ok_or_else(|| EcoError::InternalError("band read skipped".to_string())))
            .collect()
    }
}

/// Opens images from the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileOpener;

impl RasterOpener for FileOpener {
    fn check(&self, image: &RasterImage) -> EcoResult<()> {
        detect_format(&image.path)?;
        for band in &image.bands {
            if let Some(file) = &band.file {
                detect_format(file)?;
            }
        }
        Ok(())
    }

    fn open(&self, image: &RasterImage) -> EcoResult<Box<dyn RasterSource>> {
        Ok(Box::new(ImageRaster::open(image)?))
    }
}

/// In-memory band stack keyed by role.
#[derive(Debug, Clone)]
pub struct MemoryRaster {
    pub width: usize,
    pub height: usize,
    bands: HashMap<BandRole, Vec<f32>>,
    no_data: Option<f64>,
}

impl MemoryRaster {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            bands: HashMap::new(),
            no_data: None,
        }
    }

    pub fn with_band(mut self, role: BandRole, data: Vec<f32>) -> Self {
        self.bands.insert(role, data);
        self
    }

    pub fn with_no_data(mut self, no_data: f64) -> Self {
        self.no_data = Some(no_data);
        self
    }

    /// Describe this stack as an image with one band per role.
    pub fn to_image(&self, name: &str) -> RasterImage {
        let mut roles: Vec<BandRole> = self.bands.keys().copied().collect();
        roles.sort();
        let bands = roles
            .into_iter()
            .enumerate()
            .map(|(i, role)| {
                let info = BandInfo::new(role, i as u16 + 1);
                match self.no_data {
                    Some(nd) => info.with_no_data(nd),
                    None => info,
                }
            })
            .collect();
        let mut image = RasterImage::new(name, self.width, self.height, bands);
        image.sensor = Sensor::Custom;
        image
    }
}

impl RasterSource for MemoryRaster {
    fn shape(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    fn read_bands(&mut self, bands: &[BandInfo], window: RasterWindow) -> EcoResult<Vec<BandData>> {
        if !window.fits_within(self.width, self.height) {
            return Err(EcoError::invalid_parameter("window", format!("{:?}", window)));
        }
        bands
            .iter()
            .map(|info| {
                let full = self
                    .bands
                    .get(&info.role)
                    .ok_or_else(|| EcoError::MissingBand(info.role.to_string()))?;
                let mut data = Vec::with_capacity(window.len());
                for r in window.row..window.row + window.height {
                    let start = r * self.width + window.col;
                    data.extend_from_slice(&full[start..start + window.width]);
                }
                Ok(BandData::new(info.role, window.width, window.height, data)
                    .with_no_data(info.no_data.or(self.no_data)))
            })
            .collect()
    }
}

/// Serves registered in-memory images by id.
#[derive(Debug, Clone, Default)]
pub struct MemoryOpener {
    rasters: HashMap<Uuid, MemoryRaster>,
}

impl MemoryOpener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, image_id: Uuid, raster: MemoryRaster) {
        self.rasters.insert(image_id, raster);
    }
}

impl RasterOpener for MemoryOpener {
    fn check(&self, image: &RasterImage) -> EcoResult<()> {
        if self.rasters.contains_key(&image.id) {
            Ok(())
        } else {
            Err(EcoError::UnsupportedFormat(format!(
                "{} is not a registered in-memory raster",
                image.name
            )))
        }
    }

    fn open(&self, image: &RasterImage) -> EcoResult<Box<dyn RasterSource>> {
        let raster = self
            .rasters
            .get(&image.id)
            .cloned()
            .ok_or_else(|| EcoError::RasterRead(format!("no raster registered for {}", image.id)))?;
        Ok(Box::new(raster))
    }
}

/// Build an image descriptor from a raster file's own metadata.
///
/// `bands` maps roles to sample indices; when empty the sensor's default
/// stacked layout is used, truncated to the bands the file carries.
pub fn describe_image(path: &Path, bands: Vec<BandInfo>, sensor: Sensor) -> EcoResult<RasterImage> {
    let meta = crate::geotiff::inspect(path)?;
    let bands = if bands.is_empty() {
        sensor
            .default_bands()
            .into_iter()
            .filter(|b| b.index <= meta.band_count)
            .collect()
    } else {
        bands
    };

    let mut image = RasterImage::new(path, meta.width, meta.height, bands);
    image.sensor = sensor;
    image.crs = meta.crs();
    image.geo_transform = meta.geo_transform;
    let geographic = matches!(meta.epsg, Some(code) if (4000..5000).contains(&code));
    if let (Some(gt), true) = (meta.geo_transform, geographic) {
        let (lon, lat) = gt.pixel_center(meta.width / 2, meta.height / 2);
        image.center = Some(eco_common::GeoPoint { lat, lon });
    }
    Ok(image)
}
