//! GeoTIFF encoding of index grids and band stacks.

use std::fs::File;
use std::io::{BufWriter, Cursor, Seek, Write};
use std::path::Path;

use tiff::encoder::colortype::{Gray32Float, RGB32Float, RGBA32Float};
use tiff::encoder::{DirectoryEncoder, TiffEncoder, TiffKind};
use tiff::tags::Tag;

use eco_common::{EcoError, EcoResult, GeoTransform, IndexGrid, RasterWindow, NODATA};

use crate::geotiff::{map_tiff_err, GeoTiffReader};

// GeoKey IDs
const GT_MODEL_TYPE_GEO_KEY: u16 = 1024;
const GT_RASTER_TYPE_GEO_KEY: u16 = 1025;
const GEOGRAPHIC_TYPE_GEO_KEY: u16 = 2048;
const PROJECTED_CS_TYPE_GEO_KEY: u16 = 3072;

// GeoKey values
const MODEL_TYPE_PROJECTED: u16 = 1;
const MODEL_TYPE_GEOGRAPHIC: u16 = 2;
const RASTER_PIXEL_IS_AREA: u16 = 1;

/// Georeferencing written alongside raster data.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoReference {
    pub transform: GeoTransform,
    pub epsg: Option<u32>,
}

impl GeoReference {
    fn is_geographic(&self) -> bool {
        matches!(self.epsg, Some(code) if (4000..5000).contains(&code))
    }
}

fn write_geo_tags<W: Write + Seek, K: TiffKind>(
    dir: &mut DirectoryEncoder<W, K>,
    geo: &GeoReference,
) -> EcoResult<()> {
    let gt = geo.transform;

    // ModelPixelScale: [ScaleX, ScaleY, ScaleZ]
    let pixel_scale = [gt.pixel_width, gt.pixel_height.abs(), 0.0];
    dir.write_tag(Tag::ModelPixelScaleTag, &pixel_scale[..])
        .map_err(map_tiff_err)?;

    // ModelTiepoint: pixel (0, 0) -> (origin_x, origin_y)
    let tiepoint = [0.0, 0.0, 0.0, gt.origin_x, gt.origin_y, 0.0];
    dir.write_tag(Tag::ModelTiepointTag, &tiepoint[..])
        .map_err(map_tiff_err)?;

    if let Some(code) = geo.epsg {
        let (model, cs_key) = if geo.is_geographic() {
            (MODEL_TYPE_GEOGRAPHIC, GEOGRAPHIC_TYPE_GEO_KEY)
        } else {
            (MODEL_TYPE_PROJECTED, PROJECTED_CS_TYPE_GEO_KEY)
        };
        let keys: [u16; 16] = [
            1, 1, 0, 3,
            GT_MODEL_TYPE_GEO_KEY, 0, 1, model,
            GT_RASTER_TYPE_GEO_KEY, 0, 1, RASTER_PIXEL_IS_AREA,
            cs_key, 0, 1, code as u16,
        ];
        dir.write_tag(Tag::GeoKeyDirectoryTag, &keys[..])
            .map_err(map_tiff_err)?;
    }
    Ok(())
}

fn encode_gray<W: Write + Seek>(
    writer: W,
    width: usize,
    height: usize,
    data: &[f32],
    geo: Option<&GeoReference>,
    nodata: Option<f32>,
) -> EcoResult<()> {
    let mut encoder = TiffEncoder::new(writer).map_err(map_tiff_err)?;
    let mut image = encoder
        .new_image::<Gray32Float>(width as u32, height as u32)
        .map_err(map_tiff_err)?;
    if let Some(geo) = geo {
        write_geo_tags(image.encoder(), geo)?;
    }
    if let Some(nd) = nodata {
        image
            .encoder()
            .write_tag(Tag::GdalNodata, nd.to_string().as_str())
            .map_err(map_tiff_err)?;
    }
    image.write_data(data).map_err(map_tiff_err)
}

/// Encode an index grid as a single-band Float32 GeoTIFF.
///
/// No-data pixels hold [`NODATA`], declared through the GDAL_NODATA tag.
pub fn encode_index_geotiff(grid: &IndexGrid, geo: Option<&GeoReference>) -> EcoResult<Vec<u8>> {
    if grid.is_empty() {
        return Err(EcoError::invalid_parameter("grid", "grid has no pixels"));
    }
    let mut buf = Vec::new();
    encode_gray(
        Cursor::new(&mut buf),
        grid.width,
        grid.height,
        grid.values(),
        geo,
        Some(NODATA),
    )?;
    Ok(buf)
}

/// Decode a GeoTIFF produced by [`encode_index_geotiff`].
pub fn decode_index_geotiff(bytes: &[u8]) -> EcoResult<IndexGrid> {
    let mut reader = GeoTiffReader::new(Cursor::new(bytes))?;
    let meta = reader.metadata().clone();
    let values = reader.read_band(1, RasterWindow::full(meta.width, meta.height))?;
    let nodata = meta.no_data.map(|v| v as f32).unwrap_or(NODATA);
    IndexGrid::from_values(meta.width, meta.height, values, nodata)
}

/// Write a band stack as an interleaved Float32 GeoTIFF.
///
/// Supports 1, 3 or 4 bands; larger stacks are stored one file per band.
pub fn write_bands_geotiff(
    path: &Path,
    width: usize,
    height: usize,
    bands: &[Vec<f32>],
    geo: Option<&GeoReference>,
    nodata: Option<f32>,
) -> EcoResult<()> {
    if let Some(bad) = bands.iter().find(|b| b.len() != width * height) {
        return Err(EcoError::invalid_parameter(
            "bands",
            format!("band has {} samples, expected {}", bad.len(), width * height),
        ));
    }

    let file = File::create(path)
        .map_err(|e| EcoError::StorageError(format!("{}: {}", path.display(), e)))?;
    let writer = BufWriter::new(file);

    let interleaved: Vec<f32> = (0..width * height)
        .flat_map(|i| bands.iter().map(move |b| b[i]))
        .collect();

    match bands.len() {
        1 => encode_gray(writer, width, height, &bands[0], geo, nodata),
        3 => {
            let mut encoder = TiffEncoder::new(writer).map_err(map_tiff_err)?;
            let mut image = encoder
                .new_image::<RGB32Float>(width as u32, height as u32)
                .map_err(map_tiff_err)?;
            finish_multiband(image.encoder(), geo, nodata)?;
            image.write_data(&interleaved).map_err(map_tiff_err)
        }
        4 => {
            let mut encoder = TiffEncoder::new(writer).map_err(map_tiff_err)?;
            let mut image = encoder
                .new_image::<RGBA32Float>(width as u32, height as u32)
                .map_err(map_tiff_err)?;
            finish_multiband(image.encoder(), geo, nodata)?;
            image.write_data(&interleaved).map_err(map_tiff_err)
        }
        n => Err(EcoError::invalid_parameter(
            "bands",
            format!("cannot interleave {} bands; use 1, 3 or 4", n),
        )),
    }
}

fn finish_multiband<W: Write + Seek, K: TiffKind>(
    dir: &mut DirectoryEncoder<W, K>,
    geo: Option<&GeoReference>,
    nodata: Option<f32>,
) -> EcoResult<()> {
    if let Some(geo) = geo {
        write_geo_tags(dir, geo)?;
    }
    if let Some(nd) = nodata {
        dir.write_tag(Tag::GdalNodata, nd.to_string().as_str())
            .map_err(map_tiff_err)?;
    }
    Ok(())
}
