//! GeoTIFF metadata and windowed sample reads.
//!
//! Reads are chunk based: only the strips or tiles that intersect the
//! requested window are decoded, so a full scene never has to be held in
//! memory to compute an index. The last decoded chunk row is kept, so
//! reading a scene top to bottom in windows shorter than a strip or tile
//! decodes each chunk once.

use serde::{Deserialize, Serialize};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::io::{Read, Seek};
use std::path::Path;
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::tags::Tag;
use tiff::TiffError;
use tracing::debug;

use eco_common::{EcoError, EcoResult, GeoTransform, RasterWindow};

use crate::format::open_raster_file;

// GeoKey IDs
const GEOGRAPHIC_TYPE_GEO_KEY: u16 = 2048;
const PROJECTED_CS_TYPE_GEO_KEY: u16 = 3072;

/// Basic description of a GeoTIFF file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RasterMetadata {
    pub width: usize,
    pub height: usize,
    pub band_count: u16,
    /// e.g. `uint16`, `float32`
    pub sample_type: String,
    pub tiled: bool,
    pub geo_transform: Option<GeoTransform>,
    pub epsg: Option<u32>,
    pub no_data: Option<f64>,
}

impl RasterMetadata {
    pub fn crs(&self) -> Option<String> {
        self.epsg.map(|code| format!("EPSG:{}", code))
    }
}

/// Parse an `EPSG:xxxx` style CRS string.
pub fn epsg_code(crs: &str) -> Option<u32> {
    let upper = crs.trim().to_uppercase();
    upper.strip_prefix("EPSG:")?.parse().ok()
}

pub(crate) fn map_tiff_err(err: TiffError) -> EcoError {
    match err {
        TiffError::IoError(e) => EcoError::RasterRead(e.to_string()),
        other => EcoError::RasterDecode(other.to_string()),
    }
}

struct DecodedChunk {
    width: usize,
    height: usize,
    samples: Vec<f32>,
}

/// Decoded chunks of one chunk row, by chunk column.
struct ChunkRow {
    index: usize,
    chunks: BTreeMap<usize, DecodedChunk>,
}

impl ChunkRow {
    fn new(index: usize) -> Self {
        Self {
            index,
            chunks: BTreeMap::new(),
        }
    }
}

/// Windowed reader over a single GeoTIFF image directory.
pub struct GeoTiffReader<R: Read + Seek> {
    decoder: Decoder<R>,
    meta: RasterMetadata,
    chunk_width: usize,
    chunk_height: usize,
    chunks_across: usize,
    cached: ChunkRow,
    decoded: usize,
}

impl<R: Read + Seek> GeoTiffReader<R> {
    pub fn new(reader: R) -> EcoResult<Self> {
        let mut decoder = Decoder::new(reader)
            .map_err(map_tiff_err)?
            .with_limits(Limits::unlimited());

        let (width, height) = decoder.dimensions().map_err(map_tiff_err)?;
        let band_count = decoder
            .find_tag_unsigned::<u16>(Tag::SamplesPerPixel)
            .map_err(map_tiff_err)?
            .unwrap_or(1);

        let planar = decoder
            .find_tag_unsigned::<u16>(Tag::PlanarConfiguration)
            .map_err(map_tiff_err)?
            .unwrap_or(1);
        if planar != 1 && band_count > 1 {
            return Err(EcoError::UnsupportedFormat(
                "band-sequential (planar) GeoTIFF layout; store bands interleaved or one file per band"
                    .to_string(),
            ));
        }

        let sample_type = read_sample_type(&mut decoder)?;
        let geo_transform = read_geotransform(&mut decoder);
        let epsg = read_epsg(&mut decoder);
        let no_data = decoder
            .get_tag_ascii_string(Tag::GdalNodata)
            .ok()
            .and_then(|s| s.trim().trim_end_matches('\0').parse::<f64>().ok());
        let tiled = decoder
            .find_tag(Tag::TileWidth)
            .map_err(map_tiff_err)?
            .is_some();

        let (cw, ch) = decoder.chunk_dimensions();
        let chunk_width = cw as usize;
        let chunk_height = ch as usize;
        if chunk_width == 0 || chunk_height == 0 {
            return Err(EcoError::RasterDecode(
                "zero-sized strip or tile".to_string(),
            ));
        }
        let width = width as usize;
        let height = height as usize;

        Ok(Self {
            decoder,
            meta: RasterMetadata {
                width,
                height,
                band_count,
                sample_type,
                tiled,
                geo_transform,
                epsg,
                no_data,
            },
            chunk_width,
            chunk_height,
            chunks_across: width.div_ceil(chunk_width),
            cached: ChunkRow::new(usize::MAX),
            decoded: 0,
        })
    }

    pub fn metadata(&self) -> &RasterMetadata {
        &self.meta
    }

    /// Number of strips or tiles in the image.
    pub fn chunk_count(&self) -> usize {
        self.chunks_across * self.meta.height.div_ceil(self.chunk_height)
    }

    /// Chunks decoded so far by this reader.
    pub fn chunks_decoded(&self) -> usize {
        self.decoded
    }

    fn decoded_chunk(&mut self, chunk_row: usize, chunk_col: usize) -> EcoResult<&DecodedChunk> {
        if self.cached.index != chunk_row {
            self.cached = ChunkRow::new(chunk_row);
        }
        match self.cached.chunks.entry(chunk_col) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let chunk_index = (chunk_row * self.chunks_across + chunk_col) as u32;
                let (width, height) = self.decoder.chunk_data_dimensions(chunk_index);
                let samples = self
                    .decoder
                    .read_chunk(chunk_index)
                    .map_err(map_tiff_err)
                    .and_then(samples_to_f32)?;
                self.decoded += 1;
                Ok(entry.insert(DecodedChunk {
                    width: width as usize,
                    height: height as usize,
                    samples,
                }))
            }
        }
    }

    /// Read a single band (1-based sample index) over `window`.
    pub fn read_band(&mut self, sample: u16, window: RasterWindow) -> EcoResult<Vec<f32>> {
        let mut bands = self.read_samples(&[sample], window)?;
        Ok(bands.remove(0))
    }

    /// Read several bands over `window`, decoding each intersecting chunk at
    /// most once.
    pub fn read_samples(&mut self, samples: &[u16], window: RasterWindow) -> EcoResult<Vec<Vec<f32>>> {
        if !window.fits_within(self.meta.width, self.meta.height) {
            return Err(EcoError::invalid_parameter(
                "window",
                format!(
                    "{:?} exceeds raster {}x{}",
                    window, self.meta.width, self.meta.height
                ),
            ));
        }
        for &s in samples {
            if s == 0 || s > self.meta.band_count {
                return Err(EcoError::invalid_parameter(
                    "band_index",
                    format!("band {} not in 1..={}", s, self.meta.band_count),
                ));
            }
        }

        let mut out = vec![vec![0f32; window.len()]; samples.len()];
        if window.is_empty() {
            return Ok(out);
        }

        let spp = self.meta.band_count as usize;
        let (chunk_width, chunk_height) = (self.chunk_width, self.chunk_height);
        let first_chunk_row = window.row / self.chunk_height;
        let last_chunk_row = (window.row + window.height - 1) / self.chunk_height;
        let first_chunk_col = window.col / self.chunk_width;
        let last_chunk_col = (window.col + window.width - 1) / self.chunk_width;

        for chunk_row in first_chunk_row..=last_chunk_row {
            for chunk_col in first_chunk_col..=last_chunk_col {
                let x0 = chunk_col * chunk_width;
                let y0 = chunk_row * chunk_height;
                let chunk = self.decoded_chunk(chunk_row, chunk_col)?;
                let (data_w, data_h) = (chunk.width, chunk.height);
                let ys = window.row.max(y0)..(window.row + window.height).min(y0 + data_h);
                let xs = window.col.max(x0)..(window.col + window.width).min(x0 + data_w);

                for y in ys {
                    for x in xs.clone() {
                        let src = ((y - y0) * data_w + (x - x0)) * spp;
                        let dst = (y - window.row) * window.width + (x - window.col);
                        for (band, &s) in out.iter_mut().zip(samples) {
                            band[dst] = chunk.samples[src + s as usize - 1];
                        }
                    }
                }
            }
        }

        debug!(
            col = window.col,
            row = window.row,
            width = window.width,
            height = window.height,
            bands = samples.len(),
            "Read raster window"
        );
        Ok(out)
    }
}

fn samples_to_f32(result: DecodingResult) -> EcoResult<Vec<f32>> {
    #[allow(unreachable_patterns)]
    let data = match result {
        DecodingResult::U8(buf) => buf.into_iter().map(f32::from).collect(),
        DecodingResult::U16(buf) => buf.into_iter().map(f32::from).collect(),
        DecodingResult::U32(buf) => buf.into_iter().map(|v| v as f32).collect(),
        DecodingResult::U64(buf) => buf.into_iter().map(|v| v as f32).collect(),
        DecodingResult::I8(buf) => buf.into_iter().map(f32::from).collect(),
        DecodingResult::I16(buf) => buf.into_iter().map(f32::from).collect(),
        DecodingResult::I32(buf) => buf.into_iter().map(|v| v as f32).collect(),
        DecodingResult::I64(buf) => buf.into_iter().map(|v| v as f32).collect(),
        DecodingResult::F32(buf) => buf,
        DecodingResult::F64(buf) => buf.into_iter().map(|v| v as f32).collect(),
        _ => {
            return Err(EcoError::UnsupportedFormat(
                "unsupported TIFF sample type".to_string(),
            ))
        }
    };
    Ok(data)
}

fn read_sample_type<R: Read + Seek>(decoder: &mut Decoder<R>) -> EcoResult<String> {
    let bits = decoder
        .get_tag_u16_vec(Tag::BitsPerSample)
        .ok()
        .and_then(|v| v.first().copied())
        .unwrap_or(8);
    let format = decoder
        .get_tag_u16_vec(Tag::SampleFormat)
        .ok()
        .and_then(|v| v.first().copied())
        .unwrap_or(1);
    let prefix = match format {
        1 => "uint",
        2 => "int",
        3 => "float",
        other => {
            return Err(EcoError::UnsupportedFormat(format!(
                "TIFF sample format {}",
                other
            )))
        }
    };
    Ok(format!("{}{}", prefix, bits))
}

/// ModelPixelScale + ModelTiepoint to a north-up geotransform.
fn read_geotransform<R: Read + Seek>(decoder: &mut Decoder<R>) -> Option<GeoTransform> {
    let scale = decoder.get_tag_f64_vec(Tag::ModelPixelScaleTag).ok()?;
    let tiepoint = decoder.get_tag_f64_vec(Tag::ModelTiepointTag).ok()?;
    if scale.len() < 2 || tiepoint.len() < 6 {
        return None;
    }
    // tiepoint: [I, J, K, X, Y, Z]
    let origin_x = tiepoint[3] - tiepoint[0] * scale[0];
    let origin_y = tiepoint[4] + tiepoint[1] * scale[1];
    Some(GeoTransform::new(origin_x, origin_y, scale[0], -scale[1]))
}

fn read_epsg<R: Read + Seek>(decoder: &mut Decoder<R>) -> Option<u32> {
    let keys = decoder.get_tag_u16_vec(Tag::GeoKeyDirectoryTag).ok()?;
    // [version, revision, minor, count, (id, location, count, value)*]
    let entries = keys.get(4..)?;
    let mut projected = None;
    let mut geographic = None;
    for entry in entries.chunks_exact(4) {
        if entry[1] != 0 {
            continue;
        }
        match entry[0] {
            PROJECTED_CS_TYPE_GEO_KEY => projected = Some(entry[3] as u32),
            GEOGRAPHIC_TYPE_GEO_KEY => geographic = Some(entry[3] as u32),
            _ => {}
        }
    }
    projected.or(geographic).filter(|code| *code != 32767)
}

/// Describe a raster file without reading its pixels.
pub fn inspect(path: &Path) -> EcoResult<RasterMetadata> {
    let file = open_raster_file(path)?;
    let reader = GeoTiffReader::new(file)?;
    Ok(reader.metadata().clone())
}
