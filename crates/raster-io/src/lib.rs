//! Raster access for the ecological index engine.
//!
//! - Format detection and gzip archives (`format`)
//! - GeoTIFF metadata and windowed band reads (`geotiff`)
//! - Image-level sources over one or more files (`source`)
//! - GeoTIFF encoding of index grids (`writer`)

pub mod format;
pub mod geotiff;
pub mod source;
pub mod writer;

pub use format::{decompress_gzip, detect_format, open_raster_file, RasterFile, RasterFormat};
pub use geotiff::{epsg_code, inspect, GeoTiffReader, RasterMetadata};
pub use source::{
    describe_image, FileOpener, ImageRaster, MemoryOpener, MemoryRaster, RasterOpener,
    RasterSource,
};
pub use writer::{decode_index_geotiff, encode_index_geotiff, write_bands_geotiff, GeoReference};
