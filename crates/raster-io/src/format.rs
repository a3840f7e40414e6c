//! Raster file format detection and archive handling.

use bytes::Bytes;
use std::fs::File;
use std::io::{BufReader, Cursor, Read, Seek, SeekFrom};
use std::path::Path;

use eco_common::{EcoError, EcoResult};

/// Supported raster container formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RasterFormat {
    /// Plain GeoTIFF (`.tif`, `.tiff`)
    GeoTiff,
    /// Gzip-compressed GeoTIFF (`.tif.gz`, `.tiff.gz`)
    GeoTiffGz,
}

/// Detect the raster format from a path's extension.
pub fn detect_format(path: &Path) -> EcoResult<RasterFormat> {
    let lower = path.to_string_lossy().to_lowercase();

    if lower.ends_with(".tif.gz") || lower.ends_with(".tiff.gz") {
        Ok(RasterFormat::GeoTiffGz)
    } else if lower.ends_with(".tif") || lower.ends_with(".tiff") {
        Ok(RasterFormat::GeoTiff)
    } else {
        Err(EcoError::UnsupportedFormat(format!(
            "{} (expected .tif, .tiff, .tif.gz or .tiff.gz)",
            path.display()
        )))
    }
}

/// Decompress gzip data.
pub fn decompress_gzip(data: &[u8]) -> EcoResult<Bytes> {
    let mut decoder = flate2::read::GzDecoder::new(data);
    let mut decompressed = Vec::new();
    decoder
        .read_to_end(&mut decompressed)
        .map_err(|e| EcoError::Decompression(e.to_string()))?;
    Ok(Bytes::from(decompressed))
}

/// Seekable handle over a raster file, decompressed in memory when archived.
pub enum RasterFile {
    Disk(BufReader<File>),
    Memory(Cursor<Bytes>),
}

impl Read for RasterFile {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            RasterFile::Disk(r) => r.read(buf),
            RasterFile::Memory(r) => r.read(buf),
        }
    }
}

impl Seek for RasterFile {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        match self {
            RasterFile::Disk(r) => r.seek(pos),
            RasterFile::Memory(r) => r.seek(pos),
        }
    }
}

/// Open a raster file for decoding.
pub fn open_raster_file(path: &Path) -> EcoResult<RasterFile> {
    let format = detect_format(path)?;
    let file = File::open(path)
        .map_err(|e| EcoError::RasterRead(format!("{}: {}", path.display(), e)))?;

    match format {
        RasterFormat::GeoTiff => Ok(RasterFile::Disk(BufReader::new(file))),
        RasterFormat::GeoTiffGz => {
            let mut compressed = Vec::new();
            BufReader::new(file)
                .read_to_end(&mut compressed)
                .map_err(|e| EcoError::RasterRead(format!("{}: {}", path.display(), e)))?;
            let data = decompress_gzip(&compressed)?;
            tracing::debug!(
                path = %path.display(),
                compressed = compressed.len(),
                decompressed = data.len(),
                "Decompressed raster archive"
            );
            Ok(RasterFile::Memory(Cursor::new(data)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    #[test]
    fn test_detect_format() {
        assert_eq!(
            detect_format(Path::new("LC08_stack.TIF")).unwrap(),
            RasterFormat::GeoTiff
        );
        assert_eq!(
            detect_format(Path::new("/data/scene.tiff.gz")).unwrap(),
            RasterFormat::GeoTiffGz
        );
        assert!(matches!(
            detect_format(Path::new("scene.zip")),
            Err(EcoError::UnsupportedFormat(_))
        ));
        assert!(detect_format(Path::new("scene.img")).is_err());
    }

    #[test]
    fn test_decompress_gzip_valid() {
        let original = b"II*\0 raster bytes";
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(original).unwrap();
        let compressed = encoder.finish().unwrap();

        let result = decompress_gzip(&compressed).unwrap();
        assert_eq!(result.as_ref(), original);
    }

    #[test]
    fn test_decompress_gzip_invalid() {
        let err = decompress_gzip(b"not gzip at all").unwrap_err();
        assert!(matches!(err, EcoError::Decompression(_)));
    }

    #[test]
    fn test_open_missing_file_is_read_error() {
        let err = open_raster_file(Path::new("/nonexistent/scene.tif"))
            .err()
            .unwrap();
        assert!(matches!(err, EcoError::RasterRead(_)));
        assert!(err.is_transient());
    }
}
