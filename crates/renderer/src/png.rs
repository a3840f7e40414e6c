//! In-crate PNG encoding of RGBA previews.
//!
//! Index previews use a handful of ramp colors plus transparent no-data, so
//! most of them fit a palette: [`encode_png`] writes an indexed PNG (color
//! type 3) when at most 256 distinct colors occur and falls back to RGBA
//! (color type 6) otherwise.

use std::collections::HashMap;
use std::io::Write;

use rayon::prelude::*;

const SIGNATURE: [u8; 8] = [137, 80, 78, 71, 13, 10, 26, 10];

/// Maximum colors for indexed PNG (PNG8)
const MAX_PALETTE_SIZE: usize = 256;

/// Images at least this large extract their palette in parallel
const PARALLEL_THRESHOLD: usize = 4096;

const COLOR_TYPE_INDEXED: u8 = 3;
const COLOR_TYPE_RGBA: u8 = 6;

type Rgba = [u8; 4];

/// Encode RGBA pixels, choosing indexed or truecolor output.
pub fn encode_png(pixels: &[u8], width: usize, height: usize) -> Result<Vec<u8>, String> {
    check_len(pixels.len(), width * height * 4)?;
    let palette = if width * height >= PARALLEL_THRESHOLD {
        extract_palette_parallel(pixels)
    } else {
        extract_palette(pixels)
    };
    match palette {
        Some((palette, indices)) => encode_indexed(&palette, &indices, width, height),
        None => encode_rgba(pixels, width, height),
    }
}

/// Encode RGBA pixels as truecolor with alpha.
pub fn encode_rgba(pixels: &[u8], width: usize, height: usize) -> Result<Vec<u8>, String> {
    check_len(pixels.len(), width * height * 4)?;
    let mut png = start_png(width, height, COLOR_TYPE_RGBA);
    write_chunk(&mut png, b"IDAT", &deflate_scanlines(pixels, width * 4, height)?);
    write_chunk(&mut png, b"IEND", &[]);
    Ok(png)
}

/// Encode palette indices with their palette.
pub fn encode_indexed(
    palette: &[Rgba],
    indices: &[u8],
    width: usize,
    height: usize,
) -> Result<Vec<u8>, String> {
    check_len(indices.len(), width * height)?;
    if palette.is_empty() || palette.len() > MAX_PALETTE_SIZE {
        return Err(format!("palette of {} colors", palette.len()));
    }

    let mut png = start_png(width, height, COLOR_TYPE_INDEXED);
    let plte: Vec<u8> = palette.iter().flat_map(|c| [c[0], c[1], c[2]]).collect();
    write_chunk(&mut png, b"PLTE", &plte);
    if palette.iter().any(|c| c[3] < 255) {
        let trns: Vec<u8> = palette.iter().map(|c| c[3]).collect();
        write_chunk(&mut png, b"tRNS", &trns);
    }
    write_chunk(&mut png, b"IDAT", &deflate_scanlines(indices, width, height)?);
    write_chunk(&mut png, b"IEND", &[]);
    Ok(png)
}

fn check_len(actual: usize, expected: usize) -> Result<(), String> {
    if actual != expected {
        return Err(format!("expected {} bytes of pixel data, got {}", expected, actual));
    }
    Ok(())
}

fn start_png(width: usize, height: usize, color_type: u8) -> Vec<u8> {
    let mut png = Vec::with_capacity(64);
    png.extend_from_slice(&SIGNATURE);

    let mut ihdr = Vec::with_capacity(13);
    ihdr.extend_from_slice(&(width as u32).to_be_bytes());
    ihdr.extend_from_slice(&(height as u32).to_be_bytes());
    // bit depth, color type, compression, filter, interlace
    ihdr.extend_from_slice(&[8, color_type, 0, 0, 0]);
    write_chunk(&mut png, b"IHDR", &ihdr);
    png
}

fn write_chunk(png: &mut Vec<u8>, chunk_type: &[u8; 4], data: &[u8]) {
    png.extend_from_slice(&(data.len() as u32).to_be_bytes());
    png.extend_from_slice(chunk_type);
    png.extend_from_slice(data);

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(chunk_type);
    hasher.update(data);
    png.extend_from_slice(&hasher.finalize().to_be_bytes());
}

/// Prefix each scanline with filter type 0 and zlib-compress.
fn deflate_scanlines(data: &[u8], row_bytes: usize, height: usize) -> Result<Vec<u8>, String> {
    let mut raw = Vec::with_capacity(height * (row_bytes + 1));
    for row in data.chunks_exact(row_bytes.max(1)).take(height) {
        raw.push(0);
        raw.extend_from_slice(row);
    }

    let mut encoder = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::fast());
    encoder
        .write_all(&raw)
        .and_then(|_| encoder.finish())
        .map_err(|e| format!("IDAT compression failed: {}", e))
}

#[inline]
fn pixel_at(pixels: &[u8], i: usize) -> Rgba {
    [pixels[i * 4], pixels[i * 4 + 1], pixels[i * 4 + 2], pixels[i * 4 + 3]]
}

/// Palette in first-seen order plus one index per pixel, or `None` past 256 colors.
fn extract_palette(pixels: &[u8]) -> Option<(Vec<Rgba>, Vec<u8>)> {
    let mut lookup: HashMap<Rgba, u8> = HashMap::with_capacity(MAX_PALETTE_SIZE);
    let mut palette = Vec::with_capacity(MAX_PALETTE_SIZE);
    let mut indices = Vec::with_capacity(pixels.len() / 4);

    for i in 0..pixels.len() / 4 {
        let color = pixel_at(pixels, i);
        let index = match lookup.get(&color) {
            Some(&idx) => idx,
            None => {
                if palette.len() >= MAX_PALETTE_SIZE {
                    return None;
                }
                let idx = palette.len() as u8;
                palette.push(color);
                lookup.insert(color, idx);
                idx
            }
        };
        indices.push(index);
    }
    Some((palette, indices))
}

/// Parallel variant of [`extract_palette`] for large previews.
///
/// Chunks collect their distinct colors independently; the palette is then
/// assembled in chunk order so output does not depend on scheduling.
fn extract_palette_parallel(pixels: &[u8]) -> Option<(Vec<Rgba>, Vec<u8>)> {
    let chunk_pixels = (pixels.len() / 4 / rayon::current_num_threads().max(1)).max(256);

    let per_chunk: Vec<Option<Vec<Rgba>>> = pixels
        .par_chunks(chunk_pixels * 4)
        .map(|chunk| {
            let mut seen: HashMap<Rgba, ()> = HashMap::new();
            let mut order = Vec::new();
            for i in 0..chunk.len() / 4 {
                let color = pixel_at(chunk, i);
                if seen.insert(color, ()).is_none() {
                    order.push(color);
                    if order.len() > MAX_PALETTE_SIZE {
                        return None;
                    }
                }
            }
            Some(order)
        })
        .collect();

    let mut lookup: HashMap<Rgba, u8> = HashMap::with_capacity(MAX_PALETTE_SIZE);
    let mut palette = Vec::with_capacity(MAX_PALETTE_SIZE);
    for colors in per_chunk {
        for color in colors? {
            if lookup.contains_key(&color) {
                continue;
            }
            if palette.len() >= MAX_PALETTE_SIZE {
                return None;
            }
            lookup.insert(color, palette.len() as u8);
            palette.push(color);
        }
    }

    let indices: Vec<u8> = (0..pixels.len() / 4)
        .into_par_iter()
        .map(|i| lookup.get(&pixel_at(pixels, i)).copied().unwrap_or(0))
        .collect();
    Some((palette, indices))
}
