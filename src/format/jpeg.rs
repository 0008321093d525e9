//! JPEG tile handling.
//!
//! Tiled TIFF textures written with JPEG compression often store
//! "abbreviated" streams: each tile lacks its quantization (DQT) and
//! Huffman (DHT) tables, which live once in the `JPEGTables` tag. Before
//! decoding, the tables are spliced into the tile stream:
//!
//! ```text
//! tables: SOI DQT DHT EOI
//! tile:   SOI SOF SOS ... EOI
//! merged: SOI DQT DHT SOF SOS ... EOI
//! ```

use std::io::Cursor;

use bytes::{Bytes, BytesMut};
use image::{ImageFormat, ImageReader, Rgba32FImage};

use crate::error::TextureError;

// =============================================================================
// JPEG Markers
// =============================================================================

/// Start Of Image marker
pub const SOI: [u8; 2] = [0xFF, 0xD8];

/// End Of Image marker
pub const EOI: [u8; 2] = [0xFF, 0xD9];

/// Define Huffman Table marker
pub const DHT: [u8; 2] = [0xFF, 0xC4];

/// Define Quantization Table marker
pub const DQT: [u8; 2] = [0xFF, 0xDB];

/// Start Of Scan marker
pub const SOS: [u8; 2] = [0xFF, 0xDA];

// =============================================================================
// Stream Analysis
// =============================================================================

/// Check whether a stream reaches SOS without defining any DQT/DHT tables.
pub fn is_abbreviated_stream(data: &[u8]) -> bool {
    if data.len() < 4 || data[0..2] != SOI {
        return false;
    }

    let mut pos = 2;
    while pos + 1 < data.len() {
        if data[pos] != 0xFF {
            pos += 1;
            continue;
        }

        let marker = [data[pos], data[pos + 1]];
        if marker == DQT || marker == DHT {
            return false;
        }
        if marker == SOS {
            return true;
        }

        // Skip the segment body (2-byte big-endian length includes itself)
        if pos + 3 < data.len() && marker[1] != 0x00 && marker[1] != 0xD8 && marker[1] != 0xD9 {
            let length = u16::from_be_bytes([data[pos + 2], data[pos + 3]]) as usize;
            pos += 2 + length;
        } else {
            pos += 2;
        }
    }

    false
}

/// Splice `tables` into an abbreviated `tile_data` stream.
///
/// The trailing EOI of the tables and the leading SOI of the tile are
/// dropped so the result is a single well-formed stream.
pub fn merge_jpeg_tables(tables: &[u8], tile_data: &[u8]) -> Bytes {
    if tables.is_empty() {
        return Bytes::copy_from_slice(tile_data);
    }
    if tile_data.is_empty() {
        return Bytes::new();
    }

    let tables_end = if tables.ends_with(&EOI) {
        tables.len() - 2
    } else {
        tables.len()
    };
    let tile_start = if tile_data.starts_with(&SOI) { 2 } else { 0 };

    let mut merged = BytesMut::with_capacity(tables_end + tile_data.len() - tile_start);
    merged.extend_from_slice(&tables[..tables_end]);
    merged.extend_from_slice(&tile_data[tile_start..]);
    merged.freeze()
}

/// Prepare a tile stream for decoding, merging tables when it needs them.
pub fn prepare_tile_jpeg(tables: Option<&[u8]>, tile_data: &[u8]) -> Bytes {
    match tables {
        Some(tables) if is_abbreviated_stream(tile_data) => merge_jpeg_tables(tables, tile_data),
        _ => Bytes::copy_from_slice(tile_data),
    }
}

// =============================================================================
// Decoding
// =============================================================================

/// Decode a JPEG tile into normalised RGBA.
///
/// Greyscale streams are expanded to RGB; alpha is always opaque.
///
/// # Errors
/// Returns `TextureError::Decode` if the stream is not valid JPEG.
pub fn decode_tile_jpeg(
    tables: Option<&[u8]>,
    tile_data: &[u8],
) -> Result<Rgba32FImage, TextureError> {
    let stream = prepare_tile_jpeg(tables, tile_data);
    let reader = ImageReader::with_format(Cursor::new(stream.as_ref()), ImageFormat::Jpeg);

    let img = reader.decode().map_err(|e| TextureError::Decode {
        message: e.to_string(),
    })?;

    Ok(img.into_rgba32f())
}
