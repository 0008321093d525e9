//! Tile reader for tiled TIFF texture files.

use tracing::debug;

use crate::error::{TextureError, TiffError};
use crate::io::RangeReader;
use crate::texture::{LevelMode, Rgba, TextureHeader, TileKey, TileReader};

use super::jpeg::decode_tile_jpeg;
use super::tiff::{ByteOrder, Compression, LevelLayout, SampleKind, TiffPyramid};

/// Key of the wrap-mode line in a texture's ImageDescription.
const WRAP_MODES_KEY: &str = "wrapmodes=";

/// Reads RGBA tiles from a MIP or RIP tiled TIFF.
pub struct TiffTextureReader<R: RangeReader> {
    reader: R,
    pyramid: TiffPyramid,
    header: TextureHeader,
}

impl<R: RangeReader> TiffTextureReader<R> {
    /// Parse the file structure and build the texture header.
    ///
    /// # Errors
    /// Returns `TextureError::Tiff` if the file is not a supported tiled
    /// texture.
    pub fn new(reader: R) -> Result<Self, TextureError> {
        let pyramid = TiffPyramid::parse(&reader)?;

        let level_mode = match pyramid.layout {
            LevelLayout::Single => LevelMode::One,
            LevelLayout::Mip => LevelMode::MipMap,
            LevelLayout::Rip => LevelMode::RipMap,
        };
        let base = pyramid
            .level(0, 0)
            .ok_or_else(|| TiffError::InvalidLevelLayout("missing base level".to_string()))?;

        let header = TextureHeader {
            width: base.width,
            height: base.height,
            tile_width: pyramid.tile_width,
            tile_height: pyramid.tile_height,
            levels_x: pyramid.levels_x,
            levels_y: pyramid.levels_y,
            level_mode,
            has_alpha: pyramid.pixel.has_alpha(),
            wrap_hint: pyramid.description.as_deref().and_then(wrap_hint),
        };

        debug!(
            file = reader.identifier(),
            width = header.width,
            height = header.height,
            levels_x = header.levels_x,
            levels_y = header.levels_y,
            "Parsed texture header"
        );

        Ok(Self {
            reader,
            pyramid,
            header,
        })
    }

    pub fn pyramid(&self) -> &TiffPyramid {
        &self.pyramid
    }

    fn decode_raw(
        &self,
        raw: &[u8],
        jpeg_tables: Option<&[u8]>,
        out: &mut [Rgba],
    ) -> Result<(), TextureError> {
        let texels = self.header.tile_texels();
        let pixel = self.pyramid.pixel;

        match pixel.compression {
            Compression::Jpeg => {
                let img = decode_tile_jpeg(jpeg_tables, raw)?;
                let (w, h) = img.dimensions();
                let tw = self.header.tile_width;
                for y in 0..h.min(self.header.tile_height) {
                    for x in 0..w.min(tw) {
                        let p = img.get_pixel(x, y);
                        out[(y * tw + x) as usize] = Rgba::new(p[0], p[1], p[2], 1.0);
                    }
                }
                Ok(())
            }
            _ => {
                let bpp = pixel.bytes_per_pixel();
                let needed = texels * bpp;
                if raw.len() < needed {
                    return Err(TextureError::Decode {
                        message: format!(
                            "uncompressed tile has {} bytes, expected {}",
                            raw.len(),
                            needed
                        ),
                    });
                }
                let byte_order = self.pyramid.header.byte_order;
                for (texel, chunk) in out.iter_mut().zip(raw.chunks_exact(bpp)) {
                    *texel = decode_texel(chunk, pixel.samples_per_pixel, pixel.sample_kind, byte_order);
                }
                Ok(())
            }
        }
    }
}

impl<R: RangeReader> TileReader for TiffTextureReader<R> {
    fn header(&self) -> &TextureHeader {
        &self.header
    }

    fn read_tile(&mut self, key: TileKey, out: &mut [Rgba]) -> Result<(), TextureError> {
        let level = self.pyramid.level(key.level_x, key.level_y).ok_or_else(|| {
            TiffError::InvalidLevelLayout(format!(
                "level ({}, {}) does not exist",
                key.level_x, key.level_y
            ))
        })?;
        let raw = self
            .pyramid
            .read_raw_tile(&self.reader, level, key.tile_x, key.tile_y)?;

        if raw.is_empty() {
            out.fill(Rgba::ZERO);
            return Ok(());
        }
        self.decode_raw(&raw, level.jpeg_tables.as_deref(), out)
    }
}

/// Expand one stored pixel to RGBA.
fn decode_texel(chunk: &[u8], samples: u16, kind: SampleKind, byte_order: ByteOrder) -> Rgba {
    let sample = |i: usize| -> f32 {
        match kind {
            SampleKind::U8 => chunk[i] as f32 / 255.0,
            SampleKind::F32 => byte_order.read_f32(&chunk[i * 4..]),
        }
    };
    match samples {
        1 => Rgba::grey(sample(0), 1.0),
        2 => Rgba::grey(sample(0), sample(1)),
        3 => Rgba::new(sample(0), sample(1), sample(2), 1.0),
        _ => Rgba::new(sample(0), sample(1), sample(2), sample(3)),
    }
}

/// Extract the wrap-mode text from an ImageDescription.
///
/// Either a `wrapmodes=s,t` line or a description that is only `s,t`.
fn wrap_hint(description: &str) -> Option<String> {
    let from_line = description
        .lines()
        .map(str::trim)
        .find_map(|line| line.strip_prefix(WRAP_MODES_KEY));
    match from_line {
        Some(value) => Some(value.trim().to_string()),
        None => {
            let trimmed = description.trim();
            trimmed.contains(',').then(|| trimmed.to_string())
        }
    }
}
