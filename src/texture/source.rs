//! The seam between the cache and a concrete tiled-image container.
//!
//! A [`TextureSource`] resolves a path to a [`TileReader`]; the reader
//! exposes header metadata and decodes one tile at a time into RGBA.

use std::path::Path;

use crate::error::TextureError;
use crate::format::TiffTextureReader;
use crate::io::FileRangeReader;

use super::color::Rgba;

/// Address of one tile within a texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TileKey {
    pub tile_x: u32,
    pub tile_y: u32,
    pub level_x: u32,
    pub level_y: u32,
}

/// Whether the levels of a texture are independent per axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LevelMode {
    /// A single resolution
    One,
    /// Both axes reduce together; `(lx, ly)` resolves to `max(lx, ly)`
    MipMap,
    /// Independent level chains per axis
    RipMap,
}

/// Header metadata of a tiled texture.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct TextureHeader {
    pub width: u32,
    pub height: u32,
    pub tile_width: u32,
    pub tile_height: u32,
    pub levels_x: u32,
    pub levels_y: u32,
    pub level_mode: LevelMode,

    /// Whether the source stores a real alpha channel
    pub has_alpha: bool,

    /// Raw wrap-mode text from the file metadata
    pub wrap_hint: Option<String>,
}

impl TextureHeader {
    /// Map a requested level pair to the pair actually stored.
    #[inline]
    pub fn resolve_level(&self, level_x: u32, level_y: u32) -> (u32, u32) {
        match self.level_mode {
            LevelMode::One => (0, 0),
            LevelMode::MipMap => {
                let l = level_x.max(level_y);
                (l, l)
            }
            LevelMode::RipMap => (level_x, level_y),
        }
    }

    #[inline]
    pub fn level_width(&self, level_x: u32) -> u32 {
        (self.width >> level_x.min(31)).max(1)
    }

    #[inline]
    pub fn level_height(&self, level_y: u32) -> u32 {
        (self.height >> level_y.min(31)).max(1)
    }

    /// Texels in one tile buffer. Edge tiles are stored full size.
    #[inline]
    pub fn tile_texels(&self) -> usize {
        self.tile_width as usize * self.tile_height as usize
    }

    /// Bytes of decoded memory one tile occupies.
    #[inline]
    pub fn tile_bytes(&self) -> usize {
        self.tile_texels() * std::mem::size_of::<Rgba>()
    }
}

/// An open reader for one texture file.
///
/// Readers are not assumed to be reentrant; the descriptor cache wraps
/// each in a mutex.
pub trait TileReader: Send {
    fn header(&self) -> &TextureHeader;

    /// Decode the tile at `key` into `out`, which holds
    /// `tile_width * tile_height` texels in row-major order.
    ///
    /// # Errors
    /// Fails if the tile cannot be read or decoded. `out` may be partially
    /// written on failure.
    fn read_tile(&mut self, key: TileKey, out: &mut [Rgba]) -> Result<(), TextureError>;
}

/// Resolves texture paths to readers.
pub trait TextureSource: Send + Sync {
    type Reader: TileReader + 'static;

    /// Open and parse the header of the texture at `path`.
    fn open(&self, path: &Path) -> Result<Self::Reader, TextureError>;
}

/// Opens tiled TIFF textures from the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsTextureSource;

impl TextureSource for FsTextureSource {
    type Reader = TiffTextureReader<FileRangeReader>;

    fn open(&self, path: &Path) -> Result<Self::Reader, TextureError> {
        let reader = FileRangeReader::open(path)?;
        TiffTextureReader::new(reader)
    }
}
