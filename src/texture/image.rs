//! Per-texture view over the tile store.
//!
//! A [`TiledImage`] knows a texture's header and wrap policy and answers
//! nearest (`texel`) and bilinear (`blur`) lookups, loading one tile at a
//! time through the descriptor cache on a miss.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, error, warn};

use crate::error::{TextureError, TiffError};
use crate::format::tiff::MAX_TILE_DIMENSION;

use super::color::Rgba;
use super::context::CacheCore;
use super::source::{TextureHeader, TextureSource, TileKey};
use super::store::{Block, TextureId};
use super::wrap::{parse_wrap_hint, ForcedWrap, WrapMode};

/// Parameters given when a texture is opened. Together with the path they
/// form the texture's identity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct TextureOptions {
    pub force_wrap_s: Option<ForcedWrap>,
    pub force_wrap_t: Option<ForcedWrap>,
}

// =============================================================================
// TextureLookup
// =============================================================================

/// Texel access used by the filtered sampler.
///
/// Implementors provide integer lookups; the normalised nearest and
/// bilinear lookups are derived from them.
pub trait TextureLookup {
    fn header(&self) -> &TextureHeader;

    /// Texel at integer coordinates of level `(level_x, level_y)`, after
    /// wrapping.
    fn texel_at(&self, x: i64, y: i64, level_x: u32, level_y: u32) -> Rgba;

    /// Dimensions of the level actually used for `(level_x, level_y)`.
    fn level_size(&self, level_x: u32, level_y: u32) -> (u32, u32) {
        let header = self.header();
        let lx = level_x.min(header.levels_x.saturating_sub(1));
        let ly = level_y.min(header.levels_y.saturating_sub(1));
        let (rx, ry) = header.resolve_level(lx, ly);
        (header.level_width(rx), header.level_height(ry))
    }

    /// Wrap modes applied by `texel_at` along s and t.
    fn wrap_modes(&self) -> (WrapMode, WrapMode) {
        (WrapMode::Clamp, WrapMode::Clamp)
    }

    /// Nearest texel to normalised `(u, v)`.
    fn texel(&self, u: f32, v: f32, level_x: u32, level_y: u32) -> Rgba {
        let (w, h) = self.level_size(level_x, level_y);
        let (wrap_s, wrap_t) = self.wrap_modes();
        let x = wrap_s.reduce(u * w as f32, w, 0.0).floor() as i64;
        let y = wrap_t.reduce(v * h as f32, h, 0.0).floor() as i64;
        self.texel_at(x, y, level_x, level_y)
    }

    /// Bilinear interpolation of the four texels around `(u, v)`.
    fn blur(&self, u: f32, v: f32, level_x: u32, level_y: u32) -> Rgba {
        let (w, h) = self.level_size(level_x, level_y);
        let (wrap_s, wrap_t) = self.wrap_modes();
        let fx = wrap_s.reduce(u * w as f32 - 0.5, w, 1.0);
        let fy = wrap_t.reduce(v * h as f32 - 0.5, h, 1.0);
        let x0 = fx.floor();
        let y0 = fy.floor();
        let ax = fx - x0;
        let ay = fy - y0;
        let (x0, y0) = (x0 as i64, y0 as i64);
        let (x1, y1) = (x0.saturating_add(1), y0.saturating_add(1));

        let c00 = self.texel_at(x0, y0, level_x, level_y);
        let c10 = self.texel_at(x1, y0, level_x, level_y);
        let c01 = self.texel_at(x0, y1, level_x, level_y);
        let c11 = self.texel_at(x1, y1, level_x, level_y);

        c00.lerp(c10, ax).lerp(c01.lerp(c11, ax), ay)
    }
}

// =============================================================================
// TiledImage
// =============================================================================

pub struct TiledImage<S: TextureSource> {
    id: TextureId,
    path: PathBuf,
    header: TextureHeader,
    wrap_s: WrapMode,
    wrap_t: WrapMode,

    /// Blocks of this texture by tile; entries outlive eviction of their data
    index: RwLock<HashMap<TileKey, Arc<Block>>>,
    core: Arc<CacheCore<S>>,
    error_logged: AtomicBool,
}

impl<S: TextureSource> TiledImage<S> {
    /// Open `path` through the descriptor cache and read its header.
    pub(crate) fn open(
        id: TextureId,
        path: &Path,
        options: TextureOptions,
        core: Arc<CacheCore<S>>,
    ) -> Result<Self, TextureError> {
        let handle = core.descriptors.get(id, path)?;
        let header = handle.header().clone();
        if let Err(e) = validate_header(&header) {
            core.descriptors.close(id);
            return Err(e);
        }

        let (mut wrap_s, mut wrap_t) = parse_wrap_hint(header.wrap_hint.as_deref());
        if let Some(forced) = options.force_wrap_s {
            wrap_s = forced.into();
        }
        if let Some(forced) = options.force_wrap_t {
            wrap_t = forced.into();
        }

        core.store.register(id);
        core.stats.texture_opened();
        debug!(
            texture = id.0,
            path = %path.display(),
            width = header.width,
            height = header.height,
            levels_x = header.levels_x,
            levels_y = header.levels_y,
            ?wrap_s,
            ?wrap_t,
            "Opened texture"
        );

        Ok(Self {
            id,
            path: path.to_path_buf(),
            header,
            wrap_s,
            wrap_t,
            index: RwLock::new(HashMap::new()),
            core,
            error_logged: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> TextureId {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of tiles this image has ever created blocks for.
    pub fn block_count(&self) -> usize {
        read(&self.index).len()
    }

    /// Whether the block for `key` currently holds data.
    pub fn is_resident(&self, key: TileKey) -> bool {
        read(&self.index)
            .get(&key)
            .map(|block| block.is_resident())
            .unwrap_or(false)
    }

    /// Drop every block and the open reader. Later lookups return zero.
    pub(crate) fn release(&self) {
        write(&self.index).clear();
        self.core.store.release(self.id);
        self.core.descriptors.close(self.id);
        self.core.stats.texture_closed();
    }

    /// Find or create the block for `key`.
    fn block(&self, key: TileKey) -> Option<Arc<Block>> {
        if let Some(block) = read(&self.index).get(&key) {
            return Some(Arc::clone(block));
        }

        let mut index = write(&self.index);
        if let Some(block) = index.get(&key) {
            return Some(Arc::clone(block));
        }
        let block = self.core.store.acquire(self.id, key)?;
        index.insert(key, Arc::clone(&block));
        Some(block)
    }

    /// Load the tile for `key` into `block` unless another thread already has.
    fn load(&self, block: &Block, key: TileKey) -> Result<Arc<[Rgba]>, TextureError> {
        let _guard = block.lock_for_load();
        if let Some(data) = block.data() {
            return Ok(data);
        }

        let bytes = self.header.tile_bytes();
        self.core.store.reserve(block, bytes)?;

        let data = match self.read_tile(key, bytes) {
            Ok(data) => data,
            Err(e) => {
                self.core.store.cancel(block);
                return Err(e);
            }
        };

        let first = block.load_count() == 0;
        if !self.core.store.publish(block, Arc::clone(&data)) {
            return Err(TextureError::InvalidHandle);
        }
        self.core.stats.record_load(bytes, first);
        debug!(
            texture = self.id.0,
            tile_x = key.tile_x,
            tile_y = key.tile_y,
            level_x = key.level_x,
            level_y = key.level_y,
            reload = !first,
            "Loaded tile"
        );
        Ok(data)
    }

    fn read_tile(&self, key: TileKey, bytes: usize) -> Result<Arc<[Rgba]>, TextureError> {
        let texels = self.header.tile_texels();
        let mut buffer: Vec<Rgba> = Vec::new();
        buffer
            .try_reserve_exact(texels)
            .map_err(|_| TextureError::AllocationFailure {
                requested: bytes,
                budget: self.core.store.budget(),
            })?;
        buffer.resize(texels, Rgba::ZERO);

        let handle = self.core.descriptors.get(self.id, &self.path)?;
        handle.read_tile(key, &mut buffer)?;
        Ok(buffer.into())
    }

    fn report(&self, err: &TextureError) {
        match err {
            // Closed while sampling; not a fault
            TextureError::InvalidHandle => {}
            // Logged once by the store
            TextureError::AllocationFailure { .. } => {}
            _ => {
                self.core.stats.record_io_error();
                if !self.error_logged.swap(true, Ordering::Relaxed) {
                    error!(
                        texture = self.id.0,
                        path = %self.path.display(),
                        error = %err,
                        "Failed to load texture tile; affected lookups return black"
                    );
                }
            }
        }
    }
}

impl<S: TextureSource> TextureLookup for TiledImage<S> {
    fn header(&self) -> &TextureHeader {
        &self.header
    }

    fn wrap_modes(&self) -> (WrapMode, WrapMode) {
        (self.wrap_s, self.wrap_t)
    }

    fn texel_at(&self, x: i64, y: i64, level_x: u32, level_y: u32) -> Rgba {
        debug_assert!(
            level_x < self.header.levels_x && level_y < self.header.levels_y,
            "level ({}, {}) out of range",
            level_x,
            level_y
        );
        let lx = level_x.min(self.header.levels_x - 1);
        let ly = level_y.min(self.header.levels_y - 1);
        let (lx, ly) = self.header.resolve_level(lx, ly);
        let w = self.header.level_width(lx);
        let h = self.header.level_height(ly);

        let (Some(x), Some(y)) = (self.wrap_s.apply(x, w), self.wrap_t.apply(y, h)) else {
            return Rgba::ZERO;
        };

        let (tw, th) = (self.header.tile_width, self.header.tile_height);
        let key = TileKey {
            tile_x: x / tw,
            tile_y: y / th,
            level_x: lx,
            level_y: ly,
        };
        let offset = ((y % th) * tw + (x % tw)) as usize;

        self.core.stats.record_access();
        let Some(block) = self.block(key) else {
            return Rgba::ZERO;
        };
        block.touch(&self.core.clock);

        if let Some(texel) = block.texel(offset) {
            return texel;
        }
        match self.load(&block, key) {
            Ok(data) => data.get(offset).copied().unwrap_or(Rgba::ZERO),
            Err(e) => {
                self.report(&e);
                Rgba::ZERO
            }
        }
    }
}

fn validate_header(header: &TextureHeader) -> Result<(), TextureError> {
    if header.width == 0
        || header.height == 0
        || header.tile_width == 0
        || header.tile_height == 0
        || header.levels_x == 0
        || header.levels_y == 0
    {
        warn!(?header, "Rejecting texture with an empty dimension");
        return Err(TiffError::InvalidLevelLayout(format!(
            "{}x{} texture with {}x{} tiles and {}x{} levels",
            header.width,
            header.height,
            header.tile_width,
            header.tile_height,
            header.levels_x,
            header.levels_y
        ))
        .into());
    }
    if header.tile_width > MAX_TILE_DIMENSION || header.tile_height > MAX_TILE_DIMENSION {
        warn!(?header, "Rejecting texture with oversized tiles");
        return Err(TiffError::UnsupportedLayout(format!(
            "{}x{} tiles exceed the {} texel limit",
            header.tile_width, header.tile_height, MAX_TILE_DIMENSION
        ))
        .into());
    }
    Ok(())
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
