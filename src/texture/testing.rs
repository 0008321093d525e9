//! In-memory texture source used by the unit tests.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use crate::error::{IoError, TextureError};

use super::color::Rgba;
use super::source::{LevelMode, TextureHeader, TextureSource, TileKey, TileReader};

/// Texel value used by the generated textures: it encodes its own
/// coordinates and level so lookups can be checked exactly.
pub fn coded_texel(x: u32, y: u32, lx: u32, ly: u32) -> Rgba {
    Rgba::new(x as f32, y as f32, (lx * 16 + ly) as f32, 1.0)
}

#[derive(Debug, Clone)]
pub struct TestTexture {
    pub header: TextureHeader,
    levels: HashMap<(u32, u32), Vec<Rgba>>,
    pub fail_reads: bool,
}

impl TestTexture {
    fn build(
        width: u32,
        height: u32,
        tile: (u32, u32),
        mode: LevelMode,
        texel: impl Fn(u32, u32, u32, u32) -> Rgba,
    ) -> Self {
        let count = |dim: u32| 32 - dim.leading_zeros();
        let (levels_x, levels_y) = match mode {
            LevelMode::One => (1, 1),
            LevelMode::MipMap => {
                let n = count(width.max(height));
                (n, n)
            }
            LevelMode::RipMap => (count(width), count(height)),
        };
        let header = TextureHeader {
            width,
            height,
            tile_width: tile.0,
            tile_height: tile.1,
            levels_x,
            levels_y,
            level_mode: mode,
            has_alpha: true,
            wrap_hint: None,
        };

        let mut levels = HashMap::new();
        for ly in 0..levels_y {
            for lx in 0..levels_x {
                let (rx, ry) = header.resolve_level(lx, ly);
                if (rx, ry) != (lx, ly) {
                    continue;
                }
                let (w, h) = (header.level_width(lx), header.level_height(ly));
                let data = (0..h)
                    .flat_map(|y| (0..w).map(move |x| (x, y)))
                    .map(|(x, y)| texel(x, y, lx, ly))
                    .collect();
                levels.insert((lx, ly), data);
            }
        }

        Self {
            header,
            levels,
            fail_reads: false,
        }
    }

    /// Single level with coded texels.
    pub fn gradient(width: u32, height: u32, tile_w: u32, tile_h: u32) -> Self {
        Self::build(width, height, (tile_w, tile_h), LevelMode::One, coded_texel)
    }

    /// Full RIP grid with coded texels.
    pub fn ripmap(width: u32, height: u32, tile_w: u32, tile_h: u32) -> Self {
        Self::build(width, height, (tile_w, tile_h), LevelMode::RipMap, coded_texel)
    }

    /// Full MIP chain with coded texels.
    pub fn mipmap(width: u32, height: u32, tile_w: u32, tile_h: u32) -> Self {
        Self::build(width, height, (tile_w, tile_h), LevelMode::MipMap, coded_texel)
    }

    /// RIP grid where every texel of every level is `value`.
    pub fn solid(width: u32, height: u32, tile: u32, value: Rgba) -> Self {
        Self::build(width, height, (tile, tile), LevelMode::RipMap, move |_, _, _, _| value)
    }

    pub fn with_wrap_hint(mut self, hint: &str) -> Self {
        self.header.wrap_hint = Some(hint.to_string());
        self
    }

    pub fn without_alpha(mut self) -> Self {
        self.header.has_alpha = false;
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail_reads = true;
        self
    }
}

#[derive(Debug, Default)]
pub struct MemorySource {
    textures: Mutex<HashMap<String, Arc<TestTexture>>>,
    opens: AtomicUsize,
    open_attempts: AtomicUsize,
    held: (Mutex<bool>, Condvar),
    tile_reads: Arc<AtomicUsize>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, name: &str, texture: TestTexture) {
        self.textures
            .lock()
            .unwrap()
            .insert(name.to_string(), Arc::new(texture));
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn tile_reads(&self) -> usize {
        self.tile_reads.load(Ordering::SeqCst)
    }

    pub fn open_attempts(&self) -> usize {
        self.open_attempts.load(Ordering::SeqCst)
    }

    /// Make every `open` block until `release_opens` is called.
    pub fn hold_opens(&self) {
        *self.held.0.lock().unwrap() = true;
    }

    pub fn release_opens(&self) {
        *self.held.0.lock().unwrap() = false;
        self.held.1.notify_all();
    }
}

impl TextureSource for MemorySource {
    type Reader = MemoryReader;

    fn open(&self, path: &Path) -> Result<MemoryReader, TextureError> {
        self.open_attempts.fetch_add(1, Ordering::SeqCst);
        let mut held = self.held.0.lock().unwrap();
        while *held {
            held = self.held.1.wait(held).unwrap();
        }
        drop(held);

        let name = path.to_string_lossy().into_owned();
        let texture = self
            .textures
            .lock()
            .unwrap()
            .get(&name)
            .cloned()
            .ok_or(TextureError::Io(IoError::NotFound(name)))?;
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(MemoryReader {
            texture,
            tile_reads: Arc::clone(&self.tile_reads),
        })
    }
}

pub struct MemoryReader {
    texture: Arc<TestTexture>,
    tile_reads: Arc<AtomicUsize>,
}

impl TileReader for MemoryReader {
    fn header(&self) -> &TextureHeader {
        &self.texture.header
    }

    fn read_tile(&mut self, key: TileKey, out: &mut [Rgba]) -> Result<(), TextureError> {
        self.tile_reads.fetch_add(1, Ordering::SeqCst);
        if self.texture.fail_reads {
            return Err(TextureError::Io(IoError::Os("injected read failure".into())));
        }

        let header = &self.texture.header;
        let (lx, ly) = header.resolve_level(key.level_x, key.level_y);
        let level = self
            .texture
            .levels
            .get(&(lx, ly))
            .ok_or(TextureError::InvalidHandle)?;
        let (w, h) = (header.level_width(lx), header.level_height(ly));
        let (tw, th) = (header.tile_width, header.tile_height);

        for j in 0..th {
            for i in 0..tw {
                let x = key.tile_x * tw + i;
                let y = key.tile_y * th + j;
                out[(j * tw + i) as usize] = if x < w && y < h {
                    level[(y * w + x) as usize]
                } else {
                    Rgba::ZERO
                };
            }
        }
        Ok(())
    }
}
