//! Test utilities for integration tests.
//!
//! This module provides a writer for tiled MIP/RIP TIFF textures and a
//! texture source that tracks how many readers are open at once.

use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use texcache::{
    CacheConfig, FileRangeReader, FsTextureSource, Rgba, TextureContext, TextureError,
    TextureHeader, TextureSource, TiffTextureReader, TileKey, TileReader,
};

// =============================================================================
// Texel Generators
// =============================================================================

/// A texel that encodes its own coordinates and level.
pub fn coded_texel(x: u32, y: u32, lx: u32, ly: u32) -> [f32; 4] {
    [x as f32, y as f32, (lx * 16 + ly) as f32, 1.0]
}

/// A texel that encodes only its level.
pub fn level_texel(_: u32, _: u32, lx: u32, ly: u32) -> [f32; 4] {
    [lx as f32, ly as f32, 0.0, 1.0]
}

pub fn rgba(texel: [f32; 4]) -> Rgba {
    Rgba::new(texel[0], texel[1], texel[2], texel[3])
}

// =============================================================================
// TIFF Texture Builder
// =============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ByteOrderType {
    LittleEndian,
    BigEndian,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Layout {
    Single,
    MipMap,
    RipMap,
}

/// Stored pixel format. Texel values are written from `[r, g, b, a]`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PixelFormat {
    /// One 8-bit sample from the red channel
    GreyU8,
    RgbU8,
    RgbaU8,
    RgbaF32,
    /// RGB JPEG tiles, optionally sharing one JPEGTables blob per level
    Jpeg { quality: u8, shared_tables: bool },
}

impl PixelFormat {
    fn samples(self) -> u16 {
        match self {
            PixelFormat::GreyU8 => 1,
            PixelFormat::RgbU8 | PixelFormat::Jpeg { .. } => 3,
            PixelFormat::RgbaU8 | PixelFormat::RgbaF32 => 4,
        }
    }

    fn bits(self) -> u16 {
        match self {
            PixelFormat::RgbaF32 => 32,
            _ => 8,
        }
    }

    fn sample_format(self) -> u16 {
        match self {
            PixelFormat::RgbaF32 => 3,
            _ => 1,
        }
    }
}

/// Builder for tiled texture TIFFs.
///
/// Levels are written in the order the reader expects: a MIP chain from
/// finest to coarsest, a RIP grid row by row with X varying fastest.
#[derive(Clone, Debug)]
pub struct TiffBuilder {
    width: u32,
    height: u32,
    tile: (u32, u32),
    layout: Layout,
    format: PixelFormat,
    description: Option<String>,
    byte_order: ByteOrderType,
    is_bigtiff: bool,
    compression_override: Option<u16>,
    sparse: Vec<(usize, usize)>,
}

impl TiffBuilder {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            tile: (16, 16),
            layout: Layout::Single,
            format: PixelFormat::RgbaF32,
            description: None,
            byte_order: ByteOrderType::LittleEndian,
            is_bigtiff: false,
            compression_override: None,
            sparse: Vec::new(),
        }
    }

    pub fn with_tile_size(mut self, width: u32, height: u32) -> Self {
        self.tile = (width, height);
        self
    }

    pub fn with_layout(mut self, layout: Layout) -> Self {
        self.layout = layout;
        self
    }

    pub fn with_format(mut self, format: PixelFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn with_byte_order(mut self, order: ByteOrderType) -> Self {
        self.byte_order = order;
        self
    }

    pub fn with_bigtiff(mut self, is_bigtiff: bool) -> Self {
        self.is_bigtiff = is_bigtiff;
        self
    }

    /// Write this Compression tag value instead of the format's own.
    pub fn with_compression_code(mut self, code: u16) -> Self {
        self.compression_override = Some(code);
        self
    }

    /// Store tile `tile_index` of IFD `ifd_index` with a zero byte count.
    pub fn with_sparse_tile(mut self, ifd_index: usize, tile_index: usize) -> Self {
        self.sparse.push((ifd_index, tile_index));
        self
    }

    /// `(level_x, level_y, width, height)` of every IFD in file order.
    pub fn levels(&self) -> Vec<(u32, u32, u32, u32)> {
        let count = |d: u32| 32 - d.leading_zeros();
        let dims = |lx: u32, ly: u32| ((self.width >> lx).max(1), (self.height >> ly).max(1));
        let mut levels = Vec::new();
        match self.layout {
            Layout::Single => levels.push((0, 0, self.width, self.height)),
            Layout::MipMap => {
                for l in 0..count(self.width.max(self.height)) {
                    let (w, h) = dims(l, l);
                    levels.push((l, l, w, h));
                }
            }
            Layout::RipMap => {
                for ly in 0..count(self.height) {
                    for lx in 0..count(self.width) {
                        let (w, h) = dims(lx, ly);
                        levels.push((lx, ly, w, h));
                    }
                }
            }
        }
        levels
    }

    /// Build the file, asking `texel(x, y, level_x, level_y)` for every texel.
    pub fn build(&self, texel: impl Fn(u32, u32, u32, u32) -> [f32; 4]) -> Vec<u8> {
        let mut w = Writer::new(self.byte_order, self.is_bigtiff);
        let first_ifd_at = w.header();
        let mut next_at = first_ifd_at;

        for (ifd_index, &(lx, ly, width, height)) in self.levels().iter().enumerate() {
            let (tw, th) = self.tile;
            let tiles_x = width.div_ceil(tw);
            let tiles_y = height.div_ceil(th);

            let mut offsets = Vec::new();
            let mut counts = Vec::new();
            let mut tables = None;
            for ty in 0..tiles_y {
                for tx in 0..tiles_x {
                    let tile_index = (ty * tiles_x + tx) as usize;
                    if self.sparse.contains(&(ifd_index, tile_index)) {
                        offsets.push(0);
                        counts.push(0);
                        continue;
                    }
                    let texels: Vec<[f32; 4]> = (0..th)
                        .flat_map(|j| (0..tw).map(move |i| (tx * tw + i, ty * th + j)))
                        .map(|(x, y)| {
                            if x < width && y < height {
                                texel(x, y, lx, ly)
                            } else {
                                [0.0; 4]
                            }
                        })
                        .collect();
                    let mut payload = self.encode_tile(&w, &texels);
                    if let PixelFormat::Jpeg {
                        shared_tables: true,
                        ..
                    } = self.format
                    {
                        let (level_tables, abbreviated) = split_jpeg_stream(&payload);
                        tables.get_or_insert(level_tables);
                        payload = abbreviated;
                    }
                    offsets.push(w.pos());
                    counts.push(payload.len() as u64);
                    w.bytes(&payload);
                }
            }

            let entries = self.entries(&w, width, height, &offsets, &counts, tables);
            let (ifd_at, next_field) = w.ifd(entries);
            w.patch_offset(next_at, ifd_at);
            next_at = next_field;
        }
        w.out
    }

    /// Build with [`coded_texel`] values.
    pub fn build_coded(&self) -> Vec<u8> {
        self.build(coded_texel)
    }

    /// Build and write the file into `dir`.
    pub fn write(
        &self,
        dir: &Path,
        name: &str,
        texel: impl Fn(u32, u32, u32, u32) -> [f32; 4],
    ) -> PathBuf {
        write_file(dir, name, &self.build(texel))
    }

    fn encode_tile(&self, w: &Writer, texels: &[[f32; 4]]) -> Vec<u8> {
        let to_u8 = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
        let mut out = Vec::new();
        match self.format {
            PixelFormat::GreyU8 => out.extend(texels.iter().map(|t| to_u8(t[0]))),
            PixelFormat::RgbU8 => {
                for t in texels {
                    out.extend(t[..3].iter().map(|&v| to_u8(v)));
                }
            }
            PixelFormat::RgbaU8 => {
                for t in texels {
                    out.extend(t.iter().map(|&v| to_u8(v)));
                }
            }
            PixelFormat::RgbaF32 => {
                for t in texels {
                    for &v in t {
                        out.extend_from_slice(&w.f32_bytes(v));
                    }
                }
            }
            PixelFormat::Jpeg { quality, .. } => {
                let (tw, th) = self.tile;
                let img = RgbImage::from_fn(tw, th, |x, y| {
                    let t = texels[(y * tw + x) as usize];
                    Rgb([to_u8(t[0]), to_u8(t[1]), to_u8(t[2])])
                });
                let mut encoder = JpegEncoder::new_with_quality(&mut out, quality);
                encoder.encode_image(&img).unwrap();
            }
        }
        out
    }

    fn entries(
        &self,
        w: &Writer,
        width: u32,
        height: u32,
        offsets: &[u64],
        counts: &[u64],
        tables: Option<Vec<u8>>,
    ) -> Vec<Entry> {
        let samples = self.format.samples();
        let compression = self.compression_override.unwrap_or(match self.format {
            PixelFormat::Jpeg { .. } => 7,
            _ => 1,
        });
        let photometric = match self.format {
            PixelFormat::GreyU8 => 1,
            _ => 2,
        };

        let mut entries = vec![
            w.longs(256, &[width]),
            w.longs(257, &[height]),
            w.shorts(258, &vec![self.format.bits(); samples as usize]),
            w.shorts(259, &[compression]),
            w.shorts(262, &[photometric]),
        ];
        if let Some(description) = &self.description {
            entries.push(w.ascii(270, description));
        }
        entries.push(w.shorts(277, &[samples]));
        entries.push(w.shorts(284, &[1]));
        entries.push(w.longs(322, &[self.tile.0]));
        entries.push(w.longs(323, &[self.tile.1]));
        entries.push(w.offsets(324, offsets));
        entries.push(w.offsets(325, counts));
        if samples == 4 {
            entries.push(w.shorts(338, &[2]));
        }
        entries.push(w.shorts(
            339,
            &vec![self.format.sample_format(); samples as usize],
        ));
        if let Some(tables) = tables {
            entries.push(Entry {
                tag: 347,
                field_type: 7,
                count: tables.len() as u64,
                payload: tables,
            });
        }
        entries
    }
}

/// One IFD entry with its value already in file byte order.
pub struct Entry {
    tag: u16,
    field_type: u16,
    count: u64,
    payload: Vec<u8>,
}

struct Writer {
    byte_order: ByteOrderType,
    is_bigtiff: bool,
    out: Vec<u8>,
}

impl Writer {
    fn new(byte_order: ByteOrderType, is_bigtiff: bool) -> Self {
        Self {
            byte_order,
            is_bigtiff,
            out: Vec::new(),
        }
    }

    fn pos(&self) -> u64 {
        self.out.len() as u64
    }

    fn bytes(&mut self, data: &[u8]) {
        self.out.extend_from_slice(data);
    }

    fn u16_bytes(&self, v: u16) -> [u8; 2] {
        match self.byte_order {
            ByteOrderType::LittleEndian => v.to_le_bytes(),
            ByteOrderType::BigEndian => v.to_be_bytes(),
        }
    }

    fn u32_bytes(&self, v: u32) -> [u8; 4] {
        match self.byte_order {
            ByteOrderType::LittleEndian => v.to_le_bytes(),
            ByteOrderType::BigEndian => v.to_be_bytes(),
        }
    }

    fn u64_bytes(&self, v: u64) -> [u8; 8] {
        match self.byte_order {
            ByteOrderType::LittleEndian => v.to_le_bytes(),
            ByteOrderType::BigEndian => v.to_be_bytes(),
        }
    }

    fn f32_bytes(&self, v: f32) -> [u8; 4] {
        self.u32_bytes(v.to_bits())
    }

    fn offset_bytes(&self, v: u64) -> Vec<u8> {
        if self.is_bigtiff {
            self.u64_bytes(v).to_vec()
        } else {
            self.u32_bytes(v as u32).to_vec()
        }
    }

    /// Write the file header and return the position of the first IFD offset.
    fn header(&mut self) -> usize {
        let magic: &[u8] = match self.byte_order {
            ByteOrderType::LittleEndian => b"II",
            ByteOrderType::BigEndian => b"MM",
        };
        self.bytes(magic);
        if self.is_bigtiff {
            let fields = [self.u16_bytes(43), self.u16_bytes(8), self.u16_bytes(0)];
            for field in fields {
                self.bytes(&field);
            }
        } else {
            let version = self.u16_bytes(42);
            self.bytes(&version);
        }
        let at = self.out.len();
        let placeholder = self.offset_bytes(0);
        self.bytes(&placeholder);
        at
    }

    fn patch_offset(&mut self, at: usize, value: u64) {
        let bytes = self.offset_bytes(value);
        self.out[at..at + bytes.len()].copy_from_slice(&bytes);
    }

    fn shorts(&self, tag: u16, values: &[u16]) -> Entry {
        Entry {
            tag,
            field_type: 3,
            count: values.len() as u64,
            payload: values.iter().flat_map(|&v| self.u16_bytes(v)).collect(),
        }
    }

    fn longs(&self, tag: u16, values: &[u32]) -> Entry {
        Entry {
            tag,
            field_type: 4,
            count: values.len() as u64,
            payload: values.iter().flat_map(|&v| self.u32_bytes(v)).collect(),
        }
    }

    /// LONG in classic files, LONG8 in BigTIFF.
    fn offsets(&self, tag: u16, values: &[u64]) -> Entry {
        if self.is_bigtiff {
            Entry {
                tag,
                field_type: 16,
                count: values.len() as u64,
                payload: values.iter().flat_map(|&v| self.u64_bytes(v)).collect(),
            }
        } else {
            let narrow: Vec<u32> = values.iter().map(|&v| v as u32).collect();
            self.longs(tag, &narrow)
        }
    }

    fn ascii(&self, tag: u16, text: &str) -> Entry {
        let mut payload = text.as_bytes().to_vec();
        payload.push(0);
        Entry {
            tag,
            field_type: 2,
            count: payload.len() as u64,
            payload,
        }
    }

    /// Write out-of-line values, then the IFD itself.
    ///
    /// Returns the IFD's offset and the position of its next-IFD field.
    fn ifd(&mut self, mut entries: Vec<Entry>) -> (u64, usize) {
        entries.sort_by_key(|e| e.tag);
        let inline = if self.is_bigtiff { 8 } else { 4 };

        let mut locations = Vec::with_capacity(entries.len());
        for entry in &entries {
            if entry.payload.len() > inline {
                if self.out.len() % 2 == 1 {
                    self.out.push(0);
                }
                locations.push(Some(self.pos()));
                self.bytes(&entry.payload);
            } else {
                locations.push(None);
            }
        }
        if self.out.len() % 2 == 1 {
            self.out.push(0);
        }

        let ifd_at = self.pos();
        if self.is_bigtiff {
            let count = self.u64_bytes(entries.len() as u64);
            self.bytes(&count);
        } else {
            let count = self.u16_bytes(entries.len() as u16);
            self.bytes(&count);
        }

        for (entry, location) in entries.iter().zip(&locations) {
            let head = [self.u16_bytes(entry.tag), self.u16_bytes(entry.field_type)];
            for field in head {
                self.bytes(&field);
            }
            let count = self.offset_bytes(entry.count);
            self.bytes(&count);
            match location {
                Some(offset) => {
                    let value = self.offset_bytes(*offset);
                    self.bytes(&value);
                }
                None => {
                    let mut value = entry.payload.clone();
                    value.resize(inline, 0);
                    self.bytes(&value);
                }
            }
        }

        let next_at = self.out.len();
        let next = self.offset_bytes(0);
        self.bytes(&next);
        (ifd_at, next_at)
    }
}

/// Split a JPEG stream into a JPEGTables blob and an abbreviated stream.
fn split_jpeg_stream(jpeg: &[u8]) -> (Vec<u8>, Vec<u8>) {
    let mut i = 2;
    while i + 1 < jpeg.len() {
        if jpeg[i] == 0xFF && jpeg[i + 1] == 0xDA {
            let mut tables = vec![0xFF, 0xD8];
            tables.extend_from_slice(&jpeg[2..i]);
            tables.extend_from_slice(&[0xFF, 0xD9]);

            let mut abbreviated = vec![0xFF, 0xD8];
            abbreviated.extend_from_slice(&jpeg[i..]);
            return (tables, abbreviated);
        }

        if jpeg[i] == 0xFF && jpeg[i + 1] != 0x00 && jpeg[i + 1] != 0xFF {
            let len = u16::from_be_bytes([jpeg[i + 2], jpeg[i + 3]]) as usize;
            i += 2 + len;
        } else {
            i += 1;
        }
    }
    panic!("JPEG stream has no SOS marker");
}

pub fn write_file(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, bytes).unwrap();
    path
}

// =============================================================================
// Contexts and Sources
// =============================================================================

pub fn fs_context(config: CacheConfig) -> TextureContext<FsTextureSource> {
    TextureContext::init(config, FsTextureSource)
}

/// Center of texel `i` of `n` in normalised coordinates.
pub fn center(i: u32, n: u32) -> f32 {
    (i as f32 + 0.5) / n as f32
}

/// Filesystem source that counts opens and live readers.
#[derive(Debug, Default)]
pub struct CountingSource {
    opens: AtomicUsize,
    live: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl CountingSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

impl TextureSource for CountingSource {
    type Reader = CountedReader;

    fn open(&self, path: &Path) -> Result<CountedReader, TextureError> {
        let inner = FsTextureSource.open(path)?;
        self.opens.fetch_add(1, Ordering::SeqCst);
        let live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(live, Ordering::SeqCst);
        Ok(CountedReader {
            inner,
            live: Arc::clone(&self.live),
        })
    }
}

pub struct CountedReader {
    inner: TiffTextureReader<FileRangeReader>,
    live: Arc<AtomicUsize>,
}

impl TileReader for CountedReader {
    fn header(&self) -> &TextureHeader {
        self.inner.header()
    }

    fn read_tile(&mut self, key: TileKey, out: &mut [Rgba]) -> Result<(), TextureError> {
        self.inner.read_tile(key, out)
    }
}

impl Drop for CountedReader {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}
