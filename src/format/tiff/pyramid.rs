//! Resolution level layout of a tiled TIFF texture.
//!
//! A texture file stores its levels as a chain of IFDs, all tiled with the
//! same tile size. Three layouts are recognised from the first two IFDs:
//!
//! - **Single**: one IFD, no pyramid.
//! - **MIP chain**: each IFD halves both axes. Level `l` is IFD `l`.
//! - **RIP grid**: IFD 1 halves only the width. Levels are stored row by
//!   row, so level `(lx, ly)` is IFD `ly * levels_x + lx`.
//!
//! Level `(lx, ly)` must measure `max(1, w >> lx)` by `max(1, h >> ly)`.

use bytes::Bytes;

use crate::error::TiffError;
use crate::io::RangeReader;

use super::parser::{ByteOrder, Ifd, TiffHeader, BIGTIFF_HEADER_SIZE};
use super::tags::{Compression, TiffTag};
use super::values::ValueReader;

// =============================================================================
// Constants
// =============================================================================

/// Maximum number of IFDs to parse (safety limit)
const MAX_IFDS: usize = 1024;

/// Largest accepted tile width or length. Decoded tiles are RGBA float, so
/// this bounds one tile at 256 MiB.
pub const MAX_TILE_DIMENSION: u32 = 4096;

// =============================================================================
// Layout Types
// =============================================================================

/// How the IFD chain maps to resolution levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelLayout {
    Single,
    Mip,
    Rip,
}

/// Numeric interpretation of each sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleKind {
    /// 8-bit unsigned, normalised by 255
    U8,
    /// 32-bit IEEE float
    F32,
}

impl SampleKind {
    #[inline]
    pub const fn bytes(self) -> usize {
        match self {
            SampleKind::U8 => 1,
            SampleKind::F32 => 4,
        }
    }
}

/// Pixel layout shared by every level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelLayout {
    /// 1 grey, 2 grey+alpha, 3 RGB, 4 RGBA
    pub samples_per_pixel: u16,
    pub sample_kind: SampleKind,
    pub compression: Compression,
}

impl PixelLayout {
    #[inline]
    pub fn has_alpha(&self) -> bool {
        matches!(self.samples_per_pixel, 2 | 4)
    }

    #[inline]
    pub fn bytes_per_pixel(&self) -> usize {
        self.samples_per_pixel as usize * self.sample_kind.bytes()
    }
}

// =============================================================================
// TiffLevel
// =============================================================================

/// One stored resolution level.
#[derive(Debug, Clone)]
pub struct TiffLevel {
    pub ifd_index: usize,
    pub width: u32,
    pub height: u32,
    pub tiles_x: u32,
    pub tiles_y: u32,
    pub tile_offsets: Vec<u64>,
    pub tile_byte_counts: Vec<u64>,
    pub jpeg_tables: Option<Bytes>,
}

impl TiffLevel {
    /// Row-major index of a tile, `None` when out of range.
    pub fn tile_index(&self, tile_x: u32, tile_y: u32) -> Option<usize> {
        if tile_x >= self.tiles_x || tile_y >= self.tiles_y {
            return None;
        }
        Some(tile_y as usize * self.tiles_x as usize + tile_x as usize)
    }
}

// =============================================================================
// TiffPyramid
// =============================================================================

/// A parsed tiled TIFF texture: header, pixel layout and level grid.
#[derive(Debug, Clone)]
pub struct TiffPyramid {
    pub header: TiffHeader,
    pub layout: LevelLayout,
    pub levels_x: u32,
    pub levels_y: u32,
    pub tile_width: u32,
    pub tile_height: u32,
    pub pixel: PixelLayout,

    /// ImageDescription of the base IFD
    pub description: Option<String>,

    levels: Vec<TiffLevel>,
}

impl TiffPyramid {
    /// Parse the header and every IFD of a texture file.
    ///
    /// # Errors
    /// Fails if the file is not a tiled TIFF, if its levels do not form a
    /// MIP chain or RIP grid, or if the pixel layout is unsupported.
    pub fn parse<R: RangeReader + ?Sized>(reader: &R) -> Result<Self, TiffError> {
        let header_len = (BIGTIFF_HEADER_SIZE as u64).min(reader.size()) as usize;
        let header_bytes = reader.read_exact_at(0, header_len)?;
        let header = TiffHeader::parse(&header_bytes, reader.size())?;

        let ifds = Self::parse_all_ifds(reader, &header)?;
        Self::build(reader, header, ifds)
    }

    /// Follow the next-IFD chain.
    fn parse_all_ifds<R: RangeReader + ?Sized>(
        reader: &R,
        header: &TiffHeader,
    ) -> Result<Vec<Ifd>, TiffError> {
        let mut ifds = Vec::new();
        let mut offset = header.first_ifd_offset;

        while offset != 0 && ifds.len() < MAX_IFDS {
            let count_size = header.ifd_count_size();
            let count_bytes = reader.read_exact_at(offset, count_size)?;

            let entry_count = if header.is_bigtiff {
                header.byte_order.read_u64(&count_bytes)
            } else {
                header.byte_order.read_u16(&count_bytes) as u64
            };

            let ifd_size = Ifd::calculate_size(entry_count, header);
            let ifd_bytes = reader.read_exact_at(offset, ifd_size)?;
            let ifd = Ifd::parse(&ifd_bytes, header)?;

            offset = ifd.next_ifd_offset;
            ifds.push(ifd);
        }

        if ifds.is_empty() {
            return Err(TiffError::InvalidLevelLayout("file has no IFDs".to_string()));
        }
        Ok(ifds)
    }

    fn build<R: RangeReader + ?Sized>(
        reader: &R,
        header: TiffHeader,
        ifds: Vec<Ifd>,
    ) -> Result<Self, TiffError> {
        let byte_order = header.byte_order;
        let values = ValueReader::new(reader, &header);

        let base = &ifds[0];
        if base.is_stripped() {
            return Err(TiffError::StripOrganization);
        }
        let (width, height) = ifd_dimensions(base, byte_order)?;
        let tile_width = base
            .tile_width(byte_order)
            .ok_or(TiffError::MissingTag("TileWidth"))?;
        let tile_height = base
            .tile_height(byte_order)
            .ok_or(TiffError::MissingTag("TileLength"))?;
        if tile_width == 0 || tile_height == 0 {
            return Err(TiffError::InvalidTagValue {
                tag: "TileWidth",
                message: "tile dimensions must be non-zero".to_string(),
            });
        }
        if tile_width > MAX_TILE_DIMENSION || tile_height > MAX_TILE_DIMENSION {
            return Err(TiffError::InvalidTagValue {
                tag: if tile_width > MAX_TILE_DIMENSION {
                    "TileWidth"
                } else {
                    "TileLength"
                },
                message: format!(
                    "tiles of {}x{} exceed the {} texel limit",
                    tile_width, tile_height, MAX_TILE_DIMENSION
                ),
            });
        }

        let pixel = parse_pixel_layout(base, &values)?;
        let description = match base.get_entry_by_tag(TiffTag::ImageDescription) {
            Some(entry) => Some(values.read_string(entry)?),
            None => None,
        };

        let (layout, levels_x, levels_y) = classify_layout(&ifds, width, height, byte_order)?;

        let mut levels = Vec::with_capacity(ifds.len());
        for (ifd_index, ifd) in ifds.iter().enumerate() {
            let (lx, ly) = match layout {
                LevelLayout::Single => (0, 0),
                LevelLayout::Mip => (ifd_index as u32, ifd_index as u32),
                LevelLayout::Rip => (ifd_index as u32 % levels_x, ifd_index as u32 / levels_x),
            };
            let level = read_level(ifd, ifd_index, &values, (tile_width, tile_height))?;

            let expected = ((width >> lx).max(1), (height >> ly).max(1));
            if (level.width, level.height) != expected {
                return Err(TiffError::InvalidLevelLayout(format!(
                    "IFD {} is {}x{}, expected {}x{} for level ({}, {})",
                    ifd_index, level.width, level.height, expected.0, expected.1, lx, ly
                )));
            }
            if ifd_index > 0 {
                let other = parse_pixel_layout(ifd, &values)?;
                if other != pixel {
                    return Err(TiffError::InvalidLevelLayout(format!(
                        "IFD {} has a different pixel layout than the base level",
                        ifd_index
                    )));
                }
            }
            levels.push(level);
        }

        Ok(TiffPyramid {
            header,
            layout,
            levels_x,
            levels_y,
            tile_width,
            tile_height,
            pixel,
            description,
            levels,
        })
    }

    /// Number of stored levels (IFDs).
    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    /// Look up the stored level for `(lx, ly)`.
    ///
    /// A MIP chain resolves any request to `max(lx, ly)`.
    pub fn level(&self, lx: u32, ly: u32) -> Option<&TiffLevel> {
        if lx >= self.levels_x || ly >= self.levels_y {
            return None;
        }
        let index = match self.layout {
            LevelLayout::Single => 0,
            LevelLayout::Mip => lx.max(ly) as usize,
            LevelLayout::Rip => (ly * self.levels_x + lx) as usize,
        };
        self.levels.get(index)
    }

    /// Read the compressed bytes of one tile.
    ///
    /// A zero byte count (a sparse tile) yields an empty buffer.
    pub fn read_raw_tile<R: RangeReader + ?Sized>(
        &self,
        reader: &R,
        level: &TiffLevel,
        tile_x: u32,
        tile_y: u32,
    ) -> Result<Bytes, TiffError> {
        let index = level
            .tile_index(tile_x, tile_y)
            .ok_or_else(|| TiffError::InvalidTagValue {
                tag: "TileOffsets",
                message: format!("tile ({}, {}) out of range", tile_x, tile_y),
            })?;

        let (offset, count) = match (level.tile_offsets.get(index), level.tile_byte_counts.get(index)) {
            (Some(&offset), Some(&count)) => (offset, count),
            _ => {
                return Err(TiffError::InvalidTagValue {
                    tag: "TileOffsets",
                    message: format!("no entry for tile index {}", index),
                })
            }
        };
        if count == 0 {
            return Ok(Bytes::new());
        }

        let len = usize::try_from(count).map_err(|_| TiffError::InvalidTagValue {
            tag: "TileByteCounts",
            message: format!("tile of {} bytes is too large", count),
        })?;
        Ok(reader.read_exact_at(offset, len)?)
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn ifd_dimensions(ifd: &Ifd, byte_order: ByteOrder) -> Result<(u32, u32), TiffError> {
    let width = ifd
        .image_width(byte_order)
        .ok_or(TiffError::MissingTag("ImageWidth"))?;
    let height = ifd
        .image_height(byte_order)
        .ok_or(TiffError::MissingTag("ImageLength"))?;
    if width == 0 || height == 0 {
        return Err(TiffError::InvalidTagValue {
            tag: "ImageWidth",
            message: "image dimensions must be non-zero".to_string(),
        });
    }
    Ok((width, height))
}

/// Decide the layout from the shape of IFD 1 and validate the IFD count.
fn classify_layout(
    ifds: &[Ifd],
    width: u32,
    height: u32,
    byte_order: ByteOrder,
) -> Result<(LevelLayout, u32, u32), TiffError> {
    let count = ifds.len() as u32;
    if count == 1 {
        return Ok((LevelLayout::Single, 1, 1));
    }

    let half_w = (width >> 1).max(1);
    let half_h = (height >> 1).max(1);
    let (w1, h1) = ifd_dimensions(&ifds[1], byte_order)?;

    if (w1, h1) == (half_w, half_h) {
        return Ok((LevelLayout::Mip, count, count));
    }

    if w1 == half_w && h1 == height {
        // The first row ends where the height first changes
        let mut levels_x = 1u32;
        for ifd in ifds.iter().skip(1) {
            let (_, h) = ifd_dimensions(ifd, byte_order)?;
            if h != height {
                break;
            }
            levels_x += 1;
        }
        if count % levels_x != 0 {
            return Err(TiffError::InvalidLevelLayout(format!(
                "{} IFDs cannot form a grid with {} levels per row",
                count, levels_x
            )));
        }
        return Ok((LevelLayout::Rip, levels_x, count / levels_x));
    }

    Err(TiffError::InvalidLevelLayout(format!(
        "second IFD is {}x{}, neither a MIP nor a RIP level of {}x{}",
        w1, h1, width, height
    )))
}

fn read_level<R: RangeReader + ?Sized>(
    ifd: &Ifd,
    ifd_index: usize,
    values: &ValueReader<'_, R>,
    tile_size: (u32, u32),
) -> Result<TiffLevel, TiffError> {
    let byte_order = values.byte_order();
    if ifd.is_stripped() {
        return Err(TiffError::StripOrganization);
    }
    let (width, height) = ifd_dimensions(ifd, byte_order)?;

    let tw = ifd
        .tile_width(byte_order)
        .ok_or(TiffError::MissingTag("TileWidth"))?;
    let th = ifd
        .tile_height(byte_order)
        .ok_or(TiffError::MissingTag("TileLength"))?;
    if (tw, th) != tile_size {
        return Err(TiffError::InvalidLevelLayout(format!(
            "IFD {} uses {}x{} tiles, base level uses {}x{}",
            ifd_index, tw, th, tile_size.0, tile_size.1
        )));
    }

    let tiles_x = width.div_ceil(tw);
    let tiles_y = height.div_ceil(th);
    let expected = tiles_x as usize * tiles_y as usize;

    let offsets_entry = ifd
        .get_entry_by_tag(TiffTag::TileOffsets)
        .ok_or(TiffError::MissingTag("TileOffsets"))?;
    let counts_entry = ifd
        .get_entry_by_tag(TiffTag::TileByteCounts)
        .ok_or(TiffError::MissingTag("TileByteCounts"))?;

    let tile_offsets = values.read_u64_array(offsets_entry)?;
    let tile_byte_counts = values.read_u64_array(counts_entry)?;
    if tile_offsets.len() != expected || tile_byte_counts.len() != expected {
        return Err(TiffError::InvalidTagValue {
            tag: "TileOffsets",
            message: format!(
                "expected {} tiles, found {} offsets and {} byte counts",
                expected,
                tile_offsets.len(),
                tile_byte_counts.len()
            ),
        });
    }

    let jpeg_tables = match ifd.get_entry_by_tag(TiffTag::JpegTables) {
        Some(entry) => Some(values.read_raw_bytes(entry)?),
        None => None,
    };

    Ok(TiffLevel {
        ifd_index,
        width,
        height,
        tiles_x,
        tiles_y,
        tile_offsets,
        tile_byte_counts,
        jpeg_tables,
    })
}

/// Read a per-sample tag (BitsPerSample, SampleFormat) whose values must all agree.
fn uniform_sample_value<R: RangeReader + ?Sized>(
    ifd: &Ifd,
    tag: TiffTag,
    name: &'static str,
    default: u64,
    values: &ValueReader<'_, R>,
) -> Result<u64, TiffError> {
    let Some(entry) = ifd.get_entry_by_tag(tag) else {
        return Ok(default);
    };
    let all = values.read_u64_array(entry)?;
    match all.split_first() {
        None => Ok(default),
        Some((first, rest)) if rest.iter().all(|v| v == first) => Ok(*first),
        Some(_) => Err(TiffError::UnsupportedLayout(format!(
            "{} differs between samples: {:?}",
            name, all
        ))),
    }
}

fn parse_pixel_layout<R: RangeReader + ?Sized>(
    ifd: &Ifd,
    values: &ValueReader<'_, R>,
) -> Result<PixelLayout, TiffError> {
    let byte_order = values.byte_order();

    let compression_raw = ifd.compression(byte_order).unwrap_or(1);
    let compression = Compression::from_u16(compression_raw)
        .ok_or_else(|| TiffError::UnsupportedCompression(format!("code {}", compression_raw)))?;
    if !compression.is_supported() {
        return Err(TiffError::UnsupportedCompression(compression.name().to_string()));
    }

    let samples_per_pixel = ifd
        .get_u32(TiffTag::SamplesPerPixel, byte_order)
        .unwrap_or(1);
    if !(1..=4).contains(&samples_per_pixel) {
        return Err(TiffError::UnsupportedLayout(format!(
            "{} samples per pixel",
            samples_per_pixel
        )));
    }

    let planar = ifd
        .get_u32(TiffTag::PlanarConfiguration, byte_order)
        .unwrap_or(1);
    if planar != 1 && samples_per_pixel > 1 {
        return Err(TiffError::UnsupportedLayout(
            "planar sample storage".to_string(),
        ));
    }

    let bits = uniform_sample_value(ifd, TiffTag::BitsPerSample, "BitsPerSample", 1, values)?;
    let format = uniform_sample_value(ifd, TiffTag::SampleFormat, "SampleFormat", 1, values)?;
    let sample_kind = match (bits, format) {
        (8, 1) => SampleKind::U8,
        (32, 3) => SampleKind::F32,
        _ => {
            return Err(TiffError::UnsupportedLayout(format!(
                "{}-bit samples with SampleFormat {}",
                bits, format
            )))
        }
    };

    if compression == Compression::Jpeg
        && (sample_kind != SampleKind::U8 || !matches!(samples_per_pixel, 1 | 3))
    {
        return Err(TiffError::UnsupportedLayout(
            "JPEG tiles must be 8-bit grey or RGB".to_string(),
        ));
    }

    Ok(PixelLayout {
        samples_per_pixel: samples_per_pixel as u16,
        sample_kind,
        compression,
    })
}
