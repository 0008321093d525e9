//! Tiled TIFF parsing for texture files.
//!
//! # Key Concepts
//!
//! - **Byte order**: TIFF files declare their endianness (II = little-endian,
//!   MM = big-endian) in the header.
//!
//! - **Classic TIFF vs BigTIFF**: 32-bit vs 64-bit offsets. Both are handled.
//!
//! - **IFD (Image File Directory)**: metadata and tile pointers for one
//!   stored image. A texture stores one IFD per resolution level.
//!
//! - **Inline vs offset values**: small values live in the IFD entry, larger
//!   ones at an offset it points to.

mod parser;
mod pyramid;
mod tags;
mod values;

pub use parser::{ByteOrder, Ifd, IfdEntry, TiffHeader, BIGTIFF_HEADER_SIZE, TIFF_HEADER_SIZE};
pub use pyramid::{
    LevelLayout, PixelLayout, SampleKind, TiffLevel, TiffPyramid, MAX_TILE_DIMENSION,
};
pub use tags::{Compression, FieldType, TiffTag};
pub use values::{parse_u64_array, ValueReader};
