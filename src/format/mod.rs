//! On-disk texture container support.
//!
//! Textures are tiled TIFF files with one IFD per resolution level, laid
//! out either as a MIP chain or a RIP grid (see [`tiff::TiffPyramid`]).
//! Tiles are stored uncompressed (8-bit or float) or as JPEG.

pub mod jpeg;
mod texture_file;
pub mod tiff;

pub use jpeg::{decode_tile_jpeg, is_abbreviated_stream, merge_jpeg_tables, prepare_tile_jpeg};
pub use texture_file::TiffTextureReader;
