//! # texcache
//!
//! A texture cache and filtered sampler for offline rendering.
//!
//! Textures are tiled, multi-resolution TIFF files. Tiles are decoded
//! lazily on first access and held in a store with a fixed memory
//! budget; the least recently used tiles are evicted when it fills.
//!
//! ## Features
//!
//! - **Bounded memory**: tile data never exceeds the configured budget
//! - **MIP and RIP maps**: independent X/Y levels for anisotropic footprints
//! - **Filters**: nearest, bilinear, trilinear mipmap and elliptical (EWA)
//! - **Wrap modes**: clamp, periodic, mirror and black, per axis
//! - **Bounded open files**: readers are pooled and reopened on demand
//!
//! ## Architecture
//!
//! - [`io`] - Positioned byte reads from files and memory
//! - [`mod@format`] - TIFF pyramid parsing and tile decoding
//! - [`texture`] - Tile store, images, sampler and the cache context
//! - [`config`] - Cache settings and CLI types
//!
//! ## Example
//!
//! ```rust,no_run
//! use texcache::{
//!     CacheConfig, Derivatives, FilterStyle, FsTextureSource, SampleParams, TextureContext,
//!     TextureOptions,
//! };
//!
//! let context = TextureContext::init(CacheConfig::default(), FsTextureSource);
//! let handle = context.open("wood.tif", TextureOptions::default());
//! let sample = context.sample(
//!     handle,
//!     (0.5, 0.5),
//!     &Derivatives::screen(0.002, 0.0, 0.0, 0.002),
//!     FilterStyle::Mipmap,
//!     &SampleParams::default(),
//! );
//! assert!(sample.alpha >= 0.0);
//! context.close(handle);
//! ```

pub mod config;
pub mod error;
pub mod format;
pub mod io;
pub mod texture;

// Re-export commonly used types
pub use config::{CacheConfig, Cli, Command, InfoConfig, SampleConfig, StyleArg};
pub use error::{IoError, TextureError, TiffError};
pub use format::tiff::{LevelLayout, PixelLayout, SampleKind, TiffPyramid};
pub use format::TiffTextureReader;
pub use io::{FileRangeReader, MemoryRangeReader, RangeReader};
pub use texture::{
    Derivatives, FilterStyle, ForcedWrap, FsTextureSource, LevelMode, Rgba, Sample, SampleParams,
    StatsSnapshot, TextureContext, TextureHandle, TextureHeader, TextureLookup, TextureOptions,
    TextureSource, TileKey, TileReader, UvTransform, WrapMode,
};
