//! Texture cache and filtered sampling.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │             TextureContext              │
//! │  (handles, identities, lifecycle)       │
//! └───────────┬─────────────────┬───────────┘
//!             │                 │
//!             ▼                 ▼
//! ┌─────────────────────┐   ┌───────────────┐
//! │      Sampler        │──▶│  TiledImage   │
//! │ (none/box/mip/EWA)  │   │ (wrap, texel) │
//! └─────────────────────┘   └───────┬───────┘
//!                                   │
//!                  ┌────────────────┴─────────────┐
//!                  ▼                              ▼
//!        ┌───────────────────┐        ┌────────────────────────┐
//!        │    TileStore      │        │  FileDescriptorCache   │
//!        │ (budget, evict)   │        │ (bounded open readers) │
//!        └───────────────────┘        └───────────┬────────────┘
//!                                                 │
//!                                                 ▼
//!                                     ┌────────────────────────┐
//!                                     │ TextureSource /        │
//!                                     │ TileReader             │
//!                                     └────────────────────────┘
//! ```

mod color;
mod context;
mod descriptors;
mod image;
mod sampler;
mod source;
mod stats;
mod store;
mod wrap;

#[cfg(test)]
pub(crate) mod testing;

pub use color::Rgba;
pub use context::{TextureContext, TextureHandle};
pub use descriptors::{FileDescriptorCache, FileHandle};
pub use self::image::{TextureLookup, TextureOptions, TiledImage};
pub use sampler::{
    isotropic_lods, post_process, Derivatives, EllipseFootprint, Filtered, FilterStyle, Sample,
    SampleParams, Sampler, UvTransform, DEFAULT_FILTER_WIDTH, MAX_ELLIPSE_EXTENT, WEIGHT_LUT_SIZE,
};
pub use source::{FsTextureSource, LevelMode, TextureHeader, TextureSource, TileKey, TileReader};
pub use stats::{log_report, StatsSnapshot, TextureStats, LEVEL_HISTOGRAM_BUCKETS};
pub use store::{Block, BlockId, BlockKey, GlobalClock, TextureId, TileStore};
pub use wrap::{parse_wrap_hint, ForcedWrap, UnknownWrapMode, WrapMode};
