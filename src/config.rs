//! Configuration for the texture cache and the `texcache` command line.
//!
//! The cache is configured once, at [`TextureContext::init`]. Every option
//! can be given on the command line or through an environment variable
//! with the `TEXCACHE_` prefix:
//!
//! - `TEXCACHE_MEMORY_PAGES` - Tile memory budget in pages (default: 16384)
//! - `TEXCACHE_PAGE_SIZE` - Bytes per page (default: 1024)
//! - `TEXCACHE_MAX_OPEN_FILES` - Open file descriptor cap (default: 512)
//! - `TEXCACHE_EVICTION_TARGET` - Fraction of the budget to drain to on eviction (default: 0.5)
//! - `TEXCACHE_MAX_ECCENTRICITY` - Elliptical filter axis ratio cap (default: 30)
//!
//! [`TextureContext::init`]: crate::TextureContext::init

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::texture::FilterStyle;

// =============================================================================
// Default Values
// =============================================================================

/// Default tile memory budget in pages.
pub const DEFAULT_MEMORY_PAGES: usize = 16384;

/// Default page size in bytes.
pub const DEFAULT_PAGE_SIZE: usize = 1024;

/// Default number of simultaneously open texture files.
pub const DEFAULT_MAX_OPEN_FILES: usize = 512;

/// Default eviction hysteresis: drain to half the budget.
pub const DEFAULT_EVICTION_TARGET: f64 = 0.5;

/// Default cap on the major/minor axis ratio of elliptical footprints.
pub const DEFAULT_MAX_ECCENTRICITY: f32 = 30.0;

// =============================================================================
// Cache Configuration
// =============================================================================

/// Settings consumed once when a texture context is created.
#[derive(Args, Debug, Clone, PartialEq)]
pub struct CacheConfig {
    /// Tile memory budget, in pages.
    #[arg(long, default_value_t = DEFAULT_MEMORY_PAGES, env = "TEXCACHE_MEMORY_PAGES")]
    pub memory_pages: usize,

    /// Size of one page in bytes.
    #[arg(long, default_value_t = DEFAULT_PAGE_SIZE, env = "TEXCACHE_PAGE_SIZE")]
    pub page_size: usize,

    /// Maximum number of texture files held open at once.
    #[arg(long, default_value_t = DEFAULT_MAX_OPEN_FILES, env = "TEXCACHE_MAX_OPEN_FILES")]
    pub max_open_files: usize,

    /// Fraction of the budget eviction drains down to once triggered.
    #[arg(long, default_value_t = DEFAULT_EVICTION_TARGET, env = "TEXCACHE_EVICTION_TARGET")]
    pub eviction_target: f64,

    /// Maximum major/minor axis ratio for elliptical filtering.
    #[arg(long, default_value_t = DEFAULT_MAX_ECCENTRICITY, env = "TEXCACHE_MAX_ECCENTRICITY")]
    pub max_eccentricity: f32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory_pages: DEFAULT_MEMORY_PAGES,
            page_size: DEFAULT_PAGE_SIZE,
            max_open_files: DEFAULT_MAX_OPEN_FILES,
            eviction_target: DEFAULT_EVICTION_TARGET,
            max_eccentricity: DEFAULT_MAX_ECCENTRICITY,
        }
    }
}

impl CacheConfig {
    /// Config with a budget given directly in bytes (one-byte pages).
    pub fn with_memory_budget(bytes: usize) -> Self {
        Self {
            memory_pages: bytes,
            page_size: 1,
            ..Self::default()
        }
    }

    /// Tile memory budget in bytes.
    pub fn memory_budget(&self) -> usize {
        self.memory_pages.saturating_mul(self.page_size)
    }

    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.memory_budget() == 0 {
            return Err("memory budget must be greater than 0".to_string());
        }
        if self.max_open_files == 0 {
            return Err("max_open_files must be greater than 0".to_string());
        }
        if !(self.eviction_target > 0.0 && self.eviction_target <= 1.0) {
            return Err(format!(
                "eviction_target must be in (0, 1], got {}",
                self.eviction_target
            ));
        }
        if !(self.max_eccentricity >= 1.0 && self.max_eccentricity.is_finite()) {
            return Err(format!(
                "max_eccentricity must be at least 1, got {}",
                self.max_eccentricity
            ));
        }
        Ok(())
    }
}

// =============================================================================
// CLI Arguments
// =============================================================================

/// texcache - inspect and sample tiled MIP/RIP-map textures.
#[derive(Parser, Debug, Clone)]
#[command(name = "texcache")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose logging (debug level).
    #[arg(short, long, global = true, default_value_t = false)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Print the header, level grid and wrap modes of a texture
    Info(InfoConfig),

    /// Take one filtered sample and print it with the cache statistics
    Sample(SampleConfig),
}

#[derive(Args, Debug, Clone)]
pub struct InfoConfig {
    /// Texture file
    pub file: PathBuf,

    /// Print JSON instead of text
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

/// Filter style as accepted on the command line.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StyleArg {
    None,
    Box,
    Mipmap,
    Elliptical,
}

impl From<StyleArg> for FilterStyle {
    fn from(style: StyleArg) -> Self {
        match style {
            StyleArg::None => FilterStyle::None,
            StyleArg::Box => FilterStyle::Box,
            StyleArg::Mipmap => FilterStyle::Mipmap,
            StyleArg::Elliptical => FilterStyle::Elliptical,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct SampleConfig {
    /// Texture file
    pub file: PathBuf,

    #[arg(long, allow_hyphen_values = true)]
    pub u: f32,

    #[arg(long, allow_hyphen_values = true)]
    pub v: f32,

    /// dS/dx
    #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
    pub ds_dx: f32,

    /// dS/dy
    #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
    pub ds_dy: f32,

    /// dT/dx
    #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
    pub dt_dx: f32,

    /// dT/dy
    #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
    pub dt_dy: f32,

    #[arg(long, value_enum, default_value_t = StyleArg::Mipmap)]
    pub style: StyleArg,

    /// Scale applied to the footprint before level selection
    #[arg(long, default_value_t = 0.5)]
    pub filter_width: f32,

    /// Print JSON instead of text
    #[arg(long, default_value_t = false)]
    pub json: bool,

    #[command(flatten)]
    pub cache: CacheConfig,
}
