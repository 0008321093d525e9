//! Cache statistics.
//!
//! Counters are plain atomics updated from the sampling hot path with
//! relaxed ordering; they are diagnostics, not synchronisation.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use serde::Serialize;
use tracing::info;

/// Number of buckets in the level histogram. The last bucket collects
/// every level at or above it.
pub const LEVEL_HISTOGRAM_BUCKETS: usize = 14;

#[derive(Debug, Default)]
pub struct TextureStats {
    samples: AtomicU64,
    texel_accesses: AtomicU64,
    tile_loads: AtomicU64,
    tile_reloads: AtomicU64,
    bytes_loaded: AtomicU64,
    ideal_memory: AtomicUsize,
    peak_memory: AtomicUsize,
    eviction_passes: AtomicU64,
    evicted_blocks: AtomicU64,
    open_textures: AtomicUsize,
    peak_textures: AtomicUsize,
    allocation_failures: AtomicU64,
    io_errors: AtomicU64,
    levels: [AtomicU64; LEVEL_HISTOGRAM_BUCKETS],
}

/// A point-in-time copy of the statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub samples: u64,
    pub texel_accesses: u64,
    pub tile_loads: u64,
    pub tile_reloads: u64,
    pub bytes_loaded: u64,

    /// Memory needed to hold every tile ever loaded without evicting
    pub ideal_memory: usize,
    pub memory_used: usize,
    pub memory_budget: usize,
    pub peak_memory: usize,
    pub eviction_passes: u64,
    pub evicted_blocks: u64,
    pub open_textures: usize,
    pub peak_textures: usize,
    pub allocation_failures: u64,
    pub io_errors: u64,
    pub level_histogram: [u64; LEVEL_HISTOGRAM_BUCKETS],
}

impl StatsSnapshot {
    /// Fraction of texel accesses that needed a tile load.
    pub fn miss_rate(&self) -> f64 {
        if self.texel_accesses == 0 {
            0.0
        } else {
            (self.tile_loads + self.tile_reloads) as f64 / self.texel_accesses as f64
        }
    }
}

impl TextureStats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_sample(&self, level: f32) {
        self.samples.fetch_add(1, Ordering::Relaxed);
        let bucket = if level.is_finite() && level > 0.0 {
            (level as usize).min(LEVEL_HISTOGRAM_BUCKETS - 1)
        } else {
            0
        };
        self.levels[bucket].fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_access(&self) {
        self.texel_accesses.fetch_add(1, Ordering::Relaxed);
    }

    /// A tile was decoded into the cache. `first` is false when the block
    /// had been loaded before and evicted.
    pub fn record_load(&self, bytes: usize, first: bool) {
        if first {
            self.tile_loads.fetch_add(1, Ordering::Relaxed);
            self.ideal_memory.fetch_add(bytes, Ordering::Relaxed);
        } else {
            self.tile_reloads.fetch_add(1, Ordering::Relaxed);
        }
        self.bytes_loaded.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_memory(&self, used: usize) {
        self.peak_memory.fetch_max(used, Ordering::Relaxed);
    }

    pub fn record_eviction(&self, blocks: usize) {
        self.eviction_passes.fetch_add(1, Ordering::Relaxed);
        self.evicted_blocks.fetch_add(blocks as u64, Ordering::Relaxed);
    }

    pub fn record_allocation_failure(&self) {
        self.allocation_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_io_error(&self) {
        self.io_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn texture_opened(&self) {
        let open = self.open_textures.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak_textures.fetch_max(open, Ordering::Relaxed);
    }

    pub fn texture_closed(&self) {
        // Saturates at zero
        let _ = self
            .open_textures
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    pub fn snapshot(&self, memory_used: usize, memory_budget: usize) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            samples: load(&self.samples),
            texel_accesses: load(&self.texel_accesses),
            tile_loads: load(&self.tile_loads),
            tile_reloads: load(&self.tile_reloads),
            bytes_loaded: load(&self.bytes_loaded),
            ideal_memory: self.ideal_memory.load(Ordering::Relaxed),
            memory_used,
            memory_budget,
            peak_memory: self.peak_memory.load(Ordering::Relaxed),
            eviction_passes: load(&self.eviction_passes),
            evicted_blocks: load(&self.evicted_blocks),
            open_textures: self.open_textures.load(Ordering::Relaxed),
            peak_textures: self.peak_textures.load(Ordering::Relaxed),
            allocation_failures: load(&self.allocation_failures),
            io_errors: load(&self.io_errors),
            level_histogram: std::array::from_fn(|i| load(&self.levels[i])),
        }
    }

    pub fn reset(&self) {
        for counter in [
            &self.samples,
            &self.texel_accesses,
            &self.tile_loads,
            &self.tile_reloads,
            &self.bytes_loaded,
            &self.eviction_passes,
            &self.evicted_blocks,
            &self.allocation_failures,
            &self.io_errors,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        for counter in [
            &self.ideal_memory,
            &self.peak_memory,
            &self.open_textures,
            &self.peak_textures,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        for bucket in &self.levels {
            bucket.store(0, Ordering::Relaxed);
        }
    }
}

/// Log a statistics report.
pub fn log_report(snapshot: &StatsSnapshot) {
    const MIB: f64 = 1024.0 * 1024.0;

    info!(
        samples = snapshot.samples,
        texel_accesses = snapshot.texel_accesses,
        tile_loads = snapshot.tile_loads,
        tile_reloads = snapshot.tile_reloads,
        miss_rate = format!("{:.4}", snapshot.miss_rate()),
        "Texture cache accesses"
    );
    info!(
        transferred_mib = format!("{:.2}", snapshot.bytes_loaded as f64 / MIB),
        peak_mib = format!("{:.2}", snapshot.peak_memory as f64 / MIB),
        budget_mib = format!("{:.2}", snapshot.memory_budget as f64 / MIB),
        ideal_mib = format!("{:.2}", snapshot.ideal_memory as f64 / MIB),
        eviction_passes = snapshot.eviction_passes,
        evicted_blocks = snapshot.evicted_blocks,
        "Texture cache memory"
    );
    info!(
        peak_textures = snapshot.peak_textures,
        allocation_failures = snapshot.allocation_failures,
        io_errors = snapshot.io_errors,
        levels = ?snapshot.level_histogram,
        "Texture cache files"
    );
}
