//! Cache behaviour integration tests.
//!
//! Tests verify:
//! - Tile memory never exceeds the budget, and evicted tiles reload
//! - Closing is idempotent and shared identities live until the last close
//! - The number of open files never exceeds the configured limit
//! - Missing and corrupt files degrade to invalid handles

use std::sync::Arc;

use tempfile::TempDir;

use texcache::{
    CacheConfig, Derivatives, FilterStyle, FsTextureSource, Sample, SampleParams, TextureContext,
    TextureHandle, TextureOptions, TextureSource,
};

use super::test_utils::{
    center, coded_texel, fs_context, write_file, CountingSource, Layout, TiffBuilder,
};

fn nearest<S: TextureSource>(
    context: &TextureContext<S>,
    handle: TextureHandle,
    u: f32,
    v: f32,
) -> Sample {
    context.sample(
        handle,
        (u, v),
        &Derivatives::default(),
        FilterStyle::None,
        &SampleParams::default(),
    )
}

fn rgb(texel: [f32; 4]) -> [f32; 3] {
    [texel[0], texel[1], texel[2]]
}

// =============================================================================
// Memory Budget
// =============================================================================

#[test]
fn test_three_tile_eviction_sequence() {
    let dir = TempDir::new().unwrap();
    // 5x5 float RGBA tiles occupy 400 bytes in the cache
    let path = TiffBuilder::new(15, 5)
        .with_tile_size(5, 5)
        .write(dir.path(), "abc.tif", coded_texel);

    let mut config = CacheConfig::with_memory_budget(1000);
    config.eviction_target = 0.5;
    let context = fs_context(config);
    let handle = context.open(&path, TextureOptions::default());
    assert!(handle.is_valid());

    for tile in 0..3 {
        let sample = nearest(&context, handle, center(tile * 5 + 2, 15), 0.5);
        assert_eq!(sample.color, rgb(coded_texel(tile * 5 + 2, 2, 0, 0)));
    }

    let stats = context.stats();
    assert_eq!(stats.tile_loads, 3);
    assert_eq!(stats.evicted_blocks, 1);
    assert_eq!(stats.memory_used, 800);

    // A was evicted and reloads with the right data
    let sample = nearest(&context, handle, center(1, 15), center(4, 5));
    assert_eq!(sample.color, rgb(coded_texel(1, 4, 0, 0)));
    let stats = context.stats();
    assert_eq!(stats.tile_reloads, 1);
    assert!(stats.peak_memory <= 1000);
}

#[test]
fn test_budget_holds_across_a_ripmap_sweep() {
    let dir = TempDir::new().unwrap();
    let path = TiffBuilder::new(64, 32)
        .with_tile_size(8, 8)
        .with_layout(Layout::RipMap)
        .write(dir.path(), "rip.tif", coded_texel);

    // Room for four 1 KiB tiles
    let budget = 4 * 8 * 8 * 16;
    let context = fs_context(CacheConfig::with_memory_budget(budget));
    let handle = context.open(&path, TextureOptions::default());
    let image = context.image(handle).unwrap();

    let header = context.header(handle).unwrap();
    for ly in 0..header.levels_y {
        for lx in 0..header.levels_x {
            let (w, h) = image_level_size(&header, lx, ly);
            for y in (0..h).step_by(3) {
                for x in (0..w).step_by(5) {
                    let texel = texcache::TextureLookup::texel(
                        image.as_ref(),
                        center(x, w),
                        center(y, h),
                        lx,
                        ly,
                    );
                    assert_eq!(
                        [texel.r, texel.g, texel.b, texel.a],
                        coded_texel(x, y, lx, ly)
                    );
                    assert!(context.memory_used() <= budget);
                }
            }
        }
    }

    let stats = context.stats();
    assert!(stats.peak_memory <= budget);
    assert!(stats.eviction_passes > 0);
    assert!(stats.ideal_memory > budget);
    assert_eq!(stats.allocation_failures, 0);
}

fn image_level_size(header: &texcache::TextureHeader, lx: u32, ly: u32) -> (u32, u32) {
    (header.level_width(lx), header.level_height(ly))
}

#[test]
fn test_tile_larger_than_budget_samples_black() {
    let dir = TempDir::new().unwrap();
    let path = TiffBuilder::new(16, 16)
        .with_tile_size(16, 16)
        .write(dir.path(), "big.tif", coded_texel);

    let context = fs_context(CacheConfig::with_memory_budget(1024));
    let handle = context.open(&path, TextureOptions::default());
    let sample = nearest(&context, handle, 0.9, 0.9);
    assert_eq!(sample.color, [0.0; 3]);
    assert_eq!(context.memory_used(), 0);
    assert_eq!(context.stats().allocation_failures, 1);
}

// =============================================================================
// Handle Lifecycle
// =============================================================================

#[test]
fn test_close_twice_is_harmless() {
    let dir = TempDir::new().unwrap();
    let path = TiffBuilder::new(32, 32).write(dir.path(), "t.tif", coded_texel);
    let context = fs_context(CacheConfig::default());

    let handle = context.open(&path, TextureOptions::default());
    nearest(&context, handle, 0.5, 0.5);
    context.close(handle);
    context.close(handle);

    assert_eq!(context.memory_used(), 0);
    assert_eq!(nearest(&context, handle, 0.5, 0.5), Sample::SENTINEL);

    // The path can be opened again afterwards
    let again = context.open(&path, TextureOptions::default());
    assert!(again.is_valid());
    assert_ne!(again, handle);
    assert_eq!(
        nearest(&context, again, center(3, 32), center(30, 32)).color,
        rgb(coded_texel(3, 30, 0, 0))
    );
}

#[test]
fn test_reopen_shares_tiles() {
    let dir = TempDir::new().unwrap();
    let path = TiffBuilder::new(32, 32).write(dir.path(), "t.tif", coded_texel);
    let context = fs_context(CacheConfig::default());

    let first = context.open(&path, TextureOptions::default());
    let second = context.open(&path, TextureOptions::default());
    nearest(&context, first, 0.1, 0.1);
    nearest(&context, second, 0.1, 0.1);
    assert_eq!(context.stats().tile_loads, 1);
    assert_eq!(context.open_textures(), 1);

    context.close(first);
    assert_eq!(nearest(&context, second, 0.1, 0.1).alpha, 1.0);
    assert_eq!(context.stats().tile_loads, 1);

    context.close(second);
    assert_eq!(context.open_textures(), 0);
    assert_eq!(context.memory_used(), 0);
}

#[test]
fn test_open_file_limit_is_never_exceeded() {
    let dir = TempDir::new().unwrap();
    let paths: Vec<_> = (0..5)
        .map(|i| {
            TiffBuilder::new(32, 32)
                .with_tile_size(8, 8)
                .write(dir.path(), &format!("t{}.tif", i), coded_texel)
        })
        .collect();

    let mut config = CacheConfig::default();
    config.max_open_files = 2;
    let context = TextureContext::init(config, CountingSource::new());

    let handles: Vec<_> = paths
        .iter()
        .map(|path| context.open(path, TextureOptions::default()))
        .collect();
    assert!(handles.iter().all(|h| h.is_valid()));

    for round in 0..3u32 {
        for &handle in &handles {
            let x = (round * 9 + 4) % 32;
            let sample = nearest(&context, handle, center(x, 32), center(x, 32));
            assert_eq!(sample.color, rgb(coded_texel(x, x, 0, 0)));
            assert!(context.source().live() <= 2);
        }
    }
    assert!(context.source().peak() <= 2);
    assert!(context.source().opens() > 5);

    for handle in handles {
        context.close(handle);
    }
    assert_eq!(context.source().live(), 0);
}

#[test]
fn test_missing_and_corrupt_files() {
    let dir = TempDir::new().unwrap();
    let junk = write_file(dir.path(), "junk.tif", b"definitely not a tiff file");
    let context = fs_context(CacheConfig::default());

    let missing = context.open(dir.path().join("missing.tif"), TextureOptions::default());
    assert_eq!(missing, TextureHandle::INVALID);
    let corrupt = context.open(&junk, TextureOptions::default());
    assert_eq!(corrupt, TextureHandle::INVALID);

    // Logged once; later opens still fail cleanly
    assert_eq!(
        context.open(&junk, TextureOptions::default()),
        TextureHandle::INVALID
    );
    assert!(context.try_open(&junk, TextureOptions::default()).is_err());

    assert_eq!(nearest(&context, corrupt, 0.5, 0.5), Sample::SENTINEL);
    assert_eq!(context.open_textures(), 0);
    assert_eq!(context.stats().samples, 0);
}

#[test]
fn test_shutdown_then_reuse() {
    let dir = TempDir::new().unwrap();
    let path = TiffBuilder::new(16, 16)
        .with_tile_size(8, 8)
        .write(dir.path(), "t.tif", coded_texel);
    let context = fs_context(CacheConfig::default());

    let handle = context.open(&path, TextureOptions::default());
    nearest(&context, handle, 0.2, 0.2);
    context.shutdown();

    let stats = context.stats();
    assert_eq!(stats.samples, 0);
    assert_eq!(stats.memory_used, 0);
    assert_eq!(stats.open_textures, 0);
    assert_eq!(nearest(&context, handle, 0.2, 0.2), Sample::SENTINEL);
    context.close(handle);

    let handle = context.open(&path, TextureOptions::default());
    assert_eq!(
        nearest(&context, handle, center(9, 16), center(2, 16)).color,
        rgb(coded_texel(9, 2, 0, 0))
    );
    assert_eq!(context.stats().open_textures, 1);
}

#[test]
fn test_independent_contexts() {
    let dir = TempDir::new().unwrap();
    let path = TiffBuilder::new(16, 16).write(dir.path(), "t.tif", coded_texel);

    let a = TextureContext::init(CacheConfig::default(), FsTextureSource);
    let b = TextureContext::init(CacheConfig::default(), FsTextureSource);
    let ha = a.open(&path, TextureOptions::default());
    let hb = b.open(&path, TextureOptions::default());

    nearest(&a, ha, 0.5, 0.5);
    assert_eq!(a.stats().tile_loads, 1);
    assert_eq!(b.stats().tile_loads, 0);

    a.shutdown();
    assert_eq!(nearest(&b, hb, center(1, 16), center(1, 16)).color[0], 1.0);
}

#[test]
fn test_parallel_sampling_under_pressure() {
    let dir = TempDir::new().unwrap();
    let path = TiffBuilder::new(64, 64)
        .with_tile_size(8, 8)
        .with_layout(Layout::MipMap)
        .write(dir.path(), "mip.tif", coded_texel);

    let budget = 6 * 8 * 8 * 16;
    let context = Arc::new(fs_context(CacheConfig::with_memory_budget(budget)));
    let handle = context.open(&path, TextureOptions::default());

    let workers: Vec<_> = (0..4u32)
        .map(|worker| {
            let context = Arc::clone(&context);
            std::thread::spawn(move || {
                for i in 0..300u32 {
                    let x = (i * 11 + worker * 17) % 64;
                    let y = (i * 5 + worker * 3) % 64;
                    let sample = nearest(&*context, handle, center(x, 64), center(y, 64));
                    assert_eq!(sample.color, rgb(coded_texel(x, y, 0, 0)));
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    let stats = context.stats();
    assert!(stats.peak_memory <= budget);
    assert_eq!(stats.samples, 1200);
}
