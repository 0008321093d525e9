//! The texture cache context.
//!
//! A [`TextureContext`] owns everything a rendering session shares:
//!
//! - the tile store and its memory budget
//! - the pool of open file readers
//! - the table of open textures and their handles
//! - the recency clock and statistics
//!
//! Contexts are independent of each other; two contexts never share
//! blocks, handles or counters.
//!
//! # Example
//!
//! ```no_run
//! use texcache::{
//!     CacheConfig, Derivatives, FilterStyle, FsTextureSource, SampleParams, TextureContext,
//!     TextureOptions,
//! };
//!
//! let context = TextureContext::init(CacheConfig::default(), FsTextureSource);
//! let handle = context.open("textures/brick.tif", TextureOptions::default());
//! let sample = context.sample(
//!     handle,
//!     (0.25, 0.75),
//!     &Derivatives::screen(0.001, 0.0, 0.0, 0.001),
//!     FilterStyle::Elliptical,
//!     &SampleParams::default(),
//! );
//! println!("{:?}", sample.color);
//! context.shutdown();
//! ```

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, info, warn};

use crate::config::CacheConfig;
use crate::error::TextureError;

use super::descriptors::FileDescriptorCache;
use super::image::{TextureLookup, TextureOptions, TiledImage};
use super::sampler::{post_process, Derivatives, FilterStyle, Sample, SampleParams, Sampler};
use super::source::{TextureHeader, TextureSource};
use super::stats::{log_report, StatsSnapshot, TextureStats};
use super::store::{GlobalClock, TextureId, TileStore};

// =============================================================================
// CacheCore
// =============================================================================

/// State shared between a context and its open images.
pub(crate) struct CacheCore<S: TextureSource> {
    pub(crate) store: TileStore,
    pub(crate) descriptors: FileDescriptorCache<S>,
    pub(crate) stats: Arc<TextureStats>,
    pub(crate) clock: GlobalClock,
}

impl<S: TextureSource> CacheCore<S> {
    pub(crate) fn new(config: &CacheConfig, source: S) -> Self {
        let stats = Arc::new(TextureStats::new());
        Self {
            store: TileStore::new(
                config.memory_budget(),
                config.eviction_target,
                Arc::clone(&stats),
            ),
            descriptors: FileDescriptorCache::new(source, config.max_open_files),
            stats,
            clock: GlobalClock::default(),
        }
    }

    fn snapshot(&self) -> StatsSnapshot {
        self.stats
            .snapshot(self.store.memory_used(), self.store.budget())
    }
}

// =============================================================================
// Handles
// =============================================================================

/// Opaque reference to an open texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle(u64);

impl TextureHandle {
    /// Returned when an open fails. Sampling it yields the sentinel.
    pub const INVALID: TextureHandle = TextureHandle(0);

    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

/// A texture identity: path plus open options.
type Identity = (PathBuf, TextureOptions);

struct Shared<S: TextureSource> {
    image: Arc<TiledImage<S>>,
    handles: usize,
}

struct Registry<S: TextureSource> {
    handles: HashMap<TextureHandle, (Identity, Arc<TiledImage<S>>)>,
    identities: HashMap<Identity, Shared<S>>,

    /// Paths whose open failure has already been logged
    failed: HashSet<PathBuf>,

    // Monotonic across shutdowns so stale handles never alias
    next_handle: u64,
    next_texture: u64,
}

impl<S: TextureSource> Registry<S> {
    fn new() -> Self {
        Self {
            handles: HashMap::new(),
            identities: HashMap::new(),
            failed: HashSet::new(),
            next_handle: 1,
            next_texture: 1,
        }
    }

    fn issue(&mut self, identity: Identity, image: Arc<TiledImage<S>>) -> TextureHandle {
        let handle = TextureHandle(self.next_handle);
        self.next_handle += 1;
        self.handles.insert(handle, (identity, image));
        handle
    }

    /// Issue another handle for an identity that is already open.
    fn share(&mut self, identity: &Identity) -> Option<TextureHandle> {
        let shared = self.identities.get_mut(identity)?;
        shared.handles += 1;
        let image = Arc::clone(&shared.image);
        Some(self.issue(identity.clone(), image))
    }
}

// =============================================================================
// TextureContext
// =============================================================================

/// A texture cache session.
///
/// All methods take `&self`; a context can be shared between rendering
/// threads behind an `Arc`.
pub struct TextureContext<S: TextureSource> {
    core: Arc<CacheCore<S>>,
    sampler: Sampler,
    registry: RwLock<Registry<S>>,
}

impl<S: TextureSource> TextureContext<S> {
    /// Create a context reading textures through `source`.
    pub fn init(config: CacheConfig, source: S) -> Self {
        info!(
            memory_budget = config.memory_budget(),
            max_open_files = config.max_open_files,
            eviction_target = config.eviction_target,
            max_eccentricity = config.max_eccentricity,
            "Initialised texture cache"
        );
        Self {
            core: Arc::new(CacheCore::new(&config, source)),
            sampler: Sampler::new(config.max_eccentricity),
            registry: RwLock::new(Registry::new()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Registry<S>> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Registry<S>> {
        self.registry.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn source(&self) -> &S {
        self.core.descriptors.source()
    }

    /// Open a texture, sharing the image with earlier opens of the same
    /// path and options.
    ///
    /// # Errors
    /// Fails if the file cannot be opened or is not a supported tiled
    /// texture.
    pub fn try_open(
        &self,
        path: impl AsRef<Path>,
        options: TextureOptions,
    ) -> Result<TextureHandle, TextureError> {
        let path = path.as_ref();
        let identity = (path.to_path_buf(), options);

        let id = {
            let mut registry = self.write();
            if let Some(handle) = registry.share(&identity) {
                return Ok(handle);
            }
            let id = TextureId(registry.next_texture);
            registry.next_texture += 1;
            id
        };

        // Header I/O runs without the registry lock so samplers keep going
        let image = Arc::new(TiledImage::open(id, path, options, Arc::clone(&self.core))?);

        let mut registry = self.write();
        if let Some(handle) = registry.share(&identity) {
            // Another thread opened the same identity meanwhile
            image.release();
            return Ok(handle);
        }
        registry.failed.remove(path);
        registry.identities.insert(
            identity.clone(),
            Shared {
                image: Arc::clone(&image),
                handles: 1,
            },
        );
        Ok(registry.issue(identity, image))
    }

    /// Open a texture, returning [`TextureHandle::INVALID`] on failure.
    ///
    /// The failure is logged once per path.
    pub fn open(&self, path: impl AsRef<Path>, options: TextureOptions) -> TextureHandle {
        let path = path.as_ref();
        match self.try_open(path, options) {
            Ok(handle) => handle,
            Err(e) => {
                if self.write().failed.insert(path.to_path_buf()) {
                    warn!(path = %path.display(), error = %e, "Failed to open texture");
                }
                TextureHandle::INVALID
            }
        }
    }

    /// Close a handle. Closing an invalid or already closed handle is a
    /// no-op. The texture's memory is released with its last handle.
    pub fn close(&self, handle: TextureHandle) {
        let mut registry = self.write();
        let Some((identity, _)) = registry.handles.remove(&handle) else {
            return;
        };

        let last = match registry.identities.get_mut(&identity) {
            Some(shared) => {
                shared.handles -= 1;
                shared.handles == 0
            }
            None => false,
        };
        if last {
            if let Some(shared) = registry.identities.remove(&identity) {
                shared.image.release();
                debug!(
                    texture = shared.image.id().0,
                    path = %identity.0.display(),
                    "Closed texture"
                );
            }
        }
    }

    /// The image behind an open handle.
    pub fn image(&self, handle: TextureHandle) -> Option<Arc<TiledImage<S>>> {
        self.read()
            .handles
            .get(&handle)
            .map(|(_, image)| Arc::clone(image))
    }

    pub fn header(&self, handle: TextureHandle) -> Option<TextureHeader> {
        self.image(handle).map(|image| image.header().clone())
    }

    /// Filter the texture at `uv`.
    ///
    /// Never fails: an invalid or closed handle, or coordinates that are
    /// not finite after the uv transform, yield [`Sample::SENTINEL`].
    /// Texels that cannot be loaded read as transparent black.
    pub fn sample(
        &self,
        handle: TextureHandle,
        uv: (f32, f32),
        derivatives: &Derivatives,
        style: FilterStyle,
        params: &SampleParams,
    ) -> Sample {
        let Some(image) = self.image(handle) else {
            return Sample::SENTINEL;
        };

        let (s, t) = params.transform.apply(uv.0, uv.1);
        if !(s.is_finite() && t.is_finite()) {
            return Sample::SENTINEL;
        }
        let derivatives = params.transform.apply_derivatives(derivatives);
        let filtered = self.sampler.filter(
            image.as_ref(),
            s,
            t,
            &derivatives,
            style,
            params.filter_width,
        );
        self.core.stats.record_sample(filtered.level());

        post_process(filtered.color, image.header().has_alpha, params)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.core.snapshot()
    }

    /// Number of distinct open textures.
    pub fn open_textures(&self) -> usize {
        self.read().identities.len()
    }

    pub fn memory_used(&self) -> usize {
        self.core.store.memory_used()
    }

    /// Log the statistics report, then drop every texture, block, open
    /// file and counter. Outstanding handles become invalid; the context
    /// can be used again afterwards.
    pub fn shutdown(&self) {
        log_report(&self.core.snapshot());

        let mut registry = self.write();
        let textures = registry.identities.len();
        for (_, shared) in registry.identities.drain() {
            shared.image.release();
        }
        registry.handles.clear();
        registry.failed.clear();

        self.core.store.clear();
        self.core.descriptors.clear();
        self.core.stats.reset();
        self.core.clock.reset();
        info!(textures, "Shut down texture cache");
    }
}
