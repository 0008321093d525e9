//! Bounded pool of open texture readers.
//!
//! A texture's reader is opened lazily and may be closed early when the
//! pool is full; the next tile load reopens it. A cache hit does not
//! refresh a handle's position, so eviction follows insertion order.

use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use lru::LruCache;
use tracing::debug;

use crate::error::TextureError;

use super::color::Rgba;
use super::source::{TextureHeader, TextureSource, TileKey, TileReader};
use super::store::TextureId;

/// An open reader. Loads through one handle are serialised.
pub struct FileHandle<R: TileReader> {
    header: TextureHeader,
    reader: Mutex<R>,
}

impl<R: TileReader> FileHandle<R> {
    fn new(reader: R) -> Self {
        Self {
            header: reader.header().clone(),
            reader: Mutex::new(reader),
        }
    }

    pub fn header(&self) -> &TextureHeader {
        &self.header
    }

    pub fn read_tile(&self, key: TileKey, out: &mut [Rgba]) -> Result<(), TextureError> {
        let mut reader = self.reader.lock().unwrap_or_else(PoisonError::into_inner);
        reader.read_tile(key, out)
    }
}

/// Cache of open readers keyed by texture.
///
/// The capacity bounds the readers held by the pool. A reader evicted
/// while a tile load still holds its `Arc` stays open until that load
/// finishes, so a reopen in the meantime briefly gives the texture a
/// second reader and the process one file more than the cap.
pub struct FileDescriptorCache<S: TextureSource> {
    source: S,
    handles: Mutex<LruCache<TextureId, Arc<FileHandle<S::Reader>>>>,
}

impl<S: TextureSource> FileDescriptorCache<S> {
    /// Create a pool holding at most `capacity` open readers.
    ///
    /// A capacity of 0 is treated as 1.
    pub fn new(source: S, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            source,
            handles: Mutex::new(LruCache::new(capacity)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<TextureId, Arc<FileHandle<S::Reader>>>> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Get the reader for `texture`, opening `path` on a miss.
    ///
    /// When the pool is full the oldest handle is dropped from the pool
    /// first. Its file closes once no load is using it.
    pub fn get(
        &self,
        texture: TextureId,
        path: &Path,
    ) -> Result<Arc<FileHandle<S::Reader>>, TextureError> {
        let mut handles = self.lock();
        if let Some(handle) = handles.peek(&texture) {
            return Ok(Arc::clone(handle));
        }

        // Close before opening so the limit holds at every instant
        if handles.len() >= handles.cap().get() {
            if let Some((evicted, _)) = handles.pop_lru() {
                debug!(
                    texture = evicted.0,
                    capacity = handles.cap().get(),
                    "Closed texture file to stay under the open file limit"
                );
            }
        }

        let handle = Arc::new(FileHandle::new(self.source.open(path)?));
        handles.push(texture, Arc::clone(&handle));
        debug!(texture = texture.0, path = %path.display(), "Opened texture file");
        Ok(handle)
    }

    /// Close the reader for `texture`. Closing an absent handle is a no-op.
    pub fn close(&self, texture: TextureId) {
        self.lock().pop(&texture);
    }

    pub fn is_open(&self, texture: TextureId) -> bool {
        self.lock().contains(&texture)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.lock().cap().get()
    }

    /// Close every reader.
    pub fn clear(&self) {
        self.lock().clear();
    }
}
