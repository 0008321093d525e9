//! Bounded tile memory.
//!
//! The store owns every decoded tile buffer and keeps the total number of
//! bytes under a fixed budget. Block metadata lives in an arena addressed
//! by [`BlockId`]; a block's data is dropped on eviction while its
//! metadata stays with the owning texture so the next access can reload
//! it. Slots return to a free list when their texture is released.
//!
//! # Eviction
//!
//! Filled blocks are tracked in an unordered set. When a reservation would
//! push usage over the budget, the filled blocks are sorted by recency
//! stamp and freed oldest first until usage drops to
//! `budget * eviction_target` and the reservation fits. Draining below the
//! budget keeps the next similar reservation from evicting again.
//!
//! # Lock order
//!
//! Callers may hold an image index lock when calling in. The store mutex
//! is taken next, and block data locks last.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use tracing::{debug, error};

use crate::error::TextureError;

use super::color::Rgba;
use super::source::TileKey;
use super::stats::TextureStats;

/// Stable arena slot index.
pub type BlockId = usize;

/// Process-unique id of an open texture. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub u64);

/// Key of a block: the texture plus the tile within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockKey {
    pub texture: TextureId,
    pub tile: TileKey,
}

// =============================================================================
// GlobalClock
// =============================================================================

/// Context-wide recency counter.
#[derive(Debug, Default)]
pub struct GlobalClock(AtomicU64);

impl GlobalClock {
    /// Advance the clock and return the new stamp. Stamps start at 1.
    #[inline]
    pub fn tick(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn now(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.0.store(0, Ordering::Relaxed);
    }
}

// =============================================================================
// Block
// =============================================================================

/// Metadata and (possibly absent) pixel data for one tile.
///
/// `data` is `Some` exactly when its size is counted in the store's usage.
/// It is only ever set to a fully written buffer.
#[derive(Debug)]
pub struct Block {
    id: BlockId,
    key: BlockKey,
    stamp: AtomicU64,

    /// Bytes this block has counted against the budget
    size: AtomicUsize,
    loads: AtomicU32,

    /// Set when the owning texture is released; the block is dead
    detached: AtomicBool,

    data: RwLock<Option<Arc<[Rgba]>>>,

    /// Serialises loads of this block
    load_lock: Mutex<()>,
}

impl Block {
    fn new(id: BlockId, key: BlockKey) -> Self {
        Self {
            id,
            key,
            stamp: AtomicU64::new(0),
            size: AtomicUsize::new(0),
            loads: AtomicU32::new(0),
            detached: AtomicBool::new(false),
            data: RwLock::new(None),
            load_lock: Mutex::new(()),
        }
    }

    pub fn id(&self) -> BlockId {
        self.id
    }

    pub fn key(&self) -> BlockKey {
        self.key
    }

    pub fn stamp(&self) -> u64 {
        self.stamp.load(Ordering::Relaxed)
    }

    /// Record an access.
    #[inline]
    pub fn touch(&self, clock: &GlobalClock) {
        self.stamp.store(clock.tick(), Ordering::Relaxed);
    }

    /// Number of times data has been published into this block.
    pub fn load_count(&self) -> u32 {
        self.loads.load(Ordering::Relaxed)
    }

    pub fn is_resident(&self) -> bool {
        read(&self.data).is_some()
    }

    pub fn data(&self) -> Option<Arc<[Rgba]>> {
        read(&self.data).clone()
    }

    /// Read one texel, `None` if the data is not resident.
    #[inline]
    pub fn texel(&self, index: usize) -> Option<Rgba> {
        read(&self.data)
            .as_ref()
            .map(|data| data.get(index).copied().unwrap_or(Rgba::ZERO))
    }

    /// Take the per-block load lock.
    pub fn lock_for_load(&self) -> MutexGuard<'_, ()> {
        self.load_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drop the data and return the bytes it had counted.
    fn free_data(&self) -> usize {
        *write(&self.data) = None;
        self.size.swap(0, Ordering::Relaxed)
    }
}

// =============================================================================
// TileStore
// =============================================================================

struct StoreState {
    blocks: Vec<Arc<Block>>,
    free: Vec<BlockId>,
    filled: HashSet<BlockId>,
    owned: HashMap<TextureId, Vec<BlockId>>,
    memory_used: usize,
    allocation_failure_logged: bool,
}

impl StoreState {
    fn new() -> Self {
        Self {
            blocks: Vec::new(),
            free: Vec::new(),
            filled: HashSet::new(),
            owned: HashMap::new(),
            memory_used: 0,
            allocation_failure_logged: false,
        }
    }

    /// Free filled blocks oldest first, skipping `keep`, while `pressure`
    /// holds. Returns the number of blocks evicted.
    fn evict(&mut self, keep: Option<BlockId>, mut pressure: impl FnMut(usize) -> bool) -> usize {
        let mut candidates: Vec<(u64, BlockId)> = self
            .filled
            .iter()
            .filter(|&&id| Some(id) != keep)
            .map(|&id| (self.blocks[id].stamp(), id))
            .collect();
        candidates.sort_unstable();

        let mut evicted = 0;
        for (_, id) in candidates {
            if !pressure(self.memory_used) {
                break;
            }
            let freed = self.blocks[id].free_data();
            self.memory_used -= freed;
            self.filled.remove(&id);
            evicted += 1;
        }
        evicted
    }
}

/// Owner of all decoded tile memory.
pub struct TileStore {
    state: Mutex<StoreState>,
    budget: usize,
    eviction_target: f64,
    stats: Arc<TextureStats>,
}

impl TileStore {
    /// Create a store with a budget in bytes.
    ///
    /// `eviction_target` is the fraction of the budget eviction drains to.
    pub fn new(budget: usize, eviction_target: f64, stats: Arc<TextureStats>) -> Self {
        Self {
            state: Mutex::new(StoreState::new()),
            budget,
            eviction_target: eviction_target.clamp(0.0, 1.0),
            stats,
        }
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    pub fn memory_used(&self) -> usize {
        self.lock().memory_used
    }

    /// Number of blocks currently holding data.
    pub fn resident_blocks(&self) -> usize {
        self.lock().filled.len()
    }

    /// Number of arena slots ever created.
    pub fn arena_len(&self) -> usize {
        self.lock().blocks.len()
    }

    /// Start tracking blocks for a texture.
    pub fn register(&self, texture: TextureId) {
        self.lock().owned.entry(texture).or_default();
    }

    /// Get a fresh, empty block for `tile` of `texture`.
    ///
    /// Returns `None` if the texture is not registered (never opened, or
    /// already released), so a late lookup cannot leak blocks.
    pub fn acquire(&self, texture: TextureId, tile: TileKey) -> Option<Arc<Block>> {
        let mut state = self.lock();
        if !state.owned.contains_key(&texture) {
            return None;
        }

        let key = BlockKey { texture, tile };
        let id = match state.free.pop() {
            Some(id) => {
                state.blocks[id] = Arc::new(Block::new(id, key));
                id
            }
            None => {
                let id = state.blocks.len();
                state.blocks.push(Arc::new(Block::new(id, key)));
                id
            }
        };
        let block = Arc::clone(&state.blocks[id]);
        if let Some(list) = state.owned.get_mut(&texture) {
            list.push(id);
        }
        Some(block)
    }

    /// Reserve `size` bytes for `block` before its buffer is filled.
    ///
    /// Evicts least recently stamped blocks if the reservation would exceed
    /// the budget. After this returns, usage is within the budget.
    ///
    /// # Errors
    /// - `AllocationFailure` if `size` cannot fit even after evicting every
    ///   other block (reported once per store lifetime)
    /// - `InvalidHandle` if the block's texture has been released
    pub fn reserve(&self, block: &Block, size: usize) -> Result<(), TextureError> {
        let mut state = self.lock();
        if block.detached.load(Ordering::Relaxed) {
            return Err(TextureError::InvalidHandle);
        }

        if state.memory_used + size > self.budget {
            let budget = self.budget;
            let target = (budget as f64 * self.eviction_target) as usize;
            let evicted = state.evict(Some(block.id), |used| {
                used > target || used + size > budget
            });
            if evicted > 0 {
                self.stats.record_eviction(evicted);
                debug!(
                    evicted,
                    memory_used = state.memory_used,
                    budget,
                    "Evicted tile blocks"
                );
            }
        }

        if state.memory_used + size > self.budget {
            self.stats.record_allocation_failure();
            if !state.allocation_failure_logged {
                state.allocation_failure_logged = true;
                error!(
                    requested = size,
                    budget = self.budget,
                    memory_used = state.memory_used,
                    "Texture cache cannot allocate a tile within its memory budget"
                );
            }
            return Err(TextureError::AllocationFailure {
                requested: size,
                budget: self.budget,
            });
        }

        state.memory_used += size;
        block.size.fetch_add(size, Ordering::Relaxed);
        self.stats.record_memory(state.memory_used);
        Ok(())
    }

    /// Undo a reservation whose buffer could not be filled.
    pub fn cancel(&self, block: &Block) {
        let mut state = self.lock();
        if block.detached.load(Ordering::Relaxed) || block.is_resident() {
            return;
        }
        let size = block.size.swap(0, Ordering::Relaxed);
        state.memory_used -= size;
    }

    /// Install a fully written buffer into a reserved block.
    ///
    /// Returns `false` (dropping the buffer) if the texture was released in
    /// the meantime.
    pub fn publish(&self, block: &Block, data: Arc<[Rgba]>) -> bool {
        let mut state = self.lock();
        if block.detached.load(Ordering::Relaxed) {
            return false;
        }
        *write(&block.data) = Some(data);
        block.loads.fetch_add(1, Ordering::Relaxed);
        state.filled.insert(block.id);
        true
    }

    /// Free every block of a texture and recycle its slots.
    pub fn release(&self, texture: TextureId) {
        let mut state = self.lock();
        let Some(ids) = state.owned.remove(&texture) else {
            return;
        };

        let mut freed_bytes = 0;
        for &id in &ids {
            let block = Arc::clone(&state.blocks[id]);
            block.detached.store(true, Ordering::Relaxed);
            freed_bytes += block.free_data();
            state.filled.remove(&id);
        }
        state.memory_used -= freed_bytes;
        state.free.extend(ids.iter().copied());

        debug!(
            texture = texture.0,
            blocks = ids.len(),
            freed_bytes,
            "Released texture blocks"
        );
    }

    /// Drop every block and forget every texture.
    pub fn clear(&self) {
        let mut state = self.lock();
        for block in &state.blocks {
            block.detached.store(true, Ordering::Relaxed);
            block.free_data();
        }
        *state = StoreState::new();
    }
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
