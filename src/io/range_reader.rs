use bytes::Bytes;

use crate::error::IoError;

/// Trait for reading byte ranges from a texture file.
///
/// The TIFF parser only ever asks for the header, the IFDs, the tile
/// offset arrays and individual tiles, so textures are never read whole.
/// Readers are used from one thread at a time (the descriptor cache
/// serialises access per handle) but must be `Send` so handles can move
/// between render worker threads.
pub trait RangeReader: Send + Sync {
    /// Read exactly `len` bytes starting at `offset`.
    ///
    /// Returns an error if the range is out of bounds or if the read fails.
    fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError>;

    /// Get the total size of the resource in bytes.
    fn size(&self) -> u64;

    /// Get a unique identifier for this resource (used in log messages).
    fn identifier(&self) -> &str;
}

/// A range reader over bytes that are already in memory.
///
/// Used for textures embedded in a scene file and throughout the tests.
#[derive(Debug, Clone)]
pub struct MemoryRangeReader {
    data: Bytes,
    identifier: String,
}

impl MemoryRangeReader {
    pub fn new(data: impl Into<Bytes>, identifier: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            identifier: identifier.into(),
        }
    }
}

impl RangeReader for MemoryRangeReader {
    fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        let size = self.data.len() as u64;
        let end = offset.checked_add(len as u64).filter(|&end| end <= size);
        match end {
            Some(end) => Ok(self.data.slice(offset as usize..end as usize)),
            None => Err(IoError::RangeOutOfBounds {
                offset,
                requested: len as u64,
                size,
            }),
        }
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}
