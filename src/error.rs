use thiserror::Error;

/// I/O errors that can occur when reading texture files
#[derive(Debug, Clone, Error)]
pub enum IoError {
    /// Error reported by the operating system
    #[error("I/O error: {0}")]
    Os(String),

    /// Requested range exceeds resource bounds
    #[error("Range out of bounds: requested {requested} bytes at offset {offset}, size is {size}")]
    RangeOutOfBounds {
        offset: u64,
        requested: u64,
        size: u64,
    },

    /// File not found
    #[error("File not found: {0}")]
    NotFound(String),
}

impl From<std::io::Error> for IoError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => IoError::NotFound(err.to_string()),
            _ => IoError::Os(err.to_string()),
        }
    }
}

/// Errors that can occur when parsing TIFF files
#[derive(Debug, Clone, Error)]
pub enum TiffError {
    /// I/O error while reading the file
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// Invalid TIFF magic bytes (not II or MM)
    #[error("Invalid TIFF magic bytes: expected 0x4949 (II) or 0x4D4D (MM), got 0x{0:04X}")]
    InvalidMagic(u16),

    /// Invalid TIFF version number
    #[error("Invalid TIFF version: expected 42 (TIFF) or 43 (BigTIFF), got {0}")]
    InvalidVersion(u16),

    /// Invalid BigTIFF offset byte size (must be 8)
    #[error("Invalid BigTIFF offset byte size: expected 8, got {0}")]
    InvalidBigTiffOffsetSize(u16),

    /// File is too small to contain a valid TIFF header
    #[error("File too small: need at least {required} bytes, got {actual}")]
    FileTooSmall { required: u64, actual: u64 },

    /// Invalid IFD offset (points outside file or to invalid location)
    #[error("Invalid IFD offset: {0}")]
    InvalidIfdOffset(u64),

    /// Required tag is missing from IFD
    #[error("Missing required tag: {0}")]
    MissingTag(&'static str),

    /// Tag has unexpected type or count
    #[error("Invalid tag value for {tag}: {message}")]
    InvalidTagValue { tag: &'static str, message: String },

    /// Unsupported compression scheme
    #[error("Unsupported compression: {0} (only uncompressed and JPEG are supported)")]
    UnsupportedCompression(String),

    /// Unsupported sample layout (bit depth, sample format, or planar config)
    #[error("Unsupported pixel layout: {0}")]
    UnsupportedLayout(String),

    /// File uses strips instead of tiles
    #[error("Unsupported organization: file uses strips instead of tiles")]
    StripOrganization,

    /// The IFD chain does not describe a MIP or RIP pyramid
    #[error("Invalid level layout: {0}")]
    InvalidLevelLayout(String),

    /// Unknown field type in IFD entry
    #[error("Unknown field type: {0}")]
    UnknownFieldType(u16),
}

/// Errors surfaced by the texture cache.
///
/// None of these cross the sampling boundary: `TextureContext::sample`
/// turns every failure into the zero sample after logging it.
#[derive(Debug, Clone, Error)]
pub enum TextureError {
    /// Source file missing or unreadable
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// Source file header or tile layout is corrupt or unsupported
    #[error("TIFF error: {0}")]
    Tiff(#[from] TiffError),

    /// Tile payload could not be decoded
    #[error("Failed to decode tile: {message}")]
    Decode { message: String },

    /// Tile memory could not be obtained even after evicting everything evictable
    #[error("Could not allocate {requested} bytes of tile memory (budget {budget} bytes)")]
    AllocationFailure { requested: usize, budget: usize },

    /// The handle is null, closed, or belongs to a shut down context
    #[error("Invalid texture handle")]
    InvalidHandle,
}
