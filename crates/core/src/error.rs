/// Top-level error type. All public API functions return this.
#[derive(Debug, thiserror::Error)]
pub enum EpubError {
    #[error("Corrupt archive: {0}")]
    CorruptArchive(String),

    #[error("Invalid EPUB: {0}")]
    InvalidEpub(String),

    #[error("Chapter file not found: {href}")]
    ChapterNotFound { index: usize, href: String },

    #[error("Chapter index {index} is out of range (spine has {len} items)")]
    OutOfRange { index: usize, len: usize },

    #[error("Another load or navigation is already in progress")]
    Busy,

    #[error("No book is loaded")]
    NoBookLoaded,

    #[error("Failed to decode {path}: {detail}")]
    Decode { path: String, detail: String },

    #[error("Security violation: {0}")]
    Security(#[from] SecurityError),
}

impl EpubError {
    /// Whether the session can keep going after this error (the open book stays usable).
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            EpubError::ChapterNotFound { .. } | EpubError::OutOfRange { .. } | EpubError::Busy
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SecurityError {
    #[error("ZIP bomb detected: decompression ratio {ratio}:1 exceeds limit {limit}:1")]
    ZipBomb { ratio: u64, limit: u64 },

    #[error("Path traversal detected in archive entry: {path}")]
    PathTraversal { path: String },

    #[error("Archive contains {count} files, exceeding limit of {limit}")]
    TooManyFiles { count: u64, limit: u64 },

    #[error("Resource {name} is {size_mb}MB, exceeding limit of {limit_mb}MB")]
    OversizedResource {
        name: String,
        size_mb: u64,
        limit_mb: u64,
    },

    #[error("DRM protected file ({drm_type})")]
    DrmProtected { drm_type: String },
}
