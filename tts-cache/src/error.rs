use thiserror::Error;

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors that can occur against the variant cache, grounded on
/// `dog_blob::error::BlobError` and trimmed to what a content-addressed,
/// no-multipart store can actually raise.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("variant not found: {0}")]
    NotFound(String),

    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CacheError {
    pub fn not_found(variant_hash: impl Into<String>) -> Self {
        Self::NotFound(variant_hash.into())
    }
}
