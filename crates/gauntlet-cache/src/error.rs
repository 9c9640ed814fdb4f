//! Cache error types
//!
//! Lookups never fail: a missing or unreadable record is a miss. These
//! errors only surface from [`ResultCache::try_store`](crate::ResultCache::try_store)
//! and [`ResultCache::clear`](crate::ResultCache::clear).

use std::path::PathBuf;

/// Result alias for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;

/// Why a record could not be written or removed
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Filesystem failure
    #[error("cache I/O failed at {path}: {source}")]
    Io {
        /// File or directory involved
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// The record could not be encoded
    #[error("cache record could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),
}

impl CacheError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Why a fingerprint could not be computed or parsed
#[derive(Debug, thiserror::Error)]
pub enum FingerprintError {
    /// The value has no JSON form
    #[error("value cannot be fingerprinted: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Not hex
    #[error("invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),

    /// Hex of the wrong length
    #[error("fingerprint must be 32 bytes, got {0}")]
    InvalidLength(usize),
}
