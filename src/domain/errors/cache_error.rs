//! Media cache error types.

use thiserror::Error;

/// Result type for cache operations.
pub type CacheResult<T> = std::result::Result<T, CacheError>;

/// Errors that can occur while resolving a remote image.
///
/// Cloneable so every waiter of a coalesced load receives the same value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// Remote source answered with a non-success status.
    #[error("image not found: {0}")]
    NotFound(String),
    /// Transport failure, timeout, or server-side error.
    #[error("network error: {0}")]
    NetworkError(String),
    /// Bytes are not a decodable image.
    #[error("decode error: {0}")]
    DecodeError(String),
    /// The URL cannot be turned into a cache key.
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    /// I/O error in the persistent tier.
    #[error("io error: {0}")]
    IoError(String),
}

impl CacheError {
    /// Returns true if a later fetch of the same key may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::NetworkError(_) | Self::IoError(_))
    }

    /// Maps a non-success HTTP status to an error kind.
    ///
    /// Server errors count as transport failures; everything else means the
    /// resource is absent.
    #[must_use]
    pub fn from_status(status: u16, url: &str) -> Self {
        if (500..600).contains(&status) {
            Self::NetworkError(format!("HTTP {status} for {url}"))
        } else {
            Self::NotFound(format!("HTTP {status} for {url}"))
        }
    }
}
