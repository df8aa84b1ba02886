//! Port for raw image retrieval.

use async_trait::async_trait;
use bytes::Bytes;

use crate::domain::errors::CacheResult;

/// Raw answer of a GET-by-URL retrieval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    /// HTTP status code.
    pub status: u16,
    /// Undecoded response body.
    pub body: Bytes,
}

impl TransportResponse {
    /// Creates a 200 response.
    #[must_use]
    pub fn ok(body: impl Into<Bytes>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }

    /// Creates an empty response with the given status.
    #[must_use]
    pub const fn status(status: u16) -> Self {
        Self {
            status,
            body: Bytes::new(),
        }
    }

    /// Returns true for 2xx statuses.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

/// Port for fetching image bytes from the remote source.
///
/// Transport failures, including timeouts, are reported as `NetworkError`.
/// Non-success statuses are returned as responses, not errors.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ImageTransport: Send + Sync {
    /// Performs a GET for `url`.
    async fn get(&self, url: &str) -> CacheResult<TransportResponse>;
}
