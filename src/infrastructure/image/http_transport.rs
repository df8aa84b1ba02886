//! HTTP transport backed by reqwest.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::domain::errors::{CacheError, CacheResult};
use crate::domain::ports::{ImageTransport, TransportResponse};

/// Default request timeout.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Plain GET-by-URL retrieval over HTTP.
#[derive(Debug, Clone)]
pub struct HttpImageTransport {
    client: reqwest::Client,
}

impl HttpImageTransport {
    /// Creates a transport with the given request timeout.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be built.
    pub fn new(timeout_secs: u64) -> CacheResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| CacheError::NetworkError(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Wraps an existing client.
    #[must_use]
    pub const fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ImageTransport for HttpImageTransport {
    async fn get(&self, url: &str) -> CacheResult<TransportResponse> {
        debug!(url = %url, "Downloading image from network");

        let response = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "image/*")
            .send()
            .await
            .map_err(|e| CacheError::NetworkError(format!("Request failed: {e}")))?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            return Ok(TransportResponse::status(status));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| CacheError::NetworkError(format!("Failed to read body: {e}")))?;

        Ok(TransportResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_creation() {
        assert!(HttpImageTransport::new(DEFAULT_TIMEOUT_SECS).is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_host_is_network_error() {
        let transport = HttpImageTransport::new(1).unwrap();
        let result = transport.get("http://127.0.0.1:9/a.jpg").await;
        assert!(matches!(result, Err(CacheError::NetworkError(_))));
    }
}
