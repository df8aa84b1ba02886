//! Normalized resource keys.

use std::sync::Arc;

use reqwest::Url;

use crate::domain::errors::{CacheError, CacheResult};

/// Normalized URL identifying one remote image.
///
/// Scheme and host are lowercased, the fragment is dropped and the query is
/// kept as given. Cloning is cheap.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(Arc<str>);

impl CacheKey {
    /// Parses and normalizes a URL.
    ///
    /// Relative references such as `/uploads/a.jpg` are resolved against
    /// `base` when one is given.
    ///
    /// # Errors
    /// Returns `InvalidUrl` if the input is empty, relative without a base,
    /// or not an http(s) URL with a host.
    pub fn parse(raw: &str, base: Option<&Url>) -> CacheResult<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(CacheError::InvalidUrl("empty url".to_string()));
        }

        let mut url = match (Url::parse(raw), base) {
            (Ok(url), _) => url,
            (Err(_), Some(base)) if !raw.contains("://") => base
                .join(raw)
                .map_err(|e| CacheError::InvalidUrl(format!("{raw}: {e}")))?,
            (Err(e), _) => return Err(CacheError::InvalidUrl(format!("{raw}: {e}"))),
        };

        if !matches!(url.scheme(), "http" | "https") {
            return Err(CacheError::InvalidUrl(format!(
                "unsupported scheme {}: {raw}",
                url.scheme()
            )));
        }
        if url.host_str().is_none_or(str::is_empty) {
            return Err(CacheError::InvalidUrl(format!("missing host: {raw}")));
        }

        url.set_fragment(None);
        Ok(Self(Arc::from(url.as_str())))
    }

    /// Returns the normalized URL.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Stable file name stem derived from a hash of the normalized URL.
    #[must_use]
    pub fn file_stem(&self) -> String {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(self.0.as_bytes());
        let result = hasher.finalize();
        hex::encode(&result[..16])
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
