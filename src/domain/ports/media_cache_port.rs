//! Port definition for the shared media cache.

use async_trait::async_trait;
use tokio::task::JoinHandle;

use crate::domain::entities::{ImageHandle, Priority};
use crate::domain::errors::CacheResult;

/// Per-URL outcome of a prefetch.
pub type PrefetchOutcome = (String, CacheResult<()>);

/// Handle to a background prefetch.
///
/// Dropping the handle detaches the work; awaiting [`PrefetchHandle::join`]
/// yields the outcome of every URL in request order.
#[derive(Debug, Default)]
pub struct PrefetchHandle {
    task: Option<JoinHandle<Vec<PrefetchOutcome>>>,
}

impl PrefetchHandle {
    /// Wraps a spawned prefetch task.
    #[must_use]
    pub const fn new(task: JoinHandle<Vec<PrefetchOutcome>>) -> Self {
        Self { task: Some(task) }
    }

    /// Handle for a prefetch with nothing to do.
    #[must_use]
    pub const fn empty() -> Self {
        Self { task: None }
    }

    /// Waits for the prefetch to finish.
    pub async fn join(self) -> Vec<PrefetchOutcome> {
        match self.task {
            Some(task) => task.await.unwrap_or_default(),
            None => Vec::new(),
        }
    }
}

/// Port for resolving remote images through the cache.
/// Implementations must be thread-safe.
#[async_trait]
pub trait MediaCachePort: Send + Sync {
    /// Resolves `url` to a decoded image, loading it at most once.
    async fn fetch(&self, url: &str, priority: Priority) -> CacheResult<ImageHandle>;

    /// Warms the cache at low priority without blocking.
    fn prefetch(&self, urls: Vec<String>) -> PrefetchHandle;

    /// Drops every cached copy of `url` and cancels its in-flight load.
    async fn invalidate(&self, url: &str);
}
