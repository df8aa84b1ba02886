//! Coalescing image cache.
//!
//! Resolves a URL through three tiers: Memory -> Disk -> Network. Every key
//! has at most one load in flight; later callers attach to it as waiters and
//! all of them receive the same outcome. Network retrievals share a bounded
//! number of slots handed out by [`FetchScheduler`], normal priority first.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::future::join_all;
use parking_lot::Mutex;
use reqwest::Url;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::{debug, info, trace, warn};

use crate::domain::entities::{CacheKey, ImageHandle, ImageSource, Priority, Tier};
use crate::domain::errors::{CacheError, CacheResult};
use crate::domain::ports::{ImageTransport, MediaCachePort, PrefetchHandle};
use crate::infrastructure::config::CacheConfig;

use super::decoder::decode_blocking;
use super::disk_cache::DiskImageCache;
use super::http_transport::HttpImageTransport;
use super::memory_cache::MemoryImageCache;
use super::scheduler::{FetchScheduler, TicketId};

type Outcome = CacheResult<ImageHandle>;

/// A load shared by every caller of one key.
struct InFlightRequest {
    generation: u64,
    priority: Priority,
    waiters: usize,
    ticket: Option<TicketId>,
    outcome: watch::Receiver<Option<Outcome>>,
    task: Option<AbortHandle>,
}

impl InFlightRequest {
    fn cancel(self, scheduler: &FetchScheduler) {
        if let Some(ticket) = self.ticket {
            scheduler.cancel(ticket);
        }
        if let Some(task) = self.task {
            task.abort();
        }
    }
}

/// Tables guarded by the cache lock.
struct CacheState {
    memory: MemoryImageCache,
    in_flight: HashMap<CacheKey, InFlightRequest>,
    /// Keys whose persistent copy is being evicted, with the number of
    /// invalidations still running. Loads started meanwhile bypass the disk.
    invalidating: HashMap<CacheKey, usize>,
}

/// Marks a key as invalidating until dropped.
struct InvalidationMark<'a> {
    inner: &'a Inner,
    key: &'a CacheKey,
}

impl<'a> InvalidationMark<'a> {
    fn set(inner: &'a Inner, state: &mut CacheState, key: &'a CacheKey) -> Self {
        *state.invalidating.entry(key.clone()).or_default() += 1;
        Self { inner, key }
    }
}

impl Drop for InvalidationMark<'_> {
    fn drop(&mut self) {
        let mut state = self.inner.state.lock();
        if let Some(count) = state.invalidating.get_mut(self.key) {
            *count -= 1;
            if *count == 0 {
                state.invalidating.remove(self.key);
            }
        }
    }
}

struct Inner {
    state: Mutex<CacheState>,
    disk: Arc<DiskImageCache>,
    transport: Arc<dyn ImageTransport>,
    scheduler: Arc<FetchScheduler>,
    base_url: Option<Url>,
    max_dimension: u32,
    next_generation: AtomicU64,
    network_retrievals: AtomicU64,
}

enum Attachment {
    Ready(ImageHandle),
    Waiting(Waiter),
}

/// One caller waiting on an in-flight load.
///
/// Dropping it before the load finishes removes the caller; the last one out
/// cancels the load.
struct Waiter {
    inner: Arc<Inner>,
    key: CacheKey,
    generation: u64,
    rx: watch::Receiver<Option<Outcome>>,
}

impl Waiter {
    /// Returns `None` if the load was cancelled before producing an outcome.
    async fn wait(mut self) -> Option<Outcome> {
        match self.rx.wait_for(Option::is_some).await {
            Ok(value) => (*value).clone(),
            Err(_) => None,
        }
    }
}

impl Drop for Waiter {
    fn drop(&mut self) {
        self.inner.detach(&self.key, self.generation);
    }
}

/// Snapshot of cache counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    /// Memory-tier hits.
    pub hits: u64,
    /// Memory-tier misses.
    pub misses: u64,
    /// Entries evicted from the memory tier for budget.
    pub evictions: u64,
    /// Retrievals issued to the transport.
    pub network_retrievals: u64,
    /// Entries in the memory tier.
    pub memory_entries: usize,
    /// Bytes held by the memory tier.
    pub memory_bytes: usize,
    /// Memory-tier byte budget.
    pub memory_budget: usize,
    /// Loads currently in flight.
    pub in_flight: usize,
    /// Files in the persistent tier.
    pub disk_entries: usize,
    /// Bytes held by the persistent tier.
    pub disk_bytes: u64,
}

impl CacheStats {
    /// Hit rate as a percentage.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total > 0 {
            (self.hits as f64 / total as f64) * 100.0
        } else {
            0.0
        }
    }
}

impl std::fmt::Display for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Cache: {} images ({}/{} bytes), {:.1}% hit rate ({} hits, {} misses), {} downloads, {} on disk",
            self.memory_entries,
            self.memory_bytes,
            self.memory_budget,
            self.hit_rate(),
            self.hits,
            self.misses,
            self.network_retrievals,
            self.disk_entries
        )
    }
}

/// Process-wide image cache. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct ResourceCache {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ResourceCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceCache")
            .field("base_url", &self.inner.base_url)
            .field("max_dimension", &self.inner.max_dimension)
            .field("scheduler", &self.inner.scheduler)
            .finish_non_exhaustive()
    }
}

impl ResourceCache {
    /// Creates a cache over the given transport and persistent tier.
    ///
    /// When called inside a tokio runtime, a persistent-tier sweep is started
    /// in the background.
    ///
    /// # Errors
    /// Returns `InvalidUrl` if the configured base URL cannot be parsed.
    pub fn new(
        config: &CacheConfig,
        transport: Arc<dyn ImageTransport>,
        disk: Arc<DiskImageCache>,
    ) -> CacheResult<Self> {
        let base_url = config
            .base_url
            .as_deref()
            .map(|raw| {
                Url::parse(raw).map_err(|e| CacheError::InvalidUrl(format!("base url {raw}: {e}")))
            })
            .transpose()?;

        let inner = Arc::new(Inner {
            state: Mutex::new(CacheState {
                memory: MemoryImageCache::new(config.memory_budget_bytes),
                in_flight: HashMap::new(),
                invalidating: HashMap::new(),
            }),
            disk,
            transport,
            scheduler: FetchScheduler::new(config.max_concurrent_fetches),
            base_url,
            max_dimension: config.max_dimension,
            next_generation: AtomicU64::new(0),
            network_retrievals: AtomicU64::new(0),
        });

        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let disk = inner.disk.clone();
            runtime.spawn(async move { disk.maintain().await });
        }

        info!(
            memory_budget = config.memory_budget_bytes,
            max_concurrent_fetches = inner.scheduler.capacity(),
            "Resource cache ready"
        );

        Ok(Self { inner })
    }

    /// Creates a cache with an HTTP transport and the configured disk tier.
    ///
    /// # Errors
    /// Returns error if the disk tier or HTTP client cannot be created.
    pub async fn from_config(config: &CacheConfig) -> CacheResult<Self> {
        let disk = Arc::new(
            DiskImageCache::new(
                config.effective_disk_dir(),
                config.disk_budget_bytes,
                config.disk_max_age(),
            )
            .await?,
        );
        let transport = Arc::new(HttpImageTransport::new(config.timeout_secs)?);
        Self::new(config, transport, disk)
    }

    /// Normalizes a URL into a cache key.
    ///
    /// # Errors
    /// Returns `InvalidUrl` if the URL cannot be normalized.
    pub fn key_for(&self, url: &str) -> CacheResult<CacheKey> {
        CacheKey::parse(url, self.inner.base_url.as_ref())
    }

    /// Resolves `url` to a decoded image.
    ///
    /// Served from memory when resident; otherwise joins or starts the single
    /// load for the key. Cancelling the returned future only removes this
    /// caller.
    ///
    /// # Errors
    /// Returns `NotFound`, `NetworkError`, `DecodeError` or `InvalidUrl`.
    pub async fn fetch(&self, url: &str, priority: Priority) -> CacheResult<ImageHandle> {
        let key = self.key_for(url)?;
        loop {
            let waiter = match self.inner.attach(&key, priority) {
                Attachment::Ready(image) => return Ok(image),
                Attachment::Waiting(waiter) => waiter,
            };
            if let Some(outcome) = waiter.wait().await {
                return outcome;
            }
            debug!(key = %key, "In-flight load cancelled, restarting");
        }
    }

    /// Warms the cache with `urls` at low priority without blocking.
    ///
    /// Keys already in memory are skipped. Outcomes are available through
    /// the returned handle; dropping it discards them.
    pub fn prefetch<I, S>(&self, urls: I) -> PrefetchHandle
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let urls: Vec<String> = urls.into_iter().map(Into::into).collect();
        if urls.is_empty() {
            return PrefetchHandle::empty();
        }

        let cache = self.clone();
        PrefetchHandle::new(tokio::spawn(async move {
            let loads = urls.into_iter().map(|url| {
                let cache = cache.clone();
                async move {
                    let result = cache.prefetch_one(&url).await;
                    if let Err(e) = &result {
                        trace!(url = %url, error = %e, "Prefetch failed");
                    }
                    (url, result)
                }
            });
            join_all(loads).await
        }))
    }

    async fn prefetch_one(&self, url: &str) -> CacheResult<()> {
        let key = self.key_for(url)?;
        if self.inner.state.lock().memory.contains(&key) {
            return Ok(());
        }
        self.fetch(url, Priority::Low).await.map(|_| ())
    }

    /// Removes every cached copy of `url` and cancels its in-flight load.
    ///
    /// Callers waiting on the cancelled load restart it instead of failing.
    pub async fn invalidate(&self, url: &str) {
        let Ok(key) = self.key_for(url) else {
            return;
        };

        let (mark, cancelled) = {
            let mut state = self.inner.state.lock();
            state.memory.remove(&key);
            let mark = InvalidationMark::set(&self.inner, &mut state, &key);
            let cancelled = state.in_flight.remove(&key).map(|request| {
                let waiters = request.waiters;
                request.cancel(&self.inner.scheduler);
                waiters
            });
            (mark, cancelled)
        };
        self.inner.disk.evict(&key).await;
        drop(mark);

        debug!(key = %key, cancelled_waiters = cancelled.unwrap_or(0), "Invalidated image");
    }

    /// Returns the tier currently holding `url`, memory first.
    pub async fn tier_of(&self, url: &str) -> Option<Tier> {
        let key = self.key_for(url).ok()?;
        if self.inner.state.lock().memory.contains(&key) {
            return Some(Tier::Memory);
        }
        if self.inner.disk.contains(&key).await {
            return Some(Tier::Persistent);
        }
        None
    }

    /// Drops the memory tier. The persistent tier is kept.
    pub fn handle_memory_pressure(&self) {
        let dropped = self.inner.state.lock().memory.clear();
        info!(dropped, "Purged memory tier under memory pressure");
    }

    /// Sweeps the persistent tier for expired and excess files.
    pub async fn maintain_persistent_tier(&self) {
        self.inner.disk.maintain().await;
    }

    /// Clears all caches.
    pub async fn clear_all(&self) {
        self.inner.state.lock().memory.clear();
        if let Err(e) = self.inner.disk.clear().await {
            warn!(error = %e, "Failed to clear disk cache");
        }
        info!("Cleared all image caches");
    }

    /// Returns cache statistics.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let state = self.inner.state.lock();
        CacheStats {
            hits: state.memory.hits(),
            misses: state.memory.misses(),
            evictions: state.memory.evictions(),
            network_retrievals: self.inner.network_retrievals.load(Ordering::Relaxed),
            memory_entries: state.memory.len(),
            memory_bytes: state.memory.used_bytes(),
            memory_budget: state.memory.budget_bytes(),
            in_flight: state.in_flight.len(),
            disk_entries: self.inner.disk.len(),
            disk_bytes: self.inner.disk.current_size(),
        }
    }
}

impl Inner {
    /// Serves from memory or attaches to the key's load, starting it if needed.
    fn attach(self: &Arc<Self>, key: &CacheKey, priority: Priority) -> Attachment {
        let mut state = self.state.lock();
        if let Some(image) = state.memory.get(key) {
            return Attachment::Ready(image);
        }

        // A closed channel means the load task died without completing.
        if let Some(request) = state.in_flight.get_mut(key)
            && request.outcome.has_changed().is_ok()
        {
            request.waiters += 1;
            if priority > request.priority {
                request.priority = priority;
                if let Some(ticket) = request.ticket {
                    self.scheduler.promote(ticket);
                }
                debug!(key = %key, priority = %priority, "Promoted in-flight load");
            }
            trace!(key = %key, waiters = request.waiters, "Joined in-flight load");
            return Attachment::Waiting(Waiter {
                inner: self.clone(),
                key: key.clone(),
                generation: request.generation,
                rx: request.outcome.clone(),
            });
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let skip_disk = state.invalidating.contains_key(key);
        let (tx, rx) = watch::channel(None);
        let task = tokio::spawn(self.clone().run(key.clone(), generation, skip_disk, tx));
        state.in_flight.insert(
            key.clone(),
            InFlightRequest {
                generation,
                priority,
                waiters: 1,
                ticket: None,
                outcome: rx.clone(),
                task: Some(task.abort_handle()),
            },
        );
        trace!(key = %key, priority = %priority, skip_disk, "Started load");

        Attachment::Waiting(Waiter {
            inner: self.clone(),
            key: key.clone(),
            generation,
            rx,
        })
    }

    /// Removes one waiter; the last one cancels the load.
    fn detach(&self, key: &CacheKey, generation: u64) {
        let mut state = self.state.lock();
        let Some(request) = state.in_flight.get_mut(key) else {
            return;
        };
        if request.generation != generation {
            return;
        }

        request.waiters = request.waiters.saturating_sub(1);
        if request.waiters == 0
            && let Some(request) = state.in_flight.remove(key)
        {
            request.cancel(&self.scheduler);
            debug!(key = %key, "Last waiter left, cancelled load");
        }
    }

    /// Background task driving one load to completion.
    async fn run(
        self: Arc<Self>,
        key: CacheKey,
        generation: u64,
        skip_disk: bool,
        tx: watch::Sender<Option<Outcome>>,
    ) {
        let Some((outcome, source)) = self.load(&key, generation, skip_disk).await else {
            return;
        };

        let mut state = self.state.lock();
        if !state
            .in_flight
            .get(&key)
            .is_some_and(|r| r.generation == generation)
        {
            return;
        }
        state.in_flight.remove(&key);

        match &outcome {
            Ok(image) => {
                state.memory.insert(key.clone(), image.clone(), source);
                debug!(
                    key = %key,
                    source = %source,
                    width = image.width(),
                    height = image.height(),
                    "Image loaded"
                );
            }
            Err(e) => debug!(key = %key, error = %e, "Image load failed"),
        }
        tx.send_replace(Some(outcome));
    }

    /// Disk first, then a network slot. `None` means the load was cancelled.
    async fn load(
        &self,
        key: &CacheKey,
        generation: u64,
        skip_disk: bool,
    ) -> Option<(Outcome, ImageSource)> {
        let cached = if skip_disk {
            None
        } else {
            self.disk.get_bytes(key).await
        };
        if let Some(bytes) = cached {
            match decode_blocking(Bytes::from(bytes), self.max_dimension).await {
                Ok(image) => return Some((Ok(image), ImageSource::DiskCache)),
                Err(e) => {
                    warn!(key = %key, error = %e, "Discarding undecodable disk cache entry");
                    self.disk.evict(key).await;
                }
            }
        }

        let admission = {
            let mut state = self.state.lock();
            let request = state
                .in_flight
                .get_mut(key)
                .filter(|r| r.generation == generation)?;
            let admission = self.scheduler.admit(request.priority);
            request.ticket = admission.ticket();
            admission
        };
        let permit = admission.wait().await?;

        {
            let mut state = self.state.lock();
            let request = state
                .in_flight
                .get_mut(key)
                .filter(|r| r.generation == generation)?;
            request.ticket = None;
        }

        self.network_retrievals.fetch_add(1, Ordering::Relaxed);
        let body = self.retrieve(key).await;
        drop(permit);

        let bytes = match body {
            Ok(bytes) => bytes,
            Err(e) => return Some((Err(e), ImageSource::Network)),
        };

        let outcome = decode_blocking(bytes.clone(), self.max_dimension).await;
        if outcome.is_ok()
            && let Err(e) = self.disk.put_bytes(key, &bytes).await
        {
            warn!(key = %key, error = %e, "Failed to cache to disk");
        }
        Some((outcome, ImageSource::Network))
    }

    async fn retrieve(&self, key: &CacheKey) -> CacheResult<Bytes> {
        let response = self.transport.get(key.as_str()).await?;
        if !response.is_success() {
            return Err(CacheError::from_status(response.status, key.as_str()));
        }
        Ok(response.body)
    }
}

#[async_trait]
impl MediaCachePort for ResourceCache {
    async fn fetch(&self, url: &str, priority: Priority) -> CacheResult<ImageHandle> {
        Self::fetch(self, url, priority).await
    }

    fn prefetch(&self, urls: Vec<String>) -> PrefetchHandle {
        Self::prefetch(self, urls)
    }

    async fn invalidate(&self, url: &str) {
        Self::invalidate(self, url).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use mockall::predicate::eq;
    use tempfile::{TempDir, tempdir};
    use test_case::test_case;

    use crate::domain::ports::mocks::{ScriptedTransport, png_bytes};
    use crate::domain::ports::{MockImageTransport, TransportResponse};

    const A: &str = "https://img.example.com/listings/a.png";
    const B: &str = "https://img.example.com/listings/b.png";
    const C: &str = "https://img.example.com/listings/c.png";
    const D: &str = "https://img.example.com/listings/d.png";

    struct Fixture {
        cache: ResourceCache,
        transport: Arc<ScriptedTransport>,
        disk: Arc<DiskImageCache>,
        _dir: TempDir,
    }

    fn config() -> CacheConfig {
        CacheConfig {
            max_concurrent_fetches: 1,
            ..CacheConfig::default()
        }
    }

    async fn fixture_with(config: &CacheConfig, transport: ScriptedTransport) -> Fixture {
        let dir = tempdir().unwrap();
        let disk = Arc::new(
            DiskImageCache::new(
                dir.path().to_path_buf(),
                config.disk_budget_bytes,
                config.disk_max_age(),
            )
            .await
            .unwrap(),
        );
        let transport = Arc::new(transport);
        let cache = ResourceCache::new(config, transport.clone(), disk.clone()).unwrap();
        Fixture {
            cache,
            transport,
            disk,
            _dir: dir,
        }
    }

    async fn fixture() -> Fixture {
        fixture_with(&config(), ScriptedTransport::new()).await
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..500 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("condition not reached");
    }

    fn waiters(cache: &ResourceCache, url: &str) -> usize {
        let key = cache.key_for(url).unwrap();
        cache
            .inner
            .state
            .lock()
            .in_flight
            .get(&key)
            .map_or(0, |r| r.waiters)
    }

    #[tokio::test]
    async fn test_concurrent_fetches_share_one_retrieval() {
        let f = fixture().await;
        f.transport.respond_png(A, 8, 8);

        let results = join_all((0..5).map(|_| f.cache.fetch(A, Priority::Normal))).await;

        assert_eq!(f.transport.calls_for(A), 1);
        let first = results[0].as_ref().unwrap();
        for result in &results {
            assert!(Arc::ptr_eq(first, result.as_ref().unwrap()));
        }
    }

    #[test_case(404 ; "missing")]
    #[test_case(500 ; "server_error")]
    #[tokio::test]
    async fn test_concurrent_failures_share_one_error(status: u16) {
        let f = fixture().await;
        f.transport.respond(A, Ok(TransportResponse::status(status)));

        let results = join_all((0..2).map(|_| f.cache.fetch(A, Priority::Normal))).await;

        assert_eq!(f.transport.calls_for(A), 1);
        for result in results {
            let err = result.unwrap_err();
            assert_eq!(matches!(err, CacheError::NetworkError(_)), status >= 500);
            assert_eq!(matches!(err, CacheError::NotFound(_)), status < 500);
        }

        f.transport.respond_png(A, 2, 2);
        assert!(f.cache.fetch(A, Priority::Normal).await.is_ok());
        assert_eq!(f.transport.calls_for(A), 2);
    }

    #[tokio::test]
    async fn test_second_fetch_served_from_memory() {
        let f = fixture().await;
        f.transport.respond_png(A, 4, 4);

        let first = f.cache.fetch(A, Priority::Normal).await.unwrap();
        let second = f.cache.fetch(A, Priority::Low).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(f.transport.total_calls(), 1);
        assert_eq!(f.cache.tier_of(A).await, Some(Tier::Memory));

        let stats = f.cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.network_retrievals, 1);
    }

    #[tokio::test]
    async fn test_memory_pressure_falls_back_to_disk() {
        let f = fixture().await;
        f.transport.respond_png(A, 6, 3);

        let first = f.cache.fetch(A, Priority::Normal).await.unwrap();
        f.cache.handle_memory_pressure();
        assert_eq!(f.cache.stats().memory_entries, 0);
        assert_eq!(f.cache.tier_of(A).await, Some(Tier::Persistent));

        let second = f.cache.fetch(A, Priority::Normal).await.unwrap();

        assert_eq!(f.transport.total_calls(), 1);
        assert_eq!((second.width(), second.height()), (6, 3));
        assert_eq!(first.pixels(), second.pixels());
        assert_eq!(f.cache.tier_of(A).await, Some(Tier::Memory));
    }

    #[tokio::test]
    async fn test_memory_budget_holds_and_evicted_entries_stay_on_disk() {
        // Each 64x64 RGBA image is 16 KiB; the budget fits two.
        let config = CacheConfig {
            memory_budget_bytes: 40_000,
            ..config()
        };
        let f = fixture_with(&config, ScriptedTransport::new()).await;
        for url in [A, B, C, D] {
            f.transport.respond_png(url, 64, 64);
            f.cache.fetch(url, Priority::Normal).await.unwrap();
            assert!(f.cache.stats().memory_bytes <= 40_000);
        }

        let stats = f.cache.stats();
        assert_eq!(stats.memory_entries, 2);
        assert_eq!(stats.evictions, 2);
        assert_eq!(f.cache.tier_of(A).await, Some(Tier::Persistent));
        assert_eq!(f.cache.tier_of(D).await, Some(Tier::Memory));

        f.cache.fetch(A, Priority::Normal).await.unwrap();
        assert_eq!(f.transport.calls_for(A), 1);
    }

    #[tokio::test]
    async fn test_oversized_image_served_but_not_retained() {
        let config = CacheConfig {
            memory_budget_bytes: 100,
            ..config()
        };
        let f = fixture_with(&config, ScriptedTransport::new()).await;
        f.transport.respond_png(A, 16, 16);

        let image = f.cache.fetch(A, Priority::Normal).await.unwrap();

        assert_eq!(image.byte_size(), 16 * 16 * 4);
        assert_eq!(f.cache.stats().memory_bytes, 0);
        assert_eq!(f.cache.tier_of(A).await, Some(Tier::Persistent));
    }

    #[test_case(404, false ; "missing")]
    #[test_case(403, false ; "forbidden")]
    #[test_case(500, true ; "server_error")]
    #[test_case(503, true ; "unavailable")]
    #[tokio::test]
    async fn test_status_errors_are_not_cached(status: u16, retryable: bool) {
        let f = fixture().await;
        f.transport.respond(A, Ok(TransportResponse::status(status)));

        let err = f.cache.fetch(A, Priority::Normal).await.unwrap_err();
        assert_eq!(err.is_retryable(), retryable);
        assert_eq!(f.cache.tier_of(A).await, None);

        f.transport.respond_png(A, 2, 2);
        assert!(f.cache.fetch(A, Priority::Normal).await.is_ok());
        assert_eq!(f.transport.calls_for(A), 2);
    }

    #[tokio::test]
    async fn test_transport_failure_is_network_error() {
        let f = fixture().await;
        f.transport
            .respond(A, Err(CacheError::NetworkError("connection reset".into())));

        let result = f.cache.fetch(A, Priority::Normal).await;

        assert!(matches!(result, Err(CacheError::NetworkError(_))));
        assert_eq!(f.cache.stats().in_flight, 0);
    }

    #[tokio::test]
    async fn test_undecodable_body_is_decode_error() {
        let f = fixture().await;
        f.transport
            .respond(A, Ok(TransportResponse::ok(&b"<html>not an image</html>"[..])));

        let result = f.cache.fetch(A, Priority::Normal).await;

        assert!(matches!(result, Err(CacheError::DecodeError(_))));
        assert_eq!(f.cache.tier_of(A).await, None);
    }

    #[test_case("" ; "empty")]
    #[test_case("not a url" ; "garbage")]
    #[test_case("ftp://img.example.com/a.png" ; "unsupported_scheme")]
    #[tokio::test]
    async fn test_invalid_url_rejected_without_retrieval(url: &str) {
        let f = fixture().await;

        let result = f.cache.fetch(url, Priority::Normal).await;

        assert!(matches!(result, Err(CacheError::InvalidUrl(_))));
        assert_eq!(f.transport.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_relative_url_resolved_against_base() {
        let config = CacheConfig {
            base_url: Some("https://img.example.com/listings/".into()),
            ..config()
        };
        let f = fixture_with(&config, ScriptedTransport::new()).await;
        f.transport.respond_png(A, 2, 2);

        f.cache.fetch("a.png", Priority::Normal).await.unwrap();
        f.cache.fetch(A, Priority::Normal).await.unwrap();

        assert_eq!(f.transport.call_order(), vec![A.to_string()]);
    }

    #[test]
    fn test_invalid_base_url_rejected() {
        let dir = tempdir().unwrap();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let disk = runtime
            .block_on(DiskImageCache::new(
                dir.path().to_path_buf(),
                1024,
                Duration::from_secs(60),
            ))
            .unwrap();
        let config = CacheConfig {
            base_url: Some("::nope::".into()),
            ..config()
        };

        let result = ResourceCache::new(
            &config,
            Arc::new(ScriptedTransport::new()),
            Arc::new(disk),
        );

        assert!(matches!(result, Err(CacheError::InvalidUrl(_))));
    }

    #[tokio::test]
    async fn test_corrupt_disk_entry_refetched_from_network() {
        let f = fixture().await;
        let key = f.cache.key_for(A).unwrap();
        f.disk.put_bytes(&key, b"truncated").await.unwrap();
        f.transport.respond_png(A, 3, 3);

        let image = f.cache.fetch(A, Priority::Normal).await.unwrap();

        assert_eq!(image.width(), 3);
        assert_eq!(f.transport.calls_for(A), 1);
        let repaired = f.disk.get_bytes(&key).await.unwrap();
        assert!(image::load_from_memory(&repaired).is_ok());
    }

    #[tokio::test]
    async fn test_failed_prefetch_retried_by_later_fetch() {
        let f = fixture().await;
        f.transport.respond(A, Ok(TransportResponse::status(503)));

        let outcomes = f.cache.prefetch([A]).join().await;
        assert_eq!(outcomes.len(), 1);
        assert!(matches!(outcomes[0].1, Err(CacheError::NetworkError(_))));

        f.transport.respond_png(A, 2, 2);
        assert!(f.cache.fetch(A, Priority::Normal).await.is_ok());
        assert_eq!(f.transport.calls_for(A), 2);
    }

    #[tokio::test]
    async fn test_prefetch_skips_resident_and_reports_each_url() {
        let f = fixture().await;
        f.transport.respond_png(A, 2, 2);
        f.transport.respond_png(B, 2, 2);
        f.cache.fetch(A, Priority::Normal).await.unwrap();

        let outcomes = f.cache.prefetch([A, B, "bad url"]).join().await;

        let urls: Vec<_> = outcomes.iter().map(|(url, _)| url.as_str()).collect();
        assert_eq!(urls, vec![A, B, "bad url"]);
        assert!(outcomes[0].1.is_ok());
        assert!(outcomes[1].1.is_ok());
        assert!(matches!(outcomes[2].1, Err(CacheError::InvalidUrl(_))));
        assert_eq!(f.transport.calls_for(A), 1);
        assert_eq!(f.cache.tier_of(B).await, Some(Tier::Memory));
    }

    #[tokio::test]
    async fn test_empty_prefetch_is_noop() {
        let f = fixture().await;
        let outcomes = f.cache.prefetch(Vec::<String>::new()).join().await;
        assert!(outcomes.is_empty());
    }

    #[tokio::test]
    async fn test_normal_priority_retrieved_before_queued_prefetch() {
        let (transport, gate) = ScriptedTransport::gated();
        let f = fixture_with(&config(), transport).await;
        for url in [A, B, C] {
            f.transport.respond_png(url, 2, 2);
        }

        let blocker = tokio::spawn({
            let cache = f.cache.clone();
            async move { cache.fetch(A, Priority::Normal).await }
        });
        f.transport.wait_for_calls(1).await;

        let prefetch = f.cache.prefetch([B]);
        wait_until(|| f.cache.inner.scheduler.queued() == 1).await;
        let visible = tokio::spawn({
            let cache = f.cache.clone();
            async move { cache.fetch(C, Priority::Normal).await }
        });
        wait_until(|| f.cache.inner.scheduler.queued() == 2).await;

        gate.add_permits(3);
        blocker.await.unwrap().unwrap();
        visible.await.unwrap().unwrap();
        prefetch.join().await;

        assert_eq!(f.transport.call_order(), vec![A, C, B]);
    }

    #[tokio::test]
    async fn test_normal_fetch_promotes_queued_prefetch() {
        let (transport, gate) = ScriptedTransport::gated();
        let f = fixture_with(&config(), transport).await;
        for url in [A, B, C] {
            f.transport.respond_png(url, 2, 2);
        }

        let blocker = tokio::spawn({
            let cache = f.cache.clone();
            async move { cache.fetch(A, Priority::Normal).await }
        });
        f.transport.wait_for_calls(1).await;

        let prefetch = f.cache.prefetch([B, C]);
        wait_until(|| f.cache.inner.scheduler.queued() == 2).await;
        let promoted = tokio::spawn({
            let cache = f.cache.clone();
            async move { cache.fetch(C, Priority::Normal).await }
        });
        wait_until(|| waiters(&f.cache, C) == 2).await;

        gate.add_permits(3);
        blocker.await.unwrap().unwrap();
        promoted.await.unwrap().unwrap();
        prefetch.join().await;

        assert_eq!(f.transport.call_order(), vec![A, C, B]);
        assert_eq!(f.transport.calls_for(C), 1);
    }

    #[tokio::test]
    async fn test_cancelled_waiter_leaves_load_running() {
        let (transport, gate) = ScriptedTransport::gated();
        let f = fixture_with(&config(), transport).await;
        f.transport.respond_png(A, 2, 2);

        let spawn_fetch = || {
            let cache = f.cache.clone();
            tokio::spawn(async move { cache.fetch(A, Priority::Normal).await })
        };
        let cancelled = spawn_fetch();
        let kept = spawn_fetch();
        wait_until(|| waiters(&f.cache, A) == 2).await;

        cancelled.abort();
        assert!(cancelled.await.unwrap_err().is_cancelled());
        assert_eq!(waiters(&f.cache, A), 1);

        gate.add_permits(1);
        assert!(kept.await.unwrap().is_ok());
        assert_eq!(f.transport.calls_for(A), 1);
    }

    #[tokio::test]
    async fn test_last_waiter_cancels_load() {
        let (transport, gate) = ScriptedTransport::gated();
        let f = fixture_with(&config(), transport).await;
        f.transport.respond_png(A, 2, 2);

        let fetch = tokio::spawn({
            let cache = f.cache.clone();
            async move { cache.fetch(A, Priority::Normal).await }
        });
        f.transport.wait_for_calls(1).await;

        fetch.abort();
        let _ = fetch.await;
        wait_until(|| f.cache.stats().in_flight == 0).await;
        wait_until(|| f.cache.inner.scheduler.available() == 1).await;
        assert_eq!(f.cache.tier_of(A).await, None);

        gate.add_permits(1);
        assert!(f.cache.fetch(A, Priority::Normal).await.is_ok());
        assert_eq!(f.transport.calls_for(A), 2);
    }

    #[tokio::test]
    async fn test_cancelled_queued_load_withdraws_ticket() {
        let (transport, gate) = ScriptedTransport::gated();
        let f = fixture_with(&config(), transport).await;
        f.transport.respond_png(A, 2, 2);
        f.transport.respond_png(B, 2, 2);

        let blocker = tokio::spawn({
            let cache = f.cache.clone();
            async move { cache.fetch(A, Priority::Normal).await }
        });
        f.transport.wait_for_calls(1).await;
        let queued = tokio::spawn({
            let cache = f.cache.clone();
            async move { cache.fetch(B, Priority::Normal).await }
        });
        wait_until(|| f.cache.inner.scheduler.queued() == 1).await;

        queued.abort();
        let _ = queued.await;
        wait_until(|| f.cache.inner.scheduler.queued() == 0).await;

        gate.add_permits(1);
        blocker.await.unwrap().unwrap();
        assert_eq!(f.transport.calls_for(B), 0);
    }

    #[tokio::test]
    async fn test_invalidate_during_load_restarts_waiters() {
        let (transport, gate) = ScriptedTransport::gated();
        let f = fixture_with(&config(), transport).await;
        f.transport.respond_png(A, 2, 2);

        let fetch = tokio::spawn({
            let cache = f.cache.clone();
            async move { cache.fetch(A, Priority::Normal).await }
        });
        f.transport.wait_for_calls(1).await;

        f.cache.invalidate(A).await;
        f.transport.wait_for_calls(2).await;
        gate.add_permits(1);

        assert!(fetch.await.unwrap().is_ok());
        assert_eq!(f.transport.calls_for(A), 2);
    }

    #[tokio::test]
    async fn test_invalidate_clears_both_tiers() {
        let f = fixture().await;
        f.transport.respond_png(A, 2, 2);
        f.cache.fetch(A, Priority::Normal).await.unwrap();

        f.cache.invalidate(A).await;

        assert_eq!(f.cache.tier_of(A).await, None);
        f.cache.fetch(A, Priority::Normal).await.unwrap();
        assert_eq!(f.transport.calls_for(A), 2);
    }

    #[tokio::test]
    async fn test_load_during_invalidation_bypasses_disk() {
        let f = fixture().await;
        f.transport.respond_png(A, 2, 2);
        f.cache.fetch(A, Priority::Normal).await.unwrap();
        let key = f.cache.key_for(A).unwrap();

        // Memory dropped, disk eviction not yet done.
        let mark = {
            let mut state = f.cache.inner.state.lock();
            state.memory.remove(&key);
            InvalidationMark::set(&f.cache.inner, &mut state, &key)
        };
        assert!(f.disk.contains(&key).await);

        f.cache.fetch(A, Priority::Normal).await.unwrap();
        assert_eq!(f.transport.calls_for(A), 2);

        drop(mark);
        assert!(f.cache.inner.state.lock().invalidating.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_invalidate_racing_fetch_leaves_no_old_copy() {
        let f = fixture().await;
        f.transport.respond_png(A, 2, 2);

        for _ in 0..100 {
            f.cache.fetch(A, Priority::Normal).await.unwrap();
            let before = f.transport.calls_for(A);

            let invalidate = tokio::spawn({
                let cache = f.cache.clone();
                async move { cache.invalidate(A).await }
            });
            let fetch = tokio::spawn({
                let cache = f.cache.clone();
                async move { cache.fetch(A, Priority::Normal).await }
            });
            invalidate.await.unwrap();
            fetch.await.unwrap().unwrap();

            // Served without a new retrieval means it ran before the invalidation.
            if f.transport.calls_for(A) == before {
                assert_eq!(f.cache.tier_of(A).await, None);
            }
        }
        assert!(f.cache.inner.state.lock().invalidating.is_empty());
    }

    #[tokio::test]
    async fn test_superseded_load_keeps_newer_ticket() {
        let (transport, gate) = ScriptedTransport::gated();
        let f = fixture_with(&config(), transport).await;
        f.transport.respond_png(A, 2, 2);
        let blocker = tokio::spawn({
            let cache = f.cache.clone();
            async move { cache.fetch(A, Priority::Normal).await }
        });
        f.transport.wait_for_calls(1).await;

        let inner = f.cache.inner.clone();
        let key = f.cache.key_for(B).unwrap();
        let (_tx, rx) = watch::channel(None);
        let record = |generation| InFlightRequest {
            generation,
            priority: Priority::Low,
            waiters: 1,
            ticket: None,
            outcome: rx.clone(),
            task: None,
        };
        inner.state.lock().in_flight.insert(key.clone(), record(1000));
        let stale = tokio::spawn({
            let inner = inner.clone();
            let key = key.clone();
            async move { inner.load(&key, 1000, true).await.is_none() }
        });
        wait_until(|| inner.scheduler.queued() == 1).await;

        // A newer load takes over the key while the old ticket is still queued.
        let newer = inner.scheduler.admit(Priority::Low);
        let newer_ticket = newer.ticket();
        assert!(newer_ticket.is_some());
        let mut current = record(1001);
        current.ticket = newer_ticket;
        inner.state.lock().in_flight.insert(key.clone(), current);

        gate.add_permits(1);
        blocker.await.unwrap().unwrap();
        assert!(stale.await.unwrap());

        let ticket = inner.state.lock().in_flight.get(&key).and_then(|r| r.ticket);
        assert_eq!(ticket, newer_ticket);
        assert_eq!(f.transport.calls_for(B), 0);
        drop(newer);
    }

    #[tokio::test]
    async fn test_invalidate_unknown_url_is_noop() {
        let f = fixture().await;
        f.cache.invalidate(A).await;
        f.cache.invalidate("not a url").await;
        assert_eq!(f.cache.stats().in_flight, 0);
    }

    #[tokio::test]
    async fn test_clear_all_empties_both_tiers() {
        let f = fixture().await;
        f.transport.respond_png(A, 2, 2);
        f.cache.fetch(A, Priority::Normal).await.unwrap();

        f.cache.clear_all().await;

        assert_eq!(f.cache.tier_of(A).await, None);
        assert!(f.disk.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_through_port_with_mock_transport() {
        let mut transport = MockImageTransport::new();
        transport
            .expect_get()
            .with(eq(A))
            .times(1)
            .returning(|_| Ok(TransportResponse::ok(png_bytes(5, 5))));

        let dir = tempdir().unwrap();
        let disk = Arc::new(
            DiskImageCache::new(dir.path().to_path_buf(), 1024 * 1024, Duration::from_secs(60))
                .await
                .unwrap(),
        );
        let cache = ResourceCache::new(&config(), Arc::new(transport), disk).unwrap();
        let port: Arc<dyn MediaCachePort> = Arc::new(cache);

        let first = port.fetch(A, Priority::Low).await.unwrap();
        let second = port.fetch(A, Priority::Normal).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.width(), 5);
    }

    #[test]
    fn test_stats_display() {
        let stats = CacheStats {
            hits: 3,
            misses: 1,
            memory_entries: 2,
            ..CacheStats::default()
        };
        assert!((stats.hit_rate() - 75.0).abs() < f64::EPSILON);
        assert!(stats.to_string().contains("75.0% hit rate"));
    }
}
