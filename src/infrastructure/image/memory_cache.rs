//! In-memory LRU image tier bounded by total bytes.

use lru::LruCache;
use tracing::{debug, trace};

use crate::domain::entities::{CacheEntry, CacheKey, ImageHandle, ImageSource};

/// Default memory budget (32 MB).
pub const DEFAULT_MEMORY_BUDGET: usize = 32 * 1024 * 1024;

/// LRU of decoded images bounded by the sum of their byte sizes.
///
/// Not synchronized on its own; the owner serializes access.
pub struct MemoryImageCache {
    entries: LruCache<CacheKey, CacheEntry>,
    used_bytes: usize,
    budget_bytes: usize,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl MemoryImageCache {
    /// Creates a tier with the given byte budget.
    #[must_use]
    pub fn new(budget_bytes: usize) -> Self {
        Self {
            entries: LruCache::unbounded(),
            used_bytes: 0,
            budget_bytes,
            hits: 0,
            misses: 0,
            evictions: 0,
        }
    }

    /// Returns an image and marks it most recently used.
    pub fn get(&mut self, key: &CacheKey) -> Option<ImageHandle> {
        if let Some(entry) = self.entries.get_mut(key) {
            entry.touch();
            self.hits += 1;
            trace!(key = %key, "Memory cache hit");
            Some(entry.payload.clone())
        } else {
            self.misses += 1;
            trace!(key = %key, "Memory cache miss");
            None
        }
    }

    /// Returns an image without promoting it.
    #[must_use]
    pub fn peek(&self, key: &CacheKey) -> Option<ImageHandle> {
        self.entries.peek(key).map(|entry| entry.payload.clone())
    }

    /// Returns true if the key is resident.
    #[must_use]
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries.contains(key)
    }

    /// Stores an image, evicting least recently used entries until the
    /// budget holds again.
    ///
    /// Returns the evicted keys. A payload larger than the whole budget is
    /// not retained.
    pub fn insert(
        &mut self,
        key: CacheKey,
        payload: ImageHandle,
        source: ImageSource,
    ) -> Vec<CacheKey> {
        let size = payload.byte_size();
        if size > self.budget_bytes {
            self.remove(&key);
            debug!(key = %key, size, budget = self.budget_bytes, "Image exceeds memory budget, not retained");
            return Vec::new();
        }

        let entry = CacheEntry::new(key.clone(), payload, source);
        if let Some(old) = self.entries.put(key.clone(), entry) {
            self.used_bytes -= old.byte_size();
        }
        self.used_bytes += size;

        let mut evicted = Vec::new();
        while self.used_bytes > self.budget_bytes {
            let Some((old_key, old)) = self.entries.pop_lru() else {
                break;
            };
            self.used_bytes -= old.byte_size();
            self.evictions += 1;
            debug!(key = %old_key, size = old.byte_size(), "Evicted image from memory cache");
            evicted.push(old_key);
        }

        trace!(key = %key, size, used = self.used_bytes, "Stored image in memory cache");
        evicted
    }

    /// Removes an entry.
    pub fn remove(&mut self, key: &CacheKey) -> Option<CacheEntry> {
        let entry = self.entries.pop(key)?;
        self.used_bytes -= entry.byte_size();
        Some(entry)
    }

    /// Drops every entry, returning how many were dropped.
    pub fn clear(&mut self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        self.used_bytes = 0;
        count
    }

    /// Bytes currently held.
    #[must_use]
    pub const fn used_bytes(&self) -> usize {
        self.used_bytes
    }

    /// Configured byte budget.
    #[must_use]
    pub const fn budget_bytes(&self) -> usize {
        self.budget_bytes
    }

    /// Number of resident entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is resident.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of hits since creation.
    #[must_use]
    pub const fn hits(&self) -> u64 {
        self.hits
    }

    /// Number of misses since creation.
    #[must_use]
    pub const fn misses(&self) -> u64 {
        self.misses
    }

    /// Number of budget evictions since creation.
    #[must_use]
    pub const fn evictions(&self) -> u64 {
        self.evictions
    }
}

impl Default for MemoryImageCache {
    fn default() -> Self {
        Self::new(DEFAULT_MEMORY_BUDGET)
    }
}
