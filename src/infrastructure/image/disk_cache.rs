//! Disk-based image cache for persistence across sessions.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, SystemTime};

use tokio::fs;
use tracing::{debug, trace, warn};

use crate::domain::entities::CacheKey;
use crate::domain::errors::{CacheError, CacheResult};

/// Maximum disk cache size in bytes (200 MB default).
pub const DEFAULT_MAX_CACHE_SIZE: u64 = 200 * 1024 * 1024;

/// Maximum age of a cached file (7 days default).
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(7 * 24 * 60 * 60);

const FILE_EXTENSION: &str = "img";

/// A file in the persistent tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistentEntry {
    /// File name stem (hash of the key).
    pub stem: String,
    /// Encoded size in bytes.
    pub size: u64,
    /// Last write time.
    pub modified: SystemTime,
}

/// Disk-based image cache that persists raw encoded bytes.
///
/// Bounded by total size and by file age. Files are keyed by the hash of the
/// normalized URL.
pub struct DiskImageCache {
    cache_dir: PathBuf,
    max_size: u64,
    max_age: Duration,
    current_size: AtomicU64,
    item_count: AtomicUsize,
}

impl DiskImageCache {
    /// Creates a new disk cache in the specified directory.
    ///
    /// # Errors
    /// Returns error if cache directory cannot be created or read.
    pub async fn new(cache_dir: PathBuf, max_size: u64, max_age: Duration) -> CacheResult<Self> {
        fs::create_dir_all(&cache_dir)
            .await
            .map_err(|e| CacheError::IoError(format!("Failed to create cache dir: {e}")))?;

        let cache = Self {
            cache_dir,
            max_size,
            max_age,
            current_size: AtomicU64::new(0),
            item_count: AtomicUsize::new(0),
        };

        let entries = cache.entries().await?;
        cache
            .current_size
            .store(entries.iter().map(|e| e.size).sum(), Ordering::Relaxed);
        cache.item_count.store(entries.len(), Ordering::Relaxed);

        Ok(cache)
    }

    /// Creates a cache in the default location (~/.cache/listing-media/images/).
    ///
    /// # Errors
    /// Returns error if cache directory cannot be created.
    pub async fn default_location() -> CacheResult<Self> {
        Self::new(dirs_cache_path(), DEFAULT_MAX_CACHE_SIZE, DEFAULT_MAX_AGE).await
    }

    /// Returns the path for a cached image.
    fn cache_path(&self, key: &CacheKey) -> PathBuf {
        self.cache_dir
            .join(format!("{}.{FILE_EXTENSION}", key.file_stem()))
    }

    fn is_expired(&self, modified: SystemTime) -> bool {
        SystemTime::now()
            .duration_since(modified)
            .is_ok_and(|age| age > self.max_age)
    }

    /// Gets raw image bytes, dropping the file if it has expired.
    pub async fn get_bytes(&self, key: &CacheKey) -> Option<Vec<u8>> {
        let path = self.cache_path(key);
        let Ok(meta) = fs::metadata(&path).await else {
            trace!(key = %key, "Disk cache miss");
            return None;
        };

        if meta.modified().is_ok_and(|m| self.is_expired(m)) {
            debug!(key = %key, "Disk cache entry expired");
            self.evict(key).await;
            return None;
        }

        match fs::read(&path).await {
            Ok(bytes) => {
                trace!(key = %key, path = %path.display(), "Disk cache hit");
                Some(bytes)
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to read disk cache entry");
                None
            }
        }
    }

    /// Stores raw bytes in the disk cache.
    ///
    /// The file appears under its final name only once fully written.
    ///
    /// # Errors
    /// Returns error if file cannot be created or written.
    pub async fn put_bytes(&self, key: &CacheKey, bytes: &[u8]) -> CacheResult<()> {
        let path = self.cache_path(key);
        let dir = self.cache_dir.clone();
        let data = bytes.to_vec();

        let replaced = tokio::task::spawn_blocking(move || write_atomically(&dir, &path, &data))
            .await
            .map_err(|e| CacheError::IoError(format!("Cache write task failed: {e}")))??;

        self.current_size
            .fetch_add(bytes.len() as u64, Ordering::Relaxed);
        match replaced {
            Some(old) => self.release_usage(old, 0),
            None => {
                self.item_count.fetch_add(1, Ordering::Relaxed);
            }
        }

        debug!(key = %key, size = bytes.len(), "Stored image in disk cache");

        self.cleanup_if_needed().await;

        Ok(())
    }

    /// Removes an image from disk cache.
    pub async fn evict(&self, key: &CacheKey) {
        let path = self.cache_path(key);
        let size = fs::metadata(&path).await.map(|m| m.len()).ok();
        if let Err(e) = fs::remove_file(&path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(key = %key, error = %e, "Failed to evict from disk cache");
            }
        } else if let Some(s) = size {
            self.release_usage(s, 1);
            debug!(key = %key, "Evicted from disk cache");
        }
    }

    /// Lowers the counters, stopping at zero.
    ///
    /// Files left by an interrupted store are not counted, so removing one
    /// can exceed what the counters hold.
    fn release_usage(&self, size: u64, count: usize) {
        let _ = self
            .current_size
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                Some(v.saturating_sub(size))
            });
        let _ = self
            .item_count
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                Some(v.saturating_sub(count))
            });
    }

    /// Resets the counters to what is on disk.
    fn resync(&self, files: &[PersistentEntry]) -> u64 {
        let total = files.iter().map(|e| e.size).sum();
        self.current_size.store(total, Ordering::Relaxed);
        self.item_count.store(files.len(), Ordering::Relaxed);
        total
    }

    /// Clears the entire disk cache.
    ///
    /// # Errors
    /// Returns error if cache directory cannot be read.
    pub async fn clear(&self) -> CacheResult<()> {
        let mut entries = fs::read_dir(&self.cache_dir)
            .await
            .map_err(|e| CacheError::IoError(format!("Failed to read cache dir: {e}")))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| CacheError::IoError(format!("Failed to read entry: {e}")))?
        {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == FILE_EXTENSION)
                && fs::remove_file(&path).await.is_err()
            {
                warn!(path = %path.display(), "Failed to remove cache file");
            }
        }
        self.current_size.store(0, Ordering::Relaxed);
        self.item_count.store(0, Ordering::Relaxed);
        debug!("Cleared disk cache");
        Ok(())
    }

    /// Lists every cached file, oldest first.
    ///
    /// # Errors
    /// Returns error if cache directory cannot be read.
    pub async fn entries(&self) -> CacheResult<Vec<PersistentEntry>> {
        let mut dir = fs::read_dir(&self.cache_dir)
            .await
            .map_err(|e| CacheError::IoError(format!("Failed to read cache dir: {e}")))?;

        let mut files = Vec::new();
        while let Ok(Some(entry)) = dir.next_entry().await {
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != FILE_EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if let Ok(meta) = entry.metadata().await {
                files.push(PersistentEntry {
                    stem: stem.to_string(),
                    size: meta.len(),
                    modified: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
                });
            }
        }

        files.sort_by_key(|e| e.modified);
        Ok(files)
    }

    /// Returns the current cache size in bytes.
    #[must_use]
    pub fn current_size(&self) -> u64 {
        self.current_size.load(Ordering::Relaxed)
    }

    /// Returns the number of cached files.
    #[must_use]
    pub fn len(&self) -> usize {
        self.item_count.load(Ordering::Relaxed)
    }

    /// Returns true if the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops expired files, then trims to the size budget.
    pub async fn maintain(&self) {
        let Ok(files) = self.entries().await else {
            return;
        };
        self.resync(&files);

        let mut freed_size = 0u64;
        let mut freed_count = 0usize;
        for entry in files.iter().filter(|e| self.is_expired(e.modified)) {
            if self.remove_stem(&entry.stem).await {
                freed_size += entry.size;
                freed_count += 1;
            }
        }
        self.release_usage(freed_size, freed_count);

        if freed_count > 0 {
            debug!(freed_size, freed_count, "Removed expired disk cache files");
        }

        self.cleanup_if_needed().await;
    }

    async fn remove_stem(&self, stem: &str) -> bool {
        let path = self.cache_dir.join(format!("{stem}.{FILE_EXTENSION}"));
        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!(path = %path.display(), "Removed old cache file");
                true
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to remove old cache file");
                false
            }
        }
    }

    /// Cleans up old cache entries if over size limit.
    async fn cleanup_if_needed(&self) {
        if self.current_size() <= self.max_size {
            return;
        }
        let Ok(files) = self.entries().await else {
            return;
        };
        let current_size = self.resync(&files);
        if current_size <= self.max_size {
            return;
        }

        debug!(
            current_size = current_size,
            max_size = self.max_size,
            "Disk cache over limit, cleaning up"
        );

        let mut freed_size = 0u64;
        let mut freed_count = 0usize;
        let target = current_size - self.max_size + (self.max_size / 10);

        for entry in files {
            if freed_size >= target {
                break;
            }
            if self.remove_stem(&entry.stem).await {
                freed_size += entry.size;
                freed_count += 1;
            }
        }
        self.release_usage(freed_size, freed_count);

        debug!(
            freed_size = freed_size,
            freed_count = freed_count,
            "Disk cache cleanup complete"
        );
    }

    /// Checks if an image is cached.
    pub async fn contains(&self, key: &CacheKey) -> bool {
        let path = self.cache_path(key);
        fs::try_exists(&path).await.unwrap_or(false)
    }
}

/// Stages `bytes` in a temp file inside `dir` and renames it over `path`.
///
/// Returns the size of the file that was replaced, if any.
fn write_atomically(dir: &Path, path: &Path, bytes: &[u8]) -> CacheResult<Option<u64>> {
    let io_error =
        |step: &str, e: std::io::Error| CacheError::IoError(format!("Failed to {step} cache file: {e}"));

    let mut staged = tempfile::NamedTempFile::new_in(dir).map_err(|e| io_error("create", e))?;
    staged.write_all(bytes).map_err(|e| io_error("write", e))?;
    let replaced = std::fs::metadata(path).map(|m| m.len()).ok();
    staged
        .persist(path)
        .map_err(|e| io_error("persist", e.error))?;
    Ok(replaced)
}

/// Returns the default cache directory path.
pub(crate) fn dirs_cache_path() -> PathBuf {
    directories::ProjectDirs::from("com", "listing-media", "listing-media").map_or_else(
        || {
            std::env::temp_dir()
                .join("listing-media")
                .join("cache")
                .join("images")
        },
        |dirs| dirs.cache_dir().join("images"),
    )
}
