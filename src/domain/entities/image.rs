//! Domain types for decoded images and cache bookkeeping.

use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};

use super::CacheKey;

/// Decoded image handed to the rendering layer.
///
/// The pixel buffer is RGBA8, row-major, `width * height * 4` bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePayload {
    pixels: Bytes,
    width: u32,
    height: u32,
}

impl ImagePayload {
    /// Creates a payload from an RGBA8 buffer.
    #[must_use]
    pub const fn new(pixels: Bytes, width: u32, height: u32) -> Self {
        Self {
            pixels,
            width,
            height,
        }
    }

    /// Returns the pixel buffer.
    #[must_use]
    pub const fn pixels(&self) -> &Bytes {
        &self.pixels
    }

    /// Intrinsic width in pixels.
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Intrinsic height in pixels.
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Logical size counted against the memory budget.
    #[must_use]
    pub fn byte_size(&self) -> usize {
        self.pixels.len()
    }
}

/// Shared, immutable handle to a decoded image.
pub type ImageHandle = Arc<ImagePayload>;

/// Scheduling priority of a load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Priority {
    /// Speculative loads for content about to become visible.
    Low,
    /// Loads for content on screen.
    #[default]
    Normal,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Normal => write!(f, "normal"),
        }
    }
}

/// Storage tier holding a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    /// Bounded in-memory LRU.
    Memory,
    /// On-disk store.
    Persistent,
}

/// Where a memory-tier entry was loaded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageSource {
    /// Promoted from the disk cache.
    DiskCache,
    /// Downloaded from the network.
    Network,
}

impl std::fmt::Display for ImageSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DiskCache => write!(f, "disk"),
            Self::Network => write!(f, "network"),
        }
    }
}

/// Memory-tier record.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Key of the resource.
    pub key: CacheKey,
    /// Decoded image.
    pub payload: ImageHandle,
    /// Last time the entry was inserted or hit.
    pub last_access: DateTime<Utc>,
    /// Where the payload came from.
    pub source: ImageSource,
}

impl CacheEntry {
    /// Creates an entry stamped with the current time.
    #[must_use]
    pub fn new(key: CacheKey, payload: ImageHandle, source: ImageSource) -> Self {
        Self {
            key,
            payload,
            last_access: Utc::now(),
            source,
        }
    }

    /// Refreshes the access timestamp.
    pub fn touch(&mut self) {
        self.last_access = Utc::now();
    }

    /// Bytes counted against the memory budget.
    #[must_use]
    pub fn byte_size(&self) -> usize {
        self.payload.byte_size()
    }
}

/// Status of an image in a view.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ImageStatus {
    /// Image loading has not started.
    #[default]
    NotStarted,
    /// Image is being fetched.
    Loading,
    /// Image is loaded and ready for display.
    Ready,
    /// Image loading failed; a placeholder is shown.
    Failed(String),
}

impl ImageStatus {
    /// Returns true if the image is ready for rendering.
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }

    /// Returns true if the image is currently being loaded.
    #[must_use]
    pub const fn is_loading(&self) -> bool {
        matches!(self, Self::Loading)
    }

    /// Returns true if loading failed.
    #[must_use]
    pub const fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}
