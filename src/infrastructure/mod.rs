//! Infrastructure layer with external service adapters.

/// Application configuration.
pub mod config;
/// Image handling (transport, decoding, tiered caching).
pub mod image;

pub use config::{AppConfig, CacheConfig, CliArgs, LogLevel, StorageManager, ZoomConfig};
pub use image::{
    CacheStats, DiskImageCache, FetchScheduler, HttpImageTransport, MemoryImageCache,
    ResourceCache,
};
