//! Image handling infrastructure.
//!
//! This module provides:
//! - Memory caching with LRU eviction under a byte budget
//! - Disk caching for persistence
//! - HTTP retrieval and off-executor decoding
//! - Coalesced, priority-scheduled loading

pub mod decoder;
pub mod disk_cache;
pub mod http_transport;
pub mod memory_cache;
pub mod resource_cache;
pub mod scheduler;

pub use decoder::{DEFAULT_MAX_DIMENSION, decode_blocking, decode_image};
pub use disk_cache::{DiskImageCache, PersistentEntry};
pub use http_transport::HttpImageTransport;
pub use memory_cache::MemoryImageCache;
pub use resource_cache::{CacheStats, ResourceCache};
pub use scheduler::{Admission, FetchPermit, FetchScheduler, TicketId};
