//! Ports between the domain and its adapters.

mod image_transport_port;
mod media_cache_port;

pub use crate::domain::errors::{CacheError, CacheResult};
pub use image_transport_port::{ImageTransport, TransportResponse};
pub use media_cache_port::{MediaCachePort, PrefetchHandle, PrefetchOutcome};

#[cfg(test)]
pub use image_transport_port::MockImageTransport;
