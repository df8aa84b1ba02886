//! Domain entity definitions.

mod cache_key;
mod image;

pub use cache_key::CacheKey;
pub use image::{
    CacheEntry, ImageHandle, ImagePayload, ImageSource, ImageStatus, Priority, Tier,
};
