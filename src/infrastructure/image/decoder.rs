//! Image decoding off the async executor.

use std::sync::Arc;

use bytes::Bytes;
use tracing::trace;

use crate::domain::entities::{ImageHandle, ImagePayload};
use crate::domain::errors::{CacheError, CacheResult};

/// Longest side kept by default; larger images are downsampled.
pub const DEFAULT_MAX_DIMENSION: u32 = 1024;

/// Decodes encoded bytes into an RGBA8 payload.
///
/// Images whose longest side exceeds `max_dimension` are resized to fit,
/// keeping the aspect ratio. A `max_dimension` of zero disables resizing.
///
/// # Errors
/// Returns `DecodeError` if the bytes are not a supported image.
pub fn decode_image(bytes: &[u8], max_dimension: u32) -> CacheResult<ImagePayload> {
    let img = image::load_from_memory(bytes)
        .map_err(|e| CacheError::DecodeError(format!("Failed to decode image: {e}")))?;

    let img = if max_dimension > 0 && img.width().max(img.height()) > max_dimension {
        trace!(
            width = img.width(),
            height = img.height(),
            max_dimension,
            "Downsampling oversized image"
        );
        img.resize(
            max_dimension,
            max_dimension,
            image::imageops::FilterType::Lanczos3,
        )
    } else {
        img
    };

    let rgba = img.into_rgba8();
    let (width, height) = rgba.dimensions();
    Ok(ImagePayload::new(Bytes::from(rgba.into_raw()), width, height))
}

/// Decodes on the blocking pool.
///
/// # Errors
/// Returns `DecodeError` if decoding fails or the decode task panics.
pub async fn decode_blocking(bytes: Bytes, max_dimension: u32) -> CacheResult<ImageHandle> {
    let payload = tokio::task::spawn_blocking(move || decode_image(&bytes, max_dimension))
        .await
        .map_err(|e| CacheError::DecodeError(format!("Decode task panicked: {e}")))??;
    Ok(Arc::new(payload))
}
