//! Application layer composing the cache and the viewer.

/// Application services.
pub mod services;

pub use services::{GalleryPage, GalleryViewer};
