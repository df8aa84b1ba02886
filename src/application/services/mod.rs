//! Application services.

pub mod gallery_viewer;

pub use gallery_viewer::{DEFAULT_PREFETCH_RADIUS, GalleryPage, GalleryViewer};
