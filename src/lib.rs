//! listing-media - Remote image cache and zoom viewer for a marketplace client.
//!
//! This crate resolves listing images by URL through a coalescing, two-tier
//! cache and drives the zoom/pan state of the image on screen.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

/// Application layer composing the cache and the viewer.
pub mod application;
/// Domain layer containing entities, errors, and port definitions.
pub mod domain;
/// Infrastructure layer containing adapters for external services.
pub mod infrastructure;
/// Presentation layer containing viewer interaction state.
pub mod presentation;

/// Current version of the application.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name.
pub const NAME: &str = "listing-media";
