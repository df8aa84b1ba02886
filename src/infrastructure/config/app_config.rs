//! Application configuration.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::args::CliArgs;
use crate::infrastructure::image::decoder::DEFAULT_MAX_DIMENSION;
use crate::infrastructure::image::disk_cache::{
    DEFAULT_MAX_AGE, DEFAULT_MAX_CACHE_SIZE, dirs_cache_path,
};
use crate::infrastructure::image::http_transport::DEFAULT_TIMEOUT_SECS;
use crate::infrastructure::image::memory_cache::DEFAULT_MEMORY_BUDGET;
use crate::infrastructure::image::scheduler::DEFAULT_MAX_CONCURRENT_FETCHES;

pub(crate) const APP_NAME: &str = "listing-media";
pub(crate) const APP_QUALIFIER: &str = "com";
pub(crate) const APP_ORGANIZATION: &str = "listing-media";

const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// Log level configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level.
    Trace,
    /// Debug level.
    Debug,
    /// Info level.
    #[default]
    Info,
    /// Warning level.
    Warn,
    /// Error level.
    Error,
}

impl LogLevel {
    /// Converts to tracing level.
    #[must_use]
    pub const fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trace => write!(f, "trace"),
            Self::Debug => write!(f, "debug"),
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Configuration file path.
    #[serde(skip)]
    pub config: Option<PathBuf>,

    /// Log file path.
    #[serde(skip)]
    pub log_path: Option<PathBuf>,

    /// Log verbosity level.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Image cache configuration.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Zoom viewer configuration.
    #[serde(default)]
    pub zoom: ZoomConfig,
}

/// Image cache configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Byte budget of the in-memory tier.
    pub memory_budget_bytes: usize,

    /// Byte budget of the persistent tier.
    pub disk_budget_bytes: u64,

    /// Days a persistent entry stays valid.
    pub disk_max_age_days: u64,

    /// Directory of the persistent tier. Defaults to the user cache dir.
    pub disk_dir: Option<PathBuf>,

    /// Network retrievals allowed at once.
    pub max_concurrent_fetches: usize,

    /// Transport request timeout in seconds.
    pub timeout_secs: u64,

    /// Longest side of a decoded image; larger images are downsampled.
    pub max_dimension: u32,

    /// Base URL that relative image paths are resolved against.
    pub base_url: Option<String>,
}

impl CacheConfig {
    /// Maximum age of a persistent entry.
    #[must_use]
    pub const fn disk_max_age(&self) -> Duration {
        Duration::from_secs(self.disk_max_age_days.saturating_mul(SECS_PER_DAY))
    }

    /// Returns the effective persistent tier directory.
    #[must_use]
    pub fn effective_disk_dir(&self) -> PathBuf {
        self.disk_dir.clone().unwrap_or_else(dirs_cache_path)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory_budget_bytes: DEFAULT_MEMORY_BUDGET,
            disk_budget_bytes: DEFAULT_MAX_CACHE_SIZE,
            disk_max_age_days: DEFAULT_MAX_AGE.as_secs() / SECS_PER_DAY,
            disk_dir: None,
            max_concurrent_fetches: DEFAULT_MAX_CONCURRENT_FETCHES,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_dimension: DEFAULT_MAX_DIMENSION,
            base_url: None,
        }
    }
}

/// Zoom viewer configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZoomConfig {
    /// Scale at rest.
    pub min_scale: f32,

    /// Largest allowed scale.
    pub max_scale: f32,

    /// Scale reached by a double tap from rest. Twice `min_scale` when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub double_tap_scale: Option<f32>,

    /// Vertical drag distance that dismisses an unzoomed image.
    pub dismiss_threshold: f32,

    /// Duration of animated transitions in milliseconds.
    pub animation_millis: u64,
}

impl ZoomConfig {
    /// Scale reached by a double tap from rest.
    #[must_use]
    pub fn double_tap_scale(&self) -> f32 {
        self.double_tap_scale.unwrap_or(self.min_scale * 2.0)
    }

    /// Returns a copy with the bounds made consistent.
    ///
    /// Non-finite or non-positive values fall back to defaults, the maximum
    /// is never below the minimum and the double-tap scale lies in between.
    #[must_use]
    pub fn sanitized(self) -> Self {
        let defaults = Self::default();
        let positive = |v: f32, fallback: f32| if v.is_finite() && v > 0.0 { v } else { fallback };

        let min_scale = positive(self.min_scale, defaults.min_scale);
        let max_scale = positive(self.max_scale, defaults.max_scale).max(min_scale);
        let double_tap_scale = self
            .double_tap_scale
            .map_or(min_scale * 2.0, |v| positive(v, min_scale * 2.0))
            .clamp(min_scale, max_scale);
        let dismiss_threshold = positive(self.dismiss_threshold, defaults.dismiss_threshold);

        Self {
            min_scale,
            max_scale,
            double_tap_scale: Some(double_tap_scale),
            dismiss_threshold,
            animation_millis: self.animation_millis,
        }
    }
}

impl Default for ZoomConfig {
    fn default() -> Self {
        Self {
            min_scale: 1.0,
            max_scale: 4.0,
            double_tap_scale: None,
            dismiss_threshold: 100.0,
            animation_millis: 250,
        }
    }
}

impl AppConfig {
    /// Merges CLI arguments into the configuration.
    pub fn merge_with_args(&mut self, args: &CliArgs) {
        if let Some(config_path) = &args.config {
            self.config = Some(config_path.clone());
        }
        if let Some(log_path) = &args.log_path {
            self.log_path = Some(log_path.clone());
        }
        if let Some(log_level) = args.log_level {
            self.log_level = log_level;
        }
        if let Some(memory_budget_mb) = args.memory_budget_mb {
            self.cache.memory_budget_bytes = memory_budget_mb * 1024 * 1024;
        }
        if let Some(max_concurrent) = args.max_concurrent_fetches {
            self.cache.max_concurrent_fetches = max_concurrent;
        }
        if let Some(disk_dir) = &args.disk_dir {
            self.cache.disk_dir = Some(disk_dir.clone());
        }
        if let Some(base_url) = &args.base_url {
            self.cache.base_url = Some(base_url.clone());
        }
    }

    /// Returns default config directory.
    #[must_use]
    pub fn default_config_dir() -> Option<PathBuf> {
        ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
            .map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Returns default log file path.
    #[must_use]
    pub fn default_log_path() -> Option<PathBuf> {
        ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
            .map(|dirs| dirs.data_dir().join("listing-media.log"))
    }

    /// Returns effective log path.
    #[must_use]
    pub fn effective_log_path(&self) -> Option<PathBuf> {
        self.log_path.clone().or_else(Self::default_log_path)
    }
}
