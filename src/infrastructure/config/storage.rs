//! On-disk home of `config.toml`.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};

use super::app_config::AppConfig;

const CONFIG_FILE_NAME: &str = "config.toml";

/// Failure to locate, read or write the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform reports no config directory.
    #[error("no platform config directory available")]
    NoConfigHome,
    /// The path cannot be written atomically.
    #[error("config path {0:?} has no parent directory")]
    Orphan(PathBuf),
    /// Filesystem failure.
    #[error("config io: {0}")]
    Io(#[from] std::io::Error),
    /// The configuration could not be encoded as TOML.
    #[error("config encode: {0}")]
    Encode(#[from] toml::ser::Error),
}

/// Where a loaded configuration came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigOrigin {
    /// Parsed from an existing file.
    File,
    /// No file existed; defaults were written out.
    Created,
    /// The file did not parse; defaults are used and the file is kept.
    Fallback,
}

/// Reads and writes the configuration file under one directory.
#[derive(Debug, Clone)]
pub struct StorageManager {
    root: PathBuf,
}

impl StorageManager {
    /// Uses the platform config directory for this application.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NoConfigHome`] when the platform has none.
    pub fn new() -> Result<Self, ConfigError> {
        AppConfig::default_config_dir()
            .map(Self::with_dir)
            .ok_or(ConfigError::NoConfigHome)
    }

    /// Uses `root` instead of the platform directory.
    #[must_use]
    pub const fn with_dir(root: PathBuf) -> Self {
        Self { root }
    }

    /// Directory holding `config.toml`.
    #[must_use]
    pub fn config_dir(&self) -> &Path {
        &self.root
    }

    /// The file `load_config` would read for the given override.
    #[must_use]
    pub fn config_path(&self, path_override: Option<&Path>) -> PathBuf {
        path_override.map_or_else(|| self.root.join(CONFIG_FILE_NAME), Path::to_path_buf)
    }

    /// Loads the configuration, writing defaults when no file exists.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file cannot be read or the default written.
    pub fn load_config(&self, path_override: Option<&Path>) -> Result<AppConfig, ConfigError> {
        self.load_with_origin(path_override).map(|(config, _)| config)
    }

    /// Like [`load_config`](Self::load_config), also reporting the origin.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file cannot be read or the default written.
    pub fn load_with_origin(
        &self,
        path_override: Option<&Path>,
    ) -> Result<(AppConfig, ConfigOrigin), ConfigError> {
        let path = self.config_path(path_override);

        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "Writing default configuration");
                let config = AppConfig::default();
                write_atomically(&path, &config)?;
                return Ok((config, ConfigOrigin::Created));
            }
            Err(e) => return Err(e.into()),
        };

        match toml::from_str::<AppConfig>(&text) {
            Ok(config) => {
                debug!(path = %path.display(), "Configuration loaded");
                Ok((config, ConfigOrigin::File))
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Unparseable configuration, using defaults");
                Ok((AppConfig::default(), ConfigOrigin::Fallback))
            }
        }
    }

    /// Replaces the configuration file at the default location.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if encoding or writing fails.
    pub fn save_config(&self, config: &AppConfig) -> Result<(), ConfigError> {
        write_atomically(&self.config_path(None), config)
    }
}

/// Writes through a sibling temp file so readers never see a partial file.
fn write_atomically<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), ConfigError> {
    let encoded = toml::to_string_pretty(value)?;
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .ok_or_else(|| ConfigError::Orphan(path.to_path_buf()))?;
    fs::create_dir_all(dir)?;

    let mut staged = tempfile::NamedTempFile::new_in(dir)?;
    staged.write_all(encoded.as_bytes())?;
    staged.persist(path).map_err(|e| e.error)?;
    Ok(())
}
