//! File-backed configuration store.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{ConfigError, ConfigResult};
use crate::model::{AppConfig, AppPaths};
use crate::validate::validate_download_path;

/// Reads and writes the JSON configuration record.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    /// Store backed by an explicit file.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store backed by the configuration file under `paths`.
    #[must_use]
    pub fn for_paths(paths: &AppPaths) -> Self {
        Self::new(paths.config_file())
    }

    /// Location of the configuration file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the configuration, falling back to defaults when the file is absent.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be read, is malformed, or holds
    /// an invalid download path.
    pub fn load(&self) -> ConfigResult<AppConfig> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "configuration file absent; using defaults");
                return Ok(AppConfig::default());
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    operation: "config.read",
                    path: self.path.clone(),
                    source,
                });
            }
        };
        let config: AppConfig =
            serde_json::from_str(&raw).map_err(|source| ConfigError::Malformed {
                path: self.path.clone(),
                source,
            })?;
        validate_download_path(&config.download_path)?;
        Ok(config)
    }

    /// Validate and persist `config`, replacing any previous record.
    ///
    /// # Errors
    ///
    /// Returns an error when validation fails or the file cannot be written.
    pub fn save(&self, config: &AppConfig) -> ConfigResult<()> {
        validate_download_path(&config.download_path)?;
        let serialised =
            serde_json::to_string_pretty(config).map_err(|source| ConfigError::Malformed {
                path: self.path.clone(),
                source,
            })?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
                operation: "config.create_dir",
                path: parent.to_path_buf(),
                source,
            })?;
        }
        fs::write(&self.path, serialised).map_err(|source| ConfigError::Io {
            operation: "config.write",
            path: self.path.clone(),
            source,
        })?;
        info!(
            path = %self.path.display(),
            download_path = %config.download_path.display(),
            "configuration saved"
        );
        Ok(())
    }

    /// Replace the default download path and return the stored record.
    ///
    /// # Errors
    ///
    /// Returns an error when the path is invalid or the record cannot be written.
    pub fn set_download_path(&self, path: &Path) -> ConfigResult<AppConfig> {
        let mut config = self.load()?;
        config.download_path = path.to_path_buf();
        self.save(&config)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn malformed_file_is_reported() {
        let temp = TempDir::new().expect("tempdir");
        let store = ConfigStore::new(temp.path().join("config.json"));
        fs::write(store.path(), "{ nope").expect("write");
        assert!(matches!(store.load(), Err(ConfigError::Malformed { .. })));
    }

    #[test]
    fn relative_path_in_file_is_rejected() {
        let temp = TempDir::new().expect("tempdir");
        let store = ConfigStore::new(temp.path().join("config.json"));
        fs::write(store.path(), r#"{"downloadPath":"movies"}"#).expect("write");
        assert!(matches!(
            store.load(),
            Err(ConfigError::InvalidField {
                reason: "must_be_absolute",
                ..
            })
        ));
    }
}
