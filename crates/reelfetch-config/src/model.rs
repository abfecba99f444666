//! Typed configuration models.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::defaults::{APP_DIR_NAME, CONFIG_DIR_ENV, CONFIG_FILE_NAME, DATA_DIR_ENV};
use crate::defaults::default_download_dir;
use crate::error::{ConfigError, ConfigResult};

/// User-facing configuration record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    /// Destination captured by new sessions.
    #[serde(default = "default_download_dir")]
    pub download_path: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            download_path: default_download_dir(),
        }
    }
}

/// Directories the application reads from and writes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppPaths {
    /// Holds the configuration record.
    pub config_dir: PathBuf,
    /// Holds the session snapshot and backend state.
    pub data_dir: PathBuf,
}

impl AppPaths {
    /// Resolve directories from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::DirectoryUnavailable`] when neither an override
    /// nor a platform directory exists.
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(|key| std::env::var_os(key).map(PathBuf::from))
    }

    /// Resolve directories using `lookup` for the override variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::DirectoryUnavailable`] when neither an override
    /// nor a platform directory exists.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<PathBuf>) -> ConfigResult<Self> {
        let non_empty = |key: &str| lookup(key).filter(|path| !path.as_os_str().is_empty());
        let config_dir = non_empty(CONFIG_DIR_ENV)
            .or_else(|| dirs::config_dir().map(|root| root.join(APP_DIR_NAME)))
            .ok_or(ConfigError::DirectoryUnavailable { kind: "config" })?;
        let data_dir = non_empty(DATA_DIR_ENV)
            .or_else(|| dirs::data_local_dir().map(|root| root.join(APP_DIR_NAME)))
            .ok_or(ConfigError::DirectoryUnavailable { kind: "data" })?;
        Ok(Self {
            config_dir,
            data_dir,
        })
    }

    /// Both directories rooted at `root`; used by tests and portable installs.
    #[must_use]
    pub fn rooted(root: &Path) -> Self {
        Self {
            config_dir: root.join("config"),
            data_dir: root.join("data"),
        }
    }

    /// Location of the configuration record.
    #[must_use]
    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILE_NAME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn config_uses_download_path_key() {
        let config = AppConfig {
            download_path: PathBuf::from("/srv/movies"),
        };
        assert_eq!(
            serde_json::to_value(&config).expect("serialize"),
            json!({ "downloadPath": "/srv/movies" })
        );
    }

    #[test]
    fn missing_download_path_falls_back_to_default() {
        let config: AppConfig = serde_json::from_value(json!({})).expect("deserialize");
        assert_eq!(config.download_path, default_download_dir());
    }

    #[test]
    fn overrides_take_precedence_over_platform_dirs() {
        let paths = AppPaths::from_lookup(|key| match key {
            CONFIG_DIR_ENV => Some(PathBuf::from("/cfg")),
            DATA_DIR_ENV => Some(PathBuf::from("/data")),
            _ => None,
        })
        .expect("paths");
        assert_eq!(paths.config_dir, PathBuf::from("/cfg"));
        assert_eq!(paths.data_dir, PathBuf::from("/data"));
        assert_eq!(paths.config_file(), PathBuf::from("/cfg/config.json"));
    }
}
