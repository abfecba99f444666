//! Default names and locations for configuration records.
//!
//! # Design
//! - Centralize file names and environment keys so the CLI and tests agree.
//! - Fall back through progressively less specific directories.

use std::path::PathBuf;

/// Directory name used under the platform config/data roots.
pub const APP_DIR_NAME: &str = "reelfetch";
/// File holding the configuration record.
pub const CONFIG_FILE_NAME: &str = "config.json";
/// Environment override for the configuration directory.
pub const CONFIG_DIR_ENV: &str = "REELFETCH_CONFIG_DIR";
/// Environment override for the data directory (snapshot location).
pub const DATA_DIR_ENV: &str = "REELFETCH_DATA_DIR";

/// Default destination for new transfers.
#[must_use]
pub fn default_download_dir() -> PathBuf {
    dirs::download_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join("Downloads")))
        .or_else(|| std::env::current_dir().ok().map(|cwd| cwd.join("downloads")))
        .unwrap_or_else(|| std::env::temp_dir().join("reelfetch-downloads"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_download_dir_is_absolute() {
        assert!(default_download_dir().is_absolute());
    }
}
