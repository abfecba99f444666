//! Validation helpers for configuration records.

use std::path::Path;

use crate::error::{ConfigError, ConfigResult};

/// Ensure a destination directory is usable as a default download path.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidField`] when the path is empty or relative.
pub fn validate_download_path(path: &Path) -> ConfigResult<()> {
    if path.as_os_str().is_empty() {
        return Err(ConfigError::InvalidField {
            field: "downloadPath",
            value: None,
            reason: "must_not_be_empty",
        });
    }
    if !path.is_absolute() {
        return Err(ConfigError::InvalidField {
            field: "downloadPath",
            value: Some(path.display().to_string()),
            reason: "must_be_absolute",
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_absolute_paths() {
        assert!(validate_download_path(Path::new("/srv/movies")).is_ok());
    }

    #[test]
    fn rejects_empty_and_relative_paths() {
        for (input, expected) in [("", "must_not_be_empty"), ("movies", "must_be_absolute")] {
            match validate_download_path(Path::new(input)) {
                Err(ConfigError::InvalidField { reason, .. }) => assert_eq!(reason, expected),
                other => panic!("unexpected result {other:?}"),
            }
        }
    }
}
