//! Error types for configuration operations.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Primary error type for configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Field contained an invalid value.
    #[error("invalid configuration field")]
    InvalidField {
        /// Field that failed validation.
        field: &'static str,
        /// Offending value when available.
        value: Option<String>,
        /// Machine-readable reason for the failure.
        reason: &'static str,
    },
    /// The configuration document could not be parsed or serialised.
    #[error("configuration document malformed")]
    Malformed {
        /// Path of the configuration file.
        path: PathBuf,
        /// Source JSON error.
        source: serde_json::Error,
    },
    /// File system operation failed.
    #[error("filesystem operation failed")]
    Io {
        /// Operation identifier.
        operation: &'static str,
        /// Path involved in the failure.
        path: PathBuf,
        /// Source IO error.
        source: io::Error,
    },
    /// No platform directory could be determined for the application.
    #[error("application directory unavailable")]
    DirectoryUnavailable {
        /// Which directory was being resolved.
        kind: &'static str,
    },
}

/// Convenience alias for configuration results.
pub type ConfigResult<T> = Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn messages_are_constant_and_sources_are_kept() {
        let err = ConfigError::Io {
            operation: "read",
            path: PathBuf::from("/etc/reelfetch/config.json"),
            source: io::Error::other("denied"),
        };
        assert_eq!(err.to_string(), "filesystem operation failed");
        assert!(err.source().is_some());

        let err = ConfigError::InvalidField {
            field: "downloadPath",
            value: Some("relative".into()),
            reason: "must_be_absolute",
        };
        assert_eq!(err.to_string(), "invalid configuration field");
        assert!(err.source().is_none());
    }
}
