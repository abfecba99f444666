//! # Design
//!
//! - Centralize application-level errors for bootstrap and the control surface.
//! - Keep error messages constant while carrying context fields for debugging.
//! - Preserve source errors without re-logging at call sites.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result alias for application operations.
pub type AppResult<T> = Result<T, AppError>;

/// Application-level error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// Configuration operations failed.
    #[error("configuration operation failed")]
    Config {
        /// Operation identifier.
        operation: &'static str,
        /// Source configuration error.
        source: reelfetch_config::ConfigError,
    },
    /// Telemetry operations failed.
    #[error("telemetry operation failed")]
    Telemetry {
        /// Operation identifier.
        operation: &'static str,
        /// Source telemetry error.
        source: reelfetch_telemetry::TelemetryError,
    },
    /// Transfer workflow operations failed.
    #[error("transfer operation failed")]
    Transfer {
        /// Operation identifier.
        operation: &'static str,
        /// Source transfer error.
        source: reelfetch_transfer_core::TransferError,
    },
    /// The swarm engine could not be started.
    #[error("engine startup failed")]
    Engine {
        /// Operation identifier.
        operation: &'static str,
        /// Source engine error.
        source: reelfetch_engine::EngineError,
    },
    /// HTTP client construction failed.
    #[error("http client setup failed")]
    HttpClient {
        /// Source HTTP client error.
        source: reqwest::Error,
    },
    /// IO operations failed.
    #[error("io operation failed")]
    Io {
        /// Operation identifier.
        operation: &'static str,
        /// Optional path involved in the failure.
        path: Option<PathBuf>,
        /// Source IO error.
        source: io::Error,
    },
    /// A command-line or environment value was invalid.
    #[error("invalid argument")]
    InvalidArgument {
        /// Field name that failed validation.
        field: &'static str,
        /// Machine-readable reason for the failure.
        reason: &'static str,
        /// Optional value associated with the failure.
        value: Option<String>,
    },
}

impl AppError {
    pub(crate) const fn config(
        operation: &'static str,
        source: reelfetch_config::ConfigError,
    ) -> Self {
        Self::Config { operation, source }
    }

    pub(crate) const fn telemetry(
        operation: &'static str,
        source: reelfetch_telemetry::TelemetryError,
    ) -> Self {
        Self::Telemetry { operation, source }
    }

    pub(crate) const fn transfer(
        operation: &'static str,
        source: reelfetch_transfer_core::TransferError,
    ) -> Self {
        Self::Transfer { operation, source }
    }

    pub(crate) const fn engine(
        operation: &'static str,
        source: reelfetch_engine::EngineError,
    ) -> Self {
        Self::Engine { operation, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;
    use std::path::Path;

    #[test]
    fn app_error_helpers_build_variants() {
        let config = AppError::config(
            "load",
            reelfetch_config::ConfigError::DirectoryUnavailable { kind: "config" },
        );
        assert!(matches!(config, AppError::Config { .. }));
        assert!(config.source().is_some());

        let transfer = AppError::transfer(
            "show_in_folder",
            reelfetch_transfer_core::TransferError::Locate {
                path: Path::new("/missing").to_path_buf(),
            },
        );
        assert_eq!(transfer.to_string(), "transfer operation failed");

        let engine = AppError::engine(
            "spawn",
            reelfetch_engine::EngineError::SessionUnavailable { operation: "spawn" },
        );
        assert!(matches!(engine, AppError::Engine { operation: "spawn", .. }));

        let telemetry = AppError::telemetry(
            "init",
            reelfetch_telemetry::TelemetryError::UnknownLogFormat {
                value: "xml".into(),
            },
        );
        assert!(matches!(telemetry, AppError::Telemetry { .. }));
    }
}
