//! Telemetry failures.

use std::error::Error;
use std::fmt;

/// Result alias for telemetry operations.
pub type Result<T> = std::result::Result<T, TelemetryError>;

/// Errors raised while setting up logging.
#[derive(Debug)]
pub enum TelemetryError {
    /// A global subscriber was already installed, or installation failed.
    SubscriberInstall {
        /// Error reported by `tracing-subscriber`.
        source: tracing_subscriber::util::TryInitError,
    },
    /// A log format name was not recognised.
    UnknownLogFormat {
        /// Name supplied by the caller.
        value: String,
    },
}

impl fmt::Display for TelemetryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SubscriberInstall { .. } => f.write_str("logging could not be installed"),
            Self::UnknownLogFormat { value } => {
                write!(f, "unknown log format '{value}' (expected json or pretty)")
            }
        }
    }
}

impl Error for TelemetryError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::SubscriberInstall { source } => Some(source),
            Self::UnknownLogFormat { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_format_names_the_value() {
        let err = TelemetryError::UnknownLogFormat {
            value: "xml".into(),
        };
        assert_eq!(
            err.to_string(),
            "unknown log format 'xml' (expected json or pretty)"
        );
        assert!(err.source().is_none());
    }
}
