//! Error taxonomy shared by the transfer session manager.

use std::error::Error;
use std::path::PathBuf;

use thiserror::Error;

/// Boxed source error carried by engine and store failures.
pub type BoxedSource = Box<dyn Error + Send + Sync>;

/// Primary error type for transfer operations.
#[derive(Debug, Error)]
pub enum TransferError {
    /// A descriptor string was not a usable magnet URI.
    #[error("invalid content descriptor")]
    InvalidDescriptor {
        /// Offending value.
        value: String,
        /// Machine-readable reason for the rejection.
        reason: &'static str,
    },
    /// Descriptor lookup failed or came back empty.
    #[error("descriptor resolution failed")]
    Resolution {
        /// Title of the record being resolved.
        title: String,
        /// Underlying lookup failure, absent when the lookup simply returned nothing.
        #[source]
        source: Option<BoxedSource>,
    },
    /// The underlying transfer engine could not proceed.
    #[error("transfer engine operation failed")]
    Engine {
        /// Operation identifier.
        operation: &'static str,
        /// Descriptor involved, when known.
        descriptor: Option<String>,
        /// Underlying failure.
        #[source]
        source: BoxedSource,
    },
    /// Another session already holds an active handle for the descriptor.
    #[error("duplicate transfer request")]
    DuplicateRequest {
        /// Descriptor already in flight.
        descriptor: String,
    },
    /// The persisted session snapshot could not be read or parsed.
    #[error("session snapshot unreadable")]
    SnapshotRead {
        /// Snapshot file path.
        path: PathBuf,
        /// Underlying IO or parse failure.
        #[source]
        source: BoxedSource,
    },
    /// The session snapshot could not be written.
    #[error("session snapshot write failed")]
    SnapshotWrite {
        /// Snapshot file path.
        path: PathBuf,
        /// Underlying IO or serialization failure.
        #[source]
        source: BoxedSource,
    },
    /// A completed transfer has no locatable result file.
    #[error("result file not found")]
    ResultFileNotFound {
        /// Path that was looked up, when one was recorded.
        path: Option<PathBuf>,
    },
    /// A path handed to the locate action does not exist.
    #[error("path could not be located")]
    Locate {
        /// Path that was requested; empty when none was recorded.
        path: PathBuf,
    },
    /// The search provider failed.
    #[error("search provider failed")]
    Search {
        /// Provider identifier.
        provider: &'static str,
        /// Underlying failure.
        #[source]
        source: BoxedSource,
    },
    /// A background task that owns the requested state has shut down.
    #[error("transfer service unavailable")]
    ChannelClosed {
        /// Operation identifier.
        operation: &'static str,
    },
}

impl TransferError {
    /// Build an engine failure from any error source.
    pub fn engine(
        operation: &'static str,
        descriptor: Option<String>,
        source: impl Into<BoxedSource>,
    ) -> Self {
        Self::Engine {
            operation,
            descriptor,
            source: source.into(),
        }
    }

    /// Render the error and its source chain as one line for observers.
    #[must_use]
    pub fn describe(&self) -> String {
        let mut message = self.to_string();
        let mut source = self.source();
        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }
        message
    }
}

/// Convenience alias for transfer operation results.
pub type TransferResult<T> = Result<T, TransferError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn describe_includes_source_chain() {
        let err = TransferError::engine(
            "start",
            Some("magnet:?xt=abc".into()),
            io::Error::other("no peers reachable"),
        );
        assert_eq!(err.to_string(), "transfer engine operation failed");
        assert_eq!(
            err.describe(),
            "transfer engine operation failed: no peers reachable"
        );
    }

    #[test]
    fn resolution_without_source_describes_itself() {
        let err = TransferError::Resolution {
            title: "Inception".into(),
            source: None,
        };
        assert_eq!(err.describe(), "descriptor resolution failed");
    }
}
