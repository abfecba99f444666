//! # Design
//!
//! - Keep error messages constant; store operational context in fields.
//! - Backend failures arrive as `anyhow` chains and are flattened into a message.
//! - Convert into `TransferError::Engine` at the trait boundary.

use std::error::Error;
use std::fmt::{self, Display, Formatter};

use reelfetch_transfer_core::{Descriptor, HandleId, TransferError};

#[derive(Debug)]
/// Internal error details used by the swarm adapter.
pub enum EngineError {
    /// The worker task is gone and cannot service the request.
    SessionUnavailable {
        /// Operation that could not be serviced.
        operation: &'static str,
    },
    /// A request referenced a handle the worker does not own.
    UnknownHandle {
        /// Operation that referenced the handle.
        operation: &'static str,
        /// Handle identifier.
        handle: HandleId,
    },
    /// The swarm backend reported a failure.
    Backend {
        /// Operation that triggered the failure.
        operation: &'static str,
        /// Flattened backend error chain.
        message: String,
    },
}

impl EngineError {
    /// Operation the error originated from.
    #[must_use]
    pub const fn operation(&self) -> &'static str {
        match self {
            Self::SessionUnavailable { operation }
            | Self::UnknownHandle { operation, .. }
            | Self::Backend { operation, .. } => operation,
        }
    }

    pub(crate) fn backend(operation: &'static str, err: &anyhow::Error) -> Self {
        Self::Backend {
            operation,
            message: format!("{err:#}"),
        }
    }

    /// Re-express as the shared transfer error.
    #[must_use]
    pub fn into_transfer(self, descriptor: Option<&Descriptor>) -> TransferError {
        TransferError::engine(
            self.operation(),
            descriptor.map(ToString::to_string),
            self,
        )
    }
}

impl Display for EngineError {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::SessionUnavailable { .. } => formatter.write_str("swarm session unavailable"),
            Self::UnknownHandle { .. } => formatter.write_str("unknown transfer handle"),
            Self::Backend { message, .. } => {
                write!(formatter, "swarm backend error: {message}")
            }
        }
    }
}

impl Error for EngineError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_error_display_and_operation() {
        let cases = vec![
            (
                EngineError::SessionUnavailable { operation: "start" },
                "swarm session unavailable",
                "start",
            ),
            (
                EngineError::UnknownHandle {
                    operation: "stop",
                    handle: HandleId(9),
                },
                "unknown transfer handle",
                "stop",
            ),
            (
                EngineError::backend("start", &anyhow::anyhow!("tracker unreachable")),
                "swarm backend error: tracker unreachable",
                "start",
            ),
        ];

        for (err, message, operation) in cases {
            assert_eq!(err.to_string(), message);
            assert_eq!(err.operation(), operation);
        }
    }

    #[test]
    fn into_transfer_keeps_descriptor_and_source() {
        let descriptor = Descriptor::parse("magnet:?xt=urn:btih:abc").expect("descriptor");
        let err = EngineError::SessionUnavailable { operation: "stop" }
            .into_transfer(Some(&descriptor));
        match &err {
            TransferError::Engine {
                operation,
                descriptor: Some(value),
                ..
            } => {
                assert_eq!(*operation, "stop");
                assert_eq!(value, "magnet:?xt=urn:btih:abc");
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(
            err.describe(),
            "transfer engine operation failed: swarm session unavailable"
        );
    }
}
