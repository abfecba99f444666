#![forbid(unsafe_code)]
#![warn(
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    missing_docs
)]

//! Telemetry primitives shared across the workspace.
//!
//! Layout: `init.rs` (subscriber installation and formats), `context.rs`
//! (application span guard), `error.rs`.

pub mod context;
pub mod error;
pub mod init;

pub use context::{GlobalContextGuard, record_restored};
pub use error::{Result, TelemetryError};
pub use init::{
    DEFAULT_LOG_LEVEL, LOG_FORMAT_ENV, LogFormat, LoggingConfig, build_sha, init_logging,
};
