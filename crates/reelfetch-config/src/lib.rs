#![forbid(unsafe_code)]
#![warn(
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    missing_docs
)]

//! File-backed configuration for the transfer manager.
//!
//! Layout: `model.rs` (typed records and directory resolution), `validate.rs`
//! (validation helpers), `loader.rs` (`ConfigStore`), `defaults.rs` (names
//! and fallbacks).

pub mod defaults;
pub mod error;
pub mod loader;
pub mod model;
pub mod validate;

pub use defaults::default_download_dir;
pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigStore;
pub use model::{AppConfig, AppPaths};
pub use validate::validate_download_path;
