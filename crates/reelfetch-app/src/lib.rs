#![forbid(unsafe_code)]
#![warn(
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    missing_docs
)]

//! Reelfetch application: search, resolve, fetch and follow movie transfers.
//!
//! Layout: `registry.rs` (session actor), `reporter.rs` (progress sampling),
//! `resolver.rs` and `search.rs` (result handling), `provider.rs` (HTTP index),
//! `control.rs` (operations for front ends), `bootstrap.rs` (wiring) and
//! `cli.rs` (command line).

pub mod bootstrap;
pub mod cli;
pub mod control;
pub mod error;
pub mod provider;
pub mod registry;
pub mod reporter;
pub mod resolver;
pub mod search;

pub use bootstrap::{
    BootstrapDependencies, build_control, fetch_and_follow, follow, follow_until, interrupt,
};
pub use control::{
    ChosenFolder, ControlDeps, ControlSurface, FolderOpener, FolderPicker, SavedSessionAction,
    SystemOpener,
};
pub use error::{AppError, AppResult};
pub use provider::ApibayIndex;
pub use registry::{RegistrySettings, SessionRegistry, SessionTarget, locate_result_file};
pub use resolver::ContentResolver;
