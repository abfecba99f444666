#![forbid(unsafe_code)]
#![warn(
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    rustdoc::broken_intra_doc_links,
    missing_docs
)]
#![allow(clippy::missing_panics_doc)]

//! Shared test helpers used across integration suites.
//! Layout: fixtures.rs (static providers, event helpers), mocks.rs (recording engine).

pub mod fixtures;
pub mod mocks;

pub use fixtures::{StaticLookup, StaticSearchProvider};
pub use mocks::{RecordingEngine, StartCall, StopCall};
