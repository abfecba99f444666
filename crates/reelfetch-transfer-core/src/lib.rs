#![forbid(unsafe_code)]
#![warn(
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    rustdoc::broken_intra_doc_links,
    missing_docs
)]
#![allow(clippy::module_name_repetitions)]

//! Engine-agnostic transfer interfaces and DTOs.
//!
//! Layout: `model/` (descriptors, records, handle views), `service/`
//! (engine, search and lookup traits), `error.rs` (shared taxonomy).

mod error;
pub mod model;
pub mod service;

pub use error::{BoxedSource, TransferError, TransferResult};
pub use model::{
    Descriptor, EngineEvent, HandleId, HandleStats, LogicalId, SearchResult, SessionRecord,
    SessionState, StopOptions, TransferHandle,
};
pub use reelfetch_events::PersistedEntry;
pub use service::{DescriptorLookup, EngineNotifications, SearchProvider, TransferEngine};
