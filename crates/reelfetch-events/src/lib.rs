#![forbid(unsafe_code)]
#![warn(
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    rustdoc::broken_intra_doc_links,
    missing_docs
)]

//! Event bus connecting the transfer session manager to its observers.
//!
//! The bus provides a typed event enum, sequential identifiers, and replay of
//! recent events for observers that reconnect. Internally it uses
//! `tokio::broadcast` with a bounded buffer; when a subscriber falls behind,
//! the oldest events are dropped rather than blocking publishers.
//!
//! Layout: `payloads.rs` (event types), `routing.rs` (`EventBus` + `EventStream`).

pub mod payloads;
pub mod routing;

pub use payloads::{DEFAULT_REPLAY_CAPACITY, Event, EventEnvelope, EventId, PersistedEntry};
pub use routing::{EventBus, EventStream};
