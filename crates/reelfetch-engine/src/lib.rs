#![forbid(unsafe_code)]
#![warn(
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    rustdoc::broken_intra_doc_links,
    missing_docs
)]

//! Swarm engine adapter.
//!
//! Public methods enqueue commands on a bounded channel; a single worker task
//! owns the swarm session, polls it on a fixed interval, publishes fresh
//! counters through each handle's watch channel and raises `Done`/`Error`
//! notifications.

mod command;
mod error;
/// Session abstraction and the in-memory / librqbit implementations.
pub mod session;
mod worker;

pub use error::EngineError;
pub use session::{Backend, MemoryProfile};

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use command::EngineCommand;
use reelfetch_transfer_core::{
    Descriptor, EngineEvent, EngineNotifications, StopOptions, TransferEngine, TransferHandle,
    TransferResult,
};
use tokio::sync::{broadcast, mpsc, oneshot};

const COMMAND_BUFFER: usize = 128;
const NOTIFICATION_BUFFER: usize = 256;

/// Default interval between backend polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Cloneable front for the swarm worker.
#[derive(Clone)]
pub struct SwarmEngine {
    commands: mpsc::Sender<EngineCommand>,
    notifications: broadcast::Sender<EngineEvent>,
}

impl SwarmEngine {
    /// Spawn the worker for `backend`, polling every `poll_interval`.
    ///
    /// # Errors
    ///
    /// Returns an error if the swarm backend cannot be initialised.
    pub async fn spawn(backend: Backend, poll_interval: Duration) -> Result<Self, EngineError> {
        let session = session::create_session(backend)
            .await
            .map_err(|err| EngineError::backend("spawn", &err))?;
        let (commands, rx) = mpsc::channel(COMMAND_BUFFER);
        let (notifications, _) = broadcast::channel(NOTIFICATION_BUFFER);
        worker::spawn(notifications.clone(), rx, session, poll_interval);
        Ok(Self {
            commands,
            notifications,
        })
    }

    async fn request<T>(
        &self,
        operation: &'static str,
        build: impl FnOnce(oneshot::Sender<T>) -> EngineCommand,
    ) -> Result<T, EngineError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(build(tx))
            .await
            .map_err(|_| EngineError::SessionUnavailable { operation })?;
        rx.await
            .map_err(|_| EngineError::SessionUnavailable { operation })
    }
}

#[async_trait]
impl TransferEngine for SwarmEngine {
    async fn start(
        &self,
        descriptor: &Descriptor,
        destination_dir: &Path,
    ) -> TransferResult<TransferHandle> {
        self.request("start", |respond_to| EngineCommand::Start {
            descriptor: descriptor.clone(),
            destination_dir: destination_dir.to_path_buf(),
            respond_to,
        })
        .await
        .and_then(|result| result)
        .map_err(|err| err.into_transfer(Some(descriptor)))
    }

    async fn get(&self, descriptor: &Descriptor) -> TransferResult<Option<TransferHandle>> {
        self.request("get", |respond_to| EngineCommand::Get {
            key: descriptor.key().to_string(),
            respond_to,
        })
        .await
        .map_err(|err| err.into_transfer(Some(descriptor)))
    }

    async fn stop(&self, handle: &TransferHandle, options: StopOptions) -> TransferResult<()> {
        self.request("stop", |respond_to| EngineCommand::Stop {
            handle: handle.id(),
            purge_files: options.purge_files,
            respond_to,
        })
        .await
        .and_then(|result| result)
        .map_err(|err| err.into_transfer(Some(handle.descriptor())))
    }

    async fn active(&self) -> TransferResult<Vec<TransferHandle>> {
        self.request("active", |respond_to| EngineCommand::Active { respond_to })
            .await
            .map_err(|err| err.into_transfer(None))
    }

    fn subscribe(&self) -> EngineNotifications {
        self.notifications.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reelfetch_transfer_core::TransferError;
    use tokio::time::timeout;

    const FAST_POLL: Duration = Duration::from_millis(5);

    fn descriptor(value: &str) -> Descriptor {
        Descriptor::parse(value).expect("descriptor")
    }

    #[tokio::test]
    async fn start_get_and_stop_round_trip_through_worker() {
        let engine = SwarmEngine::spawn(Backend::Memory(MemoryProfile::idle()), FAST_POLL)
            .await
            .expect("engine");
        let magnet = descriptor("magnet:?xt=urn:btih:abc");
        let handle = engine
            .start(&magnet, Path::new("/downloads"))
            .await
            .expect("start");

        let found = engine.get(&magnet).await.expect("get").expect("handle");
        assert_eq!(found.id(), handle.id());
        assert_eq!(engine.active().await.expect("active").len(), 1);

        engine
            .stop(&handle, StopOptions::pause())
            .await
            .expect("stop");
        assert!(engine.get(&magnet).await.expect("get").is_none());
        assert!(handle.is_released());

        let err = engine
            .stop(&handle, StopOptions::cancel())
            .await
            .expect_err("second stop");
        assert!(matches!(
            err,
            TransferError::Engine {
                operation: "stop",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn simulated_transfer_notifies_done() {
        let engine = SwarmEngine::spawn(
            Backend::Memory(MemoryProfile::simulated(250, 1_000)),
            FAST_POLL,
        )
        .await
        .expect("engine");
        let mut notifications = engine.subscribe();
        let handle = engine
            .start(&descriptor("magnet:?xt=abc"), Path::new("/d"))
            .await
            .expect("start");

        let event = timeout(Duration::from_secs(2), notifications.recv())
            .await
            .expect("timed out waiting for done")
            .expect("notification");
        assert_eq!(
            event,
            EngineEvent::Done {
                handle: handle.id()
            }
        );
        assert!(handle.stats().is_complete());
    }
}
