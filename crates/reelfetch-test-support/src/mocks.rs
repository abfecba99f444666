//! Fake collaborators that record how they were driven.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use reelfetch_transfer_core::{
    Descriptor, EngineEvent, EngineNotifications, HandleId, HandleStats, StopOptions,
    TransferEngine, TransferError, TransferHandle, TransferResult,
};
use tokio::sync::{broadcast, watch};

/// A `start` call observed by [`RecordingEngine`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartCall {
    /// Descriptor passed to the engine.
    pub descriptor: Descriptor,
    /// Destination passed to the engine.
    pub destination_dir: PathBuf,
}

/// A `stop` call observed by [`RecordingEngine`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopCall {
    /// Handle that was stopped.
    pub handle: HandleId,
    /// Descriptor the handle was fetching.
    pub descriptor: Descriptor,
    /// Options passed to the engine.
    pub options: StopOptions,
}

struct Registered {
    view: TransferHandle,
    stats: watch::Sender<HandleStats>,
    payload: Option<PathBuf>,
}

#[derive(Default)]
struct Inner {
    handles: HashMap<HandleId, Registered>,
    by_key: HashMap<String, HandleId>,
    next_id: u64,
    starts: Vec<StartCall>,
    stops: Vec<StopCall>,
    failing_starts: HashSet<String>,
    materialize: bool,
}

/// In-memory [`TransferEngine`] whose handles are driven by the test.
///
/// Every `start` and `stop` is recorded. Tests push counters with
/// [`RecordingEngine::set_stats`] and raise notifications with
/// [`RecordingEngine::complete`] or [`RecordingEngine::fail`].
#[derive(Clone)]
pub struct RecordingEngine {
    inner: Arc<Mutex<Inner>>,
    notifications: broadcast::Sender<EngineEvent>,
    gate: Arc<watch::Sender<bool>>,
}

impl Default for RecordingEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingEngine {
    /// Engine that accepts every start immediately.
    #[must_use]
    pub fn new() -> Self {
        Self::with_notification_capacity(64)
    }

    /// Engine whose notification channel keeps only `capacity` undelivered
    /// events, so a slow subscriber observes `Lagged`.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn with_notification_capacity(capacity: usize) -> Self {
        let (notifications, _) = broadcast::channel(capacity);
        let (gate, _) = watch::channel(true);
        Self {
            inner: Arc::new(Mutex::new(Inner {
                next_id: 1,
                ..Inner::default()
            })),
            notifications,
            gate: Arc::new(gate),
        }
    }

    /// Write a placeholder payload file per handle so purge behaviour is observable.
    #[must_use]
    pub fn materializing(self) -> Self {
        self.lock().materialize = true;
        self
    }

    /// Make future starts for `descriptor` fail.
    pub fn fail_starts_for(&self, descriptor: &Descriptor) {
        self.lock()
            .failing_starts
            .insert(descriptor.key().to_string());
    }

    /// Block `start` calls until [`RecordingEngine::release_starts`] is called.
    pub fn hold_starts(&self) {
        self.gate.send_replace(false);
    }

    /// Let held and future `start` calls proceed.
    pub fn release_starts(&self) {
        self.gate.send_replace(true);
    }

    /// Every `start` call seen so far, including ones still held.
    #[must_use]
    pub fn starts(&self) -> Vec<StartCall> {
        self.lock().starts.clone()
    }

    /// Every successful `stop` call seen so far.
    #[must_use]
    pub fn stops(&self) -> Vec<StopCall> {
        self.lock().stops.clone()
    }

    /// Number of distinct handles ever created.
    #[must_use]
    pub fn handles_created(&self) -> u64 {
        self.lock().next_id - 1
    }

    /// Live handle for `descriptor`, if any.
    #[must_use]
    pub fn handle_for(&self, descriptor: &Descriptor) -> Option<TransferHandle> {
        let inner = self.lock();
        inner
            .by_key
            .get(descriptor.key())
            .and_then(|id| inner.handles.get(id))
            .map(|registered| registered.view.clone())
    }

    /// Placeholder payload path for `descriptor` under `destination_dir`.
    #[must_use]
    pub fn payload_path(destination_dir: &Path, descriptor: &Descriptor) -> PathBuf {
        destination_dir.join(format!("{}.part", descriptor.key()))
    }

    /// Publish new counters for the handle fetching `descriptor`.
    ///
    /// Returns `false` when no live handle exists.
    pub fn set_stats(&self, descriptor: &Descriptor, stats: HandleStats) -> bool {
        let inner = self.lock();
        let Some(registered) = inner
            .by_key
            .get(descriptor.key())
            .and_then(|id| inner.handles.get(id))
        else {
            return false;
        };
        registered.stats.send_replace(stats);
        true
    }

    /// Mark the handle for `descriptor` complete with `files` and raise `Done`.
    ///
    /// Returns `false` when no live handle exists.
    pub fn complete(&self, descriptor: &Descriptor, files: &[&str]) -> bool {
        let handle = {
            let inner = self.lock();
            let Some(id) = inner.by_key.get(descriptor.key()).copied() else {
                return false;
            };
            if let Some(registered) = inner.handles.get(&id) {
                registered.stats.send_modify(|stats| {
                    stats.fraction = 1.0;
                    stats.bytes_downloaded = stats.total_bytes.unwrap_or(stats.bytes_downloaded);
                    stats.files = files.iter().map(|file| (*file).to_string()).collect();
                });
            }
            id
        };
        let _ = self.notifications.send(EngineEvent::Done { handle });
        true
    }

    /// Record a failure on the handle fetching `descriptor` and raise `Error`.
    ///
    /// Returns `false` when no live handle exists.
    pub fn fail(&self, descriptor: &Descriptor, message: &str) -> bool {
        let handle = {
            let inner = self.lock();
            let Some(id) = inner.by_key.get(descriptor.key()).copied() else {
                return false;
            };
            if let Some(registered) = inner.handles.get(&id) {
                registered
                    .stats
                    .send_modify(|stats| stats.error = Some(message.to_string()));
            }
            id
        };
        let _ = self.notifications.send(EngineEvent::Error {
            handle,
            message: message.to_string(),
        });
        true
    }

    /// Raise an arbitrary notification, e.g. for a handle that no longer exists.
    pub fn notify(&self, event: EngineEvent) {
        let _ = self.notifications.send(event);
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl TransferEngine for RecordingEngine {
    async fn start(
        &self,
        descriptor: &Descriptor,
        destination_dir: &Path,
    ) -> TransferResult<TransferHandle> {
        self.lock().starts.push(StartCall {
            descriptor: descriptor.clone(),
            destination_dir: destination_dir.to_path_buf(),
        });

        let mut open = self.gate.subscribe();
        open.wait_for(|open| *open)
            .await
            .map_err(|_| TransferError::ChannelClosed { operation: "start" })?;

        let mut inner = self.lock();
        if inner.failing_starts.contains(descriptor.key()) {
            return Err(TransferError::engine(
                "start",
                Some(descriptor.to_string()),
                "no reachable peers",
            ));
        }
        if let Some(existing) = inner
            .by_key
            .get(descriptor.key())
            .and_then(|id| inner.handles.get(id))
        {
            return Ok(existing.view.clone());
        }

        let id = HandleId(inner.next_id);
        inner.next_id += 1;
        let payload = if inner.materialize {
            let path = Self::payload_path(destination_dir, descriptor);
            fs::create_dir_all(destination_dir)
                .and_then(|()| fs::write(&path, b"partial"))
                .map_err(|err| {
                    TransferError::engine("start", Some(descriptor.to_string()), err)
                })?;
            Some(path)
        } else {
            None
        };
        let (stats, receiver) = watch::channel(HandleStats::default());
        let view = TransferHandle::new(
            id,
            descriptor.clone(),
            destination_dir.to_path_buf(),
            receiver,
        );
        inner.by_key.insert(descriptor.key().to_string(), id);
        inner.handles.insert(
            id,
            Registered {
                view: view.clone(),
                stats,
                payload,
            },
        );
        Ok(view)
    }

    async fn get(&self, descriptor: &Descriptor) -> TransferResult<Option<TransferHandle>> {
        Ok(self.handle_for(descriptor))
    }

    async fn stop(&self, handle: &TransferHandle, options: StopOptions) -> TransferResult<()> {
        let mut inner = self.lock();
        let Some(registered) = inner.handles.remove(&handle.id()) else {
            return Err(TransferError::engine(
                "stop",
                Some(handle.descriptor().to_string()),
                "unknown handle",
            ));
        };
        inner.by_key.remove(handle.descriptor().key());
        if options.purge_files
            && let Some(path) = registered.payload.as_ref()
        {
            let _ = fs::remove_file(path);
        }
        inner.stops.push(StopCall {
            handle: handle.id(),
            descriptor: handle.descriptor().clone(),
            options,
        });
        Ok(())
    }

    async fn active(&self) -> TransferResult<Vec<TransferHandle>> {
        let inner = self.lock();
        let mut handles: Vec<TransferHandle> = inner
            .handles
            .values()
            .map(|registered| registered.view.clone())
            .collect();
        handles.sort_by_key(TransferHandle::id);
        Ok(handles)
    }

    fn subscribe(&self) -> EngineNotifications {
        self.notifications.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn magnet() -> Descriptor {
        Descriptor::parse("magnet:?xt=urn:btih:abc").expect("descriptor")
    }

    #[tokio::test]
    async fn records_starts_and_reuses_handles() -> TransferResult<()> {
        let engine = RecordingEngine::new();
        let first = engine.start(&magnet(), Path::new("/d")).await?;
        let second = engine.start(&magnet(), Path::new("/d")).await?;
        assert_eq!(first.id(), second.id());
        assert_eq!(engine.starts().len(), 2);
        assert_eq!(engine.handles_created(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn purge_removes_materialized_payload() -> TransferResult<()> {
        let temp = TempDir::new().expect("tempdir");
        let engine = RecordingEngine::new().materializing();
        let handle = engine.start(&magnet(), temp.path()).await?;
        let payload = RecordingEngine::payload_path(temp.path(), &magnet());
        assert!(payload.exists());

        engine.stop(&handle, StopOptions::cancel()).await?;
        assert!(!payload.exists());
        assert!(handle.is_released());
        assert_eq!(engine.stops()[0].options, StopOptions::cancel());
        Ok(())
    }

    #[tokio::test]
    async fn small_notification_channel_lags_slow_subscribers() {
        let engine = RecordingEngine::with_notification_capacity(1);
        let mut notifications = engine.subscribe();
        for id in 0..3 {
            engine.notify(EngineEvent::Done {
                handle: HandleId(id),
            });
        }
        assert!(matches!(
            notifications.recv().await,
            Err(broadcast::error::RecvError::Lagged(2))
        ));
        assert_eq!(
            notifications.recv().await.expect("newest kept"),
            EngineEvent::Done {
                handle: HandleId(2)
            }
        );
    }

    #[tokio::test]
    async fn complete_updates_stats_and_notifies() -> TransferResult<()> {
        let engine = RecordingEngine::new();
        let mut notifications = engine.subscribe();
        let handle = engine.start(&magnet(), Path::new("/d")).await?;
        assert!(engine.complete(&magnet(), &["Movie/movie.mkv"]));
        assert!(handle.stats().is_complete());
        assert_eq!(
            notifications.recv().await.expect("notification"),
            EngineEvent::Done {
                handle: handle.id()
            }
        );
        Ok(())
    }
}
