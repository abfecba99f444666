#![allow(clippy::redundant_pub_crate)]

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::time::Duration;

use reelfetch_transfer_core::{Descriptor, EngineEvent, HandleId, HandleStats, TransferHandle};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::command::EngineCommand;
use crate::error::EngineError;
use crate::session::{SessionUpdate, SwarmSession};

pub(crate) fn spawn(
    notifications: broadcast::Sender<EngineEvent>,
    mut commands: mpsc::Receiver<EngineCommand>,
    session: Box<dyn SwarmSession>,
    poll_interval: Duration,
) {
    tokio::spawn(async move {
        let mut worker = Worker::new(notifications, session);
        let mut poll = tokio::time::interval(poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                command = commands.recv() => {
                    match command {
                        Some(command) => worker.handle(command).await,
                        None => break,
                    }
                }
                _ = poll.tick() => worker.poll_session().await,
            }
        }
        debug!(handles = worker.handles.len(), "swarm worker stopped");
    });
}

struct Tracked {
    view: TransferHandle,
    stats: watch::Sender<HandleStats>,
    finished: bool,
    failed: bool,
}

struct Worker {
    notifications: broadcast::Sender<EngineEvent>,
    session: Box<dyn SwarmSession>,
    handles: HashMap<HandleId, Tracked>,
    by_key: HashMap<String, HandleId>,
    next_id: u64,
    health: BTreeSet<&'static str>,
}

impl Worker {
    fn new(notifications: broadcast::Sender<EngineEvent>, session: Box<dyn SwarmSession>) -> Self {
        Self {
            notifications,
            session,
            handles: HashMap::new(),
            by_key: HashMap::new(),
            next_id: 1,
            health: BTreeSet::new(),
        }
    }

    async fn handle(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::Start {
                descriptor,
                destination_dir,
                respond_to,
            } => {
                let result = self.handle_start(descriptor, destination_dir).await;
                let _ = respond_to.send(result);
            }
            EngineCommand::Get { key, respond_to } => {
                let handle = self
                    .by_key
                    .get(&key)
                    .and_then(|id| self.handles.get(id))
                    .map(|tracked| tracked.view.clone());
                let _ = respond_to.send(handle);
            }
            EngineCommand::Stop {
                handle,
                purge_files,
                respond_to,
            } => {
                let result = self.handle_stop(handle, purge_files).await;
                let _ = respond_to.send(result);
            }
            EngineCommand::Active { respond_to } => {
                let mut handles: Vec<TransferHandle> = self
                    .handles
                    .values()
                    .map(|tracked| tracked.view.clone())
                    .collect();
                handles.sort_by_key(TransferHandle::id);
                let _ = respond_to.send(handles);
            }
        }
    }

    async fn handle_start(
        &mut self,
        descriptor: Descriptor,
        destination_dir: PathBuf,
    ) -> Result<TransferHandle, EngineError> {
        if let Some(existing) = self
            .by_key
            .get(descriptor.key())
            .and_then(|id| self.handles.get(id))
        {
            debug!(
                handle = %existing.view.id(),
                descriptor = %descriptor,
                "descriptor already registered; returning existing handle"
            );
            return Ok(existing.view.clone());
        }

        let id = HandleId(self.next_id);
        self.next_id = self.next_id.saturating_add(1);
        if let Err(err) = self.session.add(id, &descriptor, &destination_dir).await {
            self.mark_degraded("session", &format!("{err:#}"));
            return Err(EngineError::backend("start", &err));
        }
        self.mark_recovered("session");

        let (stats, receiver) = watch::channel(HandleStats::default());
        let view = TransferHandle::new(id, descriptor.clone(), destination_dir, receiver);
        self.by_key.insert(descriptor.key().to_string(), id);
        self.handles.insert(
            id,
            Tracked {
                view: view.clone(),
                stats,
                finished: false,
                failed: false,
            },
        );
        info!(
            handle = %id,
            descriptor = %descriptor,
            destination = %view.destination_dir().display(),
            "transfer registered"
        );
        Ok(view)
    }

    async fn handle_stop(&mut self, id: HandleId, purge_files: bool) -> Result<(), EngineError> {
        if !self.handles.contains_key(&id) {
            return Err(EngineError::UnknownHandle {
                operation: "stop",
                handle: id,
            });
        }
        if let Err(err) = self.session.remove(id, purge_files).await {
            self.mark_degraded("session", &format!("{err:#}"));
            return Err(EngineError::backend("stop", &err));
        }
        if let Some(tracked) = self.handles.remove(&id) {
            self.by_key.remove(tracked.view.descriptor().key());
        }
        info!(handle = %id, purge_files, "transfer detached");
        Ok(())
    }

    async fn poll_session(&mut self) {
        match self.session.poll().await {
            Ok(updates) => {
                for update in updates {
                    self.apply(update);
                }
                self.mark_recovered("session");
            }
            Err(err) => self.mark_degraded("session", &format!("{err:#}")),
        }
    }

    fn apply(&mut self, update: SessionUpdate) {
        let Some(tracked) = self.handles.get_mut(&update.handle) else {
            return;
        };
        let SessionUpdate {
            handle,
            mut stats,
            error,
        } = update;
        let complete = stats.is_complete();
        stats.error.clone_from(&error);
        tracked.stats.send_replace(stats);

        if let Some(message) = error {
            if !tracked.failed {
                tracked.failed = true;
                warn!(handle = %handle, error = %message, "transfer failed");
                let _ = self.notifications.send(EngineEvent::Error { handle, message });
            }
            return;
        }

        if complete && !tracked.finished {
            tracked.finished = true;
            info!(handle = %handle, "transfer complete");
            let _ = self.notifications.send(EngineEvent::Done { handle });
        }
    }

    fn mark_degraded(&mut self, component: &'static str, detail: &str) {
        if self.health.insert(component) {
            warn!(component, detail = %detail, "swarm component degraded");
        } else {
            debug!(component, detail = %detail, "swarm component still degraded");
        }
    }

    fn mark_recovered(&mut self, component: &'static str) {
        if self.health.remove(component) {
            info!(component, "swarm component recovered");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{MemoryProfile, MemorySession};
    use std::path::Path;

    fn worker(profile: MemoryProfile) -> (Worker, broadcast::Receiver<EngineEvent>) {
        let (notifications, receiver) = broadcast::channel(16);
        (
            Worker::new(notifications, Box::new(MemorySession::new(profile))),
            receiver,
        )
    }

    fn descriptor(value: &str) -> Descriptor {
        Descriptor::parse(value).expect("descriptor")
    }

    #[tokio::test]
    async fn start_is_idempotent_per_descriptor() {
        let (mut worker, _rx) = worker(MemoryProfile::idle());
        let first = worker
            .handle_start(descriptor("magnet:?xt=urn:btih:ABC"), "/d".into())
            .await
            .expect("start");
        let second = worker
            .handle_start(descriptor("magnet:?xt=urn:btih:abc&dn=x"), "/other".into())
            .await
            .expect("start");
        assert_eq!(first.id(), second.id());
        assert_eq!(second.destination_dir(), Path::new("/d"));
        assert_eq!(worker.handles.len(), 1);
    }

    #[tokio::test]
    async fn done_fires_once_per_handle() {
        let (mut worker, mut rx) = worker(MemoryProfile::simulated(600, 1_000));
        let handle = worker
            .handle_start(descriptor("magnet:?xt=abc"), "/d".into())
            .await
            .expect("start");

        for _ in 0..4 {
            worker.poll_session().await;
        }
        assert!(handle.stats().is_complete());
        assert_eq!(
            rx.try_recv().expect("done"),
            EngineEvent::Done {
                handle: handle.id()
            }
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn backend_failures_surface_once_as_error_events() {
        let (mut worker, mut rx) = worker(MemoryProfile::simulated(10, 100).failing("bad"));
        let handle = worker
            .handle_start(descriptor("magnet:?xt=bad"), "/d".into())
            .await
            .expect("start");
        worker.poll_session().await;
        worker.poll_session().await;
        match rx.try_recv().expect("error event") {
            EngineEvent::Error { handle: id, message } => {
                assert_eq!(id, handle.id());
                assert_eq!(message, "no reachable peers");
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn stop_releases_handle_and_rejects_unknown_ids() {
        let (mut worker, _rx) = worker(MemoryProfile::idle());
        let handle = worker
            .handle_start(descriptor("magnet:?xt=abc"), "/d".into())
            .await
            .expect("start");
        worker
            .handle_stop(handle.id(), true)
            .await
            .expect("stop");
        assert!(handle.is_released());
        assert!(worker.by_key.is_empty());
        assert!(matches!(
            worker.handle_stop(handle.id(), true).await,
            Err(EngineError::UnknownHandle { .. })
        ));
    }
}
