//! Session registry: the single owner of every session record.
//!
//! # Design
//! - One actor task owns all records. Control commands, resolution results,
//!   engine start results and engine notifications are messages processed
//!   serially, so no command or callback races on a record.
//! - Resolution and engine start run on spawned tasks and report back tagged
//!   with an attempt number; stale reports are ignored.
//! - A descriptor is claimed by at most one session while it is starting or
//!   bound to an engine handle. A claim left behind by a cancelled start is
//!   held until that start settles and its handle has been purged.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use reelfetch_events::{Event, EventBus, PersistedEntry};
use reelfetch_transfer_core::{
    Descriptor, EngineEvent, EngineNotifications, HandleId, LogicalId, SearchResult,
    SessionRecord, SessionState, StopOptions, TransferEngine, TransferError, TransferHandle,
    TransferResult,
};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::reporter::{DEFAULT_PROGRESS_INTERVAL, ProgressReporter};
use crate::resolver::ContentResolver;

const MAILBOX_CAPACITY: usize = 128;

/// File extensions treated as the playable result of a transfer.
pub const MEDIA_EXTENSIONS: &[&str] = &[
    "mp4", "mkv", "avi", "mov", "m4v", "webm", "wmv", "flv", "mpg", "mpeg", "ts",
];

/// Tunables for the registry actor.
#[derive(Debug, Clone, Copy)]
pub struct RegistrySettings {
    /// Cadence of progress samples per active session.
    pub progress_interval: Duration,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }
}

/// How a cancel request addresses its session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionTarget {
    /// The session currently associated with a descriptor.
    Descriptor(Descriptor),
    /// A session by its logical id; reaches sessions still resolving.
    Logical(LogicalId),
}

enum Message {
    Start {
        result: SearchResult,
        destination_dir: PathBuf,
        respond_to: oneshot::Sender<LogicalId>,
    },
    Pause {
        descriptor: Descriptor,
        respond_to: oneshot::Sender<bool>,
    },
    Cancel {
        target: SessionTarget,
        respond_to: oneshot::Sender<bool>,
    },
    Restore {
        entries: Vec<PersistedEntry>,
        respond_to: oneshot::Sender<Vec<PersistedEntry>>,
    },
    List {
        respond_to: oneshot::Sender<Vec<SessionRecord>>,
    },
    Get {
        logical_id: LogicalId,
        respond_to: oneshot::Sender<Option<SessionRecord>>,
    },
    Snapshot {
        respond_to: oneshot::Sender<Vec<PersistedEntry>>,
    },
    Shutdown {
        respond_to: oneshot::Sender<Vec<PersistedEntry>>,
    },
    Resolved {
        logical_id: LogicalId,
        attempt: u64,
        outcome: TransferResult<Descriptor>,
    },
    Started {
        logical_id: LogicalId,
        attempt: u64,
        outcome: TransferResult<TransferHandle>,
    },
}

/// Cloneable front for the registry actor.
#[derive(Clone)]
pub struct SessionRegistry {
    mailbox: mpsc::Sender<Message>,
}

impl SessionRegistry {
    /// Spawn the actor that owns every session record.
    #[must_use]
    pub fn spawn(
        engine: Arc<dyn TransferEngine>,
        resolver: ContentResolver,
        bus: EventBus,
        settings: RegistrySettings,
    ) -> Self {
        let (mailbox, inbox) = mpsc::channel(MAILBOX_CAPACITY);
        let notifications = engine.subscribe();
        let actor = RegistryActor {
            engine,
            resolver,
            bus,
            settings,
            mailbox: mailbox.downgrade(),
            records: HashMap::new(),
            claims: HashMap::new(),
            by_handle: HashMap::new(),
            settling: HashMap::new(),
            next_attempt: 1,
            next_seq: 1,
        };
        tokio::spawn(actor.run(inbox, notifications));
        Self { mailbox }
    }

    async fn request<T>(
        &self,
        operation: &'static str,
        build: impl FnOnce(oneshot::Sender<T>) -> Message,
    ) -> TransferResult<T> {
        let (respond_to, reply) = oneshot::channel();
        self.mailbox
            .send(build(respond_to))
            .await
            .map_err(|_| TransferError::ChannelClosed { operation })?;
        reply
            .await
            .map_err(|_| TransferError::ChannelClosed { operation })
    }

    /// Start or resume the session for `result`, writing into `destination_dir`
    /// when a new record is created.
    ///
    /// Requests for a descriptor another session already holds are dropped;
    /// the returned id is the one the request addressed either way.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::ChannelClosed`] after shutdown.
    pub async fn start(
        &self,
        result: SearchResult,
        destination_dir: PathBuf,
    ) -> TransferResult<LogicalId> {
        self.request("start", |respond_to| Message::Start {
            result,
            destination_dir,
            respond_to,
        })
        .await
    }

    /// Pause the active session for `descriptor`. Returns whether anything changed.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::ChannelClosed`] after shutdown.
    pub async fn pause(&self, descriptor: Descriptor) -> TransferResult<bool> {
        self.request("pause", |respond_to| Message::Pause {
            descriptor,
            respond_to,
        })
        .await
    }

    /// Cancel and remove a session. Returns whether a record was removed.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::ChannelClosed`] after shutdown.
    pub async fn cancel(&self, target: SessionTarget) -> TransferResult<bool> {
        self.request("cancel", |respond_to| Message::Cancel { target, respond_to })
            .await
    }

    /// Re-arm sessions from a snapshot and publish one batched restore event.
    ///
    /// Returns the entries that were restored.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::ChannelClosed`] after shutdown.
    pub async fn restore(
        &self,
        entries: Vec<PersistedEntry>,
    ) -> TransferResult<Vec<PersistedEntry>> {
        self.request("restore", |respond_to| Message::Restore {
            entries,
            respond_to,
        })
        .await
    }

    /// Every record, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::ChannelClosed`] after shutdown.
    pub async fn list(&self) -> TransferResult<Vec<SessionRecord>> {
        self.request("list", |respond_to| Message::List { respond_to })
            .await
    }

    /// One record by logical id.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::ChannelClosed`] after shutdown.
    pub async fn get(&self, logical_id: LogicalId) -> TransferResult<Option<SessionRecord>> {
        self.request("get", |respond_to| Message::Get {
            logical_id,
            respond_to,
        })
        .await
    }

    /// Persisted projection of every session still wanted.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::ChannelClosed`] after shutdown.
    pub async fn snapshot(&self) -> TransferResult<Vec<PersistedEntry>> {
        self.request("snapshot", |respond_to| Message::Snapshot { respond_to })
            .await
    }

    /// Snapshot wanted sessions, detach every handle and stop the actor.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::ChannelClosed`] if the actor already stopped.
    pub async fn shutdown(&self) -> TransferResult<Vec<PersistedEntry>> {
        self.request("shutdown", |respond_to| Message::Shutdown { respond_to })
            .await
    }
}

enum Binding {
    Detached,
    Resolving {
        attempt: u64,
    },
    Starting {
        attempt: u64,
    },
    Bound {
        handle: TransferHandle,
        reporter: CancellationToken,
    },
}

struct Entry {
    record: SessionRecord,
    seq: u64,
    source: Option<SearchResult>,
    binding: Binding,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Claim {
    Session(LogicalId),
    Settling(u64),
}

struct RegistryActor {
    engine: Arc<dyn TransferEngine>,
    resolver: ContentResolver,
    bus: EventBus,
    settings: RegistrySettings,
    mailbox: mpsc::WeakSender<Message>,
    records: HashMap<LogicalId, Entry>,
    claims: HashMap<Descriptor, Claim>,
    by_handle: HashMap<HandleId, LogicalId>,
    settling: HashMap<u64, Descriptor>,
    next_attempt: u64,
    next_seq: u64,
}

impl RegistryActor {
    async fn run(
        mut self,
        mut inbox: mpsc::Receiver<Message>,
        mut notifications: EngineNotifications,
    ) {
        let mut engine_open = true;
        loop {
            tokio::select! {
                message = inbox.recv() => {
                    match message {
                        Some(Message::Shutdown { respond_to }) => {
                            let entries = self.shutdown().await;
                            let _ = respond_to.send(entries);
                            break;
                        }
                        Some(message) => self.handle(message).await,
                        None => break,
                    }
                }
                notification = notifications.recv(), if engine_open => {
                    match notification {
                        Ok(event) => self.on_engine_event(event).await,
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(skipped, "engine notifications lagged; reconciling");
                            self.reconcile().await;
                        }
                        Err(RecvError::Closed) => {
                            warn!("engine notification channel closed");
                            engine_open = false;
                        }
                    }
                }
            }
        }
        debug!(records = self.records.len(), "session registry stopped");
    }

    async fn handle(&mut self, message: Message) {
        match message {
            Message::Start {
                result,
                destination_dir,
                respond_to,
            } => {
                let logical_id = self.on_start(result, destination_dir);
                let _ = respond_to.send(logical_id);
            }
            Message::Pause {
                descriptor,
                respond_to,
            } => {
                let changed = self.on_pause(&descriptor).await;
                let _ = respond_to.send(changed);
            }
            Message::Cancel { target, respond_to } => {
                let removed = self.on_cancel(&target).await;
                let _ = respond_to.send(removed);
            }
            Message::Restore {
                entries,
                respond_to,
            } => {
                let restored = self.on_restore(entries);
                let _ = respond_to.send(restored);
            }
            Message::List { respond_to } => {
                let _ = respond_to.send(self.ordered().map(|entry| entry.record.clone()).collect());
            }
            Message::Get {
                logical_id,
                respond_to,
            } => {
                let record = self.records.get(&logical_id).map(|entry| entry.record.clone());
                let _ = respond_to.send(record);
            }
            Message::Snapshot { respond_to } => {
                let _ = respond_to.send(self.persisted());
            }
            Message::Shutdown { respond_to } => {
                let _ = respond_to.send(self.shutdown().await);
            }
            Message::Resolved {
                logical_id,
                attempt,
                outcome,
            } => self.on_resolved(logical_id, attempt, outcome).await,
            Message::Started {
                logical_id,
                attempt,
                outcome,
            } => self.on_started(&logical_id, attempt, outcome).await,
        }
    }

    fn ordered(&self) -> impl Iterator<Item = &Entry> {
        let mut entries: Vec<&Entry> = self.records.values().collect();
        entries.sort_by_key(|entry| entry.seq);
        entries.into_iter()
    }

    fn persisted(&self) -> Vec<PersistedEntry> {
        self.ordered()
            .filter_map(|entry| entry.record.to_persisted())
            .collect()
    }

    fn attempt(&mut self) -> u64 {
        let attempt = self.next_attempt;
        self.next_attempt = self.next_attempt.saturating_add(1);
        attempt
    }

    fn insert(&mut self, record: SessionRecord, source: Option<SearchResult>) {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.saturating_add(1);
        self.records.insert(
            record.logical_id.clone(),
            Entry {
                record,
                seq,
                source,
                binding: Binding::Detached,
            },
        );
    }

    /// Whether `descriptor` is held by a session other than `logical_id`.
    fn held_elsewhere(&self, descriptor: &Descriptor, logical_id: &LogicalId) -> bool {
        match self.claims.get(descriptor) {
            Some(Claim::Session(owner)) => owner != logical_id,
            Some(Claim::Settling(_)) => true,
            None => false,
        }
    }

    fn release_claim(&mut self, descriptor: &Descriptor, logical_id: &LogicalId) {
        if self.claims.get(descriptor) == Some(&Claim::Session(logical_id.clone())) {
            self.claims.remove(descriptor);
        }
    }

    fn suppress_duplicate(&self, logical_id: &LogicalId, descriptor: &Descriptor) {
        debug!(
            logical_id = %logical_id,
            descriptor = %descriptor,
            "descriptor already held by another session; request dropped"
        );
        self.bus.publish(Event::DuplicateSuppressed {
            logical_id: logical_id.to_string(),
            descriptor: descriptor.to_string(),
        });
    }

    fn on_start(&mut self, result: SearchResult, destination_dir: PathBuf) -> LogicalId {
        let logical_id = result.logical_id();
        let state = self.records.get(&logical_id).map(|entry| entry.record.state);
        match state {
            None => self.admit(&logical_id, result, destination_dir),
            Some(SessionState::Paused) => self.resume(&logical_id),
            Some(SessionState::Failed) => self.retry(&logical_id),
            Some(state) => {
                debug!(logical_id = %logical_id, ?state, "start ignored for session in this state");
            }
        }
        logical_id
    }

    fn admit(&mut self, logical_id: &LogicalId, result: SearchResult, destination_dir: PathBuf) {
        match ContentResolver::embedded(&result) {
            Some(Ok(descriptor)) => {
                if self.held_elsewhere(&descriptor, logical_id) {
                    self.suppress_duplicate(logical_id, &descriptor);
                    return;
                }
                let record = SessionRecord::new(
                    logical_id.clone(),
                    result.title.clone(),
                    Some(descriptor),
                    destination_dir,
                );
                self.insert(record, Some(result));
                self.begin_start(logical_id, false);
            }
            Some(Err(err)) => {
                let record = SessionRecord::new(
                    logical_id.clone(),
                    result.title.clone(),
                    None,
                    destination_dir,
                );
                self.insert(record, Some(result));
                self.fail_detached(logical_id, &err);
            }
            None => {
                let record = SessionRecord::new(
                    logical_id.clone(),
                    result.title.clone(),
                    None,
                    destination_dir,
                );
                self.insert(record, Some(result));
                self.begin_resolve(logical_id);
            }
        }
    }

    fn begin_resolve(&mut self, logical_id: &LogicalId) {
        let attempt = self.attempt();
        let Some(entry) = self.records.get_mut(logical_id) else {
            return;
        };
        let Some(result) = entry.source.clone() else {
            return;
        };
        let Some(mailbox) = self.mailbox.upgrade() else {
            return;
        };
        entry.record.state = SessionState::PendingDescriptor;
        entry.binding = Binding::Resolving { attempt };
        let resolver = self.resolver.clone();
        let logical_id = logical_id.clone();
        debug!(logical_id = %logical_id, attempt, "resolving descriptor");
        tokio::spawn(async move {
            let outcome = resolver.resolve(&result).await;
            let _ = mailbox
                .send(Message::Resolved {
                    logical_id,
                    attempt,
                    outcome,
                })
                .await;
        });
    }

    async fn on_resolved(
        &mut self,
        logical_id: LogicalId,
        attempt: u64,
        outcome: TransferResult<Descriptor>,
    ) {
        let Some(entry) = self.records.get_mut(&logical_id) else {
            debug!(logical_id = %logical_id, "resolution finished for a removed session");
            return;
        };
        let current = matches!(
            entry.binding,
            Binding::Resolving { attempt: expected } if expected == attempt
        );
        if !current || entry.record.state != SessionState::PendingDescriptor {
            debug!(logical_id = %logical_id, attempt, "stale resolution ignored");
            return;
        }
        entry.binding = Binding::Detached;
        match outcome {
            Ok(descriptor) => {
                entry.record.set_descriptor(descriptor);
                let Some(descriptor) = entry.record.descriptor().cloned() else {
                    return;
                };
                if self.held_elsewhere(&descriptor, &logical_id) {
                    self.records.remove(&logical_id);
                    self.suppress_duplicate(&logical_id, &descriptor);
                    return;
                }
                if let Some(entry) = self.records.get_mut(&logical_id) {
                    entry.record.state = SessionState::Active;
                }
                self.begin_start(&logical_id, false);
            }
            Err(err) => self.fail(&logical_id, &err).await,
        }
    }

    fn begin_start(&mut self, logical_id: &LogicalId, is_restore: bool) {
        let attempt = self.attempt();
        let Some(entry) = self.records.get_mut(logical_id) else {
            return;
        };
        let Some(descriptor) = entry.record.descriptor().cloned() else {
            return;
        };
        let Some(mailbox) = self.mailbox.upgrade() else {
            return;
        };
        entry.binding = Binding::Starting { attempt };
        let destination_dir = entry.record.destination_dir.clone();
        self.claims
            .insert(descriptor.clone(), Claim::Session(logical_id.clone()));
        info!(
            logical_id = %logical_id,
            descriptor = %descriptor,
            destination = %destination_dir.display(),
            is_restore,
            "starting transfer"
        );
        let engine = Arc::clone(&self.engine);
        let logical_id = logical_id.clone();
        tokio::spawn(async move {
            let outcome = engine.start(&descriptor, &destination_dir).await;
            let _ = mailbox
                .send(Message::Started {
                    logical_id,
                    attempt,
                    outcome,
                })
                .await;
        });
    }

    async fn on_started(
        &mut self,
        logical_id: &LogicalId,
        attempt: u64,
        outcome: TransferResult<TransferHandle>,
    ) {
        if let Some(descriptor) = self.settling.remove(&attempt) {
            if let Ok(handle) = outcome {
                self.stop(&handle, StopOptions::cancel()).await;
            }
            if self.claims.get(&descriptor) == Some(&Claim::Settling(attempt)) {
                self.claims.remove(&descriptor);
            }
            debug!(logical_id = %logical_id, attempt, "cancelled start settled");
            return;
        }

        let Some(entry) = self.records.get_mut(logical_id) else {
            debug!(logical_id = %logical_id, attempt, "start finished for an unknown session");
            return;
        };
        let current = matches!(
            entry.binding,
            Binding::Starting { attempt: expected } if expected == attempt
        );
        if !current {
            debug!(logical_id = %logical_id, attempt, "stale start ignored");
            return;
        }
        entry.binding = Binding::Detached;
        let state = entry.record.state;
        let Some(descriptor) = entry.record.descriptor().cloned() else {
            return;
        };

        match (state, outcome) {
            (SessionState::Active, Ok(handle)) => self.bind(logical_id, handle).await,
            (SessionState::Active, Err(err)) => {
                self.release_claim(&descriptor, logical_id);
                self.fail(logical_id, &err).await;
            }
            (_, Ok(handle)) => {
                debug!(logical_id = %logical_id, ?state, "session left active while starting");
                self.release_claim(&descriptor, logical_id);
                self.stop(&handle, StopOptions::pause()).await;
            }
            (_, Err(err)) => {
                debug!(
                    logical_id = %logical_id,
                    ?state,
                    error = %err.describe(),
                    "start failed after session left active"
                );
                self.release_claim(&descriptor, logical_id);
            }
        }
    }

    async fn bind(&mut self, logical_id: &LogicalId, handle: TransferHandle) {
        let token = CancellationToken::new();
        let Some(entry) = self.records.get_mut(logical_id) else {
            return;
        };
        entry.record.engine_handle = Some(handle.id());
        entry.record.last_error = None;
        entry.binding = Binding::Bound {
            handle: handle.clone(),
            reporter: token.clone(),
        };
        self.by_handle.insert(handle.id(), logical_id.clone());
        info!(logical_id = %logical_id, handle = %handle.id(), "transfer bound");
        self.bus.publish(Event::DownloadStarted {
            logical_id: logical_id.to_string(),
            descriptor: handle.descriptor().to_string(),
        });

        // Notifications may have been raised before the start result arrived.
        let stats = handle.stats();
        if let Some(message) = stats.error {
            self.on_engine_failure(logical_id, message).await;
            return;
        }
        if stats.is_complete() {
            self.complete(logical_id).await;
            return;
        }
        ProgressReporter::new(
            logical_id.clone(),
            handle,
            self.bus.clone(),
            self.settings.progress_interval,
            token,
        )
        .spawn();
    }

    /// Detach the record's engine binding, returning the handle it held.
    fn detach(&mut self, logical_id: &LogicalId) -> Option<TransferHandle> {
        let entry = self.records.get_mut(logical_id)?;
        let (handle, reporter) = match std::mem::replace(&mut entry.binding, Binding::Detached) {
            Binding::Bound { handle, reporter } => (handle, reporter),
            other => {
                entry.binding = other;
                return None;
            }
        };
        reporter.cancel();
        entry.record.engine_handle = None;
        let descriptor = handle.descriptor().clone();
        self.by_handle.remove(&handle.id());
        self.release_claim(&descriptor, logical_id);
        Some(handle)
    }

    async fn stop(&self, handle: &TransferHandle, options: StopOptions) {
        if let Err(err) = self.engine.stop(handle, options).await {
            warn!(
                handle = %handle.id(),
                descriptor = %handle.descriptor(),
                purge_files = options.purge_files,
                error = %err.describe(),
                "engine stop failed"
            );
        }
    }

    async fn on_pause(&mut self, descriptor: &Descriptor) -> bool {
        let Some(Claim::Session(logical_id)) = self.claims.get(descriptor).cloned() else {
            debug!(descriptor = %descriptor, "pause ignored; descriptor not held");
            return false;
        };
        let Some(entry) = self.records.get_mut(&logical_id) else {
            return false;
        };
        if entry.record.state != SessionState::Active {
            return false;
        }
        entry.record.state = SessionState::Paused;
        if let Some(handle) = self.detach(&logical_id) {
            self.stop(&handle, StopOptions::pause()).await;
        }
        info!(logical_id = %logical_id, "session paused");
        true
    }

    fn resume(&mut self, logical_id: &LogicalId) {
        let Some(entry) = self.records.get_mut(logical_id) else {
            return;
        };
        if matches!(entry.binding, Binding::Starting { .. }) {
            // The in-flight start binds once it lands.
            entry.record.state = SessionState::Active;
            return;
        }
        let Some(descriptor) = entry.record.descriptor().cloned() else {
            return;
        };
        if self.held_elsewhere(&descriptor, logical_id) {
            self.suppress_duplicate(logical_id, &descriptor);
            return;
        }
        if let Some(entry) = self.records.get_mut(logical_id) {
            entry.record.state = SessionState::Active;
        }
        info!(logical_id = %logical_id, "session resumed");
        self.begin_start(logical_id, false);
    }

    fn retry(&mut self, logical_id: &LogicalId) {
        let Some(entry) = self.records.get_mut(logical_id) else {
            return;
        };
        entry.record.last_error = None;
        match entry.record.descriptor().cloned() {
            None if entry.source.is_some() => self.begin_resolve(logical_id),
            None => {
                debug!(logical_id = %logical_id, "retry ignored; nothing to resolve from");
            }
            Some(descriptor) => {
                if self.held_elsewhere(&descriptor, logical_id) {
                    self.suppress_duplicate(logical_id, &descriptor);
                    return;
                }
                if let Some(entry) = self.records.get_mut(logical_id) {
                    entry.record.state = SessionState::Active;
                }
                info!(logical_id = %logical_id, "retrying failed session");
                self.begin_start(logical_id, false);
            }
        }
    }

    fn target_of(&self, target: &SessionTarget) -> Option<LogicalId> {
        match target {
            SessionTarget::Logical(logical_id) => Some(logical_id.clone()),
            SessionTarget::Descriptor(descriptor) => match self.claims.get(descriptor) {
                Some(Claim::Session(owner)) => Some(owner.clone()),
                _ => self
                    .ordered()
                    .filter(|entry| entry.record.state != SessionState::Completed)
                    .find(|entry| entry.record.descriptor() == Some(descriptor))
                    .map(|entry| entry.record.logical_id.clone()),
            },
        }
    }

    async fn on_cancel(&mut self, target: &SessionTarget) -> bool {
        let Some(logical_id) = self.target_of(target) else {
            debug!(?target, "cancel ignored; no matching session");
            return false;
        };
        let Some(state) = self.records.get(&logical_id).map(|entry| entry.record.state) else {
            return false;
        };
        if state == SessionState::Completed {
            debug!(logical_id = %logical_id, "cancel ignored for completed session");
            return false;
        }

        let bound = self.detach(&logical_id);
        let Some(entry) = self.records.remove(&logical_id) else {
            return false;
        };
        let descriptor = entry.record.descriptor().cloned();
        match (bound, entry.binding, descriptor) {
            (Some(handle), _, _) => self.stop(&handle, StopOptions::cancel()).await,
            (None, Binding::Starting { attempt }, Some(descriptor)) => {
                self.hold_until_settled(attempt, descriptor);
            }
            (None, _, Some(descriptor)) if state == SessionState::Paused => {
                self.purge_detached(&logical_id, descriptor, &entry.record.destination_dir);
            }
            _ => {}
        }
        info!(logical_id = %logical_id, ?state, "session cancelled");
        self.bus.publish(Event::SessionRemoved {
            logical_id: logical_id.to_string(),
        });
        true
    }

    fn hold_until_settled(&mut self, attempt: u64, descriptor: Descriptor) {
        self.claims
            .insert(descriptor.clone(), Claim::Settling(attempt));
        self.settling.insert(attempt, descriptor);
    }

    /// Re-acquire a paused session's handle so its data can be purged.
    fn purge_detached(
        &mut self,
        logical_id: &LogicalId,
        descriptor: Descriptor,
        destination_dir: &Path,
    ) {
        let Some(mailbox) = self.mailbox.upgrade() else {
            return;
        };
        if self.claims.contains_key(&descriptor) {
            // Another session owns the data now.
            return;
        }
        let attempt = self.attempt();
        self.hold_until_settled(attempt, descriptor.clone());
        let engine = Arc::clone(&self.engine);
        let logical_id = logical_id.clone();
        let destination_dir = destination_dir.to_path_buf();
        tokio::spawn(async move {
            let outcome = engine.start(&descriptor, &destination_dir).await;
            let _ = mailbox
                .send(Message::Started {
                    logical_id,
                    attempt,
                    outcome,
                })
                .await;
        });
    }

    async fn on_engine_event(&mut self, event: EngineEvent) {
        let Some(logical_id) = self.by_handle.get(&event.handle()).cloned() else {
            debug!(handle = %event.handle(), "notification for an unbound handle ignored");
            return;
        };
        match event {
            EngineEvent::Done { .. } => self.complete(&logical_id).await,
            EngineEvent::Error { message, .. } => {
                self.on_engine_failure(&logical_id, message).await;
            }
        }
    }

    async fn on_engine_failure(&mut self, logical_id: &LogicalId, message: String) {
        let descriptor = self
            .records
            .get(logical_id)
            .and_then(|entry| entry.record.descriptor())
            .map(ToString::to_string);
        let err = TransferError::engine("transfer", descriptor, message);
        self.fail(logical_id, &err).await;
    }

    async fn complete(&mut self, logical_id: &LogicalId) {
        let Some(state) = self.records.get(logical_id).map(|entry| entry.record.state) else {
            return;
        };
        if state != SessionState::Active {
            return;
        }
        let Some(handle) = self.detach(logical_id) else {
            return;
        };
        let stats = handle.stats();
        let Some(entry) = self.records.get_mut(logical_id) else {
            return;
        };
        let result_file = locate_result_file(&stats.files, &entry.record.destination_dir);
        entry.record.state = SessionState::Completed;
        entry.record.result_file_path.clone_from(&result_file);
        let title = entry.record.title.clone();
        self.stop(&handle, StopOptions::pause()).await;

        info!(
            logical_id = %logical_id,
            result_file = ?result_file,
            "transfer complete"
        );
        self.bus.publish(Event::DownloadComplete {
            logical_id: logical_id.to_string(),
            title,
            result_file_path: result_file
                .as_ref()
                .map(|path| path.display().to_string()),
        });
        if result_file.is_none() {
            debug!(
                logical_id = %logical_id,
                files = stats.files.len(),
                "no file with a media extension in completed transfer"
            );
            self.bus.publish(Event::ResultFileMissing {
                logical_id: logical_id.to_string(),
            });
        }
    }

    /// Move a session to `Failed`, detaching any handle while keeping its data.
    async fn fail(&mut self, logical_id: &LogicalId, err: &TransferError) {
        if let Some(handle) = self.detach(logical_id) {
            self.stop(&handle, StopOptions::pause()).await;
        }
        self.fail_detached(logical_id, err);
    }

    fn fail_detached(&mut self, logical_id: &LogicalId, err: &TransferError) {
        let Some(entry) = self.records.get_mut(logical_id) else {
            return;
        };
        if entry.record.state.is_terminal() && entry.record.state != SessionState::Failed {
            return;
        }
        let message = err.describe();
        entry.record.state = SessionState::Failed;
        entry.record.last_error = Some(message.clone());
        warn!(logical_id = %logical_id, error = %message, "session failed");
        self.bus.publish(Event::DownloadError {
            logical_id: logical_id.to_string(),
            message,
        });
    }

    fn on_restore(&mut self, entries: Vec<PersistedEntry>) -> Vec<PersistedEntry> {
        let mut restored = Vec::with_capacity(entries.len());
        for entry in entries {
            let descriptor = match Descriptor::parse(&entry.descriptor) {
                Ok(descriptor) => descriptor,
                Err(err) => {
                    warn!(
                        logical_id = %entry.logical_id,
                        error = %err,
                        "skipping unusable snapshot entry"
                    );
                    continue;
                }
            };
            let logical_id = LogicalId::new(entry.logical_id.clone());
            if self.records.contains_key(&logical_id) {
                debug!(logical_id = %logical_id, "snapshot entry already registered");
                continue;
            }
            if self.held_elsewhere(&descriptor, &logical_id) {
                self.suppress_duplicate(&logical_id, &descriptor);
                continue;
            }
            let record = SessionRecord::new(
                logical_id.clone(),
                entry.title.clone(),
                Some(descriptor),
                entry.destination_dir.clone(),
            );
            self.insert(record, None);
            self.begin_start(&logical_id, true);
            restored.push(entry);
        }
        info!(count = restored.len(), "sessions restored");
        self.bus.publish(Event::RestoreDownloads {
            entries: restored.clone(),
        });
        restored
    }

    /// Re-check every bound handle after notifications were lost.
    async fn reconcile(&mut self) {
        let bound: Vec<(LogicalId, TransferHandle)> = self
            .records
            .iter()
            .filter_map(|(id, entry)| match &entry.binding {
                Binding::Bound { handle, .. } => Some((id.clone(), handle.clone())),
                _ => None,
            })
            .collect();
        for (logical_id, handle) in bound {
            let stats = handle.stats();
            if let Some(message) = stats.error {
                self.on_engine_failure(&logical_id, message).await;
            } else if stats.is_complete() {
                self.complete(&logical_id).await;
            }
        }
    }

    async fn shutdown(&mut self) -> Vec<PersistedEntry> {
        let entries = self.persisted();
        let bound: Vec<LogicalId> = self
            .records
            .iter()
            .filter(|(_, entry)| matches!(entry.binding, Binding::Bound { .. }))
            .map(|(id, _)| id.clone())
            .collect();
        for logical_id in bound {
            if let Some(handle) = self.detach(&logical_id) {
                self.stop(&handle, StopOptions::pause()).await;
            }
        }
        info!(persisted = entries.len(), "session registry shutting down");
        entries
    }
}

/// First file in `files` with a media extension, joined onto `destination_dir`.
#[must_use]
pub fn locate_result_file(files: &[String], destination_dir: &Path) -> Option<PathBuf> {
    files
        .iter()
        .find(|file| {
            Path::new(file.as_str())
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| {
                    MEDIA_EXTENSIONS
                        .iter()
                        .any(|known| known.eq_ignore_ascii_case(ext))
                })
        })
        .map(|file| destination_dir.join(file))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_file_prefers_first_media_extension() {
        let files = vec![
            "Heat/readme.txt".to_string(),
            "Heat/sample.MKV".to_string(),
            "Heat/heat.mp4".to_string(),
        ];
        assert_eq!(
            locate_result_file(&files, Path::new("/downloads")),
            Some(PathBuf::from("/downloads/Heat/sample.MKV"))
        );
    }

    #[test]
    fn result_file_missing_without_media() {
        let files = vec!["Heat/heat.nfo".to_string(), "Heat/heat".to_string()];
        assert_eq!(locate_result_file(&files, Path::new("/downloads")), None);
    }
}
