//! Control surface consumed by the CLI and any other front end.
//!
//! # Design
//! - A cloneable facade over the session registry plus the collaborators the
//!   registry does not own: search, configuration, snapshot persistence and
//!   the platform file manager.
//! - Commands are fire-and-forget from the caller's point of view; outcomes
//!   arrive on the event bus.

use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::thread;

use reelfetch_config::{AppConfig, ConfigStore, default_download_dir};
use reelfetch_events::{Event, EventBus, EventId, EventStream, PersistedEntry};
use reelfetch_runtime::SnapshotStore;
use reelfetch_transfer_core::{
    Descriptor, DescriptorLookup, LogicalId, SearchProvider, SearchResult, SessionRecord,
    SessionState, TransferEngine, TransferError,
};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult};
use crate::registry::{RegistrySettings, SessionRegistry, SessionTarget};
use crate::resolver::ContentResolver;
use crate::search;

/// Source of a user-chosen directory.
pub trait FolderPicker: Send + Sync {
    /// Ask for a directory; `None` when the user dismissed the prompt.
    fn pick(&self) -> Option<PathBuf>;
}

/// Picker that answers with a directory chosen up front, e.g. on the command line.
#[derive(Debug, Clone, Default)]
pub struct ChosenFolder(pub Option<PathBuf>);

impl FolderPicker for ChosenFolder {
    fn pick(&self) -> Option<PathBuf> {
        self.0.clone()
    }
}

/// Reveals a directory to the user.
pub trait FolderOpener: Send + Sync {
    /// Open `dir` in the platform file manager.
    ///
    /// # Errors
    ///
    /// Returns the IO error raised while launching the file manager.
    fn open(&self, dir: &Path) -> io::Result<()>;
}

/// Launches the platform file manager as a child process.
///
/// The child is waited on from a background thread so it never lingers as a zombie.
#[derive(Debug, Clone)]
pub struct SystemOpener {
    program: PathBuf,
}

impl SystemOpener {
    /// Opener running `program` with the directory as its only argument.
    #[must_use]
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    const fn platform_program() -> &'static str {
        if cfg!(target_os = "macos") {
            "open"
        } else if cfg!(target_os = "windows") {
            "explorer"
        } else {
            "xdg-open"
        }
    }

    /// Spawn the program for `dir` and return the thread reaping it.
    fn launch(&self, dir: &Path) -> io::Result<thread::JoinHandle<io::Result<ExitStatus>>> {
        let mut child = Command::new(&self.program)
            .arg(dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;
        let program = self.program.clone();
        thread::Builder::new()
            .name("folder-opener".into())
            .spawn(move || {
                let status = child.wait();
                match &status {
                    Ok(status) if !status.success() => {
                        debug!(program = %program.display(), %status, "file manager exited");
                    }
                    Ok(_) => {}
                    Err(err) => {
                        warn!(
                            program = %program.display(),
                            error = %err,
                            "file manager wait failed"
                        );
                    }
                }
                status
            })
    }
}

impl Default for SystemOpener {
    fn default() -> Self {
        Self::with_program(Self::platform_program())
    }
}

impl FolderOpener for SystemOpener {
    fn open(&self, dir: &Path) -> io::Result<()> {
        self.launch(dir).map(|_reaper| ())
    }
}

/// What to do with a session saved by the previous run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SavedSessionAction {
    /// Stop it while keeping it in the snapshot.
    Pause,
    /// Drop it from the snapshot and discard its partial data.
    Cancel,
}

/// Everything the control surface is wired from.
pub struct ControlDeps {
    /// Transfer engine adapter.
    pub engine: Arc<dyn TransferEngine>,
    /// Search provider queried by `search_movies`.
    pub search: Arc<dyn SearchProvider>,
    /// Lookup for results that arrive without a descriptor.
    pub lookup: Arc<dyn DescriptorLookup>,
    /// Configuration record store.
    pub config: ConfigStore,
    /// Session snapshot file.
    pub snapshots: SnapshotStore,
    /// Bus every outcome is published on.
    pub bus: EventBus,
    /// File manager launcher used by `show_in_folder`.
    pub opener: Arc<dyn FolderOpener>,
    /// Registry tunables.
    pub settings: RegistrySettings,
}

/// Cloneable entry point for every user-facing operation.
#[derive(Clone)]
pub struct ControlSurface {
    registry: SessionRegistry,
    search: Arc<dyn SearchProvider>,
    config: ConfigStore,
    snapshots: SnapshotStore,
    bus: EventBus,
    opener: Arc<dyn FolderOpener>,
}

impl ControlSurface {
    /// Spawn the registry actor and wrap it with the remaining collaborators.
    #[must_use]
    pub fn new(deps: ControlDeps) -> Self {
        let ControlDeps {
            engine,
            search,
            lookup,
            config,
            snapshots,
            bus,
            opener,
            settings,
        } = deps;
        let registry =
            SessionRegistry::spawn(engine, ContentResolver::new(lookup), bus.clone(), settings);
        Self {
            registry,
            search,
            config,
            snapshots,
            bus,
            opener,
        }
    }

    /// Query the provider and keep seeded, quality-tagged results.
    pub async fn search_movies(&self, query: &str) -> Vec<SearchResult> {
        search::search_movies(self.search.as_ref(), query).await
    }

    /// Begin fetching `result` into the configured download directory.
    ///
    /// # Errors
    ///
    /// Returns an error only when the registry has shut down.
    pub async fn start_download(&self, result: SearchResult) -> AppResult<LogicalId> {
        let destination = self.destination();
        self.registry
            .start(result, destination)
            .await
            .map_err(|err| AppError::transfer("start_download", err))
    }

    /// Resume a paused or failed session; starts a new one if none exists.
    ///
    /// # Errors
    ///
    /// Returns an error only when the registry has shut down.
    pub async fn resume_download(&self, result: SearchResult) -> AppResult<LogicalId> {
        let destination = self.destination();
        self.registry
            .start(result, destination)
            .await
            .map_err(|err| AppError::transfer("resume_download", err))
    }

    /// Pause the active session for `descriptor`. Returns whether anything changed.
    ///
    /// # Errors
    ///
    /// Returns an error only when the registry has shut down.
    pub async fn pause_download(&self, descriptor: Descriptor) -> AppResult<bool> {
        self.registry
            .pause(descriptor)
            .await
            .map_err(|err| AppError::transfer("pause_download", err))
    }

    /// Cancel the session for `descriptor` and discard its partial data.
    ///
    /// # Errors
    ///
    /// Returns an error only when the registry has shut down.
    pub async fn cancel_download(&self, descriptor: Descriptor) -> AppResult<bool> {
        self.registry
            .cancel(SessionTarget::Descriptor(descriptor))
            .await
            .map_err(|err| AppError::transfer("cancel_download", err))
    }

    /// Cancel a session by logical id, including one still resolving.
    ///
    /// # Errors
    ///
    /// Returns an error only when the registry has shut down.
    pub async fn cancel_session(&self, logical_id: LogicalId) -> AppResult<bool> {
        self.registry
            .cancel(SessionTarget::Logical(logical_id))
            .await
            .map_err(|err| AppError::transfer("cancel_session", err))
    }

    /// Ask `picker` for a directory and store it as the new default destination.
    ///
    /// Sessions already created keep the destination they captured.
    ///
    /// # Errors
    ///
    /// Returns an error when the chosen path is invalid or cannot be persisted.
    pub fn select_folder(&self, picker: &dyn FolderPicker) -> AppResult<Option<PathBuf>> {
        let Some(chosen) = picker.pick() else {
            return Ok(None);
        };
        let stored = self
            .config
            .set_download_path(&chosen)
            .map_err(|err| AppError::config("select_folder", err))?;
        info!(download_path = %stored.download_path.display(), "default destination changed");
        Ok(Some(stored.download_path))
    }

    /// Current configuration record.
    ///
    /// # Errors
    ///
    /// Returns an error when the stored record cannot be read or is invalid.
    pub fn get_config(&self) -> AppResult<AppConfig> {
        self.config
            .load()
            .map_err(|err| AppError::config("get_config", err))
    }

    /// Reveal `path` in the platform file manager and return the opened directory.
    ///
    /// Files are revealed by opening their parent directory.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::Locate`] when the path is absent, empty or does
    /// not exist, and an IO error when the file manager cannot be launched.
    pub fn show_in_folder(&self, path: Option<&Path>) -> AppResult<PathBuf> {
        let target = path
            .filter(|path| !path.as_os_str().is_empty())
            .ok_or_else(|| {
                AppError::transfer(
                    "show_in_folder",
                    TransferError::Locate {
                        path: PathBuf::new(),
                    },
                )
            })?;
        if !target.exists() {
            return Err(AppError::transfer(
                "show_in_folder",
                TransferError::Locate {
                    path: target.to_path_buf(),
                },
            ));
        }
        let dir = if target.is_dir() {
            target.to_path_buf()
        } else {
            target
                .parent()
                .map_or_else(|| target.to_path_buf(), Path::to_path_buf)
        };
        self.opener.open(&dir).map_err(|source| AppError::Io {
            operation: "show_in_folder.open",
            path: Some(dir.clone()),
            source,
        })?;
        Ok(dir)
    }

    /// Reveal the result file of a completed session.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::ResultFileNotFound`] when the session is
    /// unknown or has no recorded result file, otherwise as [`Self::show_in_folder`].
    pub async fn show_session_in_folder(&self, logical_id: LogicalId) -> AppResult<PathBuf> {
        let record = self
            .registry
            .get(logical_id)
            .await
            .map_err(|err| AppError::transfer("show_session_in_folder", err))?;
        let Some(file) = record.and_then(|record| record.result_file_path) else {
            return Err(AppError::transfer(
                "show_session_in_folder",
                TransferError::ResultFileNotFound { path: None },
            ));
        };
        self.show_in_folder(Some(&file))
    }

    /// Every session record, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error only when the registry has shut down.
    pub async fn list_sessions(&self) -> AppResult<Vec<SessionRecord>> {
        self.registry
            .list()
            .await
            .map_err(|err| AppError::transfer("list_sessions", err))
    }

    /// One session record by logical id.
    ///
    /// # Errors
    ///
    /// Returns an error only when the registry has shut down.
    pub async fn session(&self, logical_id: LogicalId) -> AppResult<Option<SessionRecord>> {
        self.registry
            .get(logical_id)
            .await
            .map_err(|err| AppError::transfer("session", err))
    }

    /// Subscribe to outcomes, replaying events after `last_event_id` when given.
    #[must_use]
    pub fn subscribe(&self, last_event_id: Option<EventId>) -> EventStream {
        self.bus.subscribe(last_event_id)
    }

    /// Consume the previous snapshot and re-arm its sessions.
    ///
    /// An unreadable snapshot is logged and treated as empty.
    ///
    /// # Errors
    ///
    /// Returns an error only when the registry has shut down.
    pub async fn restore_previous(&self) -> AppResult<Vec<PersistedEntry>> {
        let entries = self.snapshots.take().unwrap_or_else(|err| {
            warn!(error = %err.describe(), "ignoring unreadable session snapshot");
            Vec::new()
        });
        self.registry
            .restore(entries)
            .await
            .map_err(|err| AppError::transfer("restore_previous", err))
    }

    /// Restore the previous run, apply `action` to the restored session
    /// holding `descriptor`, then snapshot and stop.
    ///
    /// The action waits for the session's restart to settle so a cancel can
    /// purge the data it re-acquired. Returns whether a restored session matched.
    ///
    /// # Errors
    ///
    /// Returns an error when the registry already stopped or the snapshot
    /// cannot be written.
    pub async fn amend_previous(
        &self,
        descriptor: Descriptor,
        action: SavedSessionAction,
    ) -> AppResult<bool> {
        let mut stream = self.subscribe(None);
        let restored = self.restore_previous().await?;
        let target = restored
            .iter()
            .find(|entry| {
                Descriptor::parse(&entry.descriptor).is_ok_and(|saved| saved == descriptor)
            })
            .map(|entry| LogicalId::new(entry.logical_id.clone()));
        let changed = match target {
            Some(logical_id) => {
                self.start_settled(&mut stream, &logical_id).await?;
                match action {
                    SavedSessionAction::Pause => self.pause_download(descriptor).await?,
                    SavedSessionAction::Cancel => self.cancel_session(logical_id).await?,
                }
            }
            None => {
                info!(descriptor = %descriptor, "no saved session for descriptor");
                false
            }
        };
        self.snapshot_and_shutdown().await?;
        Ok(changed)
    }

    async fn start_settled(
        &self,
        stream: &mut EventStream,
        logical_id: &LogicalId,
    ) -> AppResult<()> {
        while let Some(item) = stream.next().await {
            match item {
                Ok(envelope) => {
                    let settled = matches!(
                        envelope.event,
                        Event::DownloadStarted { .. } | Event::DownloadError { .. }
                    );
                    if settled && envelope.event.logical_id() == Some(logical_id.as_str()) {
                        break;
                    }
                }
                Err(BroadcastStreamRecvError::Lagged(_)) => {
                    let record = self.session(logical_id.clone()).await?;
                    if record.is_none_or(|record| {
                        record.engine_handle.is_some() || record.state != SessionState::Active
                    }) {
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    /// Stop the registry and persist every session still wanted.
    ///
    /// Returns the number of persisted entries.
    ///
    /// # Errors
    ///
    /// Returns an error when the registry already stopped or the snapshot
    /// cannot be written.
    pub async fn snapshot_and_shutdown(&self) -> AppResult<usize> {
        let entries = self
            .registry
            .shutdown()
            .await
            .map_err(|err| AppError::transfer("snapshot_and_shutdown", err))?;
        self.snapshots
            .save(&entries)
            .map_err(|err| AppError::transfer("snapshot.save", err))?;
        Ok(entries.len())
    }

    fn destination(&self) -> PathBuf {
        match self.config.load() {
            Ok(config) => config.download_path,
            Err(err) => {
                warn!(error = %err, "configuration unreadable; using default destination");
                default_download_dir()
            }
        }
    }
}
