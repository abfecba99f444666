//! Process wiring: environment, collaborators and the long-running session loop.

use std::sync::Arc;
use std::time::Duration;

use reelfetch_config::{AppPaths, ConfigStore};
use reelfetch_engine::{Backend, DEFAULT_POLL_INTERVAL, SwarmEngine};
use reelfetch_events::{Event, EventStream};
use reelfetch_runtime::SnapshotStore;
use reelfetch_telemetry::{GlobalContextGuard, LogFormat, LoggingConfig};
use reelfetch_transfer_core::{SearchResult, SessionState};
use reqwest::Client;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::{info, warn};

use crate::control::{ControlDeps, ControlSurface, SystemOpener};
use crate::error::{AppError, AppResult};
use crate::provider::{ApibayIndex, DEFAULT_SEARCH_URL, SEARCH_URL_ENV};
use crate::registry::RegistrySettings;

/// Timeout applied to every request against the content index.
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(15);

/// Install logging and enter the application span for `command`.
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn init_telemetry(command: &str) -> AppResult<GlobalContextGuard> {
    let logging = LoggingConfig {
        format: LogFormat::from_env(),
        ..LoggingConfig::default()
    };
    reelfetch_telemetry::init_logging(&logging)
        .map_err(|err| AppError::telemetry("telemetry.init", err))?;
    Ok(GlobalContextGuard::new(command))
}

/// Dependencies resolved from the process environment.
#[derive(Debug, Clone)]
pub struct BootstrapDependencies {
    /// Configuration and data directories.
    pub paths: AppPaths,
    /// Base URL of the content index.
    pub search_url: String,
    /// Swarm backend for the engine adapter.
    pub backend: Backend,
    /// Registry tunables.
    pub settings: RegistrySettings,
}

impl BootstrapDependencies {
    /// Resolve directories, index URL and backend from the environment.
    ///
    /// # Errors
    ///
    /// Returns an error when no configuration or data directory can be determined.
    pub fn from_env() -> AppResult<Self> {
        let paths = AppPaths::from_env().map_err(|err| AppError::config("paths.from_env", err))?;
        let search_url = std::env::var(SEARCH_URL_ENV)
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_SEARCH_URL.to_string());
        let backend = Backend::for_build(&paths.data_dir.join("swarm"));
        Ok(Self {
            paths,
            search_url,
            backend,
            settings: RegistrySettings::default(),
        })
    }
}

/// Spawn the engine and wire the control surface around it.
///
/// # Errors
///
/// Returns an error when the engine, the HTTP client or the index URL cannot
/// be set up.
pub async fn build_control(dependencies: BootstrapDependencies) -> AppResult<ControlSurface> {
    let BootstrapDependencies {
        paths,
        search_url,
        backend,
        settings,
    } = dependencies;

    if !backend.is_networked() {
        warn!("built without a swarm backend; transfers will not receive data");
    }
    let engine = SwarmEngine::spawn(backend, DEFAULT_POLL_INTERVAL)
        .await
        .map_err(|err| AppError::engine("engine.spawn", err))?;

    let client = Client::builder()
        .timeout(HTTP_TIMEOUT)
        .user_agent(concat!("reelfetch/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|source| AppError::HttpClient { source })?;
    let index = Arc::new(ApibayIndex::new(client, &search_url).map_err(|_| {
        AppError::InvalidArgument {
            field: SEARCH_URL_ENV,
            reason: "invalid_url",
            value: Some(search_url.clone()),
        }
    })?);
    info!(index = %index.base(), "content index configured");

    Ok(ControlSurface::new(ControlDeps {
        engine: Arc::new(engine),
        search: index.clone(),
        lookup: index,
        config: ConfigStore::for_paths(&paths),
        snapshots: SnapshotStore::in_dir(&paths.data_dir),
        bus: reelfetch_events::EventBus::new(),
        opener: Arc::new(SystemOpener::default()),
        settings,
    }))
}

/// Feed bus events to `render` until no session is still moving or Ctrl-C is
/// pressed, then snapshot wanted sessions and stop the registry.
///
/// Returns the number of persisted sessions.
///
/// # Errors
///
/// Returns an error if the registry stopped early or the snapshot cannot be written.
pub async fn follow(
    control: &ControlSurface,
    stream: EventStream,
    render: impl FnMut(&Event),
) -> AppResult<usize> {
    follow_until(control, stream, render, interrupt()).await
}

/// Restore the previous run's sessions, start `result` next to them and
/// follow everything until settled or `shutdown` resolves.
///
/// Returns the number of persisted sessions.
///
/// # Errors
///
/// Returns an error if the registry stopped early or the snapshot cannot be written.
pub async fn fetch_and_follow(
    control: &ControlSurface,
    result: SearchResult,
    render: impl FnMut(&Event),
    shutdown: impl Future<Output = ()>,
) -> AppResult<usize> {
    let stream = control.subscribe(None);
    let restored = control.restore_previous().await?;
    reelfetch_telemetry::record_restored(restored.len());
    control.start_download(result).await?;
    follow_until(control, stream, render, shutdown).await
}

/// [`follow`] with a caller-supplied shutdown trigger.
///
/// # Errors
///
/// Returns an error if the registry stopped early or the snapshot cannot be written.
pub async fn follow_until(
    control: &ControlSurface,
    mut stream: EventStream,
    mut render: impl FnMut(&Event),
    shutdown: impl Future<Output = ()>,
) -> AppResult<usize> {
    tokio::pin!(shutdown);
    if has_moving_sessions(control).await? {
        loop {
            tokio::select! {
                () = &mut shutdown => break,
                item = stream.next() => match item {
                    Some(Ok(envelope)) => {
                        render(&envelope.event);
                        if settles(&envelope.event) && !has_moving_sessions(control).await? {
                            break;
                        }
                    }
                    Some(Err(BroadcastStreamRecvError::Lagged(skipped))) => {
                        warn!(skipped, "event stream lagged");
                    }
                    None => break,
                },
            }
        }
    }
    let persisted = control.snapshot_and_shutdown().await?;
    info!(persisted, "session snapshot saved");
    Ok(persisted)
}

/// Resolves on Ctrl-C, or at once when the signal cannot be watched.
pub async fn interrupt() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "ctrl-c listener failed; shutting down");
    }
    info!("interrupt received");
}

const fn settles(event: &Event) -> bool {
    matches!(
        event,
        Event::DownloadComplete { .. }
            | Event::DownloadError { .. }
            | Event::SessionRemoved { .. }
            | Event::DuplicateSuppressed { .. }
            | Event::RestoreDownloads { .. }
    )
}

async fn has_moving_sessions(control: &ControlSurface) -> AppResult<bool> {
    Ok(control.list_sessions().await?.iter().any(|record| {
        matches!(
            record.state,
            SessionState::PendingDescriptor | SessionState::Active
        )
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use reelfetch_engine::MemoryProfile;
    use tempfile::TempDir;

    fn dependencies(root: &std::path::Path, search_url: &str) -> BootstrapDependencies {
        BootstrapDependencies {
            paths: AppPaths::rooted(root),
            search_url: search_url.to_string(),
            backend: Backend::Memory(MemoryProfile::idle()),
            settings: RegistrySettings::default(),
        }
    }

    #[test]
    fn settling_events_end_a_follow_pass() {
        assert!(settles(&Event::SessionRemoved {
            logical_id: "a".into()
        }));
        assert!(!settles(&Event::DownloadStarted {
            logical_id: "a".into(),
            descriptor: "magnet:?xt=abc".into()
        }));
    }

    #[tokio::test]
    async fn invalid_index_url_is_rejected() {
        let temp = TempDir::new().expect("tempdir");
        let err = build_control(dependencies(temp.path(), "not a url"))
            .await
            .err()
            .expect("invalid url");
        assert!(matches!(
            err,
            AppError::InvalidArgument {
                field: SEARCH_URL_ENV,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn follow_without_sessions_writes_empty_snapshot() {
        let temp = TempDir::new().expect("tempdir");
        let control = build_control(dependencies(temp.path(), "http://127.0.0.1:9"))
            .await
            .expect("control");
        let stream = control.subscribe(None);
        let persisted = follow(&control, stream, |_| {}).await.expect("follow");
        assert_eq!(persisted, 0);
        let snapshot = SnapshotStore::in_dir(&AppPaths::rooted(temp.path()).data_dir);
        assert!(snapshot.path().exists());
        assert!(snapshot.take().expect("snapshot").is_empty());
    }
}
