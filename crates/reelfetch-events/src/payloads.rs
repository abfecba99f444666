//! Event payload types carried across the workspace.

use std::path::PathBuf;

use chrono::{DateTime, Utc};

/// Identifier assigned to each event emitted on the bus.
pub type EventId = u64;

/// Default buffer size for the in-memory replay ring.
pub const DEFAULT_REPLAY_CAPACITY: usize = 1_024;

/// Typed events pushed to transfer observers.
///
/// The serialized `type` tag doubles as the channel name observers listen on
/// (`download-started`, `download-progress`, ...); payload fields are camelCase.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
#[serde(
    tag = "type",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum Event {
    /// The engine accepted a transfer for the session.
    DownloadStarted {
        /// Caller-assigned session identifier.
        logical_id: String,
        /// Magnet descriptor handed to the engine.
        descriptor: String,
    },
    /// Periodic progress sample for an active session.
    DownloadProgress {
        /// Caller-assigned session identifier.
        logical_id: String,
        /// Completion percentage in `[0, 100]`.
        percent: f64,
        /// Instantaneous download rate.
        rate_bytes_per_sec: u64,
        /// Bytes fetched so far.
        bytes_downloaded: u64,
        /// Total payload length, unknown until metadata arrives.
        total_bytes: Option<u64>,
        /// Connected peers.
        peer_count: u32,
    },
    /// The session finished fetching its payload.
    DownloadComplete {
        /// Caller-assigned session identifier.
        logical_id: String,
        /// Display title of the session.
        title: String,
        /// Media file produced by the transfer, when one could be located.
        result_file_path: Option<String>,
    },
    /// The session failed; the record stays visible with this message.
    DownloadError {
        /// Caller-assigned session identifier.
        logical_id: String,
        /// Human-readable failure description.
        message: String,
    },
    /// Sessions re-armed from the previous run, batched in one event.
    RestoreDownloads {
        /// Restored entries in snapshot order.
        entries: Vec<PersistedEntry>,
    },
    /// A cancelled session was dropped from the registry.
    SessionRemoved {
        /// Caller-assigned session identifier.
        logical_id: String,
    },
    /// A start request was dropped because another session already owns the descriptor.
    DuplicateSuppressed {
        /// Session whose request was dropped.
        logical_id: String,
        /// Descriptor already held by another session.
        descriptor: String,
    },
    /// A completed session produced no file with a recognized media extension.
    ResultFileMissing {
        /// Caller-assigned session identifier.
        logical_id: String,
    },
}

impl Event {
    /// Channel name used by observers.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::DownloadStarted { .. } => "download-started",
            Self::DownloadProgress { .. } => "download-progress",
            Self::DownloadComplete { .. } => "download-complete",
            Self::DownloadError { .. } => "download-error",
            Self::RestoreDownloads { .. } => "restore-downloads",
            Self::SessionRemoved { .. } => "session-removed",
            Self::DuplicateSuppressed { .. } => "duplicate-suppressed",
            Self::ResultFileMissing { .. } => "result-file-missing",
        }
    }

    /// Session the event refers to, when it refers to exactly one.
    #[must_use]
    pub fn logical_id(&self) -> Option<&str> {
        match self {
            Self::DownloadStarted { logical_id, .. }
            | Self::DownloadProgress { logical_id, .. }
            | Self::DownloadComplete { logical_id, .. }
            | Self::DownloadError { logical_id, .. }
            | Self::SessionRemoved { logical_id }
            | Self::DuplicateSuppressed { logical_id, .. }
            | Self::ResultFileMissing { logical_id } => Some(logical_id),
            Self::RestoreDownloads { .. } => None,
        }
    }

    /// Whether the event only exists for diagnosability.
    #[must_use]
    pub const fn is_diagnostic(&self) -> bool {
        matches!(
            self,
            Self::DuplicateSuppressed { .. } | Self::ResultFileMissing { .. }
        )
    }
}

/// Metadata wrapper around events. Each envelope tracks the event id and
/// emission timestamp.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct EventEnvelope {
    /// Sequential identifier.
    pub id: EventId,
    /// Time the event was published.
    pub timestamp: DateTime<Utc>,
    /// Event payload.
    pub event: Event,
}

/// Durable projection of a session that was still wanted at shutdown.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PersistedEntry {
    /// Caller-assigned session identifier.
    pub logical_id: String,
    /// Display title.
    pub title: String,
    /// Magnet descriptor.
    pub descriptor: String,
    /// Destination captured when the session was created.
    pub destination_dir: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn progress() -> Event {
        Event::DownloadProgress {
            logical_id: "row-7".into(),
            percent: 42.5,
            rate_bytes_per_sec: 1_024,
            bytes_downloaded: 425,
            total_bytes: Some(1_000),
            peer_count: 3,
        }
    }

    #[test]
    fn event_kind_matches_observer_channels() {
        assert_eq!(progress().kind(), "download-progress");
        assert_eq!(
            Event::RestoreDownloads {
                entries: Vec::new()
            }
            .kind(),
            "restore-downloads"
        );
        assert_eq!(
            Event::DownloadError {
                logical_id: "a".into(),
                message: "boom".into()
            }
            .kind(),
            "download-error"
        );
    }

    #[test]
    fn progress_serializes_with_camel_case_fields() {
        let value = serde_json::to_value(progress()).expect("serialize");
        assert_eq!(
            value,
            json!({
                "type": "download-progress",
                "logicalId": "row-7",
                "percent": 42.5,
                "rateBytesPerSec": 1024,
                "bytesDownloaded": 425,
                "totalBytes": 1000,
                "peerCount": 3
            })
        );
    }

    #[test]
    fn persisted_entry_uses_snapshot_field_names() {
        let entry = PersistedEntry {
            logical_id: "1".into(),
            title: "Inception.1080p".into(),
            descriptor: "magnet:?xt=urn:btih:abc".into(),
            destination_dir: PathBuf::from("/data/movies"),
        };
        let value = serde_json::to_value(&entry).expect("serialize");
        assert_eq!(value["logicalId"], "1");
        assert_eq!(value["destinationDir"], "/data/movies");
        let back: PersistedEntry = serde_json::from_value(value).expect("deserialize");
        assert_eq!(back, entry);
    }

    #[test]
    fn diagnostics_are_flagged() {
        assert!(
            Event::ResultFileMissing {
                logical_id: "x".into()
            }
            .is_diagnostic()
        );
        assert!(!progress().is_diagnostic());
        assert_eq!(progress().logical_id(), Some("row-7"));
    }
}
