//! Core transfer domain types shared across the workspace.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use reelfetch_events::PersistedEntry;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use url::Url;
use uuid::Uuid;

use crate::error::{TransferError, TransferResult};

const BTIH_PREFIX: &str = "urn:btih:";

/// Caller-assigned identifier for one transfer request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogicalId(String);

impl LogicalId {
    /// Wrap an existing identifier.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Fresh random identifier for records that arrive without one.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Borrow the raw identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LogicalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LogicalId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for LogicalId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Magnet-style content descriptor.
///
/// Equality and hashing use the exact-topic key (the info-hash for `btih`
/// topics) so magnets that only differ in trackers or display name address
/// the same transfer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Descriptor {
    uri: String,
    key: String,
}

impl Descriptor {
    /// Parse a magnet URI.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::InvalidDescriptor`] when the value is not a
    /// `magnet:` URI or lacks an `xt` exact-topic parameter.
    pub fn parse(value: &str) -> TransferResult<Self> {
        let trimmed = value.trim();
        let invalid = |reason| TransferError::InvalidDescriptor {
            value: trimmed.to_string(),
            reason,
        };
        let url = Url::parse(trimmed).map_err(|_| invalid("not_a_uri"))?;
        if url.scheme() != "magnet" {
            return Err(invalid("not_magnet"));
        }
        let topic = url
            .query_pairs()
            .find(|(key, _)| key == "xt")
            .map(|(_, value)| value.into_owned())
            .ok_or_else(|| invalid("missing_exact_topic"))?;
        let lowered = topic.trim().to_ascii_lowercase();
        let key = lowered
            .strip_prefix(BTIH_PREFIX)
            .unwrap_or(&lowered)
            .to_string();
        if key.is_empty() {
            return Err(invalid("empty_exact_topic"));
        }
        Ok(Self {
            uri: trimmed.to_string(),
            key,
        })
    }

    /// Build a magnet URI from a bare info-hash and optional display name.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::InvalidDescriptor`] when the hash is empty or
    /// not alphanumeric.
    pub fn from_info_hash(info_hash: &str, display_name: Option<&str>) -> TransferResult<Self> {
        let hash = info_hash.trim();
        if hash.is_empty() || !hash.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(TransferError::InvalidDescriptor {
                value: hash.to_string(),
                reason: "bad_info_hash",
            });
        }
        let mut uri = format!("magnet:?xt={BTIH_PREFIX}{hash}");
        if let Some(name) = display_name.filter(|name| !name.trim().is_empty()) {
            uri.push_str("&dn=");
            uri.extend(url::form_urlencoded::byte_serialize(name.as_bytes()));
        }
        Self::parse(&uri)
    }

    /// Full magnet URI as supplied.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.uri
    }

    /// Dedup key: the lower-cased exact topic without the `urn:btih:` prefix.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// `dn` display name carried by the magnet, if any.
    #[must_use]
    pub fn display_name(&self) -> Option<String> {
        let url = Url::parse(&self.uri).ok()?;
        url.query_pairs()
            .find(|(key, _)| key == "dn")
            .map(|(_, value)| value.into_owned())
            .filter(|name| !name.trim().is_empty())
    }
}

impl PartialEq for Descriptor {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for Descriptor {}

impl Hash for Descriptor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.uri)
    }
}

impl FromStr for Descriptor {
    type Err = TransferError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value)
    }
}

impl TryFrom<String> for Descriptor {
    type Error = TransferError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Descriptor> for String {
    fn from(value: Descriptor) -> Self {
        value.uri
    }
}

/// One candidate returned by a search provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    /// Provider-assigned identifier, reused as the session's logical id.
    pub id: String,
    /// Display title.
    pub title: String,
    /// Payload size in bytes, when the provider reports it.
    #[serde(default)]
    pub size: Option<u64>,
    /// Seeders advertised by the provider.
    #[serde(default)]
    pub seed_count: u32,
    /// Embedded magnet descriptor, when the provider returns one inline.
    #[serde(default)]
    pub descriptor: Option<String>,
    /// Provider that produced the result.
    #[serde(default)]
    pub provider: String,
    /// Provider-specific identity used by descriptor lookup.
    #[serde(default)]
    pub provider_ref: Option<String>,
}

impl SearchResult {
    /// Logical id the session for this result is tracked under.
    ///
    /// Results without a provider id get a fresh random id on every call.
    #[must_use]
    pub fn logical_id(&self) -> LogicalId {
        if self.id.trim().is_empty() {
            LogicalId::generate()
        } else {
            LogicalId::new(self.id.clone())
        }
    }
}

/// Lifecycle state of a session record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Waiting for the descriptor lookup to finish.
    PendingDescriptor,
    /// Bound to an engine handle (or waiting for the engine to hand one back).
    Active,
    /// Detached from the swarm with data kept on disk.
    Paused,
    /// Payload fully fetched.
    Completed,
    /// Resolution or engine failure; kept visible for the user.
    Failed,
    /// Cancelled by the user; data purged.
    Cancelled,
}

impl SessionState {
    /// Whether no further transition is driven by the engine.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether the user still wants the payload (snapshot candidates).
    #[must_use]
    pub const fn is_wanted(self) -> bool {
        matches!(self, Self::Active | Self::Paused)
    }
}

/// In-memory record for one logical transfer.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    /// Caller-assigned identifier.
    pub logical_id: LogicalId,
    /// Display title, immutable after creation.
    pub title: String,
    /// Descriptor; filled at most once.
    descriptor: Option<Descriptor>,
    /// Destination captured at creation.
    pub destination_dir: PathBuf,
    /// Current lifecycle state.
    pub state: SessionState,
    /// Engine handle bound while active.
    pub engine_handle: Option<HandleId>,
    /// Media file located on completion.
    pub result_file_path: Option<PathBuf>,
    /// Last failure message shown inline.
    pub last_error: Option<String>,
    /// Creation timestamp, used for stable listing order.
    pub created_at: DateTime<Utc>,
}

impl SessionRecord {
    /// Construct a record in its initial state.
    #[must_use]
    pub fn new(
        logical_id: LogicalId,
        title: impl Into<String>,
        descriptor: Option<Descriptor>,
        destination_dir: impl Into<PathBuf>,
    ) -> Self {
        let state = if descriptor.is_some() {
            SessionState::Active
        } else {
            SessionState::PendingDescriptor
        };
        Self {
            logical_id,
            title: title.into(),
            descriptor,
            destination_dir: destination_dir.into(),
            state,
            engine_handle: None,
            result_file_path: None,
            last_error: None,
            created_at: Utc::now(),
        }
    }

    /// Descriptor, once known.
    #[must_use]
    pub const fn descriptor(&self) -> Option<&Descriptor> {
        self.descriptor.as_ref()
    }

    /// Fill the descriptor if it is still missing. Returns whether it was set.
    pub fn set_descriptor(&mut self, descriptor: Descriptor) -> bool {
        if self.descriptor.is_some() {
            return false;
        }
        self.descriptor = Some(descriptor);
        true
    }

    /// Snapshot projection, present only for sessions still wanted.
    #[must_use]
    pub fn to_persisted(&self) -> Option<PersistedEntry> {
        if !self.state.is_wanted() {
            return None;
        }
        let descriptor = self.descriptor.as_ref()?;
        Some(PersistedEntry {
            logical_id: self.logical_id.to_string(),
            title: self.title.clone(),
            descriptor: descriptor.as_str().to_string(),
            destination_dir: self.destination_dir.clone(),
        })
    }
}

/// Engine-assigned handle identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HandleId(pub u64);

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "h{}", self.0)
    }
}

/// Counters sampled from an engine handle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HandleStats {
    /// Fractional progress in `[0, 1]`.
    pub fraction: f64,
    /// Instantaneous download rate.
    pub download_rate_bps: u64,
    /// Connected peers.
    pub peer_count: u32,
    /// Bytes fetched so far.
    pub bytes_downloaded: u64,
    /// Total payload length; unknown until metadata arrives.
    pub total_bytes: Option<u64>,
    /// Relative paths of the payload files, once known.
    #[serde(default)]
    pub files: Vec<String>,
    /// Failure the engine reported for this handle, if any.
    #[serde(default)]
    pub error: Option<String>,
}

impl HandleStats {
    /// Completion percentage clamped to `[0, 100]`.
    #[must_use]
    pub fn percent(&self) -> f64 {
        (self.fraction * 100.0).clamp(0.0, 100.0)
    }

    /// Whether the payload is fully fetched.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.fraction >= 1.0
    }
}

/// Non-owning view of an engine handle.
///
/// Counters are published by the engine through a watch channel; reading
/// them never waits on the engine.
#[derive(Debug, Clone)]
pub struct TransferHandle {
    id: HandleId,
    descriptor: Descriptor,
    destination_dir: PathBuf,
    stats: watch::Receiver<HandleStats>,
}

impl TransferHandle {
    /// Assemble a handle view; used by engine adapters.
    #[must_use]
    pub const fn new(
        id: HandleId,
        descriptor: Descriptor,
        destination_dir: PathBuf,
        stats: watch::Receiver<HandleStats>,
    ) -> Self {
        Self {
            id,
            descriptor,
            destination_dir,
            stats,
        }
    }

    /// Engine identifier.
    #[must_use]
    pub const fn id(&self) -> HandleId {
        self.id
    }

    /// Descriptor the handle is fetching.
    #[must_use]
    pub const fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    /// Directory the engine writes into.
    #[must_use]
    pub fn destination_dir(&self) -> &Path {
        &self.destination_dir
    }

    /// Latest counters.
    #[must_use]
    pub fn stats(&self) -> HandleStats {
        self.stats.borrow().clone()
    }

    /// Whether the engine has torn the handle down.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.stats.has_changed().is_err()
    }
}

/// Options controlling how a handle is detached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopOptions {
    /// Whether partial or complete data on disk is deleted.
    #[serde(default)]
    pub purge_files: bool,
}

impl StopOptions {
    /// Pause semantics: drop connections, keep data.
    #[must_use]
    pub const fn pause() -> Self {
        Self { purge_files: false }
    }

    /// Cancel semantics: drop connections and delete data.
    #[must_use]
    pub const fn cancel() -> Self {
        Self { purge_files: true }
    }
}

/// Asynchronous notifications raised by the engine for a handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Fractional progress reached 1. Fires once per handle.
    Done {
        /// Handle that finished.
        handle: HandleId,
    },
    /// The engine cannot proceed with the handle.
    Error {
        /// Handle that failed.
        handle: HandleId,
        /// Human-readable failure description.
        message: String,
    },
}

impl EngineEvent {
    /// Handle the notification refers to.
    #[must_use]
    pub const fn handle(&self) -> HandleId {
        match self {
            Self::Done { handle } | Self::Error { handle, .. } => *handle,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn descriptor_parses_btih_magnets_case_insensitively() {
        let upper = Descriptor::parse("magnet:?xt=urn:btih:ABCDEF&dn=Movie").expect("parse");
        let lower =
            Descriptor::parse("magnet:?xt=urn:btih:abcdef&tr=udp://tracker.example:80").expect("parse");
        assert_eq!(upper.key(), "abcdef");
        assert_eq!(upper, lower);
        let set: HashSet<_> = [upper, lower].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn result_without_id_gets_generated_logical_id() {
        let mut result = SearchResult {
            id: "tt-42".into(),
            title: "Heat".into(),
            size: None,
            seed_count: 1,
            descriptor: None,
            provider: "fixture".into(),
            provider_ref: None,
        };
        assert_eq!(result.logical_id().as_str(), "tt-42");
        result.id = String::new();
        let generated = result.logical_id();
        assert!(Uuid::parse_str(generated.as_str()).is_ok());
        assert_ne!(generated, result.logical_id());
    }

    #[test]
    fn descriptor_accepts_bare_exact_topics() {
        let descriptor = Descriptor::parse("magnet:?xt=abc").expect("parse");
        assert_eq!(descriptor.key(), "abc");
        assert_eq!(descriptor.as_str(), "magnet:?xt=abc");
    }

    #[test]
    fn descriptor_rejects_non_magnets() {
        for value in ["", "https://example.com/?xt=abc", "magnet:?dn=only-name"] {
            assert!(
                matches!(
                    Descriptor::parse(value),
                    Err(TransferError::InvalidDescriptor { .. })
                ),
                "{value} should be rejected"
            );
        }
    }

    #[test]
    fn descriptor_from_info_hash_encodes_display_name() {
        let descriptor =
            Descriptor::from_info_hash("0123ABCD", Some("Inception 1080p")).expect("build");
        assert_eq!(descriptor.key(), "0123abcd");
        assert!(descriptor.as_str().contains("dn=Inception+1080p"));
        assert_eq!(descriptor.display_name().as_deref(), Some("Inception 1080p"));
        assert!(Descriptor::from_info_hash("not a hash", None).is_err());
    }

    #[test]
    fn descriptor_round_trips_through_serde_as_string() {
        let descriptor = Descriptor::parse("magnet:?xt=urn:btih:abc").expect("parse");
        let json = serde_json::to_string(&descriptor).expect("serialize");
        assert_eq!(json, "\"magnet:?xt=urn:btih:abc\"");
    }

    #[test]
    fn record_descriptor_is_set_at_most_once() {
        let mut record = SessionRecord::new(LogicalId::from("1"), "X", None, "/tmp/x");
        assert_eq!(record.state, SessionState::PendingDescriptor);
        let first = Descriptor::parse("magnet:?xt=first").expect("parse");
        let second = Descriptor::parse("magnet:?xt=second").expect("parse");
        assert!(record.set_descriptor(first.clone()));
        assert!(!record.set_descriptor(second));
        assert_eq!(record.descriptor(), Some(&first));
    }

    #[test]
    fn only_wanted_records_project_to_snapshot_entries() {
        let descriptor = Descriptor::parse("magnet:?xt=abc").expect("parse");
        let mut record = SessionRecord::new(LogicalId::from("1"), "X", Some(descriptor), "/d");
        assert_eq!(record.state, SessionState::Active);
        assert!(record.to_persisted().is_some());
        record.state = SessionState::Paused;
        assert!(record.to_persisted().is_some());
        for state in [
            SessionState::Completed,
            SessionState::Failed,
            SessionState::Cancelled,
        ] {
            record.state = state;
            assert!(record.to_persisted().is_none());
        }
    }

    #[test]
    fn stats_percent_is_clamped() {
        let stats = HandleStats {
            fraction: 1.2,
            ..HandleStats::default()
        };
        assert!((stats.percent() - 100.0).abs() < f64::EPSILON);
        assert!(stats.is_complete());
    }

    #[test]
    fn handle_reports_release_when_engine_drops_sender() {
        let (tx, rx) = watch::channel(HandleStats::default());
        let handle = TransferHandle::new(
            HandleId(1),
            Descriptor::parse("magnet:?xt=abc").expect("parse"),
            PathBuf::from("/d"),
            rx,
        );
        assert!(!handle.is_released());
        drop(tx);
        assert!(handle.is_released());
    }
}
