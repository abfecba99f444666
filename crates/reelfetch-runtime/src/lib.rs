#![forbid(unsafe_code)]
#![warn(
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    missing_docs
)]
#![allow(clippy::module_name_repetitions)]

//! Persistence for sessions that were still wanted at shutdown.
//!
//! The snapshot is a JSON array of [`PersistedEntry`] objects. Each save
//! replaces the previous snapshot wholesale; each take consumes it.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use reelfetch_transfer_core::{PersistedEntry, TransferError, TransferResult};
use tracing::{debug, info};

/// File name used for the snapshot inside the data directory.
pub const SNAPSHOT_FILE_NAME: &str = "sessions.json";

/// File-backed snapshot of wanted sessions.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    /// Store writing to an explicit file path.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store writing [`SNAPSHOT_FILE_NAME`] inside `data_dir`.
    #[must_use]
    pub fn in_dir(data_dir: &Path) -> Self {
        Self::new(data_dir.join(SNAPSHOT_FILE_NAME))
    }

    /// Snapshot file location.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the snapshot with `entries`.
    ///
    /// The new content is written to a sibling temp file and renamed over the
    /// old snapshot so a crash mid-write never leaves a truncated file.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::SnapshotWrite`] if serialisation or any
    /// filesystem step fails.
    pub fn save(&self, entries: &[PersistedEntry]) -> TransferResult<()> {
        let write_err = |source: io::Error| TransferError::SnapshotWrite {
            path: self.path.clone(),
            source: Box::new(source),
        };
        let serialised =
            serde_json::to_vec_pretty(entries).map_err(|source| TransferError::SnapshotWrite {
                path: self.path.clone(),
                source: Box::new(source),
            })?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(write_err)?;
        }
        let staging = self.staging_path();
        {
            let mut file = fs::File::create(&staging).map_err(write_err)?;
            file.write_all(&serialised).map_err(write_err)?;
            file.sync_all().map_err(write_err)?;
        }
        fs::rename(&staging, &self.path).map_err(write_err)?;
        info!(
            path = %self.path.display(),
            entries = entries.len(),
            "session snapshot written"
        );
        Ok(())
    }

    /// Read the snapshot and remove it so it is consumed exactly once.
    ///
    /// A missing file is an empty snapshot. A file that cannot be parsed is
    /// removed as well so the next start does not trip over it again.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::SnapshotRead`] when the file exists but cannot
    /// be read or parsed.
    pub fn take(&self) -> TransferResult<Vec<PersistedEntry>> {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no session snapshot present");
                return Ok(Vec::new());
            }
            Err(err) => {
                return Err(TransferError::SnapshotRead {
                    path: self.path.clone(),
                    source: Box::new(err),
                });
            }
        };
        let parsed = serde_json::from_slice::<Vec<PersistedEntry>>(&raw);
        self.discard();
        parsed.map_err(|source| TransferError::SnapshotRead {
            path: self.path.clone(),
            source: Box::new(source),
        })
    }

    fn discard(&self) {
        if let Err(err) = fs::remove_file(&self.path)
            && err.kind() != io::ErrorKind::NotFound
        {
            debug!(
                path = %self.path.display(),
                error = %err,
                "failed to remove consumed session snapshot"
            );
        }
    }

    fn staging_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(std::ffi::OsStr::to_os_string)
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(id: &str) -> PersistedEntry {
        PersistedEntry {
            logical_id: id.to_string(),
            title: format!("Title {id}"),
            descriptor: format!("magnet:?xt=urn:btih:{id}"),
            destination_dir: PathBuf::from("/data/movies"),
        }
    }

    #[test]
    fn save_then_take_consumes_snapshot() -> TransferResult<()> {
        let temp = TempDir::new().expect("tempdir");
        let store = SnapshotStore::in_dir(temp.path());
        store.save(&[entry("1"), entry("3")])?;
        assert!(store.path().exists());

        let restored = store.take()?;
        assert_eq!(restored, vec![entry("1"), entry("3")]);
        assert!(!store.path().exists());
        assert!(store.take()?.is_empty());
        Ok(())
    }

    #[test]
    fn save_overwrites_previous_snapshot() -> TransferResult<()> {
        let temp = TempDir::new().expect("tempdir");
        let store = SnapshotStore::new(temp.path().join("nested/sessions.json"));
        store.save(&[entry("1"), entry("2")])?;
        store.save(&[entry("9")])?;
        assert_eq!(store.take()?, vec![entry("9")]);
        assert!(!temp.path().join("nested/sessions.json.tmp").exists());
        Ok(())
    }

    #[test]
    fn snapshot_is_a_json_array_of_camel_case_entries() -> TransferResult<()> {
        let temp = TempDir::new().expect("tempdir");
        let store = SnapshotStore::in_dir(temp.path());
        store.save(&[entry("1")])?;
        let raw = fs::read_to_string(store.path()).expect("read");
        let value: serde_json::Value = serde_json::from_str(&raw).expect("json");
        assert_eq!(value[0]["logicalId"], "1");
        assert_eq!(value[0]["destinationDir"], "/data/movies");
        Ok(())
    }

    #[test]
    fn corrupt_snapshot_is_reported_and_discarded() {
        let temp = TempDir::new().expect("tempdir");
        let store = SnapshotStore::in_dir(temp.path());
        fs::write(store.path(), b"{not json").expect("write");

        assert!(matches!(
            store.take(),
            Err(TransferError::SnapshotRead { .. })
        ));
        assert!(!store.path().exists());
    }
}
