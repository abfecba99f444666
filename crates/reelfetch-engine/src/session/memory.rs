use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use reelfetch_transfer_core::{Descriptor, HandleId, HandleStats};

use super::{SessionUpdate, SwarmSession};

/// Behaviour of the in-process backend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryProfile {
    /// Bytes each handle gains per poll. Zero keeps handles stalled.
    pub bytes_per_poll: u64,
    /// Payload length reported once a handle starts moving.
    pub total_bytes: u64,
    /// Peer count reported while a handle is incomplete.
    pub peer_count: u32,
    /// Descriptor keys whose handles fail on the first poll.
    pub failing_keys: HashSet<String>,
}

impl MemoryProfile {
    /// Handles that never find peers.
    #[must_use]
    pub fn idle() -> Self {
        Self::default()
    }

    /// Handles that advance by `bytes_per_poll` until `total_bytes`.
    #[must_use]
    pub fn simulated(bytes_per_poll: u64, total_bytes: u64) -> Self {
        Self {
            bytes_per_poll,
            total_bytes,
            peer_count: 4,
            failing_keys: HashSet::new(),
        }
    }

    /// Make handles for `key` report a backend failure.
    #[must_use]
    pub fn failing(mut self, key: impl Into<String>) -> Self {
        self.failing_keys.insert(key.into());
        self
    }
}

/// In-memory stand-in for a swarm session.
pub(crate) struct MemorySession {
    profile: MemoryProfile,
    handles: BTreeMap<HandleId, MemoryHandle>,
}

struct MemoryHandle {
    key: String,
    name: String,
    downloaded: u64,
}

impl MemorySession {
    pub(crate) const fn new(profile: MemoryProfile) -> Self {
        Self {
            profile,
            handles: BTreeMap::new(),
        }
    }

    fn stats_for(&self, handle: &MemoryHandle) -> HandleStats {
        if self.profile.bytes_per_poll == 0 || self.profile.total_bytes == 0 {
            return HandleStats::default();
        }
        let total = self.profile.total_bytes;
        #[allow(clippy::cast_precision_loss)]
        let fraction = handle.downloaded as f64 / total as f64;
        let complete = handle.downloaded >= total;
        HandleStats {
            fraction,
            download_rate_bps: if complete { 0 } else { self.profile.bytes_per_poll },
            peer_count: if complete { 0 } else { self.profile.peer_count },
            bytes_downloaded: handle.downloaded,
            total_bytes: Some(total),
            files: vec![format!("{}/{}.mkv", handle.name, handle.name)],
            error: None,
        }
    }
}

#[async_trait]
impl SwarmSession for MemorySession {
    async fn add(
        &mut self,
        handle: HandleId,
        descriptor: &Descriptor,
        _destination_dir: &Path,
    ) -> Result<()> {
        let name = descriptor
            .display_name()
            .unwrap_or_else(|| descriptor.key().to_string());
        self.handles.insert(
            handle,
            MemoryHandle {
                key: descriptor.key().to_string(),
                name,
                downloaded: 0,
            },
        );
        Ok(())
    }

    async fn remove(&mut self, handle: HandleId, _purge_files: bool) -> Result<()> {
        self.handles
            .remove(&handle)
            .map(|_| ())
            .ok_or_else(|| anyhow!("unknown handle {handle} for remove"))
    }

    async fn poll(&mut self) -> Result<Vec<SessionUpdate>> {
        let step = self.profile.bytes_per_poll;
        let total = self.profile.total_bytes;
        let mut updates = Vec::with_capacity(self.handles.len());
        for handle in self.handles.values_mut() {
            if !self.profile.failing_keys.contains(&handle.key) {
                handle.downloaded = handle.downloaded.saturating_add(step).min(total);
            }
        }
        for (id, handle) in &self.handles {
            let error = self
                .profile
                .failing_keys
                .contains(&handle.key)
                .then(|| "no reachable peers".to_string());
            updates.push(SessionUpdate {
                handle: *id,
                stats: self.stats_for(handle),
                error,
            });
        }
        Ok(updates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(value: &str) -> Descriptor {
        Descriptor::parse(value).expect("descriptor")
    }

    #[tokio::test]
    async fn simulated_handles_advance_to_completion() -> Result<()> {
        let mut session = MemorySession::new(MemoryProfile::simulated(400, 1_000));
        session
            .add(
                HandleId(1),
                &descriptor("magnet:?xt=urn:btih:abc&dn=Heat"),
                Path::new("/downloads"),
            )
            .await?;

        let fractions: Vec<f64> = {
            let mut seen = Vec::new();
            for _ in 0..3 {
                let updates = session.poll().await?;
                seen.push(updates[0].stats.fraction);
            }
            seen
        };
        assert!((fractions[0] - 0.4).abs() < 1e-9);
        assert!((fractions[1] - 0.8).abs() < 1e-9);
        assert!((fractions[2] - 1.0).abs() < 1e-9);

        let last = session.poll().await?.remove(0);
        assert_eq!(last.stats.files, vec!["Heat/Heat.mkv".to_string()]);
        assert_eq!(last.stats.peer_count, 0);
        Ok(())
    }

    #[tokio::test]
    async fn idle_handles_stay_at_zero() -> Result<()> {
        let mut session = MemorySession::new(MemoryProfile::idle());
        session
            .add(HandleId(1), &descriptor("magnet:?xt=abc"), Path::new("/d"))
            .await?;
        let updates = session.poll().await?;
        assert_eq!(updates[0].stats, HandleStats::default());
        assert!(updates[0].error.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn failing_keys_report_errors_and_remove_is_checked() -> Result<()> {
        let mut session =
            MemorySession::new(MemoryProfile::simulated(10, 100).failing("bad"));
        session
            .add(HandleId(2), &descriptor("magnet:?xt=bad"), Path::new("/d"))
            .await?;
        let updates = session.poll().await?;
        assert_eq!(updates[0].error.as_deref(), Some("no reachable peers"));
        assert_eq!(updates[0].stats.bytes_downloaded, 0);

        session.remove(HandleId(2), true).await?;
        assert!(session.remove(HandleId(2), true).await.is_err());
        Ok(())
    }
}
