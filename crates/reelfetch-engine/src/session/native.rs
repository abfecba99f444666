use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use librqbit::api::TorrentIdOrHash;
use librqbit::{
    AddTorrent, AddTorrentOptions, AddTorrentResponse, ManagedTorrent, Session,
};
use reelfetch_transfer_core::{Descriptor, HandleId, HandleStats};
use tracing::debug;

use super::{SessionUpdate, SwarmSession};

type ManagedTorrentHandle = Arc<ManagedTorrent>;

const BYTES_PER_MIB: f64 = 1024.0 * 1024.0;

pub(super) async fn create_session(session_dir: PathBuf) -> Result<Box<dyn SwarmSession>> {
    let session = Session::new(session_dir)
        .await
        .context("failed to create librqbit session")?;
    Ok(Box::new(RqbitSession {
        session,
        torrents: HashMap::new(),
    }))
}

struct RqbitSession {
    session: Arc<Session>,
    torrents: HashMap<HandleId, RqbitTorrent>,
}

struct RqbitTorrent {
    id: usize,
    handle: ManagedTorrentHandle,
    destination_dir: PathBuf,
    files: Vec<String>,
}

impl RqbitTorrent {
    fn sample(&mut self) -> (HandleStats, Option<String>) {
        let stats = self.handle.stats();
        let total = stats.total_bytes;
        #[allow(clippy::cast_precision_loss)]
        let fraction = if stats.finished {
            1.0
        } else if total == 0 {
            0.0
        } else {
            stats.progress_bytes as f64 / total as f64
        };
        let (download_rate_bps, peer_count) = stats.live.as_ref().map_or((0, 0), |live| {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let rate = (live.download_speed.mbps * BYTES_PER_MIB) as u64;
            let peers = u32::try_from(live.snapshot.peer_stats.live).unwrap_or(u32::MAX);
            (rate, peers)
        });
        if stats.finished && self.files.is_empty() {
            self.files = self.list_files();
        }
        let sampled = HandleStats {
            fraction,
            download_rate_bps,
            peer_count,
            bytes_downloaded: stats.progress_bytes,
            total_bytes: (total > 0).then_some(total),
            files: self.files.clone(),
            error: None,
        };
        (sampled, stats.error)
    }

    fn list_files(&self) -> Vec<String> {
        let Some(name) = self.handle.name() else {
            return Vec::new();
        };
        let root = self.destination_dir.join(&name);
        if root.is_file() {
            return vec![name];
        }
        walkdir::WalkDir::new(&root)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file())
            .filter_map(|entry| {
                entry
                    .path()
                    .strip_prefix(&self.destination_dir)
                    .ok()
                    .map(|relative| relative.to_string_lossy().into_owned())
            })
            .collect()
    }
}

#[async_trait]
impl SwarmSession for RqbitSession {
    async fn add(
        &mut self,
        handle: HandleId,
        descriptor: &Descriptor,
        destination_dir: &Path,
    ) -> Result<()> {
        let options = AddTorrentOptions {
            output_folder: Some(destination_dir.to_string_lossy().into_owned()),
            overwrite: true,
            ..Default::default()
        };
        let response = self
            .session
            .add_torrent(AddTorrent::from_url(descriptor.as_str()), Some(options))
            .await
            .context("librqbit rejected the descriptor")?;
        let (id, managed) = match response {
            AddTorrentResponse::Added(id, managed)
            | AddTorrentResponse::AlreadyManaged(id, managed) => (id, managed),
            AddTorrentResponse::ListOnly(_) => {
                bail!("unexpected list-only response for {descriptor}")
            }
        };
        debug!(handle = %handle, torrent_id = id, "librqbit torrent added");
        self.torrents.insert(
            handle,
            RqbitTorrent {
                id,
                handle: managed,
                destination_dir: destination_dir.to_path_buf(),
                files: Vec::new(),
            },
        );
        Ok(())
    }

    async fn remove(&mut self, handle: HandleId, purge_files: bool) -> Result<()> {
        let torrent = self
            .torrents
            .remove(&handle)
            .with_context(|| format!("unknown handle {handle} for remove"))?;
        self.session
            .delete(TorrentIdOrHash::Id(torrent.id), purge_files)
            .await
            .context("librqbit failed to drop the torrent")?;
        Ok(())
    }

    async fn poll(&mut self) -> Result<Vec<SessionUpdate>> {
        Ok(self
            .torrents
            .iter_mut()
            .map(|(handle, torrent)| {
                let (stats, error) = torrent.sample();
                SessionUpdate {
                    handle: *handle,
                    stats,
                    error,
                }
            })
            .collect())
    }
}
