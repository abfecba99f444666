#![allow(clippy::redundant_pub_crate)]

use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;
use reelfetch_transfer_core::{Descriptor, HandleId, HandleStats};

mod memory;
#[cfg(feature = "rqbit")]
mod native;

pub use memory::MemoryProfile;
#[cfg(test)]
pub(crate) use memory::MemorySession;

/// Swarm backend selected when the engine is spawned.
#[derive(Debug, Clone)]
pub enum Backend {
    /// In-process handles driven by a [`MemoryProfile`]; no network traffic.
    Memory(MemoryProfile),
    /// librqbit session persisting its own state under `session_dir`.
    #[cfg(feature = "rqbit")]
    Rqbit {
        /// Fallback output directory for the librqbit session.
        session_dir: std::path::PathBuf,
    },
}

impl Backend {
    /// Backend matching the compiled feature set.
    #[must_use]
    pub fn for_build(session_dir: &Path) -> Self {
        #[cfg(feature = "rqbit")]
        {
            Self::Rqbit {
                session_dir: session_dir.to_path_buf(),
            }
        }

        #[cfg(not(feature = "rqbit"))]
        {
            let _ = session_dir;
            Self::Memory(MemoryProfile::idle())
        }
    }

    /// Whether transfers on this backend actually reach a swarm.
    #[must_use]
    pub const fn is_networked(&self) -> bool {
        !matches!(self, Self::Memory(_))
    }
}

/// Fresh counters for one handle, sampled during a poll.
#[derive(Debug, Clone)]
pub(crate) struct SessionUpdate {
    pub(crate) handle: HandleId,
    pub(crate) stats: HandleStats,
    pub(crate) error: Option<String>,
}

#[async_trait]
pub(crate) trait SwarmSession: Send {
    async fn add(
        &mut self,
        handle: HandleId,
        descriptor: &Descriptor,
        destination_dir: &Path,
    ) -> Result<()>;
    async fn remove(&mut self, handle: HandleId, purge_files: bool) -> Result<()>;
    async fn poll(&mut self) -> Result<Vec<SessionUpdate>>;
}

pub(crate) async fn create_session(backend: Backend) -> Result<Box<dyn SwarmSession>> {
    match backend {
        Backend::Memory(profile) => Ok(Box::new(memory::MemorySession::new(profile))),
        #[cfg(feature = "rqbit")]
        Backend::Rqbit { session_dir } => native::create_session(session_dir).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(feature = "rqbit")]
    #[test]
    fn default_build_reaches_the_swarm() {
        let backend = Backend::for_build(Path::new("/tmp/reelfetch"));
        assert!(backend.is_networked());
        assert!(matches!(
            backend,
            Backend::Rqbit { ref session_dir } if session_dir == Path::new("/tmp/reelfetch")
        ));
    }

    #[cfg(not(feature = "rqbit"))]
    #[test]
    fn build_without_rqbit_falls_back_to_idle_memory() {
        let backend = Backend::for_build(Path::new("/tmp/reelfetch"));
        assert!(matches!(backend, Backend::Memory(ref profile) if profile.bytes_per_poll == 0));
    }

    #[test]
    fn memory_backend_is_offline() {
        assert!(!Backend::Memory(MemoryProfile::idle()).is_networked());
    }
}
