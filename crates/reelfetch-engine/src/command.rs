use std::path::PathBuf;

use reelfetch_transfer_core::{Descriptor, HandleId, TransferHandle};
use tokio::sync::oneshot;

use crate::error::EngineError;

/// Requests accepted by the swarm worker. Each carries its own reply channel.
#[derive(Debug)]
pub(crate) enum EngineCommand {
    /// Register a descriptor, or hand back the handle already fetching it.
    Start {
        /// Content to fetch.
        descriptor: Descriptor,
        /// Directory the backend writes into.
        destination_dir: PathBuf,
        /// Reply channel.
        respond_to: oneshot::Sender<Result<TransferHandle, EngineError>>,
    },
    /// Look up the handle for a descriptor key.
    Get {
        /// Dedup key of the descriptor.
        key: String,
        /// Reply channel.
        respond_to: oneshot::Sender<Option<TransferHandle>>,
    },
    /// Detach a handle from the swarm.
    Stop {
        /// Handle to detach.
        handle: HandleId,
        /// Whether data on disk is deleted as well.
        purge_files: bool,
        /// Reply channel.
        respond_to: oneshot::Sender<Result<(), EngineError>>,
    },
    /// List every handle the worker owns.
    Active {
        /// Reply channel.
        respond_to: oneshot::Sender<Vec<TransferHandle>>,
    },
}
