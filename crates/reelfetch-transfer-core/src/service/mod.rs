//! Capability traits implemented by engine adapters and search backends.

use std::path::Path;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::TransferResult;
use crate::model::{Descriptor, EngineEvent, SearchResult, StopOptions, TransferHandle};

/// Receiver of asynchronous engine notifications.
pub type EngineNotifications = broadcast::Receiver<EngineEvent>;

/// Primary engine trait implemented by swarm adapters.
#[async_trait]
pub trait TransferEngine: Send + Sync {
    /// Register a descriptor with the engine, writing into `destination_dir`.
    ///
    /// Returns the existing handle when the descriptor is already registered.
    async fn start(
        &self,
        descriptor: &Descriptor,
        destination_dir: &Path,
    ) -> TransferResult<TransferHandle>;

    /// Look up the live handle for a descriptor.
    async fn get(&self, descriptor: &Descriptor) -> TransferResult<Option<TransferHandle>>;

    /// Detach a handle, optionally deleting its data.
    async fn stop(&self, handle: &TransferHandle, options: StopOptions) -> TransferResult<()>;

    /// Every handle the engine currently owns.
    async fn active(&self) -> TransferResult<Vec<TransferHandle>>;

    /// Subscribe to completion and failure notifications.
    fn subscribe(&self) -> EngineNotifications;
}

/// Source of candidate results for a free-text query.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Run the query and return raw, unfiltered results.
    async fn search(&self, query: &str) -> TransferResult<Vec<SearchResult>>;
}

/// Resolves a result that arrived without an embedded descriptor.
#[async_trait]
pub trait DescriptorLookup: Send + Sync {
    /// Fetch the descriptor for a result; `None` when the provider has none.
    async fn get_descriptor(&self, result: &SearchResult) -> TransferResult<Option<Descriptor>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransferError;

    struct EchoLookup;

    #[async_trait]
    impl DescriptorLookup for EchoLookup {
        async fn get_descriptor(
            &self,
            result: &SearchResult,
        ) -> TransferResult<Option<Descriptor>> {
            result
                .provider_ref
                .as_deref()
                .map(|hash| Descriptor::from_info_hash(hash, Some(&result.title)))
                .transpose()
        }
    }

    fn result(provider_ref: Option<&str>) -> SearchResult {
        SearchResult {
            id: "7".into(),
            title: "Heat 1995 1080p".into(),
            size: None,
            seed_count: 4,
            descriptor: None,
            provider: "echo".into(),
            provider_ref: provider_ref.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn lookup_is_object_safe_and_propagates_errors() {
        let lookup: Box<dyn DescriptorLookup> = Box::new(EchoLookup);
        let found = lookup
            .get_descriptor(&result(Some("ABC123")))
            .await
            .expect("lookup");
        assert_eq!(found.map(|d| d.key().to_string()), Some("abc123".into()));
        assert!(
            lookup
                .get_descriptor(&result(None))
                .await
                .expect("lookup")
                .is_none()
        );
        assert!(matches!(
            lookup.get_descriptor(&result(Some("bad hash"))).await,
            Err(TransferError::InvalidDescriptor { .. })
        ));
    }
}
