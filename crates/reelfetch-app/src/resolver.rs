//! Turns a search result into a descriptor the engine can fetch.

use std::sync::Arc;

use reelfetch_transfer_core::{
    Descriptor, DescriptorLookup, SearchResult, TransferError, TransferResult,
};
use tracing::debug;

/// Resolves search results to descriptors, calling the lookup only when needed.
#[derive(Clone)]
pub struct ContentResolver {
    lookup: Arc<dyn DescriptorLookup>,
}

impl ContentResolver {
    /// Build a resolver over `lookup`.
    #[must_use]
    pub fn new(lookup: Arc<dyn DescriptorLookup>) -> Self {
        Self { lookup }
    }

    /// Descriptor embedded in `result`, if it carries one.
    ///
    /// A malformed embedded value is reported as a resolution failure.
    #[must_use]
    pub fn embedded(result: &SearchResult) -> Option<TransferResult<Descriptor>> {
        result.descriptor.as_deref().map(|value| {
            Descriptor::parse(value).map_err(|err| TransferError::Resolution {
                title: result.title.clone(),
                source: Some(Box::new(err)),
            })
        })
    }

    /// Resolve `result` to a descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::Resolution`] when the lookup fails or has no
    /// descriptor for the result. Lookup failures are never retried here.
    pub async fn resolve(&self, result: &SearchResult) -> TransferResult<Descriptor> {
        if let Some(embedded) = Self::embedded(result) {
            return embedded;
        }
        debug!(title = %result.title, provider = %result.provider, "looking up descriptor");
        match self.lookup.get_descriptor(result).await {
            Ok(Some(descriptor)) => Ok(descriptor),
            Ok(None) => Err(TransferError::Resolution {
                title: result.title.clone(),
                source: None,
            }),
            Err(err) => Err(TransferError::Resolution {
                title: result.title.clone(),
                source: Some(Box::new(err)),
            }),
        }
    }
}
