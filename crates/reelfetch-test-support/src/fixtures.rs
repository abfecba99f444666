//! Static providers and event helpers for integration suites.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reelfetch_events::{Event, EventStream};
use reelfetch_transfer_core::{
    Descriptor, DescriptorLookup, SearchProvider, SearchResult, TransferError, TransferResult,
};
use tokio::time::timeout;
use tokio_stream::StreamExt;

/// Default wait applied by [`next_event`] and [`expect_event`].
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(2);

/// Build a search result with an optional inline descriptor.
#[must_use]
pub fn result(id: &str, title: &str, seed_count: u32, descriptor: Option<&str>) -> SearchResult {
    SearchResult {
        id: id.to_string(),
        title: title.to_string(),
        size: Some(1_000),
        seed_count,
        descriptor: descriptor.map(str::to_string),
        provider: "fixture".to_string(),
        provider_ref: Some(format!("ref-{id}")),
    }
}

/// Search provider returning a fixed list, or failing when built with [`StaticSearchProvider::failing`].
#[derive(Clone, Default)]
pub struct StaticSearchProvider {
    results: Vec<SearchResult>,
    fail: bool,
}

impl StaticSearchProvider {
    /// Provider answering every query with `results`.
    #[must_use]
    pub const fn new(results: Vec<SearchResult>) -> Self {
        Self {
            results,
            fail: false,
        }
    }

    /// Provider whose every query errors.
    #[must_use]
    pub const fn failing() -> Self {
        Self {
            results: Vec::new(),
            fail: true,
        }
    }
}

#[async_trait]
impl SearchProvider for StaticSearchProvider {
    async fn search(&self, _query: &str) -> TransferResult<Vec<SearchResult>> {
        if self.fail {
            return Err(TransferError::Search {
                provider: "fixture",
                source: "provider offline".into(),
            });
        }
        Ok(self.results.clone())
    }
}

/// Descriptor lookup keyed by `provider_ref`, counting calls.
#[derive(Clone, Default)]
pub struct StaticLookup {
    descriptors: HashMap<String, Descriptor>,
    fail: bool,
    calls: Arc<AtomicUsize>,
}

impl StaticLookup {
    /// Lookup that knows no descriptors.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Lookup whose every call errors.
    #[must_use]
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Register the descriptor returned for `provider_ref`.
    ///
    /// # Panics
    ///
    /// Panics if `magnet` is not a valid descriptor.
    #[must_use]
    pub fn with(mut self, provider_ref: &str, magnet: &str) -> Self {
        let descriptor = Descriptor::parse(magnet).expect("fixture descriptor must parse");
        self.descriptors.insert(provider_ref.to_string(), descriptor);
        self
    }

    /// Number of lookups performed.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DescriptorLookup for StaticLookup {
    async fn get_descriptor(&self, result: &SearchResult) -> TransferResult<Option<Descriptor>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(TransferError::Search {
                provider: "fixture",
                source: "lookup offline".into(),
            });
        }
        Ok(result
            .provider_ref
            .as_ref()
            .and_then(|key| self.descriptors.get(key))
            .cloned())
    }
}

/// Next event from `stream`, or `None` on timeout or stream end.
pub async fn next_event(stream: &mut EventStream) -> Option<Event> {
    match timeout(EVENT_TIMEOUT, stream.next()).await {
        Ok(Some(Ok(envelope))) => Some(envelope.event),
        _ => None,
    }
}

/// Wait for the first event matching `predicate`, skipping others.
///
/// # Panics
///
/// Panics if no matching event arrives within [`EVENT_TIMEOUT`].
pub async fn expect_event(stream: &mut EventStream, predicate: impl Fn(&Event) -> bool) -> Event {
    let wait = async {
        while let Some(item) = stream.next().await {
            if let Ok(envelope) = item
                && predicate(&envelope.event)
            {
                return Some(envelope.event);
            }
        }
        None
    };
    timeout(EVENT_TIMEOUT, wait)
        .await
        .ok()
        .flatten()
        .expect("timed out waiting for matching event")
}

/// Drain every event already buffered on `stream` without waiting.
pub async fn drain_events(stream: &mut EventStream) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(Some(Ok(envelope))) = timeout(Duration::from_millis(50), stream.next()).await {
        events.push(envelope.event);
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use reelfetch_events::EventBus;

    #[tokio::test]
    async fn lookup_counts_calls_and_resolves_by_reference() {
        let lookup = StaticLookup::empty().with("ref-1", "magnet:?xt=urn:btih:abc");
        let found = lookup
            .get_descriptor(&result("1", "Heat 1080p", 3, None))
            .await
            .expect("lookup");
        assert_eq!(found.map(|d| d.key().to_string()), Some("abc".into()));
        assert!(
            lookup
                .get_descriptor(&result("2", "Other", 3, None))
                .await
                .expect("lookup")
                .is_none()
        );
        assert_eq!(lookup.calls(), 2);
    }

    #[tokio::test]
    async fn expect_event_skips_non_matching_events() {
        let bus = EventBus::new();
        let mut stream = bus.subscribe(None);
        bus.publish(Event::SessionRemoved {
            logical_id: "a".into(),
        });
        bus.publish(Event::ResultFileMissing {
            logical_id: "b".into(),
        });
        let event = expect_event(&mut stream, |event| event.kind() == "result-file-missing").await;
        assert_eq!(event.logical_id(), Some("b"));
        assert!(drain_events(&mut stream).await.is_empty());
    }
}
