//! Fan-out of session events with a bounded replay window.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use chrono::Utc;
use tokio::sync::broadcast;
use tokio_stream::Stream;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

use crate::payloads::{DEFAULT_REPLAY_CAPACITY, Event, EventEnvelope, EventId};

/// Id counter and replay window, guarded together so ids leave in order.
struct Ledger {
    next_id: EventId,
    window: VecDeque<EventEnvelope>,
}

impl Ledger {
    fn since(&self, last_seen: EventId) -> Vec<EventEnvelope> {
        self.window
            .iter()
            .filter(|envelope| envelope.id > last_seen)
            .cloned()
            .collect()
    }
}

/// Publish/subscribe hub for [`Event`]s.
///
/// Publishing never waits on observers. An observer that falls more than the
/// replay capacity behind sees a `Lagged` item and loses the oldest events.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EventEnvelope>,
    ledger: Arc<Mutex<Ledger>>,
    capacity: usize,
}

impl EventBus {
    /// Bus keeping the last `capacity` events for replay.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "event bus capacity must be positive");
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            ledger: Arc::new(Mutex::new(Ledger {
                next_id: 1,
                window: VecDeque::with_capacity(capacity),
            })),
            capacity,
        }
    }

    /// Bus with [`DEFAULT_REPLAY_CAPACITY`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_REPLAY_CAPACITY)
    }

    /// Attach an observer.
    ///
    /// With `last_event_id`, retained events newer than that id are delivered
    /// first, followed by live events without duplicates.
    #[must_use]
    pub fn subscribe(&self, last_event_id: Option<EventId>) -> EventStream {
        // Subscribe under the ledger lock so nothing falls between backlog and live feed.
        let ledger = self.ledger();
        let live = BroadcastStream::new(self.sender.subscribe());
        let backlog: VecDeque<EventEnvelope> = last_event_id
            .map(|last| ledger.since(last).into())
            .unwrap_or_default();
        drop(ledger);
        EventStream {
            high_water: backlog.back().map(|envelope| envelope.id),
            backlog,
            live,
        }
    }

    /// Stamp `event` with the next id and deliver it to every observer.
    pub fn publish(&self, event: Event) -> EventId {
        let mut ledger = self.ledger();
        let id = ledger.next_id;
        ledger.next_id = id.saturating_add(1);
        let envelope = EventEnvelope {
            id,
            timestamp: Utc::now(),
            event,
        };
        if ledger.window.len() == self.capacity {
            ledger.window.pop_front();
        }
        ledger.window.push_back(envelope.clone());
        // No receivers is not an error for a bus.
        let _ = self.sender.send(envelope);
        id
    }

    /// Whether any observer is currently attached.
    #[must_use]
    pub fn has_subscribers(&self) -> bool {
        self.sender.receiver_count() > 0
    }

    /// Id of the newest retained event.
    #[must_use]
    pub fn last_event_id(&self) -> Option<EventId> {
        self.ledger().window.back().map(|envelope| envelope.id)
    }

    /// Retained events with an id greater than `id`, oldest first.
    #[must_use]
    pub fn backlog_since(&self, id: EventId) -> Vec<EventEnvelope> {
        self.ledger().since(id)
    }

    fn ledger(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Observer handle: replayed backlog first, then the live feed.
pub struct EventStream {
    backlog: VecDeque<EventEnvelope>,
    high_water: Option<EventId>,
    live: BroadcastStream<EventEnvelope>,
}

impl Stream for EventStream {
    type Item = Result<EventEnvelope, BroadcastStreamRecvError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if let Some(envelope) = self.backlog.pop_front() {
            return Poll::Ready(Some(Ok(envelope)));
        }
        loop {
            let polled = Pin::new(&mut self.live).poll_next(cx);
            match polled {
                Poll::Ready(Some(Ok(envelope)))
                    if self.high_water.is_some_and(|seen| envelope.id <= seen) => {}
                other => return other,
            }
        }
    }
}
