//! Per-session progress sampling.
//!
//! # Design
//! - One task per active session, governed by the session's cancellation token.
//! - Each tick reads the handle's latest counters from its watch channel, so a
//!   slow engine never delays a tick and a slow observer never delays the engine.
//! - The task ends on cancellation, on completion (the registry reports that),
//!   when the engine releases the handle, or once nobody is listening.

use std::time::Duration;

use reelfetch_events::{Event, EventBus};
use reelfetch_transfer_core::{LogicalId, TransferHandle};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Cadence of progress samples outside tests.
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

/// Why a reporter stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReporterExit {
    /// The owning session left the active state.
    Cancelled,
    /// The handle reached full progress.
    Complete,
    /// The engine dropped the handle.
    Released,
    /// No observer is subscribed to the bus.
    ObserverGone,
}

/// Samples one handle and publishes normalized progress events.
pub struct ProgressReporter {
    logical_id: LogicalId,
    handle: TransferHandle,
    bus: EventBus,
    every: Duration,
    token: CancellationToken,
}

impl ProgressReporter {
    /// Reporter for `handle`, publishing under `logical_id`.
    #[must_use]
    pub const fn new(
        logical_id: LogicalId,
        handle: TransferHandle,
        bus: EventBus,
        every: Duration,
        token: CancellationToken,
    ) -> Self {
        Self {
            logical_id,
            handle,
            bus,
            every,
            token,
        }
    }

    /// Run the sampling loop on its own task.
    pub fn spawn(self) -> JoinHandle<ReporterExit> {
        tokio::spawn(self.run())
    }

    /// Sample until one of the exit conditions holds.
    pub async fn run(self) -> ReporterExit {
        let mut ticker = interval(self.every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick fires immediately; samples start one period after binding.
        ticker.tick().await;

        let mut floor = 0.0_f64;
        let exit = loop {
            tokio::select! {
                biased;
                () = self.token.cancelled() => break ReporterExit::Cancelled,
                _ = ticker.tick() => {}
            }
            match self.sample(floor) {
                Ok(percent) => floor = percent,
                Err(exit) => break exit,
            }
        };
        debug!(logical_id = %self.logical_id, ?exit, "progress reporter stopped");
        exit
    }

    /// Publish one sample no lower than `floor`, returning the published percent.
    fn sample(&self, floor: f64) -> Result<f64, ReporterExit> {
        if self.handle.is_released() {
            return Err(ReporterExit::Released);
        }
        let stats = self.handle.stats();
        if stats.is_complete() {
            return Err(ReporterExit::Complete);
        }
        if !self.bus.has_subscribers() {
            return Err(ReporterExit::ObserverGone);
        }
        // A pause may land between the tick and here.
        if self.token.is_cancelled() {
            return Err(ReporterExit::Cancelled);
        }
        let percent = round_tenth(stats.percent()).max(floor);
        self.bus.publish(Event::DownloadProgress {
            logical_id: self.logical_id.to_string(),
            percent,
            rate_bytes_per_sec: stats.download_rate_bps,
            bytes_downloaded: stats.bytes_downloaded,
            total_bytes: stats.total_bytes,
            peer_count: stats.peer_count,
        });
        Ok(percent)
    }
}

fn round_tenth(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use reelfetch_test_support::fixtures::{drain_events, next_event};
    use reelfetch_transfer_core::{Descriptor, HandleId, HandleStats};
    use std::path::PathBuf;
    use tokio::sync::watch;

    const TICK: Duration = Duration::from_millis(10);

    fn handle() -> (watch::Sender<HandleStats>, TransferHandle) {
        let (tx, rx) = watch::channel(HandleStats::default());
        let descriptor = Descriptor::parse("magnet:?xt=urn:btih:abc").expect("descriptor");
        (
            tx,
            TransferHandle::new(HandleId(1), descriptor, PathBuf::from("/d"), rx),
        )
    }

    fn stats(fraction: f64) -> HandleStats {
        HandleStats {
            fraction,
            download_rate_bps: 2_048,
            peer_count: 5,
            bytes_downloaded: 10,
            total_bytes: Some(100),
            ..HandleStats::default()
        }
    }

    fn percent_of(event: &Event) -> f64 {
        match event {
            Event::DownloadProgress { percent, .. } => *percent,
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn publishes_samples_and_never_regresses() {
        let bus = EventBus::new();
        let mut stream = bus.subscribe(None);
        let (tx, handle) = handle();
        let token = CancellationToken::new();
        tx.send_replace(stats(0.4));
        let task = ProgressReporter::new("row".into(), handle, bus.clone(), TICK, token.clone())
            .spawn();

        let first = next_event(&mut stream).await.expect("first sample");
        assert!((percent_of(&first) - 40.0).abs() < f64::EPSILON);
        assert!(matches!(
            first,
            Event::DownloadProgress {
                rate_bytes_per_sec: 2_048,
                peer_count: 5,
                total_bytes: Some(100),
                ..
            }
        ));

        tx.send_replace(stats(0.3));
        let mut last = 40.0;
        for _ in 0..3 {
            let event = next_event(&mut stream).await.expect("sample");
            let percent = percent_of(&event);
            assert!(percent >= last);
            last = percent;
        }

        token.cancel();
        assert_eq!(task.await.expect("join"), ReporterExit::Cancelled);
    }

    #[tokio::test]
    async fn stops_on_completion_without_final_sample() {
        let bus = EventBus::new();
        let mut stream = bus.subscribe(None);
        let (tx, handle) = handle();
        tx.send_replace(stats(1.0));
        let exit = ProgressReporter::new("row".into(), handle, bus, TICK, CancellationToken::new())
            .run()
            .await;
        assert_eq!(exit, ReporterExit::Complete);
        assert!(drain_events(&mut stream).await.is_empty());
    }

    #[tokio::test]
    async fn cancellation_after_a_tick_suppresses_the_sample() {
        let bus = EventBus::new();
        let mut stream = bus.subscribe(None);
        let (tx, handle) = handle();
        tx.send_replace(stats(0.5));
        let token = CancellationToken::new();
        let reporter = ProgressReporter::new("row".into(), handle, bus, TICK, token.clone());

        let published = reporter.sample(0.0).expect("sample");
        assert!((published - 50.0).abs() < f64::EPSILON);
        assert!(next_event(&mut stream).await.is_some());

        token.cancel();
        assert_eq!(reporter.sample(50.0), Err(ReporterExit::Cancelled));
        assert!(drain_events(&mut stream).await.is_empty());
    }

    #[tokio::test]
    async fn stops_when_observer_is_gone() {
        let (_tx, handle) = handle();
        let exit = ProgressReporter::new(
            "row".into(),
            handle,
            EventBus::new(),
            TICK,
            CancellationToken::new(),
        )
        .run()
        .await;
        assert_eq!(exit, ReporterExit::ObserverGone);
    }

    #[tokio::test]
    async fn stops_when_engine_releases_handle() {
        let bus = EventBus::new();
        let _stream = bus.subscribe(None);
        let (tx, handle) = handle();
        drop(tx);
        let exit = ProgressReporter::new("row".into(), handle, bus, TICK, CancellationToken::new())
            .run()
            .await;
        assert_eq!(exit, ReporterExit::Released);
    }
}
