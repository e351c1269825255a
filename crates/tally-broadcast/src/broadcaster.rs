//! The broadcast loop.

use std::sync::Arc;
use std::time::Duration;

use tally_core::TallyStore;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::PublishError;
use crate::sink::{Publication, PublishSink};

/// Default broadcast channel name.
pub const DEFAULT_CHANNEL: &str = "twitter-votes";

/// Default broadcast event name.
pub const DEFAULT_EVENT: &str = "options";

/// Default time between broadcasts.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(3);

/// Default pause before the single retry of a failed publish.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(250);

/// Shortest interval the loop will run at.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Broadcast loop settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastConfig {
    /// Time between ticks. The first tick fires one full interval after start.
    pub interval: Duration,
    /// Channel every publication is addressed to.
    pub channel: String,
    /// Event name every publication carries.
    pub event: String,
    /// Pause before retrying a failed publish.
    pub retry_backoff: Duration,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            channel: DEFAULT_CHANNEL.to_owned(),
            event: DEFAULT_EVENT.to_owned(),
            retry_backoff: DEFAULT_RETRY_BACKOFF,
        }
    }
}

/// Counters returned when the loop stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Ticks that fired.
    pub ticks: u64,
    /// Successful sink deliveries (first try or retry).
    pub delivered: u64,
    /// Sink deliveries abandoned after the retry.
    pub failed: u64,
}

/// Publishes a tally snapshot to every sink on a fixed interval.
pub struct Broadcaster<S> {
    store: Arc<TallyStore>,
    sinks: Vec<S>,
    config: BroadcastConfig,
    report: BroadcastReport,
}

impl<S: PublishSink> Broadcaster<S> {
    /// Create a broadcaster over `sinks`.
    ///
    /// A zero interval is raised to one millisecond.
    pub fn new(store: Arc<TallyStore>, sinks: Vec<S>, mut config: BroadcastConfig) -> Self {
        config.interval = config.interval.max(MIN_INTERVAL);
        Self {
            store,
            sinks,
            config,
            report: BroadcastReport::default(),
        }
    }

    /// Settings in effect.
    pub const fn config(&self) -> &BroadcastConfig {
        &self.config
    }

    /// Counters so far.
    pub const fn report(&self) -> BroadcastReport {
        self.report
    }

    /// Run until `cancel` fires, then return the counters.
    ///
    /// Ticks never overlap: a slow publish delays the next tick rather than
    /// queueing a burst.
    pub async fn run(mut self, cancel: CancellationToken) -> BroadcastReport {
        let period = self.config.interval;
        let start = Instant::now().checked_add(period).unwrap_or_else(Instant::now);
        let mut ticker = tokio::time::interval_at(start, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            interval_ms = u64::try_from(period.as_millis()).unwrap_or(u64::MAX),
            channel = %self.config.channel,
            event = %self.config.event,
            sinks = self.sinks.len(),
            "broadcaster started"
        );

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            self.tick().await;
        }

        info!(
            ticks = self.report.ticks,
            delivered = self.report.delivered,
            failed = self.report.failed,
            "broadcaster stopped"
        );
        self.report
    }

    /// Take one snapshot and publish it to every sink.
    ///
    /// Returns the number of sinks that accepted it.
    pub async fn tick(&mut self) -> usize {
        self.report.ticks = self.report.ticks.saturating_add(1);
        let sequence = self.report.ticks;

        let snapshot = self.store.snapshot();
        let payload = match serde_json::to_string(&snapshot) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(sequence, error = %e, "failed to serialize snapshot, skipping tick");
                let skipped = u64::try_from(self.sinks.len()).unwrap_or(u64::MAX);
                self.report.failed = self.report.failed.saturating_add(skipped);
                return 0;
            }
        };

        let publication = Publication {
            channel: self.config.channel.clone(),
            event: self.config.event.clone(),
            payload,
            sequence,
        };

        let mut accepted: usize = 0;
        for sink in &self.sinks {
            match publish_with_retry(sink, &publication, self.config.retry_backoff).await {
                Ok(()) => {
                    accepted = accepted.saturating_add(1);
                    self.report.delivered = self.report.delivered.saturating_add(1);
                }
                Err(e) => {
                    warn!(
                        sink = sink.name(),
                        sequence,
                        error = %e,
                        "publish failed after retry, skipping tick for this sink"
                    );
                    self.report.failed = self.report.failed.saturating_add(1);
                }
            }
        }

        debug!(sequence, total = snapshot.total(), accepted, "tick broadcast");
        accepted
    }
}

async fn publish_with_retry<S: PublishSink>(
    sink: &S,
    publication: &Publication,
    backoff: Duration,
) -> Result<(), PublishError> {
    match sink.publish(publication).await {
        Ok(()) => Ok(()),
        Err(e) => {
            debug!(sink = sink.name(), error = %e, "publish failed, retrying once");
            tokio::time::sleep(backoff).await;
            sink.publish(publication).await
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    /// Records every publication; fails the first `fail_first` attempts.
    #[derive(Default)]
    struct RecordingSink {
        fail_first: u32,
        attempts: AtomicU32,
        received: Mutex<Vec<Publication>>,
    }

    impl RecordingSink {
        fn failing(fail_first: u32) -> Self {
            Self {
                fail_first,
                ..Self::default()
            }
        }

        fn received(&self) -> Vec<Publication> {
            self.received.lock().unwrap().clone()
        }
    }

    impl PublishSink for Arc<RecordingSink> {
        fn name(&self) -> &str {
            "recording"
        }

        async fn publish(&self, publication: &Publication) -> Result<(), PublishError> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            if attempt < self.fail_first {
                return Err(PublishError::Transport("boom".to_owned()));
            }
            self.received.lock().unwrap().push(publication.clone());
            Ok(())
        }
    }

    fn store() -> Arc<TallyStore> {
        Arc::new(TallyStore::init(["Messi", "Suarez"]).unwrap())
    }

    #[tokio::test(start_paused = true)]
    async fn first_tick_waits_one_full_interval() {
        let sink = Arc::new(RecordingSink::default());
        let broadcaster = Broadcaster::new(store(), vec![Arc::clone(&sink)], BroadcastConfig::default());
        let cancel = CancellationToken::new();
        let task = tokio::spawn(broadcaster.run(cancel.clone()));

        tokio::time::sleep(Duration::from_millis(2900)).await;
        assert!(sink.received().is_empty());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(sink.received().len(), 1);

        cancel.cancel();
        let report = task.await.unwrap();
        assert_eq!(report.ticks, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn each_tick_carries_the_current_snapshot() {
        let store = store();
        let sink = Arc::new(RecordingSink::default());
        let broadcaster = Broadcaster::new(
            Arc::clone(&store),
            vec![Arc::clone(&sink)],
            BroadcastConfig::default(),
        );
        let cancel = CancellationToken::new();
        let task = tokio::spawn(broadcaster.run(cancel.clone()));

        store.increment("Messi");
        tokio::time::sleep(Duration::from_millis(3100)).await;
        store.increment("Suarez");
        store.increment("Messi");
        tokio::time::sleep(Duration::from_secs(3)).await;

        cancel.cancel();
        let report = task.await.unwrap();
        assert_eq!(report.ticks, 2);
        assert_eq!(report.delivered, 2);

        let received = sink.received();
        assert_eq!(received.len(), 2);
        assert_eq!(received[0].channel, DEFAULT_CHANNEL);
        assert_eq!(received[0].event, DEFAULT_EVENT);
        assert_eq!(received[0].sequence, 1);
        assert_eq!(received[0].payload, r#"{"Messi":1,"Suarez":0}"#);
        assert_eq!(received[1].sequence, 2);
        assert_eq!(received[1].payload, r#"{"Messi":2,"Suarez":1}"#);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_publish_is_retried_once() {
        let sink = Arc::new(RecordingSink::failing(1));
        let mut broadcaster = Broadcaster::new(store(), vec![Arc::clone(&sink)], BroadcastConfig::default());

        assert_eq!(broadcaster.tick().await, 1);
        assert_eq!(sink.attempts.load(Ordering::SeqCst), 2);
        assert_eq!(broadcaster.report().delivered, 1);
        assert_eq!(broadcaster.report().failed, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_failure_skips_tick_and_keeps_other_sinks() {
        let broken = Arc::new(RecordingSink::failing(u32::MAX));
        let healthy = Arc::new(RecordingSink::default());
        let mut broadcaster = Broadcaster::new(
            store(),
            vec![Arc::clone(&broken), Arc::clone(&healthy)],
            BroadcastConfig::default(),
        );

        assert_eq!(broadcaster.tick().await, 1);
        assert_eq!(broadcaster.tick().await, 1);

        assert_eq!(broken.attempts.load(Ordering::SeqCst), 4);
        assert_eq!(healthy.received().len(), 2);
        let report = broadcaster.report();
        assert_eq!(report.ticks, 2);
        assert_eq!(report.delivered, 2);
        assert_eq!(report.failed, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_before_first_tick_publishes_nothing() {
        let sink = Arc::new(RecordingSink::default());
        let broadcaster = Broadcaster::new(store(), vec![Arc::clone(&sink)], BroadcastConfig::default());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = broadcaster.run(cancel).await;
        assert_eq!(report, BroadcastReport::default());
        assert!(sink.received().is_empty());
    }

    #[test]
    fn zero_interval_is_clamped() {
        let config = BroadcastConfig {
            interval: Duration::ZERO,
            ..BroadcastConfig::default()
        };
        let broadcaster: Broadcaster<Arc<RecordingSink>> = Broadcaster::new(store(), Vec::new(), config);
        assert_eq!(broadcaster.config().interval, MIN_INTERVAL);
    }
}
