//! The stream consumer task.
//!
//! [`StreamConsumer`] owns an [`EventSource`] and a shared handle to the
//! [`TallyStore`]. Startup calls [`establish`](StreamConsumer::establish)
//! (failure is fatal to the process), then the consumer is moved onto its
//! own task with [`run`](StreamConsumer::run), which returns when the
//! cancellation token fires or the stream is lost for good.
//!
//! # Failure policy
//!
//! - Transient errors (disconnects, stalls, rate limits) move the state
//!   back to `Connecting` and retry with [`ReconnectPolicy`] backoff.
//! - Rejections and an exhausted retry budget move the state to `Stopped`
//!   and end the task with an error. Sibling tasks keep serving the last
//!   known tally.

use std::sync::Arc;

use tally_core::{TallyStore, TrackedOptions};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::StreamError;
use crate::policy::ReconnectPolicy;
use crate::source::EventSource;
use crate::state::StreamState;

/// Counters describing a consumer run, returned when it stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerReport {
    /// Text events received.
    pub events: u64,
    /// Increments applied (an event may match several options).
    pub matches: u64,
    /// Successful reconnects after transient failures.
    pub reconnects: u32,
}

/// Outcome of a reconnect sequence that did not fail.
enum Reconnect {
    /// Connected on zero-based attempt `attempt`.
    Resumed { attempt: u32 },
    Cancelled,
}

/// Options contained in `text`, in configuration order.
///
/// Matching is a case-sensitive substring test, so `"Messi and Suarez"`
/// yields both options.
pub fn mentions<'a>(text: &'a str, options: &'a TrackedOptions) -> impl Iterator<Item = &'a str> {
    options.iter().filter(move |option| text.contains(option))
}

/// Consumes text events and drives tally increments.
pub struct StreamConsumer<S> {
    source: S,
    store: Arc<TallyStore>,
    policy: ReconnectPolicy,
    state: watch::Sender<StreamState>,
    report: ConsumerReport,
}

impl<S: EventSource> StreamConsumer<S> {
    /// Create a consumer in the `Disconnected` state.
    pub fn new(source: S, store: Arc<TallyStore>, policy: ReconnectPolicy) -> Self {
        let (state, _) = watch::channel(StreamState::Disconnected);
        Self {
            source,
            store,
            policy,
            state,
            report: ConsumerReport::default(),
        }
    }

    /// Subscribe to state transitions.
    pub fn state_receiver(&self) -> watch::Receiver<StreamState> {
        self.state.subscribe()
    }

    /// Current state.
    pub fn state(&self) -> StreamState {
        *self.state.borrow()
    }

    /// Open the stream for the first time (`Connecting -> Streaming`).
    ///
    /// # Errors
    ///
    /// Returns the source's [`StreamError`]; the state is left at
    /// `Stopped`. Callers treat this as fatal at startup.
    pub async fn establish(&mut self) -> Result<(), StreamError> {
        self.set_state(StreamState::Connecting);
        match self.source.connect().await {
            Ok(()) => {
                self.set_state(StreamState::Streaming);
                info!("stream established");
                Ok(())
            }
            Err(e) => {
                self.set_state(StreamState::Stopped);
                Err(e)
            }
        }
    }

    /// Consume events until `cancel` fires or the stream is lost for good.
    ///
    /// On cancellation the source is closed and `Ok` is returned with the
    /// run's counters.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Rejected`] (or another non-transient error)
    /// when the upstream refuses us, and
    /// [`StreamError::RetryBudgetExhausted`] after `max_retries` reconnect
    /// attempts without a single event arriving in between.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<ConsumerReport, StreamError> {
        info!(options = self.store.options().len(), "stream consumer running");

        // reconnect attempts spent since the last event
        let mut spent: u32 = 0;

        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    self.stop("shutdown requested");
                    return Ok(self.report);
                }
                next = self.source.next_text() => next,
            };

            let reason = match next {
                Ok(Some(text)) => {
                    spent = 0;
                    self.ingest(&text);
                    continue;
                }
                Ok(None) => String::from("stream closed by upstream"),
                Err(e) if e.is_transient() => e.to_string(),
                Err(e) => {
                    error!(error = %e, "stream failed with unrecoverable error");
                    self.stop("unrecoverable stream error");
                    return Err(e);
                }
            };

            match self.reconnect(&cancel, reason, spent).await {
                Ok(Reconnect::Resumed { attempt }) => spent = attempt.saturating_add(1),
                Ok(Reconnect::Cancelled) => {
                    self.stop("shutdown requested during reconnect");
                    return Ok(self.report);
                }
                Err(e) => {
                    error!(error = %e, "stream consumer giving up");
                    self.stop("reconnect failed");
                    return Err(e);
                }
            }
        }
    }

    /// Apply one text event to the tally. Returns the number of options
    /// incremented.
    pub fn ingest(&mut self, text: &str) -> u64 {
        let mut matched = 0_u64;
        for option in mentions(text, self.store.options()) {
            if self.store.increment(option) {
                matched = matched.saturating_add(1);
            }
        }

        self.report.events = self.report.events.saturating_add(1);
        self.report.matches = self.report.matches.saturating_add(matched);
        debug!(matched, "event ingested");
        matched
    }

    /// Counters so far.
    pub const fn report(&self) -> ConsumerReport {
        self.report
    }

    /// Reconnect starting at zero-based attempt `first`, so a connection
    /// that drops before delivering anything keeps consuming the budget.
    async fn reconnect(
        &mut self,
        cancel: &CancellationToken,
        reason: String,
        first: u32,
    ) -> Result<Reconnect, StreamError> {
        self.source.close();
        self.set_state(StreamState::Connecting);
        warn!(
            reason = %reason,
            first_attempt = first.saturating_add(1),
            "stream disconnected, reconnecting"
        );

        let mut last_error = reason;
        for attempt in first..self.policy.max_retries {
            let delay = self.policy.delay(attempt);
            info!(
                attempt = attempt.saturating_add(1),
                max_retries = self.policy.max_retries,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "waiting before reconnect"
            );

            tokio::select! {
                biased;
                () = cancel.cancelled() => return Ok(Reconnect::Cancelled),
                () = tokio::time::sleep(delay) => {}
            }

            let connected = tokio::select! {
                biased;
                () = cancel.cancelled() => return Ok(Reconnect::Cancelled),
                connected = self.source.connect() => connected,
            };

            match connected {
                Ok(()) => {
                    self.report.reconnects = self.report.reconnects.saturating_add(1);
                    self.set_state(StreamState::Streaming);
                    info!(attempt = attempt.saturating_add(1), "stream re-established");
                    return Ok(Reconnect::Resumed { attempt });
                }
                Err(e) if e.is_transient() => {
                    warn!(error = %e, "reconnect attempt failed");
                    last_error = e.to_string();
                }
                Err(e) => return Err(e),
            }
        }

        Err(StreamError::RetryBudgetExhausted {
            attempts: self.policy.max_retries,
            last_error,
        })
    }

    fn stop(&mut self, reason: &str) {
        self.source.close();
        self.set_state(StreamState::Stopped);
        info!(
            reason,
            events = self.report.events,
            matches = self.report.matches,
            reconnects = self.report.reconnects,
            "stream consumer stopped"
        );
    }

    fn set_state(&self, next: StreamState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!(from = %previous, to = %next, "stream state changed");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use tokio::time::Instant;

    use super::*;

    /// One scripted step returned from `next_text`.
    enum Step {
        Text(&'static str),
        End,
        Fail(StreamError),
        Hang,
    }

    /// Source that replays scripted connect results and reads.
    struct ScriptedSource {
        connects: VecDeque<Result<(), StreamError>>,
        reads: VecDeque<Step>,
        closed: Arc<AtomicUsize>,
    }

    impl ScriptedSource {
        fn new(connects: Vec<Result<(), StreamError>>, reads: Vec<Step>) -> Self {
            Self {
                connects: connects.into(),
                reads: reads.into(),
                closed: Arc::new(AtomicUsize::new(0)),
            }
        }

        /// Shared count of `close` calls, readable after the source moves.
        fn closed(&self) -> Arc<AtomicUsize> {
            Arc::clone(&self.closed)
        }
    }

    impl EventSource for ScriptedSource {
        async fn connect(&mut self) -> Result<(), StreamError> {
            self.connects.pop_front().unwrap_or(Ok(()))
        }

        async fn next_text(&mut self) -> Result<Option<String>, StreamError> {
            match self.reads.pop_front() {
                Some(Step::Text(t)) => Ok(Some(t.to_owned())),
                Some(Step::End) => Ok(None),
                Some(Step::Fail(e)) => Err(e),
                Some(Step::Hang) | None => std::future::pending().await,
            }
        }

        fn close(&mut self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn store() -> Arc<TallyStore> {
        Arc::new(TallyStore::init(["Messi", "Suarez"]).unwrap())
    }

    fn fast_policy(max_retries: u32) -> ReconnectPolicy {
        ReconnectPolicy {
            max_retries,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(100),
        }
    }

    #[test]
    fn mentions_is_case_sensitive_substring_match() {
        let options = TrackedOptions::new(["Messi", "Suarez"]).unwrap();
        assert_eq!(
            mentions("Suarez and Messi both", &options).collect::<Vec<_>>(),
            ["Messi", "Suarez"]
        );
        assert_eq!(mentions("messi", &options).count(), 0);
        assert_eq!(mentions("#MessiGoat", &options).collect::<Vec<_>>(), ["Messi"]);
    }

    #[tokio::test]
    async fn establish_moves_to_streaming() {
        let source = ScriptedSource::new(vec![Ok(())], vec![]);
        let mut consumer = StreamConsumer::new(source, store(), fast_policy(1));
        assert_eq!(consumer.state(), StreamState::Disconnected);

        consumer.establish().await.unwrap();
        assert_eq!(consumer.state(), StreamState::Streaming);
    }

    #[tokio::test]
    async fn establish_failure_stops_consumer() {
        let source = ScriptedSource::new(
            vec![Err(StreamError::Rejected {
                status: 401,
                body: "Unauthorized".to_owned(),
            })],
            vec![],
        );
        let mut consumer = StreamConsumer::new(source, store(), fast_policy(3));

        let err = consumer.establish().await.unwrap_err();
        assert!(matches!(err, StreamError::Rejected { status: 401, .. }));
        assert_eq!(consumer.state(), StreamState::Stopped);
    }

    #[tokio::test]
    async fn ingest_counts_every_contained_option() {
        let store = store();
        let source = ScriptedSource::new(vec![], vec![]);
        let mut consumer = StreamConsumer::new(source, Arc::clone(&store), fast_policy(1));

        assert_eq!(consumer.ingest("I love Messi"), 1);
        assert_eq!(consumer.ingest("Suarez and Messi both"), 2);
        assert_eq!(consumer.ingest("irrelevant text"), 0);

        assert_eq!(store.count("Messi"), 2);
        assert_eq!(store.count("Suarez"), 1);
        assert_eq!(
            consumer.report(),
            ConsumerReport {
                events: 3,
                matches: 3,
                reconnects: 0
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_and_closes_source() {
        let store = store();
        let source = ScriptedSource::new(vec![Ok(())], vec![Step::Text("Messi"), Step::Hang]);
        let closed = source.closed();
        let mut consumer = StreamConsumer::new(source, Arc::clone(&store), fast_policy(1));
        consumer.establish().await.unwrap();
        let mut state = consumer.state_receiver();

        let cancel = CancellationToken::new();
        let task = tokio::spawn(consumer.run(cancel.clone()));

        tokio::time::sleep(Duration::from_millis(5)).await;
        cancel.cancel();

        let report = task.await.unwrap().unwrap();
        assert_eq!(report.events, 1);
        assert_eq!(store.count("Messi"), 1);
        assert_eq!(*state.borrow_and_update(), StreamState::Stopped);
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_disconnect_reconnects_and_resumes() {
        let store = store();
        let source = ScriptedSource::new(
            vec![
                Ok(()),
                Err(StreamError::Connect("refused".to_owned())),
                Ok(()),
            ],
            vec![
                Step::Text("Messi"),
                Step::Fail(StreamError::Disconnected("reset".to_owned())),
                Step::Text("Suarez"),
                Step::End,
            ],
        );
        let mut consumer = StreamConsumer::new(source, Arc::clone(&store), fast_policy(2));
        consumer.establish().await.unwrap();

        // After the final End the consumer reconnects with the default Ok
        // and then hangs, so cancel once the events are counted.
        let cancel = CancellationToken::new();
        let task = tokio::spawn(consumer.run(cancel.clone()));
        tokio::time::sleep(Duration::from_secs(1)).await;
        cancel.cancel();

        let report = task.await.unwrap().unwrap();
        assert_eq!(store.count("Messi"), 1);
        assert_eq!(store.count("Suarez"), 1);
        assert_eq!(report.reconnects, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retry_budget_stops_with_error() {
        let store = store();
        let source = ScriptedSource::new(
            vec![
                Ok(()),
                Err(StreamError::Connect("refused".to_owned())),
                Err(StreamError::Connect("refused".to_owned())),
                Err(StreamError::Connect("refused".to_owned())),
            ],
            vec![Step::Text("Messi"), Step::End],
        );
        let mut consumer = StreamConsumer::new(source, Arc::clone(&store), fast_policy(3));
        consumer.establish().await.unwrap();
        let state = consumer.state_receiver();

        let err = consumer.run(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, StreamError::RetryBudgetExhausted { attempts: 3, .. }));
        assert_eq!(*state.borrow(), StreamState::Stopped);
        // state observed before the failure is kept
        assert_eq!(store.count("Messi"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rejection_during_reconnect_is_not_retried() {
        let source = ScriptedSource::new(
            vec![
                Ok(()),
                Err(StreamError::Rejected {
                    status: 401,
                    body: String::new(),
                }),
            ],
            vec![Step::End],
        );
        let mut consumer = StreamConsumer::new(source, store(), fast_policy(5));
        consumer.establish().await.unwrap();

        let err = consumer.run(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, StreamError::Rejected { status: 401, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_during_backoff_returns_ok() {
        let source = ScriptedSource::new(vec![Ok(())], vec![Step::End]);
        let policy = ReconnectPolicy {
            max_retries: 3,
            initial_backoff: Duration::from_secs(30),
            max_backoff: Duration::from_secs(60),
        };
        let mut consumer = StreamConsumer::new(source, store(), policy);
        consumer.establish().await.unwrap();
        let state = consumer.state_receiver();

        let cancel = CancellationToken::new();
        let task = tokio::spawn(consumer.run(cancel.clone()));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(*state.borrow(), StreamState::Connecting);

        cancel.cancel();
        let report = task.await.unwrap().unwrap();
        assert_eq!(report.reconnects, 0);
        assert_eq!(*state.borrow(), StreamState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn stream_that_drops_right_after_connect_exhausts_budget() {
        // every connect succeeds, every connection ends before any event
        let source = ScriptedSource::new(
            vec![],
            vec![Step::End, Step::End, Step::End, Step::End, Step::End],
        );
        let mut consumer = StreamConsumer::new(source, store(), fast_policy(3));
        consumer.establish().await.unwrap();
        let state = consumer.state_receiver();

        let started = Instant::now();
        let err = consumer.run(CancellationToken::new()).await.unwrap_err();

        assert!(matches!(err, StreamError::RetryBudgetExhausted { attempts: 3, .. }));
        assert_eq!(*state.borrow(), StreamState::Stopped);
        // 10ms + 20ms + 40ms: the backoff kept growing across the drops
        assert!(started.elapsed() >= Duration::from_millis(70));
    }

    #[tokio::test(start_paused = true)]
    async fn an_event_after_reconnect_restores_the_budget() {
        let store = store();
        let source = ScriptedSource::new(
            vec![],
            vec![
                Step::End,
                Step::End,
                Step::Text("Messi"),
                Step::End,
                Step::End,
                Step::Text("Suarez"),
                Step::Hang,
            ],
        );
        let mut consumer = StreamConsumer::new(source, Arc::clone(&store), fast_policy(2));
        consumer.establish().await.unwrap();

        let cancel = CancellationToken::new();
        let task = tokio::spawn(consumer.run(cancel.clone()));
        tokio::time::sleep(Duration::from_secs(1)).await;
        cancel.cancel();

        let report = task.await.unwrap().unwrap();
        assert_eq!(report.reconnects, 4);
        assert_eq!(store.count("Messi"), 1);
        assert_eq!(store.count("Suarez"), 1);
    }
}
