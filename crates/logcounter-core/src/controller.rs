// Reconnect loop around the firehose subscription.
//
// The controller cycles Disconnected -> Authenticating -> Connected until the
// shutdown token fires. While connected it races the session's terminal error
// against shutdown: an error sends it back around the loop to re-authenticate,
// shutdown moves it to Terminating. Every reader and per-envelope task is
// spawned on one TaskTracker, and `run` only returns after that tracker has
// drained, so the tally can be read without racing late inserts.
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::classifier::{Accepted, Classification, EnvelopeClassifier, Rejection};
use crate::envelope::Envelope;
use crate::session::SessionParts;
use crate::tally::TallySink;
use crate::{CounterError, FirehoseTransport, TokenProvider};

const DEFAULT_BACKOFF_INITIAL: Duration = Duration::from_millis(100);
const DEFAULT_BACKOFF_MAX: Duration = Duration::from_secs(5);
const DEFAULT_PROGRESS_EVERY: u64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Authenticating,
    Connected,
    Terminating,
}

/// Delay schedule applied after failed token fetches and subscribes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: DEFAULT_BACKOFF_INITIAL,
            max: DEFAULT_BACKOFF_MAX,
        }
    }
}

#[derive(Debug)]
struct Backoff {
    policy: BackoffPolicy,
    current: Duration,
}

impl Backoff {
    fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            current: policy.initial,
        }
    }

    fn next_delay(&mut self) -> Duration {
        let delay = self.current.min(self.policy.max);
        self.current = self.current.saturating_mul(2).min(self.policy.max);
        delay
    }

    fn reset(&mut self) {
        self.current = self.policy.initial;
    }
}

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Stable consumer id reused on every reconnect.
    pub subscription_id: String,
    pub auth_backoff: BackoffPolicy,
    /// Log a progress line every this many envelopes; 0 disables it.
    pub progress_every: u64,
}

impl ControllerConfig {
    pub fn new(subscription_id: impl Into<String>) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            auth_backoff: BackoffPolicy::default(),
            progress_every: DEFAULT_PROGRESS_EVERY,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Subscriptions successfully opened, including reconnects.
    pub connections: u64,
    pub envelopes_received: u64,
}

// Shared by the reader tasks of every connection.
struct Ingest {
    classifier: EnvelopeClassifier,
    sink: Arc<dyn TallySink>,
    tracker: TaskTracker,
    received: AtomicU64,
    progress_every: u64,
}

impl Ingest {
    fn dispatch(self: &Arc<Self>, envelope: Envelope) {
        let total = self.received.fetch_add(1, Ordering::Relaxed) + 1;
        metrics::counter!("logcounter_envelopes_received_total").increment(1);
        if self.progress_every > 0 && total % self.progress_every == 0 {
            tracing::info!(received = total, "firehose progress");
        }
        let ingest = Arc::clone(self);
        self.tracker.spawn(async move { ingest.process(envelope).await });
    }

    async fn process(&self, envelope: Envelope) {
        match self.classifier.classify(&envelope) {
            Classification::Accepted(Accepted { identity, token }) => {
                if self.sink.record(identity, token).await {
                    metrics::counter!("logcounter_tokens_recorded_total").increment(1);
                } else {
                    metrics::counter!("logcounter_tokens_duplicate_total").increment(1);
                }
            }
            Classification::Rejected(Rejection::NotLogMessage) => {}
            Classification::Rejected(rejection) => {
                metrics::counter!(
                    "logcounter_envelopes_rejected_total",
                    "reason" => rejection.reason()
                )
                .increment(1);
                let body = envelope
                    .log_message
                    .as_ref()
                    .map(|log| String::from_utf8_lossy(&log.message))
                    .unwrap_or_default();
                if rejection.is_unparseable() {
                    tracing::warn!(
                        reason = rejection.reason(),
                        body = %body,
                        "cannot parse test message"
                    );
                } else {
                    tracing::info!(
                        body = %body,
                        prefix = %self.classifier.prefix(),
                        "log message did not match prefix"
                    );
                }
            }
        }
    }
}

async fn read_envelopes(
    ingest: Arc<Ingest>,
    mut envelopes: mpsc::Receiver<Envelope>,
    closed: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            biased;
            next = envelopes.recv() => next,
            _ = closed.cancelled() => {
                // Whatever was already buffered arrived before the close.
                envelopes.close();
                while let Some(envelope) = envelopes.recv().await {
                    ingest.dispatch(envelope);
                }
                break;
            }
        };
        match next {
            Some(envelope) => ingest.dispatch(envelope),
            None => break,
        }
    }
    tracing::debug!("firehose reader stopped");
}

pub struct ReconnectController {
    transport: Arc<dyn FirehoseTransport>,
    tokens: Arc<dyn TokenProvider>,
    ingest: Arc<Ingest>,
    config: ControllerConfig,
    state: watch::Sender<ConnectionState>,
    connections: u64,
}

impl ReconnectController {
    pub fn new(
        transport: Arc<dyn FirehoseTransport>,
        tokens: Arc<dyn TokenProvider>,
        classifier: EnvelopeClassifier,
        sink: Arc<dyn TallySink>,
        config: ControllerConfig,
    ) -> Self {
        let ingest = Arc::new(Ingest {
            classifier,
            sink,
            tracker: TaskTracker::new(),
            received: AtomicU64::new(0),
            progress_every: config.progress_every,
        });
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            transport,
            tokens,
            ingest,
            config,
            state,
            connections: 0,
        }
    }

    /// Observes state transitions; the last value seen is always Terminating.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Runs until `shutdown` fires, then closes the live subscription and
    /// waits for every outstanding record task before returning.
    pub async fn run(mut self, shutdown: CancellationToken) -> RunSummary {
        let mut backoff = Backoff::new(self.config.auth_backoff);
        let mut token = String::new();
        let mut state = ConnectionState::Disconnected;
        loop {
            // `stream` publishes Connected once the subscription is open.
            if state != ConnectionState::Connected {
                self.state.send_replace(state);
            }
            state = match state {
                ConnectionState::Disconnected if shutdown.is_cancelled() => {
                    ConnectionState::Terminating
                }
                ConnectionState::Disconnected => ConnectionState::Authenticating,
                ConnectionState::Authenticating => {
                    match self.authenticate(&shutdown, &mut backoff).await {
                        Some(fresh) => {
                            token = fresh;
                            ConnectionState::Connected
                        }
                        None => ConnectionState::Disconnected,
                    }
                }
                ConnectionState::Connected => self.stream(&token, &shutdown, &mut backoff).await,
                ConnectionState::Terminating => break,
            };
        }

        let tracker = &self.ingest.tracker;
        tracker.close();
        tracing::info!(in_flight = tracker.len(), "joining outstanding record tasks");
        tracker.wait().await;
        tracing::info!("record tasks joined");

        RunSummary {
            connections: self.connections,
            envelopes_received: self.ingest.received.load(Ordering::Relaxed),
        }
    }

    async fn authenticate(
        &self,
        shutdown: &CancellationToken,
        backoff: &mut Backoff,
    ) -> Option<String> {
        let result = tokio::select! {
            _ = shutdown.cancelled() => return None,
            result = self.tokens.fetch_token() => result,
        };
        let err = match result {
            Ok(token) if !token.is_empty() => {
                backoff.reset();
                tracing::info!("got new oauth token");
                return Some(token);
            }
            Ok(_) => CounterError::EmptyToken,
            Err(err) => err,
        };
        metrics::counter!("logcounter_auth_failures_total").increment(1);
        tracing::warn!(error = %err, "error getting token");
        pause(shutdown, backoff).await;
        None
    }

    async fn stream(
        &mut self,
        token: &str,
        shutdown: &CancellationToken,
        backoff: &mut Backoff,
    ) -> ConnectionState {
        let subscription_id = self.config.subscription_id.as_str();
        let subscribed = tokio::select! {
            _ = shutdown.cancelled() => return ConnectionState::Terminating,
            subscribed = self.transport.subscribe(subscription_id, token) => subscribed,
        };
        let session = match subscribed {
            Ok(session) => session,
            Err(err) => {
                metrics::counter!("logcounter_subscribe_failures_total").increment(1);
                tracing::warn!(error = %err, subscription_id, "firehose subscribe failed");
                pause(shutdown, backoff).await;
                return ConnectionState::Disconnected;
            }
        };
        backoff.reset();
        self.connections += 1;
        self.state.send_replace(ConnectionState::Connected);
        tracing::info!(
            subscription_id,
            connection = self.connections,
            "streaming firehose"
        );

        let SessionParts {
            envelopes,
            mut errors,
            closed,
            close_on_drop: _close_on_drop,
        } = session.into_parts();
        self.ingest.tracker.spawn(read_envelopes(
            Arc::clone(&self.ingest),
            envelopes,
            closed.clone(),
        ));

        let next = tokio::select! {
            dropped = &mut errors => {
                let err = dropped.unwrap_or(CounterError::StreamClosed);
                metrics::counter!("logcounter_reconnects_total").increment(1);
                tracing::warn!(error = %err, subscription_id, "firehose stream dropped, reconnecting");
                ConnectionState::Disconnected
            }
            _ = shutdown.cancelled() => {
                tracing::info!(subscription_id, "termination requested, closing firehose");
                ConnectionState::Terminating
            }
        };
        closed.cancel();
        next
    }
}

async fn pause(shutdown: &CancellationToken, backoff: &mut Backoff) {
    let delay = backoff.next_delay();
    if delay.is_zero() {
        return;
    }
    tokio::select! {
        _ = shutdown.cancelled() => {}
        _ = tokio::time::sleep(delay) => {}
    }
}
