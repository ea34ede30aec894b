//! The realtime fleet client.
//!
//! One background task owns the transport for each connection run. Every
//! transition it makes is checked against an epoch captured when the run was
//! started; `stop` bumps the epoch, so a run that is mid-connect or sleeping
//! before a retry can never move the state machine once it has been stopped.

use crate::config::{ClientConfig, ReconnectPolicy};
use crate::error::TransportError;
use crate::subscription::{Registry, SubscriptionId, Topic};
use crate::transport::{
    Connection, Connector, HttpSnapshotSource, Outgoing, SnapshotSource, WsConnector,
};
use fleetwatch_core::{ConnectionState, FleetEvent, FleetSnapshot, Inbound};
use futures_util::{SinkExt, Stream, StreamExt, stream};
use parking_lot::Mutex;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};

const SIGNAL_CAPACITY: usize = 64;

/// How long a closing connection may take to flush its close frame.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Connection lifecycle notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientSignal {
    /// The state machine moved. `attempt` is the retry counter after the move.
    StateChanged {
        state: ConnectionState,
        attempt: u32,
    },
    /// The transport opened; the client is live.
    Connected,
    /// Retries ran out. The client stays disconnected until started again.
    ConnectionExhausted,
}

/// Keeps a best-effort live event feed from the fleet backend and fetches
/// snapshots that fall back to caller data when the backend is unreachable.
///
/// `start`, `start_health_checks` and `stop` must be called from within a
/// Tokio runtime.
pub struct RealtimeFleetClient<C = WsConnector, S = HttpSnapshotSource> {
    config: ClientConfig,
    connector: Arc<C>,
    source: Arc<S>,
    shared: Arc<Shared>,
}

struct Shared {
    policy: ReconnectPolicy,
    connect_timeout: Duration,
    lifecycle: Mutex<Lifecycle>,
    subscribers: Mutex<Registry>,
    signals: broadcast::Sender<ClientSignal>,
}

struct Lifecycle {
    state: ConnectionState,
    attempts: u32,
    epoch: u64,
    driver: Option<JoinHandle<()>>,
    /// Feeds the open connection; `None` unless the state is `Open`.
    outbound: Option<mpsc::UnboundedSender<Outgoing>>,
    health: Option<JoinHandle<()>>,
}

impl Lifecycle {
    /// End the current run. An open connection is asked to close cleanly and
    /// its driver left to finish; anything else is aborted.
    fn release(&mut self) {
        self.epoch += 1;
        let closing = self
            .outbound
            .take()
            .is_some_and(|tx| tx.send(Outgoing::Close).is_ok());
        if let Some(driver) = self.driver.take() {
            if !closing {
                driver.abort();
            }
        }
        if let Some(health) = self.health.take() {
            health.abort();
        }
    }
}

enum AfterClose {
    Retry(u32),
    Exhausted,
    Stale,
}

impl RealtimeFleetClient {
    /// A client speaking WebSocket for events and HTTP for snapshots.
    pub fn new(config: ClientConfig) -> Self {
        let source = HttpSnapshotSource::with_timeout(config.request_timeout()).unwrap_or_else(|e| {
            tracing::warn!("Using an HTTP client without a request timeout: {}", e);
            HttpSnapshotSource::default()
        });
        Self::with_parts(config, WsConnector, source)
    }
}

impl<C, S> RealtimeFleetClient<C, S> {
    pub fn with_parts(config: ClientConfig, connector: C, source: S) -> Self {
        let (signals, _) = broadcast::channel(SIGNAL_CAPACITY);
        let shared = Shared {
            policy: config.reconnect_policy(),
            connect_timeout: config.connect_timeout(),
            lifecycle: Mutex::new(Lifecycle {
                state: ConnectionState::Disconnected,
                attempts: 0,
                epoch: 0,
                driver: None,
                outbound: None,
                health: None,
            }),
            subscribers: Mutex::new(Registry::default()),
            signals,
        };
        Self {
            config,
            connector: Arc::new(connector),
            source: Arc::new(source),
            shared: Arc::new(shared),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.lifecycle.lock().state
    }

    /// Retries since the transport was last open.
    pub fn attempts(&self) -> u32 {
        self.shared.lifecycle.lock().attempts
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Lifecycle signals from now on.
    pub fn signals(&self) -> broadcast::Receiver<ClientSignal> {
        self.shared.signals.subscribe()
    }

    /// Register `handler` for events on `topic`.
    ///
    /// Handlers run on the client's connection task, one event at a time, in
    /// subscription order. They must not block.
    pub fn subscribe<F>(&self, topic: impl Into<Topic>, handler: F) -> SubscriptionId
    where
        F: Fn(&FleetEvent) + Send + Sync + 'static,
    {
        self.shared
            .subscribers
            .lock()
            .insert(topic.into(), Arc::new(handler))
    }

    /// Remove one handler. Returns `false` if it was already gone.
    ///
    /// Safe to call from inside a handler; an event already being dispatched
    /// still reaches every handler that was subscribed when it arrived.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.shared.subscribers.lock().remove(id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared.subscribers.lock().len()
    }

    /// Queue `message` as JSON on the open connection.
    ///
    /// Returns `false`, and drops the message, when the client is not open.
    /// Nothing is buffered for a later connection.
    pub fn send<T: Serialize + ?Sized>(&self, message: &T) -> bool {
        let text = match serde_json::to_string(message) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!("Cannot encode outbound message: {}", e);
                return false;
            }
        };
        let life = self.shared.lifecycle.lock();
        let queued = life.state == ConnectionState::Open
            && life
                .outbound
                .as_ref()
                .is_some_and(|tx| tx.send(Outgoing::Text(text.clone())).is_ok());
        if !queued {
            tracing::warn!("Fleet connection not open, message not sent: {}", text);
        }
        queued
    }

    /// Close the transport, cancel any pending retry and health checks, and
    /// go `Disconnected`.
    pub fn stop(&self) {
        let mut life = self.shared.lifecycle.lock();
        life.release();
        life.attempts = 0;
        if life.state != ConnectionState::Disconnected {
            tracing::info!("Stopping fleet connection");
            self.shared.transition(&mut life, ConnectionState::Disconnected);
        }
    }
}

impl<C: Connector, S> RealtimeFleetClient<C, S> {
    /// Begin connecting. No-op while already connecting or open.
    pub fn start(&self) {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                tracing::error!("Cannot start fleet connection outside a runtime: {}", e);
                return;
            }
        };

        let mut life = self.shared.lifecycle.lock();
        if !life.state.can_start() {
            tracing::debug!("Fleet connection already {:?}", life.state);
            return;
        }
        if let Some(stale) = life.driver.take() {
            stale.abort();
        }
        if life.state == ConnectionState::Disconnected {
            life.attempts = 0;
        }
        life.epoch += 1;
        let epoch = life.epoch;
        self.shared.transition(&mut life, ConnectionState::Connecting);

        let connector = Arc::clone(&self.connector);
        let shared = Arc::clone(&self.shared);
        let url = self.config.transport_url.clone();
        life.driver = Some(runtime.spawn(drive(connector, shared, url, epoch)));
    }
}

impl<C, S: SnapshotSource> RealtimeFleetClient<C, S> {
    /// Read one snapshot from the backend.
    ///
    /// Makes a single attempt, bounded by the request timeout. On any
    /// transport or decode failure the `fallback` comes back instead, marked
    /// not live.
    pub async fn fetch_snapshot(&self, fallback: FleetSnapshot) -> FleetSnapshot {
        let url = &self.config.snapshot_url;
        match fetch_within(&*self.source, url, self.config.request_timeout()).await {
            Ok(body) => match FleetSnapshot::decode(&body) {
                Ok(snapshot) => {
                    tracing::debug!(
                        "Fetched snapshot with {} agents and {} jobs",
                        snapshot.agents.len(),
                        snapshot.jobs.len()
                    );
                    return snapshot;
                }
                Err(e) => tracing::warn!("Malformed snapshot from {}, using fallback: {}", url, e),
            },
            Err(e) => tracing::warn!("Snapshot fetch from {} failed, using fallback: {}", url, e),
        }
        fallback.into_fallback()
    }

    /// Fetch a snapshot every `period`, starting immediately.
    ///
    /// The most recent live snapshot replaces `fallback` for later ticks, so
    /// an outage yields the last known fleet rather than the initial default.
    /// The timer starts on first poll.
    pub fn poll_snapshots(
        &self,
        period: Duration,
        fallback: FleetSnapshot,
    ) -> impl Stream<Item = FleetSnapshot> + '_ {
        let period = period.max(Duration::from_millis(1));
        let start: (Option<Interval>, FleetSnapshot) = (None, fallback);
        stream::unfold(start, move |(ticker, fallback)| async move {
            let mut ticker = ticker.unwrap_or_else(|| ticker_every(period));
            ticker.tick().await;
            let snapshot = self.fetch_snapshot(fallback.clone()).await;
            let next = if snapshot.is_live {
                snapshot.clone()
            } else {
                fallback
            };
            Some((snapshot, (Some(ticker), next)))
        })
    }

    /// Hit the health endpoint once. Failures are logged, never raised.
    pub async fn check_health(&self) -> bool {
        run_health_check(&*self.source, &self.config.health_url, self.config.request_timeout()).await
    }

    /// Hit the health endpoint in the background every
    /// `health_interval_ms` until `stop`.
    ///
    /// Returns `false` when health checks are disabled or no runtime is
    /// available. Calling it again while checks are running is a no-op.
    pub fn start_health_checks(&self) -> bool {
        let Some(period) = self.config.health_interval() else {
            tracing::debug!("Health checks disabled");
            return false;
        };
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                tracing::error!("Cannot start health checks outside a runtime: {}", e);
                return false;
            }
        };

        let mut life = self.shared.lifecycle.lock();
        if life.health.is_some() {
            return true;
        }
        let source = Arc::clone(&self.source);
        let url = self.config.health_url.clone();
        let limit = self.config.request_timeout();
        tracing::info!("Checking {} every {:?}", url, period);
        life.health = Some(runtime.spawn(async move {
            let mut ticker = ticker_every(period);
            loop {
                ticker.tick().await;
                run_health_check(&*source, &url, limit).await;
            }
        }));
        true
    }
}

impl<C, S> Drop for RealtimeFleetClient<C, S> {
    fn drop(&mut self) {
        self.shared.lifecycle.lock().release();
    }
}

impl Shared {
    fn transition(&self, life: &mut Lifecycle, state: ConnectionState) {
        life.state = state;
        // No receivers is fine.
        let _ = self.signals.send(ClientSignal::StateChanged {
            state,
            attempt: life.attempts,
        });
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.lifecycle.lock().epoch == epoch
    }

    fn opened(&self, epoch: u64, outbound: mpsc::UnboundedSender<Outgoing>) -> bool {
        let mut life = self.lifecycle.lock();
        if life.epoch != epoch {
            return false;
        }
        life.attempts = 0;
        life.outbound = Some(outbound);
        self.transition(&mut life, ConnectionState::Open);
        let _ = self.signals.send(ClientSignal::Connected);
        true
    }

    fn closed(&self, epoch: u64) -> AfterClose {
        let mut life = self.lifecycle.lock();
        if life.epoch != epoch {
            return AfterClose::Stale;
        }
        life.outbound = None;
        if self.policy.allows_retry(life.attempts) {
            life.attempts += 1;
            let attempt = life.attempts;
            self.transition(&mut life, ConnectionState::Closed);
            AfterClose::Retry(attempt)
        } else {
            // This is the driver finishing; detach rather than abort itself.
            life.driver = None;
            self.transition(&mut life, ConnectionState::Disconnected);
            let _ = self.signals.send(ClientSignal::ConnectionExhausted);
            AfterClose::Exhausted
        }
    }

    fn reconnecting(&self, epoch: u64) -> bool {
        let mut life = self.lifecycle.lock();
        if life.epoch != epoch {
            return false;
        }
        self.transition(&mut life, ConnectionState::Connecting);
        true
    }

    fn dispatch_frame(&self, text: &str) {
        match Inbound::decode(text) {
            Ok(Inbound::Event(event)) => self.dispatch(&event),
            Ok(Inbound::Ignored(tag)) => tracing::warn!("Ignoring unknown message type '{}'", tag),
            Err(e) => tracing::warn!("Dropping malformed message: {}", e),
        }
    }

    fn dispatch(&self, event: &FleetEvent) {
        let handlers = self.subscribers.lock().matching(event.kind());
        tracing::debug!("Dispatching {} to {} handlers", event.kind(), handlers.len());
        for handler in handlers {
            if std::panic::catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                tracing::error!("Handler panicked while handling {}", event.kind());
            }
        }
    }
}

fn ticker_every(period: Duration) -> Interval {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

async fn fetch_within<S: SnapshotSource>(
    source: &S,
    url: &str,
    limit: Duration,
) -> Result<String, TransportError> {
    match tokio::time::timeout(limit, source.fetch(url)).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::Timeout(limit)),
    }
}

async fn run_health_check<S: SnapshotSource>(source: &S, url: &str, limit: Duration) -> bool {
    match fetch_within(source, url, limit).await {
        Ok(_) => {
            tracing::debug!("Health check of {} passed", url);
            true
        }
        Err(e) => {
            tracing::warn!("Health check of {} failed: {}", url, e);
            false
        }
    }
}

async fn drive<C: Connector>(connector: Arc<C>, shared: Arc<Shared>, url: String, epoch: u64) {
    loop {
        let limit = shared.connect_timeout;
        let opening = match tokio::time::timeout(limit, connector.connect(&url)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(limit)),
        };
        match opening {
            Ok(connection) => {
                let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
                if !shared.opened(epoch, outbound_tx) {
                    return;
                }
                tracing::info!("Connected to {}", url);
                pump(&shared, connection, outbound_rx, epoch).await;
            }
            Err(e) => tracing::warn!("Failed to connect to {}: {}", url, e),
        }

        match shared.closed(epoch) {
            AfterClose::Retry(attempt) => {
                tracing::info!(
                    "Reconnecting to {} in {:?} (attempt {}/{})",
                    url,
                    shared.policy.delay(),
                    attempt,
                    shared.policy.max_attempts()
                );
                tokio::time::sleep(shared.policy.delay()).await;
                if !shared.reconnecting(epoch) {
                    return;
                }
            }
            AfterClose::Exhausted => {
                tracing::warn!(
                    "Giving up on {} after {} reconnect attempts",
                    url,
                    shared.policy.max_attempts()
                );
                return;
            }
            AfterClose::Stale => return,
        }
    }
}

/// Dispatch frames and write outbound messages until the connection ends or
/// the run is stopped.
async fn pump(
    shared: &Shared,
    connection: Connection,
    mut outbound: mpsc::UnboundedReceiver<Outgoing>,
    epoch: u64,
) {
    let Connection {
        mut frames,
        mut sink,
    } = connection;

    loop {
        tokio::select! {
            biased;

            out = outbound.recv() => match out {
                Some(Outgoing::Text(text)) => {
                    if let Err(e) = sink.send(Outgoing::Text(text)).await {
                        tracing::warn!("Fleet connection broke while sending: {}", e);
                        return;
                    }
                }
                Some(Outgoing::Close) | None => {
                    tracing::debug!("Closing fleet connection");
                    match tokio::time::timeout(CLOSE_GRACE, sink.send(Outgoing::Close)).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => tracing::debug!("Close frame not delivered: {}", e),
                        Err(_) => tracing::debug!("Close frame not flushed within {:?}", CLOSE_GRACE),
                    }
                    return;
                }
            },

            frame = frames.next() => match frame {
                Some(Ok(text)) => {
                    if !shared.is_current(epoch) {
                        return;
                    }
                    shared.dispatch_frame(&text);
                }
                Some(Err(e)) => {
                    tracing::warn!("Fleet connection broke: {}", e);
                    return;
                }
                None => {
                    tracing::info!("Fleet connection closed by remote");
                    return;
                }
            },
        }
    }
}
