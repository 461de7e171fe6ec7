//! Self-healing realtime table subscription.
//!
//! [`RealtimeManager`] is a handle owning at most one background session task.
//! The session opens a transport through the configured [`Connector`], joins
//! one channel listening to every configured table, forwards row changes to a
//! throttled [`CacheInvalidator`], and reconnects with capped exponential
//! backoff when the channel fails. State is published on a
//! [`tokio::sync::watch`] channel so a UI can render it and offer a manual
//! reconnect once the manager gives up.
//!
//! # Example
//!
//! ```rust,ignore
//! let config = RealtimeConfig::new("dashboard")
//!     .with_tables(["newsletters", "telegram_messages"]);
//! let manager = RealtimeManager::new(connector, config, |table: &str| {
//!     query_cache.invalidate(table);
//! });
//! manager.connect().await?;
//!
//! let mut state = manager.subscribe_state();
//! while state.changed().await.is_ok() {
//!     if state.borrow().is_terminal() {
//!         show_reconnect_button();
//!     }
//! }
//! ```

use std::collections::HashSet;
use std::sync::Arc;
use std::time::SystemTime;

use tokio::sync::{oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::RealtimeConfig;
use crate::error::Result;
use crate::protocol::{
    channel_topic, ChangeEvent, Frame, Incoming, JoinPayload, RefCounter, ReplyStatus,
    PHOENIX_TOPIC,
};
use crate::state::{ConnectionState, ConnectionStatus, NextStep, SubscribeStatus};
use crate::throttle::InvalidationThrottle;
use crate::transport::{Connector, Transport};
use crate::TierGateError;

/// Receives "this table changed" notifications, already throttled per table.
///
/// Implemented for every `Fn(&str) + Send + Sync` closure.
pub trait CacheInvalidator: Send + Sync + 'static {
    /// Drop or refetch whatever local data was derived from `table`.
    fn invalidate(&self, table: &str);
}

impl<F> CacheInvalidator for F
where
    F: Fn(&str) + Send + Sync + 'static,
{
    fn invalidate(&self, table: &str) {
        self(table)
    }
}

// ── Manager handle ──────────────────────────────────────────────────

/// A running session task plus its shutdown signal.
struct Session {
    task: JoinHandle<()>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

/// Maintains one multiplexed realtime channel for a set of tables.
///
/// Each manager gets a random instance id that is part of its channel topic,
/// so two managers configured with the same tables still open two channels.
pub struct RealtimeManager<C: Connector> {
    id: Uuid,
    topic: String,
    connector: Arc<C>,
    config: Arc<RealtimeConfig>,
    invalidator: Arc<dyn CacheInvalidator>,
    state: Arc<watch::Sender<ConnectionState>>,
    session: Mutex<Option<Session>>,
}

impl<C: Connector> RealtimeManager<C> {
    /// Create a disconnected manager. Nothing is opened until [`connect`](Self::connect).
    pub fn new(connector: C, config: RealtimeConfig, invalidator: impl CacheInvalidator) -> Self {
        let id = Uuid::new_v4();
        let topic = channel_topic(&format!("{}-{id}", config.channel_name));
        let (state, _) = watch::channel(ConnectionState::default());
        Self {
            id,
            topic,
            connector: Arc::new(connector),
            config: Arc::new(config),
            invalidator: Arc::new(invalidator),
            state: Arc::new(state),
            session: Mutex::new(None),
        }
    }

    /// Open the channel.
    ///
    /// Returns immediately after the session task is spawned; progress is
    /// visible through [`state`](Self::state). A disabled configuration makes
    /// this a no-op.
    ///
    /// # Errors
    ///
    /// - [`TierGateError::AlreadyActive`] unless the manager is `disconnected`
    ///   (a manager in terminal `error` needs [`reconnect`](Self::reconnect)).
    /// - [`TierGateError::InvalidConfig`] if no table is configured.
    pub async fn connect(&self) -> Result<()> {
        if !self.config.enabled {
            debug!(topic = %self.topic, "realtime disabled; connect ignored");
            return Ok(());
        }
        self.config.validate()?;
        let mut slot = self.session.lock().await;
        self.start_locked(&mut slot)
    }

    /// Leave the channel, close the transport and cancel any pending reconnect.
    ///
    /// Calling this without an active session does nothing.
    pub async fn disconnect(&self) {
        let mut slot = self.session.lock().await;
        self.teardown_locked(&mut slot).await;
    }

    /// Manual reconnect: tear down, reset the attempt counter, wait the
    /// configured pause and connect again. Works from every state, including
    /// the terminal `error` state.
    ///
    /// # Errors
    ///
    /// Returns [`TierGateError::InvalidConfig`] if no table is configured.
    pub async fn reconnect(&self) -> Result<()> {
        let mut slot = self.session.lock().await;
        info!(topic = %self.topic, "manual reconnect requested");
        self.teardown_locked(&mut slot).await;
        self.state.send_modify(ConnectionState::reset_attempts);
        tokio::time::sleep(self.config.manual_reconnect_delay).await;
        if !self.config.enabled {
            return Ok(());
        }
        self.config.validate()?;
        self.start_locked(&mut slot)
    }

    // ── State accessors ─────────────────────────────────────────────

    /// Snapshot of the current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    /// Current status.
    pub fn status(&self) -> ConnectionStatus {
        self.state.borrow().status
    }

    /// Watch state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Instance id of this manager.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Channel topic joined by this manager.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn config(&self) -> &RealtimeConfig {
        &self.config
    }

    // ── Internal helpers ────────────────────────────────────────────

    fn start_locked(&self, slot: &mut Option<Session>) -> Result<()> {
        let status = self.status();
        if status != ConnectionStatus::Disconnected {
            return Err(TierGateError::AlreadyActive { status });
        }
        // A session that ended on CLOSED is finished but still parked here.
        if let Some(stale) = slot.take() {
            stale.task.abort();
        }

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        self.state.send_modify(ConnectionState::begin_connecting);
        let ctx = SessionContext {
            connector: Arc::clone(&self.connector),
            config: Arc::clone(&self.config),
            topic: self.topic.clone(),
            invalidator: Arc::clone(&self.invalidator),
            state: Arc::clone(&self.state),
        };
        let task = tokio::spawn(session_loop(ctx, shutdown_rx));
        *slot = Some(Session {
            task,
            shutdown_tx: Some(shutdown_tx),
        });
        info!(topic = %self.topic, tables = self.config.tables.len(), "realtime session spawned");
        Ok(())
    }

    async fn teardown_locked(&self, slot: &mut Option<Session>) {
        let Some(mut session) = slot.take() else {
            debug!(topic = %self.topic, "disconnect: no active session");
            return;
        };

        if let Some(tx) = session.shutdown_tx.take() {
            let _ = tx.send(());
        }

        // Give the session time to leave the channel, then abort it so it
        // cannot keep running detached.
        match tokio::time::timeout(self.config.shutdown_timeout, &mut session.task).await {
            Ok(Ok(())) => {}
            Ok(Err(join_err)) => {
                warn!("realtime session terminated with join error: {join_err}");
            }
            Err(_) => {
                warn!("realtime session did not exit within timeout; aborting task");
                session.task.abort();
                if let Err(join_err) = session.task.await {
                    debug!("realtime session aborted: {join_err}");
                }
            }
        }

        self.state.send_modify(ConnectionState::mark_disconnected);
        info!(topic = %self.topic, "realtime session torn down");
    }
}

impl<C: Connector> std::fmt::Debug for RealtimeManager<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeManager")
            .field("id", &self.id)
            .field("topic", &self.topic)
            .field("state", &*self.state.borrow())
            .finish()
    }
}

impl<C: Connector> Drop for RealtimeManager<C> {
    fn drop(&mut self) {
        // No executor is available to drive a graceful leave here.
        if let Some(session) = self.session.get_mut().take() {
            session.task.abort();
        }
    }
}

// ── Session task ────────────────────────────────────────────────────

/// Everything a session task shares with its manager.
struct SessionContext<C: Connector> {
    connector: Arc<C>,
    config: Arc<RealtimeConfig>,
    topic: String,
    invalidator: Arc<dyn CacheInvalidator>,
    state: Arc<watch::Sender<ConnectionState>>,
}

impl<C: Connector> SessionContext<C> {
    fn apply(&self, outcome: SubscribeStatus, reason: Option<String>) -> NextStep {
        let mut step = NextStep::Continue;
        let policy = &self.config.backoff;
        self.state.send_modify(|state| {
            step = state.apply(outcome, reason, policy, SystemTime::now());
        });
        step
    }

    fn begin_connecting(&self) {
        self.state.send_if_modified(|state| {
            let changed = state.status != ConnectionStatus::Connecting;
            state.begin_connecting();
            changed
        });
    }

    fn invalidate_all(&self) {
        let mut seen = HashSet::new();
        for table in &self.config.tables {
            if seen.insert(table.table.as_str()) {
                self.invalidator.invalidate(&table.table);
            }
        }
    }
}

/// Why a single channel run ended.
enum ChannelExit {
    Shutdown,
    Ended {
        outcome: SubscribeStatus,
        reason: Option<String>,
    },
}

impl ChannelExit {
    fn failed(outcome: SubscribeStatus, reason: impl Into<String>) -> Self {
        Self::Ended {
            outcome,
            reason: Some(reason.into()),
        }
    }
}

/// Background loop: run a channel, apply its outcome, back off, repeat.
///
/// Exits on shutdown, on `CLOSED`, or once reconnects are exhausted.
async fn session_loop<C: Connector>(
    ctx: SessionContext<C>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    debug!(topic = %ctx.topic, "realtime session started");

    let mut throttle = InvalidationThrottle::new(ctx.config.invalidation_throttle);
    let mut refs = RefCounter::default();
    let mut recovering = false;

    loop {
        ctx.begin_connecting();
        let exit = run_channel(&ctx, &mut throttle, &mut refs, &mut shutdown_rx, recovering).await;
        let (outcome, reason) = match exit {
            ChannelExit::Shutdown => break,
            ChannelExit::Ended { outcome, reason } => (outcome, reason),
        };

        match ctx.apply(outcome, reason.clone()) {
            NextStep::Retry { delay, attempt } => {
                warn!(
                    topic = %ctx.topic,
                    %outcome,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    reason = reason.as_deref().unwrap_or_default(),
                    "realtime channel failed; reconnect scheduled"
                );
                recovering = true;
                tokio::select! {
                    biased;
                    _ = &mut shutdown_rx => break,
                    () = tokio::time::sleep(delay) => {}
                }
            }
            NextStep::GiveUp => {
                error!(
                    topic = %ctx.topic,
                    %outcome,
                    reason = reason.as_deref().unwrap_or_default(),
                    "realtime channel failed; reconnect attempts exhausted"
                );
                break;
            }
            NextStep::Stop => {
                info!(topic = %ctx.topic, "realtime channel closed by server");
                break;
            }
            NextStep::Continue => {}
        }
    }

    debug!(topic = %ctx.topic, "realtime session exited");
}

/// Connect, join, and pump one channel until it ends.
async fn run_channel<C: Connector>(
    ctx: &SessionContext<C>,
    throttle: &mut InvalidationThrottle,
    refs: &mut RefCounter,
    shutdown_rx: &mut oneshot::Receiver<()>,
    recovering: bool,
) -> ChannelExit {
    let config = &ctx.config;
    let deadline = Instant::now() + config.subscribe_timeout;

    let connected = tokio::select! {
        biased;
        _ = &mut *shutdown_rx => return ChannelExit::Shutdown,
        result = tokio::time::timeout_at(deadline, ctx.connector.connect()) => result,
    };
    let mut transport = match connected {
        Ok(Ok(transport)) => transport,
        Ok(Err(e)) => {
            return ChannelExit::failed(SubscribeStatus::ChannelError, format!("connect failed: {e}"))
        }
        Err(_) => return ChannelExit::failed(SubscribeStatus::TimedOut, "connect timed out"),
    };

    // ── Join ────────────────────────────────────────────────────────
    let join_ref = refs.next_ref();
    let payload = JoinPayload::new(&config.tables, config.access_token.clone());
    let joined = match Frame::join(&ctx.topic, &payload, &join_ref) {
        Ok(frame) => send_frame(&mut transport, &frame).await,
        Err(e) => Err(e),
    };
    if let Err(e) = joined {
        close_quietly(&mut transport).await;
        return ChannelExit::failed(SubscribeStatus::ChannelError, format!("join failed: {e}"));
    }

    let join_deadline = tokio::time::sleep_until(deadline);
    tokio::pin!(join_deadline);
    loop {
        tokio::select! {
            biased;
            _ = &mut *shutdown_rx => {
                leave_and_close(&mut transport, &ctx.topic, refs, &join_ref).await;
                return ChannelExit::Shutdown;
            }
            () = &mut join_deadline => {
                close_quietly(&mut transport).await;
                return ChannelExit::failed(
                    SubscribeStatus::TimedOut,
                    format!("no join reply within {} ms", config.subscribe_timeout.as_millis()),
                );
            }
            incoming = transport.recv() => {
                let text = match incoming {
                    Some(Ok(text)) => text,
                    Some(Err(e)) => {
                        return ChannelExit::failed(
                            SubscribeStatus::ChannelError,
                            format!("transport receive error: {e}"),
                        );
                    }
                    None => {
                        return ChannelExit::failed(
                            SubscribeStatus::ChannelError,
                            "transport closed by server",
                        );
                    }
                };
                match decode_for(&ctx.topic, &text) {
                    Some(Incoming::Reply { msg_ref: Some(r), status, response }) if r == join_ref => {
                        match status {
                            ReplyStatus::Ok => break,
                            ReplyStatus::Error => {
                                close_quietly(&mut transport).await;
                                return ChannelExit::failed(
                                    SubscribeStatus::ChannelError,
                                    format!("join rejected: {response}"),
                                );
                            }
                            ReplyStatus::Timeout => {
                                close_quietly(&mut transport).await;
                                return ChannelExit::failed(
                                    SubscribeStatus::TimedOut,
                                    "server timed out the join",
                                );
                            }
                        }
                    }
                    Some(Incoming::ChannelError) => {
                        close_quietly(&mut transport).await;
                        return ChannelExit::failed(
                            SubscribeStatus::ChannelError,
                            "channel error during join",
                        );
                    }
                    Some(Incoming::ChannelClose) => {
                        close_quietly(&mut transport).await;
                        return ChannelExit::Ended {
                            outcome: SubscribeStatus::Closed,
                            reason: None,
                        };
                    }
                    Some(Incoming::System { ok: false, message }) => {
                        close_quietly(&mut transport).await;
                        return ChannelExit::failed(SubscribeStatus::ChannelError, message);
                    }
                    _ => {}
                }
            }
        }
    }

    ctx.apply(SubscribeStatus::Subscribed, None);
    info!(topic = %ctx.topic, "realtime channel subscribed");
    if recovering && config.invalidate_on_resubscribe {
        debug!(topic = %ctx.topic, "re-subscribed after failure; invalidating all tables");
        ctx.invalidate_all();
    }

    // ── Pump ────────────────────────────────────────────────────────
    let period = config.effective_heartbeat_interval();
    let mut heartbeat = tokio::time::interval_at(Instant::now() + period, period);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut pending_heartbeat: Option<String> = None;

    loop {
        tokio::select! {
            biased;
            _ = &mut *shutdown_rx => {
                leave_and_close(&mut transport, &ctx.topic, refs, &join_ref).await;
                return ChannelExit::Shutdown;
            }
            _ = heartbeat.tick() => {
                if let Some(unanswered) = pending_heartbeat.take() {
                    close_quietly(&mut transport).await;
                    return ChannelExit::failed(
                        SubscribeStatus::TimedOut,
                        format!("heartbeat {unanswered} unanswered"),
                    );
                }
                let heartbeat_ref = refs.next_ref();
                if let Err(e) = send_frame(&mut transport, &Frame::heartbeat(&heartbeat_ref)).await {
                    close_quietly(&mut transport).await;
                    return ChannelExit::failed(
                        SubscribeStatus::ChannelError,
                        format!("heartbeat send failed: {e}"),
                    );
                }
                pending_heartbeat = Some(heartbeat_ref);
            }
            incoming = transport.recv() => {
                let text = match incoming {
                    Some(Ok(text)) => text,
                    Some(Err(e)) => {
                        return ChannelExit::failed(
                            SubscribeStatus::ChannelError,
                            format!("transport receive error: {e}"),
                        );
                    }
                    None => {
                        return ChannelExit::failed(
                            SubscribeStatus::ChannelError,
                            "transport closed by server",
                        );
                    }
                };
                match decode_for(&ctx.topic, &text) {
                    Some(Incoming::Change(change)) => handle_change(ctx, throttle, &change),
                    Some(Incoming::Reply { msg_ref, .. })
                        if msg_ref.is_some() && msg_ref == pending_heartbeat =>
                    {
                        pending_heartbeat = None;
                    }
                    Some(Incoming::ChannelError) => {
                        close_quietly(&mut transport).await;
                        return ChannelExit::failed(
                            SubscribeStatus::ChannelError,
                            "server reported channel error",
                        );
                    }
                    Some(Incoming::ChannelClose) => {
                        close_quietly(&mut transport).await;
                        return ChannelExit::Ended {
                            outcome: SubscribeStatus::Closed,
                            reason: Some("channel closed by server".into()),
                        };
                    }
                    Some(Incoming::System { ok: false, message }) => {
                        close_quietly(&mut transport).await;
                        return ChannelExit::failed(SubscribeStatus::ChannelError, message);
                    }
                    Some(other) => debug!(topic = %ctx.topic, ?other, "ignoring realtime frame"),
                    None => {}
                }
            }
        }
    }
}

/// Forward a change to the invalidator if it belongs to a configured table
/// and the table is outside its throttle window.
fn handle_change<C: Connector>(
    ctx: &SessionContext<C>,
    throttle: &mut InvalidationThrottle,
    change: &ChangeEvent,
) {
    let subscribed = ctx.config.tables.iter().any(|t| {
        t.table == change.table && t.schema == change.schema && t.event.matches(change.kind)
    });
    if !subscribed {
        debug!(table = %change.table, "change for unsubscribed table ignored");
        return;
    }
    if throttle.should_fire(&change.table, Instant::now()) {
        debug!(table = %change.table, kind = ?change.kind, "invalidating cache");
        ctx.invalidator.invalidate(&change.table);
    } else {
        debug!(table = %change.table, "invalidation throttled");
    }
}

/// Decode a frame and keep it only if it belongs to `topic` or the
/// connection-level topic. Malformed frames are logged and dropped.
fn decode_for(topic: &str, text: &str) -> Option<Incoming> {
    let frame = match Frame::decode(text) {
        Ok(frame) => frame,
        Err(e) => {
            // Frames carry row payloads; the raw text stays at debug.
            warn!(len = text.len(), "failed to decode realtime frame: {e}");
            debug!(raw = %text, "undecodable realtime frame");
            return None;
        }
    };
    if frame.topic != topic && frame.topic != PHOENIX_TOPIC {
        debug!(frame_topic = %frame.topic, "frame for another topic ignored");
        return None;
    }
    match frame.classify() {
        Ok(incoming) => Some(incoming),
        Err(e) => {
            warn!("malformed realtime frame: {e}");
            None
        }
    }
}

async fn send_frame<T: Transport>(transport: &mut T, frame: &Frame) -> Result<()> {
    transport.send(frame.encode()?).await
}

async fn leave_and_close<T: Transport>(
    transport: &mut T,
    topic: &str,
    refs: &mut RefCounter,
    join_ref: &str,
) {
    let leave = Frame::leave(topic, &refs.next_ref(), join_ref);
    if let Err(e) = send_frame(transport, &leave).await {
        debug!("failed to send leave frame: {e}");
    }
    close_quietly(transport).await;
}

async fn close_quietly<T: Transport>(transport: &mut T) {
    if let Err(e) = transport.close().await {
        debug!("transport close failed: {e}");
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;
    use tokio::sync::mpsc;

    // ── Mock transport ──────────────────────────────────────────────

    /// Answers joins and heartbeats with `ok`; further frames are injected
    /// through `inject`.
    struct MockTransport {
        inbox: mpsc::UnboundedReceiver<Option<String>>,
        inject: mpsc::UnboundedSender<Option<String>>,
        sent: Arc<StdMutex<Vec<String>>>,
        closed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn send(&mut self, message: String) -> std::result::Result<(), TierGateError> {
            let frame = Frame::decode(&message).unwrap();
            if frame.event == "phx_join" || frame.event == "heartbeat" {
                let reply = serde_json::json!({
                    "topic": frame.topic,
                    "event": "phx_reply",
                    "payload": {"status": "ok", "response": {}},
                    "ref": frame.msg_ref,
                });
                let _ = self.inject.send(Some(reply.to_string()));
            }
            self.sent.lock().unwrap().push(message);
            Ok(())
        }

        async fn recv(&mut self) -> Option<std::result::Result<String, TierGateError>> {
            match self.inbox.recv().await {
                Some(Some(text)) => Some(Ok(text)),
                Some(None) | None => None,
            }
        }

        async fn close(&mut self) -> std::result::Result<(), TierGateError> {
            self.closed.store(true, Ordering::Release);
            Ok(())
        }
    }

    struct Handle {
        inject: mpsc::UnboundedSender<Option<String>>,
        sent: Arc<StdMutex<Vec<String>>>,
        closed: Arc<AtomicBool>,
    }

    struct MockConnector {
        handles: mpsc::UnboundedSender<Handle>,
        connects: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl Connector for MockConnector {
        type Transport = MockTransport;

        async fn connect(&self) -> std::result::Result<MockTransport, TierGateError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(TierGateError::TransportClosed);
            }
            let (inject, inbox) = mpsc::unbounded_channel();
            let sent = Arc::new(StdMutex::new(Vec::new()));
            let closed = Arc::new(AtomicBool::new(false));
            let _ = self.handles.send(Handle {
                inject: inject.clone(),
                sent: Arc::clone(&sent),
                closed: Arc::clone(&closed),
            });
            Ok(MockTransport {
                inbox,
                inject,
                sent,
                closed,
            })
        }
    }

    fn connector(fail: bool) -> (MockConnector, mpsc::UnboundedReceiver<Handle>, Arc<AtomicUsize>) {
        let (handles, rx) = mpsc::unbounded_channel();
        let connects = Arc::new(AtomicUsize::new(0));
        (
            MockConnector {
                handles,
                connects: Arc::clone(&connects),
                fail,
            },
            rx,
            connects,
        )
    }

    fn config() -> RealtimeConfig {
        RealtimeConfig::new("test").with_tables(["newsletters"])
    }

    async fn wait_for(manager: &RealtimeManager<MockConnector>, status: ConnectionStatus) {
        let mut rx = manager.subscribe_state();
        tokio::time::timeout(Duration::from_secs(120), rx.wait_for(|s| s.status == status))
            .await
            .expect("status not reached")
            .unwrap();
    }

    // ── Tests ───────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn connect_subscribes_and_sends_join() {
        let (connector, mut handles, _connects) = connector(false);
        let manager = RealtimeManager::new(connector, config(), |_: &str| {});

        manager.connect().await.unwrap();
        wait_for(&manager, ConnectionStatus::Connected).await;

        let handle = handles.recv().await.unwrap();
        let first = Frame::decode(&handle.sent.lock().unwrap()[0]).unwrap();
        assert_eq!(first.event, "phx_join");
        assert_eq!(first.topic, manager.topic());
        assert!(manager.state().last_connected.is_some());

        manager.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn connect_twice_is_rejected() {
        let (connector, _handles, _connects) = connector(false);
        let manager = RealtimeManager::new(connector, config(), |_: &str| {});

        manager.connect().await.unwrap();
        let err = manager.connect().await.unwrap_err();
        assert!(matches!(err, TierGateError::AlreadyActive { .. }));

        manager.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_config_never_connects() {
        let (connector, _handles, connects) = connector(false);
        let manager =
            RealtimeManager::new(connector, config().with_enabled(false), |_: &str| {});

        manager.connect().await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(connects.load(Ordering::SeqCst), 0);
        assert_eq!(manager.status(), ConnectionStatus::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_without_tables_is_invalid() {
        let (connector, _handles, _connects) = connector(false);
        let manager = RealtimeManager::new(connector, RealtimeConfig::new("t"), |_: &str| {});
        let err = manager.connect().await.unwrap_err();
        assert!(matches!(err, TierGateError::InvalidConfig(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn failing_connector_ends_in_error() {
        let (connector, _handles, connects) = connector(true);
        let manager = RealtimeManager::new(connector, config(), |_: &str| {});

        manager.connect().await.unwrap();
        wait_for(&manager, ConnectionStatus::Error).await;

        // One initial attempt plus three reconnects.
        assert_eq!(connects.load(Ordering::SeqCst), 4);
        assert_eq!(manager.state().reconnect_attempts, 3);
        assert!(manager.state().error.unwrap().contains("connect failed"));
    }

    #[tokio::test(start_paused = true)]
    async fn change_event_invalidates_table() {
        let (connector, mut handles, _connects) = connector(false);
        let calls = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&calls);
        let manager = RealtimeManager::new(connector, config(), move |t: &str| {
            sink.lock().unwrap().push(t.to_string());
        });

        manager.connect().await.unwrap();
        wait_for(&manager, ConnectionStatus::Connected).await;
        let handle = handles.recv().await.unwrap();

        let change = serde_json::json!({
            "topic": manager.topic(),
            "event": "postgres_changes",
            "payload": {"data": {"schema": "public", "table": "newsletters", "type": "INSERT", "record": {}}},
            "ref": null,
        });
        handle.inject.send(Some(change.to_string())).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(*calls.lock().unwrap(), vec!["newsletters".to_string()]);
        manager.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_leaves_and_closes() {
        let (connector, mut handles, _connects) = connector(false);
        let manager = RealtimeManager::new(connector, config(), |_: &str| {});

        manager.connect().await.unwrap();
        wait_for(&manager, ConnectionStatus::Connected).await;
        let handle = handles.recv().await.unwrap();

        manager.disconnect().await;
        assert!(handle.closed.load(Ordering::Acquire));
        let last = Frame::decode(handle.sent.lock().unwrap().last().unwrap()).unwrap();
        assert_eq!(last.event, "phx_leave");
        assert_eq!(manager.status(), ConnectionStatus::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn debug_impl_names_topic() {
        let (connector, _handles, _connects) = connector(false);
        let manager = RealtimeManager::new(connector, config(), |_: &str| {});
        let debug_str = format!("{manager:?}");
        assert!(debug_str.contains("RealtimeManager"));
        assert!(debug_str.contains(manager.topic()));
    }

    #[tokio::test(start_paused = true)]
    async fn topic_contains_instance_id() {
        let (connector, _handles, _connects) = connector(false);
        let manager = RealtimeManager::new(connector, config(), |_: &str| {});
        assert!(manager.topic().starts_with("realtime:test-"));
        assert!(manager.topic().ends_with(&manager.id().to_string()));
    }

    // ── Log hygiene ─────────────────────────────────────────────────

    /// Collects formatted log output.
    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<StdMutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for CapturedLogs {
        type Writer = CapturedLogs;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[test]
    fn undecodable_frame_payload_is_kept_out_of_warn_logs() {
        let logs = CapturedLogs::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(logs.clone())
            .with_max_level(tracing::Level::WARN)
            .with_ansi(false)
            .finish();
        let truncated = r#"{"topic":"realtime:test","event":"postgres_changes","payload":{"data":{"record":{"email":"ann@example.com""#;

        tracing::subscriber::with_default(subscriber, || {
            assert!(decode_for("realtime:test", truncated).is_none());
        });

        let output = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("failed to decode realtime frame"));
        assert!(!output.contains("ann@example.com"), "{output}");
    }
}
