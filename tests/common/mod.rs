#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing,
    dead_code
)]
//! Shared test utilities for tiergate integration tests.
//!
//! Provides a [`MockConnector`] that hands out scripted [`MockTransport`]s, a
//! [`ServerHandle`] per opened connection for injecting server frames, and
//! helpers for building frame JSON.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use tiergate::protocol::{ChangeKind, Frame};
use tiergate::{ConnectionState, ConnectionStatus, Connector, TierGateError, Transport};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

// ── Connection plans ────────────────────────────────────────────────

/// How the mock server answers a join.
#[derive(Debug, Clone)]
pub enum JoinReply {
    Ok,
    Error(String),
    /// Never answer.
    Silent,
}

/// Script for one connection attempt.
#[derive(Debug, Clone)]
pub struct ConnectionPlan {
    /// `Some(reason)` makes `connect()` fail.
    pub fail_connect: Option<String>,
    pub join: JoinReply,
    pub answer_heartbeats: bool,
}

impl ConnectionPlan {
    pub fn healthy() -> Self {
        Self {
            fail_connect: None,
            join: JoinReply::Ok,
            answer_heartbeats: true,
        }
    }

    pub fn refused() -> Self {
        Self {
            fail_connect: Some("connection refused".into()),
            ..Self::healthy()
        }
    }

    pub fn join(join: JoinReply) -> Self {
        Self {
            join,
            ..Self::healthy()
        }
    }

    pub fn deaf_to_heartbeats() -> Self {
        Self {
            answer_heartbeats: false,
            ..Self::healthy()
        }
    }
}

// ── MockTransport ───────────────────────────────────────────────────

/// Server side of an in-memory connection.
///
/// Joins and heartbeats are answered according to the plan; everything else
/// arrives through the [`ServerHandle`]. Pushing `None` closes the transport
/// from the server side.
pub struct MockTransport {
    inbox: mpsc::UnboundedReceiver<Option<String>>,
    inject: mpsc::UnboundedSender<Option<String>>,
    plan: ConnectionPlan,
    sent: Arc<StdMutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
    close_calls: Arc<AtomicUsize>,
}

fn reply_json(topic: &str, msg_ref: Option<&str>, status: &str, response: serde_json::Value) -> String {
    serde_json::json!({
        "topic": topic,
        "event": "phx_reply",
        "payload": {"status": status, "response": response},
        "ref": msg_ref,
    })
    .to_string()
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, message: String) -> Result<(), TierGateError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TierGateError::TransportClosed);
        }
        let frame = Frame::decode(&message).expect("client sent invalid frame");
        let reply = match frame.event.as_str() {
            "phx_join" => match &self.plan.join {
                JoinReply::Ok => Some(reply_json(
                    &frame.topic,
                    frame.msg_ref.as_deref(),
                    "ok",
                    serde_json::json!({"postgres_changes": []}),
                )),
                JoinReply::Error(reason) => Some(reply_json(
                    &frame.topic,
                    frame.msg_ref.as_deref(),
                    "error",
                    serde_json::json!({"reason": reason}),
                )),
                JoinReply::Silent => None,
            },
            "heartbeat" if self.plan.answer_heartbeats => Some(reply_json(
                &frame.topic,
                frame.msg_ref.as_deref(),
                "ok",
                serde_json::json!({}),
            )),
            _ => None,
        };
        self.sent.lock().unwrap().push(message);
        if let Some(reply) = reply {
            let _ = self.inject.send(Some(reply));
        }
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String, TierGateError>> {
        match self.inbox.recv().await {
            Some(Some(text)) => Some(Ok(text)),
            Some(None) | None => None,
        }
    }

    async fn close(&mut self) -> Result<(), TierGateError> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

/// Test-side view of one opened connection.
#[derive(Clone)]
pub struct ServerHandle {
    inject: mpsc::UnboundedSender<Option<String>>,
    sent: Arc<StdMutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
    close_calls: Arc<AtomicUsize>,
}

impl ServerHandle {
    /// Deliver a raw frame to the client.
    pub fn push(&self, json: String) {
        let _ = self.inject.send(Some(json));
    }

    /// Close the connection from the server side.
    pub fn drop_connection(&self) {
        let _ = self.inject.send(None);
    }

    /// Frames the client sent, decoded.
    pub fn sent_frames(&self) -> Vec<Frame> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|s| Frame::decode(s).unwrap())
            .collect()
    }

    /// Number of client frames with `event`.
    pub fn count_sent(&self, event: &str) -> usize {
        self.sent_frames().iter().filter(|f| f.event == event).count()
    }

    /// Topic of the first join sent on this connection.
    pub fn joined_topic(&self) -> String {
        self.sent_frames()
            .into_iter()
            .find(|f| f.event == "phx_join")
            .map(|f| f.topic)
            .expect("no join sent")
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }
}

// ── MockConnector ───────────────────────────────────────────────────

/// Hands out one [`MockTransport`] per `connect()`, following queued plans
/// (healthy once the queue is empty).
pub struct MockConnector {
    plans: StdMutex<VecDeque<ConnectionPlan>>,
    handles: mpsc::UnboundedSender<ServerHandle>,
    connects: Arc<AtomicUsize>,
    attempt_times: Arc<StdMutex<Vec<Instant>>>,
}

/// Test-side view of a [`MockConnector`].
pub struct ConnectorProbe {
    pub handles: mpsc::UnboundedReceiver<ServerHandle>,
    connects: Arc<AtomicUsize>,
    attempt_times: Arc<StdMutex<Vec<Instant>>>,
}

impl ConnectorProbe {
    /// Number of `connect()` calls so far.
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Virtual time of every `connect()` call.
    pub fn attempt_times(&self) -> Vec<Instant> {
        self.attempt_times.lock().unwrap().clone()
    }

    /// Wait for the next successfully opened connection.
    pub async fn next_connection(&mut self) -> ServerHandle {
        tokio::time::timeout(Duration::from_secs(600), self.handles.recv())
            .await
            .expect("no connection opened")
            .expect("connector dropped")
    }
}

impl MockConnector {
    pub fn new(plans: Vec<ConnectionPlan>) -> (Self, ConnectorProbe) {
        let (handles, handles_rx) = mpsc::unbounded_channel();
        let connects = Arc::new(AtomicUsize::new(0));
        let attempt_times = Arc::new(StdMutex::new(Vec::new()));
        let connector = Self {
            plans: StdMutex::new(VecDeque::from(plans)),
            handles,
            connects: Arc::clone(&connects),
            attempt_times: Arc::clone(&attempt_times),
        };
        let probe = ConnectorProbe {
            handles: handles_rx,
            connects,
            attempt_times,
        };
        (connector, probe)
    }

    pub fn healthy() -> (Self, ConnectorProbe) {
        Self::new(Vec::new())
    }

    /// Queue a plan for a later attempt.
    pub fn push_plan(&self, plan: ConnectionPlan) {
        self.plans.lock().unwrap().push_back(plan);
    }
}

#[async_trait]
impl Connector for MockConnector {
    type Transport = MockTransport;

    async fn connect(&self) -> Result<MockTransport, TierGateError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.attempt_times.lock().unwrap().push(Instant::now());
        let plan = self
            .plans
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(ConnectionPlan::healthy);

        if let Some(reason) = &plan.fail_connect {
            return Err(TierGateError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                reason.clone(),
            )));
        }

        let (inject, inbox) = mpsc::unbounded_channel();
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let close_calls = Arc::new(AtomicUsize::new(0));
        let _ = self.handles.send(ServerHandle {
            inject: inject.clone(),
            sent: Arc::clone(&sent),
            closed: Arc::clone(&closed),
            close_calls: Arc::clone(&close_calls),
        });
        Ok(MockTransport {
            inbox,
            inject,
            plan,
            sent,
            closed,
            close_calls,
        })
    }
}

// ── Invalidation recorder ───────────────────────────────────────────

/// Records every invalidated table.
#[derive(Clone, Default)]
pub struct Invalidations(Arc<StdMutex<Vec<String>>>);

impl Invalidations {
    pub fn sink(&self) -> impl Fn(&str) + Send + Sync + 'static {
        let calls = Arc::clone(&self.0);
        move |table: &str| calls.lock().unwrap().push(table.to_string())
    }

    pub fn tables(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, table: &str) -> usize {
        self.0.lock().unwrap().iter().filter(|t| *t == table).count()
    }
}

// ── State helpers ───────────────────────────────────────────────────

/// Wait (in virtual time) until the watched state reaches `status`.
pub async fn wait_for_status(
    rx: &mut watch::Receiver<ConnectionState>,
    status: ConnectionStatus,
) -> ConnectionState {
    tokio::time::timeout(Duration::from_secs(600), rx.wait_for(|s| s.status == status))
        .await
        .unwrap_or_else(|_| panic!("status {status} not reached"))
        .expect("state sender dropped")
        .clone()
}

/// Let spawned tasks run without moving virtual time far.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(5)).await;
}

// ── JSON helper functions ───────────────────────────────────────────

/// A `postgres_changes` frame for `public.<table>`.
pub fn change_json(topic: &str, table: &str, kind: ChangeKind) -> String {
    change_json_in(topic, "public", table, kind)
}

/// A `postgres_changes` frame for `<schema>.<table>`.
pub fn change_json_in(topic: &str, schema: &str, table: &str, kind: ChangeKind) -> String {
    serde_json::json!({
        "topic": topic,
        "event": "postgres_changes",
        "payload": {
            "ids": [1],
            "data": {
                "schema": schema,
                "table": table,
                "type": kind,
                "commit_timestamp": "2026-01-01T00:00:00Z",
                "record": {"id": 1},
                "old_record": {}
            }
        },
        "ref": null
    })
    .to_string()
}

/// A `phx_error` frame.
pub fn channel_error_json(topic: &str) -> String {
    serde_json::json!({"topic": topic, "event": "phx_error", "payload": {}, "ref": null}).to_string()
}

/// A `phx_close` frame.
pub fn channel_close_json(topic: &str) -> String {
    serde_json::json!({"topic": topic, "event": "phx_close", "payload": {}, "ref": null}).to_string()
}

/// A `system` frame.
pub fn system_json(topic: &str, status: &str, message: &str) -> String {
    serde_json::json!({
        "topic": topic,
        "event": "system",
        "payload": {"status": status, "message": message, "extension": "postgres_changes"},
        "ref": null
    })
    .to_string()
}
