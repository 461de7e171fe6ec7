//! Wire types for the realtime channel service.
//!
//! The realtime server speaks Phoenix-channel JSON frames:
//!
//! ```json
//! {"topic":"realtime:dashboard","event":"phx_join","payload":{...},"ref":"1","join_ref":"1"}
//! ```
//!
//! One channel (topic) multiplexes a `postgres_changes` listener per table.
//! Server replies are correlated to client frames through `ref`.

use serde::{Deserialize, Serialize};

use crate::error::{Result, TierGateError};

/// Topic used for connection-level heartbeats.
pub const PHOENIX_TOPIC: &str = "phoenix";

/// Event names used on the wire.
pub mod events {
    pub const JOIN: &str = "phx_join";
    pub const LEAVE: &str = "phx_leave";
    pub const REPLY: &str = "phx_reply";
    pub const ERROR: &str = "phx_error";
    pub const CLOSE: &str = "phx_close";
    pub const HEARTBEAT: &str = "heartbeat";
    pub const POSTGRES_CHANGES: &str = "postgres_changes";
    pub const SYSTEM: &str = "system";
}

/// Build the channel topic for a channel name.
pub fn channel_topic(name: &str) -> String {
    format!("realtime:{name}")
}

// ── Enums ───────────────────────────────────────────────────────────

/// Which change kinds a table listener receives.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum EventMask {
    #[default]
    #[serde(rename = "*")]
    All,
    #[serde(rename = "INSERT")]
    Insert,
    #[serde(rename = "UPDATE")]
    Update,
    #[serde(rename = "DELETE")]
    Delete,
}

/// The kind of row change carried by a change event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl EventMask {
    /// Returns `true` if a change of `kind` passes this mask.
    pub fn matches(self, kind: ChangeKind) -> bool {
        matches!(
            (self, kind),
            (EventMask::All, _)
                | (EventMask::Insert, ChangeKind::Insert)
                | (EventMask::Update, ChangeKind::Update)
                | (EventMask::Delete, ChangeKind::Delete)
        )
    }
}

/// Status carried by a `phx_reply`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReplyStatus {
    Ok,
    Error,
    Timeout,
}

// ── Structs ─────────────────────────────────────────────────────────

/// One table listener inside a channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct TableSubscription {
    #[serde(default)]
    pub event: EventMask,
    #[serde(default = "default_schema")]
    pub schema: String,
    pub table: String,
}

fn default_schema() -> String {
    "public".to_string()
}

impl TableSubscription {
    /// Listen to every change kind on `public.<table>`.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            event: EventMask::All,
            schema: default_schema(),
            table: table.into(),
        }
    }

    /// Restrict the listener to one change kind.
    #[must_use]
    pub fn with_event(mut self, event: EventMask) -> Self {
        self.event = event;
        self
    }

    /// Listen on a schema other than `public`.
    #[must_use]
    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = schema.into();
        self
    }
}

/// Broadcast options sent in a join; the manager never uses broadcast but the
/// server expects the block.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BroadcastConfig {
    #[serde(rename = "self")]
    pub echo_self: bool,
    pub ack: bool,
}

/// Presence options sent in a join.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PresenceConfig {
    pub key: String,
}

/// The `config` block of a join payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct JoinConfig {
    pub broadcast: BroadcastConfig,
    pub presence: PresenceConfig,
    pub postgres_changes: Vec<TableSubscription>,
}

/// Payload of a `phx_join` frame.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct JoinPayload {
    pub config: JoinConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
}

impl JoinPayload {
    /// Build a join payload listening to every given table.
    pub fn new(tables: &[TableSubscription], access_token: Option<String>) -> Self {
        Self {
            config: JoinConfig {
                postgres_changes: tables.to_vec(),
                ..Default::default()
            },
            access_token,
        }
    }
}

/// A row change pushed by the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChangeEvent {
    pub schema: String,
    pub table: String,
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_timestamp: Option<String>,
    #[serde(default)]
    pub record: serde_json::Value,
    #[serde(default)]
    pub old_record: serde_json::Value,
}

/// Payload of a `postgres_changes` frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PostgresChangesPayload {
    pub data: ChangeEvent,
    #[serde(default)]
    pub ids: Vec<u64>,
}

/// Payload of a `phx_reply` frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReplyPayload {
    pub status: ReplyStatus,
    #[serde(default)]
    pub response: serde_json::Value,
}

/// Payload of a `system` frame (extension readiness notices).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SystemPayload {
    pub status: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension: Option<String>,
}

// ── Frames ──────────────────────────────────────────────────────────

/// A raw Phoenix-channel frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Frame {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(rename = "ref", default)]
    pub msg_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_ref: Option<String>,
}

/// A server frame, classified by what the manager has to do with it.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    /// Reply to a client frame identified by `msg_ref`.
    Reply {
        msg_ref: Option<String>,
        status: ReplyStatus,
        response: serde_json::Value,
    },
    /// A row change on a subscribed table.
    Change(ChangeEvent),
    /// An extension status notice.
    System { ok: bool, message: String },
    /// The channel failed on the server side.
    ChannelError,
    /// The server closed the channel.
    ChannelClose,
    /// Any other event; carries the event name.
    Other(String),
}

impl Frame {
    fn new(topic: impl Into<String>, event: &str, payload: serde_json::Value) -> Self {
        Self {
            topic: topic.into(),
            event: event.to_string(),
            payload,
            msg_ref: None,
            join_ref: None,
        }
    }

    /// A `phx_join` frame for `topic`.
    ///
    /// # Errors
    ///
    /// Returns [`TierGateError::Serialization`] if the payload cannot be encoded.
    pub fn join(topic: &str, payload: &JoinPayload, join_ref: &str) -> Result<Self> {
        let mut frame = Self::new(topic, events::JOIN, serde_json::to_value(payload)?);
        frame.msg_ref = Some(join_ref.to_string());
        frame.join_ref = Some(join_ref.to_string());
        Ok(frame)
    }

    /// A `phx_leave` frame for `topic`.
    pub fn leave(topic: &str, msg_ref: &str, join_ref: &str) -> Self {
        let mut frame = Self::new(topic, events::LEAVE, serde_json::json!({}));
        frame.msg_ref = Some(msg_ref.to_string());
        frame.join_ref = Some(join_ref.to_string());
        frame
    }

    /// A connection heartbeat.
    pub fn heartbeat(msg_ref: &str) -> Self {
        let mut frame = Self::new(PHOENIX_TOPIC, events::HEARTBEAT, serde_json::json!({}));
        frame.msg_ref = Some(msg_ref.to_string());
        frame
    }

    /// Parse a frame from JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`TierGateError::Serialization`] for malformed JSON.
    pub fn decode(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Serialize this frame to JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`TierGateError::Serialization`] if encoding fails.
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Interpret the event and payload of a server frame.
    ///
    /// # Errors
    ///
    /// Returns [`TierGateError::MalformedResponse`] when a known event carries
    /// a payload of the wrong shape.
    pub fn classify(self) -> Result<Incoming> {
        let Frame {
            event,
            payload,
            msg_ref,
            ..
        } = self;
        let malformed =
            |e: serde_json::Error| TierGateError::MalformedResponse(format!("{event} payload: {e}"));
        match event.as_str() {
            events::REPLY => {
                let reply: ReplyPayload = serde_json::from_value(payload).map_err(malformed)?;
                Ok(Incoming::Reply {
                    msg_ref,
                    status: reply.status,
                    response: reply.response,
                })
            }
            events::POSTGRES_CHANGES => {
                let changes: PostgresChangesPayload =
                    serde_json::from_value(payload).map_err(malformed)?;
                Ok(Incoming::Change(changes.data))
            }
            events::SYSTEM => {
                let system: SystemPayload = serde_json::from_value(payload).map_err(malformed)?;
                Ok(Incoming::System {
                    ok: system.status == "ok",
                    message: system.message,
                })
            }
            events::ERROR => Ok(Incoming::ChannelError),
            events::CLOSE => Ok(Incoming::ChannelClose),
            other => Ok(Incoming::Other(other.to_string())),
        }
    }
}

/// Monotonic generator for frame `ref`s.
#[derive(Debug, Default)]
pub struct RefCounter(u64);

impl RefCounter {
    /// Return the next ref, starting at `"1"`.
    pub fn next_ref(&mut self) -> String {
        self.0 = self.0.wrapping_add(1);
        self.0.to_string()
    }
}

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
    use serde_json::json;

    #[test]
    fn join_frame_lists_every_table() {
        let tables = vec![
            TableSubscription::new("newsletters"),
            TableSubscription::new("telegram_messages").with_event(EventMask::Insert),
        ];
        let payload = JoinPayload::new(&tables, Some("jwt".into()));
        let frame = Frame::join("realtime:dash", &payload, "7").unwrap();
        let value: serde_json::Value = serde_json::from_str(&frame.encode().unwrap()).unwrap();

        assert_eq!(value["event"], "phx_join");
        assert_eq!(value["ref"], "7");
        assert_eq!(value["join_ref"], "7");
        assert_eq!(value["payload"]["access_token"], "jwt");
        let changes = &value["payload"]["config"]["postgres_changes"];
        assert_eq!(changes[0], json!({"event": "*", "schema": "public", "table": "newsletters"}));
        assert_eq!(changes[1]["event"], "INSERT");
        assert_eq!(value["payload"]["config"]["broadcast"]["self"], false);
    }

    #[test]
    fn heartbeat_uses_phoenix_topic() {
        let frame = Frame::heartbeat("3");
        assert_eq!(frame.topic, PHOENIX_TOPIC);
        assert_eq!(frame.event, "heartbeat");
        assert!(frame.join_ref.is_none());
    }

    #[test]
    fn classify_postgres_change() {
        let text = json!({
            "topic": "realtime:dash",
            "event": "postgres_changes",
            "payload": {
                "ids": [1234],
                "data": {
                    "schema": "public",
                    "table": "newsletters",
                    "type": "UPDATE",
                    "commit_timestamp": "2026-01-01T00:00:00Z",
                    "record": {"id": 1, "title": "Weekly"},
                    "old_record": {"id": 1},
                    "columns": [],
                    "errors": null
                }
            },
            "ref": null
        })
        .to_string();
        let incoming = Frame::decode(&text).unwrap().classify().unwrap();
        match incoming {
            Incoming::Change(change) => {
                assert_eq!(change.table, "newsletters");
                assert_eq!(change.kind, ChangeKind::Update);
                assert_eq!(change.record["title"], "Weekly");
            }
            other => panic!("expected Change, got {other:?}"),
        }
    }

    #[test]
    fn classify_reply_keeps_ref() {
        let text = r#"{"topic":"realtime:dash","event":"phx_reply","payload":{"status":"error","response":{"reason":"unauthorized"}},"ref":"1"}"#;
        let incoming = Frame::decode(text).unwrap().classify().unwrap();
        assert_eq!(
            incoming,
            Incoming::Reply {
                msg_ref: Some("1".into()),
                status: ReplyStatus::Error,
                response: json!({"reason": "unauthorized"}),
            }
        );
    }

    #[test]
    fn classify_error_and_close() {
        let err = r#"{"topic":"realtime:dash","event":"phx_error","payload":{},"ref":null}"#;
        let close = r#"{"topic":"realtime:dash","event":"phx_close","payload":{},"ref":null}"#;
        assert_eq!(
            Frame::decode(err).unwrap().classify().unwrap(),
            Incoming::ChannelError
        );
        assert_eq!(
            Frame::decode(close).unwrap().classify().unwrap(),
            Incoming::ChannelClose
        );
    }

    #[test]
    fn classify_unknown_event_is_other() {
        let text = r#"{"topic":"realtime:dash","event":"presence_state","payload":{}}"#;
        assert_eq!(
            Frame::decode(text).unwrap().classify().unwrap(),
            Incoming::Other("presence_state".into())
        );
    }

    #[test]
    fn malformed_change_payload_is_rejected() {
        let text = r#"{"topic":"realtime:dash","event":"postgres_changes","payload":{"data":{"table":1}}}"#;
        let err = Frame::decode(text).unwrap().classify().unwrap_err();
        assert!(matches!(err, TierGateError::MalformedResponse(_)));
    }

    #[test]
    fn event_mask_matching() {
        assert!(EventMask::All.matches(ChangeKind::Delete));
        assert!(EventMask::Insert.matches(ChangeKind::Insert));
        assert!(!EventMask::Insert.matches(ChangeKind::Update));
    }

    #[test]
    fn ref_counter_starts_at_one() {
        let mut refs = RefCounter::default();
        assert_eq!(refs.next_ref(), "1");
        assert_eq!(refs.next_ref(), "2");
    }
}
