#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
//! Wire-format tests for the realtime channel protocol.
//!
//! Decodes JSON fixtures shaped like real realtime server output and checks
//! the exact JSON the client produces for joins, leaves and heartbeats.

use serde_json::json;
use tiergate::protocol::{
    channel_topic, ChangeKind, EventMask, Frame, Incoming, JoinPayload, ReplyStatus,
    TableSubscription, PHOENIX_TOPIC,
};
use tiergate::{SubscribeStatus, TierGateError};

// ════════════════════════════════════════════════════════════════════
// Server fixtures
// ════════════════════════════════════════════════════════════════════

const JOIN_REPLY_FIXTURE: &str = r#"{
  "event": "phx_reply",
  "payload": {
    "response": {
      "postgres_changes": [
        {"event": "*", "filter": "", "id": 30636876, "schema": "public", "table": "newsletters"}
      ]
    },
    "status": "ok"
  },
  "ref": "1",
  "topic": "realtime:dashboard-1"
}"#;

const INSERT_FIXTURE: &str = r#"{
  "event": "postgres_changes",
  "payload": {
    "data": {
      "columns": [{"name": "id", "type": "int8"}, {"name": "title", "type": "text"}],
      "commit_timestamp": "2026-03-01T12:00:00.123Z",
      "errors": null,
      "record": {"id": 7, "title": "Market open"},
      "schema": "public",
      "table": "telegram_messages",
      "type": "INSERT"
    },
    "ids": [30636876]
  },
  "ref": null,
  "topic": "realtime:dashboard-1"
}"#;

const DELETE_FIXTURE: &str = r#"{
  "event": "postgres_changes",
  "payload": {
    "data": {
      "commit_timestamp": "2026-03-01T12:00:01Z",
      "old_record": {"id": 7},
      "schema": "public",
      "table": "telegram_messages",
      "type": "DELETE"
    },
    "ids": [30636876]
  },
  "ref": null,
  "topic": "realtime:dashboard-1"
}"#;

const SYSTEM_FIXTURE: &str = r#"{
  "event": "system",
  "payload": {
    "channel": "dashboard-1",
    "extension": "postgres_changes",
    "message": "Subscribed to PostgreSQL",
    "status": "ok"
  },
  "ref": null,
  "topic": "realtime:dashboard-1"
}"#;

#[test]
fn join_reply_fixture_decodes() {
    let incoming = Frame::decode(JOIN_REPLY_FIXTURE)
        .unwrap()
        .classify()
        .unwrap();
    match incoming {
        Incoming::Reply {
            msg_ref,
            status,
            response,
        } => {
            assert_eq!(msg_ref.as_deref(), Some("1"));
            assert_eq!(status, ReplyStatus::Ok);
            assert_eq!(response["postgres_changes"][0]["table"], "newsletters");
        }
        other => panic!("expected Reply, got {other:?}"),
    }
}

#[test]
fn insert_fixture_decodes() {
    let frame = Frame::decode(INSERT_FIXTURE).unwrap();
    assert_eq!(frame.topic, "realtime:dashboard-1");
    assert!(frame.msg_ref.is_none());
    match frame.classify().unwrap() {
        Incoming::Change(change) => {
            assert_eq!(change.table, "telegram_messages");
            assert_eq!(change.schema, "public");
            assert_eq!(change.kind, ChangeKind::Insert);
            assert_eq!(change.record["title"], "Market open");
            assert!(change.old_record.is_null());
            assert_eq!(
                change.commit_timestamp.as_deref(),
                Some("2026-03-01T12:00:00.123Z")
            );
        }
        other => panic!("expected Change, got {other:?}"),
    }
}

#[test]
fn delete_fixture_without_record_decodes() {
    match Frame::decode(DELETE_FIXTURE).unwrap().classify().unwrap() {
        Incoming::Change(change) => {
            assert_eq!(change.kind, ChangeKind::Delete);
            assert!(change.record.is_null());
            assert_eq!(change.old_record["id"], 7);
        }
        other => panic!("expected Change, got {other:?}"),
    }
}

#[test]
fn system_fixture_decodes() {
    let incoming = Frame::decode(SYSTEM_FIXTURE).unwrap().classify().unwrap();
    assert_eq!(
        incoming,
        Incoming::System {
            ok: true,
            message: "Subscribed to PostgreSQL".into()
        }
    );
}

#[test]
fn heartbeat_reply_has_phoenix_topic() {
    let text = r#"{"event":"phx_reply","payload":{"response":{},"status":"ok"},"ref":"4","topic":"phoenix"}"#;
    let frame = Frame::decode(text).unwrap();
    assert_eq!(frame.topic, PHOENIX_TOPIC);
    assert!(matches!(
        frame.classify().unwrap(),
        Incoming::Reply { status: ReplyStatus::Ok, .. }
    ));
}

#[test]
fn timeout_reply_status_decodes() {
    let text = r#"{"event":"phx_reply","payload":{"response":{},"status":"timeout"},"ref":"1","topic":"realtime:x"}"#;
    assert!(matches!(
        Frame::decode(text).unwrap().classify().unwrap(),
        Incoming::Reply { status: ReplyStatus::Timeout, .. }
    ));
}

#[test]
fn unknown_change_kind_is_malformed() {
    let text = INSERT_FIXTURE.replace("\"INSERT\"", "\"TRUNCATE\"");
    let err = Frame::decode(&text).unwrap().classify().unwrap_err();
    assert!(matches!(err, TierGateError::MalformedResponse(_)));
}

#[test]
fn invalid_json_is_a_serialization_error() {
    let err = Frame::decode("{\"topic\": ").unwrap_err();
    assert!(matches!(err, TierGateError::Serialization(_)));
}

// ════════════════════════════════════════════════════════════════════
// Client frames
// ════════════════════════════════════════════════════════════════════

#[test]
fn join_frame_matches_wire_format() {
    let tables = [
        TableSubscription::new("newsletters"),
        TableSubscription::new("telegram_messages")
            .with_event(EventMask::Delete)
            .with_schema("chat"),
    ];
    let frame = Frame::join(
        &channel_topic("dashboard-1"),
        &JoinPayload::new(&tables, None),
        "1",
    )
    .unwrap();
    let value: serde_json::Value = serde_json::from_str(&frame.encode().unwrap()).unwrap();

    assert_eq!(
        value,
        json!({
            "topic": "realtime:dashboard-1",
            "event": "phx_join",
            "payload": {
                "config": {
                    "broadcast": {"self": false, "ack": false},
                    "presence": {"key": ""},
                    "postgres_changes": [
                        {"event": "*", "schema": "public", "table": "newsletters"},
                        {"event": "DELETE", "schema": "chat", "table": "telegram_messages"}
                    ]
                }
            },
            "ref": "1",
            "join_ref": "1"
        })
    );
}

#[test]
fn leave_frame_matches_wire_format() {
    let frame = Frame::leave("realtime:dashboard-1", "9", "1");
    let value: serde_json::Value = serde_json::from_str(&frame.encode().unwrap()).unwrap();
    assert_eq!(
        value,
        json!({
            "topic": "realtime:dashboard-1",
            "event": "phx_leave",
            "payload": {},
            "ref": "9",
            "join_ref": "1"
        })
    );
}

#[test]
fn heartbeat_frame_matches_wire_format() {
    let value: serde_json::Value =
        serde_json::from_str(&Frame::heartbeat("5").encode().unwrap()).unwrap();
    assert_eq!(
        value,
        json!({"topic": "phoenix", "event": "heartbeat", "payload": {}, "ref": "5"})
    );
}

#[test]
fn table_subscription_defaults_when_deserialized() {
    let table: TableSubscription = serde_json::from_value(json!({"table": "newsletters"})).unwrap();
    assert_eq!(table, TableSubscription::new("newsletters"));
}

#[test]
fn subscribe_status_names_match_server_strings() {
    for (status, name) in [
        (SubscribeStatus::Subscribed, "SUBSCRIBED"),
        (SubscribeStatus::ChannelError, "CHANNEL_ERROR"),
        (SubscribeStatus::TimedOut, "TIMED_OUT"),
        (SubscribeStatus::Closed, "CLOSED"),
    ] {
        assert_eq!(status.to_string(), name);
        let parsed: SubscribeStatus = serde_json::from_value(json!(name)).unwrap();
        assert_eq!(parsed, status);
    }
}
