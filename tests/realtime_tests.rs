//! Integration tests for `RealtimeManager`.
//!
//! Uses the `MockConnector` from `tests/common` to script connection attempts
//! and server frames. Every test runs on a paused clock, so backoff delays,
//! heartbeats and timeouts elapse instantly and deterministically.

mod common;

use std::time::Duration;

use tiergate::protocol::{ChangeKind, EventMask, TableSubscription};
use tiergate::{
    BackoffPolicy, ConnectionStatus, RealtimeConfig, RealtimeManager, TierGateError,
};

use common::{
    change_json, change_json_in, channel_close_json, channel_error_json, settle, system_json,
    wait_for_status, ConnectionPlan, Invalidations, JoinReply, MockConnector,
};

fn config() -> RealtimeConfig {
    RealtimeConfig::new("dashboard").with_tables(["newsletters", "telegram_messages"])
}

// ════════════════════════════════════════════════════════════════════
// Lifecycle
// ════════════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn connect_reaches_connected_and_joins_every_table() {
    let (connector, mut probe) = MockConnector::healthy();
    let manager = RealtimeManager::new(connector, config().with_access_token("jwt"), |_: &str| {});
    let mut state = manager.subscribe_state();

    manager.connect().await.unwrap();
    let connected = wait_for_status(&mut state, ConnectionStatus::Connected).await;
    assert_eq!(connected.reconnect_attempts, 0);
    assert!(connected.last_connected.is_some());
    assert!(connected.error.is_none());

    let server = probe.next_connection().await;
    let join = &server.sent_frames()[0];
    assert_eq!(join.event, "phx_join");
    assert_eq!(join.topic, manager.topic());
    assert_eq!(join.payload["access_token"], "jwt");
    let tables: Vec<&str> = join.payload["config"]["postgres_changes"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["table"].as_str().unwrap())
        .collect();
    assert_eq!(tables, vec!["newsletters", "telegram_messages"]);

    manager.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn connect_while_active_is_rejected() {
    let (connector, _probe) = MockConnector::healthy();
    let manager = RealtimeManager::new(connector, config(), |_: &str| {});
    let mut state = manager.subscribe_state();

    manager.connect().await.unwrap();
    wait_for_status(&mut state, ConnectionStatus::Connected).await;

    let err = manager.connect().await.unwrap_err();
    assert!(matches!(
        err,
        TierGateError::AlreadyActive {
            status: ConnectionStatus::Connected
        }
    ));
    manager.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn disconnect_twice_is_a_no_op() {
    let (connector, mut probe) = MockConnector::healthy();
    let manager = RealtimeManager::new(connector, config(), |_: &str| {});
    let mut state = manager.subscribe_state();

    manager.connect().await.unwrap();
    wait_for_status(&mut state, ConnectionStatus::Connected).await;
    let server = probe.next_connection().await;

    manager.disconnect().await;
    assert_eq!(manager.status(), ConnectionStatus::Disconnected);
    assert_eq!(server.count_sent("phx_leave"), 1);
    assert_eq!(server.close_calls(), 1);

    manager.disconnect().await;
    assert_eq!(manager.status(), ConnectionStatus::Disconnected);
    assert_eq!(server.count_sent("phx_leave"), 1);
    assert_eq!(server.close_calls(), 1);
    assert_eq!(probe.connects(), 1);
}

#[tokio::test(start_paused = true)]
async fn disconnect_without_connect_is_a_no_op() {
    let (connector, probe) = MockConnector::healthy();
    let manager = RealtimeManager::new(connector, config(), |_: &str| {});
    manager.disconnect().await;
    assert_eq!(manager.status(), ConnectionStatus::Disconnected);
    assert_eq!(probe.connects(), 0);
}

#[tokio::test(start_paused = true)]
async fn connect_after_disconnect_opens_a_new_channel() {
    let (connector, mut probe) = MockConnector::healthy();
    let manager = RealtimeManager::new(connector, config(), |_: &str| {});
    let mut state = manager.subscribe_state();

    manager.connect().await.unwrap();
    wait_for_status(&mut state, ConnectionStatus::Connected).await;
    manager.disconnect().await;

    manager.connect().await.unwrap();
    wait_for_status(&mut state, ConnectionStatus::Connected).await;
    assert_eq!(probe.connects(), 2);
    let first = probe.next_connection().await;
    assert!(first.is_closed());
    manager.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn disconnect_cancels_pending_reconnect() {
    let (connector, probe) = MockConnector::new(vec![ConnectionPlan::refused()]);
    let manager = RealtimeManager::new(connector, config(), |_: &str| {});
    let mut state = manager.subscribe_state();

    manager.connect().await.unwrap();
    wait_for_status(&mut state, ConnectionStatus::Reconnecting).await;
    manager.disconnect().await;

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(probe.connects(), 1);
    assert_eq!(manager.status(), ConnectionStatus::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn dropping_the_manager_stops_the_session() {
    let (connector, probe) = MockConnector::new(vec![ConnectionPlan::refused()]);
    let manager = RealtimeManager::new(connector, config(), |_: &str| {});
    let mut state = manager.subscribe_state();

    manager.connect().await.unwrap();
    wait_for_status(&mut state, ConnectionStatus::Reconnecting).await;
    drop(manager);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(probe.connects(), 1);
}

// ════════════════════════════════════════════════════════════════════
// Backoff and terminal error
// ════════════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn channel_errors_never_exceed_max_attempts() {
    for max_attempts in [0, 1, 3, 5] {
        let plans = vec![ConnectionPlan::refused(); 10];
        let (connector, probe) = MockConnector::new(plans);
        let manager = RealtimeManager::new(
            connector,
            config().with_backoff(BackoffPolicy::default().with_max_attempts(max_attempts)),
            |_: &str| {},
        );
        let mut state = manager.subscribe_state();

        manager.connect().await.unwrap();
        let mut highest = 0;
        loop {
            state.changed().await.unwrap();
            let snapshot = state.borrow_and_update().clone();
            highest = highest.max(snapshot.reconnect_attempts);
            assert!(snapshot.reconnect_attempts <= max_attempts);
            if snapshot.is_terminal() {
                break;
            }
        }

        assert_eq!(highest, max_attempts);
        assert_eq!(probe.connects(), max_attempts as usize + 1);
        let error = manager.state().error.unwrap();
        assert!(error.contains("connection refused"), "{error}");
    }
}

#[tokio::test(start_paused = true)]
async fn reconnect_delays_are_non_decreasing_and_capped() {
    let plans = vec![ConnectionPlan::refused(); 10];
    let (connector, probe) = MockConnector::new(plans);
    let policy = BackoffPolicy::default()
        .with_base_delay(Duration::from_millis(500))
        .with_max_delay(Duration::from_secs(3))
        .with_max_attempts(6);
    let manager = RealtimeManager::new(connector, config().with_backoff(policy), |_: &str| {});
    let mut state = manager.subscribe_state();

    manager.connect().await.unwrap();
    wait_for_status(&mut state, ConnectionStatus::Error).await;

    let times = probe.attempt_times();
    assert_eq!(times.len(), 7);
    let gaps: Vec<Duration> = times.windows(2).map(|w| w[1] - w[0]).collect();
    for pair in gaps.windows(2) {
        assert!(pair[1] >= pair[0], "gaps decreased: {gaps:?}");
    }
    // Timer resolution is one millisecond.
    let slack = Duration::from_millis(2);
    for gap in &gaps {
        assert!(*gap <= Duration::from_secs(3) + slack, "{gaps:?}");
    }
    assert!(gaps[0] >= Duration::from_millis(500) && gaps[0] <= Duration::from_millis(500) + slack);
    assert!(gaps[5] >= Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn successful_resubscribe_resets_attempts() {
    let plans = vec![ConnectionPlan::refused(), ConnectionPlan::refused()];
    let (connector, _probe) = MockConnector::new(plans);
    let manager = RealtimeManager::new(connector, config(), |_: &str| {});
    let mut state = manager.subscribe_state();

    manager.connect().await.unwrap();
    let connected = wait_for_status(&mut state, ConnectionStatus::Connected).await;
    assert_eq!(connected.reconnect_attempts, 0);
    assert!(connected.error.is_none());
    manager.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn connect_from_error_requires_reconnect() {
    let plans = vec![ConnectionPlan::refused(); 4];
    let (connector, _probe) = MockConnector::new(plans);
    let manager = RealtimeManager::new(connector, config(), |_: &str| {});
    let mut state = manager.subscribe_state();

    manager.connect().await.unwrap();
    wait_for_status(&mut state, ConnectionStatus::Error).await;

    let err = manager.connect().await.unwrap_err();
    assert!(matches!(
        err,
        TierGateError::AlreadyActive {
            status: ConnectionStatus::Error
        }
    ));
}

#[tokio::test(start_paused = true)]
async fn reconnect_from_error_resets_attempts() {
    let plans = vec![ConnectionPlan::refused(); 4];
    let (connector, mut probe) = MockConnector::new(plans);
    let manager = RealtimeManager::new(connector, config(), |_: &str| {});
    let mut state = manager.subscribe_state();

    manager.connect().await.unwrap();
    let failed = wait_for_status(&mut state, ConnectionStatus::Error).await;
    assert_eq!(failed.reconnect_attempts, 3);

    let started = tokio::time::Instant::now();
    manager.reconnect().await.unwrap();
    assert!(started.elapsed() >= Duration::from_secs(1));
    assert_eq!(manager.state().reconnect_attempts, 0);
    assert!(manager.state().error.is_none());

    let connected = wait_for_status(&mut state, ConnectionStatus::Connected).await;
    assert_eq!(connected.reconnect_attempts, 0);
    probe.next_connection().await;
    manager.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn connect_after_disconnect_from_error_has_full_retry_budget() {
    let plans = vec![ConnectionPlan::refused(); 5];
    let (connector, mut probe) = MockConnector::new(plans);
    let manager = RealtimeManager::new(connector, config(), |_: &str| {});
    let mut state = manager.subscribe_state();

    manager.connect().await.unwrap();
    wait_for_status(&mut state, ConnectionStatus::Error).await;
    assert_eq!(probe.connects(), 4);

    manager.disconnect().await;
    let cleared = manager.state();
    assert_eq!(cleared.status, ConnectionStatus::Disconnected);
    assert_eq!(cleared.reconnect_attempts, 0);
    assert!(cleared.error.is_none());

    // The fifth attempt is refused; the sixth succeeds.
    manager.connect().await.unwrap();
    let retrying = wait_for_status(&mut state, ConnectionStatus::Reconnecting).await;
    assert_eq!(retrying.reconnect_attempts, 1);

    let connected = wait_for_status(&mut state, ConnectionStatus::Connected).await;
    assert_eq!(connected.reconnect_attempts, 0);
    assert_eq!(probe.connects(), 6);
    probe.next_connection().await;
    manager.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn disconnect_while_reconnecting_resets_attempts() {
    let (connector, _probe) = MockConnector::new(vec![ConnectionPlan::refused()]);
    let manager = RealtimeManager::new(connector, config(), |_: &str| {});
    let mut state = manager.subscribe_state();

    manager.connect().await.unwrap();
    let retrying = wait_for_status(&mut state, ConnectionStatus::Reconnecting).await;
    assert_eq!(retrying.reconnect_attempts, 1);
    assert!(retrying.error.is_some());

    manager.disconnect().await;
    assert_eq!(manager.state().reconnect_attempts, 0);
    assert!(manager.state().error.is_none());
}

#[tokio::test(start_paused = true)]
async fn reconnect_while_connected_opens_a_fresh_channel() {
    let (connector, mut probe) = MockConnector::healthy();
    let manager = RealtimeManager::new(
        connector,
        config().with_manual_reconnect_delay(Duration::from_millis(10)),
        |_: &str| {},
    );
    let mut state = manager.subscribe_state();

    manager.connect().await.unwrap();
    wait_for_status(&mut state, ConnectionStatus::Connected).await;
    let first = probe.next_connection().await;

    manager.reconnect().await.unwrap();
    let second = probe.next_connection().await;
    assert!(first.is_closed());
    assert_eq!(first.count_sent("phx_leave"), 1);
    wait_for_status(&mut state, ConnectionStatus::Connected).await;
    assert_eq!(second.joined_topic(), manager.topic());
    manager.disconnect().await;
}

// ════════════════════════════════════════════════════════════════════
// Failure outcomes
// ════════════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn rejected_join_is_a_channel_error() {
    let (connector, _probe) =
        MockConnector::new(vec![ConnectionPlan::join(JoinReply::Error("unauthorized".into()))]);
    let manager = RealtimeManager::new(connector, config(), |_: &str| {});
    let mut state = manager.subscribe_state();

    manager.connect().await.unwrap();
    let reconnecting = wait_for_status(&mut state, ConnectionStatus::Reconnecting).await;
    assert!(reconnecting.error.unwrap().contains("unauthorized"));
    wait_for_status(&mut state, ConnectionStatus::Connected).await;
    manager.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn silent_join_times_out() {
    let (connector, _probe) = MockConnector::new(vec![ConnectionPlan::join(JoinReply::Silent)]);
    let manager = RealtimeManager::new(
        connector,
        config().with_subscribe_timeout(Duration::from_secs(2)),
        |_: &str| {},
    );
    let mut state = manager.subscribe_state();

    let started = tokio::time::Instant::now();
    manager.connect().await.unwrap();
    let reconnecting = wait_for_status(&mut state, ConnectionStatus::Reconnecting).await;
    assert!(started.elapsed() >= Duration::from_secs(2));
    assert!(reconnecting.error.unwrap().contains("no join reply"));
    wait_for_status(&mut state, ConnectionStatus::Connected).await;
    manager.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn unanswered_heartbeat_times_out() {
    let (connector, mut probe) = MockConnector::new(vec![ConnectionPlan::deaf_to_heartbeats()]);
    let manager = RealtimeManager::new(
        connector,
        config().with_heartbeat_interval(Duration::from_secs(5)),
        |_: &str| {},
    );
    let mut state = manager.subscribe_state();

    manager.connect().await.unwrap();
    wait_for_status(&mut state, ConnectionStatus::Connected).await;
    let first = probe.next_connection().await;

    let reconnecting = wait_for_status(&mut state, ConnectionStatus::Reconnecting).await;
    assert!(reconnecting.error.unwrap().contains("heartbeat"));
    assert_eq!(first.count_sent("heartbeat"), 1);
    assert!(first.is_closed());

    wait_for_status(&mut state, ConnectionStatus::Connected).await;
    manager.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn answered_heartbeats_keep_the_channel_up() {
    let (connector, mut probe) = MockConnector::healthy();
    let manager = RealtimeManager::new(
        connector,
        config().with_heartbeat_interval(Duration::from_secs(5)),
        |_: &str| {},
    );
    let mut state = manager.subscribe_state();

    manager.connect().await.unwrap();
    wait_for_status(&mut state, ConnectionStatus::Connected).await;
    let server = probe.next_connection().await;

    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(manager.status(), ConnectionStatus::Connected);
    assert_eq!(server.count_sent("heartbeat"), 6);
    assert_eq!(probe.connects(), 1);
    manager.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn server_channel_error_triggers_reconnect() {
    let (connector, mut probe) = MockConnector::healthy();
    let manager = RealtimeManager::new(connector, config(), |_: &str| {});
    let mut state = manager.subscribe_state();

    manager.connect().await.unwrap();
    wait_for_status(&mut state, ConnectionStatus::Connected).await;
    let first = probe.next_connection().await;

    first.push(channel_error_json(manager.topic()));
    let reconnecting = wait_for_status(&mut state, ConnectionStatus::Reconnecting).await;
    assert_eq!(reconnecting.reconnect_attempts, 1);

    let second = probe.next_connection().await;
    wait_for_status(&mut state, ConnectionStatus::Connected).await;
    assert_eq!(second.joined_topic(), manager.topic());
    manager.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn failed_system_notice_triggers_reconnect() {
    let (connector, mut probe) = MockConnector::healthy();
    let manager = RealtimeManager::new(connector, config(), |_: &str| {});
    let mut state = manager.subscribe_state();

    manager.connect().await.unwrap();
    wait_for_status(&mut state, ConnectionStatus::Connected).await;
    let server = probe.next_connection().await;

    server.push(system_json(manager.topic(), "ok", "Subscribed to PostgreSQL"));
    settle().await;
    assert_eq!(manager.status(), ConnectionStatus::Connected);

    server.push(system_json(manager.topic(), "error", "replication slot lost"));
    let reconnecting = wait_for_status(&mut state, ConnectionStatus::Reconnecting).await;
    assert_eq!(reconnecting.error.as_deref(), Some("replication slot lost"));
    manager.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn transport_drop_triggers_reconnect() {
    let (connector, mut probe) = MockConnector::healthy();
    let manager = RealtimeManager::new(connector, config(), |_: &str| {});
    let mut state = manager.subscribe_state();

    manager.connect().await.unwrap();
    wait_for_status(&mut state, ConnectionStatus::Connected).await;
    probe.next_connection().await.drop_connection();

    let reconnecting = wait_for_status(&mut state, ConnectionStatus::Reconnecting).await;
    assert!(reconnecting.error.unwrap().contains("closed by server"));
    wait_for_status(&mut state, ConnectionStatus::Connected).await;
    assert_eq!(probe.connects(), 2);
    manager.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn server_close_disconnects_without_retry() {
    let (connector, mut probe) = MockConnector::healthy();
    let manager = RealtimeManager::new(connector, config(), |_: &str| {});
    let mut state = manager.subscribe_state();

    manager.connect().await.unwrap();
    wait_for_status(&mut state, ConnectionStatus::Connected).await;
    probe
        .next_connection()
        .await
        .push(channel_close_json(manager.topic()));

    wait_for_status(&mut state, ConnectionStatus::Disconnected).await;
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(probe.connects(), 1);

    manager.connect().await.unwrap();
    wait_for_status(&mut state, ConnectionStatus::Connected).await;
    assert_eq!(probe.connects(), 2);
    manager.disconnect().await;
}

// ════════════════════════════════════════════════════════════════════
// Invalidation
// ════════════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn change_bursts_are_throttled_per_table() {
    let (connector, mut probe) = MockConnector::healthy();
    let invalidations = Invalidations::default();
    let manager = RealtimeManager::new(
        connector,
        config().with_invalidation_throttle(Duration::from_secs(3)),
        invalidations.sink(),
    );
    let mut state = manager.subscribe_state();

    manager.connect().await.unwrap();
    wait_for_status(&mut state, ConnectionStatus::Connected).await;
    let server = probe.next_connection().await;
    let topic = manager.topic().to_string();

    for _ in 0..5 {
        server.push(change_json(&topic, "newsletters", ChangeKind::Insert));
    }
    server.push(change_json(&topic, "telegram_messages", ChangeKind::Update));
    settle().await;
    assert_eq!(invalidations.count("newsletters"), 1);
    assert_eq!(invalidations.count("telegram_messages"), 1);

    tokio::time::sleep(Duration::from_secs(3)).await;
    server.push(change_json(&topic, "newsletters", ChangeKind::Delete));
    settle().await;
    assert_eq!(invalidations.count("newsletters"), 2);
    manager.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn unconfigured_tables_and_topics_are_ignored() {
    let (connector, mut probe) = MockConnector::healthy();
    let invalidations = Invalidations::default();
    let manager = RealtimeManager::new(
        connector,
        RealtimeConfig::new("dashboard")
            .with_table(TableSubscription::new("newsletters").with_event(EventMask::Insert)),
        invalidations.sink(),
    );
    let mut state = manager.subscribe_state();

    manager.connect().await.unwrap();
    wait_for_status(&mut state, ConnectionStatus::Connected).await;
    let server = probe.next_connection().await;
    let topic = manager.topic().to_string();

    server.push(change_json(&topic, "profiles", ChangeKind::Insert));
    server.push(change_json(&topic, "newsletters", ChangeKind::Update));
    server.push(change_json_in(&topic, "private", "newsletters", ChangeKind::Insert));
    server.push(change_json("realtime:someone-else", "newsletters", ChangeKind::Insert));
    server.push("not json".to_string());
    settle().await;
    assert!(invalidations.tables().is_empty());

    server.push(change_json(&topic, "newsletters", ChangeKind::Insert));
    settle().await;
    assert_eq!(invalidations.tables(), vec!["newsletters"]);
    assert_eq!(manager.status(), ConnectionStatus::Connected);
    manager.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn resubscribe_invalidates_every_table_once() {
    let (connector, mut probe) = MockConnector::healthy();
    let invalidations = Invalidations::default();
    let manager = RealtimeManager::new(connector, config(), invalidations.sink());
    let mut state = manager.subscribe_state();

    manager.connect().await.unwrap();
    wait_for_status(&mut state, ConnectionStatus::Connected).await;
    assert!(invalidations.tables().is_empty());

    probe.next_connection().await.drop_connection();
    wait_for_status(&mut state, ConnectionStatus::Reconnecting).await;
    wait_for_status(&mut state, ConnectionStatus::Connected).await;
    settle().await;

    let mut tables = invalidations.tables();
    tables.sort();
    assert_eq!(tables, vec!["newsletters", "telegram_messages"]);
    manager.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn resubscribe_invalidation_can_be_disabled() {
    let (connector, mut probe) = MockConnector::healthy();
    let invalidations = Invalidations::default();
    let manager = RealtimeManager::new(
        connector,
        config().with_invalidate_on_resubscribe(false),
        invalidations.sink(),
    );
    let mut state = manager.subscribe_state();

    manager.connect().await.unwrap();
    wait_for_status(&mut state, ConnectionStatus::Connected).await;
    probe.next_connection().await.drop_connection();
    wait_for_status(&mut state, ConnectionStatus::Reconnecting).await;
    wait_for_status(&mut state, ConnectionStatus::Connected).await;
    settle().await;

    assert!(invalidations.tables().is_empty());
    manager.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn two_managers_use_separate_channels() {
    let (connector_a, mut probe_a) = MockConnector::healthy();
    let (connector_b, mut probe_b) = MockConnector::healthy();
    let invalidations_a = Invalidations::default();
    let invalidations_b = Invalidations::default();
    let manager_a = RealtimeManager::new(connector_a, config(), invalidations_a.sink());
    let manager_b = RealtimeManager::new(connector_b, config(), invalidations_b.sink());
    let mut state_a = manager_a.subscribe_state();
    let mut state_b = manager_b.subscribe_state();

    manager_a.connect().await.unwrap();
    manager_b.connect().await.unwrap();
    wait_for_status(&mut state_a, ConnectionStatus::Connected).await;
    wait_for_status(&mut state_b, ConnectionStatus::Connected).await;

    assert_ne!(manager_a.topic(), manager_b.topic());
    let server_a = probe_a.next_connection().await;
    let server_b = probe_b.next_connection().await;
    assert_eq!(server_a.joined_topic(), manager_a.topic());
    assert_eq!(server_b.joined_topic(), manager_b.topic());

    server_a.push(change_json(manager_a.topic(), "newsletters", ChangeKind::Insert));
    server_b.push(change_json(manager_b.topic(), "newsletters", ChangeKind::Insert));
    settle().await;
    assert_eq!(invalidations_a.tables(), vec!["newsletters"]);
    assert_eq!(invalidations_b.tables(), vec!["newsletters"]);

    manager_a.disconnect().await;
    assert_eq!(manager_b.status(), ConnectionStatus::Connected);
    manager_b.disconnect().await;
}
