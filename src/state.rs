//! Connection state and its transition rules.
//!
//! ```text
//! disconnected ─connect─▶ connecting ─SUBSCRIBED─▶ connected
//!                            │  ▲                     │
//!       CHANNEL_ERROR/TIMED_OUT │  timer fires        │ CHANNEL_ERROR/TIMED_OUT
//!                            ▼  │                     ▼
//!                        reconnecting ◀───────────────┘
//!                            │ attempts exhausted
//!                            ▼
//!                          error  (terminal until reconnect())
//! ```
//!
//! `CLOSED` and explicit teardown lead to `disconnected` from any state.
//! The transition function is pure so the policy can be tested without timers.

use std::fmt;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

use crate::backoff::BackoffPolicy;

/// Observable status of a realtime manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    /// Reconnects exhausted; only a manual reconnect leaves this state.
    Error,
}

impl ConnectionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome reported for a channel subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscribeStatus {
    Subscribed,
    ChannelError,
    TimedOut,
    Closed,
}

impl fmt::Display for SubscribeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Subscribed => "SUBSCRIBED",
            Self::ChannelError => "CHANNEL_ERROR",
            Self::TimedOut => "TIMED_OUT",
            Self::Closed => "CLOSED",
        })
    }
}

/// What the session has to do after a status was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextStep {
    /// Keep pumping the live channel.
    Continue,
    /// Open a new channel after `delay`; `attempt` is 1-based.
    Retry { delay: Duration, attempt: u32 },
    /// Reconnects are exhausted; the state is now terminal.
    GiveUp,
    /// The channel was closed; wait for an explicit reconnect.
    Stop,
}

/// Snapshot of one manager's connection.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConnectionState {
    pub status: ConnectionStatus,
    /// Wall-clock time of the last successful subscription.
    pub last_connected: Option<SystemTime>,
    /// Automatic reconnects made since the last successful subscription.
    pub reconnect_attempts: u32,
    /// Last failure reason, cleared on success.
    pub error: Option<String>,
}

impl ConnectionState {
    /// Returns `true` when the manager gave up and needs a manual reconnect.
    pub fn is_terminal(&self) -> bool {
        self.status == ConnectionStatus::Error
    }

    /// A new channel is being opened.
    pub fn begin_connecting(&mut self) {
        self.status = ConnectionStatus::Connecting;
    }

    /// Forget previous failures ahead of a manual reconnect.
    pub fn reset_attempts(&mut self) {
        self.reconnect_attempts = 0;
        self.error = None;
    }

    /// The channel was torn down on request. The next `connect()` starts
    /// with a full retry budget.
    pub fn mark_disconnected(&mut self) {
        self.status = ConnectionStatus::Disconnected;
        self.reset_attempts();
    }

    /// Apply a subscription outcome.
    pub fn apply(
        &mut self,
        outcome: SubscribeStatus,
        reason: Option<String>,
        policy: &BackoffPolicy,
        now: SystemTime,
    ) -> NextStep {
        match outcome {
            SubscribeStatus::Subscribed => {
                self.status = ConnectionStatus::Connected;
                self.reconnect_attempts = 0;
                self.last_connected = Some(now);
                self.error = None;
                NextStep::Continue
            }
            SubscribeStatus::ChannelError | SubscribeStatus::TimedOut => {
                let reason = reason.unwrap_or_else(|| outcome.to_string());
                if self.reconnect_attempts < policy.max_attempts {
                    let delay = policy.delay_for(self.reconnect_attempts);
                    self.reconnect_attempts += 1;
                    self.status = ConnectionStatus::Reconnecting;
                    self.error = Some(reason);
                    NextStep::Retry {
                        delay,
                        attempt: self.reconnect_attempts,
                    }
                } else {
                    self.status = ConnectionStatus::Error;
                    self.error = Some(format!(
                        "{reason} (gave up after {} reconnect attempts)",
                        self.reconnect_attempts
                    ));
                    NextStep::GiveUp
                }
            }
            SubscribeStatus::Closed => {
                self.status = ConnectionStatus::Disconnected;
                NextStep::Stop
            }
        }
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

    fn failure() -> SubscribeStatus {
        SubscribeStatus::ChannelError
    }

    #[test]
    fn subscribed_resets_attempts_and_records_time() {
        let mut state = ConnectionState {
            reconnect_attempts: 2,
            error: Some("boom".into()),
            ..Default::default()
        };
        let now = SystemTime::UNIX_EPOCH + Duration::from_secs(42);
        let step = state.apply(
            SubscribeStatus::Subscribed,
            None,
            &BackoffPolicy::default(),
            now,
        );
        assert_eq!(step, NextStep::Continue);
        assert_eq!(state.status, ConnectionStatus::Connected);
        assert_eq!(state.reconnect_attempts, 0);
        assert_eq!(state.last_connected, Some(now));
        assert!(state.error.is_none());
    }

    #[test]
    fn failures_never_exceed_max_attempts() {
        for max in 0..6 {
            let policy = BackoffPolicy::default().with_max_attempts(max);
            let mut state = ConnectionState::default();
            let mut retries = 0;
            for n in 0..20 {
                let outcome = if n % 2 == 0 {
                    failure()
                } else {
                    SubscribeStatus::TimedOut
                };
                match state.apply(outcome, None, &policy, SystemTime::now()) {
                    NextStep::Retry { attempt, .. } => {
                        retries += 1;
                        assert_eq!(attempt, retries);
                        assert!(attempt <= max);
                        assert_eq!(state.status, ConnectionStatus::Reconnecting);
                    }
                    NextStep::GiveUp => {
                        assert_eq!(state.status, ConnectionStatus::Error);
                    }
                    other => panic!("unexpected step {other:?}"),
                }
                assert!(state.reconnect_attempts <= max);
            }
            assert_eq!(retries, max);
            assert!(state.is_terminal());
        }
    }

    #[test]
    fn retry_delays_follow_policy() {
        let policy = BackoffPolicy::default();
        let mut state = ConnectionState::default();
        let mut delays = Vec::new();
        while let NextStep::Retry { delay, .. } =
            state.apply(failure(), None, &policy, SystemTime::now())
        {
            delays.push(delay);
        }
        assert_eq!(
            delays,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4)
            ]
        );
    }

    #[test]
    fn give_up_keeps_reason() {
        let policy = BackoffPolicy::default().with_max_attempts(0);
        let mut state = ConnectionState::default();
        let step = state.apply(
            SubscribeStatus::TimedOut,
            Some("join timed out".into()),
            &policy,
            SystemTime::now(),
        );
        assert_eq!(step, NextStep::GiveUp);
        assert!(state.error.as_deref().unwrap().starts_with("join timed out"));
    }

    #[test]
    fn closed_stops_without_retry() {
        let mut state = ConnectionState {
            status: ConnectionStatus::Connected,
            ..Default::default()
        };
        let step = state.apply(
            SubscribeStatus::Closed,
            None,
            &BackoffPolicy::default(),
            SystemTime::now(),
        );
        assert_eq!(step, NextStep::Stop);
        assert_eq!(state.status, ConnectionStatus::Disconnected);
        assert_eq!(state.reconnect_attempts, 0);
    }

    #[test]
    fn reset_attempts_clears_error_state_counters() {
        let policy = BackoffPolicy::default().with_max_attempts(1);
        let mut state = ConnectionState::default();
        state.apply(failure(), None, &policy, SystemTime::now());
        state.apply(failure(), None, &policy, SystemTime::now());
        assert!(state.is_terminal());
        state.reset_attempts();
        assert_eq!(state.reconnect_attempts, 0);
        assert!(state.error.is_none());
    }

    #[test]
    fn mark_disconnected_forgets_previous_failures() {
        let policy = BackoffPolicy::default().with_max_attempts(1);
        let mut state = ConnectionState::default();
        state.apply(failure(), None, &policy, SystemTime::now());
        state.apply(failure(), None, &policy, SystemTime::now());
        assert!(state.is_terminal());

        state.mark_disconnected();
        assert_eq!(state.status, ConnectionStatus::Disconnected);
        assert_eq!(state.reconnect_attempts, 0);
        assert!(state.error.is_none());

        let step = state.apply(failure(), None, &policy, SystemTime::now());
        assert!(matches!(step, NextStep::Retry { attempt: 1, .. }));
    }

    #[test]
    fn subscribe_status_wire_names() {
        let json = serde_json::to_string(&SubscribeStatus::ChannelError).unwrap();
        assert_eq!(json, "\"CHANNEL_ERROR\"");
        assert_eq!(SubscribeStatus::TimedOut.to_string(), "TIMED_OUT");
        assert_eq!(ConnectionStatus::Reconnecting.to_string(), "reconnecting");
    }
}
