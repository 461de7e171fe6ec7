//! Configuration for every tiergate component.
//!
//! Each struct has a builder (`new` + `with_*`) and also derives
//! [`Deserialize`] with field defaults, so an application can keep the whole
//! setup in one TOML or JSON document:
//!
//! ```toml
//! [realtime]
//! channel_name = "dashboard"
//! invalidation_throttle_ms = 5000
//! tables = [{ table = "newsletters" }, { table = "telegram_messages", event = "INSERT" }]
//!
//! [realtime.backoff]
//! base_delay_ms = 1000
//! growth = 1.5
//! max_attempts = 5
//!
//! [admin_cache]
//! ttl_ms = 300000
//! ```
//!
//! Durations are written in milliseconds (`*_ms` keys).

use std::time::Duration;

use serde::Deserialize;

use crate::backoff::BackoffPolicy;
use crate::error::{Result, TierGateError};
use crate::protocol::TableSubscription;

/// Default minimum interval between two invalidations of the same table.
pub const DEFAULT_INVALIDATION_THROTTLE: Duration = Duration::from_secs(3);

/// Default time allowed for connecting and receiving the join reply.
pub const DEFAULT_SUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default interval between connection heartbeats.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);

/// Default pause between teardown and connect during a manual reconnect.
pub const DEFAULT_MANUAL_RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Default timeout for the graceful shutdown of a session task.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Default lifetime of a cached admin answer.
pub const DEFAULT_ADMIN_TTL: Duration = Duration::from_secs(5 * 60);

/// Default timeout for a single backend lookup.
pub const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(10);

/// Default upper bound on cached admin entries.
pub const DEFAULT_ADMIN_MAX_ENTRIES: usize = 1024;

const MIN_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(1);

/// Serde adapter reading a [`Duration`] from integer milliseconds.
pub(crate) mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

// ── Realtime ────────────────────────────────────────────────────────

/// Configuration for a [`RealtimeManager`](crate::realtime::RealtimeManager).
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use tiergate::config::RealtimeConfig;
/// use tiergate::protocol::TableSubscription;
///
/// let config = RealtimeConfig::new("dashboard")
///     .with_table(TableSubscription::new("newsletters"))
///     .with_invalidation_throttle(Duration::from_secs(5));
/// assert_eq!(config.tables.len(), 1);
/// assert!(config.enabled);
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    /// Channel name; the manager appends its instance id to build the topic.
    pub channel_name: String,
    /// Tables listened to on the single multiplexed channel.
    pub tables: Vec<TableSubscription>,
    /// When `false`, `connect()` is a no-op.
    pub enabled: bool,
    /// User access token forwarded in the join payload.
    pub access_token: Option<String>,
    /// Minimum interval between two invalidations of the same table. Changes
    /// inside the window are dropped, so the last change of a burst may stay
    /// unseen until the next one (see [`crate::throttle`]).
    #[serde(rename = "invalidation_throttle_ms", with = "duration_ms")]
    pub invalidation_throttle: Duration,
    /// Automatic reconnect policy.
    pub backoff: BackoffPolicy,
    /// Time allowed to connect and receive the join reply before `TIMED_OUT`.
    #[serde(rename = "subscribe_timeout_ms", with = "duration_ms")]
    pub subscribe_timeout: Duration,
    /// Interval between heartbeats; an unanswered heartbeat means `TIMED_OUT`.
    #[serde(rename = "heartbeat_interval_ms", with = "duration_ms")]
    pub heartbeat_interval: Duration,
    /// Pause between teardown and connect during a manual reconnect.
    #[serde(rename = "manual_reconnect_delay_ms", with = "duration_ms")]
    pub manual_reconnect_delay: Duration,
    /// Time the session task gets to leave and close before it is aborted.
    #[serde(rename = "shutdown_timeout_ms", with = "duration_ms")]
    pub shutdown_timeout: Duration,
    /// Invalidate every table once after re-subscribing following a failure.
    pub invalidate_on_resubscribe: bool,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self::new("tiergate")
    }
}

impl RealtimeConfig {
    /// Create a configuration with no tables and default timings.
    pub fn new(channel_name: impl Into<String>) -> Self {
        Self {
            channel_name: channel_name.into(),
            tables: Vec::new(),
            enabled: true,
            access_token: None,
            invalidation_throttle: DEFAULT_INVALIDATION_THROTTLE,
            backoff: BackoffPolicy::default(),
            subscribe_timeout: DEFAULT_SUBSCRIBE_TIMEOUT,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            manual_reconnect_delay: DEFAULT_MANUAL_RECONNECT_DELAY,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            invalidate_on_resubscribe: true,
        }
    }

    /// Add a table listener.
    #[must_use]
    pub fn with_table(mut self, table: TableSubscription) -> Self {
        self.tables.push(table);
        self
    }

    /// Add listeners for every change on each named `public` table.
    #[must_use]
    pub fn with_tables<I, S>(mut self, tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tables
            .extend(tables.into_iter().map(TableSubscription::new));
        self
    }

    /// Enable or disable the manager.
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Forward an access token in the join payload.
    #[must_use]
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    /// Set the per-table invalidation throttle.
    #[must_use]
    pub fn with_invalidation_throttle(mut self, throttle: Duration) -> Self {
        self.invalidation_throttle = throttle;
        self
    }

    /// Set the reconnect policy.
    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Set the subscribe timeout.
    #[must_use]
    pub fn with_subscribe_timeout(mut self, timeout: Duration) -> Self {
        self.subscribe_timeout = timeout;
        self
    }

    /// Set the heartbeat interval. Clamped to at least 1 ms.
    #[must_use]
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval.max(MIN_HEARTBEAT_INTERVAL);
        self
    }

    /// Set the pause used by manual reconnects.
    #[must_use]
    pub fn with_manual_reconnect_delay(mut self, delay: Duration) -> Self {
        self.manual_reconnect_delay = delay;
        self
    }

    /// Set the graceful shutdown timeout. Zero aborts the session immediately.
    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Enable or disable invalidating every table after a re-subscription.
    #[must_use]
    pub fn with_invalidate_on_resubscribe(mut self, enabled: bool) -> Self {
        self.invalidate_on_resubscribe = enabled;
        self
    }

    /// Heartbeat interval as used by the session task.
    pub(crate) fn effective_heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval.max(MIN_HEARTBEAT_INTERVAL)
    }

    /// Check that the configuration can open a channel.
    ///
    /// # Errors
    ///
    /// Returns [`TierGateError::InvalidConfig`] when the channel name is blank
    /// or no table is configured.
    pub fn validate(&self) -> Result<()> {
        if self.channel_name.trim().is_empty() {
            return Err(TierGateError::InvalidConfig(
                "channel_name must not be empty".into(),
            ));
        }
        if self.tables.is_empty() {
            return Err(TierGateError::InvalidConfig(
                "at least one table must be configured".into(),
            ));
        }
        if let Some(blank) = self.tables.iter().find(|t| t.table.trim().is_empty()) {
            return Err(TierGateError::InvalidConfig(format!(
                "table name in schema '{}' must not be empty",
                blank.schema
            )));
        }
        Ok(())
    }
}

// ── Admin cache ─────────────────────────────────────────────────────

/// Configuration for an [`AdminStatusCache`](crate::admin::AdminStatusCache).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AdminCacheConfig {
    /// How long an answer is served without asking the backend again.
    #[serde(rename = "ttl_ms", with = "duration_ms")]
    pub ttl: Duration,
    /// Timeout for one backend lookup; expiry counts as "not an admin".
    #[serde(rename = "lookup_timeout_ms", with = "duration_ms")]
    pub lookup_timeout: Duration,
    /// Maximum number of cached emails. Values below 1 are clamped to 1.
    pub max_entries: usize,
}

impl Default for AdminCacheConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_ADMIN_TTL,
            lookup_timeout: DEFAULT_LOOKUP_TIMEOUT,
            max_entries: DEFAULT_ADMIN_MAX_ENTRIES,
        }
    }
}

impl AdminCacheConfig {
    /// Set the entry TTL.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Set the backend lookup timeout.
    #[must_use]
    pub fn with_lookup_timeout(mut self, timeout: Duration) -> Self {
        self.lookup_timeout = timeout;
        self
    }

    /// Set the maximum number of entries. Values below 1 are clamped to 1.
    #[must_use]
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries.max(1);
        self
    }
}

// ── Tier resolver ───────────────────────────────────────────────────

/// Configuration for a [`TierResolver`](crate::tier::TierResolver).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct TierResolverConfig {
    /// Timeout applied to each source lookup.
    #[serde(rename = "lookup_timeout_ms", with = "duration_ms")]
    pub lookup_timeout: Duration,
}

impl Default for TierResolverConfig {
    fn default() -> Self {
        Self {
            lookup_timeout: DEFAULT_LOOKUP_TIMEOUT,
        }
    }
}

impl TierResolverConfig {
    /// Set the per-source lookup timeout.
    #[must_use]
    pub fn with_lookup_timeout(mut self, timeout: Duration) -> Self {
        self.lookup_timeout = timeout;
        self
    }
}

// ── Aggregate ───────────────────────────────────────────────────────

/// All tiergate settings in one document.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TierGateConfig {
    pub realtime: RealtimeConfig,
    pub admin_cache: AdminCacheConfig,
    pub tier_resolver: TierResolverConfig,
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
    use crate::protocol::EventMask;

    #[test]
    fn realtime_defaults() {
        let config = RealtimeConfig::new("dash");
        assert_eq!(config.channel_name, "dash");
        assert!(config.enabled);
        assert!(config.tables.is_empty());
        assert_eq!(config.invalidation_throttle, Duration::from_secs(3));
        assert_eq!(config.subscribe_timeout, Duration::from_secs(10));
        assert_eq!(config.manual_reconnect_delay, Duration::from_secs(1));
        assert_eq!(config.backoff.max_attempts, 3);
        assert!(config.invalidate_on_resubscribe);
    }

    #[test]
    fn heartbeat_interval_is_clamped() {
        let config = RealtimeConfig::new("dash").with_heartbeat_interval(Duration::ZERO);
        assert_eq!(config.heartbeat_interval, Duration::from_millis(1));
    }

    #[test]
    fn validate_requires_tables() {
        let err = RealtimeConfig::new("dash").validate().unwrap_err();
        assert!(matches!(err, TierGateError::InvalidConfig(_)));
        RealtimeConfig::new("dash")
            .with_tables(["newsletters"])
            .validate()
            .unwrap();
    }

    #[test]
    fn validate_rejects_blank_names() {
        assert!(RealtimeConfig::new("  ")
            .with_tables(["newsletters"])
            .validate()
            .is_err());
        assert!(RealtimeConfig::new("dash")
            .with_tables([""])
            .validate()
            .is_err());
    }

    #[test]
    fn admin_max_entries_is_clamped() {
        assert_eq!(AdminCacheConfig::default().with_max_entries(0).max_entries, 1);
    }

    #[test]
    fn aggregate_loads_from_json() {
        let json = serde_json::json!({
            "realtime": {
                "channel_name": "dash",
                "invalidation_throttle_ms": 5000,
                "tables": [{"table": "newsletters"}, {"table": "telegram_messages", "event": "INSERT"}],
                "backoff": {"growth": 1.5, "max_attempts": 5}
            },
            "admin_cache": {"ttl_ms": 60000}
        });
        let config: TierGateConfig = serde_json::from_value(json).unwrap();
        assert_eq!(config.realtime.invalidation_throttle, Duration::from_secs(5));
        assert_eq!(config.realtime.tables[1].event, EventMask::Insert);
        assert_eq!(config.realtime.tables[0].schema, "public");
        assert_eq!(config.realtime.backoff.max_attempts, 5);
        assert_eq!(config.realtime.backoff.base_delay, Duration::from_secs(1));
        assert_eq!(config.admin_cache.ttl, Duration::from_secs(60));
        assert_eq!(config.admin_cache.max_entries, DEFAULT_ADMIN_MAX_ENTRIES);
        assert_eq!(config.tier_resolver.lookup_timeout, DEFAULT_LOOKUP_TIMEOUT);
    }
}
