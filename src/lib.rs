//! # tiergate
//!
//! Access control plumbing for subscription-gated dashboards.
//!
//! - **Tier resolution**: [`TierResolver`] asks the admin override, Whop and
//!   Beehiiv sources in one documented order and falls back to `free`.
//! - **Admin status**: [`AdminStatusCache`] memoises "is this email an admin"
//!   with a TTL and one shared in-flight lookup per email.
//! - **Realtime sync**: [`RealtimeManager`] keeps one multiplexed channel open
//!   for the tables a tier may see, invalidates local caches on row changes and
//!   reconnects with capped exponential backoff.
//! - **Transport-agnostic**: implement [`Transport`] + [`Connector`] for any
//!   backend; the default `transport-websocket` feature provides
//!   `WebSocketConnector`.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use tiergate::{
//!     resolve_access, AdminStatusCache, RealtimeConfig, RealtimeManager, TierTables,
//!     WebSocketConnector,
//! };
//!
//! let access = resolve_access(&resolver, &admins, &email).await?;
//! let tier = access.tier().unwrap_or_default();
//!
//! let config = tables.realtime_config(tier, RealtimeConfig::new("dashboard"));
//! let connector = WebSocketConnector::supabase(&project_url, &anon_key);
//! let manager = RealtimeManager::new(connector, config, |table: &str| {
//!     query_cache.invalidate(table);
//! });
//! manager.connect().await?;
//! ```

pub mod access;
pub mod admin;
pub mod backoff;
pub mod config;
pub mod error;
pub mod protocol;
pub mod realtime;
#[cfg(feature = "http")]
pub mod sources;
pub mod state;
pub mod throttle;
pub mod tier;
pub mod transport;
pub mod transports;

// Re-export primary types for ergonomic imports.
pub use access::{resolve_access, AccessState, TierTables};
pub use admin::{AdminLookup, AdminStatusCache};
pub use backoff::BackoffPolicy;
pub use config::{AdminCacheConfig, RealtimeConfig, TierGateConfig, TierResolverConfig};
pub use error::{Result, TierGateError};
pub use protocol::{EventMask, TableSubscription};
pub use realtime::{CacheInvalidator, RealtimeManager};
#[cfg(feature = "http")]
pub use sources::{HttpAdminLookup, HttpTierSource};
pub use state::{ConnectionState, ConnectionStatus, SubscribeStatus};
pub use tier::{
    StaticTierSource, Subscriber, SubscriptionStatus, SubscriptionTier, TierMetadataStore,
    TierProvenance, TierRecord, TierResolution, TierResolver, TierSource,
};
pub use transport::{Connector, Transport};
#[cfg(feature = "transport-websocket")]
pub use transports::{WebSocketConnector, WebSocketTransport};
