//! Subscription tier resolution.
//!
//! A user's tier can come from several backends. [`TierResolver`] asks them in
//! one fixed precedence order (admin override, then Whop, then Beehiiv) and
//! takes the first *active* record. A source that fails or times out is
//! skipped and recorded in [`TierResolution::failures`]; when nothing applies
//! the user is `free`. Resolution never fails for a known email, so gating code
//! always gets an answer and the least-privileged one when backends are down.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::TierResolverConfig;
use crate::error::{Result, TierGateError};

/// Normalise an email for lookups and cache keys: trimmed and lower-cased.
///
/// Returns `None` for an empty or blank email.
pub fn normalize_email(email: &str) -> Option<String> {
    let trimmed = email.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_lowercase())
    }
}

// ── Enums ───────────────────────────────────────────────────────────

/// Subscription tier, ordered from least to most privileged.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionTier {
    #[default]
    Free,
    Paid,
    Premium,
}

impl SubscriptionTier {
    /// All tiers in ascending order.
    pub const ALL: [SubscriptionTier; 3] = [Self::Free, Self::Paid, Self::Premium];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Paid => "paid",
            Self::Premium => "premium",
        }
    }
}

impl fmt::Display for SubscriptionTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a resolved tier came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TierProvenance {
    /// Admin-set override table.
    Admin,
    /// Whop purchase/membership records.
    Whop,
    /// Beehiiv subscription API.
    Beehiiv,
    /// No source applied; the free fallback.
    #[serde(rename = "none")]
    Fallback,
}

impl TierProvenance {
    /// Lower ranks are consulted first.
    pub fn precedence(self) -> u8 {
        match self {
            Self::Admin => 0,
            Self::Whop => 1,
            Self::Beehiiv => 2,
            Self::Fallback => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Whop => "whop",
            Self::Beehiiv => "beehiiv",
            Self::Fallback => "none",
        }
    }
}

impl fmt::Display for TierProvenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Billing status reported by a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    #[default]
    Active,
    Trialing,
    PastDue,
    Canceled,
    Expired,
    Inactive,
    /// Any status this crate does not know.
    #[serde(other)]
    Unknown,
}

impl SubscriptionStatus {
    /// Only active and trialing subscriptions grant their tier.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Active | Self::Trialing)
    }
}

// ── Records ─────────────────────────────────────────────────────────

/// One source's answer for an email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierRecord {
    pub tier: SubscriptionTier,
    #[serde(default)]
    pub status: SubscriptionStatus,
    /// Source-specific identifier of what granted the tier (plan id, product).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_provenance: Option<String>,
}

impl TierRecord {
    pub fn new(tier: SubscriptionTier, status: SubscriptionStatus) -> Self {
        Self {
            tier,
            status,
            raw_provenance: None,
        }
    }

    #[must_use]
    pub fn with_raw_provenance(mut self, raw: impl Into<String>) -> Self {
        self.raw_provenance = Some(raw.into());
        self
    }
}

/// A subscriber row as stored by the backends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscriber {
    pub id: String,
    pub email: String,
    pub subscription_tier: SubscriptionTier,
    #[serde(default)]
    pub status: SubscriptionStatus,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
}

impl Subscriber {
    /// The tier record this row stands for.
    pub fn record(&self) -> TierRecord {
        TierRecord::new(self.subscription_tier, self.status).with_raw_provenance(self.id.clone())
    }
}

/// A source that failed during a resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceFailure {
    pub source: TierProvenance,
    pub message: String,
    /// Whether asking again later may succeed.
    pub transient: bool,
}

/// Result of resolving one email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TierResolution {
    pub tier: SubscriptionTier,
    pub source: TierProvenance,
    /// Sources that could not be consulted. Non-empty means the tier may be
    /// lower than the user's real one.
    pub failures: Vec<SourceFailure>,
}

impl TierResolution {
    /// The free fallback.
    pub fn free() -> Self {
        Self {
            tier: SubscriptionTier::Free,
            source: TierProvenance::Fallback,
            failures: Vec::new(),
        }
    }

    /// Returns `true` if at least one source failed.
    pub fn is_degraded(&self) -> bool {
        !self.failures.is_empty()
    }
}

// ── Seams ───────────────────────────────────────────────────────────

/// A backend that knows the tier of some emails.
#[async_trait]
pub trait TierSource: Send + Sync + 'static {
    /// Which backend this is; decides its position in the lookup order.
    fn provenance(&self) -> TierProvenance;

    /// Look up a normalised email. `Ok(None)` means the email is unknown here.
    async fn lookup(&self, email: &str) -> Result<Option<TierRecord>>;
}

/// Receives every resolution, e.g. to denormalise it into user metadata.
///
/// The resolver only writes to it; access decisions never read it back.
#[async_trait]
pub trait TierMetadataStore: Send + Sync + 'static {
    async fn persist(&self, email: &str, resolution: &TierResolution) -> Result<()>;
}

/// A source serving a fixed set of subscriber rows.
///
/// ```
/// use tiergate::tier::{StaticTierSource, Subscriber, SubscriptionStatus, SubscriptionTier, TierProvenance};
///
/// let overrides = StaticTierSource::new(TierProvenance::Admin).with_subscriber(Subscriber {
///     id: "1".into(),
///     email: "Owner@Example.com".into(),
///     subscription_tier: SubscriptionTier::Premium,
///     status: SubscriptionStatus::Active,
///     created_at: String::new(),
///     updated_at: String::new(),
/// });
/// assert_eq!(overrides.len(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct StaticTierSource {
    provenance: TierProvenance,
    subscribers: HashMap<String, Subscriber>,
}

impl StaticTierSource {
    pub fn new(provenance: TierProvenance) -> Self {
        Self {
            provenance,
            subscribers: HashMap::new(),
        }
    }

    /// Add a row. Rows with a blank email are ignored; a later row for the
    /// same email replaces the earlier one.
    #[must_use]
    pub fn with_subscriber(mut self, subscriber: Subscriber) -> Self {
        if let Some(key) = normalize_email(&subscriber.email) {
            self.subscribers.insert(key, subscriber);
        }
        self
    }

    #[must_use]
    pub fn with_subscribers(self, subscribers: impl IntoIterator<Item = Subscriber>) -> Self {
        subscribers
            .into_iter()
            .fold(self, |source, s| source.with_subscriber(s))
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}

#[async_trait]
impl TierSource for StaticTierSource {
    fn provenance(&self) -> TierProvenance {
        self.provenance
    }

    async fn lookup(&self, email: &str) -> Result<Option<TierRecord>> {
        Ok(normalize_email(email)
            .and_then(|key| self.subscribers.get(&key))
            .map(Subscriber::record))
    }
}

// ── Resolver ────────────────────────────────────────────────────────

/// Resolves an email to one tier from the registered sources.
///
/// # Example
///
/// ```
/// # async fn example() -> tiergate::Result<()> {
/// use tiergate::config::TierResolverConfig;
/// use tiergate::tier::{StaticTierSource, SubscriptionTier, TierProvenance, TierResolver};
///
/// let resolver = TierResolver::new(TierResolverConfig::default())
///     .with_source(StaticTierSource::new(TierProvenance::Whop));
/// let resolution = resolver.resolve("nobody@example.com").await?;
/// assert_eq!(resolution.tier, SubscriptionTier::Free);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct TierResolver {
    config: TierResolverConfig,
    sources: Vec<Arc<dyn TierSource>>,
    store: Option<Arc<dyn TierMetadataStore>>,
}

impl TierResolver {
    pub fn new(config: TierResolverConfig) -> Self {
        Self {
            config,
            sources: Vec::new(),
            store: None,
        }
    }

    /// Register a source. Sources are consulted by precedence, not by
    /// registration order; sources of equal provenance keep their order.
    #[must_use]
    pub fn with_source(mut self, source: impl TierSource) -> Self {
        self.sources.push(Arc::new(source));
        self.sources.sort_by_key(|s| s.provenance().precedence());
        self
    }

    /// Forward every resolution to `store`.
    #[must_use]
    pub fn with_metadata_store(mut self, store: impl TierMetadataStore) -> Self {
        self.store = Some(Arc::new(store));
        self
    }

    /// Provenances of the registered sources in lookup order.
    pub fn source_order(&self) -> Vec<TierProvenance> {
        self.sources.iter().map(|s| s.provenance()).collect()
    }

    /// Resolve the tier of `email`.
    ///
    /// # Errors
    ///
    /// Returns [`TierGateError::MissingEmail`] for an empty or blank email.
    /// Source failures are recorded in the resolution instead.
    pub async fn resolve(&self, email: &str) -> Result<TierResolution> {
        let email = normalize_email(email).ok_or(TierGateError::MissingEmail)?;
        let mut failures = Vec::new();
        let mut found = None;

        for source in &self.sources {
            let provenance = source.provenance();
            match tokio::time::timeout(self.config.lookup_timeout, source.lookup(&email)).await {
                Ok(Ok(Some(record))) if record.status.is_active() => {
                    found = Some((record.tier, provenance));
                    break;
                }
                Ok(Ok(Some(record))) => {
                    debug!(%email, source = %provenance, status = ?record.status, "inactive tier record skipped");
                }
                Ok(Ok(None)) => {
                    debug!(%email, source = %provenance, "email unknown to tier source");
                }
                Ok(Err(e)) => {
                    warn!(%email, source = %provenance, "tier lookup failed: {e}");
                    failures.push(SourceFailure {
                        source: provenance,
                        message: e.to_string(),
                        transient: e.is_transient(),
                    });
                }
                Err(_) => {
                    warn!(
                        %email,
                        source = %provenance,
                        timeout_ms = self.config.lookup_timeout.as_millis() as u64,
                        "tier lookup timed out"
                    );
                    failures.push(SourceFailure {
                        source: provenance,
                        message: TierGateError::Timeout.to_string(),
                        transient: true,
                    });
                }
            }
        }

        let resolution = match found {
            Some((tier, source)) => TierResolution {
                tier,
                source,
                failures,
            },
            None => TierResolution {
                failures,
                ..TierResolution::free()
            },
        };
        info!(
            %email,
            tier = %resolution.tier,
            source = %resolution.source,
            failed_sources = resolution.failures.len(),
            "tier resolved"
        );

        if let Some(store) = &self.store {
            if let Err(e) = store.persist(&email, &resolution).await {
                warn!(%email, "failed to persist tier metadata: {e}");
            }
        }
        Ok(resolution)
    }
}

impl fmt::Debug for TierResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TierResolver")
            .field("config", &self.config)
            .field("sources", &self.source_order())
            .field("has_store", &self.store.is_some())
            .finish()
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
    use std::sync::Mutex;
    use std::time::Duration;

    fn subscriber(email: &str, tier: SubscriptionTier, status: SubscriptionStatus) -> Subscriber {
        Subscriber {
            id: format!("sub-{email}"),
            email: email.into(),
            subscription_tier: tier,
            status,
            created_at: "2026-01-01T00:00:00Z".into(),
            updated_at: "2026-01-01T00:00:00Z".into(),
        }
    }

    struct FailingSource(TierProvenance, u16);

    #[async_trait]
    impl TierSource for FailingSource {
        fn provenance(&self) -> TierProvenance {
            self.0
        }
        async fn lookup(&self, _email: &str) -> Result<Option<TierRecord>> {
            Err(TierGateError::Http {
                status: self.1,
                message: "backend down".into(),
            })
        }
    }

    struct SlowSource;

    #[async_trait]
    impl TierSource for SlowSource {
        fn provenance(&self) -> TierProvenance {
            TierProvenance::Whop
        }
        async fn lookup(&self, _email: &str) -> Result<Option<TierRecord>> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Some(TierRecord::new(
                SubscriptionTier::Premium,
                SubscriptionStatus::Active,
            )))
        }
    }

    #[derive(Clone, Default)]
    struct RecordingStore(Arc<Mutex<Vec<(String, SubscriptionTier)>>>);

    #[async_trait]
    impl TierMetadataStore for RecordingStore {
        async fn persist(&self, email: &str, resolution: &TierResolution) -> Result<()> {
            self.0
                .lock()
                .unwrap()
                .push((email.to_string(), resolution.tier));
            Ok(())
        }
    }

    struct BrokenStore;

    #[async_trait]
    impl TierMetadataStore for BrokenStore {
        async fn persist(&self, _email: &str, _resolution: &TierResolution) -> Result<()> {
            Err(TierGateError::TransportClosed)
        }
    }

    #[test]
    fn tiers_are_ordered() {
        assert!(SubscriptionTier::Free < SubscriptionTier::Paid);
        assert!(SubscriptionTier::Paid < SubscriptionTier::Premium);
        assert_eq!(
            serde_json::to_string(&SubscriptionTier::Premium).unwrap(),
            "\"premium\""
        );
    }

    #[test]
    fn unknown_status_deserializes() {
        let status: SubscriptionStatus = serde_json::from_str("\"paused\"").unwrap();
        assert_eq!(status, SubscriptionStatus::Unknown);
        assert!(!status.is_active());
        assert!(SubscriptionStatus::Trialing.is_active());
    }

    #[test]
    fn fallback_provenance_serializes_as_none() {
        assert_eq!(
            serde_json::to_string(&TierProvenance::Fallback).unwrap(),
            "\"none\""
        );
    }

    #[test]
    fn normalize_email_trims_and_lowercases() {
        assert_eq!(
            normalize_email("  Ann@Example.COM ").as_deref(),
            Some("ann@example.com")
        );
        assert_eq!(normalize_email("   "), None);
    }

    #[tokio::test]
    async fn blank_email_is_missing() {
        let resolver = TierResolver::new(TierResolverConfig::default());
        let err = resolver.resolve("  ").await.unwrap_err();
        assert!(matches!(err, TierGateError::MissingEmail));
    }

    #[tokio::test]
    async fn unknown_email_is_free() {
        let resolver = TierResolver::new(TierResolverConfig::default())
            .with_source(StaticTierSource::new(TierProvenance::Admin))
            .with_source(StaticTierSource::new(TierProvenance::Beehiiv));
        let resolution = resolver.resolve("nobody@example.com").await.unwrap();
        assert_eq!(resolution, TierResolution::free());
    }

    #[tokio::test]
    async fn admin_override_wins_regardless_of_registration_order() {
        let email = "ann@example.com";
        let resolver = TierResolver::new(TierResolverConfig::default())
            .with_source(StaticTierSource::new(TierProvenance::Beehiiv).with_subscriber(
                subscriber(email, SubscriptionTier::Paid, SubscriptionStatus::Active),
            ))
            .with_source(StaticTierSource::new(TierProvenance::Admin).with_subscriber(
                subscriber(email, SubscriptionTier::Premium, SubscriptionStatus::Active),
            ));

        assert_eq!(
            resolver.source_order(),
            vec![TierProvenance::Admin, TierProvenance::Beehiiv]
        );
        let resolution = resolver.resolve("ANN@example.com").await.unwrap();
        assert_eq!(resolution.tier, SubscriptionTier::Premium);
        assert_eq!(resolution.source, TierProvenance::Admin);
    }

    #[tokio::test]
    async fn inactive_record_falls_through() {
        let email = "bob@example.com";
        let resolver = TierResolver::new(TierResolverConfig::default())
            .with_source(StaticTierSource::new(TierProvenance::Whop).with_subscriber(
                subscriber(email, SubscriptionTier::Premium, SubscriptionStatus::Canceled),
            ))
            .with_source(StaticTierSource::new(TierProvenance::Beehiiv).with_subscriber(
                subscriber(email, SubscriptionTier::Paid, SubscriptionStatus::Active),
            ));
        let resolution = resolver.resolve(email).await.unwrap();
        assert_eq!(resolution.tier, SubscriptionTier::Paid);
        assert_eq!(resolution.source, TierProvenance::Beehiiv);
        assert!(!resolution.is_degraded());
    }

    #[tokio::test]
    async fn failing_source_is_recorded_and_skipped() {
        let email = "cy@example.com";
        let resolver = TierResolver::new(TierResolverConfig::default())
            .with_source(FailingSource(TierProvenance::Whop, 503))
            .with_source(StaticTierSource::new(TierProvenance::Beehiiv).with_subscriber(
                subscriber(email, SubscriptionTier::Paid, SubscriptionStatus::Active),
            ));
        let resolution = resolver.resolve(email).await.unwrap();
        assert_eq!(resolution.tier, SubscriptionTier::Paid);
        assert_eq!(resolution.failures.len(), 1);
        assert_eq!(resolution.failures[0].source, TierProvenance::Whop);
        assert!(resolution.failures[0].transient);
    }

    #[tokio::test]
    async fn all_sources_failing_falls_back_to_free() {
        let resolver = TierResolver::new(TierResolverConfig::default())
            .with_source(FailingSource(TierProvenance::Admin, 500))
            .with_source(FailingSource(TierProvenance::Beehiiv, 403));
        let resolution = resolver.resolve("dee@example.com").await.unwrap();
        assert_eq!(resolution.tier, SubscriptionTier::Free);
        assert_eq!(resolution.source, TierProvenance::Fallback);
        assert_eq!(resolution.failures.len(), 2);
        assert!(!resolution.failures[1].transient);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_source_times_out() {
        let resolver = TierResolver::new(
            TierResolverConfig::default().with_lookup_timeout(Duration::from_secs(2)),
        )
        .with_source(SlowSource);
        let resolution = resolver.resolve("eve@example.com").await.unwrap();
        assert_eq!(resolution.tier, SubscriptionTier::Free);
        assert_eq!(resolution.failures[0].message, "operation timed out");
    }

    #[tokio::test]
    async fn resolution_is_persisted_with_normalised_email() {
        let store = RecordingStore::default();
        let resolver = TierResolver::new(TierResolverConfig::default())
            .with_metadata_store(store.clone());
        resolver.resolve(" Fay@Example.com").await.unwrap();
        assert_eq!(
            *store.0.lock().unwrap(),
            vec![("fay@example.com".to_string(), SubscriptionTier::Free)]
        );
    }

    #[tokio::test]
    async fn store_failure_does_not_fail_resolution() {
        let resolver =
            TierResolver::new(TierResolverConfig::default()).with_metadata_store(BrokenStore);
        assert!(resolver.resolve("gus@example.com").await.is_ok());
    }
}
