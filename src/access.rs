//! Combined access state used to gate dashboard features.
//!
//! Tier and admin status load independently and may finish in either order, so
//! both are optional here and every check fails closed while its input is
//! still missing.

use serde::Deserialize;

use crate::admin::{AdminLookup, AdminStatusCache};
use crate::config::RealtimeConfig;
use crate::error::Result;
use crate::protocol::TableSubscription;
use crate::tier::{SubscriptionTier, TierResolution, TierResolver};

/// What is known so far about the current user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessState {
    /// `None` while the tier is loading.
    pub tier: Option<TierResolution>,
    /// `None` while the admin check is loading.
    pub is_admin: Option<bool>,
}

impl AccessState {
    /// Returns `true` until both values have resolved.
    pub fn is_loading(&self) -> bool {
        self.tier.is_none() || self.is_admin.is_none()
    }

    /// The resolved tier, if any.
    pub fn tier(&self) -> Option<SubscriptionTier> {
        self.tier.as_ref().map(|resolution| resolution.tier)
    }

    /// Whether a feature that needs `required` may be shown.
    pub fn can_access(&self, required: SubscriptionTier) -> bool {
        self.tier().is_some_and(|tier| tier >= required)
    }

    /// Whether privileged admin UI may be shown.
    pub fn can_administer(&self) -> bool {
        self.is_admin == Some(true)
    }
}

/// Resolve tier and admin status for `email` concurrently.
///
/// # Errors
///
/// Returns [`TierGateError::MissingEmail`](crate::TierGateError::MissingEmail)
/// for a blank email; every backend failure is absorbed into the state.
pub async fn resolve_access<L: AdminLookup>(
    resolver: &TierResolver,
    admins: &AdminStatusCache<L>,
    email: &str,
) -> Result<AccessState> {
    let (tier, is_admin) = tokio::join!(resolver.resolve(email), admins.check_admin(email));
    Ok(AccessState {
        tier: Some(tier?),
        is_admin: Some(is_admin),
    })
}

/// Tables each tier may subscribe to. Higher tiers inherit the tables of the
/// lower ones.
///
/// ```
/// use tiergate::access::TierTables;
/// use tiergate::config::RealtimeConfig;
/// use tiergate::tier::SubscriptionTier;
///
/// let tables = TierTables::default()
///     .with_tables(SubscriptionTier::Free, ["newsletters"])
///     .with_tables(SubscriptionTier::Premium, ["telegram_messages"]);
/// let config = tables.realtime_config(SubscriptionTier::Paid, RealtimeConfig::new("dash"));
/// assert_eq!(config.tables.len(), 1);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TierTables {
    pub free: Vec<TableSubscription>,
    pub paid: Vec<TableSubscription>,
    pub premium: Vec<TableSubscription>,
}

impl TierTables {
    fn slot(&mut self, tier: SubscriptionTier) -> &mut Vec<TableSubscription> {
        match tier {
            SubscriptionTier::Free => &mut self.free,
            SubscriptionTier::Paid => &mut self.paid,
            SubscriptionTier::Premium => &mut self.premium,
        }
    }

    fn own(&self, tier: SubscriptionTier) -> &[TableSubscription] {
        match tier {
            SubscriptionTier::Free => &self.free,
            SubscriptionTier::Paid => &self.paid,
            SubscriptionTier::Premium => &self.premium,
        }
    }

    /// Add a table subscription available from `tier` upward.
    #[must_use]
    pub fn with_table(mut self, tier: SubscriptionTier, table: TableSubscription) -> Self {
        self.slot(tier).push(table);
        self
    }

    /// Add listeners for every change on each named `public` table.
    #[must_use]
    pub fn with_tables<I, S>(mut self, tier: SubscriptionTier, tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.slot(tier)
            .extend(tables.into_iter().map(TableSubscription::new));
        self
    }

    /// Every subscription `tier` may use, lowest tier first, without duplicates.
    pub fn tables_for(&self, tier: SubscriptionTier) -> Vec<TableSubscription> {
        let mut tables: Vec<TableSubscription> = Vec::new();
        for level in SubscriptionTier::ALL.into_iter().filter(|t| *t <= tier) {
            for table in self.own(level) {
                if !tables.contains(table) {
                    tables.push(table.clone());
                }
            }
        }
        tables
    }

    /// `base` with its tables replaced by the ones `tier` may use.
    pub fn realtime_config(&self, tier: SubscriptionTier, base: RealtimeConfig) -> RealtimeConfig {
        RealtimeConfig {
            tables: self.tables_for(tier),
            ..base
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
    use crate::config::{AdminCacheConfig, TierResolverConfig};
    use crate::tier::{
        StaticTierSource, Subscriber, SubscriptionStatus, TierProvenance, TierSource,
    };
    use crate::TierGateError;
    use async_trait::async_trait;

    struct Admins(&'static str);

    #[async_trait]
    impl AdminLookup for Admins {
        async fn is_admin(&self, email: &str) -> Result<bool> {
            Ok(email == self.0)
        }
    }

    fn premium(email: &str) -> impl TierSource {
        StaticTierSource::new(TierProvenance::Whop).with_subscriber(Subscriber {
            id: "w-1".into(),
            email: email.into(),
            subscription_tier: SubscriptionTier::Premium,
            status: SubscriptionStatus::Active,
            created_at: String::new(),
            updated_at: String::new(),
        })
    }

    #[test]
    fn loading_state_denies_everything() {
        let state = AccessState::default();
        assert!(state.is_loading());
        assert!(!state.can_access(SubscriptionTier::Free));
        assert!(!state.can_administer());
    }

    #[test]
    fn tier_gates_by_order() {
        let state = AccessState {
            tier: Some(TierResolution {
                tier: SubscriptionTier::Paid,
                ..TierResolution::free()
            }),
            is_admin: None,
        };
        assert!(state.can_access(SubscriptionTier::Free));
        assert!(state.can_access(SubscriptionTier::Paid));
        assert!(!state.can_access(SubscriptionTier::Premium));
        assert!(state.is_loading());
    }

    #[tokio::test]
    async fn resolve_access_combines_both_values() {
        let resolver =
            TierResolver::new(TierResolverConfig::default()).with_source(premium("ann@example.com"));
        let admins = AdminStatusCache::new(Admins("ann@example.com"), AdminCacheConfig::default());

        let state = resolve_access(&resolver, &admins, "Ann@Example.com")
            .await
            .unwrap();
        assert!(!state.is_loading());
        assert!(state.can_access(SubscriptionTier::Premium));
        assert!(state.can_administer());
    }

    #[tokio::test]
    async fn resolve_access_without_email_is_unauthenticated() {
        let resolver = TierResolver::new(TierResolverConfig::default());
        let admins = AdminStatusCache::new(Admins("ann@example.com"), AdminCacheConfig::default());
        let err = resolve_access(&resolver, &admins, "").await.unwrap_err();
        assert!(matches!(err, TierGateError::MissingEmail));
    }

    #[test]
    fn higher_tiers_inherit_tables() {
        let tables = TierTables::default()
            .with_tables(SubscriptionTier::Free, ["newsletters"])
            .with_tables(SubscriptionTier::Paid, ["highlights", "newsletters"])
            .with_tables(SubscriptionTier::Premium, ["telegram_messages"]);

        let names = |tier| -> Vec<String> {
            tables
                .tables_for(tier)
                .into_iter()
                .map(|t| t.table)
                .collect()
        };
        assert_eq!(names(SubscriptionTier::Free), vec!["newsletters"]);
        assert_eq!(names(SubscriptionTier::Paid), vec!["newsletters", "highlights"]);
        assert_eq!(
            names(SubscriptionTier::Premium),
            vec!["newsletters", "highlights", "telegram_messages"]
        );
    }

    #[test]
    fn realtime_config_keeps_base_settings() {
        let tables = TierTables::default().with_tables(SubscriptionTier::Free, ["newsletters"]);
        let base = RealtimeConfig::new("dash").with_access_token("jwt");
        let config = tables.realtime_config(SubscriptionTier::Premium, base);
        assert_eq!(config.channel_name, "dash");
        assert_eq!(config.access_token.as_deref(), Some("jwt"));
        assert_eq!(config.tables, vec![TableSubscription::new("newsletters")]);
    }
}
