//! Cached "is this email an admin" answers.
//!
//! [`AdminStatusCache`] is an injected service, not a global. It serves a fresh
//! entry without I/O, shares one in-flight backend lookup between concurrent
//! callers for the same email, and fails closed: a failed or timed-out lookup
//! answers `false` and is not cached, so the next call asks again.
//!
//! There is no push invalidation. A demoted admin keeps the elevated answer for
//! at most the configured TTL unless [`AdminStatusCache::invalidate`] is called.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::AdminCacheConfig;
use crate::error::Result;
use crate::tier::normalize_email;

/// Backend answering whether an email belongs to an admin.
#[async_trait]
pub trait AdminLookup: Send + Sync + 'static {
    /// Look up a normalised email.
    async fn is_admin(&self, email: &str) -> Result<bool>;
}

#[derive(Debug, Clone, Copy)]
struct CacheEntry {
    is_admin: bool,
    cached_at: Instant,
}

type InFlight = Arc<OnceCell<bool>>;

/// TTL cache in front of an [`AdminLookup`].
pub struct AdminStatusCache<L: AdminLookup> {
    lookup: L,
    config: AdminCacheConfig,
    entries: Mutex<HashMap<String, CacheEntry>>,
    in_flight: Mutex<HashMap<String, InFlight>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // Map contents stay consistent across a panic in another holder.
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<L: AdminLookup> AdminStatusCache<L> {
    pub fn new(lookup: L, config: AdminCacheConfig) -> Self {
        Self {
            lookup,
            config,
            entries: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Whether `email` belongs to an admin.
    ///
    /// Never fails: a blank email, a backend error and a timeout all answer
    /// `false`.
    pub async fn check_admin(&self, email: &str) -> bool {
        let Some(key) = normalize_email(email) else {
            return false;
        };
        if let Some(hit) = self.cached(&key) {
            return hit;
        }

        let cell = Arc::clone(lock(&self.in_flight).entry(key.clone()).or_default());
        let is_admin = *cell.get_or_init(|| self.fetch(&key)).await;

        let mut in_flight = lock(&self.in_flight);
        if in_flight
            .get(&key)
            .is_some_and(|current| Arc::ptr_eq(current, &cell))
        {
            in_flight.remove(&key);
        }
        is_admin
    }

    /// The cached answer for `email` if it is still fresh. Performs no I/O.
    pub fn cached(&self, email: &str) -> Option<bool> {
        let key = normalize_email(email)?;
        let entries = lock(&self.entries);
        entries
            .get(&key)
            .filter(|entry| entry.cached_at.elapsed() < self.config.ttl)
            .map(|entry| entry.is_admin)
    }

    /// Forget the answer for one email, e.g. after a role change.
    pub fn invalidate(&self, email: &str) {
        if let Some(key) = normalize_email(email) {
            if lock(&self.entries).remove(&key).is_some() {
                debug!(email = %key, "admin status invalidated");
            }
        }
    }

    /// Forget every answer.
    pub fn clear(&self) {
        lock(&self.entries).clear();
    }

    /// Number of stored entries, fresh or not.
    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.entries).is_empty()
    }

    async fn fetch(&self, key: &str) -> bool {
        // Another caller may have stored an answer between our cache check
        // and the creation of this lookup.
        if let Some(hit) = self.cached(key) {
            return hit;
        }

        match tokio::time::timeout(self.config.lookup_timeout, self.lookup.is_admin(key)).await {
            Ok(Ok(is_admin)) => {
                debug!(email = %key, is_admin, "admin status fetched");
                self.store(key, is_admin);
                is_admin
            }
            Ok(Err(e)) => {
                warn!(email = %key, "admin lookup failed; treating as non-admin: {e}");
                false
            }
            Err(_) => {
                warn!(
                    email = %key,
                    timeout_ms = self.config.lookup_timeout.as_millis() as u64,
                    "admin lookup timed out; treating as non-admin"
                );
                false
            }
        }
    }

    fn store(&self, key: &str, is_admin: bool) {
        let now = Instant::now();
        let mut entries = lock(&self.entries);
        if !entries.contains_key(key) && entries.len() >= self.config.max_entries {
            let ttl = self.config.ttl;
            entries.retain(|_, entry| now.saturating_duration_since(entry.cached_at) < ttl);
            if entries.len() >= self.config.max_entries {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.cached_at)
                    .map(|(email, _)| email.clone());
                if let Some(oldest) = oldest {
                    debug!(email = %oldest, "admin cache full; evicting oldest entry");
                    entries.remove(&oldest);
                }
            }
        }
        entries.insert(
            key.to_string(),
            CacheEntry {
                is_admin,
                cached_at: now,
            },
        );
    }
}

impl<L: AdminLookup> std::fmt::Debug for AdminStatusCache<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminStatusCache")
            .field("config", &self.config)
            .field("entries", &self.len())
            .field("in_flight", &lock(&self.in_flight).len())
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
    use crate::TierGateError;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio_test::{assert_pending, assert_ready_eq, task};

    /// Answers from a fixed admin set after `delay`, counting calls.
    struct CountingLookup {
        admins: HashSet<String>,
        delay: Duration,
        fail: bool,
        calls: Arc<AtomicUsize>,
    }

    impl CountingLookup {
        fn new(admins: &[&str]) -> (Self, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    admins: admins.iter().map(|s| s.to_string()).collect(),
                    delay: Duration::from_millis(50),
                    fail: false,
                    calls: Arc::clone(&calls),
                },
                calls,
            )
        }
    }

    #[async_trait]
    impl AdminLookup for CountingLookup {
        async fn is_admin(&self, email: &str) -> Result<bool> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if self.fail {
                return Err(TierGateError::Http {
                    status: 500,
                    message: "boom".into(),
                });
            }
            Ok(self.admins.contains(email))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn second_call_is_served_from_cache() {
        let (lookup, calls) = CountingLookup::new(&["root@example.com"]);
        let cache = AdminStatusCache::new(lookup, AdminCacheConfig::default());

        assert!(cache.check_admin("root@example.com").await);
        assert!(cache.check_admin(" ROOT@example.com ").await);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.cached("root@example.com"), Some(true));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_share_one_lookup() {
        let (lookup, calls) = CountingLookup::new(&["root@example.com"]);
        let cache = AdminStatusCache::new(lookup, AdminCacheConfig::default());

        let results = futures_util::future::join_all(
            (0..16).map(|_| cache.check_admin("root@example.com")),
        )
        .await;

        assert!(results.into_iter().all(|r| r));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn pending_lookup_is_joined() {
        let (lookup, calls) = CountingLookup::new(&[]);
        let cache = AdminStatusCache::new(lookup, AdminCacheConfig::default());

        let mut first = task::spawn(cache.check_admin("user@example.com"));
        let mut second = task::spawn(cache.check_admin("user@example.com"));
        assert_pending!(first.poll());
        assert_pending!(second.poll());

        tokio::time::advance(Duration::from_millis(60)).await;
        assert_ready_eq!(first.poll(), false);
        assert_ready_eq!(second.poll(), false);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn entry_expires_after_ttl() {
        let ttl = Duration::from_secs(300);
        let (lookup, calls) = CountingLookup::new(&["root@example.com"]);
        let cache = AdminStatusCache::new(lookup, AdminCacheConfig::default().with_ttl(ttl));

        cache.check_admin("root@example.com").await;
        tokio::time::advance(ttl - Duration::from_millis(1)).await;
        assert_eq!(cache.cached("root@example.com"), Some(true));
        cache.check_admin("root@example.com").await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_millis(2)).await;
        assert_eq!(cache.cached("root@example.com"), None);
        cache.check_admin("root@example.com").await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_are_false_and_not_cached() {
        let (mut lookup, calls) = CountingLookup::new(&["root@example.com"]);
        lookup.fail = true;
        let cache = AdminStatusCache::new(lookup, AdminCacheConfig::default());

        assert!(!cache.check_admin("root@example.com").await);
        assert!(cache.is_empty());
        assert!(!cache.check_admin("root@example.com").await);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_lookup_times_out_as_false() {
        let (mut lookup, _calls) = CountingLookup::new(&["root@example.com"]);
        lookup.delay = Duration::from_secs(30);
        let cache = AdminStatusCache::new(
            lookup,
            AdminCacheConfig::default().with_lookup_timeout(Duration::from_secs(1)),
        );
        assert!(!cache.check_admin("root@example.com").await);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn blank_email_is_not_admin_and_not_looked_up() {
        let (lookup, calls) = CountingLookup::new(&[]);
        let cache = AdminStatusCache::new(lookup, AdminCacheConfig::default());
        assert!(!cache.check_admin("   ").await);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn invalidate_forces_a_new_lookup() {
        let (lookup, calls) = CountingLookup::new(&["root@example.com"]);
        let cache = AdminStatusCache::new(lookup, AdminCacheConfig::default());

        cache.check_admin("root@example.com").await;
        cache.invalidate("Root@Example.com");
        cache.check_admin("root@example.com").await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        cache.clear();
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn full_cache_evicts_oldest_entry() {
        let (lookup, _calls) = CountingLookup::new(&[]);
        let cache = AdminStatusCache::new(lookup, AdminCacheConfig::default().with_max_entries(2));

        cache.check_admin("a@example.com").await;
        cache.check_admin("b@example.com").await;
        cache.check_admin("c@example.com").await;

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.cached("a@example.com"), None);
        assert_eq!(cache.cached("c@example.com"), Some(false));
    }
}
