//! Decision cache.

use crate::authorizer::{AccessCheck, AccessDecision};
use lru::LruCache;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Cache key for a single access check.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// User ID.
    pub user_id: String,
    /// Resource type.
    pub resource: String,
    /// Action.
    pub action: String,
    /// Resource instance.
    pub resource_id: Option<String>,
    /// Canonical serialization of the request context.
    pub context: String,
}

impl CacheKey {
    /// Builds the key for a check.
    pub fn for_check(user_id: &str, check: &AccessCheck) -> Self {
        // Context maps are key-ordered, so the serialization is canonical.
        let context = if check.context.is_empty() {
            String::new()
        } else {
            serde_json::to_string(&check.context).unwrap_or_default()
        };

        Self {
            user_id: user_id.to_string(),
            resource: check.resource.clone(),
            action: check.action.clone(),
            resource_id: check.resource_id.clone(),
            context,
        }
    }
}

struct CacheEntry {
    decision: AccessDecision,
    cached_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        self.cached_at.elapsed() >= self.ttl
    }
}

/// Cache statistics.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    /// Cache hits.
    pub hits: u64,
    /// Cache misses.
    pub misses: u64,
    /// Entries dropped by invalidation or expiry.
    pub evictions: u64,
    /// Current entries.
    pub entries: usize,
}

impl CacheStats {
    /// Returns the hit rate.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// TTL and LRU bounded cache of access decisions.
pub struct DecisionCache {
    entries: RwLock<LruCache<CacheKey, CacheEntry>>,
    default_ttl: Duration,
    stats: RwLock<CacheStats>,
    /// Bumped by every invalidation, under the entries write lock.
    epoch: AtomicU64,
}

impl DecisionCache {
    /// Creates a cache.
    pub fn new(max_entries: usize, default_ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);

        Self {
            entries: RwLock::new(LruCache::new(capacity)),
            default_ttl,
            stats: RwLock::new(CacheStats::default()),
            epoch: AtomicU64::new(0),
        }
    }

    /// Returns the default TTL.
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Returns a live cached decision.
    pub fn get(&self, key: &CacheKey) -> Option<AccessDecision> {
        let mut entries = self.entries.write();
        let mut stats = self.stats.write();

        match entries.get(key) {
            Some(entry) if !entry.is_expired() => {
                stats.hits += 1;
                Some(entry.decision.clone())
            }
            Some(_) => {
                entries.pop(key);
                stats.misses += 1;
                stats.evictions += 1;
                None
            }
            None => {
                stats.misses += 1;
                None
            }
        }
    }

    /// Caches a decision. A zero TTL is not stored.
    pub fn put(&self, key: CacheKey, decision: AccessDecision, ttl: Duration) {
        self.put_if_current(key, decision, ttl, self.epoch());
    }

    /// Returns the invalidation epoch. Capture it before evaluating a
    /// decision and hand it to [`put_if_current`](Self::put_if_current).
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Caches a decision unless an invalidation happened since `epoch`.
    /// Returns true if the decision was stored.
    pub fn put_if_current(&self, key: CacheKey, decision: AccessDecision, ttl: Duration, epoch: u64) -> bool {
        if ttl.is_zero() {
            return false;
        }

        let mut entries = self.entries.write();
        if self.epoch.load(Ordering::Acquire) != epoch {
            return false;
        }

        let entry = CacheEntry {
            decision,
            cached_at: Instant::now(),
            ttl,
        };
        if entries.push(key, entry).is_some() {
            self.stats.write().evictions += 1;
        }
        true
    }

    /// Drops every entry for a user.
    pub fn invalidate_user(&self, user_id: &str) -> usize {
        self.remove_where(|key| key.user_id == user_id)
    }

    /// Drops every entry for a set of users.
    pub fn invalidate_users<S: AsRef<str>>(&self, user_ids: &[S]) -> usize {
        let users: HashSet<&str> = user_ids.iter().map(AsRef::as_ref).collect();
        self.remove_where(|key| users.contains(key.user_id.as_str()))
    }

    /// Drops every entry.
    pub fn clear(&self) -> usize {
        let mut entries = self.entries.write();
        self.epoch.fetch_add(1, Ordering::AcqRel);
        let removed = entries.len();
        entries.clear();
        self.stats.write().evictions += removed as u64;
        removed
    }

    /// Drops expired entries.
    pub fn purge_expired(&self) -> usize {
        let mut entries = self.entries.write();
        let expired: Vec<CacheKey> = entries
            .iter()
            .filter(|(_, entry)| entry.is_expired())
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            entries.pop(key);
        }
        self.stats.write().evictions += expired.len() as u64;
        expired.len()
    }

    /// Returns the number of cached entries, live or not yet purged.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns cache statistics.
    pub fn stats(&self) -> CacheStats {
        let mut stats = self.stats.read().clone();
        stats.entries = self.len();
        stats
    }

    fn remove_where(&self, predicate: impl Fn(&CacheKey) -> bool) -> usize {
        let mut entries = self.entries.write();
        self.epoch.fetch_add(1, Ordering::AcqRel);
        let doomed: Vec<CacheKey> = entries
            .iter()
            .filter(|(key, _)| predicate(key))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &doomed {
            entries.pop(key);
        }
        self.stats.write().evictions += doomed.len() as u64;
        doomed.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn key(user: &str) -> CacheKey {
        CacheKey::for_check(user, &AccessCheck::new("conversation", "read"))
    }

    #[test]
    fn test_put_and_get() {
        let cache = DecisionCache::new(10, Duration::from_secs(60));
        cache.put(key("u1"), AccessDecision::denied("nope"), cache.default_ttl());

        let hit = cache.get(&key("u1")).unwrap();
        assert!(!hit.allowed);
        assert!(cache.get(&key("u2")).is_none());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
    }

    #[test]
    fn test_context_is_part_of_key() {
        let base = AccessCheck::new("conversation", "create");
        let mine = CacheKey::for_check("u1", &base.clone().with_context("ownerId", json!("u1")));
        let theirs = CacheKey::for_check("u1", &base.with_context("ownerId", json!("u2")));
        assert_ne!(mine, theirs);

        let a = AccessCheck::new("x", "y")
            .with_context("a", json!(1))
            .with_context("b", json!(2));
        let b = AccessCheck::new("x", "y")
            .with_context("b", json!(2))
            .with_context("a", json!(1));
        assert_eq!(CacheKey::for_check("u1", &a), CacheKey::for_check("u1", &b));
    }

    #[test]
    fn test_expiry() {
        let cache = DecisionCache::new(10, Duration::from_secs(60));
        cache.put(key("u1"), AccessDecision::denied("nope"), Duration::from_millis(1));
        std::thread::sleep(Duration::from_millis(5));

        assert!(cache.get(&key("u1")).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_zero_ttl_not_stored() {
        let cache = DecisionCache::new(10, Duration::from_secs(60));
        cache.put(key("u1"), AccessDecision::denied("nope"), Duration::ZERO);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_invalidation() {
        let cache = DecisionCache::new(10, Duration::from_secs(60));
        for user in ["u1", "u2", "u3"] {
            cache.put(key(user), AccessDecision::denied("nope"), cache.default_ttl());
        }

        assert_eq!(cache.invalidate_user("u1"), 1);
        assert_eq!(cache.invalidate_users(&["u2", "u9"]), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.clear(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_put_skipped_after_invalidation() {
        let cache = DecisionCache::new(10, Duration::from_secs(60));
        let epoch = cache.epoch();
        cache.invalidate_user("u1");

        assert!(!cache.put_if_current(key("u1"), AccessDecision::allowed("stale"), cache.default_ttl(), epoch));
        assert!(cache.is_empty());

        let epoch = cache.epoch();
        assert!(cache.put_if_current(key("u1"), AccessDecision::allowed("fresh"), cache.default_ttl(), epoch));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_lru_bound() {
        let cache = DecisionCache::new(2, Duration::from_secs(60));
        for user in ["u1", "u2", "u3"] {
            cache.put(key(user), AccessDecision::denied("nope"), cache.default_ttl());
        }

        assert_eq!(cache.len(), 2);
        assert!(cache.get(&key("u1")).is_none());
    }

    #[test]
    fn test_purge_expired() {
        let cache = DecisionCache::new(10, Duration::from_secs(60));
        cache.put(key("u1"), AccessDecision::denied("nope"), Duration::from_millis(1));
        cache.put(key("u2"), AccessDecision::denied("nope"), Duration::from_secs(60));
        std::thread::sleep(Duration::from_millis(5));

        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
    }
}
