use crate::analyzer::price_analysis::StatTable;
use crate::model::StorageError;
use crate::storage::SqliteStorage;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::hash::Hash;

pub const DEFAULT_TTL_MINUTES: i64 = 15;

/// Time source for cache expiry.
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

struct CachedEntry<V> {
    value: V,
    expires_at: DateTime<Utc>,
}

/// Keyed values that expire `ttl` after insertion.
pub struct StatsCache<K, V, C = SystemClock> {
    entries: HashMap<K, CachedEntry<V>>,
    ttl: Duration,
    clock: C,
}

impl<K: Eq + Hash, V> StatsCache<K, V, SystemClock> {
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, SystemClock)
    }
}

impl<K: Eq + Hash, V, C: Clock> StatsCache<K, V, C> {
    pub fn with_clock(ttl: Duration, clock: C) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
            clock,
        }
    }

    /// Live entry for `key`; an entry is dead once its expiry has passed.
    pub fn get(&self, key: &K) -> Option<&V> {
        let now = self.clock.now();
        self.entries
            .get(key)
            .filter(|entry| entry.expires_at >= now)
            .map(|entry| &entry.value)
    }

    pub fn insert(&mut self, key: K, value: V) {
        let now = self.clock.now();
        self.insert_stamped(key, value, now);
    }

    /// Inserts a value produced at `stamped_at`; it expires `ttl` after that.
    pub fn insert_stamped(&mut self, key: K, value: V, stamped_at: DateTime<Utc>) {
        let expires_at = stamped_at + self.ttl;
        self.entries.insert(key, CachedEntry { value, expires_at });
    }

    /// Drops expired entries and returns how many were removed.
    pub fn purge_expired(&mut self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at >= now);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }
}

impl<C: Clock> StatsCache<u32, StatTable, C> {
    /// Seeds the cache with stored stat tables still within the TTL of when they
    /// were computed. Returns how many windows were loaded.
    pub fn warm_from(
        &mut self,
        storage: &SqliteStorage,
        windows: &[u32],
    ) -> Result<usize, StorageError> {
        let now = self.clock.now();
        let mut loaded = 0;
        for &window_days in windows {
            let Some(computed_at) = storage.stats_computed_at(window_days)? else {
                continue;
            };
            if computed_at + self.ttl < now {
                continue;
            }
            let table = storage.load_stats(window_days)?;
            if table.is_empty() {
                continue;
            }
            self.insert_stamped(window_days, table, computed_at);
            loaded += 1;
        }
        Ok(loaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ConditionKey, StatGroup, StatKey, VariantKey};
    use chrono::TimeZone;
    use std::cell::Cell;

    struct ManualClock {
        now: Cell<DateTime<Utc>>,
    }

    impl ManualClock {
        fn new() -> Self {
            Self {
                now: Cell::new(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()),
            }
        }

        fn advance(&self, by: Duration) {
            self.now.set(self.now.get() + by);
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            self.now.get()
        }
    }

    #[test]
    fn entries_live_until_ttl_passes() {
        let mut cache = StatsCache::with_clock(Duration::minutes(15), ManualClock::new());
        cache.insert(60u32, "table");
        assert_eq!(cache.get(&60), Some(&"table"));

        cache.clock().advance(Duration::minutes(15));
        assert_eq!(cache.get(&60), Some(&"table"));

        cache.clock().advance(Duration::seconds(1));
        assert_eq!(cache.get(&60), None);
        assert_eq!(cache.get(&90), None);
    }

    #[test]
    fn reinsert_refreshes_expiry() {
        let mut cache = StatsCache::with_clock(Duration::minutes(10), ManualClock::new());
        cache.insert("a", 1);
        cache.clock().advance(Duration::minutes(8));
        cache.insert("a", 2);
        cache.clock().advance(Duration::minutes(8));
        assert_eq!(cache.get(&"a"), Some(&2));
    }

    #[test]
    fn purge_drops_only_expired() {
        let mut cache = StatsCache::with_clock(Duration::minutes(10), ManualClock::new());
        cache.insert("old", 1);
        cache.clock().advance(Duration::minutes(6));
        cache.insert("new", 2);
        cache.clock().advance(Duration::minutes(6));

        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&"new"), Some(&2));
    }

    fn stored_group(window_days: u32) -> StatGroup {
        StatGroup {
            key: StatKey {
                model_key: "newport 2".into(),
                variant: VariantKey::Any,
                condition: ConditionKey::Any,
                window_days,
            },
            n: 8,
            p10: 15000,
            p25: 18000,
            p50: 20000,
            p75: 24000,
            p90: 28000,
            dispersion_ratio: 0.65,
        }
    }

    #[test]
    fn warms_from_fresh_stored_stats_only() {
        let clock = ManualClock::new();
        let now = clock.now();
        let mut storage = SqliteStorage::open_in_memory().unwrap();
        storage
            .replace_stats(60, &[&stored_group(60)], now - Duration::minutes(5))
            .unwrap();
        storage
            .replace_stats(90, &[&stored_group(90)], now - Duration::minutes(30))
            .unwrap();

        let mut cache = StatsCache::with_clock(Duration::minutes(15), clock);
        assert_eq!(cache.warm_from(&storage, &[60, 90, 180]).unwrap(), 1);

        let table = cache.get(&60).unwrap();
        assert_eq!(table.window_days(), 60);
        assert_eq!(
            table.group("newport 2", VariantKey::Any, ConditionKey::Any).map(|g| g.p50),
            Some(20000)
        );
        assert!(cache.get(&90).is_none());

        // Expiry counts from when the stats were computed, not from warm-up.
        cache.clock().advance(Duration::minutes(11));
        assert!(cache.get(&60).is_none());
    }
}
