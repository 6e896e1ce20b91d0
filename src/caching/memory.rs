use std::collections::HashMap;
use std::time::{Instant, SystemTime};

use super::{CacheKey, Freshness};

/// A payload held in the in-memory tier.
#[derive(Debug, Clone)]
struct MemoryEntry<P> {
    payload: P,
    /// The codec-reported cost in bytes.
    cost: u64,
    /// Wall-clock time of the original insertion, used by the freshness
    /// predicate. Promotions from colder tiers carry the colder tier's
    /// insertion time.
    cached_at: SystemTime,
    /// Updated on every hit; drives LRU eviction.
    accessed_at: Instant,
}

/// The hot tier: an in-memory map with cost accounting and LRU eviction.
///
/// `total_cost` tracks the exact sum of entry costs. A `put` that pushes the
/// tier over its limit purges down to 75 % of the limit, so that a steady
/// stream of writes near the limit does not evict on every insertion.
#[derive(Debug)]
pub(crate) struct MemoryTier<K, P> {
    entries: HashMap<K, MemoryEntry<P>>,
    limit: u64,
    total_cost: u64,
}

impl<K: CacheKey, P: Clone> MemoryTier<K, P> {
    pub fn new(limit: u64) -> Self {
        MemoryTier {
            entries: HashMap::new(),
            limit,
            total_cost: 0,
        }
    }

    /// Looks up a payload, touching its access stamp on a hit.
    ///
    /// Entries failing the freshness predicate are left in place; a later
    /// lookup with laxer constraints may still use them.
    pub fn get(&mut self, key: &K, freshness: &Freshness) -> Option<P> {
        let entry = self.entries.get_mut(key)?;
        if !freshness.passes(entry.cached_at) {
            return None;
        }
        entry.accessed_at = Instant::now();
        Some(entry.payload.clone())
    }

    /// Inserts a payload, replacing and re-accounting any previous entry.
    pub fn put(&mut self, key: K, payload: P, cost: u64, cached_at: SystemTime) {
        if let Some(old) = self.entries.remove(&key) {
            self.total_cost = self.total_cost.saturating_sub(old.cost);
        }
        self.entries.insert(
            key,
            MemoryEntry {
                payload,
                cost,
                cached_at,
                accessed_at: Instant::now(),
            },
        );
        self.total_cost += cost;
        if self.total_cost > self.limit {
            self.purge_to(self.limit * 3 / 4);
        }
    }

    pub fn remove(&mut self, key: &K) {
        if let Some(entry) = self.entries.remove(key) {
            self.total_cost = self.total_cost.saturating_sub(entry.cost);
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.total_cost = 0;
    }

    /// Evicts least-recently-accessed entries until `total_cost <= target`.
    pub fn purge_to(&mut self, target: u64) {
        if self.total_cost <= target {
            return;
        }
        let mut by_age: Vec<(K, Instant)> = self
            .entries
            .iter()
            .map(|(key, entry)| (key.clone(), entry.accessed_at))
            .collect();
        by_age.sort_by_key(|(_, accessed_at)| *accessed_at);

        let before = self.total_cost;
        for (key, _) in by_age {
            if self.total_cost <= target {
                break;
            }
            self.remove(&key);
        }
        tracing::debug!(
            evicted = before - self.total_cost,
            remaining = self.total_cost,
            "purged in-memory cache",
        );
    }

    pub fn total_cost(&self) -> u64 {
        self.total_cost
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use std::thread::sleep;
    use std::time::Duration;

    use super::*;

    fn tier(limit: u64) -> MemoryTier<&'static str, Vec<u8>> {
        MemoryTier::new(limit)
    }

    #[test]
    fn test_cost_accounting() {
        let mut tier = tier(u64::MAX);
        tier.put("a", vec![0; 10], 10, SystemTime::now());
        tier.put("b", vec![0; 20], 20, SystemTime::now());
        assert_eq!(tier.total_cost(), 30);

        // Overwriting re-accounts instead of double-counting.
        tier.put("a", vec![0; 5], 5, SystemTime::now());
        assert_eq!(tier.total_cost(), 25);

        tier.remove(&"b");
        assert_eq!(tier.total_cost(), 5);
        tier.remove(&"b");
        assert_eq!(tier.total_cost(), 5);

        tier.clear();
        assert_eq!(tier.total_cost(), 0);
        assert_eq!(tier.len(), 0);
    }

    #[test]
    fn test_purge_evicts_least_recently_accessed() {
        let mut tier = tier(2300);
        tier.put("a", vec![0; 800], 800, SystemTime::now());
        sleep(Duration::from_millis(5));
        tier.put("b", vec![0; 800], 800, SystemTime::now());
        sleep(Duration::from_millis(5));
        tier.put("c", vec![0; 800], 800, SystemTime::now());

        // 2400 > 2300 purges down to 1725, dropping only the oldest entry.
        assert_eq!(tier.get(&"a", &Freshness::default()), None);
        assert!(tier.get(&"b", &Freshness::default()).is_some());
        assert!(tier.get(&"c", &Freshness::default()).is_some());
        assert_eq!(tier.total_cost(), 1600);
    }

    #[test]
    fn test_purge_target_is_three_quarters_of_the_limit() {
        // 803 is not divisible by 4; the drawdown target is 803 * 3 / 4 =
        // 602, which depends on the division order.
        let mut tier: MemoryTier<String, Vec<u8>> = MemoryTier::new(803);
        for i in 0..804 {
            tier.put(format!("k{i}"), vec![0], 1, SystemTime::now());
        }
        assert_eq!(tier.total_cost(), 803 * 3 / 4);
        assert_eq!(tier.total_cost(), 602);
    }

    #[test]
    fn test_read_refreshes_eviction_order() {
        let mut tier = tier(2300);
        tier.put("a", vec![0; 800], 800, SystemTime::now());
        sleep(Duration::from_millis(5));
        tier.put("b", vec![0; 800], 800, SystemTime::now());
        sleep(Duration::from_millis(5));

        // Touch "a" so "b" becomes the eviction candidate.
        assert!(tier.get(&"a", &Freshness::default()).is_some());
        sleep(Duration::from_millis(5));
        tier.put("c", vec![0; 800], 800, SystemTime::now());

        assert!(tier.get(&"a", &Freshness::default()).is_some());
        assert_eq!(tier.get(&"b", &Freshness::default()), None);
        assert!(tier.get(&"c", &Freshness::default()).is_some());
    }

    #[test]
    fn test_stale_entry_is_skipped_but_kept() {
        let mut tier = tier(u64::MAX);
        let yesterday = SystemTime::now() - Duration::from_secs(86400);
        tier.put("k", b"v".to_vec(), 1, yesterday);

        let strict = Freshness {
            max_age: Some(Duration::from_secs(60)),
            newer_than: None,
        };
        assert_eq!(tier.get(&"k", &strict), None);
        // Still present for laxer lookups.
        assert!(tier.get(&"k", &Freshness::default()).is_some());
        assert_eq!(tier.total_cost(), 1);
    }
}
