use std::time::{Duration, Instant};

use dashmap::DashMap;

pub const DEFAULT_OVERRIDE_TTL: Duration = Duration::from_secs(15 * 60);
pub const DEFAULT_OVERRIDE_CAPACITY: usize = 10_000;

/// Short-lived record of candidates a human moved in this process.
///
/// Only a fast path: a miss says nothing, the persisted `manual_override`
/// flag stays authoritative.
pub struct OverrideCache {
    entries: DashMap<String, Instant>,
    ttl: Duration,
    capacity: usize,
}

impl Default for OverrideCache {
    fn default() -> Self {
        Self::new(DEFAULT_OVERRIDE_TTL, DEFAULT_OVERRIDE_CAPACITY)
    }
}

impl OverrideCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            capacity: capacity.max(1),
        }
    }

    pub fn insert(&self, candidate_id: &str) {
        if self.entries.len() >= self.capacity && !self.entries.contains_key(candidate_id) {
            self.purge_expired();
            if self.entries.len() >= self.capacity {
                self.evict_oldest();
            }
        }
        self.entries.insert(candidate_id.to_string(), Instant::now());
    }

    pub fn contains(&self, candidate_id: &str) -> bool {
        let expired = match self.entries.get(candidate_id) {
            Some(inserted) => inserted.elapsed() >= self.ttl,
            None => return false,
        };
        if expired {
            self.entries.remove(candidate_id);
        }
        !expired
    }

    pub fn remove(&self, candidate_id: &str) {
        self.entries.remove(candidate_id);
    }

    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, inserted| inserted.elapsed() < self.ttl);
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict_oldest(&self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|entry| *entry.value())
            .map(|entry| entry.key().clone());
        if let Some(key) = oldest {
            self.entries.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_expire_after_ttl() {
        let cache = OverrideCache::new(Duration::from_millis(20), 8);
        cache.insert("cand-1");
        assert!(cache.contains("cand-1"));

        std::thread::sleep(Duration::from_millis(40));
        assert!(!cache.contains("cand-1"));
        assert!(cache.is_empty());
    }

    #[test]
    fn capacity_evicts_the_oldest_entry() {
        let cache = OverrideCache::new(Duration::from_secs(60), 2);
        cache.insert("a");
        std::thread::sleep(Duration::from_millis(2));
        cache.insert("b");
        std::thread::sleep(Duration::from_millis(2));
        cache.insert("c");

        assert_eq!(cache.len(), 2);
        assert!(!cache.contains("a"));
        assert!(cache.contains("b"));
        assert!(cache.contains("c"));
    }

    #[test]
    fn removal_is_immediate() {
        let cache = OverrideCache::default();
        cache.insert("a");
        cache.remove("a");
        assert!(!cache.contains("a"));
    }
}
