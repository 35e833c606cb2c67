// ── Capability set interning ──
//
// Fleets of identical devices advertise identical capability sets.
// Interning hands every session with the same set the same `Arc`.
// The cache only holds weak references, so a set lives exactly as long
// as some session refers to it.

use std::hash::{BuildHasher, RandomState};
use std::sync::{Arc, LazyLock, Weak};

use dashmap::DashMap;
use netconf_proto::CapabilitySet;

static GLOBAL: LazyLock<CapabilityCache> = LazyLock::new(CapabilityCache::new);

/// Deduplicates structurally equal capability sets.
#[derive(Debug, Default)]
pub struct CapabilityCache {
    /// Buckets keyed by set hash; collisions share a bucket.
    sets: DashMap<u64, Vec<Weak<CapabilitySet>>>,
    hasher: RandomState,
}

impl CapabilityCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide cache used by sessions.
    pub fn global() -> &'static Self {
        &GLOBAL
    }

    /// Return the shared instance equal to `set`, inserting it if new.
    pub fn intern(&self, set: CapabilitySet) -> Arc<CapabilitySet> {
        self.purge_unused();

        let mut bucket = self.sets.entry(self.hasher.hash_one(&set)).or_default();
        if let Some(existing) = bucket
            .iter()
            .filter_map(Weak::upgrade)
            .find(|shared| **shared == set)
        {
            return existing;
        }
        let shared = Arc::new(set);
        bucket.push(Arc::downgrade(&shared));
        shared
    }

    /// Whether a live session still shares a set equal to `set`.
    pub fn contains(&self, set: &CapabilitySet) -> bool {
        self.sets
            .get(&self.hasher.hash_one(set))
            .is_some_and(|bucket| {
                bucket
                    .iter()
                    .filter_map(Weak::upgrade)
                    .any(|shared| *shared == *set)
            })
    }

    /// Forget entries whose sets have been dropped.
    pub fn purge_unused(&self) {
        self.sets.retain(|_, bucket| {
            bucket.retain(|weak| weak.strong_count() > 0);
            !bucket.is_empty()
        });
    }

    /// Number of sets still referenced by someone.
    pub fn len(&self) -> usize {
        self.sets
            .iter()
            .map(|bucket| {
                bucket
                    .value()
                    .iter()
                    .filter(|weak| weak.strong_count() > 0)
                    .count()
            })
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netconf_proto::ProtocolCapability;

    fn set(extra: bool) -> CapabilitySet {
        let mut set = CapabilitySet::client_defaults();
        if extra {
            set.insert(ProtocolCapability::Candidate);
        }
        set
    }

    #[test]
    fn equal_sets_share_one_instance() {
        let cache = CapabilityCache::new();
        let a = cache.intern(set(true));
        let b = cache.intern(set(true));
        let c = cache.intern(set(false));

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn dropped_sets_are_released() {
        let cache = CapabilityCache::new();
        let kept = cache.intern(set(true));
        drop(cache.intern(set(false)));

        assert_eq!(cache.len(), 1);
        assert!(!cache.contains(&set(false)));
        assert!(Arc::ptr_eq(&kept, &cache.intern(set(true))));

        drop(kept);
        assert!(cache.is_empty());
        cache.purge_unused();
        assert!(cache.sets.is_empty());
    }

    #[test]
    fn interning_sweeps_dead_entries() {
        let cache = CapabilityCache::new();
        for _ in 0..3 {
            drop(cache.intern(set(false)));
        }
        let _live = cache.intern(set(true));
        assert_eq!(cache.sets.len(), 1);
    }
}
