//! TTL cache for reputation snapshots
//!
//! A read within the expiry window never touches the backend; any successful
//! vote invalidates the target's entry so the next read is fresh.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::debug;

use crate::config::CacheConfig;
use crate::model::{ActorId, Reputation};

pub struct RepCache {
    enabled: bool,
    ttl: Duration,
    entries: DashMap<ActorId, (Reputation, Instant)>,
}

impl RepCache {
    pub fn new(cfg: &CacheConfig) -> Self {
        Self {
            enabled: cfg.enabled,
            ttl: Duration::from_secs(cfg.expire_secs.max(1)),
            entries: DashMap::new(),
        }
    }

    /// A cache that never holds anything (every read goes to the backend).
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ttl: Duration::ZERO,
            entries: DashMap::new(),
        }
    }

    pub fn get(&self, actor: &ActorId) -> Option<Reputation> {
        if !self.enabled {
            return None;
        }

        let entry = self.entries.get(actor)?;
        let (rep, fetched) = entry.value();
        if fetched.elapsed() < self.ttl {
            Some(rep.clone())
        } else {
            None
        }
    }

    pub fn put(&self, rep: Reputation) {
        if self.enabled {
            self.entries.insert(rep.id, (rep, Instant::now()));
        }
    }

    pub fn invalidate(&self, actor: &ActorId) {
        if self.entries.remove(actor).is_some() {
            debug!("Invalidated cached reputation for {}", actor);
        }
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn rep(id: ActorId) -> Reputation {
        Reputation {
            id,
            name: Some("alice".into()),
            likes: 1,
            dislikes: 0,
            score: 5.1,
            seen: true,
        }
    }

    #[test]
    fn fresh_entry_hits() {
        let cache = RepCache::new(&CacheConfig {
            enabled: true,
            expire_secs: 60,
        });
        let id = Uuid::new_v4();
        cache.put(rep(id));
        assert!(cache.get(&id).is_some());
    }

    #[test]
    fn disabled_cache_never_hits() {
        let cache = RepCache::disabled();
        let id = Uuid::new_v4();
        cache.put(rep(id));
        assert!(cache.get(&id).is_none());
    }

    #[test]
    fn invalidate_removes_entry() {
        let cache = RepCache::new(&CacheConfig {
            enabled: true,
            expire_secs: 60,
        });
        let id = Uuid::new_v4();
        cache.put(rep(id));
        cache.invalidate(&id);
        assert!(cache.get(&id).is_none());
    }

    #[test]
    fn unrelated_entries_survive_invalidation() {
        let cache = RepCache::new(&CacheConfig {
            enabled: true,
            expire_secs: 60,
        });
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        cache.put(rep(a));
        cache.put(rep(b));
        cache.invalidate(&a);
        assert!(cache.get(&b).is_some());
    }
}
