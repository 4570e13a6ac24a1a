//! 画像读缓存
//!
//! Read-through TTL cache for profile listings served to callers. The
//! pipeline always reads the store directly.
//!
//! Every invalidation bumps a per-user generation. A reader records the
//! generation before it reads the store and its `put` is dropped if an
//! invalidation landed in between, so a snapshot taken before a commit can
//! never be cached after it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::models::ProfileEntry;

type UserKey = (String, String);

struct CacheEntry {
    value: Arc<Vec<ProfileEntry>>,
    created_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.created_at.elapsed() > ttl
    }
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<UserKey, CacheEntry>,
    generations: HashMap<UserKey, u64>,
}

impl CacheState {
    fn generation(&self, key: &UserKey) -> u64 {
        self.generations.get(key).copied().unwrap_or(0)
    }
}

#[derive(Clone)]
pub struct ProfileCache {
    ttl: Duration,
    state: Arc<RwLock<CacheState>>,
}

fn user_key(project_id: &str, user_id: &str) -> UserKey {
    (project_id.to_string(), user_id.to_string())
}

impl ProfileCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            state: Arc::new(RwLock::new(CacheState::default())),
        }
    }

    pub async fn get(&self, project_id: &str, user_id: &str) -> Option<Arc<Vec<ProfileEntry>>> {
        let key = user_key(project_id, user_id);
        {
            let state = self.state.read().await;
            match state.entries.get(&key) {
                Some(entry) if !entry.is_expired(self.ttl) => return Some(entry.value.clone()),
                Some(_) => {}
                None => return None,
            }
        }
        // expired
        self.state.write().await.entries.remove(&key);
        None
    }

    /// Current invalidation generation for a user. Take it before reading
    /// the store and hand it back to [`Self::put`].
    pub async fn generation(&self, project_id: &str, user_id: &str) -> u64 {
        self.state.read().await.generation(&user_key(project_id, user_id))
    }

    /// Cache `profiles` read at `generation`. The value is returned either
    /// way but only stored if no invalidation happened since.
    pub async fn put(
        &self,
        project_id: &str,
        user_id: &str,
        generation: u64,
        profiles: Vec<ProfileEntry>,
    ) -> Arc<Vec<ProfileEntry>> {
        let value = Arc::new(profiles);
        let key = user_key(project_id, user_id);
        let mut state = self.state.write().await;
        if state.generation(&key) != generation {
            tracing::debug!("Skipping stale profile snapshot for {}/{}", project_id, user_id);
            return value;
        }
        state.entries.insert(
            key,
            CacheEntry {
                value: value.clone(),
                created_at: Instant::now(),
            },
        );
        value
    }

    pub async fn invalidate(&self, project_id: &str, user_id: &str) {
        let key = user_key(project_id, user_id);
        let mut state = self.state.write().await;
        state.entries.remove(&key);
        *state.generations.entry(key).or_default() += 1;
    }

    /// Drop every expired entry.
    pub async fn purge_expired(&self) -> usize {
        let mut state = self.state.write().await;
        let before = state.entries.len();
        state.entries.retain(|_, entry| !entry.is_expired(self.ttl));
        before - state.entries.len()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProfileAttributes;

    fn profiles() -> Vec<ProfileEntry> {
        vec![ProfileEntry::new("u1", "p1", "Gus", &ProfileAttributes::new("basic_info", "name"))]
    }

    #[tokio::test]
    async fn test_put_get_invalidate() {
        let cache = ProfileCache::new(Duration::from_secs(60));
        assert!(cache.get("p1", "u1").await.is_none());

        let generation = cache.generation("p1", "u1").await;
        cache.put("p1", "u1", generation, profiles()).await;
        assert_eq!(cache.get("p1", "u1").await.unwrap().len(), 1);
        assert!(cache.get("p2", "u1").await.is_none());

        cache.invalidate("p1", "u1").await;
        assert!(cache.get("p1", "u1").await.is_none());
    }

    #[tokio::test]
    async fn test_put_after_invalidation_is_dropped() {
        let cache = ProfileCache::new(Duration::from_secs(60));
        let generation = cache.generation("p1", "u1").await;

        // a commit lands while the reader is still loading
        cache.invalidate("p1", "u1").await;
        let served = cache.put("p1", "u1", generation, profiles()).await;

        assert_eq!(served.len(), 1);
        assert!(cache.get("p1", "u1").await.is_none());

        // other users are unaffected
        let other = cache.generation("p1", "u2").await;
        cache.put("p1", "u2", other, profiles()).await;
        assert!(cache.get("p1", "u2").await.is_some());
    }

    #[tokio::test]
    async fn test_entries_expire() {
        let cache = ProfileCache::new(Duration::from_millis(10));
        cache.put("p1", "u1", 0, profiles()).await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(cache.get("p1", "u1").await.is_none());
        cache.put("p1", "u2", 0, profiles()).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(cache.purge_expired().await, 1);
        assert_eq!(cache.len().await, 0);
    }
}
