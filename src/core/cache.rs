use crate::core::models::{EntityId, StatusSnapshot};
use crate::core::settings::Settings;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

struct CacheEntry {
    snapshot: StatusSnapshot,
    fetched_at: Instant,
}

// Entries are never evicted; staleness is checked lazily at read time.
pub struct ResultCache {
    entries: RwLock<HashMap<EntityId, CacheEntry>>,
    ttl: Duration,
}

impl ResultCache {
    pub fn new(settings: &Settings) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl: settings.cache_ttl(),
        }
    }

    pub async fn get(&self, entity_id: &str) -> Option<StatusSnapshot> {
        let entries = self.entries.read().await;
        let entry = entries.get(entity_id)?;
        if entry.fetched_at.elapsed() < self.ttl {
            Some(entry.snapshot.clone())
        } else {
            None
        }
    }

    pub async fn is_fresh(&self, entity_id: &str) -> bool {
        let entries = self.entries.read().await;
        entries
            .get(entity_id)
            .is_some_and(|entry| entry.fetched_at.elapsed() < self.ttl)
    }

    pub async fn put(&self, entity_id: EntityId, snapshot: StatusSnapshot) {
        self.entries.write().await.insert(
            entity_id,
            CacheEntry {
                snapshot,
                fetched_at: Instant::now(),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snapshot(score: i64) -> StatusSnapshot {
        serde_json::from_value(json!({ "score": score })).unwrap()
    }

    #[tokio::test]
    async fn test_miss_on_unknown_entity() {
        let cache = ResultCache::new(&Settings::default());
        assert!(cache.get("1").await.is_none());
        assert!(!cache.is_fresh("1").await);
    }

    #[tokio::test]
    async fn test_fresh_entry_is_returned() {
        let cache = ResultCache::new(&Settings::default());
        cache.put("1".into(), snapshot(10)).await;

        assert_eq!(cache.get("1").await.unwrap(), snapshot(10));
        assert!(cache.is_fresh("1").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_entry_is_a_miss() {
        let cache = ResultCache::new(&Settings::default());
        cache.put("1".into(), snapshot(10)).await;

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(cache.get("1").await.is_none());
        assert!(!cache.is_fresh("1").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_put_refreshes_existing_entry() {
        let cache = ResultCache::new(&Settings::default());
        cache.put("1".into(), snapshot(10)).await;

        tokio::time::advance(Duration::from_secs(59)).await;
        cache.put("1".into(), snapshot(20)).await;

        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(cache.get("1").await.unwrap(), snapshot(20));
    }
}
