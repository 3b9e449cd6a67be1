use crate::core::EntityRef;
use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::RwLock;

#[async_trait]
pub trait EntityDirectory: Send + Sync {
    // Full ordered entity list, descending by rank.
    async fn list_entities(&self) -> Result<Vec<EntityRef>>;
}

// In-memory directory for tests and hosts whose roster lives elsewhere.
pub struct StaticDirectory {
    entities: RwLock<Vec<EntityRef>>,
}

impl StaticDirectory {
    pub fn new(entities: Vec<EntityRef>) -> Self {
        let mut entities = entities;
        entities.sort_by(|a, b| b.rank.cmp(&a.rank));
        Self {
            entities: RwLock::new(entities),
        }
    }

    pub async fn set_entities(&self, entities: Vec<EntityRef>) {
        let mut sorted = entities;
        sorted.sort_by(|a, b| b.rank.cmp(&a.rank));
        *self.entities.write().await = sorted;
    }
}

#[async_trait]
impl EntityDirectory for StaticDirectory {
    async fn list_entities(&self) -> Result<Vec<EntityRef>> {
        Ok(self.entities.read().await.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_entities_ordered_by_rank_descending() {
        let directory = StaticDirectory::new(vec![
            EntityRef::new("low", 1),
            EntityRef::new("high", 9),
            EntityRef::new("mid", 5),
        ]);

        let ids: Vec<_> = directory
            .list_entities()
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(ids, vec!["high", "mid", "low"]);
    }

    #[tokio::test]
    async fn test_set_entities_replaces_roster() {
        let directory = StaticDirectory::new(vec![EntityRef::new("a", 1)]);
        directory
            .set_entities(vec![EntityRef::new("b", 2), EntityRef::new("c", 3)])
            .await;

        let entities = directory.list_entities().await.unwrap();
        assert_eq!(entities.len(), 2);
        assert_eq!(entities[0].id, "c");
    }
}
