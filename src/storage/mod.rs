use crate::core::{current_value, StatusSnapshot, SweepCheckpoint};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::HashMap;
use tokio::sync::RwLock;

pub const ENTITY_COLLECTION: &str = "entities";
pub const STATE_COLLECTION: &str = "app_state";
pub const CHECKPOINT_DOC_ID: &str = "sweep_checkpoint";

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get_document(&self, collection: &str, id: &str) -> Result<Option<Value>>;

    // With merge, top-level fields of `value` are layered over the existing
    // document; without, the document is replaced.
    async fn set_document(&self, collection: &str, id: &str, value: Value, merge: bool)
        -> Result<()>;
}

pub struct MemoryStore {
    documents: RwLock<HashMap<(String, String), Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            documents: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get_document(&self, collection: &str, id: &str) -> Result<Option<Value>> {
        let documents = self.documents.read().await;
        Ok(documents
            .get(&(collection.to_string(), id.to_string()))
            .cloned())
    }

    async fn set_document(
        &self,
        collection: &str,
        id: &str,
        value: Value,
        merge: bool,
    ) -> Result<()> {
        let key = (collection.to_string(), id.to_string());
        let mut documents = self.documents.write().await;

        if merge {
            if let (Some(Value::Object(existing)), Value::Object(incoming)) =
                (documents.get_mut(&key), &value)
            {
                for (field, field_value) in incoming {
                    existing.insert(field.clone(), field_value.clone());
                }
                return Ok(());
            }
        }

        documents.insert(key, value);
        Ok(())
    }
}

pub async fn load_checkpoint(store: &dyn DocumentStore) -> Result<Option<SweepCheckpoint>> {
    let document = store
        .get_document(STATE_COLLECTION, CHECKPOINT_DOC_ID)
        .await
        .context("Failed to load sweep checkpoint")?;

    let Some(document) = document else {
        return Ok(None);
    };

    match serde_json::from_value(document) {
        Ok(checkpoint) => Ok(Some(checkpoint)),
        Err(e) => {
            // Unreadable checkpoints are equivalent to none: the sweep starts over
            tracing::warn!(error = %e, "Discarding malformed sweep checkpoint");
            Ok(None)
        }
    }
}

pub async fn save_checkpoint(store: &dyn DocumentStore, checkpoint: &SweepCheckpoint) -> Result<()> {
    let value = serde_json::to_value(checkpoint).context("Failed to serialize checkpoint")?;
    store
        .set_document(STATE_COLLECTION, CHECKPOINT_DOC_ID, value, true)
        .await
        .context("Failed to save sweep checkpoint")
}

pub async fn persist_entity_record(
    store: &dyn DocumentStore,
    entity_id: &str,
    snapshot: &StatusSnapshot,
) -> Result<()> {
    let record = json!({
        "status_current": current_value(snapshot),
        "status_snapshot": Value::Object(snapshot.clone()),
        "status_updated_at": Utc::now(),
    });

    store
        .set_document(ENTITY_COLLECTION, entity_id, record, true)
        .await
        .with_context(|| format!("Failed to persist record for entity {entity_id}"))
}
