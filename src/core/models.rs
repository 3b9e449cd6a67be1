use crate::core::error::FetchError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub type EntityId = String;

// The remote schema is not contractually fixed, so snapshots stay a loose
// key/value map rather than a typed struct.
pub type StatusSnapshot = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRef {
    pub id: EntityId,
    pub rank: i64,
}

impl EntityRef {
    pub fn new(id: impl Into<EntityId>, rank: i64) -> Self {
        Self {
            id: id.into(),
            rank,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepCheckpoint {
    pub cursor_index: usize,
    pub total_processed: u64,
    pub total_errors: u64,
    pub entity_count: usize,
    pub last_updated: Option<DateTime<Utc>>,
}

impl Default for SweepCheckpoint {
    fn default() -> Self {
        Self {
            cursor_index: 0,
            total_processed: 0,
            total_errors: 0,
            entity_count: 0,
            last_updated: None,
        }
    }
}

impl SweepCheckpoint {
    // A checkpoint is only meaningful against the entity list it was taken
    // from. If the directory changed shape, the position is discarded
    // wholesale rather than reconciled.
    pub fn matches(&self, entity_count: usize) -> bool {
        self.entity_count == entity_count && self.cursor_index <= entity_count
    }
}

#[derive(Debug)]
pub struct DemandUpdate {
    pub entity_id: EntityId,
    pub result: Result<StatusSnapshot, FetchError>,
}

pub fn current_value(snapshot: &StatusSnapshot) -> Value {
    snapshot
        .get("current")
        .or_else(|| snapshot.get("score"))
        .cloned()
        .unwrap_or(Value::Null)
}
