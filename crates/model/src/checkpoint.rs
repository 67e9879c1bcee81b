use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A durable position record for one (job, stage) pair.
///
/// The position token is stage-defined: a byte offset, a row index, an LSN,
/// a message offset. The manager stamps `timestamp` at persist time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub position: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

impl Checkpoint {
    pub fn new(position: serde_json::Value) -> Self {
        Self {
            position,
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    pub fn at_offset(offset: u64) -> Self {
        Self::new(serde_json::json!(offset))
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}
