use crate::{checkpoint::Checkpoint, records::record::Record, records::schema::Schema};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A bounded group of records sharing one schema, moved as a single unit
/// between pipeline stages.
///
/// Batches are immutable once emitted by a stage: downstream stages build a
/// new batch instead of mutating the one they received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataBatch {
    pub schema: Schema,
    pub records: Vec<Record>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<Checkpoint>,
}

impl DataBatch {
    pub fn new(schema: Schema, records: Vec<Record>) -> Self {
        Self {
            schema,
            records,
            metadata: HashMap::new(),
            checkpoint: None,
        }
    }

    pub fn with_checkpoint(mut self, checkpoint: Checkpoint) -> Self {
        self.checkpoint = Some(checkpoint);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn size_bytes(&self) -> usize {
        self.records.iter().map(Record::size_bytes).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{data_type::DataType, value::Value};
    use crate::records::schema::Column;

    #[test]
    fn empty_iff_no_records() {
        let schema = Schema::new(vec![Column::new("id", DataType::Int)]);
        let batch = DataBatch::new(schema.clone(), vec![]);
        assert!(batch.is_empty());
        assert_eq!(batch.len(), 0);

        let batch = DataBatch::new(schema, vec![Record::new(vec![Value::Int(1)])]);
        assert!(!batch.is_empty());
        assert_eq!(batch.len(), 1);
    }
}
