use async_trait::async_trait;
use engine_core::plugin::{
    Plugin, PluginConfig, PluginError, PluginMetadata, PluginType, ProcessorPlugin,
};
use model::{
    progress::ProcessStats,
    records::{batch::DataBatch, schema::Schema},
};
use serde_json::json;
use std::{collections::HashMap, time::Instant};

/// Renames columns according to a `{old name: new name}` mapping. Record
/// values pass through untouched; only the schema changes.
pub struct MappingProcessor {
    field_mappings: HashMap<String, String>,
    stats: ProcessStats,
    started: Option<Instant>,
}

impl MappingProcessor {
    pub fn new() -> Self {
        Self {
            field_mappings: HashMap::new(),
            stats: ProcessStats::default(),
            started: None,
        }
    }

    fn rename(&self, name: &str) -> String {
        self.field_mappings
            .get(name)
            .cloned()
            .unwrap_or_else(|| name.to_owned())
    }

    fn map_schema(&self, schema: &Schema) -> Schema {
        let columns = schema
            .columns
            .iter()
            .map(|column| {
                let mut column = column.clone();
                column.name = self.rename(&column.name);
                column
            })
            .collect();

        let primary_keys = schema
            .primary_keys
            .iter()
            .map(|key| self.rename(key))
            .collect();

        Schema {
            columns,
            primary_keys,
        }
    }
}

impl Default for MappingProcessor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Plugin for MappingProcessor {
    fn name(&self) -> &str {
        "mapping"
    }

    fn plugin_type(&self) -> PluginType {
        PluginType::Processor
    }

    fn initialize(&mut self, config: &PluginConfig) -> Result<(), PluginError> {
        let mappings = config
            .get("field_mappings")
            .and_then(|v| v.as_object())
            .ok_or_else(|| PluginError::InvalidConfig("field_mappings is required".into()))?;

        self.field_mappings.clear();
        for (old_name, new_name) in mappings {
            let new_name = new_name.as_str().ok_or_else(|| {
                PluginError::InvalidConfig(format!("mapping for '{old_name}' must be a string"))
            })?;
            self.field_mappings
                .insert(old_name.clone(), new_name.to_owned());
        }

        self.stats = ProcessStats::default();
        self.started = Some(Instant::now());
        Ok(())
    }

    fn validate(&self) -> Result<(), PluginError> {
        if self.field_mappings.is_empty() {
            return Err(PluginError::InvalidConfig(
                "at least one field mapping is required".into(),
            ));
        }
        Ok(())
    }

    fn metadata(&self) -> PluginMetadata {
        PluginMetadata {
            name: "mapping".into(),
            plugin_type: PluginType::Processor,
            version: "1.0.0".into(),
            description: "Renames columns via a field mapping".into(),
            config_schema: json!({
                "type": "object",
                "properties": {
                    "field_mappings": {
                        "type": "object",
                        "description": "Old column name to new column name",
                        "additionalProperties": {"type": "string"}
                    }
                },
                "required": ["field_mappings"]
            }),
        }
    }
}

#[async_trait]
impl ProcessorPlugin for MappingProcessor {
    async fn process(&mut self, batch: &DataBatch) -> Result<DataBatch, PluginError> {
        self.stats.records_in += batch.len() as u64;
        self.stats.records_out += batch.len() as u64;

        let mut output = DataBatch::new(self.map_schema(&batch.schema), batch.records.clone());
        output.metadata = batch.metadata.clone();
        output.checkpoint = batch.checkpoint.clone();
        Ok(output)
    }

    fn stats(&self) -> ProcessStats {
        let mut stats = self.stats;
        if let Some(started) = self.started {
            stats.duration = started.elapsed();
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::{
        core::{data_type::DataType, value::Value},
        records::{record::Record, schema::Column},
    };
    use serde_json::Map;

    #[tokio::test]
    async fn renames_columns_and_primary_keys() {
        let mut config = Map::new();
        config.insert(
            "field_mappings".into(),
            json!({"name": "full_name", "city": "location"}),
        );
        let mut processor = MappingProcessor::new();
        processor.initialize(&config).expect("initialize");

        let schema = Schema::new(vec![
            Column::new("name", DataType::String),
            Column::new("city", DataType::String),
            Column::new("age", DataType::Int),
        ])
        .with_primary_keys(vec!["name".into()]);
        let batch = DataBatch::new(
            schema,
            vec![Record::new(vec![
                Value::String("Alice".into()),
                Value::String("NYC".into()),
                Value::Int(25),
            ])],
        );

        let output = processor.process(&batch).await.expect("process");
        assert_eq!(
            output.schema.column_names(),
            vec!["full_name", "location", "age"]
        );
        assert_eq!(output.schema.primary_keys, vec!["full_name".to_owned()]);
        assert_eq!(output.records, batch.records);
    }

    #[test]
    fn empty_mapping_fails_validation() {
        let processor = MappingProcessor::new();
        assert!(processor.validate().is_err());
    }
}
