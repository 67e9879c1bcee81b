use crate::file::csv::infer_value;
use async_trait::async_trait;
use engine_core::plugin::{
    config_bool_or, config_str, config_str_or, InputPlugin, Plugin, PluginConfig, PluginError,
    PluginMetadata, PluginType,
};
use model::{
    checkpoint::Checkpoint,
    core::data_type::DataType,
    progress::Progress,
    records::{batch::DataBatch, record::Record, schema::Column, schema::Schema},
};
use serde_json::json;
use std::fs::File;
use tracing::debug;

/// Reads record batches out of a delimited text file. Every batch carries a
/// row-offset checkpoint so an interrupted sync can resume.
pub struct CsvInput {
    path: String,
    has_header: bool,
    delimiter: u8,
    reader: Option<csv::Reader<File>>,
    schema: Option<Schema>,
    current_row: u64,
    exhausted: bool,
    progress: Progress,
}

impl CsvInput {
    pub fn new() -> Self {
        Self {
            path: String::new(),
            has_header: true,
            delimiter: b',',
            reader: None,
            schema: None,
            current_row: 0,
            exhausted: false,
            progress: Progress::started_now(),
        }
    }

    fn schema_from_header(header: &csv::StringRecord) -> Schema {
        let columns = header
            .iter()
            .map(|name| Column::new(name.trim(), DataType::String))
            .collect();
        Schema::new(columns)
    }

    fn schema_from_width(width: usize) -> Schema {
        let columns = (0..width)
            .map(|index| Column::new(format!("col_{index}"), DataType::String))
            .collect();
        Schema::new(columns)
    }
}

impl Default for CsvInput {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Plugin for CsvInput {
    fn name(&self) -> &str {
        "csv"
    }

    fn plugin_type(&self) -> PluginType {
        PluginType::Input
    }

    fn initialize(&mut self, config: &PluginConfig) -> Result<(), PluginError> {
        self.path = config_str(config, "path")?;
        self.has_header = config_bool_or(config, "has_header", true);

        let delimiter = config_str_or(config, "delimiter", ",");
        self.delimiter = *delimiter
            .as_bytes()
            .first()
            .ok_or_else(|| PluginError::InvalidConfig("delimiter must not be empty".into()))?;

        self.progress = Progress::started_now();
        Ok(())
    }

    fn validate(&self) -> Result<(), PluginError> {
        if self.path.is_empty() {
            return Err(PluginError::InvalidConfig("path is required".into()));
        }
        Ok(())
    }

    fn metadata(&self) -> PluginMetadata {
        PluginMetadata {
            name: "csv".into(),
            plugin_type: PluginType::Input,
            version: "1.0.0".into(),
            description: "Reads records from a delimited text file".into(),
            config_schema: json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "Path to the CSV file"},
                    "has_header": {"type": "boolean", "default": true},
                    "delimiter": {"type": "string", "default": ","}
                },
                "required": ["path"]
            }),
        }
    }

    async fn close(&mut self) -> Result<(), PluginError> {
        self.reader = None;
        Ok(())
    }
}

#[async_trait]
impl InputPlugin for CsvInput {
    async fn connect(&mut self) -> Result<(), PluginError> {
        let file = File::open(&self.path)?;
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .delimiter(self.delimiter)
            .trim(csv::Trim::Fields)
            .from_reader(file);

        if self.has_header {
            let mut header = csv::StringRecord::new();
            if reader
                .read_record(&mut header)
                .map_err(|err| PluginError::Read(err.to_string()))?
            {
                self.schema = Some(Self::schema_from_header(&header));
            } else {
                self.exhausted = true;
            }
        }

        self.reader = Some(reader);
        self.current_row = 0;
        debug!(path = %self.path, has_header = self.has_header, "Opened CSV input");
        Ok(())
    }

    async fn read_batch(&mut self, batch_size: usize) -> Result<Option<DataBatch>, PluginError> {
        let reader = self.reader.as_mut().ok_or(PluginError::NotConnected)?;
        if self.exhausted {
            return Ok(None);
        }

        let mut records = Vec::new();
        let mut row = csv::StringRecord::new();

        while records.len() < batch_size {
            let has_row = reader
                .read_record(&mut row)
                .map_err(|err| PluginError::Read(err.to_string()))?;
            if !has_row {
                self.exhausted = true;
                break;
            }

            if self.schema.is_none() {
                self.schema = Some(Self::schema_from_width(row.len()));
            }

            let values = row.iter().map(infer_value).collect();
            records.push(
                Record::new(values).with_metadata("row_number", self.current_row.to_string()),
            );
            self.current_row += 1;
        }

        if records.is_empty() {
            return Ok(None);
        }

        self.progress.record_processed(records.len() as u64, 0);

        let schema = self
            .schema
            .clone()
            .unwrap_or_else(|| Self::schema_from_width(0));
        let checkpoint = Checkpoint::new(json!(self.current_row)).with_metadata("file", &self.path);

        Ok(Some(
            DataBatch::new(schema, records)
                .with_metadata("source", "csv")
                .with_metadata("file", &self.path)
                .with_checkpoint(checkpoint),
        ))
    }

    fn has_next(&self) -> bool {
        !self.exhausted
    }

    fn progress(&self) -> Progress {
        self.progress.clone()
    }
}
