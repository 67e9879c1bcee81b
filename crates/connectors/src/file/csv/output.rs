use crate::file::csv::format_value;
use async_trait::async_trait;
use engine_core::plugin::{
    config_bool_or, config_str, config_str_or, OutputPlugin, Plugin, PluginConfig, PluginError,
    PluginMetadata, PluginType,
};
use model::{progress::WriteStats, records::batch::DataBatch};
use serde_json::json;
use std::{
    fs::{File, OpenOptions},
    time::Instant,
};
use tracing::debug;

/// Writes record batches to a delimited text file.
pub struct CsvOutput {
    path: String,
    delimiter: u8,
    write_header: bool,
    append: bool,
    header_written: bool,
    writer: Option<csv::Writer<File>>,
    stats: WriteStats,
    started: Option<Instant>,
}

impl CsvOutput {
    pub fn new() -> Self {
        Self {
            path: String::new(),
            delimiter: b',',
            write_header: true,
            append: false,
            header_written: false,
            writer: None,
            stats: WriteStats::default(),
            started: None,
        }
    }

    fn current_stats(&self) -> WriteStats {
        let mut stats = self.stats;
        if let Some(started) = self.started {
            stats.duration = started.elapsed();
        }
        stats
    }
}

impl Default for CsvOutput {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Plugin for CsvOutput {
    fn name(&self) -> &str {
        "csv"
    }

    fn plugin_type(&self) -> PluginType {
        PluginType::Output
    }

    fn initialize(&mut self, config: &PluginConfig) -> Result<(), PluginError> {
        self.path = config_str(config, "path")?;
        self.write_header = config_bool_or(config, "write_header", true);
        self.append = config_bool_or(config, "append", false);

        let delimiter = config_str_or(config, "delimiter", ",");
        self.delimiter = *delimiter
            .as_bytes()
            .first()
            .ok_or_else(|| PluginError::InvalidConfig("delimiter must not be empty".into()))?;

        self.stats = WriteStats::default();
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
            plugin_type: PluginType::Output,
            version: "1.0.0".into(),
            description: "Writes records to a delimited text file".into(),
            config_schema: json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "Path to the output file"},
                    "write_header": {"type": "boolean", "default": true},
                    "delimiter": {"type": "string", "default": ","},
                    "append": {"type": "boolean", "default": false}
                },
                "required": ["path"]
            }),
        }
    }

    async fn close(&mut self) -> Result<(), PluginError> {
        if let Some(mut writer) = self.writer.take() {
            writer
                .flush()
                .map_err(|err| PluginError::Write(err.to_string()))?;
        }
        Ok(())
    }
}

#[async_trait]
impl OutputPlugin for CsvOutput {
    async fn connect(&mut self) -> Result<(), PluginError> {
        let mut options = OpenOptions::new();
        options.create(true).write(true);
        if self.append {
            options.append(true);
            // Appending to an existing file: assume the header is in place.
            self.header_written = true;
        } else {
            options.truncate(true);
        }

        let file = options.open(&self.path)?;
        self.writer = Some(
            csv::WriterBuilder::new()
                .delimiter(self.delimiter)
                .from_writer(file),
        );
        self.started = Some(Instant::now());
        debug!(path = %self.path, append = self.append, "Opened CSV output");
        Ok(())
    }

    async fn write_batch(&mut self, batch: &DataBatch) -> Result<(), PluginError> {
        let writer = self.writer.as_mut().ok_or(PluginError::NotConnected)?;
        if batch.is_empty() {
            return Ok(());
        }

        if self.write_header && !self.header_written {
            let header: Vec<&str> = batch.schema.column_names();
            writer
                .write_record(&header)
                .map_err(|err| PluginError::Write(err.to_string()))?;
            self.header_written = true;
        }

        for record in &batch.records {
            let row: Vec<String> = record.values.iter().map(format_value).collect();
            writer.write_record(&row).map_err(|err| {
                self.stats.records_failed += 1;
                PluginError::Write(err.to_string())
            })?;
            self.stats.records_written += 1;
            self.stats.bytes_written += record.size_bytes() as u64;
        }

        Ok(())
    }

    async fn flush(&mut self) -> Result<(), PluginError> {
        if let Some(writer) = self.writer.as_mut() {
            writer
                .flush()
                .map_err(|err| PluginError::Write(err.to_string()))?;
        }
        Ok(())
    }

    fn write_stats(&self) -> WriteStats {
        self.current_stats()
    }
}
