pub mod registry;

use async_trait::async_trait;
use model::{
    progress::{ProcessStats, Progress, WriteStats},
    records::batch::DataBatch,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Untyped key/value configuration handed to a plugin at initialization.
///
/// Plugins are expected to populate a typed configuration record from this
/// mapping and reject unknown or ill-typed keys.
pub type PluginConfig = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginType {
    Input,
    Processor,
    Output,
}

impl PluginType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PluginType::Input => "input",
            PluginType::Processor => "processor",
            PluginType::Output => "output",
        }
    }
}

impl fmt::Display for PluginType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Descriptive metadata exposed by every plugin. The `config_schema` is an
/// advisory JSON-schema-style document for external validators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginMetadata {
    pub name: String,
    pub plugin_type: PluginType,
    pub version: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub config_schema: serde_json::Value,
}

#[derive(Debug, Error)]
pub enum PluginError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("plugin is not connected")]
    NotConnected,

    #[error("read failed: {0}")]
    Read(String),

    #[error("write failed: {0}")]
    Write(String),

    #[error("process failed: {0}")]
    Process(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

/// Behaviour common to every plugin kind.
///
/// `initialize` consumes the untyped config mapping; `validate` re-checks
/// the populated configuration; `close` releases external resources and is
/// called exactly once by the owning pipeline.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    fn plugin_type(&self) -> PluginType;

    fn initialize(&mut self, config: &PluginConfig) -> Result<(), PluginError>;

    fn validate(&self) -> Result<(), PluginError>;

    fn metadata(&self) -> PluginMetadata;

    async fn close(&mut self) -> Result<(), PluginError> {
        Ok(())
    }
}

/// A source of record batches.
#[async_trait]
pub trait InputPlugin: Plugin {
    /// Establish the external session (open the file, connect the socket).
    async fn connect(&mut self) -> Result<(), PluginError>;

    /// Read up to `batch_size` records. `Ok(None)` signals end-of-stream.
    async fn read_batch(&mut self, batch_size: usize) -> Result<Option<DataBatch>, PluginError>;

    /// Advisory only; `read_batch` returning `None` is authoritative.
    fn has_next(&self) -> bool;

    fn progress(&self) -> Progress;
}

/// A batch-to-batch transformation. Returning an empty batch filters the
/// input out of the stream.
#[async_trait]
pub trait ProcessorPlugin: Plugin {
    async fn process(&mut self, batch: &DataBatch) -> Result<DataBatch, PluginError>;

    fn stats(&self) -> ProcessStats;
}

/// A sink for record batches.
#[async_trait]
pub trait OutputPlugin: Plugin {
    async fn connect(&mut self) -> Result<(), PluginError>;

    async fn write_batch(&mut self, batch: &DataBatch) -> Result<(), PluginError>;

    /// Drain any buffered data. Called once after a successful run.
    async fn flush(&mut self) -> Result<(), PluginError>;

    fn write_stats(&self) -> WriteStats;
}

/// Reads a required string key out of a plugin config mapping.
pub fn config_str(config: &PluginConfig, key: &str) -> Result<String, PluginError> {
    config
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::to_owned)
        .ok_or_else(|| PluginError::InvalidConfig(format!("'{key}' is required")))
}

/// Reads an optional string key, falling back to `default`.
pub fn config_str_or(config: &PluginConfig, key: &str, default: &str) -> String {
    config
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::to_owned)
        .unwrap_or_else(|| default.to_owned())
}

/// Reads an optional boolean key, falling back to `default`.
pub fn config_bool_or(config: &PluginConfig, key: &str, default: bool) -> bool {
    config.get(key).and_then(|v| v.as_bool()).unwrap_or(default)
}
