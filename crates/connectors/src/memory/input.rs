use async_trait::async_trait;
use engine_core::plugin::{
    InputPlugin, Plugin, PluginConfig, PluginError, PluginMetadata, PluginType,
};
use model::{
    checkpoint::Checkpoint,
    progress::Progress,
    records::{batch::DataBatch, record::Record, schema::Schema},
};
use std::collections::VecDeque;

/// Input backed by pre-seeded records. Constructed programmatically rather
/// than through the registry; the workhorse of pipeline tests and local
/// experiments.
pub struct MemoryInput {
    schema: Schema,
    pending: VecDeque<Record>,
    emitted: u64,
    connected: bool,
    emit_checkpoints: bool,
    fail_after_reads: Option<u64>,
    reads: u64,
    progress: Progress,
}

impl MemoryInput {
    pub fn new(schema: Schema, records: Vec<Record>) -> Self {
        let mut progress = Progress::started_now();
        progress.total_records = records.len() as u64;
        Self {
            schema,
            pending: records.into(),
            emitted: 0,
            connected: false,
            emit_checkpoints: true,
            fail_after_reads: None,
            reads: 0,
            progress,
        }
    }

    pub fn without_checkpoints(mut self) -> Self {
        self.emit_checkpoints = false;
        self
    }

    /// Makes `read_batch` fail once the given number of reads succeeded.
    pub fn failing_after(mut self, reads: u64) -> Self {
        self.fail_after_reads = Some(reads);
        self
    }
}

#[async_trait]
impl Plugin for MemoryInput {
    fn name(&self) -> &str {
        "memory"
    }

    fn plugin_type(&self) -> PluginType {
        PluginType::Input
    }

    fn initialize(&mut self, _config: &PluginConfig) -> Result<(), PluginError> {
        Ok(())
    }

    fn validate(&self) -> Result<(), PluginError> {
        Ok(())
    }

    fn metadata(&self) -> PluginMetadata {
        PluginMetadata {
            name: "memory".into(),
            plugin_type: PluginType::Input,
            version: "1.0.0".into(),
            description: "Serves pre-seeded record batches".into(),
            config_schema: serde_json::Value::Null,
        }
    }

    async fn close(&mut self) -> Result<(), PluginError> {
        self.connected = false;
        Ok(())
    }
}

#[async_trait]
impl InputPlugin for MemoryInput {
    async fn connect(&mut self) -> Result<(), PluginError> {
        self.connected = true;
        Ok(())
    }

    async fn read_batch(&mut self, batch_size: usize) -> Result<Option<DataBatch>, PluginError> {
        if !self.connected {
            return Err(PluginError::NotConnected);
        }

        if let Some(limit) = self.fail_after_reads {
            if self.reads >= limit {
                return Err(PluginError::Read("simulated read failure".into()));
            }
        }
        self.reads += 1;

        if self.pending.is_empty() {
            return Ok(None);
        }

        let take = batch_size.min(self.pending.len());
        let records: Vec<Record> = self.pending.drain(..take).collect();
        self.emitted += records.len() as u64;
        self.progress.record_processed(records.len() as u64, 0);

        let mut batch = DataBatch::new(self.schema.clone(), records);
        if self.emit_checkpoints {
            batch = batch.with_checkpoint(Checkpoint::at_offset(self.emitted));
        }
        Ok(Some(batch))
    }

    fn has_next(&self) -> bool {
        !self.pending.is_empty()
    }

    fn progress(&self) -> Progress {
        self.progress.clone()
    }
}
