use async_trait::async_trait;
use engine_core::plugin::{
    OutputPlugin, Plugin, PluginConfig, PluginError, PluginMetadata, PluginType,
};
use model::{
    progress::WriteStats,
    records::{batch::DataBatch, record::Record, schema::Schema},
};
use std::{
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

#[derive(Default)]
struct Collected {
    records: Vec<Record>,
    last_schema: Option<Schema>,
    flush_count: u64,
}

/// Shared view of what a [`MemoryOutput`] received. The owning test keeps a
/// clone of this handle; the pipeline consumes the plugin itself.
#[derive(Clone, Default)]
pub struct CollectedOutput {
    inner: Arc<Mutex<Collected>>,
}

impl CollectedOutput {
    pub fn records(&self) -> Vec<Record> {
        self.inner.lock().expect("sink lock poisoned").records.clone()
    }

    pub fn record_count(&self) -> usize {
        self.inner.lock().expect("sink lock poisoned").records.len()
    }

    pub fn last_schema(&self) -> Option<Schema> {
        self.inner
            .lock()
            .expect("sink lock poisoned")
            .last_schema
            .clone()
    }

    pub fn flush_count(&self) -> u64 {
        self.inner.lock().expect("sink lock poisoned").flush_count
    }
}

/// Output that collects records into shared memory.
pub struct MemoryOutput {
    sink: CollectedOutput,
    connected: bool,
    write_delay: Option<Duration>,
    fail_after_batches: Option<u64>,
    batches_written: u64,
    stats: WriteStats,
    started: Option<Instant>,
}

impl MemoryOutput {
    pub fn new() -> (Self, CollectedOutput) {
        let sink = CollectedOutput::default();
        (
            Self {
                sink: sink.clone(),
                connected: false,
                write_delay: None,
                fail_after_batches: None,
                batches_written: 0,
                stats: WriteStats::default(),
                started: None,
            },
            sink,
        )
    }

    /// Slows every write down, for exercising backpressure and cancellation.
    pub fn with_write_delay(mut self, delay: Duration) -> Self {
        self.write_delay = Some(delay);
        self
    }

    /// Makes `write_batch` fail once the given number of batches landed.
    pub fn failing_after(mut self, batches: u64) -> Self {
        self.fail_after_batches = Some(batches);
        self
    }
}

#[async_trait]
impl Plugin for MemoryOutput {
    fn name(&self) -> &str {
        "memory"
    }

    fn plugin_type(&self) -> PluginType {
        PluginType::Output
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
            plugin_type: PluginType::Output,
            version: "1.0.0".into(),
            description: "Collects records into shared memory".into(),
            config_schema: serde_json::Value::Null,
        }
    }

    async fn close(&mut self) -> Result<(), PluginError> {
        self.connected = false;
        Ok(())
    }
}

#[async_trait]
impl OutputPlugin for MemoryOutput {
    async fn connect(&mut self) -> Result<(), PluginError> {
        self.connected = true;
        self.started = Some(Instant::now());
        Ok(())
    }

    async fn write_batch(&mut self, batch: &DataBatch) -> Result<(), PluginError> {
        if !self.connected {
            return Err(PluginError::NotConnected);
        }

        if let Some(limit) = self.fail_after_batches {
            if self.batches_written >= limit {
                return Err(PluginError::Write("simulated write failure".into()));
            }
        }

        if let Some(delay) = self.write_delay {
            tokio::time::sleep(delay).await;
        }

        {
            let mut collected = self.sink.inner.lock().expect("sink lock poisoned");
            collected.records.extend(batch.records.iter().cloned());
            collected.last_schema = Some(batch.schema.clone());
        }

        self.batches_written += 1;
        self.stats.records_written += batch.len() as u64;
        self.stats.bytes_written += batch.size_bytes() as u64;
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), PluginError> {
        self.sink
            .inner
            .lock()
            .expect("sink lock poisoned")
            .flush_count += 1;
        Ok(())
    }

    fn write_stats(&self) -> WriteStats {
        let mut stats = self.stats;
        if let Some(started) = self.started {
            stats.duration = started.elapsed();
        }
        stats
    }
}
