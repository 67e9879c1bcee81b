pub mod concurrent;
pub mod sync;

pub use concurrent::ConcurrentPipeline;
pub use sync::SyncPipeline;

use engine_core::{checkpoint::CheckpointConfig, plugin::PluginError};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("failed to connect {stage}: {source}")]
    Connect {
        stage: &'static str,
        #[source]
        source: PluginError,
    },

    #[error("stage '{stage}' failed: {source}")]
    Stage {
        stage: String,
        #[source]
        source: PluginError,
    },

    #[error("pipeline cancelled")]
    Cancelled,

    #[error("failed to flush output: {source}")]
    Flush {
        #[source]
        source: PluginError,
    },

    #[error("invalid pipeline configuration: {0}")]
    InvalidConfig(String),
}

/// Tuning knobs for a single pipeline execution.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Records per input read.
    pub batch_size: usize,
    /// Outbound batch slots from the input stage.
    pub input_buffer: usize,
    /// Outbound slots from each intermediate processor.
    pub processor_buffer: usize,
    /// Slots on the channel feeding the output stage.
    pub output_buffer: usize,
    /// Occupancy fraction of the producer's own buffer at which it yields.
    pub backpressure_threshold: f64,
    /// Job id used for checkpoint correlation.
    pub job_id: Option<String>,
    pub checkpoints: Option<CheckpointConfig>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            input_buffer: 10,
            processor_buffer: 10,
            output_buffer: 5,
            backpressure_threshold: 0.8,
            job_id: None,
            checkpoints: None,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.batch_size == 0 {
            return Err(PipelineError::InvalidConfig(
                "batch_size must be greater than zero".into(),
            ));
        }
        if self.input_buffer == 0 || self.processor_buffer == 0 || self.output_buffer == 0 {
            return Err(PipelineError::InvalidConfig(
                "buffer capacities must be greater than zero".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.backpressure_threshold) {
            return Err(PipelineError::InvalidConfig(
                "backpressure_threshold must be within [0, 1]".into(),
            ));
        }
        Ok(())
    }
}

/// Lifecycle of one pipeline execution. Cancellation collapses any state
/// into `Cancelling`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionState {
    Idle,
    ConnectingInput,
    ConnectingOutput,
    Running,
    Draining,
    Cancelling,
    Flushing,
    Terminated,
}

/// Counters tallied over one execution, readable after it returns.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PipelineStats {
    pub total_batches: u64,
    pub records_read: u64,
    pub records_written: u64,
    pub bytes_written: u64,
    pub duration: Duration,
    pub records_per_second: f64,
}

impl PipelineStats {
    pub(crate) fn finish(
        snapshot: engine_core::metrics::MetricsSnapshot,
        duration: Duration,
    ) -> Self {
        let secs = duration.as_secs_f64();
        let records_per_second = if secs > 0.0 {
            snapshot.records_written as f64 / secs
        } else {
            0.0
        };
        Self {
            total_batches: snapshot.batches_processed,
            records_read: snapshot.records_read,
            records_written: snapshot.records_written,
            bytes_written: snapshot.bytes_transferred,
            duration,
            records_per_second,
        }
    }
}
