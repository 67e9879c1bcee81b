use crate::pipeline::{ExecutionState, PipelineConfig, PipelineError, PipelineStats};
use engine_core::{
    checkpoint::CheckpointManager,
    metrics::Metrics,
    plugin::{InputPlugin, OutputPlugin, PluginError, ProcessorPlugin},
};
use model::{checkpoint::Checkpoint, records::batch::DataBatch};
use std::{
    sync::{Arc, RwLock},
    time::{Duration, Instant},
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const INPUT_BACKPRESSURE_PAUSE: Duration = Duration::from_millis(100);
const PROCESSOR_BACKPRESSURE_PAUSE: Duration = Duration::from_millis(50);

/// A fatal error raised inside a stage task. The first one observed decides
/// the execution result; the rest are logged and discarded.
struct StageFailure {
    stage: String,
    error: PluginError,
}

/// Streaming dataflow over one input, N processors and one output.
///
/// Every stage runs as its own task; stages are connected by bounded FIFO
/// channels, so memory stays bounded by `sum(buffer capacity × batch size)`.
/// Sending a batch over a channel transfers ownership: stages never mutate a
/// batch they received, they emit new ones.
pub struct ConcurrentPipeline {
    input: Option<Box<dyn InputPlugin>>,
    processors: Vec<Box<dyn ProcessorPlugin>>,
    output: Option<Box<dyn OutputPlugin>>,
    config: PipelineConfig,
    checkpoints: Option<Arc<CheckpointManager>>,
    metrics: Metrics,
    state: Arc<RwLock<ExecutionState>>,
    stats: PipelineStats,
}

impl ConcurrentPipeline {
    pub fn new(
        input: Box<dyn InputPlugin>,
        processors: Vec<Box<dyn ProcessorPlugin>>,
        output: Box<dyn OutputPlugin>,
        config: PipelineConfig,
    ) -> Self {
        let checkpoints = match &config.checkpoints {
            Some(cp_config) if cp_config.enabled => {
                let job_id = config
                    .job_id
                    .clone()
                    .unwrap_or_else(|| format!("pipeline-{}", uuid::Uuid::new_v4()));
                match CheckpointManager::from_config(&job_id, cp_config) {
                    Ok(manager) => {
                        info!(job_id = %job_id, "Checkpointing enabled");
                        Some(Arc::new(manager))
                    }
                    Err(err) => {
                        warn!(error = %err, "Failed to create checkpoint manager, continuing without");
                        None
                    }
                }
            }
            _ => None,
        };

        Self {
            input: Some(input),
            processors,
            output: Some(output),
            config,
            checkpoints,
            metrics: Metrics::new(),
            state: Arc::new(RwLock::new(ExecutionState::Idle)),
            stats: PipelineStats::default(),
        }
    }

    pub fn state(&self) -> ExecutionState {
        *self.state.read().expect("state lock poisoned")
    }

    /// Counters from the most recent execution.
    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    pub fn checkpoint_manager(&self) -> Option<&Arc<CheckpointManager>> {
        self.checkpoints.as_ref()
    }

    /// Runs the pipeline to completion, cancellation, or first stage failure.
    ///
    /// On success the input was read to end-of-stream, every surviving batch
    /// was delivered, and the output was flushed. Input and output are closed
    /// exactly once on every path; flush is skipped on abnormal termination.
    pub async fn execute(&mut self, cancel: CancellationToken) -> Result<(), PipelineError> {
        self.config.validate()?;
        let start = Instant::now();
        info!("Starting concurrent pipeline execution");

        self.set_state(ExecutionState::ConnectingInput);
        let mut input = self
            .input
            .take()
            .ok_or_else(|| PipelineError::InvalidConfig("pipeline already consumed".into()))?;
        if let Err(source) = input.connect().await {
            self.close_input(input).await;
            self.set_state(ExecutionState::Terminated);
            return Err(PipelineError::Connect {
                stage: "input",
                source,
            });
        }

        self.set_state(ExecutionState::ConnectingOutput);
        let mut output = self
            .output
            .take()
            .ok_or_else(|| PipelineError::InvalidConfig("pipeline already consumed".into()))?;
        if let Err(source) = output.connect().await {
            self.close_input(input).await;
            if let Err(err) = output.close().await {
                warn!(error = %err, "Failed to close output");
            }
            self.output = Some(output);
            self.set_state(ExecutionState::Terminated);
            return Err(PipelineError::Connect {
                stage: "output",
                source,
            });
        }

        self.set_state(ExecutionState::Running);
        let (error_tx, mut error_rx) = mpsc::channel::<StageFailure>(10);
        let stage_token = cancel.child_token();

        // Linear chain: input → ch₀ → P₁ → ch₁ → … → Pₙ → chₙ → output.
        // Each channel carries the outbound capacity of its producer; the
        // last one is sized by the output buffer so the sink stays bounded
        // independently of the processor fan.
        let processor_count = self.processors.len();
        let (input_tx, mut next_rx) = mpsc::channel::<DataBatch>(self.config.input_buffer);

        let input_handle = tokio::spawn(run_input(
            input,
            input_tx,
            error_tx.clone(),
            stage_token.clone(),
            self.config.batch_size,
            self.config.backpressure_threshold,
            self.checkpoints.clone(),
            self.metrics.clone(),
        ));

        let mut processor_handles = Vec::with_capacity(processor_count);
        for (index, processor) in self.processors.drain(..).enumerate() {
            let capacity = if index == processor_count - 1 {
                self.config.output_buffer
            } else {
                self.config.processor_buffer
            };
            let (tx, rx) = mpsc::channel::<DataBatch>(capacity);
            processor_handles.push(tokio::spawn(run_processor(
                processor,
                index,
                next_rx,
                tx,
                error_tx.clone(),
                stage_token.clone(),
                self.config.backpressure_threshold,
            )));
            next_rx = rx;
        }

        let output_handle = tokio::spawn(run_output(
            output,
            next_rx,
            error_tx,
            stage_token.clone(),
            self.checkpoints.clone(),
            self.metrics.clone(),
        ));

        // Join every stage; channel closure unwinds the chain, so this also
        // serves as the drain barrier.
        let input_back = match input_handle.await {
            Ok(plugin) => Some(plugin),
            Err(err) => {
                warn!(error = %err, "Input stage task aborted");
                None
            }
        };
        for handle in processor_handles {
            match handle.await {
                Ok(plugin) => self.processors.push(plugin),
                Err(err) => warn!(error = %err, "Processor stage task aborted"),
            }
        }
        let output_back = match output_handle.await {
            Ok(plugin) => Some(plugin),
            Err(err) => {
                warn!(error = %err, "Output stage task aborted");
                None
            }
        };

        let first_failure = error_rx.try_recv().ok();
        while let Ok(extra) = error_rx.try_recv() {
            warn!(stage = %extra.stage, error = %extra.error, "Suppressed secondary stage failure");
        }

        let result = if cancel.is_cancelled() {
            self.set_state(ExecutionState::Cancelling);
            info!("Pipeline cancelled");
            Err(PipelineError::Cancelled)
        } else if let Some(failure) = first_failure {
            self.set_state(ExecutionState::Draining);
            Err(PipelineError::Stage {
                stage: failure.stage,
                source: failure.error,
            })
        } else {
            Ok(())
        };

        // Close input on every path; flush the output only on success.
        if let Some(input) = input_back {
            self.close_input(input).await;
        }
        for processor in &mut self.processors {
            if let Err(err) = processor.close().await {
                warn!(processor = processor.name(), error = %err, "Failed to close processor");
            }
        }

        let result = match (result, output_back) {
            (Ok(()), Some(mut output)) => {
                self.set_state(ExecutionState::Flushing);
                let flushed = output
                    .flush()
                    .await
                    .map_err(|source| PipelineError::Flush { source });
                if let Err(err) = output.close().await {
                    warn!(error = %err, "Failed to close output");
                }
                self.output = Some(output);
                flushed
            }
            (result, Some(mut output)) => {
                if let Err(err) = output.close().await {
                    warn!(error = %err, "Failed to close output");
                }
                self.output = Some(output);
                result
            }
            (result, None) => result,
        };

        let duration = start.elapsed();
        self.stats = PipelineStats::finish(self.metrics.snapshot(), duration);
        self.set_state(ExecutionState::Terminated);

        match &result {
            Ok(()) => info!(
                batches = self.stats.total_batches,
                records = self.stats.records_written,
                duration_ms = duration.as_millis(),
                records_per_sec = format!("{:.2}", self.stats.records_per_second),
                "Pipeline completed"
            ),
            Err(err) => warn!(error = %err, "Pipeline terminated abnormally"),
        }

        result
    }

    async fn close_input(&mut self, mut input: Box<dyn InputPlugin>) {
        if let Err(err) = input.close().await {
            warn!(error = %err, "Failed to close input");
        }
        self.input = Some(input);
    }

    fn set_state(&self, state: ExecutionState) {
        *self.state.write().expect("state lock poisoned") = state;
    }
}

/// Occupancy of the producer's own outbound channel, in [0, 1].
fn occupancy(tx: &mpsc::Sender<DataBatch>) -> f64 {
    let max = tx.max_capacity();
    (max - tx.capacity()) as f64 / max as f64
}

/// Persists a stage checkpoint off the stage task; the file write is
/// blocking and must not stall the runtime. Failures are warnings, never
/// fatal.
async fn save_stage_checkpoint(
    manager: &Arc<CheckpointManager>,
    stage: &'static str,
    checkpoint: Checkpoint,
) {
    let manager = manager.clone();
    match tokio::task::spawn_blocking(move || manager.save(stage, checkpoint)).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => warn!(stage, error = %err, "Failed to save checkpoint"),
        Err(err) => warn!(stage, error = %err, "Checkpoint save task failed"),
    }
}

fn report_failure(
    error_tx: &mpsc::Sender<StageFailure>,
    token: &CancellationToken,
    stage: impl Into<String>,
    error: PluginError,
) {
    let stage = stage.into();
    if error_tx
        .try_send(StageFailure {
            stage: stage.clone(),
            error,
        })
        .is_err()
    {
        warn!(stage = %stage, "Error channel full, dropping stage failure");
    }
    token.cancel();
}

#[allow(clippy::too_many_arguments)]
async fn run_input(
    mut input: Box<dyn InputPlugin>,
    tx: mpsc::Sender<DataBatch>,
    error_tx: mpsc::Sender<StageFailure>,
    token: CancellationToken,
    batch_size: usize,
    backpressure_threshold: f64,
    checkpoints: Option<Arc<CheckpointManager>>,
    metrics: Metrics,
) -> Box<dyn InputPlugin> {
    info!("Input reader started");
    let mut batch_count = 0u64;

    loop {
        if token.is_cancelled() {
            info!("Input reader cancelled");
            break;
        }

        if occupancy(&tx) >= backpressure_threshold {
            debug!("Backpressure in input reader, slowing down");
            tokio::select! {
                _ = tokio::time::sleep(INPUT_BACKPRESSURE_PAUSE) => continue,
                _ = token.cancelled() => {
                    info!("Input reader cancelled");
                    break;
                }
            }
        }

        let batch = match input.read_batch(batch_size).await {
            Ok(Some(batch)) if !batch.is_empty() => batch,
            Ok(Some(_)) => {
                info!("Input reader received empty batch, stopping");
                break;
            }
            Ok(None) => {
                info!("Input reader reached end of stream");
                break;
            }
            Err(error) => {
                report_failure(&error_tx, &token, "input", error);
                break;
            }
        };

        batch_count += 1;
        debug!(batch = batch_count, records = batch.len(), "Input reader produced batch");

        if let (Some(manager), Some(checkpoint)) = (&checkpoints, &batch.checkpoint) {
            save_stage_checkpoint(manager, "input", checkpoint.clone()).await;
        }

        metrics.add_records_read(batch.len() as u64);

        tokio::select! {
            sent = tx.send(batch) => {
                if sent.is_err() {
                    info!("Downstream channel closed, stopping input reader");
                    break;
                }
                metrics.add_batches(1);
            }
            _ = token.cancelled() => {
                info!("Input reader cancelled while sending batch");
                break;
            }
        }
    }

    input
}

async fn run_processor(
    mut processor: Box<dyn ProcessorPlugin>,
    index: usize,
    mut rx: mpsc::Receiver<DataBatch>,
    tx: mpsc::Sender<DataBatch>,
    error_tx: mpsc::Sender<StageFailure>,
    token: CancellationToken,
    backpressure_threshold: f64,
) -> Box<dyn ProcessorPlugin> {
    info!(index, name = processor.name(), "Processor started");
    let mut batch_count = 0u64;

    loop {
        let batch = tokio::select! {
            received = rx.recv() => match received {
                Some(batch) => batch,
                None => {
                    info!(index, "Processor inbound channel closed");
                    break;
                }
            },
            _ = token.cancelled() => {
                info!(index, "Processor cancelled");
                break;
            }
        };

        if occupancy(&tx) >= backpressure_threshold {
            debug!(index, "Backpressure in processor, slowing down");
            tokio::select! {
                _ = tokio::time::sleep(PROCESSOR_BACKPRESSURE_PAUSE) => {}
                _ = token.cancelled() => {
                    info!(index, "Processor cancelled");
                    break;
                }
            }
        }

        let processed = match processor.process(&batch).await {
            Ok(processed) => processed,
            Err(error) => {
                let stage = format!("processor-{index} ({})", processor.name());
                report_failure(&error_tx, &token, stage, error);
                break;
            }
        };

        batch_count += 1;

        if processed.is_empty() {
            debug!(index, batch = batch_count, "Processor filtered out all records");
            continue;
        }

        debug!(
            index,
            batch = batch_count,
            records = processed.len(),
            "Processor emitted batch"
        );

        tokio::select! {
            sent = tx.send(processed) => {
                if sent.is_err() {
                    info!(index, "Downstream channel closed, stopping processor");
                    break;
                }
            }
            _ = token.cancelled() => {
                info!(index, "Processor cancelled while sending batch");
                break;
            }
        }
    }

    processor
}

async fn run_output(
    mut output: Box<dyn OutputPlugin>,
    mut rx: mpsc::Receiver<DataBatch>,
    error_tx: mpsc::Sender<StageFailure>,
    token: CancellationToken,
    checkpoints: Option<Arc<CheckpointManager>>,
    metrics: Metrics,
) -> Box<dyn OutputPlugin> {
    info!("Output writer started");
    let mut batch_count = 0u64;

    loop {
        let batch = tokio::select! {
            received = rx.recv() => match received {
                Some(batch) => batch,
                None => {
                    info!("Output writer inbound channel closed");
                    break;
                }
            },
            _ = token.cancelled() => {
                info!("Output writer cancelled");
                break;
            }
        };

        if let Err(error) = output.write_batch(&batch).await {
            report_failure(&error_tx, &token, "output", error);
            break;
        }

        batch_count += 1;
        metrics.add_records_written(batch.len() as u64);
        metrics.add_bytes(batch.size_bytes() as u64);
        debug!(batch = batch_count, records = batch.len(), "Output writer wrote batch");

        if let (Some(manager), Some(checkpoint)) = (&checkpoints, &batch.checkpoint) {
            save_stage_checkpoint(manager, "output", checkpoint.clone()).await;
        }
    }

    output
}
