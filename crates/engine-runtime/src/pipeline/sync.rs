use crate::pipeline::{PipelineError, PipelineStats};
use engine_core::{
    metrics::Metrics,
    plugin::{InputPlugin, OutputPlugin, ProcessorPlugin},
};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Serial pipeline: one batch at a time through the whole chain.
///
/// Same contract as the concurrent runtime, minus the stage parallelism;
/// useful for small syncs and debugging.
pub struct SyncPipeline {
    input: Box<dyn InputPlugin>,
    processors: Vec<Box<dyn ProcessorPlugin>>,
    output: Box<dyn OutputPlugin>,
    batch_size: usize,
    stats: PipelineStats,
}

impl SyncPipeline {
    pub fn new(
        input: Box<dyn InputPlugin>,
        processors: Vec<Box<dyn ProcessorPlugin>>,
        output: Box<dyn OutputPlugin>,
        batch_size: usize,
    ) -> Self {
        Self {
            input,
            processors,
            output,
            batch_size,
            stats: PipelineStats::default(),
        }
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    pub async fn execute(&mut self, cancel: CancellationToken) -> Result<(), PipelineError> {
        if self.batch_size == 0 {
            return Err(PipelineError::InvalidConfig(
                "batch_size must be greater than zero".into(),
            ));
        }

        let start = Instant::now();
        let metrics = Metrics::new();
        info!("Starting pipeline execution");

        self.input
            .connect()
            .await
            .map_err(|source| PipelineError::Connect {
                stage: "input",
                source,
            })?;

        if let Err(source) = self.output.connect().await {
            self.close_all().await;
            return Err(PipelineError::Connect {
                stage: "output",
                source,
            });
        }

        let result = self.run_loop(&cancel, &metrics).await;

        let result = match result {
            Ok(()) => self
                .output
                .flush()
                .await
                .map_err(|source| PipelineError::Flush { source }),
            Err(err) => Err(err),
        };

        self.close_all().await;

        let duration = start.elapsed();
        self.stats = PipelineStats::finish(metrics.snapshot(), duration);

        if result.is_ok() {
            info!(
                batches = self.stats.total_batches,
                records = self.stats.records_written,
                duration_ms = duration.as_millis(),
                "Pipeline execution completed"
            );
        }

        result
    }

    async fn run_loop(
        &mut self,
        cancel: &CancellationToken,
        metrics: &Metrics,
    ) -> Result<(), PipelineError> {
        let mut batch_count = 0u64;

        loop {
            if cancel.is_cancelled() {
                info!("Pipeline cancelled");
                return Err(PipelineError::Cancelled);
            }

            let batch = match self.input.read_batch(self.batch_size).await {
                Ok(Some(batch)) if !batch.is_empty() => batch,
                Ok(_) => {
                    info!("Reached end of input");
                    return Ok(());
                }
                Err(source) => {
                    return Err(PipelineError::Stage {
                        stage: "input".into(),
                        source,
                    })
                }
            };

            batch_count += 1;
            metrics.add_records_read(batch.len() as u64);
            metrics.add_batches(1);
            debug!(batch = batch_count, records = batch.len(), "Processing batch");

            let mut current = batch;
            let mut filtered = false;
            for (index, processor) in self.processors.iter_mut().enumerate() {
                current = processor.process(&current).await.map_err(|source| {
                    PipelineError::Stage {
                        stage: format!("processor-{index} ({})", processor.name()),
                        source,
                    }
                })?;

                if current.is_empty() {
                    debug!(index, "All records filtered out");
                    filtered = true;
                    break;
                }
            }

            if filtered {
                continue;
            }

            self.output
                .write_batch(&current)
                .await
                .map_err(|source| PipelineError::Stage {
                    stage: "output".into(),
                    source,
                })?;
            metrics.add_records_written(current.len() as u64);
            metrics.add_bytes(current.size_bytes() as u64);
        }
    }

    async fn close_all(&mut self) {
        if let Err(err) = self.input.close().await {
            warn!(error = %err, "Failed to close input");
        }
        for processor in &mut self.processors {
            if let Err(err) = processor.close().await {
                warn!(processor = processor.name(), error = %err, "Failed to close processor");
            }
        }
        if let Err(err) = self.output.close().await {
            warn!(error = %err, "Failed to close output");
        }
    }
}
