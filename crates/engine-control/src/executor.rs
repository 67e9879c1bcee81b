use crate::{
    jobs::{JobError, JobManager},
    scheduler::JobExecutor,
};
use async_trait::async_trait;
use chrono::Utc;
use engine_core::{
    checkpoint::CheckpointConfig,
    plugin::registry::Registry,
    store::{MetadataStore, StoreError},
};
use engine_runtime::{
    config::{PipelineCompiler, PipelineSpec, SpecError},
    pipeline::{PipelineConfig, PipelineError},
};
use model::execution::{
    execution::{Execution, ExecutionStatus},
    job::JobStatus,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error(transparent)]
    Job(#[from] JobError),

    #[error(transparent)]
    Spec(#[from] SpecError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Resolves a job id to a pipeline execution: compiles the job's declarative
/// config against the registry, runs it under the job's cancellation scope
/// and keeps the execution row current.
pub struct PipelineJobExecutor {
    manager: Arc<JobManager>,
    store: Arc<dyn MetadataStore>,
    registry: &'static Registry,
    checkpoints: Option<CheckpointConfig>,
    worker_id: String,
}

impl PipelineJobExecutor {
    pub fn new(
        manager: Arc<JobManager>,
        store: Arc<dyn MetadataStore>,
        registry: &'static Registry,
        worker_id: impl Into<String>,
    ) -> Self {
        Self {
            manager,
            store,
            registry,
            checkpoints: None,
            worker_id: worker_id.into(),
        }
    }

    pub fn with_checkpoints(mut self, config: CheckpointConfig) -> Self {
        self.checkpoints = Some(config);
        self
    }

    pub async fn run(
        &self,
        outer: CancellationToken,
        job_id: &str,
    ) -> Result<(), ExecutorError> {
        let job = self.manager.get(job_id).await?;
        let spec = PipelineSpec::parse(&job.config)?;
        let max_retries = retry_budget(job.retry_policy.as_deref());

        let job_token = self.manager.start(job_id).await?;

        // Either the outer scope (scheduler, API, signal handler) or the
        // job's own scope may cancel the run.
        let forward = {
            let outer = outer.clone();
            let job_token = job_token.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = outer.cancelled() => job_token.cancel(),
                    _ = job_token.cancelled() => {}
                }
            })
        };

        let mut execution = Execution::started(job_id, &self.worker_id);
        self.store.save_execution(&execution).await?;
        info!(job_id, execution_id = %execution.id, "Execution started");

        let mut attempt = 0u32;
        let result = loop {
            let result = self.run_once(&spec, job_id, &job_token).await;
            match &result {
                Err((err, _)) if attempt < max_retries && !matches!(err, PipelineError::Cancelled) => {
                    attempt += 1;
                    warn!(
                        job_id,
                        attempt,
                        max_retries,
                        error = %err,
                        "Execution attempt failed, retrying"
                    );
                }
                _ => break result,
            }
        };

        forward.abort();

        let (outcome, stats) = match result {
            Ok(stats) => (Ok(()), stats),
            Err((err, stats)) => (Err(err), stats),
        };

        execution.records_read = stats.records_read;
        execution.records_written = stats.records_written;
        execution.bytes_transferred = stats.bytes_written;
        execution.end_time = Some(Utc::now());

        let job_outcome = match &outcome {
            Ok(()) => {
                execution.status = ExecutionStatus::Completed;
                JobStatus::Completed
            }
            Err(PipelineError::Cancelled) => {
                execution.status = ExecutionStatus::Cancelled;
                // A stop request already moved the job to completed; finish
                // only fills in jobs that are still marked running.
                JobStatus::Completed
            }
            Err(err) => {
                execution.status = ExecutionStatus::Failed;
                execution.error_message = Some(err.to_string());
                JobStatus::Failed
            }
        };

        if let Err(err) = self.store.update_execution(&execution).await {
            warn!(job_id, error = %err, "Failed to persist execution result");
        }
        self.manager.finish(job_id, job_outcome).await?;

        match &outcome {
            Ok(()) => info!(
                job_id,
                execution_id = %execution.id,
                records = execution.records_written,
                "Execution succeeded"
            ),
            Err(err) => warn!(job_id, execution_id = %execution.id, error = %err, "Execution failed"),
        }

        outcome.map_err(Into::into)
    }

    async fn run_once(
        &self,
        spec: &PipelineSpec,
        job_id: &str,
        job_token: &CancellationToken,
    ) -> Result<engine_runtime::pipeline::PipelineStats, (PipelineError, engine_runtime::pipeline::PipelineStats)> {
        let config = PipelineConfig {
            job_id: Some(job_id.to_owned()),
            checkpoints: self.checkpoints.clone(),
            ..PipelineConfig::default()
        };

        let mut pipeline = PipelineCompiler::new(self.registry)
            .compile_with(spec, config)
            .map_err(|err| {
                (
                    PipelineError::InvalidConfig(err.to_string()),
                    Default::default(),
                )
            })?;

        match pipeline.execute(job_token.child_token()).await {
            Ok(()) => Ok(pipeline.stats()),
            Err(err) => Err((err, pipeline.stats())),
        }
    }
}

/// The retry policy is an opaque string on the job; the only recognized
/// form is a bare integer budget of additional attempts.
fn retry_budget(policy: Option<&str>) -> u32 {
    policy
        .and_then(|raw| raw.trim().parse::<u32>().ok())
        .unwrap_or(0)
}

#[async_trait]
impl JobExecutor for PipelineJobExecutor {
    async fn execute(
        &self,
        cancel: CancellationToken,
        job_id: &str,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.run(cancel, job_id).await.map_err(Into::into)
    }
}
