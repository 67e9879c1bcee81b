pub mod memory;
pub mod sled_store;

use async_trait::async_trait;
use model::execution::{
    execution::Execution,
    job::{Job, JobStatus},
    worker::Worker,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error("execution not found: {0}")]
    ExecutionNotFound(String),

    #[error("worker not found: {0}")]
    WorkerNotFound(String),

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<sled::Error> for StoreError {
    fn from(err: sled::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

/// Filter for job listings. Empty filter matches everything.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub enabled: Option<bool>,
}

impl JobFilter {
    pub fn matches(&self, job: &Job) -> bool {
        if let Some(status) = self.status {
            if job.status != status {
                return false;
            }
        }
        if let Some(enabled) = self.enabled {
            if job.enabled != enabled {
                return false;
            }
        }
        true
    }
}

/// Persistence contract required by the job manager and the worker pool.
/// Any backend providing these rows is acceptable.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn save_job(&self, job: &Job) -> Result<(), StoreError>;
    async fn get_job(&self, id: &str) -> Result<Job, StoreError>;
    async fn update_job(&self, job: &Job) -> Result<(), StoreError>;
    async fn delete_job(&self, id: &str) -> Result<(), StoreError>;
    async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>, StoreError>;

    async fn save_execution(&self, execution: &Execution) -> Result<(), StoreError>;
    async fn get_execution(&self, id: &str) -> Result<Execution, StoreError>;
    async fn update_execution(&self, execution: &Execution) -> Result<(), StoreError>;
    async fn list_executions(&self, job_id: &str) -> Result<Vec<Execution>, StoreError>;

    async fn register_worker(&self, worker: &Worker) -> Result<(), StoreError>;
    async fn get_worker(&self, id: &str) -> Result<Worker, StoreError>;
    async fn update_worker(&self, worker: &Worker) -> Result<(), StoreError>;
    async fn list_workers(&self) -> Result<Vec<Worker>, StoreError>;
    async fn unregister_worker(&self, id: &str) -> Result<(), StoreError>;
}
