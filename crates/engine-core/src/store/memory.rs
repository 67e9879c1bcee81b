use crate::store::{JobFilter, MetadataStore, StoreError};
use async_trait::async_trait;
use model::execution::{execution::Execution, job::Job, worker::Worker};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// In-memory metadata store for standalone deployments and tests.
#[derive(Default)]
pub struct MemoryMetadataStore {
    jobs: RwLock<HashMap<String, Job>>,
    executions: RwLock<HashMap<String, Execution>>,
    workers: RwLock<HashMap<String, Worker>>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn save_job(&self, job: &Job) -> Result<(), StoreError> {
        self.jobs.write().await.insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn get_job(&self, id: &str) -> Result<Job, StoreError> {
        self.jobs
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::JobNotFound(id.to_owned()))
    }

    async fn update_job(&self, job: &Job) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().await;
        if !jobs.contains_key(&job.id) {
            return Err(StoreError::JobNotFound(job.id.clone()));
        }
        jobs.insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn delete_job(&self, id: &str) -> Result<(), StoreError> {
        self.jobs
            .write()
            .await
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StoreError::JobNotFound(id.to_owned()))
    }

    async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>, StoreError> {
        let mut jobs: Vec<_> = self
            .jobs
            .read()
            .await
            .values()
            .filter(|job| filter.matches(job))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(jobs)
    }

    async fn save_execution(&self, execution: &Execution) -> Result<(), StoreError> {
        self.executions
            .write()
            .await
            .insert(execution.id.clone(), execution.clone());
        Ok(())
    }

    async fn get_execution(&self, id: &str) -> Result<Execution, StoreError> {
        self.executions
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::ExecutionNotFound(id.to_owned()))
    }

    async fn update_execution(&self, execution: &Execution) -> Result<(), StoreError> {
        let mut executions = self.executions.write().await;
        if !executions.contains_key(&execution.id) {
            return Err(StoreError::ExecutionNotFound(execution.id.clone()));
        }
        executions.insert(execution.id.clone(), execution.clone());
        Ok(())
    }

    async fn list_executions(&self, job_id: &str) -> Result<Vec<Execution>, StoreError> {
        let mut executions: Vec<_> = self
            .executions
            .read()
            .await
            .values()
            .filter(|e| e.job_id == job_id)
            .cloned()
            .collect();
        executions.sort_by(|a, b| a.start_time.cmp(&b.start_time));
        Ok(executions)
    }

    async fn register_worker(&self, worker: &Worker) -> Result<(), StoreError> {
        self.workers
            .write()
            .await
            .insert(worker.id.clone(), worker.clone());
        Ok(())
    }

    async fn get_worker(&self, id: &str) -> Result<Worker, StoreError> {
        self.workers
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::WorkerNotFound(id.to_owned()))
    }

    async fn update_worker(&self, worker: &Worker) -> Result<(), StoreError> {
        let mut workers = self.workers.write().await;
        if !workers.contains_key(&worker.id) {
            return Err(StoreError::WorkerNotFound(worker.id.clone()));
        }
        workers.insert(worker.id.clone(), worker.clone());
        Ok(())
    }

    async fn list_workers(&self) -> Result<Vec<Worker>, StoreError> {
        let mut workers: Vec<_> = self.workers.read().await.values().cloned().collect();
        workers.sort_by(|a, b| a.registered_at.cmp(&b.registered_at));
        Ok(workers)
    }

    async fn unregister_worker(&self, id: &str) -> Result<(), StoreError> {
        self.workers
            .write()
            .await
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StoreError::WorkerNotFound(id.to_owned()))
    }
}
