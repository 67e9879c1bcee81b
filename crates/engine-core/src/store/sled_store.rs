use crate::store::{JobFilter, MetadataStore, StoreError};
use async_trait::async_trait;
use model::execution::{execution::Execution, job::Job, worker::Worker};
use serde::{de::DeserializeOwned, Serialize};
use std::path::Path;

const JOB_PREFIX: &str = "job:";
const EXEC_PREFIX: &str = "exec:";
const WORKER_PREFIX: &str = "worker:";

/// Durable metadata store on an embedded sled database. Rows are stored as
/// JSON under prefixed keys (`job:<id>`, `exec:<job>:<id>`, `worker:<id>`).
pub struct SledMetadataStore {
    db: sled::Db,
}

impl SledMetadataStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, sled::Error> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    async fn put<T: Serialize>(&self, key: String, value: &T) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(value)?;
        self.db.insert(key.as_bytes(), bytes)?;
        self.db.flush_async().await.map_err(StoreError::from)?;
        Ok(())
    }

    fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self.db.get(key.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn scan<T: DeserializeOwned>(&self, prefix: &str) -> Result<Vec<T>, StoreError> {
        let mut rows = Vec::new();
        for item in self.db.scan_prefix(prefix.as_bytes()) {
            let (_key, bytes) = item?;
            rows.push(serde_json::from_slice(&bytes)?);
        }
        Ok(rows)
    }

    fn job_key(id: &str) -> String {
        format!("{JOB_PREFIX}{id}")
    }

    fn exec_key(job_id: &str, id: &str) -> String {
        format!("{EXEC_PREFIX}{job_id}:{id}")
    }

    fn worker_key(id: &str) -> String {
        format!("{WORKER_PREFIX}{id}")
    }
}

#[async_trait]
impl MetadataStore for SledMetadataStore {
    async fn save_job(&self, job: &Job) -> Result<(), StoreError> {
        self.put(Self::job_key(&job.id), job).await
    }

    async fn get_job(&self, id: &str) -> Result<Job, StoreError> {
        self.get(&Self::job_key(id))?
            .ok_or_else(|| StoreError::JobNotFound(id.to_owned()))
    }

    async fn update_job(&self, job: &Job) -> Result<(), StoreError> {
        if self.get::<Job>(&Self::job_key(&job.id))?.is_none() {
            return Err(StoreError::JobNotFound(job.id.clone()));
        }
        self.put(Self::job_key(&job.id), job).await
    }

    async fn delete_job(&self, id: &str) -> Result<(), StoreError> {
        self.db
            .remove(Self::job_key(id).as_bytes())?
            .ok_or_else(|| StoreError::JobNotFound(id.to_owned()))?;
        self.db.flush_async().await.map_err(StoreError::from)?;
        Ok(())
    }

    async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>, StoreError> {
        let mut jobs: Vec<Job> = self.scan(JOB_PREFIX)?;
        jobs.retain(|job| filter.matches(job));
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(jobs)
    }

    async fn save_execution(&self, execution: &Execution) -> Result<(), StoreError> {
        self.put(Self::exec_key(&execution.job_id, &execution.id), execution)
            .await
    }

    async fn get_execution(&self, id: &str) -> Result<Execution, StoreError> {
        // Execution keys embed the job id, so a lookup by execution id scans.
        let executions: Vec<Execution> = self.scan(EXEC_PREFIX)?;
        executions
            .into_iter()
            .find(|e| e.id == id)
            .ok_or_else(|| StoreError::ExecutionNotFound(id.to_owned()))
    }

    async fn update_execution(&self, execution: &Execution) -> Result<(), StoreError> {
        let key = Self::exec_key(&execution.job_id, &execution.id);
        if self.get::<Execution>(&key)?.is_none() {
            return Err(StoreError::ExecutionNotFound(execution.id.clone()));
        }
        self.put(key, execution).await
    }

    async fn list_executions(&self, job_id: &str) -> Result<Vec<Execution>, StoreError> {
        let mut executions: Vec<Execution> = self.scan(&format!("{EXEC_PREFIX}{job_id}:"))?;
        executions.sort_by(|a, b| a.start_time.cmp(&b.start_time));
        Ok(executions)
    }

    async fn register_worker(&self, worker: &Worker) -> Result<(), StoreError> {
        self.put(Self::worker_key(&worker.id), worker).await
    }

    async fn get_worker(&self, id: &str) -> Result<Worker, StoreError> {
        self.get(&Self::worker_key(id))?
            .ok_or_else(|| StoreError::WorkerNotFound(id.to_owned()))
    }

    async fn update_worker(&self, worker: &Worker) -> Result<(), StoreError> {
        if self.get::<Worker>(&Self::worker_key(&worker.id))?.is_none() {
            return Err(StoreError::WorkerNotFound(worker.id.clone()));
        }
        self.put(Self::worker_key(&worker.id), worker).await
    }

    async fn list_workers(&self) -> Result<Vec<Worker>, StoreError> {
        let mut workers: Vec<Worker> = self.scan(WORKER_PREFIX)?;
        workers.sort_by(|a, b| a.registered_at.cmp(&b.registered_at));
        Ok(workers)
    }

    async fn unregister_worker(&self, id: &str) -> Result<(), StoreError> {
        self.db
            .remove(Self::worker_key(id).as_bytes())?
            .ok_or_else(|| StoreError::WorkerNotFound(id.to_owned()))?;
        self.db.flush_async().await.map_err(StoreError::from)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::execution::job::JobStatus;
    use tempfile::tempdir;

    #[tokio::test]
    async fn job_rows_round_trip() {
        let dir = tempdir().expect("tempdir");
        let store = SledMetadataStore::open(dir.path()).expect("open sled");

        let mut job = Job::new("orders-sync", "input: {}");
        job.id = "j-1".into();
        store.save_job(&job).await.expect("save");

        let loaded = store.get_job("j-1").await.expect("get");
        assert_eq!(loaded.name, "orders-sync");
        assert_eq!(loaded.status, JobStatus::Draft);

        store.delete_job("j-1").await.expect("delete");
        assert!(store.get_job("j-1").await.is_err());
    }

    #[tokio::test]
    async fn executions_list_by_job() {
        let dir = tempdir().expect("tempdir");
        let store = SledMetadataStore::open(dir.path()).expect("open sled");

        let a = Execution::started("j-1", "w-1");
        let b = Execution::started("j-1", "w-1");
        let other = Execution::started("j-2", "w-1");
        for execution in [&a, &b, &other] {
            store.save_execution(execution).await.expect("save");
        }

        let listed = store.list_executions("j-1").await.expect("list");
        assert_eq!(listed.len(), 2);
        assert!(listed.iter().all(|e| e.job_id == "j-1"));
    }
}
