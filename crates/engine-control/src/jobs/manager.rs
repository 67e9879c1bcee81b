use chrono::Utc;
use engine_core::store::{JobFilter, MetadataStore, StoreError};
use engine_runtime::config::{PipelineSpec, SpecError};
use model::execution::job::{Job, JobStatus};
use std::{collections::HashMap, sync::Arc};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("job not found: {0}")]
    NotFound(String),

    #[error("invalid state transition from {from} to {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("job {0} is already running")]
    AlreadyRunning(String),

    #[error("job {0} is not running")]
    NotRunning(String),

    #[error("cannot stop job in status {0}")]
    CannotStop(JobStatus),

    #[error("cannot delete running job, stop it first")]
    DeleteRunning,

    #[error("job name is required")]
    MissingName,

    #[error("invalid job configuration: {0}")]
    InvalidConfig(#[from] SpecError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Per-status job counts plus the total.
pub type JobStats = HashMap<&'static str, usize>;

struct Inner {
    cache: HashMap<String, Job>,
    running: HashMap<String, CancellationToken>,
}

/// Authoritative keeper of job state.
///
/// One logical lock guards the in-memory cache and the running set, and
/// persistence happens inside that critical section, so a state change, its
/// persisted record and its cancellation scope move together. The persistent
/// store stays the source of truth; the cache is a read accelerator.
pub struct JobManager {
    store: Arc<dyn MetadataStore>,
    inner: Mutex<Inner>,
}

fn transition_allowed(from: JobStatus, to: JobStatus) -> bool {
    use JobStatus::*;
    matches!(
        (from, to),
        (Draft, Ready)
            | (Ready, Running)
            | (Ready, Draft)
            | (Running, Paused)
            | (Running, Completed)
            | (Running, Failed)
            | (Paused, Running)
            | (Paused, Completed)
            | (Completed, Ready)
            | (Failed, Ready)
    )
}

fn validate_transition(from: JobStatus, to: JobStatus) -> Result<(), JobError> {
    if transition_allowed(from, to) {
        info!(%from, %to, "Transition accepted");
        Ok(())
    } else {
        warn!(%from, %to, "Transition rejected");
        Err(JobError::InvalidTransition { from, to })
    }
}

fn validate_config(job: &Job) -> Result<(), JobError> {
    if job.name.is_empty() {
        return Err(JobError::MissingName);
    }
    PipelineSpec::parse(&job.config)?;
    Ok(())
}

impl JobManager {
    pub fn new(store: Arc<dyn MetadataStore>) -> Self {
        Self {
            store,
            inner: Mutex::new(Inner {
                cache: HashMap::new(),
                running: HashMap::new(),
            }),
        }
    }

    /// Creates a job in `draft`, assigning an id when absent. Fails without
    /// side effects when the declarative config does not parse.
    pub async fn create(&self, mut job: Job) -> Result<Job, JobError> {
        let mut inner = self.inner.lock().await;

        if job.id.is_empty() {
            job.id = uuid::Uuid::new_v4().to_string();
        }
        job.status = JobStatus::Draft;

        let now = Utc::now();
        job.created_at = now;
        job.updated_at = now;

        validate_config(&job)?;

        self.store.save_job(&job).await?;
        inner.cache.insert(job.id.clone(), job.clone());

        info!(job_id = %job.id, name = %job.name, "Created job");
        Ok(job)
    }

    pub async fn get(&self, id: &str) -> Result<Job, JobError> {
        let mut inner = self.inner.lock().await;

        if let Some(job) = inner.cache.get(id) {
            return Ok(job.clone());
        }

        let job = self
            .store
            .get_job(id)
            .await
            .map_err(|_| JobError::NotFound(id.to_owned()))?;
        inner.cache.insert(id.to_owned(), job.clone());
        Ok(job)
    }

    pub async fn list(&self, filter: &JobFilter) -> Result<Vec<Job>, JobError> {
        let jobs = self.store.list_jobs(filter).await?;

        let mut inner = self.inner.lock().await;
        for job in &jobs {
            inner
                .cache
                .entry(job.id.clone())
                .or_insert_with(|| job.clone());
        }

        Ok(jobs)
    }

    /// Writes back a modified job. Status changes go through transition
    /// validation; a changed config is re-validated.
    pub async fn update(&self, mut job: Job) -> Result<Job, JobError> {
        let mut inner = self.inner.lock().await;

        let existing = self
            .store
            .get_job(&job.id)
            .await
            .map_err(|_| JobError::NotFound(job.id.clone()))?;

        if job.status != existing.status {
            validate_transition(existing.status, job.status)?;
        }
        if job.config != existing.config {
            validate_config(&job)?;
        }

        job.updated_at = Utc::now();
        self.store.update_job(&job).await?;
        inner.cache.insert(job.id.clone(), job.clone());

        info!(job_id = %job.id, status = %job.status, "Updated job");
        Ok(job)
    }

    pub async fn delete(&self, id: &str) -> Result<(), JobError> {
        let mut inner = self.inner.lock().await;

        let job = self
            .store
            .get_job(id)
            .await
            .map_err(|_| JobError::NotFound(id.to_owned()))?;

        if job.status == JobStatus::Running {
            return Err(JobError::DeleteRunning);
        }

        self.store.delete_job(id).await?;
        inner.cache.remove(id);

        info!(job_id = %id, name = %job.name, "Deleted job");
        Ok(())
    }

    /// Moves the job to `running` and allocates its cancellation scope. The
    /// manager keeps ownership of the scope; callers receive it as a
    /// capability for the pipeline runtime.
    pub async fn start(&self, id: &str) -> Result<CancellationToken, JobError> {
        let mut inner = self.inner.lock().await;

        let mut job = self
            .store
            .get_job(id)
            .await
            .map_err(|_| JobError::NotFound(id.to_owned()))?;

        if job.status == JobStatus::Running {
            return Err(JobError::AlreadyRunning(id.to_owned()));
        }
        validate_transition(job.status, JobStatus::Running)?;

        if inner.running.contains_key(id) {
            return Err(JobError::AlreadyRunning(id.to_owned()));
        }

        job.status = JobStatus::Running;
        job.updated_at = Utc::now();
        self.store.update_job(&job).await?;

        let token = CancellationToken::new();
        inner.running.insert(id.to_owned(), token.clone());
        inner.cache.insert(id.to_owned(), job.clone());

        info!(job_id = %id, name = %job.name, "Started job");
        Ok(token)
    }

    /// Cancels the job's scope and records it as `completed`. Valid from
    /// `running` or `paused` only.
    pub async fn stop(&self, id: &str) -> Result<(), JobError> {
        let mut inner = self.inner.lock().await;

        let mut job = self
            .store
            .get_job(id)
            .await
            .map_err(|_| JobError::NotFound(id.to_owned()))?;

        if job.status != JobStatus::Running && job.status != JobStatus::Paused {
            return Err(JobError::CannotStop(job.status));
        }

        if let Some(token) = inner.running.remove(id) {
            token.cancel();
        }

        job.status = JobStatus::Completed;
        job.updated_at = Utc::now();
        self.store.update_job(&job).await?;
        inner.cache.insert(id.to_owned(), job.clone());

        info!(job_id = %id, name = %job.name, "Stopped job");
        Ok(())
    }

    /// Pausing does not cancel; the runtime stops voluntarily at the next
    /// batch boundary once the executor observes the status.
    pub async fn pause(&self, id: &str) -> Result<(), JobError> {
        self.set_status(id, JobStatus::Paused, "Paused job").await
    }

    pub async fn resume(&self, id: &str) -> Result<(), JobError> {
        self.set_status(id, JobStatus::Running, "Resumed job").await
    }

    /// The active cancellation scope of a running job.
    pub async fn cancellation(&self, id: &str) -> Result<CancellationToken, JobError> {
        let inner = self.inner.lock().await;
        inner
            .running
            .get(id)
            .cloned()
            .ok_or_else(|| JobError::NotRunning(id.to_owned()))
    }

    /// Terminal bookkeeping used by executors once an invocation ends: frees
    /// the cancellation scope and, when the job is still `running`, records
    /// the outcome. A job already moved on (e.g. by `stop`) is left as is.
    pub async fn finish(&self, id: &str, outcome: JobStatus) -> Result<(), JobError> {
        let mut inner = self.inner.lock().await;
        inner.running.remove(id);

        let mut job = self
            .store
            .get_job(id)
            .await
            .map_err(|_| JobError::NotFound(id.to_owned()))?;

        if job.status == JobStatus::Running && transition_allowed(job.status, outcome) {
            job.status = outcome;
            job.updated_at = Utc::now();
            self.store.update_job(&job).await?;
            info!(job_id = %id, status = %outcome, "Job finished");
        }

        inner.cache.insert(id.to_owned(), job);
        Ok(())
    }

    /// Per-status counts over the cached jobs, plus the total.
    pub async fn stats(&self) -> JobStats {
        let inner = self.inner.lock().await;

        let mut stats: JobStats = HashMap::from([
            ("total", inner.cache.len()),
            ("draft", 0),
            ("ready", 0),
            ("running", 0),
            ("paused", 0),
            ("completed", 0),
            ("failed", 0),
        ]);

        for job in inner.cache.values() {
            *stats.entry(job.status.as_str()).or_insert(0) += 1;
        }

        stats
    }

    async fn set_status(
        &self,
        id: &str,
        status: JobStatus,
        message: &'static str,
    ) -> Result<(), JobError> {
        let mut inner = self.inner.lock().await;

        let mut job = self
            .store
            .get_job(id)
            .await
            .map_err(|_| JobError::NotFound(id.to_owned()))?;

        validate_transition(job.status, status)?;

        job.status = status;
        job.updated_at = Utc::now();
        self.store.update_job(&job).await?;
        inner.cache.insert(id.to_owned(), job.clone());

        info!(job_id = %id, name = %job.name, "{}", message);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine_core::store::memory::MemoryMetadataStore;

    const CONFIG: &str = "input:\n  type: csv\noutput:\n  type: csv\n";

    fn manager() -> JobManager {
        JobManager::new(Arc::new(MemoryMetadataStore::new()))
    }

    async fn created(manager: &JobManager) -> Job {
        manager
            .create(Job::new("orders-sync", CONFIG))
            .await
            .expect("create")
    }

    #[tokio::test]
    async fn create_assigns_id_and_draft_status() {
        let manager = manager();
        let job = created(&manager).await;
        assert!(!job.id.is_empty());
        assert_eq!(job.status, JobStatus::Draft);
    }

    #[tokio::test]
    async fn create_rejects_unparseable_config() {
        let manager = manager();
        let result = manager.create(Job::new("broken", "not: [valid")).await;
        assert!(matches!(result, Err(JobError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn draft_jobs_cannot_start_directly() {
        let manager = manager();
        let job = created(&manager).await;

        let err = manager.start(&job.id).await.expect_err("draft -> running");
        assert!(matches!(
            err,
            JobError::InvalidTransition {
                from: JobStatus::Draft,
                to: JobStatus::Running
            }
        ));

        // draft -> ready -> running is the sanctioned path.
        let mut job = manager.get(&job.id).await.expect("get");
        job.status = JobStatus::Ready;
        manager.update(job.clone()).await.expect("to ready");
        manager.start(&job.id).await.expect("ready -> running");

        let job = manager.get(&job.id).await.expect("get");
        assert_eq!(job.status, JobStatus::Running);
    }

    #[tokio::test]
    async fn start_twice_is_rejected() {
        let manager = manager();
        let mut job = created(&manager).await;
        job.status = JobStatus::Ready;
        manager.update(job.clone()).await.expect("to ready");
        manager.start(&job.id).await.expect("start");

        let err = manager.start(&job.id).await.expect_err("second start");
        assert!(matches!(err, JobError::AlreadyRunning(_)));
    }

    #[tokio::test]
    async fn stop_cancels_scope_and_completes() {
        let manager = manager();
        let mut job = created(&manager).await;
        job.status = JobStatus::Ready;
        manager.update(job.clone()).await.expect("to ready");

        let token = manager.start(&job.id).await.expect("start");
        assert!(!token.is_cancelled());

        manager.stop(&job.id).await.expect("stop");
        assert!(token.is_cancelled());

        let job = manager.get(&job.id).await.expect("get");
        assert_eq!(job.status, JobStatus::Completed);
        assert!(manager.cancellation(&job.id).await.is_err());
    }

    #[tokio::test]
    async fn pause_then_resume_returns_to_running() {
        let manager = manager();
        let mut job = created(&manager).await;
        job.status = JobStatus::Ready;
        manager.update(job.clone()).await.expect("to ready");
        let token = manager.start(&job.id).await.expect("start");

        manager.pause(&job.id).await.expect("pause");
        assert!(!token.is_cancelled(), "pause must not cancel");
        assert_eq!(
            manager.get(&job.id).await.expect("get").status,
            JobStatus::Paused
        );

        manager.resume(&job.id).await.expect("resume");
        assert_eq!(
            manager.get(&job.id).await.expect("get").status,
            JobStatus::Running
        );
    }

    #[tokio::test]
    async fn delete_refuses_running_jobs() {
        let manager = manager();
        let mut job = created(&manager).await;
        job.status = JobStatus::Ready;
        manager.update(job.clone()).await.expect("to ready");
        manager.start(&job.id).await.expect("start");

        let err = manager.delete(&job.id).await.expect_err("delete running");
        assert!(matches!(err, JobError::DeleteRunning));

        manager.stop(&job.id).await.expect("stop");
        manager.delete(&job.id).await.expect("delete stopped");
        assert!(matches!(
            manager.get(&job.id).await,
            Err(JobError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn completed_and_failed_can_rearm() {
        assert!(transition_allowed(JobStatus::Completed, JobStatus::Ready));
        assert!(transition_allowed(JobStatus::Failed, JobStatus::Ready));
        assert!(!transition_allowed(JobStatus::Completed, JobStatus::Running));
        assert!(!transition_allowed(JobStatus::Paused, JobStatus::Failed));
    }

    #[tokio::test]
    async fn stats_count_by_status() {
        let manager = manager();
        created(&manager).await;
        let mut job = created(&manager).await;
        job.status = JobStatus::Ready;
        manager.update(job).await.expect("to ready");

        let stats = manager.stats().await;
        assert_eq!(stats["total"], 2);
        assert_eq!(stats["draft"], 1);
        assert_eq!(stats["ready"], 1);
    }
}
