use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cron::Schedule;
use std::{collections::HashMap, str::FromStr, sync::Arc, time::Duration};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("job {0} is already scheduled")]
    AlreadyScheduled(String),

    #[error("job {0} is not scheduled")]
    NotScheduled(String),

    #[error("cron expression is required")]
    EmptyExpression,

    #[error("invalid cron expression '{expr}': {source}")]
    InvalidExpression {
        expr: String,
        #[source]
        source: cron::error::Error,
    },

    #[error("no upcoming run for job {0}")]
    NoUpcomingRun(String),

    #[error("scheduler is already running")]
    AlreadyRunning,

    #[error("scheduler is not running")]
    NotRunning,
}

/// Capability invoked when a cron entry fires. How a job id resolves to a
/// pipeline execution is the application's concern.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn execute(
        &self,
        cancel: CancellationToken,
        job_id: &str,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

struct Entry {
    expr: String,
    schedule: Schedule,
    token: Option<CancellationToken>,
    handle: Option<JoinHandle<()>>,
}

struct Inner {
    entries: HashMap<String, Entry>,
    running: bool,
    run_token: CancellationToken,
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Upper bound on a single invocation; runaway executions are cut loose.
    pub invocation_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            invocation_timeout: Duration::from_secs(60 * 60),
        }
    }
}

/// Fires `executor.execute(scope, job_id)` on cron schedules.
///
/// Expressions use the standard five fields (minute, hour, day-of-month,
/// month, day-of-week); a seconds field is accepted when present. Execution
/// failures are logged and never unschedule the entry.
pub struct Scheduler {
    executor: Arc<dyn JobExecutor>,
    config: SchedulerConfig,
    inner: tokio::sync::Mutex<Inner>,
}

/// Parses a cron expression, accepting the five-field standard form by
/// pinning seconds to zero.
pub fn parse_cron(expr: &str) -> Result<Schedule, SchedulerError> {
    let expr = expr.trim();
    if expr.is_empty() {
        return Err(SchedulerError::EmptyExpression);
    }

    let normalized = if expr.split_whitespace().count() == 5 {
        format!("0 {expr}")
    } else {
        expr.to_owned()
    };

    Schedule::from_str(&normalized).map_err(|source| SchedulerError::InvalidExpression {
        expr: expr.to_owned(),
        source,
    })
}

impl Scheduler {
    pub fn new(executor: Arc<dyn JobExecutor>, config: SchedulerConfig) -> Self {
        Self {
            executor,
            config,
            inner: tokio::sync::Mutex::new(Inner {
                entries: HashMap::new(),
                running: false,
                run_token: CancellationToken::new(),
            }),
        }
    }

    /// Schedules a job. Rejects duplicates and invalid expressions.
    pub async fn add(&self, job_id: &str, expr: &str) -> Result<(), SchedulerError> {
        let mut inner = self.inner.lock().await;

        if inner.entries.contains_key(job_id) {
            return Err(SchedulerError::AlreadyScheduled(job_id.to_owned()));
        }

        let schedule = parse_cron(expr)?;
        let mut entry = Entry {
            expr: expr.to_owned(),
            schedule,
            token: None,
            handle: None,
        };

        if inner.running {
            self.spawn_entry(job_id, &mut entry, &inner.run_token);
        }

        inner.entries.insert(job_id.to_owned(), entry);
        info!(job_id, expr, "Scheduled job");
        Ok(())
    }

    /// Unschedules a job. An in-flight invocation is left to finish.
    pub async fn remove(&self, job_id: &str) -> Result<(), SchedulerError> {
        let mut inner = self.inner.lock().await;

        let entry = inner
            .entries
            .remove(job_id)
            .ok_or_else(|| SchedulerError::NotScheduled(job_id.to_owned()))?;
        if let Some(token) = entry.token {
            token.cancel();
        }

        info!(job_id, "Unscheduled job");
        Ok(())
    }

    /// Reschedules; a job that was not scheduled is simply added.
    pub async fn update(&self, job_id: &str, expr: &str) -> Result<(), SchedulerError> {
        match self.remove(job_id).await {
            Ok(()) | Err(SchedulerError::NotScheduled(_)) => {}
            Err(err) => return Err(err),
        }
        self.add(job_id, expr).await
    }

    pub async fn next_run(&self, job_id: &str) -> Result<DateTime<Utc>, SchedulerError> {
        let inner = self.inner.lock().await;
        let entry = inner
            .entries
            .get(job_id)
            .ok_or_else(|| SchedulerError::NotScheduled(job_id.to_owned()))?;
        entry
            .schedule
            .upcoming(Utc)
            .next()
            .ok_or_else(|| SchedulerError::NoUpcomingRun(job_id.to_owned()))
    }

    pub async fn scheduled_jobs(&self) -> Vec<String> {
        let inner = self.inner.lock().await;
        let mut jobs: Vec<_> = inner.entries.keys().cloned().collect();
        jobs.sort();
        jobs
    }

    pub async fn job_count(&self) -> usize {
        self.inner.lock().await.entries.len()
    }

    pub async fn is_running(&self) -> bool {
        self.inner.lock().await.running
    }

    pub async fn start(&self) -> Result<(), SchedulerError> {
        let mut inner = self.inner.lock().await;
        if inner.running {
            return Err(SchedulerError::AlreadyRunning);
        }

        inner.run_token = CancellationToken::new();
        inner.running = true;

        let run_token = inner.run_token.clone();
        for (job_id, entry) in inner.entries.iter_mut() {
            self.spawn_entry(job_id, entry, &run_token);
        }

        info!("Scheduler started");
        Ok(())
    }

    /// Stops firing and waits for in-flight invocations to complete.
    pub async fn stop(&self) -> Result<(), SchedulerError> {
        let handles = {
            let mut inner = self.inner.lock().await;
            if !inner.running {
                return Err(SchedulerError::NotRunning);
            }

            inner.run_token.cancel();
            inner.running = false;

            inner
                .entries
                .values_mut()
                .filter_map(|entry| {
                    entry.token = None;
                    entry.handle.take()
                })
                .collect::<Vec<_>>()
        };

        for handle in handles {
            let _ = handle.await;
        }

        info!("Scheduler stopped");
        Ok(())
    }

    fn spawn_entry(&self, job_id: &str, entry: &mut Entry, run_token: &CancellationToken) {
        let token = run_token.child_token();
        entry.token = Some(token.clone());
        entry.handle = Some(tokio::spawn(run_entry(
            job_id.to_owned(),
            entry.schedule.clone(),
            self.executor.clone(),
            token,
            self.config.invocation_timeout,
        )));
    }
}

async fn run_entry(
    job_id: String,
    schedule: Schedule,
    executor: Arc<dyn JobExecutor>,
    token: CancellationToken,
    invocation_timeout: Duration,
) {
    loop {
        let Some(next) = schedule.upcoming(Utc).next() else {
            info!(job_id, "No upcoming runs, entry going dormant");
            return;
        };
        let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);

        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = token.cancelled() => return,
        }

        info!(job_id, "Executing scheduled job");
        let invocation = token.child_token();
        match tokio::time::timeout(
            invocation_timeout,
            executor.execute(invocation.clone(), &job_id),
        )
        .await
        {
            Ok(Ok(())) => info!(job_id, "Scheduled job completed"),
            Ok(Err(err)) => error!(job_id, error = %err, "Scheduled job failed"),
            Err(_) => {
                // Cut the invocation loose so its stages wind down.
                invocation.cancel();
                error!(job_id, timeout_secs = invocation_timeout.as_secs(), "Scheduled job timed out");
            }
        }

        if token.is_cancelled() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingExecutor {
        invocations: AtomicUsize,
    }

    #[async_trait]
    impl JobExecutor for CountingExecutor {
        async fn execute(
            &self,
            _cancel: CancellationToken,
            _job_id: &str,
        ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            self.invocations.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn scheduler() -> (Scheduler, Arc<CountingExecutor>) {
        let executor = Arc::new(CountingExecutor::default());
        (
            Scheduler::new(executor.clone(), SchedulerConfig::default()),
            executor,
        )
    }

    #[tokio::test]
    async fn five_field_expressions_are_accepted() {
        assert!(parse_cron("*/5 * * * *").is_ok());
        assert!(parse_cron("0 9 * * 1-5").is_ok());
        assert!(parse_cron("").is_err());
        assert!(parse_cron("not a cron").is_err());
    }

    #[tokio::test]
    async fn add_remove_round_trip() {
        let (scheduler, _) = scheduler();

        scheduler.add("job-1", "0 * * * *").await.expect("add");
        assert_eq!(scheduler.scheduled_jobs().await, vec!["job-1".to_owned()]);

        let err = scheduler.add("job-1", "0 * * * *").await.expect_err("dup");
        assert!(matches!(err, SchedulerError::AlreadyScheduled(_)));

        scheduler.remove("job-1").await.expect("remove");
        assert!(scheduler.scheduled_jobs().await.is_empty());
        assert!(matches!(
            scheduler.remove("job-1").await,
            Err(SchedulerError::NotScheduled(_))
        ));
    }

    #[tokio::test]
    async fn update_reschedules_or_adds() {
        let (scheduler, _) = scheduler();

        scheduler.update("job-1", "0 * * * *").await.expect("add");
        scheduler
            .update("job-1", "30 * * * *")
            .await
            .expect("reschedule");
        assert_eq!(scheduler.job_count().await, 1);
    }

    #[tokio::test]
    async fn next_run_is_in_the_future() {
        let (scheduler, _) = scheduler();
        scheduler.add("job-1", "* * * * *").await.expect("add");

        let next = scheduler.next_run("job-1").await.expect("next run");
        assert!(next > Utc::now());
    }

    #[tokio::test]
    async fn start_stop_guards() {
        let (scheduler, _) = scheduler();

        scheduler.start().await.expect("start");
        assert!(matches!(
            scheduler.start().await,
            Err(SchedulerError::AlreadyRunning)
        ));

        scheduler.stop().await.expect("stop");
        assert!(matches!(
            scheduler.stop().await,
            Err(SchedulerError::NotRunning)
        ));
    }

    #[tokio::test]
    async fn invalid_expression_never_binds() {
        let (scheduler, _) = scheduler();
        assert!(scheduler.add("job-1", "61 * * * *").await.is_err());
        assert_eq!(scheduler.job_count().await, 0);
    }

    #[tokio::test]
    async fn running_scheduler_fires_entries() {
        let (scheduler, executor) = scheduler();

        // Six fields: a seconds-resolution expression firing every second.
        scheduler.add("job-1", "* * * * * *").await.expect("add");
        scheduler.start().await.expect("start");

        tokio::time::sleep(Duration::from_millis(2200)).await;
        scheduler.stop().await.expect("stop");

        assert!(executor.invocations.load(Ordering::SeqCst) >= 1);
    }
}
