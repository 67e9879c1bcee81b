use chrono::Utc;
use engine_core::store::{MetadataStore, StoreError};
use model::execution::worker::{Worker, WorkerStatus};
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::{sync::RwLock, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum WorkerPoolError {
    #[error("worker not found: {0}")]
    NotFound(String),

    #[error("worker pool is already running")]
    AlreadyRunning,

    #[error("worker pool is not running")]
    NotRunning,

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    pub heartbeat_interval: Duration,
    pub heartbeat_timeout: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            // 3x the interval: a worker misses two beats before going dark.
            heartbeat_timeout: Duration::from_secs(90),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerPoolStats {
    pub total: usize,
    pub online: usize,
    pub busy: usize,
    pub offline: usize,
    pub total_cpu_cores: usize,
    pub total_memory_mb: u64,
}

struct Monitor {
    running: bool,
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

/// Tracks execution-capable nodes and their liveness.
///
/// A background monitor flips workers offline when their heartbeat goes
/// stale and back online when it freshens. The `busy` status is an advisory
/// hint set by schedulers, never derived here.
pub struct WorkerPool {
    store: Arc<dyn MetadataStore>,
    workers: Arc<RwLock<HashMap<String, Worker>>>,
    config: WorkerPoolConfig,
    monitor: tokio::sync::Mutex<Monitor>,
}

impl WorkerPool {
    pub fn new(store: Arc<dyn MetadataStore>, config: WorkerPoolConfig) -> Self {
        Self {
            store,
            workers: Arc::new(RwLock::new(HashMap::new())),
            config,
            monitor: tokio::sync::Mutex::new(Monitor {
                running: false,
                token: CancellationToken::new(),
                handle: None,
            }),
        }
    }

    /// Registers this node: detects the local IP (loopback fallback), CPU
    /// cores and memory, persists the row and caches it.
    pub async fn register(&self, hostname: &str, port: u16) -> Result<Worker, WorkerPoolError> {
        let ip_address = match local_ip_address::local_ip() {
            Ok(ip) => ip.to_string(),
            Err(err) => {
                warn!(error = %err, "Failed to detect local IP, using loopback");
                "127.0.0.1".to_owned()
            }
        };

        let now = Utc::now();
        let worker = Worker {
            id: uuid::Uuid::new_v4().to_string(),
            hostname: hostname.to_owned(),
            ip_address,
            port,
            status: WorkerStatus::Online,
            cpu_cores: num_cpus::get(),
            memory_mb: detect_memory_mb(),
            last_heartbeat: now,
            registered_at: now,
        };

        self.store.register_worker(&worker).await?;
        self.workers
            .write()
            .await
            .insert(worker.id.clone(), worker.clone());

        info!(
            worker_id = %worker.id,
            address = %format!("{}:{}", worker.ip_address, worker.port),
            cpu_cores = worker.cpu_cores,
            memory_mb = worker.memory_mb,
            "Registered worker"
        );
        Ok(worker)
    }

    pub async fn unregister(&self, worker_id: &str) -> Result<(), WorkerPoolError> {
        let mut workers = self.workers.write().await;
        if !workers.contains_key(worker_id) {
            return Err(WorkerPoolError::NotFound(worker_id.to_owned()));
        }

        self.store.unregister_worker(worker_id).await?;
        workers.remove(worker_id);

        info!(worker_id, "Unregistered worker");
        Ok(())
    }

    /// Freshens the worker's heartbeat and marks it online, loading the row
    /// from storage on a cache miss.
    pub async fn heartbeat(&self, worker_id: &str) -> Result<(), WorkerPoolError> {
        let mut workers = self.workers.write().await;

        if !workers.contains_key(worker_id) {
            let worker = self
                .store
                .get_worker(worker_id)
                .await
                .map_err(|_| WorkerPoolError::NotFound(worker_id.to_owned()))?;
            workers.insert(worker_id.to_owned(), worker);
        }

        let worker = workers.get_mut(worker_id).expect("inserted above");
        worker.last_heartbeat = Utc::now();
        worker.status = WorkerStatus::Online;
        self.store.update_worker(worker).await?;

        debug!(worker_id, "Heartbeat updated");
        Ok(())
    }

    pub async fn get(&self, worker_id: &str) -> Result<Worker, WorkerPoolError> {
        if let Some(worker) = self.workers.read().await.get(worker_id) {
            return Ok(worker.clone());
        }

        self.store
            .get_worker(worker_id)
            .await
            .map_err(|_| WorkerPoolError::NotFound(worker_id.to_owned()))
    }

    /// All workers from storage, refreshing the cache.
    pub async fn list(&self) -> Result<Vec<Worker>, WorkerPoolError> {
        let listed = self.store.list_workers().await?;

        let mut workers = self.workers.write().await;
        for worker in &listed {
            workers.insert(worker.id.clone(), worker.clone());
        }

        Ok(listed)
    }

    /// Workers whose heartbeat is fresher than the configured timeout.
    pub async fn healthy_workers(&self) -> Vec<Worker> {
        self.workers
            .read()
            .await
            .values()
            .filter(|worker| worker.is_healthy(self.config.heartbeat_timeout))
            .cloned()
            .collect()
    }

    pub async fn worker_count(&self) -> usize {
        self.workers.read().await.len()
    }

    /// Starts the liveness monitor. A second start is an error.
    pub async fn start(&self) -> Result<(), WorkerPoolError> {
        let mut monitor = self.monitor.lock().await;
        if monitor.running {
            return Err(WorkerPoolError::AlreadyRunning);
        }

        match self.store.list_workers().await {
            Ok(listed) => {
                let mut workers = self.workers.write().await;
                for worker in listed {
                    workers.insert(worker.id.clone(), worker);
                }
                info!(count = workers.len(), "Loaded existing workers");
            }
            Err(err) => warn!(error = %err, "Failed to load existing workers"),
        }

        let token = CancellationToken::new();
        monitor.token = token.clone();
        monitor.handle = Some(tokio::spawn(monitor_loop(
            self.workers.clone(),
            self.store.clone(),
            self.config.clone(),
            token,
        )));
        monitor.running = true;

        info!(
            interval_secs = self.config.heartbeat_interval.as_secs_f64(),
            timeout_secs = self.config.heartbeat_timeout.as_secs_f64(),
            "Worker pool started"
        );
        Ok(())
    }

    /// Stops the monitor. A second stop is an error.
    pub async fn stop(&self) -> Result<(), WorkerPoolError> {
        let mut monitor = self.monitor.lock().await;
        if !monitor.running {
            return Err(WorkerPoolError::NotRunning);
        }

        monitor.token.cancel();
        if let Some(handle) = monitor.handle.take() {
            let _ = handle.await;
        }
        monitor.running = false;

        info!("Worker pool stopped");
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        self.monitor.lock().await.running
    }

    pub async fn stats(&self) -> WorkerPoolStats {
        let workers = self.workers.read().await;

        let mut stats = WorkerPoolStats {
            total: workers.len(),
            ..Default::default()
        };
        for worker in workers.values() {
            match worker.status {
                WorkerStatus::Online => stats.online += 1,
                WorkerStatus::Busy => stats.busy += 1,
                WorkerStatus::Offline => stats.offline += 1,
            }
            stats.total_cpu_cores += worker.cpu_cores;
            stats.total_memory_mb += worker.memory_mb;
        }

        stats
    }
}

async fn monitor_loop(
    workers: Arc<RwLock<HashMap<String, Worker>>>,
    store: Arc<dyn MetadataStore>,
    config: WorkerPoolConfig,
    token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(config.heartbeat_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // The first tick of a tokio interval fires immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                check_worker_health(&workers, store.as_ref(), config.heartbeat_timeout).await;
            }
            _ = token.cancelled() => return,
        }
    }
}

async fn check_worker_health(
    workers: &RwLock<HashMap<String, Worker>>,
    store: &dyn MetadataStore,
    timeout: Duration,
) {
    let mut workers = workers.write().await;
    let now = Utc::now();

    for worker in workers.values_mut() {
        let age = (now - worker.last_heartbeat)
            .to_std()
            .unwrap_or(Duration::ZERO);

        if age > timeout {
            if worker.status != WorkerStatus::Offline {
                worker.status = WorkerStatus::Offline;
                warn!(
                    worker_id = %worker.id,
                    hostname = %worker.hostname,
                    stale_secs = age.as_secs_f64(),
                    "Worker marked offline"
                );
                if let Err(err) = store.update_worker(worker).await {
                    warn!(worker_id = %worker.id, error = %err, "Failed to persist offline status");
                }
            }
        } else if worker.status == WorkerStatus::Offline {
            worker.status = WorkerStatus::Online;
            info!(worker_id = %worker.id, hostname = %worker.hostname, "Worker back online");
            if let Err(err) = store.update_worker(worker).await {
                warn!(worker_id = %worker.id, error = %err, "Failed to persist online status");
            }
        }
    }
}

fn detect_memory_mb() -> u64 {
    let mut system = sysinfo::System::new();
    system.refresh_memory();
    system.total_memory() / (1024 * 1024)
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine_core::store::memory::MemoryMetadataStore;

    fn pool(interval_ms: u64, timeout_ms: u64) -> WorkerPool {
        WorkerPool::new(
            Arc::new(MemoryMetadataStore::new()),
            WorkerPoolConfig {
                heartbeat_interval: Duration::from_millis(interval_ms),
                heartbeat_timeout: Duration::from_millis(timeout_ms),
            },
        )
    }

    #[tokio::test]
    async fn register_then_unregister_restores_prior_state() {
        let pool = pool(50, 100);
        assert_eq!(pool.worker_count().await, 0);

        let worker = pool.register("node-a", 7070).await.expect("register");
        assert_eq!(worker.status, WorkerStatus::Online);
        assert_eq!(pool.worker_count().await, 1);

        pool.unregister(&worker.id).await.expect("unregister");
        assert_eq!(pool.worker_count().await, 0);
        assert!(pool.list().await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn stale_worker_goes_offline_then_recovers() {
        let pool = pool(50, 100);
        let worker = pool.register("node-a", 7070).await.expect("register");
        pool.start().await.expect("start");

        // No heartbeats: within three ticks the worker must be offline.
        tokio::time::sleep(Duration::from_millis(200)).await;
        let status = pool.get(&worker.id).await.expect("get").status;
        assert_eq!(status, WorkerStatus::Offline);

        pool.heartbeat(&worker.id).await.expect("heartbeat");
        tokio::time::sleep(Duration::from_millis(200)).await;
        let status = pool.get(&worker.id).await.expect("get").status;
        assert_eq!(status, WorkerStatus::Online);

        pool.stop().await.expect("stop");
    }

    #[tokio::test]
    async fn start_and_stop_are_idempotency_guarded() {
        let pool = pool(50, 100);
        pool.start().await.expect("first start");
        assert!(matches!(
            pool.start().await,
            Err(WorkerPoolError::AlreadyRunning)
        ));

        pool.stop().await.expect("first stop");
        assert!(matches!(pool.stop().await, Err(WorkerPoolError::NotRunning)));
    }

    #[tokio::test]
    async fn healthy_workers_excludes_stale_entries() {
        let pool = pool(50, 100);
        let worker = pool.register("node-a", 7070).await.expect("register");
        assert_eq!(pool.healthy_workers().await.len(), 1);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(pool.healthy_workers().await.is_empty());

        pool.heartbeat(&worker.id).await.expect("heartbeat");
        assert_eq!(pool.healthy_workers().await.len(), 1);
    }

    #[tokio::test]
    async fn stats_aggregate_cores_and_memory() {
        let pool = pool(50, 100);
        pool.register("node-a", 7070).await.expect("register");
        pool.register("node-b", 7071).await.expect("register");

        let stats = pool.stats().await;
        assert_eq!(stats.total, 2);
        assert_eq!(stats.online, 2);
        assert!(stats.total_cpu_cores >= 2);
    }
}
