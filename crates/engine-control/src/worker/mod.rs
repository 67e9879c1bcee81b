mod pool;

pub use pool::{WorkerPool, WorkerPoolConfig, WorkerPoolError, WorkerPoolStats};
