mod manager;

pub use manager::{JobError, JobManager, JobStats};
