use engine_control::{executor::ExecutorError, jobs::JobError};
use engine_core::{checkpoint::CheckpointError, plugin::registry::RegistryError};
use engine_runtime::config::SpecError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("shutdown requested")]
    ShutdownRequested,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Spec(#[from] SpecError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Job(#[from] JobError),

    #[error(transparent)]
    Executor(#[from] ExecutorError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error(transparent)]
    JsonSerialize(#[from] serde_json::Error),

    #[error("{0}")]
    Unexpected(String),
}
