pub mod storage;

use crate::checkpoint::storage::{CheckpointStorage, FileCheckpointStorage};
use chrono::Utc;
use model::checkpoint::Checkpoint;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{Arc, RwLock},
};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("failed to persist checkpoint for stage '{stage}': {source}")]
    Save {
        stage: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read checkpoint for stage '{stage}': {source}")]
    Load {
        stage: String,
        #[source]
        source: std::io::Error,
    },

    #[error("checkpoint serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointConfig {
    pub enabled: bool,
    pub base_dir: PathBuf,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_dir: PathBuf::from("./data/checkpoints"),
        }
    }
}

/// Per-job keeper of durable (stage → position) records.
///
/// The manager owns its storage handle; other components go through it. The
/// in-memory map is the read path, storage writes happen inside the same
/// critical section. A disabled manager accepts every call and does nothing.
pub struct CheckpointManager {
    job_id: String,
    checkpoints: RwLock<HashMap<String, Checkpoint>>,
    storage: Arc<dyn CheckpointStorage>,
    enabled: bool,
}

impl CheckpointManager {
    pub fn new(
        job_id: impl Into<String>,
        storage: Arc<dyn CheckpointStorage>,
        enabled: bool,
    ) -> Result<Self, CheckpointError> {
        let job_id = job_id.into();
        let mut checkpoints = HashMap::new();

        if enabled {
            checkpoints = storage.list(&job_id)?;
            if !checkpoints.is_empty() {
                info!(
                    job_id = %job_id,
                    stages = checkpoints.len(),
                    "Loaded existing checkpoints"
                );
            }
        }

        Ok(Self {
            job_id,
            checkpoints: RwLock::new(checkpoints),
            storage,
            enabled,
        })
    }

    pub fn from_config(
        job_id: impl Into<String>,
        config: &CheckpointConfig,
    ) -> Result<Self, CheckpointError> {
        let storage = Arc::new(FileCheckpointStorage::new(&config.base_dir)?);
        Self::new(job_id, storage, config.enabled)
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Stamps the checkpoint with the current time and writes it durably.
    pub fn save(&self, stage: &str, mut checkpoint: Checkpoint) -> Result<(), CheckpointError> {
        if !self.enabled {
            return Ok(());
        }

        checkpoint.timestamp = Utc::now();

        let mut map = self.checkpoints.write().expect("checkpoint lock poisoned");
        self.storage.save(&self.job_id, stage, &checkpoint)?;
        map.insert(stage.to_owned(), checkpoint);

        debug!(job_id = %self.job_id, stage, "Checkpoint saved");
        Ok(())
    }

    /// The latest durable position for `stage`, or `None` if absent.
    pub fn load(&self, stage: &str) -> Option<Checkpoint> {
        if !self.enabled {
            return None;
        }

        self.checkpoints
            .read()
            .expect("checkpoint lock poisoned")
            .get(stage)
            .cloned()
    }

    /// Snapshot of every stage's checkpoint for this job.
    pub fn list(&self) -> HashMap<String, Checkpoint> {
        self.checkpoints
            .read()
            .expect("checkpoint lock poisoned")
            .clone()
    }

    pub fn delete(&self, stage: &str) -> Result<(), CheckpointError> {
        if !self.enabled {
            return Ok(());
        }

        let mut map = self.checkpoints.write().expect("checkpoint lock poisoned");
        map.remove(stage);
        self.storage.delete(&self.job_id, stage)?;

        debug!(job_id = %self.job_id, stage, "Checkpoint deleted");
        Ok(())
    }

    pub fn clear(&self) -> Result<(), CheckpointError> {
        if !self.enabled {
            return Ok(());
        }

        let mut map = self.checkpoints.write().expect("checkpoint lock poisoned");
        map.clear();
        self.storage.clear(&self.job_id)?;

        info!(job_id = %self.job_id, "Cleared all checkpoints");
        Ok(())
    }
}
