use crate::checkpoint::CheckpointError;
use model::checkpoint::Checkpoint;
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};
use tracing::warn;

/// Pluggable persistence behind the checkpoint manager.
pub trait CheckpointStorage: Send + Sync {
    fn save(&self, job_id: &str, stage: &str, checkpoint: &Checkpoint)
        -> Result<(), CheckpointError>;

    fn load(&self, job_id: &str, stage: &str) -> Result<Option<Checkpoint>, CheckpointError>;

    fn list(&self, job_id: &str) -> Result<HashMap<String, Checkpoint>, CheckpointError>;

    fn delete(&self, job_id: &str, stage: &str) -> Result<(), CheckpointError>;

    fn clear(&self, job_id: &str) -> Result<(), CheckpointError>;
}

/// Reference file-backed storage: one directory per job id, one
/// `<stage>.json` per stage. A missing file means "no checkpoint"; corrupt
/// files are skipped with a warning when listing.
pub struct FileCheckpointStorage {
    base_path: PathBuf,
}

impl FileCheckpointStorage {
    pub fn new(base_path: impl AsRef<Path>) -> Result<Self, CheckpointError> {
        let base_path = base_path.as_ref().to_path_buf();
        fs::create_dir_all(&base_path)?;
        Ok(Self { base_path })
    }

    fn job_dir(&self, job_id: &str) -> PathBuf {
        self.base_path.join(job_id)
    }

    fn stage_file(&self, job_id: &str, stage: &str) -> PathBuf {
        self.job_dir(job_id).join(format!("{stage}.json"))
    }
}

impl CheckpointStorage for FileCheckpointStorage {
    fn save(
        &self,
        job_id: &str,
        stage: &str,
        checkpoint: &Checkpoint,
    ) -> Result<(), CheckpointError> {
        let job_dir = self.job_dir(job_id);
        fs::create_dir_all(&job_dir).map_err(|source| CheckpointError::Save {
            stage: stage.to_owned(),
            source,
        })?;

        let data = serde_json::to_string_pretty(checkpoint)?;
        fs::write(self.stage_file(job_id, stage), data).map_err(|source| CheckpointError::Save {
            stage: stage.to_owned(),
            source,
        })
    }

    fn load(&self, job_id: &str, stage: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        let path = self.stage_file(job_id, stage);
        let data = match fs::read_to_string(&path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(CheckpointError::Load {
                    stage: stage.to_owned(),
                    source,
                })
            }
        };

        Ok(Some(serde_json::from_str(&data)?))
    }

    fn list(&self, job_id: &str) -> Result<HashMap<String, Checkpoint>, CheckpointError> {
        let job_dir = self.job_dir(job_id);
        if !job_dir.exists() {
            return Ok(HashMap::new());
        }

        let mut checkpoints = HashMap::new();
        for entry in fs::read_dir(&job_dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            let Some(stage) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };

            match fs::read_to_string(&path)
                .map_err(CheckpointError::from)
                .and_then(|data| serde_json::from_str(&data).map_err(CheckpointError::from))
            {
                Ok(checkpoint) => {
                    checkpoints.insert(stage.to_owned(), checkpoint);
                }
                Err(err) => {
                    warn!(job_id, stage, error = %err, "Skipping unreadable checkpoint file");
                }
            }
        }

        Ok(checkpoints)
    }

    fn delete(&self, job_id: &str, stage: &str) -> Result<(), CheckpointError> {
        match fs::remove_file(self.stage_file(job_id, stage)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(CheckpointError::Storage(source)),
        }
    }

    fn clear(&self, job_id: &str) -> Result<(), CheckpointError> {
        match fs::remove_dir_all(self.job_dir(job_id)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(CheckpointError::Storage(source)),
        }
    }
}
