use crate::checkpoint::CheckpointStore;
use crate::error::{TrainingError, TrainingResult};
use std::path::{Path, PathBuf};

/// Filesystem layout of a model directory.
///
/// ```text
/// <model_dir>/config.yaml
/// <model_dir>/checkpoints/<8-digit-step>.ckpt
/// <model_dir>/logs/
/// ```
#[derive(Debug, Clone)]
pub struct ModelLayout {
    root: PathBuf,
}

impl ModelLayout {
    pub const CONFIG_YAML: &'static str = "config.yaml";
    pub const CHECKPOINT_DIR: &'static str = "checkpoints";
    pub const LOG_DIR: &'static str = "logs";

    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn config_path(&self) -> PathBuf {
        self.root.join(Self::CONFIG_YAML)
    }

    #[must_use]
    pub fn checkpoints_dir(&self) -> PathBuf {
        self.root.join(Self::CHECKPOINT_DIR)
    }

    #[must_use]
    pub fn logs_dir(&self) -> PathBuf {
        self.root.join(Self::LOG_DIR)
    }

    #[must_use]
    pub fn checkpoint_store(&self) -> CheckpointStore {
        CheckpointStore::new(self.checkpoints_dir())
    }

    pub fn ensure_dirs(&self) -> TrainingResult<()> {
        std::fs::create_dir_all(&self.root)?;
        std::fs::create_dir_all(self.checkpoints_dir())?;
        std::fs::create_dir_all(self.logs_dir())?;
        Ok(())
    }

    /// Fail unless the model directory exists, is non-empty and holds a config.
    pub fn require_existing(&self) -> TrainingResult<()> {
        let has_entries = std::fs::read_dir(&self.root)
            .map(|mut entries| entries.next().is_some())
            .unwrap_or(false);
        if !has_entries {
            return Err(TrainingError::MissingModelDir(self.root.clone()));
        }
        if !self.config_path().is_file() {
            return Err(TrainingError::MissingConfig(self.root.clone()));
        }
        Ok(())
    }
}
