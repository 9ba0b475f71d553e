use std::path::PathBuf;
use thiserror::Error;

pub type TrainingResult<T> = std::result::Result<T, TrainingError>;

#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("detected NaN loss at step {step}")]
    Diverged { step: u64 },

    #[error("corrupt checkpoint {}: {reason}", path.display())]
    CorruptCheckpoint { path: PathBuf, reason: String },

    #[error("checkpoint holds {saved} optimizer states but the model has {live} optimizers")]
    OptimizerCountMismatch { saved: usize, live: usize },

    #[error("scheduler mismatch for optimizer {index}: checkpoint has {saved}, model has {live}")]
    SchedulerMismatch { index: usize, saved: &'static str, live: &'static str },

    #[error("model does not exist at {}", .0.display())]
    MissingModelDir(PathBuf),

    #[error("config.yaml does not exist at {}", .0.display())]
    MissingConfig(PathBuf),

    #[error("found difference between saved and expected config:\n{0}")]
    ConfigMismatch(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("dataset error: {0}")]
    Dataset(String),

    #[error("trainer error: {0}")]
    Trainer(String),

    #[error("state error: {0}")]
    State(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TrainingError {
    /// Errors after which a run must not continue or be retried.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Diverged { .. }
                | Self::CorruptCheckpoint { .. }
                | Self::OptimizerCountMismatch { .. }
                | Self::SchedulerMismatch { .. }
        )
    }

    /// Errors raised before the loop starts because the model directory is unusable.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::MissingModelDir(_)
                | Self::MissingConfig(_)
                | Self::ConfigMismatch(_)
                | Self::InvalidConfig(_)
        )
    }
}
