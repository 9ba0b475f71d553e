//! Checkpoint save, restore and discovery.
//!
//! A checkpoint captures the model state plus every optimizer and scheduler
//! state, with all tensors on the host. Files are named by the zero-padded
//! global step so lexicographic order equals numeric order:
//! `<checkpoints>/00005000.ckpt`.
//!
//! Writes go to a temporary sibling that is synced and then renamed into
//! place, so a crash mid-save never leaves a loadable partial file. The file
//! carries a SHA-256 of the record bytes as written; the hash is checked
//! before the record is parsed and a mismatch is reported as corruption.

use crate::error::{TrainingError, TrainingResult};
use crate::model::Vocoder;
use crate::tensor::{Device, StateValue};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};

pub const CHECKPOINT_EXTENSION: &str = "ckpt";

const CHECKPOINT_VERSION_CURRENT: u32 = 1;

/// Everything needed to resume training.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub model: StateValue,
    pub optimizers: Vec<StateValue>,
    pub schedulers: Vec<Option<StateValue>>,
}

impl CheckpointRecord {
    /// Collect the full training state of `model`.
    pub fn capture<M: Vocoder + ?Sized>(model: &mut M) -> Self {
        let state = model.state_dict();
        let mut optimizers = Vec::new();
        let mut schedulers = Vec::new();
        for slot in model.optimizers() {
            optimizers.push(slot.optimizer.state_dict());
            schedulers.push(slot.scheduler.map(|s| s.state_dict()));
        }
        Self { model: state, optimizers, schedulers }
    }

    #[must_use]
    pub fn to_device(self, device: Device) -> Self {
        Self {
            model: self.model.to_device(device),
            optimizers: self.optimizers.into_iter().map(|s| s.to_device(device)).collect(),
            schedulers: self
                .schedulers
                .into_iter()
                .map(|s| s.map(|s| s.to_device(device)))
                .collect(),
        }
    }

    /// Paths of model tensors containing NaN.
    #[must_use]
    pub fn nan_model_tensors(&self) -> Vec<String> {
        let mut poisoned = Vec::new();
        self.model.visit_tensors(&mut |path, tensor| {
            if tensor.has_nan() {
                poisoned.push(path.to_string());
            }
        });
        poisoned
    }
}

/// On-disk envelope. The checksum covers the exact bytes of `record`.
#[derive(Debug, Serialize, Deserialize)]
struct CheckpointFile<'a> {
    version: u32,
    sha256: String,
    #[serde(borrow)]
    record: &'a RawValue,
}

fn digest(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// A saved checkpoint and the step it was taken at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckpointEntry {
    pub step: u64,
    pub path: PathBuf,
}

#[must_use]
pub fn checkpoint_file_name(step: u64) -> String {
    format!("{step:08}.{CHECKPOINT_EXTENSION}")
}

/// Directory of checkpoints for one model.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    #[must_use]
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn path_for_step(&self, step: u64) -> PathBuf {
        self.dir.join(checkpoint_file_name(step))
    }

    /// Write a checkpoint for the model's current global step.
    ///
    /// A checkpoint already present for this step is left untouched and its path returned.
    pub fn save<M: Vocoder + ?Sized>(&self, model: &mut M) -> TrainingResult<PathBuf> {
        let step = model.global_step().get();
        let path = self.path_for_step(step);
        if path.exists() {
            tracing::debug!(path = %path.display(), "checkpoint for this step already exists");
            return Ok(path);
        }

        let record = CheckpointRecord::capture(model).to_device(Device::Cpu);
        std::fs::create_dir_all(&self.dir)?;

        let raw = serde_json::value::to_raw_value(&record)?;
        let file = CheckpointFile {
            version: CHECKPOINT_VERSION_CURRENT,
            sha256: digest(raw.get().as_bytes()),
            record: &raw,
        };
        let bytes = serde_json::to_vec(&file)?;

        let tmp = path.with_extension(format!("{CHECKPOINT_EXTENSION}.tmp"));
        {
            let mut out = std::fs::File::create(&tmp)?;
            out.write_all(&bytes)?;
            out.sync_all()?;
        }
        std::fs::rename(&tmp, &path)?;

        tracing::info!(step, path = %path.display(), "saved checkpoint");
        Ok(path)
    }

    /// Read and verify a checkpoint without applying it.
    pub fn read(path: &Path) -> TrainingResult<CheckpointRecord> {
        let bytes = std::fs::read(path)?;
        let corrupt = |reason: String| TrainingError::CorruptCheckpoint { path: path.to_path_buf(), reason };

        let file: CheckpointFile =
            serde_json::from_slice(&bytes).map_err(|e| corrupt(format!("unreadable record: {e}")))?;
        if file.version > CHECKPOINT_VERSION_CURRENT {
            return Err(corrupt(format!(
                "unsupported checkpoint version {} (max supported {})",
                file.version, CHECKPOINT_VERSION_CURRENT
            )));
        }
        if digest(file.record.get().as_bytes()) != file.sha256 {
            return Err(corrupt("checksum mismatch".to_string()));
        }
        let record: CheckpointRecord =
            serde_json::from_str(file.record.get()).map_err(|e| corrupt(format!("unreadable record: {e}")))?;
        if record.optimizers.len() != record.schedulers.len() {
            return Err(corrupt(format!(
                "{} optimizer states but {} scheduler entries",
                record.optimizers.len(),
                record.schedulers.len()
            )));
        }
        Ok(record)
    }

    /// Restore `model` and its optimizers and schedulers from `path`.
    pub fn load<M: Vocoder + ?Sized>(&self, model: &mut M, path: &Path) -> TrainingResult<()> {
        tracing::info!(path = %path.display(), "loading model from checkpoint");
        let mut record = Self::read(path)?;

        let device = model.device();
        if device.is_accelerator() {
            record = record.to_device(device);
        }

        let poisoned = record.nan_model_tensors();
        if !poisoned.is_empty() {
            return Err(TrainingError::CorruptCheckpoint {
                path: path.to_path_buf(),
                reason: format!("found NaN in checkpoint tensor(s): {}", poisoned.join(", ")),
            });
        }

        {
            let slots = model.optimizers();
            if slots.len() != record.optimizers.len() {
                return Err(TrainingError::OptimizerCountMismatch {
                    saved: record.optimizers.len(),
                    live: slots.len(),
                });
            }
            for (index, (slot, saved)) in slots.iter().zip(&record.schedulers).enumerate() {
                match (slot.scheduler.is_some(), saved.is_some()) {
                    (true, false) => {
                        return Err(TrainingError::SchedulerMismatch { index, saved: "none", live: "a scheduler" });
                    }
                    (false, true) => {
                        return Err(TrainingError::SchedulerMismatch { index, saved: "a scheduler", live: "none" });
                    }
                    _ => {}
                }
            }
        }

        let CheckpointRecord { model: model_state, optimizers, schedulers } = record;
        model.load_state_dict(model_state)?;
        for ((slot, opt_state), sched_state) in model.optimizers().into_iter().zip(optimizers).zip(schedulers) {
            slot.optimizer.load_state_dict(opt_state)?;
            if let (Some(scheduler), Some(state)) = (slot.scheduler, sched_state) {
                scheduler.load_state_dict(state)?;
            }
        }

        tracing::info!(step = model.global_step().get(), "restored checkpoint");
        Ok(())
    }

    /// Every checkpoint in the directory, oldest first.
    pub fn list(&self) -> TrainingResult<Vec<CheckpointEntry>> {
        let dir = match std::fs::read_dir(&self.dir) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        for entry in dir {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(CHECKPOINT_EXTENSION) {
                continue;
            }
            let Some(step) = path.file_stem().and_then(|s| s.to_str()).and_then(|s| s.parse().ok()) else {
                continue;
            };
            entries.push(CheckpointEntry { step, path });
        }
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    /// The most recent checkpoint, if any.
    pub fn latest(&self) -> TrainingResult<Option<PathBuf>> {
        Ok(self.list()?.pop().map(|e| e.path))
    }
}
