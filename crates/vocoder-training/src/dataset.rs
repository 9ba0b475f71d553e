use crate::error::{TrainingError, TrainingResult};
use crate::model::Batch;
use crate::tensor::Tensor;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A finite, restartable sequence of batches.
///
/// Every call to [`BatchSource::batches`] starts a fresh pass from the beginning.
pub trait BatchSource {
    fn batches(&self) -> Box<dyn Iterator<Item = Batch> + '_>;
}

impl BatchSource for Vec<Batch> {
    fn batches(&self) -> Box<dyn Iterator<Item = Batch> + '_> {
        Box::new(self.iter().cloned())
    }
}

impl BatchSource for [Batch] {
    fn batches(&self) -> Box<dyn Iterator<Item = Batch> + '_> {
        Box::new(self.iter().cloned())
    }
}

/// A single utterance: acoustic frames plus the waveform they describe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Utterance {
    /// `frames x n_mels`
    pub spectrogram: Vec<Vec<f32>>,
    pub waveform: Vec<f32>,
}

impl Utterance {
    fn frames(&self) -> usize {
        self.spectrogram.len()
    }

    fn n_mels(&self) -> usize {
        self.spectrogram.first().map_or(0, Vec::len)
    }

    fn hop_length(&self) -> usize {
        self.waveform.len() / self.frames().max(1)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetConfig {
    pub batch_size: usize,
    /// Share of utterances held out for validation, taken from the end of the file.
    pub valid_fraction: f64,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self { batch_size: 4, valid_fraction: 0.1 }
    }
}

impl DatasetConfig {
    pub fn validate(&self) -> TrainingResult<()> {
        if self.batch_size == 0 {
            return Err(TrainingError::InvalidConfig("dataset.batch_size must be >= 1".to_string()));
        }
        if !(0.0..1.0).contains(&self.valid_fraction) {
            return Err(TrainingError::InvalidConfig(
                "dataset.valid_fraction must be in [0, 1)".to_string(),
            ));
        }
        Ok(())
    }
}

/// Batched training and validation splits held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDataset {
    pub train: Vec<Batch>,
    pub valid: Vec<Batch>,
}

impl InMemoryDataset {
    pub fn from_utterances(utterances: &[Utterance], config: &DatasetConfig) -> TrainingResult<Self> {
        config.validate()?;
        validate_utterances(utterances)?;

        let n_valid = (utterances.len() as f64 * config.valid_fraction).ceil() as usize;
        let n_train = utterances.len().saturating_sub(n_valid);
        if n_train == 0 {
            return Err(TrainingError::Dataset(format!(
                "no training utterances left after holding out {n_valid} for validation"
            )));
        }

        let (train, valid) = utterances.split_at(n_train);
        let dataset = Self {
            train: make_batches(train, config.batch_size)?,
            valid: make_batches(valid, config.batch_size)?,
        };
        tracing::info!(
            train_batches = dataset.train.len(),
            valid_batches = dataset.valid.len(),
            "loaded dataset"
        );
        Ok(dataset)
    }
}

pub fn read_jsonl_utterances(path: &Path) -> TrainingResult<Vec<Utterance>> {
    let contents = std::fs::read_to_string(path)?;
    let mut utterances = Vec::new();

    for (idx, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let utterance: Utterance = serde_json::from_str(line).map_err(|e| {
            TrainingError::Dataset(format!("failed to parse jsonl line {}: {}", idx + 1, e))
        })?;
        utterances.push(utterance);
    }

    Ok(utterances)
}

pub fn validate_utterances(utterances: &[Utterance]) -> TrainingResult<()> {
    let Some(first) = utterances.first() else {
        return Err(TrainingError::Dataset("dataset must not be empty".to_string()));
    };
    let (n_mels, hop_length) = (first.n_mels(), first.hop_length());

    for (idx, u) in utterances.iter().enumerate() {
        if u.frames() == 0 || u.n_mels() == 0 {
            return Err(TrainingError::Dataset(format!("utterance[{idx}] has no spectrogram frames")));
        }
        if u.spectrogram.iter().any(|frame| frame.len() != n_mels) {
            return Err(TrainingError::Dataset(format!(
                "utterance[{idx}] frames must all have {n_mels} mel bins"
            )));
        }
        if u.waveform.len() != u.frames() * hop_length {
            return Err(TrainingError::Dataset(format!(
                "utterance[{idx}] waveform has {} samples, expected {} frames x {hop_length}",
                u.waveform.len(),
                u.frames()
            )));
        }
    }
    Ok(())
}

/// Group utterances into batches, cropping each batch to its shortest member.
fn make_batches(utterances: &[Utterance], batch_size: usize) -> TrainingResult<Vec<Batch>> {
    utterances
        .chunks(batch_size)
        .map(|chunk| {
            let frames = chunk.iter().map(Utterance::frames).min().unwrap_or(0);
            let n_mels = chunk[0].n_mels();
            let hop_length = chunk[0].hop_length();

            let mut spectrograms = Vec::with_capacity(chunk.len() * frames * n_mels);
            let mut waveforms = Vec::with_capacity(chunk.len() * frames * hop_length);
            for u in chunk {
                for frame in &u.spectrogram[..frames] {
                    spectrograms.extend_from_slice(frame);
                }
                waveforms.extend_from_slice(&u.waveform[..frames * hop_length]);
            }

            Ok(Batch::new(
                Tensor::new(vec![chunk.len(), frames, n_mels], spectrograms)?,
                Tensor::new(vec![chunk.len(), frames * hop_length], waveforms)?,
            ))
        })
        .collect()
}
