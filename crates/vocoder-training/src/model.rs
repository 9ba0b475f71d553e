//! The trainable-entity contract consumed by the training loop.

use crate::error::{TrainingError, TrainingResult};
use crate::tensor::{Device, StateValue, Stateful, Tensor};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Named scalar losses. Keys iterate in ascending order.
pub type LossMap = BTreeMap<String, f32>;

/// Count of completed training iterations, persisted with the model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GlobalStep(u64);

impl GlobalStep {
    #[must_use]
    pub fn new(step: u64) -> Self {
        Self(step)
    }

    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }

    pub fn increment(&mut self) {
        self.0 += 1;
    }

    /// Whether the step lands on a multiple of `frequency`. A zero frequency never fires.
    #[must_use]
    pub fn is_multiple_of(self, frequency: u64) -> bool {
        frequency != 0 && self.0 % frequency == 0
    }

    #[must_use]
    pub fn to_state(self) -> StateValue {
        StateValue::Other(serde_json::Value::from(self.0))
    }

    pub fn from_state(state: StateValue) -> TrainingResult<Self> {
        let value = state.into_other()?;
        value
            .as_u64()
            .map(Self)
            .ok_or_else(|| TrainingError::State(format!("global step must be a non-negative integer, got {value}")))
    }
}

impl std::fmt::Display for GlobalStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Train,
    Eval,
}

/// One batch of paired spectrograms and waveforms.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub spectrograms: Tensor,
    pub waveforms: Tensor,
}

impl Batch {
    #[must_use]
    pub fn new(spectrograms: Tensor, waveforms: Tensor) -> Self {
        Self { spectrograms, waveforms }
    }

    #[must_use]
    pub fn to_device(self, device: Device) -> Self {
        Self {
            spectrograms: self.spectrograms.to_device(device),
            waveforms: self.waveforms.to_device(device),
        }
    }
}

/// Result of a single training step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutput {
    pub loss: f32,
    pub aux: LossMap,
}

impl StepOutput {
    #[must_use]
    pub fn new(loss: f32) -> Self {
        Self { loss, aux: LossMap::new() }
    }

    #[must_use]
    pub fn with_aux(mut self, name: impl Into<String>, value: f32) -> Self {
        self.aux.insert(name.into(), value);
        self
    }
}

/// An optimizer and the learning-rate scheduler driving it, if any.
pub struct OptimizerSlot<'a> {
    pub optimizer: &'a mut dyn Stateful,
    pub scheduler: Option<&'a mut dyn Stateful>,
}

impl<'a> OptimizerSlot<'a> {
    pub fn new(optimizer: &'a mut dyn Stateful, scheduler: Option<&'a mut dyn Stateful>) -> Self {
        Self { optimizer, scheduler }
    }
}

/// A vocoder the training loop can drive.
///
/// `state_dict` must include the global step so that it survives a
/// checkpoint round trip; [`GlobalStep::to_state`] and
/// [`GlobalStep::from_state`] exist for that purpose.
pub trait Vocoder: Stateful {
    /// Run one optimization step and report the overall loss plus named auxiliary losses.
    fn train_step(&mut self, batch: &Batch) -> TrainingResult<StepOutput>;

    fn validation_losses(&mut self, batch: &Batch) -> TrainingResult<LossMap>;

    /// Synthesize a waveform from a spectrogram batch.
    fn generate(&mut self, spectrograms: &Tensor) -> TrainingResult<Tensor>;

    fn is_done(&self) -> bool;

    /// Optimizers in a stable order; checkpoints pair them positionally.
    fn optimizers(&mut self) -> Vec<OptimizerSlot<'_>>;

    fn global_step(&self) -> GlobalStep;

    fn global_step_mut(&mut self) -> &mut GlobalStep;

    fn set_mode(&mut self, mode: Mode);

    /// Device holding the model's parameters.
    fn device(&self) -> Device {
        Device::Cpu
    }
}
