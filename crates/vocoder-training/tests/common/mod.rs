#![allow(dead_code)]

use std::collections::BTreeMap;
use vocoder_training::{
    take_entry, Batch, Device, GlobalStep, LossMap, Mode, OptimizerSlot, StateValue, Stateful, StepOutput,
    Tensor, TrainingResult, Vocoder,
};

/// Optimizer or scheduler with one tensor buffer and one opaque hyperparameter.
#[derive(Debug, Clone, PartialEq)]
pub struct FakeOptim {
    pub buffer: Tensor,
    pub rate: f64,
}

impl FakeOptim {
    pub fn new(rate: f64) -> Self {
        Self { buffer: Tensor::zeros(vec![2]), rate }
    }
}

impl Stateful for FakeOptim {
    fn state_dict(&self) -> StateValue {
        StateValue::mapping([
            ("buffer", StateValue::Tensor(self.buffer.clone())),
            ("rate", StateValue::Other(serde_json::json!(self.rate))),
        ])
    }

    fn load_state_dict(&mut self, state: StateValue) -> TrainingResult<()> {
        let mut entries = state.into_mapping()?;
        self.buffer = take_entry(&mut entries, "buffer")?.into_tensor()?;
        self.rate = take_entry(&mut entries, "rate")?.into_other()?.as_f64().unwrap_or_default();
        Ok(())
    }
}

/// Deterministic stand-in for a real vocoder.
///
/// Training losses come from `losses` (cycled, default 1.0). Validation on a
/// batch whose first spectrogram value is `v` reports `{"a": v, "b": 2v}`.
/// Generation doubles the spectrogram.
pub struct ScriptedVocoder {
    pub step: GlobalStep,
    pub max_steps: u64,
    pub weights: Tensor,
    pub optimizers: Vec<(FakeOptim, Option<FakeOptim>)>,
    pub losses: Vec<f32>,
    pub train_calls: u64,
    pub seen: Vec<f32>,
    pub modes: Vec<Mode>,
    pub device: Device,
    pub step_delay: Option<std::time::Duration>,
}

impl ScriptedVocoder {
    pub fn new(max_steps: u64) -> Self {
        Self {
            step: GlobalStep::default(),
            max_steps,
            weights: Tensor::from_vec(vec![0.0, 0.0, 0.0]),
            optimizers: vec![(FakeOptim::new(0.1), Some(FakeOptim::new(1.0))), (FakeOptim::new(0.2), None)],
            losses: Vec::new(),
            train_calls: 0,
            seen: Vec::new(),
            modes: Vec::new(),
            device: Device::Cpu,
            step_delay: None,
        }
    }

    pub fn with_losses(mut self, losses: Vec<f32>) -> Self {
        self.losses = losses;
        self
    }
}

impl Stateful for ScriptedVocoder {
    fn state_dict(&self) -> StateValue {
        StateValue::mapping([
            ("global_step", self.step.to_state()),
            ("weights", StateValue::Tensor(self.weights.clone())),
        ])
    }

    fn load_state_dict(&mut self, state: StateValue) -> TrainingResult<()> {
        let mut entries = state.into_mapping()?;
        self.step = GlobalStep::from_state(take_entry(&mut entries, "global_step")?)?;
        self.weights = take_entry(&mut entries, "weights")?.into_tensor()?;
        Ok(())
    }
}

impl Vocoder for ScriptedVocoder {
    fn train_step(&mut self, batch: &Batch) -> TrainingResult<StepOutput> {
        if let Some(delay) = self.step_delay {
            std::thread::sleep(delay);
        }
        let loss = if self.losses.is_empty() {
            1.0
        } else {
            self.losses[(self.train_calls as usize) % self.losses.len()]
        };
        self.train_calls += 1;
        self.seen.push(batch.spectrograms.data()[0]);

        for w in self.weights.data_mut() {
            *w += 0.5;
        }
        for (opt, sched) in &mut self.optimizers {
            for b in opt.buffer.data_mut() {
                *b += 1.0;
            }
            if let Some(sched) = sched {
                sched.rate *= 0.5;
            }
        }
        Ok(StepOutput::new(loss).with_aux("l1", loss * 2.0))
    }

    fn validation_losses(&mut self, batch: &Batch) -> TrainingResult<LossMap> {
        let v = batch.spectrograms.data()[0];
        Ok(LossMap::from([("b".to_string(), 2.0 * v), ("a".to_string(), v)]))
    }

    fn generate(&mut self, spectrograms: &Tensor) -> TrainingResult<Tensor> {
        Ok(Tensor::from_vec(spectrograms.data().iter().map(|v| v * 2.0).collect()))
    }

    fn is_done(&self) -> bool {
        self.step.get() >= self.max_steps
    }

    fn optimizers(&mut self) -> Vec<OptimizerSlot<'_>> {
        self.optimizers
            .iter_mut()
            .map(|(opt, sched)| {
                OptimizerSlot::new(opt as &mut dyn Stateful, sched.as_mut().map(|s| s as &mut dyn Stateful))
            })
            .collect()
    }

    fn global_step(&self) -> GlobalStep {
        self.step
    }

    fn global_step_mut(&mut self) -> &mut GlobalStep {
        &mut self.step
    }

    fn set_mode(&mut self, mode: Mode) {
        self.modes.push(mode);
    }

    fn device(&self) -> Device {
        self.device
    }
}

/// Batches whose spectrogram holds a single marker value.
pub fn marked_batches(values: &[f32]) -> Vec<Batch> {
    values
        .iter()
        .map(|&v| Batch::new(Tensor::from_vec(vec![v]), Tensor::from_vec(vec![v, -v])))
        .collect()
}

pub fn losses_by_tag(records: &[vocoder_training::MetricRecord]) -> BTreeMap<String, Vec<(u64, f32)>> {
    let mut out: BTreeMap<String, Vec<(u64, f32)>> = BTreeMap::new();
    for r in records {
        if let Some(v) = r.scalar() {
            out.entry(r.tag.clone()).or_default().push((r.step, v));
        }
    }
    out
}
