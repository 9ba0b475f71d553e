//! Frame-wise linear vocoder.
//!
//! Every spectrogram frame of `n_mels` bins is mapped to `hop_length`
//! waveform samples by one dense layer, `y = W x + b`. Small enough to train
//! on the host in tests while exercising every part of the training loop:
//! two optimizers, one of them scheduled, auxiliary losses and checkpointed
//! global step.

use crate::optim::{Sgd, StepLr};
use serde::{Deserialize, Serialize};
use vocoder_training::{
    take_entry, Batch, GlobalStep, LossMap, Mode, OptimizerSlot, StateValue, Stateful, StepOutput, Tensor,
    TrainingError, TrainingResult, Vocoder,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinearVocoderConfig {
    pub n_mels: usize,
    pub hop_length: usize,
    pub learning_rate: f64,
    pub bias_learning_rate: f64,
    pub momentum: f64,
    /// Steps between learning-rate decays of the weight optimizer.
    pub lr_decay_steps: u64,
    pub lr_decay_gamma: f64,
    pub max_steps: u64,
}

impl Default for LinearVocoderConfig {
    fn default() -> Self {
        Self {
            n_mels: 80,
            hop_length: 256,
            learning_rate: 1e-3,
            bias_learning_rate: 1e-3,
            momentum: 0.9,
            lr_decay_steps: 10_000,
            lr_decay_gamma: 0.5,
            max_steps: 200_000,
        }
    }
}

impl LinearVocoderConfig {
    pub fn validate(&self) -> TrainingResult<()> {
        if self.n_mels == 0 || self.hop_length == 0 {
            return Err(TrainingError::InvalidConfig("model.n_mels and model.hop_length must be >= 1".to_string()));
        }
        if self.learning_rate <= 0.0 || self.bias_learning_rate <= 0.0 {
            return Err(TrainingError::InvalidConfig("learning rates must be > 0".to_string()));
        }
        if !(0.0..1.0).contains(&self.momentum) {
            return Err(TrainingError::InvalidConfig("model.momentum must be in [0, 1)".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct LinearVocoder {
    config: LinearVocoderConfig,
    /// `hop_length x n_mels`
    weight: Tensor,
    bias: Tensor,
    weight_optim: Sgd,
    weight_schedule: StepLr,
    bias_optim: Sgd,
    step: GlobalStep,
    mode: Mode,
}

/// Per-batch forward pass: predictions and residuals against the target.
struct Forward {
    inputs: Vec<f32>,
    errors: Vec<f32>,
    frames: usize,
}

impl LinearVocoder {
    pub fn new(config: LinearVocoderConfig) -> TrainingResult<Self> {
        config.validate()?;
        let (n_mels, hop) = (config.n_mels, config.hop_length);
        tracing::debug!(n_mels, hop_length = hop, "building linear vocoder");
        Ok(Self {
            weight: Tensor::zeros(vec![hop, n_mels]),
            bias: Tensor::zeros(vec![hop]),
            weight_optim: Sgd::new(hop * n_mels, config.learning_rate, config.momentum),
            weight_schedule: StepLr::new(config.learning_rate, config.lr_decay_steps, config.lr_decay_gamma),
            bias_optim: Sgd::new(hop, config.bias_learning_rate, config.momentum),
            step: GlobalStep::default(),
            mode: Mode::Train,
            config,
        })
    }

    #[must_use]
    pub fn config(&self) -> &LinearVocoderConfig {
        &self.config
    }

    #[must_use]
    pub fn mode(&self) -> Mode {
        self.mode
    }

    #[must_use]
    pub fn weight_learning_rate(&self) -> f64 {
        self.weight_optim.lr
    }

    fn frame_count(&self, spectrograms: &Tensor) -> TrainingResult<usize> {
        let n_mels = self.config.n_mels;
        match spectrograms.shape() {
            [_, _, m] if *m == n_mels => Ok(spectrograms.numel() / n_mels),
            shape => Err(TrainingError::Trainer(format!(
                "expected spectrograms shaped [batch, frames, {n_mels}], got {shape:?}"
            ))),
        }
    }

    fn predict_frame(&self, frame: &[f32], out: &mut [f32]) {
        let n_mels = self.config.n_mels;
        let weight = self.weight.data();
        for (h, (y, b)) in out.iter_mut().zip(self.bias.data()).enumerate() {
            let row = &weight[h * n_mels..(h + 1) * n_mels];
            *y = row.iter().zip(frame).map(|(w, x)| w * x).sum::<f32>() + b;
        }
    }

    fn predict(&self, spectrograms: &Tensor) -> TrainingResult<Vec<f32>> {
        let frames = self.frame_count(spectrograms)?;
        let (n_mels, hop) = (self.config.n_mels, self.config.hop_length);
        let mut out = vec![0.0; frames * hop];
        for (frame, chunk) in spectrograms.data().chunks_exact(n_mels).zip(out.chunks_exact_mut(hop)) {
            self.predict_frame(frame, chunk);
        }
        Ok(out)
    }

    fn forward(&self, batch: &Batch) -> TrainingResult<Forward> {
        let frames = self.frame_count(&batch.spectrograms)?;
        let expected = frames * self.config.hop_length;
        if batch.waveforms.numel() != expected {
            return Err(TrainingError::Trainer(format!(
                "waveform batch has {} samples, expected {expected} for {frames} frames",
                batch.waveforms.numel()
            )));
        }
        let mut errors = self.predict(&batch.spectrograms)?;
        for (e, target) in errors.iter_mut().zip(batch.waveforms.data()) {
            *e -= target;
        }
        Ok(Forward { inputs: batch.spectrograms.data().to_vec(), errors, frames })
    }

    fn losses(errors: &[f32]) -> LossMap {
        let n = errors.len().max(1) as f32;
        let mse = errors.iter().map(|e| e * e).sum::<f32>() / n;
        let l1 = errors.iter().map(|e| e.abs()).sum::<f32>() / n;
        LossMap::from([("mse".to_string(), mse), ("l1".to_string(), l1)])
    }
}

impl Stateful for LinearVocoder {
    fn state_dict(&self) -> StateValue {
        StateValue::mapping([
            ("global_step", self.step.to_state()),
            ("weight", StateValue::Tensor(self.weight.clone())),
            ("bias", StateValue::Tensor(self.bias.clone())),
        ])
    }

    fn load_state_dict(&mut self, state: StateValue) -> TrainingResult<()> {
        let mut entries = state.into_mapping()?;
        let step = GlobalStep::from_state(take_entry(&mut entries, "global_step")?)?;
        let weight = take_entry(&mut entries, "weight")?.into_tensor()?;
        let bias = take_entry(&mut entries, "bias")?.into_tensor()?;

        for (name, saved, live) in [("weight", &weight, &self.weight), ("bias", &bias, &self.bias)] {
            if saved.shape() != live.shape() {
                return Err(TrainingError::State(format!(
                    "{name} has shape {:?} in checkpoint, model expects {:?}",
                    saved.shape(),
                    live.shape()
                )));
            }
        }

        self.step = step;
        self.weight = weight;
        self.bias = bias;
        Ok(())
    }
}

impl Vocoder for LinearVocoder {
    fn train_step(&mut self, batch: &Batch) -> TrainingResult<StepOutput> {
        let Forward { inputs, errors, frames } = self.forward(batch)?;
        let losses = Self::losses(&errors);
        let (n_mels, hop) = (self.config.n_mels, self.config.hop_length);

        // d(mse)/dy = 2 e / N
        let scale = 2.0 / errors.len().max(1) as f32;
        let mut weight_grad = vec![0.0f32; hop * n_mels];
        let mut bias_grad = vec![0.0f32; hop];
        for f in 0..frames {
            let x = &inputs[f * n_mels..(f + 1) * n_mels];
            let e = &errors[f * hop..(f + 1) * hop];
            for (h, err) in e.iter().enumerate() {
                let g = err * scale;
                bias_grad[h] += g;
                for (wg, xv) in weight_grad[h * n_mels..(h + 1) * n_mels].iter_mut().zip(x) {
                    *wg += g * xv;
                }
            }
        }

        self.weight_optim.step(self.weight.data_mut(), &weight_grad)?;
        self.bias_optim.step(self.bias.data_mut(), &bias_grad)?;
        self.weight_schedule.step(&mut self.weight_optim);

        Ok(StepOutput::new(losses["mse"]).with_aux("l1", losses["l1"]))
    }

    fn validation_losses(&mut self, batch: &Batch) -> TrainingResult<LossMap> {
        let forward = self.forward(batch)?;
        Ok(Self::losses(&forward.errors))
    }

    fn generate(&mut self, spectrograms: &Tensor) -> TrainingResult<Tensor> {
        let batch = spectrograms.shape().first().copied().unwrap_or(0);
        let samples = self.predict(spectrograms)?;
        let per_item = if batch == 0 { 0 } else { samples.len() / batch };
        Tensor::new(vec![batch, per_item], samples)
    }

    fn is_done(&self) -> bool {
        self.step.get() >= self.config.max_steps
    }

    fn optimizers(&mut self) -> Vec<OptimizerSlot<'_>> {
        vec![
            OptimizerSlot::new(&mut self.weight_optim, Some(&mut self.weight_schedule)),
            OptimizerSlot::new(&mut self.bias_optim, None),
        ]
    }

    fn global_step(&self) -> GlobalStep {
        self.step
    }

    fn global_step_mut(&mut self) -> &mut GlobalStep {
        &mut self.step
    }

    fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
    }
}
