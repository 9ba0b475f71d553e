//! Optimizer and learning-rate schedule used by the reference vocoder.

use serde_json::json;
use vocoder_training::{take_entry, StateValue, Stateful, Tensor, TrainingError, TrainingResult};

/// Stochastic gradient descent with classical momentum over one parameter tensor.
#[derive(Debug, Clone, PartialEq)]
pub struct Sgd {
    pub lr: f64,
    pub momentum: f64,
    velocity: Tensor,
}

impl Sgd {
    #[must_use]
    pub fn new(numel: usize, lr: f64, momentum: f64) -> Self {
        Self { lr, momentum, velocity: Tensor::zeros(vec![numel]) }
    }

    pub fn step(&mut self, params: &mut [f32], grads: &[f32]) -> TrainingResult<()> {
        if params.len() != grads.len() || params.len() != self.velocity.numel() {
            return Err(TrainingError::Trainer(format!(
                "sgd expects {} values, got {} params and {} grads",
                self.velocity.numel(),
                params.len(),
                grads.len()
            )));
        }
        let (lr, momentum) = (self.lr as f32, self.momentum as f32);
        for ((p, g), v) in params.iter_mut().zip(grads).zip(self.velocity.data_mut()) {
            *v = momentum * *v + g;
            *p -= lr * *v;
        }
        Ok(())
    }
}

impl Stateful for Sgd {
    fn state_dict(&self) -> StateValue {
        StateValue::mapping([
            ("lr", StateValue::Other(json!(self.lr))),
            ("momentum", StateValue::Other(json!(self.momentum))),
            ("velocity", StateValue::Tensor(self.velocity.clone())),
        ])
    }

    fn load_state_dict(&mut self, state: StateValue) -> TrainingResult<()> {
        let mut entries = state.into_mapping()?;
        let velocity = take_entry(&mut entries, "velocity")?.into_tensor()?;
        if velocity.numel() != self.velocity.numel() {
            return Err(TrainingError::State(format!(
                "sgd velocity has {} values, expected {}",
                velocity.numel(),
                self.velocity.numel()
            )));
        }
        self.lr = as_f64(take_entry(&mut entries, "lr")?, "lr")?;
        self.momentum = as_f64(take_entry(&mut entries, "momentum")?, "momentum")?;
        self.velocity = velocity;
        Ok(())
    }
}

/// Multiplies the learning rate by `gamma` every `step_size` scheduler steps.
#[derive(Debug, Clone, PartialEq)]
pub struct StepLr {
    pub base_lr: f64,
    pub step_size: u64,
    pub gamma: f64,
    pub last_epoch: u64,
}

impl StepLr {
    #[must_use]
    pub fn new(base_lr: f64, step_size: u64, gamma: f64) -> Self {
        Self { base_lr, step_size, gamma, last_epoch: 0 }
    }

    #[must_use]
    pub fn current_lr(&self) -> f64 {
        if self.step_size == 0 {
            return self.base_lr;
        }
        let decays = i32::try_from(self.last_epoch / self.step_size).unwrap_or(i32::MAX);
        self.base_lr * self.gamma.powi(decays)
    }

    /// Advance one step and push the new rate into `optimizer`.
    pub fn step(&mut self, optimizer: &mut Sgd) {
        self.last_epoch += 1;
        optimizer.lr = self.current_lr();
    }
}

impl Stateful for StepLr {
    fn state_dict(&self) -> StateValue {
        StateValue::Other(json!({
            "base_lr": self.base_lr,
            "step_size": self.step_size,
            "gamma": self.gamma,
            "last_epoch": self.last_epoch,
        }))
    }

    fn load_state_dict(&mut self, state: StateValue) -> TrainingResult<()> {
        let value = state.into_other()?;
        let field = |name: &str| {
            value
                .get(name)
                .cloned()
                .ok_or_else(|| TrainingError::State(format!("step_lr state missing '{name}'")))
        };
        let as_u64 = |v: serde_json::Value, name: &str| {
            v.as_u64().ok_or_else(|| TrainingError::State(format!("step_lr '{name}' must be an integer")))
        };

        self.base_lr = as_f64(StateValue::Other(field("base_lr")?), "base_lr")?;
        self.gamma = as_f64(StateValue::Other(field("gamma")?), "gamma")?;
        self.step_size = as_u64(field("step_size")?, "step_size")?;
        self.last_epoch = as_u64(field("last_epoch")?, "last_epoch")?;
        Ok(())
    }
}

fn as_f64(state: StateValue, name: &str) -> TrainingResult<f64> {
    state
        .into_other()?
        .as_f64()
        .ok_or_else(|| TrainingError::State(format!("'{name}' must be a number")))
}
