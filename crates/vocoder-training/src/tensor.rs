//! Host-side tensors and the nested state tree persisted in checkpoints.
//!
//! Model, optimizer and scheduler state is exchanged as a [`StateValue`]: a
//! tree whose leaves are tensors or opaque JSON and whose inner nodes are
//! ordered sequences or keyed mappings. Device migration and integrity scans
//! walk this tree with [`StateValue::map_tensors`] and
//! [`StateValue::visit_tensors`].

use crate::error::{TrainingError, TrainingResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Where a tensor's storage lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Device {
    #[default]
    Cpu,
    Accelerator,
}

impl Device {
    #[must_use]
    pub fn is_accelerator(self) -> bool {
        self == Self::Accelerator
    }
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cpu => f.write_str("cpu"),
            Self::Accelerator => f.write_str("accelerator"),
        }
    }
}

/// Dense row-major `f32` tensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawTensor")]
pub struct Tensor {
    shape: Vec<usize>,
    #[serde(with = "f32_base64")]
    data: Vec<f32>,
    #[serde(default)]
    device: Device,
}

/// Serialized form of [`Tensor`], checked against its shape before use.
#[derive(Deserialize)]
struct RawTensor {
    shape: Vec<usize>,
    #[serde(with = "f32_base64")]
    data: Vec<f32>,
    #[serde(default)]
    device: Device,
}

impl TryFrom<RawTensor> for Tensor {
    type Error = TrainingError;

    fn try_from(raw: RawTensor) -> TrainingResult<Self> {
        Ok(Self::new(raw.shape, raw.data)?.to_device(raw.device))
    }
}

impl Tensor {
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> TrainingResult<Self> {
        let numel: usize = shape.iter().product();
        if numel != data.len() {
            return Err(TrainingError::State(format!(
                "tensor shape {shape:?} needs {numel} elements, got {}",
                data.len()
            )));
        }
        Ok(Self { shape, data, device: Device::Cpu })
    }

    #[must_use]
    pub fn from_vec(data: Vec<f32>) -> Self {
        Self { shape: vec![data.len()], data, device: Device::Cpu }
    }

    #[must_use]
    pub fn zeros(shape: Vec<usize>) -> Self {
        let numel = shape.iter().product();
        Self { shape, data: vec![0.0; numel], device: Device::Cpu }
    }

    #[must_use]
    pub fn scalar(value: f32) -> Self {
        Self { shape: Vec::new(), data: vec![value], device: Device::Cpu }
    }

    #[must_use]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    #[must_use]
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    #[must_use]
    pub fn into_data(self) -> Vec<f32> {
        self.data
    }

    #[must_use]
    pub fn numel(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn device(&self) -> Device {
        self.device
    }

    #[must_use]
    pub fn has_nan(&self) -> bool {
        self.data.iter().any(|v| v.is_nan())
    }

    #[must_use]
    pub fn to_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }
}

/// Nested training state: tensors and opaque values inside sequences and mappings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateValue {
    Tensor(Tensor),
    Sequence(Vec<StateValue>),
    Mapping(BTreeMap<String, StateValue>),
    Other(serde_json::Value),
}

impl StateValue {
    #[must_use]
    pub fn mapping<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, StateValue)>,
    {
        Self::Mapping(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Rebuild the tree with `f` applied to every tensor leaf.
    #[must_use]
    pub fn map_tensors<F>(self, f: &mut F) -> Self
    where
        F: FnMut(Tensor) -> Tensor,
    {
        match self {
            Self::Tensor(t) => Self::Tensor(f(t)),
            Self::Sequence(items) => {
                Self::Sequence(items.into_iter().map(|item| item.map_tensors(f)).collect())
            }
            Self::Mapping(entries) => Self::Mapping(
                entries.into_iter().map(|(k, v)| (k, v.map_tensors(f))).collect(),
            ),
            other @ Self::Other(_) => other,
        }
    }

    /// Visit every tensor leaf along with its dotted path (`layer.0.weight`).
    pub fn visit_tensors<F>(&self, f: &mut F)
    where
        F: FnMut(&str, &Tensor),
    {
        self.visit_at(&mut String::new(), f);
    }

    fn visit_at<F>(&self, path: &mut String, f: &mut F)
    where
        F: FnMut(&str, &Tensor),
    {
        match self {
            Self::Tensor(t) => f(path, t),
            Self::Sequence(items) => {
                for (idx, item) in items.iter().enumerate() {
                    let len = path.len();
                    push_segment(path, &idx.to_string());
                    item.visit_at(path, f);
                    path.truncate(len);
                }
            }
            Self::Mapping(entries) => {
                for (key, value) in entries {
                    let len = path.len();
                    push_segment(path, key);
                    value.visit_at(path, f);
                    path.truncate(len);
                }
            }
            Self::Other(_) => {}
        }
    }

    #[must_use]
    pub fn to_device(self, device: Device) -> Self {
        self.map_tensors(&mut |t| t.to_device(device))
    }

    pub fn into_tensor(self) -> TrainingResult<Tensor> {
        match self {
            Self::Tensor(t) => Ok(t),
            other => Err(unexpected("tensor", &other)),
        }
    }

    pub fn into_sequence(self) -> TrainingResult<Vec<StateValue>> {
        match self {
            Self::Sequence(items) => Ok(items),
            other => Err(unexpected("sequence", &other)),
        }
    }

    pub fn into_mapping(self) -> TrainingResult<BTreeMap<String, StateValue>> {
        match self {
            Self::Mapping(entries) => Ok(entries),
            other => Err(unexpected("mapping", &other)),
        }
    }

    pub fn into_other(self) -> TrainingResult<serde_json::Value> {
        match self {
            Self::Other(value) => Ok(value),
            other => Err(unexpected("opaque value", &other)),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Tensor(_) => "tensor",
            Self::Sequence(_) => "sequence",
            Self::Mapping(_) => "mapping",
            Self::Other(_) => "opaque value",
        }
    }
}

impl From<Tensor> for StateValue {
    fn from(t: Tensor) -> Self {
        Self::Tensor(t)
    }
}

impl From<Vec<StateValue>> for StateValue {
    fn from(items: Vec<StateValue>) -> Self {
        Self::Sequence(items)
    }
}

impl From<serde_json::Value> for StateValue {
    fn from(value: serde_json::Value) -> Self {
        Self::Other(value)
    }
}

/// Remove `key` from a state mapping, failing if it is absent.
pub fn take_entry(entries: &mut BTreeMap<String, StateValue>, key: &str) -> TrainingResult<StateValue> {
    entries
        .remove(key)
        .ok_or_else(|| TrainingError::State(format!("missing state entry '{key}'")))
}

/// Anything whose internal numeric state is saved into checkpoints.
pub trait Stateful {
    fn state_dict(&self) -> StateValue;

    fn load_state_dict(&mut self, state: StateValue) -> TrainingResult<()>;
}

fn push_segment(path: &mut String, segment: &str) {
    if !path.is_empty() {
        path.push('.');
    }
    path.push_str(segment);
}

fn unexpected(expected: &str, found: &StateValue) -> TrainingError {
    TrainingError::State(format!("expected {expected}, found {}", found.kind()))
}

mod f32_base64 {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[f32], serializer: S) -> Result<S::Ok, S::Error> {
        let mut bytes = Vec::with_capacity(data.len() * 4);
        for value in data {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<f32>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        let bytes = STANDARD.decode(encoded.as_bytes()).map_err(D::Error::custom)?;
        if bytes.len() % 4 != 0 {
            return Err(D::Error::custom(format!(
                "tensor payload of {} bytes is not a whole number of f32 values",
                bytes.len()
            )));
        }
        Ok(bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }
}
