//! Run configuration stored as `<model_dir>/config.yaml`.
//!
//! A run's config is the model's defaults overlaid with dotted `key=value`
//! updates from the command line. The first run writes it; every later run
//! must ask for exactly the same config or it refuses to start.

use crate::dataset::DatasetConfig;
use crate::error::{TrainingError, TrainingResult};
use crate::layout::ModelLayout;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::time::Duration;

/// Loop frequencies, sample settings and watchdog deadlines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Steps between `train/*` scalar records.
    pub log_frequency: u64,
    /// Steps between validation passes; each one is followed by a checkpoint.
    pub eval_frequency: u64,
    /// Steps between audio sample generation.
    pub generate_frequency: u64,
    pub generate_num_samples: usize,
    pub sample_rate: u32,
    /// Seconds allowed for the first iteration (warm-up, compilation).
    pub max_first_iteration_delay: u64,
    /// Seconds allowed for every later iteration.
    pub max_training_iteration_delay: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            log_frequency: 10,
            eval_frequency: 5_000,
            generate_frequency: 100_000,
            generate_num_samples: 2,
            sample_rate: 22_050,
            max_first_iteration_delay: 600,
            max_training_iteration_delay: 60,
        }
    }
}

impl TrainingConfig {
    pub fn validate(&self) -> TrainingResult<()> {
        if self.max_first_iteration_delay == 0 || self.max_training_iteration_delay == 0 {
            return Err(TrainingError::InvalidConfig("iteration deadlines must be >= 1 second".to_string()));
        }
        if self.sample_rate == 0 {
            return Err(TrainingError::InvalidConfig("sample_rate must be > 0".to_string()));
        }
        Ok(())
    }

    #[must_use]
    pub fn first_iteration_deadline(&self) -> Duration {
        Duration::from_secs(self.max_first_iteration_delay)
    }

    #[must_use]
    pub fn iteration_deadline(&self) -> Duration {
        Duration::from_secs(self.max_training_iteration_delay)
    }
}

/// Complete contents of `config.yaml` for a model with config type `M`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig<M> {
    pub model: M,
    #[serde(default)]
    pub dataset: DatasetConfig,
    #[serde(default)]
    pub training: TrainingConfig,
}

impl<M: Default> Default for RunConfig<M> {
    fn default() -> Self {
        Self { model: M::default(), dataset: DatasetConfig::default(), training: TrainingConfig::default() }
    }
}

/// Create `config.yaml` from `defaults` plus `updates`, or verify an existing one matches.
pub fn create_if_missing<T>(layout: &ModelLayout, defaults: &T, updates: &[String]) -> TrainingResult<T>
where
    T: Serialize + DeserializeOwned,
{
    let mut requested = serde_yaml::to_value(defaults)?;
    apply_updates(&mut requested, updates)?;
    let config: T = serde_yaml::from_value(requested.clone())?;
    // Normalize through the typed config so defaults fill any gaps.
    let requested = serde_yaml::to_value(&config)?;

    let config_path = layout.config_path();
    if config_path.exists() {
        let stored = read_merged(layout, defaults)?;
        let differences = config_differences(&stored, &requested);
        if !differences.is_empty() {
            return Err(TrainingError::ConfigMismatch(differences.join("\n")));
        }
        return Ok(config);
    }

    let yaml = serde_yaml::to_string(&requested)?;
    tracing::info!("full model configuration:\n{yaml}");
    std::fs::create_dir_all(layout.root())?;
    std::fs::write(&config_path, yaml)?;
    tracing::info!(path = %config_path.display(), "config saved");
    Ok(config)
}

/// Load the config of an existing model directory, filling gaps from `defaults`.
pub fn load_config<T>(layout: &ModelLayout, defaults: &T) -> TrainingResult<T>
where
    T: Serialize + DeserializeOwned,
{
    layout.require_existing()?;
    Ok(serde_yaml::from_value(read_merged(layout, defaults)?)?)
}

fn read_merged<T: Serialize>(layout: &ModelLayout, defaults: &T) -> TrainingResult<Value> {
    let stored: Value = serde_yaml::from_str(&std::fs::read_to_string(layout.config_path())?)?;
    let mut merged = serde_yaml::to_value(defaults)?;
    merge(&mut merged, stored);
    Ok(merged)
}

/// Deep-merge `overlay` into `base`; mappings merge key by key, anything else replaces.
pub fn merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Mapping(base), Value::Mapping(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Apply dotted `key=value` updates. Values parse as YAML scalars; keys must already exist.
pub fn apply_updates(config: &mut Value, updates: &[String]) -> TrainingResult<()> {
    for update in updates {
        let (key, raw) = update
            .split_once('=')
            .ok_or_else(|| TrainingError::InvalidConfig(format!("expected key=value, got '{update}'")))?;
        let value: Value = serde_yaml::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));

        let mut node = &mut *config;
        for segment in key.trim().split('.') {
            let Value::Mapping(map) = node else {
                return Err(TrainingError::InvalidConfig(format!("'{key}' does not name a config section")));
            };
            node = map
                .get_mut(segment)
                .ok_or_else(|| TrainingError::InvalidConfig(format!("unknown config key '{key}'")))?;
        }
        *node = value;
    }
    Ok(())
}

/// Human-readable per-key differences between two configs, sorted by key.
pub fn config_differences(stored: &Value, requested: &Value) -> Vec<String> {
    let (mut old, mut new) = (BTreeMap::new(), BTreeMap::new());
    flatten("", stored, &mut old);
    flatten("", requested, &mut new);

    let mut keys: Vec<&String> = old.keys().chain(new.keys()).collect();
    keys.sort();
    keys.dedup();

    keys.into_iter()
        .filter_map(|key| match (old.get(key), new.get(key)) {
            (Some(a), Some(b)) if a == b => None,
            (a, b) => Some(format!(
                "  {key}: {} -> {}",
                a.map_or("<unset>", String::as_str),
                b.map_or("<unset>", String::as_str)
            )),
        })
        .collect()
}

fn flatten(prefix: &str, value: &Value, out: &mut BTreeMap<String, String>) {
    match value {
        Value::Mapping(map) if !map.is_empty() => {
            for (key, value) in map {
                let key = match key {
                    Value::String(s) => s.clone(),
                    other => scalar_text(other),
                };
                let path = if prefix.is_empty() { key } else { format!("{prefix}.{key}") };
                flatten(&path, value, out);
            }
        }
        other => {
            out.insert(prefix.to_string(), scalar_text(other));
        }
    }
}

fn scalar_text(value: &Value) -> String {
    serde_yaml::to_string(value).map_or_else(|_| format!("{value:?}"), |s| s.trim_end().to_string())
}
