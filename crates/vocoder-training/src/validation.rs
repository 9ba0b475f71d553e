use crate::dataset::BatchSource;
use crate::error::{TrainingError, TrainingResult};
use crate::metrics::MetricsSink;
use crate::model::{LossMap, Vocoder};

/// Run one full pass over the validation set and log the per-key mean losses.
///
/// Returns `None` when the validation set is empty; nothing is logged in that case.
pub fn run_validation<M, V>(model: &mut M, valid_set: &V, sink: &mut dyn MetricsSink) -> TrainingResult<Option<LossMap>>
where
    M: Vocoder + ?Sized,
    V: BatchSource + ?Sized,
{
    tracing::info!("computing validation loss");
    let device = model.device();

    let mut batch_losses: Vec<LossMap> = Vec::new();
    for batch in valid_set.batches() {
        let batch = if device.is_accelerator() { batch.to_device(device) } else { batch };
        batch_losses.push(model.validation_losses(&batch)?);
    }

    let Some(first) = batch_losses.first() else {
        tracing::info!("no validation data available");
        return Ok(None);
    };

    let step = model.global_step().get();
    let mut means = LossMap::new();
    for key in first.keys() {
        let mut total = 0.0f64;
        for (idx, losses) in batch_losses.iter().enumerate() {
            let value = losses.get(key).ok_or_else(|| {
                TrainingError::Trainer(format!("validation batch {idx} is missing loss '{key}'"))
            })?;
            total += f64::from(*value);
        }
        let mean = (total / batch_losses.len() as f64) as f32;
        tracing::info!("Validation {key}: {mean:.3}");
        sink.add_scalar(&format!("valid/{key}"), mean, step)?;
        means.insert(key.clone(), mean);
    }

    Ok(Some(means))
}
