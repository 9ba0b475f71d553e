use crate::dataset::BatchSource;
use crate::error::TrainingResult;
use crate::metrics::MetricsSink;
use crate::model::Vocoder;

/// Synthesize `n_samples` clips from the head of the validation set.
///
/// At global step 0 the ground-truth waveform is logged next to each
/// synthesized one; later calls log only the synthesized audio.
pub fn generate_samples<M, V>(
    model: &mut M,
    valid_set: &V,
    sink: &mut dyn MetricsSink,
    n_samples: usize,
    sample_rate: u32,
) -> TrainingResult<usize>
where
    M: Vocoder + ?Sized,
    V: BatchSource + ?Sized,
{
    let data: Vec<_> = valid_set.batches().take(n_samples).collect();
    if data.len() < n_samples {
        tracing::warn!(requested = n_samples, available = data.len(), "not enough validation batches for samples");
    }

    let device = model.device();
    let mut generated = Vec::with_capacity(data.len());
    for batch in &data {
        let spectrograms = if device.is_accelerator() {
            batch.spectrograms.clone().to_device(device)
        } else {
            batch.spectrograms.clone()
        };
        generated.push(model.generate(&spectrograms)?);
    }

    let step = model.global_step().get();
    for (idx, (batch, wav)) in data.iter().zip(&generated).enumerate() {
        if step == 0 {
            sink.add_audio(&format!("audio/{idx}_real"), batch.waveforms.data(), sample_rate, step)?;
        }
        sink.add_audio(&format!("audio/{idx}_synthesized"), wav.data(), sample_rate, step)?;
    }

    tracing::info!(count = generated.len(), step, "generated audio samples");
    Ok(generated.len())
}
