//! `vocoder linear train`

use anyhow::{Context, Result, bail};
use std::path::Path;
use vocoder_models::{LinearVocoder, LinearVocoderConfig};
use vocoder_training::{
    create_if_missing, load_config, read_jsonl_utterances, EventFileSink, InMemoryDataset, ModelLayout, RunConfig,
    TrainLoop,
};

pub fn execute(path: &Path, dataset: &Path, updates: &[String]) -> Result<()> {
    let layout = ModelLayout::new(path.to_path_buf());
    let defaults = RunConfig::<LinearVocoderConfig>::default();

    create_if_missing(&layout, &defaults, updates).context("failed to prepare model config")?;
    let config = load_config(&layout, &defaults)?;
    layout.ensure_dirs()?;

    let mut model = LinearVocoder::new(config.model.clone())?;
    let store = layout.checkpoint_store();
    match store.latest()? {
        Some(latest) => store.load(&mut model, &latest)?,
        None => tracing::info!(path = %layout.root().display(), "no checkpoint found, starting from scratch"),
    }

    let utterances = read_jsonl_utterances(dataset)
        .with_context(|| format!("failed to read dataset {}", dataset.display()))?;
    let data = InMemoryDataset::from_utterances(&utterances, &config.dataset)?;
    check_dimensions(&data, &config.model)?;

    let mut sink = EventFileSink::open(&layout.logs_dir())?;
    let summary = TrainLoop::new(config.training).run(&mut model, &data.train, &data.valid, &store, &mut sink)?;

    println!(
        "Trained {} steps (global step {}), final checkpoint {}",
        summary.steps_run,
        summary.final_step,
        summary.last_checkpoint.display()
    );
    Ok(())
}

fn check_dimensions(data: &InMemoryDataset, model: &LinearVocoderConfig) -> Result<()> {
    let Some(batch) = data.train.first() else {
        bail!("training set is empty");
    };
    let shape = batch.spectrograms.shape();
    let n_mels = shape.last().copied().unwrap_or(0);
    let frames = shape.get(1).copied().unwrap_or(0);
    let samples_per_item = batch.waveforms.shape().get(1).copied().unwrap_or(0);

    if n_mels != model.n_mels {
        bail!("dataset has {n_mels} mel bins but model.n_mels is {}", model.n_mels);
    }
    if frames * model.hop_length != samples_per_item {
        bail!(
            "dataset has {} samples per frame but model.hop_length is {}",
            samples_per_item / frames.max(1),
            model.hop_length
        );
    }
    Ok(())
}
