//! The training loop.
//!
//! Each iteration arms the watchdog, draws a batch from the cyclic training
//! stream, runs one step and disarms the watchdog. Logging, validation plus
//! checkpointing, and sample generation then run on their own step
//! frequencies. The loop ends when the model reports it is done, after which
//! a final checkpoint is written.

use crate::checkpoint::CheckpointStore;
use crate::config::TrainingConfig;
use crate::cycle::Cycle;
use crate::dataset::BatchSource;
use crate::error::{TrainingError, TrainingResult};
use crate::metrics::MetricsSink;
use crate::model::{Mode, Vocoder};
use crate::samples::generate_samples;
use crate::validation::run_validation;
use crate::watchdog::Watchdog;
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Iterations between data-loading timing reports.
const DATA_TIMING_FREQUENCY: u64 = 50;

/// What a finished run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainSummary {
    /// Training steps executed by this process.
    pub steps_run: u64,
    pub final_step: u64,
    /// Full passes over the training set completed by this process.
    pub laps: u64,
    /// Checkpoint written when the run finished.
    pub last_checkpoint: PathBuf,
}

pub struct TrainLoop {
    config: TrainingConfig,
    watchdog: Option<Watchdog>,
}

impl TrainLoop {
    #[must_use]
    pub fn new(config: TrainingConfig) -> Self {
        Self { config, watchdog: None }
    }

    /// Use `watchdog` instead of the process-terminating default.
    #[must_use]
    pub fn with_watchdog(mut self, watchdog: Watchdog) -> Self {
        self.watchdog = Some(watchdog);
        self
    }

    /// Train until `model.is_done()`.
    ///
    /// Errors are never retried. A NaN loss returns [`TrainingError::Diverged`]
    /// before anything else is logged or saved for that step.
    pub fn run<M, T, V>(
        &mut self,
        model: &mut M,
        train_set: &T,
        valid_set: &V,
        checkpoints: &CheckpointStore,
        sink: &mut dyn MetricsSink,
    ) -> TrainingResult<TrainSummary>
    where
        M: Vocoder + ?Sized,
        T: BatchSource + ?Sized,
        V: BatchSource + ?Sized,
    {
        self.config.validate()?;
        let config = self.config.clone();
        let watchdog = self.watchdog.get_or_insert_with(Watchdog::fatal);

        let device = model.device();
        if device.is_accelerator() {
            tracing::info!("training on accelerator");
        } else {
            tracing::warn!("no accelerator detected, running on CPU; training may be very slow");
        }
        tracing::info!(step = model.global_step().get(), "starting training");

        let mut batches = Cycle::new(train_set);
        let mut steps_run: u64 = 0;
        let mut total_start: Option<Instant> = None;
        let mut iter_start = Instant::now();
        let mut data_loading_total = Duration::ZERO;

        while !model.is_done() {
            watchdog.arm(if total_start.is_none() {
                config.first_iteration_deadline()
            } else {
                config.iteration_deadline()
            });

            let data_start = Instant::now();
            let batch = batches.next_batch().ok_or_else(|| {
                watchdog.disarm();
                TrainingError::Dataset("training set yields no batches".to_string())
            })?;
            if steps_run > 0 {
                // The first fetch includes warm-up and is not representative.
                data_loading_total += data_start.elapsed();
            }
            let batch = if device.is_accelerator() { batch.to_device(device) } else { batch };

            let output = model.train_step(&batch).inspect_err(|_| watchdog.disarm())?;
            steps_run += 1;
            model.global_step_mut().increment();
            let step = model.global_step();

            let started = *total_start.get_or_insert_with(Instant::now);
            let elapsed = iter_start.elapsed();
            iter_start = Instant::now();
            watchdog.disarm();

            if output.loss.is_nan() {
                tracing::error!(step = step.get(), "detected NaN loss, exiting");
                return Err(TrainingError::Diverged { step: step.get() });
            }

            let elapsed_total = started.elapsed().as_secs() / 60;
            if step.is_multiple_of(config.log_frequency) {
                tracing::info!(
                    "{elapsed_total}m - {:.3}s - Iteration {step}: {:.3}",
                    elapsed.as_secs_f64(),
                    output.loss
                );
            } else {
                tracing::debug!(
                    "{elapsed_total}m - {:.3}s - Iteration {step}: {:.3}",
                    elapsed.as_secs_f64(),
                    output.loss
                );
            }
            if step.is_multiple_of(DATA_TIMING_FREQUENCY) {
                tracing::info!(
                    "Average data loading time: {:.3}s",
                    data_loading_total.as_secs_f64() / steps_run as f64
                );
            }

            if step.is_multiple_of(config.log_frequency) {
                sink.add_scalar("train/loss", output.loss, step.get())?;
                for (key, value) in &output.aux {
                    sink.add_scalar(&format!("train/{key}"), *value, step.get())?;
                }
            }

            if step.is_multiple_of(config.eval_frequency) {
                model.set_mode(Mode::Eval);
                run_validation(model, valid_set, sink)?;
                model.set_mode(Mode::Train);

                checkpoints.save(model)?;
                sink.flush()?;
            }

            if step.is_multiple_of(config.generate_frequency) {
                generate_samples(model, valid_set, sink, config.generate_num_samples, config.sample_rate)?;
            }
        }

        tracing::info!(step = model.global_step().get(), steps_run, "completed training");
        let last_checkpoint = checkpoints.save(model)?;
        sink.flush()?;

        Ok(TrainSummary {
            steps_run,
            final_step: model.global_step().get(),
            laps: batches.laps(),
            last_checkpoint,
        })
    }
}
