//! Vocoder Training
//!
//! Model-agnostic training control for spectrogram-to-waveform vocoders:
//! - Driving the training loop (`TrainLoop`) over a cyclic batch stream
//! - Aborting stalled iterations (`Watchdog`)
//! - Saving and restoring full multi-optimizer state (`CheckpointStore`)
//! - Validation, audio sample generation and metrics sinks
//! - Model directory layout and `config.yaml` handling

pub mod checkpoint;
pub mod config;
pub mod cycle;
pub mod dataset;
pub mod driver;
pub mod error;
pub mod layout;
pub mod metrics;
pub mod model;
pub mod samples;
pub mod tensor;
pub mod validation;
pub mod watchdog;

pub use checkpoint::{checkpoint_file_name, CheckpointEntry, CheckpointRecord, CheckpointStore};
pub use config::{create_if_missing, load_config, RunConfig, TrainingConfig};
pub use cycle::Cycle;
pub use dataset::{read_jsonl_utterances, BatchSource, DatasetConfig, InMemoryDataset, Utterance};
pub use driver::{TrainLoop, TrainSummary};
pub use error::{TrainingError, TrainingResult};
pub use layout::ModelLayout;
pub use metrics::{EventFileSink, MemorySink, MetricRecord, MetricValue, MetricsSink};
pub use model::{Batch, GlobalStep, LossMap, Mode, OptimizerSlot, StepOutput, Vocoder};
pub use samples::generate_samples;
pub use tensor::{take_entry, Device, StateValue, Stateful, Tensor};
pub use validation::run_validation;
pub use watchdog::{ExpiryHandler, Watchdog};
