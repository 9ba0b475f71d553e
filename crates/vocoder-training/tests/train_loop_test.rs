mod common;

use common::{losses_by_tag, marked_batches, ScriptedVocoder};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use vocoder_training::{
    CheckpointStore, MemorySink, Mode, TrainLoop, TrainingConfig, TrainingError, Vocoder, Watchdog,
};

fn quiet_watchdog() -> (Watchdog, Arc<AtomicUsize>) {
    let fired = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&fired);
    let watchdog = Watchdog::new(Arc::new(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    }));
    (watchdog, fired)
}

fn run(
    model: &mut ScriptedVocoder,
    config: TrainingConfig,
    train: &[f32],
    valid: &[f32],
    store: &CheckpointStore,
    sink: &mut MemorySink,
) -> vocoder_training::TrainingResult<vocoder_training::TrainSummary> {
    let (watchdog, _) = quiet_watchdog();
    let mut train_loop = TrainLoop::new(config).with_watchdog(watchdog);
    train_loop.run(model, &marked_batches(train), &marked_batches(valid), store, sink)
}

#[test]
fn test_global_step_matches_steps_run() {
    let temp = TempDir::new().unwrap();
    let store = CheckpointStore::new(temp.path().join("checkpoints"));
    let mut model = ScriptedVocoder::new(10);
    let mut sink = MemorySink::new();

    let summary = run(&mut model, TrainingConfig::default(), &[0.0, 1.0, 2.0], &[], &store, &mut sink).unwrap();

    assert_eq!(summary.steps_run, 10);
    assert_eq!(summary.final_step, 10);
    assert_eq!(model.train_calls, 10);
    assert_eq!(model.global_step().get(), 10);
    assert_eq!(model.seen, vec![0.0, 1.0, 2.0, 0.0, 1.0, 2.0, 0.0, 1.0, 2.0, 0.0]);
    assert_eq!(summary.laps, 3);

    // Only the final checkpoint: no eval boundary was reached.
    let steps: Vec<u64> = store.list().unwrap().into_iter().map(|e| e.step).collect();
    assert_eq!(steps, vec![10]);
    assert_eq!(summary.last_checkpoint, store.path_for_step(10));
}

#[test]
fn test_train_scalars_follow_log_frequency() {
    let temp = TempDir::new().unwrap();
    let store = CheckpointStore::new(temp.path().join("checkpoints"));
    let mut model = ScriptedVocoder::new(25).with_losses(vec![0.5]);
    let mut sink = MemorySink::new();

    run(&mut model, TrainingConfig::default(), &[1.0], &[], &store, &mut sink).unwrap();

    let by_tag = losses_by_tag(&sink.records);
    assert_eq!(by_tag["train/loss"], vec![(10, 0.5), (20, 0.5)]);
    assert_eq!(by_tag["train/l1"], vec![(10, 1.0), (20, 1.0)]);
    assert!(!by_tag.contains_key("valid/a"));
}

#[test]
fn test_validation_and_checkpoint_on_eval_boundaries() {
    let temp = TempDir::new().unwrap();
    let store = CheckpointStore::new(temp.path().join("checkpoints"));
    let mut model = ScriptedVocoder::new(10);
    let mut sink = MemorySink::new();
    let config = TrainingConfig { eval_frequency: 4, ..TrainingConfig::default() };

    run(&mut model, config, &[1.0, 2.0], &[1.0, 3.0], &store, &mut sink).unwrap();

    let steps: Vec<u64> = store.list().unwrap().into_iter().map(|e| e.step).collect();
    assert_eq!(steps, vec![4, 8, 10]);
    assert_eq!(model.modes, vec![Mode::Eval, Mode::Train, Mode::Eval, Mode::Train]);

    let by_tag = losses_by_tag(&sink.records);
    assert_eq!(by_tag["valid/a"], vec![(4, 2.0), (8, 2.0)]);
    assert_eq!(by_tag["valid/b"], vec![(4, 4.0), (8, 4.0)]);
}

#[test]
fn test_nan_loss_stops_before_logging_or_saving() {
    let temp = TempDir::new().unwrap();
    let store = CheckpointStore::new(temp.path().join("checkpoints"));
    let mut model = ScriptedVocoder::new(100).with_losses(vec![1.0, 1.0, f32::NAN, 1.0]);
    let mut sink = MemorySink::new();
    let config = TrainingConfig { log_frequency: 1, eval_frequency: 2, ..TrainingConfig::default() };

    let err = run(&mut model, config, &[1.0], &[], &store, &mut sink).unwrap_err();

    assert!(matches!(err, TrainingError::Diverged { step: 3 }));
    assert!(err.is_fatal());
    assert_eq!(model.train_calls, 3);
    assert_eq!(model.global_step().get(), 3);

    let steps: Vec<u64> = store.list().unwrap().into_iter().map(|e| e.step).collect();
    assert_eq!(steps, vec![2]);
    let logged: Vec<u64> = losses_by_tag(&sink.records)["train/loss"].iter().map(|(s, _)| *s).collect();
    assert_eq!(logged, vec![1, 2]);
}

#[test]
fn test_samples_follow_generate_frequency() {
    let temp = TempDir::new().unwrap();
    let store = CheckpointStore::new(temp.path().join("checkpoints"));
    let mut model = ScriptedVocoder::new(10);
    let mut sink = MemorySink::new();
    let config = TrainingConfig { generate_frequency: 5, ..TrainingConfig::default() };

    run(&mut model, config, &[1.0], &[4.0, 5.0, 6.0], &store, &mut sink).unwrap();

    let audio: Vec<(u64, &str)> = sink
        .records
        .iter()
        .filter(|r| r.scalar().is_none())
        .map(|r| (r.step, r.tag.as_str()))
        .collect();
    assert_eq!(
        audio,
        vec![
            (5, "audio/0_synthesized"),
            (5, "audio/1_synthesized"),
            (10, "audio/0_synthesized"),
            (10, "audio/1_synthesized"),
        ]
    );
}

#[test]
fn test_resume_continues_from_latest_checkpoint() {
    let temp = TempDir::new().unwrap();
    let store = CheckpointStore::new(temp.path().join("checkpoints"));
    let config = TrainingConfig { eval_frequency: 3, ..TrainingConfig::default() };

    let mut first = ScriptedVocoder::new(6);
    run(&mut first, config.clone(), &[1.0], &[], &store, &mut MemorySink::new()).unwrap();

    let mut resumed = ScriptedVocoder::new(10);
    let latest = store.latest().unwrap().unwrap();
    assert_eq!(latest, store.path_for_step(6));
    store.load(&mut resumed, &latest).unwrap();
    assert_eq!(resumed.global_step().get(), 6);
    assert_eq!(resumed.weights, first.weights);

    let summary = run(&mut resumed, config, &[1.0], &[], &store, &mut MemorySink::new()).unwrap();
    assert_eq!(summary.steps_run, 4);
    assert_eq!(summary.final_step, 10);
    let steps: Vec<u64> = store.list().unwrap().into_iter().map(|e| e.step).collect();
    assert_eq!(steps, vec![3, 6, 9, 10]);
}

#[test]
fn test_finished_model_only_writes_final_checkpoint() {
    let temp = TempDir::new().unwrap();
    let store = CheckpointStore::new(temp.path().join("checkpoints"));
    let mut model = ScriptedVocoder::new(0);

    let summary = run(&mut model, TrainingConfig::default(), &[1.0], &[], &store, &mut MemorySink::new()).unwrap();

    assert_eq!(summary.steps_run, 0);
    assert_eq!(model.train_calls, 0);
    assert_eq!(summary.last_checkpoint, store.path_for_step(0));
}

#[test]
fn test_empty_training_set_is_an_error() {
    let temp = TempDir::new().unwrap();
    let store = CheckpointStore::new(temp.path().join("checkpoints"));
    let mut model = ScriptedVocoder::new(5);

    let err = run(&mut model, TrainingConfig::default(), &[], &[], &store, &mut MemorySink::new()).unwrap_err();
    assert!(matches!(err, TrainingError::Dataset(_)));
    assert_eq!(model.global_step().get(), 0);
}

#[test]
fn test_watchdog_fires_on_stalled_iteration() {
    let temp = TempDir::new().unwrap();
    let store = CheckpointStore::new(temp.path().join("checkpoints"));
    let mut model = ScriptedVocoder::new(2);
    model.step_delay = Some(Duration::from_millis(1500));
    let config = TrainingConfig {
        max_first_iteration_delay: 1,
        max_training_iteration_delay: 1,
        ..TrainingConfig::default()
    };

    let (watchdog, fired) = quiet_watchdog();
    let mut train_loop = TrainLoop::new(config).with_watchdog(watchdog);
    train_loop
        .run(&mut model, &marked_batches(&[1.0]), &marked_batches(&[]), &store, &mut MemorySink::new())
        .unwrap();

    assert_eq!(fired.load(Ordering::SeqCst), 2);
}

#[test]
fn test_watchdog_quiet_when_iterations_are_fast() {
    let temp = TempDir::new().unwrap();
    let store = CheckpointStore::new(temp.path().join("checkpoints"));
    let mut model = ScriptedVocoder::new(5);
    model.step_delay = Some(Duration::from_millis(100));
    let config = TrainingConfig {
        max_first_iteration_delay: 1,
        max_training_iteration_delay: 1,
        ..TrainingConfig::default()
    };

    let (watchdog, fired) = quiet_watchdog();
    let mut train_loop = TrainLoop::new(config).with_watchdog(watchdog);
    train_loop
        .run(&mut model, &marked_batches(&[1.0]), &marked_batches(&[]), &store, &mut MemorySink::new())
        .unwrap();
    std::thread::sleep(Duration::from_millis(1200));

    assert_eq!(fired.load(Ordering::SeqCst), 0);
}
