mod common;

use common::{marked_batches, ScriptedVocoder};
use vocoder_training::{
    generate_samples, run_validation, Batch, GlobalStep, LossMap, MemorySink, MetricValue, Mode, OptimizerSlot,
    StateValue, Stateful, StepOutput, Tensor, TrainingError, TrainingResult, Vocoder,
};

#[test]
fn test_empty_validation_set_logs_nothing() {
    let mut model = ScriptedVocoder::new(1);
    let mut sink = MemorySink::new();

    let result = run_validation(&mut model, &marked_batches(&[]), &mut sink).unwrap();

    assert!(result.is_none());
    assert!(sink.records.is_empty());
}

#[test]
fn test_validation_means_emitted_in_key_order() {
    let mut model = ScriptedVocoder::new(1);
    *model.global_step_mut() = GlobalStep::new(5000);
    let mut sink = MemorySink::new();

    let means = run_validation(&mut model, &marked_batches(&[1.0, 2.0, 6.0]), &mut sink).unwrap().unwrap();

    assert_eq!(means["a"], 3.0);
    assert_eq!(means["b"], 6.0);
    assert_eq!(sink.tags(), vec!["valid/a", "valid/b"]);
    assert_eq!(sink.scalars("valid/a"), vec![(5000, 3.0)]);
    assert_eq!(sink.scalars("valid/b"), vec![(5000, 6.0)]);
}

/// Reports an extra key only on its first validation batch.
struct InconsistentKeys {
    step: GlobalStep,
    calls: usize,
}

impl Stateful for InconsistentKeys {
    fn state_dict(&self) -> StateValue {
        self.step.to_state()
    }

    fn load_state_dict(&mut self, state: StateValue) -> TrainingResult<()> {
        self.step = GlobalStep::from_state(state)?;
        Ok(())
    }
}

impl Vocoder for InconsistentKeys {
    fn train_step(&mut self, _batch: &Batch) -> TrainingResult<StepOutput> {
        Ok(StepOutput::new(0.0))
    }

    fn validation_losses(&mut self, _batch: &Batch) -> TrainingResult<LossMap> {
        self.calls += 1;
        let mut losses = LossMap::from([("mse".to_string(), 1.0)]);
        if self.calls == 1 {
            losses.insert("extra".to_string(), 1.0);
        }
        Ok(losses)
    }

    fn generate(&mut self, spectrograms: &Tensor) -> TrainingResult<Tensor> {
        Ok(spectrograms.clone())
    }

    fn is_done(&self) -> bool {
        true
    }

    fn optimizers(&mut self) -> Vec<OptimizerSlot<'_>> {
        Vec::new()
    }

    fn global_step(&self) -> GlobalStep {
        self.step
    }

    fn global_step_mut(&mut self) -> &mut GlobalStep {
        &mut self.step
    }

    fn set_mode(&mut self, _mode: Mode) {}
}

#[test]
fn test_validation_rejects_missing_keys() {
    let mut model = InconsistentKeys { step: GlobalStep::default(), calls: 0 };
    let err = run_validation(&mut model, &marked_batches(&[1.0, 2.0]), &mut MemorySink::new()).unwrap_err();
    assert!(matches!(err, TrainingError::Trainer(_)));
}

#[test]
fn test_first_samples_include_ground_truth() {
    let mut model = ScriptedVocoder::new(1);
    let mut sink = MemorySink::new();

    let count = generate_samples(&mut model, &marked_batches(&[1.0, 2.0, 3.0]), &mut sink, 2, 16_000).unwrap();

    assert_eq!(count, 2);
    assert_eq!(
        sink.tags(),
        vec!["audio/0_real", "audio/0_synthesized", "audio/1_real", "audio/1_synthesized"]
    );
    assert!(sink.records.iter().all(|r| matches!(
        r.value,
        MetricValue::Audio { sample_rate: 16_000, num_samples: 2 | 1, .. }
    )));
}

#[test]
fn test_later_samples_only_synthesized() {
    let mut model = ScriptedVocoder::new(1);
    *model.global_step_mut() = GlobalStep::new(100_000);
    let mut sink = MemorySink::new();

    generate_samples(&mut model, &marked_batches(&[1.0, 2.0, 3.0]), &mut sink, 2, 22_050).unwrap();

    assert_eq!(sink.tags(), vec!["audio/0_synthesized", "audio/1_synthesized"]);
    assert!(sink.records.iter().all(|r| r.step == 100_000));
}

#[test]
fn test_samples_with_short_validation_set() {
    let mut model = ScriptedVocoder::new(1);
    *model.global_step_mut() = GlobalStep::new(10);
    let mut sink = MemorySink::new();

    let count = generate_samples(&mut model, &marked_batches(&[1.0]), &mut sink, 2, 22_050).unwrap();

    assert_eq!(count, 1);
    assert_eq!(sink.tags(), vec!["audio/0_synthesized"]);
}
