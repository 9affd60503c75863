use burn::nn::loss::CrossEntropyLossConfig;
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use burn::train::{ClassificationOutput, TrainOutput, TrainStep, ValidStep};

use super::AudioNet;
use crate::dataset::Esc50Batch;

impl<B: Backend> AudioNet<B> {
    /// Forward pass plus cross-entropy loss against `targets`.
    pub fn forward_classification(
        &self,
        spectrograms: Tensor<B, 4>,
        targets: Tensor<B, 1, Int>,
    ) -> ClassificationOutput<B> {
        let output = self.forward(spectrograms);
        let loss = CrossEntropyLossConfig::new()
            .init(&output.device())
            .forward(output.clone(), targets.clone());
        ClassificationOutput::new(loss, output, targets)
    }

    /// Argmax predictions for a test batch, paired with the true targets.
    pub fn test_step(&self, batch: Esc50Batch<B>) -> TestOutput {
        let logits = self.forward(batch.spectrograms);
        TestOutput {
            predicted: predicted_classes(logits),
            targets: class_indices(batch.targets),
        }
    }
}

/// Per-example predictions of one test batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestOutput {
    pub predicted: Vec<usize>,
    pub targets: Vec<usize>,
}

impl TestOutput {
    pub fn correct(&self) -> usize {
        self.predicted
            .iter()
            .zip(&self.targets)
            .filter(|(predicted, truth)| predicted == truth)
            .count()
    }

    pub fn total(&self) -> usize {
        self.targets.len()
    }
}

impl<B: AutodiffBackend> TrainStep<Esc50Batch<B>, ClassificationOutput<B>> for AudioNet<B> {
    fn step(&self, batch: Esc50Batch<B>) -> TrainOutput<ClassificationOutput<B>> {
        let item = self.forward_classification(batch.spectrograms, batch.targets);
        TrainOutput::new(self, item.loss.backward(), item)
    }
}

impl<B: Backend> ValidStep<Esc50Batch<B>, ClassificationOutput<B>> for AudioNet<B> {
    fn step(&self, batch: Esc50Batch<B>) -> ClassificationOutput<B> {
        self.forward_classification(batch.spectrograms, batch.targets)
    }
}

/// Argmax class index of every row of `logits`.
pub fn predicted_classes<B: Backend>(logits: Tensor<B, 2>) -> Vec<usize> {
    let [batch, _] = logits.dims();
    class_indices(logits.argmax(1).reshape([batch]))
}

fn class_indices<B: Backend>(values: Tensor<B, 1, Int>) -> Vec<usize> {
    values
        .into_data()
        .convert::<i64>()
        .to_vec::<i64>()
        .map(|values| values.into_iter().map(|v| v.max(0) as usize).collect())
        .unwrap_or_default()
}
