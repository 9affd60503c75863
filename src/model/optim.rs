use burn::optim::decay::WeightDecayConfig;
use burn::optim::{AdamConfig, Optimizer};
use burn::tensor::backend::AutodiffBackend;

use super::AudioNet;
use crate::config::OptimizerSettings;

/// A single Adam optimizer over every AudioNet parameter.
///
/// The learning rate is applied per step by the caller.
pub fn configure_optimizer<B: AutodiffBackend>(
    settings: &OptimizerSettings,
) -> impl Optimizer<AudioNet<B>, B> + use<B> {
    let weight_decay = settings
        .weight_decay
        .filter(|decay| *decay > 0.0)
        .map(WeightDecayConfig::new);
    AdamConfig::new()
        .with_weight_decay(weight_decay)
        .init::<B, AudioNet<B>>()
}
