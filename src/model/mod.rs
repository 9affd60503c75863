//! AudioNet: a fixed-topology CNN over log-mel spectrograms.

mod optim;
mod steps;

use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::{BatchNorm, BatchNormConfig, Linear, LinearConfig, PaddingConfig2d};
use burn::prelude::*;
use burn::tensor::activation::relu;

pub use optim::configure_optimizer;
pub use steps::{TestOutput, predicted_classes};

/// Convolution followed by batch normalisation and ReLU.
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    conv: Conv2d<B>,
    norm: BatchNorm<B>,
}

impl<B: Backend> ConvBlock<B> {
    fn new(
        channels: [usize; 2],
        kernel: usize,
        padding: usize,
        device: &B::Device,
    ) -> Self {
        let conv = Conv2dConfig::new(channels, [kernel, kernel])
            .with_padding(PaddingConfig2d::Explicit(padding, padding))
            .init(device);
        let norm = BatchNormConfig::new(channels[1]).init(device);
        Self { conv, norm }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        relu(self.norm.forward(self.conv.forward(input)))
    }
}

#[derive(Module, Debug)]
pub struct AudioNet<B: Backend> {
    block1: ConvBlock<B>,
    block2: ConvBlock<B>,
    block3: ConvBlock<B>,
    block4: ConvBlock<B>,
    fc1: Linear<B>,
}

#[derive(Config, Debug)]
pub struct AudioNetConfig {
    #[config(default = 50)]
    pub n_classes: usize,
    #[config(default = 32)]
    pub base_filters: usize,
}

impl AudioNetConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> AudioNet<B> {
        let f = self.base_filters.max(1);
        AudioNet {
            block1: ConvBlock::new([1, f], 11, 5, device),
            block2: ConvBlock::new([f, f], 3, 1, device),
            block3: ConvBlock::new([f, 2 * f], 3, 1, device),
            block4: ConvBlock::new([2 * f, 4 * f], 3, 1, device),
            fc1: LinearConfig::new(4 * f, self.n_classes).init(device),
        }
    }
}

/// 2x2 max pooling with stride 2, built from reshapes so the backward pass
/// only needs `max_dim`. The NdArray `max_pool2d` backward indexes out of
/// bounds on odd-sized maps. A side shorter than 2 is left unpooled and an
/// odd trailing row or column is dropped.
fn halving_max_pool<B: Backend>(x: Tensor<B, 4>) -> Tensor<B, 4> {
    let [batch, channels, height, width] = x.dims();
    let kh = if height >= 2 { 2 } else { 1 };
    let kw = if width >= 2 { 2 } else { 1 };
    let (h2, w2) = (height / kh, width / kw);
    x.narrow(2, 0, h2 * kh)
        .narrow(3, 0, w2 * kw)
        .reshape([batch, channels, h2, kh, w2, kw])
        .max_dim(5)
        .max_dim(3)
        .reshape([batch, channels, h2, w2])
}

/// Global average over the time and frequency axes.
fn global_avg_pool<B: Backend>(x: Tensor<B, 4>) -> Tensor<B, 2> {
    let [batch, channels, _, _] = x.dims();
    x.mean_dim(3).mean_dim(2).reshape([batch, channels])
}

impl<B: Backend> AudioNet<B> {
    /// Map spectrograms `[batch, 1, n_mels, frames]` to logits `[batch, n_classes]`.
    pub fn forward(&self, spectrograms: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.block1.forward(spectrograms);
        let x = self.block2.forward(x);
        let x = halving_max_pool(x);
        let x = self.block3.forward(x);
        let x = self.block4.forward(x);
        let x = halving_max_pool(x);
        self.fc1.forward(global_avg_pool(x))
    }

    pub fn n_classes(&self) -> usize {
        self.fc1.weight.val().dims()[1]
    }
}
