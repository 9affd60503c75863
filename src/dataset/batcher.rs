use burn::data::dataloader::batcher::Batcher;
use burn::prelude::*;
use burn::tensor::TensorData;

use super::Esc50Item;

/// Stacked spectrograms `[batch, 1, n_mels, frames]` and class targets `[batch]`.
#[derive(Clone, Debug)]
pub struct Esc50Batch<B: Backend> {
    pub spectrograms: Tensor<B, 4>,
    pub targets: Tensor<B, 1, Int>,
}

#[derive(Clone, Debug, Default)]
pub struct Esc50Batcher;

impl<B: Backend> Esc50Batch<B> {
    /// Stack items, right-padding shorter clips with their own minimum value.
    pub fn from_items(items: &[Esc50Item], device: &B::Device) -> Self {
        let batch = items.len();
        let n_mels = items
            .first()
            .map(|item| item.spectrogram.n_mels)
            .unwrap_or(0);
        let frames = items
            .iter()
            .map(|item| item.spectrogram.frames)
            .max()
            .unwrap_or(0);

        let mut values = Vec::with_capacity(batch * n_mels * frames);
        for item in items {
            let floor = item.spectrogram.min_value();
            values.extend(item.spectrogram.padded_values(frames, floor));
        }
        let spectrograms =
            Tensor::<B, 4>::from_data(TensorData::new(values, [batch, 1, n_mels, frames]), device);

        let labels: Vec<B::IntElem> = items
            .iter()
            .map(|item| (item.label as i64).elem::<B::IntElem>())
            .collect();
        let targets = Tensor::<B, 1, Int>::from_data(TensorData::new(labels, [batch]), device);

        Self {
            spectrograms,
            targets,
        }
    }

    pub fn len(&self) -> usize {
        self.targets.dims()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<B: Backend> Batcher<B, Esc50Item, Esc50Batch<B>> for Esc50Batcher {
    fn batch(&self, items: Vec<Esc50Item>, device: &B::Device) -> Esc50Batch<B> {
        Esc50Batch::from_items(&items, device)
    }
}
