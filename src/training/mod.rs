//! The fit-then-test driver: loaders, the burn learner, test report and
//! model export.

mod backend;
pub mod metrics;
mod reporting;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use burn::data::dataloader::{DataLoader, DataLoaderBuilder};
use burn::data::dataset::Dataset;
use burn::data::dataset::transform::{PartialDataset, ShuffledDataset};
use burn::prelude::*;
use burn::record::CompactRecorder;
use burn::tensor::backend::AutodiffBackend;
use burn::train::metric::{AccuracyMetric, LossMetric};
use burn::train::{ClassificationOutput, Interrupter, LearnerBuilder, LearningStrategy};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::TrainConfig;
use crate::dataset::{
    ClipError, DatasetError, Esc50Batch, Esc50Batcher, Esc50Dataset, Esc50Item, Split,
};
use crate::model::{AudioNet, AudioNetConfig, configure_optimizer};
use crate::tracking::{TrackerHandle, TrackingError};

pub use backend::{
    BACKEND_ENV, BackendKind, CpuBackend, WgpuBackend, init_wgpu, resolve_backend,
};
#[cfg(feature = "cuda")]
pub use backend::CudaBackend;
use metrics::{ConfusionMatrix, accuracy, class_names, precision_recall_by_class};
use reporting::{SharedProgress, TracingRenderer, tracker_loggers};

/// File stem of the exported weights inside the run directory.
pub const MODEL_FILE_STEM: &str = "model";

const LOGGER_DRAIN_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum TrainError {
    #[error("Failed to open {split} split: {source}")]
    Dataset {
        split: &'static str,
        source: DatasetError,
    },
    #[error("The {split} split has no clips")]
    EmptySplit { split: &'static str },
    #[error("{filename} in the {split} split has target {target}, outside 0..{n_classes}")]
    TargetOutOfRange {
        split: &'static str,
        filename: String,
        target: u32,
        n_classes: usize,
    },
    #[error(transparent)]
    Clip(#[from] ClipError),
    #[error("Training loss became non-finite at step {step}")]
    NonFiniteLoss { step: u64 },
    #[error(transparent)]
    Tracking(#[from] TrackingError),
    #[error("Failed to create {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to save model to {path}: {message}")]
    Record { path: PathBuf, message: String },
}

/// What a finished run produced.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingSummary {
    pub run_id: String,
    pub epochs: usize,
    pub steps: u64,
    pub last_train_loss: Option<f64>,
    pub val_acc: Option<f64>,
    pub test_acc: Option<f64>,
    pub model_path: Option<PathBuf>,
}

type Loader<B> = Arc<dyn DataLoader<B, Esc50Batch<B>>>;

/// Fit AudioNet on the training folds with burn's learner, validating after
/// every epoch, then optionally evaluate the test folds and export the
/// weights.
pub fn train<B: AutodiffBackend>(
    config: &TrainConfig,
    device: &B::Device,
    tracker: &TrackerHandle,
) -> Result<TrainingSummary, TrainError> {
    B::seed(device, config.seed);

    let progress = SharedProgress::default();
    let run_dir = run_dir(config, tracker);
    let builder = LearnerBuilder::<
        B,
        AudioNet<B>,
        _,
        f64,
        Esc50Batch<B>,
        Esc50Batch<B::InnerBackend>,
        ClassificationOutput<B>,
        ClassificationOutput<B::InnerBackend>,
    >::new(&run_dir);
    let interrupter = builder.interrupter();

    let n_classes = config.model.n_classes;
    let train_set = open_split(config, Split::Train, &progress, &interrupter)?;
    let val_set = open_split(config, Split::Valid, &progress, &interrupter)?;
    let test_set = if config.trainer.run_test {
        Some(open_split(config, Split::Test, &progress, &interrupter)?)
    } else {
        None
    };
    if train_set.is_empty() {
        return Err(TrainError::EmptySplit {
            split: Split::Train.name(),
        });
    }
    info!(
        "Training on {} clips, validating on {} clips",
        train_set.len(),
        val_set.len()
    );

    let data = &config.data;
    let workers = config.trainer.num_workers;
    let train_set = limit_batches(
        ShuffledDataset::new(train_set, config.seed),
        config.trainer.limit_train_batches,
        data.batch_size,
    );
    let val_set = limit_batches(val_set, config.trainer.limit_val_batches, data.batch_size);
    let train_loader: Loader<B> =
        build_loader(train_set, data.batch_size, Some(config.seed), workers, device);
    let val_loader: Loader<B::InnerBackend> =
        build_loader(val_set, data.batch_size, None, workers, device);

    let model: AudioNet<B> = AudioNetConfig::new()
        .with_n_classes(n_classes)
        .with_base_filters(config.model.base_filters)
        .init(device);
    let optim = configure_optimizer::<B>(&config.model.optimizer);

    let (train_logger, valid_logger, drain) = tracker_loggers(tracker, &progress, &interrupter);
    let mut builder = builder
        .metric_train_numeric(LossMetric::new())
        .metric_valid_numeric(LossMetric::new())
        .metric_train_numeric(AccuracyMetric::new())
        .metric_valid_numeric(AccuracyMetric::new())
        .metric_loggers(train_logger, valid_logger)
        .renderer(TracingRenderer)
        .with_application_logger(None)
        .learning_strategy(LearningStrategy::SingleDevice(device.clone()))
        .num_epochs(config.trainer.max_epochs);
    if config.trainer.save_model {
        builder = builder.with_file_checkpointer(CompactRecorder::new());
    }
    let learner = builder.build(model, optim, config.model.optimizer.lr);
    let result = learner.fit(train_loader, val_loader);
    drain.wait(LOGGER_DRAIN_TIMEOUT);

    if let Some(failure) = progress.lock().failure.take() {
        return Err(failure);
    }
    let model = result.model;

    let test_acc = match test_set {
        Some(test_set) => {
            let names = class_names(test_set.rows());
            let test_loader: Loader<B::InnerBackend> =
                build_loader(test_set, data.batch_size, None, workers, device);
            let confusion = test(&model, &test_loader, n_classes);
            if let Some(failure) = progress.lock().failure.take() {
                return Err(failure);
            }
            let acc = test_accuracy(&confusion);
            if let Some(acc) = acc {
                let step = progress.lock().steps;
                tracker.record("test_acc", acc, step)?;
                log_class_report(&confusion, |class| names.get(&class).cloned());
            }
            acc
        }
        None => None,
    };

    let model_path = if config.trainer.save_model {
        Some(save_model(model, &run_dir)?)
    } else {
        None
    };

    let progress = progress.into_inner();
    Ok(TrainingSummary {
        run_id: tracker.run_id().to_string(),
        epochs: progress.epochs_completed,
        steps: progress.steps,
        last_train_loss: progress.last_train_loss,
        val_acc: progress.val_acc,
        test_acc,
        model_path,
    })
}

/// Open one split, check its targets and that its clips exist, and route
/// load failures during iteration to `progress`.
fn open_split(
    config: &TrainConfig,
    split: Split,
    progress: &SharedProgress,
    interrupter: &Interrupter,
) -> Result<Esc50Dataset, TrainError> {
    let dataset = Esc50Dataset::with_settings(
        &config.data.path,
        config.data.sample_rate,
        config.data.folds(split),
        config.data.mel.clone(),
    )
    .map_err(|source| TrainError::Dataset {
        split: split.name(),
        source,
    })?;
    check_targets(&dataset, split, config.model.n_classes)?;
    dataset.verify_clips()?;

    let progress = progress.clone();
    let interrupter = interrupter.clone();
    Ok(dataset.with_failure_sink(Arc::new(move |err: &ClipError| {
        progress.fail(TrainError::Clip(err.clone()), &interrupter);
    })))
}

fn check_targets(
    dataset: &Esc50Dataset,
    split: Split,
    n_classes: usize,
) -> Result<(), TrainError> {
    match dataset.find_target_at_least(n_classes) {
        Some(row) => Err(TrainError::TargetOutOfRange {
            split: split.name(),
            filename: row.filename.clone(),
            target: row.target,
            n_classes,
        }),
        None => Ok(()),
    }
}

/// Keep the leading `limit` batches' worth of clips.
fn limit_batches<D: Dataset<Esc50Item>>(
    dataset: D,
    limit: Option<usize>,
    batch_size: usize,
) -> PartialDataset<D, Esc50Item> {
    let len = dataset.len();
    let end = limit.map_or(len, |batches| len.min(batches.saturating_mul(batch_size)));
    PartialDataset::new(dataset, 0, end)
}

fn build_loader<B: Backend, D: Dataset<Esc50Item> + 'static>(
    dataset: D,
    batch_size: usize,
    shuffle_seed: Option<u64>,
    workers: usize,
    device: &B::Device,
) -> Loader<B> {
    let mut builder = DataLoaderBuilder::<B, Esc50Item, Esc50Batch<B>>::new(Esc50Batcher)
        .batch_size(batch_size)
        .num_workers(workers)
        .set_device(device.clone());
    if let Some(seed) = shuffle_seed {
        builder = builder.shuffle(seed);
    }
    builder.build(dataset)
}

fn test<B: Backend>(model: &AudioNet<B>, loader: &Loader<B>, n_classes: usize) -> ConfusionMatrix {
    let mut confusion = ConfusionMatrix::new(n_classes);
    for batch in loader.iter() {
        let output = model.test_step(batch);
        confusion.add_all(&output.targets, &output.predicted);
    }
    confusion
}

/// Overall test accuracy; `None` when nothing was evaluated.
fn test_accuracy(confusion: &ConfusionMatrix) -> Option<f64> {
    if confusion.total() == 0 {
        warn!("Test split produced no batches");
        return None;
    }
    Some(f64::from(accuracy(confusion)))
}

fn log_class_report(confusion: &ConfusionMatrix, name_of: impl Fn(usize) -> Option<String>) {
    for (class, stats) in precision_recall_by_class(confusion).iter().enumerate() {
        if stats.support == 0 {
            continue;
        }
        let name = name_of(class).unwrap_or_else(|| format!("class {class}"));
        info!(
            "{class:>2} {name:<20} precision={:.3} recall={:.3} support={}",
            stats.precision, stats.recall, stats.support
        );
    }
}

fn run_dir(config: &TrainConfig, tracker: &TrackerHandle) -> PathBuf {
    match tracker.run_dir() {
        Some(dir) => dir.to_path_buf(),
        None => config
            .tracker
            .dir
            .join(&config.tracker.project)
            .join(tracker.run_id()),
    }
}

fn save_model<B: Backend>(model: AudioNet<B>, dir: &Path) -> Result<PathBuf, TrainError> {
    create_dir(dir)?;
    let path = dir.join(MODEL_FILE_STEM);
    model
        .save_file(path.clone(), &CompactRecorder::new())
        .map_err(|err| TrainError::Record {
            path: path.clone(),
            message: err.to_string(),
        })?;
    info!("Saved model weights to {}", path.display());
    Ok(path)
}

fn create_dir(path: &Path) -> Result<(), TrainError> {
    std::fs::create_dir_all(path).map_err(|source| TrainError::CreateDir {
        path: path.to_path_buf(),
        source,
    })
}
