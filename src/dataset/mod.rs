//! ESC-50 dataset adapter: fold filtering and per-access spectrogram loading.

mod batcher;
mod metadata;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use burn::data::dataset::Dataset;
use thiserror::Error;
use tracing::warn;

use crate::audio::{self, AudioError};
use crate::spectrogram::{MelSettings, MelSpectrogram, Spectrogram};

pub use batcher::{Esc50Batch, Esc50Batcher};
pub use metadata::{METADATA_RELATIVE_PATH, MetadataRow, read_metadata};

/// Subdirectory holding the audio clips.
pub const AUDIO_DIR: &str = "audio";

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("Failed to open metadata table {path}: {source}")]
    OpenMetadata {
        path: PathBuf,
        source: csv::Error,
    },
    #[error("Malformed metadata row in {path} (line {line:?}): {source}")]
    MalformedRow {
        path: PathBuf,
        line: Option<u64>,
        source: csv::Error,
    },
    #[error("No folds selected")]
    NoFolds,
    #[error("Target sample rate must be positive")]
    ZeroSampleRate,
}

/// Failure to produce one training example.
#[derive(Debug, Clone, Error)]
pub enum ClipError {
    #[error("Index {index} out of range for dataset of {len} clips")]
    OutOfRange { index: usize, len: usize },
    #[error("{message}")]
    Read { path: PathBuf, message: String },
}

/// Receives clips that failed to load while a data loader iterates.
pub type ClipFailureSink = Arc<dyn Fn(&ClipError) + Send + Sync>;

impl ClipError {
    fn read(path: &Path, source: AudioError) -> Self {
        Self::Read {
            path: path.to_path_buf(),
            message: source.to_string(),
        }
    }
}

/// Which fold list a dataset is built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Split {
    Train,
    Valid,
    Test,
}

impl Split {
    pub fn name(self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Valid => "val",
            Split::Test => "test",
        }
    }

    pub fn folds_field(self) -> &'static str {
        match self {
            Split::Train => "data.train_folds",
            Split::Valid => "data.val_folds",
            Split::Test => "data.test_folds",
        }
    }
}

/// One example: the dB mel spectrogram and its class target.
#[derive(Debug, Clone)]
pub struct Esc50Item {
    pub spectrogram: Spectrogram,
    pub label: usize,
}

/// The ESC-50 clips belonging to a set of folds.
///
/// Nothing is cached: every access decodes, resamples and transforms the clip.
/// Through [`Dataset::get`] a clip that fails to load ends iteration and is
/// handed to the failure sink.
#[derive(Clone)]
pub struct Esc50Dataset {
    root: PathBuf,
    rows: Vec<MetadataRow>,
    sample_rate: u32,
    transform: Arc<MelSpectrogram>,
    on_failure: Option<ClipFailureSink>,
}

impl Esc50Dataset {
    /// Load `<root>/meta/esc50.csv` and keep rows whose fold is in `folds`.
    pub fn new(root: &Path, sample_rate: u32, folds: &[u32]) -> Result<Self, DatasetError> {
        Self::with_settings(root, sample_rate, folds, MelSettings::default())
    }

    pub fn with_settings(
        root: &Path,
        sample_rate: u32,
        folds: &[u32],
        settings: MelSettings,
    ) -> Result<Self, DatasetError> {
        if folds.is_empty() {
            return Err(DatasetError::NoFolds);
        }
        if sample_rate == 0 {
            return Err(DatasetError::ZeroSampleRate);
        }
        let wanted: BTreeSet<u32> = folds.iter().copied().collect();
        let rows: Vec<MetadataRow> = read_metadata(&root.join(METADATA_RELATIVE_PATH))?
            .into_iter()
            .filter(|row| wanted.contains(&row.fold))
            .collect();
        tracing::debug!(
            "Selected {} clips from folds {:?} under {}",
            rows.len(),
            wanted,
            root.display()
        );
        Ok(Self {
            root: root.to_path_buf(),
            rows,
            sample_rate,
            transform: Arc::new(MelSpectrogram::new(sample_rate, settings)),
            on_failure: None,
        })
    }

    pub fn with_failure_sink(mut self, sink: ClipFailureSink) -> Self {
        self.on_failure = Some(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[MetadataRow] {
        &self.rows
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Frequency bins in every spectrogram this dataset yields.
    pub fn n_mels(&self) -> usize {
        self.transform.n_mels()
    }

    pub fn clip_path(&self, row: &MetadataRow) -> PathBuf {
        self.root.join(AUDIO_DIR).join(&row.filename)
    }

    /// First row whose target is not below `n_classes`.
    pub fn find_target_at_least(&self, n_classes: usize) -> Option<&MetadataRow> {
        self.rows
            .iter()
            .find(|row| row.target as usize >= n_classes)
    }

    /// Check that every selected clip exists on disk.
    pub fn verify_clips(&self) -> Result<(), ClipError> {
        for row in &self.rows {
            let path = self.clip_path(row);
            if !path.is_file() {
                return Err(ClipError::Read {
                    message: format!("Missing audio file {}", path.display()),
                    path,
                });
            }
        }
        Ok(())
    }

    /// Decode, resample and transform the clip at `index`.
    pub fn load(&self, index: usize) -> Result<Esc50Item, ClipError> {
        let row = self.rows.get(index).ok_or(ClipError::OutOfRange {
            index,
            len: self.rows.len(),
        })?;
        let path = self.clip_path(row);
        let clip = audio::decode_wav(&path).map_err(|err| ClipError::read(&path, err))?;
        let samples = audio::resample_sinc(&clip.samples, clip.sample_rate, self.sample_rate);
        Ok(Esc50Item {
            spectrogram: self.transform.compute(&samples),
            label: row.target as usize,
        })
    }
}

impl Dataset<Esc50Item> for Esc50Dataset {
    fn get(&self, index: usize) -> Option<Esc50Item> {
        if index >= self.rows.len() {
            return None;
        }
        match self.load(index) {
            Ok(item) => Some(item),
            Err(err) => {
                warn!("Stopping iteration: {err}");
                if let Some(sink) = &self.on_failure {
                    sink(&err);
                }
                None
            }
        }
    }

    fn len(&self) -> usize {
        self.rows.len()
    }
}
