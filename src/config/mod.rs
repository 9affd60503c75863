//! Hierarchical run settings loaded from TOML.
//!
//! A settings file is parsed into a TOML tree, dotted `key.path=value`
//! overrides are applied to that tree, and the result is deserialised into
//! [`TrainConfig`]. Sweep proposals are applied afterwards.

mod overrides;
mod sweep;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dataset::Split;
use crate::spectrogram::MelSettings;
use crate::tracking::TrackerConfig;

pub use overrides::apply_override;
pub use sweep::{SWEEP_CONFIG_ENV, SweepProposal};

/// Settings file used when none is given on the command line.
pub const DEFAULT_CONFIG_PATH: &str = "configs/default.toml";

/// Errors that may occur while loading or validating settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid config at {path}: {source}")]
    ParseToml {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to serialize config: {0}")]
    SerializeToml(#[from] toml::ser::Error),
    #[error("Invalid override `{raw}`: {reason}")]
    Override { raw: String, reason: String },
    #[error("Invalid sweep proposal at {path}: {source}")]
    ParseSweep {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrainConfig {
    pub seed: u64,
    pub data: DataConfig,
    pub model: ModelSettings,
    pub trainer: TrainerSettings,
    pub tracker: TrackerConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DataConfig {
    pub path: PathBuf,
    pub sample_rate: u32,
    pub train_folds: Vec<u32>,
    pub val_folds: Vec<u32>,
    pub test_folds: Vec<u32>,
    pub batch_size: usize,
    pub mel: MelSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModelSettings {
    pub n_classes: usize,
    pub base_filters: usize,
    pub optimizer: OptimizerSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OptimizerSettings {
    pub lr: f64,
    pub weight_decay: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrainerSettings {
    pub max_epochs: usize,
    pub num_workers: usize,
    /// `wgpu`, `cpu` or `cuda`; `AUDIONET_BACKEND` takes precedence.
    pub backend: String,
    pub run_test: bool,
    pub save_model: bool,
    pub limit_train_batches: Option<usize>,
    pub limit_val_batches: Option<usize>,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            data: DataConfig::default(),
            model: ModelSettings::default(),
            trainer: TrainerSettings::default(),
            tracker: TrackerConfig::default(),
        }
    }
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("ESC-50-master"),
            sample_rate: 8_000,
            train_folds: vec![1, 2, 3],
            val_folds: vec![4],
            test_folds: vec![5],
            batch_size: 8,
            mel: MelSettings::default(),
        }
    }
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            n_classes: 50,
            base_filters: 32,
            optimizer: OptimizerSettings::default(),
        }
    }
}

impl Default for OptimizerSettings {
    fn default() -> Self {
        Self {
            lr: 3e-4,
            weight_decay: None,
        }
    }
}

impl Default for TrainerSettings {
    fn default() -> Self {
        Self {
            max_epochs: 25,
            num_workers: 2,
            backend: "wgpu".to_string(),
            run_test: true,
            save_model: true,
            limit_train_batches: None,
            limit_val_batches: None,
        }
    }
}

impl DataConfig {
    pub fn folds(&self, split: Split) -> &[u32] {
        match split {
            Split::Train => &self.train_folds,
            Split::Valid => &self.val_folds,
            Split::Test => &self.test_folds,
        }
    }
}

impl TrainConfig {
    /// Load a settings file, apply dotted overrides, and validate the result.
    pub fn load(path: &Path, overrides: &[String]) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text, path, overrides)
    }

    /// Parse settings text; `origin` only labels errors.
    pub fn from_toml_str(
        text: &str,
        origin: &Path,
        overrides: &[String],
    ) -> Result<Self, ConfigError> {
        let parse_error = |source| ConfigError::ParseToml {
            path: origin.to_path_buf(),
            source,
        };
        let mut value: toml::Value = toml::from_str(text).map_err(parse_error)?;
        for raw in overrides {
            apply_override(&mut value, raw)?;
        }
        let config: Self = value.try_into().map_err(parse_error)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Flat view of the values a sweep agent may propose.
    pub fn hyperparameters(&self) -> serde_json::Value {
        serde_json::json!({
            "sample_rate": self.data.sample_rate,
            "lr": self.model.optimizer.lr,
            "base_filters": self.model.base_filters,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field, reason: &str| {
            Err(ConfigError::Invalid {
                field,
                reason: reason.to_string(),
            })
        };
        if self.data.sample_rate == 0 {
            return invalid("data.sample_rate", "must be positive");
        }
        if self.data.batch_size == 0 {
            return invalid("data.batch_size", "must be positive");
        }
        if self.data.mel.n_fft == 0 || self.data.mel.n_mels == 0 {
            return invalid("data.mel", "n_fft and n_mels must be positive");
        }
        if self.model.base_filters == 0 {
            return invalid("model.base_filters", "must be positive");
        }
        if self.model.n_classes < 2 {
            return invalid("model.n_classes", "need at least 2 classes");
        }
        let lr = self.model.optimizer.lr;
        if !lr.is_finite() || lr <= 0.0 {
            return invalid("model.optimizer.lr", "must be a positive number");
        }
        for split in [Split::Train, Split::Valid, Split::Test] {
            if self.data.folds(split).is_empty() {
                return invalid(split.folds_field(), "must list at least one fold");
            }
        }
        let train: BTreeSet<u32> = self.data.train_folds.iter().copied().collect();
        let val: BTreeSet<u32> = self.data.val_folds.iter().copied().collect();
        let test: BTreeSet<u32> = self.data.test_folds.iter().copied().collect();
        if !train.is_disjoint(&val) || !train.is_disjoint(&test) || !val.is_disjoint(&test) {
            return invalid("data", "train, val and test folds must not overlap");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
seed = 7

[data]
path = "ESC-50-master"
sample_rate = 8000
train_folds = [1, 2, 3]
val_folds = [4]
test_folds = [5]
batch_size = 8

[model]
n_classes = 50
base_filters = 32

[model.optimizer]
lr = 0.0003

[trainer]
max_epochs = 3
backend = "cpu"
"#;

    fn parse(overrides: &[&str]) -> Result<TrainConfig, ConfigError> {
        let overrides: Vec<String> = overrides.iter().map(|s| s.to_string()).collect();
        TrainConfig::from_toml_str(SAMPLE, Path::new("test.toml"), &overrides)
    }

    #[test]
    fn parses_sections_and_fills_defaults() {
        let config = parse(&[]).unwrap();
        assert_eq!(config.seed, 7);
        assert_eq!(config.data.folds(Split::Valid), &[4]);
        assert_eq!(config.trainer.max_epochs, 3);
        assert_eq!(config.trainer.num_workers, 2);
        assert!(config.trainer.run_test);
        assert_eq!(config.data.mel, MelSettings::default());
    }

    #[test]
    fn dotted_overrides_replace_file_values() {
        let config = parse(&[
            "data.batch_size=16",
            "model.optimizer.lr=1e-3",
            "data.train_folds=[1,2]",
            "trainer.backend=wgpu",
            "data.mel.n_mels=64",
        ])
        .unwrap();
        assert_eq!(config.data.batch_size, 16);
        assert!((config.model.optimizer.lr - 1e-3).abs() < 1e-12);
        assert_eq!(config.data.train_folds, vec![1, 2]);
        assert_eq!(config.trainer.backend, "wgpu");
        assert_eq!(config.data.mel.n_mels, 64);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(matches!(
            parse(&["data.batchsize=4"]),
            Err(ConfigError::ParseToml { .. })
        ));
    }

    #[test]
    fn overlapping_folds_fail_validation() {
        let err = parse(&["data.val_folds=[3]"]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "data", .. }));
    }

    #[test]
    fn non_positive_values_fail_validation() {
        assert!(parse(&["data.batch_size=0"]).is_err());
        assert!(parse(&["model.optimizer.lr=0.0"]).is_err());
        assert!(parse(&["model.n_classes=1"]).is_err());
        assert!(parse(&["data.test_folds=[]"]).is_err());
    }

    #[test]
    fn effective_config_round_trips_through_toml() {
        let config = parse(&["tracker.kind=\"none\""]).unwrap();
        let text = config.to_toml_string().unwrap();
        let reparsed = TrainConfig::from_toml_str(&text, Path::new("echo.toml"), &[]).unwrap();
        assert_eq!(reparsed, config);
    }
}
