use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use super::{ConfigError, TrainConfig};

/// Environment variable naming a JSON file of sweep-agent proposals.
pub const SWEEP_CONFIG_ENV: &str = "AUDIONET_SWEEP_CONFIG";

/// Hyperparameter values proposed by an external sweep agent for one run.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SweepProposal {
    pub sample_rate: Option<u32>,
    pub lr: Option<f64>,
    pub base_filters: Option<usize>,
    /// Parameters this trainer does not sweep; warned about and dropped.
    #[serde(flatten)]
    extra: BTreeMap<String, Value>,
}

impl SweepProposal {
    /// Read proposals from `path`, or from [`SWEEP_CONFIG_ENV`] when no
    /// path is given. Returns `None` when neither is set.
    pub fn discover(path: Option<&Path>) -> Result<Option<Self>, ConfigError> {
        let path = match path {
            Some(path) => Some(path.to_path_buf()),
            None => std::env::var(SWEEP_CONFIG_ENV)
                .ok()
                .filter(|value| !value.trim().is_empty())
                .map(PathBuf::from),
        };
        path.map(|path| Self::from_file(&path)).transpose()
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text).map_err(|source| ConfigError::ParseSweep {
            path: path.to_path_buf(),
            source,
        })
    }

    fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let mut proposal: Self = serde_json::from_str(text)?;
        for key in proposal.extra.keys() {
            warn!("Ignoring unknown sweep parameter `{key}`");
        }
        proposal.extra.clear();
        Ok(proposal)
    }

    /// True when no swept value is proposed.
    pub fn is_empty(&self) -> bool {
        self.sample_rate.is_none() && self.lr.is_none() && self.base_filters.is_none()
    }

    /// Overwrite the proposed values in `config` and re-validate it.
    pub fn apply(&self, config: &mut TrainConfig) -> Result<(), ConfigError> {
        if let Some(sample_rate) = self.sample_rate {
            config.data.sample_rate = sample_rate;
        }
        if let Some(lr) = self.lr {
            config.model.optimizer.lr = lr;
        }
        if let Some(base_filters) = self.base_filters {
            config.model.base_filters = base_filters;
        }
        config.validate()
    }
}
