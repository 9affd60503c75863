//! Experiment tracking: run configuration and scalar metrics per step.

mod http;
mod local;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use time::format_description::FormatItem;
use time::macros::format_description;
use tracing::{info, warn};

pub use http::{HttpTracker, TRACKER_TOKEN_ENV};
pub use local::LocalRunTracker;

#[derive(Debug, Error)]
pub enum TrackingError {
    #[error("Failed to create run directory {path}: {source}")]
    CreateRunDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to encode tracker payload: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("Tracker endpoint is required for kind = \"http\"")]
    MissingEndpoint,
    #[error("Tracker request to {url} failed: {message}")]
    Request { url: String, message: String },
    #[error("Failed to format timestamp: {0}")]
    FormatTime(#[from] time::error::Format),
}

/// Which tracker backend receives run data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackerKind {
    #[default]
    Local,
    Http,
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrackerConfig {
    pub kind: TrackerKind,
    pub project: String,
    /// Root of local run directories.
    pub dir: PathBuf,
    /// Base URL of the HTTP tracker service.
    pub endpoint: Option<String>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            kind: TrackerKind::Local,
            project: "reprodl".to_string(),
            dir: PathBuf::from("runs"),
            endpoint: None,
        }
    }
}

/// Sink for the configuration and metrics of one run.
pub trait ExperimentTracker: Send {
    fn run_id(&self) -> &str;

    /// Directory owned by this run, if the tracker keeps one on disk.
    fn run_dir(&self) -> Option<&Path> {
        None
    }

    fn log_config(&mut self, config: &Value) -> Result<(), TrackingError>;

    fn log_metric(&mut self, name: &str, value: f64, step: u64) -> Result<(), TrackingError>;

    fn finish(&mut self) -> Result<(), TrackingError>;
}

/// Accepts and discards everything.
#[derive(Debug)]
pub struct NullTracker {
    run_id: String,
}

impl NullTracker {
    pub fn new() -> Self {
        Self { run_id: new_run_id() }
    }
}

impl Default for NullTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ExperimentTracker for NullTracker {
    fn run_id(&self) -> &str {
        &self.run_id
    }

    fn log_config(&mut self, _config: &Value) -> Result<(), TrackingError> {
        Ok(())
    }

    fn log_metric(&mut self, _name: &str, _value: f64, _step: u64) -> Result<(), TrackingError> {
        Ok(())
    }

    fn finish(&mut self) -> Result<(), TrackingError> {
        Ok(())
    }
}

/// Build the tracker selected by `config`.
pub fn open_tracker(config: &TrackerConfig) -> Result<Box<dyn ExperimentTracker>, TrackingError> {
    let tracker: Box<dyn ExperimentTracker> = match config.kind {
        TrackerKind::Local => Box::new(LocalRunTracker::create(&config.dir, &config.project)?),
        TrackerKind::Http => {
            let endpoint = config
                .endpoint
                .as_deref()
                .filter(|endpoint| !endpoint.trim().is_empty())
                .ok_or(TrackingError::MissingEndpoint)?;
            Box::new(HttpTracker::new(endpoint, &config.project))
        }
        TrackerKind::None => Box::new(NullTracker::new()),
    };
    info!("Tracking run {} ({:?})", tracker.run_id(), config.kind);
    Ok(tracker)
}

/// Log `value` through `tracing` and forward it to `tracker`.
pub fn record_metric(
    tracker: &mut dyn ExperimentTracker,
    name: &str,
    value: f64,
    step: u64,
) -> Result<(), TrackingError> {
    info!(metric = name, value, step, "{name}={value:.6} (step {step})");
    tracker.log_metric(name, value, step)
}

/// A tracker shared between the training driver and the metric loggers
/// that run on the learner's event thread.
#[derive(Clone)]
pub struct TrackerHandle {
    run_id: String,
    run_dir: Option<PathBuf>,
    inner: Arc<Mutex<Box<dyn ExperimentTracker>>>,
}

impl TrackerHandle {
    pub fn new(tracker: Box<dyn ExperimentTracker>) -> Self {
        Self {
            run_id: tracker.run_id().to_string(),
            run_dir: tracker.run_dir().map(Path::to_path_buf),
            inner: Arc::new(Mutex::new(tracker)),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn run_dir(&self) -> Option<&Path> {
        self.run_dir.as_deref()
    }

    pub fn log_config(&self, config: &Value) -> Result<(), TrackingError> {
        self.lock().log_config(config)
    }

    /// Log through `tracing` and forward to the tracker.
    pub fn record(&self, name: &str, value: f64, step: u64) -> Result<(), TrackingError> {
        record_metric(self.lock().as_mut(), name, value, step)
    }

    pub fn finish(&self) -> Result<(), TrackingError> {
        self.lock().finish()
    }

    fn lock(&self) -> MutexGuard<'_, Box<dyn ExperimentTracker>> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            warn!("Tracker lock poisoned; recovering.");
            poisoned.into_inner()
        })
    }
}

impl std::fmt::Debug for TrackerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackerHandle")
            .field("run_id", &self.run_id)
            .field("run_dir", &self.run_dir)
            .finish_non_exhaustive()
    }
}

/// `<UTC timestamp>-<8 hex chars>`, sortable by start time.
pub(crate) fn new_run_id() -> String {
    const STAMP_FORMAT: &[FormatItem<'_>] =
        format_description!("[year][month][day]-[hour][minute][second]");
    let stamp = time::OffsetDateTime::now_utc()
        .format(STAMP_FORMAT)
        .unwrap_or_else(|_| "unknown".into());
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("{stamp}-{}", &id[..8])
}

pub(crate) fn timestamp() -> Result<String, TrackingError> {
    Ok(time::OffsetDateTime::now_utc().format(&time::format_description::well_known::Rfc3339)?)
}
