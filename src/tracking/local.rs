use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value;

use super::{ExperimentTracker, TrackingError, new_run_id, timestamp};

const CONFIG_FILE: &str = "config.json";
const METRICS_FILE: &str = "metrics.jsonl";
const SUMMARY_FILE: &str = "summary.json";

#[derive(Serialize)]
struct MetricLine<'a> {
    name: &'a str,
    value: f64,
    step: u64,
    timestamp: String,
}

/// Writes each run to `<root>/<project>/<run_id>/`.
pub struct LocalRunTracker {
    run_id: String,
    run_dir: PathBuf,
    metrics: BufWriter<File>,
    latest: BTreeMap<String, f64>,
}

impl LocalRunTracker {
    pub fn create(root: &Path, project: &str) -> Result<Self, TrackingError> {
        let run_id = new_run_id();
        let run_dir = root.join(project).join(&run_id);
        fs::create_dir_all(&run_dir).map_err(|source| TrackingError::CreateRunDir {
            path: run_dir.clone(),
            source,
        })?;
        let metrics_path = run_dir.join(METRICS_FILE);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&metrics_path)
            .map_err(|source| TrackingError::Write {
                path: metrics_path,
                source,
            })?;
        Ok(Self {
            run_id,
            run_dir,
            metrics: BufWriter::new(file),
            latest: BTreeMap::new(),
        })
    }

    fn write_json(&self, name: &str, value: &impl Serialize) -> Result<(), TrackingError> {
        let path = self.run_dir.join(name);
        let text = serde_json::to_string_pretty(value)?;
        fs::write(&path, text).map_err(|source| TrackingError::Write { path, source })
    }
}

impl ExperimentTracker for LocalRunTracker {
    fn run_id(&self) -> &str {
        &self.run_id
    }

    fn run_dir(&self) -> Option<&Path> {
        Some(&self.run_dir)
    }

    fn log_config(&mut self, config: &Value) -> Result<(), TrackingError> {
        self.write_json(CONFIG_FILE, config)
    }

    fn log_metric(&mut self, name: &str, value: f64, step: u64) -> Result<(), TrackingError> {
        let line = MetricLine {
            name,
            value,
            step,
            timestamp: timestamp()?,
        };
        let path = self.run_dir.join(METRICS_FILE);
        let io_error = |source| TrackingError::Write {
            path: path.clone(),
            source,
        };
        serde_json::to_writer(&mut self.metrics, &line)?;
        self.metrics.write_all(b"\n").map_err(io_error)?;
        self.metrics.flush().map_err(io_error)?;
        self.latest.insert(name.to_string(), value);
        Ok(())
    }

    fn finish(&mut self) -> Result<(), TrackingError> {
        self.write_json(SUMMARY_FILE, &self.latest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn run_directory_holds_config_metrics_and_summary() {
        let dir = tempdir().unwrap();
        let mut tracker = LocalRunTracker::create(dir.path(), "proj").unwrap();
        let run_dir = tracker.run_dir().unwrap().to_path_buf();
        assert_eq!(run_dir.parent().unwrap(), dir.path().join("proj"));

        tracker
            .log_config(&serde_json::json!({"lr": 0.001, "base_filters": 32}))
            .unwrap();
        tracker.log_metric("train_loss", 3.5, 0).unwrap();
        tracker.log_metric("train_loss", 2.5, 1).unwrap();
        tracker.log_metric("val_acc", 0.25, 1).unwrap();
        tracker.finish().unwrap();

        let config: Value =
            serde_json::from_str(&fs::read_to_string(run_dir.join(CONFIG_FILE)).unwrap()).unwrap();
        assert_eq!(config["base_filters"], 32);

        let lines: Vec<Value> = fs::read_to_string(run_dir.join(METRICS_FILE))
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1]["name"], "train_loss");
        assert_eq!(lines[1]["step"], 1);
        assert!(lines[2]["timestamp"].as_str().is_some());

        let summary: BTreeMap<String, f64> =
            serde_json::from_str(&fs::read_to_string(run_dir.join(SUMMARY_FILE)).unwrap())
                .unwrap();
        assert_eq!(summary["train_loss"], 2.5);
        assert_eq!(summary["val_acc"], 0.25);
    }
}
