//! Bridges between the burn learner's event stream and this crate's
//! tracker and `tracing` output.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use burn::train::Interrupter;
use burn::train::logger::{InMemoryMetricLogger, MetricLogger};
use burn::train::metric::{MetricEntry, NumericEntry};
use burn::train::renderer::{
    EvaluationName, EvaluationProgress, MetricState, MetricsRenderer, MetricsRendererEvaluation,
    MetricsRendererTraining, TrainingProgress,
};
use tracing::{debug, info, warn};

use super::TrainError;
use crate::tracking::TrackerHandle;

/// Name burn's `LossMetric` logs under.
const LOSS_METRIC: &str = "Loss";
/// Name burn's `AccuracyMetric` logs under; values are percentages.
const ACCURACY_METRIC: &str = "Accuracy";

/// What the loggers observed, read back by the driver after `fit`.
#[derive(Debug, Default)]
pub(crate) struct RunProgress {
    pub steps: u64,
    pub last_train_loss: Option<f64>,
    pub val_acc: Option<f64>,
    pub epochs_completed: usize,
    /// First error raised on the event thread or by the data loaders.
    pub failure: Option<TrainError>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct SharedProgress(Arc<Mutex<RunProgress>>);

impl SharedProgress {
    pub fn lock(&self) -> MutexGuard<'_, RunProgress> {
        self.0.lock().unwrap_or_else(|poisoned| {
            warn!("Run progress lock poisoned; recovering.");
            poisoned.into_inner()
        })
    }

    /// Keep the first failure and ask the learner to stop.
    pub fn fail(&self, err: TrainError, interrupter: &Interrupter) {
        let mut progress = self.lock();
        if progress.failure.is_none() {
            warn!("Stopping training: {err}");
            progress.failure = Some(err);
        }
        interrupter.stop();
    }

    pub fn into_inner(self) -> RunProgress {
        match Arc::try_unwrap(self.0) {
            Ok(mutex) => mutex.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner()),
            Err(shared) => std::mem::take(&mut *SharedProgress(shared).lock()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoggedSplit {
    Train,
    Valid,
}

/// Forwards learner metrics to the experiment tracker.
///
/// Training batches become `train_loss` at a global step. Validation
/// accuracy is averaged over the epoch and logged with the epoch index when
/// the epoch ends. Everything is also kept in memory so the learner's
/// checkpoint strategy can read it back.
pub(crate) struct TrackerMetricLogger {
    split: LoggedSplit,
    tracker: TrackerHandle,
    progress: SharedProgress,
    interrupter: Interrupter,
    history: InMemoryMetricLogger,
    /// Batch-size weighted accuracy percentages of the current epoch.
    accuracy_sum: f64,
    accuracy_count: usize,
    /// Dropped together with the logger; see [`LoggerDrain`].
    _alive: Option<Sender<()>>,
}

/// Waits for the learner to drop its metric loggers.
///
/// Metric entries reach the loggers on burn's event store thread, which may
/// still be draining its queue after `fit` returns. The loggers are dropped
/// only once that queue is empty.
pub(crate) struct LoggerDrain(Receiver<()>);

impl LoggerDrain {
    pub fn wait(self, timeout: Duration) {
        if let Err(RecvTimeoutError::Timeout) = self.0.recv_timeout(timeout) {
            warn!("Metric loggers still alive after {timeout:?}; metrics may be incomplete");
        }
    }
}

/// Train and valid loggers sharing one drain handle.
pub(crate) fn tracker_loggers(
    tracker: &TrackerHandle,
    progress: &SharedProgress,
    interrupter: &Interrupter,
) -> (TrackerMetricLogger, TrackerMetricLogger, LoggerDrain) {
    let (alive, drained) = mpsc::channel();
    let mut train =
        TrackerMetricLogger::train(tracker.clone(), progress.clone(), interrupter.clone());
    let mut valid =
        TrackerMetricLogger::valid(tracker.clone(), progress.clone(), interrupter.clone());
    train._alive = Some(alive.clone());
    valid._alive = Some(alive);
    (train, valid, LoggerDrain(drained))
}

impl TrackerMetricLogger {
    pub fn train(tracker: TrackerHandle, progress: SharedProgress, interrupter: Interrupter) -> Self {
        Self::new(LoggedSplit::Train, tracker, progress, interrupter)
    }

    pub fn valid(tracker: TrackerHandle, progress: SharedProgress, interrupter: Interrupter) -> Self {
        Self::new(LoggedSplit::Valid, tracker, progress, interrupter)
    }

    fn new(
        split: LoggedSplit,
        tracker: TrackerHandle,
        progress: SharedProgress,
        interrupter: Interrupter,
    ) -> Self {
        Self {
            split,
            tracker,
            progress,
            interrupter,
            history: InMemoryMetricLogger::new(),
            accuracy_sum: 0.0,
            accuracy_count: 0,
            _alive: None,
        }
    }

    fn log_train_loss(&mut self, loss: f64) {
        let step = {
            let progress = self.progress.lock();
            if progress.failure.is_some() {
                return;
            }
            progress.steps
        };
        if !loss.is_finite() {
            self.progress
                .fail(TrainError::NonFiniteLoss { step }, &self.interrupter);
            return;
        }
        if let Err(err) = self.tracker.record("train_loss", loss, step) {
            self.progress.fail(err.into(), &self.interrupter);
            return;
        }
        let mut progress = self.progress.lock();
        progress.steps += 1;
        progress.last_train_loss = Some(loss);
    }

    fn accumulate_accuracy(&mut self, entry: &NumericEntry) {
        let (value, count) = match entry {
            NumericEntry::Value(value) => (*value, 1),
            NumericEntry::Aggregated { sum, count, .. } => (*sum, *count),
        };
        self.accuracy_sum += value * count as f64;
        self.accuracy_count += count;
    }

    fn finish_valid_epoch(&mut self, epoch: usize) {
        let (sum, count) = (self.accuracy_sum, self.accuracy_count);
        self.accuracy_sum = 0.0;
        self.accuracy_count = 0;

        let step = {
            let progress = self.progress.lock();
            if progress.failure.is_some() {
                return;
            }
            progress.steps
        };
        let val_acc = (count > 0).then(|| sum / count as f64 / 100.0);
        if val_acc.is_none() {
            warn!("Validation produced no batches");
        }
        let logged = val_acc
            .map(|acc| self.tracker.record("val_acc", acc, step))
            .transpose()
            .and_then(|_| self.tracker.record("epoch", epoch.saturating_sub(1) as f64, step));
        if let Err(err) = logged {
            self.progress.fail(err.into(), &self.interrupter);
            return;
        }
        let mut progress = self.progress.lock();
        progress.val_acc = val_acc.or(progress.val_acc);
        progress.epochs_completed = epoch;
    }
}

impl MetricLogger for TrackerMetricLogger {
    fn log(&mut self, item: &MetricEntry) {
        self.history.log(item);
        let Ok(entry) = NumericEntry::deserialize(&item.serialize) else {
            return;
        };
        match (self.split, item.name.as_str()) {
            (LoggedSplit::Train, LOSS_METRIC) => self.log_train_loss(entry.current()),
            (LoggedSplit::Valid, ACCURACY_METRIC) => self.accumulate_accuracy(&entry),
            _ => {}
        }
    }

    fn end_epoch(&mut self, epoch: usize) {
        self.history.end_epoch(epoch);
        if self.split == LoggedSplit::Valid {
            self.finish_valid_epoch(epoch);
        }
    }

    fn read_numeric(&mut self, name: &str, epoch: usize) -> Result<Vec<NumericEntry>, String> {
        self.history.read_numeric(name, epoch)
    }
}

/// Reports learner progress through `tracing` instead of the terminal UI.
#[derive(Debug, Default)]
pub(crate) struct TracingRenderer;

impl MetricsRendererTraining for TracingRenderer {
    fn update_train(&mut self, _state: MetricState) {}

    fn update_valid(&mut self, _state: MetricState) {}

    fn render_train(&mut self, item: TrainingProgress) {
        debug!(
            "train epoch {}/{} iteration {} ({}/{} clips)",
            item.epoch,
            item.epoch_total,
            item.iteration,
            item.progress.items_processed,
            item.progress.items_total
        );
    }

    fn render_valid(&mut self, item: TrainingProgress) {
        debug!(
            "valid epoch {}/{} iteration {} ({}/{} clips)",
            item.epoch,
            item.epoch_total,
            item.iteration,
            item.progress.items_processed,
            item.progress.items_total
        );
    }

    fn on_train_end(
        &mut self,
        _summary: Option<burn::train::LearnerSummary>,
    ) -> Result<(), Box<dyn core::error::Error>> {
        info!("Learner finished");
        Ok(())
    }
}

impl MetricsRendererEvaluation for TracingRenderer {
    fn update_test(&mut self, _name: EvaluationName, _state: MetricState) {}

    fn render_test(&mut self, item: EvaluationProgress) {
        debug!(
            "test iteration {} ({}/{} clips)",
            item.iteration, item.progress.items_processed, item.progress.items_total
        );
    }
}

impl MetricsRenderer for TracingRenderer {
    fn manual_close(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::{LocalRunTracker, TrackingError};
    use serde_json::Value;
    use tempfile::tempdir;

    fn entry(name: &str, value: f64, batch: usize) -> MetricEntry {
        MetricEntry::new(
            Arc::new(name.to_string()),
            format!("{value}"),
            format!("{value},{batch}"),
        )
    }

    fn local_handle(dir: &std::path::Path) -> TrackerHandle {
        TrackerHandle::new(Box::new(LocalRunTracker::create(dir, "p").unwrap()))
    }

    fn metric_lines(handle: &TrackerHandle) -> Vec<Value> {
        let path = handle.run_dir().unwrap().join("metrics.jsonl");
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[test]
    fn train_losses_become_global_steps() {
        let dir = tempdir().unwrap();
        let handle = local_handle(dir.path());
        let progress = SharedProgress::default();
        let mut logger =
            TrackerMetricLogger::train(handle.clone(), progress.clone(), Interrupter::new());

        logger.log(&entry(LOSS_METRIC, 2.5, 4));
        logger.log(&entry(ACCURACY_METRIC, 50.0, 4));
        logger.end_epoch(1);
        logger.log(&entry(LOSS_METRIC, 1.5, 2));

        let lines = metric_lines(&handle);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["name"], "train_loss");
        assert_eq!(lines[1]["step"], 1);
        assert_eq!(lines[1]["value"], 1.5);
        let progress = progress.into_inner();
        assert_eq!(progress.steps, 2);
        assert_eq!(progress.last_train_loss, Some(1.5));

        let history = logger.read_numeric(LOSS_METRIC, 1).unwrap();
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn valid_accuracy_is_weighted_by_batch_size() {
        let dir = tempdir().unwrap();
        let handle = local_handle(dir.path());
        let progress = SharedProgress::default();
        progress.lock().steps = 6;
        let mut logger =
            TrackerMetricLogger::valid(handle.clone(), progress.clone(), Interrupter::new());

        logger.log(&entry(ACCURACY_METRIC, 100.0, 3));
        logger.log(&entry(ACCURACY_METRIC, 0.0, 1));
        logger.log(&entry(LOSS_METRIC, 0.7, 4));
        logger.end_epoch(1);

        let lines = metric_lines(&handle);
        let names: Vec<&str> = lines.iter().filter_map(|line| line["name"].as_str()).collect();
        assert_eq!(names, vec!["val_acc", "epoch"]);
        assert_eq!(lines[0]["value"], 0.75);
        assert_eq!(lines[0]["step"], 6);
        assert_eq!(lines[1]["value"], 0.0);
        let progress = progress.into_inner();
        assert_eq!(progress.val_acc, Some(0.75));
        assert_eq!(progress.epochs_completed, 1);
    }

    #[test]
    fn empty_validation_epoch_logs_only_the_epoch() {
        let dir = tempdir().unwrap();
        let handle = local_handle(dir.path());
        let progress = SharedProgress::default();
        let mut logger =
            TrackerMetricLogger::valid(handle.clone(), progress.clone(), Interrupter::new());
        logger.end_epoch(1);

        let lines = metric_lines(&handle);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["name"], "epoch");
        assert_eq!(progress.into_inner().val_acc, None);
    }

    #[test]
    fn non_finite_loss_stops_the_learner() {
        let dir = tempdir().unwrap();
        let handle = local_handle(dir.path());
        let progress = SharedProgress::default();
        let interrupter = Interrupter::new();
        let mut logger =
            TrackerMetricLogger::train(handle.clone(), progress.clone(), interrupter.clone());

        logger.log(&entry(LOSS_METRIC, 1.0, 2));
        logger.log(&entry(LOSS_METRIC, f64::NAN, 2));
        logger.log(&entry(LOSS_METRIC, 1.0, 2));

        assert!(interrupter.should_stop());
        assert_eq!(metric_lines(&handle).len(), 1);
        let progress = progress.into_inner();
        assert!(matches!(progress.failure, Some(TrainError::NonFiniteLoss { step: 1 })));
        assert_eq!(progress.steps, 1);
    }

    #[test]
    fn drain_returns_once_loggers_are_dropped() {
        let dir = tempdir().unwrap();
        let handle = local_handle(dir.path());
        let progress = SharedProgress::default();
        let (mut train, mut valid, drain) =
            tracker_loggers(&handle, &progress, &Interrupter::new());

        let worker = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            train.log(&entry(LOSS_METRIC, 0.5, 2));
            valid.log(&entry(ACCURACY_METRIC, 50.0, 2));
            valid.end_epoch(1);
        });
        drain.wait(Duration::from_secs(10));

        let progress = progress.lock();
        assert_eq!(progress.steps, 1);
        assert_eq!(progress.val_acc, Some(0.5));
        drop(progress);
        worker.join().unwrap();
    }

    #[test]
    fn first_failure_is_kept() {
        let progress = SharedProgress::default();
        let interrupter = Interrupter::new();
        progress.fail(TrainError::NonFiniteLoss { step: 3 }, &interrupter);
        progress.fail(TrainError::Tracking(TrackingError::MissingEndpoint), &interrupter);
        assert!(matches!(
            progress.into_inner().failure,
            Some(TrainError::NonFiniteLoss { step: 3 })
        ));
    }
}
