mod support;

use std::path::Path;

use audionet::config::TrainConfig;
use audionet::tracking::{LocalRunTracker, NullTracker, TrackerHandle, TrackerKind};
use audionet::training::{self, BACKEND_ENV, BackendKind, CpuBackend, TrainError, resolve_backend};
use burn::backend::Autodiff;
use serde_json::Value;
use support::env::EnvGuard;
use support::esc50::Esc50Fixture;

type TestAutodiffBackend = Autodiff<CpuBackend>;

fn tiny_config(root: &Path, runs: &Path) -> TrainConfig {
    let mut config = TrainConfig::default();
    config.seed = 3;
    config.data.path = root.to_path_buf();
    config.data.batch_size = 2;
    config.data.mel.n_mels = 32;
    config.model.n_classes = 3;
    config.model.base_filters = 2;
    config.trainer.max_epochs = 1;
    config.trainer.num_workers = 1;
    config.tracker.dir = runs.to_path_buf();
    config.validate().unwrap();
    config
}

fn metric_lines(run_dir: &Path) -> Vec<Value> {
    std::fs::read_to_string(run_dir.join("metrics.jsonl"))
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

#[test]
fn one_epoch_logs_metrics_and_saves_weights() {
    let fixture = Esc50Fixture::new(5, 4, 3, 8_000, 1_600);
    let runs = tempfile::tempdir().unwrap();
    let config = tiny_config(fixture.root(), runs.path());
    let tracker = LocalRunTracker::create(runs.path(), &config.tracker.project).unwrap();
    let tracker = TrackerHandle::new(Box::new(tracker));

    let summary =
        training::train::<TestAutodiffBackend>(&config, &Default::default(), &tracker).unwrap();
    tracker.finish().unwrap();

    assert_eq!(summary.epochs, 1);
    assert_eq!(summary.steps, 6);
    assert!(summary.last_train_loss.is_some_and(|loss| loss.is_finite() && loss >= 0.0));
    assert!(summary.val_acc.is_some_and(|acc| (0.0..=1.0).contains(&acc)));
    assert!(summary.test_acc.is_some_and(|acc| (0.0..=1.0).contains(&acc)));

    let run_dir = runs.path().join("reprodl").join(&summary.run_id);
    let lines = metric_lines(&run_dir);
    let count = |name: &str| lines.iter().filter(|line| line["name"] == name).count();
    assert_eq!(count("train_loss"), 6);
    assert_eq!(count("val_acc"), 1);
    assert_eq!(count("epoch"), 1);
    assert_eq!(count("test_acc"), 1);
    let steps: Vec<u64> = lines
        .iter()
        .filter(|line| line["name"] == "train_loss")
        .filter_map(|line| line["step"].as_u64())
        .collect();
    assert_eq!(steps, (0..6).collect::<Vec<_>>());

    let model_path = summary.model_path.unwrap();
    assert!(model_path.starts_with(&run_dir));
    assert!(model_path.with_extension("mpk").is_file());
}

#[test]
fn batch_limits_and_disabled_outputs_are_respected() {
    let fixture = Esc50Fixture::new(5, 4, 3, 8_000, 1_600);
    let runs = tempfile::tempdir().unwrap();
    let mut config = tiny_config(fixture.root(), runs.path());
    config.trainer.max_epochs = 2;
    config.trainer.limit_train_batches = Some(2);
    config.trainer.limit_val_batches = Some(1);
    config.trainer.run_test = false;
    config.trainer.save_model = false;
    config.tracker.kind = TrackerKind::None;
    let tracker = TrackerHandle::new(Box::new(NullTracker::new()));

    let summary =
        training::train::<TestAutodiffBackend>(&config, &Default::default(), &tracker).unwrap();
    assert_eq!(summary.steps, 4);
    assert_eq!(summary.epochs, 2);
    assert_eq!(summary.test_acc, None);
    assert_eq!(summary.model_path, None);
}

fn null_tracker() -> TrackerHandle {
    TrackerHandle::new(Box::new(NullTracker::new()))
}

#[test]
fn missing_clip_aborts_before_training() {
    let fixture = Esc50Fixture::new(5, 2, 2, 8_000, 800);
    fixture.remove_clip(&fixture.rows[0].0);
    let runs = tempfile::tempdir().unwrap();
    let mut config = tiny_config(fixture.root(), runs.path());
    config.model.n_classes = 2;
    config.data.batch_size = 4;

    let err = training::train::<TestAutodiffBackend>(&config, &Default::default(), &null_tracker())
        .unwrap_err();
    assert!(matches!(err, TrainError::Clip(_)));
}

#[test]
fn undecodable_clip_aborts_training() {
    let fixture = Esc50Fixture::new(5, 2, 2, 8_000, 800);
    fixture.corrupt_clip(&fixture.rows[1].0);
    let runs = tempfile::tempdir().unwrap();
    let mut config = tiny_config(fixture.root(), runs.path());
    config.model.n_classes = 2;
    config.trainer.save_model = false;

    let err = training::train::<TestAutodiffBackend>(&config, &Default::default(), &null_tracker())
        .unwrap_err();
    assert!(matches!(err, TrainError::Clip(_)));
}

#[test]
fn targets_beyond_the_class_count_are_rejected() {
    let fixture = Esc50Fixture::new(5, 3, 3, 8_000, 800);
    let runs = tempfile::tempdir().unwrap();
    let mut config = tiny_config(fixture.root(), runs.path());
    config.model.n_classes = 2;

    let err = training::train::<TestAutodiffBackend>(&config, &Default::default(), &null_tracker())
        .unwrap_err();
    assert!(matches!(
        err,
        TrainError::TargetOutOfRange {
            split: "train",
            target: 2,
            n_classes: 2,
            ..
        }
    ));
}

#[test]
fn empty_test_split_logs_no_test_accuracy() {
    let fixture = Esc50Fixture::new(4, 4, 3, 8_000, 1_600);
    let runs = tempfile::tempdir().unwrap();
    let config = tiny_config(fixture.root(), runs.path());
    let tracker = LocalRunTracker::create(runs.path(), &config.tracker.project).unwrap();
    let tracker = TrackerHandle::new(Box::new(tracker));

    let summary =
        training::train::<TestAutodiffBackend>(&config, &Default::default(), &tracker).unwrap();
    assert_eq!(summary.test_acc, None);

    let run_dir = runs.path().join("reprodl").join(&summary.run_id);
    let lines = metric_lines(&run_dir);
    assert!(lines.iter().all(|line| line["name"] != "test_acc"));
    assert!(lines.iter().any(|line| line["name"] == "val_acc"));
}

#[test]
fn backend_env_overrides_configured_backend() {
    let _guard = EnvGuard::set(BACKEND_ENV, "cpu");
    assert_eq!(resolve_backend("wgpu"), BackendKind::Cpu);
}
