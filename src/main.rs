//! Train AudioNet on ESC-50 folds and report to the experiment tracker.

use std::path::PathBuf;

use audionet::config::{DEFAULT_CONFIG_PATH, SweepProposal, TrainConfig};
use audionet::logging;
use audionet::tracking::{TrackerHandle, open_tracker};
use audionet::training::{self, BackendKind, CpuBackend, WgpuBackend, resolve_backend};
use burn::backend::Autodiff;
use tracing::info;

fn main() {
    if let Err(err) = run() {
        eprintln!("{err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let options = match parse_args(std::env::args().skip(1).collect())? {
        Command::Help => {
            println!("{}", help_text());
            return Ok(());
        }
        Command::Train(options) => options,
    };
    if let Err(err) = logging::init() {
        logging::init_stdout_only();
        eprintln!("File logging disabled: {err}");
    }

    let mut config =
        TrainConfig::load(&options.config_path, &options.overrides).map_err(|err| err.to_string())?;
    if let Some(proposal) =
        SweepProposal::discover(options.sweep_path.as_deref()).map_err(|err| err.to_string())?
    {
        info!("Applying sweep proposal {proposal:?}");
        proposal.apply(&mut config).map_err(|err| err.to_string())?;
    }
    let rendered = config.to_toml_string().map_err(|err| err.to_string())?;
    if options.print_config {
        println!("{rendered}");
        return Ok(());
    }
    info!("Effective configuration:\n{rendered}");

    let tracker = TrackerHandle::new(open_tracker(&config.tracker).map_err(|err| err.to_string())?);
    let tracked = serde_json::to_value(&config).map_err(|err| err.to_string())?;
    tracker.log_config(&tracked).map_err(|err| err.to_string())?;
    info!("Hyperparameters: {}", config.hyperparameters());

    let backend = resolve_backend(&config.trainer.backend);
    info!("Training on the {} backend", backend.name());
    let summary = dispatch(backend, &config, &tracker).map_err(|err| err.to_string())?;
    tracker.finish().map_err(|err| err.to_string())?;

    println!("run {}: {} steps over {} epochs", summary.run_id, summary.steps, summary.epochs);
    if let Some(acc) = summary.val_acc {
        println!("val_acc  {acc:.4}");
    }
    if let Some(acc) = summary.test_acc {
        println!("test_acc {acc:.4}");
    }
    if let Some(path) = &summary.model_path {
        println!("model    {}", path.display());
    }
    Ok(())
}

fn dispatch(
    backend: BackendKind,
    config: &TrainConfig,
    tracker: &TrackerHandle,
) -> Result<training::TrainingSummary, training::TrainError> {
    match backend {
        BackendKind::Wgpu => {
            let device = Default::default();
            training::init_wgpu(&device);
            training::train::<Autodiff<WgpuBackend>>(config, &device, tracker)
        }
        BackendKind::Cpu => {
            training::train::<Autodiff<CpuBackend>>(config, &Default::default(), tracker)
        }
        #[cfg(feature = "cuda")]
        BackendKind::Cuda => {
            training::train::<Autodiff<training::CudaBackend>>(config, &Default::default(), tracker)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Command {
    Help,
    Train(CliOptions),
}

#[derive(Debug, Clone, PartialEq)]
struct CliOptions {
    config_path: PathBuf,
    sweep_path: Option<PathBuf>,
    overrides: Vec<String>,
    print_config: bool,
}

fn parse_args(args: Vec<String>) -> Result<Command, String> {
    let mut config_path = PathBuf::from(DEFAULT_CONFIG_PATH);
    let mut sweep_path = None;
    let mut overrides = Vec::new();
    let mut print_config = false;

    let mut idx = 0usize;
    while idx < args.len() {
        match args[idx].as_str() {
            "-h" | "--help" => return Ok(Command::Help),
            "--config" => {
                idx += 1;
                let value = args.get(idx).ok_or_else(|| "--config requires a value".to_string())?;
                config_path = PathBuf::from(value);
            }
            "--sweep" => {
                idx += 1;
                let value = args.get(idx).ok_or_else(|| "--sweep requires a value".to_string())?;
                sweep_path = Some(PathBuf::from(value));
            }
            "--print-config" => print_config = true,
            value if value.contains('=') && !value.starts_with('-') => {
                overrides.push(value.to_string());
            }
            unknown => {
                return Err(format!("Unknown argument: {unknown}\n\n{}", help_text()));
            }
        }
        idx += 1;
    }

    Ok(Command::Train(CliOptions {
        config_path,
        sweep_path,
        overrides,
        print_config,
    }))
}

fn help_text() -> String {
    [
        "audionet",
        "",
        "Train the AudioNet classifier on ESC-50 folds.",
        "",
        "Usage:",
        "  audionet [--config <file>] [--sweep <file>] [key.path=value ...] [--print-config]",
        "",
        "Options:",
        "  --config <file>   Settings file (default: configs/default.toml).",
        "  --sweep <file>    JSON sweep proposal (or AUDIONET_SWEEP_CONFIG).",
        "  --print-config    Print the effective settings and exit.",
        "  key.path=value    Override one setting, e.g. data.batch_size=16.",
        "",
        "Environment:",
        "  AUDIONET_BACKEND        wgpu | cpu | cuda, overrides trainer.backend.",
        "  AUDIONET_TRACKER_TOKEN  Bearer token for the HTTP tracker.",
        "  AUDIONET_HOME           Root for log files.",
    ]
    .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    fn train_options(values: &[&str]) -> CliOptions {
        match parse_args(args(values)).unwrap() {
            Command::Train(options) => options,
            Command::Help => panic!("expected training options"),
        }
    }

    #[test]
    fn parses_config_sweep_and_overrides() {
        let options = train_options(&[
            "--config",
            "my.toml",
            "data.batch_size=16",
            "--sweep",
            "sweep.json",
            "model.optimizer.lr=1e-3",
        ]);
        assert_eq!(options.config_path, PathBuf::from("my.toml"));
        assert_eq!(options.sweep_path, Some(PathBuf::from("sweep.json")));
        assert_eq!(options.overrides, args(&["data.batch_size=16", "model.optimizer.lr=1e-3"]));
        assert!(!options.print_config);
    }

    #[test]
    fn defaults_to_bundled_config() {
        let options = train_options(&[]);
        assert_eq!(options.config_path, PathBuf::from(DEFAULT_CONFIG_PATH));
        assert!(options.overrides.is_empty());
    }

    #[test]
    fn rejects_unknown_flags_and_missing_values() {
        assert!(parse_args(args(&["--epochs", "3"])).is_err());
        assert!(parse_args(args(&["--config"])).is_err());
        assert!(parse_args(args(&["--bogus"])).unwrap_err().contains("Usage"));
    }

    #[test]
    fn help_is_a_command_not_an_error() {
        assert_eq!(parse_args(args(&["--help"])), Ok(Command::Help));
        assert_eq!(parse_args(args(&["data.batch_size=4", "-h"])), Ok(Command::Help));
        assert!(help_text().contains("Usage"));
    }
}
