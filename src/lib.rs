//! ESC-50 environmental sound classification with a small CNN on log-mel
//! spectrograms.
#![recursion_limit = "256"]

/// Application directories for logs.
pub mod app_dirs;
/// WAV decoding and sinc resampling.
pub mod audio;
/// Run settings, overrides and sweep proposals.
pub mod config;
/// ESC-50 metadata, fold selection and batching.
pub mod dataset;
/// File and console logging.
pub mod logging;
/// The AudioNet classifier and its optimizer.
pub mod model;
/// STFT, mel filter bank and decibel scaling.
pub mod spectrogram;
/// Experiment trackers.
pub mod tracking;
/// Training, validation and test driver.
pub mod training;
