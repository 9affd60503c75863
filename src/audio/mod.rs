//! Clip decoding and sample-rate conversion.

mod decode;
mod resample;

use std::path::PathBuf;

use thiserror::Error;

pub use decode::{DecodedClip, decode_wav};
pub use resample::{LOWPASS_FILTER_WIDTH, ROLLOFF, resample_sinc};

/// Errors raised while reading an audio clip from disk.
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("Failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        source: hound::Error,
    },
    #[error("Failed to decode samples from {path}: {source}")]
    Decode {
        path: PathBuf,
        source: hound::Error,
    },
    #[error("{path} declares zero channels or a zero sample rate")]
    InvalidFormat { path: PathBuf },
}
