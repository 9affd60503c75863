//! Decibel-scaled mel spectrograms.
//!
//! Frames are centred with reflect padding and a periodic Hann window, power
//! spectra are projected onto an HTK mel filterbank, and the result is
//! converted to dB with an optional dynamic-range floor.

mod db;
mod mel;
mod stft;

use serde::{Deserialize, Serialize};

use db::power_to_db_in_place;
use mel::MelFilterBank;
use stft::PowerStft;

pub const DEFAULT_N_FFT: usize = 400;
pub const DEFAULT_N_MELS: usize = 128;
pub const DEFAULT_TOP_DB: f32 = 80.0;

/// Transform parameters. Unset optional fields derive from `n_fft` and the
/// sample rate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MelSettings {
    pub n_fft: usize,
    pub win_length: Option<usize>,
    pub hop_length: Option<usize>,
    pub n_mels: usize,
    pub f_min: f32,
    pub f_max: Option<f32>,
    pub top_db: Option<f32>,
}

impl Default for MelSettings {
    fn default() -> Self {
        Self {
            n_fft: DEFAULT_N_FFT,
            win_length: None,
            hop_length: None,
            n_mels: DEFAULT_N_MELS,
            f_min: 0.0,
            f_max: None,
            top_db: Some(DEFAULT_TOP_DB),
        }
    }
}

impl MelSettings {
    pub fn hop(&self) -> usize {
        self.hop_length.unwrap_or(self.n_fft / 2).max(1)
    }
}

/// Row-major `(1, n_mels, frames)` dB values.
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrogram {
    pub n_mels: usize,
    pub frames: usize,
    pub values: Vec<f32>,
}

impl Spectrogram {
    pub fn shape(&self) -> [usize; 3] {
        [1, self.n_mels, self.frames]
    }

    pub fn get(&self, mel: usize, frame: usize) -> Option<f32> {
        if mel >= self.n_mels || frame >= self.frames {
            return None;
        }
        self.values.get(mel * self.frames + frame).copied()
    }

    pub fn min_value(&self) -> f32 {
        self.values.iter().copied().fold(f32::INFINITY, f32::min)
    }

    /// Copy into a buffer `target_frames` wide, filling the tail of each row
    /// with `fill`. Extra frames are cropped.
    pub fn padded_values(&self, target_frames: usize, fill: f32) -> Vec<f32> {
        if target_frames == self.frames {
            return self.values.clone();
        }
        let keep = self.frames.min(target_frames);
        let mut out = vec![fill; self.n_mels * target_frames];
        for (src, dst) in self
            .values
            .chunks(self.frames.max(1))
            .zip(out.chunks_mut(target_frames.max(1)))
        {
            dst[..keep].copy_from_slice(&src[..keep]);
        }
        out
    }
}

/// Reusable waveform-to-spectrogram transform for one sample rate.
pub struct MelSpectrogram {
    settings: MelSettings,
    sample_rate: u32,
    stft: PowerStft,
    filters: MelFilterBank,
}

impl MelSpectrogram {
    pub fn new(sample_rate: u32, settings: MelSettings) -> Self {
        let n_fft = settings.n_fft.max(1);
        let win_length = settings.win_length.unwrap_or(n_fft);
        let stft = PowerStft::new(n_fft, win_length, settings.hop());
        let f_max = settings
            .f_max
            .unwrap_or(sample_rate as f32 / 2.0)
            .max(settings.f_min);
        let filters = MelFilterBank::new(
            sample_rate,
            stft.n_freqs(),
            settings.n_mels,
            settings.f_min,
            f_max,
        );
        Self {
            settings,
            sample_rate,
            stft,
            filters,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn n_mels(&self) -> usize {
        self.filters.n_mels()
    }

    /// Frame count produced for `len` samples at this transform's rate.
    pub fn frames_for(&self, len: usize) -> usize {
        self.stft.frame_count(len)
    }

    pub fn compute(&self, samples: &[f32]) -> Spectrogram {
        let n_freqs = self.stft.n_freqs();
        let n_mels = self.n_mels();
        let frames = self.stft.frame_count(samples.len());
        let power = self.stft.power_frames(samples);

        let mut values = vec![0.0_f32; n_mels * frames];
        let mut mel_frame = vec![0.0_f32; n_mels];
        for (frame_idx, power_frame) in power.chunks(n_freqs).enumerate() {
            self.filters.apply_into(power_frame, &mut mel_frame);
            for (mel_idx, &value) in mel_frame.iter().enumerate() {
                values[mel_idx * frames + frame_idx] = value;
            }
        }
        power_to_db_in_place(&mut values, self.settings.top_db);
        Spectrogram {
            n_mels,
            frames,
            values,
        }
    }
}
