use std::f32::consts::PI;
use std::sync::Arc;

use rustfft::num_complex::Complex32;
use rustfft::{Fft, FftPlanner};

/// Centered short-time power spectra (`|X|^2`, bins `0..=n_fft/2`).
pub(crate) struct PowerStft {
    n_fft: usize,
    hop: usize,
    window: Vec<f32>,
    fft: Arc<dyn Fft<f32>>,
}

impl PowerStft {
    pub(crate) fn new(n_fft: usize, win_length: usize, hop: usize) -> Self {
        let n_fft = n_fft.max(1);
        Self {
            n_fft,
            hop: hop.max(1),
            window: padded_hann_window(win_length.clamp(1, n_fft), n_fft),
            fft: FftPlanner::<f32>::new().plan_fft_forward(n_fft),
        }
    }

    pub(crate) fn n_freqs(&self) -> usize {
        self.n_fft / 2 + 1
    }

    /// Number of frames produced for a waveform of `len` samples.
    pub(crate) fn frame_count(&self, len: usize) -> usize {
        if len == 0 {
            return 1;
        }
        let padded = len + 2 * (self.n_fft / 2);
        1 + padded.saturating_sub(self.n_fft) / self.hop
    }

    /// Frame-major power spectra: `frame_count(len) * n_freqs()` values.
    pub(crate) fn power_frames(&self, samples: &[f32]) -> Vec<f32> {
        let n_freqs = self.n_freqs();
        let frames = self.frame_count(samples.len());
        let mut out = vec![0.0_f32; frames * n_freqs];
        if samples.is_empty() {
            return out;
        }
        let mut buffer = vec![Complex32::default(); self.n_fft];
        let mut scratch = vec![Complex32::default(); self.fft.get_inplace_scratch_len()];
        let pad = (self.n_fft / 2) as isize;
        for (frame_idx, frame_out) in out.chunks_mut(n_freqs).enumerate() {
            let start = (frame_idx * self.hop) as isize - pad;
            for (i, cell) in buffer.iter_mut().enumerate() {
                let src = samples[reflect_index(start + i as isize, samples.len())];
                *cell = Complex32::new(src * self.window[i], 0.0);
            }
            self.fft.process_with_scratch(&mut buffer, &mut scratch);
            for (dst, bin) in frame_out.iter_mut().zip(buffer.iter()) {
                *dst = bin.norm_sqr();
            }
        }
        out
    }
}

/// Periodic Hann window of `win_length`, zero-padded and centred in `n_fft`.
fn padded_hann_window(win_length: usize, n_fft: usize) -> Vec<f32> {
    let mut window = vec![0.0_f32; n_fft];
    let offset = (n_fft - win_length) / 2;
    for n in 0..win_length {
        window[offset + n] = 0.5 - 0.5 * (2.0 * PI * n as f32 / win_length as f32).cos();
    }
    window
}

/// Mirror an out-of-range index back into `0..len` without repeating edges.
fn reflect_index(index: isize, len: usize) -> usize {
    if len == 1 {
        return 0;
    }
    let period = 2 * (len as isize - 1);
    let mut idx = index.rem_euclid(period);
    if idx >= len as isize {
        idx = period - idx;
    }
    idx as usize
}
