/// Triangular HTK-scale filters stored as sparse `(bin, weight)` pairs.
pub(crate) struct MelFilterBank {
    filters: Vec<Vec<(usize, f32)>>,
}

impl MelFilterBank {
    pub(crate) fn new(sample_rate: u32, n_freqs: usize, n_mels: usize, f_min: f32, f_max: f32) -> Self {
        let nyquist = sample_rate.max(1) as f32 / 2.0;
        let bin_freqs = linspace(0.0, nyquist, n_freqs);
        let mel_min = hz_to_mel(f_min);
        let mel_max = hz_to_mel(f_max);
        let hz_points: Vec<f32> = linspace(mel_min, mel_max, n_mels + 2)
            .into_iter()
            .map(mel_to_hz)
            .collect();
        let filters = hz_points
            .windows(3)
            .map(|edges| build_tri_filter(&bin_freqs, edges[0], edges[1], edges[2]))
            .collect();
        Self { filters }
    }

    pub(crate) fn n_mels(&self) -> usize {
        self.filters.len()
    }

    /// Project one power frame onto the mel bands.
    pub(crate) fn apply_into(&self, power: &[f32], out: &mut [f32]) {
        for (filter, slot) in self.filters.iter().zip(out.iter_mut()) {
            let mut sum = 0.0_f64;
            for &(bin, weight) in filter {
                let p = power.get(bin).copied().unwrap_or(0.0).max(0.0);
                sum += f64::from(p) * f64::from(weight);
            }
            *slot = sum as f32;
        }
    }

    #[cfg(test)]
    fn weights(&self, mel: usize) -> &[(usize, f32)] {
        &self.filters[mel]
    }
}

fn build_tri_filter(bin_freqs: &[f32], left: f32, center: f32, right: f32) -> Vec<(usize, f32)> {
    let rise = center - left;
    let fall = right - center;
    bin_freqs
        .iter()
        .enumerate()
        .filter_map(|(bin, &freq)| {
            let up = if rise > 0.0 { (freq - left) / rise } else { 0.0 };
            let down = if fall > 0.0 { (right - freq) / fall } else { 0.0 };
            let weight = up.min(down);
            (weight > 0.0).then_some((bin, weight))
        })
        .collect()
}

fn linspace(start: f32, end: f32, count: usize) -> Vec<f32> {
    match count {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (end - start) / (count - 1) as f32;
            (0..count).map(|i| start + step * i as f32).collect()
        }
    }
}

pub(crate) fn hz_to_mel(hz: f32) -> f32 {
    2595.0_f32 * (1.0 + hz / 700.0).log10()
}

pub(crate) fn mel_to_hz(mel: f32) -> f32 {
    700.0_f32 * (10.0_f32.powf(mel / 2595.0) - 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mel_scale_round_trips_known_point() {
        assert!((hz_to_mel(1_000.0) - 999.99).abs() < 0.1);
        assert!((mel_to_hz(hz_to_mel(3_000.0)) - 3_000.0).abs() < 0.5);
    }

    #[test]
    fn filters_peak_near_their_center_and_stay_in_range() {
        let bank = MelFilterBank::new(16_000, 257, 40, 0.0, 8_000.0);
        assert_eq!(bank.n_mels(), 40);
        for mel in 0..40 {
            for &(bin, weight) in bank.weights(mel) {
                assert!(bin < 257);
                assert!(weight > 0.0 && weight <= 1.0 + 1e-6);
            }
        }
        let last = bank.weights(39);
        assert!(last.iter().all(|&(bin, _)| bin > 128));
    }

    #[test]
    fn dense_bank_on_short_fft_keeps_its_size() {
        let bank = MelFilterBank::new(8_000, 201, 128, 0.0, 4_000.0);
        assert_eq!(bank.n_mels(), 128);
        let mut out = vec![-1.0_f32; 128];
        bank.apply_into(&[1.0; 201], &mut out);
        assert!(out.iter().all(|v| v.is_finite() && *v >= 0.0));
        assert!(out[127] > out[0]);
    }

    #[test]
    fn degenerate_range_yields_empty_filters() {
        let bank = MelFilterBank::new(8_000, 201, 4, 1_000.0, 1_000.0);
        assert_eq!(bank.n_mels(), 4);
        assert!((0..4).all(|mel| bank.weights(mel).is_empty()));
    }
}
