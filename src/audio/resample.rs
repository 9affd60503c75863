use std::f64::consts::PI;

/// Zero crossings of the sinc kernel kept on each side of the output sample.
pub const LOWPASS_FILTER_WIDTH: f64 = 6.0;
/// Fraction of the lower Nyquist frequency kept by the anti-aliasing filter.
pub const ROLLOFF: f64 = 0.99;

/// Band-limited resampling with a Hann-windowed sinc kernel.
///
/// Output length is `ceil(len * to_rate / from_rate)`. Samples outside the
/// input are treated as silence.
pub fn resample_sinc(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    let from_rate = from_rate.max(1);
    let to_rate = to_rate.max(1);
    if samples.is_empty() || from_rate == to_rate {
        return samples.to_vec();
    }
    let divisor = gcd(from_rate, to_rate);
    let orig = u64::from(from_rate / divisor);
    let new = u64::from(to_rate / divisor);
    let out_len = (samples.len() as u64 * new).div_ceil(orig) as usize;

    let cutoff = orig.min(new) as f64 * ROLLOFF;
    let half_width = (LOWPASS_FILTER_WIDTH * orig as f64 / cutoff).ceil() as i64;
    let gain = cutoff / orig as f64;
    let last_index = samples.len() as i64 - 1;

    let mut out = Vec::with_capacity(out_len);
    for j in 0..out_len {
        let center = j as f64 * orig as f64 / new as f64;
        let first = (center.floor() as i64 - half_width).max(0);
        let last = (center.ceil() as i64 + half_width).min(last_index);
        let mut acc = 0.0_f64;
        for i in first..=last {
            let t = (i as f64 - center) / orig as f64 * cutoff;
            acc += f64::from(samples[i as usize]) * windowed_sinc(t) * gain;
        }
        out.push(acc as f32);
    }
    out
}

fn windowed_sinc(t: f64) -> f64 {
    let t = t.clamp(-LOWPASS_FILTER_WIDTH, LOWPASS_FILTER_WIDTH);
    let window = (t * PI / LOWPASS_FILTER_WIDTH / 2.0).cos().powi(2);
    let x = t * PI;
    let sinc = if x == 0.0 { 1.0 } else { x.sin() / x };
    sinc * window
}

fn gcd(mut a: u32, mut b: u32) -> u32 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a.max(1)
}
