use std::path::Path;

use hound::{SampleFormat, WavReader};

use super::AudioError;

/// Mono samples in `[-1, 1]` together with the rate they were recorded at.
#[derive(Debug, Clone)]
pub struct DecodedClip {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl DecodedClip {
    pub fn duration_seconds(&self) -> f32 {
        self.samples.len() as f32 / self.sample_rate.max(1) as f32
    }
}

/// Decode a WAV file and average all channels down to mono.
pub fn decode_wav(path: &Path) -> Result<DecodedClip, AudioError> {
    let reader = WavReader::open(path).map_err(|source| AudioError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let spec = reader.spec();
    if spec.channels == 0 || spec.sample_rate == 0 {
        return Err(AudioError::InvalidFormat {
            path: path.to_path_buf(),
        });
    }
    let interleaved = read_interleaved(reader).map_err(|source| AudioError::Decode {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(DecodedClip {
        samples: downmix_to_mono(&interleaved, spec.channels as usize),
        sample_rate: spec.sample_rate,
    })
}

fn read_interleaved<R: std::io::Read>(reader: WavReader<R>) -> Result<Vec<f32>, hound::Error> {
    let spec = reader.spec();
    match spec.sample_format {
        SampleFormat::Float => reader
            .into_samples::<f32>()
            .map(|sample| sample.map(sanitize))
            .collect(),
        SampleFormat::Int => {
            let scale = int_scale(spec.bits_per_sample);
            reader
                .into_samples::<i32>()
                .map(|sample| sample.map(|value| sanitize(value as f32 / scale)))
                .collect()
        }
    }
}

fn int_scale(bits_per_sample: u16) -> f32 {
    let bits = bits_per_sample.clamp(1, 32) as i32;
    2.0_f32.powi(bits - 1)
}

fn downmix_to_mono(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

fn sanitize(sample: f32) -> f32 {
    if sample.is_finite() { sample } else { 0.0 }
}
