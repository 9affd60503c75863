use std::path::Path;

use tempfile::TempDir;

/// Write a mono 16-bit clip of `len` samples of a class-dependent tone.
pub fn write_test_wav(path: &Path, sample_rate: u32, len: usize, target: u32) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("create wav parent dirs");
    }
    let freq = 200.0 + 300.0 * target as f32;
    let mut writer = hound::WavWriter::create(path, spec).expect("create wav writer");
    for i in 0..len {
        let t = i as f32 / sample_rate as f32;
        let value = (2.0 * std::f32::consts::PI * freq * t).sin() * 0.5;
        writer
            .write_sample((value * i16::MAX as f32) as i16)
            .expect("write wav sample");
    }
    writer.finalize().expect("finalize wav");
}

/// A miniature ESC-50 tree: `per_fold` clips in each of `folds` folds,
/// targets cycling through `n_classes`.
pub struct Esc50Fixture {
    pub dir: TempDir,
    pub rows: Vec<(String, u32, u32)>,
}

impl Esc50Fixture {
    pub fn new(folds: u32, per_fold: u32, n_classes: u32, sample_rate: u32, len: usize) -> Self {
        let dir = tempfile::tempdir().expect("create tempdir");
        let mut rows = Vec::new();
        let mut csv = String::from("filename,fold,target,category,esc10,src_file,take\n");
        for fold in 1..=folds {
            for idx in 0..per_fold {
                let target = idx % n_classes;
                let name = format!("{fold}-{idx}-A-{target}.wav");
                write_test_wav(&dir.path().join("audio").join(&name), sample_rate, len, target);
                csv.push_str(&format!("{name},{fold},{target},class_{target},False,{idx},A\n"));
                rows.push((name, fold, target));
            }
        }
        std::fs::create_dir_all(dir.path().join("meta")).expect("create meta dir");
        std::fs::write(dir.path().join("meta").join("esc50.csv"), csv).expect("write metadata");
        Self { dir, rows }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn remove_clip(&self, name: &str) {
        std::fs::remove_file(self.root().join("audio").join(name)).expect("remove clip");
    }

    /// Replace a clip with bytes that are not a WAV file.
    pub fn corrupt_clip(&self, name: &str) {
        std::fs::write(self.root().join("audio").join(name), b"not a wav").expect("corrupt clip");
    }
}
