//! Classification metrics for the test split.

use std::collections::BTreeMap;

use crate::dataset::MetadataRow;

/// Confusion matrix for a `K`-class classifier.
#[derive(Debug, Clone)]
pub struct ConfusionMatrix {
    pub n_classes: usize,
    /// Row-major `KxK` counts (`truth * K + predicted`).
    pub counts: Vec<u32>,
}

impl ConfusionMatrix {
    pub fn new(n_classes: usize) -> Self {
        Self {
            n_classes,
            counts: vec![0; n_classes * n_classes],
        }
    }

    /// Count one prediction; out-of-range classes are ignored.
    pub fn add(&mut self, truth: usize, predicted: usize) {
        if truth >= self.n_classes || predicted >= self.n_classes {
            return;
        }
        let idx = truth * self.n_classes + predicted;
        self.counts[idx] = self.counts[idx].saturating_add(1);
    }

    pub fn add_all(&mut self, truths: &[usize], predicted: &[usize]) {
        for (truth, predicted) in truths.iter().zip(predicted) {
            self.add(*truth, *predicted);
        }
    }

    pub fn get(&self, truth: usize, predicted: usize) -> u32 {
        self.counts[truth * self.n_classes + predicted]
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().map(|v| u64::from(*v)).sum()
    }
}

/// Precision/recall statistics for a single class.
#[derive(Debug, Clone, PartialEq)]
pub struct PerClassStats {
    /// `TP / (TP + FP)`.
    pub precision: f32,
    /// `TP / (TP + FN)`.
    pub recall: f32,
    pub support: u32,
}

pub fn precision_recall_by_class(cm: &ConfusionMatrix) -> Vec<PerClassStats> {
    let k = cm.n_classes;
    (0..k)
        .map(|class_idx| {
            let tp = cm.get(class_idx, class_idx) as f32;
            let support: u32 = (0..k).map(|j| cm.get(class_idx, j)).sum();
            let predicted: u32 = (0..k).map(|i| cm.get(i, class_idx)).sum();
            let fn_ = support as f32 - tp;
            let fp = predicted as f32 - tp;
            PerClassStats {
                precision: ratio(tp, tp + fp),
                recall: ratio(tp, tp + fn_),
                support,
            }
        })
        .collect()
}

/// Overall accuracy; 0 for an empty matrix.
pub fn accuracy(cm: &ConfusionMatrix) -> f32 {
    let correct: u64 = (0..cm.n_classes).map(|i| u64::from(cm.get(i, i))).sum();
    ratio(correct as f32, cm.total() as f32)
}

/// Class index to category name, taken from metadata rows that carry one.
pub fn class_names(rows: &[MetadataRow]) -> BTreeMap<usize, String> {
    rows.iter()
        .filter_map(|row| {
            row.category
                .as_ref()
                .map(|name| (row.target as usize, name.clone()))
        })
        .collect()
}

fn ratio(num: f32, den: f32) -> f32 {
    if den == 0.0 { 0.0 } else { num / den }
}
