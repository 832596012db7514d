//! Evaluation records and learning curves.
//!
//! An [`Evaluation`] is a flat metric map tagged with the pool sizes and the
//! iteration number at which it was measured. A [`LearningCurve`] is the
//! ordered history of those records for one run.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

/// Fraction of test examples classified correctly
pub const ACCURACY: &str = "accuracy";
/// `1 - accuracy`
pub const ERROR_RATE: &str = "error_rate";
/// Unweighted mean of per-class F1
pub const MACRO_F1: &str = "macro_f1";
/// Fraction of misclassified example-label pairs
pub const HAMMING_LOSS: &str = "hamming_loss";
/// Fraction of examples whose whole label set is predicted exactly
pub const SUBSET_ACCURACY: &str = "subset_accuracy";
/// Mean per-example F1 between predicted and true label sets
pub const EXAMPLE_F1: &str = "example_f1";

/// Wall time of the training phase
pub const TRAINING_TIME: &str = "training_time_ms";
/// Wall time of the score-and-select phase
pub const SELECTION_TIME: &str = "selection_time_ms";
/// Wall time of the evaluate-on-test phase
pub const TEST_TIME: &str = "test_time_ms";
/// Training plus selection time of one iteration
pub const ITERATION_TIME: &str = "iteration_time_ms";
/// Running sum of iteration time
pub const ACCUMULATED_ITERATION_TIME: &str = "accumulated_iteration_time_ms";

/// Metric names that measure time rather than model quality
pub const TIMING_METRICS: [&str; 5] = [
    TRAINING_TIME,
    SELECTION_TIME,
    TEST_TIME,
    ITERATION_TIME,
    ACCUMULATED_ITERATION_TIME,
];

/// Whether larger values of `metric` mean a better model
#[must_use]
pub fn higher_is_better(metric: &str) -> bool {
    !(metric == ERROR_RATE || metric == HAMMING_LOSS || TIMING_METRICS.contains(&metric))
}

/// Errors raised while persisting learning curves
#[derive(Error, Debug)]
pub enum CurveError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Metric values measured at one point of a run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    /// Iteration that produced this record (0 for the passive baseline)
    pub iteration: usize,
    /// Labeled pool size at measurement time
    pub labeled_size: usize,
    /// Unlabeled pool size at measurement time
    pub unlabeled_size: usize,
    /// Metric name to value
    pub metrics: BTreeMap<String, f64>,
}

impl Evaluation {
    /// Create a record with no metrics
    #[must_use]
    pub const fn new(iteration: usize, labeled_size: usize, unlabeled_size: usize) -> Self {
        Self {
            iteration,
            labeled_size,
            unlabeled_size,
            metrics: BTreeMap::new(),
        }
    }

    /// Builder-style metric insertion
    #[must_use]
    pub fn with_metric(mut self, name: &str, value: f64) -> Self {
        self.metrics.insert(name.to_string(), value);
        self
    }

    /// Set a metric value
    pub fn set_metric(&mut self, name: &str, value: f64) {
        self.metrics.insert(name.to_string(), value);
    }

    /// Value of a metric, if recorded
    #[must_use]
    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied()
    }

    /// Add another record's metrics into this one, name by name.
    ///
    /// Non-finite values are skipped; callers that average must count the
    /// finite values per metric (see [`Evaluation::divide_each`]).
    pub fn accumulate(&mut self, other: &Self) {
        for (name, value) in &other.metrics {
            if value.is_finite() {
                *self.metrics.entry(name.clone()).or_insert(0.0) += value;
            }
        }
        self.labeled_size += other.labeled_size;
        self.unlabeled_size += other.unlabeled_size;
    }

    /// Divide every metric and pool size by `count`
    #[allow(clippy::cast_precision_loss)]
    pub fn divide(&mut self, count: usize) {
        if count == 0 {
            return;
        }
        for value in self.metrics.values_mut() {
            *value /= count as f64;
        }
        self.labeled_size /= count;
        self.unlabeled_size /= count;
    }

    /// Divide each metric by its own count and the pool sizes by `records`.
    ///
    /// A metric with no count is dropped.
    #[allow(clippy::cast_precision_loss)]
    pub fn divide_each(&mut self, counts: &BTreeMap<String, usize>, records: usize) {
        self.metrics.retain(|name, value| match counts.get(name) {
            Some(&count) if count > 0 => {
                *value /= count as f64;
                true
            }
            _ => false,
        });
        if records > 0 {
            self.labeled_size /= records;
            self.unlabeled_size /= records;
        }
    }

    /// Same record without timing metrics
    #[must_use]
    pub fn without_timing(&self) -> Self {
        let mut stripped = self.clone();
        stripped
            .metrics
            .retain(|name, _| !TIMING_METRICS.contains(&name.as_str()));
        stripped
    }
}

/// Single-label metrics from predicted and true classes
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn single_label_metrics(
    predicted: &[usize],
    actual: &[usize],
    num_classes: usize,
) -> BTreeMap<String, f64> {
    let mut metrics = BTreeMap::new();
    let n = predicted.len().min(actual.len());
    if n == 0 {
        return metrics;
    }

    let correct = predicted
        .iter()
        .zip(actual)
        .filter(|(p, a)| p == a)
        .count();
    let accuracy = correct as f64 / n as f64;

    let mut f1_sum = 0.0;
    let mut present = 0;
    for class in 0..num_classes {
        let tp = predicted
            .iter()
            .zip(actual)
            .filter(|(p, a)| **p == class && **a == class)
            .count();
        let fp = predicted
            .iter()
            .zip(actual)
            .filter(|(p, a)| **p == class && **a != class)
            .count();
        let fn_ = predicted
            .iter()
            .zip(actual)
            .filter(|(p, a)| **p != class && **a == class)
            .count();
        if tp + fp + fn_ == 0 {
            continue;
        }
        present += 1;
        f1_sum += (2 * tp) as f64 / (2 * tp + fp + fn_) as f64;
    }
    let macro_f1 = if present == 0 {
        0.0
    } else {
        f1_sum / f64::from(present)
    };

    metrics.insert(ACCURACY.to_string(), accuracy);
    metrics.insert(ERROR_RATE.to_string(), 1.0 - accuracy);
    metrics.insert(MACRO_F1.to_string(), macro_f1);
    metrics
}

/// Multi-label metrics from predicted and true relevance flags
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn multi_label_metrics(predicted: &[Vec<bool>], actual: &[Vec<bool>]) -> BTreeMap<String, f64> {
    let mut metrics = BTreeMap::new();
    let n = predicted.len().min(actual.len());
    if n == 0 {
        return metrics;
    }

    let mut wrong_pairs = 0usize;
    let mut total_pairs = 0usize;
    let mut exact = 0usize;
    let mut f1_sum = 0.0;

    for (p, a) in predicted.iter().zip(actual) {
        let mismatches = p.iter().zip(a).filter(|(x, y)| x != y).count();
        wrong_pairs += mismatches;
        total_pairs += a.len();
        if mismatches == 0 {
            exact += 1;
        }

        let both = p.iter().zip(a).filter(|(x, y)| **x && **y).count();
        let denom = p.iter().filter(|x| **x).count() + a.iter().filter(|y| **y).count();
        f1_sum += if denom == 0 {
            1.0
        } else {
            (2 * both) as f64 / denom as f64
        };
    }

    let hamming = if total_pairs == 0 {
        0.0
    } else {
        wrong_pairs as f64 / total_pairs as f64
    };

    metrics.insert(HAMMING_LOSS.to_string(), hamming);
    metrics.insert(SUBSET_ACCURACY.to_string(), exact as f64 / n as f64);
    metrics.insert(EXAMPLE_F1.to_string(), f1_sum / n as f64);
    metrics
}

/// Ordered evaluation history of one run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LearningCurve {
    /// One record per iteration
    pub records: Vec<Evaluation>,
}

impl LearningCurve {
    /// Wrap a list of records
    #[must_use]
    pub const fn new(records: Vec<Evaluation>) -> Self {
        Self { records }
    }

    /// Number of points on the curve
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the curve has no points
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Normalized area under the curve for `metric`, with labeled-set size
    /// on the x axis.
    ///
    /// Walking backwards from the last point, each point's value is weighted
    /// by its distance to the following point; the weighted sum is divided
    /// by the covered x range. Returns `None` when the curve is empty, spans
    /// no x range, or the area is zero.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn area(&self, metric: &str) -> Option<f64> {
        let last = self.records.last()?;

        let mut area = 0.0;
        let mut total = 0.0;
        let mut x_last = last.labeled_size as f64;

        for record in self.records.iter().rev().skip(1) {
            let x = record.labeled_size as f64;
            let delta = (x - x_last).abs();
            total += delta;
            area += record.metric(metric).unwrap_or(0.0) * delta;
            x_last = x;
        }

        if area == 0.0 || total == 0.0 {
            return None;
        }
        Some(area / total)
    }

    /// `(labeled_size, value)` points for one metric
    #[must_use]
    pub fn points(&self, metric: &str) -> Vec<(usize, f64)> {
        self.records
            .iter()
            .filter_map(|r| r.metric(metric).map(|v| (r.labeled_size, v)))
            .collect()
    }

    /// Write the curve as pretty JSON
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), CurveError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Read a curve previously written by [`LearningCurve::save`]
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, CurveError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

impl From<Vec<Evaluation>> for LearningCurve {
    fn from(records: Vec<Evaluation>) -> Self {
        Self::new(records)
    }
}
