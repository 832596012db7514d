//! Classifier capability and built-in reference classifiers.
//!
//! The active-learning loop never looks inside a model; it only trains it,
//! asks for class distributions, evaluates it on a test pool and copies it.
//! Any model implementing [`Classifier`] plugs into every strategy.

use crate::dataset::{Dataset, Example, Label, LabelKind};
use crate::evaluation::{multi_label_metrics, single_label_metrics, Evaluation};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::fmt;
use thiserror::Error;

/// Errors raised by classifiers
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClassifierError {
    #[error("Classifier has not been trained")]
    NotTrained,

    #[error("Cannot train on an empty dataset")]
    EmptyTrainingSet,

    #[error("Expected {expected} features, found {found}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("{classifier} does not support {operation}")]
    Unsupported {
        classifier: String,
        operation: &'static str,
    },

    #[error("Classifier failure: {0}")]
    Failed(String),
}

/// A trainable model that produces per-class (or per-label) probabilities.
///
/// Implementations must be deep-copyable through [`Classifier::clone_box`];
/// each fold and each strategy owns its own copy.
pub trait Classifier: Send + fmt::Debug {
    /// Short identifier used in logs and reports
    fn name(&self) -> &str;

    /// Fit the model on a labeled dataset, replacing any previous state
    ///
    /// # Errors
    ///
    /// Returns an error if the dataset is empty or malformed.
    fn train(&mut self, data: &Dataset) -> Result<(), ClassifierError>;

    /// Class probabilities (single-label) or per-label relevance
    /// probabilities (multi-label) for one example
    ///
    /// # Errors
    ///
    /// Returns an error if the model is untrained or the example has the
    /// wrong shape.
    fn predict_distribution(&self, example: &Example) -> Result<Vec<f64>, ClassifierError>;

    /// Signed per-label decision values; positive means relevant
    ///
    /// # Errors
    ///
    /// Returns `Unsupported` unless the model exposes margins.
    fn decision_values(&self, _example: &Example) -> Result<Vec<f64>, ClassifierError> {
        Err(ClassifierError::Unsupported {
            classifier: self.name().to_string(),
            operation: "decision values",
        })
    }

    /// Distribution of each committee member
    ///
    /// # Errors
    ///
    /// Returns `Unsupported` unless the model is an ensemble.
    fn member_distributions(&self, _example: &Example) -> Result<Vec<Vec<f64>>, ClassifierError> {
        Err(ClassifierError::Unsupported {
            classifier: self.name().to_string(),
            operation: "member distributions",
        })
    }

    /// Evaluate on a test dataset
    ///
    /// The returned record carries metrics only; callers fill in the
    /// iteration and pool sizes.
    ///
    /// # Errors
    ///
    /// Returns the first prediction error.
    fn evaluate(&self, test: &Dataset) -> Result<Evaluation, ClassifierError> {
        let mut record = Evaluation::default();
        match test.schema().kind {
            LabelKind::SingleLabel => {
                let mut predicted = Vec::with_capacity(test.len());
                let mut actual = Vec::with_capacity(test.len());
                for example in test {
                    let distribution = self.predict_distribution(example)?;
                    predicted.push(argmax(&distribution));
                    if let Label::Single(class) = example.label {
                        actual.push(class);
                    }
                }
                record.metrics =
                    single_label_metrics(&predicted, &actual, test.schema().num_labels());
            }
            LabelKind::MultiLabel => {
                let mut predicted = Vec::with_capacity(test.len());
                let mut actual = Vec::with_capacity(test.len());
                for example in test {
                    let distribution = self.predict_distribution(example)?;
                    predicted.push(distribution.iter().map(|p| *p >= 0.5).collect());
                    if let Label::Multi(labels) = &example.label {
                        actual.push(labels.clone());
                    }
                }
                record.metrics = multi_label_metrics(&predicted, &actual);
            }
        }
        Ok(record)
    }

    /// Independent deep copy
    fn clone_box(&self) -> Box<dyn Classifier>;
}

impl Clone for Box<dyn Classifier> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// Index of the largest value; ties go to the lowest index
#[must_use]
pub fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, value) in values.iter().enumerate() {
        if *value > values[best] {
            best = i;
        }
    }
    best
}

fn euclidean(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f64>()
        .sqrt()
}

#[allow(clippy::cast_precision_loss)]
fn centroid<'a>(rows: impl Iterator<Item = &'a Example>, dim: usize) -> Option<Vec<f64>> {
    let mut sum = vec![0.0; dim];
    let mut count = 0usize;
    for example in rows {
        for (s, x) in sum.iter_mut().zip(&example.features) {
            *s += x;
        }
        count += 1;
    }
    if count == 0 {
        return None;
    }
    for s in &mut sum {
        *s /= count as f64;
    }
    Some(sum)
}

fn check_dim(example: &Example, expected: usize) -> Result<(), ClassifierError> {
    if example.features.len() == expected {
        Ok(())
    } else {
        Err(ClassifierError::DimensionMismatch {
            expected,
            found: example.features.len(),
        })
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Single-label nearest-centroid classifier.
///
/// Class probabilities are a softmax over negative centroid distances;
/// classes absent from the training data get probability zero.
#[derive(Debug, Clone, Default)]
pub struct NearestCentroid {
    centroids: Vec<Option<Vec<f64>>>,
    dim: usize,
}

impl NearestCentroid {
    /// Create an untrained classifier
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Classifier for NearestCentroid {
    fn name(&self) -> &'static str {
        "nearest_centroid"
    }

    fn train(&mut self, data: &Dataset) -> Result<(), ClassifierError> {
        if data.is_empty() {
            return Err(ClassifierError::EmptyTrainingSet);
        }
        let schema = data.schema();
        self.dim = schema.num_features;
        self.centroids = (0..schema.num_labels())
            .map(|class| {
                centroid(
                    data.iter().filter(|e| e.class() == Some(class)),
                    schema.num_features,
                )
            })
            .collect();
        Ok(())
    }

    fn predict_distribution(&self, example: &Example) -> Result<Vec<f64>, ClassifierError> {
        if self.centroids.iter().all(Option::is_none) {
            return Err(ClassifierError::NotTrained);
        }
        check_dim(example, self.dim)?;

        let distances: Vec<Option<f64>> = self
            .centroids
            .iter()
            .map(|c| c.as_ref().map(|c| euclidean(c, &example.features)))
            .collect();
        let nearest = distances
            .iter()
            .flatten()
            .copied()
            .fold(f64::INFINITY, f64::min);

        let weights: Vec<f64> = distances
            .iter()
            .map(|d| d.map_or(0.0, |d| (nearest - d).exp()))
            .collect();
        let total: f64 = weights.iter().sum();
        Ok(weights.into_iter().map(|w| w / total).collect())
    }

    fn clone_box(&self) -> Box<dyn Classifier> {
        Box::new(self.clone())
    }
}

/// Multi-label binary-relevance classifier built from per-label centroids.
///
/// For each label the decision value is the distance to the negative
/// centroid minus the distance to the positive one, so positive values mean
/// "relevant". Probabilities are the sigmoid of the decision values.
#[derive(Debug, Clone, Default)]
pub struct BinaryRelevanceCentroid {
    /// (positive centroid, negative centroid) per label
    per_label: Vec<(Option<Vec<f64>>, Option<Vec<f64>>)>,
    dim: usize,
}

impl BinaryRelevanceCentroid {
    /// Create an untrained classifier
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Classifier for BinaryRelevanceCentroid {
    fn name(&self) -> &'static str {
        "binary_relevance_centroid"
    }

    fn train(&mut self, data: &Dataset) -> Result<(), ClassifierError> {
        if data.is_empty() {
            return Err(ClassifierError::EmptyTrainingSet);
        }
        let schema = data.schema();
        self.dim = schema.num_features;
        self.per_label = (0..schema.num_labels())
            .map(|j| {
                let relevant = |e: &&Example| e.labels().is_some_and(|l| l[j]);
                let pos = centroid(data.iter().filter(relevant), self.dim);
                let neg = centroid(data.iter().filter(|e| !relevant(e)), self.dim);
                (pos, neg)
            })
            .collect();
        Ok(())
    }

    fn predict_distribution(&self, example: &Example) -> Result<Vec<f64>, ClassifierError> {
        Ok(self
            .decision_values(example)?
            .into_iter()
            .map(sigmoid)
            .collect())
    }

    fn decision_values(&self, example: &Example) -> Result<Vec<f64>, ClassifierError> {
        if self.per_label.is_empty() {
            return Err(ClassifierError::NotTrained);
        }
        check_dim(example, self.dim)?;

        Ok(self
            .per_label
            .iter()
            .map(|(pos, neg)| match (pos, neg) {
                (Some(p), Some(n)) => {
                    euclidean(n, &example.features) - euclidean(p, &example.features)
                }
                (Some(_), None) => 1.0,
                (None, _) => -1.0,
            })
            .collect())
    }

    fn clone_box(&self) -> Box<dyn Classifier> {
        Box::new(self.clone())
    }
}

/// Bagged committee of classifiers.
///
/// Each member trains on a bootstrap resample of the labeled pool drawn from
/// a `ChaCha8Rng` seeded with `seed + member index`, so training is
/// reproducible. The committee distribution is the mean of the members'.
#[derive(Debug, Clone)]
pub struct Committee {
    members: Vec<Box<dyn Classifier>>,
    seed: u64,
    trained: bool,
}

impl Committee {
    /// Committee of `size` copies of `prototype`
    #[must_use]
    pub fn new(prototype: &dyn Classifier, size: usize, seed: u64) -> Self {
        Self {
            members: (0..size.max(1)).map(|_| prototype.clone_box()).collect(),
            seed,
            trained: false,
        }
    }

    /// Number of members
    #[must_use]
    pub fn size(&self) -> usize {
        self.members.len()
    }
}

impl Classifier for Committee {
    fn name(&self) -> &'static str {
        "committee"
    }

    fn train(&mut self, data: &Dataset) -> Result<(), ClassifierError> {
        if data.is_empty() {
            return Err(ClassifierError::EmptyTrainingSet);
        }
        for (m, member) in self.members.iter_mut().enumerate() {
            let mut rng = ChaCha8Rng::seed_from_u64(self.seed.wrapping_add(m as u64));
            let sample: Vec<usize> = (0..data.len()).map(|_| rng.gen_range(0..data.len())).collect();
            let bag = data
                .subset(&sample)
                .map_err(|e| ClassifierError::Failed(e.to_string()))?;
            member.train(&bag)?;
        }
        self.trained = true;
        Ok(())
    }

    #[allow(clippy::cast_precision_loss)]
    fn predict_distribution(&self, example: &Example) -> Result<Vec<f64>, ClassifierError> {
        let members = self.member_distributions(example)?;
        let width = members.first().map_or(0, Vec::len);
        let mut mean = vec![0.0; width];
        for distribution in &members {
            for (m, p) in mean.iter_mut().zip(distribution) {
                *m += p;
            }
        }
        for m in &mut mean {
            *m /= members.len() as f64;
        }
        Ok(mean)
    }

    fn member_distributions(&self, example: &Example) -> Result<Vec<Vec<f64>>, ClassifierError> {
        if !self.trained {
            return Err(ClassifierError::NotTrained);
        }
        self.members
            .iter()
            .map(|m| m.predict_distribution(example))
            .collect()
    }

    fn clone_box(&self) -> Box<dyn Classifier> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::dataset::Schema;

    fn two_blobs() -> Dataset {
        let schema = Schema::single_label(2, vec!["left".to_string(), "right".to_string()]);
        let examples = vec![
            Example::single(vec![0.0, 0.0], 0),
            Example::single(vec![0.2, 0.1], 0),
            Example::single(vec![0.1, 0.3], 0),
            Example::single(vec![5.0, 5.0], 1),
            Example::single(vec![5.2, 4.9], 1),
            Example::single(vec![4.8, 5.1], 1),
        ];
        Dataset::from_examples(schema, examples).unwrap()
    }

    fn multi_blobs() -> Dataset {
        let schema = Schema::multi_label(1, vec!["low".to_string(), "high".to_string()]);
        let examples = vec![
            Example::multi(vec![0.0], vec![true, false]),
            Example::multi(vec![0.5], vec![true, false]),
            Example::multi(vec![9.5], vec![false, true]),
            Example::multi(vec![10.0], vec![false, true]),
        ];
        Dataset::from_examples(schema, examples).unwrap()
    }

    #[test]
    fn test_argmax_ties_lowest_index() {
        assert_eq!(argmax(&[0.2, 0.5, 0.5]), 1);
        assert_eq!(argmax(&[]), 0);
    }

    #[test]
    fn test_nearest_centroid_untrained() {
        let classifier = NearestCentroid::new();
        let example = Example::single(vec![0.0, 0.0], 0);
        assert_eq!(
            classifier.predict_distribution(&example),
            Err(ClassifierError::NotTrained)
        );
    }

    #[test]
    fn test_nearest_centroid_empty_training_set() {
        let mut classifier = NearestCentroid::new();
        let empty = Dataset::new(two_blobs().schema().clone());
        assert_eq!(classifier.train(&empty), Err(ClassifierError::EmptyTrainingSet));
    }

    #[test]
    fn test_nearest_centroid_distribution() {
        let mut classifier = NearestCentroid::new();
        classifier.train(&two_blobs()).unwrap();

        let dist = classifier
            .predict_distribution(&Example::single(vec![0.1, 0.1], 0))
            .unwrap();
        assert_eq!(dist.len(), 2);
        assert!((dist.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        assert!(dist[0] > 0.99);
    }

    #[test]
    fn test_nearest_centroid_dimension_mismatch() {
        let mut classifier = NearestCentroid::new();
        classifier.train(&two_blobs()).unwrap();
        let result = classifier.predict_distribution(&Example::single(vec![0.1], 0));
        assert!(matches!(
            result,
            Err(ClassifierError::DimensionMismatch { expected: 2, found: 1 })
        ));
    }

    #[test]
    fn test_nearest_centroid_evaluate() {
        let mut classifier = NearestCentroid::new();
        let data = two_blobs();
        classifier.train(&data).unwrap();

        let record = classifier.evaluate(&data).unwrap();
        assert!((record.metric("accuracy").unwrap() - 1.0).abs() < f64::EPSILON);
        assert!(record.metric("error_rate").unwrap().abs() < f64::EPSILON);
    }

    #[test]
    fn test_decision_values_unsupported_by_default() {
        let mut classifier = NearestCentroid::new();
        classifier.train(&two_blobs()).unwrap();
        let result = classifier.decision_values(&Example::single(vec![0.0, 0.0], 0));
        assert!(matches!(result, Err(ClassifierError::Unsupported { .. })));
    }

    #[test]
    fn test_binary_relevance_decision_signs() {
        let mut classifier = BinaryRelevanceCentroid::new();
        classifier.train(&multi_blobs()).unwrap();

        let values = classifier
            .decision_values(&Example::multi(vec![1.0], vec![false, false]))
            .unwrap();
        assert!(values[0] > 0.0);
        assert!(values[1] < 0.0);

        let record = classifier.evaluate(&multi_blobs()).unwrap();
        assert!(record.metric("hamming_loss").unwrap().abs() < f64::EPSILON);
    }

    #[test]
    fn test_committee_members_and_mean() {
        let mut committee = Committee::new(&NearestCentroid::new(), 3, 7);
        assert_eq!(committee.size(), 3);
        committee.train(&two_blobs()).unwrap();

        let example = Example::single(vec![2.5, 2.5], 0);
        let members = committee.member_distributions(&example).unwrap();
        assert_eq!(members.len(), 3);

        let mean = committee.predict_distribution(&example).unwrap();
        let expected = members.iter().map(|m| m[0]).sum::<f64>() / 3.0;
        assert!((mean[0] - expected).abs() < 1e-12);
    }

    #[test]
    fn test_committee_training_is_reproducible() {
        let data = two_blobs();
        let example = Example::single(vec![2.0, 3.0], 0);

        let mut a = Committee::new(&NearestCentroid::new(), 4, 11);
        let mut b = Committee::new(&NearestCentroid::new(), 4, 11);
        a.train(&data).unwrap();
        b.train(&data).unwrap();

        assert_eq!(
            a.member_distributions(&example).unwrap(),
            b.member_distributions(&example).unwrap()
        );
    }

    #[test]
    fn test_clone_box_is_independent() {
        let mut original: Box<dyn Classifier> = Box::new(NearestCentroid::new());
        let copy = original.clone();
        original.train(&two_blobs()).unwrap();

        let example = Example::single(vec![0.0, 0.0], 0);
        assert!(original.predict_distribution(&example).is_ok());
        assert_eq!(
            copy.predict_distribution(&example),
            Err(ClassifierError::NotTrained)
        );
    }
}
