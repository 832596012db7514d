//! Query strategies: per-example informativeness scoring.
//!
//! A [`QueryStrategy`] owns its classifier, scores every unlabeled example
//! and moves the chosen batch into the labeled pool. The `maximal` flag
//! tells the batch selector whether high or low utility is preferred.
//!
//! Single-label uncertainty strategies live here; multi-label strategies
//! are in [`crate::multilabel`] and the density decorator in
//! [`crate::density`].

use crate::classifier::{argmax, Classifier, ClassifierError};
use crate::dataset::{DatasetError, Pools};
use crate::evaluation::Evaluation;
use crate::similarity::SimilarityError;
use std::fmt;
use thiserror::Error;

/// Errors raised by query strategies and batch selection
#[derive(Error, Debug)]
pub enum StrategyError {
    #[error("Classifier error: {0}")]
    Classifier(#[from] ClassifierError),

    #[error("Dataset error: {0}")]
    Dataset(#[from] DatasetError),

    #[error("Similarity cache error: {0}")]
    Similarity(#[from] SimilarityError),

    #[error("Batch of {requested} exceeds unlabeled pool of {available}")]
    BatchExceedsPool { requested: usize, available: usize },

    #[error("Unlabeled example {0} has no utility")]
    MissingUtility(usize),

    #[error("Invalid strategy configuration: {0}")]
    Config(String),
}

/// Informativeness scoring over the unlabeled pool
pub trait QueryStrategy: Send + fmt::Debug {
    /// Short identifier used in logs and reports
    fn name(&self) -> &str;

    /// Whether larger utility means more informative
    fn maximal(&self) -> bool;

    /// The wrapped classifier
    fn classifier(&self) -> &dyn Classifier;

    /// The wrapped classifier, mutably
    fn classifier_mut(&mut self) -> &mut dyn Classifier;

    /// Fit the classifier on the labeled pool and refresh derived state
    ///
    /// # Errors
    ///
    /// Returns the classifier's training error.
    fn train(&mut self, pools: &Pools) -> Result<(), StrategyError> {
        self.classifier_mut().train(&pools.labeled)?;
        Ok(())
    }

    /// Utility of the unlabeled example at `index`
    ///
    /// # Errors
    ///
    /// Returns an error if the index is out of bounds or prediction fails.
    fn utility(&mut self, pools: &Pools, index: usize) -> Result<f64, StrategyError>;

    /// One utility per unlabeled example, in pool order
    ///
    /// # Errors
    ///
    /// Returns the first scoring error.
    fn score_unlabeled(&mut self, pools: &Pools) -> Result<Vec<f64>, StrategyError> {
        (0..pools.unlabeled.len())
            .map(|i| self.utility(pools, i))
            .collect()
    }

    /// Evaluate the classifier on the test pool, tagged with pool sizes
    ///
    /// # Errors
    ///
    /// Returns the classifier's evaluation error.
    fn evaluate(&self, pools: &Pools, iteration: usize) -> Result<Evaluation, StrategyError> {
        let mut record = self.classifier().evaluate(&pools.test)?;
        record.iteration = iteration;
        record.labeled_size = pools.labeled.len();
        record.unlabeled_size = pools.unlabeled.len();
        Ok(record)
    }

    /// Move the selected unlabeled positions into the labeled pool
    ///
    /// # Errors
    ///
    /// Returns an error if the selection is out of bounds or repeats a
    /// position.
    fn update_pools(&mut self, pools: &mut Pools, selected: &[usize]) -> Result<(), StrategyError> {
        pools.move_to_labeled(selected)?;
        Ok(())
    }

    /// Independent deep copy, classifier included
    fn clone_box(&self) -> Box<dyn QueryStrategy>;
}

impl Clone for Box<dyn QueryStrategy> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// Look up an unlabeled example, mapping a miss to a dataset error
pub(crate) fn unlabeled_at(
    pools: &Pools,
    index: usize,
) -> Result<&crate::dataset::Example, StrategyError> {
    pools
        .unlabeled
        .get(index)
        .ok_or(StrategyError::Dataset(DatasetError::IndexOutOfBounds {
            index,
            len: pools.unlabeled.len(),
        }))
}

// ============================================================================
// Uncertainty measures
// ============================================================================

/// Largest and second-largest probabilities
fn top_two(distribution: &[f64]) -> (f64, f64) {
    let mut first = f64::NEG_INFINITY;
    let mut second = f64::NEG_INFINITY;
    for &p in distribution {
        if p > first {
            second = first;
            first = p;
        } else if p > second {
            second = p;
        }
    }
    (first.max(0.0), second.max(0.0))
}

/// Difference between the two most probable classes
#[must_use]
pub fn margin(distribution: &[f64]) -> f64 {
    let (first, second) = top_two(distribution);
    first - second
}

/// One minus the most probable class's probability
#[must_use]
pub fn least_confident(distribution: &[f64]) -> f64 {
    1.0 - top_two(distribution).0
}

/// Shannon entropy of the distribution (natural log)
#[must_use]
pub fn entropy(distribution: &[f64]) -> f64 {
    -distribution
        .iter()
        .filter(|p| **p > 0.0)
        .map(|p| p * p.ln())
        .sum::<f64>()
}

/// Entropy of the committee's hard votes
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn vote_entropy(members: &[Vec<f64>]) -> f64 {
    if members.is_empty() {
        return 0.0;
    }
    let width = members.iter().map(Vec::len).max().unwrap_or(0);
    let mut votes = vec![0usize; width];
    for distribution in members {
        if let Some(v) = votes.get_mut(argmax(distribution)) {
            *v += 1;
        }
    }
    let shares: Vec<f64> = votes
        .iter()
        .map(|v| *v as f64 / members.len() as f64)
        .collect();
    entropy(&shares)
}

/// Which uncertainty measure an [`UncertaintySampling`] applies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UncertaintyMeasure {
    /// `1 - max p`, larger is more uncertain
    LeastConfident,
    /// `p1 - p2`, smaller is more uncertain
    Margin,
    /// `-sum p ln p`, larger is more uncertain
    Entropy,
}

impl UncertaintyMeasure {
    /// Whether larger values are more informative
    #[must_use]
    pub const fn maximal(self) -> bool {
        !matches!(self, Self::Margin)
    }

    /// Apply the measure to a class distribution
    #[must_use]
    pub fn score(self, distribution: &[f64]) -> f64 {
        match self {
            Self::LeastConfident => least_confident(distribution),
            Self::Margin => margin(distribution),
            Self::Entropy => entropy(distribution),
        }
    }

    /// Registry tag
    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::LeastConfident => "least_confident",
            Self::Margin => "margin",
            Self::Entropy => "entropy",
        }
    }
}

/// Single-label uncertainty sampling over the classifier's distribution
#[derive(Debug, Clone)]
pub struct UncertaintySampling {
    measure: UncertaintyMeasure,
    classifier: Box<dyn Classifier>,
}

impl UncertaintySampling {
    /// Create a strategy using `measure` over `classifier`
    #[must_use]
    pub fn new(measure: UncertaintyMeasure, classifier: Box<dyn Classifier>) -> Self {
        Self {
            measure,
            classifier,
        }
    }

    /// Margin sampling
    #[must_use]
    pub fn margin(classifier: Box<dyn Classifier>) -> Self {
        Self::new(UncertaintyMeasure::Margin, classifier)
    }

    /// The measure in use
    #[must_use]
    pub const fn measure(&self) -> UncertaintyMeasure {
        self.measure
    }
}

impl QueryStrategy for UncertaintySampling {
    fn name(&self) -> &'static str {
        self.measure.tag()
    }

    fn maximal(&self) -> bool {
        self.measure.maximal()
    }

    fn classifier(&self) -> &dyn Classifier {
        self.classifier.as_ref()
    }

    fn classifier_mut(&mut self) -> &mut dyn Classifier {
        self.classifier.as_mut()
    }

    fn utility(&mut self, pools: &Pools, index: usize) -> Result<f64, StrategyError> {
        let example = unlabeled_at(pools, index)?;
        let distribution = self.classifier.predict_distribution(example)?;
        Ok(self.measure.score(&distribution))
    }

    fn clone_box(&self) -> Box<dyn QueryStrategy> {
        Box::new(self.clone())
    }
}

/// Query-by-committee with vote entropy; needs an ensemble classifier
#[derive(Debug, Clone)]
pub struct VoteEntropy {
    classifier: Box<dyn Classifier>,
}

impl VoteEntropy {
    /// Create a strategy over a committee classifier
    #[must_use]
    pub fn new(classifier: Box<dyn Classifier>) -> Self {
        Self { classifier }
    }
}

impl QueryStrategy for VoteEntropy {
    fn name(&self) -> &'static str {
        "vote_entropy"
    }

    fn maximal(&self) -> bool {
        true
    }

    fn classifier(&self) -> &dyn Classifier {
        self.classifier.as_ref()
    }

    fn classifier_mut(&mut self) -> &mut dyn Classifier {
        self.classifier.as_mut()
    }

    fn utility(&mut self, pools: &Pools, index: usize) -> Result<f64, StrategyError> {
        let example = unlabeled_at(pools, index)?;
        let members = self.classifier.member_distributions(example)?;
        Ok(vote_entropy(&members))
    }

    fn clone_box(&self) -> Box<dyn QueryStrategy> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod tests {
    use super::*;
    use crate::classifier::{Committee, NearestCentroid};
    use crate::dataset::{Dataset, Example, Schema};

    /// Labeled seed on both sides, unlabeled points spread between them
    pub(crate) fn line_pools() -> Pools {
        let schema = Schema::single_label(1, vec!["a".to_string(), "b".to_string()]);
        let labeled = Dataset::from_examples(
            schema.clone(),
            vec![Example::single(vec![0.0], 0), Example::single(vec![10.0], 1)],
        )
        .unwrap();
        let unlabeled = Dataset::from_examples(
            schema.clone(),
            vec![
                Example::single(vec![1.0], 0),
                Example::single(vec![5.2], 1),
                Example::single(vec![9.0], 1),
                Example::single(vec![4.8], 0),
                Example::single(vec![2.0], 0),
            ],
        )
        .unwrap();
        let test = Dataset::from_examples(
            schema,
            vec![Example::single(vec![1.5], 0), Example::single(vec![8.5], 1)],
        )
        .unwrap();
        Pools::new(labeled, unlabeled, test).unwrap()
    }

    // =========================================================================
    // Measure tests
    // =========================================================================

    #[test]
    fn test_margin_two_classes() {
        assert!((margin(&[0.9, 0.1]) - 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_margin_three_classes() {
        assert!((margin(&[0.4, 0.35, 0.25]) - 0.05).abs() < 1e-12);
    }

    #[test]
    fn test_margin_order_independent() {
        assert!((margin(&[0.25, 0.35, 0.4]) - 0.05).abs() < 1e-12);
    }

    #[test]
    fn test_least_confident() {
        assert!((least_confident(&[0.7, 0.2, 0.1]) - 0.3).abs() < 1e-12);
    }

    #[test]
    fn test_entropy_uniform_is_max() {
        let uniform = entropy(&[0.5, 0.5]);
        assert!((uniform - std::f64::consts::LN_2).abs() < 1e-12);
        assert!(entropy(&[0.9, 0.1]) < uniform);
        assert!(entropy(&[1.0, 0.0]).abs() < f64::EPSILON);
    }

    #[test]
    fn test_vote_entropy() {
        let unanimous = vec![vec![0.9, 0.1], vec![0.8, 0.2]];
        assert!(vote_entropy(&unanimous).abs() < f64::EPSILON);

        let split = vec![vec![0.9, 0.1], vec![0.2, 0.8]];
        assert!((vote_entropy(&split) - std::f64::consts::LN_2).abs() < 1e-12);
    }

    #[test]
    fn test_orientation() {
        assert!(!UncertaintyMeasure::Margin.maximal());
        assert!(UncertaintyMeasure::LeastConfident.maximal());
        assert!(UncertaintyMeasure::Entropy.maximal());
    }

    // =========================================================================
    // Strategy tests
    // =========================================================================

    #[test]
    fn test_margin_strategy_prefers_boundary() {
        let pools = line_pools();
        let mut strategy = UncertaintySampling::margin(Box::new(NearestCentroid::new()));
        strategy.train(&pools).unwrap();

        let scores = strategy.score_unlabeled(&pools).unwrap();
        assert_eq!(scores.len(), 5);
        // 5.2 and 4.8 sit next to the boundary at 5.0
        let lowest = scores
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .unwrap()
            .0;
        assert!(lowest == 1 || lowest == 3);
        assert!(scores[0] > scores[1]);
    }

    #[test]
    fn test_utility_out_of_bounds() {
        let pools = line_pools();
        let mut strategy = UncertaintySampling::margin(Box::new(NearestCentroid::new()));
        strategy.train(&pools).unwrap();
        let err = strategy.utility(&pools, 99).unwrap_err();
        assert!(matches!(
            err,
            StrategyError::Dataset(DatasetError::IndexOutOfBounds { index: 99, .. })
        ));
    }

    #[test]
    fn test_utility_before_training_fails() {
        let pools = line_pools();
        let mut strategy = UncertaintySampling::margin(Box::new(NearestCentroid::new()));
        assert!(matches!(
            strategy.utility(&pools, 0),
            Err(StrategyError::Classifier(ClassifierError::NotTrained))
        ));
    }

    #[test]
    fn test_evaluate_tags_pool_sizes() {
        let pools = line_pools();
        let mut strategy = UncertaintySampling::margin(Box::new(NearestCentroid::new()));
        strategy.train(&pools).unwrap();

        let record = strategy.evaluate(&pools, 3).unwrap();
        assert_eq!(record.iteration, 3);
        assert_eq!(record.labeled_size, 2);
        assert_eq!(record.unlabeled_size, 5);
        assert!(record.metric("accuracy").is_some());
    }

    #[test]
    fn test_update_pools_moves_selection() {
        let mut pools = line_pools();
        let mut strategy = UncertaintySampling::margin(Box::new(NearestCentroid::new()));
        strategy.update_pools(&mut pools, &[3, 1]).unwrap();

        assert_eq!(pools.labeled.len(), 4);
        assert_eq!(pools.unlabeled.len(), 3);
        assert!((pools.labeled.get(2).unwrap().features[0] - 4.8).abs() < f64::EPSILON);
        assert!((pools.labeled.get(3).unwrap().features[0] - 5.2).abs() < f64::EPSILON);
    }

    #[test]
    fn test_vote_entropy_requires_committee() {
        let pools = line_pools();
        let mut plain = VoteEntropy::new(Box::new(NearestCentroid::new()));
        plain.train(&pools).unwrap();
        assert!(matches!(
            plain.utility(&pools, 0),
            Err(StrategyError::Classifier(ClassifierError::Unsupported { .. }))
        ));

        let committee = Committee::new(&NearestCentroid::new(), 3, 1);
        let mut strategy = VoteEntropy::new(Box::new(committee));
        strategy.train(&pools).unwrap();
        let scores = strategy.score_unlabeled(&pools).unwrap();
        assert_eq!(scores.len(), 5);
        assert!(scores.iter().all(|s| *s >= 0.0));
    }

    #[test]
    fn test_clone_box_is_independent() {
        let pools = line_pools();
        let mut strategy: Box<dyn QueryStrategy> =
            Box::new(UncertaintySampling::margin(Box::new(NearestCentroid::new())));
        let mut copy = strategy.clone();
        strategy.train(&pools).unwrap();

        assert!(strategy.utility(&pools, 0).is_ok());
        assert!(copy.utility(&pools, 0).is_err());
    }
}
