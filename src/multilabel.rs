//! Multi-label query strategies over per-label decision values.
//!
//! Both strategies need a classifier that exposes signed per-label margins
//! through [`Classifier::decision_values`], such as
//! [`crate::classifier::BinaryRelevanceCentroid`].

use crate::classifier::Classifier;
use crate::dataset::Pools;
use crate::strategy::{unlabeled_at, QueryStrategy, StrategyError};
use tracing::debug;

/// Smallest absolute decision value over all labels; the example whose
/// least certain label is closest to its boundary is preferred.
#[derive(Debug, Clone)]
pub struct BinMin {
    classifier: Box<dyn Classifier>,
}

impl BinMin {
    /// Create a strategy over a margin-producing classifier
    #[must_use]
    pub fn new(classifier: Box<dyn Classifier>) -> Self {
        Self { classifier }
    }
}

/// Minimum of `|f_j|` over labels
#[must_use]
pub fn bin_min(decisions: &[f64]) -> f64 {
    decisions
        .iter()
        .map(|f| f.abs())
        .fold(f64::INFINITY, f64::min)
}

impl QueryStrategy for BinMin {
    fn name(&self) -> &'static str {
        "bin_min"
    }

    fn maximal(&self) -> bool {
        false
    }

    fn classifier(&self) -> &dyn Classifier {
        self.classifier.as_ref()
    }

    fn classifier_mut(&mut self) -> &mut dyn Classifier {
        self.classifier.as_mut()
    }

    fn utility(&mut self, pools: &Pools, index: usize) -> Result<f64, StrategyError> {
        let example = unlabeled_at(pools, index)?;
        Ok(bin_min(&self.classifier.decision_values(example)?))
    }

    fn clone_box(&self) -> Box<dyn QueryStrategy> {
        Box::new(self.clone())
    }
}

/// Hinge loss of label `j` against all labels when `j` is taken as relevant:
/// `sum_l max(1 - m_jl * |f_l|, 0)` with `m_jl = 1` if `j == l`, else `-1`.
fn label_loss(decisions: &[f64], j: usize) -> f64 {
    decisions
        .iter()
        .enumerate()
        .map(|(l, f)| {
            let m = if l == j { 1.0 } else { -1.0 };
            (1.0 - m * f.abs()).max(0.0)
        })
        .sum()
}

/// Mean max-loss: averages the pairwise hinge loss over the labels an
/// example is predicted to carry, gated by per-label thresholds learned
/// from the labeled pool on every training pass.
#[derive(Debug, Clone)]
pub struct MeanMaxLoss {
    classifier: Box<dyn Classifier>,
    thresholds: Vec<f64>,
}

impl MeanMaxLoss {
    /// Create a strategy over a margin-producing classifier
    #[must_use]
    pub fn new(classifier: Box<dyn Classifier>) -> Self {
        Self {
            classifier,
            thresholds: Vec::new(),
        }
    }

    /// Per-label thresholds from the last training pass
    #[must_use]
    pub fn thresholds(&self) -> &[f64] {
        &self.thresholds
    }

    /// Utility for one example's decision values under the current thresholds
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn score(&self, decisions: &[f64]) -> f64 {
        let mut sum = 0.0;
        let mut count = 0usize;

        for (j, f) in decisions.iter().enumerate() {
            let predicted = if *f > 0.0 { 1.0 } else { 0.0 };
            let loss = (1.0 - predicted * f.abs()).max(0.0);
            let threshold = self.thresholds.get(j).copied().unwrap_or(f64::MAX);
            if loss <= threshold {
                count += 1;
                sum += label_loss(decisions, j);
            }
        }

        if count == 0 {
            0.0
        } else {
            sum / count as f64
        }
    }
}

impl QueryStrategy for MeanMaxLoss {
    fn name(&self) -> &'static str {
        "mean_max_loss"
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

    fn train(&mut self, pools: &Pools) -> Result<(), StrategyError> {
        self.classifier.train(&pools.labeled)?;

        let num_labels = pools.schema().num_labels();
        let mut thresholds = vec![f64::MAX; num_labels];
        for example in &pools.labeled {
            let Some(labels) = example.labels() else {
                continue;
            };
            let decisions = self.classifier.decision_values(example)?;
            for (j, threshold) in thresholds.iter_mut().enumerate() {
                if labels.get(j).copied().unwrap_or(false) {
                    *threshold = threshold.min(label_loss(&decisions, j));
                }
            }
        }

        debug!(?thresholds, "Mean max-loss thresholds");
        self.thresholds = thresholds;
        Ok(())
    }

    fn utility(&mut self, pools: &Pools, index: usize) -> Result<f64, StrategyError> {
        let example = unlabeled_at(pools, index)?;
        let decisions = self.classifier.decision_values(example)?;
        Ok(self.score(&decisions))
    }

    fn clone_box(&self) -> Box<dyn QueryStrategy> {
        Box::new(self.clone())
    }
}
