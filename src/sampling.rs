//! Initial labeled-seed sampling.
//!
//! Splits a training partition into the labeled seed and the unlabeled pool.
//! Sampling is reproducible: the same seed and data always give the same
//! split.

use crate::dataset::{Dataset, DatasetError, LabelKind};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while sampling the labeled seed
#[derive(Error, Debug)]
pub enum SamplingError {
    #[error("Invalid seed size: {0}")]
    InvalidSize(String),

    #[error("Dataset error: {0}")]
    Dataset(#[from] DatasetError),
}

/// How large the labeled seed is
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SeedSize {
    /// Share of the training partition, in `(0, 1)`; at least one example
    Fraction { fraction: f64 },
    /// Absolute number of examples
    Count { count: usize },
}

impl Default for SeedSize {
    fn default() -> Self {
        Self::Fraction { fraction: 0.05 }
    }
}

impl SeedSize {
    /// Number of seed examples for a partition of `len`
    ///
    /// # Errors
    ///
    /// Returns `InvalidSize` for a fraction outside `(0, 1)`, a zero count,
    /// or a count larger than the partition.
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn resolve(&self, len: usize) -> Result<usize, SamplingError> {
        match *self {
            Self::Fraction { fraction } => {
                if !(fraction > 0.0 && fraction < 1.0) {
                    return Err(SamplingError::InvalidSize(format!(
                        "fraction {fraction} outside (0, 1)"
                    )));
                }
                Ok(((fraction * len as f64).round() as usize).clamp(1, len.max(1)))
            }
            Self::Count { count } => {
                if count == 0 || count > len {
                    return Err(SamplingError::InvalidSize(format!(
                        "count {count} for a partition of {len}"
                    )));
                }
                Ok(count)
            }
        }
    }
}

/// Seeded random (optionally class-stratified) seed sampler
#[derive(Debug, Clone, PartialEq)]
pub struct SeedSampler {
    size: SeedSize,
    stratified: bool,
    seed: u64,
}

impl Default for SeedSampler {
    fn default() -> Self {
        Self::new(SeedSize::default(), false, 42)
    }
}

impl SeedSampler {
    /// Create a sampler
    #[must_use]
    pub const fn new(size: SeedSize, stratified: bool, seed: u64) -> Self {
        Self {
            size,
            stratified,
            seed,
        }
    }

    /// Same sampler with another RNG seed
    #[must_use]
    pub fn with_seed(&self, seed: u64) -> Self {
        Self {
            seed,
            ..self.clone()
        }
    }

    /// Split `train` into `(labeled, unlabeled)`, both in original order
    ///
    /// Stratification applies to single-label data; multi-label data is
    /// always sampled uniformly.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSize` if the seed size does not fit the partition.
    pub fn split(&self, train: &Dataset) -> Result<(Dataset, Dataset), SamplingError> {
        let k = self.size.resolve(train.len())?;
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);

        let mut chosen = if self.stratified && train.schema().kind == LabelKind::SingleLabel {
            stratified_pick(train, k, &mut rng)
        } else {
            let mut order: Vec<usize> = (0..train.len()).collect();
            order.shuffle(&mut rng);
            order.truncate(k);
            order
        };
        chosen.sort_unstable();

        let mut is_chosen = vec![false; train.len()];
        for &i in &chosen {
            is_chosen[i] = true;
        }
        let rest: Vec<usize> = (0..train.len()).filter(|&i| !is_chosen[i]).collect();

        Ok((train.subset(&chosen)?, train.subset(&rest)?))
    }
}

/// Allocate `k` picks across classes proportionally (largest remainder),
/// then draw each class's share from its shuffled members.
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
fn stratified_pick(train: &Dataset, k: usize, rng: &mut ChaCha8Rng) -> Vec<usize> {
    let num_classes = train.schema().num_labels();
    let mut members: Vec<Vec<usize>> = vec![Vec::new(); num_classes];
    for (i, example) in train.iter().enumerate() {
        if let Some(c) = example.class() {
            members[c].push(i);
        }
    }

    let n = train.len() as f64;
    let exact: Vec<f64> = members
        .iter()
        .map(|m| k as f64 * m.len() as f64 / n)
        .collect();
    let mut quota: Vec<usize> = exact.iter().map(|q| q.floor() as usize).collect();

    let mut by_remainder: Vec<usize> = (0..num_classes).collect();
    by_remainder.sort_by(|&a, &b| {
        let ra = exact[a] - exact[a].floor();
        let rb = exact[b] - exact[b].floor();
        rb.partial_cmp(&ra)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.cmp(&b))
    });
    let mut missing = k.saturating_sub(quota.iter().sum());
    for c in by_remainder.iter().cycle().take(num_classes * 2) {
        if missing == 0 {
            break;
        }
        if quota[*c] < members[*c].len() {
            quota[*c] += 1;
            missing -= 1;
        }
    }

    let mut chosen = Vec::with_capacity(k);
    for (class_members, q) in members.iter_mut().zip(quota) {
        class_members.shuffle(rng);
        chosen.extend(class_members.iter().take(q));
    }
    chosen
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::dataset::{Example, Schema};

    fn imbalanced() -> Dataset {
        let schema = Schema::single_label(1, vec!["major".to_string(), "minor".to_string()]);
        let examples = (0..40)
            .map(|i| Example::single(vec![f64::from(i)], usize::from(i % 4 == 0)))
            .collect();
        Dataset::from_examples(schema, examples).unwrap()
    }

    #[test]
    fn test_seed_size_resolve() {
        assert_eq!(SeedSize::Fraction { fraction: 0.1 }.resolve(40).unwrap(), 4);
        assert_eq!(SeedSize::Fraction { fraction: 0.01 }.resolve(40).unwrap(), 1);
        assert_eq!(SeedSize::Count { count: 7 }.resolve(40).unwrap(), 7);
        assert!(SeedSize::Count { count: 41 }.resolve(40).is_err());
        assert!(SeedSize::Count { count: 0 }.resolve(40).is_err());
        assert!(SeedSize::Fraction { fraction: 1.0 }.resolve(40).is_err());
    }

    #[test]
    fn test_split_partitions_everything() {
        let data = imbalanced();
        let sampler = SeedSampler::new(SeedSize::Count { count: 8 }, false, 3);
        let (labeled, unlabeled) = sampler.split(&data).unwrap();

        assert_eq!(labeled.len(), 8);
        assert_eq!(unlabeled.len(), 32);

        let mut all: Vec<i64> = labeled
            .iter()
            .chain(unlabeled.iter())
            .map(|e| e.features[0] as i64)
            .collect();
        all.sort_unstable();
        assert_eq!(all, (0..40).collect::<Vec<i64>>());
    }

    #[test]
    fn test_split_is_reproducible() {
        let data = imbalanced();
        let sampler = SeedSampler::new(SeedSize::Fraction { fraction: 0.2 }, false, 9);
        let (a, _) = sampler.split(&data).unwrap();
        let (b, _) = sampler.split(&data).unwrap();
        assert_eq!(a, b);

        let (c, _) = sampler.with_seed(10).split(&data).unwrap();
        assert_eq!(c.len(), a.len());
    }

    #[test]
    fn test_stratified_keeps_proportions() {
        let data = imbalanced();
        let sampler = SeedSampler::new(SeedSize::Count { count: 8 }, true, 5);
        let (labeled, _) = sampler.split(&data).unwrap();

        let minor = labeled.iter().filter(|e| e.class() == Some(1)).count();
        assert_eq!(labeled.len(), 8);
        assert_eq!(minor, 2);
    }

    #[test]
    fn test_stratified_remainder_goes_to_largest_fraction() {
        let data = imbalanced();
        // 10 major-to-minor 3:1 -> exact 7.5 / 2.5 -> floor 7 / 2, one left;
        // equal remainders break toward the lower class index
        let sampler = SeedSampler::new(SeedSize::Count { count: 10 }, true, 5);
        let (labeled, _) = sampler.split(&data).unwrap();
        let minor = labeled.iter().filter(|e| e.class() == Some(1)).count();
        assert_eq!(labeled.len(), 10);
        assert_eq!(minor, 2);
    }
}
