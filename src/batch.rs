//! Batch selection: turn a utility vector into the positions to query.

use crate::strategy::StrategyError;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// How many examples to query per iteration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum BatchSize {
    /// Exactly `size`; exceeding the pool is an error
    Fixed { size: usize },
    /// `size`, or the whole pool when fewer examples remain
    Clamped { size: usize },
    /// `ceil(fraction * remaining)`, at least one
    Fraction { fraction: f64 },
    /// `sizes[iteration - 1]`, the last entry repeating; strict like `Fixed`
    Schedule { sizes: Vec<usize> },
}

impl Default for BatchSize {
    fn default() -> Self {
        Self::Fixed { size: 1 }
    }
}

impl BatchSize {
    /// Resolve the batch size for a 1-based `iteration` with `available`
    /// unlabeled examples
    ///
    /// # Errors
    ///
    /// Returns `Config` for a non-positive size or fraction outside
    /// `(0, 1]`, and `BatchExceedsPool` when a strict size does not fit.
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn resolve(&self, iteration: usize, available: usize) -> Result<usize, StrategyError> {
        let strict = |size: usize| {
            if size == 0 {
                Err(StrategyError::Config("batch size must be positive".to_string()))
            } else if size > available {
                Err(StrategyError::BatchExceedsPool {
                    requested: size,
                    available,
                })
            } else {
                Ok(size)
            }
        };

        match self {
            Self::Fixed { size } => strict(*size),
            Self::Clamped { size } => {
                if *size == 0 {
                    return Err(StrategyError::Config(
                        "batch size must be positive".to_string(),
                    ));
                }
                Ok((*size).min(available))
            }
            Self::Fraction { fraction } => {
                if !(*fraction > 0.0 && *fraction <= 1.0) {
                    return Err(StrategyError::Config(format!(
                        "batch fraction {fraction} outside (0, 1]"
                    )));
                }
                let size = (fraction * available as f64).ceil() as usize;
                Ok(size.clamp(1, available.max(1)).min(available))
            }
            Self::Schedule { sizes } => {
                let last = sizes.len().checked_sub(1).ok_or_else(|| {
                    StrategyError::Config("batch schedule is empty".to_string())
                })?;
                strict(sizes[iteration.saturating_sub(1).min(last)])
            }
        }
    }
}

/// Picks the top (or bottom) utilities with ties broken by pool position
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchSelector {
    size: BatchSize,
}

impl BatchSelector {
    /// Create a selector
    #[must_use]
    pub const fn new(size: BatchSize) -> Self {
        Self { size }
    }

    /// Selector with a fixed batch size
    #[must_use]
    pub const fn fixed(size: usize) -> Self {
        Self::new(BatchSize::Fixed { size })
    }

    /// Configured batch size
    #[must_use]
    pub const fn size(&self) -> &BatchSize {
        &self.size
    }

    /// Positions of the most informative examples, best first.
    ///
    /// NaN utilities rank last regardless of orientation.
    ///
    /// # Errors
    ///
    /// Returns an error if the batch size cannot be resolved for this pool.
    pub fn select(
        &self,
        utilities: &[f64],
        maximal: bool,
        iteration: usize,
    ) -> Result<Vec<usize>, StrategyError> {
        let k = self.size.resolve(iteration, utilities.len())?;

        let mut order: Vec<usize> = (0..utilities.len()).collect();
        order.sort_by(|&a, &b| rank(utilities[a], utilities[b], maximal).then(a.cmp(&b)));
        order.truncate(k);
        Ok(order)
    }
}

fn rank(a: f64, b: f64, maximal: bool) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => {
            let ord = a.partial_cmp(&b).unwrap_or(Ordering::Equal);
            if maximal {
                ord.reverse()
            } else {
                ord
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_select_maximal() {
        let selector = BatchSelector::fixed(2);
        let picked = selector.select(&[0.1, 0.9, 0.5, 0.7], true, 1).unwrap();
        assert_eq!(picked, vec![1, 3]);
    }

    #[test]
    fn test_select_minimal() {
        let selector = BatchSelector::fixed(2);
        let picked = selector.select(&[0.1, 0.9, 0.05, 0.7], false, 1).unwrap();
        assert_eq!(picked, vec![2, 0]);
    }

    #[test]
    fn test_ties_broken_by_position() {
        let selector = BatchSelector::fixed(3);
        let picked = selector.select(&[0.5, 0.5, 0.9, 0.5], true, 1).unwrap();
        assert_eq!(picked, vec![2, 0, 1]);
    }

    #[test]
    fn test_nan_ranks_last() {
        let selector = BatchSelector::fixed(2);
        let picked = selector.select(&[f64::NAN, 0.2, 0.1], false, 1).unwrap();
        assert_eq!(picked, vec![2, 1]);
        let picked = selector.select(&[f64::NAN, 0.2, 0.1], true, 1).unwrap();
        assert_eq!(picked, vec![1, 2]);
    }

    #[test]
    fn test_fixed_exceeding_pool_fails() {
        let selector = BatchSelector::fixed(5);
        let err = selector.select(&[0.1, 0.2], true, 1).unwrap_err();
        assert!(matches!(
            err,
            StrategyError::BatchExceedsPool {
                requested: 5,
                available: 2
            }
        ));
    }

    #[test]
    fn test_zero_size_rejected() {
        assert!(BatchSize::Fixed { size: 0 }.resolve(1, 10).is_err());
        assert!(BatchSize::Clamped { size: 0 }.resolve(1, 10).is_err());
    }

    #[test]
    fn test_clamped() {
        assert_eq!(BatchSize::Clamped { size: 5 }.resolve(1, 3).unwrap(), 3);
        assert_eq!(BatchSize::Clamped { size: 2 }.resolve(1, 3).unwrap(), 2);
    }

    #[test]
    fn test_fraction() {
        let size = BatchSize::Fraction { fraction: 0.25 };
        assert_eq!(size.resolve(1, 10).unwrap(), 3);
        assert_eq!(size.resolve(1, 1).unwrap(), 1);
        assert!(BatchSize::Fraction { fraction: 1.5 }.resolve(1, 10).is_err());
        assert!(BatchSize::Fraction { fraction: 0.0 }.resolve(1, 10).is_err());
    }

    #[test]
    fn test_schedule_repeats_last() {
        let size = BatchSize::Schedule {
            sizes: vec![1, 2, 4],
        };
        assert_eq!(size.resolve(1, 10).unwrap(), 1);
        assert_eq!(size.resolve(3, 10).unwrap(), 4);
        assert_eq!(size.resolve(9, 10).unwrap(), 4);
        assert!(size.resolve(9, 3).is_err());
        assert!(BatchSize::Schedule { sizes: vec![] }.resolve(1, 3).is_err());
    }

    #[test]
    fn test_batch_size_yaml() {
        let size: BatchSize = serde_yaml::from_str("mode: clamped\nsize: 4\n").unwrap();
        assert_eq!(size, BatchSize::Clamped { size: 4 });
    }

    proptest! {
        #[test]
        fn prop_selection_unique_and_in_bounds(
            utilities in proptest::collection::vec(-10.0f64..10.0, 1..60),
            k in 1usize..20,
            maximal in any::<bool>(),
        ) {
            let selector = BatchSelector::new(BatchSize::Clamped { size: k });
            let picked = selector.select(&utilities, maximal, 1).unwrap();

            prop_assert_eq!(picked.len(), k.min(utilities.len()));
            let mut seen = std::collections::HashSet::new();
            for &i in &picked {
                prop_assert!(i < utilities.len());
                prop_assert!(seen.insert(i));
            }

            // Nothing left behind is strictly better than anything picked
            for i in (0..utilities.len()).filter(|i| !seen.contains(i)) {
                for &p in &picked {
                    if maximal {
                        prop_assert!(utilities[i] <= utilities[p]);
                    } else {
                        prop_assert!(utilities[i] >= utilities[p]);
                    }
                }
            }
        }
    }
}
