//! Density-weighted decorator over any query strategy.
//!
//! The wrapped strategy's utility is first brought to a minimal orientation
//! (inverted when the sub-strategy prefers large values) and then multiplied
//! by the example's mean distance to the rest of the unlabeled pool raised
//! to `beta`. Small results are preferred: uncertain examples sitting in
//! dense regions come first.

use crate::classifier::Classifier;
use crate::dataset::Pools;
use crate::evaluation::Evaluation;
use crate::similarity::{DistanceFunction, SimilarityCache};
use crate::strategy::{QueryStrategy, StrategyError};
use tracing::debug;

/// Density-diversity decorator
#[derive(Debug)]
pub struct DensityDiversity {
    inner: Box<dyn QueryStrategy>,
    beta: f64,
    function: DistanceFunction,
    on_disk: bool,
    cache: Option<SimilarityCache>,
}

impl DensityDiversity {
    /// Wrap `inner` with density exponent 1 and Euclidean distance
    #[must_use]
    pub fn new(inner: Box<dyn QueryStrategy>) -> Self {
        Self {
            inner,
            beta: 1.0,
            function: DistanceFunction::Euclidean,
            on_disk: false,
            cache: None,
        }
    }

    /// Set the exponent applied to the density term
    #[must_use]
    pub const fn with_beta(mut self, beta: f64) -> Self {
        self.beta = beta;
        self
    }

    /// Set the distance function
    #[must_use]
    pub const fn with_distance(mut self, function: DistanceFunction) -> Self {
        self.function = function;
        self
    }

    /// Keep the distance matrix in a temporary file
    #[must_use]
    pub const fn on_disk(mut self, on_disk: bool) -> Self {
        self.on_disk = on_disk;
        self
    }

    /// The wrapped strategy
    #[must_use]
    pub fn inner(&self) -> &dyn QueryStrategy {
        self.inner.as_ref()
    }

    /// Whether the similarity cache has been built
    #[must_use]
    pub const fn has_cache(&self) -> bool {
        self.cache.is_some()
    }

    fn ensure_cache(&mut self, pools: &Pools) -> Result<&SimilarityCache, StrategyError> {
        let stale = self
            .cache
            .as_ref()
            .map_or(true, |c| c.len() != pools.unlabeled.len());
        if stale {
            debug!(
                pool = pools.unlabeled.len(),
                on_disk = self.on_disk,
                "Building similarity cache"
            );
            self.cache = Some(SimilarityCache::build(
                &pools.unlabeled,
                self.function,
                self.on_disk,
            )?);
        }
        self.cache
            .as_ref()
            .ok_or_else(|| StrategyError::Config("similarity cache unavailable".to_string()))
    }
}

impl Clone for DensityDiversity {
    /// The copy starts without a cache and rebuilds it on first scoring.
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            beta: self.beta,
            function: self.function,
            on_disk: self.on_disk,
            cache: None,
        }
    }
}

#[allow(clippy::cast_precision_loss)]
impl QueryStrategy for DensityDiversity {
    fn name(&self) -> &'static str {
        "density_diversity"
    }

    fn maximal(&self) -> bool {
        false
    }

    fn classifier(&self) -> &dyn Classifier {
        self.inner.classifier()
    }

    fn classifier_mut(&mut self) -> &mut dyn Classifier {
        self.inner.classifier_mut()
    }

    fn train(&mut self, pools: &Pools) -> Result<(), StrategyError> {
        self.inner.train(pools)
    }

    fn utility(&mut self, pools: &Pools, index: usize) -> Result<f64, StrategyError> {
        let mut informativeness = self.inner.utility(pools, index)?;
        if informativeness == 0.0 {
            return Ok(0.0);
        }
        if self.inner.maximal() {
            informativeness = 1.0 / informativeness;
        }

        let size = pools.unlabeled.len() as f64;
        let beta = self.beta;
        let cache = self.ensure_cache(pools)?;
        let density = (cache.accumulated(index)? / size).powf(beta);

        Ok(informativeness * density)
    }

    fn score_unlabeled(&mut self, pools: &Pools) -> Result<Vec<f64>, StrategyError> {
        self.ensure_cache(pools)?;
        (0..pools.unlabeled.len())
            .map(|i| self.utility(pools, i))
            .collect()
    }

    fn evaluate(&self, pools: &Pools, iteration: usize) -> Result<Evaluation, StrategyError> {
        self.inner.evaluate(pools, iteration)
    }

    fn update_pools(&mut self, pools: &mut Pools, selected: &[usize]) -> Result<(), StrategyError> {
        if let Some(cache) = self.cache.as_mut() {
            cache.remove(selected)?;
        }
        self.inner.update_pools(pools, selected)
    }

    fn clone_box(&self) -> Box<dyn QueryStrategy> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::classifier::NearestCentroid;
    use crate::strategy::tests::line_pools;
    use crate::strategy::UncertaintySampling;
    use crate::strategy::UncertaintyMeasure;

    fn margin() -> Box<dyn QueryStrategy> {
        Box::new(UncertaintySampling::margin(Box::new(NearestCentroid::new())))
    }

    #[test]
    fn test_is_minimal() {
        assert!(!DensityDiversity::new(margin()).maximal());
    }

    #[test]
    fn test_cache_built_lazily() {
        let pools = line_pools();
        let mut strategy = DensityDiversity::new(margin());
        strategy.train(&pools).unwrap();
        assert!(!strategy.has_cache());

        strategy.score_unlabeled(&pools).unwrap();
        assert!(strategy.has_cache());
    }

    #[test]
    fn test_utility_multiplies_minimal_sub_utility_by_density() {
        let pools = line_pools();
        let mut inner = UncertaintySampling::margin(Box::new(NearestCentroid::new()));
        let mut strategy = DensityDiversity::new(margin()).with_beta(2.0);
        inner.train(&pools).unwrap();
        strategy.train(&pools).unwrap();

        let xs: Vec<f64> = pools.unlabeled.iter().map(|e| e.features[0]).collect();
        for i in 0..xs.len() {
            let sub = inner.utility(&pools, i).unwrap();
            let mean_distance = xs.iter().map(|x| (x - xs[i]).abs()).sum::<f64>() / 5.0;
            let expected = sub * mean_distance.powi(2);
            assert!((strategy.utility(&pools, i).unwrap() - expected).abs() < 1e-9);
        }
    }

    #[test]
    fn test_maximal_sub_utility_is_inverted() {
        let pools = line_pools();
        let entropy = || {
            Box::new(UncertaintySampling::new(
                UncertaintyMeasure::Entropy,
                Box::new(NearestCentroid::new()),
            ))
        };
        let mut inner = entropy();
        let mut strategy = DensityDiversity::new(entropy()).with_beta(0.0);
        inner.train(&pools).unwrap();
        strategy.train(&pools).unwrap();

        let sub = inner.utility(&pools, 0).unwrap();
        assert!((strategy.utility(&pools, 0).unwrap() - 1.0 / sub).abs() < 1e-9);
    }

    #[test]
    fn test_update_reindexes_cache_and_pools() {
        let mut pools = line_pools();
        let mut strategy = DensityDiversity::new(margin());
        strategy.train(&pools).unwrap();
        strategy.score_unlabeled(&pools).unwrap();

        strategy.update_pools(&mut pools, &[1, 3]).unwrap();
        assert_eq!(pools.unlabeled.len(), 3);
        assert_eq!(pools.labeled.len(), 4);

        // Survivors are 1.0, 9.0, 2.0
        let cache = strategy.cache.as_ref().unwrap();
        assert_eq!(cache.len(), 3);
        assert!((cache.accumulated(0).unwrap() - 9.0).abs() < 1e-9);
        assert!((cache.accumulated(1).unwrap() - 15.0).abs() < 1e-9);
    }

    #[test]
    fn test_on_disk_scores_match_memory() {
        let pools = line_pools();
        let mut memory = DensityDiversity::new(margin());
        let mut disk = DensityDiversity::new(margin()).on_disk(true);
        memory.train(&pools).unwrap();
        disk.train(&pools).unwrap();

        let a = memory.score_unlabeled(&pools).unwrap();
        let b = disk.score_unlabeled(&pools).unwrap();
        for (x, y) in a.iter().zip(&b) {
            assert!((x - y).abs() < 1e-12);
        }
    }

    #[test]
    fn test_clone_drops_cache() {
        let pools = line_pools();
        let mut strategy = DensityDiversity::new(margin());
        strategy.train(&pools).unwrap();
        strategy.score_unlabeled(&pools).unwrap();

        let copy = strategy.clone();
        assert!(!copy.has_cache());
        assert_eq!(copy.inner().name(), "margin");
    }
}
