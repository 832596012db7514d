//! One selection-and-labeling round.
//!
//! A [`Scenario`] wires a query strategy, a batch selector and an oracle
//! together and enforces the round's call order: select, then label, then
//! update. It does no scoring of its own.
//!
//! Classifier failures during training, scoring or evaluation are logged here
//! and reported as a skipped step (`Ok(None)` / `Ok(false)`); every other
//! failure is an invariant violation and is returned as an error.

use crate::batch::BatchSelector;
use crate::dataset::Pools;
use crate::evaluation::Evaluation;
use crate::oracle::{Oracle, OracleError};
use crate::strategy::{QueryStrategy, StrategyError};
use std::fmt;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors raised by a scenario
#[derive(Error, Debug)]
pub enum ScenarioError {
    #[error("Scenario is missing its {0}")]
    MissingCollaborator(&'static str),

    #[error("Cannot {attempted} while the round is {phase}")]
    OutOfOrder {
        attempted: &'static str,
        phase: RoundPhase,
    },

    #[error("Strategy error: {0}")]
    Strategy(#[from] StrategyError),

    #[error("Oracle error: {0}")]
    Oracle(#[from] OracleError),
}

/// Where the current round stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundPhase {
    /// No selection pending
    Idle,
    /// Instances selected, waiting for labels
    Selected,
    /// Instances labeled, waiting for the pool update
    Labeled,
}

impl fmt::Display for RoundPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Selected => write!(f, "awaiting labels"),
            Self::Labeled => write!(f, "awaiting pool update"),
        }
    }
}

/// Query strategy, batch selector and oracle composed into one round
#[derive(Debug, Clone)]
pub struct Scenario {
    strategy: Box<dyn QueryStrategy>,
    selector: BatchSelector,
    oracle: Box<dyn Oracle>,
    selected: Vec<usize>,
    phase: RoundPhase,
}

impl Scenario {
    /// Start building a scenario
    #[must_use]
    pub fn builder() -> ScenarioBuilder {
        ScenarioBuilder::default()
    }

    /// The query strategy
    #[must_use]
    pub fn strategy(&self) -> &dyn QueryStrategy {
        self.strategy.as_ref()
    }

    /// The batch selector
    #[must_use]
    pub const fn selector(&self) -> &BatchSelector {
        &self.selector
    }

    /// The oracle
    #[must_use]
    pub fn oracle(&self) -> &dyn Oracle {
        self.oracle.as_ref()
    }

    /// Current round phase
    #[must_use]
    pub const fn phase(&self) -> RoundPhase {
        self.phase
    }

    /// Positions selected in the current round
    #[must_use]
    pub fn selected(&self) -> &[usize] {
        &self.selected
    }

    /// Train the strategy's classifier. Returns `false` if the classifier
    /// failed and the failure was logged.
    ///
    /// # Errors
    ///
    /// Returns non-classifier strategy errors.
    pub fn train(&mut self, pools: &Pools) -> Result<bool, ScenarioError> {
        Ok(absorb(self.strategy.train(pools), "training")?.is_some())
    }

    /// Score the unlabeled pool and select a batch. Returns `None` if the
    /// classifier failed while scoring; the round then stays idle.
    ///
    /// # Errors
    ///
    /// Returns `OutOfOrder` unless the round is idle, and batch-size or
    /// other invariant violations.
    pub fn select_instances(
        &mut self,
        pools: &Pools,
        iteration: usize,
    ) -> Result<Option<&[usize]>, ScenarioError> {
        self.expect_phase(RoundPhase::Idle, "select instances")?;

        let Some(utilities) = absorb(self.strategy.score_unlabeled(pools), "selection")? else {
            return Ok(None);
        };
        let selected = self
            .selector
            .select(&utilities, self.strategy.maximal(), iteration)?;
        debug!(iteration, ?selected, "Selected instances");

        self.selected = selected;
        self.phase = RoundPhase::Selected;
        Ok(Some(&self.selected))
    }

    /// Ask the oracle to label the selected instances
    ///
    /// # Errors
    ///
    /// Returns `OutOfOrder` unless instances are selected, or the oracle's
    /// error.
    pub fn label_instances(&mut self, pools: &mut Pools) -> Result<(), ScenarioError> {
        self.expect_phase(RoundPhase::Selected, "label instances")?;
        self.oracle.label(&self.selected, &mut pools.unlabeled)?;
        self.phase = RoundPhase::Labeled;
        Ok(())
    }

    /// Move the labeled selection into the labeled pool and clear it
    ///
    /// # Errors
    ///
    /// Returns `OutOfOrder` unless the selection is labeled, or the
    /// strategy's pool-update error.
    pub fn update_labeled_data(&mut self, pools: &mut Pools) -> Result<(), ScenarioError> {
        self.expect_phase(RoundPhase::Labeled, "update labeled data")?;
        let selected = std::mem::take(&mut self.selected);
        self.phase = RoundPhase::Idle;
        self.strategy.update_pools(pools, &selected)?;
        Ok(())
    }

    /// Evaluate the current model. Returns `None` if the classifier failed.
    ///
    /// # Errors
    ///
    /// Returns non-classifier strategy errors.
    pub fn evaluate(
        &self,
        pools: &Pools,
        iteration: usize,
    ) -> Result<Option<Evaluation>, ScenarioError> {
        absorb(self.strategy.evaluate(pools, iteration), "test")
    }

    fn expect_phase(
        &self,
        expected: RoundPhase,
        attempted: &'static str,
    ) -> Result<(), ScenarioError> {
        if self.phase == expected {
            Ok(())
        } else {
            Err(ScenarioError::OutOfOrder {
                attempted,
                phase: self.phase,
            })
        }
    }
}

/// Log classifier failures and turn them into a skipped step
fn absorb<T>(result: Result<T, StrategyError>, step: &'static str) -> Result<Option<T>, ScenarioError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(StrategyError::Classifier(e)) => {
            warn!(step, error = %e, "Classifier step failed, skipping");
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

/// Builder checking that every collaborator is present
#[derive(Debug, Default)]
pub struct ScenarioBuilder {
    strategy: Option<Box<dyn QueryStrategy>>,
    selector: Option<BatchSelector>,
    oracle: Option<Box<dyn Oracle>>,
}

impl ScenarioBuilder {
    /// Set the query strategy
    #[must_use]
    pub fn strategy(mut self, strategy: Box<dyn QueryStrategy>) -> Self {
        self.strategy = Some(strategy);
        self
    }

    /// Set the batch selector
    #[must_use]
    pub fn selector(mut self, selector: BatchSelector) -> Self {
        self.selector = Some(selector);
        self
    }

    /// Set the oracle
    #[must_use]
    pub fn oracle(mut self, oracle: Box<dyn Oracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    /// Assemble the scenario
    ///
    /// # Errors
    ///
    /// Returns `MissingCollaborator` naming the first absent piece.
    pub fn build(self) -> Result<Scenario, ScenarioError> {
        Ok(Scenario {
            strategy: self
                .strategy
                .ok_or(ScenarioError::MissingCollaborator("query strategy"))?,
            selector: self
                .selector
                .ok_or(ScenarioError::MissingCollaborator("batch selector"))?,
            oracle: self
                .oracle
                .ok_or(ScenarioError::MissingCollaborator("oracle"))?,
            selected: Vec::new(),
            phase: RoundPhase::Idle,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::classifier::NearestCentroid;
    use crate::oracle::SimulatedOracle;
    use crate::strategy::tests::line_pools;
    use crate::strategy::UncertaintySampling;

    fn scenario(batch: usize) -> Scenario {
        Scenario::builder()
            .strategy(Box::new(UncertaintySampling::margin(Box::new(
                NearestCentroid::new(),
            ))))
            .selector(BatchSelector::fixed(batch))
            .oracle(Box::new(SimulatedOracle::new()))
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder_reports_missing_collaborator() {
        let err = Scenario::builder()
            .selector(BatchSelector::fixed(1))
            .oracle(Box::new(SimulatedOracle::new()))
            .build()
            .unwrap_err();
        assert!(matches!(err, ScenarioError::MissingCollaborator("query strategy")));

        let err = Scenario::builder()
            .strategy(Box::new(UncertaintySampling::margin(Box::new(
                NearestCentroid::new(),
            ))))
            .selector(BatchSelector::fixed(1))
            .build()
            .unwrap_err();
        assert!(matches!(err, ScenarioError::MissingCollaborator("oracle")));
    }

    #[test]
    fn test_full_round() {
        let mut pools = line_pools();
        let mut scenario = scenario(2);

        assert!(scenario.train(&pools).unwrap());
        let selected = scenario.select_instances(&pools, 1).unwrap().unwrap().to_vec();
        assert_eq!(selected.len(), 2);
        assert_eq!(scenario.phase(), RoundPhase::Selected);

        scenario.label_instances(&mut pools).unwrap();
        scenario.update_labeled_data(&mut pools).unwrap();

        assert_eq!(scenario.phase(), RoundPhase::Idle);
        assert!(scenario.selected().is_empty());
        assert_eq!(pools.labeled.len(), 4);
        assert_eq!(pools.unlabeled.len(), 3);
    }

    #[test]
    fn test_label_before_select_is_out_of_order() {
        let mut pools = line_pools();
        let mut scenario = scenario(1);
        let err = scenario.label_instances(&mut pools).unwrap_err();
        assert!(matches!(
            err,
            ScenarioError::OutOfOrder {
                phase: RoundPhase::Idle,
                ..
            }
        ));
    }

    #[test]
    fn test_update_before_label_is_out_of_order() {
        let mut pools = line_pools();
        let mut scenario = scenario(1);
        scenario.train(&pools).unwrap();
        scenario.select_instances(&pools, 1).unwrap();

        let err = scenario.update_labeled_data(&mut pools).unwrap_err();
        assert!(matches!(
            err,
            ScenarioError::OutOfOrder {
                phase: RoundPhase::Selected,
                ..
            }
        ));
        assert_eq!(pools.unlabeled.len(), 5);
    }

    #[test]
    fn test_double_select_is_out_of_order() {
        let pools = line_pools();
        let mut scenario = scenario(1);
        scenario.train(&pools).unwrap();
        scenario.select_instances(&pools, 1).unwrap();
        assert!(scenario.select_instances(&pools, 1).is_err());
    }

    #[test]
    fn test_untrained_classifier_is_absorbed() {
        let pools = line_pools();
        let mut scenario = scenario(1);

        assert!(scenario.select_instances(&pools, 1).unwrap().is_none());
        assert_eq!(scenario.phase(), RoundPhase::Idle);
        assert!(scenario.evaluate(&pools, 1).unwrap().is_none());
    }

    #[test]
    fn test_oversized_batch_is_fatal() {
        let pools = line_pools();
        let mut scenario = scenario(9);
        scenario.train(&pools).unwrap();
        let err = scenario.select_instances(&pools, 1).unwrap_err();
        assert!(matches!(
            err,
            ScenarioError::Strategy(StrategyError::BatchExceedsPool { .. })
        ));
    }

    #[test]
    fn test_failed_training_is_absorbed() {
        let mut pools = line_pools();
        pools.labeled = crate::dataset::Dataset::new(pools.schema().clone());
        let mut scenario = scenario(1);
        assert!(!scenario.train(&pools).unwrap());
    }
}
