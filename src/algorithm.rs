//! The active-learning loop.
//!
//! An [`ActiveLearning`] run moves through `Created -> Running -> Finished`.
//! Each iteration performs, in order: train, score-and-select,
//! evaluate-on-test, label, update pools, check stop. The run finishes when
//! the iteration cap is reached, the unlabeled pool is exhausted, a stop
//! criterion fires, or classifier failures keep recurring.

use crate::dataset::Pools;
use crate::evaluation::{
    Evaluation, LearningCurve, ACCUMULATED_ITERATION_TIME, ITERATION_TIME, SELECTION_TIME,
    TEST_TIME, TRAINING_TIME,
};
use crate::scenario::{Scenario, ScenarioError};
use crate::stop::{RunView, StopCriterion};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors raised by the loop
#[derive(Error, Debug)]
pub enum AlgorithmError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Cannot {attempted} in state {state:?}")]
    InvalidState {
        attempted: &'static str,
        state: AlgorithmState,
    },

    #[error("Scenario error: {0}")]
    Scenario(#[from] ScenarioError),
}

/// Lifecycle of one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlgorithmState {
    /// Wired but not started
    Created,
    /// Iterating
    Running,
    /// Done; history is final
    Finished,
}

/// Why a run finished
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The iteration cap was reached
    MaxIterations,
    /// No unlabeled examples remain
    PoolExhausted,
    /// The named stop criterion fired
    Criterion(String),
    /// Classifier steps kept failing
    RepeatedFailures,
    /// A fatal error ended the run
    Aborted,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MaxIterations => write!(f, "iteration cap reached"),
            Self::PoolExhausted => write!(f, "unlabeled pool exhausted"),
            Self::Criterion(name) => write!(f, "stop criterion {name}"),
            Self::RepeatedFailures => write!(f, "repeated classifier failures"),
            Self::Aborted => write!(f, "aborted"),
        }
    }
}

/// Loop limits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlgorithmConfig {
    /// Iteration cap
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    /// Consecutive iterations with a failed classifier step that end the run
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: usize,
}

const fn default_max_iterations() -> usize {
    50
}

const fn default_max_consecutive_failures() -> usize {
    3
}

impl Default for AlgorithmConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_consecutive_failures: default_max_consecutive_failures(),
        }
    }
}

/// Pool sizes and collaborator names announced when a run starts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStart {
    /// Query strategy name
    pub strategy: String,
    /// Classifier name
    pub classifier: String,
    /// Labeled pool size
    pub labeled: usize,
    /// Unlabeled pool size
    pub unlabeled: usize,
    /// Test pool size
    pub test: usize,
}

/// Observer of a run's progress
pub trait AlgorithmListener: Send + fmt::Debug {
    /// The run entered `Running`
    fn started(&mut self, _start: &RunStart) {}

    /// An iteration appended `record` to the history
    fn iteration_completed(&mut self, _record: &Evaluation) {}

    /// The run finished
    fn finished(&mut self, _history: &[Evaluation], _passive: Option<&Evaluation>) {}

    /// Independent copy
    fn clone_box(&self) -> Box<dyn AlgorithmListener>;
}

impl Clone for Box<dyn AlgorithmListener> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// Listener that writes progress to the `tracing` log
#[derive(Debug, Clone, Default)]
pub struct TracingReporter {
    run: String,
}

impl TracingReporter {
    /// Reporter tagging every event with `run`
    #[must_use]
    pub fn new(run: impl Into<String>) -> Self {
        Self { run: run.into() }
    }
}

impl AlgorithmListener for TracingReporter {
    fn started(&mut self, start: &RunStart) {
        info!(
            run = %self.run,
            strategy = %start.strategy,
            classifier = %start.classifier,
            labeled = start.labeled,
            unlabeled = start.unlabeled,
            test = start.test,
            "Active learning started"
        );
    }

    fn iteration_completed(&mut self, record: &Evaluation) {
        info!(
            run = %self.run,
            iteration = record.iteration,
            labeled = record.labeled_size,
            unlabeled = record.unlabeled_size,
            metrics = ?record.metrics,
            "Iteration completed"
        );
    }

    fn finished(&mut self, history: &[Evaluation], passive: Option<&Evaluation>) {
        info!(
            run = %self.run,
            iterations = history.len(),
            passive = ?passive.map(|p| &p.metrics),
            "Active learning finished"
        );
    }

    fn clone_box(&self) -> Box<dyn AlgorithmListener> {
        Box::new(self.clone())
    }
}

/// Result of a finished run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOutcome {
    /// One record per iteration
    pub curve: LearningCurve,
    /// Passive-learning baseline, if computed
    pub passive: Option<Evaluation>,
    /// Why the run ended
    pub stop_reason: StopReason,
}

/// Elapsed milliseconds of `f`
fn timed<T>(f: impl FnOnce() -> T) -> (T, f64) {
    let start = Instant::now();
    let value = f();
    (value, start.elapsed().as_secs_f64() * 1000.0)
}

/// Pool-based active-learning loop
#[derive(Debug, Clone)]
pub struct ActiveLearning {
    scenario: Scenario,
    pools: Option<Pools>,
    stop_criteria: Vec<Box<dyn StopCriterion>>,
    listeners: Vec<Box<dyn AlgorithmListener>>,
    config: AlgorithmConfig,
    state: AlgorithmState,
    iteration: usize,
    history: Vec<Evaluation>,
    passive: Option<Evaluation>,
    accumulated_ms: f64,
    consecutive_failures: usize,
    stop_reason: Option<StopReason>,
}

impl ActiveLearning {
    /// Create a loop over a wired scenario with default limits
    #[must_use]
    pub fn new(scenario: Scenario) -> Self {
        Self::with_config(scenario, AlgorithmConfig::default())
    }

    /// Create a loop with explicit limits
    #[must_use]
    pub const fn with_config(scenario: Scenario, config: AlgorithmConfig) -> Self {
        Self {
            scenario,
            pools: None,
            stop_criteria: Vec::new(),
            listeners: Vec::new(),
            config,
            state: AlgorithmState::Created,
            iteration: 0,
            history: Vec::new(),
            passive: None,
            accumulated_ms: 0.0,
            consecutive_failures: 0,
            stop_reason: None,
        }
    }

    /// Attach the labeled, unlabeled and test pools
    #[must_use]
    pub fn with_pools(mut self, pools: Pools) -> Self {
        self.pools = Some(pools);
        self
    }

    /// Replace the pools of a run that has not started
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` once the run has started.
    pub fn set_pools(&mut self, pools: Pools) -> Result<(), AlgorithmError> {
        self.require(AlgorithmState::Created, "set pools")?;
        self.pools = Some(pools);
        self.passive = None;
        Ok(())
    }

    /// Register a stop criterion; criteria are checked in registration order
    #[must_use]
    pub fn with_stop_criterion(mut self, criterion: Box<dyn StopCriterion>) -> Self {
        self.stop_criteria.push(criterion);
        self
    }

    /// Register a listener
    #[must_use]
    pub fn with_listener(mut self, listener: Box<dyn AlgorithmListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Unstarted copy with the same collaborators and limits, no pools and
    /// no listeners
    #[must_use]
    pub fn fresh_copy(&self) -> Self {
        Self {
            scenario: self.scenario.clone(),
            pools: None,
            stop_criteria: self.stop_criteria.clone(),
            listeners: Vec::new(),
            config: self.config,
            state: AlgorithmState::Created,
            iteration: 0,
            history: Vec::new(),
            passive: None,
            accumulated_ms: 0.0,
            consecutive_failures: 0,
            stop_reason: None,
        }
    }

    /// Current lifecycle state
    #[must_use]
    pub const fn state(&self) -> AlgorithmState {
        self.state
    }

    /// Iterations completed
    #[must_use]
    pub const fn iteration(&self) -> usize {
        self.iteration
    }

    /// Evaluation history
    #[must_use]
    pub fn history(&self) -> &[Evaluation] {
        &self.history
    }

    /// Cached passive-learning baseline
    #[must_use]
    pub const fn passive_baseline(&self) -> Option<&Evaluation> {
        self.passive.as_ref()
    }

    /// Current pools
    #[must_use]
    pub const fn pools(&self) -> Option<&Pools> {
        self.pools.as_ref()
    }

    /// The scenario
    #[must_use]
    pub const fn scenario(&self) -> &Scenario {
        &self.scenario
    }

    /// Loop limits
    #[must_use]
    pub const fn config(&self) -> &AlgorithmConfig {
        &self.config
    }

    /// Why the run finished, once it has
    #[must_use]
    pub const fn stop_reason(&self) -> Option<&StopReason> {
        self.stop_reason.as_ref()
    }

    /// Enter `Running`
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` unless the run is `Created`, or `Config` when
    /// no pools are attached. A run whose unlabeled pool is already empty
    /// finishes right away with `PoolExhausted`.
    pub fn start(&mut self) -> Result<(), AlgorithmError> {
        self.require(AlgorithmState::Created, "start")?;
        let pools = self
            .pools
            .as_ref()
            .ok_or_else(|| AlgorithmError::Config("labeled/unlabeled/test pools not set".to_string()))?;

        let start = RunStart {
            strategy: self.scenario.strategy().name().to_string(),
            classifier: self.scenario.strategy().classifier().name().to_string(),
            labeled: pools.labeled.len(),
            unlabeled: pools.unlabeled.len(),
            test: pools.test.len(),
        };
        debug!(?start, "Entering running state");

        self.state = AlgorithmState::Running;
        for listener in &mut self.listeners {
            listener.started(&start);
        }
        if start.unlabeled == 0 {
            self.finish(StopReason::PoolExhausted);
        }
        Ok(())
    }

    /// Run one full iteration
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` unless the run is `Running`, or a fatal
    /// scenario error; the run is then `Finished`.
    pub fn iterate(&mut self) -> Result<(), AlgorithmError> {
        self.require(AlgorithmState::Running, "iterate")?;
        match self.step() {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(iteration = self.iteration, error = %e, "Run aborted");
                self.finish(StopReason::Aborted);
                Err(e)
            }
        }
    }

    fn step(&mut self) -> Result<(), AlgorithmError> {
        let Some(pools) = self.pools.as_mut() else {
            return Err(AlgorithmError::Config("pools detached while running".to_string()));
        };
        self.iteration += 1;
        let iteration = self.iteration;

        let (trained, training_ms) = timed(|| self.scenario.train(pools));
        let trained = trained?;

        let (selected, selection_ms) =
            timed(|| Ok::<_, ScenarioError>(self.scenario.select_instances(pools, iteration)?.is_some()));
        let selected = selected?;

        let (record, test_ms) = timed(|| self.scenario.evaluate(pools, iteration));
        let evaluated = record?;

        if selected {
            self.scenario.label_instances(pools)?;
            self.scenario.update_labeled_data(pools)?;
        }

        let iteration_ms = training_ms + selection_ms;
        self.accumulated_ms += iteration_ms;

        let tested = evaluated.is_some();
        let failed = !(trained && selected && tested);
        let mut record = evaluated.unwrap_or_else(|| {
            Evaluation::new(iteration, pools.labeled.len(), pools.unlabeled.len())
        });
        record.set_metric(TRAINING_TIME, training_ms);
        record.set_metric(SELECTION_TIME, selection_ms);
        record.set_metric(TEST_TIME, test_ms);
        record.set_metric(ITERATION_TIME, iteration_ms);
        record.set_metric(ACCUMULATED_ITERATION_TIME, self.accumulated_ms);

        if failed {
            self.consecutive_failures += 1;
            warn!(
                iteration,
                trained,
                selected,
                tested,
                consecutive = self.consecutive_failures,
                "Iteration completed with failed steps"
            );
        } else {
            self.consecutive_failures = 0;
        }

        for listener in &mut self.listeners {
            listener.iteration_completed(&record);
        }
        self.history.push(record);

        if let Some(reason) = self.check_stop() {
            self.finish(reason);
        }
        Ok(())
    }

    fn check_stop(&mut self) -> Option<StopReason> {
        if self.consecutive_failures >= self.config.max_consecutive_failures.max(1) {
            return Some(StopReason::RepeatedFailures);
        }
        if self.iteration >= self.config.max_iterations {
            return Some(StopReason::MaxIterations);
        }
        let (labeled, unlabeled) = self
            .pools
            .as_ref()
            .map_or((0, 0), |p| (p.labeled.len(), p.unlabeled.len()));
        if unlabeled == 0 {
            return Some(StopReason::PoolExhausted);
        }

        if self.stop_criteria.iter().any(|c| c.needs_passive_baseline()) {
            if let Err(e) = self.passive_learning() {
                warn!(error = %e, "Passive baseline unavailable");
            }
        }

        let view = RunView {
            iteration: self.iteration,
            history: &self.history,
            passive: self.passive.as_ref(),
            labeled,
            unlabeled,
        };
        self.stop_criteria
            .iter()
            .find(|c| c.should_stop(&view))
            .map(|c| StopReason::Criterion(c.name().to_string()))
    }

    fn finish(&mut self, reason: StopReason) {
        info!(iteration = self.iteration, reason = %reason, "Run finished");
        self.state = AlgorithmState::Finished;
        self.stop_reason = Some(reason);
        for listener in &mut self.listeners {
            listener.finished(&self.history, self.passive.as_ref());
        }
    }

    /// Start (if needed) and iterate until finished
    ///
    /// # Errors
    ///
    /// Returns configuration or fatal scenario errors.
    pub fn run(&mut self) -> Result<RunOutcome, AlgorithmError> {
        if self.state == AlgorithmState::Created {
            self.start()?;
        }
        while self.state == AlgorithmState::Running {
            self.iterate()?;
        }
        Ok(self.outcome())
    }

    /// Snapshot of the history, baseline and stop reason
    #[must_use]
    pub fn outcome(&self) -> RunOutcome {
        RunOutcome {
            curve: LearningCurve::new(self.history.clone()),
            passive: self.passive.clone(),
            stop_reason: self.stop_reason.clone().unwrap_or(StopReason::Aborted),
        }
    }

    /// Train a disposable copy of the classifier on labeled plus unlabeled
    /// data and evaluate it on the test pool. The result is cached; later
    /// calls return the cached record.
    ///
    /// Returns `Ok(None)` if the classifier failed (logged, not cached).
    ///
    /// # Errors
    ///
    /// Returns `Config` when no pools are attached.
    pub fn passive_learning(&mut self) -> Result<Option<&Evaluation>, AlgorithmError> {
        if self.passive.is_none() {
            let pools = self
                .pools
                .as_ref()
                .ok_or_else(|| AlgorithmError::Config("pools not set".to_string()))?;
            self.passive = compute_passive(&self.scenario, pools);
        }
        Ok(self.passive.as_ref())
    }

    /// Drive the listeners with an externally built curve instead of
    /// this run's own history
    pub fn replay(&mut self, curve: &[Evaluation], passive: Option<&Evaluation>) {
        let start = RunStart {
            strategy: self.scenario.strategy().name().to_string(),
            classifier: self.scenario.strategy().classifier().name().to_string(),
            labeled: curve.first().map_or(0, |r| r.labeled_size),
            unlabeled: curve.first().map_or(0, |r| r.unlabeled_size),
            test: self.pools.as_ref().map_or(0, |p| p.test.len()),
        };
        for listener in &mut self.listeners {
            listener.started(&start);
            for record in curve {
                listener.iteration_completed(record);
            }
            listener.finished(curve, passive);
        }
    }

    fn require(&self, state: AlgorithmState, attempted: &'static str) -> Result<(), AlgorithmError> {
        if self.state == state {
            Ok(())
        } else {
            Err(AlgorithmError::InvalidState {
                attempted,
                state: self.state,
            })
        }
    }
}

fn compute_passive(scenario: &Scenario, pools: &Pools) -> Option<Evaluation> {
    let mut classifier = scenario.strategy().classifier().clone_box();

    let mut union = pools.labeled.copy();
    if let Err(e) = union.concat(&pools.unlabeled) {
        warn!(error = %e, "Cannot build passive training set");
        return None;
    }

    let (trained, training_ms) = timed(|| classifier.train(&union));
    if let Err(e) = trained {
        warn!(error = %e, "Passive training failed");
        return None;
    }

    let (evaluated, test_ms) = timed(|| classifier.evaluate(&pools.test));
    let mut record = match evaluated {
        Ok(record) => record,
        Err(e) => {
            warn!(error = %e, "Passive evaluation failed");
            return None;
        }
    };

    record.iteration = 0;
    record.labeled_size = union.len();
    record.unlabeled_size = 0;
    record.set_metric(TRAINING_TIME, training_ms);
    record.set_metric(SELECTION_TIME, 0.0);
    record.set_metric(TEST_TIME, test_ms);
    record.set_metric(ITERATION_TIME, training_ms);
    record.set_metric(ACCUMULATED_ITERATION_TIME, training_ms);
    debug!(metrics = ?record.metrics, "Passive baseline computed");
    Some(record)
}
