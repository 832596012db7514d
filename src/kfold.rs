//! k-fold evaluation: many independent runs, one aggregated learning curve.
//!
//! The driver partitions the data into folds, carves a labeled seed from
//! each training split, runs a fresh copy of the loop per fold on a rayon
//! pool and averages the histories position by position.
//!
//! Folds may stop at different iterations. Each curve position is divided
//! by the number of folds that actually reached it, never by the total fold
//! count. The passive baseline is divided by the largest position count.

use crate::algorithm::{ActiveLearning, AlgorithmError, RunOutcome};
use crate::dataset::{Dataset, DatasetError, LabelKind, Pools};
use crate::evaluation::{CurveError, Evaluation, LearningCurve};
use crate::sampling::{SamplingError, SeedSampler};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Errors raised by the k-fold driver
#[derive(Error, Debug)]
pub enum KFoldError {
    #[error("Fold count must be at least 2, got {0}")]
    InvalidFolds(usize),

    #[error("{folds} folds requested for a dataset of {len} examples")]
    TooManyFolds { folds: usize, len: usize },

    #[error("Every fold failed ({0} failures)")]
    AllFoldsFailed(usize),

    #[error("Sampling error: {0}")]
    Sampling(#[from] SamplingError),

    #[error("Dataset error: {0}")]
    Dataset(#[from] DatasetError),

    #[error("Algorithm error: {0}")]
    Algorithm(#[from] AlgorithmError),

    #[error("Thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("Result persistence error: {0}")]
    Persist(#[from] CurveError),
}

/// Train and test positions of one fold
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoldSplit {
    /// Positions used for training (seed plus unlabeled pool)
    pub train: Vec<usize>,
    /// Held-out positions
    pub test: Vec<usize>,
}

/// Seeded k-fold partitioner
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KFold {
    folds: usize,
    stratified: bool,
    seed: u64,
}

impl KFold {
    /// Create a partitioner
    #[must_use]
    pub const fn new(folds: usize, stratified: bool, seed: u64) -> Self {
        Self {
            folds,
            stratified,
            seed,
        }
    }

    /// Number of folds
    #[must_use]
    pub const fn folds(&self) -> usize {
        self.folds
    }

    /// Fold assignment of every example
    ///
    /// # Errors
    ///
    /// Returns `InvalidFolds` below two folds and `TooManyFolds` when there
    /// are more folds than examples.
    pub fn assign(&self, data: &Dataset) -> Result<Vec<usize>, KFoldError> {
        if self.folds < 2 {
            return Err(KFoldError::InvalidFolds(self.folds));
        }
        if self.folds > data.len() {
            return Err(KFoldError::TooManyFolds {
                folds: self.folds,
                len: data.len(),
            });
        }

        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let mut order: Vec<usize> = (0..data.len()).collect();
        order.shuffle(&mut rng);

        Ok(match (self.stratified, data.schema().kind) {
            (false, _) => {
                let mut fold_of = vec![0; data.len()];
                for (p, &i) in order.iter().enumerate() {
                    fold_of[i] = p % self.folds;
                }
                fold_of
            }
            (true, LabelKind::SingleLabel) => self.assign_by_class(data, &order),
            (true, LabelKind::MultiLabel) => self.assign_by_rarest_label(data, &order),
        })
    }

    /// Shuffled members of each class are dealt round-robin, continuing the
    /// deal across classes so fold sizes differ by at most one.
    fn assign_by_class(&self, data: &Dataset, order: &[usize]) -> Vec<usize> {
        let mut by_class: Vec<Vec<usize>> = vec![Vec::new(); data.schema().num_labels()];
        let mut unlabeled = Vec::new();
        for &i in order {
            match data.get(i).and_then(crate::dataset::Example::class) {
                Some(c) if c < by_class.len() => by_class[c].push(i),
                _ => unlabeled.push(i),
            }
        }

        let mut fold_of = vec![0; data.len()];
        let mut deal = 0;
        for i in by_class.into_iter().flatten().chain(unlabeled) {
            fold_of[i] = deal % self.folds;
            deal += 1;
        }
        fold_of
    }

    /// Iterative stratification: examples carrying rare labels are placed
    /// first, each into the fold that still wants the most of its rarest
    /// label.
    #[allow(clippy::cast_precision_loss)]
    fn assign_by_rarest_label(&self, data: &Dataset, order: &[usize]) -> Vec<usize> {
        let k = self.folds;
        let num_labels = data.schema().num_labels();
        let labels_of = |i: usize| -> Vec<usize> {
            data.get(i)
                .and_then(|e| e.labels())
                .map(|l| (0..l.len()).filter(|&j| l[j]).collect())
                .unwrap_or_default()
        };

        let mut frequency = vec![0usize; num_labels];
        for i in 0..data.len() {
            for j in labels_of(i) {
                frequency[j] += 1;
            }
        }

        let mut wanted: Vec<Vec<f64>> = frequency
            .iter()
            .map(|&f| vec![f as f64 / k as f64; k])
            .collect();
        let mut capacity = vec![data.len() as f64 / k as f64; k];

        let rarest = |i: usize| {
            labels_of(i)
                .into_iter()
                .min_by_key(|&j| (frequency[j], j))
        };
        let mut queue: Vec<usize> = order.to_vec();
        queue.sort_by_key(|&i| rarest(i).map_or(usize::MAX, |j| frequency[j]));

        let mut fold_of = vec![0; data.len()];
        for i in queue {
            let best = (0..k)
                .max_by(|&a, &b| {
                    let want = |f: usize| rarest(i).map_or(0.0, |j| wanted[j][f]);
                    want(a)
                        .partial_cmp(&want(b))
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then(
                            capacity[a]
                                .partial_cmp(&capacity[b])
                                .unwrap_or(std::cmp::Ordering::Equal),
                        )
                        .then(b.cmp(&a))
                })
                .unwrap_or(0);

            fold_of[i] = best;
            capacity[best] -= 1.0;
            for j in labels_of(i) {
                wanted[j][best] -= 1.0;
            }
        }
        fold_of
    }

    /// Train/test positions per fold
    ///
    /// # Errors
    ///
    /// See [`KFold::assign`].
    pub fn split(&self, data: &Dataset) -> Result<Vec<FoldSplit>, KFoldError> {
        let fold_of = self.assign(data)?;
        Ok((0..self.folds)
            .map(|f| {
                let (test, train): (Vec<usize>, Vec<usize>) =
                    (0..data.len()).partition(|&i| fold_of[i] == f);
                FoldSplit { train, test }
            })
            .collect())
    }
}

/// Running sum of the records that reached one curve position
#[derive(Debug, Clone, Default)]
struct PositionSum {
    sum: Evaluation,
    records: usize,
    metric_counts: BTreeMap<String, usize>,
}

impl PositionSum {
    fn add(&mut self, record: &Evaluation) {
        self.sum.accumulate(record);
        for (name, value) in &record.metrics {
            if value.is_finite() {
                *self.metric_counts.entry(name.clone()).or_insert(0) += 1;
            }
        }
        self.records += 1;
    }

    /// Each metric over the records that defined it, pool sizes over all records
    fn mean(mut self) -> Evaluation {
        self.sum.divide_each(&self.metric_counts, self.records);
        self.sum
    }
}

/// Positional sums of fold histories
#[derive(Debug, Clone, Default)]
pub struct CurveAggregator {
    positions: Vec<PositionSum>,
    passive: Option<PositionSum>,
    runs: usize,
}

impl CurveAggregator {
    /// Create an empty aggregator
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one fold's history and baseline
    pub fn add(&mut self, history: &[Evaluation], passive: Option<&Evaluation>) {
        for (position, record) in history.iter().enumerate() {
            if position == self.positions.len() {
                self.positions.push(PositionSum {
                    sum: Evaluation::new(position + 1, 0, 0),
                    ..PositionSum::default()
                });
            }
            self.positions[position].add(record);
        }
        if let Some(passive) = passive {
            self.passive.get_or_insert_with(PositionSum::default).add(passive);
        }
        self.runs += 1;
    }

    /// Runs added so far
    #[must_use]
    pub const fn runs(&self) -> usize {
        self.runs
    }

    /// Folds that reached each curve position
    #[must_use]
    pub fn counts(&self) -> Vec<usize> {
        self.positions.iter().map(|p| p.records).collect()
    }

    /// Mean curve and mean baseline
    #[must_use]
    pub fn finish(self) -> (LearningCurve, Option<Evaluation>) {
        let records = self.positions.into_iter().map(PositionSum::mean).collect();
        (LearningCurve::new(records), self.passive.map(PositionSum::mean))
    }
}

/// A fold that ran to completion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoldResult {
    /// Fold index
    pub fold: usize,
    /// The fold's own curve, baseline and stop reason
    pub outcome: RunOutcome,
}

/// A fold that failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FoldFailure {
    /// Fold index
    pub fold: usize,
    /// Error message
    pub error: String,
}

/// Aggregated result of a k-fold (or hold-out) experiment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentResult {
    /// Mean learning curve
    pub curve: LearningCurve,
    /// Mean passive baseline
    pub passive: Option<Evaluation>,
    /// Folds requested
    pub folds_requested: usize,
    /// Per-fold results of the successful folds, in fold order
    pub folds: Vec<FoldResult>,
    /// Failed folds, in fold order
    pub failures: Vec<FoldFailure>,
}

impl ExperimentResult {
    /// Folds that contributed to the curve
    #[must_use]
    pub fn folds_contributed(&self) -> usize {
        self.folds.len()
    }

    /// Normalized area under each successful fold's curve for `metric`;
    /// folds without a defined area are skipped
    #[must_use]
    pub fn fold_areas(&self, metric: &str) -> Vec<f64> {
        self.folds
            .iter()
            .filter_map(|f| f.outcome.curve.area(metric))
            .collect()
    }

    /// Write as pretty JSON
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), CurveError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Read a result written by [`ExperimentResult::save`]
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, CurveError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// Runs one loop configuration over k folds
#[derive(Debug, Clone)]
pub struct KFoldEvaluation {
    kfold: KFold,
    sampler: SeedSampler,
    workers: usize,
}

impl KFoldEvaluation {
    /// Create a driver; `workers == 0` uses one thread per core
    #[must_use]
    pub const fn new(kfold: KFold, sampler: SeedSampler, workers: usize) -> Self {
        Self {
            kfold,
            sampler,
            workers,
        }
    }

    /// Partition `data`, run every fold and aggregate.
    ///
    /// `template` supplies the scenario, stop criteria, limits and
    /// listeners; it is never run itself. Its listeners receive a replay of
    /// the aggregated curve.
    ///
    /// # Errors
    ///
    /// Returns partitioning or sampling errors before any fold runs, and
    /// `AllFoldsFailed` if no fold contributed.
    pub fn run(
        &self,
        template: &ActiveLearning,
        data: &Dataset,
    ) -> Result<ExperimentResult, KFoldError> {
        let splits = self.kfold.split(data)?;
        info!(
            folds = splits.len(),
            examples = data.len(),
            workers = self.workers,
            "Starting k-fold evaluation"
        );

        let mut jobs = Vec::with_capacity(splits.len());
        for (fold, split) in splits.iter().enumerate() {
            let train = data.subset(&split.train)?;
            let test = data.subset(&split.test)?;
            jobs.push((fold, self.prepare(template, fold, &train, test)?));
        }

        self.execute(template, jobs)
    }

    /// Run a single fold on a fixed train/test split
    ///
    /// # Errors
    ///
    /// Returns sampling errors, or `AllFoldsFailed` if the run failed.
    pub fn run_holdout(
        &self,
        template: &ActiveLearning,
        train: &Dataset,
        test: &Dataset,
    ) -> Result<ExperimentResult, KFoldError> {
        info!(train = train.len(), test = test.len(), "Starting hold-out evaluation");
        let job = self.prepare(template, 0, train, test.clone())?;
        self.execute(template, vec![(0, job)])
    }

    fn prepare(
        &self,
        template: &ActiveLearning,
        fold: usize,
        train: &Dataset,
        test: Dataset,
    ) -> Result<ActiveLearning, KFoldError> {
        let sampler = self.sampler.with_seed(self.fold_seed(fold));
        let (labeled, unlabeled) = sampler.split(train)?;
        let pools = Pools::new(labeled, unlabeled, test)?;
        Ok(template.fresh_copy().with_pools(pools))
    }

    const fn fold_seed(&self, fold: usize) -> u64 {
        self.kfold.seed.wrapping_add(fold as u64)
    }

    fn execute(
        &self,
        template: &ActiveLearning,
        jobs: Vec<(usize, ActiveLearning)>,
    ) -> Result<ExperimentResult, KFoldError> {
        let folds_requested = jobs.len();
        let representative_pools = jobs.first().and_then(|(_, a)| a.pools().cloned());

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .build()?;
        let aggregator = Mutex::new(CurveAggregator::new());

        let outcomes: Vec<Result<FoldResult, FoldFailure>> = pool.install(|| {
            jobs.into_par_iter()
                .map(|(fold, mut algorithm)| -> Result<FoldResult, FoldFailure> {
                    let outcome = run_fold(&mut algorithm).map_err(|e| {
                        error!(fold, error = %e, "Fold failed");
                        FoldFailure {
                            fold,
                            error: e.to_string(),
                        }
                    })?;

                    let mut agg = aggregator
                        .lock()
                        .unwrap_or_else(std::sync::PoisonError::into_inner);
                    agg.add(&outcome.curve.records, outcome.passive.as_ref());
                    drop(agg);

                    debug!(fold, iterations = outcome.curve.len(), "Fold completed");
                    Ok(FoldResult { fold, outcome })
                })
                .collect()
        });

        let mut folds = Vec::new();
        let mut failures = Vec::new();
        for outcome in outcomes {
            match outcome {
                Ok(result) => folds.push(result),
                Err(failure) => failures.push(failure),
            }
        }

        if folds.is_empty() {
            return Err(KFoldError::AllFoldsFailed(failures.len()));
        }

        let aggregator = aggregator
            .into_inner()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let (curve, passive) = aggregator.finish();

        info!(
            contributed = folds.len(),
            failed = failures.len(),
            points = curve.len(),
            "k-fold evaluation finished"
        );

        let mut representative = template.clone();
        if let Some(pools) = representative_pools {
            if let Err(e) = representative.set_pools(pools) {
                warn!(error = %e, "Cannot attach pools to the replayed run");
            }
        }
        representative.replay(&curve.records, passive.as_ref());

        Ok(ExperimentResult {
            curve,
            passive,
            folds_requested,
            folds,
            failures,
        })
    }
}

/// Run one fold to completion and make sure its baseline is computed
fn run_fold(algorithm: &mut ActiveLearning) -> Result<RunOutcome, AlgorithmError> {
    algorithm.run()?;
    algorithm.passive_learning()?;
    Ok(algorithm.outcome())
}
