//! # Active-Eval
//!
//! Pool-based active-learning experiment engine.
//!
//! A learner starts from a small labeled seed and a large unlabeled pool.
//! Each iteration it trains a classifier, lets a query strategy score the
//! unlabeled examples, asks an oracle to label the most useful batch, moves
//! that batch into the labeled pool and evaluates on a held-out test pool.
//! The record of those evaluations is a learning curve; the k-fold driver
//! runs one loop per fold in parallel and averages the curves.
//!
//! ## Architecture
//!
//! ```text
//! Experiment descriptor (YAML)
//!        ↓
//! Registry (tag → classifier / strategy / oracle / stop criterion)
//!        ↓
//! K-fold split + labeled seed per fold
//!        ↓
//! ActiveLearning loop per fold (rayon pool)
//!   train → select → evaluate → label → move
//!        ↓
//! Curve aggregation (per-position fold counts)
//!        ↓
//! Report (area under curve, fold statistics, Welch t-test)
//! ```

pub mod algorithm;
pub mod batch;
pub mod classifier;
pub mod config;
pub mod dataset;
pub mod density;
pub mod evaluation;
pub mod kfold;
pub mod metrics;
pub mod multilabel;
pub mod oracle;
pub mod registry;
pub mod report;
pub mod runner;
pub mod sampling;
pub mod scenario;
pub mod similarity;
pub mod stop;
pub mod strategy;

pub use algorithm::{
    ActiveLearning, AlgorithmConfig, AlgorithmError, AlgorithmListener, AlgorithmState, RunOutcome,
    RunStart, StopReason, TracingReporter,
};
pub use batch::{BatchSelector, BatchSize};
pub use classifier::{BinaryRelevanceCentroid, Classifier, ClassifierError, Committee, NearestCentroid};
pub use config::{
    AlgorithmSettings, ConfigError, DatasetSettings, EvaluationSettings, ExperimentConfig,
    ExperimentDefinition, ExperimentLoader, StatisticsSettings,
};
pub use dataset::{Dataset, DatasetError, Example, Label, LabelKind, Pools, Schema};
pub use density::DensityDiversity;
pub use evaluation::{higher_is_better, CurveError, Evaluation, LearningCurve};
pub use kfold::{
    CurveAggregator, ExperimentResult, FoldFailure, FoldResult, FoldSplit, KFold, KFoldError,
    KFoldEvaluation,
};
pub use metrics::{
    bootstrap_ci, compare_experiments, welch_t_test, FoldStatistics, SignificanceResult,
    StatConfig,
};
pub use multilabel::{BinMin, MeanMaxLoss};
pub use oracle::{InteractiveOracle, Oracle, OracleError, SimulatedOracle};
pub use registry::{ComponentSpec, Registry, RegistryError};
pub use report::{ExperimentReport, ReportBuilder, ReportMetadata, ReportSummary};
pub use runner::{
    BatchSummary, ExperimentOutcome, ExperimentRunner, OutputFormat, RunnerConfig, RunnerError,
};
pub use sampling::{SamplingError, SeedSampler, SeedSize};
pub use scenario::{RoundPhase, Scenario, ScenarioBuilder, ScenarioError};
pub use similarity::{DistanceFunction, SimilarityCache, SimilarityError};
pub use stop::{CombineMode, LabelBudget, MeasureTarget, PassiveLearningMeasure, RunView, StopCriterion};
pub use strategy::{QueryStrategy, StrategyError, UncertaintyMeasure, UncertaintySampling, VoteEntropy};
