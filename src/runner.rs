//! Experiment execution engine.
//!
//! Turns a descriptor into a wired [`ActiveLearning`] template, loads its
//! data, drives it through the k-fold (or hold-out) evaluation and builds
//! the report.

use crate::algorithm::{ActiveLearning, TracingReporter};
use crate::batch::BatchSelector;
use crate::config::{ConfigError, ExperimentConfig, ExperimentLoader};
use crate::dataset::{Dataset, DatasetError};
use crate::evaluation::{higher_is_better, CurveError};
use crate::kfold::{ExperimentResult, KFold, KFoldError, KFoldEvaluation};
use crate::metrics::StatConfig;
use crate::registry::{Registry, RegistryError};
use crate::report::{ExperimentReport, ReportBuilder};
use crate::sampling::SeedSampler;
use crate::scenario::{Scenario, ScenarioError};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;
use tracing::{error, info};

/// Errors that can occur while running an experiment
#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Wiring error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Dataset error: {0}")]
    Dataset(#[from] DatasetError),

    #[error("Scenario error: {0}")]
    Scenario(#[from] ScenarioError),

    #[error("Evaluation failed: {0}")]
    KFold(#[from] KFoldError),

    #[error("Failed to persist result: {0}")]
    Persist(#[from] CurveError),

    #[error("Failed to render report: {0}")]
    Render(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Report rendering
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    /// Pretty-printed JSON
    #[default]
    Json,
    /// Markdown with tables
    Markdown,
    /// Plain text
    Text,
}

impl OutputFormat {
    /// File extension of a rendered report
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Markdown => "md",
            Self::Text => "txt",
        }
    }

    /// Render `report` in this format
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn render(self, report: &ExperimentReport) -> Result<String, RunnerError> {
        Ok(match self {
            Self::Json => report.to_json()?,
            Self::Markdown => report.to_markdown(),
            Self::Text => report.to_text(),
        })
    }
}

/// Runner configuration
#[derive(Debug, Clone, Default)]
pub struct RunnerConfig {
    /// Fold workers, overriding every descriptor's `evaluation.workers`
    pub workers: Option<usize>,
    /// Directory receiving `<id>.result.json` and the rendered report
    pub output_dir: Option<PathBuf>,
    /// Report format
    pub format: OutputFormat,
}

/// A finished experiment
#[derive(Debug, Clone)]
pub struct ExperimentOutcome {
    /// Descriptor identifier
    pub experiment_id: String,
    /// Aggregated curve and fold accounting
    pub result: ExperimentResult,
    /// Report over `result`
    pub report: ExperimentReport,
}

/// Results of running several descriptors
#[derive(Debug, Default)]
pub struct BatchSummary {
    /// Experiments that produced a result
    pub completed: Vec<ExperimentOutcome>,
    /// Experiment identifier and error message of every failed descriptor
    pub failed: Vec<(String, String)>,
}

impl BatchSummary {
    /// Whether every descriptor produced a result
    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Experiment runner
#[derive(Debug)]
pub struct ExperimentRunner {
    config: RunnerConfig,
    registry: Registry,
}

impl ExperimentRunner {
    /// Create a runner with the default configuration and built-in components
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RunnerConfig::default())
    }

    /// Create a runner with a custom configuration
    #[must_use]
    pub fn with_config(config: RunnerConfig) -> Self {
        Self {
            config,
            registry: Registry::with_defaults(),
        }
    }

    /// Replace the component registry
    #[must_use]
    pub fn with_registry(mut self, registry: Registry) -> Self {
        self.registry = registry;
        self
    }

    /// Get current configuration
    #[must_use]
    pub const fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Component registry used for wiring
    #[must_use]
    pub const fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Wire the loop template described by `config`
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown tag or invalid component parameters.
    pub fn build_algorithm(&self, config: &ExperimentConfig) -> Result<ActiveLearning, RunnerError> {
        let classifier = self.registry.classifier(&config.classifier)?;
        let strategy = self.registry.strategy(&config.strategy, classifier)?;
        let oracle = self.registry.oracle(&config.oracle)?;

        let scenario = Scenario::builder()
            .strategy(strategy)
            .selector(BatchSelector::new(config.algorithm.batch.clone()))
            .oracle(oracle)
            .build()?;

        let mut algorithm = ActiveLearning::with_config(scenario, config.algorithm.limits)
            .with_listener(Box::new(TracingReporter::new(config.experiment.id.clone())));
        for spec in &config.stop_criteria {
            algorithm = algorithm.with_stop_criterion(self.registry.stop_criterion(spec)?);
        }
        Ok(algorithm)
    }

    /// Load the training data and, in hold-out mode, the test data
    ///
    /// # Errors
    ///
    /// Returns an error if a file cannot be read or parsed.
    pub fn load_data(config: &ExperimentConfig) -> Result<(Dataset, Option<Dataset>), RunnerError> {
        let settings = &config.dataset;
        match &settings.test_path {
            Some(test_path) => {
                let (train, test) =
                    Dataset::load_jsonl_split(&settings.path, test_path, settings.kind)?;
                Ok((train, Some(test)))
            }
            None => Ok((Dataset::load_jsonl(&settings.path, settings.kind)?, None)),
        }
    }

    /// Run one experiment and build its report
    ///
    /// # Errors
    ///
    /// Returns wiring and data errors before any fold runs, and
    /// `AllFoldsFailed` if no fold contributed.
    pub fn run_experiment(&self, config: &ExperimentConfig) -> Result<ExperimentOutcome, RunnerError> {
        let id = &config.experiment.id;
        let settings = &config.evaluation;
        let template = self.build_algorithm(config)?;
        let (train, test) = Self::load_data(config)?;

        let workers = self.config.workers.unwrap_or(settings.workers);
        let evaluation = KFoldEvaluation::new(
            KFold::new(settings.folds, settings.stratify, settings.seed),
            SeedSampler::new(settings.initial_labeled.clone(), settings.stratify, settings.seed),
            workers,
        );

        info!(
            experiment = %id,
            strategy = %config.strategy.tag,
            classifier = %config.classifier.tag,
            examples = train.len(),
            holdout = test.is_some(),
            "Running experiment"
        );
        let start = Instant::now();
        let result = match &test {
            Some(test) => evaluation.run_holdout(&template, &train, test)?,
            None => evaluation.run(&template, &train)?,
        };
        info!(
            experiment = %id,
            folds = result.folds_contributed(),
            failures = result.failures.len(),
            elapsed_ms = start.elapsed().as_millis(),
            "Experiment finished"
        );

        let metric = &config.statistics.metric;
        let report = ReportBuilder::new(id)
            .with_description(&config.experiment.description)
            .with_metric(metric, higher_is_better(metric))
            .with_stat_config(StatConfig::from_settings(&config.statistics, settings.seed))
            .build(&result);

        Ok(ExperimentOutcome {
            experiment_id: id.clone(),
            result,
            report,
        })
    }

    /// Run every loaded descriptor in order.
    ///
    /// A failing descriptor is logged and recorded; the remaining ones
    /// still run.
    #[must_use]
    pub fn run_all(&self, loader: &ExperimentLoader) -> BatchSummary {
        let mut summary = BatchSummary::default();
        for config in loader.iter() {
            match self.run_experiment(config) {
                Ok(outcome) => summary.completed.push(outcome),
                Err(e) => {
                    error!(experiment = %config.experiment.id, error = %e, "Experiment failed");
                    summary
                        .failed
                        .push((config.experiment.id.clone(), e.to_string()));
                }
            }
        }
        summary
    }

    /// Write `<id>.result.json` and `<id>.report.<ext>` into the output
    /// directory, returning the written paths. Writes nothing without an
    /// output directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or a file cannot be written.
    pub fn write_outputs(&self, outcome: &ExperimentOutcome) -> Result<Vec<PathBuf>> {
        let Some(dir) = &self.config.output_dir else {
            return Ok(Vec::new());
        };
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create output directory {}", dir.display()))?;

        let result_path = dir.join(format!("{}.result.json", outcome.experiment_id));
        outcome
            .result
            .save(&result_path)
            .with_context(|| format!("Failed to write {}", result_path.display()))?;

        let format = self.config.format;
        let report_path = dir.join(format!(
            "{}.report.{}",
            outcome.experiment_id,
            format.extension()
        ));
        let rendered = format.render(&outcome.report)?;
        write_file(&report_path, &rendered)?;

        info!(
            result = %result_path.display(),
            report = %report_path.display(),
            "Outputs written"
        );
        Ok(vec![result_path, report_path])
    }
}

impl Default for ExperimentRunner {
    fn default() -> Self {
        Self::new()
    }
}

fn write_file(path: &Path, content: &str) -> Result<()> {
    std::fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))
}
