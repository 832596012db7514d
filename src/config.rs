//! Experiment descriptors.
//!
//! One YAML file describes one experiment: the data, how it is split, the
//! loop limits and every collaborator by registry tag.

use crate::algorithm::AlgorithmConfig;
use crate::batch::BatchSize;
use crate::dataset::LabelKind;
use crate::registry::ComponentSpec;
use crate::sampling::SeedSize;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur during descriptor loading
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML configuration: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Invalid glob pattern: {0}")]
    InvalidPattern(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Experiment descriptor loaded from YAML
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExperimentConfig {
    /// Identification
    pub experiment: ExperimentDefinition,
    /// Data source
    pub dataset: DatasetSettings,
    /// Fold and seed settings
    #[serde(default)]
    pub evaluation: EvaluationSettings,
    /// Loop limits and batch size
    #[serde(default)]
    pub algorithm: AlgorithmSettings,
    /// Query strategy
    pub strategy: ComponentSpec,
    /// Classifier wrapped by the strategy
    #[serde(default = "default_classifier")]
    pub classifier: ComponentSpec,
    /// Label source
    #[serde(default = "default_oracle")]
    pub oracle: ComponentSpec,
    /// Stop criteria, checked in order
    #[serde(default)]
    pub stop_criteria: Vec<ComponentSpec>,
    /// Statistics reported over per-fold results
    #[serde(default)]
    pub statistics: StatisticsSettings,
}

fn default_classifier() -> ComponentSpec {
    ComponentSpec::new("nearest_centroid")
}

fn default_oracle() -> ComponentSpec {
    ComponentSpec::new("simulated")
}

/// Experiment identification
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExperimentDefinition {
    /// Experiment identifier, used for output file names
    pub id: String,
    /// Free-form description
    #[serde(default)]
    pub description: String,
}

/// Where the examples come from
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DatasetSettings {
    /// JSON Lines file with all (training) examples
    pub path: PathBuf,
    /// Single- or multi-label
    #[serde(default = "default_kind")]
    pub kind: LabelKind,
    /// Separate test file; switches to a single hold-out run
    #[serde(default)]
    pub test_path: Option<PathBuf>,
}

const fn default_kind() -> LabelKind {
    LabelKind::SingleLabel
}

/// Fold, seed and worker settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvaluationSettings {
    /// Number of folds
    #[serde(default = "default_folds")]
    pub folds: usize,
    /// Preserve class/label proportions across folds and in the seed
    #[serde(default = "default_stratify")]
    pub stratify: bool,
    /// Random seed for reproducibility
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Fold workers; 0 uses one per core
    #[serde(default)]
    pub workers: usize,
    /// Size of the initial labeled seed
    #[serde(default)]
    pub initial_labeled: SeedSize,
}

const fn default_folds() -> usize {
    10
}
const fn default_stratify() -> bool {
    true
}
const fn default_seed() -> u64 {
    42
}

impl Default for EvaluationSettings {
    fn default() -> Self {
        Self {
            folds: default_folds(),
            stratify: default_stratify(),
            seed: default_seed(),
            workers: 0,
            initial_labeled: SeedSize::default(),
        }
    }
}

/// Loop limits plus batch size
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AlgorithmSettings {
    /// Iteration and failure limits
    #[serde(flatten)]
    pub limits: AlgorithmConfig,
    /// Examples queried per iteration
    #[serde(default)]
    pub batch: BatchSize,
}

/// Statistical reporting settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatisticsSettings {
    /// Metric whose learning-curve area is summarized
    #[serde(default = "default_metric")]
    pub metric: String,
    /// Bootstrap resamples for CI
    #[serde(default = "default_bootstrap_n")]
    pub bootstrap_n: usize,
    /// Confidence level
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    /// Maximum p-value for significance
    #[serde(default = "default_alpha")]
    pub alpha: f64,
}

fn default_metric() -> String {
    crate::evaluation::ACCURACY.to_string()
}
const fn default_bootstrap_n() -> usize {
    10000
}
const fn default_confidence() -> f64 {
    0.95
}
const fn default_alpha() -> f64 {
    0.05
}

impl Default for StatisticsSettings {
    fn default() -> Self {
        Self {
            metric: default_metric(),
            bootstrap_n: default_bootstrap_n(),
            confidence: default_confidence(),
            alpha: default_alpha(),
        }
    }
}

impl ExperimentConfig {
    /// Load a descriptor from a YAML file.
    ///
    /// Relative data paths are resolved against the descriptor's directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::from_yaml(&content)?;
        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        Ok(config)
    }

    /// Load a descriptor from a YAML string
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML cannot be parsed or validated.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Check values serde cannot check
    ///
    /// # Errors
    ///
    /// Returns `InvalidValue` naming the first bad field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.experiment.id.trim().is_empty() {
            return Err(invalid("experiment.id", "must not be empty"));
        }
        if self.dataset.test_path.is_none() && self.evaluation.folds < 2 {
            return Err(invalid(
                "evaluation.folds",
                format!("need at least 2, got {}", self.evaluation.folds),
            ));
        }
        if self.algorithm.limits.max_iterations == 0 {
            return Err(invalid("algorithm.max_iterations", "must be positive"));
        }
        if !(self.statistics.confidence > 0.0 && self.statistics.confidence < 1.0) {
            return Err(invalid("statistics.confidence", "must lie in (0, 1)"));
        }
        if !(self.statistics.alpha > 0.0 && self.statistics.alpha < 1.0) {
            return Err(invalid("statistics.alpha", "must lie in (0, 1)"));
        }
        Ok(())
    }

    fn resolve_paths(&mut self, base: &Path) {
        if self.dataset.path.is_relative() {
            self.dataset.path = base.join(&self.dataset.path);
        }
        if let Some(test) = self.dataset.test_path.as_mut() {
            if test.is_relative() {
                *test = base.join(&*test);
            }
        }
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        field,
        reason: reason.into(),
    }
}

/// Loader for multiple descriptors from glob patterns
#[derive(Debug)]
pub struct ExperimentLoader {
    experiments: Vec<ExperimentConfig>,
}

impl ExperimentLoader {
    /// Create a new empty loader
    #[must_use]
    pub const fn new() -> Self {
        Self {
            experiments: Vec::new(),
        }
    }

    /// Load descriptors from a glob pattern (e.g., "experiments/*.yaml")
    ///
    /// # Errors
    ///
    /// Returns an error if the glob pattern is invalid or files cannot be loaded.
    pub fn load_glob(pattern: &str) -> Result<Self, ConfigError> {
        let mut loader = Self::new();
        loader.extend_glob(pattern)?;
        Ok(loader)
    }

    /// Add the descriptors matching another pattern
    ///
    /// # Errors
    ///
    /// Returns an error if the glob pattern is invalid or files cannot be loaded.
    pub fn extend_glob(&mut self, pattern: &str) -> Result<(), ConfigError> {
        let paths =
            glob::glob(pattern).map_err(|e| ConfigError::InvalidPattern(format!("{pattern}: {e}")))?;

        for entry in paths {
            let path = entry
                .map_err(|e| ConfigError::IoError(std::io::Error::other(format!("Glob error: {e}"))))?;
            self.experiments.push(ExperimentConfig::load(&path)?);
        }
        Ok(())
    }

    /// Load a single descriptor from a file path
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be loaded.
    pub fn load_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = ExperimentConfig::load(path)?;
        Ok(Self {
            experiments: vec![config],
        })
    }

    /// Get all loaded descriptors
    #[must_use]
    pub fn experiments(&self) -> &[ExperimentConfig] {
        &self.experiments
    }

    /// Get the number of loaded descriptors
    #[must_use]
    pub const fn len(&self) -> usize {
        self.experiments.len()
    }

    /// Check if no descriptors are loaded
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.experiments.is_empty()
    }

    /// Iterate over loaded descriptors
    pub fn iter(&self) -> impl Iterator<Item = &ExperimentConfig> {
        self.experiments.iter()
    }
}

impl Default for ExperimentLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl IntoIterator for ExperimentLoader {
    type Item = ExperimentConfig;
    type IntoIter = std::vec::IntoIter<ExperimentConfig>;

    fn into_iter(self) -> Self::IntoIter {
        self.experiments.into_iter()
    }
}
