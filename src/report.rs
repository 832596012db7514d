//! Report generation for experiment results.
//!
//! Generates reports showing:
//! - The aggregated learning curve for one metric
//! - The passive-learning baseline and where the curve reaches it
//! - Fold accounting (requested, contributed, failed)
//! - Per-fold area statistics and comparisons with other experiments

use crate::evaluation::{Evaluation, ITERATION_TIME};
use crate::kfold::{ExperimentResult, FoldFailure};
use crate::metrics::{compare_experiments, FoldStatistics, SignificanceResult, StatConfig};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as FmtWrite;
use tabled::{Table, Tabled};

/// Full experiment report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentReport {
    /// Report metadata
    pub metadata: ReportMetadata,
    /// Summary figures
    pub summary: ReportSummary,
    /// Aggregated curve for the report metric
    pub curve: Vec<CurvePoint>,
    /// Aggregated passive baseline, all metrics
    pub passive: Option<Evaluation>,
    /// Per-fold area statistics
    pub area_statistics: Option<FoldStatistics>,
    /// Comparisons with other experiments
    pub statistical_tests: Vec<StatisticalComparison>,
}

/// Report metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportMetadata {
    /// Report title
    pub title: String,
    /// Experiment identifier
    pub experiment_id: String,
    /// Experiment description
    pub description: String,
    /// Metric the report is built around
    pub metric: String,
    /// Report generation timestamp
    pub generated_at: DateTime<Utc>,
    /// Framework version
    pub framework_version: String,
    /// Statistical configuration used
    pub stat_config: StatConfigSummary,
}

/// Statistical configuration summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatConfigSummary {
    /// Bootstrap resamples
    pub bootstrap_n: usize,
    /// Confidence level
    pub confidence: f64,
    /// Significance threshold
    pub alpha: f64,
}

impl From<&StatConfig> for StatConfigSummary {
    fn from(config: &StatConfig) -> Self {
        Self {
            bootstrap_n: config.bootstrap_n,
            confidence: config.confidence,
            alpha: config.alpha,
        }
    }
}

/// High-level summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportSummary {
    /// Folds requested
    pub folds_requested: usize,
    /// Folds that contributed to the curve
    pub folds_contributed: usize,
    /// Failed folds
    pub failures: Vec<FoldFailure>,
    /// Points on the aggregated curve
    pub iterations: usize,
    /// Metric value at the last point
    pub final_value: Option<f64>,
    /// Passive baseline value of the metric
    pub passive_value: Option<f64>,
    /// Normalized area under the aggregated curve
    pub area: Option<f64>,
    /// Labeled-set size at which the curve first reaches the baseline
    pub reaches_passive_at: Option<usize>,
}

/// One point of the aggregated curve
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurvePoint {
    /// 1-based iteration position
    pub iteration: usize,
    /// Mean labeled-set size
    pub labeled: usize,
    /// Mean unlabeled-set size
    pub unlabeled: usize,
    /// Mean metric value
    pub value: Option<f64>,
    /// Mean iteration time in milliseconds
    pub iteration_ms: Option<f64>,
}

/// Statistical comparison between two experiments
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatisticalComparison {
    /// Experiment A identifier
    pub experiment_a: String,
    /// Experiment B identifier
    pub experiment_b: String,
    /// Metric being compared
    pub metric: String,
    /// Significance test result
    pub significance: SignificanceResult,
}

/// Report builder for constructing experiment reports
#[derive(Debug)]
pub struct ReportBuilder {
    experiment_id: String,
    description: String,
    metric: String,
    maximal: bool,
    stat_config: StatConfig,
    comparisons: Vec<(String, ExperimentResult)>,
}

impl ReportBuilder {
    /// Create a new report builder
    #[must_use]
    pub fn new(experiment_id: &str) -> Self {
        Self {
            experiment_id: experiment_id.to_string(),
            description: String::new(),
            metric: crate::evaluation::ACCURACY.to_string(),
            maximal: true,
            stat_config: StatConfig::default(),
            comparisons: Vec::new(),
        }
    }

    /// Set the experiment description
    #[must_use]
    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    /// Set the report metric and whether larger values are better
    #[must_use]
    pub fn with_metric(mut self, metric: &str, maximal: bool) -> Self {
        self.metric = metric.to_string();
        self.maximal = maximal;
        self
    }

    /// Set statistical configuration
    #[must_use]
    pub fn with_stat_config(mut self, config: StatConfig) -> Self {
        self.stat_config = config;
        self
    }

    /// Compare against another experiment's per-fold areas
    pub fn add_comparison(&mut self, other_id: &str, other: ExperimentResult) {
        self.comparisons.push((other_id.to_string(), other));
    }

    /// Build the report for `result`
    #[must_use]
    pub fn build(self, result: &ExperimentResult) -> ExperimentReport {
        let curve: Vec<CurvePoint> = result
            .curve
            .records
            .iter()
            .map(|r| CurvePoint {
                iteration: r.iteration,
                labeled: r.labeled_size,
                unlabeled: r.unlabeled_size,
                value: r.metric(&self.metric),
                iteration_ms: r.metric(ITERATION_TIME),
            })
            .collect();

        let passive_value = result.passive.as_ref().and_then(|p| p.metric(&self.metric));
        let reaches_passive_at = passive_value.and_then(|target| {
            curve
                .iter()
                .find(|p| {
                    p.value.is_some_and(|v| {
                        if self.maximal {
                            v >= target
                        } else {
                            v <= target
                        }
                    })
                })
                .map(|p| p.labeled)
        });

        let summary = ReportSummary {
            folds_requested: result.folds_requested,
            folds_contributed: result.folds_contributed(),
            failures: result.failures.clone(),
            iterations: curve.len(),
            final_value: curve.last().and_then(|p| p.value),
            passive_value,
            area: result.curve.area(&self.metric),
            reaches_passive_at,
        };

        let statistical_tests = self
            .comparisons
            .iter()
            .filter_map(|(other_id, other)| {
                compare_experiments(result, other, &self.metric, self.stat_config.alpha).map(
                    |significance| StatisticalComparison {
                        experiment_a: self.experiment_id.clone(),
                        experiment_b: other_id.clone(),
                        metric: self.metric.clone(),
                        significance,
                    },
                )
            })
            .collect();

        ExperimentReport {
            area_statistics: FoldStatistics::of_experiment(result, &self.metric, &self.stat_config),
            metadata: ReportMetadata {
                title: format!("Active Learning Report: {}", self.experiment_id),
                experiment_id: self.experiment_id,
                description: self.description,
                metric: self.metric,
                generated_at: Utc::now(),
                framework_version: env!("CARGO_PKG_VERSION").to_string(),
                stat_config: StatConfigSummary::from(&self.stat_config),
            },
            summary,
            curve,
            passive: result.passive.clone(),
            statistical_tests,
        }
    }
}

/// Table row for text/markdown output
#[derive(Tabled)]
struct CurveTableRow {
    #[tabled(rename = "Iteration")]
    iteration: usize,
    #[tabled(rename = "Labeled")]
    labeled: usize,
    #[tabled(rename = "Unlabeled")]
    unlabeled: usize,
    #[tabled(rename = "Value")]
    value: String,
    #[tabled(rename = "Iteration (ms)")]
    iteration_ms: String,
}

fn or_dash(value: Option<f64>, precision: usize) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{v:.precision$}"))
}

impl ExperimentReport {
    /// Render report as JSON
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    fn curve_table(&self) -> String {
        let rows: Vec<CurveTableRow> = self
            .curve
            .iter()
            .map(|p| CurveTableRow {
                iteration: p.iteration,
                labeled: p.labeled,
                unlabeled: p.unlabeled,
                value: or_dash(p.value, 4),
                iteration_ms: or_dash(p.iteration_ms, 2),
            })
            .collect();
        Table::new(rows).to_string()
    }

    /// Render report as markdown
    #[must_use]
    pub fn to_markdown(&self) -> String {
        let mut output = String::new();

        writeln!(output, "# {}", self.metadata.title).ok();
        writeln!(output).ok();
        if !self.metadata.description.is_empty() {
            writeln!(output, "{}", self.metadata.description).ok();
            writeln!(output).ok();
        }
        writeln!(
            output,
            "**Generated:** {}",
            self.metadata.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
        )
        .ok();
        writeln!(output, "**Framework Version:** {}", self.metadata.framework_version).ok();
        writeln!(output, "**Metric:** {}", self.metadata.metric).ok();
        writeln!(output).ok();

        writeln!(output, "## Summary").ok();
        writeln!(output).ok();
        writeln!(output, "| Item | Value |").ok();
        writeln!(output, "|------|-------|").ok();
        writeln!(
            output,
            "| Folds | {} of {} contributed |",
            self.summary.folds_contributed, self.summary.folds_requested
        )
        .ok();
        writeln!(output, "| Iterations | {} |", self.summary.iterations).ok();
        writeln!(output, "| Final Value | {} |", or_dash(self.summary.final_value, 4)).ok();
        writeln!(output, "| Passive Baseline | {} |", or_dash(self.summary.passive_value, 4)).ok();
        writeln!(output, "| Curve Area | {} |", or_dash(self.summary.area, 4)).ok();
        writeln!(
            output,
            "| Reaches Baseline At | {} |",
            self.summary
                .reaches_passive_at
                .map_or_else(|| "never".to_string(), |n| format!("{n} labeled"))
        )
        .ok();
        writeln!(output).ok();

        if let Some(stats) = &self.area_statistics {
            writeln!(output, "## Per-Fold Area").ok();
            writeln!(output).ok();
            writeln!(
                output,
                "Mean {:.4} ± {:.4} (CI [{:.4}, {:.4}], min {:.4}, max {:.4}, {} folds)",
                stats.mean, stats.std_dev, stats.ci.0, stats.ci.1, stats.min, stats.max, stats.folds
            )
            .ok();
            writeln!(output).ok();
        }

        writeln!(output, "## Learning Curve").ok();
        writeln!(output).ok();
        writeln!(output, "{}", self.curve_table()).ok();
        writeln!(output).ok();

        if !self.summary.failures.is_empty() {
            writeln!(output, "## Failed Folds").ok();
            writeln!(output).ok();
            for failure in &self.summary.failures {
                writeln!(output, "- fold {}: {}", failure.fold, failure.error).ok();
            }
            writeln!(output).ok();
        }

        if !self.statistical_tests.is_empty() {
            writeln!(output, "## Statistical Comparisons").ok();
            writeln!(output).ok();
            writeln!(output, "| Comparison | t-stat | p-value | Effect Size | Significant |").ok();
            writeln!(output, "|------------|--------|---------|-------------|-------------|").ok();
            for test in &self.statistical_tests {
                writeln!(
                    output,
                    "| {} vs {} | {:.3} | {:.4} | {} ({:.2}) | {} |",
                    test.experiment_a,
                    test.experiment_b,
                    test.significance.t_statistic,
                    test.significance.p_value,
                    test.significance.effect_interpretation,
                    test.significance.cohens_d,
                    if test.significance.is_significant { "Yes" } else { "No" }
                )
                .ok();
            }
            writeln!(output).ok();
        }

        writeln!(output, "## Configuration").ok();
        writeln!(output).ok();
        writeln!(output, "- Bootstrap resamples: {}", self.metadata.stat_config.bootstrap_n).ok();
        writeln!(
            output,
            "- Confidence level: {}%",
            self.metadata.stat_config.confidence * 100.0
        )
        .ok();
        writeln!(
            output,
            "- Significance threshold (α): {}",
            self.metadata.stat_config.alpha
        )
        .ok();

        output
    }

    /// Render report as plain text
    #[must_use]
    pub fn to_text(&self) -> String {
        let mut output = String::new();

        writeln!(output, "═══════════════════════════════════════════════════════════════").ok();
        writeln!(output, "  {}", self.metadata.title).ok();
        writeln!(output, "═══════════════════════════════════════════════════════════════").ok();
        writeln!(output).ok();

        writeln!(output, "SUMMARY ({})", self.metadata.metric).ok();
        writeln!(output, "───────────────────────────────────────────────────────────────").ok();
        writeln!(
            output,
            "  Folds:            {}/{}",
            self.summary.folds_contributed, self.summary.folds_requested
        )
        .ok();
        writeln!(output, "  Iterations:       {}", self.summary.iterations).ok();
        writeln!(output, "  Final Value:      {}", or_dash(self.summary.final_value, 4)).ok();
        writeln!(output, "  Passive Baseline: {}", or_dash(self.summary.passive_value, 4)).ok();
        writeln!(output, "  Curve Area:       {}", or_dash(self.summary.area, 4)).ok();
        if let Some(stats) = &self.area_statistics {
            writeln!(
                output,
                "  Fold Areas:       {:.4} [{:.4}, {:.4}]",
                stats.mean, stats.ci.0, stats.ci.1
            )
            .ok();
        }
        writeln!(output).ok();

        writeln!(output, "LEARNING CURVE").ok();
        writeln!(output, "───────────────────────────────────────────────────────────────").ok();
        writeln!(output, "{}", self.curve_table()).ok();

        for failure in &self.summary.failures {
            writeln!(output, "  FAILED fold {}: {}", failure.fold, failure.error).ok();
        }

        for test in &self.statistical_tests {
            writeln!(
                output,
                "  {} vs {}: t={:.3} p={:.4} d={:.2} ({}){}",
                test.experiment_a,
                test.experiment_b,
                test.significance.t_statistic,
                test.significance.p_value,
                test.significance.cohens_d,
                test.significance.effect_interpretation,
                if test.significance.is_significant { " *" } else { "" }
            )
            .ok();
        }

        output
    }
}
