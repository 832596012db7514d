//! Statistics over per-fold results.
//!
//! Each fold yields one normalized learning-curve area for the chosen
//! metric. This module summarizes those areas (mean, sample standard
//! deviation, bootstrap confidence interval) and compares two experiments
//! with Welch's t-test and Cohen's d.

use crate::config::StatisticsSettings;
use crate::kfold::ExperimentResult;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, StudentsT};

/// Compute mean of samples
#[allow(clippy::cast_precision_loss)]
fn compute_mean(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().sum::<f64>() / samples.len() as f64
}

/// Compute sample standard deviation
#[allow(clippy::cast_precision_loss)]
fn compute_std(samples: &[f64]) -> f64 {
    if samples.len() < 2 {
        return 0.0;
    }
    let mean = compute_mean(samples);
    let variance =
        samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (samples.len() - 1) as f64;
    variance.sqrt()
}

/// Statistical configuration
#[derive(Debug, Clone, PartialEq)]
pub struct StatConfig {
    /// Number of bootstrap resamples
    pub bootstrap_n: usize,
    /// Confidence level (e.g., 0.95)
    pub confidence: f64,
    /// Significance threshold
    pub alpha: f64,
    /// Random seed for reproducibility
    pub seed: u64,
}

impl Default for StatConfig {
    fn default() -> Self {
        Self {
            bootstrap_n: 10_000,
            confidence: 0.95,
            alpha: 0.05,
            seed: 42,
        }
    }
}

impl StatConfig {
    /// Configuration from a descriptor's statistics section
    #[must_use]
    pub const fn from_settings(settings: &StatisticsSettings, seed: u64) -> Self {
        Self {
            bootstrap_n: settings.bootstrap_n,
            confidence: settings.confidence,
            alpha: settings.alpha,
            seed,
        }
    }
}

/// Bootstrap confidence interval of the mean.
///
/// Uses the percentile method with `config.bootstrap_n` resamples drawn with
/// replacement. Fewer than two samples give a degenerate interval at the
/// mean.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_sign_loss,
    clippy::cast_possible_truncation
)]
pub fn bootstrap_ci(samples: &[f64], config: &StatConfig) -> (f64, f64) {
    if samples.len() < 2 || config.bootstrap_n == 0 {
        let mean = compute_mean(samples);
        return (mean, mean);
    }

    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let mut means: Vec<f64> = (0..config.bootstrap_n)
        .map(|_| {
            let sum: f64 = (0..samples.len())
                .map(|_| samples[rng.gen_range(0..samples.len())])
                .sum();
            sum / samples.len() as f64
        })
        .collect();
    means.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let alpha = 1.0 - config.confidence;
    let last = means.len() - 1;
    let lower_idx = ((means.len() as f64 * (alpha / 2.0)).floor() as usize).min(last);
    let upper_idx = ((means.len() as f64 * (1.0 - alpha / 2.0)).ceil() as usize).min(last);

    (means[lower_idx], means[upper_idx])
}

/// Summary of one metric's learning-curve area across folds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoldStatistics {
    /// Metric the areas were computed for
    pub metric: String,
    /// Folds with a defined area
    pub folds: usize,
    /// Mean area
    pub mean: f64,
    /// Sample standard deviation
    pub std_dev: f64,
    /// Bootstrap confidence interval (lower, upper)
    pub ci: (f64, f64),
    /// Smallest fold area
    pub min: f64,
    /// Largest fold area
    pub max: f64,
}

impl FoldStatistics {
    /// Summarize a list of per-fold areas; `None` if the list is empty
    #[must_use]
    pub fn from_areas(metric: &str, areas: &[f64], config: &StatConfig) -> Option<Self> {
        if areas.is_empty() {
            return None;
        }
        Some(Self {
            metric: metric.to_string(),
            folds: areas.len(),
            mean: compute_mean(areas),
            std_dev: compute_std(areas),
            ci: bootstrap_ci(areas, config),
            min: areas.iter().copied().fold(f64::INFINITY, f64::min),
            max: areas.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        })
    }

    /// Summarize an experiment's per-fold areas for `metric`
    #[must_use]
    pub fn of_experiment(result: &ExperimentResult, metric: &str, config: &StatConfig) -> Option<Self> {
        Self::from_areas(metric, &result.fold_areas(metric), config)
    }
}

/// Result of a significance test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignificanceResult {
    /// t-statistic
    pub t_statistic: f64,
    /// p-value
    pub p_value: f64,
    /// Degrees of freedom
    pub degrees_of_freedom: f64,
    /// Is result significant at the given alpha?
    pub is_significant: bool,
    /// Cohen's d effect size
    pub cohens_d: f64,
    /// Effect size interpretation
    pub effect_interpretation: String,
}

/// Independent samples t-test (Welch's t-test)
///
/// Returns `None` if either side has fewer than two samples or neither side
/// has any variance.
#[must_use]
#[allow(clippy::cast_precision_loss, clippy::suboptimal_flops)]
pub fn welch_t_test(samples_a: &[f64], samples_b: &[f64], alpha: f64) -> Option<SignificanceResult> {
    if samples_a.len() < 2 || samples_b.len() < 2 {
        return None;
    }

    let n_a = samples_a.len() as f64;
    let n_b = samples_b.len() as f64;
    let mean_a = compute_mean(samples_a);
    let mean_b = compute_mean(samples_b);
    let var_a = compute_std(samples_a).powi(2);
    let var_b = compute_std(samples_b).powi(2);

    if var_a < f64::EPSILON && var_b < f64::EPSILON {
        return None;
    }

    let se = ((var_a / n_a) + (var_b / n_b)).sqrt();
    if se < f64::EPSILON {
        return None;
    }

    let t_statistic = (mean_a - mean_b) / se;

    // Welch-Satterthwaite degrees of freedom
    let df_num = ((var_a / n_a) + (var_b / n_b)).powi(2);
    let df_denom = ((var_a / n_a).powi(2) / (n_a - 1.0)) + ((var_b / n_b).powi(2) / (n_b - 1.0));
    let df = if df_denom > f64::EPSILON {
        df_num / df_denom
    } else {
        (n_a + n_b - 2.0).max(1.0)
    };

    let t_dist = StudentsT::new(0.0, 1.0, df).ok()?;
    let p_value = 2.0 * (1.0 - t_dist.cdf(t_statistic.abs()));

    let pooled_std = (((n_a - 1.0) * var_a + (n_b - 1.0) * var_b) / (n_a + n_b - 2.0)).sqrt();
    let cohens_d = if pooled_std > f64::EPSILON {
        (mean_a - mean_b) / pooled_std
    } else {
        0.0
    };

    Some(SignificanceResult {
        t_statistic,
        p_value,
        degrees_of_freedom: df,
        is_significant: p_value < alpha,
        cohens_d,
        effect_interpretation: interpret_cohens_d(cohens_d),
    })
}

/// Welch's t-test between two experiments' per-fold areas for `metric`
#[must_use]
pub fn compare_experiments(
    a: &ExperimentResult,
    b: &ExperimentResult,
    metric: &str,
    alpha: f64,
) -> Option<SignificanceResult> {
    welch_t_test(&a.fold_areas(metric), &b.fold_areas(metric), alpha)
}

/// Interpret Cohen's d effect size
fn interpret_cohens_d(d: f64) -> String {
    let abs_d = d.abs();
    if abs_d < 0.2 {
        "negligible".to_string()
    } else if abs_d < 0.5 {
        "small".to_string()
    } else if abs_d < 0.8 {
        "medium".to_string()
    } else {
        "large".to_string()
    }
}

#[cfg(test)]
#[allow(
    clippy::float_cmp,
    clippy::cast_precision_loss,
    clippy::unwrap_used
)]
mod tests {
    use super::*;
    use crate::algorithm::{RunOutcome, StopReason};
    use crate::evaluation::{Evaluation, LearningCurve, ACCURACY};
    use crate::kfold::FoldResult;

    fn experiment(fold_values: &[(f64, f64)]) -> ExperimentResult {
        let folds = fold_values
            .iter()
            .enumerate()
            .map(|(fold, &(first, second))| FoldResult {
                fold,
                outcome: RunOutcome {
                    curve: LearningCurve::new(vec![
                        Evaluation::new(1, 10, 20).with_metric(ACCURACY, first),
                        Evaluation::new(2, 12, 18).with_metric(ACCURACY, second),
                    ]),
                    passive: None,
                    stop_reason: StopReason::MaxIterations,
                },
            })
            .collect();
        ExperimentResult {
            curve: LearningCurve::default(),
            passive: None,
            folds_requested: fold_values.len(),
            folds,
            failures: Vec::new(),
        }
    }

    // =========================================================================
    // Descriptive statistics
    // =========================================================================

    #[test]
    fn test_compute_std() {
        let samples = vec![2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let std = compute_std(&samples);
        // Sample std for this data is ~2.138
        assert!(std > 2.0 && std < 2.2, "std = {std}");
    }

    #[test]
    fn test_compute_std_degenerate() {
        assert!(compute_std(&[]).abs() < f64::EPSILON);
        assert!(compute_std(&[5.0]).abs() < f64::EPSILON);
    }

    #[test]
    fn test_stat_config_default() {
        let config = StatConfig::default();
        assert_eq!(config.bootstrap_n, 10_000);
        assert!((config.confidence - 0.95).abs() < f64::EPSILON);
        assert_eq!(config.seed, 42);
    }

    #[test]
    fn test_stat_config_from_settings() {
        let settings = StatisticsSettings {
            bootstrap_n: 200,
            ..StatisticsSettings::default()
        };
        let config = StatConfig::from_settings(&settings, 9);
        assert_eq!(config.bootstrap_n, 200);
        assert_eq!(config.seed, 9);
    }

    // =========================================================================
    // Bootstrap
    // =========================================================================

    #[test]
    fn test_bootstrap_ci_reproducible() {
        let samples: Vec<f64> = (0..20).map(|i| 0.7 + i as f64 * 0.01).collect();
        let config = StatConfig::default();
        assert_eq!(bootstrap_ci(&samples, &config), bootstrap_ci(&samples, &config));
    }

    #[test]
    fn test_bootstrap_ci_contains_mean() {
        let samples: Vec<f64> = (0..10).map(|i| 0.6 + i as f64 * 0.02).collect();
        let (lower, upper) = bootstrap_ci(&samples, &StatConfig::default());
        let mean = compute_mean(&samples);
        assert!(lower <= mean && mean <= upper);
        assert!(lower >= 0.6 && upper <= 0.78);
    }

    #[test]
    fn test_bootstrap_ci_single_sample() {
        let (lower, upper) = bootstrap_ci(&[0.95], &StatConfig::default());
        assert!((lower - 0.95).abs() < f64::EPSILON);
        assert!((upper - 0.95).abs() < f64::EPSILON);
    }

    // =========================================================================
    // Fold statistics
    // =========================================================================

    #[test]
    fn test_fold_statistics() {
        let config = StatConfig {
            bootstrap_n: 500,
            ..StatConfig::default()
        };
        let stats = FoldStatistics::from_areas(ACCURACY, &[0.6, 0.7, 0.8], &config).unwrap();
        assert_eq!(stats.folds, 3);
        assert!((stats.mean - 0.7).abs() < 1e-12);
        assert!((stats.std_dev - 0.1).abs() < 1e-12);
        assert_eq!(stats.min, 0.6);
        assert_eq!(stats.max, 0.8);
        assert!(stats.ci.0 <= stats.mean && stats.mean <= stats.ci.1);
    }

    #[test]
    fn test_fold_statistics_empty() {
        assert!(FoldStatistics::from_areas(ACCURACY, &[], &StatConfig::default()).is_none());
    }

    #[test]
    fn test_fold_statistics_of_experiment() {
        // area of a two-point curve is the first point's value
        let result = experiment(&[(0.5, 0.9), (0.7, 0.9)]);
        let stats = FoldStatistics::of_experiment(&result, ACCURACY, &StatConfig::default()).unwrap();
        assert_eq!(stats.folds, 2);
        assert!((stats.mean - 0.6).abs() < 1e-12);
    }

    // =========================================================================
    // Significance
    // =========================================================================

    #[test]
    fn test_welch_t_test_significant() {
        let samples_a: Vec<f64> = (0..50).map(|i| 0.95 + (i as f64 * 0.002)).collect();
        let samples_b: Vec<f64> = (0..50).map(|i| 0.75 + (i as f64 * 0.002)).collect();

        let result = welch_t_test(&samples_a, &samples_b, 0.05).unwrap();
        assert!(result.is_significant);
        assert!(result.p_value < 0.05);
        assert_eq!(result.effect_interpretation, "large");
    }

    #[test]
    fn test_welch_t_test_identical_not_significant() {
        let samples: Vec<f64> = (0..10).map(|i| 0.90 + (i as f64 * 0.01)).collect();
        let result = welch_t_test(&samples, &samples, 0.05).unwrap();
        assert!(!result.is_significant);
        assert!(result.t_statistic.abs() < f64::EPSILON);
    }

    #[test]
    fn test_welch_t_test_small_sample() {
        assert!(welch_t_test(&[0.9], &[0.8], 0.05).is_none());
    }

    #[test]
    fn test_compare_experiments() {
        let better = experiment(&[(0.80, 0.9), (0.82, 0.9), (0.81, 0.9), (0.83, 0.9)]);
        let worse = experiment(&[(0.50, 0.9), (0.52, 0.9), (0.51, 0.9), (0.53, 0.9)]);
        let result = compare_experiments(&better, &worse, ACCURACY, 0.05).unwrap();
        assert!(result.is_significant);
        assert!(result.cohens_d > 0.0);
    }

    #[test]
    fn test_cohens_d_interpretation() {
        assert_eq!(interpret_cohens_d(0.1), "negligible");
        assert_eq!(interpret_cohens_d(0.3), "small");
        assert_eq!(interpret_cohens_d(0.6), "medium");
        assert_eq!(interpret_cohens_d(1.0), "large");
        assert_eq!(interpret_cohens_d(-0.9), "large");
    }
}
