//! Stop criteria: pure predicates over a run's evaluation history.

use crate::evaluation::Evaluation;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Read-only snapshot of a run handed to stop criteria
#[derive(Debug, Clone, Copy)]
pub struct RunView<'a> {
    /// Iterations completed so far
    pub iteration: usize,
    /// One record per completed iteration
    pub history: &'a [Evaluation],
    /// Passive-learning baseline, if computed
    pub passive: Option<&'a Evaluation>,
    /// Current labeled pool size
    pub labeled: usize,
    /// Current unlabeled pool size
    pub unlabeled: usize,
}

/// Decides whether a run should end
pub trait StopCriterion: Send + fmt::Debug {
    /// Short identifier used in logs and reports
    fn name(&self) -> &str;

    /// Whether the run should stop now
    fn should_stop(&self, view: &RunView<'_>) -> bool;

    /// Whether [`RunView::passive`] must be populated before asking
    fn needs_passive_baseline(&self) -> bool {
        false
    }

    /// Independent copy
    fn clone_box(&self) -> Box<dyn StopCriterion>;
}

impl Clone for Box<dyn StopCriterion> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// How per-metric comparisons combine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CombineMode {
    /// Stop when any metric has reached the baseline
    #[default]
    Disjunctive,
    /// Stop only when every metric has reached the baseline
    Conjunctive,
}

/// A metric compared against the passive baseline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasureTarget {
    /// Metric name
    pub metric: String,
    /// Whether larger values are better
    pub maximal: bool,
}

impl MeasureTarget {
    /// Create a target
    #[must_use]
    pub fn new(metric: impl Into<String>, maximal: bool) -> Self {
        Self {
            metric: metric.into(),
            maximal,
        }
    }

    /// Whether `active` has reached `passive` in this metric's direction.
    /// A missing value on either side never counts as reached.
    fn reached(&self, active: &Evaluation, passive: &Evaluation) -> bool {
        match (active.metric(&self.metric), passive.metric(&self.metric)) {
            (Some(a), Some(p)) if self.maximal => a >= p,
            (Some(a), Some(p)) => a <= p,
            _ => false,
        }
    }
}

/// Stops once the latest iteration matches the fully supervised baseline
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PassiveLearningMeasure {
    measures: Vec<MeasureTarget>,
    mode: CombineMode,
}

impl PassiveLearningMeasure {
    /// Create a criterion over `measures` combined with `mode`
    #[must_use]
    pub const fn new(measures: Vec<MeasureTarget>, mode: CombineMode) -> Self {
        Self { measures, mode }
    }

    /// Add one metric
    #[must_use]
    pub fn with_measure(mut self, metric: impl Into<String>, maximal: bool) -> Self {
        self.measures.push(MeasureTarget::new(metric, maximal));
        self
    }

    /// Combination mode
    #[must_use]
    pub const fn mode(&self) -> CombineMode {
        self.mode
    }
}

impl StopCriterion for PassiveLearningMeasure {
    fn name(&self) -> &'static str {
        "passive_learning_measure"
    }

    fn should_stop(&self, view: &RunView<'_>) -> bool {
        let (Some(latest), Some(passive)) = (view.history.last(), view.passive) else {
            return false;
        };
        if self.measures.is_empty() {
            return false;
        }

        let mut reached = self.measures.iter().map(|m| m.reached(latest, passive));
        match self.mode {
            CombineMode::Disjunctive => reached.any(|r| r),
            CombineMode::Conjunctive => reached.all(|r| r),
        }
    }

    fn needs_passive_baseline(&self) -> bool {
        true
    }

    fn clone_box(&self) -> Box<dyn StopCriterion> {
        Box::new(self.clone())
    }
}

/// Stops once the labeled pool holds at least `limit` examples
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LabelBudget {
    limit: usize,
}

impl LabelBudget {
    /// Create a budget of `limit` labeled examples
    #[must_use]
    pub const fn new(limit: usize) -> Self {
        Self { limit }
    }
}

impl StopCriterion for LabelBudget {
    fn name(&self) -> &'static str {
        "label_budget"
    }

    fn should_stop(&self, view: &RunView<'_>) -> bool {
        view.labeled >= self.limit
    }

    fn clone_box(&self) -> Box<dyn StopCriterion> {
        Box::new(*self)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::evaluation::{ACCURACY, ERROR_RATE};

    fn record(accuracy: f64, error: f64) -> Evaluation {
        Evaluation::new(1, 10, 90)
            .with_metric(ACCURACY, accuracy)
            .with_metric(ERROR_RATE, error)
    }

    fn view<'a>(history: &'a [Evaluation], passive: Option<&'a Evaluation>) -> RunView<'a> {
        RunView {
            iteration: history.len(),
            history,
            passive,
            labeled: 10,
            unlabeled: 90,
        }
    }

    fn criterion(mode: CombineMode) -> PassiveLearningMeasure {
        PassiveLearningMeasure::new(Vec::new(), mode)
            .with_measure(ACCURACY, true)
            .with_measure(ERROR_RATE, false)
    }

    // =========================================================================
    // Passive learning measure
    // =========================================================================

    #[test]
    fn test_disjunctive_is_default() {
        assert_eq!(PassiveLearningMeasure::default().mode(), CombineMode::Disjunctive);
    }

    #[test]
    fn test_no_history_never_stops() {
        let passive = record(0.9, 0.1);
        assert!(!criterion(CombineMode::Disjunctive).should_stop(&view(&[], Some(&passive))));
    }

    #[test]
    fn test_no_baseline_never_stops() {
        let history = [record(0.99, 0.01)];
        assert!(!criterion(CombineMode::Disjunctive).should_stop(&view(&history, None)));
    }

    #[test]
    fn test_disjunctive_stops_on_either_metric() {
        let passive = record(0.9, 0.1);

        // accuracy reached, error not
        let history = [record(0.9, 0.2)];
        assert!(criterion(CombineMode::Disjunctive).should_stop(&view(&history, Some(&passive))));

        // error reached, accuracy not
        let history = [record(0.8, 0.1)];
        assert!(criterion(CombineMode::Disjunctive).should_stop(&view(&history, Some(&passive))));

        // neither
        let history = [record(0.8, 0.2)];
        assert!(!criterion(CombineMode::Disjunctive).should_stop(&view(&history, Some(&passive))));
    }

    #[test]
    fn test_conjunctive_requires_both() {
        let passive = record(0.9, 0.1);

        let history = [record(0.9, 0.2)];
        assert!(!criterion(CombineMode::Conjunctive).should_stop(&view(&history, Some(&passive))));

        let history = [record(0.8, 0.1)];
        assert!(!criterion(CombineMode::Conjunctive).should_stop(&view(&history, Some(&passive))));

        let history = [record(0.95, 0.05)];
        assert!(criterion(CombineMode::Conjunctive).should_stop(&view(&history, Some(&passive))));
    }

    #[test]
    fn test_only_latest_record_counts() {
        let passive = record(0.9, 0.1);
        let history = [record(0.95, 0.05), record(0.8, 0.2)];
        assert!(!criterion(CombineMode::Disjunctive).should_stop(&view(&history, Some(&passive))));
    }

    #[test]
    fn test_missing_metric_never_reached() {
        let passive = Evaluation::new(0, 100, 0).with_metric(ERROR_RATE, 0.1);
        let history = [record(0.99, 0.5)];
        assert!(!criterion(CombineMode::Disjunctive).should_stop(&view(&history, Some(&passive))));
    }

    #[test]
    fn test_empty_measures_never_stop() {
        let passive = record(0.9, 0.1);
        let history = [record(0.95, 0.05)];
        let empty = PassiveLearningMeasure::new(Vec::new(), CombineMode::Conjunctive);
        assert!(!empty.should_stop(&view(&history, Some(&passive))));
    }

    #[test]
    fn test_needs_baseline() {
        assert!(criterion(CombineMode::Disjunctive).needs_passive_baseline());
        assert!(!LabelBudget::new(5).needs_passive_baseline());
    }

    // =========================================================================
    // Label budget
    // =========================================================================

    #[test]
    fn test_label_budget() {
        let history = [record(0.5, 0.5)];
        assert!(LabelBudget::new(10).should_stop(&view(&history, None)));
        assert!(!LabelBudget::new(11).should_stop(&view(&history, None)));
    }

    #[test]
    fn test_measure_target_yaml() {
        let target: MeasureTarget = serde_yaml::from_str("metric: accuracy\nmaximal: true\n").unwrap();
        assert_eq!(target, MeasureTarget::new("accuracy", true));
    }
}
