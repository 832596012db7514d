//! Integration tests for active-eval CLI and library.
//!
//! These tests verify end-to-end functionality including:
//! - The active-learning loop on hand-built pools
//! - K-fold evaluation and curve aggregation
//! - Descriptor loading and registry wiring
//! - CLI commands on persisted results

#![allow(clippy::unwrap_used)]
#![allow(clippy::cast_precision_loss)]

use active_eval::evaluation::{ACCURACY, ERROR_RATE};
use active_eval::{
    ActiveLearning, AlgorithmConfig, BatchSelector, BatchSize, BinMin, BinaryRelevanceCentroid,
    CombineMode, Dataset, Example, ExperimentConfig, ExperimentLoader, ExperimentResult,
    ExperimentRunner, KFold, KFoldEvaluation, LabelBudget, MeasureTarget, NearestCentroid,
    PassiveLearningMeasure, Pools, Registry, Scenario, Schema, SeedSampler, SeedSize,
    SimulatedOracle, StopReason, UncertaintySampling,
};
use std::fmt::Write as FmtWrite;
use std::path::Path;
use std::process::Command;

// ============================================================================
// Fixtures
// ============================================================================

fn two_class_schema() -> Schema {
    Schema::single_label(1, vec!["low".to_string(), "high".to_string()])
}

/// `n` examples alternating between a cluster near 0 and one near 10
fn blobs(n: usize) -> Dataset {
    let examples = (0..n)
        .map(|i| {
            if i % 2 == 0 {
                Example::single(vec![0.1 * (i % 7) as f64], 0)
            } else {
                Example::single(vec![10.0 - 0.1 * (i % 5) as f64], 1)
            }
        })
        .collect();
    Dataset::from_examples(two_class_schema(), examples).unwrap()
}

fn blob_pools() -> Pools {
    let data = blobs(24);
    let labeled = data.subset(&[0, 1]).unwrap();
    let unlabeled = data.subset(&(2..18).collect::<Vec<_>>()).unwrap();
    let test = data.subset(&(18..24).collect::<Vec<_>>()).unwrap();
    Pools::new(labeled, unlabeled, test).unwrap()
}

fn margin_template(max_iterations: usize) -> ActiveLearning {
    let scenario = Scenario::builder()
        .strategy(Box::new(UncertaintySampling::margin(Box::new(
            NearestCentroid::new(),
        ))))
        .selector(BatchSelector::fixed(1))
        .oracle(Box::new(SimulatedOracle::new()))
        .build()
        .unwrap();
    ActiveLearning::with_config(
        scenario,
        AlgorithmConfig {
            max_iterations,
            max_consecutive_failures: 3,
        },
    )
}

fn write_jsonl(path: &Path, data: &Dataset) {
    let names = &data.schema().label_names;
    let mut content = String::new();
    for example in data {
        let class = example.class().unwrap();
        writeln!(
            content,
            "{{\"features\": {:?}, \"label\": \"{}\"}}",
            example.features, names[class]
        )
        .unwrap();
    }
    std::fs::write(path, content).unwrap();
}

// ============================================================================
// Active-learning loop
// ============================================================================

#[test]
fn test_full_loop_drains_pool() {
    let mut algorithm = margin_template(100).with_pools(blob_pools());
    let outcome = algorithm.run().unwrap();

    assert_eq!(outcome.stop_reason, StopReason::PoolExhausted);
    assert_eq!(outcome.curve.len(), 16);

    let pools = algorithm.pools().unwrap();
    assert_eq!(pools.labeled.len(), 18);
    assert!(pools.unlabeled.is_empty());
    assert_eq!(pools.training_size(), 18);

    for (i, record) in outcome.curve.records.iter().enumerate() {
        assert_eq!(record.iteration, i + 1);
        assert_eq!(record.labeled_size + record.unlabeled_size, 18);
        assert!(record.metric(ACCURACY).is_some());
    }
}

#[test]
fn test_passive_baseline_is_idempotent() {
    let mut algorithm = margin_template(3).with_pools(blob_pools());
    let first = algorithm.passive_learning().unwrap().cloned().unwrap();
    let second = algorithm.passive_learning().unwrap().cloned().unwrap();
    assert_eq!(first, second);
    assert_eq!(first.labeled_size, 18);
    assert!((first.metric(ACCURACY).unwrap() - 1.0).abs() < 1e-12);
}

#[test]
fn test_passive_measure_stops_when_baseline_reached() {
    let criterion = PassiveLearningMeasure::new(
        vec![
            MeasureTarget::new(ACCURACY, true),
            MeasureTarget::new(ERROR_RATE, false),
        ],
        CombineMode::Conjunctive,
    );
    let mut algorithm = margin_template(50)
        .with_stop_criterion(Box::new(criterion))
        .with_pools(blob_pools());
    let outcome = algorithm.run().unwrap();

    assert_eq!(
        outcome.stop_reason,
        StopReason::Criterion("passive_learning_measure".to_string())
    );
    assert_eq!(outcome.curve.len(), 1);
    assert!(outcome.passive.is_some());
}

#[test]
fn test_conjunctive_measure_needs_every_target() {
    let criterion = PassiveLearningMeasure::new(vec![], CombineMode::Conjunctive)
        .with_measure(ACCURACY, true)
        .with_measure("never_recorded", true);
    let mut algorithm = margin_template(4)
        .with_stop_criterion(Box::new(criterion))
        .with_pools(blob_pools());
    let outcome = algorithm.run().unwrap();

    assert_eq!(outcome.stop_reason, StopReason::MaxIterations);
    assert_eq!(outcome.curve.len(), 4);
}

#[test]
fn test_label_budget() {
    let mut algorithm = margin_template(50)
        .with_stop_criterion(Box::new(LabelBudget::new(6)))
        .with_pools(blob_pools());
    let outcome = algorithm.run().unwrap();

    assert_eq!(outcome.stop_reason, StopReason::Criterion("label_budget".to_string()));
    assert_eq!(algorithm.pools().unwrap().labeled.len(), 6);
}

#[test]
fn test_multi_label_loop() {
    let schema = Schema::multi_label(2, vec!["x".to_string(), "y".to_string()]);
    let example = |a: f64, b: f64| Example::multi(vec![a, b], vec![a > 0.5, b > 0.5]);
    let pool = |points: &[(f64, f64)]| {
        Dataset::from_examples(schema.clone(), points.iter().map(|&(a, b)| example(a, b)).collect())
            .unwrap()
    };

    let pools = Pools::new(
        pool(&[(0.0, 0.0), (1.0, 1.0), (1.0, 0.0), (0.0, 1.0)]),
        pool(&[(0.9, 0.1), (0.2, 0.8), (0.6, 0.6), (0.1, 0.2), (0.8, 0.9)]),
        pool(&[(0.95, 0.05), (0.05, 0.95)]),
    )
    .unwrap();

    let scenario = Scenario::builder()
        .strategy(Box::new(BinMin::new(Box::new(BinaryRelevanceCentroid::new()))))
        .selector(BatchSelector::new(BatchSize::Clamped { size: 2 }))
        .oracle(Box::new(SimulatedOracle::new()))
        .build()
        .unwrap();
    let mut algorithm = ActiveLearning::new(scenario).with_pools(pools);
    let outcome = algorithm.run().unwrap();

    assert_eq!(outcome.curve.len(), 3);
    assert_eq!(outcome.stop_reason, StopReason::PoolExhausted);
    assert_eq!(algorithm.pools().unwrap().labeled.len(), 9);
}

// ============================================================================
// K-fold evaluation
// ============================================================================

#[test]
fn test_kfold_unequal_fold_lengths() {
    // 23 examples in 5 folds: three folds train on 18, two on 19
    let data = blobs(23);
    let evaluation = KFoldEvaluation::new(
        KFold::new(5, false, 3),
        SeedSampler::new(SeedSize::Count { count: 2 }, true, 3),
        2,
    );
    let result = evaluation.run(&margin_template(100), &data).unwrap();

    assert_eq!(result.folds_requested, 5);
    assert_eq!(result.folds_contributed(), 5);
    assert!(result.failures.is_empty());

    let mut lengths: Vec<usize> = result.folds.iter().map(|f| f.outcome.curve.len()).collect();
    lengths.sort_unstable();
    assert_eq!(lengths, vec![16, 16, 16, 17, 17]);
    assert_eq!(result.curve.len(), 17);
    assert!(result.passive.is_some());

    for (i, record) in result.curve.records.iter().enumerate() {
        assert_eq!(record.iteration, i + 1);
    }
}

#[test]
fn test_kfold_is_reproducible() {
    let data = blobs(30);
    let evaluation = KFoldEvaluation::new(
        KFold::new(3, true, 9),
        SeedSampler::new(SeedSize::Count { count: 4 }, true, 9),
        1,
    );
    let a = evaluation.run(&margin_template(5), &data).unwrap();
    let b = evaluation.run(&margin_template(5), &data).unwrap();

    let sizes = |r: &ExperimentResult| {
        r.curve
            .records
            .iter()
            .map(|e| (e.labeled_size, e.unlabeled_size))
            .collect::<Vec<_>>()
    };
    assert_eq!(sizes(&a), sizes(&b));
    assert_eq!(a.fold_areas(ACCURACY), b.fold_areas(ACCURACY));
}

#[test]
fn test_holdout_runs_single_fold() {
    let data = blobs(30);
    let train = data.subset(&(0..24).collect::<Vec<_>>()).unwrap();
    let test = data.subset(&(24..30).collect::<Vec<_>>()).unwrap();
    let evaluation = KFoldEvaluation::new(
        KFold::new(2, true, 1),
        SeedSampler::new(SeedSize::Fraction { fraction: 0.25 }, true, 1),
        1,
    );
    let result = evaluation.run_holdout(&margin_template(4), &train, &test).unwrap();

    assert_eq!(result.folds_requested, 1);
    assert_eq!(result.curve.len(), 4);
    assert_eq!(result.curve.records[0].labeled_size, 6);
}

// ============================================================================
// Descriptors, registry and runner
// ============================================================================

const DESCRIPTOR: &str = r"
experiment:
  id: density-committee
  description: Density-weighted vote entropy

dataset:
  path: blobs.jsonl

evaluation:
  folds: 3
  seed: 5
  workers: 2
  initial_labeled:
    mode: count
    count: 4

algorithm:
  max_iterations: 6
  batch:
    mode: schedule
    sizes: [1, 2]

classifier:
  tag: committee
  params:
    size: 3
    seed: 1

strategy:
  tag: density_diversity
  params:
    beta: 1.0
    inner:
      tag: vote_entropy

stop_criteria:
  - tag: label_budget
    params:
      limit: 12

statistics:
  bootstrap_n: 200
";

#[test]
fn test_descriptor_through_registry() {
    let dir = tempfile::tempdir().unwrap();
    write_jsonl(&dir.path().join("blobs.jsonl"), &blobs(36));
    let path = dir.path().join("density.yaml");
    std::fs::write(&path, DESCRIPTOR).unwrap();

    let loader = ExperimentLoader::load_file(&path).unwrap();
    assert_eq!(loader.len(), 1);
    let config: &ExperimentConfig = &loader.experiments()[0];
    assert_eq!(config.dataset.path, dir.path().join("blobs.jsonl"));

    let outcome = ExperimentRunner::new().run_experiment(config).unwrap();
    assert_eq!(outcome.result.folds_contributed(), 3);
    for fold in &outcome.result.folds {
        assert_eq!(
            fold.outcome.stop_reason,
            StopReason::Criterion("label_budget".to_string())
        );
    }
    // 4 seed labels, then 1, 2, 2, 2, 2 per iteration; 13 labeled passes the budget
    assert_eq!(outcome.result.curve.len(), 5);
    assert!(outcome.report.area_statistics.is_some());
}

#[test]
fn test_registry_lists_builtin_components() {
    let registry = Registry::with_defaults();
    let strategies = registry.strategy_tags();
    for tag in [
        "bin_min",
        "density_diversity",
        "entropy",
        "least_confident",
        "margin",
        "mean_max_loss",
        "vote_entropy",
    ] {
        assert!(strategies.contains(&tag), "missing strategy {tag}");
    }
    assert!(registry.classifier_tags().contains(&"committee"));
}

// ============================================================================
// CLI Integration Tests
// ============================================================================

#[test]
fn test_cli_help_lists_commands() {
    let output = Command::new(env!("CARGO_BIN_EXE_active-eval"))
        .arg("--help")
        .output()
        .unwrap();

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success());
    assert!(stdout.contains("run"));
    assert!(stdout.contains("curve"));
    assert!(stdout.contains("compare"));
}

#[test]
fn test_cli_curve_on_saved_result() {
    let data = blobs(30);
    let evaluation = KFoldEvaluation::new(
        KFold::new(3, true, 2),
        SeedSampler::new(SeedSize::Count { count: 4 }, true, 2),
        1,
    );
    let result = evaluation.run(&margin_template(5), &data).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("result.json");
    result.save(&path).unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_active-eval"))
        .args(["curve", "--input"])
        .arg(&path)
        .args(["--metric", "accuracy"])
        .output()
        .unwrap();

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success());
    assert!(stdout.contains("Iterations: 5"));
    assert!(stdout.contains("Area under accuracy curve"));
}

#[test]
fn test_cli_compare_requires_two_inputs() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("only.json");
    std::fs::write(&path, "{}").unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_active-eval"))
        .args(["compare", "--input"])
        .arg(&path)
        .output()
        .unwrap();
    assert!(!output.status.success());
}
