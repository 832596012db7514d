//! Active-Eval CLI
//!
//! Pool-based active-learning experiments

use active_eval::{
    compare_experiments, ExperimentLoader, ExperimentResult, ExperimentRunner, FoldStatistics,
    LearningCurve, OutputFormat, Registry, RunnerConfig, StatConfig,
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "active-eval")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run experiment descriptors
    Run {
        /// Experiment descriptor files (glob pattern, repeatable)
        #[arg(long = "config", default_value = "experiments/*.yaml")]
        configs: Vec<String>,

        /// Fold workers (overrides every descriptor; 0 uses one per core)
        #[arg(long)]
        workers: Option<usize>,

        /// Output directory for results and reports
        #[arg(long)]
        output: Option<PathBuf>,

        /// Report format
        #[arg(long, value_enum, default_value_t = OutputFormat::Markdown)]
        format: OutputFormat,
    },

    /// Print the normalized area under a persisted learning curve
    Curve {
        /// Experiment result or learning curve JSON file
        #[arg(long)]
        input: PathBuf,

        /// Metric to integrate
        #[arg(long, default_value = "accuracy")]
        metric: String,
    },

    /// Compare two persisted experiment results (Welch's t-test over fold areas)
    Compare {
        /// Two experiment result JSON files
        #[arg(long = "input", num_args = 1, required = true)]
        inputs: Vec<PathBuf>,

        /// Metric whose curve areas are compared
        #[arg(long, default_value = "accuracy")]
        metric: String,

        /// Significance threshold
        #[arg(long, default_value = "0.05")]
        alpha: f64,
    },

    /// List registered strategies and classifiers
    Components,
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    match cli.command {
        Commands::Run {
            configs,
            workers,
            output,
            format,
        } => {
            tracing::info!(
                configs = ?configs,
                workers = ?workers,
                output = ?output,
                format = ?format,
                "Starting experiments"
            );

            let mut loader = ExperimentLoader::new();
            for pattern in &configs {
                if let Err(e) = loader.extend_glob(pattern) {
                    eprintln!("Failed to load descriptors from {pattern}: {e}");
                    std::process::exit(1);
                }
            }
            if loader.is_empty() {
                eprintln!("No experiment descriptors matched {configs:?}");
                std::process::exit(1);
            }

            let to_stdout = output.is_none();
            let runner = ExperimentRunner::with_config(RunnerConfig {
                workers,
                output_dir: output,
                format,
            });
            let summary = runner.run_all(&loader);

            for outcome in &summary.completed {
                if to_stdout {
                    match format.render(&outcome.report) {
                        Ok(rendered) => println!("{rendered}"),
                        Err(e) => eprintln!("Failed to render {}: {e}", outcome.experiment_id),
                    }
                    continue;
                }
                match runner.write_outputs(outcome) {
                    Ok(paths) => {
                        for path in paths {
                            println!("Wrote {}", path.display());
                        }
                    }
                    Err(e) => eprintln!("{e:#}"),
                }
            }

            println!(
                "\n{} of {} experiments completed",
                summary.completed.len(),
                loader.len()
            );
            for (id, error) in &summary.failed {
                eprintln!("  FAILED {id}: {error}");
            }
            if !summary.all_succeeded() {
                std::process::exit(1);
            }
        }
        Commands::Curve { input, metric } => {
            tracing::info!(input = %input.display(), metric = %metric, "Computing curve area");

            if let Ok(result) = ExperimentResult::load(&input) {
                print_area(&result.curve, &metric);
                if let Some(stats) =
                    FoldStatistics::of_experiment(&result, &metric, &StatConfig::default())
                {
                    println!(
                        "Fold areas: mean {:.4} ± {:.4}, 95% CI [{:.4}, {:.4}] over {} folds",
                        stats.mean, stats.std_dev, stats.ci.0, stats.ci.1, stats.folds
                    );
                }
                return;
            }

            match LearningCurve::load(&input) {
                Ok(curve) => print_area(&curve, &metric),
                Err(e) => {
                    eprintln!("Failed to load curve: {e}");
                    std::process::exit(1);
                }
            }
        }
        Commands::Compare {
            inputs,
            metric,
            alpha,
        } => {
            tracing::info!(inputs = ?inputs, metric = %metric, alpha, "Comparing experiments");

            let [a_path, b_path] = inputs.as_slice() else {
                eprintln!("compare needs exactly two --input files, got {}", inputs.len());
                std::process::exit(1);
            };
            let (a, b) = match (ExperimentResult::load(a_path), ExperimentResult::load(b_path)) {
                (Ok(a), Ok(b)) => (a, b),
                (Err(e), _) | (_, Err(e)) => {
                    eprintln!("Failed to load experiment result: {e}");
                    std::process::exit(1);
                }
            };

            println!("Comparison on {metric}");
            println!("==================");
            println!("A: {} ({} folds)", a_path.display(), a.folds_contributed());
            println!("B: {} ({} folds)", b_path.display(), b.folds_contributed());

            match compare_experiments(&a, &b, &metric, alpha) {
                Some(sig) => {
                    println!("t = {:.4}, df = {:.2}, p = {:.4}", sig.t_statistic, sig.degrees_of_freedom, sig.p_value);
                    println!("Cohen's d = {:.3} ({})", sig.cohens_d, sig.effect_interpretation);
                    println!(
                        "\nResult: {}",
                        if sig.is_significant { "SIGNIFICANT" } else { "not significant" }
                    );
                }
                None => {
                    println!("\nResult: not testable (need two folds with varying areas per side)");
                }
            }
        }
        Commands::Components => {
            let registry = Registry::with_defaults();
            println!("Strategies:");
            for tag in registry.strategy_tags() {
                println!("  - {tag}");
            }
            println!("Classifiers:");
            for tag in registry.classifier_tags() {
                println!("  - {tag}");
            }
        }
    }
}

fn print_area(curve: &LearningCurve, metric: &str) {
    println!("Iterations: {}", curve.len());
    match curve.area(metric) {
        Some(area) => println!("Area under {metric} curve: {area:.4}"),
        None => println!("Area under {metric} curve: undefined"),
    }
}
