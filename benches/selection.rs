//! Benchmarks for batch selection and similarity cache construction

#![allow(clippy::cast_precision_loss, clippy::unwrap_used)]

use active_eval::{BatchSelector, BatchSize, Dataset, DistanceFunction, Example, Schema, SimilarityCache};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn create_utilities(n: usize) -> Vec<f64> {
    (0..n).map(|i| ((i * 7919) % 1000) as f64 / 1000.0).collect()
}

fn create_dataset(n: usize, dim: usize) -> Dataset {
    let schema = Schema::single_label(dim, vec!["a".to_string(), "b".to_string()]);
    let examples = (0..n)
        .map(|i| {
            let features = (0..dim).map(|d| ((i * 31 + d * 17) % 97) as f64 / 97.0).collect();
            Example::single(features, i % 2)
        })
        .collect();
    Dataset::from_examples(schema, examples).unwrap()
}

fn benchmark_batch_selection(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_selection");

    for size in &[100, 1_000, 10_000] {
        let utilities = create_utilities(*size);
        let selector = BatchSelector::new(BatchSize::Fixed { size: 10 });

        group.bench_function(format!("select_10_of_{size}"), |b| {
            b.iter(|| selector.select(black_box(&utilities), true, 1));
        });
    }

    group.finish();
}

fn benchmark_similarity_cache(c: &mut Criterion) {
    let mut group = c.benchmark_group("similarity_cache");

    for size in &[50, 200, 500] {
        let data = create_dataset(*size, 8);

        group.bench_function(format!("in_memory_{size}_rows"), |b| {
            b.iter(|| SimilarityCache::in_memory(black_box(&data), DistanceFunction::Euclidean));
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_batch_selection, benchmark_similarity_cache);
criterion_main!(benches);
