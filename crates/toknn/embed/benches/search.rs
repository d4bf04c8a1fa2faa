//! Benchmarks for batched top-k search.

use criterion::{Criterion, black_box, criterion_group, criterion_main};

fn synthetic(rows: usize, dim: usize) -> toknn_embed::NormalizedMatrix {
    let raw = ndarray::Array2::from_shape_fn((rows, dim), |(i, j)| ((i * dim + j) as f32).sin());
    toknn_embed::normalize(raw)
}

fn bench_search(c: &mut Criterion) {
    let matrix = synthetic(4096, 256);

    c.bench_function("knn_cpu_4096x256_k10", |b| {
        let backend = toknn_embed::CpuBackend::new(&matrix);
        b.iter(|| toknn_embed::search(black_box(&backend), 10, 1024).unwrap())
    });

    c.bench_function("knn_candle_4096x256_k10", |b| {
        let backend = toknn_embed::gpu::CandleBackend::cpu(&matrix).unwrap();
        b.iter(|| toknn_embed::search(black_box(&backend), 10, 1024).unwrap())
    });

    let scores: Vec<f32> = (0..150_000).map(|i| (i as f32 * 0.013).sin()).collect();
    c.bench_function("select_top_k_150k_k11", |b| {
        b.iter(|| toknn_embed::topk::select_top_k(black_box(&scores).iter().copied(), 11))
    });
}

criterion_group!(benches, bench_search);
criterion_main!(benches);
