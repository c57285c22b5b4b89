//! Criterion benchmarks for guided interpolation core operations.
//!
//! Run with: cargo bench -p guided_interp_core
//! Run specific: cargo bench -p guided_interp_core -- gain

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ndarray::Array3;
use rand::prelude::*;

use guided_interp_core::{
    AnisotropicGridder, BlendingConfig, ConfidenceScaling, EigenTensors3, GainNormalizer,
    LocalOrientFilter, SparseGrid,
};

// =============================================================================
// Helper Functions for Test Data Generation
// =============================================================================

fn layered_volume(n: usize, seed: u64) -> Array3<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    Array3::from_shape_fn((n, n, n), |(i3, i2, i1)| {
        let phase = i1 as f32 + 0.1 * i2 as f32 - 0.05 * i3 as f32;
        (phase * 0.5).sin() + 0.1 * (rng.gen::<f32>() - 0.5)
    })
}

fn scaled_tensors(image: &Array3<f32>) -> EigenTensors3<f32> {
    let mut tensors = LocalOrientFilter::new(4.0)
        .apply_for_tensors(image.view())
        .expect("tensors");
    let ones = Array3::from_elem(image.dim(), 0.8f32);
    let scaling = ConfidenceScaling::default();
    tensors
        .scale_with_confidence(ones.clone(), ones.clone(), ones, None, &scaling)
        .expect("scaling");
    tensors
}

fn random_wells(n: usize, wells: usize, seed: u64) -> SparseGrid<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut sparse = SparseGrid::empty((n, n, n));
    for _ in 0..wells {
        let i3 = rng.gen_range(0..n);
        let i2 = rng.gen_range(0..n);
        for i1 in (0..n).step_by(2) {
            sparse.values[[i3, i2, i1]] = 2.0 + rng.gen::<f32>();
            sparse.known[[i3, i2, i1]] = true;
        }
    }
    sparse
}

// =============================================================================
// Benchmarks
// =============================================================================

fn bench_gain(c: &mut Criterion) {
    let mut group = c.benchmark_group("gain");
    for n in [32, 64] {
        let image = layered_volume(n, 7);
        let normalizer = GainNormalizer::new(100.0).expect("gain");
        group.throughput(Throughput::Elements((n * n * n) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
            b.iter(|| normalizer.apply(black_box(image.view())))
        });
    }
    group.finish();
}

fn bench_structure_tensors(c: &mut Criterion) {
    let mut group = c.benchmark_group("structure_tensors");
    for n in [16, 32] {
        let image = layered_volume(n, 11);
        let lof = LocalOrientFilter::new(4.0);
        group.throughput(Throughput::Elements((n * n * n) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
            b.iter(|| lof.apply_for_tensors(black_box(image.view())))
        });
    }
    group.finish();
}

fn bench_gridding(c: &mut Criterion) {
    let mut group = c.benchmark_group("gridding");
    group.sample_size(10);
    for n in [16, 32] {
        let image = layered_volume(n, 13);
        let gridder = AnisotropicGridder::new(scaled_tensors(&image), BlendingConfig::default())
            .expect("gridder");
        let sparse = random_wells(n, 4, 17);
        group.throughput(Throughput::Elements((n * n * n) as u64));

        group.bench_with_input(BenchmarkId::new("nearest", n), &n, |b, _| {
            b.iter(|| gridder.grid_nearest(black_box(&sparse)))
        });

        let nearest = gridder.grid_nearest(&sparse).expect("nearest");
        let (distance, values) = (nearest.distance.view(), nearest.values.view());
        group.bench_with_input(BenchmarkId::new("blended", n), &n, |b, _| {
            b.iter(|| gridder.grid_blended(black_box(distance), values))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_gain, bench_structure_tensors, bench_gridding);
criterion_main!(benches);
