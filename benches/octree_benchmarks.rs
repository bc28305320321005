use std::f64::consts;
use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use gravity_core::{Body, Engine, EngineConfig, Material, Octree};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Spherically-distributed bodies, matching the distribution the engine sees
/// in practice (a roughly isotropic cloud around the origin) rather than a
/// worst-case degenerate clustering.
fn generate_bodies(count: usize, seed: u64, radius: f64) -> Vec<Body> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut bodies = Vec::with_capacity(count);

    for _ in 0..count {
        let theta = rng.gen_range(0.0..consts::TAU);
        let phi = rng.gen_range(0.0..consts::PI);
        let r = rng.gen_range(0.0..radius);

        let position = lin_alg::f64::Vec3::new(
            r * phi.sin() * theta.cos(),
            r * phi.sin() * theta.sin(),
            r * phi.cos(),
        );
        let mass = rng.gen_range(1.0..100.0);
        bodies.push(Body::new(position, lin_alg::f64::Vec3::new_zero(), mass, Material::Earth));
    }

    bodies
}

fn bench_tree_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("octree_build");

    for &count in &[10usize, 100, 1_000, 10_000] {
        let bodies = generate_bodies(count, 42, 500.0);
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("bodies", count), &count, |b, _| {
            b.iter(|| {
                let mut tree = Octree::new();
                tree.build(black_box(&bodies)).unwrap();
                black_box(&tree);
            });
        });
    }

    group.finish();
}

fn bench_force_query(c: &mut Criterion) {
    let mut group = c.benchmark_group("octree_force_query");

    for &count in &[10usize, 100, 1_000, 10_000] {
        let bodies = generate_bodies(count, 42, 500.0);
        let mut tree = Octree::new();
        tree.build(&bodies).unwrap();

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::new("bodies", count), &count, |b, _| {
            let target = &bodies[count / 2];
            b.iter(|| {
                black_box(tree.calculate_force(black_box(target), 1.0, 1.0));
            });
        });
    }

    group.finish();
}

fn bench_engine_tick(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine_tick");

    for &count in &[10usize, 100, 1_000, 10_000] {
        let bodies = generate_bodies(count, 7, 500.0);
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("bodies", count), &count, |b, _| {
            b.iter_batched(
                || Engine::new_with(bodies.clone(), EngineConfig::default()),
                |mut engine| {
                    engine.update(black_box(0.016)).unwrap();
                    black_box(engine);
                },
                criterion::BatchSize::LargeInput,
            );
        });
    }

    group.finish();
}

criterion_group!(benches, bench_tree_build, bench_force_query, bench_engine_tick);
criterion_main!(benches);
