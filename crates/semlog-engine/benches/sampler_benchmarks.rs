//! World-state sampling cost.
//!
//! A grid of falling balls in a rapier3d world; each iteration steps the
//! world once and runs a full capture/apply/commit pass.
//!
//! Run with: `cargo bench --bench sampler_benchmarks`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use semlog_engine::prelude::*;
use semlog_engine::world_state::sampler::WorldStateSampler;

const DT: f64 = 1.0 / 60.0;

fn scene(objects: u32) -> (PhysicsWorld, SemanticRegistry) {
    let mut world = PhysicsWorld::with_earth_gravity();
    let mut registry = SemanticRegistry::new();
    let body = PhysicsBody::new(BodyKind::Dynamic, ColliderShape::Ball { radius: 2.0 });
    for i in 0..objects {
        let handle = ObjectHandle::new(i, 0);
        let pose = EntityPose::at(Vec3::new((i % 16) as f64 * 10.0, (i / 16) as f64 * 10.0, 500.0));
        world.register_body(handle, pose, Vec3::ZERO, &body);
        registry
            .register(RegistryEntry::new(
                SemanticEntity::new(handle, format!("ball{i}"), "Ball"),
                ObjectKind::Actor,
            ))
            .expect("unique ids");
    }
    registry.init();
    (world, registry)
}

fn sampler_for(registry: &SemanticRegistry) -> WorldStateSampler {
    WorldStateSampler::from_registry(
        registry,
        PoseThresholds::new(0.5, 0.1),
        FrameConversion::default(),
        3.0,
    )
}

fn bench_sample_pass(c: &mut Criterion) {
    let mut group = c.benchmark_group("sample_pass");
    for objects in [16u32, 256, 1024] {
        let (world, registry) = scene(objects);
        let mut sampler = sampler_for(&registry);
        group.bench_with_input(BenchmarkId::from_parameter(objects), &objects, |b, _| {
            b.iter(|| {
                let frame = sampler.capture(0.0, &world, &registry);
                let pass = sampler.apply(&frame);
                black_box(pass.document.as_ref().map(|d| d.record_count()));
            });
        });
    }
    group.finish();
}

fn bench_step_and_sample(c: &mut Criterion) {
    let mut group = c.benchmark_group("step_and_sample");
    group.sample_size(20);
    for objects in [16u32, 256] {
        group.bench_with_input(BenchmarkId::from_parameter(objects), &objects, |b, &n| {
            b.iter(|| {
                let (mut world, registry) = scene(n);
                let mut sampler = sampler_for(&registry);
                let mut written = 0usize;
                for tick in 0..60 {
                    world.step(DT);
                    let frame = sampler.capture(tick as f64 * DT, &world, &registry);
                    let pass = sampler.apply(&frame);
                    if let Some(doc) = &pass.document {
                        written += doc.entities.len();
                    }
                    sampler.commit(pass.commit);
                }
                black_box(written)
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_sample_pass, bench_step_and_sample);
criterion_main!(benches);
