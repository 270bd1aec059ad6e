//! Debouncer and grasp detector throughput.
//!
//! Simulates jittery contact: each key toggles begin/end every few
//! milliseconds of sim time while flush ticks run at 60 Hz.
//!
//! Run with: `cargo bench --bench debounce_benchmarks`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use semlog_core::handle::ObjectHandle;
use semlog_core::identity::SemanticEntity;
use semlog_events::debounce::Debouncer;
use semlog_events::grasp::{GraspDetector, OverlapGroup};

const FRAME: f64 = 1.0 / 60.0;

fn jitter_debouncer(keys: u32, frames: u32) -> usize {
    let mut d = Debouncer::new(0.12);
    let mut emitted = 0;
    for f in 0..frames {
        let now = f as f64 * FRAME;
        for k in 0..keys {
            // Every key flips state on a key-dependent period.
            if (f + k) % 3 == 0 {
                d.raw_begin(k, now);
            } else if (f + k) % 7 == 0 {
                d.raw_end(&k, now);
            }
        }
        d.flush_due(now);
        emitted += d.take_events().len();
    }
    d.flush_all();
    emitted + d.take_events().len()
}

fn grasp_cycle(objects: u32, frames: u32) -> usize {
    let owner = SemanticEntity::new(ObjectHandle::new(u32::MAX - 1, 0), "hand", "Hand");
    let items: Vec<SemanticEntity> = (0..objects)
        .map(|i| SemanticEntity::new(ObjectHandle::new(i, 0), format!("obj{i}"), "Thing"))
        .collect();
    let mut det = GraspDetector::new(owner, 0.55);
    let mut emitted = 0;
    for f in 0..frames {
        let now = f as f64 * FRAME;
        for (i, o) in items.iter().enumerate() {
            let phase = (f as usize + i) % 20;
            match phase {
                0 => det.on_group_begin(OverlapGroup::A, o.clone(), now),
                2 => det.on_group_begin(OverlapGroup::B, o.clone(), now),
                10 => det.on_group_end(OverlapGroup::B, o, now),
                12 => det.on_group_end(OverlapGroup::A, o, now),
                _ => {}
            }
        }
        det.fire_timers(now);
        emitted += det.take_events().len();
    }
    emitted
}

fn bench_debouncer(c: &mut Criterion) {
    let mut group = c.benchmark_group("debouncer_jitter");
    for keys in [8u32, 64, 256] {
        group.bench_with_input(BenchmarkId::from_parameter(keys), &keys, |b, &keys| {
            b.iter(|| black_box(jitter_debouncer(keys, 600)));
        });
    }
    group.finish();
}

fn bench_grasp(c: &mut Criterion) {
    let mut group = c.benchmark_group("grasp_cycle");
    for objects in [4u32, 32] {
        group.bench_with_input(BenchmarkId::from_parameter(objects), &objects, |b, &n| {
            b.iter(|| black_box(grasp_cycle(n, 600)));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_debouncer, bench_grasp);
criterion_main!(benches);
