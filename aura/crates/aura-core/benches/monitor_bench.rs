//! Aura Core Benchmarks
//!
//! Monitor fast paths, inflation, exception dispatch and stop-the-world
//! latency. Run with: `cargo bench --package aura-core`

use aura_core::object::builtin;
use aura_core::thread::StackBounds;
use aura_core::unwind::{MethodId, MethodInfo, MethodTable, PcRange, TryRegion};
use aura_core::{Runtime, RuntimeBuilder, VmConfig};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;
use std::time::Duration;

const CATCHER: MethodId = MethodId(1);
const CALLEE: MethodId = MethodId(2);

fn create_runtime() -> Runtime {
    let methods = MethodTable::new();
    methods
        .register(
            MethodInfo::new(CATCHER, "Bench.catcher", PcRange::new(0x1000, 0x1100)).with_region(TryRegion::new(
                PcRange::new(0x1000, 0x1080),
                Some(builtin::RUNTIME_EXCEPTION),
                0x10f0,
            )),
        )
        .unwrap();
    methods
        .register(MethodInfo::new(CALLEE, "Bench.callee", PcRange::new(0x2000, 0x2100)))
        .unwrap();

    RuntimeBuilder::new()
        .with_config(VmConfig {
            spin_limit: 0,
            stats_enabled: false,
            ..Default::default()
        })
        .with_metadata(Arc::new(methods))
        .build()
        .unwrap()
}

fn bench_thin_locks(c: &mut Criterion) {
    let runtime = create_runtime();
    let ctx = runtime.attach_with_bounds(Some("bench"), StackBounds::unknown()).unwrap();
    let obj = runtime.allocate(builtin::OBJECT).unwrap();
    let monitors = runtime.monitors();

    let mut group = c.benchmark_group("thin_lock");

    group.bench_function("enter_exit", |b| {
        b.iter(|| {
            monitors.acquire(&ctx, black_box(obj)).unwrap();
            monitors.release(&ctx, black_box(obj)).unwrap();
        })
    });

    for depth in [2u32, 8, 64] {
        group.bench_with_input(BenchmarkId::new("recursive", depth), &depth, |b, &depth| {
            b.iter(|| {
                for _ in 0..depth {
                    monitors.acquire(&ctx, obj).unwrap();
                }
                for _ in 0..depth {
                    monitors.release(&ctx, obj).unwrap();
                }
            })
        });
    }

    group.bench_function("runtime_enter_exit", |b| {
        b.iter(|| {
            black_box(runtime.monitor_enter(&ctx, obj).unwrap());
            black_box(runtime.monitor_exit(&ctx, obj).unwrap());
        })
    });

    group.finish();
}

fn bench_inflation(c: &mut Criterion) {
    let runtime = create_runtime();
    let ctx = runtime.attach_with_bounds(Some("bench"), StackBounds::unknown()).unwrap();
    let obj = runtime.allocate(builtin::OBJECT).unwrap();
    let monitors = runtime.monitors();

    let mut group = c.benchmark_group("inflation");

    // wait inflates, release deflates
    group.bench_function("wait_zero_round_trip", |b| {
        b.iter(|| {
            monitors.acquire(&ctx, obj).unwrap();
            black_box(monitors.wait(&ctx, obj, Some(Duration::ZERO)).unwrap());
            monitors.release(&ctx, obj).unwrap();
        })
    });

    group.bench_function("recursion_overflow", |b| {
        b.iter(|| {
            for _ in 0..300 {
                monitors.acquire(&ctx, obj).unwrap();
            }
            for _ in 0..300 {
                monitors.release(&ctx, obj).unwrap();
            }
        })
    });

    group.finish();
}

fn bench_exceptions(c: &mut Criterion) {
    let runtime = create_runtime();
    let ctx = runtime.attach_with_bounds(Some("bench"), StackBounds::unknown()).unwrap();
    let exception = runtime.allocate(builtin::RUNTIME_EXCEPTION).unwrap();
    let obj = runtime.allocate(builtin::OBJECT).unwrap();

    let mut group = c.benchmark_group("unwind");

    for callees in [0usize, 4, 16] {
        group.bench_with_input(BenchmarkId::new("throw_caught", callees), &callees, |b, &callees| {
            b.iter(|| {
                runtime.push_frame(&ctx, CATCHER, 0x1040, 0x7000).unwrap();
                for _ in 0..callees {
                    runtime.push_frame(&ctx, CALLEE, 0x2010, 0x6000).unwrap();
                }
                black_box(runtime.throw(&ctx, exception).unwrap());
                runtime.pop_frame(&ctx).unwrap();
            })
        });
    }

    group.bench_function("throw_releasing_monitors", |b| {
        b.iter(|| {
            runtime.push_frame(&ctx, CATCHER, 0x1040, 0x7000).unwrap();
            runtime.push_frame(&ctx, CALLEE, 0x2010, 0x6000).unwrap();
            runtime.monitor_enter(&ctx, obj).unwrap();
            runtime.monitor_enter(&ctx, obj).unwrap();
            black_box(runtime.throw(&ctx, exception).unwrap());
            runtime.pop_frame(&ctx).unwrap();
        })
    });

    group.finish();
}

fn bench_safepoints(c: &mut Criterion) {
    let mut group = c.benchmark_group("safepoint");

    for threads in [1usize, 16, 128] {
        let runtime = create_runtime();
        let contexts: Vec<_> = (0..threads)
            .map(|_| {
                let ctx = runtime.attach_with_bounds(None, StackBounds::unknown()).unwrap();
                runtime.enter_native(&ctx);
                ctx
            })
            .collect();

        group.bench_with_input(BenchmarkId::new("stop_resume_native", threads), &threads, |b, _| {
            b.iter(|| {
                black_box(runtime.request_stop_the_world(None).unwrap());
                runtime.resume_all().unwrap();
            })
        });

        for ctx in &contexts {
            runtime.leave_native(ctx);
        }
    }

    let runtime = create_runtime();
    let ctx = runtime.attach_with_bounds(Some("bench"), StackBounds::unknown()).unwrap();
    group.bench_function("poll_fast_path", |b| b.iter(|| runtime.poll(black_box(&ctx))));

    group.finish();
}

criterion_group!(benches, bench_thin_locks, bench_inflation, bench_exceptions, bench_safepoints);
criterion_main!(benches);
