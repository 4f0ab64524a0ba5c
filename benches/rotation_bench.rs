//! Benchmarks for the rotation stack.
//!
//! Benchmarks cover:
//! - Pool acquire/release churn and rotation
//! - Block-list lookups at realistic sizes
//! - Turn scheduler advance under contention
//! - Session-keyed identity derivation

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;
use std::sync::Arc;
use std::time::Duration;

use turnwheel::core::{
    AllocationMode, JobPayload, ResourceIdentity, ResourcePool, RetryPolicy, SchedulerLimits,
    Task, TurnScheduler,
};
use turnwheel::infra::BlockListStore;

// ============================================================================
// Helper Functions
// ============================================================================

fn identities(count: u16) -> Vec<ResourceIdentity> {
    (1..=count)
        .map(|n| ResourceIdentity {
            host: format!("10.20.{}.{}", n / 250, n % 250),
            port: 3128,
            username: Some("bench".into()),
            password: Some("secret".into()),
        })
        .collect()
}

fn fixed_pool(count: u16) -> ResourcePool {
    ResourcePool::new(
        AllocationMode::FixedPool(identities(count)),
        BlockListStore::in_memory(Duration::from_secs(48 * 60 * 60)),
        3,
        Duration::from_secs(60),
    )
}

fn scene_tasks(count: usize) -> Vec<Task> {
    (0..count)
        .map(|n| {
            Task::new(
                JobPayload::SceneImage {
                    prompt: format!("scene {n}"),
                    scene_index: n,
                },
                3,
            )
        })
        .collect()
}

// ============================================================================
// Pool Benchmarks
// ============================================================================

fn bench_pool_acquire_release(c: &mut Criterion) {
    let mut group = c.benchmark_group("pool_acquire_release");
    for size in [4_u16, 32, 256] {
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let pool = fixed_pool(size);
            b.iter(|| {
                let identity = pool.acquire(0).unwrap();
                black_box(&identity);
                pool.release(0, false);
            });
        });
    }
    group.finish();
}

fn bench_pool_rotation(c: &mut Criterion) {
    c.bench_function("pool_rotate", |b| {
        // Rotation blocks a record permanently, so every iteration needs a
        // fresh pool.
        b.iter_batched(
            || {
                let pool = fixed_pool(64);
                pool.acquire(0).unwrap();
                pool
            },
            |pool| black_box(pool.rotate(0, "bench").unwrap()),
            criterion::BatchSize::SmallInput,
        );
    });
}

fn bench_session_derivation(c: &mut Criterion) {
    c.bench_function("session_derive", |b| {
        let pool = ResourcePool::new(
            AllocationMode::SessionKeyed {
                base: ResourceIdentity {
                    host: "gw.example.net".into(),
                    port: 9000,
                    username: Some("tenant".into()),
                    password: Some("secret".into()),
                },
            },
            BlockListStore::in_memory(Duration::from_secs(3600)),
            3,
            Duration::from_secs(60),
        );
        let mut n = 0_u64;
        b.iter(|| {
            n += 1;
            black_box(pool.derive_for_session(&format!("session-{n}")));
        });
    });
}

// ============================================================================
// Block-list Benchmarks
// ============================================================================

fn bench_blocklist_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("blocklist_lookup");
    for size in [16_usize, 256, 4096] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let mut store = BlockListStore::in_memory(Duration::from_secs(3600));
            for n in 0..size {
                store.insert(&format!("10.30.0.{n}:3128"), "bench", 1000).unwrap();
            }
            b.iter(|| black_box(store.is_blocked("10.30.0.7:3128", 1500)));
        });
    }
    group.finish();
}

// ============================================================================
// Scheduler Benchmarks
// ============================================================================

fn bench_turn_advance(c: &mut Criterion) {
    c.bench_function("scheduler_turn_advance", |b| {
        b.iter_batched(
            || {
                let scheduler = TurnScheduler::new(
                    SchedulerLimits {
                        max_voices: 2,
                        poll_interval: Duration::from_millis(1),
                    },
                    RetryPolicy::default(),
                );
                scheduler.add_voice(0, scene_tasks(64)).unwrap();
                scheduler
            },
            |scheduler| {
                while let Some(task) = scheduler.next_task(0) {
                    black_box(&task);
                    scheduler.complete_task(0, true, false, None);
                }
            },
            criterion::BatchSize::SmallInput,
        );
    });
}

fn bench_concurrent_acquire(c: &mut Criterion) {
    c.bench_function("pool_concurrent_acquire_4_workers", |b| {
        let pool = Arc::new(fixed_pool(16));
        b.iter(|| {
            let handles: Vec<_> = (0..4)
                .map(|worker| {
                    let pool = Arc::clone(&pool);
                    std::thread::spawn(move || {
                        let identity = pool.acquire(worker).unwrap();
                        black_box(&identity);
                        pool.release(worker, false);
                    })
                })
                .collect();
            for handle in handles {
                handle.join().unwrap();
            }
        });
    });
}

criterion_group!(
    benches,
    bench_pool_acquire_release,
    bench_pool_rotation,
    bench_session_derivation,
    bench_blocklist_lookup,
    bench_turn_advance,
    bench_concurrent_acquire
);
criterion_main!(benches);
