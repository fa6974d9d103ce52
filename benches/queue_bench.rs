//! Benchmarks for the engine's queues and dispatch path.
//!
//! Benchmarks cover:
//! - WorkQueue enqueue/dequeue with mixed priorities
//! - CallbackChannel push and drain
//! - End-to-end submit -> worker -> callback -> tick round trips

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use offload_pool::config::EngineConfig;
use offload_pool::core::{CallbackChannel, Engine, WorkQueue};
use offload_pool::util::Priority;

// ============================================================================
// Queue operations
// ============================================================================

fn bench_work_queue(c: &mut Criterion) {
    let mut group = c.benchmark_group("work_queue");
    for size in [100_u64, 1_000, 10_000] {
        group.throughput(Throughput::Elements(size));
        group.bench_with_input(BenchmarkId::new("enqueue_dequeue", size), &size, |b, &size| {
            let queue = WorkQueue::new();
            b.iter(|| {
                for i in 0..size {
                    let priority = if i % 8 == 0 { Priority::High } else { Priority::Normal };
                    queue.enqueue(i, priority);
                }
                while let Some(item) = queue.try_dequeue() {
                    black_box(item);
                }
            });
        });
    }
    group.finish();
}

fn bench_callback_channel(c: &mut Criterion) {
    let mut group = c.benchmark_group("callback_channel");
    for size in [100_u64, 1_000] {
        group.throughput(Throughput::Elements(size));
        group.bench_with_input(BenchmarkId::new("push_drain", size), &size, |b, &size| {
            let channel = CallbackChannel::new();
            let hits = Arc::new(AtomicUsize::new(0));
            b.iter(|| {
                for _ in 0..size {
                    let hits = Arc::clone(&hits);
                    channel.push(
                        Box::new(move || {
                            hits.fetch_add(1, Ordering::Relaxed);
                        }),
                        Priority::Normal,
                    );
                }
                black_box(channel.drain_once());
            });
        });
    }
    group.finish();
}

// ============================================================================
// End-to-end
// ============================================================================

fn bench_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine");
    group.sample_size(20);
    for threads in [1_usize, 4] {
        group.bench_with_input(BenchmarkId::new("submit_100_and_wait", threads), &threads, |b, &threads| {
            let mut engine = Engine::new(EngineConfig::new().with_max_threads(threads)).unwrap();
            let hits = Arc::new(AtomicUsize::new(0));
            b.iter(|| {
                for i in 0..100_u64 {
                    let hits = Arc::clone(&hits);
                    engine
                        .submit_with_callback(
                            move || Ok(i.wrapping_mul(31)),
                            move |value| {
                                black_box(value.ok());
                                hits.fetch_add(1, Ordering::Relaxed);
                            },
                            Priority::Normal,
                        )
                        .unwrap();
                }
                assert!(engine.wait_all(Duration::from_secs(30)));
            });
            engine.shutdown();
        });
    }
    group.finish();
}

criterion_group!(benches, bench_work_queue, bench_callback_channel, bench_round_trip);
criterion_main!(benches);
