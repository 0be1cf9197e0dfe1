/*!
 * Synchronization Primitives Benchmarks
 *
 * Lock acquisition fast paths, fair vs non-fair handoff, and blocking
 * queue throughput
 */

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use qsync::{BoundedBlockingQueue, ReentrantLock};
use std::sync::Arc;
use std::thread;

fn bench_uncontended_lock(c: &mut Criterion) {
    let mut group = c.benchmark_group("uncontended_lock");

    for fair in [false, true] {
        let lock = ReentrantLock::with_fairness(fair);
        group.bench_with_input(
            BenchmarkId::from_parameter(if fair { "fair" } else { "nonfair" }),
            &lock,
            |b, lock| {
                b.iter(|| {
                    lock.lock();
                    black_box(lock.is_locked());
                    lock.unlock().unwrap();
                });
            },
        );
    }

    group.finish();
}

fn bench_reentrant_acquire(c: &mut Criterion) {
    let lock = ReentrantLock::new();
    lock.lock();

    c.bench_function("reentrant_acquire", |b| {
        b.iter(|| {
            lock.lock();
            black_box(lock.hold_count());
            lock.unlock().unwrap();
        });
    });

    lock.unlock().unwrap();
}

fn bench_try_lock_probe(c: &mut Criterion) {
    let lock = ReentrantLock::fair();

    c.bench_function("try_lock_probe", |b| {
        b.iter(|| {
            if black_box(lock.try_lock()) {
                lock.unlock().unwrap();
            }
        });
    });
}

fn bench_queue_offer_poll(c: &mut Criterion) {
    let queue = BoundedBlockingQueue::new(64).unwrap();

    c.bench_function("queue_offer_poll", |b| {
        b.iter(|| {
            queue.offer(black_box(1u64)).ok();
            black_box(queue.poll());
        });
    });
}

fn bench_queue_handoff(c: &mut Criterion) {
    const BATCH: usize = 100;
    let mut group = c.benchmark_group("queue_handoff");

    for capacity in [1usize, 8, 64] {
        group.bench_with_input(
            BenchmarkId::from_parameter(capacity),
            &capacity,
            |b, &capacity| {
                b.iter(|| {
                    let queue = Arc::new(BoundedBlockingQueue::new(capacity).unwrap());
                    let queue_clone = queue.clone();

                    let consumer = thread::spawn(move || {
                        for _ in 0..BATCH {
                            black_box(queue_clone.take().unwrap());
                        }
                    });

                    for i in 0..BATCH {
                        queue.put(i).unwrap();
                    }
                    consumer.join().unwrap();
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_uncontended_lock,
    bench_reentrant_acquire,
    bench_try_lock_probe,
    bench_queue_offer_poll,
    bench_queue_handoff
);
criterion_main!(benches);
