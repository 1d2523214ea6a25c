//! Basic benchmarks for the `bucket_pool` crate.
#![allow(
    missing_docs,
    reason = "No need for API documentation in benchmark code"
)]

use std::hint::black_box;
use std::iter;
use std::time::Instant;

use alloc_tracker::Allocator;
use bucket_pool::{PoolAllocator, SmartPoolAllocator};
use criterion::{Criterion, criterion_group, criterion_main};
use new_zealand::nz;

criterion_group!(benches, entrypoint);
criterion_main!(benches);

#[global_allocator]
static ALLOCATOR: Allocator<std::alloc::System> = Allocator::system();

type TestItem = [u64; 4];
const TEST_VALUE: TestItem = [1, 2, 3, 4];

fn small_pool() -> PoolAllocator<TestItem> {
    PoolAllocator::builder().bucket_size(nz!(65_536)).build()
}

fn entrypoint(c: &mut Criterion) {
    let allocs = alloc_tracker::Session::new();

    let mut group = c.benchmark_group("bp_basic");

    let allocs_op = allocs.operation("build_empty");
    group.bench_function("build_empty", |b| {
        b.iter_custom(|iters| {
            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for _ in 0..iters {
                drop(black_box(small_pool()));
            }

            start.elapsed()
        });
    });

    let allocs_op = allocs.operation("allocate_bump");
    group.bench_function("allocate_bump", |b| {
        b.iter_custom(|iters| {
            let mut pools = iter::repeat_with(small_pool)
                .take(usize::try_from(iters).unwrap())
                .collect::<Vec<_>>();

            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for pool in &mut pools {
                _ = black_box(pool.allocate(black_box(TEST_VALUE)));
            }

            start.elapsed()
        });
    });

    let allocs_op = allocs.operation("allocate_recycled");
    group.bench_function("allocate_recycled", |b| {
        b.iter_custom(|iters| {
            let mut pool = small_pool();

            // Leave one slot on the free list so every iteration reuses it.
            let warm = pool.allocate(TEST_VALUE);
            pool.deallocate(warm);

            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for _ in 0..iters {
                let slot = pool.allocate(black_box(TEST_VALUE));
                pool.deallocate(black_box(slot));
            }

            start.elapsed()
        });
    });

    let allocs_op = allocs.operation("deallocate_10k");
    group.bench_function("deallocate_10k", |b| {
        b.iter_custom(|iters| {
            let mut pools = iter::repeat_with(small_pool)
                .take(usize::try_from(iters).unwrap())
                .collect::<Vec<_>>();

            let slot_sets = pools
                .iter_mut()
                .map(|pool| {
                    iter::repeat_with(|| pool.allocate(TEST_VALUE))
                        .take(10_000)
                        .collect::<Vec<_>>()
                })
                .collect::<Vec<_>>();

            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for (pool, slot_set) in pools.iter_mut().zip(&slot_sets) {
                for slot in slot_set {
                    pool.deallocate(*slot);
                }
            }

            start.elapsed()
        });
    });

    let allocs_op = allocs.operation("smart_box_roundtrip");
    group.bench_function("smart_box_roundtrip", |b| {
        b.iter_custom(|iters| {
            let allocator = SmartPoolAllocator::from(small_pool());

            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for _ in 0..iters {
                drop(black_box(allocator.allocate(black_box(TEST_VALUE))));
            }

            start.elapsed()
        });
    });

    let allocs_op = allocs.operation("smart_rc_clone_drop");
    group.bench_function("smart_rc_clone_drop", |b| {
        b.iter_custom(|iters| {
            let allocator = SmartPoolAllocator::from(small_pool());
            let shared = allocator.allocate_shared(TEST_VALUE);

            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for _ in 0..iters {
                drop(black_box(shared.clone()));
            }

            start.elapsed()
        });
    });

    group.finish();

    allocs.print_to_stdout();
}
