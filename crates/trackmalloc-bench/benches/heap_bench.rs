//! Allocator benchmarks.
//!
//! The untracked groups run first; the configuration is one-shot per
//! process, so tracking is committed once between the groups and every
//! later measurement pays the header/accounting overhead.

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use trackmalloc_heap::{self as heap, Category, FailStrategy};

const SIZES: &[usize] = &[16, 64, 256, 1024, 4096, 32768];

fn bench_untracked_alloc_free_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("untracked_alloc_free_cycle");

    for &size in SIZES {
        group.bench_with_input(BenchmarkId::new("backend", size), &size, |b, &sz| {
            b.iter(|| {
                let alloc = heap::allocate(sz, Category::Test, FailStrategy::ReturnNull).unwrap();
                criterion::black_box(alloc.ptr);
                unsafe { heap::deallocate_sized(alloc.ptr, alloc.usable) };
            });
        });
    }
    group.finish();
}

fn bench_untracked_good_size(c: &mut Criterion) {
    let mut group = c.benchmark_group("untracked_good_size");
    group.bench_function("sweep", |b| {
        b.iter(|| {
            for &size in SIZES {
                criterion::black_box(heap::good_size(size));
            }
        });
    });
    group.finish();
}

fn bench_tracked_alloc_free_cycle(c: &mut Criterion) {
    heap::initialize("summary", "").expect("summary configuration");

    let mut group = c.benchmark_group("summary_alloc_free_cycle");
    for &size in SIZES {
        group.bench_with_input(BenchmarkId::new("tracked", size), &size, |b, &sz| {
            b.iter(|| {
                let alloc = heap::allocate(sz, Category::Test, FailStrategy::ReturnNull).unwrap();
                criterion::black_box(alloc.ptr);
                unsafe { heap::deallocate_sized(alloc.ptr, alloc.usable) };
            });
        });
    }
    group.finish();
}

fn bench_tracked_realloc_ladder(c: &mut Criterion) {
    heap::initialize("summary", "").expect("summary configuration");

    let mut group = c.benchmark_group("summary_realloc_ladder");
    group.bench_function("64B_to_32KB", |b| {
        b.iter(|| {
            let mut alloc = heap::allocate(64, Category::Test, FailStrategy::ReturnNull).unwrap();
            let mut size = 64usize;
            while size < 32768 {
                size *= 4;
                alloc = unsafe {
                    heap::reallocate(alloc.ptr, size, Category::Test, FailStrategy::ReturnNull)
                }
                .unwrap();
            }
            unsafe { heap::deallocate_sized(alloc.ptr, alloc.usable) };
        });
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_untracked_alloc_free_cycle,
    bench_untracked_good_size,
    bench_tracked_alloc_free_cycle,
    bench_tracked_realloc_ladder
);
criterion_main!(benches);
