//! Allocator backend benchmarks.

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use heapreplay_alloc::{AllocatorBackend, BackendRegistry};

fn bench_alloc_free_cycle(c: &mut Criterion) {
    let registry = BackendRegistry::with_builtin();
    let sizes: &[usize] = &[16, 64, 256, 1024, 4096, 32768];
    let mut group = c.benchmark_group("backend_alloc_free");

    for name in registry.names() {
        let backend = registry.select(name).backend;
        for &size in sizes {
            group.bench_with_input(BenchmarkId::new(name, size), &size, |b, &sz| {
                b.iter(|| {
                    if let Some(mut region) = backend.allocate(sz) {
                        criterion::black_box(region.touch_fresh());
                        backend.deallocate(region);
                    }
                });
            });
        }
    }
    group.finish();
}

fn bench_alloc_burst(c: &mut Criterion) {
    let registry = BackendRegistry::with_builtin();
    let mut group = c.benchmark_group("backend_burst");

    for name in registry.names() {
        let backend: Box<dyn AllocatorBackend> = registry.select(name).backend;
        group.bench_function(BenchmarkId::new(name, "1000x64B"), |b| {
            b.iter(|| {
                let regions: Vec<_> = (0..1000).filter_map(|_| backend.allocate(64)).collect();
                for region in regions {
                    backend.deallocate(region);
                }
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_alloc_free_cycle, bench_alloc_burst);
criterion_main!(benches);
