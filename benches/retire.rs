use std::ptr::NonNull;
use std::sync::atomic::{AtomicPtr, Ordering};

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use hazmap::{Config, Domain, Hazptr, Object, Reclaimable, CONFIG};

#[repr(C)]
struct Record {
    object: Object,
    value: usize,
}

unsafe impl Reclaimable for Record {}

fn record(value: usize) -> NonNull<Record> {
    NonNull::from(Box::leak(Box::new(Record { object: Object::new(), value })))
}

fn bench_retire(c: &mut Criterion) {
    let _ = Config::with_params(128).and_then(Config::init_global);
    let domain = hazmap::default_domain();
    debug_assert!(CONFIG.try_get().is_ok());

    let mut group = c.benchmark_group("retire");
    group.bench_function("single", |b| {
        b.iter(|| unsafe { domain.retire_boxed(record(1)) });
    });

    for batch in [100usize, 10_000].iter() {
        group.throughput(Throughput::Elements(*batch as u64));
        group.bench_with_input(BenchmarkId::from_parameter(batch), batch, |b, &batch| {
            b.iter(|| {
                for i in 0..batch {
                    unsafe { domain.retire_boxed(record(i)) };
                }
            });
        });
    }

    group.finish();
}

fn bench_protect(c: &mut Criterion) {
    let mut group = c.benchmark_group("protect");

    let global = AtomicPtr::new(record(42).as_ptr());
    group.bench_function("default_domain", |b| {
        b.iter(|| {
            let mut hazptr = Hazptr::new();
            let ptr = hazptr.keep(&global);
            black_box(unsafe { (*ptr).value });
        });
    });

    let domain = Domain::new();
    group.bench_function("own_domain", |b| {
        b.iter(|| {
            let mut hazptr = Hazptr::in_domain(&domain);
            let ptr = hazptr.keep(&global);
            black_box(unsafe { (*ptr).value });
        });
    });

    group.finish();
    drop(unsafe { Box::from_raw(global.load(Ordering::Relaxed)) });
}

criterion_group!(benches, bench_retire, bench_protect);
criterion_main!(benches);
