use std::time::Duration;

use criterion::{criterion_group, criterion_main, Criterion, Throughput};

use coropool::{CoroutinePool, PoolConfig, TaskPtr};

fn noop_executor(_task: TaskPtr) {}

fn bench_pool_hot_path(c: &mut Criterion) {
    let pool = CoroutinePool::new(
        PoolConfig {
            stack_size: 128 * 1024,
            initial_size: 64,
            max_size: 256,
            monitor_period: Duration::ZERO,
        },
        noop_executor,
    )
    .unwrap();
    pool.register_thread();

    let mut group = c.benchmark_group("pool_hot_path");
    group.throughput(Throughput::Elements(1));

    group.bench_function("acquire_release", |b| {
        b.iter(|| {
            let lease = pool.acquire().unwrap();
            lease.return_to_pool();
        })
    });

    group.bench_function("acquire_resume_release", |b| {
        b.iter(|| {
            let mut lease = pool.acquire().unwrap();
            lease.resume(std::ptr::null_mut());
            lease.return_to_pool();
        })
    });

    group.finish();
}

criterion_group!(benches, bench_pool_hot_path);
criterion_main!(benches);
