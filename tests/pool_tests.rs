use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Barrier;
use std::time::{Duration, Instant};

use coropool::{CoroutinePool, PoolConfig, PoolError, TaskPtr};

fn counting_executor(task: TaskPtr) {
    if task.is_null() {
        return;
    }
    let hits = unsafe { &*(task as *const AtomicUsize) };
    hits.fetch_add(1, Ordering::SeqCst);
}

fn config(initial: usize, max: usize) -> PoolConfig {
    PoolConfig {
        stack_size: 128 * 1024,
        initial_size: initial,
        max_size: max,
        monitor_period: Duration::ZERO,
    }
}

#[test]
fn startup_population() {
    let pool = CoroutinePool::new(config(4, 8), counting_executor).unwrap();

    let stats = pool.stats();
    assert_eq!(stats.total_coroutines, 4);
    assert_eq!(stats.active_coroutines, 0);
    assert!(!stats.monitor_active);
    assert_eq!(stats.max_stack_usage_pct, 0);
}

#[test]
fn warm_recirculation_keeps_the_population_flat() {
    let pool = CoroutinePool::new(config(4, 8), counting_executor).unwrap();
    pool.register_thread();

    let hits = AtomicUsize::new(0);
    for _ in 0..100 {
        let mut lease = pool.acquire().unwrap();
        lease.resume(&hits as *const AtomicUsize as TaskPtr);
        lease.return_to_pool();
    }

    assert_eq!(hits.load(Ordering::SeqCst), 100);
    let stats = pool.stats();
    assert_eq!(stats.total_coroutines, 4);
    assert_eq!(stats.active_coroutines, 0);
}

#[test]
fn ceiling_converges_after_a_concurrent_burst() {
    const THREADS: usize = 16;
    const MAX: usize = 8;

    let pool = CoroutinePool::new(config(0, MAX), counting_executor).unwrap();
    let barrier = Barrier::new(THREADS);
    let peak_total = AtomicUsize::new(0);

    std::thread::scope(|scope| {
        for _ in 0..THREADS {
            scope.spawn(|| {
                pool.register_thread();
                let hits = AtomicUsize::new(0);
                let mut lease = pool.acquire().unwrap();
                lease.resume(&hits as *const AtomicUsize as TaskPtr);

                // Everyone holds a lease at once before anyone releases.
                barrier.wait();
                peak_total.fetch_max(pool.stats().total_coroutines, Ordering::SeqCst);
                barrier.wait();

                lease.return_to_pool();
            });
        }
    });

    assert_eq!(peak_total.load(Ordering::SeqCst), THREADS);

    // Concurrent releasers may overshoot the ceiling by at most one slot
    // each; the overshoot is transient, never unbounded.
    let settled = pool.stats().total_coroutines;
    assert!(
        (MAX..MAX + THREADS).contains(&settled),
        "settled at {settled}"
    );

    // Quiescent traffic trims the excess back under the ceiling.
    for _ in 0..2 * THREADS {
        let lease = pool.acquire().unwrap();
        lease.return_to_pool();
    }
    assert_eq!(pool.stats().total_coroutines, MAX);
}

#[test]
fn allocation_failure_surfaces_and_leaves_counters_intact() {
    // A stack larger than the address space makes every fresh allocation
    // fail while construction (initial_size = 0) still succeeds.
    let pool = CoroutinePool::new(
        PoolConfig {
            stack_size: 1 << 55,
            initial_size: 0,
            max_size: 4,
            monitor_period: Duration::ZERO,
        },
        counting_executor,
    )
    .unwrap();

    assert!(pool.acquire().is_err());
    assert_eq!(pool.stats().total_coroutines, 0);
    assert!(pool.acquire().is_err());
    assert_eq!(pool.stats().total_coroutines, 0);
}

#[test]
fn failed_startup_population_is_fatal() {
    let result = CoroutinePool::new(
        PoolConfig {
            stack_size: 1 << 55,
            initial_size: 2,
            max_size: 4,
            monitor_period: Duration::ZERO,
        },
        counting_executor,
    );
    match result {
        Err(PoolError::InitialPopulation { created, wanted, .. }) => {
            assert_eq!(created, 0);
            assert_eq!(wanted, 2);
        }
        Ok(_) => panic!("construction should fail"),
    }
}

#[test]
fn stack_size_is_page_aligned_after_construction() {
    let page = unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize };
    let pool = CoroutinePool::new(
        PoolConfig {
            stack_size: 100_000,
            initial_size: 1,
            max_size: 2,
            monitor_period: Duration::ZERO,
        },
        counting_executor,
    )
    .unwrap();

    assert_eq!(pool.stack_size() % page, 0);
    assert!(pool.stack_size() >= 100_000);
}

#[test]
fn teardown_joins_the_monitor_within_one_period() {
    let period = Duration::from_millis(200);
    let pool = CoroutinePool::new(
        PoolConfig {
            stack_size: 128 * 1024,
            initial_size: 2,
            max_size: 4,
            monitor_period: period,
        },
        counting_executor,
    )
    .unwrap();
    assert!(pool.stats().monitor_active);

    let start = Instant::now();
    drop(pool);
    assert!(
        start.elapsed() < period * 2,
        "monitor took {:?} to stop",
        start.elapsed()
    );
}

#[test]
fn leases_survive_interleaved_acquires() {
    // No-loss: everything acquired is either returned or destroyed, and the
    // population reflects exactly that.
    let pool = CoroutinePool::new(config(2, 8), counting_executor).unwrap();

    let a = pool.acquire().unwrap();
    let b = pool.acquire().unwrap();
    let c = pool.acquire().unwrap();
    assert_eq!(pool.stats().total_coroutines, 3);
    assert_eq!(pool.stats().active_coroutines, 3);

    a.return_to_pool();
    drop(b);
    assert_eq!(pool.stats().total_coroutines, 2);
    assert_eq!(pool.stats().active_coroutines, 1);

    c.return_to_pool();
    let stats = pool.stats();
    assert_eq!(stats.total_coroutines, 2);
    assert_eq!(stats.active_coroutines, 0);
}
