//! The pool facade: acquire, release, stats, and worker registration.

use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::debug;

use crate::config::PoolConfig;
use crate::coroutine::{CoroutineHandle, Executor, TaskPtr};
use crate::error::{AllocError, PoolError};
use crate::monitor::StackUsageMonitor;
use crate::reservoir::TwoQueueReservoir;
use crate::stats::PoolStats;

/// A pool of pre-allocated, guard-protected stackful coroutines.
///
/// Worker threads share the pool by reference and borrow coroutines through
/// [`acquire`](Self::acquire). The hot path is an MPMC queue operation plus
/// one or two atomic updates; neither `acquire` nor release ever suspends
/// or takes a lock.
///
/// # Example
///
/// ```
/// use coropool::{CoroutinePool, PoolConfig, TaskPtr};
/// use std::time::Duration;
///
/// fn executor(task: TaskPtr) {
///     // Dispatch to user task code; the pool treats the pointer as opaque.
///     let _ = task;
/// }
///
/// let config = PoolConfig {
///     stack_size: 128 * 1024,
///     initial_size: 4,
///     max_size: 8,
///     monitor_period: Duration::ZERO,
/// };
/// let pool = CoroutinePool::new(config, executor).unwrap();
/// pool.register_thread();
///
/// let mut lease = pool.acquire().unwrap();
/// lease.resume(std::ptr::null_mut());
/// lease.return_to_pool();
/// ```
pub struct CoroutinePool {
    config: PoolConfig,
    executor: Executor,
    // Declared before the reservoir so the sampling thread is joined before
    // the queued stacks unmap.
    monitor: StackUsageMonitor,
    reservoir: TwoQueueReservoir,
    /// Ceiling pre-check only; deliberately approximate. A transient
    /// overshoot bounded by the number of concurrent releasers is accepted,
    /// since the ceiling governs memory pressure, not correctness.
    idle_coroutines: AtomicUsize,
    total_coroutines: AtomicUsize,
}

impl CoroutinePool {
    /// Constructs the pool, pre-populating the pristine queue and starting
    /// the stack usage monitor when a period is configured.
    ///
    /// A startup allocation failure is fatal: the pool is never handed out
    /// partially populated.
    ///
    /// # Panics
    ///
    /// Panics if `config.max_size == 0` or
    /// `config.initial_size > config.max_size`.
    pub fn new(config: PoolConfig, executor: Executor) -> Result<Self, PoolError> {
        let config = config.fixup();
        assert!(config.max_size >= 1, "max_size must be at least 1");
        assert!(
            config.initial_size <= config.max_size,
            "initial_size must not exceed max_size"
        );

        let pool = CoroutinePool {
            monitor: StackUsageMonitor::new(config.stack_size, config.monitor_period),
            reservoir: TwoQueueReservoir::new(config.initial_size, config.max_size),
            idle_coroutines: AtomicUsize::new(0),
            total_coroutines: AtomicUsize::new(0),
            executor,
            config,
        };

        for created in 0..pool.config.initial_size {
            let handle = pool
                .create_coroutine(true)
                .map_err(|source| PoolError::InitialPopulation {
                    created,
                    wanted: pool.config.initial_size,
                    source,
                })?;
            let stored = pool.reservoir.push_pristine(handle);
            assert!(stored.is_ok(), "pristine queue rejected a startup coroutine");
            pool.idle_coroutines.fetch_add(1, Ordering::Relaxed);
        }

        Ok(pool)
    }

    /// Borrows a coroutine for one task.
    ///
    /// Warm coroutines are preferred: their stacks are already
    /// demand-faulted, so reusing them avoids minor page faults on the
    /// critical path. Pristine coroutines come next, and only when both
    /// queues are empty is a new coroutine allocated.
    pub fn acquire(&self) -> Result<Lease<'_>, AllocError> {
        let handle = match self.reservoir.pop() {
            Some(handle) => {
                self.idle_coroutines.fetch_sub(1, Ordering::Relaxed);
                handle
            }
            None => self.create_coroutine(false)?,
        };
        Ok(Lease {
            handle: Some(handle),
            pool: self,
        })
    }

    /// Snapshot of the pool's counters and monitor state.
    pub fn stats(&self) -> PoolStats {
        let total = self.total_coroutines.load(Ordering::Acquire);
        let idle = self.reservoir.idle_approx();
        PoolStats {
            total_coroutines: total,
            active_coroutines: total.saturating_sub(idle),
            max_stack_usage_pct: self.monitor.max_stack_usage_pct(),
            monitor_active: self.monitor.is_active(),
        }
    }

    /// Publishes the calling worker thread to the monitor. Must be called
    /// once per worker before its first [`acquire`](Self::acquire).
    pub fn register_thread(&self) {
        self.monitor.register_thread();
    }

    /// Worker-side hook: reports the current stack depth of the running
    /// coroutine to the monitor. Call from inside a coroutine body.
    pub fn account_usage(&self) {
        self.monitor.account_usage();
    }

    /// Per-coroutine usable stack size after page rounding.
    pub fn stack_size(&self) -> usize {
        self.config.stack_size
    }

    fn create_coroutine(&self, quiet: bool) -> Result<CoroutineHandle, AllocError> {
        let mut handle = CoroutineHandle::new(self.config.stack_size, self.executor)?;
        // AcqRel so an observer of the count also sees the registration.
        let total = self.total_coroutines.fetch_add(1, Ordering::AcqRel) + 1;
        handle.set_registration(self.monitor.register(handle.bounds()));
        if !quiet {
            debug!(total, max_size = self.config.max_size, "created a coroutine");
        }
        Ok(handle)
    }

    /// Hands a coroutine back to the reservoir, or destroys it when the
    /// idle ceiling is reached.
    fn release(&self, handle: CoroutineHandle) {
        if self.idle_coroutines.load(Ordering::Relaxed) >= self.config.max_size {
            drop(handle);
            self.on_coroutine_destruction();
            return;
        }
        match self.reservoir.push_warm(handle) {
            Ok(()) => {
                self.idle_coroutines.fetch_add(1, Ordering::Relaxed);
            }
            Err(handle) => {
                // The queue filled up between the pre-check and the push.
                drop(handle);
                self.on_coroutine_destruction();
            }
        }
    }

    fn on_coroutine_destruction(&self) {
        self.total_coroutines.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Exclusive custody of one coroutine, borrowed from a [`CoroutinePool`].
///
/// The borrow ties every lease to the pool's lifetime, so a lease can never
/// outlive the pool that issued it. Dropping a lease destroys the coroutine
/// and unmaps its stack; [`return_to_pool`](Self::return_to_pool) is the
/// recirculation path.
pub struct Lease<'a> {
    handle: Option<CoroutineHandle>,
    pool: &'a CoroutinePool,
}

impl Lease<'_> {
    /// Drives the coroutine with one task pointer; returns when the
    /// coroutine next yields. A null pointer spins the dispatch loop
    /// without executing anything.
    pub fn resume(&mut self, task: TaskPtr) {
        self.handle
            .as_mut()
            .expect("lease already consumed")
            .resume(task);
    }

    /// Hands the coroutine back to the pool, subject to the idle ceiling.
    pub fn return_to_pool(mut self) {
        if let Some(handle) = self.handle.take() {
            self.pool.release(handle);
        }
    }
}

impl Drop for Lease<'_> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            drop(handle);
            self.pool.on_coroutine_destruction();
        }
    }
}
