//! # coropool - Stackful Coroutine Pool
//!
//! A pool of pre-allocated, guard-protected stackful coroutines for
//! task-dispatch runtimes. Every user task is bound to a coroutine borrowed
//! from this pool, executed on one of N worker threads, and returned.
//!
//! ## Architecture
//!
//! - **Guarded stacks**: each coroutine stack is an mmap-ed region with a
//!   `PROT_NONE` page below it, so overflow faults synchronously instead of
//!   corrupting memory.
//! - **Two-queue reservoir**: idle coroutines live in a *pristine* queue
//!   (never run, pages not yet faulted) and a *warm* queue (previously run,
//!   pages resident). Acquisition prefers warm to keep demand-faulted
//!   memory hot.
//! - **Lock-free hot path**: `acquire` and release are an MPMC queue
//!   operation plus an atomic update or two; no locks, no suspension.
//! - **Stack usage monitor**: a background thread samples page residency of
//!   every live stack and publishes the maximum observed usage percentage,
//!   catching nearly-overflowing stacks before they fault.
//!
//! ## Example
//!
//! ```
//! use coropool::{CoroutinePool, PoolConfig, TaskPtr};
//! use std::time::Duration;
//!
//! fn executor(task: TaskPtr) {
//!     // Hand the opaque pointer to user task code.
//!     let _ = task;
//! }
//!
//! let pool = CoroutinePool::new(
//!     PoolConfig {
//!         stack_size: 256 * 1024,
//!         initial_size: 4,
//!         max_size: 16,
//!         monitor_period: Duration::from_millis(100),
//!     },
//!     executor,
//! )
//! .unwrap();
//!
//! pool.register_thread();
//! let mut lease = pool.acquire().unwrap();
//! lease.resume(std::ptr::null_mut());
//! lease.return_to_pool();
//! ```

pub mod config;
pub mod coroutine;
pub mod error;
pub mod pool;
pub mod stack;
pub mod stats;

mod monitor;
mod reservoir;

pub use config::PoolConfig;
pub use coroutine::{CoroutineHandle, Executor, TaskPtr};
pub use error::{AllocError, PoolError};
pub use pool::{CoroutinePool, Lease};
pub use stats::PoolStats;
