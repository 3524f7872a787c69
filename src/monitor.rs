//! Out-of-band stack usage monitoring.
//!
//! A dedicated background thread periodically samples page residency
//! (`mincore`) of every registered coroutine stack. The run of resident
//! pages downward from the top of a region approximates how deep that stack
//! has ever been touched; sampling residency is read-only and does not race
//! the worker that owns the stack. Workers refine the picture between ticks
//! by reporting their current stack pointer through
//! [`account_usage`](StackUsageMonitor::account_usage).
//!
//! The published figure is the maximum usage percentage observed across all
//! coroutines since the pool started, clamped to 100.

use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex, RwLock};
use tracing::debug;

use crate::stack::{page_size, StackBounds};

pub(crate) struct StackUsageMonitor {
    state: Arc<MonitorState>,
    worker: Option<JoinHandle<()>>,
}

struct MonitorState {
    usable_size: usize,
    period: Duration,
    max_usage_pct: AtomicU8,
    active: AtomicBool,
    // Shared for ticks and lookups, exclusive for registration churn.
    regions: RwLock<HashMap<u64, RegionEntry>>,
    threads: RwLock<HashSet<u64>>,
    next_region_id: AtomicU64,
    stop: Mutex<bool>,
    stop_cv: Condvar,
}

struct RegionEntry {
    bounds: StackBounds,
    /// Deepest stack pointer reported by a worker running on this stack.
    peak_bytes: AtomicUsize,
}

/// Keeps one stack visible to the monitor; unregisters on drop so a
/// destroyed coroutine's region is never sampled after its mapping is gone.
pub(crate) struct Registration {
    state: Arc<MonitorState>,
    id: u64,
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration").field("id", &self.id).finish()
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.state.regions.write().remove(&self.id);
    }
}

impl StackUsageMonitor {
    /// A zero `period` disables the monitor entirely: no thread is spawned,
    /// registrations are refused, and the reported maximum stays zero.
    pub(crate) fn new(usable_size: usize, period: Duration) -> Self {
        let enabled = !period.is_zero();
        let state = Arc::new(MonitorState {
            usable_size,
            period,
            max_usage_pct: AtomicU8::new(0),
            active: AtomicBool::new(enabled),
            regions: RwLock::new(HashMap::new()),
            threads: RwLock::new(HashSet::new()),
            next_region_id: AtomicU64::new(0),
            stop: Mutex::new(false),
            stop_cv: Condvar::new(),
        });

        let worker = if enabled {
            let state = Arc::clone(&state);
            Some(
                thread::Builder::new()
                    .name("stack-usage-monitor".into())
                    .spawn(move || state.run())
                    .expect("failed to spawn the stack usage monitor"),
            )
        } else {
            None
        };

        StackUsageMonitor { state, worker }
    }

    pub(crate) fn is_active(&self) -> bool {
        self.state.active.load(Ordering::Relaxed)
    }

    pub(crate) fn max_stack_usage_pct(&self) -> u8 {
        self.state.max_usage_pct.load(Ordering::Relaxed)
    }

    pub(crate) fn register(&self, bounds: StackBounds) -> Option<Registration> {
        if !self.is_active() {
            return None;
        }
        let id = self.state.next_region_id.fetch_add(1, Ordering::Relaxed);
        self.state.regions.write().insert(
            id,
            RegionEntry {
                bounds,
                peak_bytes: AtomicUsize::new(0),
            },
        );
        Some(Registration {
            state: Arc::clone(&self.state),
            id,
        })
    }

    /// Publishes the calling thread's native id. Only registered threads may
    /// report usage through [`account_usage`](Self::account_usage).
    pub(crate) fn register_thread(&self) {
        if !self.is_active() {
            return;
        }
        self.state
            .threads
            .write()
            .insert(current_native_thread_id());
    }

    /// Called by a worker while it executes a coroutine body. The current
    /// stack pointer locates the running coroutine's region and raises its
    /// watermark.
    pub(crate) fn account_usage(&self) {
        if !self.is_active() {
            return;
        }
        if !self
            .state
            .threads
            .read()
            .contains(&current_native_thread_id())
        {
            return;
        }

        let sp = approximate_stack_pointer();
        let regions = self.state.regions.read();
        for entry in regions.values() {
            if entry.bounds.contains(sp) {
                let used = entry.bounds.usable_top() - sp;
                entry.peak_bytes.fetch_max(used, Ordering::Relaxed);
                self.state.publish(used);
                return;
            }
        }
    }
}

impl Drop for StackUsageMonitor {
    fn drop(&mut self) {
        *self.state.stop.lock() = true;
        self.state.stop_cv.notify_all();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        self.state.active.store(false, Ordering::Relaxed);
    }
}

impl MonitorState {
    fn run(self: Arc<Self>) {
        loop {
            {
                let mut stop = self.stop.lock();
                if !*stop {
                    let _ = self.stop_cv.wait_for(&mut stop, self.period);
                }
                if *stop {
                    break;
                }
            }
            self.sample_all();
        }
    }

    fn sample_all(&self) {
        let regions = self.regions.read();
        for entry in regions.values() {
            let touched = match touched_bytes(&entry.bounds) {
                Ok(bytes) => bytes,
                Err(err) => {
                    // This region contributes nothing for the tick; the
                    // monitor keeps going.
                    debug!(error = %err, "stack residency query failed");
                    0
                }
            };
            let observed = touched.max(entry.peak_bytes.load(Ordering::Relaxed));
            self.publish(observed);
        }
    }

    fn publish(&self, used_bytes: usize) {
        if self.usable_size == 0 {
            return;
        }
        let pct = (used_bytes * 100 / self.usable_size).min(100) as u8;
        self.max_usage_pct.fetch_max(pct, Ordering::Relaxed);
    }
}

/// Bytes of the stack that have been touched, measured as the run of
/// resident pages growing down from the top of the usable region. The guard
/// page is outside the queried range.
fn touched_bytes(bounds: &StackBounds) -> io::Result<usize> {
    let page = page_size();
    let pages = bounds.usable_len / page;
    let mut residency = vec![0u8; pages];

    let rc = unsafe {
        libc::mincore(
            bounds.usable_base as *mut libc::c_void,
            bounds.usable_len,
            residency.as_mut_ptr() as *mut _,
        )
    };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }

    let resident = residency.iter().rev().take_while(|&&b| b & 1 != 0).count();
    Ok(resident * page)
}

fn current_native_thread_id() -> u64 {
    unsafe { libc::pthread_self() as u64 }
}

/// Address of a fresh stack slot, standing in for the stack pointer.
#[inline(never)]
fn approximate_stack_pointer() -> usize {
    let marker = 0u8;
    &marker as *const u8 as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack::GuardedStack;
    use std::ptr;

    #[test]
    fn touched_bytes_counts_the_resident_run_from_the_top() {
        let page = page_size();
        let stack = GuardedStack::new(page * 16).unwrap();
        let bounds = stack.bounds();

        // Touch the top four pages only; the lower twelve stay demand-zero.
        for i in 0..4 {
            let addr = bounds.usable_top() - (i + 1) * page;
            unsafe { ptr::write_volatile(addr as *mut u8, 0xEE) };
        }

        let touched = touched_bytes(&bounds).unwrap();
        assert_eq!(touched, 4 * page);
    }

    #[test]
    fn untouched_stack_reads_as_zero() {
        let stack = GuardedStack::new(page_size() * 8).unwrap();
        assert_eq!(touched_bytes(&stack.bounds()).unwrap(), 0);
    }

    #[test]
    fn disabled_monitor_refuses_registrations() {
        let monitor = StackUsageMonitor::new(128 * 1024, Duration::ZERO);
        assert!(!monitor.is_active());
        assert_eq!(monitor.max_stack_usage_pct(), 0);

        let stack = GuardedStack::new(page_size() * 4).unwrap();
        assert!(monitor.register(stack.bounds()).is_none());
    }

    #[test]
    fn registration_drop_removes_the_region() {
        let monitor = StackUsageMonitor::new(page_size() * 4, Duration::from_secs(3600));
        let stack = GuardedStack::new(page_size() * 4).unwrap();

        let registration = monitor.register(stack.bounds()).unwrap();
        assert_eq!(monitor.state.regions.read().len(), 1);
        drop(registration);
        assert!(monitor.state.regions.read().is_empty());
    }

    #[test]
    fn account_usage_ignores_unregistered_threads() {
        let monitor = StackUsageMonitor::new(page_size() * 4, Duration::from_secs(3600));
        monitor.account_usage();
        assert_eq!(monitor.max_stack_usage_pct(), 0);
    }

    #[test]
    fn percentage_is_clamped_to_one_hundred() {
        let state = MonitorState {
            usable_size: page_size(),
            period: Duration::from_secs(1),
            max_usage_pct: AtomicU8::new(0),
            active: AtomicBool::new(true),
            regions: RwLock::new(HashMap::new()),
            threads: RwLock::new(HashSet::new()),
            next_region_id: AtomicU64::new(0),
            stop: Mutex::new(false),
            stop_cv: Condvar::new(),
        };
        state.publish(page_size() * 10);
        assert_eq!(state.max_usage_pct.load(Ordering::Relaxed), 100);
    }
}
