//! Pool configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::stack::round_to_pages;

/// Configuration for a [`CoroutinePool`](crate::CoroutinePool).
///
/// Immutable once the pool is constructed. `stack_size` is rounded up to
/// page granularity on ingestion; the other fields are taken as-is.
///
/// Invariants checked at construction: `max_size >= 1` and
/// `initial_size <= max_size`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Usable bytes per coroutine stack, exclusive of the guard page.
    pub stack_size: usize,
    /// Coroutines pre-created at startup into the pristine queue.
    pub initial_size: usize,
    /// Ceiling on idle coroutines retained by the reservoir; also the warm
    /// queue capacity. Live coroutines may burst above this while leased.
    pub max_size: usize,
    /// Sampling interval of the stack usage monitor. Zero disables it.
    pub monitor_period: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            stack_size: 256 * 1024,
            initial_size: 1000,
            max_size: 4000,
            monitor_period: Duration::from_secs(1),
        }
    }
}

impl PoolConfig {
    /// Rounds `stack_size` up to a whole number of pages, minimum one page.
    pub(crate) fn fixup(mut self) -> Self {
        self.stack_size = round_to_pages(self.stack_size);
        self
    }
}
