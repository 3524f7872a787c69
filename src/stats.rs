//! Read-side snapshot of pool telemetry.

use serde::Serialize;

/// Point-in-time counters describing pool health.
///
/// Produced by [`CoroutinePool::stats`](crate::CoroutinePool::stats) from
/// atomics and queue length approximations; taking a snapshot never blocks
/// an `acquire` or release.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Coroutines currently in existence, suspended or running.
    pub total_coroutines: usize,
    /// Coroutines currently leased out to worker threads.
    pub active_coroutines: usize,
    /// Highest stack usage observed across all coroutines, in percent.
    pub max_stack_usage_pct: u8,
    /// Whether the residency monitor is running.
    pub monitor_active: bool,
}
