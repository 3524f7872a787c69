//! The idle-coroutine reservoir: a pristine queue and a warm queue.
//!
//! Coroutine stacks are mmap-ed chunks of memory, demand-faulted as they are
//! used. A coroutine that has already run holds resident pages; handing it
//! out again avoids re-faulting that memory on the hot path. The reservoir
//! therefore keeps two bounded MPMC queues: `pristine` holds never-run
//! coroutines filled once at startup, `warm` recirculates everything else,
//! and acquisition always prefers warm.

use crossbeam::queue::ArrayQueue;

use crate::coroutine::CoroutineHandle;

pub(crate) struct TwoQueueReservoir {
    pristine: ArrayQueue<CoroutineHandle>,
    warm: ArrayQueue<CoroutineHandle>,
}

impl TwoQueueReservoir {
    pub(crate) fn new(initial_size: usize, max_size: usize) -> Self {
        // ArrayQueue rejects zero capacities; an empty pristine queue still
        // needs a valid backing array.
        TwoQueueReservoir {
            pristine: ArrayQueue::new(initial_size.max(1)),
            warm: ArrayQueue::new(max_size.max(1)),
        }
    }

    /// Startup-only fill of the pristine queue.
    pub(crate) fn push_pristine(
        &self,
        handle: CoroutineHandle,
    ) -> Result<(), CoroutineHandle> {
        self.pristine.push(handle)
    }

    /// Dequeues warm first, then pristine. Once a pristine coroutine is
    /// drawn it circulates as warm for the rest of its life.
    pub(crate) fn pop(&self) -> Option<CoroutineHandle> {
        self.warm.pop().or_else(|| self.pristine.pop())
    }

    /// Releases always target the warm queue; pristine is never refilled.
    pub(crate) fn push_warm(&self, handle: CoroutineHandle) -> Result<(), CoroutineHandle> {
        self.warm.push(handle)
    }

    /// Approximate: both queues move under concurrent callers.
    pub(crate) fn idle_approx(&self) -> usize {
        self.warm.len() + self.pristine.len()
    }

    #[cfg(test)]
    pub(crate) fn pristine_len(&self) -> usize {
        self.pristine.len()
    }

    #[cfg(test)]
    pub(crate) fn warm_len(&self) -> usize {
        self.warm.len()
    }
}
