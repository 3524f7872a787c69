//! Suspended execution contexts and the dispatch loop they run.

use corosensei::{Coroutine, CoroutineResult};

use crate::error::AllocError;
use crate::monitor::Registration;
use crate::stack::{GuardedStack, StackBounds};

/// Opaque task pointer threaded through the yield boundary.
///
/// The pool never inspects it; null is reserved for driving the coroutine
/// without dispatching anything.
pub type TaskPtr = *mut ();

/// Pool-wide task executor, fixed at pool construction.
///
/// Invoked on the coroutine's own stack once per injected task pointer. A
/// bare function pointer keeps the coroutine body free of per-coroutine
/// closure state.
pub type Executor = fn(TaskPtr);

/// A single suspended coroutine and the guarded stack it owns.
///
/// Exclusively owned at all times: a handle lives in the pristine queue, the
/// warm queue, or a [`Lease`](crate::Lease), never in more than one place.
/// Dropping a handle force-unwinds the parked body and unmaps the stack.
pub struct CoroutineHandle {
    coro: Coroutine<TaskPtr, (), (), GuardedStack>,
    bounds: StackBounds,
    registration: Option<Registration>,
}

impl std::fmt::Debug for CoroutineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoroutineHandle")
            .field("bounds", &self.bounds)
            .field("registration", &self.registration)
            .finish()
    }
}

impl CoroutineHandle {
    /// Allocates a guarded stack and parks a new coroutine on it.
    ///
    /// The body is a perpetual dispatch loop: it receives a task pointer
    /// across the yield boundary, hands non-null pointers to `executor`,
    /// and suspends again. It never returns; the loop ends only by forced
    /// unwind when the handle is dropped.
    pub fn new(stack_size: usize, executor: Executor) -> Result<Self, AllocError> {
        let stack = GuardedStack::new(stack_size)?;
        let bounds = stack.bounds();

        let coro = Coroutine::with_stack(stack, move |yielder, mut task: TaskPtr| loop {
            if !task.is_null() {
                executor(task);
            }
            task = yielder.suspend(());
        });

        Ok(CoroutineHandle {
            coro,
            bounds,
            registration: None,
        })
    }

    /// Runs the coroutine until its next yield, handing it `task`.
    pub fn resume(&mut self, task: TaskPtr) {
        match self.coro.resume(task) {
            CoroutineResult::Yield(()) => {}
            // The body loops forever; it only unwinds when the handle drops.
            CoroutineResult::Return(()) => unreachable!("coroutine body returned"),
        }
    }

    /// Address range of the owned stack, for the usage monitor.
    pub fn bounds(&self) -> StackBounds {
        self.bounds
    }

    pub(crate) fn set_registration(&mut self, registration: Option<Registration>) {
        self.registration = registration;
    }
}

// A suspended handle moves between worker threads through the reservoir.
// Corosensei permits resuming a suspended coroutine from any thread; mutual
// exclusion comes from ownership, since a handle is only ever held in one
// queue or lease at a time.
unsafe impl Send for CoroutineHandle {}
