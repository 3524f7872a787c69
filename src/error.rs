//! Errors surfaced by the pool.

use std::io;

use thiserror::Error;

/// Failure to allocate a coroutine stack.
///
/// Both variants reach the caller the same way: there is no coroutine to
/// hand out, and the layer above sheds load. They differ only in
/// diagnostics. [`AllocError::MappingLimit`] means the process hit its
/// mapping-count limit (`vm.max_map_count` on Linux) rather than an actual
/// memory shortage, which is the dominant production failure mode for
/// guard-paged stacks.
#[derive(Debug, Error)]
pub enum AllocError {
    #[error("out of memory while mapping a coroutine stack: {0}")]
    OutOfMemory(#[source] io::Error),

    #[error("mapping-count limit reached while mapping a coroutine stack: {0}")]
    MappingLimit(#[source] io::Error),
}

/// Errors raised during pool construction.
///
/// A pool that fails to fill its pristine queue is never handed out
/// partially populated.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("failed to pre-populate the coroutine pool ({created} of {wanted} created)")]
    InitialPopulation {
        created: usize,
        wanted: usize,
        #[source]
        source: AllocError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_errors_carry_the_os_source() {
        let err = AllocError::MappingLimit(io::Error::from_raw_os_error(libc::ENOMEM));
        let rendered = err.to_string();
        assert!(rendered.contains("mapping-count limit"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn initial_population_reports_progress() {
        let err = PoolError::InitialPopulation {
            created: 3,
            wanted: 8,
            source: AllocError::OutOfMemory(io::Error::from_raw_os_error(libc::ENOMEM)),
        };
        assert!(err.to_string().contains("3 of 8"));
    }
}
