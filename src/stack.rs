//! Guard-protected, mmap-backed coroutine stacks.
//!
//! Every stack is a single anonymous private mapping with its lowest page
//! made inaccessible. A write past the bottom of the usable region faults
//! synchronously instead of silently corrupting a neighbouring allocation.
//! Dropping the stack unmaps the whole region, guard page included.

use std::io;
use std::ptr;

use corosensei::stack::{Stack, StackPointer};
use tracing::error;

use crate::error::AllocError;

lazy_static::lazy_static! {
    static ref PAGE_SIZE: usize = unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize };
}

/// The OS page size, queried once per process.
pub fn page_size() -> usize {
    *PAGE_SIZE
}

/// Rounds `len` up to page granularity, with a floor of one page.
pub(crate) fn round_to_pages(len: usize) -> usize {
    let page = page_size();
    len.max(1).saturating_add(page - 1) & !(page - 1)
}

/// Address range of one stack mapping.
///
/// The guard page sits at `mapping_base`; the usable region spans
/// `[usable_base, usable_base + usable_len)` and is consumed downward from
/// the top.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackBounds {
    pub mapping_base: usize,
    pub usable_base: usize,
    pub usable_len: usize,
}

impl StackBounds {
    /// One past the highest usable address; the stack pointer starts here.
    pub fn usable_top(&self) -> usize {
        self.usable_base + self.usable_len
    }

    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.usable_base && addr < self.usable_top()
    }
}

/// A fixed-size coroutine stack with a guard page below the usable bytes.
#[derive(Debug)]
pub struct GuardedStack {
    base: StackPointer,
    limit: StackPointer,
    mapping_base: *mut libc::c_void,
    mapping_len: usize,
}

impl GuardedStack {
    /// Maps a new stack of exactly `stack_size` usable bytes plus one guard
    /// page below them.
    ///
    /// `stack_size` must already be page-aligned and at least one page; the
    /// pool config fixup guarantees this.
    pub fn new(stack_size: usize) -> Result<Self, AllocError> {
        let page = page_size();
        debug_assert!(stack_size >= page && stack_size % page == 0);

        let mapping_len = match stack_size.checked_add(page) {
            Some(len) => len,
            None => {
                return Err(classify_mmap_failure(io::Error::from_raw_os_error(
                    libc::ENOMEM,
                )))
            }
        };

        let mapping = unsafe {
            libc::mmap(
                ptr::null_mut(),
                mapping_len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANON,
                -1,
                0,
            )
        };
        if mapping == libc::MAP_FAILED {
            return Err(classify_mmap_failure(io::Error::last_os_error()));
        }

        // Revoke all access to the lowest page so that overflow faults
        // instead of reaching whatever mapping sits below.
        let rc = unsafe { libc::mprotect(mapping, page, libc::PROT_NONE) };
        if rc != 0 {
            let err = io::Error::last_os_error();
            unsafe {
                libc::munmap(mapping, mapping_len);
            }
            return Err(classify_mmap_failure(err));
        }

        let usable_base = mapping as usize + page;
        let base = StackPointer::new(usable_base + stack_size)
            .expect("stack mapping ended at the null page");
        let limit = StackPointer::new(usable_base).expect("stack mapping started at the null page");

        Ok(GuardedStack {
            base,
            limit,
            mapping_base: mapping,
            mapping_len,
        })
    }

    pub fn bounds(&self) -> StackBounds {
        StackBounds {
            mapping_base: self.mapping_base as usize,
            usable_base: self.limit.get(),
            usable_len: self.usable_len(),
        }
    }

    /// Usable stack bytes, guard page excluded.
    pub fn usable_len(&self) -> usize {
        self.base.get() - self.limit.get()
    }
}

impl Drop for GuardedStack {
    fn drop(&mut self) {
        // Tens of thousands of live stacks saturate the per-process mapping
        // counters unless every region is released promptly.
        unsafe {
            libc::munmap(self.mapping_base, self.mapping_len);
        }
    }
}

unsafe impl Stack for GuardedStack {
    #[inline]
    fn base(&self) -> StackPointer {
        self.base
    }

    #[inline]
    fn limit(&self) -> StackPointer {
        self.limit
    }

    #[cfg(windows)]
    fn teb_fields(&self) -> corosensei::stack::StackTebFields {
        unimplemented!("guarded stacks are mmap-backed and Unix-only")
    }

    #[cfg(windows)]
    fn update_teb_fields(&mut self, _stack_limit: usize, _guaranteed_stack_bytes: usize) {
        unimplemented!("guarded stacks are mmap-backed and Unix-only")
    }
}

// The mapping is owned exclusively through this handle; the raw pointer is
// only dereferenced by the kernel.
unsafe impl Send for GuardedStack {}

/// Maps an mmap failure to the pool's error vocabulary.
///
/// ENOMEM from mmap usually means the process ran out of mappings, not
/// memory: each stack consumes one mapping for the guard plus one for the
/// usable region once their protections diverge. That case gets a distinct
/// diagnostic because raising `vm.max_map_count` is the fix, not adding RAM.
fn classify_mmap_failure(err: io::Error) -> AllocError {
    if err.raw_os_error() == Some(libc::ENOMEM) && map_count_exhausted() {
        error!(
            error = %err,
            "coroutine stack mapping refused at the process mapping-count \
             limit; consider raising vm.max_map_count"
        );
        AllocError::MappingLimit(err)
    } else {
        AllocError::OutOfMemory(err)
    }
}

#[cfg(target_os = "linux")]
fn map_count_exhausted() -> bool {
    let limit = std::fs::read_to_string("/proc/sys/vm/max_map_count")
        .ok()
        .and_then(|s| s.trim().parse::<usize>().ok());
    let used = std::fs::read_to_string("/proc/self/maps")
        .ok()
        .map(|maps| maps.lines().count());
    match (limit, used) {
        // A new stack needs two mapping slots.
        (Some(limit), Some(used)) => used + 2 >= limit,
        _ => false,
    }
}

#[cfg(not(target_os = "linux"))]
fn map_count_exhausted() -> bool {
    false
}
