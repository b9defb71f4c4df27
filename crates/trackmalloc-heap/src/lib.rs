//! Instrumented native memory allocation.
//!
//! A thin dispatch layer over one compile-time-selected allocation backend
//! (system malloc by default; mimalloc or jemalloc by feature), with an
//! optional tracking mode that tags every allocation with enough metadata
//! to account for it per category and per call site, and to reverse it
//! exactly on free.
//!
//! The tracking level and size-limit table are committed once per process
//! with [`initialize`]; every allocation entry point then reads the level
//! lock-free. With tracking off, calls pass straight through to the
//! backend. All entry points are safe to call concurrently from any
//! thread; the only internal lock outside the backend is the detail-mode
//! call-site table.
//!
//! Zero-byte requests return a process-wide sentinel address backed by an
//! inaccessible page — distinguishable from a real pointer, free to
//! deallocate, fatal to dereference. See [`guard_page`].
//!
//! ```no_run
//! use trackmalloc_heap::{self as heap, Category, FailStrategy};
//!
//! heap::initialize("summary", "").expect("configure tracking");
//! let alloc = heap::allocate(256, Category::Buffers, FailStrategy::ReturnNull)
//!     .expect("out of memory");
//! // ... use alloc.ptr for up to alloc.usable bytes ...
//! unsafe { heap::deallocate_sized(alloc.ptr, alloc.usable) };
//! ```

mod backend;
mod config;
mod tracked;

use std::ffi::CStr;
use std::panic::Location;

pub use backend::{Allocation, FailStrategy};
pub use config::{ConfigError, initialize, is_initialized, tracking_level};
pub use trackmalloc_core::accounting::{self, SiteUsage};
pub use trackmalloc_core::{Category, SizeLimits, TrackingLevel};

/// Minimum alignment of every pointer returned by every allocation entry
/// point.
#[inline]
#[must_use]
pub const fn min_alignment() -> usize {
    backend::min_alignment()
}

/// Maximum supported alignment (the OS page size). Requesting more is
/// undefined behavior, caught by debug assertions.
#[must_use]
pub fn max_alignment() -> usize {
    backend::max_alignment()
}

/// The OS page size.
#[must_use]
pub fn page_size() -> usize {
    backend::page_size()
}

/// The zero-size allocation sentinel. Compare by address only; the backing
/// page is deliberately inaccessible.
#[must_use]
pub fn guard_page() -> *mut u8 {
    backend::guard_page()
}

/// Allocate `size` bytes.
///
/// Returns the pointer plus the usable capacity behind it (at least
/// `size`). `size == 0` returns the sentinel with zero capacity. `None`
/// only under [`FailStrategy::ReturnNull`], for exhaustion or a size
/// computation that overflows.
#[track_caller]
pub fn allocate(size: usize, category: Category, fail: FailStrategy) -> Option<Allocation> {
    tracked::do_allocate(size, category, fail, tracking_level(), Location::caller())
}

/// Allocate `size` zeroed bytes.
#[track_caller]
pub fn allocate_zeroed(size: usize, category: Category, fail: FailStrategy) -> Option<Allocation> {
    tracked::do_allocate_zeroed(size, category, fail, tracking_level(), Location::caller())
}

/// Allocate `count * size` bytes. A product that overflows fails under the
/// caller's policy without reaching the backend.
#[track_caller]
pub fn allocate_array(
    count: usize,
    size: usize,
    category: Category,
    fail: FailStrategy,
) -> Option<Allocation> {
    tracked::do_allocate_array(count, size, category, fail, tracking_level(), Location::caller())
}

/// Zeroed variant of [`allocate_array`].
#[track_caller]
pub fn allocate_array_zeroed(
    count: usize,
    size: usize,
    category: Category,
    fail: FailStrategy,
) -> Option<Allocation> {
    tracked::do_allocate_array_zeroed(count, size, category, fail, tracking_level(), Location::caller())
}

/// Allocate `size` bytes aligned to `alignment`, a power of two no larger
/// than [`max_alignment`]. Alignments up to [`min_alignment`] cost nothing
/// extra; larger ones may carry their tracking metadata behind the usable
/// region instead of in front of it.
#[track_caller]
pub fn allocate_aligned(
    alignment: usize,
    size: usize,
    category: Category,
    fail: FailStrategy,
) -> Option<Allocation> {
    tracked::do_allocate_aligned(alignment, size, category, fail, tracking_level(), Location::caller())
}

/// Resize `old_ptr` to `new_size` bytes, moving the block if the backend
/// must. Null and the sentinel behave as a fresh allocation; `new_size ==
/// 0` frees and returns `None`. On failure the old block is untouched.
///
/// # Safety
///
/// `old_ptr` must be null, the sentinel, or a live pointer previously
/// returned by [`allocate`], [`allocate_zeroed`], [`allocate_array`],
/// [`allocate_array_zeroed`] or [`reallocate`] — never by
/// [`allocate_aligned`]: over-aligned blocks are not resizable.
#[track_caller]
pub unsafe fn reallocate(
    old_ptr: *mut u8,
    new_size: usize,
    category: Category,
    fail: FailStrategy,
) -> Option<Allocation> {
    // SAFETY: per contract.
    unsafe {
        tracked::do_reallocate(old_ptr, new_size, category, fail, tracking_level(), Location::caller())
    }
}

/// Resize to `new_count * new_size` bytes; the product is overflow-checked
/// like [`allocate_array`].
///
/// # Safety
///
/// As [`reallocate`].
#[track_caller]
pub unsafe fn reallocate_array(
    old_ptr: *mut u8,
    new_count: usize,
    new_size: usize,
    category: Category,
    fail: FailStrategy,
) -> Option<Allocation> {
    // SAFETY: per contract.
    unsafe {
        tracked::do_reallocate_array(
            old_ptr,
            new_count,
            new_size,
            category,
            fail,
            tracking_level(),
            Location::caller(),
        )
    }
}

/// Free a block from the non-aligned allocation path. Null and the
/// sentinel are no-ops.
///
/// # Safety
///
/// `ptr` must be null, the sentinel, or a live pointer from the
/// non-aligned allocation path, and must not be used afterwards. The
/// tracking level must not have changed since the allocation (it cannot:
/// the configuration is one-shot).
pub unsafe fn deallocate(ptr: *mut u8) {
    // SAFETY: per contract.
    unsafe { tracked::do_deallocate(ptr, tracking_level(), None) }
}

/// Free a block whose usable size the caller still knows.
///
/// # Safety
///
/// As [`deallocate`]; additionally `size` must equal the usable size
/// reported by the matching allocation call. The size is cross-checked
/// against the block's recorded metadata in debug builds and never trusted
/// for the free itself.
pub unsafe fn deallocate_sized(ptr: *mut u8, size: usize) {
    // SAFETY: per contract.
    unsafe { tracked::do_deallocate(ptr, tracking_level(), Some(size)) }
}

/// Free a block allocated with [`allocate_aligned`].
///
/// # Safety
///
/// `ptr` must be null, the sentinel, or a live pointer returned by
/// [`allocate_aligned`] with this exact `alignment`; `size` must equal the
/// size passed to, or the usable size reported by, that call.
pub unsafe fn deallocate_aligned_sized(ptr: *mut u8, alignment: usize, size: usize) {
    // SAFETY: per contract.
    unsafe { tracked::do_deallocate_aligned(ptr, alignment, size, tracking_level()) }
}

/// The usable capacity a `size`-byte request would actually receive, net
/// of tracking overhead, without allocating. Never less than `size`.
#[must_use]
pub fn good_size(size: usize) -> usize {
    tracked::do_good_size(size, tracking_level())
}

/// Aligned variant of [`good_size`].
#[must_use]
pub fn good_size_aligned(alignment: usize, size: usize) -> usize {
    tracked::do_good_size_aligned(alignment, size, tracking_level())
}

/// Copy a NUL-terminated string into a fresh allocation.
#[track_caller]
pub fn duplicate(s: &CStr, category: Category, fail: FailStrategy) -> Option<*mut libc::c_char> {
    let bytes = s.to_bytes_with_nul();
    let alloc = tracked::do_allocate(bytes.len(), category, fail, tracking_level(), Location::caller())?;
    // SAFETY: the allocation holds at least bytes.len() writable bytes.
    unsafe {
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), alloc.ptr, bytes.len());
    }
    Some(alloc.ptr.cast())
}

/// Best-effort release of unused backend pages back to the OS. Returns
/// whether the backend supports trimming.
pub fn trim() -> bool {
    backend::trim()
}

/// Hint that the calling thread is pausing allocation activity. Returns
/// whether the backend acknowledges the hint.
pub fn mark_thread_idle() -> bool {
    backend::mark_thread_idle()
}

/// Hint that the calling thread resumed allocation activity.
pub fn mark_thread_busy() {
    backend::mark_thread_busy()
}
