//! Backend allocator: a uniform surface over one compile-time-selected
//! native allocator.
//!
//! Exactly one backend module is compiled in (mimalloc, then jemalloc,
//! then the system allocator, in feature-priority order); each exposes the
//! same `raw_*` function set and this module layers the common policy on
//! top: the guard-page sentinel for zero-byte requests, checked array
//! arithmetic, the caller-chosen failure strategy, and usable-size
//! clamping.
//!
//! Zero-byte requests never reach the native allocator. They all return
//! one process-wide sentinel address backed by a page mapped with no
//! access rights, so a caller that dereferences a "zero-size allocation"
//! faults instead of corrupting a neighbor.

use std::process;
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};

use trackmalloc_core::arith;

#[cfg(feature = "backend-mimalloc")]
mod mimalloc;
#[cfg(feature = "backend-mimalloc")]
use self::mimalloc as native;

#[cfg(all(feature = "backend-jemalloc", not(feature = "backend-mimalloc")))]
mod jemalloc;
#[cfg(all(feature = "backend-jemalloc", not(feature = "backend-mimalloc")))]
use self::jemalloc as native;

#[cfg(all(
    feature = "backend-system",
    not(feature = "backend-mimalloc"),
    not(feature = "backend-jemalloc")
))]
mod system;
#[cfg(all(
    feature = "backend-system",
    not(feature = "backend-mimalloc"),
    not(feature = "backend-jemalloc")
))]
use self::system as native;

#[cfg(not(any(
    feature = "backend-system",
    feature = "backend-mimalloc",
    feature = "backend-jemalloc"
)))]
compile_error!("select an allocation backend feature: backend-system, backend-mimalloc or backend-jemalloc");

/// What to do when an allocation cannot be satisfied (whether the size
/// computation overflowed or the backend is exhausted — the two are not
/// distinguishable to the caller).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailStrategy {
    /// Surface the failure as `None`.
    ReturnNull,
    /// Print a diagnostic and terminate the process. For allocations the
    /// caller cannot survive losing, e.g. during early startup.
    ExitOnOom,
}

/// A successful allocation: the caller-visible pointer and the usable
/// capacity behind it (at least the requested size; more if the backend
/// rounded the request up).
#[derive(Debug, Clone, Copy)]
pub struct Allocation {
    pub ptr: *mut u8,
    pub usable: usize,
}

/// Minimum alignment of every pointer any backend returns.
#[inline]
#[must_use]
pub const fn min_alignment() -> usize {
    std::mem::align_of::<libc::max_align_t>()
}

static MAX_ALIGNMENT: AtomicUsize = AtomicUsize::new(0);

/// Maximum supported alignment: the OS page size. Requesting a larger
/// alignment is a caller bug.
#[must_use]
pub fn max_alignment() -> usize {
    let cached = MAX_ALIGNMENT.load(Ordering::Relaxed);
    if cached != 0 {
        return cached;
    }
    // SAFETY: sysconf(_SC_PAGESIZE) reads a process constant.
    let raw = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    let size = usize::try_from(raw)
        .ok()
        .filter(|s| s.is_power_of_two() && *s >= min_alignment())
        .unwrap_or_else(|| fatal("invalid page size reported by sysconf"));
    // Racing initializers compute the same value; last store wins.
    MAX_ALIGNMENT.store(size, Ordering::Relaxed);
    size
}

/// The OS page size (equal to the maximum supported alignment).
#[inline]
#[must_use]
pub fn page_size() -> usize {
    max_alignment()
}

static GUARD_PAGE: AtomicUsize = AtomicUsize::new(0);

/// The process-wide zero-size allocation sentinel.
///
/// Lazily maps one `PROT_NONE` page on first use and returns its address
/// forever after. The page is never unmapped and never readable or
/// writable; callers compare against it by address only.
#[must_use]
pub fn guard_page() -> *mut u8 {
    let cached = GUARD_PAGE.load(Ordering::Acquire);
    if cached != 0 {
        return cached as *mut u8;
    }
    let page = map_guard_page();
    match GUARD_PAGE.compare_exchange(0, page as usize, Ordering::AcqRel, Ordering::Acquire) {
        Ok(_) => page,
        Err(winner) => {
            // Lost the race; release our mapping and use the winner's.
            // SAFETY: `page` is a fresh private mapping of page_size() bytes
            // nothing else has seen.
            unsafe { libc::munmap(page.cast(), page_size()) };
            winner as *mut u8
        }
    }
}

fn map_guard_page() -> *mut u8 {
    let len = page_size();
    #[allow(unused_mut)]
    let mut flags = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;
    #[cfg(target_os = "linux")]
    {
        flags |= libc::MAP_NORESERVE;
    }
    // SAFETY: anonymous mapping, no fd, no fixed address.
    let addr = unsafe { libc::mmap(ptr::null_mut(), len, libc::PROT_NONE, flags, -1, 0) };
    if addr == libc::MAP_FAILED {
        fatal("failed to map the zero-size allocation sentinel page");
    }
    addr.cast()
}

/// Whether `ptr` is null or the zero-size sentinel, i.e. carries no
/// backend allocation.
#[inline]
#[must_use]
pub fn is_empty_allocation(ptr: *const u8) -> bool {
    ptr.is_null() || ptr == guard_page() as *const u8
}

#[cold]
fn fatal(message: &str) -> ! {
    eprintln!("trackmalloc: fatal: {message}");
    process::abort()
}

#[cold]
fn handle_exhaustion(fail: FailStrategy, operation: &str, size: usize) -> Option<Allocation> {
    match fail {
        FailStrategy::ReturnNull => None,
        FailStrategy::ExitOnOom => {
            eprintln!("trackmalloc: out of memory: {operation} of {size} bytes failed");
            process::abort()
        }
    }
}

/// Failure branch for size computations that overflow before any backend
/// call: indistinguishable from exhaustion to the caller, but the backend
/// is never invoked.
#[cold]
pub(crate) fn handle_overflow(fail: FailStrategy, operation: &str) -> Option<Allocation> {
    match fail {
        FailStrategy::ReturnNull => None,
        FailStrategy::ExitOnOom => {
            eprintln!("trackmalloc: out of memory: {operation} request overflows the address space");
            process::abort()
        }
    }
}

fn usable_size(ptr: *const u8, size: usize) -> usize {
    // Report the backend's actual rounding, never less than requested.
    // SAFETY: `ptr` was just returned live by this backend.
    let reported = unsafe { native::raw_usable_size(ptr) };
    reported.max(size)
}

/// Allocate `size` bytes.
pub fn allocate(size: usize, fail: FailStrategy) -> Option<Allocation> {
    if size == 0 {
        return Some(Allocation {
            ptr: guard_page(),
            usable: 0,
        });
    }
    // SAFETY: plain backend allocation.
    let ptr = unsafe { native::raw_malloc(size) };
    if ptr.is_null() {
        return handle_exhaustion(fail, "malloc", size);
    }
    debug_assert!(arith::is_aligned(ptr as usize, min_alignment()), "under aligned");
    Some(Allocation {
        ptr,
        usable: usable_size(ptr, size),
    })
}

/// Allocate `size` zeroed bytes.
pub fn allocate_zeroed(size: usize, fail: FailStrategy) -> Option<Allocation> {
    if size == 0 {
        return Some(Allocation {
            ptr: guard_page(),
            usable: 0,
        });
    }
    // SAFETY: plain backend allocation.
    let ptr = unsafe { native::raw_calloc(size, 1) };
    if ptr.is_null() {
        return handle_exhaustion(fail, "calloc", size);
    }
    debug_assert!(arith::is_aligned(ptr as usize, min_alignment()), "under aligned");
    Some(Allocation {
        ptr,
        usable: usable_size(ptr, size),
    })
}

/// Allocate `count * size` bytes, failing without touching the backend if
/// the product overflows.
pub fn allocate_array(count: usize, size: usize, fail: FailStrategy) -> Option<Allocation> {
    let Some(total) = arith::checked_multiply(count, size) else {
        return handle_overflow(fail, "malloc");
    };
    allocate(total, fail)
}

/// Zeroed variant of [`allocate_array`].
pub fn allocate_array_zeroed(count: usize, size: usize, fail: FailStrategy) -> Option<Allocation> {
    let Some(total) = arith::checked_multiply(count, size) else {
        return handle_overflow(fail, "calloc");
    };
    allocate_zeroed(total, fail)
}

/// Allocate `size` bytes aligned to `alignment` (a power of two no larger
/// than [`max_alignment`]).
pub fn allocate_aligned(alignment: usize, size: usize, fail: FailStrategy) -> Option<Allocation> {
    debug_assert!(alignment.is_power_of_two(), "alignment must be a power of 2");
    debug_assert!(alignment <= max_alignment(), "alignment too large");
    if alignment <= min_alignment() {
        return allocate(size, fail);
    }
    if size == 0 {
        return Some(Allocation {
            ptr: guard_page(),
            usable: 0,
        });
    }
    // SAFETY: alignment validated above.
    let ptr = unsafe { native::raw_aligned_alloc(alignment, size) };
    if ptr.is_null() {
        return handle_exhaustion(fail, "aligned_alloc", size);
    }
    debug_assert!(arith::is_aligned(ptr as usize, alignment), "under aligned");
    Some(Allocation {
        ptr,
        usable: usable_size(ptr, size),
    })
}

/// Resize `old_ptr` to `new_size` bytes.
///
/// Null and the sentinel behave as a fresh allocation; `new_size == 0`
/// frees and returns `None`. On failure the old block is untouched.
///
/// # Safety
///
/// `old_ptr` must be null, the sentinel, or a live pointer returned by
/// this backend's non-aligned allocation entry points.
pub unsafe fn reallocate(old_ptr: *mut u8, new_size: usize, fail: FailStrategy) -> Option<Allocation> {
    if is_empty_allocation(old_ptr) {
        return allocate(new_size, fail);
    }
    if new_size == 0 {
        // SAFETY: per contract, `old_ptr` is live and from this backend.
        unsafe { deallocate(old_ptr) };
        return None;
    }
    // SAFETY: per contract, `old_ptr` is live and from this backend.
    let ptr = unsafe { native::raw_realloc(old_ptr, new_size) };
    if ptr.is_null() {
        return handle_exhaustion(fail, "realloc", new_size);
    }
    debug_assert!(arith::is_aligned(ptr as usize, min_alignment()), "under aligned");
    Some(Allocation {
        ptr,
        usable: usable_size(ptr, new_size),
    })
}

/// Free a block. Null and the sentinel are no-ops.
///
/// # Safety
///
/// `ptr` must be null, the sentinel, or a live pointer returned by this
/// backend's non-aligned allocation entry points.
pub unsafe fn deallocate(ptr: *mut u8) {
    if is_empty_allocation(ptr) {
        return;
    }
    debug_assert!(arith::is_aligned(ptr as usize, min_alignment()), "under aligned");
    // SAFETY: per contract.
    unsafe { native::raw_free(ptr) }
}

/// Free a block whose size is known to the caller.
///
/// # Safety
///
/// As [`deallocate`]; additionally `size` must be the size passed to (or
/// the usable size reported by) the matching allocation call. The size is
/// a precondition, not re-checked at runtime.
pub unsafe fn deallocate_sized(ptr: *mut u8, size: usize) {
    if is_empty_allocation(ptr) {
        debug_assert!(size == 0, "size mismatch");
        return;
    }
    debug_assert!(arith::is_aligned(ptr as usize, min_alignment()), "under aligned");
    // SAFETY: per contract.
    unsafe { native::raw_free_sized(ptr, size) }
}

/// Free an over-aligned block.
///
/// # Safety
///
/// `ptr` must be null, the sentinel, or a live pointer returned by
/// [`allocate_aligned`] with this `alignment`; `size` as in
/// [`deallocate_sized`].
pub unsafe fn deallocate_aligned_sized(ptr: *mut u8, alignment: usize, size: usize) {
    debug_assert!(alignment.is_power_of_two(), "alignment must be a power of 2");
    debug_assert!(alignment <= max_alignment(), "alignment too large");
    if is_empty_allocation(ptr) {
        debug_assert!(size == 0, "size mismatch");
        return;
    }
    if alignment <= min_alignment() {
        // SAFETY: per contract; the allocation came from the plain path.
        unsafe { deallocate_sized(ptr, size) };
        return;
    }
    debug_assert!(arith::is_aligned(ptr as usize, alignment), "under aligned");
    // SAFETY: per contract.
    unsafe { native::raw_free_aligned_sized(ptr, alignment, size) }
}

/// The usable size the backend would round a `size`-byte request up to,
/// without allocating. Never less than `size`.
#[must_use]
pub fn good_size(size: usize) -> usize {
    native::raw_good_size(size).max(size)
}

/// Aligned variant of [`good_size`].
#[must_use]
pub fn good_size_aligned(alignment: usize, size: usize) -> usize {
    debug_assert!(alignment.is_power_of_two(), "alignment must be a power of 2");
    debug_assert!(alignment <= max_alignment(), "alignment too large");
    if alignment <= min_alignment() {
        return good_size(size);
    }
    native::raw_good_size_aligned(alignment, size).max(size)
}

/// Best-effort release of unused backend pages to the OS. Returns whether
/// the backend supports trimming.
pub fn trim() -> bool {
    native::raw_trim()
}

/// Hint that the calling thread is pausing allocation activity. Returns
/// whether the backend acknowledges the hint.
pub fn mark_thread_idle() -> bool {
    native::raw_mark_thread_idle()
}

/// Hint that the calling thread resumed allocation activity.
pub fn mark_thread_busy() {
    native::raw_mark_thread_busy()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_size_returns_the_sentinel() {
        let a = allocate(0, FailStrategy::ReturnNull).unwrap();
        let b = allocate_zeroed(0, FailStrategy::ReturnNull).unwrap();
        let c = allocate_array(0, 128, FailStrategy::ReturnNull).unwrap();
        let d = allocate_array(128, 0, FailStrategy::ReturnNull).unwrap();
        assert_eq!(a.ptr, guard_page());
        assert_eq!(b.ptr, guard_page());
        assert_eq!(c.ptr, guard_page());
        assert_eq!(d.ptr, guard_page());
        assert_eq!(a.usable, 0);
        // Freeing the sentinel is a no-op.
        unsafe {
            deallocate(a.ptr);
            deallocate_sized(b.ptr, 0);
            deallocate_aligned_sized(c.ptr, 64, 0);
        }
    }

    #[test]
    fn sentinel_is_a_singleton() {
        assert_eq!(guard_page(), guard_page());
        assert!(!guard_page().is_null());
        assert!(arith::is_aligned(guard_page() as usize, page_size()));
    }

    #[test]
    fn alignment_constants_are_sane() {
        assert!(min_alignment().is_power_of_two());
        assert!(max_alignment().is_power_of_two());
        assert!(max_alignment() >= min_alignment());
        assert_eq!(page_size(), max_alignment());
    }

    #[test]
    fn round_trip_reports_usable_at_least_requested() {
        for size in [1usize, 8, 100, 4096, 1 << 20] {
            let alloc = allocate(size, FailStrategy::ReturnNull).unwrap();
            assert!(!alloc.ptr.is_null());
            assert!(alloc.usable >= size);
            assert!(arith::is_aligned(alloc.ptr as usize, min_alignment()));
            unsafe { deallocate_sized(alloc.ptr, alloc.usable) };
        }
    }

    #[test]
    fn zeroed_memory_is_zero() {
        let alloc = allocate_zeroed(512, FailStrategy::ReturnNull).unwrap();
        let bytes = unsafe { std::slice::from_raw_parts(alloc.ptr, 512) };
        assert!(bytes.iter().all(|&b| b == 0));
        unsafe { deallocate(alloc.ptr) };
    }

    #[test]
    fn array_overflow_fails_without_allocating() {
        assert!(allocate_array(usize::MAX, 2, FailStrategy::ReturnNull).is_none());
        assert!(allocate_array_zeroed(usize::MAX / 2 + 1, 2, FailStrategy::ReturnNull).is_none());
    }

    #[test]
    fn aligned_allocations_respect_alignment() {
        let mut alignment = min_alignment();
        while alignment <= max_alignment() {
            let alloc = allocate_aligned(alignment, 100, FailStrategy::ReturnNull).unwrap();
            assert!(arith::is_aligned(alloc.ptr as usize, alignment));
            assert!(alloc.usable >= 100);
            unsafe { deallocate_aligned_sized(alloc.ptr, alignment, alloc.usable) };
            alignment *= 2;
        }
    }

    #[test]
    fn reallocate_preserves_contents() {
        let alloc = allocate(64, FailStrategy::ReturnNull).unwrap();
        unsafe {
            alloc.ptr.write_bytes(0xAB, 64);
            let grown = reallocate(alloc.ptr, 4096, FailStrategy::ReturnNull).unwrap();
            let bytes = std::slice::from_raw_parts(grown.ptr, 64);
            assert!(bytes.iter().all(|&b| b == 0xAB));
            deallocate(grown.ptr);
        }
    }

    #[test]
    fn reallocate_from_empty_and_to_zero() {
        unsafe {
            let fresh = reallocate(std::ptr::null_mut(), 32, FailStrategy::ReturnNull).unwrap();
            assert!(!fresh.ptr.is_null());
            assert_ne!(fresh.ptr, guard_page());

            let from_sentinel = reallocate(guard_page(), 32, FailStrategy::ReturnNull).unwrap();
            assert_ne!(from_sentinel.ptr, guard_page());

            assert!(reallocate(fresh.ptr, 0, FailStrategy::ReturnNull).is_none());
            deallocate(from_sentinel.ptr);
        }
    }

    #[test]
    fn good_size_is_monotone_and_covers_the_request() {
        for size in [0usize, 1, 7, 16, 100, 4095, 4096, 1 << 16] {
            assert!(good_size(size) >= size);
            assert!(good_size_aligned(min_alignment(), size) >= size);
            assert!(good_size_aligned(max_alignment(), size) >= size);
        }
    }

    #[test]
    fn hints_are_best_effort() {
        // Whatever the backend answers, the calls must not disturb later
        // allocation.
        let supported = mark_thread_idle();
        mark_thread_busy();
        let _ = supported;
        let _ = trim();
        let alloc = allocate(128, FailStrategy::ReturnNull).unwrap();
        unsafe { deallocate(alloc.ptr) };
    }
}
