//! jemalloc backend (`tikv-jemalloc-sys`).
//!
//! Sized frees map to `sdallocx` and size queries to `nallocx`, both keyed
//! by the log2 of the allocation's alignment. No trim hook; the thread-idle
//! hint is forwarded to `mallctl` but stays advisory.

use std::ffi::c_int;
use std::ptr;

use tikv_jemalloc_sys as je;

/// `MALLOCX_LG_ALIGN(la)` from jemalloc's mallocx flag encoding.
#[inline]
fn lg_align_flag(alignment: usize) -> c_int {
    debug_assert!(alignment.is_power_of_two());
    alignment.trailing_zeros() as c_int
}

pub(super) unsafe fn raw_malloc(size: usize) -> *mut u8 {
    // SAFETY: direct call to the jemalloc allocator.
    unsafe { je::malloc(size).cast() }
}

pub(super) unsafe fn raw_calloc(count: usize, size: usize) -> *mut u8 {
    // SAFETY: direct call to the jemalloc allocator.
    unsafe { je::calloc(count, size).cast() }
}

pub(super) unsafe fn raw_realloc(old_ptr: *mut u8, new_size: usize) -> *mut u8 {
    // SAFETY: caller guarantees `old_ptr` came from this backend.
    unsafe { je::realloc(old_ptr.cast(), new_size).cast() }
}

pub(super) unsafe fn raw_aligned_alloc(alignment: usize, size: usize) -> *mut u8 {
    let mut out = ptr::null_mut();
    // SAFETY: `out` is a valid destination; alignment is a power of two
    // (caller contract).
    let result = unsafe { je::posix_memalign(&mut out, alignment, size) };
    if result != 0 {
        return ptr::null_mut();
    }
    out.cast()
}

pub(super) unsafe fn raw_free(ptr: *mut u8) {
    // SAFETY: caller guarantees `ptr` came from this backend.
    unsafe { je::free(ptr.cast()) }
}

pub(super) unsafe fn raw_free_sized(ptr: *mut u8, size: usize) {
    // SAFETY: caller guarantees `ptr` came from this backend and `size`
    // is within the allocation's [requested, usable] range.
    unsafe { je::sdallocx(ptr.cast(), size, lg_align_flag(super::min_alignment())) }
}

pub(super) unsafe fn raw_free_aligned_sized(ptr: *mut u8, alignment: usize, size: usize) {
    // SAFETY: as raw_free_sized, with the allocation's real alignment.
    unsafe { je::sdallocx(ptr.cast(), size, lg_align_flag(alignment)) }
}

pub(super) unsafe fn raw_usable_size(ptr: *const u8) -> usize {
    // SAFETY: caller guarantees `ptr` is live and from this backend.
    unsafe { je::malloc_usable_size(ptr.cast()) }
}

pub(super) fn raw_good_size(size: usize) -> usize {
    if size == 0 {
        return 0;
    }
    // SAFETY: pure query; nallocx does not allocate.
    unsafe { je::nallocx(size, lg_align_flag(super::min_alignment())) }
}

pub(super) fn raw_good_size_aligned(alignment: usize, size: usize) -> usize {
    if size == 0 {
        return 0;
    }
    // SAFETY: pure query; nallocx does not allocate.
    unsafe { je::nallocx(size, lg_align_flag(alignment)) }
}

pub(super) fn raw_trim() -> bool {
    false
}

pub(super) fn raw_mark_thread_idle() -> bool {
    // Advisory: jemalloc may reclaim the thread's tcache, but gives no
    // completion signal, so this still reports unsupported.
    // SAFETY: mallctl with null out/in pointers only triggers the action.
    unsafe {
        je::mallctl(
            c"thread.idle".as_ptr(),
            ptr::null_mut(),
            ptr::null_mut(),
            ptr::null_mut(),
            0,
        );
    }
    false
}

pub(super) fn raw_mark_thread_busy() {}
