//! mimalloc backend (`libmimalloc-sys`).
//!
//! The richest capability set of the three: native aligned allocation,
//! sized and aligned-sized frees, usable-size and good-size queries, and a
//! heap-collection hook behind `trim`.

use libmimalloc_sys as mi;

pub(super) unsafe fn raw_malloc(size: usize) -> *mut u8 {
    // SAFETY: direct call to the mimalloc allocator.
    unsafe { mi::mi_malloc(size).cast() }
}

pub(super) unsafe fn raw_calloc(count: usize, size: usize) -> *mut u8 {
    // SAFETY: direct call to the mimalloc allocator.
    unsafe { mi::mi_calloc(count, size).cast() }
}

pub(super) unsafe fn raw_realloc(old_ptr: *mut u8, new_size: usize) -> *mut u8 {
    // SAFETY: caller guarantees `old_ptr` came from this backend.
    unsafe { mi::mi_realloc(old_ptr.cast(), new_size).cast() }
}

pub(super) unsafe fn raw_aligned_alloc(alignment: usize, size: usize) -> *mut u8 {
    // SAFETY: alignment is a power of two (caller contract).
    unsafe { mi::mi_malloc_aligned(size, alignment).cast() }
}

pub(super) unsafe fn raw_free(ptr: *mut u8) {
    // SAFETY: caller guarantees `ptr` came from this backend.
    unsafe { mi::mi_free(ptr.cast()) }
}

pub(super) unsafe fn raw_free_sized(ptr: *mut u8, size: usize) {
    // SAFETY: caller guarantees `ptr` came from this backend and `size`
    // matches the allocation.
    unsafe { mi::mi_free_size(ptr.cast(), size) }
}

pub(super) unsafe fn raw_free_aligned_sized(ptr: *mut u8, alignment: usize, size: usize) {
    // SAFETY: caller guarantees `ptr`, `size` and `alignment` match the
    // allocation.
    unsafe { mi::mi_free_size_aligned(ptr.cast(), size, alignment) }
}

pub(super) unsafe fn raw_usable_size(ptr: *const u8) -> usize {
    // SAFETY: caller guarantees `ptr` is live and from this backend.
    unsafe { mi::mi_usable_size(ptr.cast()) }
}

pub(super) fn raw_good_size(size: usize) -> usize {
    // SAFETY: pure query.
    unsafe { mi::mi_good_size(size) }
}

pub(super) fn raw_good_size_aligned(_alignment: usize, size: usize) -> usize {
    size
}

pub(super) fn raw_trim() -> bool {
    // SAFETY: mi_collect has no preconditions.
    unsafe { mi::mi_collect(false) };
    true
}

pub(super) fn raw_mark_thread_idle() -> bool {
    false
}

pub(super) fn raw_mark_thread_busy() {}
