//! System allocator backend (libc malloc family).
//!
//! The lowest common denominator: no sized frees, no good-size query on
//! glibc, no thread hints. Usable-size queries exist on glibc, FreeBSD and
//! macOS; elsewhere the caller's clamp covers for us.

use std::ffi::c_void;
use std::ptr;

pub(super) unsafe fn raw_malloc(size: usize) -> *mut u8 {
    // SAFETY: direct call to the libc allocator.
    unsafe { libc::malloc(size).cast() }
}

pub(super) unsafe fn raw_calloc(count: usize, size: usize) -> *mut u8 {
    // SAFETY: direct call to the libc allocator.
    unsafe { libc::calloc(count, size).cast() }
}

pub(super) unsafe fn raw_realloc(old_ptr: *mut u8, new_size: usize) -> *mut u8 {
    // SAFETY: caller guarantees `old_ptr` came from this backend.
    unsafe { libc::realloc(old_ptr.cast(), new_size).cast() }
}

pub(super) unsafe fn raw_aligned_alloc(alignment: usize, size: usize) -> *mut u8 {
    let mut out: *mut c_void = ptr::null_mut();
    // SAFETY: `out` is a valid destination; alignment is a power of two
    // >= the pointer size (caller contract).
    let result = unsafe { libc::posix_memalign(&mut out, alignment, size) };
    if result != 0 {
        return ptr::null_mut();
    }
    out.cast()
}

pub(super) unsafe fn raw_free(ptr: *mut u8) {
    // SAFETY: caller guarantees `ptr` came from this backend.
    unsafe { libc::free(ptr.cast()) }
}

pub(super) unsafe fn raw_free_sized(ptr: *mut u8, _size: usize) {
    // C23 free_sized has no libc implementation yet.
    // SAFETY: caller guarantees `ptr` came from this backend.
    unsafe { libc::free(ptr.cast()) }
}

pub(super) unsafe fn raw_free_aligned_sized(ptr: *mut u8, _alignment: usize, _size: usize) {
    // posix_memalign memory is released with plain free.
    // SAFETY: caller guarantees `ptr` came from this backend.
    unsafe { libc::free(ptr.cast()) }
}

#[cfg(any(target_os = "linux", target_os = "freebsd"))]
pub(super) unsafe fn raw_usable_size(ptr: *const u8) -> usize {
    // SAFETY: caller guarantees `ptr` is live and from this backend.
    unsafe { libc::malloc_usable_size(ptr.cast_mut().cast()) }
}

#[cfg(target_os = "macos")]
pub(super) unsafe fn raw_usable_size(ptr: *const u8) -> usize {
    // SAFETY: caller guarantees `ptr` is live and from this backend.
    unsafe { libc::malloc_size(ptr.cast()) }
}

#[cfg(not(any(target_os = "linux", target_os = "freebsd", target_os = "macos")))]
pub(super) unsafe fn raw_usable_size(_ptr: *const u8) -> usize {
    0
}

#[cfg(target_os = "macos")]
pub(super) fn raw_good_size(size: usize) -> usize {
    // SAFETY: pure query.
    unsafe { libc::malloc_good_size(size) }
}

#[cfg(not(target_os = "macos"))]
pub(super) fn raw_good_size(size: usize) -> usize {
    size
}

pub(super) fn raw_good_size_aligned(_alignment: usize, size: usize) -> usize {
    size
}

#[cfg(all(target_os = "linux", target_env = "gnu"))]
pub(super) fn raw_trim() -> bool {
    // SAFETY: malloc_trim has no preconditions.
    unsafe { libc::malloc_trim(0) != 0 }
}

#[cfg(not(all(target_os = "linux", target_env = "gnu")))]
pub(super) fn raw_trim() -> bool {
    false
}

pub(super) fn raw_mark_thread_idle() -> bool {
    false
}

pub(super) fn raw_mark_thread_busy() {}
