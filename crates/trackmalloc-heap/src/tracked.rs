//! Tracking layer over the backend allocator.
//!
//! With tracking enabled, every allocation grows by one hidden metadata
//! record carrying `{outer size, call-site marker, category}`. For
//! naturally-aligned requests the record is a header prepended to the
//! block; a request aligned beyond the backend minimum cannot tolerate a
//! header (it would shift the caller's pointer off its alignment), so the
//! record becomes a footer placed after the padded usable region instead.
//! Both encodings carry the same fields and are recovered arithmetically
//! from the caller pointer at free time; no side table is consulted.
//!
//! Every `do_*` function takes the tracking level explicitly. The public
//! wrappers in the crate root read the committed level once per call and
//! pass it down, so a level can never change in the middle of an
//! operation.

use std::panic::Location;

use trackmalloc_core::accounting;
use trackmalloc_core::arith;
use trackmalloc_core::{Category, TrackingLevel};

use crate::backend::{self, Allocation, FailStrategy};

/// Metadata prepended to naturally-aligned tracked allocations.
///
/// Padded to the backend's minimum alignment so the caller-visible region
/// directly behind it keeps that alignment. Written once at allocation
/// time, read-only afterwards.
#[repr(C, align(16))]
#[derive(Debug, Clone, Copy)]
struct BlockHeader {
    /// Backend-level size of the whole block, header included.
    outer_size: usize,
    /// Call-site marker from the accounting site table; 0 when untagged.
    site_marker: u32,
    /// Accounting category.
    category: Category,
}

/// Metadata appended to over-aligned tracked allocations. Same fields as
/// [`BlockHeader`], natural layout; its address is recomputed from the
/// request's size and alignment at free time, never stored.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct BlockFooter {
    outer_size: usize,
    site_marker: u32,
    category: Category,
}

pub(crate) const HEADER_SIZE: usize = size_of::<BlockHeader>();
const FOOTER_SIZE: usize = size_of::<BlockFooter>();
const FOOTER_ALIGN: usize = align_of::<BlockFooter>();

// The header must cover the backend's minimum alignment exactly, or the
// caller pointer behind it would lose that alignment.
const _: () = assert!(align_of::<BlockHeader>() >= align_of::<libc::max_align_t>());
const _: () = assert!(size_of::<BlockHeader>() == align_of::<BlockHeader>());
const _: () = assert!(size_of::<BlockFooter>() % align_of::<BlockFooter>() == 0);

type Site = &'static Location<'static>;

/// Stamp a header in front of a freshly allocated outer block and return
/// the caller-visible view.
///
/// # Safety
///
/// `raw` must point to at least `outer_size` writable bytes aligned to the
/// backend minimum.
unsafe fn stamp_header(raw: *mut u8, outer_size: usize, marker: u32, category: Category) -> Allocation {
    let header = BlockHeader {
        outer_size,
        site_marker: marker,
        category,
    };
    // SAFETY: per contract, the first HEADER_SIZE bytes of `raw` are ours
    // and sufficiently aligned.
    unsafe { raw.cast::<BlockHeader>().write(header) };
    Allocation {
        // SAFETY: outer_size >= HEADER_SIZE, so the offset stays in bounds.
        ptr: unsafe { raw.add(HEADER_SIZE) },
        usable: outer_size - HEADER_SIZE,
    }
}

fn site_marker(level: TrackingLevel, site: Site, outer_size: usize, category: Category) -> u32 {
    if level == TrackingLevel::Detail {
        accounting::allocation_at(site, outer_size, category)
    } else {
        0
    }
}

pub(crate) fn do_allocate(
    size: usize,
    category: Category,
    fail: FailStrategy,
    level: TrackingLevel,
    site: Site,
) -> Option<Allocation> {
    if !level.is_enabled() {
        return backend::allocate(size, fail);
    }
    let outer = match arith::checked_add(size, HEADER_SIZE) {
        Some(outer) => outer,
        None => return backend::handle_overflow(fail, "malloc"),
    };
    let raw = backend::allocate(outer, fail)?;
    accounting::record_malloc(raw.usable, category);
    let marker = site_marker(level, site, raw.usable, category);
    // SAFETY: `raw.ptr` is a live block of `raw.usable >= outer` bytes.
    Some(unsafe { stamp_header(raw.ptr, raw.usable, marker, category) })
}

pub(crate) fn do_allocate_zeroed(
    size: usize,
    category: Category,
    fail: FailStrategy,
    level: TrackingLevel,
    site: Site,
) -> Option<Allocation> {
    if !level.is_enabled() {
        return backend::allocate_zeroed(size, fail);
    }
    let outer = match arith::checked_add(size, HEADER_SIZE) {
        Some(outer) => outer,
        None => return backend::handle_overflow(fail, "calloc"),
    };
    let raw = backend::allocate_zeroed(outer, fail)?;
    accounting::record_malloc(raw.usable, category);
    let marker = site_marker(level, site, raw.usable, category);
    // SAFETY: `raw.ptr` is a live block of `raw.usable >= outer` bytes.
    Some(unsafe { stamp_header(raw.ptr, raw.usable, marker, category) })
}

pub(crate) fn do_allocate_array(
    count: usize,
    size: usize,
    category: Category,
    fail: FailStrategy,
    level: TrackingLevel,
    site: Site,
) -> Option<Allocation> {
    let Some(total) = arith::checked_multiply(count, size) else {
        return backend::handle_overflow(fail, "malloc");
    };
    do_allocate(total, category, fail, level, site)
}

pub(crate) fn do_allocate_array_zeroed(
    count: usize,
    size: usize,
    category: Category,
    fail: FailStrategy,
    level: TrackingLevel,
    site: Site,
) -> Option<Allocation> {
    let Some(total) = arith::checked_multiply(count, size) else {
        return backend::handle_overflow(fail, "calloc");
    };
    do_allocate_zeroed(total, category, fail, level, site)
}

pub(crate) fn do_allocate_aligned(
    alignment: usize,
    size: usize,
    category: Category,
    fail: FailStrategy,
    level: TrackingLevel,
    site: Site,
) -> Option<Allocation> {
    if !level.is_enabled() {
        return backend::allocate_aligned(alignment, size, fail);
    }
    debug_assert!(alignment.is_power_of_two(), "alignment must be a power of 2");
    if alignment <= backend::min_alignment() {
        return do_allocate(size, category, fail, level, site);
    }
    if size == 0 {
        return Some(Allocation {
            ptr: backend::guard_page(),
            usable: 0,
        });
    }
    let Some(inner) = arith::checked_align_up(size, FOOTER_ALIGN) else {
        return backend::handle_overflow(fail, "aligned_alloc");
    };
    let outer = match arith::checked_add(inner, FOOTER_SIZE) {
        Some(outer) => outer,
        None => return backend::handle_overflow(fail, "aligned_alloc"),
    };
    let raw = backend::allocate_aligned(alignment, outer, fail)?;
    debug_assert!(raw.usable >= outer, "backend under-delivered an aligned block");
    accounting::record_malloc(raw.usable, category);
    let marker = site_marker(level, site, raw.usable, category);
    // The footer sits directly after the padded usable region, at an
    // offset the free side can recompute from size and alignment alone;
    // backend rounding beyond `outer` stays dead capacity behind it.
    let footer = BlockFooter {
        outer_size: raw.usable,
        site_marker: marker,
        category,
    };
    // SAFETY: `inner + FOOTER_SIZE == outer <= raw.usable`, and `inner` is
    // a multiple of the footer alignment on a min_alignment-aligned block.
    unsafe { raw.ptr.add(inner).cast::<BlockFooter>().write(footer) };
    Some(Allocation {
        ptr: raw.ptr,
        usable: inner,
    })
}

/// # Safety
///
/// `old_ptr` must be null, the sentinel, or a live caller pointer from
/// this layer's non-aligned allocation path at the same tracking level.
pub(crate) unsafe fn do_reallocate(
    old_ptr: *mut u8,
    new_size: usize,
    category: Category,
    fail: FailStrategy,
    level: TrackingLevel,
    site: Site,
) -> Option<Allocation> {
    if !level.is_enabled() {
        // SAFETY: per contract.
        return unsafe { backend::reallocate(old_ptr, new_size, fail) };
    }
    if backend::is_empty_allocation(old_ptr) {
        return do_allocate(new_size, category, fail, level, site);
    }
    if new_size == 0 {
        // SAFETY: per contract.
        unsafe { do_deallocate(old_ptr, level, None) };
        return None;
    }
    // SAFETY: per contract, a header precedes the caller pointer.
    let old_header_ptr = unsafe { old_ptr.sub(HEADER_SIZE) };
    // Copy the header out before the backend call: the backend may free or
    // move the block.
    // SAFETY: the header is live and ours until the backend call below.
    let old_header = unsafe { old_header_ptr.cast::<BlockHeader>().read() };
    let outer = match arith::checked_add(new_size, HEADER_SIZE) {
        Some(outer) => outer,
        None => return backend::handle_overflow(fail, "realloc"),
    };
    // SAFETY: `old_header_ptr` is the backend-level start of the block.
    let raw = unsafe { backend::reallocate(old_header_ptr, outer, fail) }?;
    // Old size out first, new size in second: a reader in between sees the
    // dip, never a double count, and the counters cannot underflow because
    // the old allocation was recorded when it was made.
    accounting::record_free(old_header.outer_size, old_header.category);
    if level == TrackingLevel::Detail {
        accounting::deallocation_at(old_header.outer_size, old_header.site_marker);
    }
    accounting::record_malloc(raw.usable, category);
    let marker = site_marker(level, site, raw.usable, category);
    // SAFETY: `raw.ptr` is a live block of `raw.usable >= outer` bytes.
    Some(unsafe { stamp_header(raw.ptr, raw.usable, marker, category) })
}

/// # Safety
///
/// As [`do_reallocate`].
pub(crate) unsafe fn do_reallocate_array(
    old_ptr: *mut u8,
    new_count: usize,
    new_size: usize,
    category: Category,
    fail: FailStrategy,
    level: TrackingLevel,
    site: Site,
) -> Option<Allocation> {
    let Some(total) = arith::checked_multiply(new_count, new_size) else {
        return backend::handle_overflow(fail, "realloc");
    };
    // SAFETY: per contract.
    unsafe { do_reallocate(old_ptr, total, category, fail, level, site) }
}

/// Free a caller pointer from the non-aligned path. `expected_size` is the
/// sized-free cross-check: the caller's claimed usable size, asserted
/// against the header, never trusted for the free itself.
///
/// # Safety
///
/// `ptr` must be null, the sentinel, or a live caller pointer from this
/// layer's non-aligned allocation path at the same tracking level.
pub(crate) unsafe fn do_deallocate(ptr: *mut u8, level: TrackingLevel, expected_size: Option<usize>) {
    if !level.is_enabled() {
        match expected_size {
            // SAFETY: per contract.
            Some(size) => unsafe { backend::deallocate_sized(ptr, size) },
            // SAFETY: per contract.
            None => unsafe { backend::deallocate(ptr) },
        }
        return;
    }
    if backend::is_empty_allocation(ptr) {
        debug_assert!(expected_size.unwrap_or(0) == 0, "size mismatch");
        return;
    }
    // SAFETY: per contract, a header precedes the caller pointer.
    let header_ptr = unsafe { ptr.sub(HEADER_SIZE) };
    // SAFETY: the header is live until the backend free below.
    let header = unsafe { header_ptr.cast::<BlockHeader>().read() };
    if let Some(size) = expected_size {
        debug_assert!(
            header.outer_size - HEADER_SIZE == size,
            "sized free does not match the allocation"
        );
    }
    accounting::record_free(header.outer_size, header.category);
    if level == TrackingLevel::Detail {
        accounting::deallocation_at(header.outer_size, header.site_marker);
    }
    // SAFETY: `header_ptr` is the backend-level start of the block and
    // `header.outer_size` its recorded outer size.
    unsafe { backend::deallocate_sized(header_ptr, header.outer_size) };
}

/// Free a caller pointer from the over-aligned path.
///
/// # Safety
///
/// `ptr` must be null, the sentinel, or a live caller pointer returned by
/// [`do_allocate_aligned`] with this `alignment` at the same tracking
/// level; `size` must be the size passed to (or the usable size reported
/// by) the matching allocation call — the two round up to the same footer
/// offset.
pub(crate) unsafe fn do_deallocate_aligned(ptr: *mut u8, alignment: usize, size: usize, level: TrackingLevel) {
    if !level.is_enabled() {
        // SAFETY: per contract.
        unsafe { backend::deallocate_aligned_sized(ptr, alignment, size) };
        return;
    }
    debug_assert!(alignment.is_power_of_two(), "alignment must be a power of 2");
    if alignment <= backend::min_alignment() {
        // Allocated through the header path.
        // SAFETY: per contract.
        unsafe { do_deallocate(ptr, level, Some(size)) };
        return;
    }
    if backend::is_empty_allocation(ptr) {
        debug_assert!(size == 0, "size mismatch");
        return;
    }
    debug_assert!(size != 0, "size mismatch");
    let inner = arith::align_up(size, FOOTER_ALIGN);
    // SAFETY: per contract, the footer sits at the end of the padded
    // usable region.
    let footer = unsafe { ptr.add(inner).cast::<BlockFooter>().read() };
    debug_assert!(
        footer.outer_size >= inner + FOOTER_SIZE,
        "aligned sized free does not match the allocation"
    );
    accounting::record_free(footer.outer_size, footer.category);
    if level == TrackingLevel::Detail {
        accounting::deallocation_at(footer.outer_size, footer.site_marker);
    }
    // SAFETY: `ptr` is the backend-level start of the block and
    // `footer.outer_size` its recorded outer size.
    unsafe { backend::deallocate_aligned_sized(ptr, alignment, footer.outer_size) };
}

/// Usable capacity a caller would observe for a `size`-byte request at
/// `level`, without allocating.
pub(crate) fn do_good_size(size: usize, level: TrackingLevel) -> usize {
    if !level.is_enabled() {
        return backend::good_size(size);
    }
    match arith::checked_add(size, HEADER_SIZE) {
        Some(outer) => backend::good_size(outer) - HEADER_SIZE,
        None => size,
    }
}

/// Aligned variant of [`do_good_size`].
pub(crate) fn do_good_size_aligned(alignment: usize, size: usize, level: TrackingLevel) -> usize {
    if !level.is_enabled() {
        return backend::good_size_aligned(alignment, size);
    }
    debug_assert!(alignment.is_power_of_two(), "alignment must be a power of 2");
    if alignment <= backend::min_alignment() {
        return do_good_size(size, level);
    }
    // The footer offset is fixed by size and alignment, so the padded
    // region is exactly what the caller observes; backend rounding beyond
    // it is unreachable dead capacity.
    match arith::checked_align_up(size, FOOTER_ALIGN) {
        Some(inner) => inner,
        None => size,
    }
}
