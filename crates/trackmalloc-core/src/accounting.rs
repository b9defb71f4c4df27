//! Accounting tables the tracking allocator reports into.
//!
//! Two tiers, matching the tracking levels: per-category summary counters
//! (lock-free atomics, safe to bump from any thread on every allocation),
//! and a per-call-site table used only in detail mode. The caller reports
//! *outer* sizes — header/footer overhead included — so the counters
//! reflect what the backend really holds.
//!
//! Counter decrements recover to zero instead of underflowing; a free
//! reported against bytes that were never recorded is a caller bug, not a
//! reason to poison every later reading.

use std::collections::HashMap;
use std::panic::Location;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::category::Category;
use crate::level::TrackingLevel;
use crate::limits::SizeLimits;

struct CategoryCounters {
    bytes: AtomicUsize,
    count: AtomicUsize,
}

impl CategoryCounters {
    const fn new() -> CategoryCounters {
        CategoryCounters {
            bytes: AtomicUsize::new(0),
            count: AtomicUsize::new(0),
        }
    }
}

static SUMMARY: [CategoryCounters; Category::COUNT] =
    [const { CategoryCounters::new() }; Category::COUNT];

/// Live usage recorded for one allocation call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SiteUsage {
    pub file: &'static str,
    pub line: u32,
    pub column: u32,
    pub category: Category,
    pub live_bytes: usize,
    pub live_count: usize,
    pub total_allocations: u64,
}

struct SiteStats {
    file: &'static str,
    line: u32,
    column: u32,
    category: Category,
    live_bytes: usize,
    live_count: usize,
    total_allocations: u64,
}

#[derive(Default)]
struct SiteTable {
    // Marker 0 is reserved for "no site"; marker N maps to sites[N - 1].
    markers: HashMap<(&'static str, u32, u32), u32>,
    sites: Vec<SiteStats>,
}

static SITES: Mutex<Option<SiteTable>> = Mutex::new(None);

struct Committed {
    level: TrackingLevel,
    limits: SizeLimits,
}

static COMMITTED: Mutex<Option<Committed>> = Mutex::new(None);

/// Commit the tracking level and size-limit table. Called exactly once by
/// the global configuration commit; later reconfiguration attempts are
/// rejected before they reach this point.
pub fn initialize(level: TrackingLevel, limits: &SizeLimits) {
    let mut committed = COMMITTED.lock();
    debug_assert!(committed.is_none(), "accounting initialized twice");
    *committed = Some(Committed {
        level,
        limits: limits.clone(),
    });
}

/// The committed tracking level, if the tables have been initialized.
#[must_use]
pub fn committed_level() -> Option<TrackingLevel> {
    COMMITTED.lock().as_ref().map(|c| c.level)
}

/// The committed byte ceiling for one category, if any.
#[must_use]
pub fn limit_for(category: Category) -> Option<usize> {
    COMMITTED
        .lock()
        .as_ref()
        .and_then(|c| c.limits.for_category(category))
}

/// The committed overall byte ceiling, if any.
#[must_use]
pub fn total_limit() -> Option<usize> {
    COMMITTED.lock().as_ref().and_then(|c| c.limits.total())
}

/// Record an allocation of `outer_size` bytes.
pub fn record_malloc(outer_size: usize, category: Category) {
    let counters = &SUMMARY[category.index()];
    counters.bytes.fetch_add(outer_size, Ordering::Relaxed);
    counters.count.fetch_add(1, Ordering::Relaxed);
}

/// Record a deallocation of `outer_size` bytes.
pub fn record_free(outer_size: usize, category: Category) {
    let counters = &SUMMARY[category.index()];
    let _ = counters
        .bytes
        .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
            Some(v.saturating_sub(outer_size))
        });
    let _ = counters
        .count
        .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
            Some(v.saturating_sub(1))
        });
}

/// Net live bytes currently recorded for `category`.
#[must_use]
pub fn category_bytes(category: Category) -> usize {
    SUMMARY[category.index()].bytes.load(Ordering::Relaxed)
}

/// Live allocation count currently recorded for `category`.
#[must_use]
pub fn category_count(category: Category) -> usize {
    SUMMARY[category.index()].count.load(Ordering::Relaxed)
}

/// Register an allocation against its call site and hand out the site
/// marker to stamp into the block metadata. Detail mode only.
#[must_use]
pub fn allocation_at(
    site: &'static Location<'static>,
    outer_size: usize,
    category: Category,
) -> u32 {
    let mut guard = SITES.lock();
    let table = guard.get_or_insert_with(SiteTable::default);
    let key = (site.file(), site.line(), site.column());
    let marker = match table.markers.get(&key) {
        Some(&marker) => marker,
        None => {
            table.sites.push(SiteStats {
                file: site.file(),
                line: site.line(),
                column: site.column(),
                category,
                live_bytes: 0,
                live_count: 0,
                total_allocations: 0,
            });
            let marker = table.sites.len() as u32;
            table.markers.insert(key, marker);
            marker
        }
    };
    let stats = &mut table.sites[marker as usize - 1];
    stats.live_bytes += outer_size;
    stats.live_count += 1;
    stats.total_allocations += 1;
    marker
}

/// Return `outer_size` bytes to the site identified by `marker`. Detail
/// mode only; marker 0 (untagged) is ignored.
pub fn deallocation_at(outer_size: usize, marker: u32) {
    if marker == 0 {
        return;
    }
    let mut guard = SITES.lock();
    let Some(table) = guard.as_mut() else {
        return;
    };
    let Some(stats) = table.sites.get_mut(marker as usize - 1) else {
        return;
    };
    stats.live_bytes = stats.live_bytes.saturating_sub(outer_size);
    stats.live_count = stats.live_count.saturating_sub(1);
}

/// Snapshot of every call site seen so far. Detail mode only.
#[must_use]
pub fn site_snapshot() -> Vec<SiteUsage> {
    let guard = SITES.lock();
    let Some(table) = guard.as_ref() else {
        return Vec::new();
    };
    table
        .sites
        .iter()
        .map(|s| SiteUsage {
            file: s.file,
            line: s.line,
            column: s.column,
            category: s.category,
            live_bytes: s.live_bytes,
            live_count: s.live_count,
            total_allocations: s.total_allocations,
        })
        .collect()
}
