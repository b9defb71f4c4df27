//! One-shot global configuration.
//!
//! The tracking level and size-limit table are committed exactly once, at
//! process start, before worker threads exist. Afterwards the level is
//! read lock-free on every allocation; the committed values can never
//! change, because the header/footer layout chosen at commit time must
//! stay stable for the lifetime of every allocation made under it.
//! Repeated initialization is tolerated only when it parses to exactly the
//! committed values.

use std::sync::atomic::{AtomicU8, Ordering};

use parking_lot::Mutex;
use thiserror::Error;

use trackmalloc_core::accounting;
use trackmalloc_core::{SizeLimits, TrackingLevel};

/// Configuration failures surfaced by [`initialize`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("syntax error in tracking level {input:?}, expected off|summary|detail")]
    InvalidLevel { input: String },
    #[error(
        "syntax error in size limits {input:?}, expected <size>[K|M|G|T] or <category>:<size>,..."
    )]
    InvalidLimits { input: String },
    #[error(
        "configuration conflict: already initialized with tracking level {committed:?}; \
         re-initialization must parse to the same tracking level and size limits"
    )]
    Mismatch { committed: &'static str },
}

// Sentinel for "no commit yet"; committed levels use TrackingLevel::as_u8.
const LEVEL_UNCOMMITTED: u8 = u8::MAX;

static COMMITTED_LEVEL: AtomicU8 = AtomicU8::new(LEVEL_UNCOMMITTED);

struct Committed {
    level: TrackingLevel,
    limits: SizeLimits,
}

static COMMITTED: Mutex<Option<Committed>> = Mutex::new(None);

/// Parse and commit the global configuration.
///
/// The first successful call wins and also initializes the accounting
/// tables. Every later call re-parses its arguments and compares them
/// field-by-field against the committed values: a match is a silent
/// success, a mismatch is [`ConfigError::Mismatch`]. Parse errors never
/// commit anything.
pub fn initialize(level_selector: &str, limits_spec: &str) -> Result<(), ConfigError> {
    let level = TrackingLevel::parse(level_selector).ok_or_else(|| ConfigError::InvalidLevel {
        input: level_selector.to_string(),
    })?;
    let limits = SizeLimits::parse(limits_spec).ok_or_else(|| ConfigError::InvalidLimits {
        input: limits_spec.to_string(),
    })?;

    let mut committed = COMMITTED.lock();
    match committed.as_ref() {
        Some(existing) => {
            if existing.level == level && existing.limits == limits {
                Ok(())
            } else {
                Err(ConfigError::Mismatch {
                    committed: existing.level.name(),
                })
            }
        }
        None => {
            accounting::initialize(level, &limits);
            *committed = Some(Committed { level, limits });
            COMMITTED_LEVEL.store(level.as_u8(), Ordering::Release);
            Ok(())
        }
    }
}

/// The committed tracking level, or `Off` before the commit.
#[inline]
#[must_use]
pub fn tracking_level() -> TrackingLevel {
    TrackingLevel::from_u8(COMMITTED_LEVEL.load(Ordering::Acquire)).unwrap_or(TrackingLevel::Off)
}

/// Whether [`initialize`] has committed a configuration.
#[must_use]
pub fn is_initialized() -> bool {
    COMMITTED_LEVEL.load(Ordering::Acquire) != LEVEL_UNCOMMITTED
}
