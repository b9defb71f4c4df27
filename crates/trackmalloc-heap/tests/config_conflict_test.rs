//! One-shot configuration contract.
//!
//! A single sequential test: the commit is process-global, so the exact
//! first-call/second-call ordering under test must not race a sibling.

use trackmalloc_heap::{self as heap, Category, ConfigError, TrackingLevel};

#[test]
fn one_shot_commit_contract() {
    // Parse failures before the first commit leave the process untouched.
    assert!(matches!(
        heap::initialize("everything", ""),
        Err(ConfigError::InvalidLevel { .. })
    ));
    assert!(matches!(
        heap::initialize("summary", "first:1K"),
        Err(ConfigError::InvalidLimits { .. })
    ));
    assert!(!heap::is_initialized());
    assert_eq!(heap::tracking_level(), TrackingLevel::Off);

    // First successful call commits level and limits atomically.
    heap::initialize("summary", "buffers:1M,code:4K").unwrap();
    assert!(heap::is_initialized());
    assert_eq!(heap::tracking_level(), TrackingLevel::Summary);
    assert_eq!(
        heap::accounting::limit_for(Category::Buffers),
        Some(1 << 20)
    );
    assert_eq!(heap::accounting::limit_for(Category::Code), Some(4 << 10));
    assert_eq!(heap::accounting::limit_for(Category::Threads), None);
    assert_eq!(heap::accounting::total_limit(), None);
    assert_eq!(
        heap::accounting::committed_level(),
        Some(TrackingLevel::Summary)
    );

    // Identical arguments: silent success, including spellings that parse
    // to the same values.
    heap::initialize("summary", "buffers:1M,code:4K").unwrap();
    heap::initialize("SUMMARY", "buffers:1024K,code:4096").unwrap();

    // Divergence in either field is a conflict, surfaced, never fatal and
    // never silently tolerated.
    assert!(matches!(
        heap::initialize("detail", "buffers:1M,code:4K"),
        Err(ConfigError::Mismatch { .. })
    ));
    assert!(matches!(
        heap::initialize("summary", "buffers:2M,code:4K"),
        Err(ConfigError::Mismatch { .. })
    ));
    assert!(matches!(
        heap::initialize("summary", ""),
        Err(ConfigError::Mismatch { .. })
    ));
    assert!(matches!(
        heap::initialize("off", "buffers:1M,code:4K"),
        Err(ConfigError::Mismatch { .. })
    ));

    // Failed attempts change nothing.
    assert_eq!(heap::tracking_level(), TrackingLevel::Summary);
    assert_eq!(
        heap::accounting::limit_for(Category::Buffers),
        Some(1 << 20)
    );
}
