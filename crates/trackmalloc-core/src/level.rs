//! Tracking level selector.

/// How much the tracking allocator records about each allocation.
///
/// The level is chosen once at process start and never changes afterwards:
/// the header/footer layout picked at commit time must stay stable for the
/// lifetime of every allocation made under it.
#[repr(u8)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackingLevel {
    /// No tracking; requests pass straight to the backend.
    #[default]
    Off = 0,
    /// Aggregate per-category counters only.
    Summary = 1,
    /// Per-call-site breakdown on top of the summary counters.
    Detail = 2,
}

impl TrackingLevel {
    /// Parse a selector string (case-insensitive). Unknown selectors are a
    /// configuration error, not a default.
    #[must_use]
    pub fn parse(selector: &str) -> Option<TrackingLevel> {
        if selector.eq_ignore_ascii_case("off") {
            Some(TrackingLevel::Off)
        } else if selector.eq_ignore_ascii_case("summary") {
            Some(TrackingLevel::Summary)
        } else if selector.eq_ignore_ascii_case("detail") {
            Some(TrackingLevel::Detail)
        } else {
            None
        }
    }

    /// Stable wire value for the atomic configuration cache.
    #[inline]
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Inverse of [`TrackingLevel::as_u8`].
    #[inline]
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<TrackingLevel> {
        match value {
            0 => Some(TrackingLevel::Off),
            1 => Some(TrackingLevel::Summary),
            2 => Some(TrackingLevel::Detail),
            _ => None,
        }
    }

    /// Whether allocations are tagged and accounted at this level.
    #[inline]
    #[must_use]
    pub const fn is_enabled(self) -> bool {
        !matches!(self, TrackingLevel::Off)
    }

    /// Selector string this level parses from.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            TrackingLevel::Off => "off",
            TrackingLevel::Summary => "summary",
            TrackingLevel::Detail => "detail",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_the_three_levels() {
        assert_eq!(TrackingLevel::parse("off"), Some(TrackingLevel::Off));
        assert_eq!(TrackingLevel::parse("summary"), Some(TrackingLevel::Summary));
        assert_eq!(TrackingLevel::parse("detail"), Some(TrackingLevel::Detail));
        assert_eq!(TrackingLevel::parse("SUMMARY"), Some(TrackingLevel::Summary));
    }

    #[test]
    fn parse_rejects_everything_else() {
        assert_eq!(TrackingLevel::parse(""), None);
        assert_eq!(TrackingLevel::parse("on"), None);
        assert_eq!(TrackingLevel::parse("summary "), None);
        assert_eq!(TrackingLevel::parse("details"), None);
    }

    #[test]
    fn u8_round_trip() {
        for level in [
            TrackingLevel::Off,
            TrackingLevel::Summary,
            TrackingLevel::Detail,
        ] {
            assert_eq!(TrackingLevel::from_u8(level.as_u8()), Some(level));
        }
        assert_eq!(TrackingLevel::from_u8(3), None);
        assert_eq!(TrackingLevel::from_u8(u8::MAX), None);
    }

    #[test]
    fn only_off_is_disabled() {
        assert!(!TrackingLevel::Off.is_enabled());
        assert!(TrackingLevel::Summary.is_enabled());
        assert!(TrackingLevel::Detail.is_enabled());
    }
}
