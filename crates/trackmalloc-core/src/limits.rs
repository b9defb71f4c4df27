//! Size-limit table and its specification syntax.
//!
//! A limit specification is either empty (no limits), a single size that
//! caps total native allocation, or a comma-separated list of
//! `<category>:<size>` pairs. Sizes accept an optional `K`/`M`/`G`/`T`
//! suffix (powers of 1024, case-insensitive). A zero ceiling means
//! unlimited, same as leaving the entry out.

use crate::category::Category;

/// Byte ceilings per allocation category, plus an overall ceiling.
///
/// Zero means "no ceiling". The table is committed once with the rest of
/// the global configuration and compared field-by-field on repeated
/// initialization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SizeLimits {
    total: usize,
    per_category: [usize; Category::COUNT],
}

impl SizeLimits {
    /// A table with no ceilings.
    #[must_use]
    pub const fn unlimited() -> SizeLimits {
        SizeLimits {
            total: 0,
            per_category: [0; Category::COUNT],
        }
    }

    /// Parse a limit specification. Returns `None` on any syntax error;
    /// the caller owns the diagnostic.
    #[must_use]
    pub fn parse(spec: &str) -> Option<SizeLimits> {
        let spec = spec.trim();
        if spec.is_empty() {
            return Some(SizeLimits::unlimited());
        }

        if !spec.contains(':') {
            let total = parse_size(spec)?;
            return Some(SizeLimits {
                total,
                per_category: [0; Category::COUNT],
            });
        }

        let mut limits = SizeLimits::unlimited();
        for entry in spec.split(',') {
            let (name, size) = entry.split_once(':')?;
            let category = Category::from_name(name.trim())?;
            limits.per_category[category.index()] = parse_size(size.trim())?;
        }
        Some(limits)
    }

    /// Overall byte ceiling, if one is set.
    #[inline]
    #[must_use]
    pub fn total(&self) -> Option<usize> {
        (self.total != 0).then_some(self.total)
    }

    /// Byte ceiling for one category, if one is set.
    #[inline]
    #[must_use]
    pub fn for_category(&self, category: Category) -> Option<usize> {
        let limit = self.per_category[category.index()];
        (limit != 0).then_some(limit)
    }

    /// Whether any ceiling is set at all.
    #[must_use]
    pub fn is_unlimited(&self) -> bool {
        self.total == 0 && self.per_category.iter().all(|&l| l == 0)
    }
}

/// Parse `<digits>[K|M|G|T]` into bytes, rejecting overflow.
fn parse_size(text: &str) -> Option<usize> {
    if text.is_empty() {
        return None;
    }
    let (digits, multiplier) = match text.as_bytes()[text.len() - 1].to_ascii_uppercase() {
        b'K' => (&text[..text.len() - 1], 1usize << 10),
        b'M' => (&text[..text.len() - 1], 1 << 20),
        b'G' => (&text[..text.len() - 1], 1 << 30),
        b'T' => (&text[..text.len() - 1], 1 << 40),
        _ => (text, 1),
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let value: usize = digits.parse().ok()?;
    value.checked_mul(multiplier)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_spec_is_unlimited() {
        let limits = SizeLimits::parse("").unwrap();
        assert!(limits.is_unlimited());
        assert_eq!(limits.total(), None);
        assert_eq!(limits.for_category(Category::Code), None);
        assert_eq!(SizeLimits::parse("  ").unwrap(), SizeLimits::unlimited());
    }

    #[test]
    fn bare_size_caps_the_total() {
        let limits = SizeLimits::parse("2048").unwrap();
        assert_eq!(limits.total(), Some(2048));
        assert_eq!(limits.for_category(Category::General), None);

        assert_eq!(SizeLimits::parse("4K").unwrap().total(), Some(4 << 10));
        assert_eq!(SizeLimits::parse("16m").unwrap().total(), Some(16 << 20));
        assert_eq!(SizeLimits::parse("2G").unwrap().total(), Some(2 << 30));
        assert_eq!(SizeLimits::parse("1T").unwrap().total(), Some(1 << 40));
    }

    #[test]
    fn category_list_sets_individual_ceilings() {
        let limits = SizeLimits::parse("buffers:1M,code:4K").unwrap();
        assert_eq!(limits.total(), None);
        assert_eq!(limits.for_category(Category::Buffers), Some(1 << 20));
        assert_eq!(limits.for_category(Category::Code), Some(4 << 10));
        assert_eq!(limits.for_category(Category::Threads), None);
    }

    #[test]
    fn syntax_errors_are_rejected() {
        for spec in [
            "bogus",
            "-1",
            "1X",
            "K",
            "buffers:",
            ":1K",
            "nosuchcategory:1K",
            "buffers:1K,",
            "buffers:1K,,code:1K",
            "1K,2K",
        ] {
            assert!(SizeLimits::parse(spec).is_none(), "accepted {spec:?}");
        }
    }

    #[test]
    fn size_overflow_is_rejected() {
        assert!(SizeLimits::parse("18446744073709551615").is_some());
        assert!(SizeLimits::parse("18446744073709551616").is_none());
        assert!(SizeLimits::parse("18014398509481984G").is_none());
    }

    #[test]
    fn equality_is_field_by_field() {
        assert_eq!(
            SizeLimits::parse("buffers:1M").unwrap(),
            SizeLimits::parse("buffers:1024K").unwrap()
        );
        assert_ne!(
            SizeLimits::parse("buffers:1M").unwrap(),
            SizeLimits::parse("code:1M").unwrap()
        );
        assert_ne!(
            SizeLimits::parse("1M").unwrap(),
            SizeLimits::parse("buffers:1M").unwrap()
        );
    }
}
