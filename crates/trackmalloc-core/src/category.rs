//! Allocation categories.
//!
//! Every tracked allocation is stamped with a category, the key the
//! accounting tables aggregate by and the size-limit table is indexed by.
//! The discriminants are stable: they are stored verbatim in block
//! headers/footers for the lifetime of the allocation.

/// Coarse classification of a native allocation.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    /// Uncategorized general-purpose memory.
    General = 0,
    /// I/O and data buffers.
    Buffers = 1,
    /// Thread stacks-adjacent bookkeeping and per-thread state.
    Threads = 2,
    /// Generated or loaded code.
    Code = 3,
    /// Type and symbol metadata.
    Metadata = 4,
    /// The allocator's and runtime's own bookkeeping.
    Internal = 5,
    /// Reserved for tests.
    Test = 6,
    /// Anything else.
    Other = 7,
}

impl Category {
    /// Number of categories.
    pub const COUNT: usize = 8;

    /// All categories, in discriminant order.
    pub const ALL: [Category; Category::COUNT] = [
        Category::General,
        Category::Buffers,
        Category::Threads,
        Category::Code,
        Category::Metadata,
        Category::Internal,
        Category::Test,
        Category::Other,
    ];

    /// Index into per-category tables.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Lower-case name used in size-limit specifications.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Category::General => "general",
            Category::Buffers => "buffers",
            Category::Threads => "threads",
            Category::Code => "code",
            Category::Metadata => "metadata",
            Category::Internal => "internal",
            Category::Test => "test",
            Category::Other => "other",
        }
    }

    /// Parse a category name (case-insensitive).
    #[must_use]
    pub fn from_name(name: &str) -> Option<Category> {
        Category::ALL
            .into_iter()
            .find(|c| name.eq_ignore_ascii_case(c.name()))
    }
}
