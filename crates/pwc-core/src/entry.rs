use crate::cache::trie::IndexHandle;

/// Raw x86 page-table entry as fetched by the walker.
///
/// The caches never interpret the contents; these accessors exist so the
/// walker and tooling can inspect what got cached.
///
/// Entry format (long mode / PAE):
///   [0]     P   — present
///   [1]     R/W — writable
///   [2]     U/S — user accessible
///   [7]     PS  — large page (only meaningful at PDP/PDE level)
///   [51:12] next-level table or page frame base
///   [63]    NX  — no execute
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct PageTableEntry(pub u64);

impl PageTableEntry {
    const BASE_MASK: u64 = 0x000F_FFFF_FFFF_F000;

    pub const fn raw(self) -> u64 {
        self.0
    }

    pub const fn present(self) -> bool {
        self.0 & 1 != 0
    }

    pub const fn writable(self) -> bool {
        self.0 & (1 << 1) != 0
    }

    pub const fn user(self) -> bool {
        self.0 & (1 << 2) != 0
    }

    pub const fn large_page(self) -> bool {
        self.0 & (1 << 7) != 0
    }

    pub const fn no_execute(self) -> bool {
        self.0 & (1 << 63) != 0
    }

    /// Physical base address of the next-level table (or of the page, for
    /// a large-page entry).
    pub const fn base(self) -> u64 {
        self.0 & Self::BASE_MASK
    }
}

impl From<u64> for PageTableEntry {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl std::fmt::LowerHex for PageTableEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::LowerHex::fmt(&self.0, f)
    }
}

/// One cached walk step.
#[derive(Debug, Clone)]
pub struct TranslationCacheEntry {
    /// Masked address prefix this entry covers.
    pub key: u64,
    /// Entry to continue the walk from.
    pub next_step: PageTableEntry,
    /// Recency stamp; higher is more recent.
    pub lru_seq: u64,
    /// Set iff the slot is occupied.
    pub(crate) index_handle: Option<IndexHandle>,
}

impl TranslationCacheEntry {
    pub(crate) fn vacant() -> Self {
        Self {
            key: 0,
            next_step: PageTableEntry::default(),
            lru_seq: 0,
            index_handle: None,
        }
    }

    pub fn is_occupied(&self) -> bool {
        self.index_handle.is_some()
    }
}
