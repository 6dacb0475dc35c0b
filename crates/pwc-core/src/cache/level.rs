use super::CacheError;

/// Paging mode the walk is performed in.
///
/// See "TLBs, Paging-Structure Caches, and Their Invalidation", sections 8.1
/// and 8.2 and Table 1, for how legacy modes map onto the long-mode caches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum LegacyMode {
    /// 4-level long-mode paging; addresses are used as-is.
    #[default]
    Off,
    /// 32-bit paging with PAE (3-level, 64-bit entries).
    Pae32,
    /// 32-bit paging without PAE (2-level, 32-bit entries, 4 MB superpages).
    NoPae32,
}

impl LegacyMode {
    pub fn name(self) -> &'static str {
        match self {
            LegacyMode::Off => "off",
            LegacyMode::Pae32 => "pae",
            LegacyMode::NoPae32 => "nopae",
        }
    }
}

impl std::fmt::Display for LegacyMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Page-table level a cache holds entries for.
///
/// A PML4 cache entry holds the PML4E for a 512 GB region and lets the walk
/// resume at the PDP table; PDP and PDE caches do the same one and two
/// levels further down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Level {
    Pml4,
    Pdp,
    Pde,
}

/// Bits above the 52-bit physical-address-sized virtual range never take
/// part in a key.
const HIGH_MASK_BITS: u32 = 12;

/// Keep bits `first` down to `last` of `val` in place (inclusive range).
#[inline(always)]
const fn mbits(val: u64, first: u32, last: u32) -> u64 {
    let width = first - last + 1;
    let ones = if width >= 64 { u64::MAX } else { (1u64 << width) - 1 };
    val & (ones << last)
}

impl Level {
    pub const ALL: [Level; 3] = [Level::Pml4, Level::Pdp, Level::Pde];

    pub fn name(self) -> &'static str {
        match self {
            Level::Pml4 => "pml4",
            Level::Pdp => "pdp",
            Level::Pde => "pde",
        }
    }

    /// Lowest address bit that is part of this level's key.
    pub const fn low_bit(self) -> u32 {
        match self {
            Level::Pml4 => 39,
            Level::Pdp => 30,
            Level::Pde => 21,
        }
    }

    /// Address bits that identify an entry at this level.
    pub const fn addr_mask(self) -> u64 {
        (u64::MAX >> HIGH_MASK_BITS) & (u64::MAX << self.low_bit())
    }

    /// Number of leading key bits the index has to discriminate on.
    pub const fn prefix_width(self) -> u8 {
        (64 - self.low_bit()) as u8
    }

    /// Narrow `vaddr` to the bits a legacy-mode walk actually uses at this
    /// level. Pairings that never reach this level are rejected.
    pub fn legacy_mask(self, vaddr: u64, mode: LegacyMode) -> Result<u64, CacheError> {
        match (self, mode) {
            (_, LegacyMode::Off) => Ok(vaddr),
            (Level::Pdp, LegacyMode::Pae32) => Ok(mbits(vaddr, 31, 30)),
            (Level::Pde, LegacyMode::Pae32) => Ok(mbits(vaddr, 31, 21)),
            (Level::Pde, LegacyMode::NoPae32) => Ok(mbits(vaddr, 31, 22)),
            (Level::Pml4, _) | (Level::Pdp, LegacyMode::NoPae32) => {
                Err(CacheError::IllegalMode { level: self, mode })
            }
        }
    }

    /// Cache key for `vaddr` walked in `mode`.
    pub fn key(self, vaddr: u64, mode: LegacyMode) -> Result<u64, CacheError> {
        Ok(self.legacy_mask(vaddr, mode)? & self.addr_mask())
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
