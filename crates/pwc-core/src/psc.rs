use crate::cache::level::Level;
use crate::cache::{CacheError, TranslationCache};
use crate::config::PwcConfig;

/// Paging-structure cache: one translation cache for each of the first
/// three levels of a long-mode walk.
///
/// The walker talks to the level caches directly; the aggregate only exists
/// so the owning MMU can flush everything at once.
#[derive(Debug)]
pub struct PageStructureCache {
    pub pml4: TranslationCache,
    pub pdp: TranslationCache,
    pub pde: TranslationCache,
}

impl PageStructureCache {
    pub fn new(
        owner: &str,
        pml4_entries: usize,
        pdp_entries: usize,
        pde_entries: usize,
    ) -> Result<Self, CacheError> {
        Ok(Self {
            pml4: TranslationCache::new(format!("{owner}.pml4Cache"), Level::Pml4, pml4_entries)?,
            pdp: TranslationCache::new(format!("{owner}.pdpCache"), Level::Pdp, pdp_entries)?,
            pde: TranslationCache::new(format!("{owner}.pdeCache"), Level::Pde, pde_entries)?,
        })
    }

    /// Build the caches for `owner`, or `None` if the configuration
    /// disables them.
    pub fn from_config(owner: &str, config: &PwcConfig) -> Result<Option<Self>, CacheError> {
        if !config.enabled {
            log::debug!("{}: paging-structure cache disabled", owner);
            return Ok(None);
        }
        Self::new(
            owner,
            config.pml4_entries,
            config.pdp_entries,
            config.pde_entries,
        )
        .map(Some)
    }

    pub fn cache(&self, level: Level) -> &TranslationCache {
        match level {
            Level::Pml4 => &self.pml4,
            Level::Pdp => &self.pdp,
            Level::Pde => &self.pde,
        }
    }

    pub fn cache_mut(&mut self, level: Level) -> &mut TranslationCache {
        match level {
            Level::Pml4 => &mut self.pml4,
            Level::Pdp => &mut self.pdp,
            Level::Pde => &mut self.pde,
        }
    }

    /// Flush all three levels. Required on CR3/CR4 writes and global TLB
    /// flushes; the caches never decide this on their own.
    pub fn flush(&mut self) {
        self.pml4.flush();
        self.pdp.flush();
        self.pde.flush();
    }

    pub fn reset_stats(&mut self) {
        for level in Level::ALL {
            self.cache_mut(level).reset_stats();
        }
    }

    /// One-line summary of every level's counters.
    pub fn stats_line(&self) -> String {
        Level::ALL
            .iter()
            .map(|&level| format!("{}: {}", level, self.cache(level).stats_line()))
            .collect::<Vec<_>>()
            .join(" | ")
    }
}
