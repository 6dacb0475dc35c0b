//! Paging-structure caches for an x86 MMU model.
//!
//! A page walk that misses the TLB does not have to start from CR3: the
//! PML4, PDP and PDE caches remember the entries the last walks read at
//! those levels, keyed by the virtual-address bits each level translates.
//! The walker asks the deepest level first and resumes from whatever hits.
//!
//! Every entry is a copy of page-table memory, so the caches can be flushed
//! (or dropped and rebuilt) at any time without losing state.

pub mod cache;
pub mod config;
pub mod entry;
pub mod psc;

pub use cache::level::{LegacyMode, Level};
pub use cache::{CacheError, TranslationCache, TranslationCacheStats};
pub use config::PwcConfig;
pub use entry::{PageTableEntry, TranslationCacheEntry};
pub use psc::PageStructureCache;
