use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use pwc_core::{CacheError, LegacyMode, Level, PageStructureCache, PageTableEntry};

pub const HEADER_LINE: &str = "# pwc_trace_v1";

/// One walker interaction with the paging-structure cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceOp {
    Lookup {
        level: Level,
        vaddr: u64,
        mode: LegacyMode,
    },
    Insert {
        level: Level,
        vaddr: u64,
        pte: PageTableEntry,
        mode: LegacyMode,
    },
    Flush,
}

#[derive(Debug, thiserror::Error)]
pub enum TraceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("line {line}: {reason}")]
    Parse { line: usize, reason: String },
    #[error("line {line}: {source}")]
    Cache {
        line: usize,
        #[source]
        source: CacheError,
    },
}

/// Per-run totals, independent of the per-level cache counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReplaySummary {
    pub lookups: u64,
    pub hits: u64,
    pub inserts: u64,
    pub flushes: u64,
}

fn parse_level(token: &str) -> Result<Level, String> {
    match token.to_ascii_lowercase().as_str() {
        "pml4" => Ok(Level::Pml4),
        "pdp" => Ok(Level::Pdp),
        "pde" => Ok(Level::Pde),
        _ => Err(format!("unknown level {token:?}")),
    }
}

fn parse_mode(token: Option<&str>) -> Result<LegacyMode, String> {
    match token.map(str::to_ascii_lowercase).as_deref() {
        None | Some("off") => Ok(LegacyMode::Off),
        Some("pae") => Ok(LegacyMode::Pae32),
        Some("nopae") => Ok(LegacyMode::NoPae32),
        Some(other) => Err(format!("unknown legacy mode {other:?}")),
    }
}

/// Decimal, or hexadecimal with a `0x` prefix. `_` separators are allowed.
fn parse_u64(token: &str) -> Result<u64, String> {
    let cleaned = token.replace('_', "");
    let parsed = match cleaned
        .strip_prefix("0x")
        .or_else(|| cleaned.strip_prefix("0X"))
    {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => cleaned.parse::<u64>(),
    };
    parsed.map_err(|_| format!("invalid number {token:?}"))
}

/// Parse one trace line. Blank lines and comments yield `None`.
pub fn parse_line(line: &str) -> Result<Option<TraceOp>, String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    // Format: lookup <level> <vaddr> [mode]
    //         insert <level> <vaddr> <pte> [mode]
    //         flush
    let parts: Vec<&str> = line.split_whitespace().collect();
    let op = match parts.as_slice() {
        ["flush"] => TraceOp::Flush,
        ["lookup", level, vaddr, rest @ ..] if rest.len() <= 1 => TraceOp::Lookup {
            level: parse_level(level)?,
            vaddr: parse_u64(vaddr)?,
            mode: parse_mode(rest.first().copied())?,
        },
        ["insert", level, vaddr, pte, rest @ ..] if rest.len() <= 1 => TraceOp::Insert {
            level: parse_level(level)?,
            vaddr: parse_u64(vaddr)?,
            pte: PageTableEntry(parse_u64(pte)?),
            mode: parse_mode(rest.first().copied())?,
        },
        _ => return Err("malformed operation".to_string()),
    };
    Ok(Some(op))
}

/// Read a trace, tagging each operation with its 1-based line number.
///
/// Malformed lines are skipped with a warning, or rejected when `strict`.
pub fn read_trace(reader: impl BufRead, strict: bool) -> Result<Vec<(usize, TraceOp)>, TraceError> {
    let mut ops = Vec::new();
    let mut saw_header = false;

    for (idx, line) in reader.lines().enumerate() {
        let line_no = idx + 1;
        let line = line?;
        if line.trim() == HEADER_LINE {
            saw_header = true;
            continue;
        }
        match parse_line(&line) {
            Ok(Some(op)) => ops.push((line_no, op)),
            Ok(None) => {}
            Err(reason) if strict => {
                return Err(TraceError::Parse {
                    line: line_no,
                    reason,
                })
            }
            Err(reason) => {
                log::warn!("Ignoring trace line {} ({}): {}", line_no, reason, line);
            }
        }
    }

    if !saw_header {
        log::warn!("Trace has no {:?} header line", HEADER_LINE);
    }
    log::info!("Loaded trace: ops={}", ops.len());
    Ok(ops)
}

pub fn load(path: &Path, strict: bool) -> Result<Vec<(usize, TraceOp)>, TraceError> {
    let file = File::open(path)?;
    read_trace(BufReader::new(file), strict)
}

/// Apply `ops` to `psc`. `on_lookup` sees every lookup and its result.
///
/// Stops at the first contract violation.
pub fn replay(
    psc: &mut PageStructureCache,
    ops: &[(usize, TraceOp)],
    mut on_lookup: impl FnMut(usize, &TraceOp, Option<PageTableEntry>),
) -> Result<ReplaySummary, TraceError> {
    let mut summary = ReplaySummary::default();

    for &(line, op) in ops {
        match op {
            TraceOp::Lookup { level, vaddr, mode } => {
                let hit = psc
                    .cache_mut(level)
                    .try_lookup(vaddr, mode, true)
                    .map_err(|source| TraceError::Cache { line, source })?
                    .map(|entry| entry.next_step);
                summary.lookups += 1;
                if hit.is_some() {
                    summary.hits += 1;
                }
                on_lookup(line, &op, hit);
            }
            TraceOp::Insert {
                level,
                vaddr,
                pte,
                mode,
            } => {
                psc.cache_mut(level)
                    .try_insert(vaddr, pte, mode)
                    .map_err(|source| TraceError::Cache { line, source })?;
                summary.inserts += 1;
            }
            TraceOp::Flush => {
                psc.flush();
                summary.flushes += 1;
            }
        }
    }

    Ok(summary)
}
