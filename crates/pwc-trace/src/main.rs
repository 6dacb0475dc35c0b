mod trace;

use std::path::PathBuf;

use clap::{arg, command, value_parser};
use pwc_core::{Level, PageStructureCache, PwcConfig};

use trace::TraceOp;

fn main() {
    env_logger::init();

    let matches = command!()
        .arg(
            arg!(--pml4 <ENTRIES> "PML4 cache capacity (overrides PWC_PML4_ENTRIES)")
                .required(false)
                .value_parser(value_parser!(usize)),
        )
        .arg(
            arg!(--pdp <ENTRIES> "PDP cache capacity (overrides PWC_PDP_ENTRIES)")
                .required(false)
                .value_parser(value_parser!(usize)),
        )
        .arg(
            arg!(--pde <ENTRIES> "PDE cache capacity (overrides PWC_PDE_ENTRIES)")
                .required(false)
                .value_parser(value_parser!(usize)),
        )
        .arg(arg!(-v --verbose "Print the result of every lookup"))
        .arg(arg!(--strict "Fail on malformed trace lines instead of skipping them"))
        .arg(arg!(<TRACE> "Trace file to replay").value_parser(value_parser!(PathBuf)))
        .get_matches();

    let mut config = PwcConfig::from_env();
    if let Some(&n) = matches.get_one::<usize>("pml4") {
        config.pml4_entries = n;
    }
    if let Some(&n) = matches.get_one::<usize>("pdp") {
        config.pdp_entries = n;
    }
    if let Some(&n) = matches.get_one::<usize>("pde") {
        config.pde_entries = n;
    }
    let verbose = matches.get_flag("verbose");
    let strict = matches.get_flag("strict");

    let mut psc = match PageStructureCache::from_config("trace.mmu", &config) {
        Ok(Some(psc)) => psc,
        Ok(None) => {
            eprintln!(
                "Paging-structure cache disabled by {}; nothing to replay",
                PwcConfig::ENABLE_VAR
            );
            return;
        }
        Err(e) => {
            eprintln!("Invalid cache configuration: {}", e);
            std::process::exit(1);
        }
    };

    let Some(path) = matches.get_one::<PathBuf>("TRACE") else {
        eprintln!("Usage: pwc-trace [OPTIONS] <TRACE>");
        std::process::exit(1);
    };
    let ops = match trace::load(path, strict) {
        Ok(ops) => ops,
        Err(e) => {
            eprintln!("Failed to load trace {}: {}", path.display(), e);
            std::process::exit(1);
        }
    };

    let result = trace::replay(&mut psc, &ops, |line, op, hit| {
        if !verbose {
            return;
        }
        if let TraceOp::Lookup { level, vaddr, mode } = op {
            match hit {
                Some(pte) => println!("{line:>6}: {level} {vaddr:#018x} [{mode}] hit {pte:#x}"),
                None => println!("{line:>6}: {level} {vaddr:#018x} [{mode}] miss"),
            }
        }
    });

    let summary = match result {
        Ok(summary) => summary,
        Err(e) => {
            eprintln!("Trace aborted: {}", e);
            for level in Level::ALL {
                eprintln!("  {}", level_line(&psc, level));
            }
            std::process::exit(1);
        }
    };

    println!(
        "{} ops: {} lookups ({} hits), {} inserts, {} flushes",
        ops.len(),
        summary.lookups,
        summary.hits,
        summary.inserts,
        summary.flushes
    );
    for level in Level::ALL {
        println!("  {}", level_line(&psc, level));
    }
    log::debug!("{}", psc.stats_line());
}

fn level_line(psc: &PageStructureCache, level: Level) -> String {
    let tc = psc.cache(level);
    format!("{:<24} {}", tc.name(), tc.stats_line())
}
