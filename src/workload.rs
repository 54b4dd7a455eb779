//! Init file and workload file handling (SPEC_FULL §4.3/§6): load every
//! relation named in the init file in order, then run each workload
//! line through parse → rewrite → execute, appending one result line to
//! `output.res` per query.

use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::time::Instant;

use tracing::{debug, trace};

use crate::errors::Result;
use crate::executor::{self, Mode};
use crate::metrics::WorkloadMetrics;
use crate::parser;
use crate::relation::Relation;
use crate::rewrite;

/// Read the init file line by line; line `i` (0-based) names the
/// relation file for relation id `i` (spec.md §6).
pub fn load_relations(init_path: &Path) -> Result<Vec<Relation>> {
    let reader = BufReader::new(File::open(init_path)?);
    let mut relations = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let path = line.trim();
        if path.is_empty() {
            continue;
        }
        relations.push(Relation::load(path)?);
    }
    Ok(relations)
}

/// Render one query's result: space-separated sums if any tuple
/// matched, otherwise `NULL` repeated once per output column (spec.md §6).
pub fn format_result(amount: u64, sums: &[u64]) -> String {
    if amount > 0 {
        sums.iter().map(ToString::to_string).collect::<Vec<_>>().join(" ")
    } else {
        vec!["NULL"; sums.len()].join(" ")
    }
}

/// Run every line of the workload file under each requested mode, in
/// the order the modes were given, appending a result line per query to
/// `output_path` (truncated once up front).
pub fn run_workload(
    workload_path: &Path,
    output_path: &Path,
    relations: &[Relation],
    modes: &[Mode],
    morsel_size: u64,
) -> Result<WorkloadMetrics> {
    let reader = BufReader::new(File::open(workload_path)?);
    let mut out = File::create(output_path)?;
    let mut metrics = WorkloadMetrics::default();

    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        if line.starts_with('F') {
            debug!(line = line_no + 1, "flush marker, no output produced");
            continue;
        }

        let prepare_start = Instant::now();
        let mut query = parser::parse_line(&line, line_no + 1)?;
        rewrite::rewrite(&mut query, relations)?;
        let prepare_elapsed = prepare_start.elapsed();
        debug!(line = line_no + 1, relations = ?query.relation_ids, "rewrote query");

        for &mode in modes {
            let (amount, sums, mut query_metrics) = executor::execute(&query, relations, mode, morsel_size)?;
            query_metrics.prepare = prepare_elapsed;
            trace!(amount, ?mode, "query executed");
            metrics.record(query_metrics);
            writeln!(out, "{}", format_result(amount, &sums))?;
        }
    }
    Ok(metrics)
}
