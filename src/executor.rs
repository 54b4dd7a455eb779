//! Dispatches a rewritten query to the interpreter or the JIT, and, for
//! the JIT, drives morsel-parallel execution (spec.md §4.6/§4.7/§5).

use std::time::Instant;

use rayon::prelude::*;

use crate::codegen::cranelift_backend;
use crate::codegen::CompiledQuery;
use crate::errors::Result;
use crate::metrics::QueryMetrics;
use crate::plan;
use crate::query::Query;
use crate::relation::Relation;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Interpret,
    Jit,
}

/// Build and run `query` (already rewritten) under `mode`, returning the
/// match count, the per-selection sums, and how long each phase took.
pub fn execute(query: &Query, relations: &[Relation], mode: Mode, morsel_size: u64) -> Result<(u64, Vec<u64>, QueryMetrics)> {
    let mut metrics = QueryMetrics::default();
    match mode {
        Mode::Interpret => {
            let compile_start = Instant::now();
            let root = plan::build_pipeline(query, relations)?;
            metrics.compile = compile_start.elapsed();

            let execute_start = Instant::now();
            let (amount, sums) = plan::execute_interpreted(root.as_ref(), query.num_bindings(), query.selections.len());
            metrics.execute = execute_start.elapsed();

            Ok((amount, sums, metrics))
        }
        Mode::Jit => {
            let compile_start = Instant::now();
            let compiled = cranelift_backend::compile(query, relations)?;
            metrics.compile = compile_start.elapsed();

            let execute_start = Instant::now();
            let outer_tuples = relations[query.relation_ids[0]].num_tuples();
            let (amount, sums) = run_morsels(&compiled, outer_tuples, morsel_size, query.selections.len());
            metrics.execute = execute_start.elapsed();

            Ok((amount, sums, metrics))
        }
    }
}

/// Split `[0, num_tuples)` into fixed-size morsels, run each in
/// parallel, and reduce thread-local `(amount, sums)` pairs into one.
/// Rayon's `reduce` combinator *is* the critical section here: there is
/// no explicit lock, but the combine step only ever runs on one morsel
/// pair at a time, same effect as the reference implementation's
/// `#pragma omp critical` in `morsel_execution()`.
fn run_morsels(compiled: &CompiledQuery, num_tuples: u64, morsel_size: u64, num_selections: usize) -> (u64, Vec<u64>) {
    let morsel_size = morsel_size.max(1);
    let morsels: Vec<(u64, u64)> = (0..num_tuples)
        .step_by(morsel_size as usize)
        .map(|lower| (lower, (lower + morsel_size).min(num_tuples)))
        .collect();

    morsels
        .par_iter()
        .map(|&(lower, upper)| {
            let mut sums = vec![0u64; num_selections];
            let amount = compiled.call(lower, upper, &mut sums);
            (amount, sums)
        })
        .reduce(
            || (0u64, vec![0u64; num_selections]),
            |(amount_a, mut sums_a), (amount_b, sums_b)| {
                for (a, b) in sums_a.iter_mut().zip(sums_b.iter()) {
                    *a += b;
                }
                (amount_a + amount_b, sums_a)
            },
        )
}
