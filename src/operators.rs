//! Push-style, tuple-at-a-time operators (spec.md §4.6): the interpreter
//! half of the dual-mode pipeline. Each operator owns its successor; a
//! match advances the pipeline by calling `next.execute`, a non-match
//! simply returns without calling it. Grounded on
//! `original_source/include/{Scan,Filter,SelfJoin,Join,JoinUnique,
//! SemiJoin,Projection}Operator.h`.

use crate::index::{Bitset, DenseMultiIndex, DenseUniqueIndex};
use crate::query::Comparison;
use crate::relation::Column;

/// Row-id bindings and output accumulators threaded through one query's
/// execution. `row_ids[binding]` is only meaningful once that binding has
/// been introduced by a Scan or Join further up the chain.
pub struct Context {
    pub row_ids: Vec<u64>,
    pub sums: Vec<u64>,
    pub amount: u64,
}

impl Context {
    pub fn new(num_bindings: usize, num_selections: usize) -> Self {
        Context { row_ids: vec![0; num_bindings], sums: vec![0; num_selections], amount: 0 }
    }
}

pub trait Operator: Send + Sync {
    fn execute(&self, ctx: &mut Context);
}

/// Introduces a binding's row ids by iterating the whole relation.
/// Unlike the codegen counterpart, the interpreter never splits this into
/// morsels -- interpreted queries run single-threaded (spec.md §5).
pub struct Scan<'a> {
    pub binding: usize,
    pub tuples: u64,
    pub next: Box<dyn Operator + 'a>,
}

impl Operator for Scan<'_> {
    fn execute(&self, ctx: &mut Context) {
        for row in 0..self.tuples {
            ctx.row_ids[self.binding] = row;
            self.next.execute(ctx);
        }
    }
}

/// A scalar comparison against a constant on an already-bound row.
pub struct Filter<'a> {
    pub column: &'a Column,
    pub binding: usize,
    pub comparison: Comparison,
    pub constant: u64,
    pub next: Box<dyn Operator + 'a>,
}

impl Operator for Filter<'_> {
    fn execute(&self, ctx: &mut Context) {
        let value = self.column.load(ctx.row_ids[self.binding]);
        let passes = match self.comparison {
            Comparison::Less => value < self.constant,
            Comparison::Greater => value > self.constant,
            Comparison::Equal => value == self.constant,
        };
        if passes {
            self.next.execute(ctx);
        }
    }
}

/// An equality check between two already-bound rows -- used when a
/// predicate connects two bindings that were both introduced earlier in
/// the pipeline, so no new row id can be introduced (spec.md §4.5).
pub struct SelfJoin<'a> {
    pub left_column: &'a Column,
    pub left_binding: usize,
    pub right_column: &'a Column,
    pub right_binding: usize,
    pub next: Box<dyn Operator + 'a>,
}

impl Operator for SelfJoin<'_> {
    fn execute(&self, ctx: &mut Context) {
        let left = self.left_column.load(ctx.row_ids[self.left_binding]);
        let right = self.right_column.load(ctx.row_ids[self.right_binding]);
        if left == right {
            self.next.execute(ctx);
        }
    }
}

/// Probes a multi-valued dense index (non-key column) and iterates every
/// matching row, introducing a new binding.
pub struct Join<'a> {
    pub probe_column: &'a Column,
    pub probe_binding: usize,
    pub index: &'a DenseMultiIndex,
    pub new_binding: usize,
    pub next: Box<dyn Operator + 'a>,
}

impl Operator for Join<'_> {
    fn execute(&self, ctx: &mut Context) {
        let probe = self.probe_column.load(ctx.row_ids[self.probe_binding]);
        for &row in self.index.lookup(probe) {
            ctx.row_ids[self.new_binding] = u64::from(row);
            self.next.execute(ctx);
        }
    }
}

/// Probes the unique dense index on column 0 and, on a hit, introduces
/// exactly one new binding.
pub struct JoinUnique<'a> {
    pub probe_column: &'a Column,
    pub probe_binding: usize,
    pub index: &'a DenseUniqueIndex,
    pub new_binding: usize,
    pub next: Box<dyn Operator + 'a>,
}

impl Operator for JoinUnique<'_> {
    fn execute(&self, ctx: &mut Context) {
        let probe = self.probe_column.load(ctx.row_ids[self.probe_binding]);
        if let Some(row) = self.index.lookup(probe) {
            ctx.row_ids[self.new_binding] = row;
            self.next.execute(ctx);
        }
    }
}

/// Tests bitset membership without introducing a binding -- used when
/// the joined relation's row is never needed again (no later predicate,
/// filter, or selection references it). Only applies to a join on column
/// 0: the reference implementation's own pipeline-construction logic
/// gates this optimization to the unique key column.
pub struct SemiJoin<'a> {
    pub probe_column: &'a Column,
    pub probe_binding: usize,
    pub bitset: &'a Bitset,
    pub next: Box<dyn Operator + 'a>,
}

impl Operator for SemiJoin<'_> {
    fn execute(&self, ctx: &mut Context) {
        let probe = self.probe_column.load(ctx.row_ids[self.probe_binding]);
        if self.bitset.contains(probe) {
            self.next.execute(ctx);
        }
    }
}

/// The terminal operator: accumulates one sum per output selection and
/// counts the matching tuple.
pub struct Projection<'a> {
    pub columns: Vec<(usize, &'a Column)>,
}

impl Operator for Projection<'_> {
    fn execute(&self, ctx: &mut Context) {
        for (i, (binding, column)) in self.columns.iter().enumerate() {
            ctx.sums[i] += column.load(ctx.row_ids[*binding]);
        }
        ctx.amount += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relation::Relation;
    use std::io::Write;

    fn relation_with(col0: &[u64]) -> Relation {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&(col0.len() as u64).to_le_bytes()).unwrap();
        file.write_all(&1u64.to_le_bytes()).unwrap();
        for v in col0 {
            file.write_all(&v.to_le_bytes()).unwrap();
        }
        file.flush().unwrap();
        Relation::load(file.path()).unwrap()
    }

    #[test]
    fn scan_filter_projection_sums_matching_rows() {
        let relation = relation_with(&[1, 2, 3, 4, 5]);
        let projection =
            Projection { columns: vec![(0, relation.column(0))] };
        let filter = Filter {
            column: relation.column(0),
            binding: 0,
            comparison: Comparison::Greater,
            constant: 2,
            next: Box::new(projection),
        };
        let scan = Scan { binding: 0, tuples: relation.num_tuples(), next: Box::new(filter) };

        let mut ctx = Context::new(1, 1);
        scan.execute(&mut ctx);
        assert_eq!(ctx.amount, 3);
        assert_eq!(ctx.sums[0], 3 + 4 + 5);
    }
}
