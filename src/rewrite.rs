//! Query rewriting (spec.md §4.4): three passes over a parsed `Query`
//! that turn an arbitrary relation/predicate order into one the pipeline
//! builder can turn directly into a left-deep Scan→...→Projection chain.
//!
//! Grounded on `src/Query.cpp::rewrite` of the reference implementation,
//! gated there behind `REWRITE_ORDER` / `REWRITE_IDENTICALJOINS` /
//! `REWRITE_EQUIVALENCE` -- all three are unconditional here.

use std::collections::{HashMap, HashSet};

use crate::errors::{EngineError, Result};
use crate::query::{Predicate, Query, Selection};
use crate::relation::Relation;

/// Run all three rewrite phases in place.
pub fn rewrite(query: &mut Query, relations: &[Relation]) -> Result<()> {
    reorder_relations(query, relations);
    normalize_and_order_predicates(&mut query.predicates)?;
    rewrite_equivalences(query);
    Ok(())
}

/// Phase (a): reorder bindings by a selectivity heuristic -- bindings
/// with an equality filter first, then by ascending relation size, then
/// bindings with any filter before bindings with none -- and remap every
/// binding reference in the query to match.
fn reorder_relations(query: &mut Query, relations: &[Relation]) {
    let n = query.num_bindings();
    let mut has_equality_filter = vec![false; n];
    let mut has_any_filter = vec![false; n];
    for filter in &query.filters {
        has_any_filter[filter.selection.binding] = true;
        if filter.comparison == crate::query::Comparison::Equal {
            has_equality_filter[filter.selection.binding] = true;
        }
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by_key(|&binding| {
        let size = relations[query.relation_ids[binding]].num_tuples();
        (!has_equality_filter[binding], size, !has_any_filter[binding])
    });

    let mut old_to_new = vec![0usize; n];
    for (new_binding, &old_binding) in order.iter().enumerate() {
        old_to_new[old_binding] = new_binding;
    }

    query.relation_ids = order.iter().map(|&old| query.relation_ids[old]).collect();
    remap_bindings(query, &old_to_new);
}

fn remap_bindings(query: &mut Query, old_to_new: &[usize]) {
    for predicate in &mut query.predicates {
        predicate.left.binding = old_to_new[predicate.left.binding];
        predicate.right.binding = old_to_new[predicate.right.binding];
    }
    for filter in &mut query.filters {
        filter.selection.binding = old_to_new[filter.selection.binding];
    }
    for selection in &mut query.selections {
        selection.binding = old_to_new[selection.binding];
    }
}

/// Phase (b): normalize each predicate so `left.binding <= right.binding`,
/// sort by `(left.binding, right.binding)`, then walk the sorted list
/// left to right checking that each predicate connects to a binding
/// already introduced (by the scan, at binding 0, or by an earlier
/// predicate in the walk). If neither side is introduced, swap it with
/// its successor and retry. If only the right side is introduced, swap
/// the predicate's own left/right so the introduced binding leads. Still
/// disconnected after that is a genuinely unbuildable pipeline.
fn normalize_and_order_predicates(predicates: &mut [Predicate]) -> Result<()> {
    for predicate in predicates.iter_mut() {
        if predicate.left.binding > predicate.right.binding {
            std::mem::swap(&mut predicate.left, &mut predicate.right);
        }
    }
    predicates.sort_by_key(|p| (p.left.binding, p.right.binding));

    let mut introduced = HashSet::new();
    introduced.insert(0usize);

    let mut i = 0;
    while i < predicates.len() {
        if introduced.contains(&predicates[i].left.binding) {
            introduced.insert(predicates[i].right.binding);
            i += 1;
            continue;
        }
        if introduced.contains(&predicates[i].right.binding) {
            std::mem::swap(&mut predicates[i].left, &mut predicates[i].right);
            introduced.insert(predicates[i].right.binding);
            i += 1;
            continue;
        }
        if i + 1 < predicates.len() {
            predicates.swap(i, i + 1);
            if introduced.contains(&predicates[i].left.binding) {
                introduced.insert(predicates[i].right.binding);
                i += 1;
                continue;
            }
            if introduced.contains(&predicates[i].right.binding) {
                std::mem::swap(&mut predicates[i].left, &mut predicates[i].right);
                introduced.insert(predicates[i].right.binding);
                i += 1;
                continue;
            }
        }
        return Err(EngineError::UnbuildablePipeline { binding: predicates[i].left.binding });
    }
    Ok(())
}

/// Phase (c): fold predicate chains through a common column back to one
/// canonical selection, and drop predicates that become duplicates once
/// that substitution is applied. Example: `0.1=1.0 & 1.0=2.0` rewrites
/// the second predicate's left side from `1.0` to `0.1`.
fn rewrite_equivalences(query: &mut Query) {
    let mut canonical: HashMap<Selection, Selection> = HashMap::new();

    for predicate in &mut query.predicates {
        if let Some(&rep) = canonical.get(&predicate.left) {
            predicate.left = rep;
        }
        canonical.insert(predicate.right, predicate.left);
    }
    for filter in &mut query.filters {
        if let Some(&rep) = canonical.get(&filter.selection) {
            filter.selection = rep;
        }
    }
    for selection in &mut query.selections {
        if let Some(&rep) = canonical.get(selection) {
            *selection = rep;
        }
    }

    let mut seen = HashSet::new();
    query.predicates.retain(|p| seen.insert((p.left, p.right)));
}
