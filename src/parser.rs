//! Workload line grammar (spec.md §4.3 / SPEC_FULL §4.3), built with `nom`
//! parser combinators:
//!
//! ```text
//! line       := rel-list "|" pred-list "|" sel-list
//! rel-list   := relation-id (" " relation-id)*
//! pred-list  := (predicate ("&" predicate)*)?
//! predicate  := equi-join | filter
//! equi-join  := binding "." column "=" binding "." column
//! filter     := binding "." column comparison constant
//! comparison := "<" | ">" | "="
//! sel-list   := selection (" " selection)*
//! selection  := binding "." column
//! ```
//!
//! A predicate beginning with `binding.column=` is an equi-join iff what
//! follows also parses as `binding.column`; this is tried first, and
//! falling through to a constant is what makes `=` ambiguous between the
//! two predicate kinds (the reference parser's same disambiguation,
//! `src/Query.cpp::parse`).

use nom::branch::alt;
use nom::character::complete::{char, digit1, one_of, space0};
use nom::combinator::{eof, map, map_res};
use nom::multi::separated_list1;
use nom::sequence::{preceded, separated_pair, terminated};
use nom::IResult;

use crate::errors::{EngineError, Result};
use crate::query::{Comparison, Filter, Predicate, Query, Selection};

enum Clause {
    Join(Predicate),
    Filter(Filter),
}

fn number(input: &str) -> IResult<&str, u64> {
    map_res(digit1, str::parse)(input)
}

fn usize_number(input: &str) -> IResult<&str, usize> {
    map_res(digit1, str::parse)(input)
}

fn selection(input: &str) -> IResult<&str, Selection> {
    map(separated_pair(usize_number, char('.'), usize_number), |(binding, column)| Selection {
        binding,
        column,
    })(input)
}

fn comparison(input: &str) -> IResult<&str, Comparison> {
    map(one_of("<>="), |c| match c {
        '<' => Comparison::Less,
        '>' => Comparison::Greater,
        '=' => Comparison::Equal,
        _ => unreachable!("one_of restricts to <>="),
    })(input)
}

fn predicate(input: &str) -> IResult<&str, Clause> {
    let (rest, left) = selection(input)?;
    let (rest, cmp) = comparison(rest)?;
    // An equi-join's right-hand side is itself a `binding.column`
    // selection; try that first, per the disambiguation rule above.
    if cmp == Comparison::Equal {
        if let Ok((rest, right)) = selection(rest) {
            return Ok((rest, Clause::Join(Predicate { left, right })));
        }
    }
    let (rest, constant) = number(rest)?;
    Ok((rest, Clause::Filter(Filter { selection: left, constant, comparison: cmp })))
}

fn rel_list(input: &str) -> IResult<&str, Vec<usize>> {
    separated_list1(char(' '), usize_number)(input)
}

fn pred_list(input: &str) -> IResult<&str, Vec<Clause>> {
    // `separated_list1` so an empty pred-list (two adjacent `|`) parses
    // as zero predicates rather than a parse failure.
    alt((
        separated_list1(char('&'), predicate),
        map(nom::combinator::success(()), |()| Vec::new()),
    ))(input)
}

fn sel_list(input: &str) -> IResult<&str, Vec<Selection>> {
    separated_list1(char(' '), selection)(input)
}

fn line(input: &str) -> IResult<&str, Query> {
    let (rest, relation_ids) = rel_list(input)?;
    let (rest, _) = char('|')(rest)?;
    let (rest, clauses) = pred_list(rest)?;
    let (rest, _) = char('|')(rest)?;
    let (rest, selections) = terminated(sel_list, preceded(space0, eof))(rest)?;

    let mut predicates = Vec::new();
    let mut filters = Vec::new();
    for clause in clauses {
        match clause {
            Clause::Join(p) => predicates.push(p),
            Clause::Filter(f) => filters.push(f),
        }
    }
    Ok((rest, Query { relation_ids, predicates, filters, selections }))
}

/// Parse one workload line into a `Query`. The caller is responsible for
/// skipping blank lines and `F`-prefixed flush markers before calling
/// this (SPEC_FULL §4.3) -- those are not part of the query grammar.
pub fn parse_line(input: &str, line_no: usize) -> Result<Query> {
    match line(input.trim_end()) {
        Ok((_, query)) => Ok(query),
        Err(err) => Err(EngineError::ParseError { line: line_no, message: err.to_string() }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_join_and_filter_and_selections() {
        let query = parse_line("0 1|0.1=1.0&1.2>100|0.0 1.1", 1).unwrap();
        assert_eq!(query.relation_ids, vec![0, 1]);
        assert_eq!(query.predicates.len(), 1);
        assert_eq!(query.predicates[0].left, Selection { binding: 0, column: 1 });
        assert_eq!(query.predicates[0].right, Selection { binding: 1, column: 0 });
        assert_eq!(query.filters.len(), 1);
        assert_eq!(query.filters[0].comparison, Comparison::Greater);
        assert_eq!(query.filters[0].constant, 100);
        assert_eq!(query.selections, vec![
            Selection { binding: 0, column: 0 },
            Selection { binding: 1, column: 1 },
        ]);
    }

    #[test]
    fn equals_filter_is_not_mistaken_for_join() {
        let query = parse_line("0|0.1=42|0.0", 2).unwrap();
        assert!(query.predicates.is_empty());
        assert_eq!(query.filters.len(), 1);
        assert_eq!(query.filters[0].comparison, Comparison::Equal);
        assert_eq!(query.filters[0].constant, 42);
    }

    #[test]
    fn empty_predicate_list_is_allowed() {
        let query = parse_line("0||0.0", 3).unwrap();
        assert!(query.predicates.is_empty());
        assert!(query.filters.is_empty());
    }

    #[test]
    fn malformed_line_reports_line_number() {
        let err = parse_line("not a query", 7).unwrap_err();
        match err {
            EngineError::ParseError { line, .. } => assert_eq!(line, 7),
            other => panic!("expected ParseError, got {other:?}"),
        }
    }
}
