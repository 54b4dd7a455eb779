//! End-to-end scenarios over the two-relation benchmark fixture, run
//! through both execution modes. Relation data and expected outputs
//! mirror the worked examples in the query language's reference manual.

use std::io::Write;

use joinbench::executor::{self, Mode};
use joinbench::index_builder;
use joinbench::parser;
use joinbench::relation::Relation;
use joinbench::rewrite;
use joinbench::workload;

fn write_relation(cols: &[&[u64]]) -> tempfile::NamedTempFile {
    let n = cols[0].len();
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&(n as u64).to_le_bytes()).unwrap();
    file.write_all(&(cols.len() as u64).to_le_bytes()).unwrap();
    for col in cols {
        for v in *col {
            file.write_all(&v.to_le_bytes()).unwrap();
        }
    }
    file.flush().unwrap();
    file
}

/// R0 (unique key c0, payload c1): (1,10),(2,20),(3,30),(4,40).
/// R1 (c0 a foreign key into R0.c0, payload c1): (1,100),(2,200),(2,201),(5,999).
fn benchmark_relations() -> Vec<Relation> {
    let r0 = write_relation(&[&[1, 2, 3, 4], &[10, 20, 30, 40]]);
    let r1 = write_relation(&[&[1, 2, 2, 5], &[100, 200, 201, 999]]);
    let mut relations =
        vec![Relation::load(r0.path()).unwrap(), Relation::load(r1.path()).unwrap()];
    index_builder::precompute_all(&mut relations);
    relations
}

fn run_both(line: &str, relations: &[Relation]) -> (u64, Vec<u64>) {
    let mut query = parser::parse_line(line, 1).unwrap();
    rewrite::rewrite(&mut query, relations).unwrap();
    let (amount_interpreted, sums_interpreted, _) =
        executor::execute(&query, relations, Mode::Interpret, 1024).unwrap();
    let (amount_jit, sums_jit, _) = executor::execute(&query, relations, Mode::Jit, 1024).unwrap();
    assert_eq!(amount_interpreted, amount_jit, "interpreter/JIT amount mismatch for {line:?}");
    assert_eq!(sums_interpreted, sums_jit, "interpreter/JIT sums mismatch for {line:?}");
    (amount_interpreted, sums_interpreted)
}

#[test]
fn scenario_join_on_foreign_key_sums_probe_side_payload() {
    let relations = benchmark_relations();
    let (amount, sums) = run_both("0 1|0.0=1.0|0.1", &relations);
    assert_eq!(amount, 3);
    assert_eq!(sums, vec![50]);
}

#[test]
fn scenario_filter_greater_than_scanned_binding() {
    let relations = benchmark_relations();
    let (amount, sums) = run_both("0|0.0>2|0.1", &relations);
    assert_eq!(amount, 2);
    assert_eq!(sums, vec![70]);
}

#[test]
fn scenario_filter_matches_nothing_produces_null() {
    let relations = benchmark_relations();
    let (amount, sums) = run_both("0|0.0=7|0.1", &relations);
    assert_eq!(amount, 0);
    assert_eq!(workload::format_result(amount, &sums), "NULL");
}

#[test]
fn scenario_join_then_filter_on_joined_binding() {
    let relations = benchmark_relations();
    let (amount, sums) = run_both("0 1|0.0=1.0&1.1>150|0.1", &relations);
    assert_eq!(amount, 2);
    assert_eq!(sums, vec![40]);
}

#[test]
fn scenario_join_projects_from_joined_relation() {
    let relations = benchmark_relations();
    let (amount, sums) = run_both("0 1|0.0=1.0|1.1", &relations);
    assert_eq!(amount, 3);
    assert_eq!(sums, vec![501]);
}

#[test]
fn flush_marker_line_produces_no_output_and_rest_of_workload_still_runs() {
    let relations = benchmark_relations();

    let mut workload_file = tempfile::NamedTempFile::new().unwrap();
    writeln!(workload_file, "0|0.0>2|0.1").unwrap();
    writeln!(workload_file, "F").unwrap();
    writeln!(workload_file, "0|0.0=7|0.1").unwrap();
    workload_file.flush().unwrap();

    let output_file = tempfile::NamedTempFile::new().unwrap();
    let metrics =
        workload::run_workload(workload_file.path(), output_file.path(), &relations, &[Mode::Interpret], 1024)
            .unwrap();
    assert_eq!(metrics.queries, 2);

    let output = std::fs::read_to_string(output_file.path()).unwrap();
    let lines: Vec<&str> = output.lines().collect();
    assert_eq!(lines, vec!["70", "NULL"]);
}

#[test]
fn empty_relation_scan_produces_zero_amount() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&0u64.to_le_bytes()).unwrap(); // n = 0 rows
    file.write_all(&1u64.to_le_bytes()).unwrap(); // k = 1 column
    file.flush().unwrap();
    let mut relations = vec![Relation::load(file.path()).unwrap()];
    index_builder::precompute_all(&mut relations);

    let (amount, sums) = run_both("0||0.0", &relations);
    assert_eq!(amount, 0);
    assert_eq!(sums, vec![0]);
}
