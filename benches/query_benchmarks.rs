//! Query performance benchmarks: scan, equi-join, and JIT vs. interpreter.

use std::io::Write;
use std::time::Duration;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use joinbench::executor::{self, Mode};
use joinbench::index_builder;
use joinbench::parser;
use joinbench::relation::Relation;
use joinbench::rewrite;

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

fn single_relation(size: u64) -> Vec<Relation> {
    let keys: Vec<u64> = (0..size).collect();
    let payload: Vec<u64> = (0..size).map(|v| v * 2).collect();
    let file = write_relation(&[&keys, &payload]);
    let mut relations = vec![Relation::load(file.path()).unwrap()];
    index_builder::precompute_all(&mut relations);
    relations
}

fn two_relations(size: u64) -> Vec<Relation> {
    let keys: Vec<u64> = (0..size).collect();
    let payload: Vec<u64> = (0..size).map(|v| v * 2).collect();
    let r0 = write_relation(&[&keys, &payload]);
    let foreign_keys: Vec<u64> = (0..size).map(|v| v % size.max(1)).collect();
    let r1 = write_relation(&[&foreign_keys]);
    let mut relations = vec![Relation::load(r0.path()).unwrap(), Relation::load(r1.path()).unwrap()];
    index_builder::precompute_all(&mut relations);
    relations
}

fn bench_scan_filter(c: &mut Criterion) {
    let mut group = c.benchmark_group("scan_filter");
    for size in [1_000u64, 10_000, 100_000] {
        let relations = single_relation(size);
        let mut query = parser::parse_line("0|0.0>100|0.1", 1).unwrap();
        rewrite::rewrite(&mut query, &relations).unwrap();

        group.bench_with_input(BenchmarkId::new("interpret", size), &size, |b, _| {
            b.iter(|| executor::execute(&query, &relations, Mode::Interpret, 1024).unwrap());
        });
        group.bench_with_input(BenchmarkId::new("jit", size), &size, |b, _| {
            b.iter(|| executor::execute(&query, &relations, Mode::Jit, 1024).unwrap());
        });
    }
    group.finish();
}

fn bench_two_way_join(c: &mut Criterion) {
    let mut group = c.benchmark_group("two_way_join");
    for size in [1_000u64, 10_000, 100_000] {
        let relations = two_relations(size);
        let mut query = parser::parse_line("0 1|0.0=1.0|0.1", 1).unwrap();
        rewrite::rewrite(&mut query, &relations).unwrap();

        group.bench_with_input(BenchmarkId::new("interpret", size), &size, |b, _| {
            b.iter(|| executor::execute(&query, &relations, Mode::Interpret, 1024).unwrap());
        });
        group.bench_with_input(BenchmarkId::new("jit", size), &size, |b, _| {
            b.iter(|| executor::execute(&query, &relations, Mode::Jit, 1024).unwrap());
        });
    }
    group.finish();
}

fn bench_index_builder(c: &mut Criterion) {
    let mut group = c.benchmark_group("index_builder");
    for size in [10_000u64, 100_000, 1_000_000] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter_batched(
                || single_relation(size),
                |mut relations| index_builder::precompute_all(&mut relations),
                criterion::BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

criterion_group! {
    name = benches;
    config = Criterion::default()
        .measurement_time(Duration::from_secs(10))
        .warm_up_time(Duration::from_secs(3));
    targets = bench_scan_filter, bench_two_way_join, bench_index_builder
}
criterion_main!(benches);
