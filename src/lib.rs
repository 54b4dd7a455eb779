//! joinbench: an analytical join-benchmark query engine.
//!
//! Pipeline, end to end:
//!
//! ```text
//! init file ──► relation::load ──► index_builder::precompute_all
//!                                          │
//! workload line ──► parser::parse_line ──► rewrite::rewrite ──► query
//!                                                                  │
//!                                    ┌─────────────────────────────┤
//!                                    ▼                              ▼
//!                         plan::build_pipeline          codegen::cranelift_backend::compile
//!                         (Operator tree, tree-walked)   (one Cranelift function, morsel-parallel)
//!                                    │                              │
//!                                    └──────────────┬───────────────┘
//!                                                    ▼
//!                                         workload::format_result ──► output.res
//! ```
//!
//! Relations are columnar and memory-mapped (`relation`); each column
//! gets a bitset and a dense hash index once its value domain is known
//! (`index`, `index_builder`). A query is a small AST (`query`) produced
//! by a `nom` grammar (`parser`) and then rewritten for a connected,
//! selectivity-ordered execution order (`rewrite`). From there it either
//! drives a tree of `Operator`s (`operators`, `plan`) or gets compiled
//! straight to machine code (`codegen`) and run morsel-parallel
//! (`executor`). `workload` and `cli` wire the above to stdin/argv, and
//! `config`/`metrics` hold the ambient knobs and timings.

pub mod cli;
pub mod codegen;
pub mod config;
pub mod errors;
pub mod executor;
pub mod index;
pub mod index_builder;
pub mod metrics;
pub mod operators;
pub mod parser;
pub mod plan;
pub mod query;
pub mod relation;
pub mod rewrite;
pub mod workload;

pub use errors::{EngineError, Result};
