//! Crate-wide error type.
//!
//! Mirrors the error taxonomy of the engine's design doc: I/O and JIT
//! failures are fatal (the CLI prints them and exits non-zero), malformed
//! workload lines are reported per-line, and domain misses (a probe value
//! outside an index's `[min..max]`) are never represented here at all --
//! they are encoded as `Option`/empty slices at the call site.

use thiserror::Error;

/// Errors produced while loading relations, parsing queries, rewriting,
/// building pipelines, or generating code.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Failure opening, stat'ing, or memory-mapping a relation, init, or
    /// workload file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A relation file is present but smaller than the 16-byte header.
    #[error("relation file {path} is {size} bytes, smaller than the 16-byte header")]
    TruncatedRelation { path: String, size: u64 },

    /// A workload line does not match the grammar of the query language.
    #[error("malformed query on line {line}: {message}")]
    ParseError { line: usize, message: String },

    /// The rewriter could not connect a predicate's left side to any
    /// relation already introduced by the scan or an earlier predicate.
    /// Known limitation (spec design notes): the "swap with next" trick
    /// is a single retry, not a fixpoint.
    #[error("unbuildable pipeline: predicate for binding {binding} could not be connected")]
    UnbuildablePipeline { binding: usize },

    /// Cranelift's IR verifier rejected the generated function.
    #[error("JIT verification failed: {0}")]
    JitVerification(String),

    /// Cranelift module-level errors (declaring/defining the function,
    /// finalizing the JIT module).
    #[error("JIT module error: {0}")]
    JitModule(#[from] cranelift_module::ModuleError),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, EngineError>;
