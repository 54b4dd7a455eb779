//! Per-query timing, threaded through the executor instead of living in
//! process-wide globals (spec.md §9, SPEC_FULL §9).

use std::time::Duration;

#[derive(Debug, Clone, Copy, Default)]
pub struct QueryMetrics {
    /// Time spent parsing and rewriting the query.
    pub prepare: Duration,
    /// Time spent building the pipeline, and, in JIT mode, compiling it.
    pub compile: Duration,
    /// Time spent running the pipeline to completion.
    pub execute: Duration,
}

impl QueryMetrics {
    pub fn total(&self) -> Duration {
        self.prepare + self.compile + self.execute
    }
}

/// Aggregated across a whole workload run, for the CLI's closing summary.
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkloadMetrics {
    pub queries: u64,
    pub prepare: Duration,
    pub compile: Duration,
    pub execute: Duration,
}

impl WorkloadMetrics {
    pub fn record(&mut self, metrics: QueryMetrics) {
        self.queries += 1;
        self.prepare += metrics.prepare;
        self.compile += metrics.compile;
        self.execute += metrics.execute;
    }

    pub fn total(&self) -> Duration {
        self.prepare + self.compile + self.execute
    }
}
