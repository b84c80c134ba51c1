//! Fusion optimizer counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

#[derive(Debug, Default)]
pub struct CodegenStats {
    dags_optimized: AtomicU64,
    plans_constructed: AtomicU64,
    plans_kept: AtomicU64,
    kernels_compiled: AtomicU64,
    cache_hits: AtomicU64,
    cache_lookups: AtomicU64,
    fused_operators: AtomicU64,
    failures: AtomicU64,
    optimize_nanos: AtomicU64,
    compile_nanos: AtomicU64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CodegenStatsSnapshot {
    pub dags_optimized: u64,
    pub plans_constructed: u64,
    pub plans_kept: u64,
    pub kernels_compiled: u64,
    pub cache_hits: u64,
    pub cache_lookups: u64,
    pub fused_operators: u64,
    pub failures: u64,
    pub optimize_nanos: u64,
    pub compile_nanos: u64,
}

fn nanos(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

impl CodegenStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_plans(&self, constructed: usize, kept: usize) {
        self.plans_constructed.fetch_add(constructed as u64, Ordering::Relaxed);
        self.plans_kept.fetch_add(kept as u64, Ordering::Relaxed);
    }

    pub fn record_lookup(&self, hit: bool) {
        self.cache_lookups.fetch_add(1, Ordering::Relaxed);
        if hit {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_compile(&self, elapsed: Duration) {
        self.kernels_compiled.fetch_add(1, Ordering::Relaxed);
        self.compile_nanos.fetch_add(nanos(elapsed), Ordering::Relaxed);
    }

    pub fn record_dag(&self, fused_operators: usize, elapsed: Duration) {
        self.dags_optimized.fetch_add(1, Ordering::Relaxed);
        self.fused_operators.fetch_add(fused_operators as u64, Ordering::Relaxed);
        self.optimize_nanos.fetch_add(nanos(elapsed), Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CodegenStatsSnapshot {
        CodegenStatsSnapshot {
            dags_optimized: self.dags_optimized.load(Ordering::Relaxed),
            plans_constructed: self.plans_constructed.load(Ordering::Relaxed),
            plans_kept: self.plans_kept.load(Ordering::Relaxed),
            kernels_compiled: self.kernels_compiled.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_lookups: self.cache_lookups.load(Ordering::Relaxed),
            fused_operators: self.fused_operators.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            optimize_nanos: self.optimize_nanos.load(Ordering::Relaxed),
            compile_nanos: self.compile_nanos.load(Ordering::Relaxed),
        }
    }
}
