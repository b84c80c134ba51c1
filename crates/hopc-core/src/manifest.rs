//! Per-block compile manifest for audit and plan-cache diagnostics.
//!
//! The driver emits one manifest per compiled statement block; identical
//! DAGs under identical config produce identical `dag_hash`/`plan_hash`.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::hash::Hash256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ManifestId(pub Uuid);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompileManifest {
    pub id: ManifestId,

    /// Stable hash of the optimized hop DAG.
    pub dag_hash: Hash256,

    /// Stable hash of the physical program (lops and bindings).
    pub plan_hash: Hash256,

    /// Compiler version string for provenance.
    pub compiler_version: String,

    /// Fused operators grafted into the DAG.
    pub fused_operators: usize,

    /// Kernels compiled (plan-cache misses).
    pub kernels_compiled: usize,

    /// Plan-cache hits.
    pub cache_hits: usize,

    /// Milliseconds since Unix epoch (UTC).
    pub started_ms: u64,
    pub finished_ms: u64,
}

impl CompileManifest {
    pub fn new(dag_hash: Hash256, started_ms: u64) -> Self {
        Self {
            id: ManifestId(Uuid::new_v4()),
            dag_hash,
            plan_hash: dag_hash,
            compiler_version: crate::VERSION.to_string(),
            fused_operators: 0,
            kernels_compiled: 0,
            cache_hits: 0,
            started_ms,
            finished_ms: started_ms,
        }
    }

    pub fn finish(mut self, finished_ms: u64, plan_hash: Hash256) -> Self {
        self.finished_ms = finished_ms;
        self.plan_hash = plan_hash;
        self
    }
}

/// Milliseconds since Unix epoch, 0 if the clock is before the epoch.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
