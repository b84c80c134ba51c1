#![forbid(unsafe_code)]
//! hopc-hops: the high-level operator DAG.
//!
//! Nodes live in an arena ([`HopDag`]) and are addressed by `HopId`.
//! Annotation runs in three bottom-up passes over the reachable nodes:
//!   1. exact size/sparsity propagation ([`size`]),
//!   2. memory estimates with a shared memo table ([`memory`]),
//!   3. execution-type selection ([`exec`]).
//!
//! Rewrites ([`rewrite`]) run before annotation; any structural edit must be
//! followed by a fresh [`annotate`].

pub mod dag;
pub mod exec;
pub mod explain;
pub mod kind;
pub mod memory;
pub mod rewrite;
pub mod size;

pub use dag::{Hop, HopDag, MemEstimate};
pub use exec::{is_accelerator_eligible, is_single_block, select_exec_type, select_exec_types};
pub use explain::explain_hops;
pub use kind::{check_arity, DataOpKind, HopKind, LiteralValue};
pub use memory::{compute_mem_estimate, compute_memory_estimates};
pub use rewrite::{eliminate_common_subexpressions, fold_constants, is_literal_of_value};
pub use size::{infer_output_characteristics, propagate_sizes, refresh_size_information, MemoTable};

use hopc_core::config::CompilerConfig;

/// Size propagation, memory estimation and exec-type selection over
/// everything reachable from the roots.
pub fn annotate(dag: &mut HopDag, cfg: &CompilerConfig) -> MemoTable {
    propagate_sizes(dag);
    let memo = compute_memory_estimates(dag, cfg);
    select_exec_types(dag, cfg);
    tracing::trace!(explain = %explain_hops(dag), "annotated hop dag");
    memo
}
