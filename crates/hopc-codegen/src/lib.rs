#![forbid(unsafe_code)]
//! hopc-codegen: operator fusion over annotated hop DAGs.
//!
//! One optimizer pass per DAG:
//!   1. explore: every hop opens, extends or closes candidate plans of the
//!      fusion templates ([`template`]) and records them in a memo table
//!      ([`memo`]);
//!   2. select: a policy ([`select`]) picks one plan per top-level hop;
//!   3. construct and clean up the kernel plans ([`construct`], [`cleanup`]);
//!   4. look each plan up in the LRU plan cache ([`cache`]), synthesizing and
//!      compiling source ([`source`], [`compiler`]) on a miss;
//!   5. graft fused operators into the DAG ([`graft`]).
//!
//! The pass works on a copy of the DAG and only commits a fully grafted,
//! acyclic result.

pub mod cache;
pub mod cleanup;
pub mod compiler;
pub mod construct;
pub mod cplan;
pub mod graft;
pub mod memo;
pub mod optimizer;
pub mod select;
pub mod source;
pub mod stats;
pub mod template;

pub use cache::PlanCache;
pub use compiler::{compiler_for, AheadOfTimeCompiler, CompiledKernel, InMemoryCompiler, KernelCompiler};
pub use cplan::{AggKind, CNode, CNodeId, CPlan, LookupKind};
pub use memo::{CloseType, FusionMemo, MemoEntry};
pub use optimizer::{FusedKernel, FusionOptimizer, FusionSummary};
pub use stats::{CodegenStats, CodegenStatsSnapshot};
pub use template::{template_for, Template};
