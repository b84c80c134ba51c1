//! Static hop rewrites run before annotation.

use serde::{Deserialize, Serialize};

use hopc_core::error::Result;
use hopc_hops::{eliminate_common_subexpressions, fold_constants, HopDag};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewriteSummary {
    pub folded: usize,
    pub merged: usize,
}

/// Constant folding followed by common subexpression elimination.
///
/// Folding first exposes identical literals to CSE. The DAG's annotations are
/// stale afterwards; callers re-run size inference before lowering.
pub fn optimize(dag: &mut HopDag) -> Result<RewriteSummary> {
    let folded = fold_constants(dag)?;
    let merged = eliminate_common_subexpressions(dag);
    dag.check_edges()?;
    Ok(RewriteSummary { folded, merged })
}
