//! Execution-type selection: Local, Distributed or Accelerator per node.
//!
//! A threshold decision over the memory estimates and the configuration,
//! never a search. Selection never fails; Local is always a fallback.

use hopc_core::config::{CompilerConfig, DistributedMode, OptLevel};
use hopc_core::id::HopId;
use hopc_core::types::{DataType, ExecType, OpOp2, ReorgOp};

use crate::dag::{Hop, HopDag};
use crate::kind::HopKind;

/// Largest dimension a local block can hold.
const MAX_LOCAL_DIM: i64 = i32::MAX as i64;

/// Whether the node's output is a single block in both dimensions.
pub fn is_single_block(hop: &Hop) -> bool {
    hop.stats.is_single_block()
}

/// Whether a distributed implementation exists for the node.
fn supports_distributed(dag: &HopDag, hop: &Hop) -> bool {
    if hop.is_scalar() {
        return false;
    }
    match &hop.kind {
        HopKind::Literal(_) => false,
        HopKind::Binary { op: OpOp2::Solve, .. } => false,
        HopKind::Binary { op, .. } if op.is_order_statistic() || matches!(op, OpOp2::Moment | OpOp2::Cov) => false,
        HopKind::Data(_) => true,
        _ => hop.inputs.iter().any(|&i| !dag.hop(i).is_scalar()),
    }
}

/// Whether the accelerator backend implements this node.
pub fn is_accelerator_eligible(dag: &HopDag, id: HopId, cfg: &CompilerConfig) -> bool {
    if !cfg.accelerator_enabled {
        return false;
    }
    let hop = dag.hop(id);
    match &hop.kind {
        HopKind::Binary { op, .. } => {
            let dt1 = dag.input(id, 0).data_type;
            let dt2 = dag.input(id, 1).data_type;
            if op.is_accelerator_excluded() {
                return false;
            }
            if op.is_append() {
                return dt1 == DataType::Matrix;
            }
            let matrix_scalar = (dt1.is_matrix() && dt2.is_scalar()) || (dt1.is_scalar() && dt2.is_matrix());
            let matrix_matrix = dt1.is_matrix() && dt2.is_matrix();
            if matrix_scalar && op.is_accelerator_matrix_scalar_only() {
                true
            } else if matrix_matrix && *op == OpOp2::Solve {
                true
            } else if matrix_scalar || matrix_matrix {
                op.is_accelerator_supported()
            } else {
                false
            }
        }
        HopKind::Reorg(ReorgOp::Transpose) => {
            // 1x1 and t(t(X)) are no-ops
            !(hop.rows() == 1 && hop.cols() == 1) && !dag.input(id, 0).kind.is_transpose()
        }
        HopKind::Reorg(ReorgOp::Reshape) => true,
        HopKind::Reorg(_) => false,
        HopKind::Unary(op) => op.is_cellwise(),
        HopKind::AggUnary { .. } | HopKind::MatMult | HopKind::Index { .. } => true,
        HopKind::Data(_) | HopKind::Literal(_) | HopKind::Fused { .. } => false,
    }
}

/// Local iff all operand shapes are below the threshold or all are vectors,
/// by operand data-type combination.
fn shape_allows_local(dag: &HopDag, hop: &Hop, cfg: &CompilerConfig) -> bool {
    let small = |h: &Hop| h.stats.dims_below(cfg.cp_threshold) || h.is_vector();
    let matrices: Vec<&Hop> = hop
        .inputs
        .iter()
        .map(|&i| dag.hop(i))
        .filter(|h| !h.is_scalar())
        .collect();
    match &hop.kind {
        HopKind::Binary { .. } if matrices.len() == 2 => {
            let (a, b) = (matrices[0], matrices[1]);
            (a.stats.dims_below(cfg.cp_threshold) && b.stats.dims_below(cfg.cp_threshold))
                || (a.is_vector() && b.is_vector())
        }
        HopKind::Data(_) | HopKind::Literal(_) => hop.stats.dims_below(cfg.cp_threshold) || hop.is_vector(),
        _ => matrices.into_iter().all(small),
    }
}

fn memory_allows_local(hop: &Hop, cfg: &CompilerConfig) -> bool {
    hop.mem.total < cfg.local_mem_budget_bytes
}

fn invalid_local_dims(hop: &Hop) -> bool {
    hop.rows() > MAX_LOCAL_DIM || hop.cols() > MAX_LOCAL_DIM
}

/// Decide the exec type of `id` (inputs must already be decided) and
/// memoise it on the node.
pub fn select_exec_type(dag: &mut HopDag, id: HopId, cfg: &CompilerConfig) -> ExecType {
    let et = decide(dag, id, cfg);
    let hop = dag.hop_mut(id);
    hop.exec_type = Some(et);
    hop.requires_recompile =
        cfg.dynamic_recompilation && et == ExecType::Distributed && !hop.dims_known();
    tracing::debug!(hop = %id, op = %hop.kind.opcode(), exec = %et, "exec type");
    et
}

fn decide(dag: &HopDag, id: HopId, cfg: &CompilerConfig) -> ExecType {
    let hop = dag.hop(id);
    let dist_ok = cfg.distributed_available() && supports_distributed(dag, hop);
    let accel_ok = is_accelerator_eligible(dag, id, cfg);

    let forced = hop.forced_exec_type.or(cfg.forced_exec_type);
    let forced = match forced {
        Some(ExecType::Accelerator) if accel_ok => Some(ExecType::Accelerator),
        Some(ExecType::Distributed) if dist_ok => Some(ExecType::Distributed),
        Some(ExecType::Local) => Some(ExecType::Local),
        Some(other) => {
            tracing::debug!(hop = %id, forced = %other, "forced backend not eligible; ignoring");
            None
        }
        None => None,
    };

    let mut et = if let Some(f) = forced {
        f
    } else if hop.is_scalar() || !dist_ok {
        ExecType::Local
    } else if cfg.distributed_mode == DistributedMode::ForceDistributed {
        ExecType::Distributed
    } else {
        let local = match cfg.opt_level {
            OptLevel::MemoryOnly => memory_allows_local(hop, cfg),
            OptLevel::ShapeOnly => shape_allows_local(dag, hop, cfg),
            OptLevel::MemoryAndShape => {
                memory_allows_local(hop, cfg) && shape_allows_local(dag, hop, cfg)
            }
        };
        if local && !invalid_local_dims(hop) {
            ExecType::Local
        } else {
            ExecType::Distributed
        }
    };

    if forced.is_none()
        && et == ExecType::Local
        && hop_pulls_into_distributed(dag, id)
    {
        et = ExecType::Distributed;
    }

    if forced.is_none() && et == ExecType::Local && accel_ok && hop.mem.total < cfg.accelerator_mem_budget_bytes {
        et = ExecType::Accelerator;
    }

    if let HopKind::Binary { op: OpOp2::Solve, .. } = hop.kind {
        et = if accel_ok { ExecType::Accelerator } else { ExecType::Local };
    }
    et
}

/// Matrix-scalar op whose matrix input runs distributed, is consumed only
/// here, is not a data node and is not a single block: follow the input.
fn hop_pulls_into_distributed(dag: &HopDag, id: HopId) -> bool {
    let hop = dag.hop(id);
    let HopKind::Binary { op, .. } = hop.kind else {
        return false;
    };
    if !hop.is_matrix() || hop.forced_exec_type == Some(ExecType::Local) {
        return false;
    }
    let (in1, in2) = (dag.input(id, 0), dag.input(id, 1));
    if !(in1.is_scalar() || in2.is_scalar()) || !op.supports_matrix_scalar() {
        return false;
    }
    let m = if in1.is_scalar() { in2 } else { in1 };
    !m.kind.is_data()
        && m.parents.len() == 1
        && !is_single_block(m)
        && m.exec_type == Some(ExecType::Distributed)
}

/// Decide every reachable node in post-order.
pub fn select_exec_types(dag: &mut HopDag, cfg: &CompilerConfig) {
    for id in dag.topo_order() {
        select_exec_type(dag, id, cfg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::compute_memory_estimates;
    use crate::size::propagate_sizes;
    use hopc_core::types::OpOp1;

    fn annotate(dag: &mut HopDag, cfg: &CompilerConfig) {
        propagate_sizes(dag);
        compute_memory_estimates(dag, cfg);
        select_exec_types(dag, cfg);
    }

    #[test]
    fn small_vectors_run_local() {
        let cfg = CompilerConfig::default();
        let mut dag = HopDag::new();
        let a = dag.read("A", 1000, 1, -1).unwrap();
        let b = dag.read("B", 1000, 1, -1).unwrap();
        let p = dag.binary(OpOp2::Plus, a, b).unwrap();
        dag.write("Y", p).unwrap();
        annotate(&mut dag, &cfg);
        assert_eq!(dag.hop(p).exec_type, Some(ExecType::Local));
    }

    #[test]
    fn over_budget_goes_distributed() {
        let cfg = CompilerConfig {
            local_mem_budget_bytes: 1e6,
            ..Default::default()
        };
        let mut dag = HopDag::new();
        let a = dag.read("A", 1000, 1000, -1).unwrap();
        let e = dag.unary(OpOp1::Exp, a).unwrap();
        dag.write("Y", e).unwrap();
        annotate(&mut dag, &cfg);
        assert_eq!(dag.hop(e).exec_type, Some(ExecType::Distributed));
        assert!(!dag.hop(e).requires_recompile);
    }

    #[test]
    fn shape_threshold_applies_with_memory() {
        let cfg = CompilerConfig::default();
        let mut dag = HopDag::new();
        let a = dag.read("A", 3000, 10, -1).unwrap();
        let e = dag.unary(OpOp1::Exp, a).unwrap();
        dag.write("Y", e).unwrap();
        annotate(&mut dag, &cfg);
        assert_eq!(dag.hop(e).exec_type, Some(ExecType::Distributed));

        let cfg = CompilerConfig {
            opt_level: OptLevel::MemoryOnly,
            ..Default::default()
        };
        annotate(&mut dag, &cfg);
        assert_eq!(dag.hop(e).exec_type, Some(ExecType::Local));
    }

    #[test]
    fn forced_local_wins() {
        let cfg = CompilerConfig {
            local_mem_budget_bytes: 1.0,
            forced_exec_type: Some(ExecType::Local),
            ..Default::default()
        };
        let mut dag = HopDag::new();
        let a = dag.read("A", 5000, 5000, -1).unwrap();
        let e = dag.unary(OpOp1::Exp, a).unwrap();
        dag.write("Y", e).unwrap();
        annotate(&mut dag, &cfg);
        assert_eq!(dag.hop(e).exec_type, Some(ExecType::Local));
    }

    #[test]
    fn scalar_op_follows_distributed_input() {
        let cfg = CompilerConfig::default();
        let mut dag = HopDag::new();
        let a = dag.read("A", 1500, 1500, -1).unwrap();
        let e = dag.unary(OpOp1::Exp, a).unwrap();
        dag.hop_mut(e).forced_exec_type = Some(ExecType::Distributed);
        let two = dag.lit_f64(2.0).unwrap();
        let m = dag.binary(OpOp2::Mult, e, two).unwrap();
        dag.write("Y", m).unwrap();
        annotate(&mut dag, &cfg);
        assert_eq!(dag.hop(e).exec_type, Some(ExecType::Distributed));
        assert_eq!(dag.hop(m).exec_type, Some(ExecType::Distributed));
    }

    #[test]
    fn shared_input_is_not_followed() {
        let cfg = CompilerConfig::default();
        let mut dag = HopDag::new();
        let a = dag.read("A", 1500, 1500, -1).unwrap();
        let e = dag.unary(OpOp1::Exp, a).unwrap();
        dag.hop_mut(e).forced_exec_type = Some(ExecType::Distributed);
        let two = dag.lit_f64(2.0).unwrap();
        let m = dag.binary(OpOp2::Mult, e, two).unwrap();
        let s = dag.unary(OpOp1::Abs, e).unwrap();
        dag.write("Y", m).unwrap();
        dag.write("Z", s).unwrap();
        annotate(&mut dag, &cfg);
        assert_eq!(dag.hop(m).exec_type, Some(ExecType::Local));
    }

    #[test]
    fn single_block_input_is_not_followed() {
        let cfg = CompilerConfig::default();
        let mut dag = HopDag::new();
        let a = dag.read("A", 500, 500, -1).unwrap();
        let e = dag.unary(OpOp1::Exp, a).unwrap();
        dag.hop_mut(e).forced_exec_type = Some(ExecType::Distributed);
        let two = dag.lit_f64(2.0).unwrap();
        let m = dag.binary(OpOp2::Mult, e, two).unwrap();
        dag.write("Y", m).unwrap();
        annotate(&mut dag, &cfg);
        assert_eq!(dag.hop(m).exec_type, Some(ExecType::Local));
    }

    #[test]
    fn solve_never_distributed() {
        let cfg = CompilerConfig {
            local_mem_budget_bytes: 1.0,
            ..Default::default()
        };
        let mut dag = HopDag::new();
        let a = dag.read("A", 5000, 5000, -1).unwrap();
        let b = dag.read("b", 5000, 1, -1).unwrap();
        let x = dag.binary(OpOp2::Solve, a, b).unwrap();
        dag.write("x", x).unwrap();
        annotate(&mut dag, &cfg);
        assert_eq!(dag.hop(x).exec_type, Some(ExecType::Local));
    }

    #[test]
    fn accelerator_when_enabled_and_eligible() {
        let cfg = CompilerConfig {
            accelerator_enabled: true,
            ..Default::default()
        };
        let mut dag = HopDag::new();
        let a = dag.read("A", 100, 100, -1).unwrap();
        let b = dag.read("B", 100, 100, -1).unwrap();
        let p = dag.binary(OpOp2::Plus, a, b).unwrap();
        let q = dag.binary(OpOp2::Quantile, a, b).unwrap();
        dag.write("Y", p).unwrap();
        dag.write("Q", q).unwrap();
        annotate(&mut dag, &cfg);
        assert_eq!(dag.hop(p).exec_type, Some(ExecType::Accelerator));
        assert_eq!(dag.hop(q).exec_type, Some(ExecType::Local));
    }

    #[test]
    fn single_node_mode_never_distributes() {
        let cfg = CompilerConfig {
            local_mem_budget_bytes: 1.0,
            distributed_mode: DistributedMode::SingleNode,
            ..Default::default()
        };
        let mut dag = HopDag::new();
        let a = dag.read("A", 5000, 5000, -1).unwrap();
        let e = dag.unary(OpOp1::Exp, a).unwrap();
        dag.write("Y", e).unwrap();
        annotate(&mut dag, &cfg);
        assert_eq!(dag.hop(e).exec_type, Some(ExecType::Local));
    }
}
