//! Per-node memory estimates (output, intermediate, total).

use hopc_core::config::CompilerConfig;
use hopc_core::id::HopId;
use hopc_core::stats::MatrixCharacteristics;
use hopc_core::types::{OpOp2, ReorgOp};
use hopc_mem::{
    binary_op_sparsity, binary_op_sparsity_conditional_sparse_safe,
    estimate_intermediate_memory, estimate_size_exact_sparsity,
    is_binary_op_conditional_sparse_safe, IntermediateKind, DEFAULT_SIZE,
};

use crate::dag::{HopDag, MemEstimate};
use crate::kind::HopKind;
use crate::size::{infer_output_characteristics, literal_bool, literal_f64, MemoTable};

/// Size of a scalar value in bytes.
const SCALAR_SIZE: f64 = 8.0;

/// Fill `mem` of `id`. Inputs must have been estimated already (post-order).
///
/// When the node's dimensions are unknown, worst-case statistics are
/// inferred through `memo` and memoized for downstream consumers; when even
/// that fails the output is assumed to be [`DEFAULT_SIZE`].
pub fn compute_mem_estimate(dag: &mut HopDag, id: HopId, memo: &mut MemoTable, cfg: &CompilerConfig) {
    let est = estimate(dag, id, memo, cfg);
    dag.hop_mut(id).mem = est;
}

fn estimate(dag: &HopDag, id: HopId, memo: &mut MemoTable, cfg: &CompilerConfig) -> MemEstimate {
    let hop = dag.hop(id);
    let input_mem: f64 = hop
        .inputs
        .iter()
        .map(|&i| dag.hop(i).mem.output)
        .sum();

    if hop.is_scalar() {
        return MemEstimate {
            output: SCALAR_SIZE,
            intermediate: 0.0,
            total: input_mem + SCALAR_SIZE,
        };
    }

    let mc = if hop.dims_known() {
        Some(hop.stats)
    } else {
        infer_output_characteristics(dag, id, memo).map(|[r, c, nnz]| {
            let mc = MatrixCharacteristics::new(r, c, nnz, dag.blocksize());
            memo.memoize(id, mc);
            mc
        })
    };

    let (output, intermediate) = match mc {
        Some(mc) if mc.dims_known() => (
            output_memory(dag, id, &mc, memo, cfg),
            intermediate_memory(dag, id, &mc, cfg),
        ),
        _ => (DEFAULT_SIZE, 0.0),
    };

    MemEstimate {
        output,
        intermediate,
        total: input_mem + intermediate + output,
    }
}

fn output_memory(
    dag: &HopDag,
    id: HopId,
    mc: &MatrixCharacteristics,
    memo: &MemoTable,
    cfg: &CompilerConfig,
) -> f64 {
    let hop = dag.hop(id);
    match &hop.kind {
        HopKind::Binary { op, outer } if !op.is_append() => {
            let s1 = memo.input_stats(dag, hop.inputs[0]);
            let s2 = memo.input_stats(dag, hop.inputs[1]);
            let sp1 = if dag.hop(hop.inputs[0]).is_scalar() { 1.0 } else { s1.sparsity() };
            let sp2 = if dag.hop(hop.inputs[1]).is_scalar() { 1.0 } else { s2.sparsity() };
            let sp = match literal_f64(dag, hop.inputs[1]) {
                Some(lit) if is_binary_op_conditional_sparse_safe(*op) => {
                    binary_op_sparsity_conditional_sparse_safe(sp1, *op, lit)
                }
                _ => binary_op_sparsity(sp1, sp2, *op, !outer),
            };
            let sp = if mc.nnz_known() { mc.sparsity().min(sp) } else { sp };
            estimate_size_exact_sparsity(mc.rows, mc.cols, sp)
        }
        HopKind::Binary { .. } if !cfg.dynamic_recompilation => DEFAULT_SIZE,
        _ => estimate_size_exact_sparsity(mc.rows, mc.cols, mc.sparsity()),
    }
}

fn intermediate_memory(
    dag: &HopDag,
    id: HopId,
    mc: &MatrixCharacteristics,
    cfg: &CompilerConfig,
) -> f64 {
    let hop = dag.hop(id);
    let kind = match &hop.kind {
        HopKind::Reorg(ReorgOp::Sort) => IntermediateKind::Sort {
            skip_index: literal_bool(dag, hop.inputs[3]) == Some(false),
        },
        HopKind::Binary { op: OpOp2::Solve, .. } => {
            let a = dag.hop(hop.inputs[0]).stats;
            let kind = if cfg.accelerator_enabled {
                IntermediateKind::SolveAccelerator
            } else {
                IntermediateKind::SolveLocal
            };
            return estimate_intermediate_memory(kind, a.rows, a.cols, a.nnz);
        }
        HopKind::Binary { op, .. } if op.is_order_statistic() => {
            let a = dag.hop(hop.inputs[0]).stats;
            return estimate_intermediate_memory(IntermediateKind::OrderStatistic, a.rows, a.cols, a.nnz);
        }
        _ => IntermediateKind::None,
    };
    estimate_intermediate_memory(kind, mc.rows, mc.cols, mc.nnz)
}

/// Memory estimates for everything reachable, in post-order, with one
/// shared memo table.
pub fn compute_memory_estimates(dag: &mut HopDag, cfg: &CompilerConfig) -> MemoTable {
    let mut memo = MemoTable::new();
    for id in dag.topo_order() {
        compute_mem_estimate(dag, id, &mut memo, cfg);
    }
    memo
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::size::propagate_sizes;
    use hopc_core::types::{DataType, OpOp1};
    use hopc_mem::estimate_size;

    #[test]
    fn total_covers_inputs_and_output() {
        let cfg = CompilerConfig::default();
        let mut dag = HopDag::new();
        let a = dag.read("A", 1000, 1, -1).unwrap();
        let b = dag.read("B", 1000, 1, -1).unwrap();
        let p = dag.binary(OpOp2::Plus, a, b).unwrap();
        dag.write("Y", p).unwrap();
        propagate_sizes(&mut dag);
        compute_memory_estimates(&mut dag, &cfg);
        let m = dag.hop(p).mem;
        assert_eq!(m.output, estimate_size(1000, 1));
        assert_eq!(m.total, 3.0 * estimate_size(1000, 1));
    }

    #[test]
    fn append_pinned_without_recompilation() {
        let cfg = CompilerConfig {
            dynamic_recompilation: false,
            ..Default::default()
        };
        let mut dag = HopDag::new();
        let a = dag.read("A", 10, 10, -1).unwrap();
        let b = dag.read("B", 10, 1, -1).unwrap();
        let c = dag.binary(OpOp2::Cbind, a, b).unwrap();
        dag.write("Y", c).unwrap();
        propagate_sizes(&mut dag);
        compute_memory_estimates(&mut dag, &cfg);
        assert_eq!(dag.hop(c).mem.output, DEFAULT_SIZE);
    }

    #[test]
    fn unknown_shape_is_default_size() {
        let cfg = CompilerConfig::default();
        let mut dag = HopDag::new();
        let a = dag.read_typed("A", DataType::Matrix, -1, -1, -1).unwrap();
        let e = dag.unary(OpOp1::Exp, a).unwrap();
        dag.write("Y", e).unwrap();
        propagate_sizes(&mut dag);
        compute_memory_estimates(&mut dag, &cfg);
        assert_eq!(dag.hop(e).mem.output, DEFAULT_SIZE);
    }

    #[test]
    fn sort_adds_index_buffer() {
        let cfg = CompilerConfig::default();
        let mut dag = HopDag::new();
        let a = dag.read("A", 1000, 5, -1).unwrap();
        let s = dag.sort(a, 1, false, false).unwrap();
        dag.write("Y", s).unwrap();
        propagate_sizes(&mut dag);
        compute_memory_estimates(&mut dag, &cfg);
        assert_eq!(dag.hop(s).mem.intermediate, 4000.0);
    }

    #[test]
    fn sparse_mult_is_cheaper() {
        let cfg = CompilerConfig::default();
        let mut dag = HopDag::new();
        let a = dag.read("A", 1000, 1000, 1000).unwrap();
        let b = dag.read("B", 1000, 1000, -1).unwrap();
        let m = dag.binary(OpOp2::Mult, a, b).unwrap();
        let p = dag.binary(OpOp2::Plus, a, b).unwrap();
        dag.write("M", m).unwrap();
        dag.write("P", p).unwrap();
        propagate_sizes(&mut dag);
        compute_memory_estimates(&mut dag, &cfg);
        assert!(dag.hop(m).mem.output < dag.hop(p).mem.output / 10.0);
    }
}
