//! Coarse cost summary of a physical program.
//!
//! Counts operators per backend and the data movement implied by the chosen
//! strategies. Used for explain output and for comparing plans in tests;
//! nothing in the planner optimizes against it.

use serde::{Deserialize, Serialize};

use hopc_core::types::{DataType, ExecType, ReorgOp};
use hopc_mem::{estimate_size, estimate_size_exact_sparsity};

use crate::physical::{LopKind, PhysicalProgram};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanCost {
    pub operators: usize,
    pub local: usize,
    pub distributed: usize,
    pub accelerator: usize,
    pub fused: usize,
    /// Distributed operators that repartition their inputs.
    pub shuffles: usize,
    /// Bytes replicated to every worker by broadcast strategies.
    pub broadcast_bytes: f64,
    /// Sum of the output sizes of all matrix operators with known shape.
    pub output_bytes: f64,
}

pub fn estimate_plan_cost(program: &PhysicalProgram) -> PlanCost {
    let plan = &program.plan;
    let mut cost = PlanCost::default();

    for lop in &plan.lops {
        if matches!(lop.kind, LopKind::Literal(_) | LopKind::Data { .. }) {
            continue;
        }
        cost.operators += 1;
        match lop.exec_type {
            ExecType::Local => cost.local += 1,
            ExecType::Distributed => cost.distributed += 1,
            ExecType::Accelerator => cost.accelerator += 1,
        }
        if matches!(lop.kind, LopKind::Fused { .. }) {
            cost.fused += 1;
        }

        if lop.exec_type == ExecType::Distributed {
            match &lop.kind {
                LopKind::BinaryM { .. } | LopKind::AppendM { .. } => {
                    if let Some(&rhs) = lop.inputs.get(1) {
                        let s = plan.lop(rhs).stats;
                        if s.dims_known() {
                            cost.broadcast_bytes += estimate_size(s.rows, s.cols);
                        }
                    }
                }
                LopKind::Transform {
                    op: ReorgOp::Sort,
                    sort_index_in_mem: true,
                } => {
                    let s = plan.lop(lop.inputs[0]).stats;
                    if s.rows_known() {
                        cost.broadcast_bytes += estimate_size(s.rows, 1);
                    }
                    cost.shuffles += 1;
                }
                LopKind::Binary(_)
                | LopKind::AppendR { .. }
                | LopKind::AppendG { .. }
                | LopKind::AppendGAligned { .. }
                | LopKind::MatMult
                | LopKind::Transform { .. } => cost.shuffles += 1,
                _ => {}
            }
        }

        if lop.data_type != DataType::Scalar && lop.stats.dims_known() {
            cost.output_bytes +=
                estimate_size_exact_sparsity(lop.stats.rows, lop.stats.cols, lop.stats.sparsity());
        }
    }
    cost
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lower::lower_to_physical;
    use hopc_core::config::{CompilerConfig, DistributedMode};
    use hopc_core::types::OpOp2;
    use hopc_hops::HopDag;

    #[test]
    fn broadcast_is_counted_once_per_vector() {
        let cfg = CompilerConfig {
            distributed_mode: DistributedMode::ForceDistributed,
            ..Default::default()
        };
        let mut dag = HopDag::new();
        let x = dag.read("X", 10_000, 100, -1).unwrap();
        let v = dag.read("v", 10_000, 1, -1).unwrap();
        let m = dag.binary(OpOp2::Mult, x, v).unwrap();
        dag.write("Y", m).unwrap();
        let roots = dag.roots().to_vec();
        let p = lower_to_physical(&mut dag, &roots, &cfg).unwrap();
        let c = estimate_plan_cost(&p);
        assert_eq!(c.operators, 1);
        assert_eq!(c.distributed, 1);
        assert_eq!(c.shuffles, 0);
        assert_eq!(c.broadcast_bytes, estimate_size(10_000, 1));
    }

    #[test]
    fn local_plan_has_no_data_movement() {
        let cfg = CompilerConfig::default();
        let mut dag = HopDag::new();
        let x = dag.read("X", 100, 100, -1).unwrap();
        let y = dag.read("Y", 100, 100, -1).unwrap();
        let p = dag.binary(OpOp2::Plus, x, y).unwrap();
        dag.write("Z", p).unwrap();
        let roots = dag.roots().to_vec();
        let prog = lower_to_physical(&mut dag, &roots, &cfg).unwrap();
        let c = estimate_plan_cost(&prog);
        assert_eq!(c.local, 1);
        assert_eq!(c.shuffles, 0);
        assert_eq!(c.broadcast_bytes, 0.0);
        assert_eq!(c.output_bytes, estimate_size(100, 100));
    }
}
