//! Lowering: annotated hop DAG → physical program.
//!
//! Hops are lowered recursively from the roots in input order, so the
//! resulting lop vector is a deterministic post-order. Each hop records its
//! lop in place (`Hop::physical`); a hop that is reached again reuses it.
//! Hops absorbed by a physical rewrite (the predicate of a relu-backward,
//! the aggregate of a uagg chain, ...) never get a lop of their own.

use std::collections::BTreeMap;

use serde_json::{json, Map, Value};

use hopc_core::config::CompilerConfig;
use hopc_core::error::{Error, Result};
use hopc_core::id::{HopId, LopId};
use hopc_core::stats::MatrixCharacteristics;
use hopc_core::types::{
    AggOp, AppendMethod, BinaryMethod, DataType, Direction, ExecType, OpOp1, OpOp2, ReorgOp,
    ValueType,
};
use hopc_hops::{is_literal_of_value, HopDag, HopKind, LiteralValue};

use crate::physical::{
    Lop, LopKind, OperatorBinding, PhysicalPlan, PhysicalProgram, PickOp, ScalarOp,
};
use crate::strategy::{
    is_col_vector, requires_replication, select_append_method, select_binary_method,
    sort_index_in_memory,
};

/// Lower everything reachable from `roots`.
///
/// Exec types are taken from the hops; if any reachable hop has not been
/// annotated yet, the whole DAG is annotated first.
pub fn lower_to_physical(
    dag: &mut HopDag,
    roots: &[HopId],
    cfg: &CompilerConfig,
) -> Result<PhysicalProgram> {
    let order = dag.post_order(roots);
    if order.iter().any(|&id| dag.hop(id).exec_type.is_none()) {
        hopc_hops::annotate(dag, cfg);
    }
    for &id in &order {
        dag.hop_mut(id).physical = None;
    }

    let mut lw = Lowering {
        cfg,
        plan: PhysicalPlan::default(),
        bindings: BTreeMap::new(),
    };
    for &root in roots {
        let lop = lw.construct(dag, root)?;
        lw.plan.outputs.push(lop);
    }
    tracing::debug!(lops = lw.plan.len(), roots = roots.len(), "lowered to physical plan");
    Ok(PhysicalProgram::new(lw.plan, lw.bindings))
}

struct Lowering<'a> {
    cfg: &'a CompilerConfig,
    plan: PhysicalPlan,
    bindings: BTreeMap<LopId, OperatorBinding>,
}

/// Strategy fields recorded in a lop's binding next to its exec type.
type Extra = Vec<(&'static str, Value)>;

impl<'a> Lowering<'a> {
    fn construct(&mut self, dag: &mut HopDag, id: HopId) -> Result<LopId> {
        if let Some(lop) = dag.hop(id).physical {
            return Ok(lop);
        }
        let lop = match dag.hop(id).kind.clone() {
            HopKind::Data(kind) => {
                let inputs = self.construct_inputs(dag, id)?;
                let name = dag.hop(id).name.clone();
                self.emit_for(dag, id, LopKind::Data { kind, name }, inputs, vec![])
            }
            HopKind::Literal(v) => self.emit_for(dag, id, LopKind::Literal(v), vec![], vec![]),
            HopKind::Unary(op) => {
                let inputs = self.construct_inputs(dag, id)?;
                self.emit_for(dag, id, LopKind::Unary(op), inputs, vec![])
            }
            HopKind::Binary { op, outer } => {
                if op.is_order_statistic() || matches!(op, OpOp2::Moment | OpOp2::Cov) {
                    self.lower_order_statistic(dag, id, op)?
                } else if op.is_append() {
                    self.lower_append(dag, id, op == OpOp2::Cbind)?
                } else {
                    self.lower_binary(dag, id, op, outer)?
                }
            }
            HopKind::Reorg(op) => self.lower_reorg(dag, id, op)?,
            HopKind::AggUnary { op, dir } => {
                let inputs = self.construct_inputs(dag, id)?;
                self.emit_for(dag, id, LopKind::PartialAggregate { op, dir }, inputs, vec![])
            }
            HopKind::MatMult => {
                let inputs = self.construct_inputs(dag, id)?;
                self.emit_for(dag, id, LopKind::MatMult, inputs, vec![])
            }
            HopKind::Index {
                row_lower,
                row_upper,
                col_lower,
                col_upper,
            } => {
                let inputs = self.construct_inputs(dag, id)?;
                let kind = LopKind::RightIndex {
                    rl: row_lower,
                    ru: row_upper,
                    cl: col_lower,
                    cu: col_upper,
                };
                self.emit_for(dag, id, kind, inputs, vec![])
            }
            HopKind::Fused {
                kernel,
                template,
                class_name,
            } => {
                let inputs = self.construct_inputs(dag, id)?;
                let extra = vec![
                    ("kernel", json!(kernel.get())),
                    ("template", json!(format!("{template:?}"))),
                ];
                self.emit_for(
                    dag,
                    id,
                    LopKind::Fused {
                        kernel,
                        template,
                        class_name,
                    },
                    inputs,
                    extra,
                )
            }
        };
        dag.hop_mut(id).physical = Some(lop);
        Ok(lop)
    }

    fn construct_inputs(&mut self, dag: &mut HopDag, id: HopId) -> Result<Vec<LopId>> {
        let inputs = dag.hop(id).inputs.clone();
        inputs.into_iter().map(|i| self.construct(dag, i)).collect()
    }

    fn exec_of(dag: &HopDag, id: HopId) -> ExecType {
        let hop = dag.hop(id);
        if hop.is_scalar() {
            ExecType::Local
        } else {
            hop.exec_type.unwrap_or(ExecType::Local)
        }
    }

    /// Lop realizing hop `id` with the hop's exec type, type and stats.
    fn emit_for(&mut self, dag: &HopDag, id: HopId, kind: LopKind, inputs: Vec<LopId>, extra: Extra) -> LopId {
        let hop = dag.hop(id);
        let et = Self::exec_of(dag, id);
        self.emit(Some(id), kind, et, hop.data_type, hop.stats, inputs, extra)
    }

    #[allow(clippy::too_many_arguments)]
    fn emit(
        &mut self,
        hop: Option<HopId>,
        kind: LopKind,
        exec_type: ExecType,
        data_type: DataType,
        stats: MatrixCharacteristics,
        inputs: Vec<LopId>,
        extra: Extra,
    ) -> LopId {
        let id = LopId::new(self.plan.lops.len() as u64);
        let mut config = Map::new();
        config.insert("exec".into(), json!(exec_type.to_string()));
        if let Some(h) = hop {
            config.insert("hop".into(), json!(h.get()));
        }
        for (k, v) in extra {
            config.insert(k.into(), v);
        }
        self.bindings.insert(
            id,
            OperatorBinding {
                key: kind.key(),
                config: Value::Object(config),
            },
        );
        self.plan.lops.push(Lop {
            id,
            hop,
            kind,
            exec_type,
            data_type,
            stats,
            inputs,
        });
        id
    }

    fn lower_append(&mut self, dag: &mut HopDag, id: HopId, cbind: bool) -> Result<LopId> {
        let (in1, in2) = (dag.input(id, 0), dag.input(id, 1));
        let valid = match (in1.data_type, in2.data_type) {
            (DataType::Matrix, DataType::Matrix) | (DataType::Frame, DataType::Frame) => true,
            (DataType::Scalar, DataType::Scalar) => {
                in1.value_type == ValueType::String && in2.value_type == ValueType::String
            }
            _ => false,
        };
        if !valid {
            return Err(Error::structural(format!(
                "invalid append inputs {:?}/{:?} and {:?}/{:?} at hop {id}",
                in1.data_type, in1.value_type, in2.data_type, in2.value_type
            )));
        }
        let (m1, m2) = (in1.stats, in2.stats);
        let inputs = self.construct_inputs(dag, id)?;
        let et = Self::exec_of(dag, id);
        let offset = if cbind { m1.cols } else { m1.rows };

        if et != ExecType::Distributed {
            let extra = vec![
                ("cbind", json!(cbind)),
                ("method", json!(format!("{:?}", AppendMethod::Local))),
                ("offset", json!(offset)),
            ];
            return Ok(self.emit_for(dag, id, LopKind::Append { cbind }, inputs, extra));
        }

        let hop = dag.hop(id);
        let method = select_append_method(&m1, &m2, dag.blocksize(), cbind, hop.data_type, self.cfg);
        tracing::debug!(hop = %id, cbind, ?method, "append method");
        let kind = match method {
            AppendMethod::MapOnly => LopKind::AppendM { cbind },
            AppendMethod::ReduceOnly => LopKind::AppendR { cbind },
            AppendMethod::BlockAligned => LopKind::AppendGAligned { cbind },
            AppendMethod::General | AppendMethod::Local => LopKind::AppendG { cbind },
        };
        let mut extra = vec![
            ("cbind", json!(cbind)),
            ("method", json!(format!("{method:?}"))),
            ("offset", json!(offset)),
        ];
        if matches!(kind, LopKind::AppendG { .. }) {
            extra.push(("offset2", json!(if cbind { m2.cols } else { m2.rows })));
        }
        Ok(self.emit_for(dag, id, kind, inputs, extra))
    }

    fn lower_binary(&mut self, dag: &mut HopDag, id: HopId, op: OpOp2, outer: bool) -> Result<LopId> {
        let (left, right) = (dag.hop(id).inputs[0], dag.hop(id).inputs[1]);
        let (ls, rs) = (dag.hop(left).is_scalar(), dag.hop(right).is_scalar());
        let et = Self::exec_of(dag, id);

        if ls && rs {
            let inputs = self.construct_inputs(dag, id)?;
            return Ok(self.emit_for(dag, id, LopKind::BinaryScalar(op), inputs, vec![]));
        }

        if ls || rs {
            let scalar_op = if op == OpOp2::Pow && is_literal_of_value(dag, right, 2.0) {
                ScalarOp::Pow2
            } else if op == OpOp2::Mult
                && (is_literal_of_value(dag, right, 2.0) || is_literal_of_value(dag, left, 2.0))
            {
                ScalarOp::Mult2
            } else {
                ScalarOp::Op(op)
            };
            let inputs = match scalar_op {
                ScalarOp::Op(_) => self.construct_inputs(dag, id)?,
                _ => {
                    let matrix = if ls { right } else { left };
                    vec![self.construct(dag, matrix)?]
                }
            };
            return Ok(self.emit_for(dag, id, LopKind::UnaryScalar(scalar_op), inputs, vec![]));
        }

        if et == ExecType::Accelerator {
            if let Some(x) = softmax_input(dag, id, op) {
                tracing::debug!(hop = %id, "softmax rewrite");
                let input = self.construct(dag, x)?;
                return Ok(self.emit_for(dag, id, LopKind::Softmax, vec![input], vec![]));
            }
        }

        if et != ExecType::Distributed {
            if let Some((x, dout)) = relu_backward_inputs(dag, id, op, self.cfg) {
                tracing::debug!(hop = %id, "relu backward rewrite");
                let inputs = vec![self.construct(dag, x)?, self.construct(dag, dout)?];
                return Ok(self.emit_for(dag, id, LopKind::ReluBackward, inputs, vec![]));
            }
            let inputs = self.construct_inputs(dag, id)?;
            let method = if outer { BinaryMethod::Outer } else { BinaryMethod::Local };
            let extra = vec![("method", json!(format!("{method:?}")))];
            return Ok(self.emit_for(dag, id, LopKind::Binary(op), inputs, extra));
        }

        if outer {
            let inputs = self.construct_inputs(dag, id)?;
            let extra = vec![("method", json!(format!("{:?}", BinaryMethod::Outer)))];
            return Ok(self.emit_for(dag, id, LopKind::Binary(op), inputs, extra));
        }

        let method = select_binary_method(dag, left, right, self.cfg);
        tracing::debug!(hop = %id, op = op.symbol(), ?method, "binary method");
        let (m1, m2) = (dag.hop(left).stats, dag.hop(right).stats);
        let extra = vec![("method", json!(format!("{method:?}")))];
        match method {
            BinaryMethod::UAggChain => {
                let HopKind::AggUnary { op: agg, dir } = dag.hop(right).kind else {
                    return Err(Error::invariant(format!("uagg chain without aggregate at hop {id}")));
                };
                let input = self.construct(dag, left)?;
                Ok(self.emit_for(dag, id, LopKind::BinaryUAggChain { op, agg, dir }, vec![input], extra))
            }
            BinaryMethod::Broadcast => {
                let inputs = self.construct_inputs(dag, id)?;
                let mut extra = extra;
                extra.push(("replicate", json!(requires_replication(&m1, &m2))));
                let kind = LopKind::BinaryM {
                    op,
                    col_vector: is_col_vector(&m1, &m2),
                };
                Ok(self.emit_for(dag, id, kind, inputs, extra))
            }
            _ => {
                let inputs = self.construct_inputs(dag, id)?;
                Ok(self.emit_for(dag, id, LopKind::Binary(op), inputs, extra))
            }
        }
    }

    /// Quantiles, IQM and median go through sorted keys and a pick; moments
    /// and covariance have dedicated operators.
    fn lower_order_statistic(&mut self, dag: &mut HopDag, id: HopId, op: OpOp2) -> Result<LopId> {
        let inputs = self.construct_inputs(dag, id)?;
        let et = Self::exec_of(dag, id);
        let keys_stats = dag.input(id, 0).stats;
        let sort_keys = |this: &mut Self, with_weights: bool, ins: Vec<LopId>| {
            this.emit(
                Some(id),
                LopKind::SortKeys { with_weights },
                et,
                DataType::Matrix,
                keys_stats,
                ins,
                vec![],
            )
        };
        let lop = match op {
            OpOp2::Quantile | OpOp2::InterQuantile => {
                let sorted = sort_keys(self, false, vec![inputs[0]]);
                let pick = if op == OpOp2::Quantile {
                    PickOp::ValuePick
                } else {
                    PickOp::RangePick
                };
                self.emit_for(dag, id, LopKind::PickByCount(pick), vec![sorted, inputs[1]], vec![])
            }
            OpOp2::Iqm => {
                let sorted = sort_keys(self, true, inputs);
                self.emit_for(dag, id, LopKind::PickByCount(PickOp::Iqm), vec![sorted], vec![])
            }
            OpOp2::Median => {
                let sorted = sort_keys(self, true, inputs);
                let half = self.emit(
                    None,
                    LopKind::Literal(LiteralValue::Float(0.5)),
                    ExecType::Local,
                    DataType::Scalar,
                    MatrixCharacteristics::scalar(),
                    vec![],
                    vec![],
                );
                self.emit_for(dag, id, LopKind::PickByCount(PickOp::Median), vec![sorted, half], vec![])
            }
            OpOp2::Moment => self.emit_for(dag, id, LopKind::CentralMoment, inputs, vec![]),
            OpOp2::Cov => self.emit_for(dag, id, LopKind::CoVariance, inputs, vec![]),
            other => {
                return Err(Error::invariant(format!(
                    "{} is not an order statistic (hop {id})",
                    other.symbol()
                )))
            }
        };
        Ok(lop)
    }

    fn lower_reorg(&mut self, dag: &mut HopDag, id: HopId, op: ReorgOp) -> Result<LopId> {
        let transform = |op| LopKind::Transform {
            op,
            sort_index_in_mem: false,
        };
        match op {
            ReorgOp::Transpose => {
                let x = dag.hop(id).inputs[0];
                let input = self.construct(dag, x)?;
                let inner = self.plan.lop(input);
                if let LopKind::Transform {
                    op: ReorgOp::Transpose,
                    ..
                } = inner.kind
                {
                    // t(t(X)) = X
                    return Ok(inner.inputs[0]);
                }
                let hop = dag.hop(id);
                if hop.rows() == 1 && hop.cols() == 1 {
                    return Ok(input);
                }
                Ok(self.emit_for(dag, id, transform(op), vec![input], vec![]))
            }
            ReorgOp::Diag | ReorgOp::Rev | ReorgOp::Reshape => {
                let inputs = self.construct_inputs(dag, id)?;
                Ok(self.emit_for(dag, id, transform(op), inputs, vec![]))
            }
            ReorgOp::Sort => {
                let inputs = self.construct_inputs(dag, id)?;
                let in_mem = Self::exec_of(dag, id) == ExecType::Distributed
                    && sort_index_in_memory(dag, id, self.cfg);
                let kind = LopKind::Transform {
                    op,
                    sort_index_in_mem: in_mem,
                };
                let extra = vec![("sort_index_in_mem", json!(in_mem))];
                Ok(self.emit_for(dag, id, kind, inputs.into_iter().take(4).collect(), extra))
            }
        }
    }
}

/// `exp(X) / rowSums(exp(X))`: returns `X`.
fn softmax_input(dag: &HopDag, id: HopId, op: OpOp2) -> Option<HopId> {
    if op != OpOp2::Div {
        return None;
    }
    let (num, den) = (dag.hop(id).inputs[0], dag.hop(id).inputs[1]);
    let HopKind::Unary(OpOp1::Exp) = dag.hop(num).kind else {
        return None;
    };
    match dag.hop(den).kind {
        HopKind::AggUnary {
            op: AggOp::Sum,
            dir: Direction::Row,
        } if dag.hop(den).inputs[0] == num => Some(dag.hop(num).inputs[0]),
        _ => None,
    }
}

/// `(X > 0) * dout` or `dout * (X > 0)` over known, non-vector operands:
/// returns `(X, dout)`.
fn relu_backward_inputs(dag: &HopDag, id: HopId, op: OpOp2, cfg: &CompilerConfig) -> Option<(HopId, HopId)> {
    if op != OpOp2::Mult || !cfg.allow_operator_fusion {
        return None;
    }
    let (a, b) = (dag.hop(id).inputs[0], dag.hop(id).inputs[1]);
    let (ha, hb) = (dag.hop(a), dag.hop(b));
    if ha.is_vector() || hb.is_vector() || !ha.dims_known() || !hb.dims_known() {
        return None;
    }
    let greater_zero = |g: HopId| match dag.hop(g).kind {
        HopKind::Binary {
            op: OpOp2::Greater,
            outer: false,
        } if is_literal_of_value(dag, dag.hop(g).inputs[1], 0.0) => Some(dag.hop(g).inputs[0]),
        _ => None,
    };
    greater_zero(a)
        .map(|x| (x, b))
        .or_else(|| greater_zero(b).map(|x| (x, a)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hopc_core::config::DistributedMode;

    fn lower(dag: &mut HopDag, cfg: &CompilerConfig) -> PhysicalProgram {
        hopc_hops::annotate(dag, cfg);
        let roots = dag.roots().to_vec();
        lower_to_physical(dag, &roots, cfg).unwrap()
    }

    fn count(p: &PhysicalProgram, pred: impl Fn(&LopKind) -> bool) -> usize {
        p.plan.lops.iter().filter(|l| pred(&l.kind)).count()
    }

    #[test]
    fn cbind_of_large_matrix_and_vector_is_map_only() {
        let cfg = CompilerConfig::default();
        let mut dag = HopDag::new();
        let a = dag.read("A", 10_000, 500, -1).unwrap();
        let v = dag.read("v", 10_000, 1, -1).unwrap();
        let c = dag.binary(OpOp2::Cbind, a, v).unwrap();
        dag.write("Y", c).unwrap();
        let p = lower(&mut dag, &cfg);
        assert_eq!(dag.hop(c).exec_type, Some(ExecType::Distributed));
        assert_eq!(count(&p, |k| matches!(k, LopKind::AppendM { cbind: true })), 1);
        let b = p.binding_for_hop(c).unwrap();
        assert_eq!(b.key, "mappend");
        assert_eq!(b.config["method"], "MapOnly");
    }

    #[test]
    fn rbind_on_block_boundary_is_aligned() {
        let cfg = CompilerConfig {
            distributed_mode: DistributedMode::ForceDistributed,
            ..Default::default()
        };
        let mut dag = HopDag::new();
        let a = dag.read("A", 2000, 10, -1).unwrap();
        let b = dag.read("B", 3000, 10, -1).unwrap();
        let r = dag.binary(OpOp2::Rbind, a, b).unwrap();
        dag.write("Y", r).unwrap();
        let p = lower(&mut dag, &cfg);
        assert_eq!(count(&p, |k| matches!(k, LopKind::AppendGAligned { cbind: false })), 1);
    }

    #[test]
    fn append_of_matrix_and_frame_is_structural_error() {
        let cfg = CompilerConfig::default();
        let mut dag = HopDag::new();
        let a = dag.read("A", 10, 10, -1).unwrap();
        let f = dag.read_typed("F", DataType::Frame, 10, 1, -1).unwrap();
        let c = dag.binary(OpOp2::Cbind, a, f).unwrap();
        dag.write("Y", c).unwrap();
        hopc_hops::annotate(&mut dag, &cfg);
        let roots = dag.roots().to_vec();
        let err = lower_to_physical(&mut dag, &roots, &cfg).unwrap_err();
        assert!(matches!(err, Error::Structural(_)));
    }

    #[test]
    fn relu_backward_replaces_two_elementwise_ops() {
        let cfg = CompilerConfig::default();
        let mut dag = HopDag::new();
        let x = dag.read("X", 100, 100, -1).unwrap();
        let zero = dag.lit_f64(0.0).unwrap();
        let g = dag.binary(OpOp2::Greater, x, zero).unwrap();
        let m = dag.binary(OpOp2::Mult, x, g).unwrap();
        dag.write("Y", m).unwrap();
        let p = lower(&mut dag, &cfg);
        assert_eq!(count(&p, |k| matches!(k, LopKind::ReluBackward)), 1);
        assert_eq!(count(&p, |k| matches!(k, LopKind::Binary(_))), 0);
        assert!(dag.hop(g).physical.is_none());
    }

    #[test]
    fn relu_backward_needs_operator_fusion() {
        let cfg = CompilerConfig {
            allow_operator_fusion: false,
            ..Default::default()
        };
        let mut dag = HopDag::new();
        let x = dag.read("X", 100, 100, -1).unwrap();
        let zero = dag.lit_f64(0.0).unwrap();
        let g = dag.binary(OpOp2::Greater, x, zero).unwrap();
        let m = dag.binary(OpOp2::Mult, g, x).unwrap();
        dag.write("Y", m).unwrap();
        let p = lower(&mut dag, &cfg);
        assert_eq!(count(&p, |k| matches!(k, LopKind::ReluBackward)), 0);
    }

    #[test]
    fn softmax_on_accelerator() {
        let cfg = CompilerConfig {
            accelerator_enabled: true,
            ..Default::default()
        };
        let mut dag = HopDag::new();
        let x = dag.read("X", 100, 10, -1).unwrap();
        let e = dag.unary(OpOp1::Exp, x).unwrap();
        let s = dag.agg(AggOp::Sum, Direction::Row, e).unwrap();
        let d = dag.binary(OpOp2::Div, e, s).unwrap();
        dag.write("Y", d).unwrap();
        let p = lower(&mut dag, &cfg);
        assert_eq!(dag.hop(d).exec_type, Some(ExecType::Accelerator));
        let sm: Vec<&Lop> = p.plan.find(|k| matches!(k, LopKind::Softmax)).collect();
        assert_eq!(sm.len(), 1);
        assert_eq!(p.plan.lop(sm[0].inputs[0]).hop, Some(x));
    }

    #[test]
    fn pow2_and_mult2_specialisations() {
        let cfg = CompilerConfig::default();
        let mut dag = HopDag::new();
        let x = dag.read("X", 100, 10, -1).unwrap();
        let two = dag.lit_f64(2.0).unwrap();
        let p2 = dag.binary(OpOp2::Pow, x, two).unwrap();
        let m2 = dag.binary(OpOp2::Mult, two, p2).unwrap();
        dag.write("Y", m2).unwrap();
        let p = lower(&mut dag, &cfg);
        assert_eq!(count(&p, |k| *k == LopKind::UnaryScalar(ScalarOp::Pow2)), 1);
        assert_eq!(count(&p, |k| *k == LopKind::UnaryScalar(ScalarOp::Mult2)), 1);
        assert_eq!(count(&p, |k| matches!(k, LopKind::Literal(_))), 0);
    }

    #[test]
    fn distributed_matrix_vector_is_broadcast() {
        let cfg = CompilerConfig {
            distributed_mode: DistributedMode::ForceDistributed,
            ..Default::default()
        };
        let mut dag = HopDag::new();
        let x = dag.read("X", 10_000, 100, -1).unwrap();
        let v = dag.read("v", 10_000, 1, -1).unwrap();
        let m = dag.binary(OpOp2::Minus, x, v).unwrap();
        dag.write("Y", m).unwrap();
        let p = lower(&mut dag, &cfg);
        assert_eq!(
            count(&p, |k| matches!(k, LopKind::BinaryM { op: OpOp2::Minus, col_vector: true })),
            1
        );
    }

    #[test]
    fn distributed_uagg_chain_absorbs_aggregate() {
        let cfg = CompilerConfig {
            distributed_mode: DistributedMode::ForceDistributed,
            ..Default::default()
        };
        let mut dag = HopDag::new();
        let x = dag.read("X", 10_000, 100, -1).unwrap();
        let s = dag.agg(AggOp::Max, Direction::Row, x).unwrap();
        let m = dag.binary(OpOp2::Minus, x, s).unwrap();
        dag.write("Y", m).unwrap();
        let p = lower(&mut dag, &cfg);
        assert_eq!(count(&p, |k| matches!(k, LopKind::BinaryUAggChain { .. })), 1);
        assert_eq!(count(&p, |k| matches!(k, LopKind::PartialAggregate { .. })), 0);
    }

    #[test]
    fn double_transpose_is_eliminated() {
        let cfg = CompilerConfig::default();
        let mut dag = HopDag::new();
        let x = dag.read("X", 100, 10, -1).unwrap();
        let t1 = dag.transpose(x).unwrap();
        let t2 = dag.transpose(t1).unwrap();
        dag.write("Y", t2).unwrap();
        let p = lower(&mut dag, &cfg);
        assert_eq!(count(&p, |k| matches!(k, LopKind::Transform { .. })), 1);
        assert_eq!(dag.hop(t2).physical, dag.hop(x).physical);
    }

    #[test]
    fn median_sorts_with_weights_then_picks() {
        let cfg = CompilerConfig::default();
        let mut dag = HopDag::new();
        let x = dag.read("X", 1000, 1, -1).unwrap();
        let w = dag.read("W", 1000, 1, -1).unwrap();
        let m = dag.binary(OpOp2::Median, x, w).unwrap();
        dag.write("y", m).unwrap();
        let p = lower(&mut dag, &cfg);
        assert_eq!(count(&p, |k| *k == LopKind::SortKeys { with_weights: true }), 1);
        assert_eq!(count(&p, |k| *k == LopKind::PickByCount(PickOp::Median)), 1);
    }

    #[test]
    fn quantile_picks_values() {
        let cfg = CompilerConfig::default();
        let mut dag = HopDag::new();
        let x = dag.read("X", 1000, 1, -1).unwrap();
        let q = dag.lit_f64(0.9).unwrap();
        let m = dag.binary(OpOp2::Quantile, x, q).unwrap();
        dag.write("y", m).unwrap();
        let p = lower(&mut dag, &cfg);
        assert_eq!(count(&p, |k| *k == LopKind::SortKeys { with_weights: false }), 1);
        assert_eq!(count(&p, |k| *k == LopKind::PickByCount(PickOp::ValuePick)), 1);
    }

    #[test]
    fn distributed_sort_uses_in_memory_index() {
        let cfg = CompilerConfig {
            distributed_mode: DistributedMode::ForceDistributed,
            ..Default::default()
        };
        let mut dag = HopDag::new();
        let x = dag.read("X", 100_000, 10, -1).unwrap();
        let s = dag.sort(x, 1, false, false).unwrap();
        dag.write("Y", s).unwrap();
        let p = lower(&mut dag, &cfg);
        let sort = p.binding_for_hop(s).unwrap();
        assert_eq!(sort.config["sort_index_in_mem"], true);
        let lop = p.plan.find(|k| matches!(k, LopKind::Transform { op: ReorgOp::Sort, .. })).next().unwrap();
        assert_eq!(lop.inputs.len(), 4);

        let forced = CompilerConfig {
            force_dist_sort_indexes: true,
            ..cfg
        };
        let p = lower(&mut dag, &forced);
        assert_eq!(p.binding_for_hop(s).unwrap().config["sort_index_in_mem"], false);
    }

    #[test]
    fn shared_inputs_are_lowered_once() {
        let cfg = CompilerConfig::default();
        let mut dag = HopDag::new();
        let x = dag.read("X", 100, 10, -1).unwrap();
        let e = dag.unary(OpOp1::Exp, x).unwrap();
        let a = dag.binary(OpOp2::Plus, e, e).unwrap();
        dag.write("Y", a).unwrap();
        dag.write("Z", e).unwrap();
        let p = lower(&mut dag, &cfg);
        assert_eq!(count(&p, |k| *k == LopKind::Unary(OpOp1::Exp)), 1);
        assert_eq!(p.plan.outputs.len(), 2);
        for l in &p.plan.lops {
            assert!(l.inputs.iter().all(|i| *i < l.id));
        }
    }
}
