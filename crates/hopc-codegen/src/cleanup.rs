//! Post-construction cleanup of kernel plans.
//!
//! Simplifies and deduplicates each plan's expression DAG, then removes
//! plans that would not pay off or cannot run: no matrix input, a lookup
//! the main-input iteration cannot serve, a single operation without
//! aggregation, or nothing to compute at all.

use hopc_core::error::Result;
use hopc_core::types::{DataType, ExecType, OpOp2, TemplateType};
use hopc_hops::HopDag;

use crate::cplan::{AggKind, CNode, CNodeOrRef, CPlan, LookupKind};

pub fn cleanup_plans(dag: &HopDag, plans: Vec<CPlan>) -> Result<Vec<CPlan>> {
    let mut out = Vec::with_capacity(plans.len());
    for mut plan in plans {
        let root = plan.roots[0];
        if let Some(reason) = cleanup_plan(dag, &mut plan) {
            tracing::trace!(root = %root, template = %plan.template, reason, "dropping fused plan");
            continue;
        }
        plan.assign_class_name()?;
        out.push(plan);
    }
    Ok(out)
}

/// Clean one plan in place; returns why it must be dropped, if it must.
fn cleanup_plan(dag: &HopDag, plan: &mut CPlan) -> Option<&'static str> {
    if plan.inputs.is_empty() || plan.inputs.iter().all(|i| i.data_type == DataType::Scalar) {
        return Some("no matrix input");
    }

    simplify(plan);
    eliminate_common_subexpressions(plan);
    plan.prune_inputs();

    let row_template = plan.template == TemplateType::Row;
    if has_main_input_lookup(plan, !row_template) {
        return Some("unsupported lookup of the main input");
    }
    strip_main_input_lookups(plan);

    let root = dag.hop(plan.roots[0]);
    let ops = plan.count_operations();
    let drop = match (plan.template, plan.agg) {
        (TemplateType::Row, AggKind::NoAgg) if root.is_scalar() => Some("row plan with scalar output"),
        (TemplateType::Cell, AggKind::NoAgg) if ops == 1 => Some("single cell operation"),
        (TemplateType::Row, AggKind::NoAgg | AggKind::Row(_)) if ops == 1 => {
            Some("single row operation")
        }
        (_, AggKind::NoAgg) if ops == 0 => Some("no operation"),
        _ => None,
    };
    if drop.is_some() {
        return drop;
    }
    if plan
        .outputs
        .iter()
        .all(|&o| matches!(plan.node(o), CNode::Data { .. }))
    {
        return Some("output is a plain input");
    }

    if row_template && root.exec_type == Some(ExecType::Distributed) {
        let too_wide = plan
            .main_input()
            .map(|m| m.stats.cols > dag.blocksize())
            .unwrap_or(false);
        if too_wide {
            return Some("row plan wider than one block in distributed mode");
        }
    }
    None
}

fn literal_is(nodes: &[CNode], id: usize, value: f64) -> bool {
    match &nodes[id] {
        CNode::Literal(v) => v.as_f64() == Some(value),
        _ => false,
    }
}

/// Algebraic identities: `x*1`, `x+0`, `x-0`, `x/1` collapse to `x`;
/// `x^2` becomes `x*x`.
pub fn simplify(plan: &mut CPlan) -> usize {
    let mut rewrites = 0;
    plan.rebuild(false, |node, nodes| {
        let CNode::Binary { op, left, right } = *node else {
            return None;
        };
        let out = match op {
            OpOp2::Mult if literal_is(nodes, right, 1.0) => Some(CNodeOrRef::Ref(left)),
            OpOp2::Mult if literal_is(nodes, left, 1.0) => Some(CNodeOrRef::Ref(right)),
            OpOp2::Plus if literal_is(nodes, right, 0.0) => Some(CNodeOrRef::Ref(left)),
            OpOp2::Plus if literal_is(nodes, left, 0.0) => Some(CNodeOrRef::Ref(right)),
            OpOp2::Minus if literal_is(nodes, right, 0.0) => Some(CNodeOrRef::Ref(left)),
            OpOp2::Div if literal_is(nodes, right, 1.0) => Some(CNodeOrRef::Ref(left)),
            OpOp2::Pow if literal_is(nodes, right, 2.0) => Some(CNodeOrRef::Node(CNode::Binary {
                op: OpOp2::Mult,
                left,
                right: left,
            })),
            _ => None,
        };
        if out.is_some() {
            rewrites += 1;
        }
        out
    });
    rewrites
}

/// Share structurally identical nodes. Returns the number of nodes merged.
pub fn eliminate_common_subexpressions(plan: &mut CPlan) -> usize {
    plan.rebuild(true, |_, _| None)
}

fn is_main_data(plan: &CPlan, id: usize) -> bool {
    matches!(plan.node(id), CNode::Data { input: 0 })
}

/// Column lookups (`RC1`, cell-like templates only) and row-range lookups
/// cannot read the input the kernel iterates over.
fn has_main_input_lookup(plan: &CPlan, include_rc1: bool) -> bool {
    plan.reachable().into_iter().any(|n| match plan.node(n) {
        CNode::Lookup {
            kind: LookupKind::RC1 { .. },
            input,
        } => include_rc1 && is_main_data(plan, *input),
        CNode::Lookup {
            kind: LookupKind::RVect1 { .. },
            input,
        } => is_main_data(plan, *input),
        _ => false,
    })
}

/// The main input is read directly; plain lookups of it are dropped.
fn strip_main_input_lookups(plan: &mut CPlan) {
    plan.rebuild(true, |node, nodes| match node {
        CNode::Lookup {
            kind: LookupKind::R | LookupKind::C | LookupKind::RC,
            input,
        } if matches!(nodes[*input], CNode::Data { input: 0 }) => Some(CNodeOrRef::Ref(*input)),
        _ => None,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use hopc_core::id::HopId;
    use hopc_core::stats::MatrixCharacteristics;
    use hopc_core::types::OpOp1;
    use hopc_hops::LiteralValue;

    fn dag_with_root() -> (HopDag, HopId) {
        let mut dag = HopDag::new();
        let x = dag.read("X", 100, 100, -1).unwrap();
        let e = dag.unary(OpOp1::Exp, x).unwrap();
        dag.write("Y", e).unwrap();
        hopc_hops::propagate_sizes(&mut dag);
        (dag, e)
    }

    fn plan_with(root: HopId, build: impl FnOnce(&mut CPlan, usize)) -> CPlan {
        let mut p = CPlan::new(TemplateType::Cell);
        let x = p.input_index(
            HopId::new(0),
            DataType::Matrix,
            MatrixCharacteristics::new(100, 100, -1, 1000),
        );
        let d = p.push(CNode::Data { input: x });
        build(&mut p, d);
        p.roots.push(root);
        p
    }

    #[test]
    fn identities_are_removed() {
        let (dag, root) = dag_with_root();
        let mut p = plan_with(root, |p, d| {
            let one = p.push(CNode::Literal(LiteralValue::Float(1.0)));
            let m = p.push(CNode::Binary {
                op: OpOp2::Mult,
                left: d,
                right: one,
            });
            let e = p.push(CNode::Unary { op: OpOp1::Exp, input: m });
            let two = p.push(CNode::Literal(LiteralValue::Int(2)));
            let sq = p.push(CNode::Binary {
                op: OpOp2::Pow,
                left: e,
                right: two,
            });
            p.outputs.push(sq);
        });
        assert_eq!(simplify(&mut p), 2);
        assert_eq!(p.count_operations(), 2);
        assert!(cleanup_plan(&dag, &mut p).is_none());
    }

    #[test]
    fn single_cell_operation_is_dropped() {
        let (dag, root) = dag_with_root();
        let mut p = plan_with(root, |p, d| {
            let l = p.push(CNode::Lookup {
                kind: LookupKind::RC,
                input: d,
            });
            let e = p.push(CNode::Unary { op: OpOp1::Exp, input: l });
            p.outputs.push(e);
        });
        assert_eq!(cleanup_plan(&dag, &mut p), Some("single cell operation"));
    }

    #[test]
    fn column_lookup_of_main_input_is_dropped() {
        let (dag, root) = dag_with_root();
        let mut p = plan_with(root, |p, d| {
            let l = p.push(CNode::Lookup {
                kind: LookupKind::RC1 { col: 2 },
                input: d,
            });
            let e = p.push(CNode::Unary { op: OpOp1::Exp, input: l });
            let s = p.push(CNode::Unary { op: OpOp1::Sqrt, input: e });
            p.outputs.push(s);
        });
        assert_eq!(cleanup_plan(&dag, &mut p), Some("unsupported lookup of the main input"));
    }

    #[test]
    fn main_input_lookups_are_stripped() {
        let (dag, root) = dag_with_root();
        let mut p = plan_with(root, |p, d| {
            let l = p.push(CNode::Lookup {
                kind: LookupKind::RC,
                input: d,
            });
            let e = p.push(CNode::Unary { op: OpOp1::Exp, input: l });
            let s = p.push(CNode::Unary { op: OpOp1::Sqrt, input: e });
            p.outputs.push(s);
        });
        assert!(cleanup_plan(&dag, &mut p).is_none());
        assert!(!p.nodes.iter().any(|n| matches!(n, CNode::Lookup { .. })));
    }

    #[test]
    fn all_scalar_inputs_are_dropped() {
        let (dag, root) = dag_with_root();
        let mut p = CPlan::new(TemplateType::Cell);
        let s = p.input_index(HopId::new(7), DataType::Scalar, MatrixCharacteristics::scalar());
        let d = p.push(CNode::Data { input: s });
        p.outputs.push(d);
        p.roots.push(root);
        assert_eq!(cleanup_plan(&dag, &mut p), Some("no matrix input"));
    }
}
