//! DAG-level rewrites run before annotation: constant folding and common
//! subexpression elimination, plus small node constructors used by the
//! fusion graft.

use std::collections::HashMap;

use hopc_core::error::Result;
use hopc_core::id::HopId;
use hopc_core::types::{DataType, ExecType, OpOp1};

use crate::dag::HopDag;
use crate::kind::{DataOpKind, HopKind, LiteralValue};
use crate::size::refresh_size_information;

/// Whether `id` is a numeric literal equal to `value`.
pub fn is_literal_of_value(dag: &HopDag, id: HopId, value: f64) -> bool {
    dag.hop(id)
        .literal()
        .and_then(|l| l.as_f64())
        .map(|v| v == value)
        .unwrap_or(false)
}

/// `t(x)` with refreshed statistics and the input's exec type.
pub fn create_transpose(dag: &mut HopDag, x: HopId) -> Result<HopId> {
    let t = dag.transpose(x)?;
    finish_new(dag, t, x);
    Ok(t)
}

/// `x[rl:ru, cl:cu]` with refreshed statistics.
pub fn create_indexing(dag: &mut HopDag, x: HopId, rl: i64, ru: i64, cl: i64, cu: i64) -> Result<HopId> {
    let ix = dag.index(x, rl, ru, cl, cu)?;
    finish_new(dag, ix, x);
    Ok(ix)
}

/// `as.scalar(x[r, c])`.
pub fn create_scalar_indexing(dag: &mut HopDag, x: HopId, r: i64, c: i64) -> Result<HopId> {
    let ix = create_indexing(dag, x, r, r, c, c)?;
    create_unary(dag, OpOp1::CastAsScalar, ix)
}

pub fn create_unary(dag: &mut HopDag, op: OpOp1, x: HopId) -> Result<HopId> {
    let u = dag.unary(op, x)?;
    finish_new(dag, u, x);
    Ok(u)
}

fn finish_new(dag: &mut HopDag, id: HopId, like: HopId) {
    refresh_size_information(dag, id);
    let et = dag.hop(like).exec_type;
    let hop = dag.hop_mut(id);
    hop.exec_type = if hop.is_scalar() {
        Some(ExecType::Local)
    } else {
        et
    };
}

/// Fold scalar operators over literal operands into literals.
/// Returns the number of folded nodes.
pub fn fold_constants(dag: &mut HopDag) -> Result<usize> {
    let mut folded = 0;
    for id in dag.topo_order() {
        let hop = dag.hop(id);
        if !hop.is_scalar() {
            continue;
        }
        let value = match &hop.kind {
            HopKind::Binary { op, .. } => {
                let a = dag.input(id, 0).literal().and_then(|l| l.as_f64());
                let b = dag.input(id, 1).literal().and_then(|l| l.as_f64());
                match (a, b) {
                    (Some(a), Some(b)) => op.eval(a, b),
                    _ => None,
                }
            }
            HopKind::Unary(op) => dag
                .input(id, 0)
                .literal()
                .and_then(|l| l.as_f64())
                .and_then(|v| eval_unary(*op, v)),
            _ => None,
        };
        let Some(v) = value else { continue };
        let lit = if hop.value_type == hopc_core::types::ValueType::Boolean {
            LiteralValue::Bool(v != 0.0)
        } else {
            LiteralValue::Float(v)
        };
        let new = dag.literal(lit)?;
        dag.hop_mut(new).exec_type = Some(ExecType::Local);
        dag.rewire_all_parent_child_references(id, new);
        folded += 1;
    }
    if folded > 0 {
        dag.prune_unreachable();
        tracing::debug!(folded, "constant folding");
    }
    Ok(folded)
}

fn eval_unary(op: OpOp1, v: f64) -> Option<f64> {
    Some(match op {
        OpOp1::Exp => v.exp(),
        OpOp1::Log => v.ln(),
        OpOp1::Abs => v.abs(),
        OpOp1::Sqrt => v.sqrt(),
        OpOp1::Round => v.round(),
        OpOp1::Sign => {
            if v > 0.0 {
                1.0
            } else if v < 0.0 {
                -1.0
            } else {
                0.0
            }
        }
        OpOp1::Not => {
            if v == 0.0 {
                1.0
            } else {
                0.0
            }
        }
        OpOp1::Sigmoid => 1.0 / (1.0 + (-v).exp()),
        OpOp1::CastAsScalar => v,
        _ => return None,
    })
}

/// Structural key: equal keys compute the same value.
fn cse_key(dag: &HopDag, id: HopId) -> Option<String> {
    let hop = dag.hop(id);
    let kind = match &hop.kind {
        // writes are side effects; persistent reads are distinct sources
        HopKind::Data(op) if op.is_write() => return None,
        HopKind::Data(DataOpKind::PersistentRead) => format!("pread:{}", hop.name),
        HopKind::Data(DataOpKind::TransientRead) => format!("tread:{}", hop.name),
        HopKind::Literal(v) => format!("lit:{}", v.key()),
        HopKind::Fused { kernel, .. } => format!("spoof:{}", kernel.get()),
        other => format!("{other:?}"),
    };
    let dt = match hop.data_type {
        DataType::Matrix => "M",
        DataType::Frame => "F",
        DataType::Scalar => "S",
    };
    let inputs: Vec<String> = hop.inputs.iter().map(|i| i.get().to_string()).collect();
    Some(format!("{kind}|{dt}|{}", inputs.join(",")))
}

/// Merge structurally identical nodes bottom-up. Returns the number of
/// nodes merged away.
pub fn eliminate_common_subexpressions(dag: &mut HopDag) -> usize {
    let mut seen: HashMap<String, HopId> = HashMap::new();
    let mut merged = 0;
    for id in dag.topo_order() {
        let Some(key) = cse_key(dag, id) else { continue };
        match seen.get(&key) {
            Some(&canonical) if canonical != id => {
                dag.rewire_all_parent_child_references(id, canonical);
                merged += 1;
            }
            _ => {
                seen.insert(key, id);
            }
        }
    }
    if merged > 0 {
        dag.prune_unreachable();
        tracing::debug!(merged, "common subexpression elimination");
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use hopc_core::types::OpOp2;

    #[test]
    fn folds_scalar_arithmetic() {
        let mut dag = HopDag::new();
        let a = dag.read("A", 10, 10, -1).unwrap();
        let two = dag.lit_f64(2.0).unwrap();
        let three = dag.lit_f64(3.0).unwrap();
        let s = dag.binary(OpOp2::Plus, two, three).unwrap();
        let m = dag.binary(OpOp2::Mult, a, s).unwrap();
        dag.write("Y", m).unwrap();
        assert_eq!(fold_constants(&mut dag).unwrap(), 1);
        assert!(is_literal_of_value(&dag, dag.hop(m).inputs[1], 5.0));
        dag.check_edges().unwrap();
    }

    #[test]
    fn cse_merges_identical_subtrees() {
        let mut dag = HopDag::new();
        let a = dag.read("A", 10, 10, -1).unwrap();
        let e1 = dag.unary(OpOp1::Exp, a).unwrap();
        let e2 = dag.unary(OpOp1::Exp, a).unwrap();
        let p = dag.binary(OpOp2::Plus, e1, e2).unwrap();
        dag.write("Y", p).unwrap();
        assert_eq!(eliminate_common_subexpressions(&mut dag), 1);
        assert_eq!(dag.hop(p).inputs, vec![e1, e1]);
        dag.check_edges().unwrap();
    }

    #[test]
    fn cse_keeps_distinct_literals() {
        let mut dag = HopDag::new();
        let a = dag.read("A", 10, 10, -1).unwrap();
        let z = dag.lit_f64(0.0).unwrap();
        let nz = dag.lit_f64(-0.0).unwrap();
        let p = dag.binary(OpOp2::Greater, a, z).unwrap();
        let q = dag.binary(OpOp2::Greater, a, nz).unwrap();
        let r = dag.binary(OpOp2::Plus, p, q).unwrap();
        dag.write("Y", r).unwrap();
        assert_eq!(eliminate_common_subexpressions(&mut dag), 0);
    }

    #[test]
    fn cse_never_merges_writes() {
        let mut dag = HopDag::new();
        let a = dag.read("A", 10, 10, -1).unwrap();
        dag.write("Y", a).unwrap();
        dag.write("Y", a).unwrap();
        assert_eq!(eliminate_common_subexpressions(&mut dag), 0);
        assert_eq!(dag.roots().len(), 2);
    }
}
