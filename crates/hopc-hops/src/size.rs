//! Size and sparsity inference.
//!
//! Two flavours exist per operator kind:
//! * [`refresh_size_information`] writes the *exact* statistics derivable
//!   from the inputs into the node itself (unknown stays unknown);
//! * [`infer_output_characteristics`] derives a *worst-case* triple through
//!   a [`MemoTable`], used by memory estimation when the node's own
//!   dimensions are unknown.
//!
//! Neither ever fails: unknown inputs produce unknown outputs.

use std::collections::HashMap;

use hopc_core::id::HopId;
use hopc_core::stats::{MatrixCharacteristics, UNKNOWN};
use hopc_core::types::{DataType, Direction, OpOp1, OpOp2, ReorgOp};
use hopc_mem::{
    binary_op_sparsity, binary_op_sparsity_conditional_sparse_safe,
    is_binary_op_conditional_sparse_safe, is_binary_op_conditional_sparse_safe_exact,
    matmult_sparsity,
};

use crate::dag::HopDag;
use crate::kind::{DataOpKind, HopKind};

/// Statistics believed for nodes whose own dimensions are unknown,
/// filled during one memory-estimation traversal.
#[derive(Debug, Default, Clone)]
pub struct MemoTable {
    stats: HashMap<HopId, MatrixCharacteristics>,
}

impl MemoTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn memoize(&mut self, id: HopId, mc: MatrixCharacteristics) {
        self.stats.insert(id, mc);
    }

    pub fn get(&self, id: HopId) -> Option<MatrixCharacteristics> {
        self.stats.get(&id).copied()
    }

    /// The node's own statistics when its dimensions are known, otherwise
    /// the memoized belief (if any).
    pub fn input_stats(&self, dag: &HopDag, id: HopId) -> MatrixCharacteristics {
        let own = dag.hop(id).stats;
        if own.dims_known() {
            return own;
        }
        self.get(id).unwrap_or(own)
    }

    pub fn len(&self) -> usize {
        self.stats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stats.is_empty()
    }
}

pub(crate) fn literal_i64(dag: &HopDag, id: HopId) -> Option<i64> {
    dag.hop(id).literal().and_then(|l| l.as_i64())
}

pub(crate) fn literal_bool(dag: &HopDag, id: HopId) -> Option<bool> {
    dag.hop(id).literal().and_then(|l| l.as_bool())
}

pub(crate) fn literal_f64(dag: &HopDag, id: HopId) -> Option<f64> {
    dag.hop(id).literal().and_then(|l| l.as_f64())
}

/// Reshape dimensions: a pinned dimension plus exact division of the known
/// cell count. Never truncates: a non-divisible request stays unknown.
fn reshape_dims(input: &MatrixCharacteristics, rows: i64, cols: i64) -> (i64, i64) {
    if rows >= 0 && cols >= 0 {
        return (rows, cols);
    }
    let Some(n) = input.cells() else {
        return (rows.max(UNKNOWN), cols.max(UNKNOWN));
    };
    if rows > 0 && n % rows == 0 {
        (rows, n / rows)
    } else if cols > 0 && n % cols == 0 {
        (n / cols, cols)
    } else {
        (rows.max(UNKNOWN), cols.max(UNKNOWN))
    }
}

fn index_extent(lower: i64, upper: i64, input_dim: i64) -> i64 {
    let upper = if upper < 0 { input_dim } else { upper };
    if lower >= 1 && upper >= lower {
        upper - lower + 1
    } else {
        UNKNOWN
    }
}

/// Recompute the exact statistics of `id` from its inputs, in place.
pub fn refresh_size_information(dag: &mut HopDag, id: HopId) {
    let mc = exact_stats(dag, id);
    dag.hop_mut(id).stats = mc;
}

fn exact_stats(dag: &HopDag, id: HopId) -> MatrixCharacteristics {
    let hop = dag.hop(id);
    let bs = dag.blocksize();
    if hop.is_scalar() {
        return MatrixCharacteristics::scalar();
    }
    let in_stats = |pos: usize| dag.input(id, pos).stats;

    let mc = match &hop.kind {
        HopKind::Data(op) if op.is_read() => hop.stats,
        HopKind::Data(_) => in_stats(0),
        HopKind::Literal(_) => MatrixCharacteristics::scalar(),
        HopKind::Fused { .. } => hop.stats,

        HopKind::Unary(op) => {
            let i = in_stats(0);
            match op {
                OpOp1::CastAsMatrix => MatrixCharacteristics::new(1, 1, UNKNOWN, bs),
                _ if op.is_sparse_safe() => i,
                _ => i.with_nnz(UNKNOWN),
            }
        }

        HopKind::Binary { op, outer } => binary_exact(dag, id, *op, *outer),

        HopKind::Reorg(op) => {
            let i = in_stats(0);
            match op {
                ReorgOp::Transpose => MatrixCharacteristics::new(i.cols, i.rows, i.nnz, bs),
                ReorgOp::Rev => i,
                ReorgOp::Diag => {
                    let k = i.rows;
                    if i.cols == 1 {
                        MatrixCharacteristics::new(k, k, if i.nnz >= 0 { i.nnz } else { k }, bs)
                    } else if i.cols > 1 {
                        let nnz = if i.nnz >= 0 { k.min(i.nnz) } else { k };
                        MatrixCharacteristics::new(k, 1, nnz, bs)
                    } else {
                        MatrixCharacteristics::new(k, UNKNOWN, UNKNOWN, bs)
                    }
                }
                ReorgOp::Reshape => {
                    let rows = literal_i64(dag, hop.inputs[1]).unwrap_or(UNKNOWN);
                    let cols = literal_i64(dag, hop.inputs[2]).unwrap_or(UNKNOWN);
                    let (r, c) = reshape_dims(&i, rows, cols);
                    MatrixCharacteristics::new(r, c, i.nnz, bs)
                }
                ReorgOp::Sort => match literal_bool(dag, hop.inputs[3]) {
                    Some(true) => MatrixCharacteristics::new(i.rows, 1, i.rows, bs),
                    Some(false) => MatrixCharacteristics::new(i.rows, i.cols, i.nnz, bs),
                    None => MatrixCharacteristics::new(i.rows, UNKNOWN, UNKNOWN, bs),
                },
            }
        }

        HopKind::AggUnary { dir, .. } => {
            let i = in_stats(0);
            match dir {
                Direction::Row => MatrixCharacteristics::new(i.rows, 1, UNKNOWN, bs),
                Direction::Col => MatrixCharacteristics::new(1, i.cols, UNKNOWN, bs),
                Direction::RowCol => MatrixCharacteristics::scalar(),
            }
        }

        HopKind::MatMult => {
            let (a, b) = (in_stats(0), in_stats(1));
            MatrixCharacteristics::new(a.rows, b.cols, UNKNOWN, bs)
        }

        HopKind::Index {
            row_lower,
            row_upper,
            col_lower,
            col_upper,
        } => {
            let i = in_stats(0);
            let rows = if i.rows_known() || *row_upper >= 0 {
                index_extent(*row_lower, *row_upper, i.rows)
            } else {
                UNKNOWN
            };
            let cols = if i.cols_known() || *col_upper >= 0 {
                index_extent(*col_lower, *col_upper, i.cols)
            } else {
                UNKNOWN
            };
            let nnz = if rows == i.rows && cols == i.cols { i.nnz } else { UNKNOWN };
            MatrixCharacteristics::new(rows, cols, nnz, bs)
        }
    };
    normalize(mc, bs)
}

/// Every negative field becomes the canonical sentinel; the DAG's block
/// size wins over whatever the source carried.
fn normalize(mc: MatrixCharacteristics, blocksize: i64) -> MatrixCharacteristics {
    let fix = |v: i64| if v < 0 { UNKNOWN } else { v };
    MatrixCharacteristics::new(fix(mc.rows), fix(mc.cols), fix(mc.nnz), blocksize)
}

fn binary_exact(dag: &HopDag, id: HopId, op: OpOp2, outer: bool) -> MatrixCharacteristics {
    let hop = dag.hop(id);
    let bs = dag.blocksize();
    let in1 = dag.hop(hop.inputs[0]);
    let in2 = dag.hop(hop.inputs[1]);
    let (s1, s2) = (in1.stats, in2.stats);

    match op {
        OpOp2::Cbind => {
            let rows = if s1.rows_known() { s1.rows } else { s2.rows };
            let cols = if s1.cols_known() && s2.cols_known() {
                s1.cols + s2.cols
            } else {
                UNKNOWN
            };
            let nnz = if s1.nnz_known() && s2.nnz_known() {
                s1.nnz + s2.nnz
            } else {
                UNKNOWN
            };
            MatrixCharacteristics::new(rows, cols, nnz, bs)
        }
        OpOp2::Rbind => {
            let cols = if s1.cols_known() { s1.cols } else { s2.cols };
            let rows = if s1.rows_known() && s2.rows_known() {
                s1.rows + s2.rows
            } else {
                UNKNOWN
            };
            let nnz = if s1.nnz_known() && s2.nnz_known() {
                s1.nnz + s2.nnz
            } else {
                UNKNOWN
            };
            MatrixCharacteristics::new(rows, cols, nnz, bs)
        }
        OpOp2::Solve => MatrixCharacteristics::new(s1.cols, s2.cols, UNKNOWN, bs),
        OpOp2::InterQuantile => MatrixCharacteristics::new(UNKNOWN, 1, UNKNOWN, bs),
        _ => {
            let (rows, cols, lnnz1) = match (in1.data_type, in2.data_type) {
                (dt1, DataType::Scalar) if !dt1.is_scalar() => (s1.rows, s1.cols, s1.nnz),
                (DataType::Scalar, _) => (s2.rows, s2.cols, UNKNOWN),
                _ if outer => (s1.rows, s2.cols, UNKNOWN),
                _ => {
                    let rows = if s1.rows_known() {
                        s1.rows
                    } else if s2.rows > 1 {
                        s2.rows
                    } else {
                        UNKNOWN
                    };
                    let cols = if s1.cols_known() {
                        s1.cols
                    } else if s2.cols > 1 {
                        s2.cols
                    } else {
                        UNKNOWN
                    };
                    (rows, cols, s1.nnz)
                }
            };
            let exact_literal = in2
                .literal()
                .and_then(|l| l.as_f64())
                .map(|v| is_binary_op_conditional_sparse_safe_exact(op, v))
                .unwrap_or(false);
            let nnz = if op == OpOp2::Pow || exact_literal {
                lnnz1
            } else if matches!(op, OpOp2::Plus | OpOp2::Minus)
                && ((s1.nnz == 0 && s2.nnz >= 0) || (s1.nnz >= 0 && s2.nnz == 0))
                && !in1.is_scalar()
                && !in2.is_scalar()
            {
                s1.nnz + s2.nnz
            } else {
                UNKNOWN
            };
            MatrixCharacteristics::new(rows, cols, nnz, bs)
        }
    }
}

/// Worst-case `[rows, cols, nnz]` of `id` from memoized input statistics,
/// or `None` when nothing useful can be derived.
pub fn infer_output_characteristics(dag: &HopDag, id: HopId, memo: &MemoTable) -> Option<[i64; 3]> {
    let hop = dag.hop(id);
    if hop.is_scalar() {
        return None;
    }
    let in_mc = |pos: usize| memo.input_stats(dag, hop.inputs[pos]);

    match &hop.kind {
        HopKind::Data(DataOpKind::TransientWrite | DataOpKind::PersistentWrite) => {
            let i = in_mc(0);
            i.dims_known().then(|| i.as_triple())
        }
        HopKind::Data(_) | HopKind::Literal(_) | HopKind::Fused { .. } => None,

        HopKind::Unary(op) => {
            let i = in_mc(0);
            if !i.dims_known() {
                return None;
            }
            match op {
                OpOp1::CastAsMatrix => Some([1, 1, 1]),
                _ if op.is_sparse_safe() => Some(i.as_triple()),
                _ => Some([i.rows, i.cols, i.rows.saturating_mul(i.cols)]),
            }
        }

        HopKind::Binary { op, outer } => {
            let (m1, m2) = (in_mc(0), in_mc(1));
            infer_binary(dag, id, *op, *outer, m1, m2)
        }

        HopKind::Reorg(op) => {
            let i = in_mc(0);
            match op {
                ReorgOp::Transpose => i.dims_known().then(|| [i.cols, i.rows, i.nnz]),
                ReorgOp::Rev => i.dims_known().then(|| i.as_triple()),
                ReorgOp::Diag => {
                    let k = i.rows;
                    if i.cols == 1 && k >= 0 {
                        Some([k, k, if i.nnz >= 0 { i.nnz } else { k }])
                    } else if i.cols > 1 && k >= 0 {
                        Some([k, 1, if i.nnz >= 0 { k.min(i.nnz) } else { k }])
                    } else {
                        None
                    }
                }
                ReorgOp::Reshape => {
                    if !i.dims_known() {
                        return None;
                    }
                    let rows = literal_i64(dag, hop.inputs[1]).unwrap_or(UNKNOWN);
                    let cols = literal_i64(dag, hop.inputs[2]).unwrap_or(UNKNOWN);
                    let (r, c) = reshape_dims(&i, rows, cols);
                    (r >= 0 && c >= 0).then_some([r, c, i.nnz])
                }
                ReorgOp::Sort => match literal_bool(dag, hop.inputs[3]) {
                    Some(true) => Some([i.rows, 1, i.rows]),
                    Some(false) => Some([i.rows, i.cols, i.nnz]),
                    None => Some([i.rows, UNKNOWN, UNKNOWN]),
                },
            }
        }

        HopKind::AggUnary { dir, .. } => {
            let i = in_mc(0);
            match dir {
                Direction::Row if i.rows_known() => Some([i.rows, 1, i.rows]),
                Direction::Col if i.cols_known() => Some([1, i.cols, i.cols]),
                _ => None,
            }
        }

        HopKind::MatMult => {
            let (a, b) = (in_mc(0), in_mc(1));
            if !(a.rows_known() && b.cols_known()) {
                return None;
            }
            let sp = matmult_sparsity(a.sparsity(), b.sparsity(), a.cols);
            let nnz = (a.rows as f64 * b.cols as f64 * sp) as i64;
            Some([a.rows, b.cols, nnz])
        }

        HopKind::Index {
            row_lower,
            row_upper,
            col_lower,
            col_upper,
        } => {
            let i = in_mc(0);
            let rows = index_extent(*row_lower, *row_upper, i.rows);
            let cols = index_extent(*col_lower, *col_upper, i.cols);
            if rows < 0 || cols < 0 {
                return None;
            }
            let cells = rows.saturating_mul(cols);
            let nnz = if i.nnz >= 0 { i.nnz.min(cells) } else { cells };
            Some([rows, cols, nnz])
        }
    }
}

fn infer_binary(
    dag: &HopDag,
    id: HopId,
    op: OpOp2,
    outer: bool,
    m1: MatrixCharacteristics,
    m2: MatrixCharacteristics,
) -> Option<[i64; 3]> {
    let hop = dag.hop(id);
    let (dt1, dt2) = (
        dag.hop(hop.inputs[0]).data_type,
        dag.hop(hop.inputs[1]).data_type,
    );
    match op {
        OpOp2::Cbind | OpOp2::Rbind => {
            let cbind = op == OpOp2::Cbind;
            let (same1, same2, sum1, sum2) = if cbind {
                (m1.rows, m2.rows, m1.cols, m2.cols)
            } else {
                (m1.cols, m2.cols, m1.rows, m2.rows)
            };
            let shared = if same1 >= 0 { same1 } else { same2.max(UNKNOWN) };
            let summed = if sum1 >= 0 && sum2 >= 0 { sum1 + sum2 } else { UNKNOWN };
            let nnz = if m1.nnz_known() && m2.nnz_known() {
                m1.nnz + m2.nnz
            } else {
                UNKNOWN
            };
            if shared < 0 && summed < 0 && nnz < 0 {
                return None;
            }
            Some(if cbind {
                [shared, summed, nnz]
            } else {
                [summed, shared, nnz]
            })
        }
        OpOp2::Solve => m1.cols_known().then(|| [m1.cols, 1, m1.cols]),
        _ => {
            let (rows, cols, sp1, sp2) = if !dt1.is_scalar() && dt2.is_scalar() {
                if !m1.dims_known() {
                    return None;
                }
                (m1.rows, m1.cols, m1.sparsity(), 1.0)
            } else if dt1.is_scalar() && !dt2.is_scalar() {
                (m2.rows, m2.cols, 1.0, m2.sparsity())
            } else if outer {
                (m1.rows, m2.cols, m1.sparsity(), m2.sparsity())
            } else {
                let rows = if m1.rows_known() {
                    m1.rows
                } else if m2.rows > 1 {
                    m2.rows
                } else {
                    UNKNOWN
                };
                let cols = if m1.cols_known() {
                    m1.cols
                } else if m2.cols > 1 {
                    m2.cols
                } else {
                    UNKNOWN
                };
                (rows, cols, m1.sparsity(), m2.sparsity())
            };
            if rows < 0 || cols < 0 {
                return None;
            }
            let cells = rows as f64 * cols as f64;
            let sp = match literal_f64(dag, hop.inputs[1]) {
                Some(lit) if is_binary_op_conditional_sparse_safe(op) => {
                    binary_op_sparsity_conditional_sparse_safe(sp1, op, lit)
                }
                // outer vector ops: the average case equals the worst case
                _ => binary_op_sparsity(sp1, sp2, op, !outer),
            };
            Some([rows, cols, (cells * sp) as i64])
        }
    }
}

/// Full bottom-up recompute of exact statistics for everything reachable
/// from the roots. Idempotent on an unchanged DAG.
pub fn propagate_sizes(dag: &mut HopDag) {
    for id in dag.topo_order() {
        refresh_size_information(dag, id);
    }
    tracing::trace!(nodes = dag.len(), "size propagation done");
}
