//! Fusion templates.
//!
//! A template decides, per hop, whether a candidate plan can start there
//! (`open`), whether the hop can extend an open plan of one of its inputs
//! (`fuse`), whether a further input's plan can be merged in (`merge`), and
//! in which state the plan is left afterwards (`close`).
//!
//! Multi-aggregate plans are never explored hop by hop; the cost-based
//! selectors form them from closed cell plans.

use hopc_core::id::HopId;
use hopc_core::types::{AggOp, Direction, OpOp2, TemplateType};
use hopc_hops::{Hop, HopDag, HopKind};

use crate::memo::CloseType;

pub trait Template: Send + Sync {
    fn template_type(&self) -> TemplateType;

    fn open(&self, dag: &HopDag, hop: HopId) -> bool;

    fn fuse(&self, dag: &HopDag, hop: HopId, input: HopId) -> bool;

    fn merge(&self, dag: &HopDag, hop: HopId, input: HopId) -> bool;

    fn close(&self, dag: &HopDag, hop: HopId) -> CloseType;
}

pub struct CellTemplate;
pub struct RowTemplate;
pub struct OuterTemplate;
pub struct MultiAggTemplate;

static CELL: CellTemplate = CellTemplate;
static ROW: RowTemplate = RowTemplate;
static OUTER: OuterTemplate = OuterTemplate;
static MULTI_AGG: MultiAggTemplate = MultiAggTemplate;

/// Templates explored per hop, in a fixed order.
pub fn exploration_templates() -> [&'static dyn Template; 3] {
    [&CELL, &ROW, &OUTER]
}

pub fn template_for(t: TemplateType) -> &'static dyn Template {
    match t {
        TemplateType::Cell => &CELL,
        TemplateType::Row => &ROW,
        TemplateType::Outer => &OUTER,
        TemplateType::MultiAgg => &MULTI_AGG,
    }
}

// ---- shared predicates ------------------------------------------------------

/// Matrix-valued cell-wise unary or (non-outer) binary operator.
pub(crate) fn is_cell_op(hop: &Hop) -> bool {
    if !hop.is_matrix() {
        return false;
    }
    match hop.kind {
        HopKind::Unary(op) => op.is_cellwise(),
        HopKind::Binary { op, outer: false } => op.is_cellwise(),
        _ => false,
    }
}

fn fusable_agg(hop: &Hop) -> Option<(AggOp, Direction)> {
    match hop.kind {
        HopKind::AggUnary { op, dir } if op.is_fusable() => Some((op, dir)),
        _ => None,
    }
}

fn same_dims(a: &Hop, b: &Hop) -> bool {
    a.dims_known() && a.rows() == b.rows() && a.cols() == b.cols()
}

/// `X[, c]` over all rows of a multi-column matrix.
pub(crate) fn is_single_column_index(dag: &HopDag, hop: &Hop) -> bool {
    match hop.kind {
        HopKind::Index {
            row_lower,
            row_upper,
            col_lower,
            col_upper,
        } => {
            let x = dag.hop(hop.inputs[0]);
            x.cols() > 1 && row_lower == 1 && row_upper == x.rows() && col_lower == col_upper
        }
        _ => false,
    }
}

/// `X[, cl:cu]` over all rows with more than one column selected.
pub(crate) fn is_column_range_index(dag: &HopDag, hop: &Hop) -> bool {
    match hop.kind {
        HopKind::Index {
            row_lower,
            row_upper,
            col_lower,
            col_upper,
        } => {
            let x = dag.hop(hop.inputs[0]);
            row_lower == 1 && row_upper == x.rows() && col_lower < col_upper
        }
        _ => false,
    }
}

/// `t(X) %*% y` with a transposed left operand.
pub(crate) fn is_transposed_left_matmult(dag: &HopDag, hop: &Hop) -> bool {
    matches!(hop.kind, HopKind::MatMult) && dag.hop(hop.inputs[0]).kind.is_transpose()
}

fn is_full_agg(hop: &Hop) -> bool {
    matches!(fusable_agg(hop), Some((_, Direction::RowCol)))
}

// ---- cell -------------------------------------------------------------------

impl Template for CellTemplate {
    fn template_type(&self) -> TemplateType {
        TemplateType::Cell
    }

    fn open(&self, dag: &HopDag, hop: HopId) -> bool {
        let h = dag.hop(hop);
        is_cell_op(h) || is_single_column_index(dag, h)
    }

    fn fuse(&self, dag: &HopDag, hop: HopId, input: HopId) -> bool {
        let h = dag.hop(hop);
        let c = dag.hop(input);
        if !c.is_matrix() {
            return false;
        }
        if is_cell_op(h) {
            return same_dims(h, c);
        }
        fusable_agg(h).is_some() && h.inputs[0] == input && c.dims_known()
    }

    fn merge(&self, dag: &HopDag, hop: HopId, input: HopId) -> bool {
        let h = dag.hop(hop);
        let c = dag.hop(input);
        is_cell_op(h) && same_dims(h, c) && (is_cell_op(c) || is_single_column_index(dag, c))
    }

    fn close(&self, dag: &HopDag, hop: HopId) -> CloseType {
        let h = dag.hop(hop);
        match fusable_agg(h) {
            Some((_, Direction::RowCol)) => CloseType::ClosedValid,
            Some(_) if !h.dims_known() => CloseType::ClosedInvalid,
            Some(_) => CloseType::ClosedValid,
            None => CloseType::Open,
        }
    }
}

// ---- row --------------------------------------------------------------------

impl Template for RowTemplate {
    fn template_type(&self) -> TemplateType {
        TemplateType::Row
    }

    fn open(&self, dag: &HopDag, hop: HopId) -> bool {
        let h = dag.hop(hop);
        match h.kind {
            HopKind::MatMult => {
                let x = dag.hop(h.inputs[0]);
                let v = dag.hop(h.inputs[1]);
                !x.kind.is_transpose() && x.rows() > 1 && x.cols() > 1 && v.cols() == 1
            }
            HopKind::AggUnary { op, dir: Direction::Row } => {
                op.is_fusable() && dag.hop(h.inputs[0]).cols() > 1
            }
            HopKind::Index { .. } => is_column_range_index(dag, h),
            _ => false,
        }
    }

    fn fuse(&self, dag: &HopDag, hop: HopId, input: HopId) -> bool {
        let h = dag.hop(hop);
        let c = dag.hop(input);
        if is_cell_op(h) {
            return c.cols() == 1 && h.cols() == 1 && h.rows() == c.rows();
        }
        if is_transposed_left_matmult(dag, h) {
            let x = dag.hop(dag.hop(h.inputs[0]).inputs[0]);
            return h.inputs[1] == input && c.cols() == 1 && x.rows() == c.rows();
        }
        match fusable_agg(h) {
            Some((_, Direction::RowCol)) => c.cols() == 1,
            Some((_, Direction::Row)) => c.cols() > 1 && is_column_range_index(dag, c),
            _ => false,
        }
    }

    fn merge(&self, dag: &HopDag, hop: HopId, input: HopId) -> bool {
        let h = dag.hop(hop);
        let c = dag.hop(input);
        matches!(h.kind, HopKind::Binary { outer: false, .. })
            && is_cell_op(h)
            && h.cols() == 1
            && c.cols() == 1
            && c.rows() == h.rows()
    }

    fn close(&self, dag: &HopDag, hop: HopId) -> CloseType {
        let h = dag.hop(hop);
        if is_transposed_left_matmult(dag, h) {
            return if h.dims_known() {
                CloseType::ClosedValid
            } else {
                CloseType::ClosedInvalid
            };
        }
        if is_full_agg(h) {
            return CloseType::ClosedValid;
        }
        CloseType::Open
    }
}

// ---- outer ------------------------------------------------------------------

impl Template for OuterTemplate {
    fn template_type(&self) -> TemplateType {
        TemplateType::Outer
    }

    fn open(&self, dag: &HopDag, hop: HopId) -> bool {
        let h = dag.hop(hop);
        if !matches!(h.kind, HopKind::MatMult) {
            return false;
        }
        let u = dag.hop(h.inputs[0]);
        let tv = dag.hop(h.inputs[1]);
        if u.kind.is_transpose() || !tv.kind.is_transpose() {
            return false;
        }
        let v = dag.hop(tv.inputs[0]);
        let rank = u.cols();
        u.id != v.id
            && rank >= 1 && rank == v.cols() && rank <= dag.blocksize() && u.rows() > 1 && v.rows() > 1
    }

    fn fuse(&self, dag: &HopDag, hop: HopId, input: HopId) -> bool {
        let h = dag.hop(hop);
        let c = dag.hop(input);
        match h.kind {
            HopKind::Binary {
                op: OpOp2::Mult,
                outer: false,
            } => {
                let other = if h.inputs[0] == input {
                    h.inputs[1]
                } else {
                    h.inputs[0]
                };
                if !matches!(c.kind, HopKind::MatMult) {
                    return false;
                }
                let x = dag.hop(other);
                let tv = dag.hop(c.inputs[1]);
                let Some(&v) = tv.inputs.first() else {
                    return false;
                };
                x.is_matrix() && same_dims(x, c) && other != c.inputs[0] && other != v
            }
            HopKind::AggUnary {
                op: AggOp::Sum,
                dir: Direction::RowCol,
            } => c.kind.binary_op() == Some(OpOp2::Mult),
            HopKind::Reorg(_) if h.kind.is_transpose() => c.kind.binary_op() == Some(OpOp2::Mult),
            _ => false,
        }
    }

    fn merge(&self, _dag: &HopDag, _hop: HopId, _input: HopId) -> bool {
        false
    }

    fn close(&self, dag: &HopDag, hop: HopId) -> CloseType {
        let h = dag.hop(hop);
        match h.kind {
            // a bare outer product has no sparse driver yet
            HopKind::MatMult => CloseType::OpenInvalid,
            HopKind::AggUnary { .. } => CloseType::ClosedValid,
            HopKind::Reorg(_) => CloseType::ClosedValid,
            _ => CloseType::Open,
        }
    }
}

// ---- multi-aggregate ----------------------------------------------------------

impl Template for MultiAggTemplate {
    fn template_type(&self) -> TemplateType {
        TemplateType::MultiAgg
    }

    fn open(&self, _dag: &HopDag, _hop: HopId) -> bool {
        false
    }

    fn fuse(&self, _dag: &HopDag, _hop: HopId, _input: HopId) -> bool {
        false
    }

    fn merge(&self, _dag: &HopDag, _hop: HopId, _input: HopId) -> bool {
        false
    }

    fn close(&self, _dag: &HopDag, _hop: HopId) -> CloseType {
        CloseType::ClosedValid
    }
}
