//! Physical program: a flat lop dataflow graph plus operator bindings.
//!
//! Lops are stored in creation order, which is always inputs-first, so the
//! vector itself is a valid execution order. Bindings carry the operator key
//! and the chosen strategy for the instruction emitter.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use hopc_core::id::{HopId, KernelId, LopId};
use hopc_core::stats::MatrixCharacteristics;
use hopc_core::types::{AggOp, DataType, Direction, ExecType, OpOp1, OpOp2, ReorgOp, TemplateType};
use hopc_hops::{DataOpKind, LiteralValue};

/// Selection flavour of a pick over sorted keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PickOp {
    ValuePick,
    RangePick,
    Iqm,
    Median,
}

/// Matrix-scalar operator, with the two specialised unary forms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScalarOp {
    Op(OpOp2),
    /// `X ^ 2`
    Pow2,
    /// `X * 2`
    Mult2,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LopKind {
    Data { kind: DataOpKind, name: String },
    Literal(LiteralValue),
    Unary(OpOp1),
    /// Matrix-scalar cell-wise operator.
    UnaryScalar(ScalarOp),
    /// Scalar-scalar operator.
    BinaryScalar(OpOp2),
    /// Matrix-matrix operator (local, or distributed shuffle/join).
    Binary(OpOp2),
    /// Distributed matrix-vector operator with a broadcast vector.
    BinaryM { op: OpOp2, col_vector: bool },
    /// Distributed `op(X, agg(X))` without materializing the aggregate.
    BinaryUAggChain { op: OpOp2, agg: AggOp, dir: Direction },
    /// `X * (X > 0)` style gradient of a relu.
    ReluBackward,
    /// `exp(X) / rowSums(exp(X))` on the accelerator.
    Softmax,
    Append { cbind: bool },
    AppendM { cbind: bool },
    AppendR { cbind: bool },
    AppendG { cbind: bool },
    AppendGAligned { cbind: bool },
    Transform { op: ReorgOp, sort_index_in_mem: bool },
    SortKeys { with_weights: bool },
    PickByCount(PickOp),
    CentralMoment,
    CoVariance,
    PartialAggregate { op: AggOp, dir: Direction },
    MatMult,
    RightIndex { rl: i64, ru: i64, cl: i64, cu: i64 },
    Fused { kernel: KernelId, template: TemplateType, class_name: String },
}

impl LopKind {
    /// Operator key used in bindings and listings.
    pub fn key(&self) -> String {
        match self {
            LopKind::Data { kind, .. } => match kind {
                DataOpKind::PersistentRead => "pread".into(),
                DataOpKind::TransientRead => "tread".into(),
                DataOpKind::PersistentWrite => "pwrite".into(),
                DataOpKind::TransientWrite => "twrite".into(),
            },
            LopKind::Literal(_) => "literal".into(),
            LopKind::Unary(op) => op.symbol().into(),
            LopKind::UnaryScalar(ScalarOp::Op(op)) => format!("{}_scalar", op.symbol()),
            LopKind::UnaryScalar(ScalarOp::Pow2) => "^2".into(),
            LopKind::UnaryScalar(ScalarOp::Mult2) => "*2".into(),
            LopKind::BinaryScalar(op) => format!("s{}", op.symbol()),
            LopKind::Binary(op) => op.symbol().into(),
            LopKind::BinaryM { op, .. } => format!("map{}", op.symbol()),
            LopKind::BinaryUAggChain { .. } => "binuaggchain".into(),
            LopKind::ReluBackward => "relu_backward".into(),
            LopKind::Softmax => "softmax".into(),
            LopKind::Append { .. } => "append".into(),
            LopKind::AppendM { .. } => "mappend".into(),
            LopKind::AppendR { .. } => "rappend".into(),
            LopKind::AppendG { .. } => "gappend".into(),
            LopKind::AppendGAligned { .. } => "galignedappend".into(),
            LopKind::Transform { op, .. } => op.symbol().into(),
            LopKind::SortKeys { .. } => "qsort".into(),
            LopKind::PickByCount(p) => match p {
                PickOp::ValuePick => "qpick_value".into(),
                PickOp::RangePick => "qpick_range".into(),
                PickOp::Iqm => "qpick_iqm".into(),
                PickOp::Median => "qpick_median".into(),
            },
            LopKind::CentralMoment => "cm".into(),
            LopKind::CoVariance => "cov".into(),
            LopKind::PartialAggregate { op, dir } => {
                let d = match dir {
                    Direction::Row => "r",
                    Direction::Col => "c",
                    Direction::RowCol => "ua",
                };
                format!("{d}{}", op.symbol())
            }
            LopKind::MatMult => "ba+*".into(),
            LopKind::RightIndex { .. } => "rightIndex".into(),
            LopKind::Fused { class_name, .. } => format!("spoof:{class_name}"),
        }
    }

    pub fn is_distributed_append(&self) -> bool {
        matches!(
            self,
            LopKind::AppendM { .. }
                | LopKind::AppendR { .. }
                | LopKind::AppendG { .. }
                | LopKind::AppendGAligned { .. }
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lop {
    pub id: LopId,
    /// Originating hop; `None` for helper lops (e.g. pick constants).
    pub hop: Option<HopId>,
    pub kind: LopKind,
    pub exec_type: ExecType,
    pub data_type: DataType,
    pub stats: MatrixCharacteristics,
    pub inputs: Vec<LopId>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PhysicalPlan {
    pub lops: Vec<Lop>,
    /// Lops of the DAG roots, in root order.
    pub outputs: Vec<LopId>,
}

impl PhysicalPlan {
    pub fn lop(&self, id: LopId) -> &Lop {
        &self.lops[id.index()]
    }

    pub fn len(&self) -> usize {
        self.lops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lops.is_empty()
    }

    /// Lops of the given kind predicate, in execution order.
    pub fn find<'a>(&'a self, pred: impl Fn(&LopKind) -> bool + 'a) -> impl Iterator<Item = &'a Lop> + 'a {
        self.lops.iter().filter(move |l| pred(&l.kind))
    }
}

/// Operator binding: a key (e.g. "mappend", "map*") and a JSON config with
/// the exec type and chosen strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperatorBinding {
    pub key: String,
    pub config: serde_json::Value,
}

/// Physical plan plus a stable map of lop ids to bindings (BTreeMap keeps
/// hashing and listings deterministic).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhysicalProgram {
    pub plan: PhysicalPlan,
    pub bindings: BTreeMap<LopId, OperatorBinding>,
}

impl PhysicalProgram {
    pub fn new(plan: PhysicalPlan, bindings: BTreeMap<LopId, OperatorBinding>) -> Self {
        Self { plan, bindings }
    }

    /// Binding of the lop realizing `hop`, if any.
    pub fn binding_for_hop(&self, hop: HopId) -> Option<&OperatorBinding> {
        self.plan
            .lops
            .iter()
            .rev()
            .find(|l| l.hop == Some(hop))
            .and_then(|l| self.bindings.get(&l.id))
    }

    /// One line per lop: `(id) EXEC key (inputs) [rows,cols,nnz]`.
    pub fn explain(&self) -> String {
        use std::fmt::Write as _;
        let mut out = String::new();
        for l in &self.plan.lops {
            let inputs: Vec<String> = l.inputs.iter().map(|i| i.get().to_string()).collect();
            let _ = writeln!(
                out,
                "({}) {} {} ({}) [{},{},{}]",
                l.id.get(),
                l.exec_type,
                l.kind.key(),
                inputs.join(","),
                l.stats.rows,
                l.stats.cols,
                l.stats.nnz
            );
        }
        out
    }
}
