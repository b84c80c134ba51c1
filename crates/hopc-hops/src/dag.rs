//! Arena-backed operator DAG.
//!
//! Nodes are addressed by [`HopId`] (their arena slot). Inputs are ordered
//! and shared: a node may be an input of many parents. The parent list is
//! the informational back-edge (one entry per incoming edge); ownership and
//! traversal always follow `inputs`.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use hopc_core::error::{Error, Result};
use hopc_core::id::{HopId, LopId};
use hopc_core::stats::{MatrixCharacteristics, DEFAULT_BLOCKSIZE, UNKNOWN};
use hopc_core::types::{
    AggOp, DataType, Direction, ExecType, OpOp1, OpOp2, ReorgOp, ValueType,
};

use crate::kind::{check_arity, DataOpKind, HopKind, LiteralValue};

/// Memory estimate in bytes; `total` covers inputs, intermediates and output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MemEstimate {
    pub output: f64,
    pub intermediate: f64,
    pub total: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hop {
    pub id: HopId,
    pub name: String,
    pub kind: HopKind,
    pub data_type: DataType,
    pub value_type: ValueType,
    pub inputs: Vec<HopId>,
    pub parents: Vec<HopId>,
    pub stats: MatrixCharacteristics,
    pub mem: MemEstimate,
    pub exec_type: Option<ExecType>,
    pub forced_exec_type: Option<ExecType>,
    /// Root of this node's physical counterpart, attached by lowering.
    pub physical: Option<LopId>,
    pub requires_recompile: bool,
}

impl Hop {
    pub fn is_scalar(&self) -> bool {
        self.data_type.is_scalar()
    }
    pub fn is_matrix(&self) -> bool {
        self.data_type.is_matrix()
    }
    pub fn rows(&self) -> i64 {
        self.stats.rows
    }
    pub fn cols(&self) -> i64 {
        self.stats.cols
    }
    pub fn nnz(&self) -> i64 {
        self.stats.nnz
    }
    pub fn dims_known(&self) -> bool {
        self.stats.dims_known()
    }
    pub fn is_vector(&self) -> bool {
        self.stats.is_vector()
    }
    pub fn literal(&self) -> Option<&LiteralValue> {
        match &self.kind {
            HopKind::Literal(v) => Some(v),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HopDag {
    nodes: Vec<Hop>,
    roots: Vec<HopId>,
    blocksize: i64,
}

impl Default for HopDag {
    fn default() -> Self {
        Self::new()
    }
}

impl HopDag {
    pub fn new() -> Self {
        Self::with_blocksize(DEFAULT_BLOCKSIZE)
    }

    pub fn with_blocksize(blocksize: i64) -> Self {
        Self {
            nodes: Vec::new(),
            roots: Vec::new(),
            blocksize,
        }
    }

    pub fn blocksize(&self) -> i64 {
        self.blocksize
    }

    /// Number of arena slots (including nodes no longer reachable).
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn hop(&self, id: HopId) -> &Hop {
        &self.nodes[id.index()]
    }

    pub fn hop_mut(&mut self, id: HopId) -> &mut Hop {
        &mut self.nodes[id.index()]
    }

    pub fn get(&self, id: HopId) -> Option<&Hop> {
        self.nodes.get(id.index())
    }

    pub fn input(&self, id: HopId, pos: usize) -> &Hop {
        self.hop(self.hop(id).inputs[pos])
    }

    pub fn roots(&self) -> &[HopId] {
        &self.roots
    }

    pub fn set_roots(&mut self, roots: Vec<HopId>) {
        self.roots = roots;
    }

    pub fn add_root(&mut self, id: HopId) {
        if !self.roots.contains(&id) {
            self.roots.push(id);
        }
    }

    /// Add a node; arity is checked and parent back-edges are recorded.
    pub fn add(
        &mut self,
        name: impl Into<String>,
        kind: HopKind,
        data_type: DataType,
        value_type: ValueType,
        inputs: Vec<HopId>,
    ) -> Result<HopId> {
        check_arity(&kind, inputs.len())?;
        for &i in &inputs {
            if i.index() >= self.nodes.len() {
                return Err(Error::Structural(format!("unknown input {i}")));
            }
        }
        let id = HopId::new(self.nodes.len() as u64);
        let stats = if data_type.is_scalar() {
            MatrixCharacteristics::scalar()
        } else {
            MatrixCharacteristics::unknown(self.blocksize)
        };
        for &i in &inputs {
            self.nodes[i.index()].parents.push(id);
        }
        self.nodes.push(Hop {
            id,
            name: name.into(),
            kind,
            data_type,
            value_type,
            inputs,
            parents: Vec::new(),
            stats,
            mem: MemEstimate::default(),
            exec_type: None,
            forced_exec_type: None,
            physical: None,
            requires_recompile: false,
        });
        Ok(id)
    }

    // ---- builders -------------------------------------------------------

    /// Persistent read of a matrix with metadata-provided size.
    pub fn read(&mut self, name: &str, rows: i64, cols: i64, nnz: i64) -> Result<HopId> {
        self.read_typed(name, DataType::Matrix, rows, cols, nnz)
    }

    pub fn read_typed(
        &mut self,
        name: &str,
        data_type: DataType,
        rows: i64,
        cols: i64,
        nnz: i64,
    ) -> Result<HopId> {
        let id = self.add(
            name,
            HopKind::Data(DataOpKind::PersistentRead),
            data_type,
            ValueType::Fp64,
            vec![],
        )?;
        let bs = self.blocksize;
        self.hop_mut(id).stats = MatrixCharacteristics::new(rows, cols, nnz, bs);
        Ok(id)
    }

    /// Transient read of a live-in variable.
    pub fn transient_read(
        &mut self,
        name: &str,
        data_type: DataType,
        stats: MatrixCharacteristics,
    ) -> Result<HopId> {
        let id = self.add(
            name,
            HopKind::Data(DataOpKind::TransientRead),
            data_type,
            ValueType::Fp64,
            vec![],
        )?;
        self.hop_mut(id).stats = stats;
        Ok(id)
    }

    pub fn write(&mut self, name: &str, input: HopId) -> Result<HopId> {
        self.write_kind(name, input, DataOpKind::PersistentWrite)
    }

    pub fn write_kind(&mut self, name: &str, input: HopId, kind: DataOpKind) -> Result<HopId> {
        let (dt, vt, stats) = {
            let h = self.hop(input);
            (h.data_type, h.value_type, h.stats)
        };
        let id = self.add(name, HopKind::Data(kind), dt, vt, vec![input])?;
        self.hop_mut(id).stats = stats;
        self.add_root(id);
        Ok(id)
    }

    pub fn literal(&mut self, value: LiteralValue) -> Result<HopId> {
        let vt = match value {
            LiteralValue::Float(_) => ValueType::Fp64,
            LiteralValue::Int(_) => ValueType::Int64,
            LiteralValue::Bool(_) => ValueType::Boolean,
            LiteralValue::Str(_) => ValueType::String,
        };
        let name = value.to_string();
        self.add(name, HopKind::Literal(value), DataType::Scalar, vt, vec![])
    }

    pub fn lit_f64(&mut self, v: f64) -> Result<HopId> {
        self.literal(LiteralValue::Float(v))
    }

    pub fn lit_i64(&mut self, v: i64) -> Result<HopId> {
        self.literal(LiteralValue::Int(v))
    }

    pub fn lit_bool(&mut self, v: bool) -> Result<HopId> {
        self.literal(LiteralValue::Bool(v))
    }

    pub fn binary(&mut self, op: OpOp2, a: HopId, b: HopId) -> Result<HopId> {
        self.binary_with(op, a, b, false)
    }

    pub fn binary_outer(&mut self, op: OpOp2, a: HopId, b: HopId) -> Result<HopId> {
        self.binary_with(op, a, b, true)
    }

    fn binary_with(&mut self, op: OpOp2, a: HopId, b: HopId, outer: bool) -> Result<HopId> {
        let (dt1, dt2) = (self.hop(a).data_type, self.hop(b).data_type);
        let data_type = if op.is_append() {
            if dt1 == DataType::Frame {
                DataType::Frame
            } else {
                DataType::Matrix
            }
        } else if op.is_order_statistic() && op != OpOp2::InterQuantile {
            DataType::Scalar
        } else if matches!(op, OpOp2::Moment | OpOp2::Cov) {
            DataType::Scalar
        } else if dt1.is_scalar() && dt2.is_scalar() {
            DataType::Scalar
        } else {
            DataType::Matrix
        };
        let vt = if op.is_ppred() && data_type.is_scalar() {
            ValueType::Boolean
        } else {
            ValueType::Fp64
        };
        self.add(
            op.symbol(),
            HopKind::Binary { op, outer },
            data_type,
            vt,
            vec![a, b],
        )
    }

    pub fn unary(&mut self, op: OpOp1, x: HopId) -> Result<HopId> {
        let dt = match op {
            OpOp1::CastAsScalar | OpOp1::Nrow | OpOp1::Ncol | OpOp1::Length => DataType::Scalar,
            OpOp1::CastAsMatrix => DataType::Matrix,
            _ => self.hop(x).data_type,
        };
        let vt = if op.is_metadata() {
            ValueType::Int64
        } else {
            ValueType::Fp64
        };
        self.add(op.symbol(), HopKind::Unary(op), dt, vt, vec![x])
    }

    pub fn transpose(&mut self, x: HopId) -> Result<HopId> {
        self.reorg(ReorgOp::Transpose, vec![x])
    }

    pub fn reorg(&mut self, op: ReorgOp, inputs: Vec<HopId>) -> Result<HopId> {
        let dt = inputs
            .first()
            .map(|&i| self.hop(i).data_type)
            .unwrap_or(DataType::Matrix);
        self.add(op.symbol(), HopKind::Reorg(op), dt, ValueType::Fp64, inputs)
    }

    /// `reshape(X, rows, cols)`; pass `-1` to let inference derive a dimension.
    pub fn reshape(&mut self, x: HopId, rows: i64, cols: i64) -> Result<HopId> {
        let r = self.lit_i64(rows)?;
        let c = self.lit_i64(cols)?;
        let d = self.lit_i64(2)?;
        let byrow = self.lit_bool(true)?;
        self.reorg(ReorgOp::Reshape, vec![x, r, c, d, byrow])
    }

    pub fn sort(&mut self, x: HopId, by: i64, decreasing: bool, index_return: bool) -> Result<HopId> {
        let by = self.lit_i64(by)?;
        let desc = self.lit_bool(decreasing)?;
        let ix = self.lit_bool(index_return)?;
        let stable = self.lit_bool(true)?;
        self.reorg(ReorgOp::Sort, vec![x, by, desc, ix, stable])
    }

    pub fn agg(&mut self, op: AggOp, dir: Direction, x: HopId) -> Result<HopId> {
        let dt = if dir == Direction::RowCol {
            DataType::Scalar
        } else {
            DataType::Matrix
        };
        self.add(
            op.symbol(),
            HopKind::AggUnary { op, dir },
            dt,
            ValueType::Fp64,
            vec![x],
        )
    }

    pub fn matmult(&mut self, a: HopId, b: HopId) -> Result<HopId> {
        self.add("%*%", HopKind::MatMult, DataType::Matrix, ValueType::Fp64, vec![a, b])
    }

    pub fn index(&mut self, x: HopId, rl: i64, ru: i64, cl: i64, cu: i64) -> Result<HopId> {
        self.add(
            "rix",
            HopKind::Index {
                row_lower: rl,
                row_upper: ru,
                col_lower: cl,
                col_upper: cu,
            },
            DataType::Matrix,
            ValueType::Fp64,
            vec![x],
        )
    }

    // ---- traversal -------------------------------------------------------

    /// Deterministic post-order (inputs before consumers, inputs in order)
    /// over everything reachable from `roots`.
    pub fn post_order(&self, roots: &[HopId]) -> Vec<HopId> {
        let mut visited = vec![false; self.nodes.len()];
        let mut out = Vec::new();
        for &r in roots {
            self.post_order_rec(r, &mut visited, &mut out);
        }
        out
    }

    fn post_order_rec(&self, id: HopId, visited: &mut [bool], out: &mut Vec<HopId>) {
        if visited[id.index()] {
            return;
        }
        visited[id.index()] = true;
        for &c in &self.hop(id).inputs {
            self.post_order_rec(c, visited, out);
        }
        out.push(id);
    }

    /// Post-order from the DAG's own roots.
    pub fn topo_order(&self) -> Vec<HopId> {
        self.post_order(&self.roots)
    }

    pub fn reachable(&self) -> HashSet<HopId> {
        self.topo_order().into_iter().collect()
    }

    // ---- edits ------------------------------------------------------------

    /// Replace every occurrence of `old` among `parent`'s inputs with `new`.
    pub fn replace_input(&mut self, parent: HopId, old: HopId, new: HopId) {
        let mut n = 0;
        for i in self.nodes[parent.index()].inputs.iter_mut() {
            if *i == old {
                *i = new;
                n += 1;
            }
        }
        for _ in 0..n {
            remove_one(&mut self.nodes[old.index()].parents, parent);
            self.nodes[new.index()].parents.push(parent);
        }
    }

    /// Append an input edge `parent -> input`.
    pub fn push_input(&mut self, parent: HopId, input: HopId) {
        self.nodes[parent.index()].inputs.push(input);
        self.nodes[input.index()].parents.push(parent);
    }

    /// Redirect every consumer of `old` (and any root slot) to `new`.
    pub fn rewire_all_parent_child_references(&mut self, old: HopId, new: HopId) {
        if old == new {
            return;
        }
        let mut parents = self.nodes[old.index()].parents.clone();
        parents.sort();
        parents.dedup();
        for p in parents {
            if p != new {
                self.replace_input(p, old, new);
            }
        }
        for r in self.roots.iter_mut() {
            if *r == old {
                *r = new;
            }
        }
    }

    /// Detach every node that is no longer reachable from the roots, so that
    /// parent lists only mention live consumers.
    pub fn prune_unreachable(&mut self) {
        let live = self.reachable();
        for idx in 0..self.nodes.len() {
            let id = HopId::new(idx as u64);
            if live.contains(&id) {
                continue;
            }
            let inputs = std::mem::take(&mut self.nodes[idx].inputs);
            for i in inputs {
                remove_one(&mut self.nodes[i.index()].parents, id);
            }
        }
        for idx in 0..self.nodes.len() {
            let id = HopId::new(idx as u64);
            if live.contains(&id) {
                self.nodes[idx].parents.retain(|p| live.contains(p));
            }
        }
    }

    /// Live parents (consumers reachable from the roots).
    pub fn parent_count(&self, id: HopId) -> usize {
        self.hop(id).parents.len()
    }

    // ---- checks -----------------------------------------------------------

    /// Fail if the live DAG contains a cycle.
    pub fn check_acyclic(&self) -> Result<()> {
        // 0 = unvisited, 1 = on stack, 2 = done
        let mut state = vec![0u8; self.nodes.len()];
        for &r in &self.roots {
            self.dfs_cycle(r, &mut state)?;
        }
        Ok(())
    }

    fn dfs_cycle(&self, id: HopId, state: &mut [u8]) -> Result<()> {
        match state[id.index()] {
            1 => return Err(Error::invariant(format!("cycle through {id}"))),
            2 => return Ok(()),
            _ => {}
        }
        state[id.index()] = 1;
        for &c in &self.hop(id).inputs {
            self.dfs_cycle(c, state)?;
        }
        state[id.index()] = 2;
        Ok(())
    }

    /// Every input edge of a live node has exactly one matching parent entry
    /// and no live node lists a parent that does not consume it.
    pub fn check_edges(&self) -> Result<()> {
        let live = self.reachable();
        for &id in &live {
            let h = self.hop(id);
            for &c in &h.inputs {
                let edges = h.inputs.iter().filter(|&&x| x == c).count();
                let back = self.hop(c).parents.iter().filter(|&&p| p == id).count();
                if edges != back {
                    return Err(Error::invariant(format!(
                        "edge {id} -> {c}: {edges} input slots but {back} parent entries"
                    )));
                }
            }
            for &p in &h.parents {
                if !live.contains(&p) {
                    return Err(Error::invariant(format!("{id} lists dead parent {p}")));
                }
                if !self.hop(p).inputs.contains(&id) {
                    return Err(Error::invariant(format!("{id} lists non-consumer {p}")));
                }
            }
        }
        Ok(())
    }

    /// Whether `hop` is `UNKNOWN`-free in both dims and nnz.
    pub fn fully_known(&self, id: HopId) -> bool {
        let s = self.hop(id).stats;
        s.dims_known() && s.nnz != UNKNOWN
    }
}

fn remove_one(v: &mut Vec<HopId>, x: HopId) {
    if let Some(pos) = v.iter().position(|&p| p == x) {
        v.remove(pos);
    }
}
