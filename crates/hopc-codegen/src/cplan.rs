//! Kernel plans: the expression DAG a fused operator evaluates.
//!
//! Nodes live in a per-plan arena and refer to each other by index; a node
//! only ever refers to nodes pushed before it. Kernel inputs are positional,
//! input 0 being the main input the kernel iterates over.

use std::collections::HashMap;

use serde::Serialize;

use hopc_core::error::Result;
use hopc_core::hash::{hash_serde, Hash256};
use hopc_core::id::HopId;
use hopc_core::stats::MatrixCharacteristics;
use hopc_core::types::{AggOp, DataType, OpOp1, OpOp2, TemplateType};
use hopc_hops::LiteralValue;

pub type CNodeId = usize;

/// How a side input is read relative to the main input's cell or row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum LookupKind {
    /// Column vector, indexed by row.
    R,
    /// Row vector, indexed by column.
    C,
    /// Same shape as the main input.
    RC,
    /// One fixed column (1-based), indexed by row.
    RC1 { col: i64 },
    /// Column range `[cl, cu]` (1-based, inclusive) of the current row.
    RVect1 { cl: i64, cu: i64 },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum CNode {
    Data { input: usize },
    Literal(LiteralValue),
    Unary { op: OpOp1, input: CNodeId },
    Binary { op: OpOp2, left: CNodeId, right: CNodeId },
    Lookup { kind: LookupKind, input: CNodeId },
    /// Aggregate of a row slice.
    RowAgg { op: AggOp, input: CNodeId },
    /// Dot product of the current row with a full vector.
    MatVec { matrix: CNodeId, vector: CNodeId },
    /// Dot product of a row of the left factor with a row of the right one.
    OuterDot { left: CNodeId, right: CNodeId },
}

impl CNode {
    pub fn children(&self) -> Vec<CNodeId> {
        match self {
            CNode::Data { .. } | CNode::Literal(_) => Vec::new(),
            CNode::Unary { input, .. } | CNode::Lookup { input, .. } | CNode::RowAgg { input, .. } => {
                vec![*input]
            }
            CNode::Binary { left, right, .. } => vec![*left, *right],
            CNode::MatVec { matrix, vector } => vec![*matrix, *vector],
            CNode::OuterDot { left, right } => vec![*left, *right],
        }
    }

    /// Copy with every child reference passed through `f`.
    pub fn map_children(&self, mut f: impl FnMut(CNodeId) -> CNodeId) -> CNode {
        match self {
            CNode::Data { .. } | CNode::Literal(_) => self.clone(),
            CNode::Unary { op, input } => CNode::Unary { op: *op, input: f(*input) },
            CNode::Binary { op, left, right } => CNode::Binary {
                op: *op,
                left: f(*left),
                right: f(*right),
            },
            CNode::Lookup { kind, input } => CNode::Lookup { kind: *kind, input: f(*input) },
            CNode::RowAgg { op, input } => CNode::RowAgg { op: *op, input: f(*input) },
            CNode::MatVec { matrix, vector } => CNode::MatVec {
                matrix: f(*matrix),
                vector: f(*vector),
            },
            CNode::OuterDot { left, right } => CNode::OuterDot {
                left: f(*left),
                right: f(*right),
            },
        }
    }

    /// Nodes that do arithmetic, as opposed to reading inputs.
    pub fn is_operation(&self) -> bool {
        !matches!(self, CNode::Data { .. } | CNode::Literal(_) | CNode::Lookup { .. })
    }

    fn key(&self) -> String {
        match self {
            CNode::Data { input } => format!("d{input}"),
            CNode::Literal(v) => format!("l{}", v.key()),
            CNode::Unary { op, input } => format!("u{}({input})", op.symbol()),
            CNode::Binary { op, left, right } => format!("b{}({left},{right})", op.symbol()),
            CNode::Lookup { kind, input } => format!("x{kind:?}({input})"),
            CNode::RowAgg { op, input } => format!("r{}({input})", op.symbol()),
            CNode::MatVec { matrix, vector } => format!("mv({matrix},{vector})"),
            CNode::OuterDot { left, right } => format!("od({left},{right})"),
        }
    }
}

/// Aggregation applied to the kernel output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum AggKind {
    NoAgg,
    Full(AggOp),
    Row(AggOp),
    Col(AggOp),
    /// `t(X) %*% out`: rows of the main input weighted by the output.
    ColT,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CInput {
    pub hop: HopId,
    pub data_type: DataType,
    pub stats: MatrixCharacteristics,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CPlan {
    pub template: TemplateType,
    pub agg: AggKind,
    /// Per-output aggregates of a multi-aggregate plan.
    pub multi_aggs: Vec<AggOp>,
    /// The fused operator computes the transpose of its root.
    pub transpose_output: bool,
    pub nodes: Vec<CNode>,
    pub outputs: Vec<CNodeId>,
    pub inputs: Vec<CInput>,
    /// Hops whose values the kernel replaces; several for multi-aggregates.
    pub roots: Vec<HopId>,
    pub class_name: String,
}

#[derive(Serialize)]
struct CanonicalPlan<'a> {
    template: TemplateType,
    agg: AggKind,
    multi_aggs: &'a [AggOp],
    transpose_output: bool,
    nodes: &'a [CNode],
    outputs: &'a [CNodeId],
    inputs: Vec<DataType>,
}

impl CPlan {
    pub fn new(template: TemplateType) -> Self {
        Self {
            template,
            agg: AggKind::NoAgg,
            multi_aggs: Vec::new(),
            transpose_output: false,
            nodes: Vec::new(),
            outputs: Vec::new(),
            inputs: Vec::new(),
            roots: Vec::new(),
            class_name: String::new(),
        }
    }

    pub fn push(&mut self, node: CNode) -> CNodeId {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    pub fn node(&self, id: CNodeId) -> &CNode {
        &self.nodes[id]
    }

    /// Index of `hop` among the kernel inputs, adding it if new.
    pub fn input_index(&mut self, hop: HopId, data_type: DataType, stats: MatrixCharacteristics) -> usize {
        if let Some(pos) = self.inputs.iter().position(|i| i.hop == hop) {
            return pos;
        }
        self.inputs.push(CInput {
            hop,
            data_type,
            stats,
        });
        self.inputs.len() - 1
    }

    pub fn input_hops(&self) -> Vec<HopId> {
        self.inputs.iter().map(|i| i.hop).collect()
    }

    pub fn main_input(&self) -> Option<&CInput> {
        self.inputs.first()
    }

    /// Nodes reachable from the outputs, children first.
    pub fn reachable(&self) -> Vec<CNodeId> {
        let mut seen = vec![false; self.nodes.len()];
        let mut order = Vec::new();
        for &o in &self.outputs {
            self.reachable_rec(o, &mut seen, &mut order);
        }
        order
    }

    fn reachable_rec(&self, id: CNodeId, seen: &mut [bool], order: &mut Vec<CNodeId>) {
        if seen[id] {
            return;
        }
        seen[id] = true;
        for c in self.nodes[id].children() {
            self.reachable_rec(c, seen, order);
        }
        order.push(id);
    }

    pub fn count_operations(&self) -> usize {
        self.reachable()
            .into_iter()
            .filter(|&n| self.nodes[n].is_operation())
            .count()
    }

    /// Inputs referenced by some reachable `Data` node.
    pub fn referenced_inputs(&self) -> Vec<bool> {
        let mut used = vec![false; self.inputs.len()];
        for n in self.reachable() {
            if let CNode::Data { input } = self.nodes[n] {
                used[input] = true;
            }
        }
        used
    }

    /// Rebuild the arena from the outputs, keeping only reachable nodes.
    /// `rewrite` may replace a node (children already remapped) by an
    /// existing node of the new arena; identical nodes are shared when
    /// `share` is set.
    pub fn rebuild(
        &mut self,
        share: bool,
        mut rewrite: impl FnMut(&CNode, &[CNode]) -> Option<CNodeOrRef>,
    ) -> usize {
        let order = self.reachable();
        let mut map: HashMap<CNodeId, CNodeId> = HashMap::new();
        let mut keys: HashMap<String, CNodeId> = HashMap::new();
        let mut nodes: Vec<CNode> = Vec::with_capacity(order.len());
        let mut shared = 0;

        for old in order {
            let mut node = self.nodes[old].map_children(|c| map[&c]);
            match rewrite(&node, &nodes) {
                Some(CNodeOrRef::Ref(existing)) => {
                    map.insert(old, existing);
                    continue;
                }
                Some(CNodeOrRef::Node(n)) => node = n,
                None => {}
            }
            if share {
                let key = node.key();
                if let Some(&existing) = keys.get(&key) {
                    map.insert(old, existing);
                    shared += 1;
                    continue;
                }
                keys.insert(key, nodes.len());
            }
            nodes.push(node);
            map.insert(old, nodes.len() - 1);
        }

        self.outputs = self.outputs.iter().map(|o| map[o]).collect();
        self.nodes = nodes;
        shared
    }

    /// Drop unreferenced inputs, keeping the relative order of the rest.
    pub fn prune_inputs(&mut self) {
        let used = self.referenced_inputs();
        if used.iter().all(|&u| u) {
            return;
        }
        let mut remap = vec![usize::MAX; self.inputs.len()];
        let mut next = 0;
        for (i, &u) in used.iter().enumerate() {
            if u {
                remap[i] = next;
                next += 1;
            }
        }
        let mut idx = 0;
        self.inputs.retain(|_| {
            let keep = used[idx];
            idx += 1;
            keep
        });
        for node in self.nodes.iter_mut() {
            if let CNode::Data { input } = node {
                if remap[*input] != usize::MAX {
                    *input = remap[*input];
                }
            }
        }
    }

    /// Move input `pos` to the front.
    pub fn set_main_input(&mut self, pos: usize) {
        if pos == 0 || pos >= self.inputs.len() {
            return;
        }
        let inp = self.inputs.remove(pos);
        self.inputs.insert(0, inp);
        for node in self.nodes.iter_mut() {
            if let CNode::Data { input } = node {
                *input = match *input {
                    i if i == pos => 0,
                    i if i < pos => i + 1,
                    i => i,
                };
            }
        }
    }

    /// Hash of the input-renamed plan: hop ids and statistics are left out,
    /// so structurally identical plans from different DAGs share a key.
    pub fn canonical_hash(&self) -> Result<Hash256> {
        let inputs = self.inputs.iter().map(|i| i.data_type).collect();
        hash_serde(&CanonicalPlan {
            template: self.template,
            agg: self.agg,
            multi_aggs: &self.multi_aggs,
            transpose_output: self.transpose_output,
            nodes: &self.nodes,
            outputs: &self.outputs,
            inputs,
        })
    }

    /// Kernel class name derived from the canonical hash.
    pub fn assign_class_name(&mut self) -> Result<Hash256> {
        let h = self.canonical_hash()?;
        self.class_name = format!("TMP{}", h.short());
        Ok(h)
    }

    pub fn explain(&self) -> String {
        let mut s = format!(
            "{} {} agg={:?} inputs=[{}]\n",
            self.template,
            self.class_name,
            self.agg,
            self.inputs
                .iter()
                .map(|i| i.hop.get().to_string())
                .collect::<Vec<_>>()
                .join(",")
        );
        for n in self.reachable() {
            let out = if self.outputs.contains(&n) { " *" } else { "" };
            s.push_str(&format!("  ({n}) {}{out}\n", self.nodes[n].key()));
        }
        s
    }
}

/// Replacement produced by a [`CPlan::rebuild`] rewrite.
pub enum CNodeOrRef {
    Node(CNode),
    Ref(CNodeId),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(lit: f64) -> CPlan {
        let mut p = CPlan::new(TemplateType::Cell);
        let s = MatrixCharacteristics::new(10, 10, -1, 1000);
        let x = p.input_index(HopId::new(3), DataType::Matrix, s);
        let d = p.push(CNode::Data { input: x });
        let l = p.push(CNode::Literal(LiteralValue::Float(lit)));
        let m = p.push(CNode::Binary {
            op: OpOp2::Mult,
            left: d,
            right: l,
        });
        let e = p.push(CNode::Unary { op: OpOp1::Exp, input: m });
        p.outputs.push(e);
        p
    }

    #[test]
    fn canonical_hash_ignores_hop_ids() {
        let a = sample(2.0);
        let mut b = sample(2.0);
        b.inputs[0].hop = HopId::new(99);
        b.inputs[0].stats = MatrixCharacteristics::new(5, 5, -1, 1000);
        assert_eq!(a.canonical_hash().unwrap(), b.canonical_hash().unwrap());
        assert_ne!(a.canonical_hash().unwrap(), sample(3.0).canonical_hash().unwrap());
    }

    #[test]
    fn rebuild_shares_identical_nodes() {
        let mut p = CPlan::new(TemplateType::Cell);
        let s = MatrixCharacteristics::new(10, 10, -1, 1000);
        let x = p.input_index(HopId::new(1), DataType::Matrix, s);
        let d1 = p.push(CNode::Data { input: x });
        let d2 = p.push(CNode::Data { input: x });
        let e1 = p.push(CNode::Unary { op: OpOp1::Exp, input: d1 });
        let e2 = p.push(CNode::Unary { op: OpOp1::Exp, input: d2 });
        let sum = p.push(CNode::Binary {
            op: OpOp2::Plus,
            left: e1,
            right: e2,
        });
        p.outputs.push(sum);
        assert_eq!(p.rebuild(true, |_, _| None), 2);
        assert_eq!(p.nodes.len(), 3);
        assert_eq!(p.count_operations(), 2);
    }

    #[test]
    fn main_input_moves_to_front() {
        let mut p = CPlan::new(TemplateType::Cell);
        let s = MatrixCharacteristics::new(10, 10, -1, 1000);
        let a = p.input_index(HopId::new(1), DataType::Matrix, s);
        let b = p.input_index(HopId::new(2), DataType::Matrix, s);
        let da = p.push(CNode::Data { input: a });
        let db = p.push(CNode::Data { input: b });
        let m = p.push(CNode::Binary {
            op: OpOp2::Minus,
            left: da,
            right: db,
        });
        p.outputs.push(m);
        p.set_main_input(1);
        assert_eq!(p.input_hops(), vec![HopId::new(2), HopId::new(1)]);
        assert_eq!(p.nodes[da], CNode::Data { input: 1 });
        assert_eq!(p.nodes[db], CNode::Data { input: 0 });
    }
}
