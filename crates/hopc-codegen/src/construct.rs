//! Kernel plan construction from the selected memo entries.

use std::collections::HashSet;

use hopc_core::error::{Error, Result};
use hopc_core::id::HopId;
use hopc_core::stats::MatrixCharacteristics;
use hopc_core::types::{DataType, Direction, ReorgOp, TemplateType};
use hopc_hops::{HopDag, HopKind};

use crate::cplan::{AggKind, CNode, CNodeId, CPlan, LookupKind};
use crate::memo::{FusionMemo, MemoEntry};
use crate::template::is_transposed_left_matmult;

/// Walk down from the roots and build one plan per top-level selected hop.
/// Inputs of a built plan are visited next; hops fused into a plan are not.
pub fn construct_plans(
    dag: &HopDag,
    memo: &FusionMemo,
    roots: &[HopId],
    compile_literals: bool,
) -> Result<Vec<CPlan>> {
    let mut visited = HashSet::new();
    let mut out = Vec::new();
    for &r in roots {
        construct_rec(dag, memo, r, compile_literals, &mut visited, &mut out)?;
    }
    Ok(out)
}

fn construct_rec(
    dag: &HopDag,
    memo: &FusionMemo,
    id: HopId,
    compile_literals: bool,
    visited: &mut HashSet<HopId>,
    out: &mut Vec<CPlan>,
) -> Result<()> {
    if !visited.insert(id) {
        return Ok(());
    }

    let next: Vec<HopId> = if let Some(group) = memo.multi_agg_group(id) {
        visited.extend(group.iter().copied());
        let plan = build_multi_agg(dag, memo, group, compile_literals)?;
        let inputs = plan.input_hops();
        out.push(plan);
        inputs
    } else if let Some(entry) = memo.best(id) {
        let plan = build_plan(dag, memo, id, entry, compile_literals)?;
        let inputs = plan.input_hops();
        out.push(plan);
        inputs
    } else {
        dag.hop(id).inputs.clone()
    };

    for c in next {
        construct_rec(dag, memo, c, compile_literals, visited, out)?;
    }
    Ok(())
}

/// Plan rooted at `root` for the given memo entry.
pub fn build_plan(
    dag: &HopDag,
    memo: &FusionMemo,
    root: HopId,
    entry: &MemoEntry,
    compile_literals: bool,
) -> Result<CPlan> {
    let mut b = PlanBuilder {
        dag,
        memo,
        compile_literals,
        plan: CPlan::new(entry.template),
        main: None,
    };
    let out = b.node(root, entry, true)?;
    b.plan.outputs.push(out);
    b.plan.roots.push(root);
    b.finish(root)
}

/// One plan computing several independent full aggregates over shared
/// inputs; the outputs follow the order of `members`.
pub fn build_multi_agg(
    dag: &HopDag,
    memo: &FusionMemo,
    members: &[HopId],
    compile_literals: bool,
) -> Result<CPlan> {
    let mut plan = CPlan::new(TemplateType::MultiAgg);
    let mut main: Option<HopId> = None;

    for &m in members {
        let entry = memo
            .best(m)
            .ok_or_else(|| Error::invariant(format!("multi-aggregate member {m} has no plan")))?;
        let sub = build_plan(dag, memo, m, entry, compile_literals)?;
        let AggKind::Full(op) = sub.agg else {
            return Err(Error::invariant(format!("{m} is not a full aggregate")));
        };
        if main.is_none() {
            main = sub.main_input().map(|i| i.hop);
        }
        let remap: Vec<usize> = sub
            .inputs
            .iter()
            .map(|i| plan.input_index(i.hop, i.data_type, i.stats))
            .collect();
        let offset = plan.nodes.len();
        for node in &sub.nodes {
            let node = match node {
                CNode::Data { input } => CNode::Data { input: remap[*input] },
                other => other.map_children(|c| c + offset),
            };
            plan.push(node);
        }
        for &o in &sub.outputs {
            plan.outputs.push(o + offset);
        }
        plan.multi_aggs.push(op);
        plan.roots.push(m);
    }

    if let Some(pos) = main.and_then(|m| plan.inputs.iter().position(|i| i.hop == m)) {
        plan.set_main_input(pos);
    }
    Ok(plan)
}

struct PlanBuilder<'a> {
    dag: &'a HopDag,
    memo: &'a FusionMemo,
    compile_literals: bool,
    plan: CPlan,
    main: Option<HopId>,
}

impl PlanBuilder<'_> {
    fn node(&mut self, id: HopId, entry: &MemoEntry, is_root: bool) -> Result<CNodeId> {
        let dag = self.dag;
        let hop = dag.hop(id);
        let t = self.plan.template;

        match &hop.kind {
            HopKind::Unary(op) => {
                let input = self.child(id, entry, 0)?;
                Ok(self.plan.push(CNode::Unary { op: *op, input }))
            }
            HopKind::Binary { op, outer: false } => {
                if t == TemplateType::Outer {
                    if let Some(k) = (0..2).find(|&k| !entry.is_fused(k)) {
                        self.main.get_or_insert(hop.inputs[k]);
                    }
                }
                let left = self.child(id, entry, 0)?;
                let right = self.child(id, entry, 1)?;
                Ok(self.plan.push(CNode::Binary { op: *op, left, right }))
            }
            HopKind::AggUnary { op, dir } => {
                if t == TemplateType::Row && *dir == Direction::Row {
                    let input = self.child(id, entry, 0)?;
                    return Ok(self.plan.push(CNode::RowAgg { op: *op, input }));
                }
                if !is_root {
                    return Err(Error::invariant(format!("aggregate {id} inside a {t} plan")));
                }
                self.plan.agg = match dir {
                    Direction::RowCol => AggKind::Full(*op),
                    Direction::Row => AggKind::Row(*op),
                    Direction::Col => AggKind::Col(*op),
                };
                self.child(id, entry, 0)
            }
            HopKind::MatMult if t == TemplateType::Row => {
                if is_transposed_left_matmult(dag, hop) {
                    if !is_root {
                        return Err(Error::invariant(format!("t(X) %*% y at {id} inside a row plan")));
                    }
                    let x = dag.hop(hop.inputs[0]).inputs[0];
                    self.main.get_or_insert(x);
                    self.data(x);
                    self.plan.agg = AggKind::ColT;
                    return self.child(id, entry, 1);
                }
                let x = hop.inputs[0];
                self.main.get_or_insert(x);
                let matrix = self.data(x);
                let vector = if entry.is_fused(1) {
                    self.child(id, entry, 1)?
                } else {
                    self.data(hop.inputs[1])
                };
                Ok(self.plan.push(CNode::MatVec { matrix, vector }))
            }
            HopKind::MatMult if t == TemplateType::Outer => {
                let u = hop.inputs[0];
                let v = dag.hop(hop.inputs[1]).inputs[0];
                let left = self.data(u);
                let right = self.data(v);
                Ok(self.plan.push(CNode::OuterDot { left, right }))
            }
            HopKind::Reorg(ReorgOp::Transpose) if t == TemplateType::Outer && is_root => {
                self.plan.transpose_output = true;
                self.child(id, entry, 0)
            }
            HopKind::Index {
                col_lower,
                col_upper,
                ..
            } => {
                let kind = match t {
                    TemplateType::Row => LookupKind::RVect1 {
                        cl: *col_lower,
                        cu: *col_upper,
                    },
                    _ => LookupKind::RC1 { col: *col_lower },
                };
                let input = self.data(hop.inputs[0]);
                Ok(self.plan.push(CNode::Lookup { kind, input }))
            }
            other => Err(Error::invariant(format!(
                "{} at {id} cannot be part of a {t} plan",
                other.opcode()
            ))),
        }
    }

    fn child(&mut self, id: HopId, entry: &MemoEntry, pos: usize) -> Result<CNodeId> {
        let c = self.dag.hop(id).inputs[pos];
        if entry.is_fused(pos) {
            let ce = self
                .memo
                .entry_for(c, self.plan.template)
                .ok_or_else(|| Error::invariant(format!("{c} is fused but has no {} plan", self.plan.template)))?;
            self.node(c, &ce, false)
        } else {
            Ok(self.leaf(c))
        }
    }

    fn leaf(&mut self, c: HopId) -> CNodeId {
        let h = self.dag.hop(c);
        if let HopKind::Literal(v) = &h.kind {
            if self.compile_literals {
                return self.plan.push(CNode::Literal(v.clone()));
            }
        }
        let is_matrix = h.is_matrix();
        let d = self.data(c);
        if is_matrix {
            // RC is provisional; finish() classifies against the main input.
            self.plan.push(CNode::Lookup {
                kind: LookupKind::RC,
                input: d,
            })
        } else {
            d
        }
    }

    fn data(&mut self, c: HopId) -> CNodeId {
        let h = self.dag.hop(c);
        let input = self.plan.input_index(c, h.data_type, h.stats);
        self.plan.push(CNode::Data { input })
    }

    fn finish(mut self, root: HopId) -> Result<CPlan> {
        let pos = match self.main {
            Some(m) => self.plan.inputs.iter().position(|i| i.hop == m),
            None => self.infer_main_input(root),
        };
        if let Some(pos) = pos {
            self.plan.set_main_input(pos);
        }
        classify_lookups(&mut self.plan);
        Ok(self.plan)
    }

    /// First matrix input with the shape the kernel iterates over, else the
    /// largest matrix input.
    fn infer_main_input(&self, root: HopId) -> Option<usize> {
        let hop = self.dag.hop(root);
        let driver = match hop.kind {
            HopKind::AggUnary { .. } => self.dag.input(root, 0).stats,
            _ => hop.stats,
        };
        let matrices = || {
            self.plan
                .inputs
                .iter()
                .enumerate()
                .filter(|(_, i)| i.data_type == DataType::Matrix)
        };
        matrices()
            .find(|(_, i)| i.stats.dims_known() && i.stats.rows == driver.rows && i.stats.cols == driver.cols)
            .or_else(|| {
                let mut best: Option<(usize, i64)> = None;
                for (pos, i) in matrices() {
                    let cells = i.stats.cells().unwrap_or(i64::MAX);
                    if best.map(|(_, c)| cells > c).unwrap_or(true) {
                        best = Some((pos, cells));
                    }
                }
                best.map(|(pos, _)| (pos, &self.plan.inputs[pos]))
            })
            .map(|(pos, _)| pos)
    }
}

fn classify(side: &MatrixCharacteristics, main: &MatrixCharacteristics) -> LookupKind {
    if side.rows == main.rows && side.cols == 1 && main.cols > 1 {
        LookupKind::R
    } else if side.rows == 1 && side.cols == main.cols && main.rows > 1 {
        LookupKind::C
    } else {
        LookupKind::RC
    }
}

/// Resolve provisional cell lookups against the main input's shape.
pub(crate) fn classify_lookups(plan: &mut CPlan) {
    let Some(main) = plan.main_input().map(|i| i.stats) else {
        return;
    };
    for idx in 0..plan.nodes.len() {
        let CNode::Lookup { kind, input } = plan.nodes[idx] else {
            continue;
        };
        if !matches!(kind, LookupKind::R | LookupKind::C | LookupKind::RC) {
            continue;
        }
        let CNode::Data { input: i } = plan.nodes[input] else {
            continue;
        };
        let kind = classify(&plan.inputs[i].stats, &main);
        plan.nodes[idx] = CNode::Lookup { kind, input };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memo::CloseType;
    use hopc_core::types::{AggOp, OpOp1, OpOp2};

    fn cell(fused: Vec<Option<HopId>>) -> MemoEntry {
        MemoEntry {
            template: TemplateType::Cell,
            fused,
            close: CloseType::Open,
        }
    }

    #[test]
    fn cell_plan_with_vector_side_input() {
        let mut dag = HopDag::new();
        let x = dag.read("X", 100, 20, -1).unwrap();
        let v = dag.read("v", 100, 1, -1).unwrap();
        let p = dag.binary(OpOp2::Plus, x, v).unwrap();
        let e = dag.unary(OpOp1::Exp, p).unwrap();
        let s = dag.agg(AggOp::Sum, Direction::RowCol, e).unwrap();
        dag.write("s", s).unwrap();
        hopc_hops::propagate_sizes(&mut dag);

        let mut memo = FusionMemo::new();
        memo.add_all(p, vec![cell(vec![None, None])]);
        memo.add_all(e, vec![cell(vec![Some(p)])]);
        memo.set_best(s, cell(vec![Some(e)]));

        let plan = build_plan(&dag, &memo, s, memo.best(s).unwrap(), true).unwrap();
        assert_eq!(plan.agg, AggKind::Full(AggOp::Sum));
        assert_eq!(plan.input_hops(), vec![x, v]);
        assert_eq!(plan.count_operations(), 2);
        let kinds: Vec<LookupKind> = plan
            .nodes
            .iter()
            .filter_map(|n| match n {
                CNode::Lookup { kind, .. } => Some(*kind),
                _ => None,
            })
            .collect();
        assert_eq!(kinds, vec![LookupKind::RC, LookupKind::R]);
    }

    #[test]
    fn construction_stops_at_plan_inputs() {
        let mut dag = HopDag::new();
        let x = dag.read("X", 100, 20, -1).unwrap();
        let e = dag.unary(OpOp1::Exp, x).unwrap();
        let l = dag.unary(OpOp1::Log, e).unwrap();
        dag.write("Y", l).unwrap();
        hopc_hops::propagate_sizes(&mut dag);

        let mut memo = FusionMemo::new();
        memo.add_all(e, vec![cell(vec![None])]);
        memo.set_best(e, cell(vec![None]));
        memo.set_best(l, cell(vec![Some(e)]));
        let roots = dag.roots().to_vec();
        let plans = construct_plans(&dag, &memo, &roots, true).unwrap();
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].roots, vec![l]);
        assert_eq!(plans[0].input_hops(), vec![x]);
    }
}
