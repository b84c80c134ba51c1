//! Plan selection policies.
//!
//! Every policy assigns at most one plan per hop ([`FusionMemo::set_best`]);
//! plan construction then walks top-down from the roots and only builds
//! plans for hops that are not fused into a consumer's plan.

use std::collections::HashSet;

use hopc_core::config::PlanSelector;
use hopc_core::id::HopId;
use hopc_core::types::{Direction, ExecType, TemplateType};
use hopc_hops::{HopDag, HopKind};
use hopc_mem::{estimate_size, DEFAULT_SIZE};

use crate::memo::{FusionMemo, MemoEntry};

/// Bytes-equivalent cost of recomputing one cell inside a kernel.
const COMPUTE_COST_PER_CELL: f64 = 1.0;

/// Penalty on writing and re-reading intermediates of distributed operators.
const DISTRIBUTED_IO_FACTOR: f64 = 2.0;

pub trait PlanSelection {
    fn select(&self, dag: &HopDag, memo: &mut FusionMemo, roots: &[HopId]);
}

pub fn selection_for(selector: PlanSelector) -> Box<dyn PlanSelection> {
    match selector {
        PlanSelector::FuseAll => Box::new(FuseAll),
        PlanSelector::FuseNoRedundancy => Box::new(FuseNoRedundancy),
        PlanSelector::FuseCostBased => Box::new(FuseCostBased),
        PlanSelector::FuseCostBasedV2 => Box::new(FuseCostBasedV2),
    }
}

/// Greedy: the valid plan fusing the most inputs.
pub struct FuseAll;

/// Like [`FuseAll`], but never fuses an input that has other consumers.
pub struct FuseNoRedundancy;

/// Per plan, trades the saved write and read of each fused intermediate
/// against recomputing intermediates with several consumers.
pub struct FuseCostBased;

/// [`FuseCostBased`], then fuses a shared intermediate into all of its
/// consumers when that removes its materialization altogether, and groups
/// independent full aggregates over the same inputs into multi-aggregates.
pub struct FuseCostBasedV2;

impl PlanSelection for FuseAll {
    fn select(&self, dag: &HopDag, memo: &mut FusionMemo, roots: &[HopId]) {
        select_per_hop(dag, memo, roots, |_, _| true, |_, e| e.count_fused() as f64);
    }
}

impl PlanSelection for FuseNoRedundancy {
    fn select(&self, dag: &HopDag, memo: &mut FusionMemo, roots: &[HopId]) {
        select_per_hop(
            dag,
            memo,
            roots,
            |dag, e| e.fused_inputs().all(|c| dag.parent_count(c) <= 1),
            |_, e| e.count_fused() as f64,
        );
    }
}

impl PlanSelection for FuseCostBased {
    fn select(&self, dag: &HopDag, memo: &mut FusionMemo, roots: &[HopId]) {
        select_per_hop(dag, memo, roots, |_, _| true, plan_benefit);
        group_multi_aggregates(dag, memo, roots);
    }
}

impl PlanSelection for FuseCostBasedV2 {
    fn select(&self, dag: &HopDag, memo: &mut FusionMemo, roots: &[HopId]) {
        select_per_hop(dag, memo, roots, |_, _| true, plan_benefit);
        fuse_shared_intermediates(dag, memo, roots);
        group_multi_aggregates(dag, memo, roots);
    }
}

// ---- shared machinery ---------------------------------------------------------

fn template_rank(t: TemplateType) -> u8 {
    match t {
        TemplateType::Cell => 1,
        TemplateType::Row => 2,
        TemplateType::Outer => 3,
        TemplateType::MultiAgg => 4,
    }
}

fn better(score: f64, e: &MemoEntry, best: Option<(f64, &MemoEntry)>) -> bool {
    match best {
        None => true,
        Some((bs, b)) => {
            if score != bs {
                return score > bs;
            }
            if e.count_fused() != b.count_fused() {
                return e.count_fused() > b.count_fused();
            }
            template_rank(e.template) > template_rank(b.template)
        }
    }
}

fn pick<'a>(
    dag: &HopDag,
    entries: impl Iterator<Item = &'a MemoEntry>,
    score: &impl Fn(&HopDag, &MemoEntry) -> f64,
) -> Option<MemoEntry> {
    let mut best: Option<(f64, &MemoEntry)> = None;
    for e in entries {
        let s = score(dag, e);
        if better(s, e, best) {
            best = Some((s, e));
        }
    }
    best.map(|(_, e)| e.clone())
}

fn select_per_hop(
    dag: &HopDag,
    memo: &mut FusionMemo,
    roots: &[HopId],
    allowed: impl Fn(&HopDag, &MemoEntry) -> bool,
    score: impl Fn(&HopDag, &MemoEntry) -> f64,
) {
    for id in dag.post_order(roots) {
        let chosen = pick(
            dag,
            memo.entries(id)
                .iter()
                .filter(|e| e.close.is_valid() && allowed(dag, e)),
            &score,
        );
        if let Some(e) = chosen {
            memo.set_best(id, e);
        }
    }
}

fn output_bytes(dag: &HopDag, id: HopId) -> f64 {
    let h = dag.hop(id);
    if h.is_scalar() {
        8.0
    } else if h.mem.output > 0.0 {
        h.mem.output
    } else {
        estimate_size(h.rows(), h.cols())
    }
}

/// Cost of writing an intermediate and reading it back.
fn materialization_cost(dag: &HopDag, id: HopId) -> f64 {
    let factor = if dag.hop(id).exec_type == Some(ExecType::Distributed) {
        DISTRIBUTED_IO_FACTOR
    } else {
        1.0
    };
    2.0 * output_bytes(dag, id) * factor
}

fn compute_cost(dag: &HopDag, id: HopId) -> f64 {
    match dag.hop(id).stats.cells() {
        Some(cells) => cells as f64 * COMPUTE_COST_PER_CELL,
        None => DEFAULT_SIZE / 8.0,
    }
}

fn plan_benefit(dag: &HopDag, e: &MemoEntry) -> f64 {
    let mut seen = HashSet::new();
    e.fused_inputs()
        .filter(|c| seen.insert(*c))
        .map(|c| {
            if dag.parent_count(c) <= 1 {
                materialization_cost(dag, c)
            } else {
                -compute_cost(dag, c)
            }
        })
        .sum()
}

/// Fuse an intermediate with several consumers into every consumer when
/// each of them has a valid plan for it and the saved materialization
/// outweighs the redundant computation.
fn fuse_shared_intermediates(dag: &HopDag, memo: &mut FusionMemo, roots: &[HopId]) {
    for c in dag.post_order(roots) {
        let mut parents = dag.hop(c).parents.clone();
        parents.sort();
        parents.dedup();
        if parents.len() < 2 || !memo.contains(c) {
            continue;
        }
        let gain = materialization_cost(dag, c) - (parents.len() - 1) as f64 * compute_cost(dag, c);
        if gain <= 0.0 {
            continue;
        }
        let mut switched = Vec::with_capacity(parents.len());
        for &p in &parents {
            let choice = pick(
                dag,
                memo.entries(p)
                    .iter()
                    .filter(|e| e.close.is_valid() && e.fuses(c)),
                &plan_benefit,
            );
            match choice {
                Some(e) => switched.push((p, e)),
                None => break,
            }
        }
        if switched.len() == parents.len() {
            tracing::debug!(hop = %c, consumers = parents.len(), gain, "fusing shared intermediate");
            for (p, e) in switched {
                memo.set_best(p, e);
            }
        }
    }
}

fn full_aggregate_root(dag: &HopDag, memo: &FusionMemo, id: HopId) -> bool {
    let cell_best = memo
        .best(id)
        .map(|e| e.template == TemplateType::Cell)
        .unwrap_or(false);
    cell_best
        && matches!(
            dag.hop(id).kind,
            HopKind::AggUnary { op, dir: Direction::RowCol } if op.is_fusable()
        )
}

/// Matrix inputs a cell plan would read, sorted.
fn plan_leaves(dag: &HopDag, memo: &FusionMemo, id: HopId) -> Vec<HopId> {
    let mut out = Vec::new();
    if let Some(e) = memo.best(id) {
        collect_leaves(dag, memo, id, e, &mut out);
    }
    out.sort();
    out.dedup();
    out
}

fn collect_leaves(dag: &HopDag, memo: &FusionMemo, id: HopId, e: &MemoEntry, out: &mut Vec<HopId>) {
    for (k, &c) in dag.hop(id).inputs.iter().enumerate() {
        if e.is_fused(k) {
            if let Some(ce) = memo.entry_for(c, e.template) {
                collect_leaves(dag, memo, c, &ce, out);
            }
        } else if dag.hop(c).is_matrix() {
            out.push(c);
        }
    }
}

fn depends_on(dag: &HopDag, a: HopId, b: HopId) -> bool {
    dag.post_order(&[a]).contains(&b)
}

fn group_multi_aggregates(dag: &HopDag, memo: &mut FusionMemo, roots: &[HopId]) {
    let mut groups: Vec<(Vec<HopId>, Vec<HopId>)> = Vec::new();
    for id in dag.post_order(roots) {
        if !full_aggregate_root(dag, memo, id) {
            continue;
        }
        let leaves = plan_leaves(dag, memo, id);
        if leaves.is_empty() {
            continue;
        }
        let slot = groups.iter_mut().find(|(key, members)| {
            *key == leaves
                && members
                    .iter()
                    .all(|&m| !depends_on(dag, m, id) && !depends_on(dag, id, m))
        });
        match slot {
            Some((_, members)) => members.push(id),
            None => groups.push((leaves, vec![id])),
        }
    }
    for (_, members) in groups {
        if members.len() >= 2 {
            tracing::debug!(aggregates = members.len(), "multi-aggregate group");
            memo.add_multi_agg(members);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memo::CloseType;

    fn entry(t: TemplateType, fused: &[Option<HopId>]) -> MemoEntry {
        MemoEntry {
            template: t,
            fused: fused.to_vec(),
            close: CloseType::Open,
        }
    }

    #[test]
    fn fuse_all_prefers_more_fused_inputs() {
        let mut dag = HopDag::new();
        let x = dag.read("X", 10, 10, -1).unwrap();
        let e = dag.unary(hopc_core::types::OpOp1::Exp, x).unwrap();
        let l = dag.unary(hopc_core::types::OpOp1::Log, e).unwrap();
        dag.write("Y", l).unwrap();
        let mut memo = FusionMemo::new();
        memo.add_all(
            l,
            vec![
                entry(TemplateType::Cell, &[None]),
                entry(TemplateType::Cell, &[Some(e)]),
            ],
        );
        FuseAll.select(&dag, &mut memo, &dag.roots().to_vec());
        assert_eq!(memo.best(l).unwrap().count_fused(), 1);
    }

    #[test]
    fn no_redundancy_skips_shared_inputs() {
        let mut dag = HopDag::new();
        let x = dag.read("X", 10, 10, -1).unwrap();
        let e = dag.unary(hopc_core::types::OpOp1::Exp, x).unwrap();
        let l = dag.unary(hopc_core::types::OpOp1::Log, e).unwrap();
        dag.write("Y", l).unwrap();
        dag.write("Z", e).unwrap();
        let mut memo = FusionMemo::new();
        memo.add_all(
            l,
            vec![
                entry(TemplateType::Cell, &[None]),
                entry(TemplateType::Cell, &[Some(e)]),
            ],
        );
        let roots = dag.roots().to_vec();
        FuseNoRedundancy.select(&dag, &mut memo, &roots);
        assert_eq!(memo.best(l).unwrap().count_fused(), 0);

        FuseAll.select(&dag, &mut memo, &roots);
        assert_eq!(memo.best(l).unwrap().count_fused(), 1);
    }

    #[test]
    fn open_invalid_plans_are_never_selected() {
        let mut dag = HopDag::new();
        let x = dag.read("X", 10, 10, -1).unwrap();
        let e = dag.unary(hopc_core::types::OpOp1::Exp, x).unwrap();
        dag.write("Y", e).unwrap();
        let mut memo = FusionMemo::new();
        let mut bad = entry(TemplateType::Outer, &[None]);
        bad.close = CloseType::OpenInvalid;
        memo.add_all(e, vec![bad]);
        FuseCostBasedV2.select(&dag, &mut memo, &dag.roots().to_vec());
        assert!(memo.best(e).is_none());
    }
}
