//! Memo table of candidate fusion plans per hop.

use std::collections::{BTreeMap, HashSet};

use hopc_core::id::HopId;
use hopc_core::types::TemplateType;
use hopc_hops::HopDag;

use crate::template::Template;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseType {
    /// Can be extended and is a valid plan as is.
    Open,
    /// Can be extended but is not a valid plan on its own.
    OpenInvalid,
    ClosedValid,
    ClosedInvalid,
}

impl CloseType {
    pub fn is_closed(self) -> bool {
        matches!(self, CloseType::ClosedValid | CloseType::ClosedInvalid)
    }

    pub fn is_valid(self) -> bool {
        matches!(self, CloseType::Open | CloseType::ClosedValid)
    }
}

/// One candidate plan rooted at a hop: its template and, per input
/// position, whether that input's plan is fused into it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemoEntry {
    pub template: TemplateType,
    pub fused: Vec<Option<HopId>>,
    pub close: CloseType,
}

impl MemoEntry {
    pub fn new(template: TemplateType, arity: usize) -> Self {
        Self {
            template,
            fused: vec![None; arity],
            close: CloseType::Open,
        }
    }

    pub fn is_fused(&self, pos: usize) -> bool {
        self.fused.get(pos).map(|f| f.is_some()).unwrap_or(false)
    }

    pub fn count_fused(&self) -> usize {
        self.fused.iter().filter(|f| f.is_some()).count()
    }

    pub fn fused_inputs(&self) -> impl Iterator<Item = HopId> + '_ {
        self.fused.iter().filter_map(|f| *f)
    }

    pub fn fuses(&self, input: HopId) -> bool {
        self.fused.contains(&Some(input))
    }

    /// Same template and a strict superset of the fused positions.
    pub fn subsumes(&self, other: &MemoEntry) -> bool {
        self.template == other.template
            && self.count_fused() > other.count_fused()
            && other
                .fused
                .iter()
                .enumerate()
                .all(|(i, f)| f.is_none() || self.is_fused(i))
    }
}

#[derive(Debug, Default)]
pub struct FusionMemo {
    plans: BTreeMap<HopId, Vec<MemoEntry>>,
    visited: HashSet<HopId>,
    best: BTreeMap<HopId, MemoEntry>,
    multi_aggs: Vec<Vec<HopId>>,
}

impl FusionMemo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, hop: HopId) -> bool {
        self.plans.get(&hop).map(|p| !p.is_empty()).unwrap_or(false)
    }

    pub fn contains_template(&self, hop: HopId, t: TemplateType) -> bool {
        self.entries(hop).iter().any(|e| e.template == t)
    }

    /// Whether `hop` has a plan of template `t` that can still be extended.
    pub fn contains_open(&self, hop: HopId, t: TemplateType) -> bool {
        self.entries(hop)
            .iter()
            .any(|e| e.template == t && !e.close.is_closed())
    }

    pub fn entries(&self, hop: HopId) -> &[MemoEntry] {
        self.plans.get(&hop).map(|p| p.as_slice()).unwrap_or(&[])
    }

    pub fn entries_mut(&mut self, hop: HopId) -> Option<&mut Vec<MemoEntry>> {
        self.plans.get_mut(&hop)
    }

    pub fn hops(&self) -> impl Iterator<Item = HopId> + '_ {
        self.plans.keys().copied()
    }

    pub fn add_all(&mut self, hop: HopId, entries: Vec<MemoEntry>) {
        if entries.is_empty() {
            return;
        }
        self.plans.entry(hop).or_default().extend(entries);
    }

    /// Sorted templates of the plans at `hop` that are still open.
    pub fn distinct_open_templates(&self, hop: HopId) -> Vec<TemplateType> {
        let mut ts: Vec<TemplateType> = self
            .entries(hop)
            .iter()
            .filter(|e| !e.close.is_closed())
            .map(|e| e.template)
            .collect();
        ts.sort();
        ts.dedup();
        ts
    }

    pub fn mark_visited(&mut self, hop: HopId) {
        self.visited.insert(hop);
    }

    pub fn is_visited(&self, hop: HopId) -> bool {
        self.visited.contains(&hop)
    }

    pub fn remove_closed_invalid(&mut self, hop: HopId) {
        if let Some(p) = self.plans.get_mut(&hop) {
            p.retain(|e| e.close != CloseType::ClosedInvalid);
            if p.is_empty() {
                self.plans.remove(&hop);
            }
        }
    }

    /// Drop duplicate entries and, for heuristic selection, entries subsumed
    /// by another entry of the same template.
    pub fn prune_redundant(&mut self, hop: HopId, prune_dominated: bool) {
        let Some(p) = self.plans.get_mut(&hop) else {
            return;
        };
        let mut seen = HashSet::new();
        p.retain(|e| seen.insert(e.clone()));
        if prune_dominated {
            let snapshot = p.clone();
            p.retain(|e| !snapshot.iter().any(|o| o.subsumes(e) && o.close.is_valid() == e.close.is_valid()));
        }
    }

    pub fn set_best(&mut self, hop: HopId, entry: MemoEntry) {
        self.best.insert(hop, entry);
    }

    pub fn best(&self, hop: HopId) -> Option<&MemoEntry> {
        self.best.get(&hop)
    }

    /// The plan of template `t` used when `hop` is fused into a consumer:
    /// the selected plan if it has that template, otherwise the entry of
    /// that template fusing the most inputs.
    pub fn entry_for(&self, hop: HopId, t: TemplateType) -> Option<MemoEntry> {
        if let Some(b) = self.best.get(&hop) {
            if b.template == t {
                return Some(b.clone());
            }
        }
        let mut out: Option<&MemoEntry> = None;
        for e in self.entries(hop).iter().filter(|e| e.template == t) {
            if out.map(|o| e.count_fused() > o.count_fused()).unwrap_or(true) {
                out = Some(e);
            }
        }
        out.cloned()
    }

    pub fn add_multi_agg(&mut self, group: Vec<HopId>) {
        self.multi_aggs.push(group);
    }

    pub fn multi_agg_group(&self, hop: HopId) -> Option<&[HopId]> {
        self.multi_aggs
            .iter()
            .find(|g| g.contains(&hop))
            .map(|g| g.as_slice())
    }

    pub fn multi_agg_groups(&self) -> &[Vec<HopId>] {
        &self.multi_aggs
    }

    pub fn len(&self) -> usize {
        self.plans.values().map(|p| p.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Enumerate the plans of `tpl` at `hop`, fusing the input at `fused_pos`
/// (if any) and every subset of the other inputs the template can merge.
pub fn enumerate_plans(
    dag: &HopDag,
    memo: &FusionMemo,
    hop: HopId,
    fused_pos: Option<usize>,
    tpl: &dyn Template,
) -> Vec<MemoEntry> {
    let inputs = &dag.hop(hop).inputs;
    let t = tpl.template_type();
    let mut base = MemoEntry::new(t, inputs.len());
    if let Some(pos) = fused_pos {
        let c = inputs[pos];
        for (k, &i) in inputs.iter().enumerate() {
            if i == c {
                base.fused[k] = Some(c);
            }
        }
    }

    let mut out = vec![base];
    for (k, &c) in inputs.iter().enumerate() {
        if out[0].is_fused(k) {
            continue;
        }
        if inputs[..k].contains(&c) {
            continue;
        }
        if tpl.merge(dag, hop, c) && memo.contains_open(c, t) {
            let with: Vec<MemoEntry> = out
                .iter()
                .map(|e| {
                    let mut e = e.clone();
                    for (j, &i) in inputs.iter().enumerate() {
                        if i == c {
                            e.fused[j] = Some(c);
                        }
                    }
                    e
                })
                .collect();
            out.extend(with);
        }
    }
    out
}
