//! Replace the hops covered by kernel plans with fused operators.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use hopc_core::error::Result;
use hopc_core::id::HopId;
use hopc_core::stats::MatrixCharacteristics;
use hopc_core::types::{DataType, TemplateType};
use hopc_hops::rewrite::{create_indexing, create_scalar_indexing, create_transpose};
use hopc_hops::{HopDag, HopKind};

use crate::compiler::CompiledKernel;
use crate::cplan::{CNode, CPlan};

/// Graft one fused operator per plan, top-down from the DAG roots, and
/// detach the replaced subgraphs. Returns the number of fused operators.
pub fn graft_plans(dag: &mut HopDag, plans: &[(CPlan, Arc<CompiledKernel>)]) -> Result<usize> {
    let by_root: HashMap<HopId, usize> = plans
        .iter()
        .enumerate()
        .filter_map(|(i, (p, _))| p.roots.first().map(|&r| (r, i)))
        .collect();

    let mut done = HashSet::new();
    let mut grafted = 0;
    for r in dag.roots().to_vec() {
        graft_rec(dag, r, &by_root, plans, &mut done, &mut grafted)?;
    }

    dag.prune_unreachable();
    dag.check_acyclic()?;
    dag.check_edges()?;
    Ok(grafted)
}

fn graft_rec(
    dag: &mut HopDag,
    id: HopId,
    by_root: &HashMap<HopId, usize>,
    plans: &[(CPlan, Arc<CompiledKernel>)],
    done: &mut HashSet<HopId>,
    grafted: &mut usize,
) -> Result<()> {
    if !done.insert(id) {
        return Ok(());
    }
    let mut hnew = id;
    if let Some(&i) = by_root.get(&id) {
        let (plan, kernel) = &plans[i];
        hnew = graft_one(dag, id, plan, kernel)?;
        done.insert(hnew);
        *grafted += 1;
    }
    for c in dag.hop(hnew).inputs.clone() {
        graft_rec(dag, c, by_root, plans, done, grafted)?;
    }
    Ok(())
}

/// Input position of the outer product's right factor.
fn outer_right_factor(plan: &CPlan) -> Option<usize> {
    plan.reachable().into_iter().find_map(|n| match plan.node(n) {
        CNode::OuterDot { right, .. } => match plan.node(*right) {
            CNode::Data { input } => Some(*input),
            _ => None,
        },
        _ => None,
    })
}

/// `t(v)`, reusing an existing transpose of `v` when there is one.
fn transpose_of(dag: &mut HopDag, v: HopId) -> Result<HopId> {
    let existing = dag
        .hop(v)
        .parents
        .iter()
        .copied()
        .find(|&p| dag.hop(p).kind.is_transpose() && dag.hop(p).inputs[0] == v);
    match existing {
        Some(t) => Ok(t),
        None => create_transpose(dag, v),
    }
}

fn graft_one(dag: &mut HopDag, id: HopId, plan: &CPlan, kernel: &CompiledKernel) -> Result<HopId> {
    let orig = dag.hop(id).clone();
    let bs = dag.blocksize();

    let mut inputs = plan.input_hops();
    if plan.template == TemplateType::Outer {
        // the kernel reads the right factor column-wise
        if let Some(j) = outer_right_factor(plan) {
            inputs[j] = transpose_of(dag, inputs[j])?;
        }
    }

    let (data_type, stats) = match plan.template {
        TemplateType::MultiAgg => (
            DataType::Matrix,
            MatrixCharacteristics::new(1, plan.roots.len() as i64, -1, bs),
        ),
        TemplateType::Outer if plan.transpose_output => (
            orig.data_type,
            MatrixCharacteristics::new(orig.cols(), orig.rows(), orig.nnz(), bs),
        ),
        _ => (orig.data_type, orig.stats),
    };

    let fused = dag.add(
        orig.name.clone(),
        HopKind::Fused {
            kernel: kernel.id,
            template: plan.template,
            class_name: kernel.class_name.clone(),
        },
        data_type,
        orig.value_type,
        inputs,
    )?;
    {
        let f = dag.hop_mut(fused);
        f.stats = stats;
        f.exec_type = orig.exec_type;
        f.forced_exec_type = orig.forced_exec_type;
    }
    tracing::debug!(root = %id, fused = %fused, class = %kernel.class_name, "grafted fused operator");

    if plan.template == TemplateType::MultiAgg {
        for (i, &root) in plan.roots.iter().enumerate() {
            let col = i as i64 + 1;
            let ix = if dag.hop(root).is_scalar() {
                create_scalar_indexing(dag, fused, 1, col)?
            } else {
                create_indexing(dag, fused, 1, 1, col, col)?
            };
            dag.rewire_all_parent_child_references(root, ix);
        }
        return Ok(fused);
    }

    let hnew = if plan.template == TemplateType::Outer && plan.transpose_output {
        create_transpose(dag, fused)?
    } else {
        fused
    };
    dag.rewire_all_parent_child_references(id, hnew);
    Ok(hnew)
}
