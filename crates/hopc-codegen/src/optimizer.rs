//! The fusion pass driver.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use hopc_core::config::{CompilerConfig, PlanCachePolicy};
use hopc_core::error::{Error, Result};
use hopc_core::id::{HopId, KernelId};
use hopc_core::types::TemplateType;
use hopc_hops::{annotate, eliminate_common_subexpressions, explain_hops, propagate_sizes, HopDag};

use crate::cache::PlanCache;
use crate::cleanup::cleanup_plans;
use crate::compiler::{compiler_for, CompiledKernel, KernelCompiler};
use crate::construct::construct_plans;
use crate::cplan::CPlan;
use crate::graft::graft_plans;
use crate::memo::{enumerate_plans, FusionMemo, MemoEntry};
use crate::select::selection_for;
use crate::source::generate_source;
use crate::stats::CodegenStats;
use crate::template::{exploration_templates, template_for};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FusedKernel {
    /// Root hop of the plan in the DAG before grafting.
    pub root: HopId,
    pub class_name: String,
    pub template: TemplateType,
    pub kernel: KernelId,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FusionSummary {
    pub plans: usize,
    pub fused_operators: usize,
    pub kernels_compiled: usize,
    pub cache_hits: usize,
    pub kernels: Vec<FusedKernel>,
}

pub struct FusionOptimizer {
    cfg: CompilerConfig,
    cache: Arc<PlanCache>,
    compiler: Arc<dyn KernelCompiler>,
    stats: Arc<CodegenStats>,
}

impl std::fmt::Debug for FusionOptimizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FusionOptimizer")
            .field("selector", &self.cfg.codegen.plan_selector)
            .field("cache", &self.cache)
            .field("backend", &self.compiler.backend())
            .finish()
    }
}

impl FusionOptimizer {
    /// Optimizer with its own plan cache; evicted kernels are released by
    /// the configured compiler.
    pub fn new(cfg: CompilerConfig) -> Self {
        let compiler = compiler_for(&cfg);
        let releaser = Arc::clone(&compiler);
        let cache = Arc::new(PlanCache::with_eviction_hook(cfg.codegen.plan_cache_size, move |k| {
            releaser.release(k)
        }));
        Self::with_parts(cfg, cache, compiler)
    }

    pub fn with_parts(cfg: CompilerConfig, cache: Arc<PlanCache>, compiler: Arc<dyn KernelCompiler>) -> Self {
        Self {
            cfg,
            cache,
            compiler,
            stats: Arc::new(CodegenStats::new()),
        }
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.cfg
    }

    pub fn cache(&self) -> &Arc<PlanCache> {
        &self.cache
    }

    pub fn stats(&self) -> &Arc<CodegenStats> {
        &self.stats
    }

    pub fn compiler(&self) -> &Arc<dyn KernelCompiler> {
        &self.compiler
    }

    /// Fuse operators of `dag` in place. `recompile` marks a dynamic
    /// recompilation, where literals may change between invocations.
    ///
    /// On failure the DAG is left untouched and the error carries an
    /// explain dump of the input DAG.
    pub fn optimize(&self, dag: &mut HopDag, recompile: bool) -> Result<FusionSummary> {
        let start = Instant::now();
        let mut work = dag.clone();
        match self.try_optimize(&mut work, recompile) {
            Ok(summary) => {
                *dag = work;
                self.stats.record_dag(summary.fused_operators, start.elapsed());
                tracing::debug!(
                    plans = summary.plans,
                    fused = summary.fused_operators,
                    compiled = summary.kernels_compiled,
                    cache_hits = summary.cache_hits,
                    "fusion pass done"
                );
                Ok(summary)
            }
            Err(e) => {
                let explain = explain_hops(dag);
                tracing::error!(error = %e, explain = %explain, "fusion pass failed");
                self.stats.record_failure();
                Err(Error::Optimization {
                    message: e.to_string(),
                    explain,
                })
            }
        }
    }

    fn try_optimize(&self, dag: &mut HopDag, recompile: bool) -> Result<FusionSummary> {
        let roots = dag.roots().to_vec();
        let unannotated = dag
            .post_order(&roots)
            .into_iter()
            .any(|id| dag.hop(id).is_matrix() && dag.hop(id).exec_type.is_none());
        if unannotated {
            annotate(dag, &self.cfg);
        }

        let codegen = &self.cfg.codegen;
        let compile_literals = codegen.plan_cache_policy == PlanCachePolicy::Constant || !recompile;

        let mut memo = FusionMemo::new();
        for &r in &roots {
            self.explore(dag, &mut memo, r);
        }
        tracing::trace!(entries = memo.len(), "fusion plans explored");

        selection_for(codegen.plan_selector).select(dag, &mut memo, &roots);

        let constructed = construct_plans(dag, &memo, &roots, compile_literals)?;
        let n_constructed = constructed.len();
        let plans = cleanup_plans(dag, constructed)?;
        self.stats.record_plans(n_constructed, plans.len());
        for p in &plans {
            tracing::trace!(plan = %p.explain(), "kernel plan");
        }

        let mut summary = FusionSummary {
            plans: plans.len(),
            ..Default::default()
        };
        let mut compiled = Vec::with_capacity(plans.len());
        let grafted = self.compile_and_graft(dag, plans, &mut compiled, &mut summary);
        if codegen.plan_cache_policy == PlanCachePolicy::None {
            self.release_uncached(&compiled);
        }
        summary.fused_operators = grafted?;
        Ok(summary)
    }

    fn compile_and_graft(
        &self,
        dag: &mut HopDag,
        plans: Vec<CPlan>,
        compiled: &mut Vec<(CPlan, Arc<CompiledKernel>)>,
        summary: &mut FusionSummary,
    ) -> Result<usize> {
        for plan in plans {
            let kernel = self.kernel_for(&plan, summary)?;
            summary.kernels.push(FusedKernel {
                root: plan.roots[0],
                class_name: kernel.class_name.clone(),
                template: plan.template,
                kernel: kernel.id,
            });
            compiled.push((plan, kernel));
        }
        if compiled.is_empty() {
            return Ok(0);
        }
        let fused = graft_plans(dag, compiled)?;
        eliminate_common_subexpressions(dag);
        propagate_sizes(dag);
        Ok(fused)
    }

    /// Kernels that never enter the cache have no later owner, so their
    /// compiler state is dropped once the DAG refers to them by id.
    fn release_uncached(&self, compiled: &[(CPlan, Arc<CompiledKernel>)]) {
        for (_, kernel) in compiled {
            tracing::trace!(class = %kernel.class_name, "releasing uncached kernel");
            self.compiler.release(kernel);
        }
    }

    /// Cached kernel for `plan`, compiling it on a miss.
    fn kernel_for(&self, plan: &CPlan, summary: &mut FusionSummary) -> Result<Arc<CompiledKernel>> {
        let caching = self.cfg.codegen.plan_cache_policy != PlanCachePolicy::None;
        let key = plan.canonical_hash()?;
        if caching {
            let hit = self.cache.get(&key);
            self.stats.record_lookup(hit.is_some());
            if let Some(k) = hit {
                tracing::trace!(class = %k.class_name, "plan cache hit");
                summary.cache_hits += 1;
                return Ok(k);
            }
        }

        let source = generate_source(plan)?;
        let t0 = Instant::now();
        let kernel = Arc::new(self.compiler.compile(&plan.class_name, plan.template, &source)?);
        self.stats.record_compile(t0.elapsed());
        summary.kernels_compiled += 1;
        tracing::debug!(class = %kernel.class_name, template = %plan.template, "compiled kernel");

        if caching {
            self.cache.put(key, Arc::clone(&kernel));
        }
        Ok(kernel)
    }

    /// Memoized bottom-up exploration of the candidate plans below `root`.
    fn explore(&self, dag: &HopDag, memo: &mut FusionMemo, root: HopId) {
        for id in dag.post_order(&[root]) {
            if memo.is_visited(id) {
                continue;
            }
            let mut entries: Vec<MemoEntry> = Vec::new();

            for tpl in exploration_templates() {
                if tpl.open(dag, id) {
                    entries.extend(enumerate_plans(dag, memo, id, None, tpl));
                }
            }

            let inputs = dag.hop(id).inputs.clone();
            for (pos, &c) in inputs.iter().enumerate() {
                if inputs[..pos].contains(&c) {
                    continue;
                }
                for t in memo.distinct_open_templates(c) {
                    let tpl = template_for(t);
                    if tpl.fuse(dag, id, c) {
                        entries.extend(enumerate_plans(dag, memo, id, Some(pos), tpl));
                    }
                }
            }

            for e in &mut entries {
                e.close = template_for(e.template).close(dag, id);
            }
            if !entries.is_empty() {
                memo.add_all(id, entries);
                memo.remove_closed_invalid(id);
                if self.cfg.codegen.prune_redundant_plans {
                    memo.prune_redundant(id, self.cfg.codegen.plan_selector.is_heuristic());
                }
            }
            memo.mark_visited(id);
        }
    }
}
