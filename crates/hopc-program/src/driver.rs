//! Whole-program compilation.
//!
//! Block rewrites run once over the program; then every basic block and
//! every predicate or loop bound becomes a DAG that is rewritten, annotated,
//! optionally fused and lowered. Sizes flow from block to block through the
//! live-out statistics; variables a loop updates enter the loop with unknown
//! size and are marked for recompilation.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::Serialize;

use hopc_codegen::{FusionOptimizer, FusionSummary};
use hopc_core::config::CompilerConfig;
use hopc_core::hash::hash_serde;
use hopc_core::manifest::{now_ms, CompileManifest};
use hopc_core::stats::MatrixCharacteristics;
use hopc_core::types::DataType;
use hopc_hops::{annotate, HopDag};
use hopc_planner::{lower_to_physical, PhysicalProgram};

use crate::ast::Expr;
use crate::block::{FunctionDef, Program, StatementBlock};
use crate::builder::{build_block_dag, build_predicate_dag, BlockDag, VarInfo, VarStats};
use crate::error::Result;
use crate::rewrite::{
    hoist_function_calls, inline_function_calls, merge_function_calls, merge_statement_blocks,
    propagate_constants, ConstMap,
};

/// One compiled DAG: the optimized hops, their physical program and the
/// manifest of the compile.
#[derive(Debug, Clone)]
pub struct CompiledDag {
    pub dag: HopDag,
    pub program: PhysicalProgram,
    pub fusion: Option<FusionSummary>,
    pub manifest: CompileManifest,
}

#[derive(Debug, Clone)]
pub enum CompiledBlock {
    Basic(CompiledDag),
    While {
        predicate: CompiledDag,
        body: Vec<CompiledBlock>,
    },
    If {
        predicate: CompiledDag,
        then_body: Vec<CompiledBlock>,
        else_body: Vec<CompiledBlock>,
    },
    For {
        from: CompiledDag,
        to: CompiledDag,
        incr: Option<CompiledDag>,
        body: Vec<CompiledBlock>,
    },
    Function {
        name: String,
        body: Vec<CompiledBlock>,
    },
}

impl CompiledBlock {
    fn collect<'a>(&'a self, out: &mut Vec<&'a CompiledDag>) {
        match self {
            CompiledBlock::Basic(d) => out.push(d),
            CompiledBlock::While { predicate, body } => {
                out.push(predicate);
                body.iter().for_each(|b| b.collect(out));
            }
            CompiledBlock::If {
                predicate,
                then_body,
                else_body,
            } => {
                out.push(predicate);
                then_body.iter().chain(else_body).for_each(|b| b.collect(out));
            }
            CompiledBlock::For {
                from,
                to,
                incr,
                body,
            } => {
                out.push(from);
                out.push(to);
                out.extend(incr.iter());
                body.iter().for_each(|b| b.collect(out));
            }
            CompiledBlock::Function { body, .. } => body.iter().for_each(|b| b.collect(out)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompiledProgram {
    pub blocks: Vec<CompiledBlock>,
    pub functions: BTreeMap<String, CompiledBlock>,
    /// Variables live after the last block.
    pub live_out: VarStats,
}

/// Totals over every compiled DAG of a program.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProgramSummary {
    pub dags: usize,
    pub lops: usize,
    pub fused_operators: usize,
    pub kernels_compiled: usize,
    pub cache_hits: usize,
}

impl CompiledProgram {
    /// Every compiled DAG, functions first, in program order.
    pub fn dags(&self) -> Vec<&CompiledDag> {
        let mut out = Vec::new();
        for b in self.functions.values().chain(&self.blocks) {
            b.collect(&mut out);
        }
        out
    }

    pub fn manifests(&self) -> Vec<&CompileManifest> {
        self.dags().into_iter().map(|d| &d.manifest).collect()
    }

    pub fn summary(&self) -> ProgramSummary {
        let mut s = ProgramSummary::default();
        for d in self.dags() {
            s.dags += 1;
            s.lops += d.program.plan.len();
            s.fused_operators += d.manifest.fused_operators;
            s.kernels_compiled += d.manifest.kernels_compiled;
            s.cache_hits += d.manifest.cache_hits;
        }
        s
    }
}

pub struct ProgramCompiler {
    cfg: CompilerConfig,
    fusion: Option<Arc<FusionOptimizer>>,
}

impl ProgramCompiler {
    /// Compiler with its own fusion optimizer when codegen is enabled.
    pub fn new(cfg: CompilerConfig) -> Self {
        let fusion = cfg
            .codegen
            .enabled
            .then(|| Arc::new(FusionOptimizer::new(cfg.clone())));
        Self { cfg, fusion }
    }

    /// Share one optimizer (and its plan cache) between compilers.
    pub fn with_optimizer(cfg: CompilerConfig, fusion: Arc<FusionOptimizer>) -> Self {
        Self {
            cfg,
            fusion: Some(fusion),
        }
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.cfg
    }

    pub fn optimizer(&self) -> Option<&Arc<FusionOptimizer>> {
        self.fusion.as_ref()
    }

    /// Run the block rewrites over a copy of `program`.
    pub fn rewrite(&self, program: &Program, live_in: &VarStats) -> Result<Program> {
        let mut p = program.clone();
        for f in p.functions.values_mut() {
            f.body = std::mem::take(&mut f.body)
                .into_iter()
                .flat_map(hoist_function_calls)
                .collect();
        }
        let blocks: Vec<StatementBlock> = std::mem::take(&mut p.blocks)
            .into_iter()
            .flat_map(hoist_function_calls)
            .collect();
        let blocks = merge_function_calls(blocks, &p)?;
        let blocks = inline_function_calls(blocks, &p)?;
        let mut blocks = merge_statement_blocks(blocks);
        let substituted = propagate_constants(&mut blocks, &mut ConstMap::new(), live_in);
        tracing::debug!(blocks = blocks.len(), substituted, "block rewrites done");
        p.blocks = blocks;
        Ok(p)
    }

    /// Compile every block of `program`. `live_in` sizes the variables the
    /// program reads before assigning them.
    pub fn compile(&self, program: &Program, live_in: &VarStats) -> Result<CompiledProgram> {
        let p = self.rewrite(program, live_in)?;

        let mut functions = BTreeMap::new();
        for f in p.functions.values() {
            functions.insert(f.name.clone(), self.compile_function(f)?);
        }

        let mut vars = live_in.clone();
        let blocks = self.compile_blocks(&p.blocks, &mut vars, false)?;
        let out = CompiledProgram {
            blocks,
            functions,
            live_out: vars,
        };
        let s = out.summary();
        tracing::info!(
            dags = s.dags,
            lops = s.lops,
            fused = s.fused_operators,
            compiled = s.kernels_compiled,
            cache_hits = s.cache_hits,
            "program compiled"
        );
        Ok(out)
    }

    fn compile_function(&self, f: &FunctionDef) -> Result<CompiledBlock> {
        // parameters arrive with unknown size
        let mut vars: VarStats = f
            .params
            .iter()
            .map(|p| {
                (
                    p.clone(),
                    VarInfo::new(DataType::Matrix, MatrixCharacteristics::unknown(self.cfg.blocksize)),
                )
            })
            .collect();
        Ok(CompiledBlock::Function {
            name: f.name.clone(),
            body: self.compile_blocks(&f.body, &mut vars, false)?,
        })
    }

    /// `in_loop` marks blocks that run again with possibly different sizes.
    fn compile_blocks(
        &self,
        blocks: &[StatementBlock],
        vars: &mut VarStats,
        in_loop: bool,
    ) -> Result<Vec<CompiledBlock>> {
        blocks.iter().map(|b| self.compile_block(b, vars, in_loop)).collect()
    }

    fn compile_block(&self, block: &StatementBlock, vars: &mut VarStats, in_loop: bool) -> Result<CompiledBlock> {
        match block {
            StatementBlock::Basic(_) => {
                let b = build_block_dag(block, vars, self.cfg.blocksize)?;
                let (compiled, live_out) = self.compile_dag(b, in_loop)?;
                vars.extend(live_out);
                Ok(CompiledBlock::Basic(compiled))
            }
            StatementBlock::While { predicate, body } => {
                self.forget_updated(block, vars);
                let predicate = self.compile_expr(predicate, vars, true)?;
                let body = self.compile_blocks(body, &mut vars.clone(), true)?;
                Ok(CompiledBlock::While { predicate, body })
            }
            StatementBlock::If {
                predicate,
                then_body,
                else_body,
            } => {
                let predicate = self.compile_expr(predicate, vars, in_loop)?;
                let mut then_vars = vars.clone();
                let mut else_vars = vars.clone();
                let then_body = self.compile_blocks(then_body, &mut then_vars, in_loop)?;
                let else_body = self.compile_blocks(else_body, &mut else_vars, in_loop)?;
                *vars = merge_branch_stats(then_vars, else_vars, self.cfg.blocksize);
                Ok(CompiledBlock::If {
                    predicate,
                    then_body,
                    else_body,
                })
            }
            StatementBlock::For {
                var,
                from,
                to,
                incr,
                body,
            } => {
                let from = self.compile_expr(from, vars, in_loop)?;
                let to = self.compile_expr(to, vars, in_loop)?;
                let incr = incr
                    .as_ref()
                    .map(|i| self.compile_expr(i, vars, in_loop))
                    .transpose()?;
                self.forget_updated(block, vars);
                vars.insert(var.clone(), VarInfo::scalar());
                let body = self.compile_blocks(body, &mut vars.clone(), true)?;
                Ok(CompiledBlock::For {
                    from,
                    to,
                    incr,
                    body,
                })
            }
            StatementBlock::Function(f) => self.compile_function(f),
        }
    }

    /// Variables a loop updates lose their size; their shape may change
    /// from one iteration to the next.
    fn forget_updated(&self, block: &StatementBlock, vars: &mut VarStats) {
        let mut updated = BTreeSet::new();
        block.updated(&mut updated);
        for v in updated {
            if let Some(info) = vars.get_mut(&v) {
                if info.data_type != DataType::Scalar {
                    info.stats = MatrixCharacteristics::unknown(self.cfg.blocksize);
                }
            }
        }
    }

    fn compile_expr(&self, e: &Expr, vars: &VarStats, recompile: bool) -> Result<CompiledDag> {
        let b = build_predicate_dag(e, vars, self.cfg.blocksize)?;
        Ok(self.compile_dag(b, recompile)?.0)
    }

    /// Rewrite, annotate, fuse and lower one DAG.
    fn compile_dag(&self, block: BlockDag, recompile: bool) -> Result<(CompiledDag, VarStats)> {
        let started = now_ms();
        let BlockDag {
            mut dag,
            outputs,
            call_outputs,
        } = block;
        let dag_hash = hash_serde(&dag)?;

        hopc_planner::optimize(&mut dag)?;
        annotate(&mut dag, &self.cfg);
        if recompile {
            let roots = dag.roots().to_vec();
            for id in dag.post_order(&roots) {
                let h = dag.hop_mut(id);
                h.requires_recompile = !h.dims_known();
            }
        }

        let fusion = match &self.fusion {
            Some(opt) => {
                let s = opt.optimize(&mut dag, recompile)?;
                if s.fused_operators > 0 {
                    annotate(&mut dag, &self.cfg);
                }
                Some(s)
            }
            None => None,
        };

        let roots = dag.roots().to_vec();
        let program = lower_to_physical(&mut dag, &roots, &self.cfg)?;
        let plan_hash = hash_serde(&program)?;

        let mut manifest = CompileManifest::new(dag_hash, started);
        if let Some(s) = &fusion {
            manifest.fused_operators = s.fused_operators;
            manifest.kernels_compiled = s.kernels_compiled;
            manifest.cache_hits = s.cache_hits;
        }
        let manifest = manifest.finish(now_ms(), plan_hash);
        tracing::debug!(
            lops = program.plan.len(),
            fused = manifest.fused_operators,
            plan = %plan_hash.short(),
            "compiled dag"
        );

        let block = BlockDag {
            dag,
            outputs,
            call_outputs,
        };
        let live_out = block.live_out();
        let compiled = CompiledDag {
            dag: block.dag,
            program,
            fusion,
            manifest,
        };
        Ok((compiled, live_out))
    }
}

/// After a branch, a variable keeps its size only if both arms agree.
fn merge_branch_stats(then_vars: VarStats, else_vars: VarStats, blocksize: i64) -> VarStats {
    let mut out = VarStats::new();
    for (name, t) in then_vars {
        let merged = match else_vars.get(&name) {
            Some(e) if *e == t => t,
            _ if t.data_type == DataType::Scalar => t,
            _ => VarInfo::new(t.data_type, MatrixCharacteristics::unknown(blocksize)),
        };
        out.insert(name, merged);
    }
    for (name, e) in else_vars {
        out.entry(name).or_insert(VarInfo::new(
            e.data_type,
            if e.data_type == DataType::Scalar {
                e.stats
            } else {
                MatrixCharacteristics::unknown(blocksize)
            },
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Statement;
    use hopc_core::types::OpOp2;
    use hopc_hops::HopKind;

    fn read(path: &str, rows: i64, cols: i64) -> Expr {
        Expr::Read {
            path: path.into(),
            rows,
            cols,
            nnz: rows * cols,
        }
    }

    fn relu_backward_program() -> Program {
        Program::new(vec![
            StatementBlock::basic(vec![Statement::assign("A", read("A", 1000, 1000))]),
            StatementBlock::basic(vec![Statement::assign(
                "Y",
                Expr::binary(
                    OpOp2::Mult,
                    Expr::var("A"),
                    Expr::binary(OpOp2::Greater, Expr::var("A"), Expr::num(0.0)),
                ),
            )]),
        ])
    }

    #[test]
    fn adjacent_blocks_compile_as_one_dag() {
        let c = ProgramCompiler::new(CompilerConfig::default());
        let out = c.compile(&relu_backward_program(), &VarStats::new()).unwrap();
        assert_eq!(out.blocks.len(), 1);
        assert_eq!(out.manifests().len(), 1);
        assert_eq!(out.live_out["Y"].stats.rows, 1000);
        assert!(out.summary().lops > 0);
    }

    #[test]
    fn fusion_is_reported_in_the_manifest() {
        let mut cfg = CompilerConfig::default();
        cfg.codegen.enabled = true;
        cfg.codegen.compiler = hopc_core::config::CompilerBackend::InMemory;
        let c = ProgramCompiler::new(cfg);
        let out = c.compile(&relu_backward_program(), &VarStats::new()).unwrap();
        let m = out.manifests()[0];
        assert_eq!(m.fused_operators, 1);
        assert_eq!(m.kernels_compiled, 1);
        let CompiledBlock::Basic(d) = &out.blocks[0] else {
            panic!("expected a basic block");
        };
        let roots = d.dag.roots().to_vec();
        assert!(d
            .dag
            .post_order(&roots)
            .into_iter()
            .any(|id| matches!(d.dag.hop(id).kind, HopKind::Fused { .. })));
    }

    #[test]
    fn loop_bodies_see_unknown_sizes() {
        let program = Program::new(vec![
            StatementBlock::basic(vec![
                Statement::assign("X", read("X", 100, 10)),
                Statement::assign("i", Expr::num(0.0)),
            ]),
            StatementBlock::While {
                predicate: Expr::binary(OpOp2::Less, Expr::var("i"), Expr::num(10.0)),
                body: vec![StatementBlock::basic(vec![
                    Statement::assign("X", Expr::Transpose(Box::new(Expr::var("X")))),
                    Statement::assign("i", Expr::binary(OpOp2::Plus, Expr::var("i"), Expr::num(1.0))),
                ])],
            },
        ]);
        let c = ProgramCompiler::new(CompilerConfig::default());
        let out = c.compile(&program, &VarStats::new()).unwrap();
        let CompiledBlock::While { body, .. } = &out.blocks[1] else {
            panic!("expected a while block");
        };
        let CompiledBlock::Basic(d) = &body[0] else {
            panic!("expected a basic block");
        };
        let roots = d.dag.roots().to_vec();
        let order = d.dag.post_order(&roots);
        let x = order
            .iter()
            .copied()
            .find(|&id| d.dag.hop(id).name == "X" && matches!(d.dag.hop(id).kind, HopKind::Data(_)))
            .unwrap();
        assert!(!d.dag.hop(x).dims_known());
        assert!(order.iter().any(|&id| d.dag.hop(id).requires_recompile));
    }

    #[test]
    fn inlined_calls_leave_no_call_writes() {
        let square = FunctionDef {
            name: "square".into(),
            params: vec!["a".into()],
            outputs: vec!["r".into()],
            body: vec![StatementBlock::basic(vec![Statement::assign(
                "r",
                Expr::binary(OpOp2::Mult, Expr::var("a"), Expr::var("a")),
            )])],
        };
        let program = Program::new(vec![StatementBlock::basic(vec![
            Statement::assign("X", read("X", 10, 10)),
            Statement::assign("Y", Expr::call("square", vec![Expr::var("X")])),
        ])])
        .with_function(square);

        let c = ProgramCompiler::new(CompilerConfig::default());
        let out = c.compile(&program, &VarStats::new()).unwrap();
        assert!(out.functions.contains_key("square"));
        assert_eq!((out.live_out["Y"].stats.rows, out.live_out["Y"].stats.cols), (10, 10));
        let CompiledBlock::Basic(d) = &out.blocks[0] else {
            panic!("expected a basic block");
        };
        assert!(!d.dag.roots().iter().any(|&r| d.dag.hop(r).name.contains("::")));
    }

    #[test]
    fn branch_arms_that_disagree_forget_sizes() {
        let program = Program::new(vec![
            StatementBlock::basic(vec![Statement::assign("X", read("X", 10, 10))]),
            StatementBlock::If {
                predicate: Expr::Const(hopc_hops::LiteralValue::Bool(true)),
                then_body: vec![StatementBlock::basic(vec![Statement::assign(
                    "Y",
                    Expr::var("X"),
                )])],
                else_body: vec![StatementBlock::basic(vec![Statement::assign(
                    "Y",
                    Expr::Transpose(Box::new(Expr::Index {
                        input: Box::new(Expr::var("X")),
                        rl: 1,
                        ru: 5,
                        cl: 1,
                        cu: 10,
                    })),
                )])],
            },
        ]);
        let c = ProgramCompiler::new(CompilerConfig::default());
        let out = c.compile(&program, &VarStats::new()).unwrap();
        assert!(!out.live_out["Y"].stats.dims_known());
        assert_eq!(out.live_out["X"].stats.rows, 10);
    }
}
