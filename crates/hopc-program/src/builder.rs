//! Basic block → hop DAG.
//!
//! Variables read before they are assigned become transient reads sized
//! from the live-in statistics; every variable the block assigns is handed
//! on through a transient write, so the writes are the DAG roots together
//! with prints and persistent writes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use hopc_core::id::HopId;
use hopc_core::stats::MatrixCharacteristics;
use hopc_core::types::DataType;
use hopc_hops::{DataOpKind, HopDag};

use crate::ast::{Expr, Statement};
use crate::block::StatementBlock;
use crate::error::{Error, Result};

/// Name of the transient write holding a predicate value.
pub const PREDICATE_VAR: &str = "__pred";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VarInfo {
    pub data_type: DataType,
    pub stats: MatrixCharacteristics,
}

impl VarInfo {
    pub fn new(data_type: DataType, stats: MatrixCharacteristics) -> Self {
        Self { data_type, stats }
    }

    pub fn scalar() -> Self {
        Self::new(DataType::Scalar, MatrixCharacteristics::scalar())
    }
}

/// Size statistics of the variables live at a block boundary.
pub type VarStats = BTreeMap<String, VarInfo>;

#[derive(Debug, Clone)]
pub struct BlockDag {
    pub dag: HopDag,
    /// Transient write per assigned variable.
    pub outputs: BTreeMap<String, HopId>,
    /// Variables bound by a call of a function that was not inlined; their
    /// size is only known at runtime.
    pub call_outputs: Vec<String>,
}

impl BlockDag {
    /// Statistics of the assigned variables as the DAG currently infers them.
    pub fn live_out(&self) -> VarStats {
        let mut out: VarStats = self
            .outputs
            .iter()
            .filter_map(|(name, &w)| {
                let h = self.dag.get(w)?;
                Some((name.clone(), VarInfo::new(h.data_type, h.stats)))
            })
            .collect();
        let bs = self.dag.blocksize();
        for name in &self.call_outputs {
            out.insert(
                name.clone(),
                VarInfo::new(DataType::Matrix, MatrixCharacteristics::unknown(bs)),
            );
        }
        out
    }
}

struct Builder<'a> {
    dag: HopDag,
    vars: &'a VarStats,
    bound: BTreeMap<String, HopId>,
    reads: BTreeMap<String, HopId>,
    call_outputs: Vec<String>,
    prints: usize,
}

impl<'a> Builder<'a> {
    fn new(vars: &'a VarStats, blocksize: i64) -> Self {
        Self {
            dag: HopDag::with_blocksize(blocksize),
            vars,
            bound: BTreeMap::new(),
            reads: BTreeMap::new(),
            call_outputs: Vec::new(),
            prints: 0,
        }
    }

    fn var(&mut self, name: &str) -> Result<HopId> {
        if let Some(&id) = self.bound.get(name).or_else(|| self.reads.get(name)) {
            return Ok(id);
        }
        let info = if self.call_outputs.iter().any(|c| c == name) {
            VarInfo::new(DataType::Matrix, MatrixCharacteristics::unknown(self.dag.blocksize()))
        } else {
            *self
                .vars
                .get(name)
                .ok_or_else(|| Error::Program(format!("undefined variable {name}")))?
        };
        let id = self.dag.transient_read(name, info.data_type, info.stats)?;
        self.reads.insert(name.to_string(), id);
        Ok(id)
    }

    fn expr(&mut self, e: &Expr) -> Result<HopId> {
        let id = match e {
            Expr::Const(v) => self.dag.literal(v.clone())?,
            Expr::Var(name) => self.var(name)?,
            Expr::Read { path, rows, cols, nnz } => self.dag.read(path, *rows, *cols, *nnz)?,
            Expr::Unary { op, input } => {
                let x = self.expr(input)?;
                self.dag.unary(*op, x)?
            }
            Expr::Binary { op, left, right } => {
                let l = self.expr(left)?;
                let r = self.expr(right)?;
                self.dag.binary(*op, l, r)?
            }
            Expr::Agg { op, dir, input } => {
                let x = self.expr(input)?;
                self.dag.agg(*op, *dir, x)?
            }
            Expr::MatMult { left, right } => {
                let l = self.expr(left)?;
                let r = self.expr(right)?;
                self.dag.matmult(l, r)?
            }
            Expr::Transpose(x) => {
                let x = self.expr(x)?;
                self.dag.transpose(x)?
            }
            Expr::Index { input, rl, ru, cl, cu } => {
                let x = self.expr(input)?;
                self.dag.index(x, *rl, *ru, *cl, *cu)?
            }
            Expr::Call { name, .. } => {
                return Err(Error::Program(format!(
                    "call to {name}() left in an expression; hoist or inline it first"
                )))
            }
        };
        Ok(id)
    }

    /// Arguments of a call that stays a call are handed to the callee
    /// through transient writes `name::i`.
    fn call(&mut self, name: &str, args: &[Expr], targets: &[String]) -> Result<()> {
        for (i, a) in args.iter().enumerate() {
            let h = self.expr(a)?;
            self.dag
                .write_kind(&format!("{name}::{i}"), h, DataOpKind::TransientWrite)?;
        }
        for t in targets {
            self.bound.remove(t);
            self.call_outputs.push(t.clone());
        }
        Ok(())
    }

    fn statement(&mut self, s: &Statement) -> Result<()> {
        match s {
            Statement::Assign {
                target,
                source: Expr::Call { name, args },
            } => self.call(name, args, std::slice::from_ref(target))?,
            Statement::MultiAssign {
                targets,
                source: Expr::Call { name, args },
            } => self.call(name, args, targets)?,
            Statement::Assign { target, source } => {
                let id = self.expr(source)?;
                self.call_outputs.retain(|c| c != target);
                self.bound.insert(target.clone(), id);
            }
            Statement::MultiAssign { targets, .. } => {
                return Err(Error::Program(format!(
                    "multi-assignment to {targets:?} needs a function call"
                )));
            }
            Statement::Print { kind, exprs } => {
                for e in exprs {
                    let h = self.expr(e)?;
                    self.prints += 1;
                    let name = format!("__{kind:?}{}", self.prints).to_lowercase();
                    self.dag.write_kind(&name, h, DataOpKind::PersistentWrite)?;
                }
            }
            Statement::Write { var, path } => {
                let h = self.var(var)?;
                self.dag.write(path, h)?;
            }
        }
        Ok(())
    }

    fn finish(mut self) -> Result<BlockDag> {
        let mut outputs = BTreeMap::new();
        for (name, id) in std::mem::take(&mut self.bound) {
            let w = self.dag.write_kind(&name, id, DataOpKind::TransientWrite)?;
            outputs.insert(name, w);
        }
        self.dag.check_edges()?;
        Ok(BlockDag {
            dag: self.dag,
            outputs,
            call_outputs: self.call_outputs,
        })
    }
}

/// DAG of one basic block.
pub fn build_block_dag(block: &StatementBlock, vars: &VarStats, blocksize: i64) -> Result<BlockDag> {
    let StatementBlock::Basic(stmts) = block else {
        return Err(Error::Program("only basic blocks have a DAG of their own".into()));
    };
    let mut b = Builder::new(vars, blocksize);
    for s in stmts {
        b.statement(s)?;
    }
    let out = b.finish()?;
    tracing::debug!(hops = out.dag.len(), outputs = out.outputs.len(), "built block dag");
    Ok(out)
}

/// DAG of a loop or branch predicate, rooted at one transient write.
pub fn build_predicate_dag(predicate: &Expr, vars: &VarStats, blocksize: i64) -> Result<BlockDag> {
    let mut b = Builder::new(vars, blocksize);
    let h = b.expr(predicate)?;
    b.bound.insert(PREDICATE_VAR.to_string(), h);
    b.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use hopc_core::stats::DEFAULT_BLOCKSIZE;
    use hopc_core::types::OpOp2;
    use hopc_hops::HopKind;

    fn x_vars() -> VarStats {
        VarStats::from([(
            "X".to_string(),
            VarInfo::new(DataType::Matrix, MatrixCharacteristics::new(100, 10, 1000, DEFAULT_BLOCKSIZE)),
        )])
    }

    #[test]
    fn live_in_reads_and_live_out_writes() {
        let block = StatementBlock::basic(vec![
            Statement::assign("Y", Expr::binary(OpOp2::Plus, Expr::var("X"), Expr::num(1.0))),
            Statement::assign("Z", Expr::binary(OpOp2::Mult, Expr::var("Y"), Expr::var("X"))),
        ]);
        let b = build_block_dag(&block, &x_vars(), DEFAULT_BLOCKSIZE).unwrap();
        assert_eq!(b.outputs.len(), 2);
        assert_eq!(b.dag.roots().len(), 2);
        let reads = b
            .dag
            .post_order(b.dag.roots())
            .into_iter()
            .filter(|&id| matches!(b.dag.hop(id).kind, HopKind::Data(DataOpKind::TransientRead)))
            .count();
        assert_eq!(reads, 1);
    }

    #[test]
    fn live_out_follows_inferred_sizes() {
        let block = StatementBlock::basic(vec![Statement::assign("Y", Expr::Transpose(Box::new(Expr::var("X"))))]);
        let mut b = build_block_dag(&block, &x_vars(), DEFAULT_BLOCKSIZE).unwrap();
        hopc_hops::propagate_sizes(&mut b.dag);
        let out = b.live_out();
        assert_eq!((out["Y"].stats.rows, out["Y"].stats.cols), (10, 100));
    }

    #[test]
    fn undefined_variables_and_calls_are_rejected() {
        let undefined = StatementBlock::basic(vec![Statement::assign("Y", Expr::var("nope"))]);
        assert!(build_block_dag(&undefined, &VarStats::new(), DEFAULT_BLOCKSIZE).is_err());

        let nested = StatementBlock::basic(vec![Statement::assign(
            "Y",
            Expr::binary(OpOp2::Plus, Expr::call("f", vec![]), Expr::num(1.0)),
        )]);
        let err = build_block_dag(&nested, &VarStats::new(), DEFAULT_BLOCKSIZE).unwrap_err();
        assert!(err.to_string().contains("hoist or inline"));
    }

    #[test]
    fn function_call_outputs_have_unknown_size() {
        let block = StatementBlock::basic(vec![Statement::assign(
            "Y",
            Expr::call("f", vec![Expr::var("X")]),
        )]);
        let b = build_block_dag(&block, &x_vars(), DEFAULT_BLOCKSIZE).unwrap();
        assert_eq!(b.dag.roots().len(), 1);
        assert_eq!(b.dag.hop(b.dag.roots()[0]).name, "f::0");
        let out = b.live_out();
        assert!(!out["Y"].stats.dims_known());
    }

    #[test]
    fn predicate_dag_has_one_root() {
        let p = build_predicate_dag(
            &Expr::binary(OpOp2::Less, Expr::var("i"), Expr::num(10.0)),
            &VarStats::from([("i".to_string(), VarInfo::scalar())]),
            DEFAULT_BLOCKSIZE,
        )
        .unwrap();
        assert_eq!(p.dag.roots().len(), 1);
        assert!(p.outputs.contains_key(PREDICATE_VAR));
    }
}
