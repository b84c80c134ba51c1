//! Control-flow-aware statement-block rewrites.
//!
//! All rewrites work on owned block lists and leave predicates of loops and
//! branches in place; only basic blocks are split or merged.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};

use hopc_core::types::OpOp1;
use hopc_hops::LiteralValue;

use crate::ast::{Expr, Statement};
use crate::block::{FunctionDef, Program, StatementBlock};
use crate::builder::VarStats;
use crate::error::{Error, Result};

/// Variables bound to a known constant.
pub type ConstMap = BTreeMap<String, LiteralValue>;

static NEXT_CUT_VAR: AtomicU64 = AtomicU64::new(1);
static NEXT_INLINE: AtomicU64 = AtomicU64::new(1);

fn cut_var_name() -> String {
    format!("_sbcvar{}", NEXT_CUT_VAR.fetch_add(1, Ordering::Relaxed))
}

fn inline_prefix() -> String {
    format!("_inl{}_", NEXT_INLINE.fetch_add(1, Ordering::Relaxed))
}

// ---- merging ----------------------------------------------------------------

fn merge_adjacent(
    blocks: Vec<StatementBlock>,
    mut mergeable: impl FnMut(&StatementBlock) -> Result<bool>,
) -> Result<Vec<StatementBlock>> {
    let mut out = Vec::with_capacity(blocks.len());
    let mut current: Option<Vec<Statement>> = None;
    for b in blocks {
        if mergeable(&b)? {
            if let StatementBlock::Basic(stmts) = b {
                match &mut current {
                    Some(c) => c.extend(stmts),
                    None => current = Some(stmts),
                }
                continue;
            }
            out.push(b);
            continue;
        }
        if let Some(c) = current.take() {
            out.push(StatementBlock::Basic(c));
        }
        out.push(b);
    }
    if let Some(c) = current {
        out.push(StatementBlock::Basic(c));
    }
    Ok(out)
}

/// Concatenate runs of adjacent basic blocks that hold no stop or assert
/// statement; nested bodies are merged too.
pub fn merge_statement_blocks(blocks: Vec<StatementBlock>) -> Vec<StatementBlock> {
    let blocks = blocks
        .into_iter()
        .map(|mut b| {
            for body in b.bodies_mut() {
                *body = merge_statement_blocks(std::mem::take(body));
            }
            b
        })
        .collect();
    // the predicate never fails
    merge_adjacent(blocks, |b| Ok(b.is_mergeable())).unwrap_or_default()
}

/// Basic block whose statements may share a DAG with their neighbours:
/// no stop or assert, and every called function is inlineable.
fn is_mergeable_call_block(block: &StatementBlock, program: &Program) -> Result<bool> {
    let StatementBlock::Basic(stmts) = block else {
        return Ok(false);
    };
    for s in stmts {
        if s.is_control() {
            return Ok(false);
        }
        if let Some((name, _)) = s.root_call() {
            let f = program
                .function(name)
                .ok_or_else(|| Error::Program(format!("function {name}() is undefined")))?;
            if !is_inlineable_function(f, program) {
                return Ok(false);
            }
        }
    }
    Ok(true)
}

/// Like [`merge_statement_blocks`], but only merges blocks whose function
/// calls are all inlineable.
pub fn merge_function_calls(blocks: Vec<StatementBlock>, program: &Program) -> Result<Vec<StatementBlock>> {
    let mut rewritten = Vec::with_capacity(blocks.len());
    for mut b in blocks {
        for body in b.bodies_mut() {
            *body = merge_function_calls(std::mem::take(body), program)?;
        }
        rewritten.push(b);
    }
    merge_adjacent(rewritten, |b| is_mergeable_call_block(b, program))
}

// ---- inlining ---------------------------------------------------------------

/// A function is inlineable when its body is one basic block and every
/// function it calls is inlineable. Recursive functions never are.
pub fn is_inlineable_function(f: &FunctionDef, program: &Program) -> bool {
    inlineable_rec(f, program, &mut BTreeSet::new())
}

fn inlineable_rec(f: &FunctionDef, program: &Program, stack: &mut BTreeSet<String>) -> bool {
    if !stack.insert(f.name.clone()) {
        return false;
    }
    let ok = match f.body.as_slice() {
        [StatementBlock::Basic(stmts)] => stmts.iter().all(|s| match s.root_call() {
            Some((name, _)) => program
                .function(name)
                .map(|g| inlineable_rec(g, program, stack))
                .unwrap_or(false),
            None => true,
        }),
        _ => false,
    };
    stack.remove(&f.name);
    ok
}

/// Replace calls of inlineable functions by the function body, with every
/// body variable renamed under a fresh prefix.
pub fn inline_function_calls(blocks: Vec<StatementBlock>, program: &Program) -> Result<Vec<StatementBlock>> {
    blocks
        .into_iter()
        .map(|mut b| {
            for body in b.bodies_mut() {
                *body = inline_function_calls(std::mem::take(body), program)?;
            }
            if let StatementBlock::Basic(stmts) = b {
                return Ok(StatementBlock::Basic(inline_statements(stmts, program)?));
            }
            Ok(b)
        })
        .collect()
}

fn inline_statements(stmts: Vec<Statement>, program: &Program) -> Result<Vec<Statement>> {
    let mut out = Vec::with_capacity(stmts.len());
    for s in stmts {
        let Some((name, args)) = s.root_call().map(|(n, a)| (n.to_string(), a.to_vec())) else {
            out.push(s);
            continue;
        };
        let f = program
            .function(&name)
            .ok_or_else(|| Error::Program(format!("function {name}() is undefined")))?;
        if !is_inlineable_function(f, program) {
            out.push(s);
            continue;
        }
        let [StatementBlock::Basic(body)] = f.body.as_slice() else {
            out.push(s);
            continue;
        };
        if args.len() != f.params.len() {
            return Err(Error::Program(format!(
                "wrong number of arguments to {name}(): {} found, {} expected",
                args.len(),
                f.params.len()
            )));
        }
        let targets = s.targets();
        if targets.len() > f.outputs.len() {
            return Err(Error::Program(format!(
                "function {name}() returns {} values but is assigned to {targets:?}",
                f.outputs.len()
            )));
        }

        let prefix = inline_prefix();
        for (p, a) in f.params.iter().zip(args) {
            out.push(Statement::assign(&format!("{prefix}{p}"), a));
        }
        for mut b in inline_statements(body.clone(), program)? {
            b.rename(&prefix);
            out.push(b);
        }
        for (t, o) in targets.iter().zip(&f.outputs) {
            out.push(Statement::assign(t, Expr::Var(format!("{prefix}{o}"))));
        }
        tracing::debug!(function = %name, prefix = %prefix, "inlined function call");
    }
    Ok(out)
}

// ---- hoisting ---------------------------------------------------------------

/// Move function calls nested in expressions into their own assignments
/// and cut basic blocks after every statement that calls a function.
pub fn hoist_function_calls(block: StatementBlock) -> Vec<StatementBlock> {
    match block {
        StatementBlock::Basic(stmts) => {
            let n = stmts.len();
            let hoisted: Vec<Statement> = stmts.into_iter().flat_map(hoist_statement).collect();
            if hoisted.len() == n {
                return vec![StatementBlock::Basic(hoisted)];
            }
            cut_after_calls(hoisted)
        }
        mut other => {
            for body in other.bodies_mut() {
                *body = std::mem::take(body).into_iter().flat_map(hoist_function_calls).collect();
            }
            vec![other]
        }
    }
}

fn hoist_statement(mut s: Statement) -> Vec<Statement> {
    let mut tmp = Vec::new();
    match &mut s {
        Statement::Assign { source, .. } | Statement::MultiAssign { source, .. } => {
            hoist_expr(source, true, &mut tmp);
        }
        Statement::Print { exprs, .. } => {
            for e in exprs {
                hoist_expr(e, false, &mut tmp);
            }
        }
        Statement::Write { .. } => {}
    }
    tmp.push(s);
    tmp
}

fn hoist_expr(e: &mut Expr, root: bool, tmp: &mut Vec<Statement>) {
    e.map_children(&mut |c| hoist_expr(c, false, tmp));
    if e.is_call() && !root {
        let v = cut_var_name();
        let call = std::mem::replace(e, Expr::Var(v.clone()));
        tmp.push(Statement::Assign { target: v, source: call });
    }
}

fn cut_after_calls(stmts: Vec<Statement>) -> Vec<StatementBlock> {
    let mut out = Vec::new();
    let mut current = Vec::new();
    for s in stmts {
        let cut = matches!(s, Statement::Assign { source: Expr::Call { .. }, .. });
        current.push(s);
        if cut {
            out.push(StatementBlock::Basic(std::mem::take(&mut current)));
        }
    }
    if !current.is_empty() {
        out.push(StatementBlock::Basic(current));
    }
    out
}

// ---- constant propagation ---------------------------------------------------

/// Substitute variables bound to constants, following assignments through
/// the program. `nrow`, `ncol` and `length` of live-in variables with known
/// size fold to integers. Loops drop every variable they update; after a
/// branch only the constants both arms agree on survive. Returns the number
/// of substitutions.
pub fn propagate_constants(blocks: &mut [StatementBlock], consts: &mut ConstMap, vars: &VarStats) -> usize {
    let mut p = ConstPropagation {
        vars,
        stale: BTreeSet::new(),
        substituted: 0,
    };
    p.blocks(blocks, consts);
    p.substituted
}

struct ConstPropagation<'a> {
    vars: &'a VarStats,
    /// Live-in variables reassigned since; their sizes are no longer known.
    stale: BTreeSet<String>,
    substituted: usize,
}

impl ConstPropagation<'_> {
    fn blocks(&mut self, blocks: &mut [StatementBlock], consts: &mut ConstMap) {
        for b in blocks {
            self.block(b, consts);
        }
    }

    fn expr(&mut self, e: &mut Expr, consts: &ConstMap) {
        self.substituted += e.substitute(consts);
    }

    fn kill_updated(&mut self, b: &StatementBlock, consts: &mut ConstMap) {
        let mut updated = BTreeSet::new();
        b.updated(&mut updated);
        for v in updated {
            consts.remove(&v);
            self.stale.insert(v);
        }
    }

    fn block(&mut self, b: &mut StatementBlock, consts: &mut ConstMap) {
        match b {
            StatementBlock::Basic(stmts) => {
                for s in stmts {
                    self.statement(s, consts);
                }
            }
            StatementBlock::While { .. } => {
                self.kill_updated(b, consts);
                if let StatementBlock::While { predicate, body } = b {
                    self.expr(predicate, consts);
                    self.blocks(body, &mut consts.clone());
                }
            }
            StatementBlock::For { .. } => {
                if let StatementBlock::For { from, to, incr, .. } = b {
                    self.expr(from, consts);
                    self.expr(to, consts);
                    if let Some(i) = incr {
                        self.expr(i, consts);
                    }
                }
                self.kill_updated(b, consts);
                if let StatementBlock::For { body, .. } = b {
                    self.blocks(body, &mut consts.clone());
                }
            }
            StatementBlock::If {
                predicate,
                then_body,
                else_body,
            } => {
                self.expr(predicate, consts);
                let mut then_c = consts.clone();
                let mut else_c = consts.clone();
                self.blocks(then_body, &mut then_c);
                self.blocks(else_body, &mut else_c);
                consts.clear();
                for (k, v) in then_c {
                    if else_c.get(&k) == Some(&v) {
                        consts.insert(k, v);
                    }
                }
            }
            StatementBlock::Function(f) => {
                self.blocks(&mut f.body, &mut ConstMap::new());
            }
        }
    }

    fn statement(&mut self, s: &mut Statement, consts: &mut ConstMap) {
        for e in s.exprs_mut() {
            self.expr(e, consts);
        }
        let folded = match s {
            Statement::Assign { source, .. } => self.fold(source),
            _ => None,
        };
        for t in s.targets() {
            consts.remove(t);
            self.stale.insert(t.to_string());
        }
        if let (Statement::Assign { target, .. }, Some(v)) = (&*s, folded) {
            consts.insert(target.clone(), v);
        }
    }

    /// Constant value of an assignment source, if it has one.
    fn fold(&self, e: &Expr) -> Option<LiteralValue> {
        match e {
            Expr::Const(v) => Some(v.clone()),
            Expr::Unary { op, input } => {
                let (rows, cols) = match input.as_ref() {
                    Expr::Read { rows, cols, .. } => (*rows, *cols),
                    Expr::Var(v) if !self.stale.contains(v) => {
                        let info = self.vars.get(v)?;
                        (info.stats.rows, info.stats.cols)
                    }
                    _ => return None,
                };
                let n = match op {
                    OpOp1::Nrow => rows,
                    OpOp1::Ncol => cols,
                    OpOp1::Length if rows >= 0 && cols >= 0 => rows * cols,
                    _ => return None,
                };
                (n >= 0).then_some(LiteralValue::Int(n))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::PrintKind;
    use crate::builder::VarInfo;
    use hopc_core::stats::MatrixCharacteristics;
    use hopc_core::types::{DataType, OpOp2};

    fn assign(t: &str, e: Expr) -> Statement {
        Statement::assign(t, e)
    }

    fn basic(stmts: Vec<Statement>) -> StatementBlock {
        StatementBlock::basic(stmts)
    }

    fn stop() -> Statement {
        Statement::Print {
            kind: PrintKind::Stop,
            exprs: vec![],
        }
    }

    fn square() -> FunctionDef {
        FunctionDef {
            name: "square".into(),
            params: vec!["a".into()],
            outputs: vec!["r".into()],
            body: vec![basic(vec![assign(
                "r",
                Expr::binary(OpOp2::Mult, Expr::var("a"), Expr::var("a")),
            )])],
        }
    }

    fn looping() -> FunctionDef {
        FunctionDef {
            name: "looping".into(),
            params: vec![],
            outputs: vec!["r".into()],
            body: vec![StatementBlock::While {
                predicate: Expr::Const(LiteralValue::Bool(false)),
                body: vec![basic(vec![assign("r", Expr::num(1.0))])],
            }],
        }
    }

    #[test]
    fn adjacent_basic_blocks_merge() {
        let blocks = vec![
            basic(vec![assign("a", Expr::num(1.0))]),
            basic(vec![assign("b", Expr::num(2.0))]),
            StatementBlock::While {
                predicate: Expr::var("p"),
                body: vec![
                    basic(vec![assign("c", Expr::num(3.0))]),
                    basic(vec![assign("d", Expr::num(4.0))]),
                ],
            },
            basic(vec![stop()]),
            basic(vec![assign("e", Expr::num(5.0))]),
        ];
        let merged = merge_statement_blocks(blocks);
        assert_eq!(merged.len(), 4);
        assert!(matches!(&merged[0], StatementBlock::Basic(s) if s.len() == 2));
        match &merged[1] {
            StatementBlock::While { body, .. } => assert_eq!(body.len(), 1),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn inlineability() {
        let p = Program::new(vec![]).with_function(square()).with_function(looping());
        assert!(is_inlineable_function(&square(), &p));
        assert!(!is_inlineable_function(&looping(), &p));

        let rec = FunctionDef {
            name: "rec".into(),
            params: vec![],
            outputs: vec!["r".into()],
            body: vec![basic(vec![assign("r", Expr::call("rec", vec![]))])],
        };
        let p = p.with_function(rec.clone());
        assert!(!is_inlineable_function(&rec, &p));
    }

    #[test]
    fn merge_function_calls_respects_inlineability() {
        let p = Program::new(vec![]).with_function(square()).with_function(looping());
        let blocks = vec![
            basic(vec![assign("x", Expr::call("square", vec![Expr::num(2.0)]))]),
            basic(vec![assign("y", Expr::num(1.0))]),
            basic(vec![assign("z", Expr::call("looping", vec![]))]),
            basic(vec![assign("w", Expr::num(1.0))]),
        ];
        let merged = merge_function_calls(blocks, &p).unwrap();
        assert_eq!(merged.len(), 3);

        let undefined = vec![basic(vec![assign("x", Expr::call("nope", vec![]))])];
        assert!(matches!(merge_function_calls(undefined, &p), Err(Error::Program(_))));
    }

    #[test]
    fn inlining_binds_params_and_outputs() {
        let p = Program::new(vec![]).with_function(square());
        let blocks = vec![basic(vec![assign("y", Expr::call("square", vec![Expr::var("x")]))])];
        let out = inline_function_calls(blocks, &p).unwrap();
        let StatementBlock::Basic(stmts) = &out[0] else {
            panic!("expected a basic block");
        };
        assert_eq!(stmts.len(), 3);
        let Statement::Assign { target: param, source } = &stmts[0] else {
            panic!("expected a parameter binding");
        };
        assert!(param.ends_with("_a"));
        assert_eq!(source, &Expr::var("x"));
        assert_eq!(stmts[2].targets(), vec!["y"]);
        assert!(!stmts.iter().any(|s| s.root_call().is_some()));
    }

    #[test]
    fn wrong_argument_count_is_an_error() {
        let p = Program::new(vec![]).with_function(square());
        let blocks = vec![basic(vec![assign("y", Expr::call("square", vec![]))])];
        let err = inline_function_calls(blocks, &p).unwrap_err();
        assert!(err.to_string().contains("wrong number of arguments"));
    }

    #[test]
    fn nested_calls_are_hoisted_and_blocks_cut() {
        let block = basic(vec![
            assign("a", Expr::num(1.0)),
            assign(
                "y",
                Expr::binary(OpOp2::Plus, Expr::call("square", vec![Expr::var("a")]), Expr::num(1.0)),
            ),
            assign("z", Expr::var("y")),
        ]);
        let out = hoist_function_calls(block);
        assert_eq!(out.len(), 2);
        let StatementBlock::Basic(first) = &out[0] else {
            panic!("expected a basic block");
        };
        assert_eq!(first.len(), 2);
        assert!(first[1].root_call().is_some());
        let StatementBlock::Basic(second) = &out[1] else {
            panic!("expected a basic block");
        };
        assert!(!second[0].exprs()[0].contains_call());
    }

    #[test]
    fn root_calls_stay_in_place() {
        let block = basic(vec![assign("y", Expr::call("square", vec![Expr::num(2.0)]))]);
        let out = hoist_function_calls(block.clone());
        assert_eq!(out, vec![block]);
    }

    #[test]
    fn constants_flow_through_assignments() {
        let mut blocks = vec![basic(vec![
            assign("n", Expr::unary(OpOp1::Nrow, Expr::var("X"))),
            assign("m", Expr::var("n")),
            assign("Y", Expr::binary(OpOp2::Mult, Expr::var("X"), Expr::var("m"))),
        ])];
        let vars = VarStats::from([(
            "X".to_string(),
            VarInfo::new(DataType::Matrix, MatrixCharacteristics::new(100, 10, -1, 1000)),
        )]);
        let mut consts = ConstMap::new();
        let n = propagate_constants(&mut blocks, &mut consts, &vars);
        assert_eq!(n, 2);
        assert_eq!(consts.get("m"), Some(&LiteralValue::Int(100)));
        let StatementBlock::Basic(stmts) = &blocks[0] else {
            panic!("expected a basic block");
        };
        assert_eq!(
            stmts[2].exprs()[0],
            &Expr::binary(OpOp2::Mult, Expr::var("X"), Expr::int(100))
        );
    }

    #[test]
    fn loops_and_branches_are_conservative() {
        let mut blocks = vec![
            basic(vec![assign("i", Expr::num(0.0)), assign("c", Expr::num(5.0))]),
            StatementBlock::While {
                predicate: Expr::binary(OpOp2::Less, Expr::var("i"), Expr::var("c")),
                body: vec![basic(vec![assign(
                    "i",
                    Expr::binary(OpOp2::Plus, Expr::var("i"), Expr::num(1.0)),
                )])],
            },
            StatementBlock::If {
                predicate: Expr::var("p"),
                then_body: vec![basic(vec![assign("k", Expr::num(1.0))])],
                else_body: vec![basic(vec![assign("k", Expr::num(2.0))])],
            },
        ];
        let mut consts = ConstMap::new();
        propagate_constants(&mut blocks, &mut consts, &VarStats::new());
        match &blocks[1] {
            StatementBlock::While { predicate, .. } => assert_eq!(
                predicate,
                &Expr::binary(OpOp2::Less, Expr::var("i"), Expr::num(5.0))
            ),
            other => panic!("unexpected {other:?}"),
        }
        assert!(!consts.contains_key("i"));
        assert!(!consts.contains_key("k"));
        assert_eq!(consts.get("c"), Some(&LiteralValue::Float(5.0)));
    }
}
