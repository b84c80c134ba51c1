//! Expression and statement AST of statement blocks.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use hopc_core::types::{AggOp, Direction, OpOp1, OpOp2};
use hopc_hops::LiteralValue;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expr {
    Const(LiteralValue),
    Var(String),
    /// Persistent read with metadata-provided size.
    Read { path: String, rows: i64, cols: i64, nnz: i64 },
    Unary { op: OpOp1, input: Box<Expr> },
    Binary { op: OpOp2, left: Box<Expr>, right: Box<Expr> },
    Agg { op: AggOp, dir: Direction, input: Box<Expr> },
    MatMult { left: Box<Expr>, right: Box<Expr> },
    Transpose(Box<Expr>),
    Index { input: Box<Expr>, rl: i64, ru: i64, cl: i64, cu: i64 },
    Call { name: String, args: Vec<Expr> },
}

impl Expr {
    pub fn var(name: &str) -> Self {
        Expr::Var(name.to_string())
    }

    pub fn num(v: f64) -> Self {
        Expr::Const(LiteralValue::Float(v))
    }

    pub fn int(v: i64) -> Self {
        Expr::Const(LiteralValue::Int(v))
    }

    pub fn unary(op: OpOp1, input: Expr) -> Self {
        Expr::Unary { op, input: Box::new(input) }
    }

    pub fn binary(op: OpOp2, left: Expr, right: Expr) -> Self {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn call(name: &str, args: Vec<Expr>) -> Self {
        Expr::Call {
            name: name.to_string(),
            args,
        }
    }

    pub fn is_call(&self) -> bool {
        matches!(self, Expr::Call { .. })
    }

    pub fn children(&self) -> Vec<&Expr> {
        match self {
            Expr::Const(_) | Expr::Var(_) | Expr::Read { .. } => vec![],
            Expr::Unary { input, .. } | Expr::Agg { input, .. } | Expr::Index { input, .. } => {
                vec![input]
            }
            Expr::Transpose(x) => vec![x],
            Expr::Binary { left, right, .. } | Expr::MatMult { left, right } => vec![left, right],
            Expr::Call { args, .. } => args.iter().collect(),
        }
    }

    fn children_mut(&mut self) -> Vec<&mut Expr> {
        match self {
            Expr::Const(_) | Expr::Var(_) | Expr::Read { .. } => vec![],
            Expr::Unary { input, .. } | Expr::Agg { input, .. } | Expr::Index { input, .. } => {
                vec![input]
            }
            Expr::Transpose(x) => vec![x],
            Expr::Binary { left, right, .. } | Expr::MatMult { left, right } => vec![left, right],
            Expr::Call { args, .. } => args.iter_mut().collect(),
        }
    }

    pub fn contains_call(&self) -> bool {
        self.is_call() || self.children().into_iter().any(Expr::contains_call)
    }

    /// Variables read by the expression.
    pub fn vars(&self, out: &mut BTreeSet<String>) {
        if let Expr::Var(v) = self {
            out.insert(v.clone());
        }
        for c in self.children() {
            c.vars(out);
        }
    }

    /// Prefix every variable name.
    pub fn rename(&mut self, prefix: &str) {
        if let Expr::Var(v) = self {
            *v = format!("{prefix}{v}");
        }
        for c in self.children_mut() {
            c.rename(prefix);
        }
    }

    /// Replace variables bound to a constant.
    pub fn substitute(&mut self, consts: &BTreeMap<String, LiteralValue>) -> usize {
        if let Expr::Var(v) = self {
            if let Some(c) = consts.get(v) {
                *self = Expr::Const(c.clone());
                return 1;
            }
            return 0;
        }
        self.children_mut().into_iter().map(|c| c.substitute(consts)).sum()
    }

    /// Rewrite children bottom-up through `f`.
    pub(crate) fn map_children(&mut self, f: &mut impl FnMut(&mut Expr)) {
        for c in self.children_mut() {
            f(c);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrintKind {
    Print,
    Stop,
    Assert,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Statement {
    Assign { target: String, source: Expr },
    /// Multiple return values of a function call.
    MultiAssign { targets: Vec<String>, source: Expr },
    Print { kind: PrintKind, exprs: Vec<Expr> },
    /// Persistent write of a variable.
    Write { var: String, path: String },
}

impl Statement {
    pub fn assign(target: &str, source: Expr) -> Self {
        Statement::Assign {
            target: target.to_string(),
            source,
        }
    }

    /// Statements that end a basic block: stop and assert.
    pub fn is_control(&self) -> bool {
        matches!(
            self,
            Statement::Print {
                kind: PrintKind::Stop | PrintKind::Assert,
                ..
            }
        )
    }

    /// Function call that is the whole right-hand side.
    pub fn root_call(&self) -> Option<(&str, &[Expr])> {
        match self {
            Statement::Assign { source: Expr::Call { name, args }, .. }
            | Statement::MultiAssign { source: Expr::Call { name, args }, .. } => {
                Some((name.as_str(), args.as_slice()))
            }
            _ => None,
        }
    }

    pub fn targets(&self) -> Vec<&str> {
        match self {
            Statement::Assign { target, .. } => vec![target.as_str()],
            Statement::MultiAssign { targets, .. } => targets.iter().map(String::as_str).collect(),
            Statement::Print { .. } | Statement::Write { .. } => vec![],
        }
    }

    pub fn exprs(&self) -> Vec<&Expr> {
        match self {
            Statement::Assign { source, .. } | Statement::MultiAssign { source, .. } => vec![source],
            Statement::Print { exprs, .. } => exprs.iter().collect(),
            Statement::Write { .. } => vec![],
        }
    }

    pub fn exprs_mut(&mut self) -> Vec<&mut Expr> {
        match self {
            Statement::Assign { source, .. } | Statement::MultiAssign { source, .. } => vec![source],
            Statement::Print { exprs, .. } => exprs.iter_mut().collect(),
            Statement::Write { .. } => vec![],
        }
    }

    /// Variables read, including the variable of a write.
    pub fn reads(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        for e in self.exprs() {
            e.vars(&mut out);
        }
        if let Statement::Write { var, .. } = self {
            out.insert(var.clone());
        }
        out
    }

    /// Prefix every variable name, targets included.
    pub fn rename(&mut self, prefix: &str) {
        match self {
            Statement::Assign { target, source } => {
                *target = format!("{prefix}{target}");
                source.rename(prefix);
            }
            Statement::MultiAssign { targets, source } => {
                for t in targets.iter_mut() {
                    *t = format!("{prefix}{t}");
                }
                source.rename(prefix);
            }
            Statement::Print { exprs, .. } => {
                for e in exprs {
                    e.rename(prefix);
                }
            }
            Statement::Write { var, .. } => *var = format!("{prefix}{var}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rename_prefixes_targets_and_reads() {
        let mut s = Statement::assign("y", Expr::binary(OpOp2::Plus, Expr::var("x"), Expr::num(1.0)));
        s.rename("7_");
        assert_eq!(s.targets(), vec!["7_y"]);
        assert!(s.reads().contains("7_x"));
    }

    #[test]
    fn substitute_replaces_bound_vars_only() {
        let mut e = Expr::binary(OpOp2::Mult, Expr::var("a"), Expr::var("X"));
        let consts = BTreeMap::from([("a".to_string(), LiteralValue::Int(3))]);
        assert_eq!(e.substitute(&consts), 1);
        assert_eq!(
            e,
            Expr::binary(OpOp2::Mult, Expr::Const(LiteralValue::Int(3)), Expr::var("X"))
        );
    }

    #[test]
    fn nested_calls_are_detected() {
        let e = Expr::binary(OpOp2::Plus, Expr::call("f", vec![]), Expr::num(1.0));
        assert!(e.contains_call());
        assert!(!e.is_call());
    }
}
