//! Statement blocks and programs.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::ast::{Expr, Statement};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementBlock {
    Basic(Vec<Statement>),
    While {
        predicate: Expr,
        body: Vec<StatementBlock>,
    },
    If {
        predicate: Expr,
        then_body: Vec<StatementBlock>,
        #[serde(default)]
        else_body: Vec<StatementBlock>,
    },
    For {
        var: String,
        from: Expr,
        to: Expr,
        #[serde(default)]
        incr: Option<Expr>,
        body: Vec<StatementBlock>,
    },
    /// Body of a function, compiled once per program.
    Function(FunctionDef),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDef {
    pub name: String,
    pub params: Vec<String>,
    pub outputs: Vec<String>,
    pub body: Vec<StatementBlock>,
}

impl StatementBlock {
    pub fn basic(statements: Vec<Statement>) -> Self {
        StatementBlock::Basic(statements)
    }

    pub fn is_basic(&self) -> bool {
        matches!(self, StatementBlock::Basic(_))
    }

    /// A basic block without stop or assert statements.
    pub fn is_mergeable(&self) -> bool {
        match self {
            StatementBlock::Basic(stmts) => !stmts.iter().any(Statement::is_control),
            _ => false,
        }
    }

    /// Nested statement-block lists, in source order.
    pub fn bodies_mut(&mut self) -> Vec<&mut Vec<StatementBlock>> {
        match self {
            StatementBlock::Basic(_) => vec![],
            StatementBlock::While { body, .. } | StatementBlock::For { body, .. } => vec![body],
            StatementBlock::If {
                then_body,
                else_body,
                ..
            } => vec![then_body, else_body],
            StatementBlock::Function(f) => vec![&mut f.body],
        }
    }

    pub fn bodies(&self) -> Vec<&Vec<StatementBlock>> {
        match self {
            StatementBlock::Basic(_) => vec![],
            StatementBlock::While { body, .. } | StatementBlock::For { body, .. } => vec![body],
            StatementBlock::If {
                then_body,
                else_body,
                ..
            } => vec![then_body, else_body],
            StatementBlock::Function(f) => vec![&f.body],
        }
    }

    /// Variables assigned anywhere in the block, loop variables included.
    pub fn updated(&self, out: &mut BTreeSet<String>) {
        match self {
            StatementBlock::Basic(stmts) => {
                for s in stmts {
                    out.extend(s.targets().into_iter().map(str::to_string));
                }
            }
            StatementBlock::For { var, body, .. } => {
                out.insert(var.clone());
                for b in body {
                    b.updated(out);
                }
            }
            StatementBlock::Function(_) => {}
            _ => {
                for body in self.bodies() {
                    for b in body {
                        b.updated(out);
                    }
                }
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Program {
    #[serde(default)]
    pub functions: BTreeMap<String, FunctionDef>,
    pub blocks: Vec<StatementBlock>,
}

impl Program {
    pub fn new(blocks: Vec<StatementBlock>) -> Self {
        Self {
            functions: BTreeMap::new(),
            blocks,
        }
    }

    pub fn with_function(mut self, f: FunctionDef) -> Self {
        self.functions.insert(f.name.clone(), f);
        self
    }

    pub fn function(&self, name: &str) -> Option<&FunctionDef> {
        self.functions.get(name)
    }
}
