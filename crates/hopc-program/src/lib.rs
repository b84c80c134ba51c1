#![forbid(unsafe_code)]
//! hopc-program: statement blocks and the whole-program compile driver.
//!
//! A program is a list of statement blocks (basic blocks plus while, if,
//! for and function blocks) over a small expression AST ([`ast`]). Before
//! any DAG is built, block-level rewrites run over the program
//! ([`rewrite`]): function calls are hoisted out of expressions, inlineable
//! functions are inlined, adjacent basic blocks are merged and constants are
//! propagated. Each basic block then becomes one hop DAG ([`builder`]) that
//! the driver ([`driver`]) rewrites, annotates, fuses and lowers.

pub mod ast;
pub mod block;
pub mod builder;
pub mod driver;
pub mod error;
pub mod rewrite;

pub use ast::{Expr, PrintKind, Statement};
pub use block::{FunctionDef, Program, StatementBlock};
pub use builder::{build_block_dag, build_predicate_dag, BlockDag, VarInfo, VarStats};
pub use driver::{CompiledBlock, CompiledDag, CompiledProgram, ProgramCompiler, ProgramSummary};
pub use error::{Error, Result};
pub use rewrite::{
    hoist_function_calls, inline_function_calls, is_inlineable_function, merge_function_calls,
    merge_statement_blocks, propagate_constants, ConstMap,
};
