//! Whole-program compilation across statement blocks

use hopc_core::config::CompilerConfig;
use hopc_core::types::{AggOp, Direction, OpOp2};
use hopc_program::{
    CompiledBlock, Expr, FunctionDef, PrintKind, Program, ProgramCompiler, Statement,
    StatementBlock, VarStats,
};

fn read(path: &str, rows: i64, cols: i64) -> Expr {
    Expr::Read {
        path: path.into(),
        rows,
        cols,
        nnz: -1,
    }
}

fn col_sums(x: Expr) -> Expr {
    Expr::Agg {
        op: AggOp::Sum,
        dir: Direction::Col,
        input: Box::new(x),
    }
}

#[test]
fn test_sizes_flow_through_blocks_and_functions() {
    let normalize = FunctionDef {
        name: "normalize".into(),
        params: vec!["M".into()],
        outputs: vec!["N".into()],
        body: vec![StatementBlock::basic(vec![Statement::assign(
            "N",
            Expr::binary(OpOp2::Div, Expr::var("M"), Expr::num(10.0)),
        )])],
    };
    let program = Program::new(vec![
        StatementBlock::basic(vec![Statement::assign("X", read("X", 500, 20))]),
        StatementBlock::basic(vec![
            Statement::assign("Z", Expr::call("normalize", vec![Expr::var("X")])),
            Statement::assign("s", col_sums(Expr::var("Z"))),
            Statement::Write {
                var: "s".into(),
                path: "out/s".into(),
            },
        ]),
    ])
    .with_function(normalize);

    let compiled = ProgramCompiler::new(CompilerConfig::default())
        .compile(&program, &VarStats::new())
        .unwrap();
    let s = compiled.live_out["s"];
    assert_eq!((s.stats.rows, s.stats.cols), (1, 20));
    assert_eq!(compiled.summary().dags, compiled.manifests().len());
}

#[test]
fn test_assert_keeps_blocks_apart() {
    let program = Program::new(vec![
        StatementBlock::basic(vec![Statement::assign("X", read("X", 10, 10))]),
        StatementBlock::basic(vec![Statement::Print {
            kind: PrintKind::Assert,
            exprs: vec![Expr::binary(OpOp2::Greater, Expr::var("n"), Expr::num(0.0))],
        }]),
        StatementBlock::basic(vec![Statement::assign(
            "Y",
            Expr::Transpose(Box::new(Expr::var("X"))),
        )]),
    ]);
    let live_in = VarStats::from([("n".to_string(), hopc_program::VarInfo::scalar())]);
    let compiled = ProgramCompiler::new(CompilerConfig::default())
        .compile(&program, &live_in)
        .unwrap();
    assert_eq!(compiled.blocks.len(), 3);
    assert!(compiled.blocks.iter().all(|b| matches!(b, CompiledBlock::Basic(_))));
}

#[test]
fn test_for_loop_body_is_marked_for_recompilation() {
    let program = Program::new(vec![
        StatementBlock::basic(vec![Statement::assign("X", read("X", 100, 100))]),
        StatementBlock::For {
            var: "i".into(),
            from: Expr::int(1),
            to: Expr::int(3),
            incr: None,
            body: vec![StatementBlock::basic(vec![Statement::assign(
                "X",
                Expr::MatMult {
                    left: Box::new(Expr::var("X")),
                    right: Box::new(Expr::var("X")),
                },
            )])],
        },
    ]);
    let compiled = ProgramCompiler::new(CompilerConfig::default())
        .compile(&program, &VarStats::new())
        .unwrap();
    let CompiledBlock::For { body, .. } = &compiled.blocks[1] else {
        panic!("expected a for block");
    };
    let CompiledBlock::Basic(d) = &body[0] else {
        panic!("expected a basic block");
    };
    let roots = d.dag.roots().to_vec();
    assert!(d
        .dag
        .post_order(&roots)
        .into_iter()
        .any(|id| d.dag.hop(id).requires_recompile));
}

#[test]
fn test_calls_to_undefined_functions_fail() {
    let program = Program::new(vec![StatementBlock::basic(vec![Statement::assign(
        "Y",
        Expr::call("missing", vec![]),
    )])]);
    let err = ProgramCompiler::new(CompilerConfig::default())
        .compile(&program, &VarStats::new())
        .unwrap_err();
    assert!(err.to_string().contains("missing"));
}
