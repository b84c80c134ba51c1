//! Size-inference invariants over whole DAGs

use hopc_core::config::CompilerConfig;
use hopc_core::stats::UNKNOWN;
use hopc_core::types::OpOp2;
use hopc_hops::{annotate, propagate_sizes, HopDag};

const CELLWISE: [OpOp2; 19] = [
    OpOp2::Plus,
    OpOp2::Minus,
    OpOp2::Mult,
    OpOp2::Div,
    OpOp2::Modulus,
    OpOp2::IntDiv,
    OpOp2::Less,
    OpOp2::LessEqual,
    OpOp2::Greater,
    OpOp2::GreaterEqual,
    OpOp2::Equal,
    OpOp2::NotEqual,
    OpOp2::Min,
    OpOp2::Max,
    OpOp2::Log,
    OpOp2::Pow,
    OpOp2::And,
    OpOp2::Or,
    OpOp2::Xor,
];

#[test]
fn test_cellwise_output_keeps_operand_shape() {
    for op in CELLWISE {
        let mut dag = HopDag::new();
        let a = dag.read("A", 300, 40, -1).unwrap();
        let b = dag.read("B", 300, 40, -1).unwrap();
        let v = dag.read("v", 300, 1, -1).unwrap();
        let s = dag.lit_f64(2.0).unwrap();
        let mm = dag.binary(op, a, b).unwrap();
        let mv = dag.binary(op, a, v).unwrap();
        let ms = dag.binary(op, a, s).unwrap();
        dag.write("X", mm).unwrap();
        dag.write("Y", mv).unwrap();
        dag.write("Z", ms).unwrap();
        propagate_sizes(&mut dag);
        for id in [mm, mv, ms] {
            let h = dag.hop(id);
            assert_eq!((h.rows(), h.cols()), (300, 40), "{op:?}");
        }
    }
}

#[test]
fn test_rbind_adds_rows_and_nnz() {
    let mut dag = HopDag::new();
    let a = dag.read("A", 100, 7, 300).unwrap();
    let b = dag.read("B", 50, 7, 20).unwrap();
    let c = dag.read("C", 10, 7, -1).unwrap();
    let ab = dag.binary(OpOp2::Rbind, a, b).unwrap();
    let ac = dag.binary(OpOp2::Rbind, a, c).unwrap();
    dag.write("X", ab).unwrap();
    dag.write("Y", ac).unwrap();
    propagate_sizes(&mut dag);
    assert_eq!((dag.hop(ab).rows(), dag.hop(ab).cols(), dag.hop(ab).nnz()), (150, 7, 320));
    assert_eq!((dag.hop(ac).rows(), dag.hop(ac).nnz()), (110, UNKNOWN));
}

#[test]
fn test_size_inference_is_idempotent() {
    let cfg = CompilerConfig::default();
    let mut dag = HopDag::new();
    let x = dag.read("X", 1000, 100, 20_000).unwrap();
    let w = dag.read("w", 100, 1, -1).unwrap();
    let xw = dag.matmult(x, w).unwrap();
    let t = dag.transpose(x).unwrap();
    let g = dag.matmult(t, xw).unwrap();
    let r = dag.reshape(g, 10, -1).unwrap();
    dag.write("G", r).unwrap();
    annotate(&mut dag, &cfg);
    let first: Vec<_> = dag.topo_order().into_iter().map(|id| dag.hop(id).stats).collect();
    propagate_sizes(&mut dag);
    propagate_sizes(&mut dag);
    let second: Vec<_> = dag.topo_order().into_iter().map(|id| dag.hop(id).stats).collect();
    assert_eq!(first, second);
    assert_eq!((dag.hop(r).rows(), dag.hop(r).cols()), (10, 10));
}

#[test]
fn test_reshape_never_truncates() {
    let mut dag = HopDag::new();
    let x = dag.read("X", 6, 4, -1).unwrap();
    let even = dag.reshape(x, 8, -1).unwrap();
    let odd = dag.reshape(x, 5, -1).unwrap();
    dag.write("E", even).unwrap();
    dag.write("O", odd).unwrap();
    propagate_sizes(&mut dag);
    assert_eq!((dag.hop(even).rows(), dag.hop(even).cols()), (8, 3));
    assert_eq!(dag.hop(odd).cols(), UNKNOWN);
}
