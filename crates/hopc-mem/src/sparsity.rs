//! Output sparsity of element-wise binary operators.
//!
//! The worst-case estimates are upper bounds used for memory estimation;
//! the average-case estimates assume independent non-zero placement and are
//! only exact for outer vector operations.

use hopc_core::types::OpOp2;

/// Sparsity of `op(A, B)` given input sparsities.
pub fn binary_op_sparsity(sp1: f64, sp2: f64, op: OpOp2, worst_case: bool) -> f64 {
    if worst_case {
        match op {
            OpOp2::Plus
            | OpOp2::Minus
            | OpOp2::Less
            | OpOp2::Greater
            | OpOp2::NotEqual
            | OpOp2::Min
            | OpOp2::Max
            | OpOp2::Or => (sp1 + sp2).min(1.0),
            OpOp2::Mult | OpOp2::And => sp1.min(sp2),
            OpOp2::Div => (sp1 + (1.0 - sp2)).min(1.0),
            OpOp2::Modulus | OpOp2::Pow | OpOp2::MinusNz => sp1,
            _ => 1.0,
        }
    } else {
        match op {
            OpOp2::Plus | OpOp2::Minus | OpOp2::Or | OpOp2::NotEqual => sp1 + sp2 - sp1 * sp2,
            OpOp2::Mult | OpOp2::And => sp1 * sp2,
            OpOp2::Less | OpOp2::Greater => sp1 + sp2 - sp1 * sp2,
            OpOp2::Modulus | OpOp2::Pow | OpOp2::MinusNz => sp1,
            _ => 1.0,
        }
    }
}

/// Worst-case sparsity of `A %*% B` with inner dimension `k`: each output
/// cell is non-zero as soon as one of the `k` products is.
pub fn matmult_sparsity(sp1: f64, sp2: f64, k: i64) -> f64 {
    if k < 0 {
        return 1.0;
    }
    let k = k as f64;
    ((sp1 * k).min(1.0) * (sp2 * k).min(1.0)).min(1.0)
}

pub fn is_binary_op_conditional_sparse_safe(op: OpOp2) -> bool {
    op.is_conditional_sparse_safe()
}

/// `X != 0` keeps the non-zero pattern exactly.
pub fn is_binary_op_conditional_sparse_safe_exact(op: OpOp2, literal: f64) -> bool {
    op == OpOp2::NotEqual && literal == 0.0
}

/// Sparsity of `op(X, literal)` for conditionally sparse-safe ops.
pub fn binary_op_sparsity_conditional_sparse_safe(sp1: f64, op: OpOp2, literal: f64) -> f64 {
    let keeps_pattern = (op == OpOp2::Greater && literal == 0.0)
        || (op == OpOp2::Less && literal == 0.0)
        || (op == OpOp2::NotEqual && literal == 0.0)
        || (op == OpOp2::Equal && literal != 0.0)
        || (op == OpOp2::Minus && literal == 0.0);
    if keeps_pattern {
        sp1
    } else {
        1.0
    }
}
