#![forbid(unsafe_code)]
//! hopc-mem: pure memory/cost estimation functions.
//!
//! Every operator consults this crate to decide whether a computation fits
//! a per-node memory budget. All functions are side-effect free and treat
//! unknown dimensions or non-zero counts conservatively: unknown sparsity is
//! dense, unknown shape is [`DEFAULT_SIZE`].

pub mod budget;
pub mod intermediate;
pub mod size;
pub mod sparsity;

pub use budget::{
    check_broadcast_budget, check_broadcast_budget_dims, fits_local_budget, footprint_in_mapper,
};
pub use intermediate::{estimate_intermediate_memory, IntermediateKind};
pub use size::{
    estimate_output_memory, estimate_partitioned_size, estimate_size,
    estimate_size_exact_sparsity, get_sparsity, DEFAULT_SIZE,
};
pub use sparsity::{
    binary_op_sparsity, binary_op_sparsity_conditional_sparse_safe,
    is_binary_op_conditional_sparse_safe, is_binary_op_conditional_sparse_safe_exact,
    matmult_sparsity,
};
