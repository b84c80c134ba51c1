//! Intermediate buffer requirements of individual operator kinds.

use serde::{Deserialize, Serialize};

use crate::size::{estimate_size, estimate_size_exact_sparsity, get_sparsity};

/// Bytes per entry of a sort index buffer.
const INDEX_ENTRY: f64 = 4.0;

/// Operator families with non-trivial intermediate buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntermediateKind {
    /// No intermediate state beyond the inputs and output.
    None,
    /// Sort; `skip_index` when the caller statically requests values only.
    Sort { skip_index: bool },
    /// Decomposition-based solve on the local backend.
    SolveLocal,
    /// Solve on the accelerator (column-major copies plus workspace).
    SolveAccelerator,
    /// Quantile/median/IQM: sorted copy plus weights.
    OrderStatistic,
}

/// Intermediate memory in bytes for an operator over an input of
/// `rows x cols` with `nnz` non-zeros (negative = unknown).
pub fn estimate_intermediate_memory(kind: IntermediateKind, rows: i64, cols: i64, nnz: i64) -> f64 {
    match kind {
        IntermediateKind::None => 0.0,
        IntermediateKind::Sort { skip_index } => {
            // Values-only sort of a single column (or an empty input) needs no index.
            if skip_index && (cols == 1 || nnz == 0) {
                0.0
            } else if rows < 0 {
                estimate_size(rows, 1)
            } else {
                rows as f64 * INDEX_ENTRY
            }
        }
        IntermediateKind::SolveLocal => estimate_size_exact_sparsity(rows, cols, 1.0),
        IntermediateKind::SolveAccelerator => {
            let tau = estimate_size(rows, 1);
            let work = estimate_size(rows, cols);
            let a_tmp = estimate_size(rows, cols);
            let b_tmp = estimate_size(cols, 1);
            tau + work + a_tmp + b_tmp
        }
        IntermediateKind::OrderStatistic => {
            3.0 * estimate_size_exact_sparsity(rows, cols, get_sparsity(rows, cols, nnz))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sort_index_buffer_scales_with_rows() {
        let a = estimate_intermediate_memory(IntermediateKind::Sort { skip_index: false }, 1000, 50, -1);
        let b = estimate_intermediate_memory(IntermediateKind::Sort { skip_index: false }, 1000, 5, -1);
        assert_eq!(a, 4000.0);
        assert_eq!(a, b);
    }

    #[test]
    fn sort_early_exit() {
        let kind = IntermediateKind::Sort { skip_index: true };
        assert_eq!(estimate_intermediate_memory(kind, 1000, 1, -1), 0.0);
        assert_eq!(estimate_intermediate_memory(kind, 1000, 7, 0), 0.0);
        assert_eq!(estimate_intermediate_memory(kind, 1000, 7, 10), 4000.0);
    }

    #[test]
    fn accelerator_solve_needs_more_than_local() {
        let local = estimate_intermediate_memory(IntermediateKind::SolveLocal, 500, 100, -1);
        let accel = estimate_intermediate_memory(IntermediateKind::SolveAccelerator, 500, 100, -1);
        assert!(accel > 2.0 * local);
    }
}
