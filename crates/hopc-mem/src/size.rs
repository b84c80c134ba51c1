//! In-memory size of a matrix block given its shape and sparsity.

/// Footprint assumed for outputs of unknown shape, and for appends when
/// dynamic recompilation is disabled. Large enough to exceed any local
/// budget, which routes such operators to the distributed backend.
pub const DEFAULT_SIZE: f64 = 1024.0 * 1024.0 * 1024.0 * 1024.0;

const DOUBLE_SIZE: f64 = 8.0;
const BLOCK_HEADER: f64 = 44.0;
/// Per-row cost of the sparse row array (pointer + row object header).
const SPARSE_ROW_OVERHEAD: f64 = 16.0;
/// Per-non-zero cost in sparse format (f64 value + i32 column index).
const SPARSE_CELL: f64 = 12.0;
/// Below this sparsity a multi-column block is held in sparse format.
const SPARSITY_TURN_POINT: f64 = 0.4;
/// Fixed cost per block of a partitioned broadcast.
const PARTITION_OVERHEAD: f64 = 64.0;

/// nnz/(rows*cols); 1.0 when anything is unknown.
pub fn get_sparsity(rows: i64, cols: i64, nnz: i64) -> f64 {
    if rows < 0 || cols < 0 || nnz < 0 {
        return 1.0;
    }
    let cells = rows as f64 * cols as f64;
    if cells == 0.0 {
        return 0.0;
    }
    (nnz as f64 / cells).min(1.0)
}

fn is_sparse_format(cols: i64, sparsity: f64) -> bool {
    cols > 1 && sparsity < SPARSITY_TURN_POINT
}

/// Size in bytes of a `rows x cols` block with the given sparsity, in the
/// format (dense or sparse) the runtime would pick for it.
pub fn estimate_size_exact_sparsity(rows: i64, cols: i64, sparsity: f64) -> f64 {
    if rows < 0 || cols < 0 {
        return DEFAULT_SIZE;
    }
    let r = rows as f64;
    let c = cols as f64;
    let sp = sparsity.clamp(0.0, 1.0);
    if is_sparse_format(cols, sp) {
        let nnz = (sp * r * c).ceil();
        BLOCK_HEADER + r * SPARSE_ROW_OVERHEAD + nnz * SPARSE_CELL
    } else {
        BLOCK_HEADER + r * c * DOUBLE_SIZE
    }
}

/// Dense worst case.
pub fn estimate_size(rows: i64, cols: i64) -> f64 {
    estimate_size_exact_sparsity(rows, cols, 1.0)
}

/// Output-memory estimate: unknown sparsity is treated as dense.
pub fn estimate_output_memory(rows: i64, cols: i64, sparsity: Option<f64>) -> f64 {
    estimate_size_exact_sparsity(rows, cols, sparsity.unwrap_or(1.0))
}

/// Size of a block-partitioned copy (as shipped in a broadcast).
pub fn estimate_partitioned_size(rows: i64, cols: i64, blocksize: i64, nnz: i64) -> f64 {
    if rows < 0 || cols < 0 || blocksize <= 0 {
        return DEFAULT_SIZE;
    }
    let sp = get_sparsity(rows, cols, nnz);
    let nblocks = ((rows + blocksize - 1) / blocksize).max(1) * ((cols + blocksize - 1) / blocksize).max(1);
    estimate_size_exact_sparsity(rows, cols, sp) + nblocks as f64 * PARTITION_OVERHEAD
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dense_size() {
        assert_eq!(estimate_size(1000, 1), BLOCK_HEADER + 8000.0);
    }

    #[test]
    fn unknown_dims_are_default() {
        assert_eq!(estimate_size(-1, 10), DEFAULT_SIZE);
        assert_eq!(estimate_partitioned_size(10, -1, 1000, 5), DEFAULT_SIZE);
    }

    #[test]
    fn sparse_is_smaller_than_dense() {
        let dense = estimate_size_exact_sparsity(1000, 1000, 1.0);
        let sparse = estimate_size_exact_sparsity(1000, 1000, 0.01);
        assert!(sparse < dense / 10.0);
    }

    #[test]
    fn column_vectors_stay_dense() {
        assert_eq!(
            estimate_size_exact_sparsity(1000, 1, 0.01),
            estimate_size(1000, 1)
        );
    }

    #[test]
    fn unknown_nnz_sparsity_is_dense() {
        assert_eq!(get_sparsity(10, 10, -1), 1.0);
        assert_eq!(estimate_output_memory(10, 10, None), estimate_size(10, 10));
    }
}
