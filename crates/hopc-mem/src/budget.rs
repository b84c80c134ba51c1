//! Budget checks: does an operand fit a broadcast, does an operator fit locally.
//!
//! All checks are pure functions of (dimensions, block size, bytes per cell)
//! and the budgets in [`CompilerConfig`].

use hopc_core::config::CompilerConfig;

use crate::size::{estimate_partitioned_size, estimate_size};

/// A broadcast must fit the broadcast budget and, since the driver holds the
/// source and the partitioned copy at the same time, twice its size must fit
/// the local budget.
pub fn check_broadcast_budget(size: f64, cfg: &CompilerConfig) -> bool {
    let ok = size < cfg.broadcast_mem_budget_bytes && 2.0 * size < cfg.local_mem_budget_bytes;
    #[cfg(feature = "tracing")]
    tracing::trace!(size, ok, "broadcast budget check");
    ok
}

/// Broadcast check for a block-partitioned operand of the given shape.
pub fn check_broadcast_budget_dims(
    rows: i64,
    cols: i64,
    blocksize: i64,
    nnz: i64,
    cfg: &CompilerConfig,
) -> bool {
    if rows < 0 || cols < 0 {
        return false;
    }
    check_broadcast_budget(estimate_partitioned_size(rows, cols, blocksize, nnz), cfg)
}

pub fn fits_local_budget(total: f64, cfg: &CompilerConfig) -> bool {
    total < cfg.local_mem_budget_bytes
}

/// Per-task footprint of a map-side append: one block of the left input,
/// the full right vector, and the merged boundary block.
pub fn footprint_in_mapper(
    m1_rows: i64,
    m1_cols: i64,
    m2_rows: i64,
    m2_cols: i64,
    rows_per_block: i64,
    cols_per_block: i64,
) -> f64 {
    estimate_size(m1_rows.min(rows_per_block), m1_cols.min(cols_per_block))
        + estimate_size(m2_rows, m2_cols)
        + estimate_size(
            m1_rows.min(rows_per_block),
            (m1_cols + m2_cols).min(cols_per_block),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_vector_fits_broadcast() {
        let cfg = CompilerConfig::default();
        assert!(check_broadcast_budget_dims(10_000, 1, 1000, -1, &cfg));
    }

    #[test]
    fn unknown_dims_never_broadcast() {
        let cfg = CompilerConfig::default();
        assert!(!check_broadcast_budget_dims(-1, 1, 1000, -1, &cfg));
    }

    #[test]
    fn broadcast_respects_local_budget() {
        let cfg = CompilerConfig {
            broadcast_mem_budget_bytes: 1e9,
            local_mem_budget_bytes: 1e6,
            ..Default::default()
        };
        assert!(!check_broadcast_budget(6e5, &cfg));
        assert!(check_broadcast_budget(4e5, &cfg));
    }

    #[test]
    fn mapper_footprint_is_bounded_by_blocks() {
        let small = footprint_in_mapper(10_000, 500, 10_000, 1, 1000, 1000);
        let expected = estimate_size(1000, 500) + estimate_size(10_000, 1) + estimate_size(1000, 501);
        assert_eq!(small, expected);
    }
}
