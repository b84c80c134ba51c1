//! Distributed strategy selection for append and matrix-matrix binary ops.
//!
//! Both selectors are fixed decision trees over sizes, block size and the
//! broadcast budget. They never fail.

use hopc_core::config::CompilerConfig;
use hopc_core::id::HopId;
use hopc_core::stats::MatrixCharacteristics;
use hopc_core::types::{AppendMethod, BinaryMethod, DataType, Direction};
use hopc_hops::{HopDag, HopKind};
use hopc_mem::{check_broadcast_budget, check_broadcast_budget_dims, estimate_size};

/// Choose the distributed append strategy for `m1 ++ m2`.
///
/// 1. a forced method wins;
/// 2. map-only when the second input is known, fits into one block along
///    the append axis and can be broadcast (frames only for cbind);
/// 3. reduce-only when the whole appended axis fits into one block, or for
///    any frame;
/// 4. block-aligned when the first input ends on a block boundary;
/// 5. general otherwise.
pub fn select_append_method(
    m1: &MatrixCharacteristics,
    m2: &MatrixCharacteristics,
    blocksize: i64,
    cbind: bool,
    dt: DataType,
    cfg: &CompilerConfig,
) -> AppendMethod {
    if let Some(forced) = cfg.forced_append_method {
        return forced;
    }

    let m2_axis = if cbind { m2.cols } else { m2.rows };
    let dt_ok = dt == DataType::Matrix || (dt == DataType::Frame && cbind);
    if m2.rows >= 1
        && m2.cols >= 1
        && m2_axis <= blocksize
        && dt_ok
        && check_broadcast_budget_dims(m2.rows, m2.cols, blocksize, m2.nnz, cfg)
    {
        return AppendMethod::MapOnly;
    }

    let m1_axis = if cbind { m1.cols } else { m1.rows };
    if (m1_axis >= 1 && m2_axis >= 0 && m1_axis + m2_axis <= blocksize) || dt == DataType::Frame {
        return AppendMethod::ReduceOnly;
    }

    if m1_axis >= 0 && blocksize > 0 && m1_axis % blocksize == 0 {
        return AppendMethod::BlockAligned;
    }

    AppendMethod::General
}

/// Choose the distributed strategy for a matrix-matrix binary op.
///
/// `op(X, agg(X))` with a row/col aggregate over a single block becomes a
/// uagg chain; a known vector right operand that fits the broadcast budget
/// is broadcast; everything else is a shuffle join.
pub fn select_binary_method(
    dag: &HopDag,
    left: HopId,
    right: HopId,
    cfg: &CompilerConfig,
) -> BinaryMethod {
    let bs = dag.blocksize();
    let m1 = dag.hop(left).stats;
    let r = dag.hop(right);
    let m2 = r.stats;

    if cfg.allow_operator_fusion {
        if let HopKind::AggUnary { dir, .. } = r.kind {
            if r.inputs.first() == Some(&left) {
                let single = match dir {
                    Direction::Row => m1.cols > 1 && m1.cols <= bs,
                    Direction::Col => m1.rows > 1 && m1.rows <= bs,
                    Direction::RowCol => false,
                };
                if single {
                    return BinaryMethod::UAggChain;
                }
            }
        }
    }

    if m2.rows >= 1
        && m2.cols >= 1
        && ((m1.cols >= 1 && m2.cols == 1) || (m1.rows >= 1 && m2.rows == 1))
        && check_broadcast_budget(estimate_size(m2.rows, m2.cols), cfg)
    {
        return BinaryMethod::Broadcast;
    }

    BinaryMethod::Shuffle
}

/// Whether a distributed matrix-vector op needs the vector replicated
/// across blocks instead of a plain block join.
pub fn requires_replication(left: &MatrixCharacteristics, right: &MatrixCharacteristics) -> bool {
    left.cols < 1
        || right.cols < 1
        || (left.cols > 1 && right.cols == 1 && left.cols >= left.blocksize)
        || (left.rows > 1 && right.rows == 1 && left.rows >= left.blocksize)
}

/// Broadcast column-vector flag of a `BinaryM`: the right operand is a
/// column vector matching the left's rows.
pub fn is_col_vector(left: &MatrixCharacteristics, right: &MatrixCharacteristics) -> bool {
    right.cols == 1 && left.rows == right.rows
}

/// Whether a distributed sort can build its index in memory from a
/// broadcast of the sort column.
pub fn sort_index_in_memory(dag: &HopDag, sort: HopId, cfg: &CompilerConfig) -> bool {
    if cfg.force_dist_sort_indexes {
        return false;
    }
    let hop = dag.hop(sort);
    let input = dag.input(sort, 0);
    let size = if input.dims_known() {
        estimate_size(input.rows(), 1)
    } else {
        hop.mem.output
    };
    let by_scalar = hop
        .inputs
        .get(1)
        .map(|&b| dag.hop(b).is_scalar())
        .unwrap_or(false);
    by_scalar && check_broadcast_budget(size, cfg)
}
