//! Size/sparsity statistics of an operator output.
//!
//! Every dimension and the non-zero count is a signed 64-bit value where a
//! negative value (canonically `-1`) means *unknown*.

use serde::{Deserialize, Serialize};

/// Sentinel for an unknown dimension or non-zero count.
pub const UNKNOWN: i64 = -1;

/// Default rows/cols per block.
pub const DEFAULT_BLOCKSIZE: i64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MatrixCharacteristics {
    pub rows: i64,
    pub cols: i64,
    pub nnz: i64,
    pub blocksize: i64,
}

impl Default for MatrixCharacteristics {
    fn default() -> Self {
        Self::unknown(DEFAULT_BLOCKSIZE)
    }
}

impl MatrixCharacteristics {
    pub const fn new(rows: i64, cols: i64, nnz: i64, blocksize: i64) -> Self {
        Self {
            rows,
            cols,
            nnz,
            blocksize,
        }
    }

    pub const fn unknown(blocksize: i64) -> Self {
        Self::new(UNKNOWN, UNKNOWN, UNKNOWN, blocksize)
    }

    /// Shape of a scalar (0x0).
    pub const fn scalar() -> Self {
        Self::new(0, 0, UNKNOWN, DEFAULT_BLOCKSIZE)
    }

    pub fn rows_known(&self) -> bool {
        self.rows >= 0
    }
    pub fn cols_known(&self) -> bool {
        self.cols >= 0
    }
    pub fn dims_known(&self) -> bool {
        self.rows_known() && self.cols_known()
    }
    pub fn nnz_known(&self) -> bool {
        self.nnz >= 0
    }

    /// Number of cells, when both dimensions are known.
    pub fn cells(&self) -> Option<i64> {
        if self.dims_known() {
            Some(self.rows.saturating_mul(self.cols))
        } else {
            None
        }
    }

    /// nnz/(rows*cols) when everything is known; otherwise 1.0 (dense).
    pub fn sparsity(&self) -> f64 {
        match self.cells() {
            Some(0) => 0.0,
            Some(cells) if self.nnz_known() => (self.nnz as f64 / cells as f64).min(1.0),
            _ => 1.0,
        }
    }

    pub fn is_vector(&self) -> bool {
        self.dims_known() && (self.rows == 1 || self.cols == 1)
    }

    pub fn is_col_vector(&self) -> bool {
        self.dims_known() && self.cols == 1 && self.rows > 1
    }

    pub fn is_row_vector(&self) -> bool {
        self.dims_known() && self.rows == 1 && self.cols > 1
    }

    /// Both dimensions known and at most `threshold`.
    pub fn dims_below(&self, threshold: i64) -> bool {
        self.dims_known() && self.rows <= threshold && self.cols <= threshold
    }

    /// Fits into a single block in both dimensions.
    pub fn is_single_block(&self) -> bool {
        self.dims_known() && self.rows <= self.blocksize && self.cols <= self.blocksize
    }

    pub fn with_dims(mut self, rows: i64, cols: i64) -> Self {
        self.rows = rows;
        self.cols = cols;
        self
    }

    pub fn with_nnz(mut self, nnz: i64) -> Self {
        self.nnz = nnz;
        self
    }

    pub fn as_triple(&self) -> [i64; 3] {
        [self.rows, self.cols, self.nnz]
    }
}
