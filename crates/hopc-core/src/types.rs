//! Data/value/exec types and the operator symbol tables shared by all layers.
//!
//! The operator enums carry the static facts the optimizer needs about each
//! symbol (sparse-safety class, matrix-scalar support, accelerator support),
//! so that decision procedures never have to string-match operator names.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Matrix,
    Frame,
    Scalar,
}

impl DataType {
    pub fn is_matrix(self) -> bool {
        self == DataType::Matrix
    }
    pub fn is_scalar(self) -> bool {
        self == DataType::Scalar
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    Fp64,
    Int64,
    Boolean,
    String,
}

/// Backend an operator is compiled for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecType {
    /// Single-node, in-memory.
    Local,
    /// Distributed data-parallel.
    Distributed,
    /// GPU-like accelerator.
    Accelerator,
}

impl fmt::Display for ExecType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecType::Local => "LOCAL",
            ExecType::Distributed => "DIST",
            ExecType::Accelerator => "ACCEL",
        };
        f.write_str(s)
    }
}

/// Aggregation direction of an aggregate-unary operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// One value per row (`rowSums`), output is a column vector.
    Row,
    /// One value per column (`colSums`), output is a row vector.
    Col,
    /// Full aggregate, output is a scalar.
    RowCol,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggOp {
    Sum,
    SumSq,
    Min,
    Max,
    Mean,
    Prod,
}

impl AggOp {
    pub fn symbol(self) -> &'static str {
        match self {
            AggOp::Sum => "sum",
            AggOp::SumSq => "sumsq",
            AggOp::Min => "min",
            AggOp::Max => "max",
            AggOp::Mean => "mean",
            AggOp::Prod => "prod",
        }
    }

    /// Aggregates a fused cell/row kernel can compute in a single pass.
    pub fn is_fusable(self) -> bool {
        matches!(self, AggOp::Sum | AggOp::SumSq | AggOp::Min | AggOp::Max)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpOp1 {
    Exp,
    Log,
    Abs,
    Sqrt,
    Round,
    Sign,
    Sigmoid,
    Not,
    CastAsMatrix,
    CastAsScalar,
    Nrow,
    Ncol,
    Length,
}

impl OpOp1 {
    pub fn symbol(self) -> &'static str {
        match self {
            OpOp1::Exp => "exp",
            OpOp1::Log => "log",
            OpOp1::Abs => "abs",
            OpOp1::Sqrt => "sqrt",
            OpOp1::Round => "round",
            OpOp1::Sign => "sign",
            OpOp1::Sigmoid => "sigmoid",
            OpOp1::Not => "!",
            OpOp1::CastAsMatrix => "castdtm",
            OpOp1::CastAsScalar => "castdts",
            OpOp1::Nrow => "nrow",
            OpOp1::Ncol => "ncol",
            OpOp1::Length => "length",
        }
    }

    /// Cell-wise unary ops (matrix in, matrix of same shape out).
    pub fn is_cellwise(self) -> bool {
        matches!(
            self,
            OpOp1::Exp
                | OpOp1::Log
                | OpOp1::Abs
                | OpOp1::Sqrt
                | OpOp1::Round
                | OpOp1::Sign
                | OpOp1::Sigmoid
                | OpOp1::Not
        )
    }

    /// f(0) == 0, so the output keeps the input's non-zero pattern.
    pub fn is_sparse_safe(self) -> bool {
        matches!(
            self,
            OpOp1::Abs | OpOp1::Sqrt | OpOp1::Round | OpOp1::Sign
        )
    }

    /// Ops that only read metadata and always produce a scalar.
    pub fn is_metadata(self) -> bool {
        matches!(self, OpOp1::Nrow | OpOp1::Ncol | OpOp1::Length)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpOp2 {
    Plus,
    Minus,
    Mult,
    Div,
    Modulus,
    IntDiv,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Equal,
    NotEqual,
    Min,
    Max,
    And,
    Or,
    Xor,
    Pow,
    Log,
    MinusNz,
    Minus1Mult,
    Cbind,
    Rbind,
    Solve,
    Quantile,
    InterQuantile,
    Iqm,
    Median,
    Moment,
    Cov,
}

impl OpOp2 {
    pub fn symbol(self) -> &'static str {
        match self {
            OpOp2::Plus => "+",
            OpOp2::Minus => "-",
            OpOp2::Mult => "*",
            OpOp2::Div => "/",
            OpOp2::Modulus => "%%",
            OpOp2::IntDiv => "%/%",
            OpOp2::Less => "<",
            OpOp2::LessEqual => "<=",
            OpOp2::Greater => ">",
            OpOp2::GreaterEqual => ">=",
            OpOp2::Equal => "==",
            OpOp2::NotEqual => "!=",
            OpOp2::Min => "min",
            OpOp2::Max => "max",
            OpOp2::And => "&",
            OpOp2::Or => "|",
            OpOp2::Xor => "xor",
            OpOp2::Pow => "^",
            OpOp2::Log => "log",
            OpOp2::MinusNz => "-nz",
            OpOp2::Minus1Mult => "1-*",
            OpOp2::Cbind => "cbind",
            OpOp2::Rbind => "rbind",
            OpOp2::Solve => "solve",
            OpOp2::Quantile => "quantile",
            OpOp2::InterQuantile => "interquantile",
            OpOp2::Iqm => "iqm",
            OpOp2::Median => "median",
            OpOp2::Moment => "cm",
            OpOp2::Cov => "cov",
        }
    }

    pub fn is_append(self) -> bool {
        matches!(self, OpOp2::Cbind | OpOp2::Rbind)
    }

    /// Relational predicates producing 0/1 cells.
    pub fn is_ppred(self) -> bool {
        matches!(
            self,
            OpOp2::Less
                | OpOp2::LessEqual
                | OpOp2::Greater
                | OpOp2::GreaterEqual
                | OpOp2::Equal
                | OpOp2::NotEqual
        )
    }

    /// Order-statistic and moment ops that are lowered through a sort.
    pub fn is_order_statistic(self) -> bool {
        matches!(
            self,
            OpOp2::Quantile | OpOp2::InterQuantile | OpOp2::Iqm | OpOp2::Median
        )
    }

    /// Cell-wise ops that can appear inside a fused kernel.
    pub fn is_cellwise(self) -> bool {
        !self.is_append()
            && !self.is_order_statistic()
            && !matches!(self, OpOp2::Solve | OpOp2::Moment | OpOp2::Cov)
    }

    /// Predicate with inverted truth value, if one exists.
    pub fn complement(self) -> Option<OpOp2> {
        match self {
            OpOp2::Less => Some(OpOp2::GreaterEqual),
            OpOp2::LessEqual => Some(OpOp2::Greater),
            OpOp2::Greater => Some(OpOp2::LessEqual),
            OpOp2::GreaterEqual => Some(OpOp2::Less),
            OpOp2::Equal => Some(OpOp2::NotEqual),
            OpOp2::NotEqual => Some(OpOp2::Equal),
            _ => None,
        }
    }

    pub fn supports_matrix_scalar(self) -> bool {
        matches!(
            self,
            OpOp2::Plus
                | OpOp2::Minus
                | OpOp2::Mult
                | OpOp2::Div
                | OpOp2::Modulus
                | OpOp2::IntDiv
                | OpOp2::Less
                | OpOp2::LessEqual
                | OpOp2::Greater
                | OpOp2::GreaterEqual
                | OpOp2::Equal
                | OpOp2::NotEqual
                | OpOp2::Min
                | OpOp2::Max
                | OpOp2::Log
                | OpOp2::Pow
                | OpOp2::And
                | OpOp2::Or
                | OpOp2::Xor
        )
    }

    /// Zero in either operand yields zero (`0*x == 0`).
    pub fn is_sparse_safe(self) -> bool {
        matches!(self, OpOp2::Mult | OpOp2::And | OpOp2::MinusNz | OpOp2::Minus1Mult)
    }

    /// Sparse-safe only for particular literal right operands (`X > 0`, `X - 0`).
    pub fn is_conditional_sparse_safe(self) -> bool {
        matches!(
            self,
            OpOp2::Greater | OpOp2::Less | OpOp2::NotEqual | OpOp2::Equal | OpOp2::Minus
        )
    }

    /// Ops the accelerator backend implements for matrix-matrix and
    /// matrix-scalar operands.
    pub fn is_accelerator_supported(self) -> bool {
        matches!(
            self,
            OpOp2::Mult
                | OpOp2::Plus
                | OpOp2::Minus
                | OpOp2::Div
                | OpOp2::Pow
                | OpOp2::Minus1Mult
                | OpOp2::Modulus
                | OpOp2::IntDiv
                | OpOp2::Less
                | OpOp2::LessEqual
                | OpOp2::Equal
                | OpOp2::NotEqual
                | OpOp2::Greater
                | OpOp2::GreaterEqual
        )
    }

    /// Ops the accelerator only implements when one operand is a scalar.
    pub fn is_accelerator_matrix_scalar_only(self) -> bool {
        matches!(self, OpOp2::MinusNz | OpOp2::Min | OpOp2::Max)
    }

    /// Ops with no accelerator implementation at all.
    pub fn is_accelerator_excluded(self) -> bool {
        matches!(
            self,
            OpOp2::Iqm
                | OpOp2::Moment
                | OpOp2::Cov
                | OpOp2::Quantile
                | OpOp2::InterQuantile
                | OpOp2::Median
        )
    }

    /// Evaluate on two scalar literals (constant folding).
    pub fn eval(self, a: f64, b: f64) -> Option<f64> {
        let bool_of = |v: bool| if v { 1.0 } else { 0.0 };
        let v = match self {
            OpOp2::Plus => a + b,
            OpOp2::Minus => a - b,
            OpOp2::Mult => a * b,
            OpOp2::Div => a / b,
            OpOp2::Modulus => a - (a / b).floor() * b,
            OpOp2::IntDiv => (a / b).floor(),
            OpOp2::Less => bool_of(a < b),
            OpOp2::LessEqual => bool_of(a <= b),
            OpOp2::Greater => bool_of(a > b),
            OpOp2::GreaterEqual => bool_of(a >= b),
            OpOp2::Equal => bool_of(a == b),
            OpOp2::NotEqual => bool_of(a != b),
            OpOp2::Min => a.min(b),
            OpOp2::Max => a.max(b),
            OpOp2::And => bool_of(a != 0.0 && b != 0.0),
            OpOp2::Or => bool_of(a != 0.0 || b != 0.0),
            OpOp2::Xor => bool_of((a != 0.0) != (b != 0.0)),
            OpOp2::Pow => a.powf(b),
            OpOp2::Log => a.ln() / b.ln(),
            _ => return None,
        };
        Some(v)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReorgOp {
    Transpose,
    Diag,
    Rev,
    Reshape,
    Sort,
}

impl ReorgOp {
    pub fn symbol(self) -> &'static str {
        match self {
            ReorgOp::Transpose => "t",
            ReorgOp::Diag => "diag",
            ReorgOp::Rev => "rev",
            ReorgOp::Reshape => "rshape",
            ReorgOp::Sort => "rsort",
        }
    }

    /// Number of operands: reshape and sort carry their parameters as inputs.
    pub fn arity(self) -> usize {
        match self {
            ReorgOp::Transpose | ReorgOp::Diag | ReorgOp::Rev => 1,
            ReorgOp::Reshape | ReorgOp::Sort => 5,
        }
    }
}

/// Fusion template families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub enum TemplateType {
    /// Element-wise chains with optional aggregation.
    Cell,
    /// Row-wise chains (matrix-vector, row aggregates).
    Row,
    /// Sparsity-exploiting outer products (`X * (U %*% t(V))`).
    Outer,
    /// Several full aggregates over a shared input.
    MultiAgg,
}

impl fmt::Display for TemplateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TemplateType::Cell => "CELL",
            TemplateType::Row => "ROW",
            TemplateType::Outer => "OUTER",
            TemplateType::MultiAgg => "MAGG",
        };
        f.write_str(s)
    }
}

/// Distributed realizations of cbind/rbind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AppendMethod {
    /// Single-node append.
    Local,
    /// Broadcast the second operand, no shuffle.
    MapOnly,
    /// Result occupies a single block along the axis.
    ReduceOnly,
    /// First operand ends on a block boundary.
    BlockAligned,
    /// General shuffle-based append.
    General,
}

/// Realizations of a matrix-matrix element-wise binary operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryMethod {
    Local,
    /// Shuffle/join both operands.
    Shuffle,
    /// Broadcast the vector operand.
    Broadcast,
    /// Outer vector operation.
    Outer,
    /// Fused with the row/col aggregate of the left operand.
    UAggChain,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complement_round_trips_for_predicates() {
        for op in [
            OpOp2::Less,
            OpOp2::LessEqual,
            OpOp2::Greater,
            OpOp2::GreaterEqual,
            OpOp2::Equal,
            OpOp2::NotEqual,
        ] {
            let c = op.complement().unwrap();
            assert_eq!(c.complement(), Some(op));
        }
        assert_eq!(OpOp2::Plus.complement(), None);
    }

    #[test]
    fn append_and_order_stats_are_not_cellwise() {
        assert!(!OpOp2::Cbind.is_cellwise());
        assert!(!OpOp2::Median.is_cellwise());
        assert!(OpOp2::Mult.is_cellwise());
        assert!(OpOp2::Greater.is_cellwise());
    }

    #[test]
    fn scalar_eval() {
        assert_eq!(OpOp2::Plus.eval(1.0, 2.0), Some(3.0));
        assert_eq!(OpOp2::Greater.eval(1.0, 2.0), Some(0.0));
        assert_eq!(OpOp2::Modulus.eval(-1.0, 3.0), Some(2.0));
        assert_eq!(OpOp2::Cbind.eval(1.0, 2.0), None);
    }
}
