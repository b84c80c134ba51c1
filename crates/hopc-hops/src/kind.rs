//! Operator kinds: a closed sum type, one variant per operator family.

use serde::{Deserialize, Serialize};

use hopc_core::error::{Error, Result};
use hopc_core::id::KernelId;
use hopc_core::types::{AggOp, Direction, OpOp1, OpOp2, ReorgOp, TemplateType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataOpKind {
    /// Variable read from the enclosing block's live-in set.
    TransientRead,
    /// Read from persistent storage with metadata-provided size.
    PersistentRead,
    /// Variable handed to the next block.
    TransientWrite,
    /// Write to persistent storage.
    PersistentWrite,
}

impl DataOpKind {
    pub fn is_read(self) -> bool {
        matches!(self, DataOpKind::TransientRead | DataOpKind::PersistentRead)
    }
    pub fn is_write(self) -> bool {
        !self.is_read()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LiteralValue {
    Float(f64),
    Int(i64),
    Bool(bool),
    Str(String),
}

impl LiteralValue {
    /// Numeric view; booleans map to 0/1, strings have none.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            LiteralValue::Float(v) => Some(*v),
            LiteralValue::Int(v) => Some(*v as f64),
            LiteralValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            LiteralValue::Str(_) => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            LiteralValue::Bool(b) => Some(*b),
            LiteralValue::Int(v) => Some(*v != 0),
            LiteralValue::Float(v) => Some(*v != 0.0),
            LiteralValue::Str(_) => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            LiteralValue::Int(v) => Some(*v),
            LiteralValue::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            _ => None,
        }
    }

    /// Structural identity, bit-exact for floats (used by CSE).
    pub fn key(&self) -> String {
        match self {
            LiteralValue::Float(v) => format!("f{:016x}", v.to_bits()),
            LiteralValue::Int(v) => format!("i{v}"),
            LiteralValue::Bool(b) => format!("b{b}"),
            LiteralValue::Str(s) => format!("s{s}"),
        }
    }
}

impl std::fmt::Display for LiteralValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LiteralValue::Float(v) => write!(f, "{v}"),
            LiteralValue::Int(v) => write!(f, "{v}"),
            LiteralValue::Bool(b) => write!(f, "{}", if *b { "TRUE" } else { "FALSE" }),
            LiteralValue::Str(s) => write!(f, "\"{s}\""),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HopKind {
    Data(DataOpKind),
    Literal(LiteralValue),
    Unary(OpOp1),
    Binary {
        op: OpOp2,
        /// Outer vector operation: rows from the left, cols from the right.
        outer: bool,
    },
    /// Reshape inputs: `[X, rows, cols, dims, byrow]`;
    /// sort inputs: `[X, by, decreasing, index_return, stable]`.
    Reorg(ReorgOp),
    AggUnary {
        op: AggOp,
        dir: Direction,
    },
    MatMult,
    /// Right indexing with 1-based inclusive literal bounds.
    Index {
        row_lower: i64,
        row_upper: i64,
        col_lower: i64,
        col_upper: i64,
    },
    /// Operator synthesized by the fusion optimizer.
    Fused {
        kernel: KernelId,
        template: TemplateType,
        class_name: String,
    },
}

impl HopKind {
    /// Short opcode used by EXPLAIN and CSE keys.
    pub fn opcode(&self) -> String {
        match self {
            HopKind::Data(DataOpKind::TransientRead) => "TRead".into(),
            HopKind::Data(DataOpKind::PersistentRead) => "PRead".into(),
            HopKind::Data(DataOpKind::TransientWrite) => "TWrite".into(),
            HopKind::Data(DataOpKind::PersistentWrite) => "PWrite".into(),
            HopKind::Literal(v) => format!("lit({v})"),
            HopKind::Unary(op) => format!("u({})", op.symbol()),
            HopKind::Binary { op, outer: false } => format!("b({})", op.symbol()),
            HopKind::Binary { op, outer: true } => format!("b({}, outer)", op.symbol()),
            HopKind::Reorg(op) => format!("r({})", op.symbol()),
            HopKind::AggUnary { op, dir } => {
                let d = match dir {
                    Direction::Row => "r",
                    Direction::Col => "c",
                    Direction::RowCol => "",
                };
                format!("ua({}{})", d, op.symbol())
            }
            HopKind::MatMult => "ba(+*)".into(),
            HopKind::Index {
                row_lower,
                row_upper,
                col_lower,
                col_upper,
            } => format!("rix[{row_lower}:{row_upper},{col_lower}:{col_upper}]"),
            HopKind::Fused {
                template,
                class_name,
                ..
            } => format!("spoof({template},{class_name})"),
        }
    }

    pub fn is_data(&self) -> bool {
        matches!(self, HopKind::Data(_))
    }

    pub fn is_literal(&self) -> bool {
        matches!(self, HopKind::Literal(_))
    }

    pub fn is_transpose(&self) -> bool {
        matches!(self, HopKind::Reorg(ReorgOp::Transpose))
    }

    pub fn binary_op(&self) -> Option<OpOp2> {
        match self {
            HopKind::Binary { op, .. } => Some(*op),
            _ => None,
        }
    }
}

/// Reject operand counts that do not match the operator's arity.
pub fn check_arity(kind: &HopKind, num_inputs: usize) -> Result<()> {
    let ok = match kind {
        HopKind::Data(op) if op.is_read() => num_inputs == 0,
        HopKind::Data(_) => num_inputs == 1,
        HopKind::Literal(_) => num_inputs == 0,
        HopKind::Unary(_) | HopKind::AggUnary { .. } | HopKind::Index { .. } => num_inputs == 1,
        HopKind::Binary { .. } | HopKind::MatMult => num_inputs == 2,
        HopKind::Reorg(op) => num_inputs == op.arity(),
        HopKind::Fused { .. } => num_inputs >= 1,
    };
    if ok {
        Ok(())
    } else {
        Err(Error::Structural(format!(
            "operator {} expects {} inputs, got {}",
            kind.opcode(),
            expected_arity(kind),
            num_inputs
        )))
    }
}

fn expected_arity(kind: &HopKind) -> &'static str {
    match kind {
        HopKind::Data(op) if op.is_read() => "0",
        HopKind::Literal(_) => "0",
        HopKind::Data(_) | HopKind::Unary(_) | HopKind::AggUnary { .. } | HopKind::Index { .. } => {
            "1"
        }
        HopKind::Binary { .. } | HopKind::MatMult => "2",
        HopKind::Reorg(op) if op.arity() == 5 => "5",
        HopKind::Reorg(_) => "1",
        HopKind::Fused { .. } => ">= 1",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arity_rules() {
        let bin = HopKind::Binary {
            op: OpOp2::Plus,
            outer: false,
        };
        assert!(check_arity(&bin, 2).is_ok());
        assert!(matches!(check_arity(&bin, 1), Err(Error::Structural(_))));
        assert!(check_arity(&HopKind::Reorg(ReorgOp::Transpose), 1).is_ok());
        assert!(check_arity(&HopKind::Reorg(ReorgOp::Reshape), 5).is_ok());
        assert!(check_arity(&HopKind::Reorg(ReorgOp::Sort), 1).is_err());
        assert!(check_arity(&HopKind::Data(DataOpKind::PersistentRead), 0).is_ok());
        assert!(check_arity(&HopKind::Data(DataOpKind::TransientWrite), 0).is_err());
    }

    #[test]
    fn literal_views() {
        assert_eq!(LiteralValue::Bool(true).as_f64(), Some(1.0));
        assert_eq!(LiteralValue::Float(3.0).as_i64(), Some(3));
        assert_eq!(LiteralValue::Float(3.5).as_i64(), None);
        assert_ne!(LiteralValue::Float(0.0).key(), LiteralValue::Float(-0.0).key());
    }
}
