//! YAML → hop DAG.
//!
//! Example:
//! ```yaml
//! config:
//!   blocksize: 1000
//! hops:
//!   - { op: read, name: A, rows: 10000, cols: 500 }
//!   - { op: read, name: v, rows: 10000, cols: 1, nnz: 10000 }
//!   - { op: binary, id: C, fn: cbind, inputs: [A, v] }
//!   - { op: write, name: Y, input: C }
//! ```
//!
//! Hops are listed inputs-first; `id` names a hop for later references and
//! defaults to the read/write variable name. Operators accept either their
//! symbol (`+`, `>`, `t`) or their lower-case name (`plus`, `greater`,
//! `transpose`).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use hopc_core::config::CompilerConfig;
use hopc_core::id::HopId;
use hopc_core::stats::{MatrixCharacteristics, UNKNOWN};
use hopc_core::types::{AggOp, DataType, Direction, ExecType, OpOp1, OpOp2, ReorgOp};
use hopc_hops::{HopDag, LiteralValue};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DagDoc {
    #[serde(default)]
    pub config: Option<CompilerConfig>,
    pub hops: Vec<HopDef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HopDef {
    #[serde(default)]
    pub id: Option<String>,
    /// Pin this hop to one backend.
    #[serde(default)]
    pub force: Option<ExecType>,
    #[serde(flatten)]
    pub op: OpDef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "op")]
pub enum OpDef {
    Read {
        name: String,
        #[serde(default = "unknown")]
        rows: i64,
        #[serde(default = "unknown")]
        cols: i64,
        #[serde(default = "unknown")]
        nnz: i64,
        #[serde(default)]
        frame: bool,
        /// Live-in variable of the enclosing block rather than a file.
        #[serde(default)]
        transient: bool,
    },
    Literal {
        value: LiteralDef,
    },
    Unary {
        #[serde(rename = "fn")]
        func: String,
        input: String,
    },
    Binary {
        #[serde(rename = "fn")]
        func: String,
        inputs: [String; 2],
        #[serde(default)]
        outer: bool,
    },
    Reorg {
        #[serde(rename = "fn")]
        func: String,
        input: String,
    },
    Reshape {
        input: String,
        rows: i64,
        cols: i64,
    },
    Sort {
        input: String,
        #[serde(default = "one")]
        by: i64,
        #[serde(default)]
        decreasing: bool,
        #[serde(default)]
        index_return: bool,
    },
    Agg {
        #[serde(rename = "fn")]
        func: String,
        #[serde(default = "all")]
        dir: String,
        input: String,
    },
    MatMult {
        inputs: [String; 2],
    },
    Index {
        input: String,
        rows: [i64; 2],
        cols: [i64; 2],
    },
    Write {
        name: String,
        input: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LiteralDef {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

fn unknown() -> i64 {
    UNKNOWN
}

fn one() -> i64 {
    1
}

fn all() -> String {
    "all".into()
}

#[derive(Debug, Clone)]
pub struct ParsedDag {
    pub dag: HopDag,
    pub config: CompilerConfig,
    /// DSL id → hop.
    pub ids: BTreeMap<String, HopId>,
}

const BINARY_OPS: [OpOp2; 30] = [
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
    OpOp2::And,
    OpOp2::Or,
    OpOp2::Xor,
    OpOp2::Pow,
    OpOp2::Log,
    OpOp2::MinusNz,
    OpOp2::Minus1Mult,
    OpOp2::Cbind,
    OpOp2::Rbind,
    OpOp2::Solve,
    OpOp2::Quantile,
    OpOp2::InterQuantile,
    OpOp2::Iqm,
    OpOp2::Median,
    OpOp2::Moment,
    OpOp2::Cov,
];

const UNARY_OPS: [OpOp1; 13] = [
    OpOp1::Exp,
    OpOp1::Log,
    OpOp1::Abs,
    OpOp1::Sqrt,
    OpOp1::Round,
    OpOp1::Sign,
    OpOp1::Sigmoid,
    OpOp1::Not,
    OpOp1::CastAsMatrix,
    OpOp1::CastAsScalar,
    OpOp1::Nrow,
    OpOp1::Ncol,
    OpOp1::Length,
];

const AGG_OPS: [AggOp; 6] = [
    AggOp::Sum,
    AggOp::SumSq,
    AggOp::Min,
    AggOp::Max,
    AggOp::Mean,
    AggOp::Prod,
];

fn matches_name(s: &str, symbol: &str, debug: String) -> bool {
    s == symbol || s.eq_ignore_ascii_case(&debug)
}

fn parse_binary(s: &str) -> Result<OpOp2> {
    BINARY_OPS
        .into_iter()
        .find(|op| matches_name(s, op.symbol(), format!("{op:?}")))
        .ok_or_else(|| Error::Dsl(format!("unknown binary operator '{s}'")))
}

fn parse_unary(s: &str) -> Result<OpOp1> {
    UNARY_OPS
        .into_iter()
        .find(|op| matches_name(s, op.symbol(), format!("{op:?}")))
        .ok_or_else(|| Error::Dsl(format!("unknown unary operator '{s}'")))
}

fn parse_agg(s: &str) -> Result<AggOp> {
    AGG_OPS
        .into_iter()
        .find(|op| matches_name(s, op.symbol(), format!("{op:?}")))
        .ok_or_else(|| Error::Dsl(format!("unknown aggregate '{s}'")))
}

fn parse_reorg(s: &str) -> Result<ReorgOp> {
    match s.to_ascii_lowercase().as_str() {
        "t" | "transpose" => Ok(ReorgOp::Transpose),
        "diag" => Ok(ReorgOp::Diag),
        "rev" => Ok(ReorgOp::Rev),
        other => Err(Error::Dsl(format!(
            "unknown reorg operator '{other}' (reshape and sort have their own ops)"
        ))),
    }
}

fn parse_direction(s: &str) -> Result<Direction> {
    match s.to_ascii_lowercase().as_str() {
        "row" | "rows" => Ok(Direction::Row),
        "col" | "cols" => Ok(Direction::Col),
        "all" | "full" => Ok(Direction::RowCol),
        other => Err(Error::Dsl(format!("unknown aggregation direction '{other}'"))),
    }
}

/// Parse a YAML DAG description. Uses the document's `config` section (or
/// defaults) and builds the DAG with its block size.
pub fn parse_yaml_dag(yaml_src: &str) -> Result<ParsedDag> {
    let doc: DagDoc = serde_yaml::from_str(yaml_src)?;
    let config = doc.config.unwrap_or_default();
    config.validate()?;
    let mut dag = HopDag::with_blocksize(config.blocksize);
    let mut ids: BTreeMap<String, HopId> = BTreeMap::new();

    for (pos, def) in doc.hops.into_iter().enumerate() {
        let label = def.id.clone().or_else(|| match &def.op {
            OpDef::Read { name, .. } | OpDef::Write { name, .. } => Some(name.clone()),
            _ => None,
        });
        let resolve = |r: &str| -> Result<HopId> {
            ids.get(r).copied().ok_or_else(|| {
                Error::Dsl(format!("hop #{pos} references unknown id '{r}'"))
            })
        };

        let id = match &def.op {
            OpDef::Read {
                name,
                rows,
                cols,
                nnz,
                frame,
                transient,
            } => {
                let dt = if *frame { DataType::Frame } else { DataType::Matrix };
                if *transient {
                    let mc = MatrixCharacteristics::new(*rows, *cols, *nnz, config.blocksize);
                    dag.transient_read(name, dt, mc)?
                } else {
                    dag.read_typed(name, dt, *rows, *cols, *nnz)?
                }
            }
            OpDef::Literal { value } => {
                let v = match value {
                    LiteralDef::Bool(b) => LiteralValue::Bool(*b),
                    LiteralDef::Int(i) => LiteralValue::Int(*i),
                    LiteralDef::Float(f) => LiteralValue::Float(*f),
                    LiteralDef::Str(s) => LiteralValue::Str(s.clone()),
                };
                dag.literal(v)?
            }
            OpDef::Unary { func, input } => {
                let x = resolve(input)?;
                dag.unary(parse_unary(func)?, x)?
            }
            OpDef::Binary { func, inputs, outer } => {
                let (a, b) = (resolve(&inputs[0])?, resolve(&inputs[1])?);
                let op = parse_binary(func)?;
                if *outer {
                    dag.binary_outer(op, a, b)?
                } else {
                    dag.binary(op, a, b)?
                }
            }
            OpDef::Reorg { func, input } => {
                let x = resolve(input)?;
                dag.reorg(parse_reorg(func)?, vec![x])?
            }
            OpDef::Reshape { input, rows, cols } => {
                let x = resolve(input)?;
                dag.reshape(x, *rows, *cols)?
            }
            OpDef::Sort {
                input,
                by,
                decreasing,
                index_return,
            } => {
                let x = resolve(input)?;
                dag.sort(x, *by, *decreasing, *index_return)?
            }
            OpDef::Agg { func, dir, input } => {
                let x = resolve(input)?;
                dag.agg(parse_agg(func)?, parse_direction(dir)?, x)?
            }
            OpDef::MatMult { inputs } => {
                let (a, b) = (resolve(&inputs[0])?, resolve(&inputs[1])?);
                dag.matmult(a, b)?
            }
            OpDef::Index { input, rows, cols } => {
                let x = resolve(input)?;
                dag.index(x, rows[0], rows[1], cols[0], cols[1])?
            }
            OpDef::Write { name, input } => {
                let x = resolve(input)?;
                dag.write(name, x)?
            }
        };

        if def.force.is_some() {
            dag.hop_mut(id).forced_exec_type = def.force;
        }
        if let Some(label) = label {
            if ids.insert(label.clone(), id).is_some() && !matches!(def.op, OpDef::Write { .. }) {
                return Err(Error::Dsl(format!("duplicate hop id '{label}'")));
            }
        }
    }

    if dag.roots().is_empty() {
        return Err(Error::Dsl("DAG has no write operators".into()));
    }
    dag.check_acyclic()?;
    Ok(ParsedDag { dag, config, ids })
}

#[cfg(test)]
mod tests {
    use super::*;
    use hopc_hops::HopKind;

    const CBIND: &str = r#"
hops:
  - { op: read, name: A, rows: 10000, cols: 500 }
  - { op: read, name: v, rows: 10000, cols: 1 }
  - { op: binary, id: C, fn: cbind, inputs: [A, v] }
  - { op: write, name: Y, input: C }
"#;

    #[test]
    fn parses_a_small_dag() {
        let p = parse_yaml_dag(CBIND).unwrap();
        assert_eq!(p.dag.roots().len(), 1);
        let c = p.ids["C"];
        assert_eq!(p.dag.hop(c).kind.binary_op(), Some(OpOp2::Cbind));
        assert_eq!(p.config.blocksize, 1000);
    }

    #[test]
    fn operator_names_and_symbols() {
        assert_eq!(parse_binary(">").unwrap(), OpOp2::Greater);
        assert_eq!(parse_binary("greater").unwrap(), OpOp2::Greater);
        assert_eq!(parse_unary("exp").unwrap(), OpOp1::Exp);
        assert_eq!(parse_agg("sum").unwrap(), AggOp::Sum);
        assert!(parse_binary("nope").is_err());
    }

    #[test]
    fn config_section_and_literals() {
        let src = r#"
config:
  blocksize: 500
  accelerator_enabled: true
hops:
  - { op: read, name: X, rows: 100, cols: 100 }
  - { op: literal, id: zero, value: 0 }
  - { op: binary, id: G, fn: ">", inputs: [X, zero] }
  - { op: binary, id: R, fn: "*", inputs: [X, G], force: Local }
  - { op: write, name: Y, input: R }
"#;
        let p = parse_yaml_dag(src).unwrap();
        assert_eq!(p.config.blocksize, 500);
        assert!(p.config.accelerator_enabled);
        assert_eq!(p.dag.blocksize(), 500);
        assert!(matches!(p.dag.hop(p.ids["zero"]).kind, HopKind::Literal(LiteralValue::Int(0))));
        assert_eq!(p.dag.hop(p.ids["R"]).forced_exec_type, Some(ExecType::Local));
    }

    #[test]
    fn unknown_reference_is_rejected() {
        let src = r#"
hops:
  - { op: unary, id: E, fn: exp, input: Missing }
"#;
        assert!(matches!(parse_yaml_dag(src), Err(Error::Dsl(_))));
    }

    #[test]
    fn dag_without_writes_is_rejected() {
        let src = r#"
hops:
  - { op: read, name: A, rows: 1, cols: 1 }
"#;
        assert!(matches!(parse_yaml_dag(src), Err(Error::Dsl(_))));
    }
}
