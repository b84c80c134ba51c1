//! Kernel source synthesis.
//!
//! Emits one Rust function per plan against the fused-kernel runtime
//! interface: `a` is the main input value (cell-like templates) or row slice
//! (row template), `b` the side inputs, `scalars` the scalar inputs and
//! `c` the output buffer of aggregating kernels. The right factor of an
//! outer product arrives transposed. Every reachable plan node
//! becomes one `let` binding, in dependency order.

use std::fmt::Write as _;

use hopc_core::error::{Error, Result};
use hopc_core::types::{AggOp, DataType, OpOp1, OpOp2, TemplateType};
use hopc_hops::LiteralValue;

use crate::cplan::{AggKind, CNode, CPlan, LookupKind};

/// How each kernel input is referenced from generated code.
enum InputRef {
    Main,
    Side(usize),
    Scalar(usize),
}

fn input_refs(plan: &CPlan) -> Vec<InputRef> {
    let mut side = 0;
    let mut scalar = 0;
    plan.inputs
        .iter()
        .enumerate()
        .map(|(i, input)| {
            if i == 0 {
                InputRef::Main
            } else if input.data_type == DataType::Scalar {
                scalar += 1;
                InputRef::Scalar(scalar - 1)
            } else {
                side += 1;
                InputRef::Side(side - 1)
            }
        })
        .collect()
}

pub fn generate_source(plan: &CPlan) -> Result<String> {
    let refs = input_refs(plan);
    let mut body = String::new();

    for n in plan.reachable() {
        let expr = match plan.node(n) {
            CNode::Data { input } => match refs[*input] {
                InputRef::Main => "a".to_string(),
                InputRef::Side(j) => format!("b[{j}]"),
                InputRef::Scalar(k) => format!("scalars[{k}]"),
            },
            CNode::Literal(v) => literal(v)?,
            CNode::Unary { op, input } => unary(*op, &format!("t{input}"))?,
            CNode::Binary { op, left, right } => binary(*op, &format!("t{left}"), &format!("t{right}"))?,
            CNode::Lookup { kind, input } => lookup(*kind, &format!("t{input}")),
            CNode::RowAgg { op, input } => format!("row_{}(t{input})", agg_name(*op)),
            CNode::MatVec { matrix, vector } => format!("dot(t{matrix}, t{vector}.values())"),
            CNode::OuterDot { left, right } => format!("dot(t{left}.row(rix), t{right}.col(cix))"),
        };
        let _ = writeln!(body, "        let t{n} = {expr};");
    }

    let out = plan
        .outputs
        .first()
        .ok_or_else(|| Error::Compile(format!("{} has no output", plan.class_name)))?;
    let (signature, tail) = match plan.template {
        TemplateType::Cell => (
            "a: f64, b: &[SideInput], scalars: &[f64], rix: usize, cix: usize) -> f64",
            format!("        t{out}\n"),
        ),
        TemplateType::Outer => (
            "a: f64, b: &[SideInput], scalars: &[f64], rix: usize, cix: usize) -> f64",
            format!("        t{out}\n"),
        ),
        TemplateType::Row => (
            "a: &[f64], b: &[SideInput], scalars: &[f64], c: &mut [f64], rix: usize)",
            row_tail(plan.agg, *out),
        ),
        TemplateType::MultiAgg => {
            let mut tail = String::new();
            for (k, (o, op)) in plan.outputs.iter().zip(&plan.multi_aggs).enumerate() {
                let _ = writeln!(tail, "        c[{k}] = {}(c[{k}], t{o});", agg_name(*op));
            }
            (
                "a: f64, b: &[SideInput], scalars: &[f64], c: &mut [f64], rix: usize, cix: usize)",
                tail,
            )
        }
    };

    let mut src = String::new();
    let _ = writeln!(src, "// {} kernel, aggregation {:?}", plan.template, plan.agg);
    let _ = writeln!(src, "pub struct {};", plan.class_name);
    let _ = writeln!(src);
    let _ = writeln!(src, "impl {} {{", plan.class_name);
    let _ = writeln!(src, "    #[allow(unused_variables)]");
    let _ = writeln!(src, "    pub fn exec({signature} {{");
    src.push_str(&body);
    src.push_str(&tail);
    let _ = writeln!(src, "    }}");
    let _ = writeln!(src, "}}");
    Ok(src)
}

fn row_tail(agg: AggKind, out: usize) -> String {
    match agg {
        AggKind::NoAgg | AggKind::Row(_) => format!("        c[rix] = t{out};\n"),
        AggKind::ColT => format!("        axpy(t{out}, a, c);\n"),
        AggKind::Full(op) | AggKind::Col(op) => format!("        c[0] = {}(c[0], t{out});\n", agg_name(op)),
    }
}

fn agg_name(op: AggOp) -> &'static str {
    match op {
        AggOp::Sum => "sum",
        AggOp::SumSq => "sumsq",
        AggOp::Min => "min",
        AggOp::Max => "max",
        AggOp::Mean => "mean",
        AggOp::Prod => "prod",
    }
}

fn literal(v: &LiteralValue) -> Result<String> {
    match v.as_f64() {
        Some(x) if x.is_finite() => Ok(format!("{x:?}")),
        Some(x) if x.is_nan() => Ok("f64::NAN".into()),
        Some(x) if x > 0.0 => Ok("f64::INFINITY".into()),
        Some(_) => Ok("f64::NEG_INFINITY".into()),
        None => Err(Error::Compile(format!("string literal {v} in a fused kernel"))),
    }
}

fn lookup(kind: LookupKind, x: &str) -> String {
    match kind {
        LookupKind::R => format!("{x}.get(rix, 0)"),
        LookupKind::C => format!("{x}.get(0, cix)"),
        LookupKind::RC => format!("{x}.get(rix, cix)"),
        LookupKind::RC1 { col } => format!("{x}.get(rix, {})", col - 1),
        LookupKind::RVect1 { cl, cu } => format!("{x}.row_range(rix, {}, {cu})", cl - 1),
    }
}

fn unary(op: OpOp1, x: &str) -> Result<String> {
    let s = match op {
        OpOp1::Exp => format!("{x}.exp()"),
        OpOp1::Log => format!("{x}.ln()"),
        OpOp1::Abs => format!("{x}.abs()"),
        OpOp1::Sqrt => format!("{x}.sqrt()"),
        OpOp1::Round => format!("{x}.round()"),
        OpOp1::Sign => format!("sign({x})"),
        OpOp1::Sigmoid => format!("1.0 / (1.0 + (-{x}).exp())"),
        OpOp1::Not => format!("if {x} != 0.0 {{ 0.0 }} else {{ 1.0 }}"),
        other => {
            return Err(Error::Compile(format!(
                "unary {} has no kernel implementation",
                other.symbol()
            )))
        }
    };
    Ok(s)
}

fn predicate(cond: String) -> String {
    format!("if {cond} {{ 1.0 }} else {{ 0.0 }}")
}

fn binary(op: OpOp2, a: &str, b: &str) -> Result<String> {
    let s = match op {
        OpOp2::Plus => format!("{a} + {b}"),
        OpOp2::Minus => format!("{a} - {b}"),
        OpOp2::Mult => format!("{a} * {b}"),
        OpOp2::Div => format!("{a} / {b}"),
        OpOp2::Modulus => format!("modulus({a}, {b})"),
        OpOp2::IntDiv => format!("({a} / {b}).floor()"),
        OpOp2::Less => predicate(format!("{a} < {b}")),
        OpOp2::LessEqual => predicate(format!("{a} <= {b}")),
        OpOp2::Greater => predicate(format!("{a} > {b}")),
        OpOp2::GreaterEqual => predicate(format!("{a} >= {b}")),
        OpOp2::Equal => predicate(format!("{a} == {b}")),
        OpOp2::NotEqual => predicate(format!("{a} != {b}")),
        OpOp2::Min => format!("{a}.min({b})"),
        OpOp2::Max => format!("{a}.max({b})"),
        OpOp2::And => predicate(format!("{a} != 0.0 && {b} != 0.0")),
        OpOp2::Or => predicate(format!("{a} != 0.0 || {b} != 0.0")),
        OpOp2::Xor => predicate(format!("({a} != 0.0) != ({b} != 0.0)")),
        OpOp2::Pow => format!("{a}.powf({b})"),
        OpOp2::Log => format!("{a}.ln() / {b}.ln()"),
        OpOp2::MinusNz => format!("if {a} != 0.0 {{ {a} - {b} }} else {{ 0.0 }}"),
        OpOp2::Minus1Mult => format!("1.0 - {a} * {b}"),
        other => {
            return Err(Error::Compile(format!(
                "binary {} has no kernel implementation",
                other.symbol()
            )))
        }
    };
    Ok(s)
}
