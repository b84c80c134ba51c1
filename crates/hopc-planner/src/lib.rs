#![forbid(unsafe_code)]
//! hopc-planner: annotated hop DAG → physical program + operator bindings.
//!
//! This crate adds:
//!   * a small YAML DSL → `HopDag` ([`dsl`]),
//!   * the static rewrite driver run before annotation ([`rules`]),
//!   * distributed strategy selection for append and binary ops ([`strategy`]),
//!   * lowering that assigns `LopId`s and operator keys ([`lower`]),
//!   * a coarse cost summary of the resulting program ([`cost`]).

pub mod cost;
pub mod dsl;
pub mod error;
pub mod lower;
pub mod physical;
pub mod rules;
pub mod strategy;

pub use cost::{estimate_plan_cost, PlanCost};
pub use dsl::yaml::{parse_yaml_dag, ParsedDag};
pub use error::{Error, Result};
pub use lower::lower_to_physical;
pub use physical::{Lop, LopKind, OperatorBinding, PhysicalPlan, PhysicalProgram, PickOp, ScalarOp};
pub use rules::{optimize, RewriteSummary};
pub use strategy::{requires_replication, select_append_method, select_binary_method};
