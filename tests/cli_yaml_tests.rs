//! YAML DAG parsing and validation tests

use hopc_core::types::ExecType;
use hopc_planner::parse_yaml_dag;

#[test]
fn test_parse_simple_dag() {
    let yaml = r#"
config:
  blocksize: 1000
hops:
  - { op: read, name: A, rows: 10000, cols: 500 }
  - { op: read, name: v, rows: 10000, cols: 1, nnz: 10000 }
  - { op: binary, id: C, fn: cbind, inputs: [A, v] }
  - { op: write, name: Y, input: C }
"#;
    let parsed = parse_yaml_dag(yaml).unwrap();
    assert_eq!(parsed.config.blocksize, 1000);
    assert_eq!(parsed.dag.roots().len(), 1);
    assert!(parsed.ids.contains_key("C"));
    parsed.dag.check_edges().unwrap();
}

#[test]
fn test_operator_names_and_symbols_are_equivalent() {
    let by_symbol = r#"
hops:
  - { op: read, name: X, rows: 10, cols: 10 }
  - { op: unary, id: E, fn: exp, input: X }
  - { op: binary, id: P, fn: "+", inputs: [X, E] }
  - { op: write, name: Y, input: P }
"#;
    let by_name = by_symbol.replace("\"+\"", "plus");
    let a = parse_yaml_dag(by_symbol).unwrap();
    let b = parse_yaml_dag(&by_name).unwrap();
    assert_eq!(
        a.dag.hop(a.ids["P"]).kind,
        b.dag.hop(b.ids["P"]).kind
    );
}

#[test]
fn test_forced_exec_type_is_kept() {
    let yaml = r#"
hops:
  - { op: read, name: X, rows: 10, cols: 10 }
  - { op: reorg, id: T, fn: t, input: X, force: Distributed }
  - { op: write, name: Y, input: T }
"#;
    let parsed = parse_yaml_dag(yaml).unwrap();
    assert_eq!(
        parsed.dag.hop(parsed.ids["T"]).forced_exec_type,
        Some(ExecType::Distributed)
    );
}

#[test]
fn test_unknown_reference_is_rejected() {
    let yaml = r#"
hops:
  - { op: read, name: X, rows: 10, cols: 10 }
  - { op: write, name: Y, input: Z }
"#;
    let err = parse_yaml_dag(yaml).unwrap_err();
    assert!(err.to_string().contains("unknown id 'Z'"));
}

#[test]
fn test_unknown_operator_is_rejected() {
    let yaml = r#"
hops:
  - { op: read, name: X, rows: 10, cols: 10 }
  - { op: unary, id: E, fn: frobnicate, input: X }
"#;
    assert!(parse_yaml_dag(yaml).is_err());
}
