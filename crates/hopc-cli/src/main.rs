//! hopc CLI: validate, explain and compile hop DAGs and programs.

use clap::{Args, Parser, Subcommand};
use hopc_codegen::{FusionOptimizer, FusionSummary};
use hopc_core::config::{parse_plan_cache_policy, parse_plan_selector, CompilerConfig};
use hopc_core::hash::hash_serde;
use hopc_core::manifest::{now_ms, CompileManifest};
use hopc_hops::{annotate, explain_hops, HopDag};
use hopc_planner::{estimate_plan_cost, lower_to_physical, parse_yaml_dag, PhysicalProgram};
use hopc_program::{Program, ProgramCompiler, VarStats};
use serde::Serialize;
use std::fs;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "hopc")]
#[command(about = "hopc: size inference, fusion and physical planning for linear-algebra DAGs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a DAG YAML file (syntax and edge check)
    Validate {
        /// Path to the DAG YAML file
        #[arg(short, long)]
        dag: PathBuf,
    },

    /// Show the annotated hops and the physical plan of a DAG (EXPLAIN)
    Explain {
        /// Path to the DAG YAML file
        #[arg(short, long)]
        dag: PathBuf,

        #[command(flatten)]
        opts: CompileOpts,
    },

    /// Compile a DAG and print its manifest as JSON
    Compile {
        /// Path to the DAG YAML file
        #[arg(short, long)]
        dag: PathBuf,

        #[command(flatten)]
        opts: CompileOpts,
    },

    /// Compile a program of statement blocks and print a summary as JSON
    Program {
        /// Path to the program YAML file
        #[arg(short, long)]
        program: PathBuf,

        #[command(flatten)]
        opts: CompileOpts,
    },
}

#[derive(Args, Clone, Default)]
struct CompileOpts {
    /// Run operator fusion
    #[arg(long)]
    codegen: bool,

    /// Fusion plan selector (fuse_all, fuse_no_redundancy, cost, cost_v2)
    #[arg(long)]
    selector: Option<String>,

    /// Plan cache policy (constant, cslh, none)
    #[arg(long)]
    policy: Option<String>,

    /// Local memory budget in bytes (overrides config)
    #[arg(long)]
    mem_budget: Option<f64>,
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { dag } => {
            if let Err(e) = validate_dag(&dag) {
                eprintln!("Validation failed: {}", e);
                std::process::exit(1);
            }
            println!("✓ DAG is valid");
        }
        Commands::Explain { dag, opts } => {
            if let Err(e) = explain_dag(&dag, &opts) {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
        Commands::Compile { dag, opts } => {
            if let Err(e) = compile_dag(&dag, &opts) {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
        Commands::Program { program, opts } => {
            if let Err(e) = compile_program(&program, &opts) {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
    }
}

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Command-line flags take priority over the document's config section.
fn apply_opts(cfg: &mut CompilerConfig, opts: &CompileOpts) -> CliResult<()> {
    if opts.codegen {
        cfg.codegen.enabled = true;
    }
    if let Some(s) = &opts.selector {
        cfg.codegen.plan_selector = parse_plan_selector(s)?;
    }
    if let Some(p) = &opts.policy {
        cfg.codegen.plan_cache_policy = parse_plan_cache_policy(p)?;
    }
    if let Some(b) = opts.mem_budget {
        cfg.local_mem_budget_bytes = b;
    }
    cfg.validate()?;
    Ok(())
}

struct Compiled {
    dag: HopDag,
    program: PhysicalProgram,
    fusion: Option<FusionSummary>,
    manifest: CompileManifest,
}

fn compile(mut dag: HopDag, cfg: &CompilerConfig) -> CliResult<Compiled> {
    let started = now_ms();
    let dag_hash = hash_serde(&dag)?;
    hopc_planner::optimize(&mut dag)?;
    annotate(&mut dag, cfg);

    let fusion = if cfg.codegen.enabled {
        let opt = FusionOptimizer::new(cfg.clone());
        let summary = opt.optimize(&mut dag, false)?;
        if summary.fused_operators > 0 {
            annotate(&mut dag, cfg);
        }
        Some(summary)
    } else {
        None
    };

    let roots = dag.roots().to_vec();
    let program = lower_to_physical(&mut dag, &roots, cfg)?;
    let mut manifest = CompileManifest::new(dag_hash, started);
    if let Some(s) = &fusion {
        manifest.fused_operators = s.fused_operators;
        manifest.kernels_compiled = s.kernels_compiled;
        manifest.cache_hits = s.cache_hits;
    }
    let manifest = manifest.finish(now_ms(), hash_serde(&program)?);
    tracing::info!(plan = %manifest.plan_hash.short(), "compiled");
    Ok(Compiled {
        dag,
        program,
        fusion,
        manifest,
    })
}

fn validate_dag(path: &PathBuf) -> CliResult<()> {
    let yaml_content = fs::read_to_string(path)?;
    let parsed = parse_yaml_dag(&yaml_content)?;
    parsed.dag.check_acyclic()?;
    parsed.dag.check_edges()?;
    Ok(())
}

fn explain_dag(path: &PathBuf, opts: &CompileOpts) -> CliResult<()> {
    let yaml_content = fs::read_to_string(path)?;
    let parsed = parse_yaml_dag(&yaml_content)?;
    let mut cfg = parsed.config;
    apply_opts(&mut cfg, opts)?;
    let out = compile(parsed.dag, &cfg)?;
    let cost = estimate_plan_cost(&out.program);

    println!("DAG Compilation Plan");
    println!("====================");
    println!();
    println!(
        "Local Budget: {:.0} bytes ({:.2} MB)",
        cfg.local_mem_budget_bytes,
        cfg.local_mem_budget_bytes / 1_048_576.0
    );
    println!("Block Size: {}", cfg.blocksize);
    println!();
    println!("Hops:");
    print!("{}", explain_hops(&out.dag));
    println!();
    if let Some(f) = &out.fusion {
        println!("Fusion:");
        println!("  Fused Operators: {}", f.fused_operators);
        println!("  Kernels Compiled: {}", f.kernels_compiled);
        for k in &f.kernels {
            println!("  {} ({:?}) at hop {}", k.class_name, k.template, k.root);
        }
        println!();
    }
    println!("Physical Plan:");
    print!("{}", out.program.explain());
    println!();
    println!("Cost:");
    println!(
        "  Operators: {} (local {}, distributed {}, accelerator {}, fused {})",
        cost.operators, cost.local, cost.distributed, cost.accelerator, cost.fused
    );
    println!("  Shuffles: {}", cost.shuffles);
    println!(
        "  Broadcast: {:.2} MB",
        cost.broadcast_bytes / 1_048_576.0
    );

    Ok(())
}

fn compile_dag(path: &PathBuf, opts: &CompileOpts) -> CliResult<()> {
    let yaml_content = fs::read_to_string(path)?;
    let parsed = parse_yaml_dag(&yaml_content)?;
    let mut cfg = parsed.config;
    apply_opts(&mut cfg, opts)?;
    let out = compile(parsed.dag, &cfg)?;
    println!("{}", serde_json::to_string_pretty(&out.manifest)?);
    Ok(())
}

#[derive(Debug, Serialize)]
struct ProgramReport {
    summary: hopc_program::ProgramSummary,
    manifests: Vec<CompileManifest>,
}

fn load_program(yaml_content: &str) -> CliResult<Program> {
    Ok(serde_yaml::from_str(yaml_content)?)
}

fn compile_program(path: &PathBuf, opts: &CompileOpts) -> CliResult<()> {
    let yaml_content = fs::read_to_string(path)?;
    let program = load_program(&yaml_content)?;
    let mut cfg = CompilerConfig::from_env();
    apply_opts(&mut cfg, opts)?;
    let compiled = ProgramCompiler::new(cfg).compile(&program, &VarStats::new())?;
    let report = ProgramReport {
        summary: compiled.summary(),
        manifests: compiled.manifests().into_iter().cloned().collect(),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const RELU: &str = r#"
hops:
  - { op: read, name: A, rows: 1000, cols: 1000 }
  - { op: literal, id: zero, value: 0.0 }
  - { op: binary, id: G, fn: ">", inputs: [A, zero] }
  - { op: binary, id: Y, fn: "*", inputs: [A, G] }
  - { op: write, name: out, input: Y }
"#;

    #[test]
    fn flags_override_document_config() {
        let mut cfg = CompilerConfig::default();
        let opts = CompileOpts {
            codegen: true,
            selector: Some("fuse_all".into()),
            policy: Some("none".into()),
            mem_budget: Some(1e6),
        };
        apply_opts(&mut cfg, &opts).unwrap();
        assert!(cfg.codegen.enabled);
        assert!(cfg.codegen.plan_selector.is_heuristic());
        assert_eq!(cfg.local_mem_budget_bytes, 1e6);
    }

    #[test]
    fn unknown_selector_is_rejected() {
        let mut cfg = CompilerConfig::default();
        let opts = CompileOpts {
            selector: Some("greedy".into()),
            ..Default::default()
        };
        assert!(apply_opts(&mut cfg, &opts).is_err());
    }

    #[test]
    fn compile_with_codegen_fuses_relu_backward() {
        let parsed = parse_yaml_dag(RELU).unwrap();
        let mut cfg = parsed.config;
        cfg.codegen.enabled = true;
        let out = compile(parsed.dag, &cfg).unwrap();
        assert_eq!(out.manifest.fused_operators, 1);
        assert!(out.fusion.is_some());
    }

    #[test]
    fn programs_load_from_yaml() {
        let src = r#"
blocks:
  - basic:
      - assign:
          target: X
          source:
            read: { path: X, rows: 10, cols: 10, nnz: 100 }
      - assign:
          target: Y
          source:
            transpose:
              var: X
"#;
        let program = load_program(src).unwrap();
        assert_eq!(program.blocks.len(), 1);
        let compiled = ProgramCompiler::new(CompilerConfig::default())
            .compile(&program, &VarStats::new())
            .unwrap();
        assert_eq!(compiled.summary().dags, 1);
    }
}
