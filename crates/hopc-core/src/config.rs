//! Compiler configuration that every entry point receives explicitly.
//!
//! There are no process-wide flags: forcing overrides and policy choices are
//! fields here, so independent DAGs can be compiled concurrently with
//! different settings.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::stats::DEFAULT_BLOCKSIZE;
use crate::types::{AppendMethod, ExecType};

/// How the execution-type selector combines memory and shape evidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptLevel {
    /// Local iff the total memory estimate fits the local budget.
    MemoryOnly,
    /// Local iff the operand shapes are below the threshold (or vectors).
    ShapeOnly,
    /// Both conditions must hold.
    MemoryAndShape,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DistributedMode {
    /// Local where it fits, distributed otherwise.
    Hybrid,
    /// Every matrix operator with a distributed implementation goes distributed.
    ForceDistributed,
    /// No distributed backend available.
    SingleNode,
}

/// Plan-selection policy of the fusion optimizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlanSelector {
    /// Greedy maximal fusion.
    FuseAll,
    /// Maximal fusion without redundant recomputation.
    FuseNoRedundancy,
    /// Cost-based, per consumer.
    FuseCostBased,
    /// Cost-based, multi-consumer and backend aware.
    FuseCostBasedV2,
}

impl PlanSelector {
    /// Heuristic selectors prune dominated plans eagerly during exploration.
    pub fn is_heuristic(self) -> bool {
        matches!(self, PlanSelector::FuseAll | PlanSelector::FuseNoRedundancy)
    }

    pub fn is_cost_based(self) -> bool {
        !self.is_heuristic()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlanCachePolicy {
    /// Cache with literals compiled into the kernel.
    Constant,
    /// Cache with context-sensitive literal replacement.
    Cslh,
    /// No plan cache.
    None,
}

impl PlanCachePolicy {
    pub fn from_flags(plan_cache: bool, compile_literals: bool) -> Self {
        match (plan_cache, compile_literals) {
            (false, _) => PlanCachePolicy::None,
            (true, true) => PlanCachePolicy::Constant,
            (true, false) => PlanCachePolicy::Cslh,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompilerBackend {
    /// In-memory when a distributed backend is in play, ahead-of-time otherwise.
    Auto,
    AheadOfTime,
    InMemory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CodegenConfig {
    /// Run the fusion pass at all.
    pub enabled: bool,
    pub plan_selector: PlanSelector,
    pub plan_cache_policy: PlanCachePolicy,
    /// Maximum number of cached kernels.
    pub plan_cache_size: usize,
    pub compiler: CompilerBackend,
    /// Prune subsumed candidate plans during exploration.
    pub prune_redundant_plans: bool,
    /// Staging directory for the ahead-of-time compiler.
    pub staging_dir: Option<String>,
}

impl Default for CodegenConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            plan_selector: PlanSelector::FuseCostBasedV2,
            plan_cache_policy: PlanCachePolicy::Cslh,
            plan_cache_size: 1024,
            compiler: CompilerBackend::Auto,
            prune_redundant_plans: true,
            staging_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    /// Memory budget of one local operator (bytes).
    pub local_mem_budget_bytes: f64,
    /// Budget for replicating one operand to every worker (bytes).
    pub broadcast_mem_budget_bytes: f64,
    /// Device memory budget of the accelerator (bytes).
    pub accelerator_mem_budget_bytes: f64,

    /// Rows/cols per block.
    pub blocksize: i64,
    /// Per-dimension cell threshold for the shape rule.
    pub cp_threshold: i64,
    pub opt_level: OptLevel,
    pub distributed_mode: DistributedMode,

    /// Shapes may be re-inferred at runtime; when off, appends are pinned
    /// to a constant footprint.
    pub dynamic_recompilation: bool,
    /// Allow fused physical operators (relu-backward, uagg chains, ...).
    pub allow_operator_fusion: bool,
    pub accelerator_enabled: bool,

    /// Test/debug: pin every operator to one backend.
    pub forced_exec_type: Option<ExecType>,
    /// Test/debug: pin every distributed append to one strategy.
    pub forced_append_method: Option<AppendMethod>,
    /// Test/debug: never use the broadcast sort-index rewrite.
    pub force_dist_sort_indexes: bool,

    pub codegen: CodegenConfig,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            local_mem_budget_bytes: 2.0 * 1024.0 * 1024.0 * 1024.0 * 0.7,
            broadcast_mem_budget_bytes: 256.0 * 1024.0 * 1024.0,
            accelerator_mem_budget_bytes: 4.0 * 1024.0 * 1024.0 * 1024.0,
            blocksize: DEFAULT_BLOCKSIZE,
            cp_threshold: 2000,
            opt_level: OptLevel::MemoryAndShape,
            distributed_mode: DistributedMode::Hybrid,
            dynamic_recompilation: true,
            allow_operator_fusion: true,
            accelerator_enabled: false,
            forced_exec_type: None,
            forced_append_method: None,
            force_dist_sort_indexes: false,
            codegen: CodegenConfig::default(),
        }
    }
}

impl CompilerConfig {
    /// Create a config from environment variables, falling back to defaults.
    ///
    /// Environment variables:
    /// - `HOPC_LOCAL_MEM_BUDGET`: local operator budget in bytes
    /// - `HOPC_BROADCAST_BUDGET`: broadcast budget in bytes
    /// - `HOPC_BLOCKSIZE`: rows/cols per block
    /// - `HOPC_CP_THRESHOLD`: shape threshold
    /// - `HOPC_ACCELERATOR`: `1`/`true` enables the accelerator backend
    /// - `HOPC_CODEGEN`: `1`/`true` enables the fusion pass
    /// - `HOPC_PLAN_SELECTOR`: `fuse_all`, `fuse_no_redundancy`, `cost`, `cost_v2`
    /// - `HOPC_PLAN_CACHE`: `constant`, `cslh`, `none`
    /// - `HOPC_PLAN_CACHE_SIZE`: plan cache capacity
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(s) = std::env::var("HOPC_LOCAL_MEM_BUDGET") {
            if let Ok(v) = s.parse::<f64>() {
                cfg.local_mem_budget_bytes = v;
            }
        }

        if let Ok(s) = std::env::var("HOPC_BROADCAST_BUDGET") {
            if let Ok(v) = s.parse::<f64>() {
                cfg.broadcast_mem_budget_bytes = v;
            }
        }

        if let Ok(s) = std::env::var("HOPC_BLOCKSIZE") {
            if let Ok(v) = s.parse::<i64>() {
                cfg.blocksize = v;
            }
        }

        if let Ok(s) = std::env::var("HOPC_CP_THRESHOLD") {
            if let Ok(v) = s.parse::<i64>() {
                cfg.cp_threshold = v;
            }
        }

        if let Ok(s) = std::env::var("HOPC_ACCELERATOR") {
            cfg.accelerator_enabled = parse_flag(&s);
        }

        if let Ok(s) = std::env::var("HOPC_CODEGEN") {
            cfg.codegen.enabled = parse_flag(&s);
        }

        if let Ok(s) = std::env::var("HOPC_PLAN_SELECTOR") {
            if let Ok(v) = parse_plan_selector(&s) {
                cfg.codegen.plan_selector = v;
            }
        }

        if let Ok(s) = std::env::var("HOPC_PLAN_CACHE") {
            if let Ok(v) = parse_plan_cache_policy(&s) {
                cfg.codegen.plan_cache_policy = v;
            }
        }

        if let Ok(s) = std::env::var("HOPC_PLAN_CACHE_SIZE") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.codegen.plan_cache_size = v;
            }
        }

        cfg
    }

    /// Reject settings the optimizer cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.blocksize <= 0 {
            return Err(Error::Config(format!(
                "blocksize must be positive, got {}",
                self.blocksize
            )));
        }
        if self.local_mem_budget_bytes <= 0.0 || self.broadcast_mem_budget_bytes <= 0.0 {
            return Err(Error::Config("memory budgets must be positive".into()));
        }
        if self.codegen.plan_cache_size == 0
            && self.codegen.plan_cache_policy != PlanCachePolicy::None
        {
            return Err(Error::Config(
                "plan cache size must be positive unless the cache is disabled".into(),
            ));
        }
        Ok(())
    }

    /// Whether a distributed backend can be chosen at all.
    pub fn distributed_available(&self) -> bool {
        self.distributed_mode != DistributedMode::SingleNode
    }
}

fn parse_flag(s: &str) -> bool {
    matches!(s.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

pub fn parse_plan_selector(s: &str) -> Result<PlanSelector> {
    match s.trim().to_ascii_lowercase().as_str() {
        "fuse_all" | "all" => Ok(PlanSelector::FuseAll),
        "fuse_no_redundancy" | "no_redundancy" => Ok(PlanSelector::FuseNoRedundancy),
        "cost" | "fuse_cost_based" => Ok(PlanSelector::FuseCostBased),
        "cost_v2" | "fuse_cost_based_v2" => Ok(PlanSelector::FuseCostBasedV2),
        other => Err(Error::Config(format!("unknown plan selector '{other}'"))),
    }
}

pub fn parse_plan_cache_policy(s: &str) -> Result<PlanCachePolicy> {
    match s.trim().to_ascii_lowercase().as_str() {
        "constant" => Ok(PlanCachePolicy::Constant),
        "cslh" => Ok(PlanCachePolicy::Cslh),
        "none" => Ok(PlanCachePolicy::None),
        other => Err(Error::Config(format!("unknown plan cache policy '{other}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = CompilerConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.codegen.plan_cache_size, 1024);
        assert_eq!(cfg.opt_level, OptLevel::MemoryAndShape);
    }

    #[test]
    fn rejects_zero_blocksize() {
        let cfg = CompilerConfig {
            blocksize: 0,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn policy_names() {
        assert_eq!(parse_plan_selector("cost_v2").unwrap(), PlanSelector::FuseCostBasedV2);
        assert_eq!(parse_plan_cache_policy("NONE").unwrap(), PlanCachePolicy::None);
        assert!(parse_plan_selector("greedy").is_err());
        assert_eq!(
            PlanCachePolicy::from_flags(true, false),
            PlanCachePolicy::Cslh
        );
    }

    #[test]
    fn partial_yaml_uses_defaults() {
        let cfg: CompilerConfig = serde_json::from_str(r#"{"blocksize": 500}"#).unwrap();
        assert_eq!(cfg.blocksize, 500);
        assert_eq!(cfg.cp_threshold, 2000);
    }
}
