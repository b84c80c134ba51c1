//! Convenient re-exports for downstream crates.

pub use crate::config::{
    CodegenConfig, CompilerBackend, CompilerConfig, DistributedMode, OptLevel, PlanCachePolicy,
    PlanSelector,
};
pub use crate::error::{Error, Result};
pub use crate::hash::Hash256;
pub use crate::id::{HopId, KernelId, LopId};
pub use crate::manifest::{CompileManifest, ManifestId};
pub use crate::stats::{MatrixCharacteristics, UNKNOWN};
pub use crate::types::{
    AggOp, AppendMethod, BinaryMethod, DataType, Direction, ExecType, OpOp1, OpOp2, ReorgOp,
    TemplateType, ValueType,
};
