//! Kernel compilers.
//!
//! A compiler turns generated source into a loadable kernel. The in-memory
//! compiler keeps sources in a process-local class table; the ahead-of-time
//! compiler stages one source file per kernel class on disk. Both release
//! the artifact when the plan cache evicts the kernel.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;

use hopc_core::config::{CompilerBackend, CompilerConfig, DistributedMode};
use hopc_core::error::{Error, Result};
use hopc_core::hash::{hash_str, Hash256};
use hopc_core::id::KernelId;
use hopc_core::types::TemplateType;

static NEXT_KERNEL_ID: AtomicU64 = AtomicU64::new(1);

fn next_kernel_id() -> KernelId {
    KernelId::new(NEXT_KERNEL_ID.fetch_add(1, Ordering::Relaxed))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompiledKernel {
    pub id: KernelId,
    pub class_name: String,
    pub template: TemplateType,
    pub source_hash: Hash256,
    pub backend: CompilerBackend,
    /// Staged source file of an ahead-of-time kernel.
    pub artifact: Option<PathBuf>,
}

pub trait KernelCompiler: Send + Sync {
    fn backend(&self) -> CompilerBackend;

    fn compile(&self, class_name: &str, template: TemplateType, source: &str) -> Result<CompiledKernel>;

    /// Drop whatever the compiler holds for `kernel`; called on eviction.
    fn release(&self, kernel: &CompiledKernel);
}

fn check_source(class_name: &str, source: &str) -> Result<()> {
    if source.trim().is_empty() {
        return Err(Error::Compile(format!("empty source for {class_name}")));
    }
    if !source.contains(&format!("pub struct {class_name};")) {
        return Err(Error::Compile(format!("source does not define {class_name}")));
    }
    Ok(())
}

#[derive(Debug, Default)]
pub struct InMemoryCompiler {
    classes: Mutex<BTreeMap<String, String>>,
}

impl InMemoryCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_loaded(&self, class_name: &str) -> bool {
        self.classes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(class_name)
    }

    pub fn loaded(&self) -> usize {
        self.classes.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl KernelCompiler for InMemoryCompiler {
    fn backend(&self) -> CompilerBackend {
        CompilerBackend::InMemory
    }

    fn compile(&self, class_name: &str, template: TemplateType, source: &str) -> Result<CompiledKernel> {
        check_source(class_name, source)?;
        self.classes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(class_name.to_string(), source.to_string());
        Ok(CompiledKernel {
            id: next_kernel_id(),
            class_name: class_name.to_string(),
            template,
            source_hash: hash_str(source),
            backend: CompilerBackend::InMemory,
            artifact: None,
        })
    }

    fn release(&self, kernel: &CompiledKernel) {
        self.classes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&kernel.class_name);
    }
}

#[derive(Debug, Clone)]
pub struct AheadOfTimeCompiler {
    staging_dir: PathBuf,
}

impl AheadOfTimeCompiler {
    pub fn new(staging_dir: impl Into<PathBuf>) -> Self {
        Self {
            staging_dir: staging_dir.into(),
        }
    }

    pub fn staging_dir(&self) -> &PathBuf {
        &self.staging_dir
    }
}

impl KernelCompiler for AheadOfTimeCompiler {
    fn backend(&self) -> CompilerBackend {
        CompilerBackend::AheadOfTime
    }

    fn compile(&self, class_name: &str, template: TemplateType, source: &str) -> Result<CompiledKernel> {
        check_source(class_name, source)?;
        std::fs::create_dir_all(&self.staging_dir)
            .map_err(|e| Error::Compile(format!("staging dir {}: {e}", self.staging_dir.display())))?;
        let path = self.staging_dir.join(format!("{class_name}.rs"));
        std::fs::write(&path, source)
            .map_err(|e| Error::Compile(format!("write {}: {e}", path.display())))?;
        Ok(CompiledKernel {
            id: next_kernel_id(),
            class_name: class_name.to_string(),
            template,
            source_hash: hash_str(source),
            backend: CompilerBackend::AheadOfTime,
            artifact: Some(path),
        })
    }

    fn release(&self, kernel: &CompiledKernel) {
        if let Some(path) = &kernel.artifact {
            if let Err(e) = std::fs::remove_file(path) {
                tracing::debug!(path = %path.display(), error = %e, "could not remove kernel artifact");
            }
        }
    }
}

/// Compiler for the configured backend. `Auto` compiles in memory when a
/// distributed backend may run the kernels and ahead-of-time otherwise.
pub fn compiler_for(cfg: &CompilerConfig) -> Arc<dyn KernelCompiler> {
    let backend = match cfg.codegen.compiler {
        CompilerBackend::Auto if cfg.distributed_mode == DistributedMode::SingleNode => {
            CompilerBackend::AheadOfTime
        }
        CompilerBackend::Auto => CompilerBackend::InMemory,
        other => other,
    };
    match backend {
        CompilerBackend::AheadOfTime => {
            let dir = cfg
                .codegen
                .staging_dir
                .as_ref()
                .map(PathBuf::from)
                .unwrap_or_else(|| std::env::temp_dir().join("hopc-kernels"));
            Arc::new(AheadOfTimeCompiler::new(dir))
        }
        _ => Arc::new(InMemoryCompiler::new()),
    }
}
