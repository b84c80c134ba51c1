//! Bounded LRU cache of compiled kernels keyed by canonical plan hash.
//!
//! Lookups refresh recency. Inserting into a full cache evicts the least
//! recently used kernel and hands it to the eviction hook before `put`
//! returns. Replacing a key and clearing the cache release the displaced
//! kernels through the same hook. Safe for concurrent use; a poisoned lock is recovered since
//! the cache holds no invariant a panicking holder could break halfway.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use once_cell::sync::Lazy;

use hopc_core::hash::Hash256;

use crate::compiler::CompiledKernel;

pub type EvictionHook = Box<dyn Fn(&CompiledKernel) + Send + Sync>;

/// Capacity of the process-wide cache.
pub const DEFAULT_PLAN_CACHE_SIZE: usize = 1024;

static GLOBAL: Lazy<PlanCache> = Lazy::new(|| PlanCache::new(DEFAULT_PLAN_CACHE_SIZE));

#[derive(Default)]
struct Inner {
    entries: HashMap<Hash256, (Arc<CompiledKernel>, u64)>,
    /// tick -> key, oldest first
    order: BTreeMap<u64, Hash256>,
    tick: u64,
}

impl Inner {
    fn touch(&mut self, key: &Hash256) {
        self.tick += 1;
        let tick = self.tick;
        if let Some((_, t)) = self.entries.get_mut(key) {
            self.order.remove(t);
            *t = tick;
            self.order.insert(tick, *key);
        }
    }
}

pub struct PlanCache {
    inner: Mutex<Inner>,
    max_size: usize,
    on_evict: Option<EvictionHook>,
}

impl std::fmt::Debug for PlanCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlanCache")
            .field("len", &self.len())
            .field("max_size", &self.max_size)
            .finish()
    }
}

impl PlanCache {
    pub fn new(max_size: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            max_size: max_size.max(1),
            on_evict: None,
        }
    }

    pub fn with_eviction_hook(max_size: usize, hook: impl Fn(&CompiledKernel) + Send + Sync + 'static) -> Self {
        Self {
            on_evict: Some(Box::new(hook)),
            ..Self::new(max_size)
        }
    }

    /// Process-wide cache shared by optimizers that do not bring their own.
    pub fn global() -> &'static PlanCache {
        &GLOBAL
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self, key: &Hash256) -> Option<Arc<CompiledKernel>> {
        let mut inner = self.lock();
        let kernel = inner.entries.get(key).map(|(k, _)| Arc::clone(k))?;
        inner.touch(key);
        Some(kernel)
    }

    pub fn contains(&self, key: &Hash256) -> bool {
        self.lock().entries.contains_key(key)
    }

    /// Insert or replace `key`. Returns the evicted kernel, if any.
    ///
    /// A replaced kernel goes to the eviction hook unless it shares its
    /// class with the new one, since releasing it would drop the new
    /// kernel's artifact too.
    pub fn put(&self, key: Hash256, kernel: Arc<CompiledKernel>) -> Option<Arc<CompiledKernel>> {
        let (evicted, replaced) = {
            let mut inner = self.lock();
            if let Some((slot, _)) = inner.entries.get_mut(&key) {
                let old = std::mem::replace(slot, Arc::clone(&kernel));
                inner.touch(&key);
                let released = !Arc::ptr_eq(&old, &kernel) && old.class_name != kernel.class_name;
                (None, released.then_some(old))
            } else {
                let mut evicted = None;
                if inner.entries.len() >= self.max_size {
                    if let Some((_, oldest)) = inner.order.pop_first() {
                        evicted = inner.entries.remove(&oldest).map(|(k, _)| k);
                    }
                }
                inner.tick += 1;
                let tick = inner.tick;
                inner.entries.insert(key, (kernel, tick));
                inner.order.insert(tick, key);
                (evicted, None)
            }
        };
        if let Some(k) = &evicted {
            tracing::debug!(class = %k.class_name, "evicting kernel from plan cache");
            self.release(k);
        }
        if let Some(k) = &replaced {
            tracing::debug!(class = %k.class_name, "replacing kernel in plan cache");
            self.release(k);
        }
        evicted
    }

    /// Drop every entry, handing each kernel to the eviction hook.
    pub fn clear(&self) {
        let drained: Vec<Arc<CompiledKernel>> = {
            let mut inner = self.lock();
            inner.order.clear();
            inner.entries.drain().map(|(_, (k, _))| k).collect()
        };
        if !drained.is_empty() {
            tracing::debug!(kernels = drained.len(), "clearing plan cache");
        }
        for k in &drained {
            self.release(k);
        }
    }

    fn release(&self, kernel: &CompiledKernel) {
        if let Some(hook) = &self.on_evict {
            hook(kernel);
        }
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hopc_core::config::CompilerBackend;
    use hopc_core::hash::hash_str;
    use hopc_core::id::KernelId;
    use hopc_core::types::TemplateType;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn kernel(i: u64) -> Arc<CompiledKernel> {
        Arc::new(CompiledKernel {
            id: KernelId::new(i),
            class_name: format!("TMP{i}"),
            template: TemplateType::Cell,
            source_hash: hash_str(&i.to_string()),
            backend: CompilerBackend::InMemory,
            artifact: None,
        })
    }

    fn key(i: u64) -> Hash256 {
        hash_str(&format!("plan{i}"))
    }

    #[test]
    fn size_never_exceeds_capacity() {
        let cache = PlanCache::new(3);
        for i in 0..10 {
            cache.put(key(i), kernel(i));
            assert!(cache.len() <= 3);
        }
        assert_eq!(cache.len(), 3);
        assert!(cache.contains(&key(9)));
        assert!(!cache.contains(&key(0)));
    }

    #[test]
    fn get_refreshes_recency() {
        let cache = PlanCache::new(2);
        cache.put(key(1), kernel(1));
        cache.put(key(2), kernel(2));
        assert!(cache.get(&key(1)).is_some());
        let evicted = cache.put(key(3), kernel(3)).unwrap();
        assert_eq!(evicted.class_name, "TMP2");
        assert!(cache.contains(&key(1)));
    }

    #[test]
    fn eviction_hook_runs_synchronously() {
        let released = Arc::new(AtomicUsize::new(0));
        let r = Arc::clone(&released);
        let cache = PlanCache::with_eviction_hook(1, move |_| {
            r.fetch_add(1, Ordering::SeqCst);
        });
        cache.put(key(1), kernel(1));
        assert_eq!(released.load(Ordering::SeqCst), 0);
        cache.put(key(2), kernel(2));
        assert_eq!(released.load(Ordering::SeqCst), 1);
        cache.put(key(2), kernel(3));
        assert_eq!(released.load(Ordering::SeqCst), 2);
        assert_eq!(cache.get(&key(2)).unwrap().id, KernelId::new(3));
    }

    #[test]
    fn replacing_with_the_same_kernel_keeps_it() {
        let released = Arc::new(AtomicUsize::new(0));
        let r = Arc::clone(&released);
        let cache = PlanCache::with_eviction_hook(4, move |_| {
            r.fetch_add(1, Ordering::SeqCst);
        });
        let k = kernel(1);
        cache.put(key(1), Arc::clone(&k));
        cache.put(key(1), Arc::clone(&k));
        assert_eq!(released.load(Ordering::SeqCst), 0);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn clear_releases_every_kernel() {
        let released = Arc::new(Mutex::new(Vec::new()));
        let r = Arc::clone(&released);
        let cache = PlanCache::with_eviction_hook(4, move |k| {
            r.lock().unwrap().push(k.class_name.clone());
        });
        cache.put(key(1), kernel(1));
        cache.put(key(2), kernel(2));
        cache.clear();
        assert!(cache.is_empty());
        let mut names = released.lock().unwrap().clone();
        names.sort();
        assert_eq!(names, vec!["TMP1".to_string(), "TMP2".to_string()]);
    }

    #[test]
    fn clear_empties_the_cache() {
        let cache = PlanCache::new(4);
        cache.put(key(1), kernel(1));
        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.get(&key(1)).is_none());
    }

    #[test]
    fn concurrent_puts_stay_bounded() {
        let cache = Arc::new(PlanCache::new(8));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for i in 0..50 {
                        let n = t * 100 + i;
                        cache.put(key(n), kernel(n));
                        let _ = cache.get(&key(n));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(cache.len(), 8);
    }

    #[test]
    fn global_cache_is_shared() {
        let a = PlanCache::global() as *const PlanCache;
        let b = PlanCache::global() as *const PlanCache;
        assert_eq!(a, b);
        assert_eq!(PlanCache::global().max_size(), DEFAULT_PLAN_CACHE_SIZE);
    }
}
