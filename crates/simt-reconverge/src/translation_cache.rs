//! Translation cache for specialized subkernels
//!
//! Subkernels are translated once per warp size and specialization and
//! shared behind `Arc`. Lookups and compilation happen inside one critical
//! section, so a key is compiled at most once even when many CTAs request
//! it concurrently.
//!
//! # Example
//!
//! ```
//! use simt_reconverge::translation_cache::{SubkernelId, Translation, TranslationCache, TranslationKey};
//! use simt_reconverge::Instruction;
//!
//! let cache = TranslationCache::new();
//! let key = TranslationKey::new(SubkernelId(0), 32, 0);
//! let translation = cache.get_or_insert_with(key, |key| Ok(Translation::new(*key, vec![Instruction::exit()])))?;
//! assert_eq!(translation.name(), "subkernel_0_w32_s0");
//! assert_eq!(cache.len(), 1);
//! # Ok::<(), simt_reconverge::ReconvergenceError>(())
//! ```

use crate::error::{ReconvergenceError, Result};
use crate::isa::Instruction;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Identifies a subkernel within a kernel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubkernelId(pub u32);

impl fmt::Display for SubkernelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Cache key: which subkernel, for which warp size, under which specialization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TranslationKey {
    pub subkernel: SubkernelId,
    pub warp_size: u32,
    pub specialization: u32,
}

impl TranslationKey {
    pub fn new(subkernel: SubkernelId, warp_size: u32, specialization: u32) -> Self {
        Self {
            subkernel,
            warp_size,
            specialization,
        }
    }
}

/// A compiled subkernel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Translation {
    pub key: TranslationKey,
    pub instructions: Vec<Instruction>,
}

impl Translation {
    pub fn new(key: TranslationKey, instructions: Vec<Instruction>) -> Self {
        Self { key, instructions }
    }

    /// Symbol name of the compiled function
    pub fn name(&self) -> String {
        format!(
            "subkernel_{}_w{}_s{}",
            self.key.subkernel, self.key.warp_size, self.key.specialization
        )
    }
}

/// Thread-safe map from translation keys to compiled subkernels
#[derive(Debug, Default)]
pub struct TranslationCache {
    entries: Mutex<HashMap<TranslationKey, Arc<Translation>>>,
}

impl TranslationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached translation for `key`, if any
    pub fn get(&self, key: &TranslationKey) -> Option<Arc<Translation>> {
        self.entries.lock().get(key).cloned()
    }

    /// Return the translation for `key`, compiling it first if absent.
    ///
    /// `compile` runs under the cache lock. A failed compilation caches nothing.
    pub fn get_or_insert_with<F>(&self, key: TranslationKey, compile: F) -> Result<Arc<Translation>>
    where
        F: FnOnce(&TranslationKey) -> Result<Translation>,
    {
        let mut entries = self.entries.lock();
        if let Some(translation) = entries.get(&key) {
            return Ok(Arc::clone(translation));
        }

        let translation = compile(&key)?;
        if translation.key != key {
            return Err(ReconvergenceError::TranslationFailed(format!(
                "compiled {} for subkernel {} warp size {}",
                translation.name(),
                key.subkernel,
                key.warp_size
            )));
        }
        let translation = Arc::new(translation);
        debug!(name = %translation.name(), instructions = translation.instructions.len(), "translation cached");
        entries.insert(key, Arc::clone(&translation));
        Ok(translation)
    }

    /// Compile every subkernel for `warp_size` (specialization 0).
    ///
    /// Returns how many were newly compiled.
    pub fn compile_all<F>(&self, subkernels: &[SubkernelId], warp_size: u32, mut compile: F) -> Result<usize>
    where
        F: FnMut(&TranslationKey) -> Result<Translation>,
    {
        let mut compiled = 0;
        for &subkernel in subkernels {
            let key = TranslationKey::new(subkernel, warp_size, 0);
            let mut fresh = false;
            self.get_or_insert_with(key, |key| {
                fresh = true;
                compile(key)
            })?;
            if fresh {
                compiled += 1;
            }
        }
        Ok(compiled)
    }

    /// Warp sizes for which `subkernel` has a translation
    pub fn cached_warp_sizes(&self, subkernel: SubkernelId) -> BTreeSet<u32> {
        self.entries
            .lock()
            .keys()
            .filter(|key| key.subkernel == subkernel)
            .map(|key| key.warp_size)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    fn exit_translation(key: &TranslationKey) -> Result<Translation> {
        Ok(Translation::new(*key, vec![Instruction::exit()]))
    }

    #[test]
    fn get_or_insert_caches() {
        let cache = TranslationCache::new();
        let key = TranslationKey::new(SubkernelId(3), 32, 1);
        assert!(cache.get(&key).is_none());

        let first = cache.get_or_insert_with(key, exit_translation).unwrap();
        let second = cache
            .get_or_insert_with(key, |_| Err(ReconvergenceError::TranslationFailed("recompiled".into())))
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn failed_compilation_is_not_cached() {
        let cache = TranslationCache::new();
        let key = TranslationKey::new(SubkernelId(0), 8, 0);
        let err = cache
            .get_or_insert_with(key, |_| Err(ReconvergenceError::TranslationFailed("bad".into())))
            .unwrap_err();
        assert_eq!(err, ReconvergenceError::TranslationFailed("bad".into()));
        assert!(cache.is_empty());

        let wrong_key = cache.get_or_insert_with(key, |_| {
            exit_translation(&TranslationKey::new(SubkernelId(1), 8, 0))
        });
        assert!(wrong_key.is_err());
        assert!(cache.is_empty());
    }

    #[test]
    fn concurrent_requests_compile_once() {
        let cache = Arc::new(TranslationCache::new());
        let compiles = Arc::new(AtomicUsize::new(0));
        let key = TranslationKey::new(SubkernelId(7), 16, 0);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let compiles = Arc::clone(&compiles);
                thread::spawn(move || {
                    cache
                        .get_or_insert_with(key, |key| {
                            compiles.fetch_add(1, Ordering::SeqCst);
                            exit_translation(key)
                        })
                        .unwrap()
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(compiles.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn compile_all_counts_new_entries() {
        let cache = TranslationCache::new();
        let subkernels = [SubkernelId(0), SubkernelId(1), SubkernelId(2)];
        assert_eq!(cache.compile_all(&subkernels[..2], 32, exit_translation).unwrap(), 2);
        assert_eq!(cache.compile_all(&subkernels, 32, exit_translation).unwrap(), 1);
        cache.compile_all(&subkernels[..1], 16, exit_translation).unwrap();

        assert_eq!(cache.cached_warp_sizes(SubkernelId(0)), BTreeSet::from([16, 32]));
        assert_eq!(cache.cached_warp_sizes(SubkernelId(2)), BTreeSet::from([32]));
        assert_eq!(cache.len(), 4);
        cache.clear();
        assert!(cache.is_empty());
    }
}
