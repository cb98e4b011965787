// src/cache/mod.rs

//! Result cache.
//!
//! The driver only sees the [`CacheLifecycle`] hooks bracketing a run. Lookup
//! and store go through [`ResultCache`] and are used by process execution
//! units to short-circuit runs whose inputs were seen before.
//!
//! - [`key`] derives content-addressed cache keys.
//! - [`disk`] persists results under a directory.

use std::collections::BTreeMap;

use anyhow::Result;

use crate::types::FileHandle;

pub mod disk;
pub mod key;

pub use disk::DiskCache;
pub use key::cache_key;

/// Hooks invoked once per run: `setup` before anything is admitted,
/// `teardown` exactly once on every exit path.
pub trait CacheLifecycle: Send + Sync {
    fn setup(&self) -> Result<()>;

    /// Must be safe to call even if `setup` failed halfway.
    fn teardown(&self);
}

/// Lookup/store of execution results by cache key.
pub trait ResultCache: CacheLifecycle {
    fn lookup(&self, key: &str) -> Option<CachedResult>;
    fn store(&self, key: &str, result: &CachedResult) -> Result<()>;
}

/// Outputs of a successful execution, as kept by the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResult {
    pub stdout: FileHandle,
    pub stderr: FileHandle,
    /// Declared outputs keyed by their path relative to the execution box.
    pub outputs: BTreeMap<String, FileHandle>,
}

/// Cache that never hits and stores nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCache;

impl CacheLifecycle for NoopCache {
    fn setup(&self) -> Result<()> {
        Ok(())
    }

    fn teardown(&self) {}
}

impl ResultCache for NoopCache {
    fn lookup(&self, _key: &str) -> Option<CachedResult> {
        None
    }

    fn store(&self, _key: &str, _result: &CachedResult) -> Result<()> {
        Ok(())
    }
}
