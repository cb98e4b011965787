// src/exec/mod.rs

//! Process execution layer.
//!
//! - [`backend`] provides the `ExecutorBackend` trait and the request/result
//!   types exchanged with it.
//! - [`local`] is the production backend running processes on this host.
//! - [`process`] builds the run operation of a process execution unit.

use std::fmt;
use std::sync::Arc;

use crate::cache::{CacheLifecycle, NoopCache, ResultCache};
use crate::fs::{FileSystem, RealFileSystem};

pub mod backend;
pub mod local;
pub mod process;

pub use backend::{ExecutionRequest, ExecutionResult, ExecutorBackend, ExitStatus};
pub use local::LocalExecutor;
pub use process::{ProcessPlan, process_run_fn};

/// Collaborators shared by every unit of a graph.
#[derive(Clone)]
pub struct ExecutionEnv {
    pub fs: Arc<dyn FileSystem>,
    pub backend: Arc<dyn ExecutorBackend>,
    pub cache: Arc<dyn ResultCache>,
    lifecycle: Arc<dyn CacheLifecycle>,
}

impl ExecutionEnv {
    pub fn new<C>(fs: Arc<dyn FileSystem>, backend: Arc<dyn ExecutorBackend>, cache: Arc<C>) -> Self
    where
        C: ResultCache + 'static,
    {
        let lifecycle: Arc<dyn CacheLifecycle> = cache.clone();
        Self {
            fs,
            backend,
            cache,
            lifecycle,
        }
    }

    /// Real filesystem, local executor, no cache.
    pub fn local(max_concurrent: usize) -> Self {
        Self::new(
            Arc::new(RealFileSystem),
            Arc::new(LocalExecutor::new(max_concurrent)),
            Arc::new(NoopCache),
        )
    }

    /// Setup/teardown hooks of the cache, for the driver.
    pub fn cache_lifecycle(&self) -> Arc<dyn CacheLifecycle> {
        Arc::clone(&self.lifecycle)
    }
}

impl fmt::Debug for ExecutionEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionEnv")
            .field("fs", &self.fs)
            .field("backend", &self.backend)
            .finish_non_exhaustive()
    }
}
