#![allow(dead_code)]

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use taskgraph::cache::ResultCache;
use taskgraph::engine::DriverOptions;
use taskgraph::exec::{ExecutionEnv, ExecutorBackend};
use taskgraph::fs::MockFileSystem;

pub use taskgraph_test_utils::{init_tracing, with_timeout};

pub type TestResult = Result<(), Box<dyn Error>>;

/// Driver options with a short poll interval, so tests never wait long.
pub fn options(num_cores: usize) -> DriverOptions {
    DriverOptions::default()
        .with_num_cores(num_cores)
        .with_poll_interval(Duration::from_millis(5))
}

/// Environment backed by an in-memory filesystem.
pub fn mock_env<C>(
    fs: &MockFileSystem,
    backend: Arc<dyn ExecutorBackend>,
    cache: Arc<C>,
) -> ExecutionEnv
where
    C: ResultCache + 'static,
{
    ExecutionEnv::new(Arc::new(fs.clone()), backend, cache)
}
