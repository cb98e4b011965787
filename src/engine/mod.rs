// src/engine/mod.rs

//! Dependency-aware scheduling engine.
//!
//! - [`store`] holds the shared file store consulted for readiness, and the
//!   per-job buffers publications go through.
//! - [`pool`] is the fixed-size worker pool.
//! - [`job`] wraps unit operations into pool jobs with failure isolation.
//! - [`driver`] is the loop doing admission control, status dispatch and
//!   cancellation.

use std::time::Duration;

pub mod driver;
pub mod job;
pub mod pool;
pub mod store;

pub use driver::Driver;
pub use job::JobOutput;
pub use pool::{PendingStatus, StoppedWorkers, WorkerPool};
pub use store::{FileAccess, FileStore, PublishBuffer, Publisher};

/// Result of one admission pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// In-flight work reached the pool size; more may be admitted later.
    CapacityExhausted,
    /// Nothing is pending any more (units may still be in flight).
    Drained,
    /// Executions remain, none is ready yet, but in-flight work (or a busy
    /// backoff) may still change that.
    Blocked,
    /// Executions remain that can never become ready: nothing is in flight
    /// that could publish their inputs.
    Stranded,
    /// An observer vetoed a `Start`.
    Cancelled,
}

/// Tuning knobs of the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverOptions {
    /// Worker pool size, which is also the admission capacity.
    pub num_cores: usize,
    /// Upper bound of a single wait for in-flight results.
    pub poll_interval: Duration,
    /// Delay before a busy execution is admitted again. `None` retries as
    /// soon as capacity allows.
    pub busy_backoff: Option<Duration>,
}

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            num_cores: default_num_cores(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            busy_backoff: None,
        }
    }
}

impl DriverOptions {
    pub fn with_num_cores(mut self, num_cores: usize) -> Self {
        self.num_cores = num_cores.max(1);
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_busy_backoff(mut self, backoff: Option<Duration>) -> Self {
        self.busy_backoff = backoff.filter(|d| !d.is_zero());
        self
    }
}

/// Number of hardware threads, or 1 if it cannot be determined.
pub fn default_num_cores() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
