// src/errors.rs

//! Crate-wide error types.
//!
//! Two layers are kept apart:
//! - [`TaskgraphError`] is what escapes the public API (config problems, IO,
//!   and scheduler bookkeeping failures).
//! - [`UnitError`] is what a unit's run operation returns. It never escapes
//!   the worker pool; the scheduler turns it into a
//!   [`Status`](crate::dag::Status).

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TaskgraphError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Cycle detected in graph: {0}")]
    DagCycle(String),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    /// A worker dropped the result of an admitted unit without fulfilling it.
    #[error("worker lost the result of {0}")]
    WorkerLost(String),

    /// A job was submitted after the pool stopped accepting work.
    #[error("worker pool is shut down")]
    PoolShutDown,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Error returned by the run operation of a unit.
#[derive(Error, Debug)]
pub enum UnitError {
    /// The backend is at capacity; the unit should be admitted again later.
    #[error("too many concurrent executions")]
    Busy,

    #[error("failed to load file: {0}")]
    Load(String),

    #[error("input file {0} is not available")]
    MissingInput(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl UnitError {
    pub fn is_busy(&self) -> bool {
        matches!(self, UnitError::Busy)
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, TaskgraphError>;
