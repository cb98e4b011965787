// src/exec/backend.rs

//! Pluggable executor backend abstraction.
//!
//! Process execution units talk to an `ExecutorBackend` instead of spawning
//! processes themselves. Production code uses
//! [`LocalExecutor`](super::LocalExecutor); tests can provide a backend that
//! scripts results without spawning anything.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use crate::errors::UnitError;
use crate::types::FileHandle;

/// Trait abstracting how a single process is executed.
///
/// Called on a worker thread. Returning [`UnitError::Busy`] asks the
/// scheduler to admit the execution again later.
pub trait ExecutorBackend: Send + Sync + fmt::Debug {
    fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionResult, UnitError>;
}

/// Everything a backend needs to run one process.
#[derive(Debug, Clone, Default)]
pub struct ExecutionRequest {
    /// Program name, or its path in the box when `executable` is set.
    pub program: String,
    /// Content of the program itself, when it comes from the graph.
    pub executable: Option<FileHandle>,
    pub args: Vec<String>,
    pub stdin: Option<FileHandle>,
    /// Files materialized in the execution box, keyed by relative path.
    pub inputs: BTreeMap<String, FileHandle>,
    /// Relative paths collected from the box after a successful exit.
    pub outputs: Vec<String>,
    /// No other execution may run on the backend at the same time.
    pub exclusive: bool,
}

impl ExecutionRequest {
    /// `program arg1 arg2 ...`, for logs and error messages.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Success,
    ReturnCode(i32),
    Signal(i32),
}

impl ExitStatus {
    pub fn success(&self) -> bool {
        matches!(self, ExitStatus::Success)
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitStatus::Success => write!(f, "exited successfully"),
            ExitStatus::ReturnCode(code) => write!(f, "exited with status {code}"),
            ExitStatus::Signal(signal) => write!(f, "killed by signal {signal}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub status: ExitStatus,
    pub stdout: FileHandle,
    pub stderr: FileHandle,
    /// Declared outputs; empty unless `status` is a success.
    pub outputs: BTreeMap<String, FileHandle>,
    pub wall_time: Duration,
}
