use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Duration;

use parking_lot::Mutex;
use taskgraph::errors::UnitError;
use taskgraph::exec::{ExecutionRequest, ExecutionResult, ExecutorBackend, ExitStatus};
use taskgraph::types::FileHandle;

/// One scripted answer of [`ScriptedExecutor`].
#[derive(Debug, Clone)]
pub enum ScriptedResponse {
    /// Exit successfully with this stdout; declared outputs get `"<path>"`
    /// as content.
    Stdout(String),
    /// Exit with a non-zero code and this stderr.
    Exit { code: i32, stderr: String },
    Busy,
}

/// Fake backend that:
/// - records every request it receives
/// - answers from a per-program script, falling back to echoing the program
///   name on stdout.
#[derive(Debug, Default)]
pub struct ScriptedExecutor {
    scripts: Mutex<HashMap<String, VecDeque<ScriptedResponse>>>,
    requests: Mutex<Vec<ExecutionRequest>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `response` for the next execution of `program`.
    pub fn on(self, program: &str, response: ScriptedResponse) -> Self {
        self.scripts
            .lock()
            .entry(program.to_string())
            .or_default()
            .push_back(response);
        self
    }

    pub fn requests(&self) -> Vec<ExecutionRequest> {
        self.requests.lock().clone()
    }

    /// Number of requests for `program`, busy answers included.
    pub fn calls(&self, program: &str) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.program == program)
            .count()
    }
}

impl ExecutorBackend for ScriptedExecutor {
    fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionResult, UnitError> {
        self.requests.lock().push(request.clone());

        let response = self
            .scripts
            .lock()
            .get_mut(&request.program)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| ScriptedResponse::Stdout(request.program.clone()));

        let (status, stdout, stderr) = match response {
            ScriptedResponse::Busy => return Err(UnitError::Busy),
            ScriptedResponse::Stdout(stdout) => (ExitStatus::Success, stdout, String::new()),
            ScriptedResponse::Exit { code, stderr } => {
                (ExitStatus::ReturnCode(code), String::new(), stderr)
            }
        };

        let outputs = if status.success() {
            request
                .outputs
                .iter()
                .map(|path| (path.clone(), FileHandle::from_bytes(path.as_bytes())))
                .collect()
        } else {
            BTreeMap::new()
        };

        Ok(ExecutionResult {
            status,
            stdout: FileHandle::from_bytes(stdout),
            stderr: FileHandle::from_bytes(stderr),
            outputs,
            wall_time: Duration::ZERO,
        })
    }
}
