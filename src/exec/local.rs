// src/exec/local.rs

//! Local, unsandboxed process executor.
//!
//! Every execution gets a fresh temporary "box" directory. Inputs are written
//! into it under their names, the process runs with the box as working
//! directory, and declared outputs are read back from it after a successful
//! exit. The box is removed when the execution finishes.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Instant;

use anyhow::{Context, anyhow};
use parking_lot::Mutex;
use tracing::{debug, trace};

use super::backend::{ExecutionRequest, ExecutionResult, ExecutorBackend, ExitStatus};
use crate::errors::UnitError;
use crate::types::FileHandle;

#[derive(Debug)]
pub struct LocalExecutor {
    max_concurrent: usize,
    slots: Mutex<SlotState>,
}

#[derive(Debug, Default)]
struct SlotState {
    running: usize,
    exclusive: bool,
}

impl LocalExecutor {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            max_concurrent: max_concurrent.max(1),
            slots: Mutex::new(SlotState::default()),
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Executions currently holding a slot.
    pub fn running(&self) -> usize {
        self.slots.lock().running
    }

    /// Take a slot, or answer busy. An exclusive execution needs the
    /// executor to itself and keeps every other execution out while it runs.
    fn acquire(&self, exclusive: bool) -> Result<Slot<'_>, UnitError> {
        let mut slots = self.slots.lock();
        let refused = slots.exclusive
            || slots.running >= self.max_concurrent
            || (exclusive && slots.running > 0);
        if refused {
            return Err(UnitError::Busy);
        }
        slots.running += 1;
        slots.exclusive = exclusive;
        Ok(Slot {
            slots: &self.slots,
            exclusive,
        })
    }
}

/// Releases an execution slot on drop.
struct Slot<'a> {
    slots: &'a Mutex<SlotState>,
    exclusive: bool,
}

impl Drop for Slot<'_> {
    fn drop(&mut self) {
        let mut slots = self.slots.lock();
        slots.running -= 1;
        if self.exclusive {
            slots.exclusive = false;
        }
    }
}

impl ExecutorBackend for LocalExecutor {
    fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionResult, UnitError> {
        let _slot = self.acquire(request.exclusive)?;
        let started = Instant::now();

        let sandbox = tempfile::Builder::new()
            .prefix("taskgraph-box-")
            .tempdir()
            .context("creating execution box")?;

        for (name, handle) in &request.inputs {
            materialize(sandbox.path(), name, handle)?;
        }
        let program = match &request.executable {
            Some(handle) => {
                let path = materialize(sandbox.path(), &request.program, handle)?;
                make_executable(&path)?;
                path.into_os_string()
            }
            None => request.program.clone().into(),
        };

        debug!(
            command = %request.command_line(),
            sandbox = ?sandbox.path(),
            inputs = request.inputs.len(),
            "spawning process"
        );

        let mut child = Command::new(&program)
            .args(&request.args)
            .current_dir(sandbox.path())
            .stdin(if request.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("spawning {:?}", request.program))?;

        let stdin_pipe = child.stdin.take();
        let output = std::thread::scope(|scope| {
            if let (Some(mut pipe), Some(content)) = (stdin_pipe, request.stdin.as_ref()) {
                scope.spawn(move || {
                    // The process may exit without reading all of its stdin.
                    if let Err(err) = pipe.write_all(content.bytes()) {
                        trace!(error = %err, "stdin not fully consumed");
                    }
                });
            }
            child.wait_with_output()
        })
        .with_context(|| format!("waiting for {:?}", request.program))?;

        let status = exit_status(&output.status);
        let mut outputs = BTreeMap::new();
        if status.success() {
            for name in &request.outputs {
                let path = box_path(sandbox.path(), name)?;
                let bytes = std::fs::read(&path).map_err(|err| {
                    anyhow!("declared output {name:?} was not produced: {err}")
                })?;
                outputs.insert(name.clone(), FileHandle::from_bytes(bytes));
            }
        }

        Ok(ExecutionResult {
            status,
            stdout: FileHandle::from_bytes(output.stdout),
            stderr: FileHandle::from_bytes(output.stderr),
            outputs,
            wall_time: started.elapsed(),
        })
    }
}

/// Write `handle` into the box at `name`, returning its full path.
fn materialize(root: &Path, name: &str, handle: &FileHandle) -> Result<PathBuf, UnitError> {
    let path = box_path(root, name)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating directory for {name:?}"))?;
    }
    std::fs::write(&path, handle.bytes()).with_context(|| format!("materializing {name:?}"))?;
    Ok(path)
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<(), UnitError> {
    use std::os::unix::fs::PermissionsExt;

    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
        .with_context(|| format!("marking {path:?} executable"))?;
    Ok(())
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<(), UnitError> {
    Ok(())
}

/// Resolve `name` inside the box, rejecting paths that would escape it.
fn box_path(root: &Path, name: &str) -> Result<PathBuf, UnitError> {
    let relative = Path::new(name);
    let escapes = relative.components().any(|c| {
        matches!(
            c,
            Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    });
    if name.is_empty() || escapes {
        return Err(UnitError::Other(anyhow!(
            "path {name:?} must be relative to the execution box"
        )));
    }
    Ok(root.join(relative))
}

#[cfg(unix)]
fn exit_status(status: &std::process::ExitStatus) -> ExitStatus {
    use std::os::unix::process::ExitStatusExt;

    if status.success() {
        ExitStatus::Success
    } else if let Some(code) = status.code() {
        ExitStatus::ReturnCode(code)
    } else if let Some(signal) = status.signal() {
        ExitStatus::Signal(signal)
    } else {
        ExitStatus::ReturnCode(-1)
    }
}

#[cfg(not(unix))]
fn exit_status(status: &std::process::ExitStatus) -> ExitStatus {
    if status.success() {
        ExitStatus::Success
    } else {
        ExitStatus::ReturnCode(status.code().unwrap_or(-1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_are_released_on_drop() {
        let executor = LocalExecutor::new(1);
        let slot = executor.acquire(false).expect("first slot");
        assert!(executor.acquire(false).is_err_and(|e| e.is_busy()));
        drop(slot);
        assert_eq!(executor.running(), 0);
        assert!(executor.acquire(false).is_ok());
    }

    #[test]
    fn exclusive_slot_waits_for_an_idle_executor() {
        let executor = LocalExecutor::new(4);
        let shared = executor.acquire(false).expect("shared slot");
        assert!(executor.acquire(true).is_err_and(|e| e.is_busy()));
        drop(shared);

        let exclusive = executor.acquire(true).expect("idle executor");
        assert!(executor.acquire(false).is_err_and(|e| e.is_busy()));
        assert!(executor.acquire(true).is_err_and(|e| e.is_busy()));
        drop(exclusive);

        let a = executor.acquire(false).expect("exclusivity released");
        let b = executor.acquire(false).expect("second shared slot");
        assert_eq!(executor.running(), 2);
        drop((a, b));
    }

    #[test]
    fn box_paths_must_stay_inside() {
        let root = Path::new("/tmp/box");
        assert!(box_path(root, "out/a.txt").is_ok());
        assert!(box_path(root, "../a.txt").is_err());
        assert!(box_path(root, "/etc/passwd").is_err());
        assert!(box_path(root, "").is_err());
    }
}
