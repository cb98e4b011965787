// src/exec/process.rs

//! Run operation of a process execution unit.
//!
//! Reads the execution's inputs from the file store, consults the result
//! cache, runs the process through the backend on a miss, and publishes
//! stdout, stderr and the declared outputs under their preallocated ids.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::anyhow;
use tracing::{debug, info, warn};

use super::ExecutionEnv;
use super::backend::{ExecutionRequest, ExecutionResult};
use crate::cache::{CachedResult, cache_key};
use crate::dag::RunFn;
use crate::engine::FileAccess;
use crate::errors::UnitError;
use crate::types::{FileHandle, FileId};

/// Number of trailing stderr lines quoted in a failure message.
const STDERR_TAIL_LINES: usize = 10;

/// Process description with every file resolved to an id.
#[derive(Debug, Clone)]
pub struct ProcessPlan {
    pub program: String,
    /// File materialized in the box as `program` and run from there.
    pub executable: Option<FileId>,
    pub args: Vec<String>,
    pub stdin: Option<FileId>,
    pub inputs: BTreeMap<String, FileId>,
    pub stdout: FileId,
    pub stderr: FileId,
    /// Declared outputs: path inside the box -> id it is published under.
    pub outputs: BTreeMap<String, FileId>,
    pub cache: bool,
    pub exclusive: bool,
}

impl ProcessPlan {
    /// Files that must be present before the process can run.
    pub fn deps(&self) -> Vec<FileId> {
        let mut deps: Vec<FileId> = self.stdin.iter().chain(&self.executable).copied().collect();
        deps.extend(self.inputs.values().copied());
        deps.sort();
        deps.dedup();
        deps
    }

    fn request(&self, access: &FileAccess<'_>) -> Result<ExecutionRequest, UnitError> {
        let executable = self.executable.map(|id| access.read(id)).transpose()?;
        let stdin = self.stdin.map(|id| access.read(id)).transpose()?;
        let mut inputs = BTreeMap::new();
        for (name, id) in &self.inputs {
            inputs.insert(name.clone(), access.read(*id)?);
        }
        Ok(ExecutionRequest {
            program: self.program.clone(),
            executable,
            args: self.args.clone(),
            stdin,
            inputs,
            outputs: self.outputs.keys().cloned().collect(),
            exclusive: self.exclusive,
        })
    }

    fn publish(
        &self,
        access: &FileAccess<'_>,
        stdout: FileHandle,
        stderr: FileHandle,
        outputs: &BTreeMap<String, FileHandle>,
    ) -> Result<(), UnitError> {
        // Check everything first so a partial result never becomes visible.
        let mut resolved = Vec::with_capacity(self.outputs.len());
        for (path, id) in &self.outputs {
            let handle = outputs
                .get(path)
                .ok_or_else(|| anyhow!("declared output {path:?} is missing from the result"))?;
            resolved.push((*id, handle.clone()));
        }

        access.publish(self.stdout, stdout);
        access.publish(self.stderr, stderr);
        for (id, handle) in resolved {
            access.publish(id, handle);
        }
        Ok(())
    }
}

/// Build the run operation of `plan`.
pub fn process_run_fn(plan: ProcessPlan, env: ExecutionEnv) -> RunFn {
    let plan = Arc::new(plan);
    Arc::new(move |access: &FileAccess<'_>| run_process(&plan, &env, access))
}

fn run_process(
    plan: &ProcessPlan,
    env: &ExecutionEnv,
    access: &FileAccess<'_>,
) -> Result<(), UnitError> {
    let request = plan.request(access)?;
    let key = plan.cache.then(|| cache_key(&request));

    if let Some(hit) = key.as_deref().and_then(|key| env.cache.lookup(key)) {
        info!(command = %request.command_line(), "cache hit");
        return plan.publish(access, hit.stdout, hit.stderr, &hit.outputs);
    }

    let ExecutionResult {
        status,
        stdout,
        stderr,
        outputs,
        wall_time,
    } = env.backend.execute(&request)?;

    debug!(
        command = %request.command_line(),
        %status,
        wall_ms = wall_time.as_millis() as u64,
        stdout_len = stdout.len(),
        stderr_len = stderr.len(),
        "process finished"
    );

    if !status.success() {
        return Err(UnitError::Other(anyhow!(
            "{} {}{}",
            request.program,
            status,
            stderr_tail(&stderr)
        )));
    }

    if let Some(key) = key {
        let entry = CachedResult {
            stdout: stdout.clone(),
            stderr: stderr.clone(),
            outputs: outputs.clone(),
        };
        if let Err(err) = env.cache.store(&key, &entry) {
            warn!(command = %request.command_line(), error = %format!("{err:#}"), "failed to store result in cache");
        }
    }

    plan.publish(access, stdout, stderr, &outputs)
}

fn stderr_tail(stderr: &FileHandle) -> String {
    let text = stderr.to_string_lossy();
    let lines: Vec<&str> = text.lines().collect();
    if lines.is_empty() {
        return String::new();
    }
    let tail = &lines[lines.len().saturating_sub(STDERR_TAIL_LINES)..];
    format!("; stderr:\n{}", tail.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deps_cover_stdin_executable_and_inputs_once() {
        let plan = ProcessPlan {
            program: "cat".into(),
            executable: Some(FileId(5)),
            args: vec![],
            stdin: Some(FileId(1)),
            inputs: BTreeMap::from([("a".to_string(), FileId(2)), ("b".to_string(), FileId(1))]),
            stdout: FileId(3),
            stderr: FileId(4),
            outputs: BTreeMap::new(),
            cache: true,
            exclusive: false,
        };
        assert_eq!(plan.deps(), vec![FileId(1), FileId(2), FileId(5)]);
    }

    #[test]
    fn stderr_tail_keeps_last_lines() {
        let text: String = (0..20).map(|i| format!("line {i}\n")).collect();
        let tail = stderr_tail(&FileHandle::from_bytes(text));
        assert!(tail.contains("line 19"));
        assert!(tail.contains("line 10"));
        assert!(!tail.contains("line 9\n"));
        assert_eq!(stderr_tail(&FileHandle::from_bytes("")), "");
    }
}
