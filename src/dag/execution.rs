// src/dag/execution.rs

//! Description of a process execution, before it is added to a graph.

use std::collections::{BTreeMap, BTreeSet};

use crate::types::{ExecutionId, FileId};

/// Builder for a process execution.
///
/// ```
/// # use taskgraph::dag::Execution;
/// # use taskgraph::types::FileId;
/// let exec = Execution::new("sort the input", "sort")
///     .arg("-r")
///     .stdin(FileId(0))
///     .output("sorted.txt");
/// assert_eq!(exec.deps(), vec![FileId(0)]);
/// ```
#[derive(Debug, Clone)]
pub struct Execution {
    pub(crate) description: String,
    pub(crate) program: String,
    pub(crate) executable: Option<FileId>,
    pub(crate) args: Vec<String>,
    pub(crate) stdin: Option<FileId>,
    pub(crate) inputs: BTreeMap<String, FileId>,
    pub(crate) outputs: BTreeSet<String>,
    pub(crate) cache: bool,
    pub(crate) exclusive: bool,
}

impl Execution {
    pub fn new(description: impl Into<String>, program: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            program: program.into(),
            executable: None,
            args: Vec::new(),
            stdin: None,
            inputs: BTreeMap::new(),
            outputs: BTreeSet::new(),
            cache: true,
            exclusive: false,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Run the content of `file` instead of a program found on `PATH`.
    ///
    /// The file is placed in the box under the program name, which must then
    /// be a path relative to the box.
    ///
    /// ```
    /// # use taskgraph::dag::Execution;
    /// # use taskgraph::types::FileId;
    /// let run = Execution::new("run the solution", "solution")
    ///     .executable(FileId(7))
    ///     .stdin(FileId(3));
    /// assert_eq!(run.deps(), vec![FileId(3), FileId(7)]);
    /// ```
    pub fn executable(mut self, file: FileId) -> Self {
        self.executable = Some(file);
        self
    }

    pub fn stdin(mut self, file: FileId) -> Self {
        self.stdin = Some(file);
        self
    }

    /// Make `file` available in the execution box as `name`.
    pub fn input(mut self, name: impl Into<String>, file: FileId) -> Self {
        self.inputs.insert(name.into(), file);
        self
    }

    /// Declare a file the process writes at `path` in its box.
    pub fn output(mut self, path: impl Into<String>) -> Self {
        self.outputs.insert(path.into());
        self
    }

    /// Never look up or store this execution's result in the cache.
    pub fn disable_cache(mut self) -> Self {
        self.cache = false;
        self
    }

    /// Run with no other execution alongside it on the same backend.
    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Files that must be produced before this execution can run.
    pub fn deps(&self) -> Vec<FileId> {
        let mut deps: Vec<FileId> = self.stdin.iter().chain(&self.executable).copied().collect();
        deps.extend(self.inputs.values().copied());
        deps.sort();
        deps.dedup();
        deps
    }
}

/// Ids allocated for an execution added to a graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOutputs {
    pub id: ExecutionId,
    pub stdout: FileId,
    pub stderr: FileId,
    pub outputs: BTreeMap<String, FileId>,
}

impl ExecutionOutputs {
    /// Id of the declared output at `path`.
    pub fn output(&self, path: &str) -> Option<FileId> {
        self.outputs.get(path).copied()
    }
}
