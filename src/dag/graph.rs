// src/dag/graph.rs

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::model::{ConfigFile, FileRef};
use crate::dag::execution::{Execution, ExecutionOutputs};
use crate::dag::status::{Status, UnitRef};
use crate::dag::unit::{ExecutionUnit, FileUnit, Observer, UnitSet};
use crate::errors::{Result, TaskgraphError, UnitError};
use crate::exec::{ExecutionEnv, ProcessPlan, process_run_fn};
use crate::types::{ExecutionId, FileHandle, FileId};

/// A graph of file units and execution units under construction.
///
/// Ids are allocated here and are unique within the graph. Edges are
/// implicit: an execution depends on the files it reads, and a file is
/// produced either by a file unit or as an output of an execution.
pub struct ExecutionDag {
    env: ExecutionEnv,
    next_file: u64,
    next_execution: u64,
    files: Vec<FileUnit>,
    executions: Vec<ExecutionUnit>,
    descriptions: HashMap<UnitRef, String>,
    observers: HashMap<UnitRef, Observer>,
    default_observer: Option<Observer>,
}

impl std::fmt::Debug for ExecutionDag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionDag")
            .field("files", &self.files)
            .field("executions", &self.executions)
            .field("observers", &self.observers.len())
            .finish_non_exhaustive()
    }
}

impl ExecutionDag {
    pub fn new(env: ExecutionEnv) -> Self {
        Self {
            env,
            next_file: 0,
            next_execution: 0,
            files: Vec::new(),
            executions: Vec::new(),
            descriptions: HashMap::new(),
            observers: HashMap::new(),
            default_observer: None,
        }
    }

    pub fn env(&self) -> &ExecutionEnv {
        &self.env
    }

    pub fn allocate_file_id(&mut self) -> FileId {
        let id = FileId(self.next_file);
        self.next_file += 1;
        id
    }

    pub fn allocate_execution_id(&mut self) -> ExecutionId {
        let id = ExecutionId(self.next_execution);
        self.next_execution += 1;
        id
    }

    /// File unit loading `path` through the graph's filesystem.
    pub fn provide_file(&mut self, description: impl Into<String>, path: impl Into<PathBuf>) -> FileId {
        let id = self.allocate_file_id();
        let path = path.into();
        let fs = self.env.fs.clone();
        let unit = FileUnit::new(id, description, move |publisher| {
            let bytes = fs
                .read(&path)
                .map_err(|err| UnitError::Load(format!("{err:#}")))?;
            publisher.publish(id, FileHandle::from_bytes(bytes));
            Ok(())
        });
        self.insert_file_unit(unit);
        id
    }

    /// File unit publishing in-memory content.
    pub fn provide_content(&mut self, description: impl Into<String>, content: impl Into<Vec<u8>>) -> FileId {
        let id = self.allocate_file_id();
        let handle = FileHandle::from_bytes(content);
        let unit = FileUnit::new(id, description, move |publisher| {
            publisher.publish(id, handle.clone());
            Ok(())
        });
        self.insert_file_unit(unit);
        id
    }

    /// Add a process execution, allocating ids for everything it produces.
    pub fn add_execution(&mut self, execution: Execution) -> ExecutionOutputs {
        let id = self.allocate_execution_id();
        let stdout = self.allocate_file_id();
        let stderr = self.allocate_file_id();
        let outputs: BTreeMap<String, FileId> = execution
            .outputs
            .iter()
            .map(|path| (path.clone(), self.allocate_file_id()))
            .collect();

        let plan = ProcessPlan {
            program: execution.program,
            executable: execution.executable,
            args: execution.args,
            stdin: execution.stdin,
            inputs: execution.inputs,
            stdout,
            stderr,
            outputs: outputs.clone(),
            cache: execution.cache,
            exclusive: execution.exclusive,
        };
        let deps = plan.deps();
        debug!(execution = %id, deps = ?deps, outputs = outputs.len(), "adding execution");

        let run = process_run_fn(plan, self.env.clone());
        self.insert_execution_unit(ExecutionUnit::from_run_fn(id, execution.description, deps, run));

        ExecutionOutputs {
            id,
            stdout,
            stderr,
            outputs,
        }
    }

    /// Add a caller-built file unit. Its id must come from
    /// [`allocate_file_id`](Self::allocate_file_id).
    pub fn add_file_unit(&mut self, unit: FileUnit) -> Result<FileId> {
        let id = unit.id();
        if id.0 >= self.next_file || self.files.iter().any(|u| u.id() == id) {
            return Err(TaskgraphError::ConfigError(format!(
                "{id} was not allocated by this graph or already has a unit"
            )));
        }
        self.insert_file_unit(unit);
        Ok(id)
    }

    /// Add a caller-built execution unit. Its id must come from
    /// [`allocate_execution_id`](Self::allocate_execution_id).
    pub fn add_execution_unit(&mut self, unit: ExecutionUnit) -> Result<ExecutionId> {
        let id = unit.id();
        if id.0 >= self.next_execution || self.executions.iter().any(|u| u.id() == id) {
            return Err(TaskgraphError::ConfigError(format!(
                "{id} was not allocated by this graph or already has a unit"
            )));
        }
        self.insert_execution_unit(unit);
        Ok(id)
    }

    fn insert_file_unit(&mut self, unit: FileUnit) {
        self.descriptions
            .insert(UnitRef::File(unit.id()), unit.description().to_string());
        self.files.push(unit);
    }

    fn insert_execution_unit(&mut self, unit: ExecutionUnit) {
        self.descriptions
            .insert(UnitRef::Execution(unit.id()), unit.description().to_string());
        self.executions.push(unit);
    }

    /// Observe the file unit loading `id`.
    ///
    /// Files produced by executions have no unit of their own; observe the
    /// execution instead.
    pub fn on_file_status<O>(&mut self, id: FileId, observer: O) -> Result<()>
    where
        O: FnMut(&Status) -> bool + Send + 'static,
    {
        self.set_unit_observer(UnitRef::File(id), Box::new(observer))
    }

    pub fn on_execution_status<O>(&mut self, id: ExecutionId, observer: O) -> Result<()>
    where
        O: FnMut(&Status) -> bool + Send + 'static,
    {
        self.set_unit_observer(UnitRef::Execution(id), Box::new(observer))
    }

    fn set_unit_observer(&mut self, unit: UnitRef, observer: Observer) -> Result<()> {
        if !self.descriptions.contains_key(&unit) {
            return Err(TaskgraphError::ConfigError(format!("{unit} has no unit in this graph")));
        }
        self.observers.insert(unit, observer);
        Ok(())
    }

    /// Observer for every unit without an observer of its own.
    pub fn set_observer<O>(&mut self, observer: O)
    where
        O: FnMut(&Status) -> bool + Send + 'static,
    {
        self.default_observer = Some(Box::new(observer));
    }

    pub fn description_of(&self, unit: UnitRef) -> Option<&str> {
        self.descriptions.get(&unit).map(String::as_str)
    }

    /// Descriptions of every unit, for observers that report by name.
    pub fn descriptions(&self) -> HashMap<UnitRef, String> {
        self.descriptions.clone()
    }

    pub fn file_units(&self) -> &[FileUnit] {
        &self.files
    }

    pub fn execution_units(&self) -> &[ExecutionUnit] {
        &self.executions
    }

    /// Hand every unit, with its observer attached, to a driver.
    pub fn into_units(mut self) -> UnitSet {
        let mut set = UnitSet::new();
        for mut unit in std::mem::take(&mut self.files) {
            unit.observer = self.observers.remove(&UnitRef::File(unit.id()));
            set.push(unit);
        }
        for mut unit in std::mem::take(&mut self.executions) {
            unit.observer = self.observers.remove(&UnitRef::Execution(unit.id()));
            set.push(unit);
        }
        set.default_observer = self.default_observer.take();
        set
    }

    /// Build a graph from a validated config.
    ///
    /// File paths are resolved against `root`. Returns the graph and the id
    /// of every file the config can reference.
    pub fn from_config(
        cfg: &ConfigFile,
        root: &Path,
        env: ExecutionEnv,
    ) -> Result<(Self, BTreeMap<FileRef, FileId>)> {
        let mut dag = Self::new(env);
        let mut refs: BTreeMap<FileRef, FileId> = BTreeMap::new();

        for (name, file) in &cfg.file {
            let path = if file.path.is_absolute() {
                file.path.clone()
            } else {
                root.join(&file.path)
            };
            let id = dag.provide_file(format!("load {name}"), path);
            refs.insert(FileRef::File(name.clone()), id);
        }

        let lookup = |refs: &BTreeMap<FileRef, FileId>, r: &FileRef| {
            refs.get(r)
                .copied()
                .ok_or_else(|| TaskgraphError::ConfigError(format!("unknown file reference '{r}'")))
        };

        // Executions are added producers first, so every reference resolves.
        for name in &cfg.execution_order {
            let exec_cfg = cfg.execution.get(name).ok_or_else(|| {
                TaskgraphError::ConfigError(format!("execution '{name}' is not defined"))
            })?;

            let description = exec_cfg.description.clone().unwrap_or_else(|| name.clone());
            let mut execution = Execution::new(description, &exec_cfg.program).args(&exec_cfg.args);
            if let Some(executable) = &exec_cfg.executable {
                execution = execution.executable(lookup(&refs, executable)?);
            }
            if let Some(stdin) = &exec_cfg.stdin {
                execution = execution.stdin(lookup(&refs, stdin)?);
            }
            for (input, r) in &exec_cfg.inputs {
                execution = execution.input(input, lookup(&refs, r)?);
            }
            for output in &exec_cfg.outputs {
                execution = execution.output(output);
            }
            if !exec_cfg.cache {
                execution = execution.disable_cache();
            }
            if exec_cfg.exclusive {
                execution = execution.exclusive();
            }

            let produced = dag.add_execution(execution);
            refs.insert(FileRef::Stdout(name.clone()), produced.stdout);
            refs.insert(FileRef::Stderr(name.clone()), produced.stderr);
            for (path, id) in produced.outputs {
                refs.insert(
                    FileRef::Output {
                        execution: name.clone(),
                        path,
                    },
                    id,
                );
            }
        }

        Ok((dag, refs))
    }
}
