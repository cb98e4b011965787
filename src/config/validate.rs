// src/config/validate.rs

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Component, Path};

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::model::{
    ConfigFile, ExecutionConfig, ExportConfig, FileRef, RawConfigFile, RawExecutionConfig,
};
use crate::errors::{Result, TaskgraphError};

const RESERVED_OUTPUTS: [&str; 2] = ["stdout", "stderr"];

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = crate::errors::TaskgraphError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        ensure_has_units(&raw)?;
        validate_scheduler(&raw)?;
        validate_names(&raw)?;

        let mut execution = BTreeMap::new();
        for (name, exec) in &raw.execution {
            execution.insert(name.clone(), resolve_execution(&raw, name, exec)?);
        }

        let export = raw
            .export
            .iter()
            .map(|e| {
                if e.path.as_os_str().is_empty() {
                    return Err(TaskgraphError::ConfigError(format!(
                        "export of '{}' has an empty path",
                        e.file
                    )));
                }
                Ok(ExportConfig {
                    file: resolve_ref(&raw, &e.file)
                        .map_err(|msg| TaskgraphError::ConfigError(format!("export: {msg}")))?,
                    path: e.path.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let execution_order = execution_order(&execution)?;

        Ok(ConfigFile::new_unchecked(
            raw.scheduler,
            raw.file,
            execution,
            export,
            execution_order,
        ))
    }
}

fn ensure_has_units(cfg: &RawConfigFile) -> Result<()> {
    if cfg.file.is_empty() && cfg.execution.is_empty() {
        return Err(TaskgraphError::ConfigError(
            "config must contain at least one [file.<name>] or [execution.<name>] section"
                .to_string(),
        ));
    }
    Ok(())
}

fn validate_scheduler(cfg: &RawConfigFile) -> Result<()> {
    let scheduler = &cfg.scheduler;
    if scheduler.num_cores == Some(0) {
        return Err(TaskgraphError::ConfigError(
            "[scheduler].num_cores must be >= 1 (got 0)".to_string(),
        ));
    }
    if scheduler.max_concurrent == Some(0) {
        return Err(TaskgraphError::ConfigError(
            "[scheduler].max_concurrent must be >= 1 (got 0)".to_string(),
        ));
    }
    if scheduler.poll_interval_ms == 0 {
        return Err(TaskgraphError::ConfigError(
            "[scheduler].poll_interval_ms must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(())
}

fn validate_names(cfg: &RawConfigFile) -> Result<()> {
    let names = cfg
        .file
        .keys()
        .map(|n| ("file", n))
        .chain(cfg.execution.keys().map(|n| ("execution", n)));
    for (kind, name) in names {
        if name.is_empty() || name.contains('.') {
            return Err(TaskgraphError::ConfigError(format!(
                "{kind} name '{name}' must be non-empty and must not contain '.'"
            )));
        }
    }

    for (name, exec) in &cfg.execution {
        if exec.program.trim().is_empty() {
            return Err(TaskgraphError::ConfigError(format!(
                "execution '{name}' has an empty `program`"
            )));
        }

        let mut seen = BTreeSet::new();
        for output in &exec.outputs {
            if RESERVED_OUTPUTS.contains(&output.as_str()) {
                return Err(TaskgraphError::ConfigError(format!(
                    "execution '{name}' declares reserved output '{output}'"
                )));
            }
            if !is_box_relative(output) {
                return Err(TaskgraphError::ConfigError(format!(
                    "execution '{name}' output '{output}' must be a relative path inside the box"
                )));
            }
            if !seen.insert(output) {
                return Err(TaskgraphError::ConfigError(format!(
                    "execution '{name}' declares output '{output}' twice"
                )));
            }
        }

        if exec.executable.is_some() {
            if !is_box_relative(&exec.program) {
                return Err(TaskgraphError::ConfigError(format!(
                    "execution '{name}' program '{}' must be a relative path inside the box when `executable` is set",
                    exec.program
                )));
            }
            if exec.inputs.contains_key(&exec.program) {
                return Err(TaskgraphError::ConfigError(format!(
                    "execution '{name}' input '{}' collides with its executable",
                    exec.program
                )));
            }
        }

        for input in exec.inputs.keys() {
            if !is_box_relative(input) {
                return Err(TaskgraphError::ConfigError(format!(
                    "execution '{name}' input '{input}' must be a relative path inside the box"
                )));
            }
        }
    }
    Ok(())
}

fn is_box_relative(path: &str) -> bool {
    !path.is_empty()
        && Path::new(path)
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// Resolve a reference string against the raw config.
fn resolve_ref(cfg: &RawConfigFile, reference: &str) -> std::result::Result<FileRef, String> {
    if cfg.file.contains_key(reference) {
        return Ok(FileRef::File(reference.to_string()));
    }

    let Some((execution, rest)) = reference.split_once('.') else {
        return Err(format!("unknown file '{reference}'"));
    };
    let Some(exec) = cfg.execution.get(execution) else {
        return Err(format!(
            "unknown execution '{execution}' in reference '{reference}'"
        ));
    };

    match rest {
        "stdout" => Ok(FileRef::Stdout(execution.to_string())),
        "stderr" => Ok(FileRef::Stderr(execution.to_string())),
        path if exec.outputs.iter().any(|o| o == path) => Ok(FileRef::Output {
            execution: execution.to_string(),
            path: path.to_string(),
        }),
        path => Err(format!(
            "execution '{execution}' does not declare output '{path}'"
        )),
    }
}

fn resolve_execution(
    cfg: &RawConfigFile,
    name: &str,
    exec: &RawExecutionConfig,
) -> Result<ExecutionConfig> {
    let resolve = |reference: &str| -> Result<FileRef> {
        let resolved = resolve_ref(cfg, reference)
            .map_err(|msg| TaskgraphError::ConfigError(format!("execution '{name}': {msg}")))?;
        if resolved.producer() == Some(name) {
            return Err(TaskgraphError::ConfigError(format!(
                "execution '{name}' cannot consume its own output '{reference}'"
            )));
        }
        Ok(resolved)
    };

    let executable = exec.executable.as_deref().map(resolve).transpose()?;
    let stdin = exec.stdin.as_deref().map(resolve).transpose()?;
    let inputs = exec
        .inputs
        .iter()
        .map(|(box_path, reference)| Ok((box_path.clone(), resolve(reference)?)))
        .collect::<Result<BTreeMap<_, _>>>()?;

    Ok(ExecutionConfig {
        program: exec.program.clone(),
        executable,
        args: exec.args.clone(),
        description: exec.description.clone(),
        stdin,
        inputs,
        outputs: exec.outputs.clone(),
        cache: exec.cache,
        exclusive: exec.exclusive,
    })
}

/// Topological order of executions; fails on a dependency cycle.
fn execution_order(executions: &BTreeMap<String, ExecutionConfig>) -> Result<Vec<String>> {
    // Edge direction: producer -> consumer.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for name in executions.keys() {
        graph.add_node(name.as_str());
    }

    for (name, exec) in executions {
        for producer in exec.reads().filter_map(FileRef::producer) {
            graph.add_edge(producer, name.as_str(), ());
        }
    }

    match toposort(&graph, None) {
        Ok(order) => Ok(order.into_iter().map(str::to_string).collect()),
        Err(cycle) => Err(TaskgraphError::DagCycle(format!(
            "cycle detected between executions involving '{}'",
            cycle.node_id()
        ))),
    }
}
