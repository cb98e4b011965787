// src/config/model.rs

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::engine::{DriverOptions, default_num_cores};

/// Configuration as read from a TOML file, before validation.
///
/// ```toml
/// [scheduler]
/// num_cores = 4
///
/// [file.input]
/// path = "data/input.txt"
///
/// [execution.sort]
/// program = "sort"
/// stdin = "input"
///
/// [[export]]
/// file = "sort.stdout"
/// path = "out/sorted.txt"
/// ```
///
/// An execution may run a file of the graph instead of a program on `PATH`:
///
/// ```toml
/// [execution.run]
/// program = "solution"
/// executable = "compile.solution"
/// exclusive = true
/// ```
///
/// Every section is optional, but validation requires at least one file or
/// execution.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawConfigFile {
    #[serde(default)]
    pub scheduler: SchedulerSection,

    /// Files loaded from disk, from `[file.<name>]`.
    #[serde(default)]
    pub file: BTreeMap<String, FileConfig>,

    /// Processes to run, from `[execution.<name>]`.
    #[serde(default)]
    pub execution: BTreeMap<String, RawExecutionConfig>,

    /// Files written back to disk after a successful run, from `[[export]]`.
    #[serde(default)]
    pub export: Vec<RawExportConfig>,
}

/// `[scheduler]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerSection {
    /// Worker pool size. Defaults to the number of hardware threads.
    #[serde(default)]
    pub num_cores: Option<usize>,

    /// Upper bound of a single driver wait, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Delay before a busy execution is retried. `0` retries as soon as
    /// capacity allows.
    #[serde(default)]
    pub busy_backoff_ms: u64,

    /// Processes the local executor runs at once. Defaults to `num_cores`.
    #[serde(default)]
    pub max_concurrent: Option<usize>,

    /// Persistent result cache. No persistent cache when absent.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
}

fn default_poll_interval_ms() -> u64 {
    10
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            num_cores: None,
            poll_interval_ms: default_poll_interval_ms(),
            busy_backoff_ms: 0,
            max_concurrent: None,
            cache_dir: None,
        }
    }
}

impl SchedulerSection {
    pub fn effective_num_cores(&self) -> usize {
        self.num_cores.unwrap_or_else(default_num_cores)
    }

    pub fn effective_max_concurrent(&self, num_cores: usize) -> usize {
        self.max_concurrent.unwrap_or(num_cores)
    }

    pub fn driver_options(&self) -> DriverOptions {
        DriverOptions::default()
            .with_num_cores(self.effective_num_cores())
            .with_poll_interval(Duration::from_millis(self.poll_interval_ms))
            .with_busy_backoff(Some(Duration::from_millis(self.busy_backoff_ms)))
    }
}

/// `[file.<name>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct FileConfig {
    /// Relative paths are resolved against the config file's directory.
    pub path: PathBuf,
}

/// `[execution.<name>]` section as written in the file.
///
/// File references are strings: a `[file.<name>]` name, or
/// `<execution>.stdout`, `<execution>.stderr`, `<execution>.<output>`.
#[derive(Debug, Clone, Deserialize)]
pub struct RawExecutionConfig {
    pub program: String,

    /// File reference placed in the box as `program` and run from there.
    #[serde(default)]
    pub executable: Option<String>,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub stdin: Option<String>,

    /// Box path -> file reference.
    #[serde(default)]
    pub inputs: BTreeMap<String, String>,

    #[serde(default)]
    pub outputs: Vec<String>,

    #[serde(default = "default_cache")]
    pub cache: bool,

    /// Run with no other process alongside.
    #[serde(default)]
    pub exclusive: bool,
}

fn default_cache() -> bool {
    true
}

/// `[[export]]` entry as written in the file.
#[derive(Debug, Clone, Deserialize)]
pub struct RawExportConfig {
    pub file: String,
    pub path: PathBuf,
}

/// A resolved reference to a file of the graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FileRef {
    File(String),
    Stdout(String),
    Stderr(String),
    Output { execution: String, path: String },
}

impl FileRef {
    /// Execution producing the file, if any.
    pub fn producer(&self) -> Option<&str> {
        match self {
            FileRef::File(_) => None,
            FileRef::Stdout(e) | FileRef::Stderr(e) => Some(e),
            FileRef::Output { execution, .. } => Some(execution),
        }
    }
}

impl fmt::Display for FileRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileRef::File(name) => write!(f, "{name}"),
            FileRef::Stdout(e) => write!(f, "{e}.stdout"),
            FileRef::Stderr(e) => write!(f, "{e}.stderr"),
            FileRef::Output { execution, path } => write!(f, "{execution}.{path}"),
        }
    }
}

/// Validated `[execution.<name>]` section.
#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    pub program: String,
    pub executable: Option<FileRef>,
    pub args: Vec<String>,
    pub description: Option<String>,
    pub stdin: Option<FileRef>,
    pub inputs: BTreeMap<String, FileRef>,
    pub outputs: Vec<String>,
    pub cache: bool,
    pub exclusive: bool,
}

impl ExecutionConfig {
    /// Every file reference this execution reads.
    pub fn reads(&self) -> impl Iterator<Item = &FileRef> {
        self.executable
            .iter()
            .chain(self.stdin.iter())
            .chain(self.inputs.values())
    }
}

/// Validated `[[export]]` entry.
#[derive(Debug, Clone)]
pub struct ExportConfig {
    pub file: FileRef,
    pub path: PathBuf,
}

/// Validated configuration.
///
/// Only built through `TryFrom<RawConfigFile>`, so references resolve and
/// executions form a DAG.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub scheduler: SchedulerSection,
    pub file: BTreeMap<String, FileConfig>,
    pub execution: BTreeMap<String, ExecutionConfig>,
    pub export: Vec<ExportConfig>,
    /// Execution names, producers before consumers.
    pub execution_order: Vec<String>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(
        scheduler: SchedulerSection,
        file: BTreeMap<String, FileConfig>,
        execution: BTreeMap<String, ExecutionConfig>,
        export: Vec<ExportConfig>,
        execution_order: Vec<String>,
    ) -> Self {
        Self {
            scheduler,
            file,
            execution,
            export,
            execution_order,
        }
    }
}
