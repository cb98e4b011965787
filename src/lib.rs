// src/lib.rs

pub mod cache;
pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod fs;
pub mod logging;
pub mod report;
pub mod types;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::Ordering;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::cache::{DiskCache, NoopCache};
use crate::cli::CliArgs;
use crate::config::loader::load_and_validate;
use crate::config::model::{ConfigFile, FileRef};
use crate::dag::ExecutionDag;
use crate::engine::{Driver, FileStore};
use crate::exec::{ExecutionEnv, LocalExecutor};
use crate::fs::{FileSystem, RealFileSystem};
use crate::report::{Reporter, RunReport};
use crate::types::FileId;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - graph construction
/// - driver + worker pool
/// - result cache
/// - Ctrl-C handling
/// - exports
pub async fn run(args: CliArgs) -> Result<RunReport> {
    let config_path = args.config.clone();
    let cfg = load_and_validate(&config_path)
        .with_context(|| format!("loading config {:?}", config_path))?;

    if args.dry_run {
        print_dry_run(&cfg);
        return Ok(RunReport {
            completed: true,
            ..RunReport::default()
        });
    }

    let root = config_root_dir(&config_path);
    let fs: Arc<dyn FileSystem> = Arc::new(RealFileSystem);

    let mut options = cfg.scheduler.driver_options();
    if let Some(n) = args.num_cores {
        options = options.with_num_cores(n as usize);
    }
    let backend = Arc::new(LocalExecutor::new(
        cfg.scheduler.effective_max_concurrent(options.num_cores),
    ));

    let env = match cfg.scheduler.cache_dir.as_ref().filter(|_| !args.no_cache) {
        Some(dir) => {
            let dir = if dir.is_absolute() { dir.clone() } else { root.join(dir) };
            let cache = DiskCache::new(dir, fs.clone());
            debug!(dir = ?cache.dir(), "result cache enabled");
            ExecutionEnv::new(fs.clone(), backend, Arc::new(cache))
        }
        None => ExecutionEnv::new(fs.clone(), backend, Arc::new(NoopCache)),
    };
    let lifecycle = env.cache_lifecycle();

    let (mut dag, refs) = ExecutionDag::from_config(&cfg, &root, env)?;
    let reporter = Reporter::new(dag.descriptions(), args.keep_going);
    dag.set_observer(reporter.observer());

    // Ctrl-C → the observer vetoes the next status it sees.
    {
        let stop = reporter.stop_flag();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for Ctrl+C");
                return;
            }
            info!("Ctrl+C received; stopping after the next status");
            stop.store(true, Ordering::SeqCst);
        });
    }

    let driver = Driver::new(dag.into_units(), lifecycle, options);
    let store = driver.file_store();
    let completed = driver.run().await?;

    let mut report = reporter.report();
    report.completed = completed;

    if completed {
        let (exported, skipped) = write_exports(&cfg, &refs, &store, fs.as_ref(), &root)?;
        report.exported = exported;
        report.skipped_exports = skipped;
    }

    info!(
        completed = report.completed,
        succeeded = report.succeeded,
        failed = report.failures.len(),
        exported = report.exported,
        "run finished"
    );
    Ok(report)
}

/// Write every `[[export]]` whose file was produced.
///
/// Returns the number written and the references that were skipped.
fn write_exports(
    cfg: &ConfigFile,
    refs: &BTreeMap<FileRef, FileId>,
    store: &FileStore,
    fs: &dyn FileSystem,
    root: &Path,
) -> Result<(usize, Vec<String>)> {
    let mut exported = 0;
    let mut skipped = Vec::new();

    for export in &cfg.export {
        let handle = refs.get(&export.file).and_then(|id| store.get(*id));
        let Some(handle) = handle else {
            warn!(file = %export.file, "export skipped: file was not produced");
            skipped.push(export.file.to_string());
            continue;
        };

        let path = if export.path.is_absolute() {
            export.path.clone()
        } else {
            root.join(&export.path)
        };
        fs.write(&path, handle.bytes())
            .with_context(|| format!("exporting '{}'", export.file))?;
        debug!(file = %export.file, path = ?path, len = handle.len(), "exported");
        exported += 1;
    }

    Ok((exported, skipped))
}

/// Directory that relative paths in the config are resolved against.
///
/// - If the config path has a non-empty parent (e.g. "graphs/Taskgraph.toml"),
///   we use that directory.
/// - If it's just a bare filename like "Taskgraph.toml" (parent = ""),
///   we fall back to the current working directory "."
fn config_root_dir(config_path: &Path) -> PathBuf {
    match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    }
}

/// Simple dry-run output: print files, executions in run order, and exports.
fn print_dry_run(cfg: &ConfigFile) {
    println!("taskgraph dry-run");
    let scheduler = &cfg.scheduler;
    println!("  scheduler.num_cores = {}", scheduler.effective_num_cores());
    println!("  scheduler.poll_interval_ms = {}", scheduler.poll_interval_ms);
    if scheduler.busy_backoff_ms > 0 {
        println!("  scheduler.busy_backoff_ms = {}", scheduler.busy_backoff_ms);
    }
    if let Some(dir) = &scheduler.cache_dir {
        println!("  scheduler.cache_dir = {}", dir.display());
    }
    println!();

    println!("files ({}):", cfg.file.len());
    for (name, file) in &cfg.file {
        println!("  - {name}: {}", file.path.display());
    }

    println!("executions ({}), in dependency order:", cfg.execution.len());
    for name in &cfg.execution_order {
        let Some(exec) = cfg.execution.get(name) else {
            continue;
        };
        println!("  - {name}");
        if let Some(description) = &exec.description {
            println!("      description: {description}");
        }
        println!("      command: {} {}", exec.program, exec.args.join(" "));
        if let Some(executable) = &exec.executable {
            println!("      executable: {executable}");
        }
        if let Some(stdin) = &exec.stdin {
            println!("      stdin: {stdin}");
        }
        for (box_path, file) in &exec.inputs {
            println!("      input {box_path}: {file}");
        }
        if !exec.outputs.is_empty() {
            println!("      outputs: {:?}", exec.outputs);
        }
        if !exec.cache {
            println!("      cache: false");
        }
        if exec.exclusive {
            println!("      exclusive: true");
        }
    }

    if !cfg.export.is_empty() {
        println!("exports ({}):", cfg.export.len());
        for export in &cfg.export {
            println!("  - {} -> {}", export.file, export.path.display());
        }
    }

    debug!("dry-run complete (no execution)");
}
