#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::anyhow;
use taskgraph::config::{
    ConfigFile, FileConfig, RawConfigFile, RawExecutionConfig, RawExportConfig,
};
use taskgraph::dag::{ExecutionUnit, FileUnit, Status};
use taskgraph::engine::FileAccess;
use taskgraph::errors::UnitError;
use taskgraph::types::{ExecutionId, FileHandle, FileId};

/// File unit publishing `content` under `id`.
pub fn content_file(id: FileId, content: &str) -> FileUnit {
    let handle = FileHandle::from_bytes(content.as_bytes());
    FileUnit::new(id, format!("provide {id}"), move |publisher| {
        publisher.publish(id, handle.clone());
        Ok(())
    })
}

/// File unit whose load always fails with `message`.
pub fn failing_file(id: FileId, message: &str) -> FileUnit {
    let message = message.to_string();
    FileUnit::new(id, format!("broken {id}"), move |_| {
        Err(UnitError::Load(message.clone()))
    })
}

/// Tracks how many unit bodies run at the same time.
#[derive(Debug, Clone, Default)]
pub struct OverlapTracker {
    current: Arc<AtomicUsize>,
    max: Arc<AtomicUsize>,
}

impl OverlapTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enter(&self) -> OverlapGuard {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max.fetch_max(now, Ordering::SeqCst);
        OverlapGuard {
            current: Arc::clone(&self.current),
        }
    }

    /// Highest number of simultaneous executions seen.
    pub fn max(&self) -> usize {
        self.max.load(Ordering::SeqCst)
    }
}

pub struct OverlapGuard {
    current: Arc<AtomicUsize>,
}

impl Drop for OverlapGuard {
    fn drop(&mut self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Counts jobs in flight from the statuses the driver delivers.
///
/// A job is in flight from its `Start` until its terminal status. Busy
/// attempts never reach observers, so scripted units report them through
/// [`InFlightGauge::busy_counter`]. They count slightly before the driver
/// resolves them, so the gauge never overestimates.
#[derive(Debug, Clone, Default)]
pub struct InFlightGauge {
    started: Arc<AtomicUsize>,
    finished: Arc<AtomicUsize>,
    busy: Arc<AtomicUsize>,
    max: Arc<AtomicUsize>,
}

impl InFlightGauge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counter to hand to [`ScriptedUnit::count_busy`].
    pub fn busy_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.busy)
    }

    pub fn record(&self, status: &Status) {
        match status {
            Status::Start { .. } => {
                let started = self.started.fetch_add(1, Ordering::SeqCst) + 1;
                let done = self.finished.load(Ordering::SeqCst) + self.busy.load(Ordering::SeqCst);
                self.max.fetch_max(started.saturating_sub(done), Ordering::SeqCst);
            }
            Status::Success { .. } | Status::Failure { .. } => {
                self.finished.fetch_add(1, Ordering::SeqCst);
            }
            Status::Busy { .. } => {}
        }
    }

    /// Highest number of jobs seen in flight at once.
    pub fn max(&self) -> usize {
        self.max.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
enum Outcome {
    Succeed,
    Fail(String),
    Panic(String),
}

/// Builder for an execution unit with a scripted outcome.
#[derive(Debug, Clone)]
pub struct ScriptedUnit {
    id: ExecutionId,
    deps: Vec<FileId>,
    produces: Vec<(FileId, String)>,
    outcome: Outcome,
    busy_times: usize,
    delay: Duration,
    tracker: Option<OverlapTracker>,
    calls: Option<Arc<AtomicUsize>>,
    busy_calls: Option<Arc<AtomicUsize>>,
}

impl ScriptedUnit {
    pub fn new(id: ExecutionId) -> Self {
        Self {
            id,
            deps: Vec::new(),
            produces: Vec::new(),
            outcome: Outcome::Succeed,
            busy_times: 0,
            delay: Duration::ZERO,
            tracker: None,
            calls: None,
            busy_calls: None,
        }
    }

    pub fn deps(mut self, deps: &[FileId]) -> Self {
        self.deps.extend_from_slice(deps);
        self
    }

    /// Publish `content` under `file` on success.
    pub fn produces(mut self, file: FileId, content: &str) -> Self {
        self.produces.push((file, content.to_string()));
        self
    }

    pub fn fail(mut self, message: &str) -> Self {
        self.outcome = Outcome::Fail(message.to_string());
        self
    }

    pub fn panic(mut self, message: &str) -> Self {
        self.outcome = Outcome::Panic(message.to_string());
        self
    }

    /// Report busy on the first `times` runs.
    pub fn busy(mut self, times: usize) -> Self {
        self.busy_times = times;
        self
    }

    /// Sleep this long on every non-busy run.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn track_overlap(mut self, tracker: &OverlapTracker) -> Self {
        self.tracker = Some(tracker.clone());
        self
    }

    /// Count every run, busy ones included, in `counter`.
    pub fn count_calls(mut self, counter: &Arc<AtomicUsize>) -> Self {
        self.calls = Some(Arc::clone(counter));
        self
    }

    /// Count busy runs only in `counter`.
    pub fn count_busy(mut self, counter: &Arc<AtomicUsize>) -> Self {
        self.busy_calls = Some(Arc::clone(counter));
        self
    }

    pub fn build(self) -> ExecutionUnit {
        let Self {
            id,
            deps,
            produces,
            outcome,
            busy_times,
            delay,
            tracker,
            calls,
            busy_calls,
        } = self;
        let busy_left = AtomicUsize::new(busy_times);
        let produces: Vec<(FileId, FileHandle)> = produces
            .into_iter()
            .map(|(file, content)| (file, FileHandle::from_bytes(content)))
            .collect();

        ExecutionUnit::new(id, format!("scripted {id}"), deps.clone(), move |access: &FileAccess<'_>| {
            if let Some(calls) = &calls {
                calls.fetch_add(1, Ordering::SeqCst);
            }
            for dep in &deps {
                access.read(*dep)?;
            }
            if busy_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                if let Some(busy_calls) = &busy_calls {
                    busy_calls.fetch_add(1, Ordering::SeqCst);
                }
                return Err(UnitError::Busy);
            }

            let _guard = tracker.as_ref().map(OverlapTracker::enter);
            if !delay.is_zero() {
                std::thread::sleep(delay);
            }

            match &outcome {
                Outcome::Succeed => {
                    for (file, handle) in &produces {
                        access.publish(*file, handle.clone());
                    }
                    Ok(())
                }
                Outcome::Fail(message) => Err(UnitError::Other(anyhow!("{message}"))),
                Outcome::Panic(message) => panic!("{message}"),
            }
        })
    }
}

/// Builder for `ConfigFile` to simplify test setup.
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: RawConfigFile,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn num_cores(mut self, n: usize) -> Self {
        self.config.scheduler.num_cores = Some(n);
        self
    }

    pub fn file(mut self, name: &str, path: &str) -> Self {
        self.config.file.insert(
            name.to_string(),
            FileConfig {
                path: PathBuf::from(path),
            },
        );
        self
    }

    pub fn execution(mut self, name: &str, exec: ExecConfigBuilder) -> Self {
        self.config.execution.insert(name.to_string(), exec.build());
        self
    }

    pub fn export(mut self, file: &str, path: &str) -> Self {
        self.config.export.push(RawExportConfig {
            file: file.to_string(),
            path: PathBuf::from(path),
        });
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn try_build(self) -> taskgraph::errors::Result<ConfigFile> {
        ConfigFile::try_from(self.config)
    }

    pub fn build(self) -> ConfigFile {
        self.try_build()
            .expect("Failed to build valid config from builder")
    }
}

/// Builder for `RawExecutionConfig`.
#[derive(Debug, Clone)]
pub struct ExecConfigBuilder {
    exec: RawExecutionConfig,
}

impl ExecConfigBuilder {
    pub fn new(program: &str) -> Self {
        Self {
            exec: RawExecutionConfig {
                program: program.to_string(),
                executable: None,
                args: Vec::new(),
                description: None,
                stdin: None,
                inputs: Default::default(),
                outputs: Vec::new(),
                cache: true,
                exclusive: false,
            },
        }
    }

    /// Run the referenced file, placed in the box as the program.
    pub fn executable(mut self, reference: &str) -> Self {
        self.exec.executable = Some(reference.to_string());
        self
    }

    pub fn exclusive(mut self) -> Self {
        self.exec.exclusive = true;
        self
    }

    pub fn arg(mut self, arg: &str) -> Self {
        self.exec.args.push(arg.to_string());
        self
    }

    pub fn stdin(mut self, reference: &str) -> Self {
        self.exec.stdin = Some(reference.to_string());
        self
    }

    pub fn input(mut self, box_path: &str, reference: &str) -> Self {
        self.exec
            .inputs
            .insert(box_path.to_string(), reference.to_string());
        self
    }

    pub fn output(mut self, path: &str) -> Self {
        self.exec.outputs.push(path.to_string());
        self
    }

    pub fn no_cache(mut self) -> Self {
        self.exec.cache = false;
        self
    }

    pub fn build(self) -> RawExecutionConfig {
        self.exec
    }
}
