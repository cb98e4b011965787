// src/engine/driver.rs

//! The driver loop.
//!
//! The driver owns three queues: file units waiting for admission, execution
//! units waiting for their dependencies (or for capacity), and the in-flight
//! results of admitted units. It alternates an admission pass and a
//! resolution pass until nothing is left, and it is the only place where
//! observers are invoked.
//!
//! Admission capacity equals the pool size: at most that many units are in
//! flight at any time, however many are logically ready.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, trace, warn};

use crate::cache::CacheLifecycle;
use crate::dag::{ExecutionUnit, FileUnit, Observer, Status, Unit, UnitRef, UnitSet};
use crate::engine::job::{JobOutput, execution_job, load_file_job};
use crate::engine::pool::{PendingStatus, WorkerPool};
use crate::engine::store::FileStore;
use crate::engine::{Admission, DriverOptions};
use crate::errors::{Result, TaskgraphError};
use crate::types::{ExecutionId, FileId};

/// An execution waiting in `pending_executions`.
#[derive(Debug, Clone, Copy)]
struct Waiting {
    id: ExecutionId,
    /// Set when the execution came back busy and a backoff is configured.
    not_before: Option<Instant>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunOutcome {
    Completed,
    Cancelled,
}

/// Summary of one admission pass.
#[derive(Debug, Clone, Copy)]
struct AdmissionPass {
    outcome: Admission,
    admitted: usize,
}

pub struct Driver {
    files: HashMap<FileId, FileUnit>,
    executions: HashMap<ExecutionId, ExecutionUnit>,
    default_observer: Option<Observer>,

    pending_files: VecDeque<FileId>,
    pending_executions: VecDeque<Waiting>,
    in_flight: Vec<PendingStatus>,

    store: Arc<FileStore>,
    cache: Arc<dyn CacheLifecycle>,
    options: DriverOptions,
    pool: Option<WorkerPool>,
    started: bool,
    torn_down: bool,
}

impl fmt::Debug for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Driver")
            .field("pending_files", &self.pending_files.len())
            .field("pending_executions", &self.pending_executions.len())
            .field("in_flight", &self.in_flight.len())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Driver {
    pub fn new(units: UnitSet, cache: Arc<dyn CacheLifecycle>, options: DriverOptions) -> Self {
        Self::with_store(units, cache, options, Arc::new(FileStore::new()))
    }

    /// Like [`new`](Self::new) but publishing into an existing store.
    ///
    /// Files already present in `store` count as produced for readiness.
    pub fn with_store(
        units: UnitSet,
        cache: Arc<dyn CacheLifecycle>,
        options: DriverOptions,
        store: Arc<FileStore>,
    ) -> Self {
        let mut files = HashMap::new();
        let mut executions = HashMap::new();
        let mut pending_files = VecDeque::new();
        let mut pending_executions = VecDeque::new();

        for unit in units.units {
            match unit {
                Unit::File(unit) => {
                    pending_files.push_back(unit.id);
                    files.insert(unit.id, unit);
                }
                Unit::Execution(unit) => {
                    pending_executions.push_back(Waiting {
                        id: unit.id,
                        not_before: None,
                    });
                    executions.insert(unit.id, unit);
                }
            }
        }

        Self {
            files,
            executions,
            default_observer: units.default_observer,
            pending_files,
            pending_executions,
            in_flight: Vec::new(),
            store,
            cache,
            options,
            pool: None,
            started: false,
            torn_down: false,
        }
    }

    /// Store that job publications are committed into. Stays readable after
    /// the run.
    pub fn file_store(&self) -> Arc<FileStore> {
        Arc::clone(&self.store)
    }

    /// Evaluate every unit.
    ///
    /// Returns `Ok(true)` when all admissible units have run, `Ok(false)` when
    /// an observer vetoed a status, and an error only when the scheduler's own
    /// bookkeeping failed. Unit failures are reported to observers, never
    /// here. The cache is torn down exactly once on every exit path, before
    /// the pool shuts down.
    pub async fn run(mut self) -> Result<bool> {
        info!(
            files = self.pending_files.len(),
            executions = self.pending_executions.len(),
            num_cores = self.options.num_cores,
            "starting run"
        );
        self.started = true;

        if let Err(err) = self.cache.setup() {
            self.cleanup().await;
            return Err(TaskgraphError::Other(err.context("cache setup failed")));
        }

        match WorkerPool::new(self.options.num_cores) {
            Ok(pool) => self.pool = Some(pool),
            Err(err) => {
                self.cleanup().await;
                return Err(err);
            }
        }

        let outcome = self.drive().await;
        self.cleanup().await;

        match outcome {
            Ok(RunOutcome::Completed) => {
                info!(files_produced = self.store.len(), "run completed");
                Ok(true)
            }
            Ok(RunOutcome::Cancelled) => {
                info!("run cancelled by observer");
                Ok(false)
            }
            Err(err) => {
                warn!(error = %err, "run aborted by scheduler error");
                Err(err)
            }
        }
    }

    async fn drive(&mut self) -> Result<RunOutcome> {
        let completed = match self.pool.as_ref() {
            Some(pool) => pool.completion_signal(),
            None => return Err(TaskgraphError::PoolShutDown),
        };

        loop {
            let pass = self.try_admit()?;
            trace!(outcome = ?pass.outcome, admitted = pass.admitted, in_flight = self.in_flight.len(), "admission pass");

            match pass.outcome {
                Admission::Cancelled => return Ok(RunOutcome::Cancelled),
                Admission::Drained if self.in_flight.is_empty() => {
                    return Ok(RunOutcome::Completed);
                }
                Admission::Stranded => {
                    self.report_stranded();
                    return Ok(RunOutcome::Completed);
                }
                _ => {}
            }

            let resolved = match self.resolve()? {
                Some(resolved) => resolved,
                None => return Ok(RunOutcome::Cancelled),
            };

            if resolved == 0 && pass.admitted == 0 {
                let wait = self.next_wait(Instant::now());
                let _ = tokio::time::timeout(wait, completed.notified()).await;
            } else {
                // Progress was made; still give the runtime a turn.
                tokio::task::yield_now().await;
            }
        }
    }

    fn has_capacity(&self) -> bool {
        self.in_flight.len() < self.options.num_cores.max(1)
    }

    /// Admit as many ready units as capacity allows.
    ///
    /// File units have no dependencies and go first. Executions are scanned
    /// at most once per pass: an unready execution goes to the back of the
    /// queue and counts as inspected.
    fn try_admit(&mut self) -> Result<AdmissionPass> {
        let mut admitted = 0;

        while self.has_capacity() {
            let Some(id) = self.pending_files.pop_front() else {
                break;
            };
            if !self.notify(&Status::Start {
                unit: UnitRef::File(id),
            }) {
                return Ok(AdmissionPass {
                    outcome: Admission::Cancelled,
                    admitted,
                });
            }
            self.submit_file(id)?;
            admitted += 1;
        }

        if !self.has_capacity() {
            return Ok(AdmissionPass {
                outcome: Admission::CapacityExhausted,
                admitted,
            });
        }

        let now = Instant::now();
        let mut inspected = 0;
        let mut deferred = 0;

        while self.has_capacity() && inspected < self.pending_executions.len() {
            let Some(waiting) = self.pending_executions.pop_front() else {
                break;
            };

            if waiting.not_before.is_some_and(|t| t > now) {
                self.pending_executions.push_back(waiting);
                inspected += 1;
                deferred += 1;
                continue;
            }

            if !self.is_ready(waiting.id) {
                self.pending_executions.push_back(waiting);
                inspected += 1;
                continue;
            }

            if !self.notify(&Status::Start {
                unit: UnitRef::Execution(waiting.id),
            }) {
                return Ok(AdmissionPass {
                    outcome: Admission::Cancelled,
                    admitted,
                });
            }
            self.submit_execution(waiting.id)?;
            admitted += 1;
        }

        let outcome = if !self.has_capacity() {
            Admission::CapacityExhausted
        } else if self.pending_files.is_empty() && self.pending_executions.is_empty() {
            Admission::Drained
        } else if !self.in_flight.is_empty() || deferred > 0 {
            Admission::Blocked
        } else {
            Admission::Stranded
        };

        Ok(AdmissionPass { outcome, admitted })
    }

    fn is_ready(&self, id: ExecutionId) -> bool {
        self.executions
            .get(&id)
            .is_some_and(|unit| self.store.all_present(&unit.deps))
    }

    fn pool(&self) -> Result<&WorkerPool> {
        self.pool.as_ref().ok_or(TaskgraphError::PoolShutDown)
    }

    fn submit_file(&mut self, id: FileId) -> Result<()> {
        let unit = self
            .files
            .get(&id)
            .ok_or_else(|| TaskgraphError::Other(anyhow::anyhow!("unknown file unit {id}")))?;
        let job = load_file_job(id, unit.description.clone(), Arc::clone(&unit.load));
        let pending = self.pool()?.submit(UnitRef::File(id), job)?;
        self.in_flight.push(pending);
        debug!(file = %id, in_flight = self.in_flight.len(), "admitted file unit");
        Ok(())
    }

    fn submit_execution(&mut self, id: ExecutionId) -> Result<()> {
        let unit = self.executions.get(&id).ok_or_else(|| {
            TaskgraphError::Other(anyhow::anyhow!("unknown execution unit {id}"))
        })?;
        let job = execution_job(
            id,
            unit.description.clone(),
            Arc::clone(&unit.run),
            Arc::clone(&self.store),
        );
        let pending = self.pool()?.submit(UnitRef::Execution(id), job)?;
        self.in_flight.push(pending);
        debug!(execution = %id, in_flight = self.in_flight.len(), "admitted execution unit");
        Ok(())
    }

    /// Collect every finished result without blocking.
    ///
    /// Returns the number of resolved futures, or `None` if an observer
    /// vetoed.
    fn resolve(&mut self) -> Result<Option<usize>> {
        let mut still_running = Vec::with_capacity(self.in_flight.len());
        let mut resolved = 0;
        let mut pending = std::mem::take(&mut self.in_flight).into_iter();

        while let Some(mut future) = pending.next() {
            let JobOutput { status, published } = match future.try_take() {
                Ok(Some(output)) => output,
                Ok(None) => {
                    still_running.push(future);
                    continue;
                }
                Err(err) => {
                    still_running.extend(pending);
                    self.in_flight = still_running;
                    return Err(err);
                }
            };
            resolved += 1;

            for (id, handle) in published {
                self.store.publish(id, handle);
            }

            // File units never come back busy; their jobs report a failure.
            if let Status::Busy {
                unit: UnitRef::Execution(id),
            } = status
            {
                self.requeue(id);
                continue;
            }

            if !self.notify(&status) {
                still_running.extend(pending);
                self.in_flight = still_running;
                return Ok(None);
            }
        }

        self.in_flight = still_running;
        Ok(Some(resolved))
    }

    fn requeue(&mut self, id: ExecutionId) {
        let not_before = self.options.busy_backoff.map(|d| Instant::now() + d);
        debug!(execution = %id, ?not_before, "execution busy; re-enqueued");
        self.pending_executions.push_back(Waiting { id, not_before });
    }

    /// Deliver `status` to the unit's observer, falling back to the default
    /// observer. Returns `false` if the run must stop.
    fn notify(&mut self, status: &Status) -> bool {
        let own = match status.unit() {
            UnitRef::File(id) => self.files.get_mut(&id).and_then(|u| u.observer.as_mut()),
            UnitRef::Execution(id) => self
                .executions
                .get_mut(&id)
                .and_then(|u| u.observer.as_mut()),
        };

        let keep_going = match own {
            Some(observer) => observer(status),
            None => match self.default_observer.as_mut() {
                Some(observer) => observer(status),
                None => true,
            },
        };

        if !keep_going {
            info!(unit = %status.unit(), status = status.kind(), "observer requested cancellation");
        }
        keep_going
    }

    /// How long the driver may sleep when a pass made no progress.
    fn next_wait(&self, now: Instant) -> Duration {
        let earliest_retry = self
            .pending_executions
            .iter()
            .filter_map(|w| w.not_before)
            .min();
        match earliest_retry {
            Some(t) if t > now => (t - now).min(self.options.poll_interval),
            Some(_) => Duration::ZERO,
            None => self.options.poll_interval,
        }
    }

    fn report_stranded(&self) {
        let stranded: Vec<String> = self
            .pending_executions
            .iter()
            .filter_map(|w| self.executions.get(&w.id))
            .map(|u| format!("{} ({})", u.id, u.description))
            .collect();
        warn!(
            count = stranded.len(),
            ?stranded,
            "executions can never become ready; their inputs were not produced"
        );
    }

    fn teardown_cache(&mut self) {
        if !self.torn_down {
            self.torn_down = true;
            self.cache.teardown();
        }
    }

    /// Tear the cache down (once) and then shut the pool down. Worker
    /// threads are joined off the runtime thread.
    async fn cleanup(&mut self) {
        self.teardown_cache();
        if let Some(pool) = self.pool.take() {
            pool.shutdown_async().await;
        }
    }
}

impl Drop for Driver {
    fn drop(&mut self) {
        // Covers the run future being dropped before it finished. The pool's
        // own drop stops the workers without blocking a runtime thread.
        if self.started {
            self.teardown_cache();
            drop(self.pool.take());
        }
    }
}
