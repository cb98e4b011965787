// src/engine/pool.rs

//! Fixed-size worker pool.
//!
//! `size` OS threads block on a shared job queue. Each submitted job yields
//! one [`JobOutput`], delivered through a [`PendingStatus`] owned by the
//! driver.
//! After fulfilling a result the worker pokes a shared [`Notify`] so that the
//! driver's bounded wait ends early.

use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};
use tokio::sync::Notify;
use tokio::sync::oneshot::{self, error::TryRecvError};
use tracing::{debug, error, info, warn};

use crate::dag::UnitRef;
use crate::engine::job::JobOutput;
use crate::errors::{Result, TaskgraphError};

type Job = Box<dyn FnOnce() + Send + 'static>;

struct QueueState {
    jobs: VecDeque<Job>,
    quitting: bool,
}

struct Shared {
    state: Mutex<QueueState>,
    job_ready: Condvar,
    completed: Arc<Notify>,
}

pub struct WorkerPool {
    shared: Arc<Shared>,
    threads: Vec<JoinHandle<()>>,
    size: usize,
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("size", &self.size)
            .field("running_threads", &self.threads.len())
            .finish()
    }
}

impl WorkerPool {
    /// Spawn `size` worker threads (at least one).
    pub fn new(size: usize) -> Result<Self> {
        let size = size.max(1);
        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState {
                jobs: VecDeque::new(),
                quitting: false,
            }),
            job_ready: Condvar::new(),
            completed: Arc::new(Notify::new()),
        });

        let mut pool = Self {
            shared,
            threads: Vec::with_capacity(size),
            size,
        };

        for index in 0..size {
            let shared = Arc::clone(&pool.shared);
            let spawned = thread::Builder::new()
                .name(format!("taskgraph-worker-{index}"))
                .spawn(move || worker_loop(index, shared));
            match spawned {
                Ok(handle) => pool.threads.push(handle),
                Err(e) => {
                    // Dropping `pool` stops the threads spawned so far.
                    return Err(TaskgraphError::IoError(e));
                }
            }
        }

        info!(size, "worker pool started");
        Ok(pool)
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Signal notified every time a worker fulfils a result.
    pub fn completion_signal(&self) -> Arc<Notify> {
        Arc::clone(&self.shared.completed)
    }

    /// Queue `job` for execution on one of the workers.
    ///
    /// Fails with [`TaskgraphError::PoolShutDown`] once [`stop`](Self::stop)
    /// has been called.
    pub fn submit<F>(&self, unit: UnitRef, job: F) -> Result<PendingStatus>
    where
        F: FnOnce() -> JobOutput + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let completed = Arc::clone(&self.shared.completed);
        let job: Job = Box::new(move || {
            let output = job();
            if tx.send(output).is_err() {
                debug!(unit = %unit, "result receiver dropped before completion");
            }
            completed.notify_one();
        });

        {
            let mut state = self.shared.state.lock();
            if state.quitting {
                return Err(TaskgraphError::PoolShutDown);
            }
            state.jobs.push_back(job);
        }
        self.shared.job_ready.notify_one();

        Ok(PendingStatus { unit, rx })
    }

    /// Stop accepting jobs and wake idle workers without waiting for them.
    ///
    /// Workers finish the job they are running. Jobs still queued are
    /// discarded; their [`PendingStatus`] reports the worker as lost.
    /// Calling this more than once hands back no workers the second time.
    pub fn stop(&mut self) -> StoppedWorkers {
        if self.threads.is_empty() {
            return StoppedWorkers::default();
        }

        let discarded = {
            let mut state = self.shared.state.lock();
            state.quitting = true;
            let discarded = state.jobs.len();
            state.jobs.clear();
            discarded
        };
        if discarded > 0 {
            debug!(discarded, "discarded queued jobs on shutdown");
        }
        self.shared.job_ready.notify_all();

        StoppedWorkers {
            threads: std::mem::take(&mut self.threads),
            size: self.size,
        }
    }

    /// Stop the pool and wait for the workers on the blocking thread pool,
    /// leaving the calling runtime thread free.
    pub async fn shutdown_async(mut self) {
        let workers = self.stop();
        if workers.is_empty() {
            return;
        }
        if let Err(err) = tokio::task::spawn_blocking(move || workers.join()).await {
            warn!(error = %err, "joining worker threads failed");
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        let workers = self.stop();
        if workers.is_empty() {
            return;
        }
        // Inside a runtime, a worker still finishing a long job must not
        // stall the runtime thread.
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || workers.join());
            }
            Err(_) => workers.join(),
        }
    }
}

/// Worker threads of a stopped pool, not yet joined.
#[derive(Debug, Default)]
pub struct StoppedWorkers {
    threads: Vec<JoinHandle<()>>,
    size: usize,
}

impl StoppedWorkers {
    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }

    /// Block until every worker thread has exited.
    pub fn join(self) {
        for handle in self.threads {
            if handle.join().is_err() {
                warn!("worker thread panicked outside of a job");
            }
        }
        info!(size = self.size, "worker pool shut down");
    }
}

fn worker_loop(index: usize, shared: Arc<Shared>) {
    debug!(worker = index, "worker started");

    loop {
        let job = {
            let mut state = shared.state.lock();
            while !state.quitting && state.jobs.is_empty() {
                shared.job_ready.wait(&mut state);
            }
            if state.quitting {
                break;
            }
            match state.jobs.pop_front() {
                Some(job) => job,
                None => continue,
            }
        };

        // Unit panics are already turned into `Failure` by the job itself;
        // this only keeps the thread alive if the job wrapper panics.
        if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
            error!(worker = index, "job panicked; its result is lost");
        }
    }

    debug!(worker = index, "worker exiting");
}

/// Eventual status of one admitted unit.
#[derive(Debug)]
pub struct PendingStatus {
    unit: UnitRef,
    rx: oneshot::Receiver<JobOutput>,
}

impl PendingStatus {
    pub fn unit(&self) -> UnitRef {
        self.unit
    }

    /// Non-blocking check for the result.
    ///
    /// Returns `Ok(None)` while the job is still queued or running, and
    /// [`TaskgraphError::WorkerLost`] if the job was dropped without producing
    /// a status.
    pub fn try_take(&mut self) -> Result<Option<JobOutput>> {
        match self.rx.try_recv() {
            Ok(output) => Ok(Some(output)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Closed) => Err(TaskgraphError::WorkerLost(self.unit.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::Status;
    use crate::types::FileId;

    fn output(unit: UnitRef) -> JobOutput {
        JobOutput {
            status: Status::Success { unit },
            published: Vec::new(),
        }
    }

    #[test]
    fn stopped_pool_rejects_jobs() {
        let unit = UnitRef::File(FileId(0));
        let mut pool = WorkerPool::new(2).unwrap();
        let workers = pool.stop();
        assert!(!workers.is_empty());
        assert!(pool.stop().is_empty());
        workers.join();

        let err = pool.submit(unit, move || output(unit)).unwrap_err();
        assert!(matches!(err, TaskgraphError::PoolShutDown));
    }

    #[tokio::test]
    async fn async_shutdown_waits_for_running_jobs() {
        let unit = UnitRef::File(FileId(0));
        let pool = WorkerPool::new(1).unwrap();
        let mut pending = pool
            .submit(unit, move || {
                std::thread::sleep(std::time::Duration::from_millis(20));
                output(unit)
            })
            .unwrap();
        // Let the worker pick the job up before stopping.
        while pool.shared.state.lock().jobs.len() == 1 {
            tokio::task::yield_now().await;
        }

        pool.shutdown_async().await;
        let delivered = pending.try_take().unwrap().expect("job finished before join returned");
        assert_eq!(delivered.status, Status::Success { unit });
    }
}
