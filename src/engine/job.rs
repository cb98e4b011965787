// src/engine/job.rs

//! Jobs submitted to the worker pool.
//!
//! Each job runs a unit's operation inside a protected boundary so that
//! nothing a unit does can escape to the worker: errors and panics become
//! `Failure`, `UnitError::Busy` from an execution becomes `Busy`. The job's
//! output carries its status together with the files it published.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::dag::{LoadFn, RunFn, Status, UnitRef};
use crate::engine::store::{FileAccess, FileStore, PublishBuffer, Publisher};
use crate::errors::UnitError;
use crate::types::{ExecutionId, FileHandle, FileId};

/// What a worker hands back to the driver for one job.
#[derive(Debug)]
pub struct JobOutput {
    pub status: Status,
    /// Files published by the job, in publication order.
    pub published: Vec<(FileId, FileHandle)>,
}

/// Job loading one file.
pub fn load_file_job(
    id: FileId,
    description: String,
    load: LoadFn,
) -> impl FnOnce() -> JobOutput + Send + 'static {
    move || {
        debug!(file = %id, description = %description, "loading file");
        let buffer = PublishBuffer::new();
        let publisher = Publisher::new(&buffer);
        // Loading has no capacity limit, so a busy signal is a plain failure.
        let status = protected(UnitRef::File(id), false, || load(&publisher));
        JobOutput {
            status,
            published: buffer.into_inner(),
        }
    }
}

/// Job running one execution.
pub fn execution_job(
    id: ExecutionId,
    description: String,
    run: RunFn,
    store: Arc<FileStore>,
) -> impl FnOnce() -> JobOutput + Send + 'static {
    move || {
        info!(execution = %id, "{description}");
        let started = Instant::now();
        let buffer = PublishBuffer::new();
        let access = FileAccess::new(&store, &buffer);
        let status = protected(UnitRef::Execution(id), true, || run(&access));
        debug!(
            execution = %id,
            outcome = status.kind(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "execution finished"
        );
        JobOutput {
            status,
            published: buffer.into_inner(),
        }
    }
}

fn protected<F>(unit: UnitRef, retryable: bool, op: F) -> Status
where
    F: FnOnce() -> Result<(), UnitError>,
{
    match panic::catch_unwind(AssertUnwindSafe(op)) {
        Ok(Ok(())) => Status::Success { unit },
        Ok(Err(UnitError::Busy)) if retryable => Status::Busy { unit },
        Ok(Err(err)) => {
            let message = non_empty(format!("{err:#}"));
            warn!(unit = %unit, error = %message, "unit failed");
            Status::Failure { unit, message }
        }
        Err(payload) => {
            let message = non_empty(panic_message(payload.as_ref()));
            warn!(unit = %unit, error = %message, "unit panicked");
            Status::Failure {
                unit,
                message: format!("panicked: {message}"),
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        String::new()
    }
}

fn non_empty(message: String) -> String {
    if message.trim().is_empty() {
        "unit failed without a message".to_string()
    } else {
        message
    }
}
