// src/engine/store.rs

//! Shared file store.
//!
//! Maps file ids to produced content. Read by the driver's readiness checks
//! and by executions reading their inputs. Entries are never removed during
//! a run.
//!
//! Run operations publish through a [`Publisher`] / [`FileAccess`] into a
//! per-job [`PublishBuffer`]. The driver commits a job's buffer to the store
//! when it resolves the job's status, so a file becomes present for
//! readiness only once its producer's outcome has been observed.

use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::errors::UnitError;
use crate::types::{FileHandle, FileId};

#[derive(Debug, Default)]
pub struct FileStore {
    files: Mutex<HashMap<FileId, FileHandle>>,
}

impl FileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `id` has been published.
    pub fn is_present(&self, id: FileId) -> bool {
        self.files.lock().contains_key(&id)
    }

    /// Record `handle` as the content of `id`. Publishing the same id again
    /// replaces the handle.
    pub fn publish(&self, id: FileId, handle: FileHandle) {
        let len = handle.len();
        let replaced = self.files.lock().insert(id, handle).is_some();
        if replaced {
            debug!(file = %id, len, "file published again; replacing content");
        } else {
            trace!(file = %id, len, "file published");
        }
    }

    pub fn get(&self, id: FileId) -> Option<FileHandle> {
        self.files.lock().get(&id).cloned()
    }

    /// Logical AND of [`is_present`](Self::is_present) over `ids`.
    pub fn all_present(&self, ids: &[FileId]) -> bool {
        ids.iter().all(|id| self.is_present(*id))
    }

    pub fn len(&self) -> usize {
        self.files.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.lock().is_empty()
    }
}

/// Publications of one job, committed to the [`FileStore`] by the driver.
#[derive(Debug, Default)]
pub struct PublishBuffer {
    files: Mutex<Vec<(FileId, FileHandle)>>,
}

impl PublishBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, id: FileId, handle: FileHandle) {
        self.files.lock().push((id, handle));
    }

    /// Latest handle published under `id`.
    pub fn get(&self, id: FileId) -> Option<FileHandle> {
        self.files
            .lock()
            .iter()
            .rev()
            .find(|(published, _)| *published == id)
            .map(|(_, handle)| handle.clone())
    }

    pub fn into_inner(self) -> Vec<(FileId, FileHandle)> {
        self.files.into_inner()
    }
}

/// Write access handed to a file unit's load operation.
#[derive(Debug, Clone, Copy)]
pub struct Publisher<'a> {
    buffer: &'a PublishBuffer,
}

impl<'a> Publisher<'a> {
    pub fn new(buffer: &'a PublishBuffer) -> Self {
        Self { buffer }
    }

    pub fn publish(&self, id: FileId, handle: FileHandle) {
        self.buffer.publish(id, handle);
    }
}

/// Read and write access handed to an execution unit's run operation.
#[derive(Debug, Clone, Copy)]
pub struct FileAccess<'a> {
    store: &'a FileStore,
    buffer: &'a PublishBuffer,
}

impl<'a> FileAccess<'a> {
    pub fn new(store: &'a FileStore, buffer: &'a PublishBuffer) -> Self {
        Self { store, buffer }
    }

    /// Content of `id`, including files this job published itself.
    pub fn read(&self, id: FileId) -> Result<FileHandle, UnitError> {
        self.store
            .get(id)
            .or_else(|| self.buffer.get(id))
            .ok_or_else(|| UnitError::MissingInput(id.to_string()))
    }

    pub fn publish(&self, id: FileId, handle: FileHandle) {
        self.buffer.publish(id, handle);
    }
}
