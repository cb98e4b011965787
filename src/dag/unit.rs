// src/dag/unit.rs

//! Schedulable units.
//!
//! A unit is opaque to the scheduler beyond this contract: a run operation
//! that is handed accessors to the shared file store, the list of files it
//! depends on (executions only), and an optional observer that receives every
//! [`Status`] of the unit on the driver thread.

use std::fmt;
use std::sync::Arc;

use crate::dag::status::{Status, UnitRef};
use crate::engine::store::{FileAccess, Publisher};
use crate::errors::UnitError;
use crate::types::{ExecutionId, FileId};

/// Observer callback. Returning `false` cancels the whole run.
pub type Observer = Box<dyn FnMut(&Status) -> bool + Send>;

/// Load operation of a file unit.
pub type LoadFn = Arc<dyn Fn(&Publisher<'_>) -> Result<(), UnitError> + Send + Sync>;

/// Run operation of an execution unit.
pub type RunFn = Arc<dyn Fn(&FileAccess<'_>) -> Result<(), UnitError> + Send + Sync>;

/// A unit materializing one file.
pub struct FileUnit {
    pub(crate) id: FileId,
    pub(crate) description: String,
    pub(crate) load: LoadFn,
    pub(crate) observer: Option<Observer>,
}

impl FileUnit {
    pub fn new<F>(id: FileId, description: impl Into<String>, load: F) -> Self
    where
        F: Fn(&Publisher<'_>) -> Result<(), UnitError> + Send + Sync + 'static,
    {
        Self {
            id,
            description: description.into(),
            load: Arc::new(load),
            observer: None,
        }
    }

    pub fn with_observer<O>(mut self, observer: O) -> Self
    where
        O: FnMut(&Status) -> bool + Send + 'static,
    {
        self.observer = Some(Box::new(observer));
        self
    }

    pub fn id(&self) -> FileId {
        self.id
    }

    pub fn description(&self) -> &str {
        &self.description
    }
}

impl fmt::Debug for FileUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileUnit")
            .field("id", &self.id)
            .field("description", &self.description)
            .field("has_observer", &self.observer.is_some())
            .finish_non_exhaustive()
    }
}

/// A unit performing work once all of its dependency files are present.
pub struct ExecutionUnit {
    pub(crate) id: ExecutionId,
    pub(crate) description: String,
    pub(crate) deps: Vec<FileId>,
    pub(crate) run: RunFn,
    pub(crate) observer: Option<Observer>,
}

impl ExecutionUnit {
    pub fn new<F>(
        id: ExecutionId,
        description: impl Into<String>,
        deps: Vec<FileId>,
        run: F,
    ) -> Self
    where
        F: Fn(&FileAccess<'_>) -> Result<(), UnitError> + Send + Sync + 'static,
    {
        Self::from_run_fn(id, description, deps, Arc::new(run))
    }

    pub(crate) fn from_run_fn(
        id: ExecutionId,
        description: impl Into<String>,
        deps: Vec<FileId>,
        run: RunFn,
    ) -> Self {
        Self {
            id,
            description: description.into(),
            deps,
            run,
            observer: None,
        }
    }

    pub fn with_observer<O>(mut self, observer: O) -> Self
    where
        O: FnMut(&Status) -> bool + Send + 'static,
    {
        self.observer = Some(Box::new(observer));
        self
    }

    pub fn id(&self) -> ExecutionId {
        self.id
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn deps(&self) -> &[FileId] {
        &self.deps
    }
}

impl fmt::Debug for ExecutionUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionUnit")
            .field("id", &self.id)
            .field("description", &self.description)
            .field("deps", &self.deps)
            .field("has_observer", &self.observer.is_some())
            .finish_non_exhaustive()
    }
}

/// Either kind of unit.
#[derive(Debug)]
pub enum Unit {
    File(FileUnit),
    Execution(ExecutionUnit),
}

impl Unit {
    pub fn unit_ref(&self) -> UnitRef {
        match self {
            Unit::File(u) => UnitRef::File(u.id),
            Unit::Execution(u) => UnitRef::Execution(u.id),
        }
    }
}

impl From<FileUnit> for Unit {
    fn from(unit: FileUnit) -> Self {
        Unit::File(unit)
    }
}

impl From<ExecutionUnit> for Unit {
    fn from(unit: ExecutionUnit) -> Self {
        Unit::Execution(unit)
    }
}

/// The full set of units handed to the driver for one run.
///
/// `default_observer` receives the statuses of every unit that has no
/// observer of its own.
#[derive(Default)]
pub struct UnitSet {
    pub units: Vec<Unit>,
    pub default_observer: Option<Observer>,
}

impl UnitSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, unit: impl Into<Unit>) {
        self.units.push(unit.into());
    }

    pub fn with_unit(mut self, unit: impl Into<Unit>) -> Self {
        self.push(unit);
        self
    }

    pub fn with_default_observer<O>(mut self, observer: O) -> Self
    where
        O: FnMut(&Status) -> bool + Send + 'static,
    {
        self.default_observer = Some(Box::new(observer));
        self
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

impl fmt::Debug for UnitSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitSet")
            .field("units", &self.units)
            .field("has_default_observer", &self.default_observer.is_some())
            .finish()
    }
}
