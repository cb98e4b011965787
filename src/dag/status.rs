// src/dag/status.rs

//! Status events delivered to unit observers.

use std::fmt;

use crate::types::{ExecutionId, FileId};

/// Reference to a unit in a graph, as carried by a [`Status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitRef {
    File(FileId),
    Execution(ExecutionId),
}

impl fmt::Display for UnitRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitRef::File(id) => id.fmt(f),
            UnitRef::Execution(id) => id.fmt(f),
        }
    }
}

/// Result of one admission attempt of a unit.
///
/// Per admission an observer sees exactly one `Start` followed by exactly one
/// of `Success` / `Failure`. `Busy` never reaches observers: the scheduler
/// consumes it and admits the unit again, which produces a fresh `Start`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    /// Emitted on the driver just before the unit is submitted to the pool.
    Start { unit: UnitRef },
    /// The run operation completed normally.
    Success { unit: UnitRef },
    /// The run operation returned an error or panicked.
    Failure { unit: UnitRef, message: String },
    /// The run operation hit transient contention and should be retried.
    Busy { unit: UnitRef },
}

impl Status {
    pub fn unit(&self) -> UnitRef {
        match self {
            Status::Start { unit }
            | Status::Success { unit }
            | Status::Failure { unit, .. }
            | Status::Busy { unit } => *unit,
        }
    }

    /// `Success` or `Failure`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Success { .. } | Status::Failure { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Status::Start { .. } => "start",
            Status::Success { .. } => "success",
            Status::Failure { .. } => "failure",
            Status::Busy { .. } => "busy",
        }
    }
}
