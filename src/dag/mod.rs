// src/dag/mod.rs

//! Units and the graph they form.
//!
//! - [`status`] defines the statuses delivered to observers.
//! - [`unit`] defines file units, execution units and observers.
//! - [`execution`] describes a process execution before it joins a graph.
//! - [`graph`] builds a graph of units and hands it to the driver.

pub mod execution;
pub mod graph;
pub mod status;
pub mod unit;

pub use execution::{Execution, ExecutionOutputs};
pub use graph::ExecutionDag;
pub use status::{Status, UnitRef};
pub use unit::{ExecutionUnit, FileUnit, LoadFn, Observer, RunFn, Unit, UnitSet};
