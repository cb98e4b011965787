// src/report.rs

//! Default observer used by the CLI: logs every status, tallies outcomes,
//! and stops the run on the first failure or on a stop request.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::dag::{Status, UnitRef};

/// Outcome of a CLI run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    /// `false` if the run was cancelled before every unit was evaluated.
    pub completed: bool,
    pub succeeded: usize,
    /// `(unit description, failure message)` in the order they happened.
    pub failures: Vec<(String, String)>,
    pub exported: usize,
    /// Exports skipped because their file was never produced.
    pub skipped_exports: Vec<String>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.completed && self.failures.is_empty() && self.skipped_exports.is_empty()
    }
}

/// Builds the observer closure and keeps the report it fills in.
#[derive(Debug, Clone)]
pub struct Reporter {
    descriptions: Arc<HashMap<UnitRef, String>>,
    keep_going: bool,
    stop: Arc<AtomicBool>,
    report: Arc<Mutex<RunReport>>,
}

impl Reporter {
    pub fn new(descriptions: HashMap<UnitRef, String>, keep_going: bool) -> Self {
        Self {
            descriptions: Arc::new(descriptions),
            keep_going,
            stop: Arc::new(AtomicBool::new(false)),
            report: Arc::new(Mutex::new(RunReport::default())),
        }
    }

    /// Flag that makes the observer veto the next status it sees.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn observer(&self) -> impl FnMut(&Status) -> bool + Send + 'static {
        let this = self.clone();
        move |status: &Status| this.observe(status)
    }

    fn describe(&self, unit: UnitRef) -> String {
        self.descriptions
            .get(&unit)
            .cloned()
            .unwrap_or_else(|| unit.to_string())
    }

    fn observe(&self, status: &Status) -> bool {
        if self.stop.load(Ordering::SeqCst) {
            warn!(unit = %status.unit(), "stop requested; cancelling run");
            return false;
        }

        let unit = status.unit();
        match status {
            Status::Start { .. } => {
                info!(unit = %unit, "started: {}", self.describe(unit));
                true
            }
            Status::Success { .. } => {
                info!(unit = %unit, "finished: {}", self.describe(unit));
                self.report.lock().succeeded += 1;
                true
            }
            Status::Failure { message, .. } => {
                let description = self.describe(unit);
                error!(unit = %unit, "failed: {description}: {message}");
                self.report
                    .lock()
                    .failures
                    .push((description, message.clone()));
                self.keep_going
            }
            Status::Busy { .. } => true,
        }
    }

    /// Snapshot of the report so far.
    pub fn report(&self) -> RunReport {
        self.report.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ExecutionId, FileId};

    fn reporter(keep_going: bool) -> Reporter {
        let descriptions = HashMap::from([(UnitRef::File(FileId(0)), "load input".to_string())]);
        Reporter::new(descriptions, keep_going)
    }

    #[test]
    fn failure_vetoes_unless_keep_going() {
        let failure = Status::Failure {
            unit: UnitRef::Execution(ExecutionId(3)),
            message: "boom".into(),
        };

        let strict = reporter(false);
        assert!(!strict.observer()(&failure));
        assert_eq!(
            strict.report().failures,
            vec![("exec#3".to_string(), "boom".to_string())]
        );

        let lenient = reporter(true);
        assert!(lenient.observer()(&failure));
    }

    #[test]
    fn stop_flag_vetoes_everything() {
        let reporter = reporter(true);
        let mut observe = reporter.observer();
        let start = Status::Start {
            unit: UnitRef::File(FileId(0)),
        };
        assert!(observe(&start));
        reporter.stop_flag().store(true, Ordering::SeqCst);
        assert!(!observe(&start));
    }
}
