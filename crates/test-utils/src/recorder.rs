use std::sync::Arc;

use parking_lot::Mutex;
use taskgraph::dag::{Status, UnitRef};

/// Observer that records every status it receives, in delivery order.
///
/// Clones share the same log, so one clone can be handed to a graph while
/// the test keeps another to inspect afterwards.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<Status>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Observer that records and never cancels.
    pub fn observer(&self) -> impl FnMut(&Status) -> bool + Send + 'static {
        self.vetoing(|_| false)
    }

    /// Observer that records, then cancels the run when `veto` matches.
    pub fn vetoing<P>(&self, veto: P) -> impl FnMut(&Status) -> bool + Send + 'static
    where
        P: Fn(&Status) -> bool + Send + 'static,
    {
        let events = Arc::clone(&self.events);
        move |status: &Status| {
            events.lock().push(status.clone());
            !veto(status)
        }
    }

    pub fn events(&self) -> Vec<Status> {
        self.events.lock().clone()
    }

    pub fn for_unit(&self, unit: UnitRef) -> Vec<Status> {
        self.events()
            .into_iter()
            .filter(|s| s.unit() == unit)
            .collect()
    }

    /// Number of recorded statuses of the given kind (`"start"`, `"success"`, ...).
    pub fn count(&self, kind: &str) -> usize {
        self.events().iter().filter(|s| s.kind() == kind).count()
    }

    /// Position of the first status matching `pred`.
    pub fn position(&self, pred: impl Fn(&Status) -> bool) -> Option<usize> {
        self.events().iter().position(pred)
    }

    pub fn first_failure_message(&self, unit: UnitRef) -> Option<String> {
        self.for_unit(unit).into_iter().find_map(|s| match s {
            Status::Failure { message, .. } => Some(message),
            _ => None,
        })
    }
}
