// tests/scheduler_properties.rs

mod common;
use crate::common::{TestResult, init_tracing, options, with_timeout};

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use taskgraph::cache::NoopCache;
use taskgraph::dag::{FileUnit, Status, UnitRef, UnitSet};
use taskgraph::engine::{Driver, FileStore};
use taskgraph::errors::{TaskgraphError, UnitError};
use taskgraph::types::{ExecutionId, FileHandle, FileId};
use taskgraph_test_utils::{CountingCache, EventLog, ScriptedUnit, content_file, failing_file};

#[tokio::test]
async fn failure_is_reported_with_a_message_and_the_run_continues() -> TestResult {
    init_tracing();

    let log = EventLog::new();
    let units = UnitSet::new()
        .with_unit(content_file(FileId(0), "in"))
        .with_unit(ScriptedUnit::new(ExecutionId(0)).deps(&[FileId(0)]).fail("compile error").build())
        .with_unit(ScriptedUnit::new(ExecutionId(1)).deps(&[FileId(0)]).fail("").build())
        .with_unit(ScriptedUnit::new(ExecutionId(2)).deps(&[FileId(0)]).build())
        .with_default_observer(log.observer());
    let driver = Driver::new(units, Arc::new(NoopCache), options(2));

    // Failures are not cancellations.
    assert!(with_timeout(driver.run()).await?);

    assert_eq!(
        log.first_failure_message(UnitRef::Execution(ExecutionId(0))).as_deref(),
        Some("compile error")
    );
    let empty = log
        .first_failure_message(UnitRef::Execution(ExecutionId(1)))
        .expect("failure delivered");
    assert!(!empty.is_empty());
    assert!(log.for_unit(UnitRef::Execution(ExecutionId(2))).contains(&Status::Success {
        unit: UnitRef::Execution(ExecutionId(2))
    }));
    Ok(())
}

#[tokio::test]
async fn panicking_unit_becomes_failure() -> TestResult {
    init_tracing();

    let log = EventLog::new();
    let units = UnitSet::new()
        .with_unit(ScriptedUnit::new(ExecutionId(0)).panic("index out of bounds").build())
        .with_unit(ScriptedUnit::new(ExecutionId(1)).build())
        .with_default_observer(log.observer());
    let driver = Driver::new(units, Arc::new(NoopCache), options(1));

    assert!(with_timeout(driver.run()).await?);

    let message = log
        .first_failure_message(UnitRef::Execution(ExecutionId(0)))
        .expect("panic reported");
    assert!(message.contains("panicked"));
    assert!(message.contains("index out of bounds"));
    assert_eq!(log.count("success"), 1);
    Ok(())
}

#[tokio::test]
async fn file_load_error_is_a_failure() -> TestResult {
    init_tracing();

    let log = EventLog::new();
    let units = UnitSet::new()
        .with_unit(failing_file(FileId(0), "permission denied"))
        .with_default_observer(log.observer());
    let driver = Driver::new(units, Arc::new(NoopCache), options(1));

    assert!(with_timeout(driver.run()).await?);
    let message = log
        .first_failure_message(UnitRef::File(FileId(0)))
        .expect("failure delivered");
    assert!(message.contains("permission denied"));
    Ok(())
}

/// Loading is never retried: a busy signal from a file unit is terminal.
#[tokio::test]
async fn busy_file_unit_is_a_failure() -> TestResult {
    init_tracing();

    let loads = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&loads);
    let log = EventLog::new();
    let file = UnitRef::File(FileId(0));
    let units = UnitSet::new()
        .with_unit(FileUnit::new(FileId(0), "contended", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(UnitError::Busy)
        }))
        .with_unit(ScriptedUnit::new(ExecutionId(0)).deps(&[FileId(0)]).build())
        .with_default_observer(log.observer());
    let driver = Driver::new(units, Arc::new(NoopCache), options(2));

    assert!(with_timeout(driver.run()).await?);

    assert_eq!(loads.load(Ordering::SeqCst), 1);
    let statuses = log.for_unit(file);
    assert_eq!(statuses.len(), 2);
    assert_eq!(statuses[0], Status::Start { unit: file });
    assert!(matches!(statuses[1], Status::Failure { .. }));
    assert_eq!(log.count("busy"), 0);
    assert!(log.for_unit(UnitRef::Execution(ExecutionId(0))).is_empty());
    Ok(())
}

/// Busy attempts produce no terminal status; each re-admission produces a
/// fresh `Start`.
#[tokio::test]
async fn busy_execution_is_retried_until_it_runs() -> TestResult {
    init_tracing();

    let calls = Arc::new(AtomicUsize::new(0));
    let log = EventLog::new();
    let exec = UnitRef::Execution(ExecutionId(0));
    let units = UnitSet::new()
        .with_unit(ScriptedUnit::new(ExecutionId(0)).busy(3).count_calls(&calls).build())
        .with_default_observer(log.observer());
    let driver = Driver::new(units, Arc::new(NoopCache), options(2));

    assert!(with_timeout(driver.run()).await?);

    assert_eq!(calls.load(Ordering::SeqCst), 4);
    assert_eq!(
        log.for_unit(exec),
        vec![
            Status::Start { unit: exec },
            Status::Start { unit: exec },
            Status::Start { unit: exec },
            Status::Start { unit: exec },
            Status::Success { unit: exec },
        ]
    );
    Ok(())
}

#[tokio::test]
async fn busy_backoff_delays_the_retry() -> TestResult {
    init_tracing();

    let units = UnitSet::new().with_unit(ScriptedUnit::new(ExecutionId(0)).busy(2).build());
    let opts = options(1).with_busy_backoff(Some(Duration::from_millis(40)));
    let driver = Driver::new(units, Arc::new(NoopCache), opts);

    let started = Instant::now();
    assert!(with_timeout(driver.run()).await?);
    assert!(started.elapsed() >= Duration::from_millis(80));
    Ok(())
}

/// After a veto: `false`, teardown exactly once, and nothing else starts.
#[tokio::test]
async fn veto_on_failure_stops_admission() -> TestResult {
    init_tracing();

    let log = EventLog::new();
    let cache = Arc::new(CountingCache::new());
    let units = UnitSet::new()
        .with_unit(content_file(FileId(0), "in"))
        .with_unit(ScriptedUnit::new(ExecutionId(0)).deps(&[FileId(0)]).fail("boom").produces(FileId(1), "x").build())
        .with_unit(ScriptedUnit::new(ExecutionId(1)).deps(&[FileId(1)]).build())
        .with_default_observer(log.vetoing(|s| matches!(s, Status::Failure { .. })));
    let driver = Driver::new(units, cache.clone(), options(4));

    let completed = with_timeout(driver.run()).await?;

    assert!(!completed);
    assert_eq!(cache.setups(), 1);
    assert_eq!(cache.teardowns(), 1);
    let veto = log
        .position(|s| matches!(s, Status::Failure { .. }))
        .expect("failure delivered");
    assert_eq!(veto, log.events().len() - 1, "nothing is delivered after the veto");
    assert!(log.for_unit(UnitRef::Execution(ExecutionId(1))).is_empty());
    Ok(())
}

/// Waiting for a worker that is still busy after a veto must not stall other
/// tasks on the same runtime thread.
#[tokio::test]
async fn shutdown_keeps_the_runtime_responsive() -> TestResult {
    init_tracing();

    let ticks = Arc::new(AtomicUsize::new(0));
    let ticker = tokio::spawn({
        let ticks = Arc::clone(&ticks);
        async move {
            let mut interval = tokio::time::interval(Duration::from_millis(5));
            loop {
                interval.tick().await;
                ticks.fetch_add(1, Ordering::SeqCst);
            }
        }
    });

    let ticks_at_veto = Arc::new(AtomicUsize::new(0));
    let log = EventLog::new();
    let units = UnitSet::new()
        .with_unit(ScriptedUnit::new(ExecutionId(0)).delay(Duration::from_millis(300)).build())
        .with_unit(ScriptedUnit::new(ExecutionId(1)).fail("quick").build())
        .with_default_observer({
            let ticks = Arc::clone(&ticks);
            let at_veto = Arc::clone(&ticks_at_veto);
            log.vetoing(move |s| {
                let veto = matches!(s, Status::Failure { .. });
                if veto {
                    at_veto.store(ticks.load(Ordering::SeqCst), Ordering::SeqCst);
                }
                veto
            })
        });
    let driver = Driver::new(units, Arc::new(NoopCache), options(2));

    let started = Instant::now();
    assert!(!with_timeout(driver.run()).await?);
    // The run still waits for the slow worker before returning.
    assert!(started.elapsed() >= Duration::from_millis(250));

    let advanced = ticks.load(Ordering::SeqCst) - ticks_at_veto.load(Ordering::SeqCst);
    assert!(advanced >= 10, "ticker advanced only {advanced} times during shutdown");
    ticker.abort();
    Ok(())
}

#[tokio::test]
async fn cache_setup_failure_is_fatal_after_cleanup() -> TestResult {
    init_tracing();

    let calls = Arc::new(AtomicUsize::new(0));
    let cache = Arc::new(CountingCache::failing_setup());
    let units = UnitSet::new().with_unit(ScriptedUnit::new(ExecutionId(0)).count_calls(&calls).build());
    let driver = Driver::new(units, cache.clone(), options(1));

    let err = with_timeout(driver.run()).await.expect_err("setup failure escapes");

    assert!(matches!(err, TaskgraphError::Other(_)));
    assert!(format!("{err:#}").contains("cache setup failed"));
    assert_eq!(cache.teardowns(), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test]
async fn unit_observer_takes_precedence_over_default() -> TestResult {
    init_tracing();

    let own = EventLog::new();
    let default = EventLog::new();
    let units = UnitSet::new()
        .with_unit(content_file(FileId(0), "a").with_observer(own.observer()))
        .with_unit(content_file(FileId(1), "b"))
        .with_default_observer(default.observer());
    let driver = Driver::new(units, Arc::new(NoopCache), options(2));

    assert!(with_timeout(driver.run()).await?);

    assert_eq!(own.events().len(), 2);
    assert!(own.events().iter().all(|s| s.unit() == UnitRef::File(FileId(0))));
    assert_eq!(default.events().len(), 2);
    assert!(default.events().iter().all(|s| s.unit() == UnitRef::File(FileId(1))));
    Ok(())
}

/// An execution whose input nobody produces never starts; the run still ends.
#[tokio::test]
async fn stranded_execution_does_not_hang_the_run() -> TestResult {
    init_tracing();

    let log = EventLog::new();
    let units = UnitSet::new()
        .with_unit(content_file(FileId(0), "a"))
        .with_unit(ScriptedUnit::new(ExecutionId(0)).deps(&[FileId(0), FileId(9)]).build())
        .with_default_observer(log.observer());
    let driver = Driver::new(units, Arc::new(NoopCache), options(2));

    assert!(with_timeout(driver.run()).await?);
    assert!(log.for_unit(UnitRef::Execution(ExecutionId(0))).is_empty());
    Ok(())
}

/// Publishing the same file twice keeps it present and admits dependents once.
#[tokio::test]
async fn double_publish_admits_dependents_once() -> TestResult {
    init_tracing();

    let id = FileId(0);
    let twice = FileUnit::new(id, "publish twice", move |publisher| {
        publisher.publish(id, FileHandle::from_bytes("first"));
        publisher.publish(id, FileHandle::from_bytes("second"));
        Ok(())
    });
    let log = EventLog::new();
    let exec = UnitRef::Execution(ExecutionId(0));
    let units = UnitSet::new()
        .with_unit(twice)
        .with_unit(ScriptedUnit::new(ExecutionId(0)).deps(&[id]).build())
        .with_default_observer(log.observer());
    let driver = Driver::new(units, Arc::new(NoopCache), options(2));
    let store = driver.file_store();

    assert!(with_timeout(driver.run()).await?);

    assert!(store.is_present(id));
    assert_eq!(store.get(id), Some(FileHandle::from_bytes("second")));
    assert_eq!(
        log.for_unit(exec)
            .iter()
            .filter(|s| matches!(s, Status::Start { .. }))
            .count(),
        1
    );
    Ok(())
}

/// Files already in a shared store count as produced.
#[tokio::test]
async fn prepopulated_store_satisfies_dependencies() -> TestResult {
    init_tracing();

    let store = Arc::new(FileStore::new());
    store.publish(FileId(5), FileHandle::from_bytes("cached"));
    let log = EventLog::new();
    let units = UnitSet::new()
        .with_unit(ScriptedUnit::new(ExecutionId(0)).deps(&[FileId(5)]).build())
        .with_default_observer(log.observer());
    let driver = Driver::with_store(units, Arc::new(NoopCache), options(1), store);

    assert!(with_timeout(driver.run()).await?);
    assert_eq!(log.count("success"), 1);
    Ok(())
}
