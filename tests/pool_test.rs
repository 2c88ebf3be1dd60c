//! Integration tests for the worker pool.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use pagewise::model::{FailureKind, UnitSource};
use pagewise::pool::{PoolOptions, UnitWorker, WorkerPool};
use pagewise::{Error, Result, Unit, UnitOutput};
use proptest::prelude::*;

fn units(n: u32) -> Vec<Unit> {
    (1..=n)
        .map(|i| {
            Unit::new(
                i,
                "doc",
                UnitSource::Inline {
                    text: format!("page {}", i),
                    origin: PathBuf::from("doc.txt"),
                },
            )
        })
        .collect()
}

fn pool(workers: usize) -> WorkerPool {
    WorkerPool::new(PoolOptions::default().with_max_workers(workers)).with_available_cores(16)
}

/// Echoes the unit text after a per-unit delay.
fn delayed(delays: Vec<u64>) -> Arc<dyn UnitWorker> {
    Arc::new(move |unit: &Unit| -> Result<UnitOutput> {
        let ms = delays.get(unit.slot()).copied().unwrap_or(0);
        thread::sleep(Duration::from_millis(ms));
        Ok(UnitOutput::text(unit.read_source()?))
    })
}

#[test]
fn proptest_order_under_random_timing() {
    proptest!(ProptestConfig::with_cases(24), |(
        delays in prop::collection::vec(0u64..8, 1..12),
        workers in 1usize..6,
    )| {
        let n = delays.len() as u32;
        let out = pool(workers).run(units(n), delayed(delays)).unwrap();

        let indices: Vec<u32> = out.iter().map(|u| u.index).collect();
        prop_assert_eq!(indices, (1..=n).collect::<Vec<_>>());
        for unit in &out {
            prop_assert_eq!(&unit.raw_content, &format!("page {}", unit.index));
            prop_assert!(unit.error.is_none());
        }
    });
}

#[test]
fn proptest_failures_stay_isolated() {
    proptest!(ProptestConfig::with_cases(24), |(
        n in 1u32..12,
        failing in prop::collection::hash_set(1u32..12, 0..5),
        panics in any::<bool>(),
    )| {
        let bad: HashSet<u32> = failing.into_iter().filter(|i| *i <= n).collect();
        let targets = bad.clone();
        let worker: Arc<dyn UnitWorker> = Arc::new(move |unit: &Unit| -> Result<UnitOutput> {
            if targets.contains(&unit.index) {
                if panics {
                    panic!("unit {} exploded", unit.index);
                }
                return Err(Error::Other("extraction failed".into()));
            }
            Ok(UnitOutput::text(unit.read_source()?))
        });

        let out = pool(3).run(units(n), worker).unwrap();
        prop_assert_eq!(out.len(), n as usize);
        for unit in &out {
            if bad.contains(&unit.index) {
                prop_assert!(unit.raw_content.is_empty());
                prop_assert!(unit.sub_elements.is_empty());
                let failure = unit.error.as_ref().unwrap();
                let expected = if panics { FailureKind::Panicked } else { FailureKind::Failed };
                prop_assert_eq!(failure.kind, expected);
            } else {
                prop_assert!(unit.error.is_none());
                prop_assert_eq!(&unit.raw_content, &format!("page {}", unit.index));
            }
        }
    });
}

#[test]
fn test_deadline_marks_slow_units() {
    let worker: Arc<dyn UnitWorker> = Arc::new(|unit: &Unit| -> Result<UnitOutput> {
        if unit.index == 2 {
            thread::sleep(Duration::from_millis(1500));
        }
        Ok(UnitOutput::text(unit.read_source()?))
    });
    let pool = WorkerPool::new(
        PoolOptions::default()
            .with_max_workers(2)
            .with_timeout(Duration::from_millis(300)),
    )
    .with_available_cores(4);

    let out = pool.run(units(3), worker).unwrap();
    assert_eq!(out.len(), 3);
    assert_eq!(out[0].raw_content, "page 1");
    assert!(out[1].error.as_ref().unwrap().is_timeout());
    assert_eq!(out[2].raw_content, "page 3");
}

#[test]
fn test_no_unit_starts_after_deadline() {
    let started = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&started);
    let worker: Arc<dyn UnitWorker> = Arc::new(move |unit: &Unit| -> Result<UnitOutput> {
        counter.fetch_add(1, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(100));
        Ok(UnitOutput::text(unit.read_source()?))
    });
    let pool = WorkerPool::new(
        PoolOptions::default()
            .with_max_workers(1)
            .with_timeout(Duration::from_millis(250)),
    )
    .with_available_cores(4);

    let out = pool.run(units(10), worker).unwrap();
    let at_return = started.load(Ordering::SeqCst);
    assert!(at_return < 10);

    // Queued units stay untouched once the run has returned.
    thread::sleep(Duration::from_millis(500));
    assert_eq!(started.load(Ordering::SeqCst), at_return);
    assert!(out[9].error.as_ref().unwrap().is_timeout());
}

#[test]
fn test_single_worker_is_sequential() {
    let out = pool(1).run(units(5), delayed(vec![3, 0, 2, 0, 1])).unwrap();
    assert_eq!(out.iter().map(|u| u.index).collect::<Vec<_>>(), vec![1, 2, 3, 4, 5]);
}

#[cfg(unix)]
mod process_mode {
    use super::*;
    use pagewise::pool::{CommandSpec, CommandWorker};
    use pagewise::ExecutionMode;

    #[test]
    fn test_process_mode_runs_children() {
        let script = concat!(
            r#"input=$(cat); case "$input" in *'"index":2'*) echo boom >&2; exit 3;; esac; "#,
            r#"printf '{"rawContent":"child"}'"#
        );
        let worker: Arc<dyn UnitWorker> = Arc::new(CommandWorker::new(
            CommandSpec::new("sh").with_arg("-c").with_arg(script),
        ));
        let pool = WorkerPool::new(
            PoolOptions::default()
                .with_max_workers(2)
                .with_mode(ExecutionMode::Process),
        )
        .with_available_cores(4);

        let out = pool.run(units(3), worker).unwrap();
        assert_eq!(out[0].raw_content, "child");
        assert!(out[1].error.as_ref().unwrap().message.contains("boom"));
        assert_eq!(out[2].raw_content, "child");
    }

    #[test]
    fn test_deadline_kills_running_children() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("finished");
        let worker: Arc<dyn UnitWorker> = Arc::new(CommandWorker::new(
            CommandSpec::new("sh")
                .with_arg("-c")
                .with_arg(r#"cat > /dev/null; sleep 1; touch "$MARKER""#)
                .with_env("MARKER", marker.to_string_lossy()),
        ));
        let pool = WorkerPool::new(
            PoolOptions::default()
                .with_max_workers(1)
                .with_mode(ExecutionMode::Process)
                .with_timeout(Duration::from_millis(200)),
        )
        .with_available_cores(4);

        let out = pool.run(units(1), worker).unwrap();
        assert!(out[0].error.as_ref().unwrap().is_timeout());

        thread::sleep(Duration::from_millis(1300));
        assert!(!marker.exists());
    }

    #[test]
    fn test_process_mode_needs_command() {
        let worker: Arc<dyn UnitWorker> =
            Arc::new(|_: &Unit| -> Result<UnitOutput> { Ok(UnitOutput::text("x")) });
        let pool = WorkerPool::new(PoolOptions::default().with_mode(ExecutionMode::Process));
        assert!(matches!(pool.run(units(1), worker), Err(Error::Config(_))));
    }
}
