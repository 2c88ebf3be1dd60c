//! Executor strategies.
//!
//! An executor is chosen once per pool run. Every strategy reports exactly one
//! [`Completion`] per submitted unit, whether the worker returned, failed or
//! panicked.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::Sender;
use rayon::{ThreadPool, ThreadPoolBuilder};

use super::command::{CommandSpec, CommandWorker};
use super::UnitWorker;
use crate::config::ExecutionMode;
use crate::error::{Error, Result};
use crate::model::{Unit, UnitFailure, UnitOutput};

/// Result of one unit, tagged with its output position.
pub(crate) type Completion = (usize, std::result::Result<UnitOutput, UnitFailure>);

/// Builds the thread pool an executor runs on.
pub(crate) type PoolBuilder = fn(usize) -> std::result::Result<ThreadPool, String>;

/// Stop signal shared by every job of one pool run.
///
/// Trips when the deadline passes or when [`cancel`](Self::cancel) is called.
/// Jobs check it before starting a unit; a tripped token never resets.
#[derive(Debug, Clone)]
pub(crate) struct CancelToken {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    pub(crate) fn new(deadline: Option<Instant>) -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            deadline,
        }
    }

    pub(crate) fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
            || self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

/// Strategy for running units.
pub(crate) trait Executor: Send + Sync {
    /// Start processing `unit` unless `cancel` has tripped; report on `done`
    /// when finished.
    fn submit(&self, position: usize, unit: Unit, done: Sender<Completion>, cancel: &CancelToken);

    /// Name used in logs.
    fn name(&self) -> &'static str;
}

/// Runs the worker in-process on a rayon pool.
pub(crate) struct ThreadExecutor {
    pool: ThreadPool,
    worker: Arc<dyn UnitWorker>,
}

impl Executor for ThreadExecutor {
    fn submit(&self, position: usize, unit: Unit, done: Sender<Completion>, cancel: &CancelToken) {
        let worker = Arc::clone(&self.worker);
        let cancel = cancel.clone();
        self.pool.spawn(move || {
            if skip_cancelled(&unit, &cancel) {
                return;
            }
            let outcome = isolate(&unit, || worker.process(&unit));
            report(&done, position, &unit, outcome);
        });
    }

    fn name(&self) -> &'static str {
        "thread"
    }
}

/// Drives one child process per unit from a rayon pool.
pub(crate) struct ProcessExecutor {
    pool: ThreadPool,
    command: CommandSpec,
}

impl Executor for ProcessExecutor {
    fn submit(&self, position: usize, unit: Unit, done: Sender<Completion>, cancel: &CancelToken) {
        let command = self.command.clone();
        let cancel = cancel.clone();
        self.pool.spawn(move || {
            if skip_cancelled(&unit, &cancel) {
                return;
            }
            let outcome = isolate(&unit, || command.invoke_until(&unit, &cancel));
            report(&done, position, &unit, outcome);
        });
    }

    fn name(&self) -> &'static str {
        "process"
    }
}

/// Runs each unit inline, on the submitting thread.
pub(crate) struct SequentialExecutor {
    worker: Arc<dyn UnitWorker>,
}

impl SequentialExecutor {
    pub(crate) fn new(worker: Arc<dyn UnitWorker>) -> Self {
        Self { worker }
    }
}

impl Executor for SequentialExecutor {
    fn submit(&self, position: usize, unit: Unit, done: Sender<Completion>, cancel: &CancelToken) {
        if skip_cancelled(&unit, cancel) {
            return;
        }
        let outcome = isolate(&unit, || self.worker.process(&unit));
        report(&done, position, &unit, outcome);
    }

    fn name(&self) -> &'static str {
        "sequential"
    }
}

fn skip_cancelled(unit: &Unit, cancel: &CancelToken) -> bool {
    let cancelled = cancel.is_cancelled();
    if cancelled {
        log::debug!("Unit {} not started: run cancelled", unit.index);
    }
    cancelled
}

fn report(
    done: &Sender<Completion>,
    position: usize,
    unit: &Unit,
    outcome: std::result::Result<UnitOutput, UnitFailure>,
) {
    if done.send((position, outcome)).is_err() {
        log::debug!("Unit {} finished after the collector stopped; result dropped", unit.index);
    }
}

/// Build the executor for `mode` with `workers` threads.
///
/// Process mode needs a worker that exposes a [`CommandSpec`]. If
/// `build_pool` fails the units run sequentially instead.
pub(crate) fn build_executor(
    mode: ExecutionMode,
    workers: usize,
    worker: Arc<dyn UnitWorker>,
    build_pool: PoolBuilder,
) -> Result<Box<dyn Executor>> {
    let command = match mode {
        ExecutionMode::Thread => None,
        ExecutionMode::Process => Some(worker.command().ok_or_else(|| {
            Error::Config("process mode requires a worker with a command".into())
        })?),
    };

    let pool = match build_pool(workers) {
        Ok(pool) => pool,
        Err(e) => {
            log::warn!("Cannot start {} worker threads ({}); running sequentially", workers, e);
            let worker: Arc<dyn UnitWorker> = match command {
                Some(spec) => Arc::new(CommandWorker::new(spec)),
                None => worker,
            };
            return Ok(Box::new(SequentialExecutor::new(worker)));
        }
    };

    Ok(match command {
        Some(command) => Box::new(ProcessExecutor { pool, command }),
        None => Box::new(ThreadExecutor { pool, worker }),
    })
}

pub(crate) fn build_thread_pool(workers: usize) -> std::result::Result<ThreadPool, String> {
    ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .thread_name(|i| format!("pagewise-worker-{}", i))
        .build()
        .map_err(|e| e.to_string())
}

/// Run one unit, turning errors and panics into a recorded failure.
fn isolate<F>(unit: &Unit, work: F) -> std::result::Result<UnitOutput, UnitFailure>
where
    F: FnOnce() -> Result<UnitOutput>,
{
    if !unit.workdir.as_os_str().is_empty() {
        if let Err(e) = std::fs::create_dir_all(&unit.workdir) {
            return Err(UnitFailure::failed(format!(
                "cannot create {}: {}",
                unit.workdir.display(),
                e
            )));
        }
    }

    match catch_unwind(AssertUnwindSafe(work)) {
        Ok(Ok(output)) => check_ownership(unit, output),
        Ok(Err(Error::Timeout(message))) => Err(UnitFailure::timed_out(message)),
        Ok(Err(e)) => Err(UnitFailure::failed(e.to_string())),
        Err(payload) => Err(UnitFailure::panicked(format!(
            "worker panicked: {}",
            panic_message(payload.as_ref())
        ))),
    }
}

/// Elements must belong to the unit that produced them.
fn check_ownership(
    unit: &Unit,
    output: UnitOutput,
) -> std::result::Result<UnitOutput, UnitFailure> {
    let foreign = output
        .sub_elements
        .iter()
        .find(|e| e.document_id != unit.document_id || e.unit_index != unit.index);
    match foreign {
        Some(element) => Err(UnitFailure::failed(format!(
            "element {} does not belong to unit {} of {}",
            element.content_id, unit.index, unit.document_id
        ))),
        None => Ok(output),
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
