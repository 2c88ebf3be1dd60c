//! Bounded-concurrency unit processing.
//!
//! A [`WorkerPool`] runs a [`UnitWorker`] over a batch of units and always
//! hands back one unit per input, ordered by unit index. Errors, panics and
//! deadline overruns are recorded on the affected unit; they never abort the
//! batch.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use pagewise::pool::{PoolOptions, WorkerPool};
//! use pagewise::model::{Unit, UnitOutput};
//!
//! let pool = WorkerPool::new(PoolOptions::default());
//! let worker = Arc::new(|unit: &Unit| -> pagewise::Result<UnitOutput> {
//!     Ok(UnitOutput::text(unit.read_source()?))
//! });
//! let units: Vec<Unit> = Vec::new();
//! let processed = pool.run(units, worker).unwrap();
//! ```

pub mod command;
mod executor;
mod workers;

use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::RecvTimeoutError;
use rayon::prelude::*;

pub use command::{serve_stdio, CommandSpec, CommandWorker};
pub use workers::{optimal_workers, WorkerPlan};

use crate::config::{ExecutionMode, PipelineConfig};
use crate::error::{Error, Result};
use crate::model::{Unit, UnitFailure, UnitOutput};
use executor::{
    build_executor, build_thread_pool, panic_message, CancelToken, Completion, PoolBuilder,
};

/// Processes one unit.
///
/// Implementations must be safe to call from several threads at once.
pub trait UnitWorker: Send + Sync {
    /// Extract content and elements from `unit`.
    fn process(&self, unit: &Unit) -> Result<UnitOutput>;

    /// Command that runs this worker in a child process, if it has one.
    fn command(&self) -> Option<CommandSpec> {
        None
    }
}

impl<F> UnitWorker for F
where
    F: Fn(&Unit) -> Result<UnitOutput> + Send + Sync,
{
    fn process(&self, unit: &Unit) -> Result<UnitOutput> {
        self(unit)
    }
}

/// Pool options.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolOptions {
    /// Requested number of workers
    pub max_workers: usize,
    /// Thread or process execution
    pub mode: ExecutionMode,
    /// Cores kept free
    pub reserved_cores: usize,
    /// Units not finished by this instant are returned as timed out
    pub deadline: Option<Instant>,
}

impl PoolOptions {
    /// Options from the pipeline configuration, without a deadline.
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            max_workers: config.max_workers,
            mode: config.mode,
            reserved_cores: config.reserved_cores,
            deadline: None,
        }
    }

    /// Set an absolute deadline.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Set a deadline `timeout` from now.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Set the requested worker count.
    pub fn with_max_workers(mut self, workers: usize) -> Self {
        self.max_workers = workers;
        self
    }

    /// Set the execution mode.
    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

/// Runs units with bounded concurrency and per-unit isolation.
///
/// When a deadline passes, units that have not started are never started and
/// process-mode children still running are killed. In-process workers that
/// are already running finish in the background; their results are dropped.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    options: PoolOptions,
    available_cores: usize,
    build_pool: PoolBuilder,
}

impl WorkerPool {
    /// Create a pool sized against the cores of this machine.
    pub fn new(options: PoolOptions) -> Self {
        Self {
            options,
            available_cores: num_cpus::get(),
            build_pool: build_thread_pool,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_pool_builder(mut self, build_pool: PoolBuilder) -> Self {
        self.build_pool = build_pool;
        self
    }

    /// Override the detected core count.
    pub fn with_available_cores(mut self, cores: usize) -> Self {
        self.available_cores = cores;
        self
    }

    /// Same pool, with units cut off at `deadline`.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.options.deadline = Some(deadline);
        self
    }

    /// Pool options.
    pub fn options(&self) -> &PoolOptions {
        &self.options
    }

    /// Worker plan for a batch of `unit_count` units.
    pub fn plan(&self, unit_count: usize) -> WorkerPlan {
        optimal_workers(
            self.options.max_workers,
            self.available_cores,
            self.options.reserved_cores,
            unit_count,
        )
    }

    /// Process `units` and return them ordered by index.
    ///
    /// Every input unit comes back exactly once, either with the worker's
    /// output attached or with a recorded failure. Only invalid input (two
    /// units with the same index) or an unusable process-mode worker is an
    /// error.
    pub fn run(&self, units: Vec<Unit>, worker: Arc<dyn UnitWorker>) -> Result<Vec<Unit>> {
        if units.is_empty() {
            return Ok(units);
        }

        let mut units = units;
        units.sort_by_key(|u| u.index);
        let mut seen = HashSet::with_capacity(units.len());
        if let Some(dup) = units.iter().find(|u| !seen.insert(u.index)) {
            return Err(Error::Invariant(format!("unit {} submitted twice", dup.index)));
        }

        let plan = self.plan(units.len());
        if let Some(warning) = &plan.warning {
            log::warn!("{}", warning);
        }
        let executor = build_executor(self.options.mode, plan.workers, worker, self.build_pool)?;
        log::info!(
            "Processing {} units with {} executor ({} workers)",
            units.len(),
            executor.name(),
            plan.workers
        );

        let deadline = self.options.deadline;
        let cancel = CancelToken::new(deadline);
        let (done, results) = crossbeam_channel::unbounded::<Completion>();
        let mut submitted = 0;
        for (position, unit) in units.iter().enumerate() {
            if cancel.is_cancelled() {
                break;
            }
            executor.submit(position, unit.clone(), done.clone(), &cancel);
            submitted += 1;
        }
        drop(done);

        let mut outcomes: Vec<Option<std::result::Result<UnitOutput, UnitFailure>>> =
            vec![None; units.len()];
        let mut received = 0;
        while received < submitted {
            let next = match deadline {
                Some(d) => results.recv_deadline(d),
                None => results.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };
            match next {
                Ok((position, outcome)) => {
                    outcomes[position] = Some(outcome);
                    received += 1;
                }
                Err(RecvTimeoutError::Timeout) => {
                    log::warn!(
                        "Deadline reached with {} of {} units finished",
                        received,
                        units.len()
                    );
                    break;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        // Queued jobs see this and never start; running children are killed.
        cancel.cancel();

        let mut failed = 0;
        let processed: Vec<Unit> = units
            .into_iter()
            .zip(outcomes)
            .enumerate()
            .map(|(position, (mut unit, outcome))| {
                match outcome {
                    Some(Ok(output)) => unit.apply(output),
                    Some(Err(failure)) => {
                        log::warn!("Unit {} failed: {}", unit.index, failure);
                        unit.fail(failure);
                        failed += 1;
                    }
                    None => {
                        let reason = if position < submitted {
                            "did not finish before the deadline"
                        } else {
                            "was not started before the deadline"
                        };
                        let message = format!("unit {} {}", unit.index, reason);
                        unit.fail(UnitFailure::timed_out(message));
                        failed += 1;
                    }
                }
                unit
            })
            .collect();

        log::info!(
            "Processed {} units: {} ok, {} failed",
            processed.len(),
            processed.len() - failed,
            failed
        );
        Ok(processed)
    }

    /// Apply `f` to every item with the pool's isolation guarantees.
    ///
    /// Results are in input order; a panic inside `f` becomes an error for
    /// that item only. Always runs in-process.
    pub fn map_isolated<T, R, F>(&self, items: Vec<T>, f: F) -> Vec<Result<R>>
    where
        T: Send,
        R: Send,
        F: Fn(&T) -> Result<R> + Send + Sync,
    {
        if items.is_empty() {
            return Vec::new();
        }

        let call = |item: &T| -> Result<R> {
            catch_unwind(AssertUnwindSafe(|| f(item))).unwrap_or_else(|payload| {
                Err(Error::Other(format!(
                    "task panicked: {}",
                    panic_message(payload.as_ref())
                )))
            })
        };

        let workers = self.plan(items.len()).workers;
        if workers <= 1 {
            return items.iter().map(call).collect();
        }
        match (self.build_pool)(workers) {
            Ok(pool) => pool.install(|| items.into_par_iter().map(|item| call(&item)).collect()),
            Err(e) => {
                log::warn!("Cannot start {} worker threads ({}); running sequentially", workers, e);
                items.iter().map(call).collect()
            }
        }
    }
}
