//! Worker-count heuristic.

/// Share of available cores above which a requested worker count is flagged.
const HEAVY_LOAD_NUMERATOR: usize = 3;
const HEAVY_LOAD_DENOMINATOR: usize = 4;

/// How many workers a pool will actually use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerPlan {
    /// Workers to start
    pub workers: usize,
    /// Cores detected on the machine
    pub available_cores: usize,
    /// Set when the request would use at least 75% of the cores
    pub warning: Option<String>,
}

/// Compute the worker count for a batch.
///
/// `workers = clamp(requested, 1, min(available - reserved, units))`, never
/// below one. A request that would consume 75% or more of the available cores
/// produces a warning; it is not an error.
pub fn optimal_workers(
    requested: usize,
    available_cores: usize,
    reserved_cores: usize,
    unit_count: usize,
) -> WorkerPlan {
    let usable = available_cores.saturating_sub(reserved_cores);
    let upper = usable.min(unit_count).max(1);
    let workers = requested.clamp(1, upper);

    let warning = if available_cores > 0
        && requested * HEAVY_LOAD_DENOMINATOR >= available_cores * HEAVY_LOAD_NUMERATOR
    {
        Some(format!(
            "{} requested workers would use {}% of {} cores; consider lowering maxWorkers",
            requested,
            requested * 100 / available_cores,
            available_cores
        ))
    } else {
        None
    };

    WorkerPlan {
        workers,
        available_cores,
        warning,
    }
}
