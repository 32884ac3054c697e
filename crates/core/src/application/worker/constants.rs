// Engine constants (no magic values)
use std::time::Duration;

/// Spacing between the target completion times of two jobs in a batch (ms)
pub const TIME_BETWEEN_JOBS_MS: f64 = 1.0;

/// Spacing between the first completions of two consecutive batches (ms)
///
/// One job slot per stage of a four-stage batch, so consecutive batches never
/// interleave their completions.
pub const TIME_BETWEEN_BATCHES_MS: f64 = 4.0;

/// Time given to freshly launched workers to subscribe before the start
/// broadcast (ms)
pub const LAUNCH_BUFFER_MS: f64 = 10.0;

/// Extra time allowed past the last planned completion before the executor
/// declares a desync
pub const COMPLETION_GRACE: Duration = Duration::from_secs(5);

/// Binary search rounds per extraction batch (resolution: max value / 2^8)
pub const EXTRACTION_SEARCH_ROUNDS: u32 = 8;

/// Iteration cap of the grow-thread Newton solver
pub const GROW_SOLVER_MAX_ITERATIONS: usize = 100;

/// Newton solver stops once a correction is at most this many threads
pub const GROW_SOLVER_TOLERANCE: f64 = 1.0;

/// Growth model: base per-thread rate, divided by the instability level
pub const BASE_GROWTH_RATE: f64 = 0.03;

/// Growth model: cap on the adjusted per-thread rate
pub const MAX_GROWTH_RATE: f64 = 0.0035;

/// Growth stage work duration relative to the extraction stage
pub const GROW_DURATION_FACTOR: f64 = 3.2;

/// Restorative stage work duration relative to the extraction stage
pub const RESTORE_DURATION_FACTOR: f64 = 4.0;

/// Per-thread capacity cost of the extraction stage
pub const PRIMARY_THREAD_COST: f64 = 1.70;

/// Per-thread capacity cost of the growth stage
pub const SECONDARY_THREAD_COST: f64 = 1.75;

/// Per-thread capacity cost of either restorative stage
pub const RESTORE_THREAD_COST: f64 = 1.75;

/// Instability added per extraction thread
pub const PRIMARY_FORTIFY_PER_THREAD: f64 = 0.002;

/// Instability added per growth thread
pub const SECONDARY_FORTIFY_PER_THREAD: f64 = 0.004;

/// Instability removed per restorative thread
pub const RESTORE_AMOUNT_PER_THREAD: f64 = 0.05;
