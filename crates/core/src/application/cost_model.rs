//! Job cost model
//!
//! Pure functions: capacity cost per stage, restorative thread counts and the
//! growth model with its inverse (threads needed to grow a value to a target).

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::application::worker::constants::*;
use crate::domain::{GrowthParams, JobKind};

/// Per-thread capacity cost of each stage role
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CostTable {
    pub primary: f64,
    pub restore1: f64,
    pub secondary: f64,
    pub restore2: f64,
}

impl Default for CostTable {
    fn default() -> Self {
        Self {
            primary: PRIMARY_THREAD_COST,
            restore1: RESTORE_THREAD_COST,
            secondary: SECONDARY_THREAD_COST,
            restore2: RESTORE_THREAD_COST,
        }
    }
}

impl CostTable {
    pub fn per_thread(&self, kind: JobKind) -> f64 {
        match kind {
            JobKind::Primary => self.primary,
            JobKind::Restore1 => self.restore1,
            JobKind::Secondary => self.secondary,
            JobKind::Restore2 => self.restore2,
        }
    }
}

/// How much instability each stage adds or removes per thread
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RestoreModel {
    pub primary_fortify: f64,
    pub secondary_fortify: f64,
    pub restore_per_thread: f64,
}

impl Default for RestoreModel {
    fn default() -> Self {
        Self {
            primary_fortify: PRIMARY_FORTIFY_PER_THREAD,
            secondary_fortify: SECONDARY_FORTIFY_PER_THREAD,
            restore_per_thread: RESTORE_AMOUNT_PER_THREAD,
        }
    }
}

/// Cost and effect model for every stage role
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobCostModel {
    pub costs: CostTable,
    pub restore: RestoreModel,
}

impl JobCostModel {
    pub fn new(costs: CostTable, restore: RestoreModel) -> Self {
        Self { costs, restore }
    }

    pub fn per_thread(&self, kind: JobKind) -> f64 {
        self.costs.per_thread(kind)
    }

    /// `threads * perThreadCost[kind]`
    pub fn cost(&self, kind: JobKind, threads: u32) -> f64 {
        threads as f64 * self.costs.per_thread(kind)
    }

    /// Instability added by `threads` of a stage (restorative stages add none)
    pub fn fortify_amount(&self, kind: JobKind, threads: u32) -> f64 {
        let per_thread = match kind {
            JobKind::Primary => self.restore.primary_fortify,
            JobKind::Secondary => self.restore.secondary_fortify,
            JobKind::Restore1 | JobKind::Restore2 => 0.0,
        };
        threads as f64 * per_thread
    }

    /// Instability removed by `threads` restorative threads
    pub fn restore_amount(&self, threads: u32) -> f64 {
        threads as f64 * self.restore.restore_per_thread
    }

    /// Restorative threads that fully offset `causing_threads` of `kind`
    pub fn restorative_threads_for(&self, kind: JobKind, causing_threads: u32) -> u32 {
        self.restore_threads_for_excess(self.fortify_amount(kind, causing_threads))
    }

    /// Restorative threads that remove `excess` instability in one shot
    pub fn restore_threads_for_excess(&self, excess: f64) -> u32 {
        if excess <= 0.0 {
            return 0;
        }
        (excess / self.restore.restore_per_thread).ceil() as u32
    }

    /// Growth threads covered by a single paired restorative thread
    pub fn growth_per_restore(&self) -> f64 {
        self.restore.restore_per_thread / self.restore.secondary_fortify
    }

    /// Work duration of a stage given the extraction stage's duration
    pub fn work_duration(kind: JobKind, base_duration_ms: f64) -> f64 {
        match kind {
            JobKind::Primary => base_duration_ms,
            JobKind::Secondary => base_duration_ms * GROW_DURATION_FACTOR,
            JobKind::Restore1 | JobKind::Restore2 => base_duration_ms * RESTORE_DURATION_FACTOR,
        }
    }

    /// Extraction threads for a steal fraction (at least one)
    pub fn extraction_threads_for(fraction: f64, steal_per_thread: f64) -> u32 {
        ((fraction / steal_per_thread).floor() as u32).max(1)
    }
}

/// Per-thread exponent of the growth model
pub fn growth_log_rate(params: &GrowthParams) -> f64 {
    let adjusted = (BASE_GROWTH_RATE / params.security_level).min(MAX_GROWTH_RATE);
    adjusted.ln_1p() * params.growth_rate * params.player_multiplier * params.world_multiplier
}

/// Value after one growth stage with `threads` threads
///
/// Each thread first adds one unit, then the sum grows exponentially.
pub fn apply_growth(value: f64, threads: u32, params: &GrowthParams) -> f64 {
    let threads = threads as f64;
    (value + threads) * (growth_log_rate(params) * threads).exp()
}

/// Minimal whole thread count that grows `current` to at least `target`
///
/// Newton iteration on `ln(current + t) + L*t = ln(target)`, seeded from the
/// linearized model, capped at `GROW_SOLVER_MAX_ITERATIONS`. The rounded
/// estimate is then corrected to the exact minimal count.
pub fn grow_threads_needed(current: f64, target: f64, params: &GrowthParams) -> u32 {
    let current = current.max(0.0);
    if current >= target {
        return 0;
    }

    let rate = growth_log_rate(params);
    let mut threads =
        (target - current) / (1.0 + (target / 16.0 + current * 15.0 / 16.0) * rate);

    let mut converged = false;
    for _ in 0..GROW_SOLVER_MAX_ITERATIONS {
        let start = (current + threads).max(f64::EPSILON);
        let next = ((threads - start * (start / target).ln()) / (1.0 + start * rate)).max(0.0);
        let diff = next - threads;
        threads = next;
        if diff.abs() <= GROW_SOLVER_TOLERANCE {
            converged = true;
            break;
        }
    }

    if !converged || !threads.is_finite() {
        warn!(
            current = %current,
            target = %target,
            estimate = %threads,
            "Grow solver did not converge, falling back to integer search"
        );
        threads = target - current;
    }

    minimal_threads(current, target, params, threads.ceil() as u64)
}

/// Integer bisection around `guess` for the smallest count reaching `target`
fn minimal_threads(current: f64, target: f64, params: &GrowthParams, guess: u64) -> u32 {
    let reaches = |threads: u64| {
        let threads = threads.min(u32::MAX as u64) as u32;
        apply_growth(current, threads, params) >= target
    };

    let mut hi = guess.max(1);
    while !reaches(hi) {
        if hi >= u32::MAX as u64 {
            return u32::MAX;
        }
        hi = (hi * 2).min(u32::MAX as u64);
    }

    // Invariant: !reaches(lo) && reaches(hi)
    let mut lo = hi.saturating_sub(2);
    if reaches(lo) {
        lo = 0;
    }
    while hi - lo > 1 {
        let mid = lo + (hi - lo) / 2;
        if reaches(mid) {
            hi = mid;
        } else {
            lo = mid;
        }
    }
    hi as u32
}
