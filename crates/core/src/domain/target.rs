// Target Domain Model

use serde::{Deserialize, Serialize};

use super::error::{DomainError, Result};

fn default_multiplier() -> f64 {
    1.0
}

/// Snapshot of the target resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetState {
    pub name: String,
    /// Current value held by the target
    pub value: f64,
    pub max_value: f64,
    /// Side-effect metric raised by extraction/growth, lowered by restoration
    pub instability: f64,
    pub min_instability: f64,
    /// Target growth parameter as a fraction (e.g. 0.25 for a parameter of 25)
    pub growth_rate: f64,
    /// Fraction of the current value a single extraction thread removes
    pub steal_per_thread: f64,
    /// Work duration of a single extraction stage (ms)
    pub base_duration_ms: f64,
    #[serde(default = "default_multiplier")]
    pub player_multiplier: f64,
    #[serde(default = "default_multiplier")]
    pub world_multiplier: f64,
}

impl TargetState {
    /// Value at maximum and instability at minimum
    ///
    /// Exact comparison on purpose: this is checked against the authoritative
    /// snapshot, never against a planner projection.
    pub fn is_prepped(&self) -> bool {
        self.value == self.max_value && self.instability == self.min_instability
    }

    /// Growth model parameters at the given instability level
    pub fn growth_params(&self, security_level: f64) -> GrowthParams {
        GrowthParams {
            growth_rate: self.growth_rate,
            player_multiplier: self.player_multiplier,
            world_multiplier: self.world_multiplier,
            security_level,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_value <= 0.0 || !self.max_value.is_finite() {
            return Err(DomainError::InvalidTarget(format!(
                "{}: max value must be positive",
                self.name
            )));
        }
        if self.value < 0.0 || self.value > self.max_value {
            return Err(DomainError::InvalidTarget(format!(
                "{}: value {} outside [0, {}]",
                self.name, self.value, self.max_value
            )));
        }
        if self.min_instability <= 0.0 || self.instability < self.min_instability {
            return Err(DomainError::InvalidTarget(format!(
                "{}: instability {} below minimum {}",
                self.name, self.instability, self.min_instability
            )));
        }
        if self.steal_per_thread <= 0.0 || self.steal_per_thread > 1.0 {
            return Err(DomainError::InvalidTarget(format!(
                "{}: steal per thread must be in (0, 1]",
                self.name
            )));
        }
        if self.base_duration_ms < 0.0 {
            return Err(DomainError::InvalidTarget(format!(
                "{}: negative base duration",
                self.name
            )));
        }
        Ok(())
    }
}

/// Inputs of the exponential growth model
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GrowthParams {
    pub growth_rate: f64,
    pub player_multiplier: f64,
    pub world_multiplier: f64,
    pub security_level: f64,
}
