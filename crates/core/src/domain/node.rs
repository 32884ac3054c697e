// Node Domain Model
//
// Capacity is stored as fixed-point micro-units so reserve/release pairs
// cancel exactly. Callers only ever see f64.

use serde::{Deserialize, Serialize};

use super::error::{DomainError, Result};

/// Node identifier (hostname)
pub type NodeId = String;

const MICROS_PER_UNIT: f64 = 1_000_000.0;

/// Convert a capacity amount to micro-units
///
/// Rejects negative, NaN and infinite amounts.
pub(crate) fn to_micros(amount: f64) -> Result<u64> {
    if !amount.is_finite() || amount < 0.0 {
        return Err(DomainError::InvalidAmount(amount));
    }
    Ok((amount * MICROS_PER_UNIT).round() as u64)
}

fn from_micros(micros: u64) -> f64 {
    micros as f64 / MICROS_PER_UNIT
}

/// A compute host with finite shared capacity
///
/// Invariant: `0 <= reserved <= total` at all times.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    id: NodeId,
    total: u64,
    reserved: u64,
}

impl Node {
    /// Create a node with nothing reserved
    pub fn new(id: impl Into<String>, total_capacity: f64) -> Result<Self> {
        Ok(Self {
            id: id.into(),
            total: to_micros(total_capacity)?,
            reserved: 0,
        })
    }

    /// Create a node from a fleet snapshot entry
    ///
    /// Capacity already in use on the host counts as reserved. Free capacity
    /// above the total is clamped to the total.
    pub fn from_snapshot(
        id: impl Into<String>,
        total_capacity: f64,
        free_capacity: f64,
    ) -> Result<Self> {
        let total = to_micros(total_capacity)?;
        let free = to_micros(free_capacity)?.min(total);
        Ok(Self {
            id: id.into(),
            total,
            reserved: total - free,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn total_capacity(&self) -> f64 {
        from_micros(self.total)
    }

    pub fn reserved(&self) -> f64 {
        from_micros(self.reserved)
    }

    pub fn available(&self) -> f64 {
        from_micros(self.available_micros())
    }

    pub(crate) fn available_micros(&self) -> u64 {
        self.total - self.reserved
    }

    /// True if this node can host `need` more capacity right now
    pub fn fits(&self, need: f64) -> bool {
        match to_micros(need) {
            Ok(micros) => micros <= self.available_micros(),
            Err(_) => false,
        }
    }

    /// Take `micros` of capacity; returns false (unchanged) if it does not fit
    pub(crate) fn take(&mut self, micros: u64) -> bool {
        if micros > self.available_micros() {
            return false;
        }
        self.reserved += micros;
        true
    }

    /// Give back `micros` of capacity; returns false (unchanged) if more than
    /// is currently reserved
    pub(crate) fn give_back(&mut self, micros: u64) -> bool {
        if micros > self.reserved {
            return false;
        }
        self.reserved -= micros;
        true
    }
}
