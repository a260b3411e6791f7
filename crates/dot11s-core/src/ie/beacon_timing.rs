//! Beacon Timing element
//!
//! Lists when each known neighbour last beaconed and at which interval, so
//! that stations two hops apart can spread their target beacon times.

use serde::{Deserialize, Serialize};

/// Timing report for one neighbour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeaconTimingUnit {
    /// Association id of the neighbour
    pub aid: u16,
    /// Last beacon reception time in TU
    pub last_beacon: u32,
    /// Beacon interval in TU
    pub beacon_interval: u32,
}

/// Beacon Timing element
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IeBeaconTiming {
    units: Vec<BeaconTimingUnit>,
}

impl IeBeaconTiming {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the unit for `aid`
    pub fn add_unit(&mut self, unit: BeaconTimingUnit) {
        self.remove_unit(unit.aid);
        self.units.push(unit);
    }

    pub fn remove_unit(&mut self, aid: u16) {
        self.units.retain(|u| u.aid != aid);
    }

    pub fn clear(&mut self) {
        self.units.clear();
    }

    pub fn units(&self) -> &[BeaconTimingUnit] {
        &self.units
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}
