//! Path Error element

use crate::address::MacAddress;
use crate::error::{MeshError, MeshResult};
use serde::{Deserialize, Serialize};

/// A destination that became unreachable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FailedDestination {
    pub destination: MacAddress,
    /// Sequence number that invalidates every older path to `destination`
    pub seqno: u32,
}

/// PERR information element
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IePerr {
    pub ttl: u8,
    destinations: Vec<FailedDestination>,
}

impl IePerr {
    /// Destination units (13 octets each) that fit in a 255-octet element
    pub const MAX_DESTINATIONS: usize = 19;

    pub fn new(ttl: u8) -> Self {
        Self {
            ttl,
            destinations: Vec::new(),
        }
    }

    /// Add a destination unit.
    ///
    /// Fails with [`MeshError::PerrFull`] once the element is full; callers
    /// must start a new element instead of truncating.
    pub fn add_destination(&mut self, unit: FailedDestination) -> MeshResult<()> {
        if self.destinations.iter().any(|d| d.destination == unit.destination) {
            return Ok(());
        }
        if self.is_full() {
            return Err(MeshError::PerrFull(self.destinations.len()));
        }
        self.destinations.push(unit);
        Ok(())
    }

    pub fn remove_destination(&mut self, destination: MacAddress) {
        self.destinations.retain(|d| d.destination != destination);
    }

    pub fn destinations(&self) -> &[FailedDestination] {
        &self.destinations
    }

    pub fn len(&self) -> usize {
        self.destinations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.destinations.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.destinations.len() >= Self::MAX_DESTINATIONS
    }

    pub fn decrement_ttl(&mut self) {
        self.ttl = self.ttl.saturating_sub(1);
    }

    /// Pack destinations into as many elements as needed
    pub fn split(ttl: u8, destinations: &[FailedDestination]) -> Vec<IePerr> {
        destinations
            .chunks(Self::MAX_DESTINATIONS)
            .map(|chunk| IePerr {
                ttl,
                destinations: chunk.to_vec(),
            })
            .collect()
    }
}
