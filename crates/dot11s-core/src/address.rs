//! Mesh addressing
//!
//! Mesh points and their radio interfaces are identified by 48-bit MAC
//! addresses. Interfaces are additionally numbered locally by an
//! [`InterfaceId`].

use crate::error::MeshError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Local interface index of a mesh point
pub type InterfaceId = u32;

/// Wildcard interface, used by invalid lookup results
pub const INTERFACE_ANY: InterfaceId = u32::MAX;

/// 48-bit IEEE MAC address
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    /// Broadcast address (all 0xFF)
    pub const BROADCAST: MacAddress = MacAddress([0xFF; 6]);

    /// Unset address (all 0x00)
    pub const ZERO: MacAddress = MacAddress([0x00; 6]);

    /// Create an address from raw bytes
    pub const fn from_bytes(bytes: [u8; 6]) -> Self {
        MacAddress(bytes)
    }

    /// Locally administered unicast address derived from an index.
    ///
    /// `from_index(1)` is `02:00:00:00:00:01`. Used by the simulator to
    /// give every node a stable, readable address.
    pub fn from_index(index: u32) -> Self {
        let b = index.to_be_bytes();
        MacAddress([0x02, 0x00, b[0], b[1], b[2], b[3]])
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }

    /// Check if this is the broadcast address
    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }

    /// Check if the group bit is set (broadcast or multicast)
    pub fn is_group(&self) -> bool {
        self.0[0] & 0x01 != 0
    }

    /// Check if this is unset
    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }
}

impl fmt::Debug for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MacAddress({})", self)
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

impl FromStr for MacAddress {
    type Err = MeshError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 6];
        let mut parts = s.split([':', '-']);
        for byte in bytes.iter_mut() {
            let part = parts
                .next()
                .ok_or_else(|| MeshError::InvalidAddress(s.to_string()))?;
            *byte = u8::from_str_radix(part, 16)
                .map_err(|_| MeshError::InvalidAddress(s.to_string()))?;
        }
        if parts.next().is_some() {
            return Err(MeshError::InvalidAddress(s.to_string()));
        }
        Ok(MacAddress(bytes))
    }
}
