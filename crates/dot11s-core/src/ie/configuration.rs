//! Mesh Configuration and Mesh ID elements
//!
//! Two mesh points may only peer when they run the same path selection
//! protocol and metric inside the same mesh (same Mesh ID).

use crate::error::{MeshError, MeshResult};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PathSelectionProtocol {
    #[default]
    Hwmp,
    Flame,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PathSelectionMetric {
    #[default]
    Airtime,
    HopCount,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CongestionControl {
    #[default]
    Null,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SynchronizationProtocol {
    #[default]
    NeighborOffset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AuthenticationProtocol {
    #[default]
    Null,
}

/// Mesh capability bits advertised in beacons and peering frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeshCapability {
    pub accept_peer_links: bool,
    pub forwarding: bool,
    pub power_save: bool,
}

impl Default for MeshCapability {
    fn default() -> Self {
        Self {
            accept_peer_links: true,
            forwarding: true,
            power_save: false,
        }
    }
}

/// Mesh Configuration element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IeConfiguration {
    pub protocol: PathSelectionProtocol,
    pub metric: PathSelectionMetric,
    pub congestion: CongestionControl,
    pub sync: SynchronizationProtocol,
    pub auth: AuthenticationProtocol,
    pub neighbors: u8,
    pub capability: MeshCapability,
}

impl IeConfiguration {
    pub fn for_protocol(protocol: PathSelectionProtocol) -> Self {
        let metric = match protocol {
            PathSelectionProtocol::Hwmp => PathSelectionMetric::Airtime,
            PathSelectionProtocol::Flame => PathSelectionMetric::HopCount,
        };
        Self {
            protocol,
            metric,
            ..Self::default()
        }
    }

    /// Active profile must match for two stations to peer
    pub fn is_compatible(&self, other: &IeConfiguration) -> bool {
        self.protocol == other.protocol
            && self.metric == other.metric
            && self.congestion == other.congestion
            && self.sync == other.sync
            && self.auth == other.auth
    }
}

/// Mesh ID element
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IeMeshId(String);

impl IeMeshId {
    pub const MAX_LEN: usize = 32;

    pub fn new(id: &str) -> MeshResult<Self> {
        if id.len() > Self::MAX_LEN {
            return Err(MeshError::MeshIdTooLong(id.len()));
        }
        Ok(Self(id.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compatibility_ignores_capability() {
        let a = IeConfiguration::default();
        let mut b = IeConfiguration::default();
        b.neighbors = 5;
        b.capability.accept_peer_links = false;
        assert!(a.is_compatible(&b));
    }

    #[test]
    fn test_protocol_mismatch() {
        let hwmp = IeConfiguration::for_protocol(PathSelectionProtocol::Hwmp);
        let flame = IeConfiguration::for_protocol(PathSelectionProtocol::Flame);
        assert!(!hwmp.is_compatible(&flame));
    }

    #[test]
    fn test_mesh_id_length() {
        assert!(IeMeshId::new("mesh").is_ok());
        let long = "x".repeat(33);
        assert_eq!(IeMeshId::new(&long), Err(MeshError::MeshIdTooLong(33)));
    }
}
