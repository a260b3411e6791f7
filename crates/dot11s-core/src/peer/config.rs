//! Peer link parameters (dot11Mesh* attributes)

use crate::error::{MeshError, MeshResult};
use crate::ie::IeMeshId;
use crate::time::tu;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Peer link management configuration. Times in TU.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerLinkConfig {
    /// Open retransmission interval
    pub retry_timeout: u32,
    /// Wait in HOLDING for the peer's Close
    pub holding_timeout: u32,
    /// Wait in CNF_RCVD for the peer's Open
    pub confirm_timeout: u32,
    /// Open retransmissions before giving up
    pub max_retries: u16,
    /// Missed beacons before the link is canceled
    pub max_beacon_loss: u16,
    /// Consecutive unicast failures before the link is canceled
    pub max_packet_failure: u16,
    pub max_peer_links: usize,
    pub beacon_collision_avoidance: bool,
    /// Upper bound of a random beacon shift, in TU
    pub max_beacon_shift: u32,
    pub mesh_id: String,
    /// Seed for beacon shift jitter
    pub seed: u64,
}

impl Default for PeerLinkConfig {
    fn default() -> Self {
        Self {
            retry_timeout: 40,
            holding_timeout: 40,
            confirm_timeout: 40,
            max_retries: 4,
            max_beacon_loss: 2,
            max_packet_failure: 2,
            max_peer_links: 32,
            beacon_collision_avoidance: true,
            max_beacon_shift: 15,
            mesh_id: "mesh".to_string(),
            seed: 0,
        }
    }
}

impl PeerLinkConfig {
    pub fn with_mesh_id(mut self, mesh_id: &str) -> Self {
        self.mesh_id = mesh_id.to_string();
        self
    }

    pub fn with_max_peer_links(mut self, links: usize) -> Self {
        self.max_peer_links = links;
        self
    }

    pub fn with_max_retries(mut self, retries: u16) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn retry_delay(&self) -> Duration {
        tu(self.retry_timeout)
    }

    pub fn holding_delay(&self) -> Duration {
        tu(self.holding_timeout)
    }

    pub fn confirm_delay(&self) -> Duration {
        tu(self.confirm_timeout)
    }

    pub fn mesh_id_element(&self) -> MeshResult<IeMeshId> {
        IeMeshId::new(&self.mesh_id)
    }

    pub fn validate(&self) -> MeshResult<()> {
        for (name, value) in [
            ("retry_timeout", self.retry_timeout),
            ("holding_timeout", self.holding_timeout),
            ("confirm_timeout", self.confirm_timeout),
        ] {
            if value == 0 {
                return Err(MeshError::Config(format!("{name} must be greater than 0")));
            }
        }
        if self.max_beacon_loss == 0 {
            return Err(MeshError::Config("max_beacon_loss must be greater than 0".into()));
        }
        if self.max_packet_failure == 0 {
            return Err(MeshError::Config("max_packet_failure must be greater than 0".into()));
        }
        if self.beacon_collision_avoidance && self.max_beacon_shift == 0 {
            return Err(MeshError::Config(
                "max_beacon_shift must be greater than 0 with collision avoidance".into(),
            ));
        }
        self.mesh_id_element()?;
        Ok(())
    }
}
