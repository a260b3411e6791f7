//! Top-level mesh configuration
//!
//! One JSON document configures every protocol object of a station.
//! Missing sections and fields fall back to the dot11Mesh* defaults.

use crate::error::{MeshError, MeshResult};
use crate::flame::FlameConfig;
use crate::hwmp::HwmpConfig;
use crate::peer::PeerLinkConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    pub hwmp: HwmpConfig,
    pub peer: PeerLinkConfig,
    pub flame: FlameConfig,
}

impl MeshConfig {
    pub fn with_hwmp(mut self, hwmp: HwmpConfig) -> Self {
        self.hwmp = hwmp;
        self
    }

    pub fn with_peer(mut self, peer: PeerLinkConfig) -> Self {
        self.peer = peer;
        self
    }

    pub fn with_flame(mut self, flame: FlameConfig) -> Self {
        self.flame = flame;
        self
    }

    /// Parse and validate a JSON document
    pub fn from_json(json: &str) -> MeshResult<Self> {
        let config: MeshConfig =
            serde_json::from_str(json).map_err(|e| MeshError::Config(format!("invalid JSON: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_pretty(&self) -> MeshResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| MeshError::Config(e.to_string()))
    }

    pub fn validate(&self) -> MeshResult<()> {
        self.hwmp.validate()?;
        self.peer.validate()?;
        self.flame.validate()
    }
}
