//! Peer Management element and reason codes

use serde::{Deserialize, Serialize};
use std::fmt;

/// Mesh peering reason codes (802.11s)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PmpReasonCode {
    Reserved,
    PeeringCancelled,
    MeshMaxPeers,
    MeshCapabilityPolicyViolation,
    MeshCloseRcvd,
    MeshMaxRetries,
    MeshConfirmTimeout,
    MeshInvalidGtk,
    MeshInconsistentParameters,
    MeshInvalidSecurityCapability,
}

impl PmpReasonCode {
    /// Numeric reason code
    pub fn code(&self) -> u16 {
        match self {
            PmpReasonCode::Reserved => 0,
            PmpReasonCode::PeeringCancelled => 52,
            PmpReasonCode::MeshMaxPeers => 53,
            PmpReasonCode::MeshCapabilityPolicyViolation => 54,
            PmpReasonCode::MeshCloseRcvd => 55,
            PmpReasonCode::MeshMaxRetries => 56,
            PmpReasonCode::MeshConfirmTimeout => 57,
            PmpReasonCode::MeshInvalidGtk => 58,
            PmpReasonCode::MeshInconsistentParameters => 59,
            PmpReasonCode::MeshInvalidSecurityCapability => 60,
        }
    }
}

impl fmt::Display for PmpReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PmpReasonCode::Reserved => "RESERVED",
            PmpReasonCode::PeeringCancelled => "PEERING_CANCELLED",
            PmpReasonCode::MeshMaxPeers => "MESH_MAX_PEERS",
            PmpReasonCode::MeshCapabilityPolicyViolation => "MESH_CAPABILITY_POLICY_VIOLATION",
            PmpReasonCode::MeshCloseRcvd => "MESH_CLOSE_RCVD",
            PmpReasonCode::MeshMaxRetries => "MESH_MAX_RETRIES",
            PmpReasonCode::MeshConfirmTimeout => "MESH_CONFIRM_TIMEOUT",
            PmpReasonCode::MeshInvalidGtk => "MESH_INVALID_GTK",
            PmpReasonCode::MeshInconsistentParameters => "MESH_INCONSISTENT_PARAMETERS",
            PmpReasonCode::MeshInvalidSecurityCapability => "MESH_INVALID_SECURITY_CAPABILITY",
        };
        write!(f, "{} ({})", name, self.code())
    }
}

/// Peer Management element, one variant per frame subtype
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerManagement {
    Open {
        local_link_id: u16,
    },
    Confirm {
        local_link_id: u16,
        peer_link_id: u16,
    },
    Close {
        local_link_id: u16,
        peer_link_id: u16,
        reason: PmpReasonCode,
    },
}

impl PeerManagement {
    /// Link id chosen by the sender
    pub fn local_link_id(&self) -> u16 {
        match *self {
            PeerManagement::Open { local_link_id }
            | PeerManagement::Confirm { local_link_id, .. }
            | PeerManagement::Close { local_link_id, .. } => local_link_id,
        }
    }

    pub fn subtype(&self) -> &'static str {
        match self {
            PeerManagement::Open { .. } => "open",
            PeerManagement::Confirm { .. } => "confirm",
            PeerManagement::Close { .. } => "close",
        }
    }
}
