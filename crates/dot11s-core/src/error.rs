//! Error types for the mesh stack.
//!
//! Route misses, discovery failures and peer link teardown are ordinary
//! protocol outcomes and are reported through return values and status
//! callbacks. The variants here cover misuse of the API and invalid
//! configuration.

use crate::address::{InterfaceId, MacAddress};
use thiserror::Error;

/// Mesh stack error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MeshError {
    /// Configuration value out of range
    #[error("configuration error: {0}")]
    Config(String),

    /// Address string could not be parsed
    #[error("invalid MAC address: {0}")]
    InvalidAddress(String),

    /// A locally originated packet already carries a routing header
    #[error("packet from upper layer already carries a routing header")]
    UnexpectedRoutingHeader,

    /// A forwarded packet is missing the routing header of this protocol
    #[error("packet carries no {0} routing header")]
    MissingRoutingHeader(&'static str),

    /// Interface was never installed on this mesh point
    #[error("unknown interface {0}")]
    UnknownInterface(InterfaceId),

    /// Group address used where a single station is required
    #[error("group address {0} used as unicast peer")]
    GroupAddress(MacAddress),

    /// PERR element cannot take another destination unit
    #[error("PERR element is full ({0} destinations)")]
    PerrFull(usize),

    /// PREQ element cannot take another destination unit
    #[error("PREQ element is full ({0} destinations)")]
    PreqFull(usize),

    /// No peer link exists for the given neighbour
    #[error("no peer link to {peer} on interface {interface}")]
    PeerLinkNotFound {
        interface: InterfaceId,
        peer: MacAddress,
    },

    /// Mesh ID longer than 32 octets
    #[error("mesh id too long ({0} bytes, max 32)")]
    MeshIdTooLong(usize),

    /// Node index outside the simulated network
    #[error("node index {0} out of range")]
    NodeOutOfRange(usize),
}

/// Result type for mesh operations
pub type MeshResult<T> = Result<T, MeshError>;
