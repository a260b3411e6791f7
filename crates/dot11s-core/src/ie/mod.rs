//! Information elements
//!
//! Decoded value objects for the HWMP and peering elements. Each is built
//! fresh for an outgoing frame and consumed on receipt; only the routing
//! and peer link state derived from them persists. Bit-level encoding is
//! left to whoever owns the radio; the serde derives exist for traces.

pub mod beacon_timing;
pub mod configuration;
pub mod peer_management;
pub mod perr;
pub mod prep;
pub mod preq;
pub mod rann;

pub use beacon_timing::{BeaconTimingUnit, IeBeaconTiming};
pub use configuration::{
    IeConfiguration, IeMeshId, MeshCapability, PathSelectionMetric, PathSelectionProtocol,
};
pub use peer_management::{PeerManagement, PmpReasonCode};
pub use perr::{FailedDestination, IePerr};
pub use prep::IePrep;
pub use preq::{IePreq, PreqTarget};
pub use rann::IeRann;
