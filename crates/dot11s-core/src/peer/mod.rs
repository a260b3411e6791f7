//! Mesh Peering Management
//!
//! Stations become peers through an Open/Confirm exchange in both
//! directions. [`PeerLink`] is the per-neighbour state machine,
//! [`PeerLinkManager`] owns the links of a mesh point and reports each
//! ESTAB entry and exit to the routing protocol.

mod beacon;
mod config;
mod link;
mod manager;
mod stats;

pub use beacon::{next_beacon_shift, BeaconInfo, NeighbourBeacons};
pub use config::PeerLinkConfig;
pub use link::{LinkOutput, PeerEvent, PeerLink, PeerState};
pub use manager::{PeerLinkManager, PeerLinkStatusCallback};
pub use stats::PeerStats;
