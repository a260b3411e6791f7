//! # 802.11s Mesh Routing Core
//!
//! This crate implements the routing and peering layer of an 802.11s-style
//! wireless mesh network, driven entirely by discrete events.
//!
//! ## Overview
//!
//! - **HWMP**: Hybrid Wireless Mesh Protocol path selection. On-demand
//!   PREQ/PREP discovery, PERR on link failure, and proactive trees built
//!   by a root station through periodic PREQs or RANNs
//! - **Peer Link Management**: the Open/Confirm/Close handshake that must
//!   complete before two stations exchange routing or data frames, with
//!   beacon-driven discovery, beacon loss detection and beacon collision
//!   avoidance
//! - **FLAME**: a flat hop-count protocol that learns paths from data
//!   frames and needs no control traffic
//! - **Simulation**: a multi-node simulator over a static topology
//!
//! ## Architecture
//!
//! ```text
//!                         MeshEnvironment (now / schedule / cancel / send)
//!                                   ▲
//!   ┌───────────────────────────────┼────────────────────────────────┐
//!   │ MeshPoint                     │                                │
//!   │   ┌────────────────────┐  link up/down   ┌──────────────────┐  │
//!   │   │ PeerLinkManager    │────────────────►│ RoutingProtocol  │  │
//!   │   │  PeerLink per peer │                 │  HWMP | FLAME    │  │
//!   │   └────────────────────┘                 └──────────────────┘  │
//!   └────────────────────────────────────────────────────────────────┘
//!            ▲ beacons, Open/Confirm/Close        ▲ PREQ/PREP/PERR/RANN, data
//!            └─────────────── frames from the MAC layer ─┘
//! ```
//!
//! Protocol objects never block and never call back into themselves:
//! timers are armed through [`MeshEnvironment::schedule`] and delivered
//! back as [`Timer`] values.
//!
//! ## Example
//!
//! ```rust,no_run
//! use dot11s_core::{MeshConfig, MeshSimulator, SimConfig, TopologyKind};
//! use std::time::Duration;
//!
//! let config = SimConfig::default().with_node_count(4).with_topology(TopologyKind::Chain);
//! let mut sim = MeshSimulator::new_hwmp(config, &MeshConfig::default()).unwrap();
//! sim.run_until(Duration::from_secs(2), |s| s.all_links_established());
//!
//! let uid = sim.send_data(0, 3, 64).unwrap();
//! sim.run_for(Duration::from_secs(1));
//! println!("delivered: {}", sim.is_delivered(uid));
//! println!("{}", sim.stats());
//! ```

pub mod address;
pub mod config;
pub mod error;
pub mod flame;
pub mod frame;
pub mod hwmp;
pub mod ie;
pub mod metric;
pub mod node;
pub mod peer;
pub mod scheduler;
pub mod simulation;
pub mod time;
pub mod traits;

#[cfg(test)]
mod testing;

pub use address::{InterfaceId, MacAddress, INTERFACE_ANY};
pub use config::MeshConfig;
pub use error::{MeshError, MeshResult};
pub use flame::{FlameConfig, FlameProtocol};
pub use frame::{DataFrame, DataPacket, Frame, ManagementFrame, RoutingFrame};
pub use hwmp::{HwmpConfig, HwmpProtocol, RootMode, RoutingTable};
pub use metric::{AirtimeMetric, Metric, MAX_METRIC};
pub use node::{Delivery, MeshPoint, NodeStats};
pub use peer::{PeerLink, PeerLinkConfig, PeerLinkManager, PeerState};
pub use scheduler::{EventQueue, Timer, TimerId};
pub use simulation::{MeshSimulator, SimConfig, SimEvent, SimStats, Topology, TopologyKind};
pub use time::{tu, SimTime, TU};
pub use traits::{MeshEnvironment, PeerLinkHost, PeerLinkStatus, RouteOutcome, RoutingProtocol};
